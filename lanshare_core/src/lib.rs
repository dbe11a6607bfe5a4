//! LAN file sharing core.
//!
//! Peers find each other with UDP beacons and active scans, serve a catalog
//! of files over HTTP with byte-range support, and pull files from each
//! other with a chunked, resumable, verified downloader.

pub mod config;
pub mod discovery;
pub mod error;
pub mod http_share;
pub mod integrity;
pub mod resume;
pub mod transfer;

pub use config::TransferConfig;
pub use discovery::{DiscoveryService, DiscoverySettings, PeerRecord, PeerRegistry};
pub use error::{ErrorKind, TransferError};
pub use http_share::{ServerContext, ShareCatalog, TokenGate};
pub use integrity::HashAlgorithm;
pub use resume::{ResumeRecord, ResumeStatus, ResumeStore};
pub use transfer::{
    ChunkedDownloader, DownloadJob, DownloadOptions, FileShareClient, JobState, ProgressUpdate,
    RemoteBrowser,
};
