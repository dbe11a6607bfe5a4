//! Range-request download engine.
//!
//! This module provides:
//! - Size-driven policy (buffer size, worker count, chunk plan)
//! - The download job model and its state machine
//! - A chunked worker-pool downloader with resume and cancellation
//! - A client for peers' catalogs built on top of it

pub mod client;
pub mod constants;
pub mod downloader;
pub mod job;
pub mod merge;
pub mod policy;
pub mod progress;
pub mod speed;
pub mod utils;

// Re-export public API
pub use client::{DownloadReport, FileShareClient, RemoteBrowser};
pub use downloader::{ChunkedDownloader, DownloadOptions};
pub use job::{ChunkRange, DownloadJob, JobState, job_id};
pub use policy::{adaptive_buffer_size, optimal_worker_count, plan_chunks, should_use_multithread};
pub use progress::{NoProgress, ProgressObserver, ProgressUpdate};
pub use speed::SpeedMonitor;
