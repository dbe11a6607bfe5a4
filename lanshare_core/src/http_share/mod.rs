//! HTTP file sharing module
//!
//! Serves the local catalog to peers: listing, range downloads, previews.

pub mod auth;
pub mod catalog;
pub mod range;
pub mod server;

pub use auth::{DEFAULT_TOKEN_TTL, TokenGate};
pub use catalog::{AddOutcome, CatalogItem, ShareCatalog, ShareEntry};
pub use range::{ByteRange, RangeError, parse_range};
pub use server::{ServerContext, create_router, serve_on, start_file_server};
