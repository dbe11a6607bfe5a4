//! Error taxonomy shared by the transfer engine.

use std::path::PathBuf;
use thiserror::Error;

/// Coarse classification of a [`TransferError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Network,
    Protocol,
    Integrity,
    Resource,
    Cancellation,
}

#[derive(Debug, Error)]
pub enum TransferError {
    /// Connect/read/write/timeout failure
    #[error("Network error: {0}")]
    Network(String),

    /// The peer answered with something we cannot use
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Size mismatch: expected {expected}, got {actual}")]
    SizeMismatch {
        expected: u64,
        actual: u64,
        /// Merged artifact kept for diagnosis
        artifact: PathBuf,
    },

    #[error("Checksum mismatch: expected {expected}, got {actual}; file may be corrupted")]
    ChecksumMismatch {
        expected: String,
        actual: String,
        artifact: PathBuf,
    },

    /// Missing source file, permission denial, local disk failure
    #[error("Resource error: {0}")]
    Resource(String),

    #[error("Download cancelled")]
    Cancelled,
}

impl TransferError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransferError::Network(_) => ErrorKind::Network,
            TransferError::Protocol(_) => ErrorKind::Protocol,
            TransferError::SizeMismatch { .. } | TransferError::ChecksumMismatch { .. } => {
                ErrorKind::Integrity
            }
            TransferError::Resource(_) => ErrorKind::Resource,
            TransferError::Cancelled => ErrorKind::Cancellation,
        }
    }

    pub fn is_integrity(&self) -> bool {
        self.kind() == ErrorKind::Integrity
    }
}

impl From<std::io::Error> for TransferError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::TimedOut
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::UnexpectedEof => TransferError::Network(e.to_string()),
            _ => TransferError::Resource(e.to_string()),
        }
    }
}

impl From<reqwest::Error> for TransferError {
    fn from(e: reqwest::Error) -> Self {
        TransferError::Network(e.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for TransferError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        TransferError::Network("Operation timed out".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert_eq!(TransferError::Cancelled.kind(), ErrorKind::Cancellation);
        let err = TransferError::SizeMismatch {
            expected: 10,
            actual: 9,
            artifact: PathBuf::from("x"),
        };
        assert!(err.is_integrity());
        assert_eq!(err.to_string(), "Size mismatch: expected 10, got 9");
    }

    #[test]
    fn test_io_error_mapping() {
        let timeout = std::io::Error::new(std::io::ErrorKind::TimedOut, "slow");
        assert_eq!(TransferError::from(timeout).kind(), ErrorKind::Network);

        let missing = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert_eq!(TransferError::from(missing).kind(), ErrorKind::Resource);
    }
}
