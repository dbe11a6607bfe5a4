//! Streaming checksum computation and verification.
//!
//! Files are hashed in adaptively sized reads so memory use stays flat no
//! matter how large the file is.

use anyhow::{Result, anyhow};
use md5::Md5;
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::fmt;
use std::io::SeekFrom;
use std::path::Path;
use std::str::FromStr;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::transfer::policy::adaptive_buffer_size;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    Sha256,
    Sha1,
    Md5,
    Blake3,
}

impl FromStr for HashAlgorithm {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sha256" => Ok(HashAlgorithm::Sha256),
            "sha1" => Ok(HashAlgorithm::Sha1),
            "md5" => Ok(HashAlgorithm::Md5),
            "blake3" => Ok(HashAlgorithm::Blake3),
            other => Err(anyhow!("Unsupported algorithm: {}", other)),
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Sha1 => "sha1",
            HashAlgorithm::Md5 => "md5",
            HashAlgorithm::Blake3 => "blake3",
        };
        f.write_str(name)
    }
}

enum StreamHasher {
    Sha256(Sha256),
    Sha1(Sha1),
    Md5(Md5),
    Blake3(Box<blake3::Hasher>),
}

impl StreamHasher {
    fn new(algorithm: HashAlgorithm) -> Self {
        match algorithm {
            HashAlgorithm::Sha256 => StreamHasher::Sha256(Sha256::new()),
            HashAlgorithm::Sha1 => StreamHasher::Sha1(Sha1::new()),
            HashAlgorithm::Md5 => StreamHasher::Md5(Md5::new()),
            HashAlgorithm::Blake3 => StreamHasher::Blake3(Box::new(blake3::Hasher::new())),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            StreamHasher::Sha256(h) => h.update(data),
            StreamHasher::Sha1(h) => h.update(data),
            StreamHasher::Md5(h) => h.update(data),
            StreamHasher::Blake3(h) => {
                h.update(data);
            }
        }
    }

    fn finalize_hex(self) -> String {
        match self {
            StreamHasher::Sha256(h) => hex::encode(h.finalize()),
            StreamHasher::Sha1(h) => hex::encode(h.finalize()),
            StreamHasher::Md5(h) => hex::encode(h.finalize()),
            StreamHasher::Blake3(h) => h.finalize().to_hex().to_string(),
        }
    }
}

/// Hex digest of `data` held in memory
pub fn checksum_bytes(data: &[u8], algorithm: HashAlgorithm) -> String {
    let mut hasher = StreamHasher::new(algorithm);
    hasher.update(data);
    hasher.finalize_hex()
}

/// Hex digest of a whole file
pub async fn checksum(path: &Path, algorithm: HashAlgorithm) -> Result<String> {
    let mut file = File::open(path)
        .await
        .map_err(|e| anyhow!("Failed to calculate checksum of {}: {}", path.display(), e))?;
    let len = file.metadata().await?.len();
    hash_stream(&mut file, len, algorithm).await
}

/// Hex digest of the inclusive byte range `[start_byte, end_byte]`.
///
/// A range running past the end of the file hashes whatever bytes exist.
pub async fn partial_checksum(
    path: &Path,
    start_byte: u64,
    end_byte: u64,
    algorithm: HashAlgorithm,
) -> Result<String> {
    if end_byte < start_byte {
        return Err(anyhow!(
            "Invalid range: end {} before start {}",
            end_byte,
            start_byte
        ));
    }

    let mut file = File::open(path).await.map_err(|e| {
        anyhow!(
            "Failed to calculate partial checksum of {}: {}",
            path.display(),
            e
        )
    })?;
    file.seek(SeekFrom::Start(start_byte)).await?;
    hash_stream(&mut file, end_byte - start_byte + 1, algorithm).await
}

async fn hash_stream(file: &mut File, len: u64, algorithm: HashAlgorithm) -> Result<String> {
    let mut hasher = StreamHasher::new(algorithm);
    let mut buffer = vec![0u8; adaptive_buffer_size(len)];
    let mut remaining = len;

    while remaining > 0 {
        let want = remaining.min(buffer.len() as u64) as usize;
        let n = file.read(&mut buffer[..want]).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
        remaining -= n as u64;
    }

    Ok(hasher.finalize_hex())
}

/// Result of [`verify`]: the match flag plus the digest that was actually computed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verification {
    pub matches: bool,
    pub actual: String,
}

pub async fn verify(path: &Path, expected: &str, algorithm: HashAlgorithm) -> Result<Verification> {
    let actual = checksum(path, algorithm).await?;
    Ok(Verification {
        matches: actual.eq_ignore_ascii_case(expected.trim()),
        actual,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkCheck {
    pub valid: bool,
    pub actual_size: u64,
    pub actual_digest: Option<String>,
}

/// Check a chunk file before it is trusted for merge.
///
/// Digests are MD5 unless the caller passes another algorithm.
pub async fn verify_chunk(
    path: &Path,
    expected_size: u64,
    expected_digest: Option<&str>,
    algorithm: Option<HashAlgorithm>,
) -> ChunkCheck {
    let actual_size = match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => meta.len(),
        _ => {
            return ChunkCheck {
                valid: false,
                actual_size: 0,
                actual_digest: None,
            };
        }
    };

    if actual_size != expected_size {
        return ChunkCheck {
            valid: false,
            actual_size,
            actual_digest: None,
        };
    }

    if let Some(expected) = expected_digest {
        return match checksum(path, algorithm.unwrap_or(HashAlgorithm::Md5)).await {
            Ok(actual) => ChunkCheck {
                valid: actual.eq_ignore_ascii_case(expected),
                actual_size,
                actual_digest: Some(actual),
            },
            Err(e) => {
                tracing::warn!("Chunk digest failed for {}: {}", path.display(), e);
                ChunkCheck {
                    valid: false,
                    actual_size,
                    actual_digest: None,
                }
            }
        };
    }

    ChunkCheck {
        valid: true,
        actual_size,
        actual_digest: None,
    }
}

/// Existence, size and optional digest check of a finished download.
/// The error string names which check failed.
pub async fn verify_download(
    path: &Path,
    expected_size: u64,
    expected_digest: Option<&str>,
    algorithm: HashAlgorithm,
) -> Result<(), String> {
    let meta = tokio::fs::metadata(path)
        .await
        .map_err(|_| "File does not exist".to_string())?;

    if meta.len() != expected_size {
        return Err(format!(
            "Size mismatch: expected {}, got {}",
            expected_size,
            meta.len()
        ));
    }

    if let Some(expected) = expected_digest {
        let outcome = verify(path, expected, algorithm)
            .await
            .map_err(|e| e.to_string())?;
        if !outcome.matches {
            return Err(format!(
                "Checksum verification failed: expected {}, got {}",
                expected, outcome.actual
            ));
        }
    }

    Ok(())
}

/// Checksums and size of a shared file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileMetadata {
    pub size: u64,
    pub sha256: String,
    pub md5: String,
    pub modified: Option<String>,
}

impl FileMetadata {
    pub async fn generate(path: &Path) -> Result<Self> {
        let meta = tokio::fs::metadata(path).await?;
        let modified = meta.modified().ok().map(|t| {
            chrono::DateTime::<chrono::Local>::from(t)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string()
        });

        Ok(Self {
            size: meta.len(),
            sha256: checksum(path, HashAlgorithm::Sha256).await?,
            md5: checksum(path, HashAlgorithm::Md5).await?,
            modified,
        })
    }
}
