use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};

use crate::error::TransferError;
use crate::integrity::{self, HashAlgorithm};

use super::job::merge_path;
use super::policy::adaptive_buffer_size;

/// Concatenate `parts` (already in chunk-id order) and verify the result.
///
/// The merged bytes land in a staging file next to `destination` and are
/// only renamed into place once size and checksum agree. On an integrity
/// failure the staging file is kept and named in the error.
pub async fn merge_and_verify(
    parts: &[PathBuf],
    destination: &Path,
    expected_size: u64,
    expected_checksum: Option<&str>,
    algorithm: HashAlgorithm,
) -> Result<(), TransferError> {
    let staging = merge_path(destination);
    let total_written = concat_parts(parts, &staging, expected_size).await?;

    if total_written != expected_size {
        tracing::error!(
            "Merged size mismatch for {}: expected {}, got {}",
            destination.display(),
            expected_size,
            total_written
        );
        return Err(TransferError::SizeMismatch {
            expected: expected_size,
            actual: total_written,
            artifact: staging,
        });
    }

    if let Some(expected) = expected_checksum {
        let outcome = integrity::verify(&staging, expected, algorithm)
            .await
            .map_err(|e| TransferError::Resource(e.to_string()))?;
        if !outcome.matches {
            tracing::error!(
                "Checksum mismatch for {}: expected {}, got {}",
                destination.display(),
                expected,
                outcome.actual
            );
            return Err(TransferError::ChecksumMismatch {
                expected: expected.to_string(),
                actual: outcome.actual,
                artifact: staging,
            });
        }
    }

    tokio::fs::rename(&staging, destination).await?;
    Ok(())
}

async fn concat_parts(
    parts: &[PathBuf],
    output: &Path,
    expected_size: u64,
) -> Result<u64, TransferError> {
    let file = File::create(output).await.map_err(|e| {
        TransferError::Resource(format!("Cannot create {}: {}", output.display(), e))
    })?;
    let mut writer = BufWriter::with_capacity(adaptive_buffer_size(expected_size), file);
    let mut total_written = 0u64;

    for part in parts {
        let mut reader = File::open(part).await.map_err(|_| {
            TransferError::Resource(format!("Chunk file missing: {}", part.display()))
        })?;
        total_written += tokio::io::copy(&mut reader, &mut writer).await?;
    }

    writer.flush().await?;
    writer.get_mut().sync_all().await?;
    Ok(total_written)
}
