//! Resume metadata for interrupted downloads, one JSON file per job id.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::config;

/// Snapshot of an incomplete download job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumeRecord {
    pub url: String,
    pub destination: PathBuf,
    pub total_size: u64,
    pub downloaded_bytes: u64,
    pub checksum: Option<String>,
    /// Unix timestamp (seconds) when the snapshot was taken
    pub timestamp: f64,
}

impl ResumeRecord {
    pub fn new(
        url: impl Into<String>,
        destination: impl Into<PathBuf>,
        total_size: u64,
        downloaded_bytes: u64,
        checksum: Option<String>,
    ) -> Self {
        Self {
            url: url.into(),
            destination: destination.into(),
            total_size,
            downloaded_bytes,
            checksum,
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or(Duration::ZERO)
                .as_secs_f64(),
        }
    }
}

/// What a caller may do with a persisted record
#[derive(Debug, Clone, PartialEq)]
pub enum ResumeStatus {
    /// Nothing was ever saved for this job
    NoRecord,
    /// A record exists but does not describe the transfer on disk
    Inconsistent { reason: String },
    /// Continue from `downloaded_bytes`
    Resumable { downloaded_bytes: u64 },
}

impl ResumeStatus {
    pub fn is_resumable(&self) -> bool {
        matches!(self, ResumeStatus::Resumable { .. })
    }
}

#[derive(Debug, Clone)]
pub struct ResumeStore {
    dir: PathBuf,
}

impl Default for ResumeStore {
    fn default() -> Self {
        Self::new(config::get_resume_dir())
    }
}

impl ResumeStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, job_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", job_id))
    }

    pub async fn save(&self, job_id: &str, record: &ResumeRecord) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create resume dir {}", self.dir.display()))?;

        let json = serde_json::to_string_pretty(record)?;
        tokio::fs::write(self.record_path(job_id), json)
            .await
            .context("Failed to save resume info")?;

        tracing::debug!(
            "Saved resume info for {} ({} of {} bytes)",
            job_id,
            record.downloaded_bytes,
            record.total_size
        );
        Ok(())
    }

    /// `Ok(None)` when no record exists; an unreadable record is an error
    pub async fn load(&self, job_id: &str) -> Result<Option<ResumeRecord>> {
        let path = self.record_path(job_id);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).context("Failed to load resume info"),
        };

        let record = serde_json::from_str(&content)
            .with_context(|| format!("Corrupt resume record {}", path.display()))?;
        Ok(Some(record))
    }

    pub async fn delete(&self, job_id: &str) -> Result<()> {
        match tokio::fs::remove_file(self.record_path(job_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).context("Failed to delete resume info"),
        }
    }

    /// Decide whether the saved record matches the transfer as it stands now.
    ///
    /// `artifact_size` is the number of partial bytes actually on disk.
    pub async fn check(&self, job_id: &str, total_size: u64, artifact_size: u64) -> ResumeStatus {
        let record = match self.load(job_id).await {
            Ok(Some(record)) => record,
            Ok(None) => return ResumeStatus::NoRecord,
            Err(e) => {
                return ResumeStatus::Inconsistent {
                    reason: e.to_string(),
                };
            }
        };

        if record.total_size != total_size {
            return ResumeStatus::Inconsistent {
                reason: format!(
                    "total size changed: recorded {}, now {}",
                    record.total_size, total_size
                ),
            };
        }

        if record.downloaded_bytes != artifact_size {
            return ResumeStatus::Inconsistent {
                reason: format!(
                    "recorded {} bytes but {} bytes are on disk",
                    record.downloaded_bytes, artifact_size
                ),
            };
        }

        if artifact_size == 0 || artifact_size >= total_size {
            return ResumeStatus::Inconsistent {
                reason: format!("nothing to resume at {} of {} bytes", artifact_size, total_size),
            };
        }

        ResumeStatus::Resumable {
            downloaded_bytes: artifact_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(total: u64, downloaded: u64) -> ResumeRecord {
        ResumeRecord::new("http://h:8000/download/a", "/tmp/a.bin", total, downloaded, None)
    }

    #[tokio::test]
    async fn test_save_load_delete() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = ResumeStore::new(dir.path().join("resume"));

        assert_eq!(store.load("job").await?, None);

        let rec = record(1000, 400);
        store.save("job", &rec).await?;
        assert_eq!(store.load("job").await?, Some(rec));

        store.delete("job").await?;
        assert_eq!(store.load("job").await?, None);
        // deleting twice is fine
        store.delete("job").await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_timestamp_survives_reload() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = ResumeStore::new(dir.path());

        let mut rec = record(1000, 400);
        rec.timestamp = 1_792_137_962.547_608_1;
        store.save("job", &rec).await?;

        let loaded = store.load("job").await?.unwrap();
        assert_eq!(loaded.timestamp.to_bits(), rec.timestamp.to_bits());
        Ok(())
    }

    #[tokio::test]
    async fn test_check_distinguishes_missing_from_inconsistent() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = ResumeStore::new(dir.path());

        assert_eq!(store.check("job", 1000, 400).await, ResumeStatus::NoRecord);

        store.save("job", &record(1000, 400)).await?;
        assert_eq!(
            store.check("job", 1000, 400).await,
            ResumeStatus::Resumable {
                downloaded_bytes: 400
            }
        );

        // total size changed
        assert!(matches!(
            store.check("job", 2000, 400).await,
            ResumeStatus::Inconsistent { .. }
        ));
        // partial artifact does not match the record
        assert!(matches!(
            store.check("job", 1000, 300).await,
            ResumeStatus::Inconsistent { .. }
        ));

        store.save("job", &record(1000, 0)).await?;
        assert!(!store.check("job", 1000, 0).await.is_resumable());

        store.save("job", &record(1000, 1000)).await?;
        assert!(!store.check("job", 1000, 1000).await.is_resumable());
        Ok(())
    }

    #[tokio::test]
    async fn test_corrupt_record_is_not_resumable() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = ResumeStore::new(dir.path());
        tokio::fs::write(dir.path().join("job.json"), "{not json").await?;

        assert!(store.load("job").await.is_err());
        assert!(matches!(
            store.check("job", 10, 5).await,
            ResumeStatus::Inconsistent { .. }
        ));
        Ok(())
    }
}
