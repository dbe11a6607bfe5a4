//! Download job model: chunk plan, state machine, deterministic identity.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use super::constants::{MERGE_SUFFIX, PART_SUFFIX, PARTIAL_SUFFIX};

/// Inclusive byte range `[start, end]` fetched by one range request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRange {
    pub id: u32,
    pub start: u64,
    pub end: u64,
    pub size: u64,
}

impl ChunkRange {
    pub fn new(id: u32, start: u64, end: u64) -> Self {
        Self {
            id,
            start,
            end,
            size: end - start + 1,
        }
    }

    /// Value for the HTTP `Range` header
    pub fn range_header(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Pending,
    Downloading,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Cancelled
        )
    }

    /// Allowed moves: Pending -> Downloading -> {Completed, Failed, Cancelled}.
    /// A job may also fail or be cancelled before it starts downloading.
    pub fn can_transition_to(self, next: JobState) -> bool {
        match (self, next) {
            (JobState::Pending, JobState::Downloading) => true,
            (JobState::Pending, JobState::Failed | JobState::Cancelled) => true,
            (JobState::Downloading, next) => next.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            JobState::Pending => "pending",
            JobState::Downloading => "downloading",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

/// Deterministic job identity for (url, destination, total size)
pub fn job_id(url: &str, destination: &Path, total_size: u64) -> String {
    let key = format!("{}_{}_{}", url, destination.display(), total_size);
    let hash = blake3::hash(key.as_bytes());
    hash.to_hex()[..32].to_string()
}

/// Temporary file holding the bytes of one chunk
pub fn part_path(destination: &Path, chunk_id: u32) -> PathBuf {
    with_suffix(destination, &format!("{}{}", PART_SUFFIX, chunk_id))
}

/// Temporary file used by the sequential path
pub fn partial_path(destination: &Path) -> PathBuf {
    with_suffix(destination, PARTIAL_SUFFIX)
}

/// Merged output awaiting size/checksum verification
pub fn merge_path(destination: &Path) -> PathBuf {
    with_suffix(destination, MERGE_SUFFIX)
}

fn with_suffix(destination: &Path, suffix: &str) -> PathBuf {
    let mut name = destination.as_os_str().to_owned();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

#[derive(Debug, Clone)]
pub struct DownloadJob {
    pub id: String,
    pub source_url: String,
    pub destination: PathBuf,
    pub total_size: u64,
    pub chunk_plan: Vec<ChunkRange>,
    pub downloaded_bytes: u64,
    pub expected_checksum: Option<String>,
    state: JobState,
}

impl DownloadJob {
    pub fn new(
        source_url: impl Into<String>,
        destination: impl Into<PathBuf>,
        total_size: u64,
        expected_checksum: Option<String>,
    ) -> Self {
        let source_url = source_url.into();
        let destination = destination.into();
        Self {
            id: job_id(&source_url, &destination, total_size),
            source_url,
            destination,
            total_size,
            chunk_plan: Vec::new(),
            downloaded_bytes: 0,
            expected_checksum,
            state: JobState::Pending,
        }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    /// Move the job forward; returns false (and leaves the state alone) for
    /// an illegal transition.
    pub fn advance(&mut self, next: JobState) -> bool {
        if self.state.can_transition_to(next) {
            tracing::debug!("Job {}: {} -> {}", self.id, self.state, next);
            self.state = next;
            true
        } else {
            tracing::warn!(
                "Job {}: ignoring illegal transition {} -> {}",
                self.id,
                self.state,
                next
            );
            false
        }
    }

    pub fn progress_percent(&self) -> f32 {
        if self.total_size == 0 {
            return if self.state == JobState::Completed { 100.0 } else { 0.0 };
        }
        (self.downloaded_bytes as f64 / self.total_size as f64 * 100.0) as f32
    }
}
