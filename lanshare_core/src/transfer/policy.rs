//! Size-driven transfer decisions shared by the server and the client.

use crate::config::TransferConfig;

use super::constants::{
    BUFFER_SIZE_LARGE, BUFFER_SIZE_MEDIUM, BUFFER_SIZE_SMALL, BUFFER_SIZE_XLARGE,
    FOUR_WORKER_LIMIT, GIB, MIB, TWO_WORKER_LIMIT,
};
use super::job::ChunkRange;

/// I/O buffer size for a transfer of `total_size` bytes.
pub fn adaptive_buffer_size(total_size: u64) -> usize {
    if total_size < 10 * MIB {
        BUFFER_SIZE_SMALL
    } else if total_size < 100 * MIB {
        BUFFER_SIZE_MEDIUM
    } else if total_size < GIB {
        BUFFER_SIZE_LARGE
    } else {
        BUFFER_SIZE_XLARGE
    }
}

pub fn should_use_multithread(total_size: u64, config: &TransferConfig) -> bool {
    config.enable_multithreaded_download && total_size >= config.min_file_size_for_multithread
}

/// Number of parallel range workers for a file, always in `[1, max_download_threads]`.
pub fn optimal_worker_count(total_size: u64, config: &TransferConfig) -> usize {
    let max_workers = config.max_download_threads.max(1);

    let banded = if total_size < TWO_WORKER_LIMIT {
        2
    } else if total_size < FOUR_WORKER_LIMIT {
        4
    } else {
        max_workers
    };

    banded.clamp(1, max_workers)
}

/// Split `[0, total_size)` into inclusive ranges of `chunk_size` bytes.
///
/// The last range may be shorter. An empty file yields no ranges.
pub fn plan_chunks(total_size: u64, chunk_size: u64) -> Vec<ChunkRange> {
    let chunk_size = chunk_size.max(1);
    let mut chunks = Vec::with_capacity(total_size.div_ceil(chunk_size) as usize);
    let mut offset = 0u64;
    let mut id = 0u32;

    while offset < total_size {
        let end = (offset + chunk_size - 1).min(total_size - 1);
        chunks.push(ChunkRange::new(id, offset, end));
        offset = end + 1;
        id += 1;
    }

    chunks
}

/// Outcome of checking a file against the share size limits
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SizeCheck {
    Ok,
    Warn(String),
    TooLarge(String),
}

pub fn validate_file_size(size: u64, config: &TransferConfig) -> SizeCheck {
    if size > config.max_file_size_bytes() {
        SizeCheck::TooLarge(format!(
            "File exceeds maximum size limit of {} MB",
            config.max_file_size_mb
        ))
    } else if size > config.warn_file_size_bytes() {
        SizeCheck::Warn(format!(
            "Large file ({}) - transfer may take time",
            format_file_size(size)
        ))
    } else {
        SizeCheck::Ok
    }
}

/// Seconds needed to move `total_size` bytes at `bytes_per_sec`, 0 when the speed is unknown
pub fn estimate_transfer_time(total_size: u64, bytes_per_sec: f64) -> f64 {
    if bytes_per_sec <= 0.0 {
        return 0.0;
    }
    total_size as f64 / bytes_per_sec
}

pub fn format_duration(seconds: f64) -> String {
    let seconds = seconds.max(0.0) as u64;
    if seconds < 60 {
        format!("{}s", seconds)
    } else if seconds < 3600 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else {
        format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
    }
}

pub fn format_file_size(size: u64) -> String {
    let size_f = size as f64;
    if size < 1024 {
        format!("{} B", size)
    } else if size < MIB {
        format!("{:.1} KB", size_f / 1024.0)
    } else if size < GIB {
        format!("{:.1} MB", size_f / MIB as f64)
    } else {
        format!("{:.2} GB", size_f / GIB as f64)
    }
}

pub fn format_speed(bytes_per_sec: f64) -> String {
    let mb_per_sec = bytes_per_sec / MIB as f64;
    if mb_per_sec < 1.0 {
        format!("{:.1} KB/s", bytes_per_sec / 1024.0)
    } else {
        format!("{:.1} MB/s", mb_per_sec)
    }
}
