use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};

use super::constants::MAX_FILENAME_LENGTH;

const FALLBACK_NAME: &str = "unknown_file";

const RESERVED_NAMES: [&str; 22] = [
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Reduce a name advertised by a remote catalog to a safe local file name.
///
/// Directory components (either separator) are dropped, control characters
/// removed, Windows device names and dot-names rejected, and the result
/// capped at [`MAX_FILENAME_LENGTH`] bytes keeping a short extension.
pub fn sanitize_file_name(remote_name: &str) -> String {
    let last = remote_name.rsplit(['/', '\\']).next().unwrap_or_default();
    let clean: String = last.chars().filter(|c| !c.is_control()).collect();

    if clean.trim().is_empty() || clean == "." || clean == ".." {
        return FALLBACK_NAME.to_string();
    }
    if RESERVED_NAMES.iter().any(|r| clean.eq_ignore_ascii_case(r)) {
        return FALLBACK_NAME.to_string();
    }
    if clean.len() <= MAX_FILENAME_LENGTH {
        return clean;
    }

    match clean.rfind('.') {
        Some(idx) if clean.len() - idx < 20 => {
            let ext = &clean[idx..];
            let mut base = clean[..idx].to_string();
            truncate_on_char_boundary(&mut base, MAX_FILENAME_LENGTH - ext.len());
            base + ext
        }
        _ => {
            let mut name = clean;
            truncate_on_char_boundary(&mut name, MAX_FILENAME_LENGTH);
            name
        }
    }
}

fn truncate_on_char_boundary(s: &mut String, max_len: usize) {
    let mut cutoff = max_len.min(s.len());
    while !s.is_char_boundary(cutoff) {
        cutoff -= 1;
    }
    s.truncate(cutoff);
}

/// First path in `dir` named `file_name`, `stem_1.ext`, `stem_2.ext`, ...
/// that does not exist yet.
pub fn unique_destination(dir: &Path, file_name: &str) -> PathBuf {
    let candidate = dir.join(file_name);
    if !candidate.exists() {
        return candidate;
    }

    let path = Path::new(file_name);
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(file_name);
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e))
        .unwrap_or_default();

    (1u32..)
        .map(|n| dir.join(format!("{}_{}{}", stem, n, ext)))
        .find(|p| !p.exists())
        .unwrap_or(candidate)
}

/// Open a temporary download file: truncate for a fresh start, append when
/// continuing. New files are owner-only on Unix.
pub async fn open_temp_file(path: &Path, append: bool) -> std::io::Result<File> {
    let mut options = OpenOptions::new();

    if append {
        options.append(true).create(true);
    } else {
        options.write(true).create(true).truncate(true);
    }
    #[cfg(unix)]
    options.mode(0o600);

    options.open(path).await
}
