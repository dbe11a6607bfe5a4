//! `Range: bytes=...` parsing for single-range requests.

use axum::http::StatusCode;
use thiserror::Error;

/// Inclusive byte span resolved against a file of known size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn content_range(&self, total: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, total)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RangeError {
    #[error("Malformed Range header: {0}")]
    Malformed(String),
    #[error("Range not satisfiable for {size} bytes")]
    Unsatisfiable { size: u64 },
}

impl RangeError {
    pub fn status(&self) -> StatusCode {
        match self {
            RangeError::Malformed(_) => StatusCode::BAD_REQUEST,
            RangeError::Unsatisfiable { .. } => StatusCode::RANGE_NOT_SATISFIABLE,
        }
    }
}

/// Resolve a `Range` header value against a file of `size` bytes.
///
/// Accepts `bytes=a-b`, `bytes=a-` (through end of file) and `bytes=-n`
/// (last `n` bytes). Multiple ranges are rejected as malformed. A start
/// or end past the last byte is unsatisfiable.
pub fn parse_range(header: &str, size: u64) -> Result<ByteRange, RangeError> {
    let malformed = || RangeError::Malformed(header.to_string());
    let unsatisfiable = RangeError::Unsatisfiable { size };

    let spec = header
        .trim()
        .strip_prefix("bytes=")
        .ok_or_else(malformed)?
        .trim();
    if spec.contains(',') {
        return Err(malformed());
    }
    let (start, end) = spec.split_once('-').ok_or_else(malformed)?;
    let (start, end) = (start.trim(), end.trim());

    let parse = |s: &str| s.parse::<u64>().map_err(|_| malformed());

    match (start.is_empty(), end.is_empty()) {
        (true, true) => Err(malformed()),
        // suffix form: the final `n` bytes
        (true, false) => {
            let n = parse(end)?;
            if n == 0 || size == 0 {
                return Err(unsatisfiable);
            }
            Ok(ByteRange {
                start: size.saturating_sub(n),
                end: size - 1,
            })
        }
        (false, true) => {
            let start = parse(start)?;
            if start >= size {
                return Err(unsatisfiable);
            }
            Ok(ByteRange {
                start,
                end: size - 1,
            })
        }
        (false, false) => {
            let (start, end) = (parse(start)?, parse(end)?);
            if start > end {
                return Err(malformed());
            }
            if end >= size {
                return Err(unsatisfiable);
            }
            Ok(ByteRange { start, end })
        }
    }
}
