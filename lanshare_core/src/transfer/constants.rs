pub const KIB: u64 = 1024;
pub const MIB: u64 = 1024 * KIB;
pub const GIB: u64 = 1024 * MIB;

/// Adaptive I/O buffer sizes, one per size band
pub const BUFFER_SIZE_SMALL: usize = 8 * 1024;
pub const BUFFER_SIZE_MEDIUM: usize = 64 * 1024;
pub const BUFFER_SIZE_LARGE: usize = 512 * 1024;
pub const BUFFER_SIZE_XLARGE: usize = 1024 * 1024;

/// Worker-count bands
pub const TWO_WORKER_LIMIT: u64 = 50 * MIB;
pub const FOUR_WORKER_LIMIT: u64 = 500 * MIB;

/// Suffix of per-chunk temporary files: `<dest>.part<id>`
pub const PART_SUFFIX: &str = "part";
/// Sequential downloads stream here before the final rename
pub const PARTIAL_SUFFIX: &str = "partial";
/// Merged output awaiting verification
pub const MERGE_SUFFIX: &str = "merge";

/// Maximum filename length accepted for a destination
pub const MAX_FILENAME_LENGTH: usize = 255;
