//! WAL configuration, including the pre-allocation capability flag.

use std::path::PathBuf;

/// Block size used to decide when a segment is close enough to its
/// pre-allocated end to warrant another extension.
pub const PREALLOC_TRIGGER_BYTES: u64 = 8 * 1024;

/// Chunk size used to extend a segment file ahead of the write cursor.
pub const PREALLOC_CHUNK_BYTES: u64 = 512 * 1024;

/// Default soft cap at which a segment is rotated.
pub const DEFAULT_SEGMENT_SOFT_CAP: u64 = 2 * 1024 * 1024;

/// Tunables for the log directory, segment sizing, and pre-allocation.
#[derive(Debug, Clone)]
pub struct WalConfig {
    /// Directory holding the `wal` header file and `wal.<log_id>` segments.
    pub dir: PathBuf,

    /// Soft cap, in bytes, at which the current segment is rotated.
    pub segment_soft_cap: u64,

    /// Bytes to extend a segment by when pre-allocating.
    pub prealloc_chunk: u64,

    /// Distance from the pre-allocated end that triggers another
    /// extension.
    pub prealloc_trigger: u64,

    /// Capability flag: whether sparse pre-allocation is performed at
    /// all. When `false`, writes still succeed; segments simply grow
    /// one `write` at a time.
    pub preallocate: bool,
}

impl WalConfig {
    /// Construct a config rooted at `dir` with the default sizes.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        WalConfig {
            dir: dir.into(),
            segment_soft_cap: DEFAULT_SEGMENT_SOFT_CAP,
            prealloc_chunk: PREALLOC_CHUNK_BYTES,
            prealloc_trigger: PREALLOC_TRIGGER_BYTES,
            preallocate: true,
        }
    }

    /// A config tuned for fast tests: tiny segments so rotation is easy
    /// to exercise, pre-allocation left on but with a small chunk.
    pub fn for_testing(dir: impl Into<PathBuf>) -> Self {
        WalConfig {
            dir: dir.into(),
            segment_soft_cap: 4096,
            prealloc_chunk: 4096,
            prealloc_trigger: 256,
            preallocate: true,
        }
    }

    /// Override the soft segment cap.
    pub fn with_segment_soft_cap(mut self, bytes: u64) -> Self {
        self.segment_soft_cap = bytes;
        self
    }

    /// Override the pre-allocation chunk size.
    pub fn with_prealloc_chunk(mut self, bytes: u64) -> Self {
        self.prealloc_chunk = bytes;
        self
    }

    /// Disable pre-allocation — some platforms keep it off.
    pub fn without_preallocation(mut self) -> Self {
        self.preallocate = false;
        self
    }

    /// Path to the text header file.
    pub fn header_path(&self) -> PathBuf {
        self.dir.join("wal")
    }

    /// Path to a segment file for the given log id.
    pub fn segment_path(&self, log_id: u64) -> PathBuf {
        self.dir.join(format!("wal.{log_id}"))
    }
}
