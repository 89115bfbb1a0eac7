//! A single append-only segment file `wal.<log_id>`.
//!
//! The byte-order mark is the first two bytes of every segment. A
//! mismatch fails the segment with `CorruptHeader`. Pre-allocation grows
//! the file ahead of the write cursor in fixed chunks so that sustained
//! append throughput does not pay for a file-size update on every write;
//! it is purely a capacity hint and never affects what a reader sees,
//! since readers only ever look at bytes up to the logical write
//! position recorded by the writer.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::codec::BOM;
use crate::config::WalConfig;
use crate::error::WalError;
use crate::types::LogId;

/// One on-disk WAL segment, open for either writing or reading.
pub struct Segment {
    file: File,
    path: PathBuf,
    log_id: LogId,
    /// Logical end of valid data. Bytes beyond this within the file may
    /// be stale (pre-allocated padding, or garbage left by a crash
    /// mid-record) and are never read back.
    write_position: u64,
    /// How far the file has physically been extended.
    preallocated_end: u64,
    closed: bool,
}

const HEADER_LEN: u64 = 2;

impl Segment {
    /// Create a brand-new segment, writing the byte-order mark.
    pub fn create(config: &WalConfig, log_id: LogId) -> Result<Self, WalError> {
        let path = config.segment_path(log_id);
        let mut file = OpenOptions::new()
            .create_new(true)
            .read(true)
            .write(true)
            .open(&path)?;
        file.write_all(&BOM.to_le_bytes())?;
        file.sync_all()?;
        Ok(Segment {
            file,
            path,
            log_id,
            write_position: HEADER_LEN,
            preallocated_end: HEADER_LEN,
            closed: false,
        })
    }

    /// Reopen an existing segment for appending, resuming the logical
    /// write cursor at `resume_at` (the offset the last fully-valid
    /// record ended at, as determined by the `Replayer`). Bytes in the
    /// file beyond `resume_at` are never touched unless overwritten by a
    /// subsequent `write` — the segment is truncated logically, not
    /// physically.
    pub fn open_for_append(config: &WalConfig, log_id: LogId, resume_at: u64) -> Result<Self, WalError> {
        let path = config.segment_path(log_id);
        let mut file = OpenOptions::new().read(true).write(true).open(&path)?;
        check_bom(&mut file, &path)?;
        let len = file.seek(SeekFrom::End(0))?;
        Ok(Segment {
            file,
            path,
            log_id,
            write_position: resume_at,
            preallocated_end: len.max(resume_at),
            closed: false,
        })
    }

    /// Open a segment purely for sequential reading (replay, checkpoint
    /// replay-ahead). Reads the whole body into memory past the BOM.
    pub fn read_body(config: &WalConfig, log_id: LogId) -> Result<Vec<u8>, WalError> {
        let path = config.segment_path(log_id);
        let mut file = OpenOptions::new().read(true).open(&path)?;
        check_bom(&mut file, &path)?;
        let mut body = Vec::new();
        file.read_to_end(&mut body)?;
        Ok(body)
    }

    /// Segment number.
    pub fn log_id(&self) -> LogId {
        self.log_id
    }

    /// Logical size (bytes of valid data, including the BOM).
    pub fn size(&self) -> u64 {
        self.write_position
    }

    /// Path on disk.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `data` at the logical write cursor, pre-allocating ahead
    /// of it first if configured to do so.
    pub fn write(&mut self, config: &WalConfig, data: &[u8]) -> Result<(), WalError> {
        if self.closed {
            return Err(WalError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "cannot write to a closed segment",
            )));
        }
        if config.preallocate {
            self.maybe_preallocate(config)?;
        }
        self.file.seek(SeekFrom::Start(self.write_position))?;
        self.file.write_all(data)?;
        self.write_position += data.len() as u64;
        Ok(())
    }

    fn maybe_preallocate(&mut self, config: &WalConfig) -> Result<(), WalError> {
        if self.preallocated_end.saturating_sub(self.write_position) <= config.prealloc_trigger {
            let new_end = self.preallocated_end + config.prealloc_chunk;
            self.file.set_len(new_end)?;
            self.preallocated_end = new_end;
        }
        Ok(())
    }

    /// `write_end_marker(); flush_userspace(); fsync()`. The end marker
    /// itself is written by the caller as an ordinary record before
    /// calling `flush`; this performs the durability barrier.
    pub fn flush(&mut self) -> Result<(), WalError> {
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }

    /// Mark the segment closed and drop any unused pre-allocated tail.
    pub fn close(&mut self) -> Result<(), WalError> {
        if !self.closed {
            self.file.sync_all()?;
            self.file.set_len(self.write_position)?;
            self.closed = true;
        }
        Ok(())
    }

    /// Whether the soft cap has been exceeded and the stream should
    /// rotate before the next append.
    pub fn past_soft_cap(&self, config: &WalConfig) -> bool {
        self.write_position >= config.segment_soft_cap
    }
}

fn check_bom(file: &mut File, path: &Path) -> Result<(), WalError> {
    let mut bom_bytes = [0u8; 2];
    file.read_exact(&mut bom_bytes).map_err(|_| WalError::CorruptHeader {
        reason: format!("{}: segment shorter than the byte-order mark", path.display()),
    })?;
    let bom = u16::from_le_bytes(bom_bytes);
    if bom != BOM {
        return Err(WalError::CorruptHeader {
            reason: format!("{}: bad byte-order mark {bom:#06x}", path.display()),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn create_then_read_roundtrips_bom() {
        let dir = tempdir().unwrap();
        let config = WalConfig::for_testing(dir.path());
        let mut seg = Segment::create(&config, 1).unwrap();
        seg.write(&config, b"hello").unwrap();
        seg.flush().unwrap();
        seg.close().unwrap();

        let body = Segment::read_body(&config, 1).unwrap();
        assert_eq!(body, b"hello");
    }

    #[test]
    fn bad_bom_is_corrupt_header() {
        let dir = tempdir().unwrap();
        let config = WalConfig::for_testing(dir.path());
        std::fs::write(config.segment_path(7), [0xFFu8, 0xFF, 1, 2, 3]).unwrap();
        let err = Segment::read_body(&config, 7).unwrap_err();
        assert!(matches!(err, WalError::CorruptHeader { .. }));
    }

    #[test]
    fn resume_does_not_truncate_trailing_garbage() {
        let dir = tempdir().unwrap();
        let config = WalConfig::for_testing(dir.path());
        let mut seg = Segment::create(&config, 1).unwrap();
        seg.write(&config, b"AAAA").unwrap();
        seg.write(&config, b"GARBAGE_TAIL").unwrap();
        seg.flush().unwrap();
        drop(seg);

        // Resume as if only the first 4 bytes were a valid record.
        let mut resumed = Segment::open_for_append(&config, 1, HEADER_LEN + 4).unwrap();
        assert_eq!(resumed.size(), HEADER_LEN + 4);

        // The physical file still contains the old tail until overwritten.
        let body = Segment::read_body(&config, 1).unwrap();
        assert!(body.len() >= 4 + b"GARBAGE_TAIL".len());

        resumed.write(&config, b"NEW!").unwrap();
        resumed.flush().unwrap();
        resumed.close().unwrap();

        let body = Segment::read_body(&config, 1).unwrap();
        assert_eq!(&body[..8], b"AAAANEW!");
    }

    #[test]
    fn preallocation_extends_file_ahead_of_cursor() {
        let dir = tempdir().unwrap();
        let config = WalConfig::new(dir.path())
            .with_prealloc_chunk(4096);
        let mut seg = Segment::create(&config, 1).unwrap();
        seg.write(&config, &vec![0u8; 10]).unwrap();
        assert!(seg.preallocated_end > seg.write_position);
    }

    #[test]
    fn preallocation_can_be_disabled() {
        let dir = tempdir().unwrap();
        let config = WalConfig::new(dir.path()).without_preallocation();
        let mut seg = Segment::create(&config, 1).unwrap();
        seg.write(&config, &vec![0u8; 10]).unwrap();
        assert_eq!(seg.preallocated_end, HEADER_LEN); // never grown
        assert_eq!(seg.write_position, HEADER_LEN + 10);
    }
}
