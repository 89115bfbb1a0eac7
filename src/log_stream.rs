//! The append-only log stream: the current output [`Segment`] plus the
//! pending commit-range bookkeeping the [`crate::checkpoint::Checkpointer`]
//! needs.

use std::fs;

use crate::config::WalConfig;
use crate::error::WalError;
use crate::replay::SegmentReplayOutcome;
use crate::segment::Segment;
use crate::types::{LogId, Tid};

/// Commit-range summary for one segment, still reachable by a future
/// checkpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRange {
    /// Segment this range describes.
    pub log_id: LogId,
    /// tid of the first transaction that opened in this segment, if any.
    pub first_tid: Option<Tid>,
    /// Highest tid committed in this segment so far.
    pub last_tid: Option<Tid>,
    /// Commit timestamp of the most recent commit in this segment.
    pub last_commit_ts: i64,
}

impl PendingRange {
    /// Build the initial range for a freshly created segment, before any
    /// transaction has committed in it.
    fn fresh(log_id: LogId) -> Self {
        PendingRange {
            log_id,
            first_tid: None,
            last_tid: None,
            last_commit_ts: 0,
        }
    }

    fn from_outcome(outcome: &SegmentReplayOutcome) -> Self {
        PendingRange {
            log_id: outcome.log_id,
            first_tid: outcome.first_tid,
            last_tid: outcome.last_committed_tid,
            last_commit_ts: outcome.last_commit_ts,
        }
    }

    fn record_commit(&mut self, tid: Tid, commit_ts: i64) {
        if self.first_tid.is_none() {
            self.first_tid = Some(tid);
        }
        self.last_tid = Some(tid);
        self.last_commit_ts = commit_ts;
    }
}

/// Owns the segment currently being appended to, and the ranges of every
/// segment not yet reclaimed by a checkpoint.
pub struct LogStream {
    current: Segment,
    /// Oldest-first. The last entry always describes `current`.
    pending: Vec<PendingRange>,
}

impl LogStream {
    /// Scan `config.dir` for existing `wal.<n>` segment files, returning
    /// their log ids in ascending order.
    pub fn list_segment_ids(config: &WalConfig) -> Result<Vec<LogId>, WalError> {
        let mut ids = Vec::new();
        let entries = match fs::read_dir(&config.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ids),
            Err(e) => return Err(WalError::Io(e)),
        };
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(suffix) = name.strip_prefix("wal.") {
                if let Ok(id) = suffix.parse::<LogId>() {
                    ids.push(id);
                }
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }

    /// Start a brand-new stream with a single fresh segment. Used on
    /// first boot, when no segment files exist yet.
    pub fn create(config: &WalConfig, log_id: LogId) -> Result<Self, WalError> {
        let current = Segment::create(config, log_id)?;
        Ok(LogStream {
            current,
            pending: vec![PendingRange::fresh(log_id)],
        })
    }

    /// Resume a stream after recovery: `history` carries one
    /// [`SegmentReplayOutcome`] per segment from `saved_log_id + 1` up to
    /// and including the newest segment, in ascending `log_id` order. The
    /// newest segment is reopened for append at its
    /// `valid_end_offset`; every earlier one contributes a read-only
    /// pending range.
    pub fn resume(config: &WalConfig, history: &[SegmentReplayOutcome]) -> Result<Self, WalError> {
        let (newest, earlier) = history
            .split_last()
            .ok_or_else(|| WalError::CorruptHeader {
                reason: "log stream resume requires at least one segment".to_string(),
            })?;

        let current = Segment::open_for_append(config, newest.log_id, newest.valid_end_offset)?;
        let mut pending: Vec<PendingRange> = earlier.iter().map(PendingRange::from_outcome).collect();
        pending.push(PendingRange::from_outcome(newest));

        Ok(LogStream { current, pending })
    }

    /// The segment currently accepting writes.
    pub fn current_log_id(&self) -> LogId {
        self.current.log_id()
    }

    /// Every range not yet reclaimed by a checkpoint, oldest first.
    pub fn pending_ranges(&self) -> &[PendingRange] {
        &self.pending
    }

    /// Append a raw record to the current segment.
    pub fn append(&mut self, config: &WalConfig, data: &[u8]) -> Result<(), WalError> {
        self.current.write(config, data)
    }

    /// Note that `tid` committed at `commit_ts` in the current segment,
    /// so the pending range for it stays accurate for the checkpointer.
    pub fn record_commit(&mut self, tid: Tid, commit_ts: i64) {
        if let Some(range) = self.pending.last_mut() {
            range.record_commit(tid, commit_ts);
        }
    }

    /// The durability barrier: flush and fsync the current segment.
    /// Callers write a `LOG_END` record immediately before calling this.
    pub fn flush(&mut self) -> Result<(), WalError> {
        self.current.flush()
    }

    /// Whether the current segment is past its soft cap and should be
    /// rotated before the next transaction begins.
    pub fn should_rotate(&self, config: &WalConfig) -> bool {
        self.current.past_soft_cap(config)
    }

    /// Close the current segment and open a new one, numbered one past
    /// the current one. Only safe to call between transactions: spec
    /// §4.2 requires complete transactions never span a segment
    /// boundary.
    pub fn rotate(&mut self, config: &WalConfig) -> Result<(), WalError> {
        self.current.flush()?;
        self.current.close()?;
        let next_id = self.current.log_id() + 1;
        self.current = Segment::create(config, next_id)?;
        self.pending.push(PendingRange::fresh(next_id));
        Ok(())
    }

    /// Drop every pending range up to and including `log_id`, and unlink
    /// their segment files. Called by the checkpointer once it has
    /// sub-committed everything those segments could contribute.
    pub fn reclaim_through(&mut self, config: &WalConfig, log_id: LogId) -> Result<(), WalError> {
        let keep_from = self
            .pending
            .iter()
            .position(|r| r.log_id > log_id)
            .unwrap_or(self.pending.len());
        for range in self.pending.drain(..keep_from) {
            let path = config.segment_path(range.log_id);
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(WalError::Io(e)),
            }
        }
        Ok(())
    }
}
