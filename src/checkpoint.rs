//! The Checkpointer: replays any segment the writer's live catalog has
//! already absorbed but that hasn't yet been handed to the store's
//! sub-commit, asks the store to persist exactly the catalog's live
//! columns, then reclaims old segments.
//!
//! Design note on sub-commit cardinality: a per-segment replay-ahead
//! loop that sub-committed each segment individually, plus one more
//! sub-commit for the whole batch afterward, would sub-commit some bids
//! twice with two different `(log_id, tid)` watermarks — a race between
//! the two could leave the smaller watermark as the one that sticks.
//! This crate performs exactly one atomic `sub_commit` per checkpoint,
//! covering every segment the replay-ahead loop folded in; segments are
//! unlinked only after that single call succeeds, so a failed sub-commit
//! never advances `saved_log_id`.

use crate::catalog::Catalog;
use crate::config::WalConfig;
use crate::error::WalError;
use crate::header::Header;
use crate::replay::{Action, ReplayTarget, Replayer};
use crate::segment::Segment;
use crate::sequence::SequenceStore;
use crate::store::ColumnStore;
use crate::types::{Bid, LogId, Tid, TypeRegistry};

/// What one checkpoint run accomplished, for logging and tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckpointReport {
    /// Segment ids unlinked by this run, oldest first.
    pub segments_reclaimed: Vec<LogId>,
    /// `saved_log_id` after this run.
    pub saved_log_id: LogId,
    /// `saved_tid` after this run.
    pub saved_tid: Tid,
    /// Whether the sequence store's tombstone-compacted columns were
    /// rebuilt as part of this run.
    pub sequences_compacted: bool,
}

/// A [`ReplayTarget`] that advances `saved_tid` without touching the
/// column store: the checkpointer's replay-ahead pass only needs to know
/// which tid each segment's last commit carried, since the live catalog
/// already reflects every committed action — this pass only logs to
/// memory, it never touches the column store.
struct FlushTarget {
    saved_tid: Tid,
}

impl ReplayTarget for FlushTarget {
    fn apply(&mut self, _tid: Tid, _action: &Action) -> Result<(), WalError> {
        Ok(())
    }

    fn note_commit(&mut self, tid: Tid, _commit_ts: i64) {
        if tid > self.saved_tid {
            self.saved_tid = tid;
        }
    }
}

/// Runs one checkpoint against a watermark timestamp supplied by the
/// storage engine once its own persistent state is durable up to `ts`.
pub struct Checkpointer;

impl Checkpointer {
    /// Execute one checkpoint: compute the watermark-eligible range,
    /// replay it forward in memory, compact, sub-commit once, then
    /// reclaim whatever that sub-commit made redundant.
    #[allow(clippy::too_many_arguments)]
    pub fn run(
        ts: i64,
        config: &WalConfig,
        registry: &TypeRegistry,
        log: &mut crate::log_stream::LogStream,
        catalog: &mut Catalog,
        sequences: &mut SequenceStore,
        store: &mut dyn ColumnStore,
        saved_log_id: &mut LogId,
        saved_tid: &mut Tid,
    ) -> Result<CheckpointReport, WalError> {
        // Step 1: largest log_id fully covered by the watermark. The
        // currently-open segment is never eligible: `LogStream` holds it
        // open for appends, so unlinking it here would pull the file out
        // from under the next `write()` even though the fd stays valid.
        let current_log_id = log.current_log_id();
        let lid = log
            .pending_ranges()
            .iter()
            .filter(|r| r.log_id < current_log_id && r.last_tid.is_some() && r.last_commit_ts < ts)
            .map(|r| r.log_id)
            .max()
            .unwrap_or(0);

        // Step 2: replay-ahead, in memory only, to learn each covered
        // segment's true last-committed tid.
        let mut new_saved_tid = *saved_tid;
        let mut cursor = *saved_log_id;
        while cursor < lid {
            let next = cursor + 1;
            let body = Segment::read_body(config, next)?;
            let mut target = FlushTarget {
                saved_tid: new_saved_tid,
            };
            let replayer = Replayer::new(registry);
            replayer.replay_segment(next, &body, &mut target)?;
            new_saved_tid = target.saved_tid;
            cursor = next;
        }
        let new_saved_log_id = cursor.max(*saved_log_id);

        // Step 3: compact the catalog and sequence store against the new
        // watermark before deciding what to sub-commit. `saved_tid` is
        // advanced eagerly at commit time (see `TransactionBuilder::commit`),
        // so `new_saved_tid` computed above is rarely ahead of it; compact
        // whenever there's a condemned row to reclaim rather than gating on
        // that comparison.
        if catalog.tombstone_count() > 0 {
            catalog.compact(new_saved_tid, store)?;
        }
        let sequences_compacted = sequences.needs_compaction();
        if sequences_compacted {
            sequences.compact()?;
        }

        // Step 4: one atomic sub-commit of exactly the catalog's live set,
        // plus the catalog/sequence snapshot a restart needs to rebuild
        // state for rows whose `LOG_CREATE` lives in a segment this run
        // is about to unlink.
        let (bids, sizes): (Vec<Bid>, Vec<i64>) = catalog.live_bids().unzip();
        let catalog_rows: Vec<(Bid, crate::types::ObjectId, i64)> = catalog.live_rows().collect();
        let sequence_entries: Vec<(crate::types::ObjectId, i64)> = sequences.entries().collect();
        store.sub_commit(
            &bids,
            &sizes,
            &catalog_rows,
            &sequence_entries,
            new_saved_log_id,
            new_saved_tid,
        )?;

        *saved_log_id = new_saved_log_id;
        *saved_tid = new_saved_tid;

        // The header records the persisted type table; rewritten
        // atomically at every checkpoint.
        Header::current(registry).write_atomic(&config.dir)?;

        // Step 5: reclaim everything the sub-commit now makes redundant.
        let segments_reclaimed: Vec<LogId> = log
            .pending_ranges()
            .iter()
            .map(|r| r.log_id)
            .filter(|&id| id <= *saved_log_id)
            .collect();
        log.reclaim_through(config, *saved_log_id)?;

        Ok(CheckpointReport {
            segments_reclaimed,
            saved_log_id: *saved_log_id,
            saved_tid: *saved_tid,
            sequences_compacted,
        })
    }
}
