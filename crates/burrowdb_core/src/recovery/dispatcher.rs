//! The recovery driver: orchestrates the backward and forward passes.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info};

use crate::error::{CoreError, CoreResult};
use crate::log::{LogCursor, LogStore, RecordBody, RecordKind};
use crate::page::PageCache;
use crate::recovery::cursors::CursorRegistry;
use crate::recovery::handlers::{self, HandlerCtx};
use crate::recovery::{Applied, Direction};
use crate::types::{Lsn, TxnId};

/// Counters and findings from one recovery run.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecoveryReport {
    /// Records visited across both passes.
    pub records_scanned: u64,
    /// Redo handlers that mutated a page.
    pub redo_applied: u64,
    /// Redo dispatches that were guard skips.
    pub redo_skipped: u64,
    /// Undo handlers that mutated a page or the cursor set.
    pub undo_applied: u64,
    /// Undo dispatches that were guard skips.
    pub undo_skipped: u64,
    /// Transactions found committed.
    pub committed_txns: usize,
    /// Transactions that never resolved (their work was undone).
    pub unresolved_txns: usize,
    /// `ckp_lsn` of the newest checkpoint record, [`Lsn::ZERO`] if none.
    pub checkpoint_lsn: Lsn,
}

/// Drives recovery over one log and one page store.
///
/// A driver is a borrow-only view; it owns nothing and can be rebuilt
/// cheaply for each run.
pub struct RecoveryDriver<'a> {
    log: &'a LogStore,
    cache: &'a dyn PageCache,
    cursors: Option<&'a CursorRegistry>,
    cancel: Option<&'a AtomicBool>,
}

impl<'a> RecoveryDriver<'a> {
    /// Creates a driver over a log and page store.
    pub fn new(log: &'a LogStore, cache: &'a dyn PageCache) -> Self {
        Self {
            log,
            cache,
            cursors: None,
            cancel: None,
        }
    }

    /// Tracks open cursors during undo.
    #[must_use]
    pub fn with_cursor_registry(mut self, cursors: &'a CursorRegistry) -> Self {
        self.cursors = Some(cursors);
        self
    }

    /// Aborts the run with [`CoreError::Cancelled`] once the flag is set.
    /// Checked between records, never inside a handler.
    #[must_use]
    pub fn with_cancel_flag(mut self, cancel: &'a AtomicBool) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Runs full crash recovery: backward undo pass, then forward redo
    /// pass from the last checkpoint.
    ///
    /// # Errors
    ///
    /// Stops at the first fatal error; guard skips and missing pages
    /// during undo are not errors.
    pub fn run(&self) -> CoreResult<RecoveryReport> {
        let mut report = RecoveryReport::default();
        let mut committed: HashSet<TxnId> = HashSet::new();
        let mut unresolved: HashSet<TxnId> = HashSet::new();

        let mut cursor = LogCursor::new(self.log);
        let mut pos = cursor.last()?;
        if pos.is_none() {
            info!("empty log, nothing to recover");
            return Ok(report);
        }
        info!(last_lsn = %self.log.last_lsn(), "starting backward pass");

        while let Some((lsn, record)) = pos {
            self.check_cancel()?;
            report.records_scanned += 1;

            match &record.body {
                RecordBody::TxnCommit => {
                    committed.insert(record.txn_id);
                }
                RecordBody::Checkpoint { ckp_lsn } => {
                    // Walking backwards, the first checkpoint seen is the
                    // newest one.
                    if report.checkpoint_lsn.is_zero() {
                        report.checkpoint_lsn = *ckp_lsn;
                    }
                }
                _ => {}
            }

            if undoable(record.kind())
                && record.txn_id.as_u32() != 0
                && !committed.contains(&record.txn_id)
            {
                unresolved.insert(record.txn_id);
                debug!(%lsn, kind = record.kind().name(), "undoing unresolved change");
                match handlers::dispatch(&self.ctx(lsn), &record, Direction::Undo)? {
                    Applied::Applied => report.undo_applied += 1,
                    Applied::Skipped => report.undo_skipped += 1,
                }
            }

            pos = cursor.prev()?;
        }

        let start = if report.checkpoint_lsn.is_zero() {
            self.log.first_lsn()
        } else {
            report.checkpoint_lsn
        };
        info!(%start, "starting forward pass");

        let mut cursor = LogCursor::new(self.log);
        let mut pos = Some(cursor.seek(start)?);
        while let Some((lsn, record)) = pos {
            self.check_cancel()?;
            report.records_scanned += 1;

            if record.kind().is_page_mutation()
                && (record.txn_id.as_u32() == 0 || committed.contains(&record.txn_id))
            {
                match handlers::dispatch(&self.ctx(lsn), &record, Direction::Redo)? {
                    Applied::Applied => report.redo_applied += 1,
                    Applied::Skipped => report.redo_skipped += 1,
                }
            }

            pos = cursor.next()?;
        }

        report.committed_txns = committed.len();
        report.unresolved_txns = unresolved.len();
        info!(
            redo_applied = report.redo_applied,
            undo_applied = report.undo_applied,
            committed = report.committed_txns,
            unresolved = report.unresolved_txns,
            "recovery complete"
        );
        Ok(report)
    }

    /// Rolls the log and pages back to `match_lsn`: undoes every logged
    /// change past it, committed or not, then truncates the log so
    /// `match_lsn` is the newest record.
    ///
    /// Replication sync-up uses this when a diverged site must discard a
    /// suffix of its log and rejoin from a common prefix.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if no record lives at
    /// `match_lsn`, or the first fatal handler error.
    pub fn rollback_to(&self, match_lsn: Lsn) -> CoreResult<RecoveryReport> {
        if match_lsn.is_zero() {
            return Err(CoreError::invalid_operation(
                "cannot roll back to the null LSN",
            ));
        }
        let mut report = RecoveryReport::default();
        info!(%match_lsn, "rolling back to match point");

        let mut cursor = LogCursor::new(self.log);
        let mut pos = cursor.last()?;
        while let Some((lsn, record)) = pos {
            if lsn <= match_lsn {
                break;
            }
            self.check_cancel()?;
            report.records_scanned += 1;

            if undoable(record.kind()) {
                match handlers::dispatch(&self.ctx(lsn), &record, Direction::Undo)? {
                    Applied::Applied => report.undo_applied += 1,
                    Applied::Skipped => report.undo_skipped += 1,
                }
            }
            pos = cursor.prev()?;
        }

        self.log.truncate(match_lsn)?;
        Ok(report)
    }

    fn ctx(&self, record_lsn: Lsn) -> HandlerCtx<'_> {
        HandlerCtx {
            cache: self.cache,
            cursors: self.cursors,
            record_lsn,
        }
    }

    fn check_cancel(&self) -> CoreResult<()> {
        if let Some(flag) = self.cancel {
            if flag.load(Ordering::SeqCst) {
                return Err(CoreError::Cancelled);
            }
        }
        Ok(())
    }
}

fn undoable(kind: RecordKind) -> bool {
    kind.is_page_mutation() || kind == RecordKind::CurAdj
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::{LogConfig, LogRecord, PairOp};
    use crate::page::{InMemoryPageCache, Page, PageCache};
    use crate::types::PageId;
    use burrowdb_storage::{MemorySegmentStore, StorageCapabilities};

    fn open_log() -> LogStore {
        LogStore::open(Box::new(MemorySegmentStore::new()), LogConfig::default()).unwrap()
    }

    fn insdel(txn: u32, prev: Lsn, pgno: u32, ndx: u32, page_lsn: Lsn, key: &str) -> LogRecord {
        LogRecord {
            txn_id: TxnId::new(txn),
            prev_lsn: prev,
            body: RecordBody::InsDel {
                op: PairOp::Put,
                key_big: false,
                data_big: false,
                data_dup: false,
                pgno: PageId::new(pgno),
                ndx,
                page_lsn,
                key: key.as_bytes().to_vec(),
                data: b"v".to_vec(),
            },
        }
    }

    fn commit(txn: u32, prev: Lsn) -> LogRecord {
        LogRecord {
            txn_id: TxnId::new(txn),
            prev_lsn: prev,
            body: RecordBody::TxnCommit,
        }
    }

    fn cache_with_page(pgno: u32) -> InMemoryPageCache {
        let cache = InMemoryPageCache::new(512, StorageCapabilities::truncating());
        cache.seed(Page::new(PageId::new(pgno), 512));
        cache
    }

    /// Committed txn 1 and unresolved txn 2 interleave on page 5; the
    /// cache lost every write. Recovery must land on txn 1's work only.
    #[test]
    fn committed_redone_unresolved_dropped() {
        let log = open_log();
        let l1 = log.append(&insdel(1, Lsn::ZERO, 5, 0, Lsn::ZERO, "one")).unwrap();
        let _l2 = log.append(&commit(1, l1)).unwrap();
        let _l3 = log.append(&insdel(2, Lsn::ZERO, 5, 2, l1, "two")).unwrap();

        let cache = cache_with_page(5);
        let report = RecoveryDriver::new(&log, &cache).run().unwrap();

        let page = cache.fetch(PageId::new(5)).unwrap().unwrap();
        assert_eq!(page.entry_count(), 2);
        assert_eq!(page.entry(0).unwrap().data, b"one");
        assert_eq!(page.lsn, l1);
        assert_eq!(report.committed_txns, 1);
        assert_eq!(report.unresolved_txns, 1);
        assert_eq!(report.redo_applied, 1);
    }

    /// Same log, but the cache saw the unresolved change hit disk. The
    /// backward pass peels it off, and both cache states converge.
    #[test]
    fn diverged_cache_states_converge() {
        let log = open_log();
        let l1 = log.append(&insdel(1, Lsn::ZERO, 5, 0, Lsn::ZERO, "one")).unwrap();
        let _ = log.append(&commit(1, l1)).unwrap();
        let l3 = log.append(&insdel(2, Lsn::ZERO, 5, 2, l1, "two")).unwrap();

        // Cache state A: nothing reached disk.
        let cache_a = cache_with_page(5);
        RecoveryDriver::new(&log, &cache_a).run().unwrap();

        // Cache state B: everything reached disk, including txn 2.
        let cache_b = InMemoryPageCache::new(512, StorageCapabilities::truncating());
        let mut page = Page::new(PageId::new(5), 512);
        page.splice_pair(
            0,
            crate::page::PageEntry::inline(b"one".to_vec()),
            crate::page::PageEntry::inline(b"v".to_vec()),
        )
        .unwrap();
        page.splice_pair(
            2,
            crate::page::PageEntry::inline(b"two".to_vec()),
            crate::page::PageEntry::inline(b"v".to_vec()),
        )
        .unwrap();
        page.lsn = l3;
        cache_b.seed(page);
        RecoveryDriver::new(&log, &cache_b).run().unwrap();

        assert_eq!(
            cache_a.fetch(PageId::new(5)).unwrap().unwrap().to_image(),
            cache_b.fetch(PageId::new(5)).unwrap().unwrap().to_image()
        );
    }

    #[test]
    fn recovery_is_idempotent() {
        let log = open_log();
        let l1 = log.append(&insdel(1, Lsn::ZERO, 5, 0, Lsn::ZERO, "one")).unwrap();
        let _ = log.append(&commit(1, l1)).unwrap();

        let cache = cache_with_page(5);
        let first = RecoveryDriver::new(&log, &cache).run().unwrap();
        assert_eq!(first.redo_applied, 1);

        cache.clear_dirty();
        let second = RecoveryDriver::new(&log, &cache).run().unwrap();
        assert_eq!(second.redo_applied, 0);
        assert_eq!(second.redo_skipped, 1);
        assert!(cache.dirty_pages().is_empty(), "second run must write nothing");
    }

    #[test]
    fn forward_pass_starts_at_checkpoint() {
        let log = open_log();
        let l1 = log.append(&insdel(1, Lsn::ZERO, 5, 0, Lsn::ZERO, "early")).unwrap();
        let _ = log.append(&commit(1, l1)).unwrap();
        let ckp = log
            .append(&LogRecord {
                txn_id: TxnId::new(0),
                prev_lsn: Lsn::ZERO,
                body: RecordBody::Checkpoint { ckp_lsn: l1 },
            })
            .unwrap();
        let l4 = log.append(&insdel(2, Lsn::ZERO, 5, 2, l1, "late")).unwrap();
        let _ = log.append(&commit(2, l4)).unwrap();

        let cache = cache_with_page(5);
        let report = RecoveryDriver::new(&log, &cache).run().unwrap();
        assert_eq!(report.checkpoint_lsn, l1);
        assert!(ckp > l1);
        // Both committed changes present.
        let page = cache.fetch(PageId::new(5)).unwrap().unwrap();
        assert_eq!(page.entry_count(), 4);
        assert_eq!(page.lsn, l4);
    }

    #[test]
    fn empty_log_recovers_to_nothing() {
        let log = open_log();
        let cache = cache_with_page(5);
        let report = RecoveryDriver::new(&log, &cache).run().unwrap();
        assert_eq!(report.records_scanned, 0);
        assert!(cache.dirty_pages().is_empty());
    }

    #[test]
    fn cancellation_stops_the_run() {
        let log = open_log();
        let l1 = log.append(&insdel(1, Lsn::ZERO, 5, 0, Lsn::ZERO, "one")).unwrap();
        let _ = log.append(&commit(1, l1)).unwrap();

        let cache = cache_with_page(5);
        let cancel = AtomicBool::new(true);
        let err = RecoveryDriver::new(&log, &cache)
            .with_cancel_flag(&cancel)
            .run()
            .unwrap_err();
        assert!(matches!(err, CoreError::Cancelled));
    }

    #[test]
    fn rollback_unwinds_past_match_point() {
        let log = open_log();
        let l1 = log.append(&insdel(1, Lsn::ZERO, 5, 0, Lsn::ZERO, "keep")).unwrap();
        let l2 = log.append(&commit(1, l1)).unwrap();
        let l3 = log.append(&insdel(2, Lsn::ZERO, 5, 2, l1, "drop")).unwrap();
        let l4 = log.append(&commit(2, l3)).unwrap();

        // Page reflects everything, including the committed-but-doomed txn 2.
        let cache = InMemoryPageCache::new(512, StorageCapabilities::truncating());
        let mut page = Page::new(PageId::new(5), 512);
        page.splice_pair(
            0,
            crate::page::PageEntry::inline(b"keep".to_vec()),
            crate::page::PageEntry::inline(b"v".to_vec()),
        )
        .unwrap();
        page.splice_pair(
            2,
            crate::page::PageEntry::inline(b"drop".to_vec()),
            crate::page::PageEntry::inline(b"v".to_vec()),
        )
        .unwrap();
        page.lsn = l3;
        cache.seed(page);

        let report = RecoveryDriver::new(&log, &cache).rollback_to(l2).unwrap();
        assert_eq!(report.undo_applied, 1);
        assert_eq!(log.last_lsn(), l2);
        assert!(log.read(l4).is_err());

        let page = cache.fetch(PageId::new(5)).unwrap().unwrap();
        assert_eq!(page.entry_count(), 2);
        assert_eq!(page.entry(0).unwrap().data, b"keep");
        assert_eq!(page.lsn, l1);
    }
}
