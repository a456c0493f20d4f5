//! Crash and reopen cycles over the file backend.
//!
//! The unit tests cover each pass in isolation; these walk the whole
//! pipeline: append a workload, drop the log mid-flight, reopen from
//! disk, and recover into a page store.

use burrowdb_core::log::{LogConfig, LogRecord, PairOp, RecordBody};
use burrowdb_core::page::{InMemoryPageCache, Page, PageCache};
use burrowdb_core::types::TxnId;
use burrowdb_core::{LogStore, Lsn, PageId, RecoveryDriver};
use burrowdb_storage::{FileSegmentStore, StorageCapabilities};

use std::io::Write as _;
use std::path::Path;

fn open_log(dir: &Path, max_segment_size: u64) -> LogStore {
    let store = FileSegmentStore::open(dir).unwrap();
    LogStore::open(Box::new(store), LogConfig { max_segment_size }).unwrap()
}

fn cache_with_page(pgno: u32) -> InMemoryPageCache {
    let cache = InMemoryPageCache::new(512, StorageCapabilities::truncating());
    cache.seed(Page::new(PageId::new(pgno), 512));
    cache
}

fn insdel(txn: u32, pgno: u32, ndx: u32, page_lsn: Lsn, key: &str) -> LogRecord {
    LogRecord {
        txn_id: TxnId::new(txn),
        prev_lsn: Lsn::ZERO,
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

/// Workload, crash, reopen, recover: committed work survives, the
/// in-flight transaction vanishes, and a second recovery writes nothing.
#[test]
fn committed_work_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();

    let (l1, l3) = {
        let log = open_log(dir.path(), 256);
        let l1 = log.append(&insdel(1, 5, 0, Lsn::ZERO, "keep")).unwrap();
        log.append(&commit(1, l1)).unwrap();
        let l3 = log.append(&insdel(2, 5, 2, l1, "lost")).unwrap();
        log.sync().unwrap();
        (l1, l3)
        // Dropped without commit for txn 2: the crash point.
    };
    assert!(l3 > l1);

    let log = open_log(dir.path(), 256);
    assert_eq!(log.last_lsn(), l3);

    let cache = cache_with_page(5);
    let report = RecoveryDriver::new(&log, &cache).run().unwrap();
    assert_eq!(report.committed_txns, 1);
    assert_eq!(report.unresolved_txns, 1);

    let page = cache.fetch(PageId::new(5)).unwrap().unwrap();
    assert_eq!(page.entry_count(), 2);
    assert_eq!(page.entry(0).unwrap().data, b"keep");
    assert_eq!(page.lsn, l1);

    cache.clear_dirty();
    let again = RecoveryDriver::new(&log, &cache).run().unwrap();
    assert_eq!(again.redo_applied, 0);
    assert!(cache.dirty_pages().is_empty());
}

/// A crash right after rotation leaves a trailing segment holding only a
/// torn envelope. Reopen must fall back to the previous segment, and
/// recovery must still replay the committed work there.
#[test]
fn committed_prefix_survives_torn_trailing_segment() {
    let dir = tempfile::tempdir().unwrap();

    let (l1, l2) = {
        let log = open_log(dir.path(), 1024);
        let l1 = log.append(&insdel(1, 5, 0, Lsn::ZERO, "keep")).unwrap();
        let l2 = log.append(&commit(1, l1)).unwrap();
        log.sync().unwrap();
        (l1, l2)
    };

    // The next segment got as far as ten header bytes.
    std::fs::write(dir.path().join("log.0000000002"), b"BRLG\x01\x00\xf4\x01\x00\x00")
        .unwrap();

    let log = open_log(dir.path(), 1024);
    assert_eq!(log.last_lsn(), l2);
    assert_eq!(log.segment_files().unwrap(), vec![1]);

    let cache = cache_with_page(5);
    let report = RecoveryDriver::new(&log, &cache).run().unwrap();
    assert_eq!(report.redo_applied, 1);
    assert_eq!(report.committed_txns, 1);

    let page = cache.fetch(PageId::new(5)).unwrap().unwrap();
    assert_eq!(page.entry(0).unwrap().data, b"keep");
    assert_eq!(page.lsn, l1);
}

/// A torn append at the tail is cut on reopen; everything before it is
/// intact and the log accepts new appends at the cut point.
#[test]
fn torn_tail_is_cut_on_reopen() {
    let dir = tempfile::tempdir().unwrap();

    let l2 = {
        let log = open_log(dir.path(), 1024);
        let l1 = log.append(&insdel(1, 5, 0, Lsn::ZERO, "safe")).unwrap();
        let l2 = log.append(&commit(1, l1)).unwrap();
        log.sync().unwrap();
        l2
    };

    // Half an envelope header at the end of the live segment.
    let segment = dir.path().join("log.0000000001");
    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .open(&segment)
        .unwrap();
    file.write_all(b"BRLG\x01\x00").unwrap();
    file.sync_all().unwrap();

    let log = open_log(dir.path(), 1024);
    assert_eq!(log.last_lsn(), l2);

    let l3 = log.append(&insdel(0, 6, 0, Lsn::ZERO, "after")).unwrap();
    assert!(l3 > l2);
    assert_eq!(log.read(l3).unwrap(), insdel(0, 6, 0, Lsn::ZERO, "after"));
}

/// Flipping one payload byte in a fully written record must fail the
/// reopen rather than replay damaged history.
#[test]
fn payload_corruption_fails_reopen() {
    let dir = tempfile::tempdir().unwrap();

    {
        let log = open_log(dir.path(), 1024);
        let l1 = log.append(&insdel(1, 5, 0, Lsn::ZERO, "soon-bad")).unwrap();
        log.append(&commit(1, l1)).unwrap();
        log.sync().unwrap();
    }

    let segment = dir.path().join("log.0000000001");
    let mut bytes = std::fs::read(&segment).unwrap();
    // Past the envelope header, inside the first record's payload.
    bytes[20] ^= 0xff;
    std::fs::write(&segment, &bytes).unwrap();

    let store = FileSegmentStore::open(dir.path()).unwrap();
    assert!(LogStore::open(
        Box::new(store),
        LogConfig {
            max_segment_size: 1024
        }
    )
    .is_err());
}

/// A checkpoint bounds the forward pass across a reopen, and segment
/// rotation puts the interesting records in different files.
#[test]
fn checkpoint_bounds_forward_pass_across_segments() {
    let dir = tempfile::tempdir().unwrap();

    let (l1, l4) = {
        // Small segments so the workload spans several files.
        let log = open_log(dir.path(), 64);
        let l1 = log.append(&insdel(1, 5, 0, Lsn::ZERO, "early")).unwrap();
        log.append(&commit(1, l1)).unwrap();
        log.append(&LogRecord {
            txn_id: TxnId::new(0),
            prev_lsn: Lsn::ZERO,
            body: RecordBody::Checkpoint { ckp_lsn: l1 },
        })
        .unwrap();
        let l4 = log.append(&insdel(2, 5, 2, l1, "late")).unwrap();
        log.append(&commit(2, l4)).unwrap();
        log.sync().unwrap();
        (l1, l4)
    };

    let log = open_log(dir.path(), 64);
    assert!(log.segment_files().unwrap().len() > 1);

    let cache = cache_with_page(5);
    let report = RecoveryDriver::new(&log, &cache).run().unwrap();
    assert_eq!(report.checkpoint_lsn, l1);

    let page = cache.fetch(PageId::new(5)).unwrap().unwrap();
    assert_eq!(page.entry_count(), 4);
    assert_eq!(page.entry(2).unwrap().data, b"late");
    assert_eq!(page.lsn, l4);
}

/// Group allocation replayed from the log extends the page store, and
/// rolling back to before it shrinks the store again.
#[test]
fn group_alloc_extends_then_rolls_back() {
    let dir = tempfile::tempdir().unwrap();
    let log = open_log(dir.path(), 1024);

    let l1 = log.append(&insdel(1, 5, 0, Lsn::ZERO, "base")).unwrap();
    let l2 = log.append(&commit(1, l1)).unwrap();
    log.append(&LogRecord {
        txn_id: TxnId::new(0),
        prev_lsn: Lsn::ZERO,
        body: RecordBody::GroupAlloc {
            start_pgno: PageId::new(100),
            num: 8,
            meta_lsn: Lsn::ZERO,
            last_pgno: PageId::new(99),
        },
    })
    .unwrap();
    log.sync().unwrap();

    let cache = cache_with_page(5);
    cache.set_last_pgno(PageId::new(99)).unwrap();
    RecoveryDriver::new(&log, &cache).run().unwrap();
    for pgno in 100..108 {
        assert!(cache.contains(PageId::new(pgno)), "page {pgno} missing");
    }
    assert_eq!(cache.last_pgno().unwrap(), PageId::new(107));

    RecoveryDriver::new(&log, &cache).rollback_to(l2).unwrap();
    for pgno in 100..108 {
        assert!(!cache.contains(PageId::new(pgno)), "page {pgno} kept");
    }
    assert_eq!(cache.last_pgno().unwrap(), PageId::new(99));
    assert_eq!(log.last_lsn(), l2);

    // The base insert predates the match point and stays put.
    let page = cache.fetch(PageId::new(5)).unwrap().unwrap();
    assert_eq!(page.entry(0).unwrap().data, b"base");
}

/// Page entries carry their type tags through a full log round trip and
/// recovery replay.
#[test]
fn entry_tags_survive_recovery() {
    let dir = tempfile::tempdir().unwrap();
    let log = open_log(dir.path(), 1024);

    // An off-page key paired with a duplicate-set data entry.
    let l1 = log
        .append(&LogRecord {
            txn_id: TxnId::new(1),
            prev_lsn: Lsn::ZERO,
            body: RecordBody::InsDel {
                op: PairOp::Put,
                key_big: true,
                data_big: false,
                data_dup: true,
                pgno: PageId::new(5),
                ndx: 0,
                page_lsn: Lsn::ZERO,
                key: b"overflow-ref".to_vec(),
                data: b"dup-set".to_vec(),
            },
        })
        .unwrap();
    log.append(&commit(1, l1)).unwrap();
    log.sync().unwrap();

    let cache = cache_with_page(5);
    RecoveryDriver::new(&log, &cache).run().unwrap();

    use burrowdb_core::page::EntryTag;
    let page = cache.fetch(PageId::new(5)).unwrap().unwrap();
    assert_eq!(page.entry(0).unwrap().tag, EntryTag::OffPage);
    assert_eq!(page.entry(1).unwrap().tag, EntryTag::Duplicate);
}
