//! Per-record-kind redo and undo handlers.
//!
//! One table entry per record kind. Control and diagnostic kinds carry no
//! handler and dispatch as no-ops; unknown kinds never reach dispatch
//! because decode rejects them. Handlers follow a fixed shape: fetch the
//! page, consult the guard, mutate, stamp the page LSN, write back dirty.
//! Pages are written back only when actually mutated.

use crate::error::{CoreError, CoreResult};
use crate::log::{LogRecord, OvflOp, PairOp, RecordBody, RecordKind};
use crate::page::{EntryTag, Page, PageCache, PageEntry};
use crate::recovery::cursors::{Adjustment, CursorRegistry};
use crate::recovery::guard::{self, Decision};
use crate::recovery::{Applied, Direction};
use crate::types::{Lsn, PageId, PGNO_INVALID};

/// Everything a handler needs besides the record itself.
pub(crate) struct HandlerCtx<'a> {
    /// The page store being recovered.
    pub cache: &'a dyn PageCache,
    /// Live cursors to adjust on abort, if any are being tracked.
    pub cursors: Option<&'a CursorRegistry>,
    /// The LSN of the record being dispatched.
    pub record_lsn: Lsn,
}

type Handler = fn(&HandlerCtx<'_>, &LogRecord) -> CoreResult<Applied>;

struct DispatchEntry {
    kind: RecordKind,
    redo: Option<Handler>,
    undo: Option<Handler>,
}

static DISPATCH_TABLE: &[DispatchEntry] = &[
    DispatchEntry {
        kind: RecordKind::TxnCommit,
        redo: None,
        undo: None,
    },
    DispatchEntry {
        kind: RecordKind::TxnAbort,
        redo: None,
        undo: None,
    },
    DispatchEntry {
        kind: RecordKind::Checkpoint,
        redo: None,
        undo: None,
    },
    DispatchEntry {
        kind: RecordKind::DebugMessage,
        redo: None,
        undo: None,
    },
    DispatchEntry {
        kind: RecordKind::InsDel,
        redo: Some(insdel_redo),
        undo: Some(insdel_undo),
    },
    DispatchEntry {
        kind: RecordKind::NewPage,
        redo: Some(newpage_redo),
        undo: Some(newpage_undo),
    },
    DispatchEntry {
        kind: RecordKind::Replace,
        redo: Some(replace_redo),
        undo: Some(replace_undo),
    },
    DispatchEntry {
        kind: RecordKind::PageImage,
        redo: Some(page_image_redo),
        undo: Some(page_image_undo),
    },
    DispatchEntry {
        kind: RecordKind::GroupAlloc,
        redo: Some(group_alloc_redo),
        undo: Some(group_alloc_undo),
    },
    DispatchEntry {
        kind: RecordKind::CurAdj,
        redo: None,
        undo: Some(cur_adj_undo),
    },
];

/// Routes a record to its handler for the given direction.
pub(crate) fn dispatch(
    ctx: &HandlerCtx<'_>,
    record: &LogRecord,
    direction: Direction,
) -> CoreResult<Applied> {
    let kind = record.kind();
    let entry = DISPATCH_TABLE
        .iter()
        .find(|e| e.kind == kind)
        .ok_or(CoreError::UnknownRecordType {
            opcode: kind.opcode(),
        })?;
    let handler = match direction {
        Direction::Redo => entry.redo,
        Direction::Undo => entry.undo,
    };
    match handler {
        Some(handler) => handler(ctx, record),
        None => Ok(Applied::Skipped),
    }
}

fn wrong_body(kind: RecordKind) -> CoreError {
    CoreError::invariant(format!("{} record with mismatched body", kind.name()))
}

/// Tags a logged key/data pair for on-page placement.
fn pair_tags(key_big: bool, data_big: bool, data_dup: bool) -> (EntryTag, EntryTag) {
    let key_tag = if key_big {
        EntryTag::OffPage
    } else {
        EntryTag::KeyData
    };
    let data_tag = if data_dup {
        EntryTag::Duplicate
    } else if data_big {
        EntryTag::OffPage
    } else {
        EntryTag::KeyData
    };
    (key_tag, data_tag)
}

fn insdel_redo(ctx: &HandlerCtx<'_>, record: &LogRecord) -> CoreResult<Applied> {
    let RecordBody::InsDel {
        op,
        key_big,
        data_big,
        data_dup,
        pgno,
        ndx,
        page_lsn,
        key,
        data,
    } = &record.body
    else {
        return Err(wrong_body(RecordKind::InsDel));
    };

    let Some(mut page) = guard::fetch_for_redo(ctx.cache, *pgno, *page_lsn)? else {
        return Ok(Applied::Skipped);
    };
    if guard::redo(&page, *page_lsn)? == Decision::Skip {
        return Ok(Applied::Skipped);
    }

    match op {
        PairOp::Put => {
            let (key_tag, data_tag) = pair_tags(*key_big, *data_big, *data_dup);
            page.splice_pair(
                *ndx as usize,
                PageEntry::tagged(key_tag, key.clone()),
                PageEntry::tagged(data_tag, data.clone()),
            )?;
        }
        PairOp::Del => page.delete_pair(*ndx as usize)?,
    }
    page.lsn = ctx.record_lsn;
    ctx.cache.put(page, true)?;
    Ok(Applied::Applied)
}

fn insdel_undo(ctx: &HandlerCtx<'_>, record: &LogRecord) -> CoreResult<Applied> {
    let RecordBody::InsDel {
        op,
        key_big,
        data_big,
        data_dup,
        pgno,
        ndx,
        page_lsn,
        key,
        data,
    } = &record.body
    else {
        return Err(wrong_body(RecordKind::InsDel));
    };

    let Some(mut page) = ctx.cache.fetch(*pgno)? else {
        return Ok(Applied::Skipped);
    };
    if guard::undo(&page, ctx.record_lsn) == Decision::Skip {
        return Ok(Applied::Skipped);
    }

    match op {
        PairOp::Put => page.delete_pair(*ndx as usize)?,
        // Splice the logged entries back with their tags intact, so an
        // off-page reference undeletes as an off-page reference.
        PairOp::Del => {
            let (key_tag, data_tag) = pair_tags(*key_big, *data_big, *data_dup);
            page.splice_pair(
                *ndx as usize,
                PageEntry::tagged(key_tag, key.clone()),
                PageEntry::tagged(data_tag, data.clone()),
            )?;
        }
    }
    page.lsn = *page_lsn;
    ctx.cache.put(page, true)?;
    Ok(Applied::Applied)
}

/// Applies one step of a chain-link change to a neighbor page, with its
/// own guard. Returns whether the neighbor was touched.
fn link_neighbor(
    ctx: &HandlerCtx<'_>,
    pgno: PageId,
    logged_lsn: Lsn,
    direction: Direction,
    mutate: impl FnOnce(&mut Page),
) -> CoreResult<Applied> {
    if pgno.is_invalid() {
        return Ok(Applied::Skipped);
    }
    let page = match direction {
        Direction::Redo => guard::fetch_for_redo(ctx.cache, pgno, logged_lsn)?,
        Direction::Undo => ctx.cache.fetch(pgno)?,
    };
    let Some(mut page) = page else {
        return Ok(Applied::Skipped);
    };
    let decision = match direction {
        Direction::Redo => guard::redo(&page, logged_lsn)?,
        Direction::Undo => guard::undo(&page, ctx.record_lsn),
    };
    if decision == Decision::Skip {
        return Ok(Applied::Skipped);
    }
    mutate(&mut page);
    page.lsn = match direction {
        Direction::Redo => ctx.record_lsn,
        Direction::Undo => logged_lsn,
    };
    ctx.cache.put(page, true)?;
    Ok(Applied::Applied)
}

fn newpage_redo(ctx: &HandlerCtx<'_>, record: &LogRecord) -> CoreResult<Applied> {
    let RecordBody::NewPage {
        op,
        new_pgno,
        page_lsn,
        prev_pgno,
        prev_lsn,
        next_pgno,
        next_lsn,
    } = &record.body
    else {
        return Err(wrong_body(RecordKind::NewPage));
    };

    let mut touched = false;

    // The page itself. On a chain insert it is being materialized, so a
    // missing page is created rather than treated as truncated-away.
    let page = match op {
        OvflOp::Put => Some(ctx.cache.fetch_or_create(*new_pgno)?),
        OvflOp::Del => guard::fetch_for_redo(ctx.cache, *new_pgno, *page_lsn)?,
    };
    if let Some(mut page) = page {
        if guard::redo(&page, *page_lsn)? == Decision::Apply {
            if *op == OvflOp::Put {
                page.init(*prev_pgno, *next_pgno);
            }
            // A chain remove only rolls the removed page's clock forward;
            // its content is dealt with by the records that emptied it.
            page.lsn = ctx.record_lsn;
            ctx.cache.put(page, true)?;
            touched = true;
        }
    }

    let (prev_target, next_target) = match op {
        OvflOp::Put => (*new_pgno, *new_pgno),
        OvflOp::Del => (*next_pgno, *prev_pgno),
    };
    let applied = link_neighbor(ctx, *prev_pgno, *prev_lsn, Direction::Redo, |p| {
        p.next_pgno = prev_target;
    })?;
    touched |= applied == Applied::Applied;
    let applied = link_neighbor(ctx, *next_pgno, *next_lsn, Direction::Redo, |p| {
        p.prev_pgno = next_target;
    })?;
    touched |= applied == Applied::Applied;

    Ok(if touched {
        Applied::Applied
    } else {
        Applied::Skipped
    })
}

fn newpage_undo(ctx: &HandlerCtx<'_>, record: &LogRecord) -> CoreResult<Applied> {
    let RecordBody::NewPage {
        op,
        new_pgno,
        page_lsn,
        prev_pgno,
        prev_lsn,
        next_pgno,
        next_lsn,
    } = &record.body
    else {
        return Err(wrong_body(RecordKind::NewPage));
    };

    let mut touched = false;

    if let Some(mut page) = ctx.cache.fetch(*new_pgno)? {
        if guard::undo(&page, ctx.record_lsn) == Decision::Apply {
            match op {
                // Undo of an insert: the page leaves the chain again.
                OvflOp::Put => page.init(PGNO_INVALID, PGNO_INVALID),
                // Undo of a remove: restore the page's chain membership.
                OvflOp::Del => {
                    page.prev_pgno = *prev_pgno;
                    page.next_pgno = *next_pgno;
                }
            }
            page.lsn = *page_lsn;
            ctx.cache.put(page, true)?;
            touched = true;
        }
    }

    let (prev_target, next_target) = match op {
        // Before the insert, the neighbors pointed at each other.
        OvflOp::Put => (*next_pgno, *prev_pgno),
        // Before the remove, the neighbors pointed at the page.
        OvflOp::Del => (*new_pgno, *new_pgno),
    };
    let applied = link_neighbor(ctx, *prev_pgno, *prev_lsn, Direction::Undo, |p| {
        p.next_pgno = prev_target;
    })?;
    touched |= applied == Applied::Applied;
    let applied = link_neighbor(ctx, *next_pgno, *next_lsn, Direction::Undo, |p| {
        p.prev_pgno = next_target;
    })?;
    touched |= applied == Applied::Applied;

    Ok(if touched {
        Applied::Applied
    } else {
        Applied::Skipped
    })
}

fn replace_redo(ctx: &HandlerCtx<'_>, record: &LogRecord) -> CoreResult<Applied> {
    let RecordBody::Replace {
        pgno,
        ndx,
        off,
        make_dup,
        page_lsn,
        old_item,
        new_item,
    } = &record.body
    else {
        return Err(wrong_body(RecordKind::Replace));
    };

    let Some(mut page) = guard::fetch_for_redo(ctx.cache, *pgno, *page_lsn)? else {
        return Ok(Applied::Skipped);
    };
    if guard::redo(&page, *page_lsn)? == Decision::Skip {
        return Ok(Applied::Skipped);
    }

    page.splice_range(*ndx as usize, *off as usize, old_item.len(), new_item)?;
    if *make_dup {
        page.set_tag(*ndx as usize, EntryTag::Duplicate)?;
    }
    page.lsn = ctx.record_lsn;
    ctx.cache.put(page, true)?;
    Ok(Applied::Applied)
}

fn replace_undo(ctx: &HandlerCtx<'_>, record: &LogRecord) -> CoreResult<Applied> {
    let RecordBody::Replace {
        pgno,
        ndx,
        off,
        make_dup,
        page_lsn,
        old_item,
        new_item,
    } = &record.body
    else {
        return Err(wrong_body(RecordKind::Replace));
    };

    let Some(mut page) = ctx.cache.fetch(*pgno)? else {
        return Ok(Applied::Skipped);
    };
    if guard::undo(&page, ctx.record_lsn) == Decision::Skip {
        return Ok(Applied::Skipped);
    }

    page.splice_range(*ndx as usize, *off as usize, new_item.len(), old_item)?;
    if *make_dup {
        page.set_tag(*ndx as usize, EntryTag::KeyData)?;
    }
    page.lsn = *page_lsn;
    ctx.cache.put(page, true)?;
    Ok(Applied::Applied)
}

fn page_image_redo(ctx: &HandlerCtx<'_>, record: &LogRecord) -> CoreResult<Applied> {
    let RecordBody::PageImage {
        pgno,
        page_lsn,
        new_image,
        ..
    } = &record.body
    else {
        return Err(wrong_body(RecordKind::PageImage));
    };

    let Some(page) = guard::fetch_for_redo(ctx.cache, *pgno, *page_lsn)? else {
        return Ok(Applied::Skipped);
    };
    if guard::redo(&page, *page_lsn)? == Decision::Skip {
        return Ok(Applied::Skipped);
    }

    let mut installed = Page::from_image(ctx.cache.page_size(), new_image)?;
    installed.lsn = ctx.record_lsn;
    ctx.cache.put(installed, true)?;
    Ok(Applied::Applied)
}

fn page_image_undo(ctx: &HandlerCtx<'_>, record: &LogRecord) -> CoreResult<Applied> {
    let RecordBody::PageImage {
        pgno,
        page_lsn,
        old_image,
        ..
    } = &record.body
    else {
        return Err(wrong_body(RecordKind::PageImage));
    };

    let Some(mut page) = ctx.cache.fetch(*pgno)? else {
        return Ok(Applied::Skipped);
    };
    if guard::undo(&page, ctx.record_lsn) == Decision::Skip {
        return Ok(Applied::Skipped);
    }

    // An empty before-image means the page did not exist before this
    // change; undo leaves it blank.
    if old_image.is_empty() {
        page.init(PGNO_INVALID, PGNO_INVALID);
        page.lsn = *page_lsn;
        ctx.cache.put(page, true)?;
    } else {
        let mut restored = Page::from_image(ctx.cache.page_size(), old_image)?;
        restored.lsn = *page_lsn;
        ctx.cache.put(restored, true)?;
    }
    Ok(Applied::Applied)
}

fn group_alloc_redo(ctx: &HandlerCtx<'_>, record: &LogRecord) -> CoreResult<Applied> {
    let RecordBody::GroupAlloc {
        start_pgno, num, ..
    } = &record.body
    else {
        return Err(wrong_body(RecordKind::GroupAlloc));
    };

    let last = PageId::new(start_pgno.as_u32() + num - 1);

    // Idempotence check on the run's final page: a non-zero LSN or any
    // entries mean the allocation already reached disk.
    if let Some(page) = ctx.cache.fetch(last)? {
        if !page.lsn.is_zero() || !page.is_empty() {
            return Ok(Applied::Skipped);
        }
    }

    for pgno in start_pgno.as_u32()..=last.as_u32() {
        let mut page = ctx.cache.fetch_or_create(PageId::new(pgno))?;
        page.init(PGNO_INVALID, PGNO_INVALID);
        ctx.cache.put(page, true)?;
    }
    ctx.cache.set_last_pgno(last)?;
    Ok(Applied::Applied)
}

fn group_alloc_undo(ctx: &HandlerCtx<'_>, record: &LogRecord) -> CoreResult<Applied> {
    let RecordBody::GroupAlloc {
        start_pgno,
        num,
        last_pgno,
        ..
    } = &record.body
    else {
        return Err(wrong_body(RecordKind::GroupAlloc));
    };

    if ctx.cache.capabilities().can_truncate {
        ctx.cache.truncate(*start_pgno)?;
        ctx.cache.set_last_pgno(*last_pgno)?;
    } else {
        // No truncation available: zero the pages and hand them to the
        // free list so the space is reused.
        for pgno in start_pgno.as_u32()..start_pgno.as_u32() + num {
            if let Some(mut page) = ctx.cache.fetch(PageId::new(pgno))? {
                page.init(PGNO_INVALID, PGNO_INVALID);
                ctx.cache.put(page, true)?;
            }
        }
        ctx.cache.free_pages(*start_pgno, *num)?;
    }
    Ok(Applied::Applied)
}

fn cur_adj_undo(ctx: &HandlerCtx<'_>, record: &LogRecord) -> CoreResult<Applied> {
    let RecordBody::CurAdj {
        op,
        pgno,
        ndx,
        len,
        dup_off,
        order,
        is_dup,
    } = &record.body
    else {
        return Err(wrong_body(RecordKind::CurAdj));
    };

    let Some(registry) = ctx.cursors else {
        return Ok(Applied::Skipped);
    };
    registry.adjust(
        op.inverted(),
        &Adjustment {
            pgno: *pgno,
            ndx: *ndx,
            len: *len,
            dup_off: *dup_off,
            order: *order,
            is_dup: *is_dup,
        },
    );
    Ok(Applied::Applied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::CurAdjOp;
    use crate::page::InMemoryPageCache;
    use crate::types::TxnId;
    use burrowdb_storage::StorageCapabilities;

    fn ctx<'a>(cache: &'a InMemoryPageCache) -> HandlerCtx<'a> {
        HandlerCtx {
            cache,
            cursors: None,
            record_lsn: Lsn::new(1, 100),
        }
    }

    fn insdel(op: PairOp, pgno: u32, ndx: u32, page_lsn: Lsn) -> LogRecord {
        LogRecord {
            txn_id: TxnId::new(1),
            prev_lsn: Lsn::ZERO,
            body: RecordBody::InsDel {
                op,
                key_big: false,
                data_big: false,
                data_dup: false,
                pgno: PageId::new(pgno),
                ndx,
                page_lsn,
                key: b"key".to_vec(),
                data: b"value".to_vec(),
            },
        }
    }

    fn seeded_cache(pgno: u32, lsn: Lsn) -> InMemoryPageCache {
        let cache = InMemoryPageCache::new(512, StorageCapabilities::truncating());
        let mut page = Page::new(PageId::new(pgno), 512);
        page.lsn = lsn;
        cache.seed(page);
        cache
    }

    #[test]
    fn insdel_redo_inserts_and_stamps() {
        let cache = seeded_cache(5, Lsn::new(1, 50));
        let record = insdel(PairOp::Put, 5, 0, Lsn::new(1, 50));
        let ctx = ctx(&cache);
        assert_eq!(dispatch(&ctx, &record, Direction::Redo).unwrap(), Applied::Applied);

        let page = cache.fetch(PageId::new(5)).unwrap().unwrap();
        assert_eq!(page.lsn, Lsn::new(1, 100));
        assert_eq!(page.entry(0).unwrap().data, b"key");
        assert_eq!(page.entry(1).unwrap().data, b"value");
        assert_eq!(cache.dirty_pages(), vec![PageId::new(5)]);
    }

    #[test]
    fn insdel_redo_skips_page_ahead() {
        let cache = seeded_cache(5, Lsn::new(1, 100));
        let record = insdel(PairOp::Put, 5, 0, Lsn::new(1, 50));
        let ctx = ctx(&cache);
        assert_eq!(dispatch(&ctx, &record, Direction::Redo).unwrap(), Applied::Skipped);
        assert!(cache.dirty_pages().is_empty());
    }

    #[test]
    fn insdel_redo_twice_is_idempotent() {
        let cache = seeded_cache(5, Lsn::new(1, 50));
        let record = insdel(PairOp::Put, 5, 0, Lsn::new(1, 50));
        let ctx = ctx(&cache);
        assert_eq!(dispatch(&ctx, &record, Direction::Redo).unwrap(), Applied::Applied);
        assert_eq!(dispatch(&ctx, &record, Direction::Redo).unwrap(), Applied::Skipped);
        let page = cache.fetch(PageId::new(5)).unwrap().unwrap();
        assert_eq!(page.entry_count(), 2);
    }

    #[test]
    fn insdel_undo_inverts_redo_bit_for_bit() {
        let cache = seeded_cache(5, Lsn::new(1, 50));
        let before = cache.fetch(PageId::new(5)).unwrap().unwrap().to_image();
        let record = insdel(PairOp::Put, 5, 0, Lsn::new(1, 50));
        let ctx = ctx(&cache);

        dispatch(&ctx, &record, Direction::Redo).unwrap();
        dispatch(&ctx, &record, Direction::Undo).unwrap();
        let after = cache.fetch(PageId::new(5)).unwrap().unwrap().to_image();
        assert_eq!(before, after);
    }

    #[test]
    fn insdel_undo_of_delete_preserves_tags() {
        let cache = seeded_cache(5, Lsn::new(1, 100));
        let record = LogRecord {
            txn_id: TxnId::new(1),
            prev_lsn: Lsn::ZERO,
            body: RecordBody::InsDel {
                op: PairOp::Del,
                key_big: true,
                data_big: false,
                data_dup: true,
                pgno: PageId::new(5),
                ndx: 0,
                page_lsn: Lsn::new(1, 50),
                key: vec![7, 7],
                data: vec![8],
            },
        };
        let ctx = ctx(&cache);
        assert_eq!(dispatch(&ctx, &record, Direction::Undo).unwrap(), Applied::Applied);

        let page = cache.fetch(PageId::new(5)).unwrap().unwrap();
        assert_eq!(page.entry(0).unwrap().tag, EntryTag::OffPage);
        assert_eq!(page.entry(1).unwrap().tag, EntryTag::Duplicate);
        assert_eq!(page.lsn, Lsn::new(1, 50));
    }

    #[test]
    fn insdel_undo_missing_page_skips() {
        let cache = InMemoryPageCache::new(512, StorageCapabilities::truncating());
        let record = insdel(PairOp::Put, 9, 0, Lsn::new(1, 50));
        let ctx = ctx(&cache);
        assert_eq!(dispatch(&ctx, &record, Direction::Undo).unwrap(), Applied::Skipped);
    }

    #[test]
    fn newpage_redo_links_three_pages() {
        let cache = InMemoryPageCache::new(512, StorageCapabilities::truncating());
        let mut prev = Page::new(PageId::new(1), 512);
        prev.lsn = Lsn::new(1, 10);
        prev.next_pgno = PageId::new(3);
        cache.seed(prev);
        let mut next = Page::new(PageId::new(3), 512);
        next.lsn = Lsn::new(1, 20);
        next.prev_pgno = PageId::new(1);
        cache.seed(next);

        let record = LogRecord {
            txn_id: TxnId::new(1),
            prev_lsn: Lsn::ZERO,
            body: RecordBody::NewPage {
                op: OvflOp::Put,
                new_pgno: PageId::new(2),
                page_lsn: Lsn::ZERO,
                prev_pgno: PageId::new(1),
                prev_lsn: Lsn::new(1, 10),
                next_pgno: PageId::new(3),
                next_lsn: Lsn::new(1, 20),
            },
        };
        let ctx = ctx(&cache);
        assert_eq!(dispatch(&ctx, &record, Direction::Redo).unwrap(), Applied::Applied);

        let new = cache.fetch(PageId::new(2)).unwrap().unwrap();
        assert_eq!(new.prev_pgno, PageId::new(1));
        assert_eq!(new.next_pgno, PageId::new(3));
        assert_eq!(new.lsn, Lsn::new(1, 100));
        assert_eq!(
            cache.fetch(PageId::new(1)).unwrap().unwrap().next_pgno,
            PageId::new(2)
        );
        assert_eq!(
            cache.fetch(PageId::new(3)).unwrap().unwrap().prev_pgno,
            PageId::new(2)
        );
    }

    #[test]
    fn newpage_guards_pages_independently() {
        // Neighbor already recovered (LSN ahead); only the other two apply.
        let cache = InMemoryPageCache::new(512, StorageCapabilities::truncating());
        let mut prev = Page::new(PageId::new(1), 512);
        prev.lsn = Lsn::new(2, 0);
        prev.next_pgno = PageId::new(2);
        cache.seed(prev);
        let mut next = Page::new(PageId::new(3), 512);
        next.lsn = Lsn::new(1, 20);
        next.prev_pgno = PageId::new(1);
        cache.seed(next);

        let record = LogRecord {
            txn_id: TxnId::new(1),
            prev_lsn: Lsn::ZERO,
            body: RecordBody::NewPage {
                op: OvflOp::Put,
                new_pgno: PageId::new(2),
                page_lsn: Lsn::ZERO,
                prev_pgno: PageId::new(1),
                prev_lsn: Lsn::new(1, 10),
                next_pgno: PageId::new(3),
                next_lsn: Lsn::new(1, 20),
            },
        };
        let ctx = ctx(&cache);
        assert_eq!(dispatch(&ctx, &record, Direction::Redo).unwrap(), Applied::Applied);
        // Prev untouched, next updated.
        assert_eq!(cache.fetch(PageId::new(1)).unwrap().unwrap().lsn, Lsn::new(2, 0));
        assert_eq!(
            cache.fetch(PageId::new(3)).unwrap().unwrap().prev_pgno,
            PageId::new(2)
        );
    }

    #[test]
    fn newpage_undo_restores_bypass() {
        let cache = InMemoryPageCache::new(512, StorageCapabilities::truncating());
        for (pgno, prev, next) in [(1u32, 0u32, 2u32), (2, 1, 3), (3, 2, 0)] {
            let mut page = Page::new(PageId::new(pgno), 512);
            page.lsn = Lsn::new(1, 100);
            page.prev_pgno = PageId::new(prev);
            page.next_pgno = PageId::new(next);
            cache.seed(page);
        }

        let record = LogRecord {
            txn_id: TxnId::new(1),
            prev_lsn: Lsn::ZERO,
            body: RecordBody::NewPage {
                op: OvflOp::Put,
                new_pgno: PageId::new(2),
                page_lsn: Lsn::ZERO,
                prev_pgno: PageId::new(1),
                prev_lsn: Lsn::new(1, 10),
                next_pgno: PageId::new(3),
                next_lsn: Lsn::new(1, 20),
            },
        };
        let ctx = ctx(&cache);
        assert_eq!(dispatch(&ctx, &record, Direction::Undo).unwrap(), Applied::Applied);

        let prev = cache.fetch(PageId::new(1)).unwrap().unwrap();
        assert_eq!(prev.next_pgno, PageId::new(3));
        assert_eq!(prev.lsn, Lsn::new(1, 10));
        let next = cache.fetch(PageId::new(3)).unwrap().unwrap();
        assert_eq!(next.prev_pgno, PageId::new(1));
        assert_eq!(next.lsn, Lsn::new(1, 20));
        assert!(cache.fetch(PageId::new(2)).unwrap().unwrap().lsn.is_zero());
    }

    #[test]
    fn replace_redo_then_undo_restores_entry() {
        let cache = InMemoryPageCache::new(512, StorageCapabilities::truncating());
        let mut page = Page::new(PageId::new(4), 512);
        page.lsn = Lsn::new(1, 50);
        page.splice_pair(
            0,
            PageEntry::inline(b"k".to_vec()),
            PageEntry::inline(b"hello world".to_vec()),
        )
        .unwrap();
        cache.seed(page);
        let before = cache.fetch(PageId::new(4)).unwrap().unwrap().to_image();

        let record = LogRecord {
            txn_id: TxnId::new(1),
            prev_lsn: Lsn::ZERO,
            body: RecordBody::Replace {
                pgno: PageId::new(4),
                ndx: 1,
                off: 6,
                make_dup: false,
                page_lsn: Lsn::new(1, 50),
                old_item: b"world".to_vec(),
                new_item: b"burrowdb".to_vec(),
            },
        };
        let ctx = ctx(&cache);
        assert_eq!(dispatch(&ctx, &record, Direction::Redo).unwrap(), Applied::Applied);
        assert_eq!(
            cache.fetch(PageId::new(4)).unwrap().unwrap().entry(1).unwrap().data,
            b"hello burrowdb"
        );

        assert_eq!(dispatch(&ctx, &record, Direction::Undo).unwrap(), Applied::Applied);
        let after = cache.fetch(PageId::new(4)).unwrap().unwrap().to_image();
        assert_eq!(before, after);
    }

    #[test]
    fn replace_make_dup_toggles_tag() {
        let cache = InMemoryPageCache::new(512, StorageCapabilities::truncating());
        let mut page = Page::new(PageId::new(4), 512);
        page.lsn = Lsn::new(1, 50);
        page.splice_pair(
            0,
            PageEntry::inline(b"k".to_vec()),
            PageEntry::inline(b"d".to_vec()),
        )
        .unwrap();
        cache.seed(page);

        let record = LogRecord {
            txn_id: TxnId::new(1),
            prev_lsn: Lsn::ZERO,
            body: RecordBody::Replace {
                pgno: PageId::new(4),
                ndx: 1,
                off: 0,
                make_dup: true,
                page_lsn: Lsn::new(1, 50),
                old_item: b"d".to_vec(),
                new_item: b"dd".to_vec(),
            },
        };
        let ctx = ctx(&cache);
        dispatch(&ctx, &record, Direction::Redo).unwrap();
        assert_eq!(
            cache.fetch(PageId::new(4)).unwrap().unwrap().entry(1).unwrap().tag,
            EntryTag::Duplicate
        );
        dispatch(&ctx, &record, Direction::Undo).unwrap();
        assert_eq!(
            cache.fetch(PageId::new(4)).unwrap().unwrap().entry(1).unwrap().tag,
            EntryTag::KeyData
        );
    }

    #[test]
    fn page_image_redo_installs_and_undo_restores() {
        let cache = InMemoryPageCache::new(512, StorageCapabilities::truncating());
        let mut old = Page::new(PageId::new(6), 512);
        old.lsn = Lsn::new(1, 50);
        old.splice_pair(
            0,
            PageEntry::inline(b"a".to_vec()),
            PageEntry::inline(b"1".to_vec()),
        )
        .unwrap();
        cache.seed(old.clone());

        let mut new = old.clone();
        new.splice_pair(
            2,
            PageEntry::inline(b"b".to_vec()),
            PageEntry::inline(b"2".to_vec()),
        )
        .unwrap();

        let record = LogRecord {
            txn_id: TxnId::new(1),
            prev_lsn: Lsn::ZERO,
            body: RecordBody::PageImage {
                pgno: PageId::new(6),
                page_lsn: Lsn::new(1, 50),
                old_image: old.to_image(),
                new_image: new.to_image(),
            },
        };
        let ctx = ctx(&cache);
        assert_eq!(dispatch(&ctx, &record, Direction::Redo).unwrap(), Applied::Applied);
        let installed = cache.fetch(PageId::new(6)).unwrap().unwrap();
        assert_eq!(installed.entry_count(), 4);
        assert_eq!(installed.lsn, Lsn::new(1, 100));

        assert_eq!(dispatch(&ctx, &record, Direction::Undo).unwrap(), Applied::Applied);
        let restored = cache.fetch(PageId::new(6)).unwrap().unwrap();
        assert_eq!(restored.to_image(), old.to_image());
    }

    #[test]
    fn group_alloc_redo_creates_run_then_skips() {
        let cache = InMemoryPageCache::new(512, StorageCapabilities::truncating());
        let record = LogRecord {
            txn_id: TxnId::new(1),
            prev_lsn: Lsn::ZERO,
            body: RecordBody::GroupAlloc {
                start_pgno: PageId::new(100),
                num: 8,
                meta_lsn: Lsn::new(1, 10),
                last_pgno: PageId::new(99),
            },
        };
        let ctx = ctx(&cache);
        assert_eq!(dispatch(&ctx, &record, Direction::Redo).unwrap(), Applied::Applied);
        assert_eq!(cache.last_pgno().unwrap(), PageId::new(107));
        for pgno in 100..108 {
            assert!(cache.contains(PageId::new(pgno)), "page {pgno} missing");
        }

        // Second run: the final page now exists with entries stamped in.
        let mut page = cache.fetch(PageId::new(107)).unwrap().unwrap();
        page.lsn = Lsn::new(1, 100);
        cache.put(page, false).unwrap();
        assert_eq!(dispatch(&ctx, &record, Direction::Redo).unwrap(), Applied::Skipped);
    }

    #[test]
    fn group_alloc_undo_truncates_when_supported() {
        let cache = InMemoryPageCache::new(512, StorageCapabilities::truncating());
        for pgno in 100..108 {
            cache.fetch_or_create(PageId::new(pgno)).unwrap();
        }
        let record = LogRecord {
            txn_id: TxnId::new(1),
            prev_lsn: Lsn::ZERO,
            body: RecordBody::GroupAlloc {
                start_pgno: PageId::new(100),
                num: 8,
                meta_lsn: Lsn::new(1, 10),
                last_pgno: PageId::new(99),
            },
        };
        let ctx = ctx(&cache);
        assert_eq!(dispatch(&ctx, &record, Direction::Undo).unwrap(), Applied::Applied);
        assert!(!cache.contains(PageId::new(100)));
        assert_eq!(cache.last_pgno().unwrap(), PageId::new(99));
    }

    #[test]
    fn group_alloc_undo_free_list_fallback() {
        let cache = InMemoryPageCache::new(512, StorageCapabilities::append_only());
        for pgno in 100..104 {
            let mut page = cache.fetch_or_create(PageId::new(pgno)).unwrap();
            page.lsn = Lsn::new(1, 100);
            cache.put(page, false).unwrap();
        }
        let record = LogRecord {
            txn_id: TxnId::new(1),
            prev_lsn: Lsn::ZERO,
            body: RecordBody::GroupAlloc {
                start_pgno: PageId::new(100),
                num: 4,
                meta_lsn: Lsn::new(1, 10),
                last_pgno: PageId::new(99),
            },
        };
        let ctx = ctx(&cache);
        assert_eq!(dispatch(&ctx, &record, Direction::Undo).unwrap(), Applied::Applied);
        assert_eq!(cache.free_list().len(), 4);
        assert!(cache.fetch(PageId::new(100)).unwrap().unwrap().lsn.is_zero());
    }

    #[test]
    fn control_records_dispatch_as_noops() {
        let cache = InMemoryPageCache::new(512, StorageCapabilities::truncating());
        let ctx = ctx(&cache);
        for body in [
            RecordBody::TxnCommit,
            RecordBody::TxnAbort,
            RecordBody::Checkpoint { ckp_lsn: Lsn::ZERO },
            RecordBody::DebugMessage { message: vec![] },
        ] {
            let record = LogRecord {
                txn_id: TxnId::new(1),
                prev_lsn: Lsn::ZERO,
                body,
            };
            assert_eq!(dispatch(&ctx, &record, Direction::Redo).unwrap(), Applied::Skipped);
            assert_eq!(dispatch(&ctx, &record, Direction::Undo).unwrap(), Applied::Skipped);
        }
    }

    #[test]
    fn cur_adj_only_acts_on_undo() {
        let cache = InMemoryPageCache::new(512, StorageCapabilities::truncating());
        let registry = CursorRegistry::new();
        let slot = registry.register(crate::recovery::cursors::TrackedCursor::at(
            PageId::new(1),
            4,
        ));
        let ctx = HandlerCtx {
            cache: &cache,
            cursors: Some(&registry),
            record_lsn: Lsn::new(1, 100),
        };
        let record = LogRecord {
            txn_id: TxnId::new(1),
            prev_lsn: Lsn::ZERO,
            body: RecordBody::CurAdj {
                op: CurAdjOp::Add,
                pgno: PageId::new(1),
                ndx: 2,
                len: 0,
                dup_off: 0,
                order: 0,
                is_dup: false,
            },
        };
        assert_eq!(dispatch(&ctx, &record, Direction::Redo).unwrap(), Applied::Skipped);
        assert_eq!(registry.get(slot).unwrap().ndx, 4);

        // Undo inverts Add to Del: the cursor past the slot shifts down.
        assert_eq!(dispatch(&ctx, &record, Direction::Undo).unwrap(), Applied::Applied);
        assert_eq!(registry.get(slot).unwrap().ndx, 2);
    }
}
