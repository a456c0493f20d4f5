//! Centralized page LSN comparison for redo and undo.
//!
//! Every page a handler touches goes through the same decision: compare
//! the page's LSN against the LSN the record captured before the change
//! (`logged_lsn`) and the record's own address (`record_lsn`). Handlers
//! never compare LSNs themselves.

use tracing::error;

use crate::error::{CoreError, CoreResult};
use crate::page::{Page, PageCache};
use crate::types::{Lsn, PageId};

/// Outcome of a guard check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Decision {
    /// The page is in exactly the state the record expects; apply.
    Apply,
    /// The page is already past this record (or untouched by it); skip.
    Skip,
}

/// Redo guard: apply iff the page is exactly one step behind this record.
///
/// A page LSN ahead of `logged_lsn` means the change (and possibly later
/// ones) already reached disk. A page LSN *behind* `logged_lsn` means a
/// write the log promised was on disk never made it - that is corruption,
/// not a skippable state - except for a zero LSN, which marks a page
/// freshly materialized by allocation.
pub(crate) fn redo(page: &Page, logged_lsn: Lsn) -> CoreResult<Decision> {
    if page.lsn == logged_lsn {
        return Ok(Decision::Apply);
    }
    if page.lsn < logged_lsn && !page.lsn.is_zero() {
        error!(
            pgno = %page.pgno,
            page_lsn = %page.lsn,
            logged_lsn = %logged_lsn,
            "page LSN behind the log: lost write detected"
        );
        return Err(CoreError::invariant(format!(
            "page {} has LSN {} behind logged LSN {}",
            page.pgno, page.lsn, logged_lsn
        )));
    }
    Ok(Decision::Skip)
}

/// Undo guard: apply iff the page reflects exactly this record's change.
pub(crate) fn undo(page: &Page, record_lsn: Lsn) -> Decision {
    if page.lsn == record_lsn {
        Decision::Apply
    } else {
        Decision::Skip
    }
}

/// Fetches a page for a redo handler.
///
/// `Ok(None)` means there is legitimately nothing to redo: the store can
/// truncate and the record captured a non-zero page LSN, so the page
/// existed when logged and was truncated away afterwards. A missing page
/// outside that case is fatal - redo cannot reconstruct state it has no
/// image of.
pub(crate) fn fetch_for_redo(
    cache: &dyn PageCache,
    pgno: PageId,
    logged_lsn: Lsn,
) -> CoreResult<Option<Page>> {
    match cache.fetch(pgno)? {
        Some(page) => Ok(Some(page)),
        None => {
            if cache.capabilities().can_truncate && !logged_lsn.is_zero() {
                Ok(None)
            } else {
                Err(CoreError::page_io(pgno, "page missing during redo"))
            }
        }
    }
}
