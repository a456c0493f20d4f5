//! Live cursor tracking across transaction aborts.
//!
//! When an aborted transaction's page changes are undone, open cursors
//! pointing into the affected pages must be moved so they stay on the same
//! logical item. The log carries `CurAdj` records describing each
//! adjustment made on the forward path; undo inverts and replays them here.

use parking_lot::Mutex;

use crate::log::CurAdjOp;
use crate::types::PageId;

/// Position of one open cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackedCursor {
    /// Page the cursor points at.
    pub pgno: PageId,
    /// Entry index of the cursor's key.
    pub ndx: u32,
    /// Byte offset within a duplicate set, 0 when not on a duplicate.
    pub dup_off: u32,
    /// Order stamp distinguishing cursors parked on the same deleted slot.
    pub order: u32,
    /// Whether the item under the cursor has been deleted.
    pub deleted: bool,
}

impl TrackedCursor {
    /// Creates a cursor at a key position.
    #[must_use]
    pub fn at(pgno: PageId, ndx: u32) -> Self {
        Self {
            pgno,
            ndx,
            dup_off: 0,
            order: 0,
            deleted: false,
        }
    }
}

/// Parameters of one cursor adjustment, as logged.
#[derive(Debug, Clone, Copy)]
pub struct Adjustment {
    /// Page the adjustment happened on.
    pub pgno: PageId,
    /// Entry index it happened at.
    pub ndx: u32,
    /// Length delta for duplicate-offset adjustments.
    pub len: u32,
    /// Duplicate offset it happened at.
    pub dup_off: u32,
    /// Order stamp of the affected slot.
    pub order: u32,
    /// Whether it applies to a duplicate set.
    pub is_dup: bool,
}

/// The set of open cursors the recovery dispatcher adjusts.
#[derive(Debug, Default)]
pub struct CursorRegistry {
    cursors: Mutex<Vec<TrackedCursor>>,
}

impl CursorRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a cursor and returns its slot index.
    pub fn register(&self, cursor: TrackedCursor) -> usize {
        let mut cursors = self.cursors.lock();
        cursors.push(cursor);
        cursors.len() - 1
    }

    /// Returns the cursor in the given slot.
    #[must_use]
    pub fn get(&self, slot: usize) -> Option<TrackedCursor> {
        self.cursors.lock().get(slot).copied()
    }

    /// Applies an adjustment to every cursor on the affected page.
    ///
    /// `Add` shifts cursors at or past `ndx` up by one pair and revives a
    /// cursor parked deleted on that slot with a matching order stamp,
    /// clearing the stamp.
    /// `Del` shifts cursors past `ndx` down by one pair and parks the
    /// cursor at `ndx` as deleted. The `Mod` forms move duplicate offsets
    /// by `len` without touching entry indices.
    pub fn adjust(&self, op: CurAdjOp, adj: &Adjustment) {
        let mut cursors = self.cursors.lock();
        for cursor in cursors.iter_mut().filter(|c| c.pgno == adj.pgno) {
            match op {
                CurAdjOp::Add => {
                    if cursor.deleted && cursor.ndx == adj.ndx && cursor.order == adj.order {
                        cursor.deleted = false;
                        cursor.order = 0;
                    } else if cursor.ndx >= adj.ndx {
                        cursor.ndx += 2;
                    }
                }
                CurAdjOp::Del => {
                    if cursor.ndx == adj.ndx && !cursor.deleted {
                        cursor.deleted = true;
                        cursor.order = adj.order;
                    } else if cursor.ndx > adj.ndx {
                        cursor.ndx -= 2;
                    }
                }
                CurAdjOp::AddMod => {
                    if adj.is_dup && cursor.ndx == adj.ndx && cursor.dup_off >= adj.dup_off {
                        cursor.dup_off += adj.len;
                    }
                }
                CurAdjOp::DelMod => {
                    if adj.is_dup && cursor.ndx == adj.ndx {
                        if cursor.dup_off > adj.dup_off {
                            cursor.dup_off -= adj.len;
                        } else if cursor.dup_off == adj.dup_off {
                            cursor.deleted = true;
                            cursor.order = adj.order;
                        }
                    }
                }
            }
        }
    }
}
