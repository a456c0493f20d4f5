//! Crash recovery: two-pass redo/undo over the log.
//!
//! The backward pass walks from the end of the log, learns each
//! transaction's fate (a commit record is always written after the
//! transaction's page changes), and undoes the changes of transactions
//! that never committed. The forward pass then replays committed work
//! from the last checkpoint. Both passes visit records in strict LSN
//! order; page LSN guards make every application decision locally.

mod cursors;
mod dispatcher;
mod guard;
mod handlers;

pub use cursors::{Adjustment, CursorRegistry, TrackedCursor};
pub use dispatcher::{RecoveryDriver, RecoveryReport};

/// Whether a handler changed anything.
///
/// A skip is success: the page was already in the target state, or
/// legitimately absent. Only fatal conditions surface as errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// The handler mutated at least one page (or the cursor set).
    Applied,
    /// Nothing needed doing.
    Skipped,
}

/// Which way a record is being applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Reapply the logged change (roll forward).
    Redo,
    /// Reverse the logged change (roll back).
    Undo,
}
