//! Stop-the-world barrier for sync-up recovery.
//!
//! While the verifier rewrites the log and pages, no ordinary operation
//! may touch them. Operations register with the gate for their duration;
//! a lockout refuses new registrations and waits for active ones to
//! drain before the caller proceeds. Both sides are RAII guards, so a
//! panicking operation still releases the gate.

use parking_lot::{Condvar, Mutex};
use tracing::debug;

use crate::error::{SyncError, SyncResult};

#[derive(Debug, Default)]
struct GateState {
    locked_out: bool,
    active: usize,
}

/// The lockout gate.
#[derive(Debug, Default)]
pub struct LockoutGate {
    state: Mutex<GateState>,
    drained: Condvar,
}

/// Registration of one in-flight operation. Dropping it deregisters.
#[derive(Debug)]
pub struct OpGuard<'a> {
    gate: &'a LockoutGate,
}

/// An exclusive hold on the gate. Dropping it lifts the lockout.
#[derive(Debug)]
pub struct LockoutGuard<'a> {
    gate: &'a LockoutGate,
}

impl LockoutGate {
    /// Creates an open gate.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an operation.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::LockedOut`] while a lockout is in force; the
    /// caller retries after sync-up completes.
    pub fn enter(&self) -> SyncResult<OpGuard<'_>> {
        let mut state = self.state.lock();
        if state.locked_out {
            return Err(SyncError::LockedOut);
        }
        state.active += 1;
        Ok(OpGuard { gate: self })
    }

    /// Begins a lockout: refuses new operations and blocks until every
    /// active one has finished.
    pub fn lockout(&self) -> LockoutGuard<'_> {
        let mut state = self.state.lock();
        state.locked_out = true;
        while state.active > 0 {
            self.drained.wait(&mut state);
        }
        debug!("lockout in force, operations drained");
        LockoutGuard { gate: self }
    }

    /// Whether a lockout is currently in force.
    #[must_use]
    pub fn is_locked_out(&self) -> bool {
        self.state.lock().locked_out
    }
}

impl Drop for OpGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.gate.state.lock();
        state.active -= 1;
        if state.active == 0 {
            self.gate.drained.notify_all();
        }
    }
}

impl Drop for LockoutGuard<'_> {
    fn drop(&mut self) {
        self.gate.state.lock().locked_out = false;
        debug!("lockout lifted");
    }
}
