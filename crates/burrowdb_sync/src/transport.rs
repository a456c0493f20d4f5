//! Message transport abstraction.

use parking_lot::Mutex;

use crate::error::SyncResult;
use crate::messages::{SiteId, SyncMessage};

/// Delivers sync messages to other replication sites.
///
/// Implementations own addressing and delivery; the verifier only names a
/// destination site. Delivery may be asynchronous and unreliable - the
/// verifier re-requests on its own schedule.
pub trait ReplicationTransport: Send + Sync {
    /// Sends a message to the given site.
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be handed to the transport.
    fn send(&self, dest: SiteId, message: &SyncMessage) -> SyncResult<()>;
}

/// A transport that records every message instead of delivering it.
///
/// Drives the verifier in tests and in single-process setups where the
/// "network" is a function call.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<(SiteId, SyncMessage)>>,
}

impl RecordingTransport {
    /// Creates an empty transport.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes all messages sent so far, oldest first.
    pub fn take_sent(&self) -> Vec<(SiteId, SyncMessage)> {
        std::mem::take(&mut self.sent.lock())
    }
}

impl ReplicationTransport for RecordingTransport {
    fn send(&self, dest: SiteId, message: &SyncMessage) -> SyncResult<()> {
        self.sent.lock().push((dest, message.clone()));
        Ok(())
    }
}
