//! Error types for replication sync.

use burrowdb_core::Lsn;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during replication verification and sync-up.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The local log shares no prefix with the master's log.
    ///
    /// Terminal: the site was never part of this replication group, or its
    /// entire shared history has been archived away with auto-init
    /// disabled.
    #[error("join failure: {reason}")]
    JoinFailure {
        /// Why the join cannot proceed.
        reason: String,
    },

    /// The local log diverged from the master at the given LSN.
    #[error("log diverged at {lsn}")]
    Diverged {
        /// First LSN where the logs disagree.
        lsn: Lsn,
    },

    /// The operation was refused because a lockout is in force.
    #[error("operations locked out during sync-up")]
    LockedOut,

    /// A message could not be delivered.
    #[error("transport failure: {message}")]
    Transport {
        /// Description of the failure.
        message: String,
    },

    /// A wire message failed to decode.
    #[error("invalid sync message: {message}")]
    InvalidMessage {
        /// Description of the malformation.
        message: String,
    },

    /// A message arrived in a state that cannot accept it.
    #[error("unexpected message in state {state}")]
    UnexpectedMessage {
        /// The verifier state at arrival.
        state: String,
    },

    /// Error from the log or recovery engine.
    #[error(transparent)]
    Core(#[from] burrowdb_core::CoreError),
}

impl SyncError {
    /// Creates a join failure error.
    pub fn join_failure(reason: impl Into<String>) -> Self {
        Self::JoinFailure {
            reason: reason.into(),
        }
    }

    /// Creates a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Creates an invalid message error.
    pub fn invalid_message(message: impl Into<String>) -> Self {
        Self::InvalidMessage {
            message: message.into(),
        }
    }
}
