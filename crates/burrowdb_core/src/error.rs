//! Error types for BurrowDB core.

use crate::types::PageId;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in BurrowDB core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] burrowdb_storage::StorageError),

    /// The log contains truncated or malformed bytes.
    ///
    /// Always fatal to a recovery run; there is no safe partial recovery
    /// over a corrupt log.
    #[error("log corruption: {message}")]
    LogCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// A record's opcode has no registered codec.
    #[error("unknown record type {opcode}")]
    UnknownRecordType {
        /// The unrecognized opcode value.
        opcode: u32,
    },

    /// Record envelope checksum mismatch.
    #[error("checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Checksum stored in the envelope.
        expected: u32,
        /// Checksum computed over the envelope bytes.
        actual: u32,
    },

    /// A page read or write failed.
    ///
    /// Fatal during redo. During undo a missing page is expected (the page
    /// may have been truncated later) and is reported as a skip, not this
    /// error.
    #[error("page I/O failure on {pgno}: {message}")]
    PageIo {
        /// The page involved.
        pgno: PageId,
        /// Description of the failure.
        message: String,
    },

    /// A state the log says cannot happen.
    ///
    /// Replaying an operation that was validated when first applied must
    /// not fail validation again; if it does, the log or the codec is
    /// broken. Never clamped or ignored.
    #[error("invariant violation: {message}")]
    InvariantViolation {
        /// Description of the violated invariant.
        message: String,
    },

    /// Operation not permitted in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },

    /// The recovery run was cancelled between records.
    #[error("recovery cancelled")]
    Cancelled,
}

impl CoreError {
    /// Creates a log corruption error.
    pub fn log_corruption(message: impl Into<String>) -> Self {
        Self::LogCorruption {
            message: message.into(),
        }
    }

    /// Creates a page I/O error.
    pub fn page_io(pgno: PageId, message: impl Into<String>) -> Self {
        Self::PageIo {
            pgno,
            message: message.into(),
        }
    }

    /// Creates an invariant violation error.
    pub fn invariant(message: impl Into<String>) -> Self {
        Self::InvariantViolation {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }
}
