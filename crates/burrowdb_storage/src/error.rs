//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Attempted to read beyond the end of a segment.
    #[error("read beyond end of segment: offset {offset}, len {len}, size {size}")]
    ReadPastEnd {
        /// The requested read offset.
        offset: u64,
        /// The requested read length.
        len: usize,
        /// The current segment size.
        size: u64,
    },

    /// The requested segment does not exist.
    #[error("segment {fileno} not found")]
    SegmentNotFound {
        /// The missing segment's file number.
        fileno: u32,
    },

    /// A segment with the given number already exists.
    #[error("segment {fileno} already exists")]
    SegmentExists {
        /// The conflicting segment's file number.
        fileno: u32,
    },

    /// The segment directory contains an entry that is not a valid segment.
    #[error("invalid segment name: {name}")]
    InvalidSegmentName {
        /// The offending directory entry.
        name: String,
    },
}
