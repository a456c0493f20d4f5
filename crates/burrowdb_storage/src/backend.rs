//! Segment backend and segment store trait definitions.

use crate::error::StorageResult;

/// A low-level backend holding one log segment.
///
/// Segment backends are **opaque byte stores**. They provide simple
/// operations for reading, appending, and flushing data. The log layer owns
/// all format interpretation - backends do not understand record envelopes,
/// checksums, or LSNs.
///
/// # Invariants
///
/// - `append` returns the offset where data was written
/// - `read_at` returns exactly the bytes previously written at that offset
/// - `flush` ensures all appended data is durable
/// - Backends must be `Send + Sync` for concurrent access
pub trait SegmentBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if the read would extend beyond the current size or
    /// an I/O error occurs.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Appends data to the end of the segment.
    ///
    /// Returns the offset where the data was written.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Flushes all pending writes to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush operation fails.
    fn flush(&mut self) -> StorageResult<()>;

    /// Returns the current size of the segment in bytes.
    ///
    /// This is the offset where the next `append` will write.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Syncs all data and metadata to durable storage.
    ///
    /// A stronger guarantee than `flush` - file metadata is also durable
    /// afterwards.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync operation fails.
    fn sync(&mut self) -> StorageResult<()>;

    /// Truncates the segment to the given size.
    ///
    /// Removes all data after the specified offset. Used when the log is
    /// rolled back past a record boundary during replication sync-up.
    ///
    /// # Errors
    ///
    /// Returns an error if `new_size` is greater than the current size or
    /// the truncation fails.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;
}

/// A directory of numbered log segments.
///
/// Segment numbers start at 1 and are assigned by the log layer; the store
/// only materializes them. Two handles opened on the same segment observe
/// the same bytes.
pub trait SegmentStore: Send + Sync {
    /// Opens an existing segment.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::SegmentNotFound`] if no segment with
    /// this number exists.
    fn open_segment(&self, fileno: u32) -> StorageResult<Box<dyn SegmentBackend>>;

    /// Creates a new, empty segment.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::SegmentExists`] if the segment is
    /// already present.
    fn create_segment(&self, fileno: u32) -> StorageResult<Box<dyn SegmentBackend>>;

    /// Returns the numbers of all existing segments, in ascending order.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be enumerated.
    fn list_segments(&self) -> StorageResult<Vec<u32>>;

    /// Removes a segment and its data.
    ///
    /// # Errors
    ///
    /// Returns an error if the segment does not exist or cannot be removed.
    fn remove_segment(&self, fileno: u32) -> StorageResult<()>;
}

/// Runtime capability flags for a storage layer.
///
/// Replaces compile-time feature branching: callers query the capability
/// once and select an ordinary code path. The page cache advertises whether
/// it can physically truncate its backing store; recovery's group-allocation
/// undo either truncates the file (reclaiming space) or falls back to
/// marking the pages for reuse via a free list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageCapabilities {
    /// Whether the backing store supports truncating from a given page
    /// onwards.
    pub can_truncate: bool,
}

impl StorageCapabilities {
    /// Capabilities of a store that supports truncation.
    #[must_use]
    pub const fn truncating() -> Self {
        Self { can_truncate: true }
    }

    /// Capabilities of a store that can only grow.
    #[must_use]
    pub const fn append_only() -> Self {
        Self {
            can_truncate: false,
        }
    }
}
