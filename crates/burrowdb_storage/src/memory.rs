//! In-memory segment store for testing and ephemeral logs.

use crate::backend::{SegmentBackend, SegmentStore};
use crate::error::{StorageError, StorageResult};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Shared byte buffer backing one in-memory segment.
type SegmentData = Arc<RwLock<Vec<u8>>>;

/// An in-memory segment store.
///
/// All segments live in process memory. Suitable for unit tests,
/// integration tests, and ephemeral logs that don't need persistence.
/// Handles opened on the same segment share the underlying buffer, and
/// clones of the store share the segment directory, so a "reopened" store
/// observes earlier writes - this is what crash-recovery tests rely on.
#[derive(Debug, Default, Clone)]
pub struct MemorySegmentStore {
    segments: Arc<Mutex<BTreeMap<u32, SegmentData>>>,
}

impl MemorySegmentStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of a segment's raw bytes.
    ///
    /// Useful for corrupting specific offsets in crash tests.
    #[must_use]
    pub fn segment_data(&self, fileno: u32) -> Option<Vec<u8>> {
        self.segments.lock().get(&fileno).map(|d| d.read().clone())
    }

    /// Overwrites a segment's raw bytes.
    ///
    /// Test hook for simulating torn writes and bit rot.
    pub fn set_segment_data(&self, fileno: u32, data: Vec<u8>) {
        let mut segments = self.segments.lock();
        segments.insert(fileno, Arc::new(RwLock::new(data)));
    }
}

impl SegmentStore for MemorySegmentStore {
    fn open_segment(&self, fileno: u32) -> StorageResult<Box<dyn SegmentBackend>> {
        let segments = self.segments.lock();
        let data = segments
            .get(&fileno)
            .cloned()
            .ok_or(StorageError::SegmentNotFound { fileno })?;
        Ok(Box::new(MemorySegment { data }))
    }

    fn create_segment(&self, fileno: u32) -> StorageResult<Box<dyn SegmentBackend>> {
        let mut segments = self.segments.lock();
        if segments.contains_key(&fileno) {
            return Err(StorageError::SegmentExists { fileno });
        }
        let data: SegmentData = Arc::new(RwLock::new(Vec::new()));
        segments.insert(fileno, Arc::clone(&data));
        Ok(Box::new(MemorySegment { data }))
    }

    fn list_segments(&self) -> StorageResult<Vec<u32>> {
        Ok(self.segments.lock().keys().copied().collect())
    }

    fn remove_segment(&self, fileno: u32) -> StorageResult<()> {
        let mut segments = self.segments.lock();
        segments
            .remove(&fileno)
            .map(|_| ())
            .ok_or(StorageError::SegmentNotFound { fileno })
    }
}

/// A handle on one in-memory segment.
#[derive(Debug)]
pub struct MemorySegment {
    data: SegmentData,
}

impl SegmentBackend for MemorySegment {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let data = self.data.read();
        let size = data.len() as u64;
        let offset_usize = offset as usize;
        let end = offset_usize.saturating_add(len);

        if offset > size || end > data.len() {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }

        Ok(data[offset_usize..end].to_vec())
    }

    fn append(&mut self, new_data: &[u8]) -> StorageResult<u64> {
        let mut data = self.data.write();
        let offset = data.len() as u64;
        data.extend_from_slice(new_data);
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        // No pending writes in memory
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.data.read().len() as u64)
    }

    fn sync(&mut self) -> StorageResult<()> {
        // No metadata to sync in memory
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let mut data = self.data.write();
        let current_size = data.len() as u64;

        if new_size > current_size {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!(
                    "cannot truncate segment to {new_size} bytes, current size is {current_size}"
                ),
            )));
        }

        data.truncate(new_size as usize);
        Ok(())
    }
}
