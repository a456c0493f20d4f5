//! File-based segment store for persistent logs.

use crate::backend::{SegmentBackend, SegmentStore};
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A file-based segment store.
///
/// Segments are stored as `log.NNNNNNNNNN` files (zero-padded decimal file
/// number) inside one directory. Data survives process restarts.
#[derive(Debug)]
pub struct FileSegmentStore {
    dir: PathBuf,
}

impl FileSegmentStore {
    /// Opens a segment store rooted at the given directory, creating the
    /// directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn open(dir: &Path) -> StorageResult<Self> {
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    /// Returns the store's root directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn segment_path(&self, fileno: u32) -> PathBuf {
        self.dir.join(format!("log.{fileno:010}"))
    }
}

impl SegmentStore for FileSegmentStore {
    fn open_segment(&self, fileno: u32) -> StorageResult<Box<dyn SegmentBackend>> {
        let path = self.segment_path(fileno);
        if !path.exists() {
            return Err(StorageError::SegmentNotFound { fileno });
        }
        Ok(Box::new(FileSegment::open(&path)?))
    }

    fn create_segment(&self, fileno: u32) -> StorageResult<Box<dyn SegmentBackend>> {
        let path = self.segment_path(fileno);
        if path.exists() {
            return Err(StorageError::SegmentExists { fileno });
        }
        Ok(Box::new(FileSegment::open(&path)?))
    }

    fn list_segments(&self) -> StorageResult<Vec<u32>> {
        let mut filenos = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(suffix) = name.strip_prefix("log.") else {
                continue;
            };
            let fileno = suffix
                .parse::<u32>()
                .map_err(|_| StorageError::InvalidSegmentName { name: name.clone() })?;
            filenos.push(fileno);
        }
        filenos.sort_unstable();
        Ok(filenos)
    }

    fn remove_segment(&self, fileno: u32) -> StorageResult<()> {
        let path = self.segment_path(fileno);
        if !path.exists() {
            return Err(StorageError::SegmentNotFound { fileno });
        }
        std::fs::remove_file(path)?;
        Ok(())
    }
}

/// One persistent log segment backed by an OS file.
///
/// # Durability
///
/// - `flush()` pushes buffered data to the OS
/// - `sync()` calls `File::sync_all()` to ensure data is on disk
#[derive(Debug)]
pub struct FileSegment {
    file: RwLock<File>,
    size: RwLock<u64>,
}

impl FileSegment {
    /// Opens or creates a segment file at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or created.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let size = file.metadata()?.len();

        Ok(Self {
            file: RwLock::new(file),
            size: RwLock::new(size),
        })
    }
}

impl SegmentBackend for FileSegment {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let size = *self.size.read();
        let end = offset.saturating_add(len as u64);

        if offset > size || end > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }

        if len == 0 {
            return Ok(Vec::new());
        }

        let mut file = self.file.write();
        file.seek(SeekFrom::Start(offset))?;

        let mut buffer = vec![0u8; len];
        file.read_exact(&mut buffer)?;

        Ok(buffer)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        if data.is_empty() {
            return Ok(*self.size.read());
        }

        let mut file = self.file.write();
        let mut size = self.size.write();

        let offset = *size;
        file.seek(SeekFrom::End(0))?;
        file.write_all(data)?;
        *size += data.len() as u64;

        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        let mut file = self.file.write();
        file.flush()?;
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(*self.size.read())
    }

    fn sync(&mut self) -> StorageResult<()> {
        let file = self.file.write();
        file.sync_all()?;
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let mut file = self.file.write();
        let mut size = self.size.write();

        if new_size > *size {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!(
                    "cannot truncate segment to {new_size} bytes, current size is {}",
                    *size
                ),
            )));
        }

        file.set_len(new_size)?;
        file.sync_all()?;
        *size = new_size;

        Ok(())
    }
}
