//! Command implementations.

pub mod dump;
pub mod verify;

use std::path::Path;

use burrowdb_core::{CoreResult, LogConfig, LogStore};
use burrowdb_storage::FileSegmentStore;

/// Opens the log at `path` read-mostly; a torn tail is truncated, any
/// other damage fails the open.
pub fn open_log(path: &Path) -> CoreResult<LogStore> {
    let store = FileSegmentStore::open(path)?;
    LogStore::open(Box::new(store), LogConfig::default())
}
