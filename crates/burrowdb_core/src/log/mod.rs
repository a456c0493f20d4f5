//! Write-ahead log: record codec, segment-backed store, and cursors.

mod cursor;
mod record;
mod store;

pub use cursor::LogCursor;
pub use record::{
    CurAdjOp, LogRecord, OvflOp, PairOp, RecordBody, RecordKind, MAX_BLOB_SIZE,
    RECORD_HEADER_SIZE,
};
pub use store::{
    LogConfig, LogStore, ENVELOPE_HEADER_SIZE, ENVELOPE_MAGIC, ENVELOPE_TRAILER_SIZE,
    FIRST_SEGMENT, NO_PREV_OFFSET, WIRE_VERSION,
};
