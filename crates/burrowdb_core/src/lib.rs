//! # BurrowDB Core
//!
//! Write-ahead log and crash-recovery engine for BurrowDB.
//!
//! This crate provides:
//! - LSN-addressed log records with a fixed little-endian wire format
//! - Append-only log store over numbered segments, with forward and
//!   backward cursors
//! - Slotted page model and page cache traits
//! - Two-pass redo/undo recovery with centralized page LSN guards

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Crate version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod error;
pub mod log;
pub mod page;
pub mod recovery;
pub mod types;

pub use error::{CoreError, CoreResult};
pub use log::{LogConfig, LogCursor, LogRecord, LogStore, RecordBody, RecordKind};
pub use page::{Page, PageCache};
pub use recovery::{RecoveryDriver, RecoveryReport};
pub use types::{Lsn, PageId, TxnId, PGNO_INVALID};
