//! Storage backends for BurrowDB log segments.
//!
//! The write-ahead log is a sequence of numbered segment files. This crate
//! provides the two abstractions the log layer builds on:
//!
//! - [`SegmentBackend`] - an opaque append-only byte store holding one
//!   segment. Backends do not understand record envelopes or LSNs; all
//!   format interpretation lives in `burrowdb_core`.
//! - [`SegmentStore`] - a directory of numbered segments: create, open,
//!   enumerate, and remove them.
//!
//! Two implementations of each are provided: in-memory (tests, ephemeral
//! stores) and file-backed (persistent logs).
//!
//! [`StorageCapabilities`] carries runtime capability flags, most notably
//! whether the page file supports truncation. Recovery selects between its
//! reclaim-by-truncate and reclaim-by-free-list paths based on this flag
//! rather than on any compile-time configuration.

mod backend;
mod error;
mod file;
mod memory;

pub use backend::{SegmentBackend, SegmentStore, StorageCapabilities};
pub use error::{StorageError, StorageResult};
pub use file::{FileSegment, FileSegmentStore};
pub use memory::{MemorySegment, MemorySegmentStore};
