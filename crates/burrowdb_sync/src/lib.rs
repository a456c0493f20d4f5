//! # BurrowDB Sync
//!
//! Replication log verification and sync-up for BurrowDB.
//!
//! This crate provides:
//! - The verifier state machine that walks a diverged site's log back to
//!   the common prefix with its master
//! - The sync wire messages and the transport trait that carries them
//! - The lockout gate that drains live operations before sync-up
//!   recovery rewrites the log

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod lockout;
pub mod messages;
pub mod transport;
pub mod verifier;

pub use error::{SyncError, SyncResult};
pub use lockout::{LockoutGate, LockoutGuard, OpGuard};
pub use messages::{SiteId, SyncMessage};
pub use transport::{RecordingTransport, ReplicationTransport};
pub use verifier::{RepVersion, ReplicationVerifier, VerifierConfig, VerifyState};
