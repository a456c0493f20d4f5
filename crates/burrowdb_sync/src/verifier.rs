//! Replication log verification.
//!
//! A site rejoining the group may hold log records the master never saw
//! (written while it was isolated). The verifier walks the local log
//! backward through candidate identification records, asks the master for
//! its raw bytes at each candidate LSN, and compares. On the first byte
//! match it rolls the local log and pages back to that point and asks the
//! master to stream everything after it. Byte equality of the undecoded
//! record is the match criterion.

use std::fmt;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use burrowdb_core::log::LogCursor;
use burrowdb_core::{LogStore, Lsn, PageCache, RecordKind, RecoveryDriver};

use crate::error::{SyncError, SyncResult};
use crate::lockout::LockoutGate;
use crate::messages::{SiteId, SyncMessage};
use crate::transport::ReplicationTransport;

/// Replication protocol version, selecting which record kinds count as
/// identification records during the backward walk.
///
/// The strategies differ because older peers only recognize what their
/// era's code logged; the table is kept explicit per version rather than
/// unified to the newest rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepVersion {
    /// Oldest dialect: any substantive record identifies a position.
    V42,
    /// Checkpoints only.
    V43,
    /// Checkpoints or transaction commits.
    V44,
}

impl RepVersion {
    /// Whether a record of this kind anchors a verification round.
    #[must_use]
    pub fn identifies(self, kind: RecordKind) -> bool {
        match self {
            Self::V42 => !matches!(kind, RecordKind::Checkpoint | RecordKind::DebugMessage),
            Self::V43 => kind == RecordKind::Checkpoint,
            Self::V44 => matches!(kind, RecordKind::Checkpoint | RecordKind::TxnCommit),
        }
    }
}

/// Verifier state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyState {
    /// Not verifying.
    Idle,
    /// Waiting for the master's answer to a `VerifyRequest`.
    Verifying,
    /// Rolling the local log back to the match point, or awaiting full
    /// initialization.
    Recovering,
    /// Rejoined: the local log is a prefix of the master's.
    Synced,
    /// Terminal: this site cannot rejoin the group.
    JoinFailed,
}

impl fmt::Display for VerifyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Verifying => "verifying",
            Self::Recovering => "recovering",
            Self::Synced => "synced",
            Self::JoinFailed => "join_failed",
        };
        f.write_str(name)
    }
}

/// Verifier tuning.
#[derive(Debug, Clone, Copy)]
pub struct VerifierConfig {
    /// Protocol version in use with the master.
    pub version: RepVersion,
    /// Whether a `VerifyFail` may escalate to full initialization.
    pub auto_init: bool,
    /// Verification rounds allowed before giving up.
    pub max_rounds: u32,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            version: RepVersion::V44,
            auto_init: true,
            max_rounds: 64,
        }
    }
}

struct VerifierInner {
    state: VerifyState,
    candidate: Lsn,
    match_lsn: Option<Lsn>,
    rounds: u32,
}

/// The replication verifier.
///
/// One instance per site; it plays the client role through [`begin`] and
/// the incoming-message handlers, and the master role through
/// [`handle_verify_request`].
///
/// [`begin`]: ReplicationVerifier::begin
/// [`handle_verify_request`]: ReplicationVerifier::handle_verify_request
pub struct ReplicationVerifier<'a> {
    log: &'a LogStore,
    cache: &'a dyn PageCache,
    transport: &'a dyn ReplicationTransport,
    master: SiteId,
    config: VerifierConfig,
    gate: LockoutGate,
    inner: Mutex<VerifierInner>,
}

impl<'a> ReplicationVerifier<'a> {
    /// Creates a verifier over a local log and page store.
    pub fn new(
        log: &'a LogStore,
        cache: &'a dyn PageCache,
        transport: &'a dyn ReplicationTransport,
        master: SiteId,
        config: VerifierConfig,
    ) -> Self {
        Self {
            log,
            cache,
            transport,
            master,
            config,
            gate: LockoutGate::new(),
            inner: Mutex::new(VerifierInner {
                state: VerifyState::Idle,
                candidate: Lsn::ZERO,
                match_lsn: None,
                rounds: 0,
            }),
        }
    }

    /// Current state.
    pub fn state(&self) -> VerifyState {
        self.inner.lock().state
    }

    /// The candidate LSN awaiting the master's answer, while verifying.
    pub fn candidate_lsn(&self) -> Option<Lsn> {
        let inner = self.inner.lock();
        (inner.state == VerifyState::Verifying).then_some(inner.candidate)
    }

    /// The match point, once synced.
    pub fn match_lsn(&self) -> Option<Lsn> {
        self.inner.lock().match_lsn
    }

    /// The gate ordinary operations register with; sync-up recovery locks
    /// it out.
    pub fn gate(&self) -> &LockoutGate {
        &self.gate
    }

    /// Starts verification after detected divergence: finds the newest
    /// local identification record and asks the master about it.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::JoinFailure`] when the local log holds no
    /// identification record at all, or
    /// [`SyncError::UnexpectedMessage`] when verification is already in
    /// progress.
    pub fn begin(&self) -> SyncResult<()> {
        let candidate = {
            let mut inner = self.inner.lock();
            if !matches!(inner.state, VerifyState::Idle | VerifyState::Synced) {
                return Err(SyncError::UnexpectedMessage {
                    state: inner.state.to_string(),
                });
            }
            let Some(lsn) = self.find_identification(self.log.last_lsn(), true)? else {
                inner.state = VerifyState::JoinFailed;
                return Err(SyncError::join_failure(
                    "no identification record in the local log",
                ));
            };
            inner.state = VerifyState::Verifying;
            inner.candidate = lsn;
            inner.match_lsn = None;
            inner.rounds = 0;
            lsn
        };
        info!(%candidate, "starting log verification");
        self.transport
            .send(self.master, &SyncMessage::VerifyRequest { lsn: candidate })
    }

    /// Handles an incoming message addressed to this site.
    ///
    /// # Errors
    ///
    /// Propagates the per-message handler's error.
    pub fn handle_message(&self, from: SiteId, message: &SyncMessage) -> SyncResult<()> {
        match message {
            SyncMessage::VerifyRequest { lsn } => self.handle_verify_request(from, *lsn),
            SyncMessage::Verify { lsn, record } => self.handle_verify(*lsn, record),
            SyncMessage::VerifyFail { lsn } => self.handle_verify_fail(*lsn),
            SyncMessage::AllRecordsRequest { .. } | SyncMessage::UpdateRequest => {
                // Streaming and full initialization belong to the layer
                // above the verifier.
                debug!(%from, code = message.type_code(), "ignoring non-verification message");
                Ok(())
            }
        }
    }

    /// Master side: answers a verification probe with the raw record at
    /// `lsn`, or `VerifyFail` if that record is no longer retained.
    ///
    /// # Errors
    ///
    /// Returns an error if the answer cannot be sent.
    pub fn handle_verify_request(&self, from: SiteId, lsn: Lsn) -> SyncResult<()> {
        match self.log.read_raw(lsn) {
            Ok(record) => self
                .transport
                .send(from, &SyncMessage::Verify { lsn, record }),
            Err(err) => {
                debug!(%lsn, %err, "verification probe for unretained record");
                self.transport.send(from, &SyncMessage::VerifyFail { lsn })
            }
        }
    }

    /// Client side: compares the master's record bytes against the local
    /// record at the candidate LSN.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::JoinFailure`] when the walk exhausts the log
    /// or the round budget; fatal log errors propagate.
    pub fn handle_verify(&self, lsn: Lsn, remote_record: &[u8]) -> SyncResult<()> {
        {
            let inner = self.inner.lock();
            if inner.state != VerifyState::Verifying {
                return Err(SyncError::UnexpectedMessage {
                    state: inner.state.to_string(),
                });
            }
            if lsn != inner.candidate {
                warn!(%lsn, candidate = %inner.candidate, "stale verify answer, ignoring");
                return Ok(());
            }
        }

        let local = self.log.read_raw(lsn)?;
        if local == remote_record {
            info!(%lsn, "logs match, syncing up");
            return self.sync_up(lsn);
        }

        debug!(%lsn, "records differ, stepping back");
        let next = {
            let mut inner = self.inner.lock();
            inner.rounds += 1;
            if inner.rounds >= self.config.max_rounds {
                inner.state = VerifyState::JoinFailed;
                return Err(SyncError::join_failure(format!(
                    "no match within {} verification rounds",
                    self.config.max_rounds
                )));
            }
            match self.find_identification(lsn, false)? {
                Some(prev) => {
                    inner.candidate = prev;
                    prev
                }
                None => {
                    inner.state = VerifyState::JoinFailed;
                    return Err(SyncError::join_failure(
                        "log start reached without a match; sites share no history",
                    ));
                }
            }
        };
        self.transport
            .send(self.master, &SyncMessage::VerifyRequest { lsn: next })
    }

    /// Client side: the master archived the candidate record.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::JoinFailure`] when auto-init is disabled.
    pub fn handle_verify_fail(&self, lsn: Lsn) -> SyncResult<()> {
        {
            let mut inner = self.inner.lock();
            if inner.state != VerifyState::Verifying {
                return Err(SyncError::UnexpectedMessage {
                    state: inner.state.to_string(),
                });
            }
            if lsn != inner.candidate {
                return Ok(());
            }
            if !self.config.auto_init {
                inner.state = VerifyState::JoinFailed;
                return Err(SyncError::join_failure(
                    "shared history archived and auto-init is disabled",
                ));
            }
            inner.state = VerifyState::Recovering;
        }
        info!(%lsn, "shared history archived, requesting full initialization");
        self.transport.send(self.master, &SyncMessage::UpdateRequest)
    }

    /// Rolls the local state back to `match_lsn` and requests the suffix.
    fn sync_up(&self, match_lsn: Lsn) -> SyncResult<()> {
        self.inner.lock().state = VerifyState::Recovering;

        // When nothing past the match point is client-visible work, the
        // whole sync-up collapses to cutting the log.
        let needs_rollback = self.suffix_has_visible_work(match_lsn)?;
        {
            let _hold = self.gate.lockout();
            if needs_rollback {
                let report = RecoveryDriver::new(self.log, self.cache).rollback_to(match_lsn)?;
                info!(
                    %match_lsn,
                    undone = report.undo_applied,
                    "rolled back past divergence"
                );
            } else {
                self.log.truncate(match_lsn)?;
                info!(%match_lsn, "truncated divergent log suffix");
            }
        }

        self.transport
            .send(self.master, &SyncMessage::AllRecordsRequest { from: match_lsn })?;

        let mut inner = self.inner.lock();
        inner.state = VerifyState::Synced;
        inner.match_lsn = Some(match_lsn);
        Ok(())
    }

    /// Finds the newest identification record at or before `from`
    /// (`inclusive` selects whether `from` itself may qualify).
    fn find_identification(&self, from: Lsn, inclusive: bool) -> SyncResult<Option<Lsn>> {
        if from.is_zero() {
            return Ok(None);
        }
        let mut cursor = LogCursor::new(self.log);
        let (lsn, record) = cursor.seek(from)?;
        if inclusive && self.config.version.identifies(record.kind()) {
            return Ok(Some(lsn));
        }
        while let Some((lsn, record)) = cursor.prev()? {
            if self.config.version.identifies(record.kind()) {
                return Ok(Some(lsn));
            }
        }
        Ok(None)
    }

    /// Whether any record after `match_lsn` is one a client observes
    /// (a commit or a checkpoint).
    fn suffix_has_visible_work(&self, match_lsn: Lsn) -> SyncResult<bool> {
        let mut cursor = LogCursor::new(self.log);
        cursor.seek(match_lsn)?;
        while let Some((_, record)) = cursor.next()? {
            if matches!(
                record.kind(),
                RecordKind::TxnCommit | RecordKind::Checkpoint
            ) {
                return Ok(true);
            }
        }
        Ok(false)
    }
}
