//! Bidirectional log traversal.
//!
//! Recovery reads the log twice, once backwards and once forwards, and both
//! passes must visit records in strict LSN order. The cursor walks forwards
//! by envelope length and backwards by each envelope's `prev_offset`
//! backpointer, hopping across segment boundaries in either direction.

use crate::error::CoreResult;
use crate::log::record::LogRecord;
use crate::log::store::{LogStore, NO_PREV_OFFSET};
use crate::types::Lsn;

#[derive(Debug, Clone, Copy)]
struct Position {
    lsn: Lsn,
    total_len: u32,
    prev_offset: u32,
}

/// A cursor over the records of a [`LogStore`].
///
/// Freshly created cursors are unpositioned; call [`LogCursor::first`],
/// [`LogCursor::last`], or [`LogCursor::seek`] before stepping. A step past
/// either end returns `None` and leaves the position unchanged, so the
/// caller can reverse direction afterwards.
pub struct LogCursor<'a> {
    log: &'a LogStore,
    pos: Option<Position>,
}

impl<'a> LogCursor<'a> {
    /// Creates an unpositioned cursor.
    #[must_use]
    pub fn new(log: &'a LogStore) -> Self {
        Self { log, pos: None }
    }

    /// Positions on the oldest record. Returns `None` on an empty log.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be read or decoded.
    pub fn first(&mut self) -> CoreResult<Option<(Lsn, LogRecord)>> {
        let lsn = self.log.first_lsn();
        if lsn.is_zero() {
            return Ok(None);
        }
        self.seek(lsn).map(Some)
    }

    /// Positions on the newest record. Returns `None` on an empty log.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be read or decoded.
    pub fn last(&mut self) -> CoreResult<Option<(Lsn, LogRecord)>> {
        let lsn = self.log.last_lsn();
        if lsn.is_zero() {
            return Ok(None);
        }
        self.seek(lsn).map(Some)
    }

    /// Positions on the record at `lsn` and returns it.
    ///
    /// # Errors
    ///
    /// Returns an error if no valid record lives at `lsn`.
    pub fn seek(&mut self, lsn: Lsn) -> CoreResult<(Lsn, LogRecord)> {
        let envelope = self.log.envelope(lsn)?;
        let record = LogRecord::decode(&envelope.payload)?;
        self.pos = Some(Position {
            lsn,
            total_len: envelope.total_len,
            prev_offset: envelope.prev_offset,
        });
        Ok((lsn, record))
    }

    /// Steps to the next record in LSN order.
    ///
    /// Returns `None` when positioned on the newest record or unpositioned.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be read or decoded.
    pub fn next(&mut self) -> CoreResult<Option<(Lsn, LogRecord)>> {
        let Some(pos) = self.pos else {
            return Ok(None);
        };
        if pos.lsn == self.log.last_lsn() {
            return Ok(None);
        }

        let after = u64::from(pos.lsn.offset) + u64::from(pos.total_len);
        if after < self.log.segment_size(pos.lsn.file)? {
            let lsn = Lsn::new(pos.lsn.file, after as u32);
            return self.seek(lsn).map(Some);
        }

        // End of segment: move to the first record of the next non-empty one.
        for fileno in self.log.segment_files()? {
            if fileno <= pos.lsn.file {
                continue;
            }
            if self.log.segment_size(fileno)? > 0 {
                return self.seek(Lsn::new(fileno, 0)).map(Some);
            }
        }
        Ok(None)
    }

    /// Steps to the previous record in LSN order.
    ///
    /// Returns `None` when positioned on the oldest record or unpositioned.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be read or decoded.
    pub fn prev(&mut self) -> CoreResult<Option<(Lsn, LogRecord)>> {
        let Some(pos) = self.pos else {
            return Ok(None);
        };
        if pos.prev_offset != NO_PREV_OFFSET {
            let lsn = Lsn::new(pos.lsn.file, pos.prev_offset);
            return self.seek(lsn).map(Some);
        }

        // First record of its segment: move to the last record of the
        // nearest earlier non-empty segment.
        let mut earlier: Vec<u32> = self
            .log
            .segment_files()?
            .into_iter()
            .filter(|&f| f < pos.lsn.file)
            .collect();
        while let Some(fileno) = earlier.pop() {
            if let Some(offset) = self.log.last_offset_in(fileno)? {
                return self.seek(Lsn::new(fileno, offset)).map(Some);
            }
        }
        Ok(None)
    }

    /// The LSN the cursor is positioned on, if any.
    #[must_use]
    pub fn lsn(&self) -> Option<Lsn> {
        self.pos.map(|p| p.lsn)
    }
}
