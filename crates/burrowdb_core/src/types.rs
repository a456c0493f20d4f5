//! Core type definitions for BurrowDB.

use std::fmt;

/// Sentinel page number meaning "no page".
pub const PGNO_INVALID: PageId = PageId(0);

/// A log sequence number: the address of exactly one log record.
///
/// LSNs order every record in the log. The order is lexicographic on
/// `(file, offset)`: records in earlier segment files precede records in
/// later ones, and within a file the byte offset orders them. LSNs are
/// monotonically increasing within a file.
///
/// `Lsn::ZERO` is the null sentinel meaning "not logged" - a page that has
/// never carried a logged change, or the absence of a previous record in a
/// transaction's chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Lsn {
    /// Log segment file number (1-based; 0 only in the null sentinel).
    pub file: u32,
    /// Byte offset of the record within the segment.
    pub offset: u32,
}

impl Lsn {
    /// The null/not-logged sentinel, `(0, 0)`.
    pub const ZERO: Lsn = Lsn { file: 0, offset: 0 };

    /// Creates an LSN from a file number and offset.
    #[must_use]
    pub const fn new(file: u32, offset: u32) -> Self {
        Self { file, offset }
    }

    /// Returns true iff this is the null sentinel.
    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.file == 0 && self.offset == 0
    }
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}][{}]", self.file, self.offset)
    }
}

/// Unique identifier for a transaction.
///
/// Transaction IDs are assigned at transaction begin and never reused
/// within one log's lifetime. Recovery uses them to tie log records to the
/// transaction that wrote them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TxnId(pub u32);

impl TxnId {
    /// Creates a new transaction ID.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn:{}", self.0)
    }
}

/// Identifier for a page in the page store.
///
/// Page 0 is reserved as [`PGNO_INVALID`]; real pages start at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PageId(pub u32);

impl PageId {
    /// Creates a new page ID.
    #[must_use]
    pub const fn new(pgno: u32) -> Self {
        Self(pgno)
    }

    /// Returns the raw page number.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Returns true iff this is the invalid-page sentinel.
    #[must_use]
    pub const fn is_invalid(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pg:{}", self.0)
    }
}
