//! Log record types and serialization.
//!
//! Every record starts with a fixed header (`opcode`, `txn_id`,
//! `prev_lsn`) followed by type-specific fields in declared order. Fixed
//! fields are little-endian integers; variable fields are 4-byte
//! length-prefixed blobs. The wire byte order is fixed regardless of
//! platform. Decoding must consume the payload exactly - trailing or
//! missing bytes mean the log is corrupt.

use crate::error::{CoreError, CoreResult};
use crate::types::{Lsn, PageId, TxnId};

/// Size of the fixed record header:
/// opcode (4) + txn_id (4) + prev_lsn (8) = 16 bytes.
pub const RECORD_HEADER_SIZE: usize = 16;

/// Largest encodable blob. The wire length field is 4 bytes.
pub const MAX_BLOB_SIZE: usize = u32::MAX as usize;

// InsDel opcode word layout: low byte holds the pair op, high bits hold
// the item-encoding flags.
const PAIR_OP_MASK: u32 = 0xff;
const PAIR_KEY_BIG: u32 = 1 << 8;
const PAIR_DATA_BIG: u32 = 1 << 9;
const PAIR_DATA_DUP: u32 = 1 << 10;

/// Type of a log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum RecordKind {
    /// Transaction commit.
    TxnCommit = 1,
    /// Transaction abort.
    TxnAbort = 2,
    /// Checkpoint marker bounding how far back recovery must scan.
    Checkpoint = 3,
    /// Free-form diagnostic message; a no-op for recovery.
    DebugMessage = 4,
    /// Key/data pair insert or delete on a bucket page.
    InsDel = 10,
    /// Overflow page chain insert or remove (pointer maintenance).
    NewPage = 11,
    /// Partial in-place item replace on a single page.
    Replace = 12,
    /// Wholesale page image install (split/copy big hammer).
    PageImage = 13,
    /// Contiguous run of newly allocated pages.
    GroupAlloc = 14,
    /// In-memory cursor bookkeeping adjustment.
    CurAdj = 15,
}

impl RecordKind {
    /// Converts an opcode value to a record kind.
    #[must_use]
    pub fn from_opcode(opcode: u32) -> Option<Self> {
        match opcode {
            1 => Some(Self::TxnCommit),
            2 => Some(Self::TxnAbort),
            3 => Some(Self::Checkpoint),
            4 => Some(Self::DebugMessage),
            10 => Some(Self::InsDel),
            11 => Some(Self::NewPage),
            12 => Some(Self::Replace),
            13 => Some(Self::PageImage),
            14 => Some(Self::GroupAlloc),
            15 => Some(Self::CurAdj),
            _ => None,
        }
    }

    /// Returns the wire opcode value.
    #[must_use]
    pub const fn opcode(self) -> u32 {
        self as u32
    }

    /// Returns the record kind's display name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::TxnCommit => "txn_commit",
            Self::TxnAbort => "txn_abort",
            Self::Checkpoint => "checkpoint",
            Self::DebugMessage => "debug_message",
            Self::InsDel => "ins_del",
            Self::NewPage => "new_page",
            Self::Replace => "replace",
            Self::PageImage => "page_image",
            Self::GroupAlloc => "group_alloc",
            Self::CurAdj => "cur_adj",
        }
    }

    /// Returns true for record kinds that mutate pages and therefore have
    /// redo/undo handlers. Control and diagnostic kinds dispatch as no-ops.
    #[must_use]
    pub const fn is_page_mutation(self) -> bool {
        matches!(
            self,
            Self::InsDel | Self::NewPage | Self::Replace | Self::PageImage | Self::GroupAlloc
        )
    }
}

/// Direction of a key/data pair operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairOp {
    /// Insert the pair.
    Put,
    /// Remove the pair.
    Del,
}

/// Direction of an overflow-chain operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OvflOp {
    /// Insert a new page into the chain.
    Put,
    /// Remove a page from the chain.
    Del,
}

/// Kind of cursor adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CurAdjOp {
    /// A pair was added at the cursor's position.
    Add,
    /// A pair was deleted at the cursor's position.
    Del,
    /// A duplicate entry grew at the cursor's position.
    AddMod,
    /// A duplicate entry shrank at the cursor's position.
    DelMod,
}

impl CurAdjOp {
    /// Returns the inverse adjustment, used when undoing an aborted
    /// subtransaction's cursor bookkeeping.
    #[must_use]
    pub const fn inverted(self) -> Self {
        match self {
            Self::Add => Self::Del,
            Self::Del => Self::Add,
            Self::AddMod => Self::DelMod,
            Self::DelMod => Self::AddMod,
        }
    }

    fn to_wire(self) -> u32 {
        match self {
            Self::Add => 1,
            Self::Del => 2,
            Self::AddMod => 3,
            Self::DelMod => 4,
        }
    }

    fn from_wire(v: u32) -> CoreResult<Self> {
        match v {
            1 => Ok(Self::Add),
            2 => Ok(Self::Del),
            3 => Ok(Self::AddMod),
            4 => Ok(Self::DelMod),
            _ => Err(CoreError::log_corruption(format!(
                "invalid cursor adjustment mode {v}"
            ))),
        }
    }
}

/// The type-specific body of a log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordBody {
    /// Transaction commit.
    TxnCommit,

    /// Transaction abort.
    TxnAbort,

    /// Checkpoint marker.
    Checkpoint {
        /// LSN before which all dirty pages were flushed at checkpoint
        /// time; recovery's forward pass starts here.
        ckp_lsn: Lsn,
    },

    /// Diagnostic message. Recovery ignores it; the log-dump tool prints it.
    DebugMessage {
        /// Message bytes (UTF-8 by convention, not enforced).
        message: Vec<u8>,
    },

    /// Key/data pair insert or delete on a bucket page.
    InsDel {
        /// Insert or delete.
        op: PairOp,
        /// The key does not fit on-page and is stored off-page.
        key_big: bool,
        /// The data does not fit on-page and is stored off-page.
        data_big: bool,
        /// The data entry is a duplicate set.
        data_dup: bool,
        /// The page the pair lives on.
        pgno: PageId,
        /// Entry index of the key on the page.
        ndx: u32,
        /// The page's LSN before this change.
        page_lsn: Lsn,
        /// Key image. For a delete this is the entire on-page entry,
        /// including its type tag, so an undo can splice it back verbatim.
        key: Vec<u8>,
        /// Data image, same convention as `key`.
        data: Vec<u8>,
    },

    /// Overflow page chain insert or remove.
    ///
    /// Touches up to three pages - the page itself, its predecessor, and
    /// its successor. Each carries its own before-LSN because the three
    /// pages reach disk independently and recover independently.
    NewPage {
        /// Chain insert or chain remove.
        op: OvflOp,
        /// The page being added or removed.
        new_pgno: PageId,
        /// `new_pgno`'s LSN before this change.
        page_lsn: Lsn,
        /// Predecessor page, or [`crate::types::PGNO_INVALID`].
        prev_pgno: PageId,
        /// Predecessor's LSN before this change.
        prev_lsn: Lsn,
        /// Successor page, or [`crate::types::PGNO_INVALID`].
        next_pgno: PageId,
        /// Successor's LSN before this change.
        next_lsn: Lsn,
    },

    /// Partial in-place item replace: a byte-range splice within one entry.
    Replace {
        /// The page holding the entry.
        pgno: PageId,
        /// Entry index on the page.
        ndx: u32,
        /// Byte offset of the replaced range within the entry.
        off: u32,
        /// Convert the entry's tag to a duplicate set on redo (and back on
        /// undo).
        make_dup: bool,
        /// The page's LSN before this change.
        page_lsn: Lsn,
        /// Replaced bytes (the range's previous content).
        old_item: Vec<u8>,
        /// Replacement bytes.
        new_item: Vec<u8>,
    },

    /// Wholesale page image install.
    ///
    /// Used when a change touches too much of a page to describe
    /// incrementally; trades log size for recovery simplicity.
    PageImage {
        /// The page being overwritten.
        pgno: PageId,
        /// The page's LSN before this change.
        page_lsn: Lsn,
        /// Full encoded image of the page before the change.
        old_image: Vec<u8>,
        /// Full encoded image of the page after the change.
        new_image: Vec<u8>,
    },

    /// Contiguous run of newly allocated pages (file extension).
    GroupAlloc {
        /// First page of the run.
        start_pgno: PageId,
        /// Number of pages allocated.
        num: u32,
        /// Meta LSN before the allocation.
        meta_lsn: Lsn,
        /// Last page number before the allocation, for undo.
        last_pgno: PageId,
    },

    /// Reversible in-memory cursor bookkeeping adjustment.
    ///
    /// Not a page mutation: applied only when undoing an aborted
    /// subtransaction so open cursors stay valid.
    CurAdj {
        /// The adjustment that was made.
        op: CurAdjOp,
        /// Page the adjusted cursors point at.
        pgno: PageId,
        /// Entry index the adjustment happened at.
        ndx: u32,
        /// Length delta for duplicate-offset adjustments.
        len: u32,
        /// Duplicate offset the adjustment happened at.
        dup_off: u32,
        /// Order stamp distinguishing same-slot deletions.
        order: u32,
        /// Whether the adjustment applies to a duplicate set.
        is_dup: bool,
    },
}

/// A single write-ahead log record.
///
/// A record is an immutable value once decoded; decode allocates its blobs
/// exactly once and shares nothing with the input buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// The transaction this record belongs to; `TxnId(0)` for records
    /// written outside any transaction (checkpoints, diagnostics).
    pub txn_id: TxnId,
    /// The previous record written by the same transaction, or
    /// [`Lsn::ZERO`] for the transaction's first record. Undo follows this
    /// chain backwards.
    pub prev_lsn: Lsn,
    /// The type-specific payload.
    pub body: RecordBody,
}

impl LogRecord {
    /// Returns the record's kind.
    #[must_use]
    pub fn kind(&self) -> RecordKind {
        match &self.body {
            RecordBody::TxnCommit => RecordKind::TxnCommit,
            RecordBody::TxnAbort => RecordKind::TxnAbort,
            RecordBody::Checkpoint { .. } => RecordKind::Checkpoint,
            RecordBody::DebugMessage { .. } => RecordKind::DebugMessage,
            RecordBody::InsDel { .. } => RecordKind::InsDel,
            RecordBody::NewPage { .. } => RecordKind::NewPage,
            RecordBody::Replace { .. } => RecordKind::Replace,
            RecordBody::PageImage { .. } => RecordKind::PageImage,
            RecordBody::GroupAlloc { .. } => RecordKind::GroupAlloc,
            RecordBody::CurAdj { .. } => RecordKind::CurAdj,
        }
    }

    /// Serializes the record, header first, into a flat buffer.
    ///
    /// The buffer is fully built before return; encoding never produces a
    /// partial record. Absent or empty blobs encode as a zero length with
    /// no data bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if any blob exceeds [`MAX_BLOB_SIZE`].
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        let mut buf = Vec::with_capacity(RECORD_HEADER_SIZE + 64);

        buf.extend_from_slice(&self.kind().opcode().to_le_bytes());
        buf.extend_from_slice(&self.txn_id.as_u32().to_le_bytes());
        put_lsn(&mut buf, self.prev_lsn);

        match &self.body {
            RecordBody::TxnCommit | RecordBody::TxnAbort => {}

            RecordBody::Checkpoint { ckp_lsn } => {
                put_lsn(&mut buf, *ckp_lsn);
            }

            RecordBody::DebugMessage { message } => {
                put_blob(&mut buf, message)?;
            }

            RecordBody::InsDel {
                op,
                key_big,
                data_big,
                data_dup,
                pgno,
                ndx,
                page_lsn,
                key,
                data,
            } => {
                let mut opword = match op {
                    PairOp::Put => 1,
                    PairOp::Del => 2,
                };
                if *key_big {
                    opword |= PAIR_KEY_BIG;
                }
                if *data_big {
                    opword |= PAIR_DATA_BIG;
                }
                if *data_dup {
                    opword |= PAIR_DATA_DUP;
                }
                buf.extend_from_slice(&opword.to_le_bytes());
                buf.extend_from_slice(&pgno.as_u32().to_le_bytes());
                buf.extend_from_slice(&ndx.to_le_bytes());
                put_lsn(&mut buf, *page_lsn);
                put_blob(&mut buf, key)?;
                put_blob(&mut buf, data)?;
            }

            RecordBody::NewPage {
                op,
                new_pgno,
                page_lsn,
                prev_pgno,
                prev_lsn,
                next_pgno,
                next_lsn,
            } => {
                let opword: u32 = match op {
                    OvflOp::Put => 1,
                    OvflOp::Del => 2,
                };
                buf.extend_from_slice(&opword.to_le_bytes());
                buf.extend_from_slice(&new_pgno.as_u32().to_le_bytes());
                put_lsn(&mut buf, *page_lsn);
                buf.extend_from_slice(&prev_pgno.as_u32().to_le_bytes());
                put_lsn(&mut buf, *prev_lsn);
                buf.extend_from_slice(&next_pgno.as_u32().to_le_bytes());
                put_lsn(&mut buf, *next_lsn);
            }

            RecordBody::Replace {
                pgno,
                ndx,
                off,
                make_dup,
                page_lsn,
                old_item,
                new_item,
            } => {
                buf.extend_from_slice(&pgno.as_u32().to_le_bytes());
                buf.extend_from_slice(&ndx.to_le_bytes());
                buf.extend_from_slice(&off.to_le_bytes());
                buf.extend_from_slice(&u32::from(*make_dup).to_le_bytes());
                put_lsn(&mut buf, *page_lsn);
                put_blob(&mut buf, old_item)?;
                put_blob(&mut buf, new_item)?;
            }

            RecordBody::PageImage {
                pgno,
                page_lsn,
                old_image,
                new_image,
            } => {
                buf.extend_from_slice(&pgno.as_u32().to_le_bytes());
                put_lsn(&mut buf, *page_lsn);
                put_blob(&mut buf, old_image)?;
                put_blob(&mut buf, new_image)?;
            }

            RecordBody::GroupAlloc {
                start_pgno,
                num,
                meta_lsn,
                last_pgno,
            } => {
                buf.extend_from_slice(&start_pgno.as_u32().to_le_bytes());
                buf.extend_from_slice(&num.to_le_bytes());
                put_lsn(&mut buf, *meta_lsn);
                buf.extend_from_slice(&last_pgno.as_u32().to_le_bytes());
            }

            RecordBody::CurAdj {
                op,
                pgno,
                ndx,
                len,
                dup_off,
                order,
                is_dup,
            } => {
                buf.extend_from_slice(&op.to_wire().to_le_bytes());
                buf.extend_from_slice(&pgno.as_u32().to_le_bytes());
                buf.extend_from_slice(&ndx.to_le_bytes());
                buf.extend_from_slice(&len.to_le_bytes());
                buf.extend_from_slice(&dup_off.to_le_bytes());
                buf.extend_from_slice(&order.to_le_bytes());
                buf.extend_from_slice(&u32::from(*is_dup).to_le_bytes());
            }
        }

        Ok(buf)
    }

    /// Deserializes a record from a buffer holding exactly one record.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::LogCorruption`] if any field would read past
    /// the buffer end or the buffer holds trailing bytes, and
    /// [`CoreError::UnknownRecordType`] for an unrecognized opcode.
    pub fn decode(bytes: &[u8]) -> CoreResult<Self> {
        let mut cursor = 0usize;

        let opcode = read_u32(bytes, &mut cursor)?;
        let kind = RecordKind::from_opcode(opcode)
            .ok_or(CoreError::UnknownRecordType { opcode })?;
        let txn_id = TxnId::new(read_u32(bytes, &mut cursor)?);
        let prev_lsn = read_lsn(bytes, &mut cursor)?;

        let body = match kind {
            RecordKind::TxnCommit => RecordBody::TxnCommit,
            RecordKind::TxnAbort => RecordBody::TxnAbort,

            RecordKind::Checkpoint => RecordBody::Checkpoint {
                ckp_lsn: read_lsn(bytes, &mut cursor)?,
            },

            RecordKind::DebugMessage => RecordBody::DebugMessage {
                message: read_blob(bytes, &mut cursor)?,
            },

            RecordKind::InsDel => {
                let opword = read_u32(bytes, &mut cursor)?;
                let op = match opword & PAIR_OP_MASK {
                    1 => PairOp::Put,
                    2 => PairOp::Del,
                    other => {
                        return Err(CoreError::log_corruption(format!(
                            "invalid pair op {other}"
                        )))
                    }
                };
                RecordBody::InsDel {
                    op,
                    key_big: opword & PAIR_KEY_BIG != 0,
                    data_big: opword & PAIR_DATA_BIG != 0,
                    data_dup: opword & PAIR_DATA_DUP != 0,
                    pgno: PageId::new(read_u32(bytes, &mut cursor)?),
                    ndx: read_u32(bytes, &mut cursor)?,
                    page_lsn: read_lsn(bytes, &mut cursor)?,
                    key: read_blob(bytes, &mut cursor)?,
                    data: read_blob(bytes, &mut cursor)?,
                }
            }

            RecordKind::NewPage => {
                let opword = read_u32(bytes, &mut cursor)?;
                let op = match opword {
                    1 => OvflOp::Put,
                    2 => OvflOp::Del,
                    other => {
                        return Err(CoreError::log_corruption(format!(
                            "invalid overflow op {other}"
                        )))
                    }
                };
                RecordBody::NewPage {
                    op,
                    new_pgno: PageId::new(read_u32(bytes, &mut cursor)?),
                    page_lsn: read_lsn(bytes, &mut cursor)?,
                    prev_pgno: PageId::new(read_u32(bytes, &mut cursor)?),
                    prev_lsn: read_lsn(bytes, &mut cursor)?,
                    next_pgno: PageId::new(read_u32(bytes, &mut cursor)?),
                    next_lsn: read_lsn(bytes, &mut cursor)?,
                }
            }

            RecordKind::Replace => RecordBody::Replace {
                pgno: PageId::new(read_u32(bytes, &mut cursor)?),
                ndx: read_u32(bytes, &mut cursor)?,
                off: read_u32(bytes, &mut cursor)?,
                make_dup: read_u32(bytes, &mut cursor)? != 0,
                page_lsn: read_lsn(bytes, &mut cursor)?,
                old_item: read_blob(bytes, &mut cursor)?,
                new_item: read_blob(bytes, &mut cursor)?,
            },

            RecordKind::PageImage => RecordBody::PageImage {
                pgno: PageId::new(read_u32(bytes, &mut cursor)?),
                page_lsn: read_lsn(bytes, &mut cursor)?,
                old_image: read_blob(bytes, &mut cursor)?,
                new_image: read_blob(bytes, &mut cursor)?,
            },

            RecordKind::GroupAlloc => RecordBody::GroupAlloc {
                start_pgno: PageId::new(read_u32(bytes, &mut cursor)?),
                num: read_u32(bytes, &mut cursor)?,
                meta_lsn: read_lsn(bytes, &mut cursor)?,
                last_pgno: PageId::new(read_u32(bytes, &mut cursor)?),
            },

            RecordKind::CurAdj => RecordBody::CurAdj {
                op: CurAdjOp::from_wire(read_u32(bytes, &mut cursor)?)?,
                pgno: PageId::new(read_u32(bytes, &mut cursor)?),
                ndx: read_u32(bytes, &mut cursor)?,
                len: read_u32(bytes, &mut cursor)?,
                dup_off: read_u32(bytes, &mut cursor)?,
                order: read_u32(bytes, &mut cursor)?,
                is_dup: read_u32(bytes, &mut cursor)? != 0,
            },
        };

        if cursor != bytes.len() {
            return Err(CoreError::log_corruption(format!(
                "trailing bytes in {} record: consumed {cursor} of {}",
                kind.name(),
                bytes.len()
            )));
        }

        Ok(Self {
            txn_id,
            prev_lsn,
            body,
        })
    }

    /// Renders the record as one human-readable line for the log-dump tool.
    #[must_use]
    pub fn describe(&self) -> String {
        let head = format!(
            "{}: {} prev {}",
            self.kind().name(),
            self.txn_id,
            self.prev_lsn
        );
        match &self.body {
            RecordBody::TxnCommit | RecordBody::TxnAbort => head,
            RecordBody::Checkpoint { ckp_lsn } => format!("{head} ckp_lsn {ckp_lsn}"),
            RecordBody::DebugMessage { message } => {
                format!("{head} \"{}\"", String::from_utf8_lossy(message))
            }
            RecordBody::InsDel {
                op,
                pgno,
                ndx,
                page_lsn,
                key,
                data,
                ..
            } => format!(
                "{head} {op:?} {pgno} ndx {ndx} pagelsn {page_lsn} key {} bytes data {} bytes",
                key.len(),
                data.len()
            ),
            RecordBody::NewPage {
                op,
                new_pgno,
                prev_pgno,
                next_pgno,
                ..
            } => format!("{head} {op:?} {new_pgno} prev {prev_pgno} next {next_pgno}"),
            RecordBody::Replace {
                pgno,
                ndx,
                off,
                old_item,
                new_item,
                ..
            } => format!(
                "{head} {pgno} ndx {ndx} off {off} old {} bytes new {} bytes",
                old_item.len(),
                new_item.len()
            ),
            RecordBody::PageImage {
                pgno, new_image, ..
            } => format!("{head} {pgno} image {} bytes", new_image.len()),
            RecordBody::GroupAlloc {
                start_pgno, num, ..
            } => format!("{head} start {start_pgno} num {num}"),
            RecordBody::CurAdj {
                op, pgno, ndx, ..
            } => format!("{head} {op:?} {pgno} ndx {ndx}"),
        }
    }
}

fn put_lsn(buf: &mut Vec<u8>, lsn: Lsn) {
    buf.extend_from_slice(&lsn.file.to_le_bytes());
    buf.extend_from_slice(&lsn.offset.to_le_bytes());
}

fn put_blob(buf: &mut Vec<u8>, blob: &[u8]) -> CoreResult<()> {
    if blob.len() > MAX_BLOB_SIZE {
        return Err(CoreError::invalid_operation(format!(
            "blob of {} bytes exceeds the {MAX_BLOB_SIZE}-byte wire limit",
            blob.len()
        )));
    }
    buf.extend_from_slice(&(blob.len() as u32).to_le_bytes());
    buf.extend_from_slice(blob);
    Ok(())
}

fn read_u32(bytes: &[u8], cursor: &mut usize) -> CoreResult<u32> {
    let end = cursor
        .checked_add(4)
        .filter(|&e| e <= bytes.len())
        .ok_or_else(|| CoreError::log_corruption("unexpected end of record"))?;
    let raw: [u8; 4] = bytes[*cursor..end]
        .try_into()
        .map_err(|_| CoreError::log_corruption("invalid u32 field"))?;
    *cursor = end;
    Ok(u32::from_le_bytes(raw))
}

fn read_lsn(bytes: &[u8], cursor: &mut usize) -> CoreResult<Lsn> {
    let file = read_u32(bytes, cursor)?;
    let offset = read_u32(bytes, cursor)?;
    Ok(Lsn::new(file, offset))
}

fn read_blob(bytes: &[u8], cursor: &mut usize) -> CoreResult<Vec<u8>> {
    let len = read_u32(bytes, cursor)? as usize;
    let end = cursor
        .checked_add(len)
        .filter(|&e| e <= bytes.len())
        .ok_or_else(|| CoreError::log_corruption("unexpected end of blob"))?;
    let blob = bytes[*cursor..end].to_vec();
    *cursor = end;
    Ok(blob)
}
