//! Append-only log store over numbered segment files.
//!
//! Each record is written inside an envelope:
//!
//! ```text
//! magic (4) | version (2) | length (4) | prev_offset (4) | payload | crc32 (4)
//! ```
//!
//! `length` counts the payload bytes. `prev_offset` is the segment offset of
//! the preceding envelope in the same segment, [`NO_PREV_OFFSET`] for the
//! segment's first record; it is what lets a cursor walk backwards without an
//! index. The CRC covers everything before it.
//!
//! A record's LSN is `(segment fileno, envelope offset)`. Segments are
//! numbered from 1 and rotated when the configured size limit is reached, so
//! LSNs assigned by [`LogStore::append`] are strictly increasing.
//!
//! On open the highest segment's tail is scanned. An incomplete envelope at
//! the very end is the signature of a crash mid-append and is cut off as a
//! clean end of log. A complete envelope with a bad magic, version, or CRC
//! is corruption and fails the open.

use std::collections::BTreeMap;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use burrowdb_storage::{SegmentBackend, SegmentStore};

use crate::error::{CoreError, CoreResult};
use crate::log::record::LogRecord;
use crate::types::Lsn;

/// Magic bytes opening every record envelope.
pub const ENVELOPE_MAGIC: [u8; 4] = *b"BRLG";

/// Current envelope wire version.
pub const WIRE_VERSION: u16 = 1;

/// Size of the envelope header preceding the payload.
pub const ENVELOPE_HEADER_SIZE: usize = 14;

/// Size of the CRC trailer following the payload.
pub const ENVELOPE_TRAILER_SIZE: usize = 4;

/// `prev_offset` value marking the first record in a segment.
pub const NO_PREV_OFFSET: u32 = u32::MAX;

/// Fileno of the first segment ever created.
pub const FIRST_SEGMENT: u32 = 1;

/// Log store tuning knobs.
#[derive(Debug, Clone, Copy)]
pub struct LogConfig {
    /// Rotate to a new segment once the current one reaches this many bytes.
    /// A single record larger than the limit still gets written; rotation
    /// only happens on the next append.
    pub max_segment_size: u64,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            max_segment_size: 10 * 1024 * 1024,
        }
    }
}

/// A decoded envelope, before payload interpretation.
#[derive(Debug, Clone)]
pub(crate) struct Envelope {
    /// The record payload bytes.
    pub payload: Vec<u8>,
    /// Segment offset of the previous envelope, or [`NO_PREV_OFFSET`].
    pub prev_offset: u32,
    /// Total on-disk footprint of this envelope in bytes.
    pub total_len: u32,
}

struct Inner {
    store: Box<dyn SegmentStore>,
    /// Open segment handles, keyed by fileno. Handles share underlying
    /// storage, so reads through a cached handle observe later appends.
    segments: BTreeMap<u32, Box<dyn SegmentBackend>>,
    current_fileno: u32,
    current_size: u64,
    /// Offset of the newest record in the current segment.
    last_offset: Option<u32>,
    first_lsn: Lsn,
    last_lsn: Lsn,
}

/// The write-ahead log: an ordered, durable sequence of records addressed
/// by LSN.
///
/// All methods take `&self`; internal state is guarded by a single mutex.
/// Appends serialize against each other, which is what gives LSNs their
/// strictly increasing order.
pub struct LogStore {
    inner: Mutex<Inner>,
    config: LogConfig,
}

impl std::fmt::Debug for LogStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("LogStore")
            .field("current_fileno", &inner.current_fileno)
            .field("current_size", &inner.current_size)
            .field("first_lsn", &inner.first_lsn)
            .field("last_lsn", &inner.last_lsn)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl LogStore {
    /// Opens the log held by `store`, creating the first segment if the
    /// store is empty.
    ///
    /// Scans the highest segment's tail and cuts off an incomplete final
    /// envelope. An empty trailing segment left by a crash between rotation
    /// and first append is removed.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::LogCorruption`] or
    /// [`CoreError::ChecksumMismatch`] if a complete envelope fails
    /// validation, or a storage error if segments cannot be enumerated.
    pub fn open(store: Box<dyn SegmentStore>, config: LogConfig) -> CoreResult<Self> {
        let mut filenos = store.list_segments()?;
        let mut segments: BTreeMap<u32, Box<dyn SegmentBackend>> = BTreeMap::new();

        if filenos.is_empty() {
            let backend = store.create_segment(FIRST_SEGMENT)?;
            segments.insert(FIRST_SEGMENT, backend);
            info!(fileno = FIRST_SEGMENT, "created empty log");
            return Ok(Self {
                inner: Mutex::new(Inner {
                    store,
                    segments,
                    current_fileno: FIRST_SEGMENT,
                    current_size: 0,
                    last_offset: None,
                    first_lsn: Lsn::ZERO,
                    last_lsn: Lsn::ZERO,
                }),
                config,
            });
        }

        let mut current_fileno = *filenos.last().ok_or_else(|| {
            CoreError::invariant("segment list changed during open")
        })?;
        let mut backend = store.open_segment(current_fileno)?;
        let mut scan = scan_segment(backend.as_ref())?;

        // A crash around rotation can leave the newest segment without a
        // single complete record: empty, or holding only a torn envelope.
        // Cut the tail, drop the emptied segment, and resume in the
        // previous one so the surviving prefix stays addressable.
        loop {
            if scan.valid_end < backend.size()? {
                warn!(
                    fileno = current_fileno,
                    valid_end = scan.valid_end,
                    size = backend.size()?,
                    "cutting off incomplete record at end of log"
                );
                backend.truncate(scan.valid_end)?;
            }
            if scan.last_offset.is_some() || filenos.len() == 1 {
                break;
            }
            warn!(fileno = current_fileno, "removing empty trailing segment");
            store.remove_segment(current_fileno)?;
            filenos.pop();
            current_fileno = *filenos.last().ok_or_else(|| {
                CoreError::invariant("segment list changed during open")
            })?;
            backend = store.open_segment(current_fileno)?;
            scan = scan_segment(backend.as_ref())?;
        }

        let first_file = *filenos.first().ok_or_else(|| {
            CoreError::invariant("segment list changed during open")
        })?;
        let (first_lsn, last_lsn) = match scan.last_offset {
            Some(off) => (Lsn::new(first_file, 0), Lsn::new(current_fileno, off)),
            // Only one segment left and it holds no records.
            None => (Lsn::ZERO, Lsn::ZERO),
        };

        info!(
            segments = filenos.len(),
            %first_lsn,
            %last_lsn,
            "opened log"
        );

        let current_size = scan.valid_end;
        segments.insert(current_fileno, backend);
        Ok(Self {
            inner: Mutex::new(Inner {
                store,
                segments,
                current_fileno,
                current_size,
                last_offset: scan.last_offset,
                first_lsn,
                last_lsn,
            }),
            config,
        })
    }

    /// Appends a record and returns its assigned LSN.
    ///
    /// The record is fully serialized before any byte reaches the segment,
    /// so a failed encode never leaves a partial record behind.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails or the segment write fails.
    pub fn append(&self, record: &LogRecord) -> CoreResult<Lsn> {
        let payload = record.encode()?;
        let mut inner = self.inner.lock();

        let footprint =
            (ENVELOPE_HEADER_SIZE + payload.len() + ENVELOPE_TRAILER_SIZE) as u64;
        if inner.current_size > 0
            && inner.current_size + footprint > self.config.max_segment_size
        {
            rotate(&mut inner)?;
        }

        let offset = u32::try_from(inner.current_size).map_err(|_| {
            CoreError::invalid_operation("segment exceeds 4 GiB addressing limit")
        })?;
        let prev_offset = inner.last_offset.unwrap_or(NO_PREV_OFFSET);
        let envelope = encode_envelope(&payload, prev_offset);

        let fileno = inner.current_fileno;
        let backend = segment_mut(&mut inner, fileno)?;
        backend.append(&envelope)?;

        let lsn = Lsn::new(fileno, offset);
        inner.current_size += envelope.len() as u64;
        inner.last_offset = Some(offset);
        inner.last_lsn = lsn;
        if inner.first_lsn.is_zero() {
            inner.first_lsn = lsn;
        }
        debug!(%lsn, kind = record.kind().name(), "appended record");
        Ok(lsn)
    }

    /// Reads and decodes the record at `lsn`.
    ///
    /// # Errors
    ///
    /// Returns an error if no valid envelope lives at `lsn` or the payload
    /// fails to decode.
    pub fn read(&self, lsn: Lsn) -> CoreResult<LogRecord> {
        let envelope = self.envelope(lsn)?;
        LogRecord::decode(&envelope.payload)
    }

    /// Reads the raw payload bytes of the record at `lsn` without decoding.
    ///
    /// The replication verifier compares these bytes against a remote
    /// site's record; byte equality is the match criterion, not decoded
    /// equality.
    ///
    /// # Errors
    ///
    /// Returns an error if no valid envelope lives at `lsn`.
    pub fn read_raw(&self, lsn: Lsn) -> CoreResult<Vec<u8>> {
        Ok(self.envelope(lsn)?.payload)
    }

    /// Returns the LSN of the oldest record, or [`Lsn::ZERO`] if empty.
    pub fn first_lsn(&self) -> Lsn {
        self.inner.lock().first_lsn
    }

    /// Returns the LSN of the newest record, or [`Lsn::ZERO`] if empty.
    pub fn last_lsn(&self) -> Lsn {
        self.inner.lock().last_lsn
    }

    /// Flushes the current segment's pending writes.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying flush fails.
    pub fn flush(&self) -> CoreResult<()> {
        let mut inner = self.inner.lock();
        let fileno = inner.current_fileno;
        segment_mut(&mut inner, fileno)?.flush()?;
        Ok(())
    }

    /// Syncs the current segment's data and metadata to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying sync fails.
    pub fn sync(&self) -> CoreResult<()> {
        let mut inner = self.inner.lock();
        let fileno = inner.current_fileno;
        segment_mut(&mut inner, fileno)?.sync()?;
        Ok(())
    }

    /// Discards every record after `after`, which becomes the newest record.
    ///
    /// Whole segments past `after.file` are removed; the segment holding
    /// `after` is cut immediately past that record's envelope. Used by the
    /// replication verifier to roll a joining site's log back to the match
    /// point.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if no record lives at
    /// `after`, or a storage error if segment removal fails.
    pub fn truncate(&self, after: Lsn) -> CoreResult<()> {
        let mut inner = self.inner.lock();
        if after.is_zero() {
            return Err(CoreError::invalid_operation(
                "cannot truncate the log to empty",
            ));
        }
        let envelope = envelope_in(&mut inner, after).map_err(|_| {
            CoreError::invalid_operation(format!("no record at {after} to truncate to"))
        })?;

        for fileno in inner.store.list_segments()? {
            if fileno > after.file {
                inner.segments.remove(&fileno);
                inner.store.remove_segment(fileno)?;
            }
        }

        let new_end = u64::from(after.offset) + u64::from(envelope.total_len);
        let backend = segment_mut(&mut inner, after.file)?;
        backend.truncate(new_end)?;

        inner.current_fileno = after.file;
        inner.current_size = new_end;
        inner.last_offset = Some(after.offset);
        inner.last_lsn = after;
        info!(%after, "truncated log");
        Ok(())
    }

    /// Returns the numbers of all segments, ascending.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be enumerated.
    pub fn segment_files(&self) -> CoreResult<Vec<u32>> {
        Ok(self.inner.lock().store.list_segments()?)
    }

    pub(crate) fn envelope(&self, lsn: Lsn) -> CoreResult<Envelope> {
        let mut inner = self.inner.lock();
        envelope_in(&mut inner, lsn)
    }

    /// Offset of the last record in `fileno`, reached by walking the
    /// segment's envelope chain forward. `None` for an empty segment.
    pub(crate) fn last_offset_in(&self, fileno: u32) -> CoreResult<Option<u32>> {
        let mut inner = self.inner.lock();
        let backend = segment_mut(&mut inner, fileno)?;
        let scan = scan_segment(backend.as_ref())?;
        if scan.valid_end < backend.size()? {
            return Err(CoreError::log_corruption(format!(
                "incomplete record inside sealed segment {fileno}"
            )));
        }
        Ok(scan.last_offset)
    }

    /// Size in bytes of segment `fileno`.
    pub(crate) fn segment_size(&self, fileno: u32) -> CoreResult<u64> {
        let mut inner = self.inner.lock();
        Ok(segment_mut(&mut inner, fileno)?.size()?)
    }
}

fn rotate(inner: &mut Inner) -> CoreResult<()> {
    let next = inner.current_fileno + 1;
    let backend = inner.store.create_segment(next)?;
    inner.segments.insert(next, backend);
    inner.current_fileno = next;
    inner.current_size = 0;
    inner.last_offset = None;
    debug!(fileno = next, "rotated to new segment");
    Ok(())
}

fn segment_mut<'a>(
    inner: &'a mut Inner,
    fileno: u32,
) -> CoreResult<&'a mut Box<dyn SegmentBackend>> {
    if !inner.segments.contains_key(&fileno) {
        let backend = inner.store.open_segment(fileno)?;
        inner.segments.insert(fileno, backend);
    }
    inner
        .segments
        .get_mut(&fileno)
        .ok_or_else(|| CoreError::invariant("segment handle vanished"))
}

fn envelope_in(inner: &mut Inner, lsn: Lsn) -> CoreResult<Envelope> {
    let backend = segment_mut(inner, lsn.file)?;
    read_envelope(backend.as_ref(), u64::from(lsn.offset))
}

fn encode_envelope(payload: &[u8], prev_offset: u32) -> Vec<u8> {
    let mut buf = Vec::with_capacity(
        ENVELOPE_HEADER_SIZE + payload.len() + ENVELOPE_TRAILER_SIZE,
    );
    buf.extend_from_slice(&ENVELOPE_MAGIC);
    buf.extend_from_slice(&WIRE_VERSION.to_le_bytes());
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(&prev_offset.to_le_bytes());
    buf.extend_from_slice(payload);
    let crc = crc32fast::hash(&buf);
    buf.extend_from_slice(&crc.to_le_bytes());
    buf
}

/// Reads and validates one envelope at `offset`.
fn read_envelope(backend: &dyn SegmentBackend, offset: u64) -> CoreResult<Envelope> {
    let header = backend.read_at(offset, ENVELOPE_HEADER_SIZE)?;
    if header[0..4] != ENVELOPE_MAGIC {
        return Err(CoreError::log_corruption(format!(
            "bad envelope magic at offset {offset}"
        )));
    }
    let version = u16::from_le_bytes([header[4], header[5]]);
    if version != WIRE_VERSION {
        return Err(CoreError::log_corruption(format!(
            "unsupported envelope version {version} at offset {offset}"
        )));
    }
    let length = u32::from_le_bytes([header[6], header[7], header[8], header[9]]) as usize;
    let prev_offset = u32::from_le_bytes([header[10], header[11], header[12], header[13]]);

    let payload = backend.read_at(offset + ENVELOPE_HEADER_SIZE as u64, length)?;
    let crc_bytes = backend.read_at(
        offset + (ENVELOPE_HEADER_SIZE + length) as u64,
        ENVELOPE_TRAILER_SIZE,
    )?;
    let expected = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&header);
    hasher.update(&payload);
    let actual = hasher.finalize();
    if actual != expected {
        return Err(CoreError::ChecksumMismatch { expected, actual });
    }

    Ok(Envelope {
        payload,
        prev_offset,
        total_len: (ENVELOPE_HEADER_SIZE + length + ENVELOPE_TRAILER_SIZE) as u32,
    })
}

struct SegmentScan {
    /// Byte offset just past the last complete, valid envelope.
    valid_end: u64,
    /// Offset of the last valid envelope, `None` if the segment holds none.
    last_offset: Option<u32>,
}

/// Walks a segment front to back validating each envelope.
///
/// Stops cleanly at an incomplete envelope (too few bytes left for a header
/// or for the length the header claims) and reports where the valid data
/// ends. A complete envelope that fails magic, version, or CRC checks is an
/// error, unless the leftover bytes are all zero, which reads as
/// preallocated space rather than damage.
fn scan_segment(backend: &dyn SegmentBackend) -> CoreResult<SegmentScan> {
    let size = backend.size()?;
    let mut offset = 0u64;
    let mut last_offset = None;

    while offset < size {
        let remaining = (size - offset) as usize;
        if remaining < ENVELOPE_HEADER_SIZE + ENVELOPE_TRAILER_SIZE {
            break;
        }
        let header = backend.read_at(offset, ENVELOPE_HEADER_SIZE)?;
        if header[0..4] != ENVELOPE_MAGIC {
            let rest = backend.read_at(offset, remaining)?;
            if rest.iter().all(|&b| b == 0) {
                break;
            }
            return Err(CoreError::log_corruption(format!(
                "bad envelope magic at offset {offset}"
            )));
        }
        let length =
            u32::from_le_bytes([header[6], header[7], header[8], header[9]]) as usize;
        if remaining < ENVELOPE_HEADER_SIZE + length + ENVELOPE_TRAILER_SIZE {
            break;
        }
        // Full envelope present: validation failures are real corruption.
        read_envelope(backend, offset)?;
        last_offset = Some(u32::try_from(offset).map_err(|_| {
            CoreError::log_corruption("segment exceeds 4 GiB addressing limit")
        })?);
        offset += (ENVELOPE_HEADER_SIZE + length + ENVELOPE_TRAILER_SIZE) as u64;
    }

    Ok(SegmentScan {
        valid_end: offset,
        last_offset,
    })
}
