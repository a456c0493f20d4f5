//! Slotted page model and page cache.
//!
//! Pages hold variable-length entries addressed by index. Key/data pairs
//! occupy two adjacent entries (key at `ndx`, data at `ndx + 1`). Every
//! entry carries a type tag; recovery splices logged entries back with
//! their tag preserved, so a deleted off-page reference undoes to an
//! off-page reference, not an inline item.

mod cache;

pub use cache::{InMemoryPageCache, PageCache};

use crate::error::{CoreError, CoreResult};
use crate::types::{Lsn, PageId, PGNO_INVALID};

/// Fixed per-page header bytes in the encoded image:
/// pgno (4) + lsn (8) + prev (4) + next (4) + entry count (4).
pub const PAGE_HEADER_SIZE: usize = 24;

/// Per-entry overhead in the encoded image: tag (1) + length (4).
pub const ENTRY_OVERHEAD: usize = 5;

/// On-page entry type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EntryTag {
    /// Inline key or data bytes.
    KeyData = 1,
    /// Reference to an off-page (overflow) chain.
    OffPage = 2,
    /// A duplicate set packed into one entry.
    Duplicate = 3,
}

impl EntryTag {
    /// Converts a tag byte back to a tag.
    #[must_use]
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Self::KeyData),
            2 => Some(Self::OffPage),
            3 => Some(Self::Duplicate),
            _ => None,
        }
    }
}

/// One slotted entry: a tag plus its bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageEntry {
    /// The entry's type tag.
    pub tag: EntryTag,
    /// The entry's bytes.
    pub data: Vec<u8>,
}

impl PageEntry {
    /// Creates an inline entry.
    #[must_use]
    pub fn inline(data: Vec<u8>) -> Self {
        Self {
            tag: EntryTag::KeyData,
            data,
        }
    }

    /// Creates an entry with an explicit tag.
    #[must_use]
    pub fn tagged(tag: EntryTag, data: Vec<u8>) -> Self {
        Self { tag, data }
    }

    fn footprint(&self) -> usize {
        ENTRY_OVERHEAD + self.data.len()
    }
}

/// A slotted page.
///
/// `lsn` is the page's recovery clock: the LSN of the last logged change
/// applied to it. [`Lsn::ZERO`] marks a page that has never carried a
/// logged change (fresh from allocation).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    /// This page's number.
    pub pgno: PageId,
    /// LSN of the last logged change applied to this page.
    pub lsn: Lsn,
    /// Previous page in the chain, or [`PGNO_INVALID`].
    pub prev_pgno: PageId,
    /// Next page in the chain, or [`PGNO_INVALID`].
    pub next_pgno: PageId,
    capacity: usize,
    entries: Vec<PageEntry>,
}

impl Page {
    /// Creates an empty page with a zero LSN and no neighbors.
    #[must_use]
    pub fn new(pgno: PageId, capacity: usize) -> Self {
        Self {
            pgno,
            lsn: Lsn::ZERO,
            prev_pgno: PGNO_INVALID,
            next_pgno: PGNO_INVALID,
            capacity,
            entries: Vec::new(),
        }
    }

    /// Reinitializes the page in place: drops all entries, zeroes the LSN,
    /// and sets the chain neighbors.
    pub fn init(&mut self, prev_pgno: PageId, next_pgno: PageId) {
        self.lsn = Lsn::ZERO;
        self.prev_pgno = prev_pgno;
        self.next_pgno = next_pgno;
        self.entries.clear();
    }

    /// Returns the page's byte capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the number of entries on the page.
    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the page holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the entry at `ndx`, if present.
    #[must_use]
    pub fn entry(&self, ndx: usize) -> Option<&PageEntry> {
        self.entries.get(ndx)
    }

    /// Bytes consumed by the header and all entries.
    #[must_use]
    pub fn used_bytes(&self) -> usize {
        PAGE_HEADER_SIZE + self.entries.iter().map(PageEntry::footprint).sum::<usize>()
    }

    /// Bytes still available for new entries.
    #[must_use]
    pub fn free_bytes(&self) -> usize {
        self.capacity.saturating_sub(self.used_bytes())
    }

    /// Inserts a key/data pair at entry indices `ndx` and `ndx + 1`,
    /// rejecting the insert if it would not fit.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvariantViolation`] if the pair exceeds the
    /// remaining capacity or `ndx` is past the end.
    pub fn insert_pair(
        &mut self,
        ndx: usize,
        key: PageEntry,
        data: PageEntry,
    ) -> CoreResult<()> {
        let need = key.footprint() + data.footprint();
        if need > self.free_bytes() {
            return Err(CoreError::invariant(format!(
                "pair of {need} bytes exceeds {} free bytes on {}",
                self.free_bytes(),
                self.pgno
            )));
        }
        self.splice_pair(ndx, key, data)
    }

    /// Inserts a key/data pair without a capacity check.
    ///
    /// Recovery path: the pair fit when it was first applied, so replay
    /// trusts the log.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvariantViolation`] if `ndx` is past the end.
    pub fn splice_pair(
        &mut self,
        ndx: usize,
        key: PageEntry,
        data: PageEntry,
    ) -> CoreResult<()> {
        if ndx > self.entries.len() {
            return Err(CoreError::invariant(format!(
                "pair index {ndx} past {} entries on {}",
                self.entries.len(),
                self.pgno
            )));
        }
        self.entries.insert(ndx, data);
        self.entries.insert(ndx, key);
        Ok(())
    }

    /// Removes the key/data pair at entry indices `ndx` and `ndx + 1`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvariantViolation`] if the pair is not present.
    pub fn delete_pair(&mut self, ndx: usize) -> CoreResult<()> {
        if ndx + 1 >= self.entries.len() {
            return Err(CoreError::invariant(format!(
                "no pair at index {ndx} on {} ({} entries)",
                self.pgno,
                self.entries.len()
            )));
        }
        self.entries.remove(ndx + 1);
        self.entries.remove(ndx);
        Ok(())
    }

    /// Replaces `old_len` bytes at `off` within the entry at `ndx` with
    /// `new_bytes`, rejecting the splice if growth would not fit.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvariantViolation`] if the range is out of
    /// bounds or the growth exceeds the remaining capacity.
    pub fn replace_range(
        &mut self,
        ndx: usize,
        off: usize,
        old_len: usize,
        new_bytes: &[u8],
    ) -> CoreResult<()> {
        let growth = new_bytes.len().saturating_sub(old_len);
        if growth > self.free_bytes() {
            return Err(CoreError::invariant(format!(
                "replace grows entry by {growth} bytes, only {} free on {}",
                self.free_bytes(),
                self.pgno
            )));
        }
        self.splice_range(ndx, off, old_len, new_bytes)
    }

    /// Replaces a byte range within an entry without a capacity check.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvariantViolation`] if the range is out of
    /// bounds.
    pub fn splice_range(
        &mut self,
        ndx: usize,
        off: usize,
        old_len: usize,
        new_bytes: &[u8],
    ) -> CoreResult<()> {
        let pgno = self.pgno;
        let entry = self.entries.get_mut(ndx).ok_or_else(|| {
            CoreError::invariant(format!("no entry at index {ndx} on {pgno}"))
        })?;
        let end = off.checked_add(old_len).filter(|&e| e <= entry.data.len());
        let Some(end) = end else {
            return Err(CoreError::invariant(format!(
                "replace range {off}..{} past entry of {} bytes on {pgno}",
                off + old_len,
                entry.data.len()
            )));
        };
        entry.data.splice(off..end, new_bytes.iter().copied());
        Ok(())
    }

    /// Sets the tag of the entry at `ndx`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvariantViolation`] if there is no such entry.
    pub fn set_tag(&mut self, ndx: usize, tag: EntryTag) -> CoreResult<()> {
        let pgno = self.pgno;
        let entry = self.entries.get_mut(ndx).ok_or_else(|| {
            CoreError::invariant(format!("no entry at index {ndx} on {pgno}"))
        })?;
        entry.tag = tag;
        Ok(())
    }

    /// Serializes the page to its full image.
    #[must_use]
    pub fn to_image(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.used_bytes());
        buf.extend_from_slice(&self.pgno.as_u32().to_le_bytes());
        buf.extend_from_slice(&self.lsn.file.to_le_bytes());
        buf.extend_from_slice(&self.lsn.offset.to_le_bytes());
        buf.extend_from_slice(&self.prev_pgno.as_u32().to_le_bytes());
        buf.extend_from_slice(&self.next_pgno.as_u32().to_le_bytes());
        buf.extend_from_slice(&(self.entries.len() as u32).to_le_bytes());
        for entry in &self.entries {
            buf.push(entry.tag as u8);
            buf.extend_from_slice(&(entry.data.len() as u32).to_le_bytes());
            buf.extend_from_slice(&entry.data);
        }
        buf
    }

    /// Reconstructs a page from a full image.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::LogCorruption`] if the image is malformed.
    pub fn from_image(capacity: usize, image: &[u8]) -> CoreResult<Self> {
        let mut cursor = 0usize;
        let pgno = PageId::new(read_u32(image, &mut cursor)?);
        let file = read_u32(image, &mut cursor)?;
        let offset = read_u32(image, &mut cursor)?;
        let prev_pgno = PageId::new(read_u32(image, &mut cursor)?);
        let next_pgno = PageId::new(read_u32(image, &mut cursor)?);
        let count = read_u32(image, &mut cursor)? as usize;

        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            let tag_byte = *image.get(cursor).ok_or_else(|| {
                CoreError::log_corruption("page image ends inside an entry")
            })?;
            cursor += 1;
            let tag = EntryTag::from_byte(tag_byte).ok_or_else(|| {
                CoreError::log_corruption(format!("invalid entry tag {tag_byte}"))
            })?;
            let len = read_u32(image, &mut cursor)? as usize;
            let end = cursor.checked_add(len).filter(|&e| e <= image.len());
            let Some(end) = end else {
                return Err(CoreError::log_corruption(
                    "page image ends inside entry data",
                ));
            };
            entries.push(PageEntry {
                tag,
                data: image[cursor..end].to_vec(),
            });
            cursor = end;
        }
        if cursor != image.len() {
            return Err(CoreError::log_corruption(format!(
                "trailing bytes in page image: consumed {cursor} of {}",
                image.len()
            )));
        }

        Ok(Self {
            pgno,
            lsn: Lsn::new(file, offset),
            prev_pgno,
            next_pgno,
            capacity,
            entries,
        })
    }
}

fn read_u32(bytes: &[u8], cursor: &mut usize) -> CoreResult<u32> {
    let end = cursor
        .checked_add(4)
        .filter(|&e| e <= bytes.len())
        .ok_or_else(|| CoreError::log_corruption("page image too short"))?;
    let raw: [u8; 4] = bytes[*cursor..end]
        .try_into()
        .map_err(|_| CoreError::log_corruption("invalid page image field"))?;
    *cursor = end;
    Ok(u32::from_le_bytes(raw))
}
