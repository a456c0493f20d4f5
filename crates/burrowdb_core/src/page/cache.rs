//! Page cache trait and in-memory implementation.

use std::collections::{BTreeMap, BTreeSet};

use parking_lot::Mutex;
use tracing::debug;

use burrowdb_storage::StorageCapabilities;

use crate::error::{CoreError, CoreResult};
use crate::page::Page;
use crate::types::PageId;

/// Access to the page store during recovery and forward operation.
///
/// `fetch` hands out an owned copy of the page; callers mutate their copy
/// and hand it back through `put`, stating whether they actually changed
/// it. Pages are dirtied only when mutated, so a recovery pass that skips
/// every record writes nothing back.
///
/// `capabilities` reports at runtime whether the backing store can be
/// physically truncated. Group-allocation undo truncates when it can and
/// falls back to the free list when it cannot.
pub trait PageCache: Send + Sync {
    /// Fetches the page, or `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying store fails.
    fn fetch(&self, pgno: PageId) -> CoreResult<Option<Page>>;

    /// Fetches the page, creating a fresh zero-LSN page if absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying store fails or `pgno` is the
    /// invalid sentinel.
    fn fetch_or_create(&self, pgno: PageId) -> CoreResult<Page>;

    /// Returns a page, writing it back if `dirty`.
    ///
    /// # Errors
    ///
    /// Returns an error if the write-back fails.
    fn put(&self, page: Page, dirty: bool) -> CoreResult<()>;

    /// Removes every page numbered `from_pgno` and higher.
    ///
    /// Only valid when `capabilities().can_truncate`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if the store cannot
    /// truncate.
    fn truncate(&self, from_pgno: PageId) -> CoreResult<()>;

    /// Marks `num` pages starting at `start` as reusable.
    ///
    /// The no-truncate fallback: the pages stay allocated but go on the
    /// free list.
    ///
    /// # Errors
    ///
    /// Returns an error if the free list cannot be updated.
    fn free_pages(&self, start: PageId, num: u32) -> CoreResult<()>;

    /// The highest allocated page number.
    ///
    /// # Errors
    ///
    /// Returns an error if the store metadata cannot be read.
    fn last_pgno(&self) -> CoreResult<PageId>;

    /// Records a new highest allocated page number.
    ///
    /// # Errors
    ///
    /// Returns an error if the store metadata cannot be written.
    fn set_last_pgno(&self, pgno: PageId) -> CoreResult<()>;

    /// Runtime capabilities of the backing store.
    fn capabilities(&self) -> StorageCapabilities;

    /// Byte capacity of every page in this store.
    fn page_size(&self) -> usize;
}

struct CacheState {
    pages: BTreeMap<u32, Page>,
    dirty: BTreeSet<u32>,
    free_list: BTreeSet<u32>,
    last_pgno: u32,
}

/// An in-memory page store.
///
/// Primary use is recovery testing: seed pages, run a pass, inspect what
/// changed. The dirty set records exactly which pages were written back
/// with `dirty = true`.
pub struct InMemoryPageCache {
    state: Mutex<CacheState>,
    capabilities: StorageCapabilities,
    page_size: usize,
}

impl InMemoryPageCache {
    /// Creates an empty cache with the given page size.
    #[must_use]
    pub fn new(page_size: usize, capabilities: StorageCapabilities) -> Self {
        Self {
            state: Mutex::new(CacheState {
                pages: BTreeMap::new(),
                dirty: BTreeSet::new(),
                free_list: BTreeSet::new(),
                last_pgno: 0,
            }),
            capabilities,
            page_size,
        }
    }

    /// Seeds a page without marking it dirty, extending `last_pgno` if
    /// needed. Test setup hook.
    pub fn seed(&self, page: Page) {
        let mut state = self.state.lock();
        state.last_pgno = state.last_pgno.max(page.pgno.as_u32());
        state.pages.insert(page.pgno.as_u32(), page);
    }

    /// Page numbers written back dirty, ascending.
    #[must_use]
    pub fn dirty_pages(&self) -> Vec<PageId> {
        self.state.lock().dirty.iter().copied().map(PageId::new).collect()
    }

    /// Clears the dirty set. Test hook for isolating passes.
    pub fn clear_dirty(&self) {
        self.state.lock().dirty.clear();
    }

    /// Current free-list members, ascending.
    #[must_use]
    pub fn free_list(&self) -> Vec<PageId> {
        self.state
            .lock()
            .free_list
            .iter()
            .copied()
            .map(PageId::new)
            .collect()
    }

    /// Whether a page exists in the store.
    #[must_use]
    pub fn contains(&self, pgno: PageId) -> bool {
        self.state.lock().pages.contains_key(&pgno.as_u32())
    }
}

impl PageCache for InMemoryPageCache {
    fn fetch(&self, pgno: PageId) -> CoreResult<Option<Page>> {
        Ok(self.state.lock().pages.get(&pgno.as_u32()).cloned())
    }

    fn fetch_or_create(&self, pgno: PageId) -> CoreResult<Page> {
        if pgno.is_invalid() {
            return Err(CoreError::invalid_operation(
                "cannot materialize the invalid page",
            ));
        }
        let mut state = self.state.lock();
        if let Some(page) = state.pages.get(&pgno.as_u32()) {
            return Ok(page.clone());
        }
        let page = Page::new(pgno, self.page_size);
        state.last_pgno = state.last_pgno.max(pgno.as_u32());
        state.pages.insert(pgno.as_u32(), page.clone());
        debug!(%pgno, "created fresh page");
        Ok(page)
    }

    fn put(&self, page: Page, dirty: bool) -> CoreResult<()> {
        let mut state = self.state.lock();
        let pgno = page.pgno.as_u32();
        if dirty {
            state.dirty.insert(pgno);
        }
        state.pages.insert(pgno, page);
        Ok(())
    }

    fn truncate(&self, from_pgno: PageId) -> CoreResult<()> {
        if !self.capabilities.can_truncate {
            return Err(CoreError::invalid_operation(
                "page store does not support truncation",
            ));
        }
        let mut state = self.state.lock();
        state.pages.retain(|&pgno, _| pgno < from_pgno.as_u32());
        state.dirty.retain(|&pgno| pgno < from_pgno.as_u32());
        state.free_list.retain(|&pgno| pgno < from_pgno.as_u32());
        state.last_pgno = state.last_pgno.min(from_pgno.as_u32().saturating_sub(1));
        debug!(%from_pgno, "truncated page store");
        Ok(())
    }

    fn free_pages(&self, start: PageId, num: u32) -> CoreResult<()> {
        let mut state = self.state.lock();
        for pgno in start.as_u32()..start.as_u32().saturating_add(num) {
            state.free_list.insert(pgno);
        }
        Ok(())
    }

    fn last_pgno(&self) -> CoreResult<PageId> {
        Ok(PageId::new(self.state.lock().last_pgno))
    }

    fn set_last_pgno(&self, pgno: PageId) -> CoreResult<()> {
        self.state.lock().last_pgno = pgno.as_u32();
        Ok(())
    }

    fn capabilities(&self) -> StorageCapabilities {
        self.capabilities
    }

    fn page_size(&self) -> usize {
        self.page_size
    }
}
