//! The process-wide allocation space: one page store per small size class,
//! one for medium pages, one for large pages, plus the registry of
//! per-thread page caches that must be flushed when a GC cycle starts.

use parking_lot::Mutex;

use crate::allocator::PageCache;
use crate::constants::SMALL_PAGE_MAX_BLOCK_SIZE;
use crate::page::{LargePage, MediumPage, SmallPage};
use crate::page_store::PageStore;

pub struct Heap {
    // Indexed by block size in cells; index 0 is never requested.
    small_pages: [PageStore<SmallPage>; SMALL_PAGE_MAX_BLOCK_SIZE + 1],
    medium_pages: PageStore<MediumPage>,
    large_pages: PageStore<LargePage>,
    caches: Mutex<Vec<*mut PageCache>>,
}

// The stores are lock-free and the registry is behind a Mutex; the raw
// cache pointers are only dereferenced during stop-the-world, which is the
// caller's contract on prepare_for_gc.
unsafe impl Send for Heap {}
unsafe impl Sync for Heap {}

impl Heap {
    pub fn new() -> Heap {
        Heap {
            small_pages: std::array::from_fn(|_| PageStore::new()),
            medium_pages: PageStore::new(),
            large_pages: PageStore::new(),
            caches: Mutex::new(Vec::new()),
        }
    }

    /// Flushes every registered thread cache and moves all live pages into
    /// the unswept stacks; pages that were empty since the last cycle go
    /// back to the OS.
    ///
    /// # Safety
    ///
    /// Must be called by the GC driver after every mutator has been
    /// suspended at a safepoint, and must not race with `sweep`.
    pub unsafe fn prepare_for_gc(&self) {
        log::debug!(target: "alloc", "Heap::prepare_for_gc()");
        for &cache in self.caches.lock().iter() {
            (*cache).clear();
        }
        self.medium_pages.prepare_for_gc();
        self.large_pages.prepare_for_gc();
        for store in self.small_pages.iter() {
            store.prepare_for_gc();
        }
    }

    /// Sweeps every page left in the unswept stacks. May be called from
    /// several sweep workers at once; each page is handled by exactly one.
    ///
    /// # Safety
    ///
    /// Must follow `prepare_for_gc` and the mark phase within the same
    /// stop-the-world window.
    pub unsafe fn sweep(&self) {
        log::debug!(target: "alloc", "Heap::sweep()");
        for store in self.small_pages.iter() {
            store.sweep();
        }
        self.medium_pages.sweep();
        self.large_pages.sweep();
    }

    pub(crate) unsafe fn get_small_page(&self, cell_count: usize) -> *mut SmallPage {
        log::trace!(target: "alloc", "Heap::get_small_page({})", cell_count);
        self.small_pages[cell_count].get_page(cell_count)
    }

    pub(crate) unsafe fn get_medium_page(&self, cell_count: usize) -> *mut MediumPage {
        log::trace!(target: "alloc", "Heap::get_medium_page({})", cell_count);
        self.medium_pages.get_page(cell_count)
    }

    pub(crate) unsafe fn get_large_page(&self, cell_count: usize) -> *mut LargePage {
        log::trace!(target: "alloc", "Heap::get_large_page({})", cell_count);
        self.large_pages.new_page(cell_count)
    }

    pub(crate) fn register_cache(&self, cache: *mut PageCache) {
        self.caches.lock().push(cache);
    }

    pub(crate) fn unregister_cache(&self, cache: *mut PageCache) {
        let mut caches = self.caches.lock();
        if let Some(index) = caches.iter().position(|&c| c == cache) {
            caches.swap_remove(index);
        }
    }
}

impl Default for Heap {
    fn default() -> Heap {
        Heap::new()
    }
}
