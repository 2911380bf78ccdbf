//! Lifecycle bookkeeping for one page class. Every page lives on exactly
//! one of four stacks:
//!
//! * `empty`   — swept, no survivors; freed to the OS at the next GC.
//! * `ready`   — swept with survivors, available for allocation.
//! * `used`    — handed to some mutator this cycle (possibly discarded as
//!               full); revisited at the next GC.
//! * `unswept` — not yet swept since the last `prepare_for_gc`.
//!
//! `unswept` is populated only during stop-the-world and drained by CAS
//! pops afterwards, so each page is swept by exactly one thread, whether
//! that is the GC driver inside [`PageStore::sweep`] or a mutator sweeping
//! on demand inside [`PageStore::get_page`].

use std::ptr::null_mut;

use crate::page::Page;
use crate::sync::AtomicStack;

pub struct PageStore<T: Page> {
    empty: AtomicStack<T>,
    ready: AtomicStack<T>,
    used: AtomicStack<T>,
    unswept: AtomicStack<T>,
}

impl<T: Page> PageStore<T> {
    pub const fn new() -> PageStore<T> {
        PageStore {
            empty: AtomicStack::new(),
            ready: AtomicStack::new(),
            used: AtomicStack::new(),
            unswept: AtomicStack::new(),
        }
    }

    /// Moves every live page into `unswept` and returns the pages that had
    /// no survivors last cycle to the OS.
    ///
    /// # Safety
    ///
    /// Stop-the-world only: no mutator may be allocating, and no other
    /// thread may pop from any of this store's stacks during the call.
    pub unsafe fn prepare_for_gc(&self) {
        self.unswept.transfer_all_from(&self.ready);
        self.unswept.transfer_all_from(&self.used);
        loop {
            let page = self.empty.pop();
            if page.is_null() {
                break;
            }
            log::debug!(target: "alloc", "releasing empty page {:p}", page);
            T::destroy(page);
        }
    }

    /// Drains `unswept`, sorting pages into `ready` (survivors) or `empty`
    /// (none). Multiple threads may call this concurrently; the CAS pop
    /// hands each page to exactly one of them.
    ///
    /// # Safety
    ///
    /// Must only run between `prepare_for_gc` and the end of the GC cycle,
    /// after the mark phase has settled every mark bit.
    pub unsafe fn sweep(&self) {
        while !self.sweep_and_move(&self.unswept, &self.ready).is_null() {}
    }

    /// Pops pages off `from` until one survives sweeping; that page is
    /// pushed to `to` and returned. Dead pages are parked on `empty`.
    unsafe fn sweep_and_move(&self, from: &AtomicStack<T>, to: &AtomicStack<T>) -> *mut T {
        loop {
            let page = from.pop();
            if page.is_null() {
                return null_mut();
            }
            if (*page).sweep() {
                to.push(page);
                return page;
            }
            log::trace!(target: "alloc-sweep", "page {:p} is empty after sweep", page);
            self.empty.push(page);
        }
    }

    /// Hands out a page for allocation, preferring work that is already
    /// paid for: sweep a leftover page on demand, then reuse a swept one,
    /// then resurrect an empty one, and only then create a new page. The
    /// returned page is already on `used`.
    ///
    /// # Safety
    ///
    /// Caller must be a registered mutator outside stop-the-world; popped
    /// pages are never freed before the next safepoint, which is what makes
    /// the concurrent pops sound.
    pub unsafe fn get_page(&self, cell_count: usize) -> *mut T {
        let page = self.sweep_and_move(&self.unswept, &self.used);
        if !page.is_null() {
            return page;
        }
        let page = self.ready.pop();
        if !page.is_null() {
            self.used.push(page);
            return page;
        }
        let page = self.empty.pop();
        if !page.is_null() {
            self.used.push(page);
            return page;
        }
        self.new_page(cell_count)
    }

    /// Unconditionally creates a page; the large-object path always takes
    /// this route because large pages are never reused.
    pub unsafe fn new_page(&self, cell_count: usize) -> *mut T {
        let page = T::create(cell_count);
        self.used.push(page);
        page
    }

    /// `[empty, ready, used, unswept]` stack lengths, for test assertions.
    #[cfg(test)]
    pub(crate) unsafe fn stack_sizes(&self) -> [usize; 4] {
        [
            self.empty.len(),
            self.ready.len(),
            self.used.len(),
            self.unswept.len(),
        ]
    }
}

impl<T: Page> Drop for PageStore<T> {
    fn drop(&mut self) {
        unsafe {
            for stack in [&self.empty, &self.ready, &self.used, &self.unswept] {
                loop {
                    let page = stack.pop();
                    if page.is_null() {
                        break;
                    }
                    T::destroy(page);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::Rng;

    use super::*;
    use crate::gc_api::ObjectData;
    use crate::page::small::SMALL_PAGE_CELL_COUNT;
    use crate::page::SmallPage;

    unsafe fn mark(payload: *mut u64) {
        (*payload.cast::<ObjectData>()).set_marked();
    }

    unsafe fn alloc(page: *mut SmallPage) -> *mut u64 {
        let payload = (*page).try_allocate();
        assert!(!payload.is_null());
        std::ptr::write_bytes(payload, 0, (*page).block_size() as usize);
        payload
    }

    #[test]
    fn get_page_creates_and_tracks_in_used() {
        let store: PageStore<SmallPage> = PageStore::new();
        unsafe {
            let page = store.get_page(2);
            assert!(!page.is_null());
            assert_eq!(store.used.len(), 1);
            assert!(store.ready.is_empty());
            assert!(store.empty.is_empty());
            assert!(store.unswept.is_empty());
        }
    }

    #[test]
    fn gc_cycle_moves_live_pages_back_to_ready() {
        let store: PageStore<SmallPage> = PageStore::new();
        unsafe {
            let page = store.get_page(2);
            let payload = alloc(page);
            mark(payload);

            store.prepare_for_gc();
            assert!(store.used.is_empty());
            assert_eq!(store.unswept.len(), 1);

            store.sweep();
            assert!(store.unswept.is_empty());
            assert_eq!(store.ready.len(), 1);
            assert!(store.empty.is_empty());
        }
    }

    #[test]
    fn dead_pages_park_on_empty_then_get_released() {
        let store: PageStore<SmallPage> = PageStore::new();
        unsafe {
            let page = store.get_page(2);
            alloc(page);

            store.prepare_for_gc();
            store.sweep();
            assert!(store.ready.is_empty());
            assert_eq!(store.empty.len(), 1);

            // Still reusable before the next GC releases it.
            let reused = store.get_page(2);
            assert_eq!(reused, page);
            assert_eq!(store.used.len(), 1);
            assert!(store.empty.is_empty());

            // Without marks the page dies again; the next prepare frees it.
            store.prepare_for_gc();
            store.sweep();
            assert_eq!(store.empty.len(), 1);
            store.prepare_for_gc();
            assert!(store.empty.is_empty());
            assert!(store.unswept.is_empty());
        }
    }

    #[test]
    fn get_page_sweeps_on_demand() {
        let store: PageStore<SmallPage> = PageStore::new();
        unsafe {
            let page = store.get_page(2);
            let payload = alloc(page);
            mark(payload);
            store.prepare_for_gc();

            // No explicit sweep: the mutator-facing path claims the page by
            // sweeping it itself.
            let swept = store.get_page(2);
            assert_eq!(swept, page);
            assert!(store.unswept.is_empty());
            assert_eq!(store.used.len(), 1);
        }
    }

    #[test]
    fn every_page_sits_on_exactly_one_stack() {
        let store: PageStore<SmallPage> = PageStore::new();
        unsafe {
            let mut rng = rand::thread_rng();
            let block_size = 4u32;
            let mut pages = Vec::new();
            for _ in 0..5 {
                let page = store.get_page(block_size as usize);
                pages.push(page);
                // Random survivor pattern; page 0 stays entirely unmarked.
                if pages.len() > 1 {
                    for _ in 0..SMALL_PAGE_CELL_COUNT / block_size as usize / 4 {
                        let payload = alloc(page);
                        if rng.gen_bool(0.5) {
                            mark(payload);
                        }
                    }
                }
            }
            let total = pages.len();
            assert_eq!(store.used.len(), total);

            store.prepare_for_gc();
            assert_eq!(store.unswept.len(), total);
            assert!(store.used.is_empty() && store.ready.is_empty() && store.empty.is_empty());

            store.sweep();
            assert_eq!(store.ready.len() + store.empty.len(), total);
            assert!(store.unswept.is_empty() && store.used.is_empty());
            // Page 0 had no survivors.
            assert!(store.empty.len() >= 1);
        }
    }
}
