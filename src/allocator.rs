//! Per-mutator allocation frontend. Each thread owns one `ThreadAllocator`
//! that caches at most one page per size class and routes every request to
//! the small, medium, or large path by cell count. When a cached page runs
//! out, the allocator asks the shared [`Heap`] for another; page ownership
//! passes implicitly to the thread that received the page, and the heap
//! takes every page back at the next GC cycle.

use std::ptr::{null_mut, write_bytes};

use crate::constants::{bytes_to_cells, SMALL_PAGE_MAX_BLOCK_SIZE};
use crate::heap::Heap;
use crate::object::{
    array_allocation_size, object_allocation_size, ArrayHeader, HeapArray, HeapObject,
    ObjectHeader, TypeInfo,
};
use crate::page::medium::LARGE_PAGE_SIZE_THRESHOLD;
use crate::page::{MediumPage, SmallPage};

/// The cached-page table. It lives in its own box so the heap can hold a
/// stable pointer to it and wipe it during stop-the-world no matter where
/// the owning `ThreadAllocator` has moved.
pub(crate) struct PageCache {
    medium_page: *mut MediumPage,
    small_pages: [*mut SmallPage; SMALL_PAGE_MAX_BLOCK_SIZE + 1],
}

impl PageCache {
    fn new() -> PageCache {
        PageCache {
            medium_page: null_mut(),
            small_pages: [null_mut(); SMALL_PAGE_MAX_BLOCK_SIZE + 1],
        }
    }

    /// Forgets every cached page. The pages themselves stay on their
    /// stores' `used` stacks; only the shortcut pointers go away.
    pub(crate) fn clear(&mut self) {
        self.medium_page = null_mut();
        self.small_pages = [null_mut(); SMALL_PAGE_MAX_BLOCK_SIZE + 1];
    }
}

pub struct ThreadAllocator<'h> {
    heap: &'h Heap,
    cache: Box<PageCache>,
}

impl<'h> ThreadAllocator<'h> {
    pub fn new(heap: &'h Heap) -> ThreadAllocator<'h> {
        let mut cache = Box::new(PageCache::new());
        heap.register_cache(&mut *cache);
        ThreadAllocator { heap, cache }
    }

    /// Allocates and initializes a regular object: payload zeroed, GC word
    /// cleared, type pointer written. Never returns null; the process
    /// aborts if the OS runs out of memory.
    pub fn create_object(&mut self, type_info: &TypeInfo) -> *mut ObjectHeader {
        debug_assert!(!type_info.is_array(), "arrays go through create_array");
        let size = object_allocation_size(type_info);
        unsafe {
            let heap_object = self.alloc(size).cast::<HeapObject>();
            (*heap_object).object.type_info = type_info;
            &mut (*heap_object).object
        }
    }

    /// Allocates and initializes an array of `count` elements. The element
    /// size is the negated `instance_size` of the descriptor.
    pub fn create_array(&mut self, type_info: &TypeInfo, count: u32) -> *mut ArrayHeader {
        debug_assert!(type_info.is_array(), "objects go through create_object");
        let size = array_allocation_size(type_info, count);
        unsafe {
            let heap_array = self.alloc(size).cast::<HeapArray>();
            (*heap_array).array.type_info = type_info;
            (*heap_array).array.count = count;
            &mut (*heap_array).array
        }
    }

    /// Reclamation happens exclusively through sweep; an explicit free has
    /// nothing to do.
    pub fn free(block: *mut u64) {
        log::warn!(target: "alloc", "explicit free of {:p} ignored; blocks are reclaimed by sweep", block);
    }

    /// Drops every cached page reference. Called at a safepoint, either by
    /// the thread itself or by `Heap::prepare_for_gc` through the registry.
    pub fn prepare_for_gc(&mut self) {
        log::debug!(target: "alloc", "ThreadAllocator::prepare_for_gc()");
        self.cache.clear();
    }

    /// The only place where sizes are in bytes; everything below deals in
    /// cells.
    unsafe fn alloc(&mut self, size: u64) -> *mut u64 {
        log::trace!(target: "alloc", "ThreadAllocator::alloc({})", size);
        let cell_count = bytes_to_cells(size);
        let payload = self.allocate(cell_count);
        write_bytes(payload.cast::<u8>(), 0, size as usize);
        payload
    }

    unsafe fn allocate(&mut self, cell_count: u64) -> *mut u64 {
        if cell_count <= SMALL_PAGE_MAX_BLOCK_SIZE as u64 {
            self.allocate_in_small_page(cell_count as u32)
        } else if cell_count > LARGE_PAGE_SIZE_THRESHOLD as u64 {
            self.allocate_in_large_page(cell_count)
        } else {
            self.allocate_in_medium_page(cell_count as u32)
        }
    }

    unsafe fn allocate_in_small_page(&mut self, cell_count: u32) -> *mut u64 {
        let page = self.cache.small_pages[cell_count as usize];
        if !page.is_null() {
            let payload = (*page).try_allocate();
            if !payload.is_null() {
                return payload;
            }
        }
        // A page that cannot serve the request is simply dropped from the
        // cache; it already sits on the store's used stack and will be
        // revisited after the next GC.
        loop {
            let page = self.heap.get_small_page(cell_count as usize);
            let payload = (*page).try_allocate();
            if !payload.is_null() {
                self.cache.small_pages[cell_count as usize] = page;
                return payload;
            }
        }
    }

    unsafe fn allocate_in_medium_page(&mut self, cell_count: u32) -> *mut u64 {
        if !self.cache.medium_page.is_null() {
            let payload = (*self.cache.medium_page).try_allocate(cell_count);
            if !payload.is_null() {
                return payload;
            }
        }
        loop {
            let page = self.heap.get_medium_page(cell_count as usize);
            self.cache.medium_page = page;
            let payload = (*page).try_allocate(cell_count);
            if !payload.is_null() {
                return payload;
            }
        }
    }

    unsafe fn allocate_in_large_page(&mut self, cell_count: u64) -> *mut u64 {
        // Large pages are made to order and never cached or reused.
        let page = self.heap.get_large_page(cell_count as usize);
        (*page).try_allocate()
    }
}

impl Drop for ThreadAllocator<'_> {
    fn drop(&mut self) {
        self.heap.unregister_cache(&mut *self.cache);
    }
}
