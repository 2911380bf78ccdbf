//! Single-allocation pages. The page is the block: a header row followed by
//! the payload. These are never reused; a dead large page is destroyed at
//! the next GC cycle.

use std::mem::size_of;
use std::ptr::null_mut;
use std::sync::atomic::AtomicPtr;

use crate::constants::CELL_SIZE;
use crate::gc_api;
use crate::page::medium::LARGE_PAGE_SIZE_THRESHOLD;
use crate::page::Page;
use crate::sync::StackNode;

#[repr(C)]
pub struct LargePage {
    next: AtomicPtr<LargePage>,
    is_allocated: bool,
}

const _: () = assert!(size_of::<LargePage>() % CELL_SIZE == 0);

impl LargePage {
    pub unsafe fn create(cell_count: usize) -> *mut LargePage {
        log::debug!(target: "alloc", "LargePage::create({})", cell_count);
        assert!(
            cell_count > LARGE_PAGE_SIZE_THRESHOLD,
            "cell count {} belongs in a small or medium page",
            cell_count
        );
        let size = size_of::<LargePage>() as u64 + cell_count as u64 * CELL_SIZE as u64;
        let page = gc_api::safe_alloc(size).cast::<LargePage>();
        page.write(LargePage {
            next: AtomicPtr::new(null_mut()),
            is_allocated: false,
        });
        page
    }

    pub fn data(&mut self) -> *mut u64 {
        unsafe { (self as *mut LargePage).add(1).cast() }
    }

    /// Called exactly once over the page's lifetime: the page serves a
    /// single allocation and is never reused after sweep.
    pub unsafe fn try_allocate(&mut self) -> *mut u64 {
        if self.is_allocated {
            return null_mut();
        }
        self.is_allocated = true;
        self.data()
    }

    pub unsafe fn sweep(&mut self) -> bool {
        log::debug!(target: "alloc-sweep", "LargePage {:p} sweep()", self as *const LargePage);
        if !gc_api::try_reset_mark(self.data()) {
            self.is_allocated = false;
            return false;
        }
        true
    }
}

impl StackNode for LargePage {
    fn next_ptr(&self) -> &AtomicPtr<LargePage> {
        &self.next
    }
}

impl Page for LargePage {
    unsafe fn create(cell_count: usize) -> *mut LargePage {
        LargePage::create(cell_count)
    }

    unsafe fn sweep(&mut self) -> bool {
        LargePage::sweep(self)
    }
}
