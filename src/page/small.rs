//! Fixed-size-class pages. Every block on a page has the same size, chosen
//! at page creation, and free blocks form a singly-linked list whose links
//! strictly increase in address. That ordering is what makes sweep cheap:
//! any block sitting between two consecutive free-list links is known to be
//! allocated.

use std::mem::size_of;
use std::ptr::null_mut;
use std::sync::atomic::AtomicPtr;

use crate::constants::{CELL_SIZE, SMALL_PAGE_MAX_BLOCK_SIZE, SMALL_PAGE_SIZE};
use crate::gc_api;
use crate::page::Page;
use crate::sync::StackNode;

/// One cell of a small page. A free cell stores the link to the next free
/// block; an allocated cell is the first word of its block's payload.
#[repr(C)]
pub struct SmallCell {
    next_free: *mut SmallCell,
}

#[repr(C)]
pub struct SmallPage {
    next: AtomicPtr<SmallPage>,
    block_size: u32,
    next_free: *mut SmallCell,
    cells: [SmallCell; 0],
}

pub const SMALL_PAGE_CELL_COUNT: usize =
    (SMALL_PAGE_SIZE - size_of::<SmallPage>()) / size_of::<SmallCell>();

const _: () = assert!(size_of::<SmallPage>() % CELL_SIZE == 0);

impl SmallCell {
    pub fn data(&mut self) -> *mut u64 {
        (self as *mut SmallCell).cast()
    }
}

impl SmallPage {
    pub unsafe fn create(block_size: u32) -> *mut SmallPage {
        log::debug!(target: "alloc", "SmallPage::create({})", block_size);
        assert!(
            block_size >= 1 && block_size as usize <= SMALL_PAGE_MAX_BLOCK_SIZE,
            "block size {} outside the small page classes",
            block_size
        );
        let page = gc_api::safe_alloc(SMALL_PAGE_SIZE as u64).cast::<SmallPage>();
        page.write(SmallPage {
            next: AtomicPtr::new(null_mut()),
            block_size,
            next_free: null_mut(),
            cells: [],
        });
        // Thread every aligned block position into the initial free list.
        // The last link deliberately points past the usable region; that is
        // the "no more blocks" marker try_allocate checks for.
        let cells = (*page).cells_mut();
        (*page).next_free = cells;
        let end = cells.add(SMALL_PAGE_CELL_COUNT + 1 - block_size as usize);
        let mut cell = cells;
        while cell < end {
            let link = cell.add(block_size as usize);
            (*cell).next_free = link;
            cell = link;
        }
        page
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    fn cells_mut(&mut self) -> *mut SmallCell {
        self.cells.as_mut_ptr()
    }

    /// O(1): takes the head of the free list, or returns null when the next
    /// link would not leave room for a whole block.
    pub unsafe fn try_allocate(&mut self) -> *mut u64 {
        let limit = self.cells_mut().add(SMALL_PAGE_CELL_COUNT);
        if self.next_free.add(self.block_size as usize) > limit {
            return null_mut();
        }
        let block = self.next_free;
        self.next_free = (*block).next_free;
        log::trace!(target: "alloc", "SmallPage {:p} {{{}}} try_allocate() = {:p}",
            self as *const SmallPage, self.block_size, block);
        (*block).data()
    }

    /// Walks blocks and free-list links in lockstep. Blocks sitting between
    /// two links are allocated: unmarked ones are spliced into the list
    /// right there, which keeps it address-sorted without any post-pass.
    pub unsafe fn sweep(&mut self) -> bool {
        log::debug!(target: "alloc-sweep", "SmallPage {:p} sweep()", self as *const SmallPage);
        let block_size = self.block_size as usize;
        let cells = self.cells_mut();
        // One past the last address a block may start at.
        let end = cells.add(SMALL_PAGE_CELL_COUNT + 1 - block_size);
        let mut alive = false;
        let mut block = cells;
        let mut next_free: *mut *mut SmallCell = &mut self.next_free;
        while block < end {
            while block != *next_free {
                if !gc_api::try_reset_mark((*block).data()) {
                    (*block).next_free = *next_free;
                    *next_free = block;
                    next_free = &mut (*block).next_free;
                } else {
                    alive = true;
                }
                block = block.add(block_size);
            }
            if block >= end {
                break;
            }
            next_free = &mut (*block).next_free;
            block = block.add(block_size);
        }
        alive
    }
}

impl StackNode for SmallPage {
    fn next_ptr(&self) -> &AtomicPtr<SmallPage> {
        &self.next
    }
}

impl Page for SmallPage {
    unsafe fn create(cell_count: usize) -> *mut SmallPage {
        SmallPage::create(cell_count as u32)
    }

    unsafe fn sweep(&mut self) -> bool {
        SmallPage::sweep(self)
    }
}
