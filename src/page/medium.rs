//! Variable-block pages. Blocks carry a one-cell [`Cell`] header and sit
//! back to back, so the headers alone describe the page layout. Allocation
//! carves from the tail of the block under `cur_block`; sweep deallocates,
//! coalesces adjacent free blocks, and repositions the cursor on the
//! largest free block it saw.

use std::mem::size_of;
use std::ptr::null_mut;
use std::sync::atomic::AtomicPtr;

use crate::cell::Cell;
use crate::constants::{CELL_SIZE, MEDIUM_PAGE_SIZE};
use crate::gc_api;
use crate::page::Page;
use crate::sync::StackNode;

#[repr(C)]
pub struct MediumPage {
    next: AtomicPtr<MediumPage>,
    cur_block: *mut Cell,
    // Dummy empty cell so cur_block never dangles when the page has no
    // free space at all.
    zero_block: Cell,
    cells: [Cell; 0],
}

pub const MEDIUM_PAGE_CELL_COUNT: usize =
    (MEDIUM_PAGE_SIZE - size_of::<MediumPage>()) / CELL_SIZE;

/// Largest cell count served from a medium page; bigger requests get a page
/// of their own.
pub const LARGE_PAGE_SIZE_THRESHOLD: usize = MEDIUM_PAGE_CELL_COUNT - 1;

const _: () = assert!(size_of::<MediumPage>() % CELL_SIZE == 0);

impl MediumPage {
    pub unsafe fn create(cell_count: u32) -> *mut MediumPage {
        log::debug!(target: "alloc", "MediumPage::create({})", cell_count);
        assert!(
            (cell_count as usize) < MEDIUM_PAGE_CELL_COUNT,
            "cell count {} does not fit a medium page",
            cell_count
        );
        let page = gc_api::safe_alloc(MEDIUM_PAGE_SIZE as u64).cast::<MediumPage>();
        page.write(MediumPage {
            next: AtomicPtr::new(null_mut()),
            cur_block: null_mut(),
            zero_block: Cell::new(0),
            cells: [],
        });
        let cells = (*page).cells_mut();
        cells.write(Cell::new(MEDIUM_PAGE_CELL_COUNT as u32));
        (*page).cur_block = cells;
        page
    }

    fn cells_mut(&mut self) -> *mut Cell {
        self.cells.as_mut_ptr()
    }

    unsafe fn cells_end(&mut self) -> *mut Cell {
        self.cells_mut().add(MEDIUM_PAGE_CELL_COUNT)
    }

    fn zero_block(&mut self) -> *mut Cell {
        &mut self.zero_block
    }

    /// Tries the cursor block first, then rescans for a fitting block and
    /// retries once. Returns the payload pointer or null if no free block
    /// on the page can hold `block_size` cells plus the header.
    pub unsafe fn try_allocate(&mut self, block_size: u32) -> *mut u64 {
        // The header occupies one more cell in front of the payload.
        let cells_needed = block_size + 1;
        let payload = (*self.cur_block).try_allocate(cells_needed);
        if !payload.is_null() {
            return payload;
        }
        self.update_cur_block(cells_needed);
        (*self.cur_block).try_allocate(cells_needed)
    }

    /// Repositions `cur_block`: scans forward from the cursor, wrapping
    /// around to the start of the page, and stops early at the first free
    /// block that fits. If none fits, the cursor lands on the largest free
    /// block seen (possibly the zero sentinel).
    unsafe fn update_cur_block(&mut self, cells_needed: u32) {
        log::trace!(target: "alloc", "MediumPage {:p} update_cur_block({})",
            self as *const MediumPage, cells_needed);
        if self.cur_block == self.zero_block() {
            self.cur_block = self.cells_mut();
        }
        let start = self.cur_block;
        let end = self.cells_end();
        let mut max_block = self.zero_block();

        let mut cell = start;
        while cell < end {
            if !(*cell).is_allocated() && (*cell).size() > (*max_block).size() {
                max_block = cell;
                if (*cell).size() >= cells_needed {
                    self.cur_block = cell;
                    return;
                }
            }
            cell = (*cell).next();
        }
        let mut cell = self.cells_mut();
        while cell < start {
            if !(*cell).is_allocated() && (*cell).size() > (*max_block).size() {
                max_block = cell;
                if (*cell).size() >= cells_needed {
                    self.cur_block = cell;
                    return;
                }
            }
            cell = (*cell).next();
        }
        self.cur_block = max_block;
    }

    pub unsafe fn sweep(&mut self) -> bool {
        log::debug!(target: "alloc-sweep", "MediumPage {:p} sweep()", self as *const MediumPage);
        let end = self.cells_end();
        let mut alive = false;
        let mut cell = self.cells_mut();
        while cell < end {
            if (*cell).is_allocated() {
                if gc_api::try_reset_mark((*cell).data()) {
                    alive = true;
                } else {
                    (*cell).deallocate();
                }
            }
            cell = (*cell).next();
        }
        // Second walk: merge runs of free blocks and remember the largest.
        let mut max_block = self.zero_block();
        let mut cell = self.cells_mut();
        while cell < end {
            if !(*cell).is_allocated() {
                loop {
                    let next = (*cell).next();
                    if next == end || (*next).is_allocated() {
                        break;
                    }
                    (*cell).size += (*next).size;
                }
                if (*cell).size() > (*max_block).size() {
                    max_block = cell;
                }
            }
            cell = (*cell).next();
        }
        self.cur_block = max_block;
        alive
    }

    /// Forward walk must visit strictly increasing headers and end exactly
    /// on the page boundary; used by tests after every mutation.
    pub unsafe fn check_invariants(&mut self) -> bool {
        let cells = self.cells_mut();
        let end = self.cells_end();
        if self.cur_block != self.zero_block() && (self.cur_block < cells || self.cur_block >= end)
        {
            return false;
        }
        let mut cell = cells;
        loop {
            let next = (*cell).next();
            if next <= cell || next > end {
                return false;
            }
            if next == end {
                return true;
            }
            cell = next;
        }
    }
}

impl StackNode for MediumPage {
    fn next_ptr(&self) -> &AtomicPtr<MediumPage> {
        &self.next
    }
}

impl Page for MediumPage {
    unsafe fn create(cell_count: usize) -> *mut MediumPage {
        MediumPage::create(cell_count as u32)
    }

    unsafe fn sweep(&mut self) -> bool {
        MediumPage::sweep(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gc_api::ObjectData;

    unsafe fn mark(payload: *mut u64) {
        (*payload.cast::<ObjectData>()).set_marked();
    }

    unsafe fn alloc(page: *mut MediumPage, block_size: u32) -> *mut u64 {
        let payload = (*page).try_allocate(block_size);
        if !payload.is_null() {
            std::ptr::write_bytes(payload, 0, block_size as usize);
        }
        payload
    }

    unsafe fn destroy(page: *mut MediumPage) {
        Page::destroy(page);
    }

    unsafe fn sum_of_sizes(page: *mut MediumPage) -> usize {
        let end = (*page).cells_end();
        let mut cell = (*page).cells_mut();
        let mut total = 0usize;
        while cell < end {
            assert!((*cell).size() >= 1);
            total += (*cell).size() as usize;
            cell = (*cell).next();
        }
        total
    }

    #[test]
    fn page_header_is_three_cells() {
        assert_eq!(size_of::<MediumPage>(), 24);
        assert_eq!(MEDIUM_PAGE_CELL_COUNT, (MEDIUM_PAGE_SIZE - 24) / 8);
    }

    #[test]
    fn fresh_page_is_one_free_block() {
        unsafe {
            let page = MediumPage::create(256);
            assert!((*page).check_invariants());
            assert_eq!(sum_of_sizes(page), MEDIUM_PAGE_CELL_COUNT);
            destroy(page);
        }
    }

    #[test]
    fn allocations_preserve_the_block_chain() {
        unsafe {
            let page = MediumPage::create(256);
            for _ in 0..32 {
                assert!(!alloc(page, 256).is_null());
                assert!((*page).check_invariants());
                assert_eq!(sum_of_sizes(page), MEDIUM_PAGE_CELL_COUNT);
            }
            destroy(page);
        }
    }

    #[test]
    fn fill_page_then_allocation_fails() {
        unsafe {
            let page = MediumPage::create(200);
            let mut count = 0usize;
            while !alloc(page, 200).is_null() {
                count += 1;
            }
            // 201 cells per block, header included.
            assert_eq!(count, MEDIUM_PAGE_CELL_COUNT / 201);
            assert!((*page).check_invariants());
            destroy(page);
        }
    }

    #[test]
    fn sweep_of_untouched_page_reports_dead() {
        unsafe {
            let page = MediumPage::create(129);
            assert!(!(*page).sweep());
            assert!((*page).check_invariants());
            assert_eq!(sum_of_sizes(page), MEDIUM_PAGE_CELL_COUNT);
            destroy(page);
        }
    }

    #[test]
    fn sweep_without_marks_recovers_the_whole_page() {
        unsafe {
            let page = MediumPage::create(300);
            while !alloc(page, 300).is_null() {}
            assert!(!(*page).sweep());
            // Everything coalesced back into a single block.
            assert_eq!(sum_of_sizes(page), MEDIUM_PAGE_CELL_COUNT);
            assert!(!alloc(page, (MEDIUM_PAGE_CELL_COUNT - 1) as u32).is_null());
            destroy(page);
        }
    }

    #[test]
    fn marked_blocks_survive_sweep_in_place() {
        unsafe {
            let page = MediumPage::create(150);
            let a = alloc(page, 150);
            let b = alloc(page, 150);
            let c = alloc(page, 150);
            mark(b);
            *b.add(1) = 0x5eed;
            assert!((*page).sweep());
            assert!((*page).check_invariants());
            // b kept its address and contents; a and c were reclaimed.
            assert_eq!(*b.add(1), 0x5eed);
            let _ = (a, c);
            let header = b.cast::<Cell>().sub(1);
            assert!((*header).is_allocated());
            destroy(page);
        }
    }

    #[test]
    fn coalescing_merges_adjacent_free_blocks() {
        unsafe {
            let block_size = 10u32;
            let page = MediumPage::create(block_size);
            let mut payloads = Vec::new();
            loop {
                let payload = alloc(page, block_size);
                if payload.is_null() {
                    break;
                }
                payloads.push(payload);
            }
            // Mark every third block: the two unmarked blocks between two
            // survivors coalesce into 22 cells, while a single freed block
            // is only 11. A doubled allocation fits only if coalescing
            // worked.
            for (i, &payload) in payloads.iter().enumerate() {
                if i % 3 == 0 {
                    mark(payload);
                }
            }
            assert!((*page).sweep());
            assert!((*page).check_invariants());
            assert_eq!(sum_of_sizes(page), MEDIUM_PAGE_CELL_COUNT);
            assert!(!alloc(page, block_size * 2).is_null());
            destroy(page);
        }
    }

    #[test]
    fn cursor_wraps_around_to_reuse_early_gaps() {
        unsafe {
            let block_size = 100u32;
            let page = MediumPage::create(block_size);
            let mut payloads = Vec::new();
            loop {
                let payload = alloc(page, block_size);
                if payload.is_null() {
                    break;
                }
                payloads.push(payload);
            }
            // Blocks are carved from the tail, so low indices sit at high
            // addresses. Leave a double gap near the top (indices 1, 2) and
            // a single gap in the middle (index 150); mark everything else.
            for (i, &payload) in payloads.iter().enumerate() {
                if i != 1 && i != 2 && i != 150 {
                    mark(payload);
                }
            }
            assert!((*page).sweep());
            assert!((*page).check_invariants());
            // The cursor starts on the double gap, the largest free block.
            // Two allocations exhaust it.
            assert!(!alloc(page, block_size).is_null());
            assert!(!alloc(page, block_size).is_null());
            // Nothing fits above the cursor anymore; the next allocation
            // only succeeds by wrapping to the middle gap below it.
            let wrapped = alloc(page, block_size);
            assert_eq!(wrapped, payloads[150]);
            assert!(alloc(page, block_size).is_null());
            assert!((*page).check_invariants());
            destroy(page);
        }
    }
}
