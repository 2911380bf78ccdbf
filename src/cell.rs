use crate::constants::CELL_SIZE;

/// Header of a medium-page block, one cell wide. `size` counts cells and
/// includes the header itself, so `next()` lands on the following header
/// and a forward walk covers the page with no gaps.
#[repr(C)]
pub struct Cell {
    pub(crate) is_allocated: u32,
    pub(crate) size: u32,
}

const _: () = assert!(std::mem::size_of::<Cell>() == CELL_SIZE);

impl Cell {
    pub fn new(size: u32) -> Cell {
        Cell {
            is_allocated: 0,
            size,
        }
    }

    pub fn is_allocated(&self) -> bool {
        self.is_allocated != 0
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    /// Payload starts right after the header cell.
    pub fn data(&mut self) -> *mut u64 {
        unsafe { (self as *mut Cell).add(1).cast() }
    }

    pub fn next(&mut self) -> *mut Cell {
        unsafe { (self as *mut Cell).add(self.size as usize) }
    }

    /// Carves `cells_needed` cells (header included) off the tail of this
    /// block, or takes the block whole on an exact fit. Returns the payload
    /// pointer, or null if the block is allocated or too small. A split
    /// always leaves a remainder of at least one cell, so no zero-size
    /// header is ever written.
    pub unsafe fn try_allocate(&mut self, cells_needed: u32) -> *mut u64 {
        log::trace!(target: "alloc", "Cell {:p} {{ allocated: {}, size: {} }} try_allocate({})",
            self as *const Cell, self.is_allocated, self.size, cells_needed);
        if self.is_allocated() || cells_needed > self.size {
            return std::ptr::null_mut();
        }
        if cells_needed == self.size {
            self.is_allocated = 1;
            return self.data();
        }
        let remaining = self.size - cells_needed;
        let block = (self as *mut Cell).add(remaining as usize);
        self.size = remaining;
        (*block).is_allocated = 1;
        (*block).size = cells_needed;
        (*block).data()
    }

    /// Marks this block free again; sweep calls it for unmarked blocks.
    pub fn deallocate(&mut self) {
        assert!(self.is_allocated(), "deallocating a block that is not allocated");
        self.is_allocated = 0;
    }
}
