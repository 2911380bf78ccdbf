pub mod large;
pub mod medium;
pub mod small;

pub use large::LargePage;
pub use medium::MediumPage;
pub use small::SmallPage;

use crate::gc_api;
use crate::sync::StackNode;

/// Capability set shared by the three page kinds so `PageStore` can manage
/// them with static dispatch: creation, sweeping, destruction, plus the
/// intrusive stack link from [`StackNode`].
pub trait Page: StackNode {
    /// Allocates and initializes a page able to serve a block of
    /// `cell_count` cells.
    unsafe fn create(cell_count: usize) -> *mut Self;

    /// Walks the page's blocks, reclaims unmarked ones and reports whether
    /// any survivor remains. Must be called by exactly one thread per page
    /// per GC cycle.
    unsafe fn sweep(&mut self) -> bool;

    /// Returns the page's memory to the OS. Only called during
    /// stop-the-world or from an exclusively owned `PageStore`.
    unsafe fn destroy(page: *mut Self) {
        gc_api::raw_free(page.cast());
    }
}
