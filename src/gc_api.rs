//! The narrow interface between the allocator and its embedding GC engine:
//! the per-object GC word, the mark predicate consulted by sweep, and the
//! byte-granular OS allocation primitives.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::object::ObjectHeader;

/// GC-owned word placed immediately before every managed object. The mark
/// phase sets it through an external object graph; sweep consumes it through
/// [`try_reset_mark`]. A zeroed word means unmarked, which is what freshly
/// allocated payloads start out as.
#[repr(transparent)]
pub struct ObjectData {
    mark_word: AtomicU64,
}

impl ObjectData {
    pub fn is_marked(&self) -> bool {
        self.mark_word.load(Ordering::Acquire) != 0
    }

    pub fn set_marked(&self) {
        self.mark_word.store(1, Ordering::Release);
    }

    /// Atomically clears the mark bit, reporting whether it was set.
    pub fn try_reset_mark(&self) -> bool {
        self.mark_word.swap(0, Ordering::AcqRel) != 0
    }
}

/// Tests whether the object at `payload` survived the mark phase, clearing
/// its mark bit either way. Sweep reclaims the block when this returns false.
///
/// Finalizers are not run by the allocator. A reclaimed object whose type
/// requests one is reported and dropped; finalization queues belong to the
/// GC engine.
///
/// # Safety
///
/// `payload` must point at a block whose first word is the [`ObjectData`]
/// and whose second word, if the block was handed to a mutator, is an
/// [`ObjectHeader`]. The caller must be the sole sweeper of the page.
pub unsafe fn try_reset_mark(payload: *mut u64) -> bool {
    let object_data = payload.cast::<ObjectData>();
    if (*object_data).try_reset_mark() {
        return true;
    }
    let header = object_data.add(1).cast::<ObjectHeader>();
    let type_info = (*header).type_info;
    if !type_info.is_null() && (*type_info).has_finalizer() {
        log::warn!(target: "alloc-sweep", "reclaiming finalizable object at {:p} without running its finalizer", payload);
    }
    false
}

/// Allocates `size` bytes from the OS. Never returns null: running out of
/// backing memory aborts the process, since the mutators cannot make
/// progress without it.
pub unsafe fn safe_alloc(size: u64) -> *mut u8 {
    if size <= usize::MAX as u64 {
        let memory = libc::malloc(size as usize);
        if !memory.is_null() {
            return memory.cast();
        }
    }
    eprintln!("out of memory allocating {} bytes, aborting", size);
    std::process::abort();
}

/// Returns a page obtained from [`safe_alloc`] to the OS.
///
/// # Safety
///
/// `ptr` must come from [`safe_alloc`] and no live reference into the page
/// may remain. The page lifecycle guarantees this by only freeing during
/// stop-the-world.
pub unsafe fn raw_free(ptr: *mut u8) {
    libc::free(ptr.cast());
}
