//! A page-based heap allocator backing a concurrent mark-and-sweep garbage
//! collector.
//!
//! The allocator serves fixed-layout managed objects and arrays out of
//! 256 KiB pages and reclaims memory exclusively through sweeping; there is
//! no explicit free and no compaction, so payload addresses are stable for
//! an object's whole lifetime.
//!
//! # Size classes
//!
//! Requests are measured in 8-byte cells and routed three ways:
//!
//! * up to 128 cells — a [`page::SmallPage`], which serves blocks of one
//!   fixed size from an address-ordered free list;
//! * up to one page worth of cells — a [`page::MediumPage`], which packs
//!   header-prefixed variable blocks back to back and coalesces them
//!   during sweep;
//! * anything bigger — a [`page::LargePage`] holding that one allocation.
//!
//! # Who owns what
//!
//! Each mutator thread drives an [`allocator::ThreadAllocator`], which
//! caches at most one page per size class and performs wait-free
//! allocation within them. Pages come from the shared [`heap::Heap`],
//! which keeps them in per-class [`page_store::PageStore`]s — four
//! lock-free stacks tracking each page's position in the GC cycle
//! (`empty`/`ready`/`used`/`unswept`). The stacks are the only
//! synchronization in the crate: handing a page to a thread is a CAS pop,
//! and the store guarantees every page is owned by at most one thread at a
//! time and swept at most once per cycle.
//!
//! # GC protocol
//!
//! The collector suspends all mutators, calls [`heap::Heap::prepare_for_gc`]
//! (flushes thread caches, moves live pages to `unswept`, releases empty
//! pages), runs its mark phase, then calls [`heap::Heap::sweep`]. Mutators
//! resuming early help out by sweeping pages on demand when they request
//! one. The single hook back into the GC engine is
//! [`gc_api::try_reset_mark`].

pub mod allocator;
pub mod cell;
pub mod constants;
pub mod gc_api;
pub mod heap;
pub mod object;
pub mod page;
pub mod page_store;
pub mod sync;

pub use allocator::ThreadAllocator;
pub use gc_api::ObjectData;
pub use heap::Heap;
pub use object::{ArrayHeader, ObjectHeader, TypeInfo};
