//! Managed object and array layouts as the allocator sees them: the GC word,
//! the type pointer, and the size arithmetic that turns a type descriptor
//! into a block size in bytes.

use std::mem::size_of;

use crate::constants::{align_up, OBJECT_ALIGNMENT};
use crate::gc_api::ObjectData;

pub const TYPE_FLAG_HAS_FINALIZER: u32 = 1 << 0;

/// Type descriptor supplied by the embedder. For regular objects
/// `instance_size` is the full object size including the header; for arrays
/// it is the negated element size.
#[repr(C)]
#[derive(Debug)]
pub struct TypeInfo {
    pub instance_size: i32,
    pub flags: u32,
}

impl TypeInfo {
    pub const fn object(instance_size: i32) -> TypeInfo {
        TypeInfo { instance_size, flags: 0 }
    }

    pub const fn array(element_size: i32) -> TypeInfo {
        TypeInfo { instance_size: -element_size, flags: 0 }
    }

    pub fn is_array(&self) -> bool {
        self.instance_size < 0
    }

    pub fn element_size(&self) -> u64 {
        debug_assert!(self.is_array());
        (-(self.instance_size as i64)) as u64
    }

    pub fn has_finalizer(&self) -> bool {
        self.flags & TYPE_FLAG_HAS_FINALIZER != 0
    }
}

#[repr(C)]
pub struct ObjectHeader {
    pub type_info: *const TypeInfo,
}

#[repr(C)]
pub struct ArrayHeader {
    pub type_info: *const TypeInfo,
    pub count: u32,
}

/// A regular object as it sits in a block: GC word, then the object itself.
/// The object header is what mutators hold pointers to.
#[repr(C)]
pub struct HeapObject {
    pub gc_data: ObjectData,
    pub object: ObjectHeader,
}

#[repr(C)]
pub struct HeapArray {
    pub gc_data: ObjectData,
    pub array: ArrayHeader,
}

impl HeapObject {
    /// Recovers the block a mutator-visible object pointer lives in.
    ///
    /// # Safety
    ///
    /// `object` must have been returned by `ThreadAllocator::create_object`.
    pub unsafe fn from_object(object: *mut ObjectHeader) -> *mut HeapObject {
        object.cast::<u8>().sub(size_of::<ObjectData>()).cast()
    }
}

impl HeapArray {
    /// # Safety
    ///
    /// `array` must have been returned by `ThreadAllocator::create_array`.
    pub unsafe fn from_array(array: *mut ArrayHeader) -> *mut HeapArray {
        array.cast::<u8>().sub(size_of::<ObjectData>()).cast()
    }
}

/// Bytes needed for an instance of `type_info`, GC word included.
pub fn object_allocation_size(type_info: &TypeInfo) -> u64 {
    debug_assert!(!type_info.is_array());
    debug_assert!(type_info.instance_size as usize >= size_of::<ObjectHeader>());
    let members_size = type_info.instance_size as u64 - size_of::<ObjectHeader>() as u64;
    align_up(
        size_of::<HeapObject>() as u64 + members_size,
        OBJECT_ALIGNMENT as u64,
    )
}

/// Bytes needed for an array of `count` elements. The element size is capped
/// by `i32::MIN` and the count by `u32::MAX`, so the product fits a u64 with
/// room to spare.
pub fn array_allocation_size(type_info: &TypeInfo, count: u32) -> u64 {
    debug_assert!(type_info.is_array());
    let members_size = type_info.element_size() * count as u64;
    align_up(
        size_of::<HeapArray>() as u64 + members_size,
        OBJECT_ALIGNMENT as u64,
    )
}
