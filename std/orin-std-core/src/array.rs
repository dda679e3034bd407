//!
//! Runtime Array Type
//!
//! Heap-allocated, reference-counted arrays of i64 slots. Arrays are
//! generic over element type at the orin level; at runtime every element
//! is a 64-bit value (an inline primitive or a pointer).
//!

use std::alloc::{alloc, dealloc, realloc, Layout};

use crate::value::{HeapHeader, HeapTag};

#[repr(C)]
pub struct OrinArray {
    pub header: HeapHeader,
    pub len: usize,
    pub capacity: usize,
    pub data: *mut i64,
}

/// Create a new empty array with the given initial capacity
#[unsafe(no_mangle)]
pub unsafe extern "C" fn orin_array_new(capacity: usize) -> *mut OrinArray {
    unsafe {
        let layout = Layout::new::<OrinArray>();
        let ptr = alloc(layout) as *mut OrinArray;
        if ptr.is_null() {
            panic!("Failed to allocate array");
        }

        let cap = if capacity == 0 { 4 } else { capacity };
        let data_layout = Layout::array::<i64>(cap).unwrap();
        let data = alloc(data_layout) as *mut i64;
        if data.is_null() {
            dealloc(ptr as *mut u8, layout);
            panic!("Failed to allocate array data");
        }

        (*ptr).header = HeapHeader::new(HeapTag::Array);
        (*ptr).len = 0;
        (*ptr).capacity = cap;
        (*ptr).data = data;

        ptr
    }
}

/// Append a value, growing the backing storage when full
#[unsafe(no_mangle)]
pub unsafe extern "C" fn orin_array_push(arr: *mut OrinArray, value: i64) {
    if arr.is_null() {
        return;
    }
    unsafe {
        if (*arr).len == (*arr).capacity {
            let old_layout = Layout::array::<i64>((*arr).capacity).unwrap();
            let new_cap = (*arr).capacity * 2;
            let new_size = Layout::array::<i64>(new_cap).unwrap().size();
            let data = realloc((*arr).data as *mut u8, old_layout, new_size) as *mut i64;
            if data.is_null() {
                panic!("Failed to grow array");
            }
            (*arr).data = data;
            (*arr).capacity = new_cap;
        }
        *(*arr).data.add((*arr).len) = value;
        (*arr).len += 1;
    }
}

/// Get the element at `index`, or 0 when out of range
#[unsafe(no_mangle)]
pub unsafe extern "C" fn orin_array_get(arr: *const OrinArray, index: i64) -> i64 {
    if arr.is_null() {
        return 0;
    }
    unsafe {
        if index < 0 || index as usize >= (*arr).len {
            return 0;
        }
        *(*arr).data.add(index as usize)
    }
}

/// Get array length
#[unsafe(no_mangle)]
pub unsafe extern "C" fn orin_array_len(arr: *const OrinArray) -> i64 {
    if arr.is_null() {
        0
    } else {
        unsafe { (*arr).len as i64 }
    }
}

/// Increment reference count
#[unsafe(no_mangle)]
pub unsafe extern "C" fn orin_array_incref(arr: *mut OrinArray) {
    if !arr.is_null() {
        unsafe {
            (*arr).header.incref();
        }
    }
}

/// Decrement reference count and free if zero. Elements are not visited;
/// the interpreter decrefs pointer elements before releasing the array.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn orin_array_decref(arr: *mut OrinArray) {
    if !arr.is_null() {
        unsafe {
            if (*arr).header.decref() {
                let data_layout = Layout::array::<i64>((*arr).capacity).unwrap();
                dealloc((*arr).data as *mut u8, data_layout);

                let layout = Layout::new::<OrinArray>();
                dealloc(arr as *mut u8, layout);
            }
        }
    }
}
