//!
//! Exception Slots
//!
//! Thread-local storage for the pending exception, read and written by
//! generated code and by native modules when they throw. The exception
//! payload is a raw pointer to a module-defined error struct; the type id
//! tells catch blocks which struct layout to expect.
//!
//! Exception type IDs:
//! - 0: Unknown/user-defined exception
//! - 1: UsageError (wrong argument count or type at a native boundary)
//! - 2: DBError
//!

use std::cell::Cell;

thread_local! {
    static CURRENT_EXCEPTION: Cell<*mut u8> = const { Cell::new(std::ptr::null_mut()) };
    static CURRENT_EXCEPTION_TYPE_ID: Cell<i64> = const { Cell::new(0) };
}

pub const EXCEPTION_TYPE_UNKNOWN: i64 = 0;
pub const EXCEPTION_TYPE_USAGE_ERROR: i64 = 1;
pub const EXCEPTION_TYPE_DB_ERROR: i64 = 2;

/// Set the current exception (called by throw)
#[unsafe(no_mangle)]
pub extern "C" fn orin_exception_set(exception_ptr: *mut u8) {
    CURRENT_EXCEPTION.with(|ex| ex.set(exception_ptr));
}

/// Set the current exception with type ID
#[unsafe(no_mangle)]
pub extern "C" fn orin_exception_set_typed(exception_ptr: *mut u8, type_id: i64) {
    CURRENT_EXCEPTION.with(|ex| ex.set(exception_ptr));
    CURRENT_EXCEPTION_TYPE_ID.with(|id| id.set(type_id));
}

/// Get the current exception type ID
#[unsafe(no_mangle)]
pub extern "C" fn orin_exception_get_type_id() -> i64 {
    CURRENT_EXCEPTION_TYPE_ID.with(|id| id.get())
}

/// Check if the current exception matches the given type ID
#[unsafe(no_mangle)]
pub extern "C" fn orin_exception_is_type(type_id: i64) -> i64 {
    let current = CURRENT_EXCEPTION_TYPE_ID.with(|id| id.get());
    if current == type_id { 1 } else { 0 }
}

/// Get the current exception pointer (null if none)
#[unsafe(no_mangle)]
pub extern "C" fn orin_exception_get() -> *mut u8 {
    CURRENT_EXCEPTION.with(|ex| ex.get())
}

/// Clear the current exception (called after a catch handles it)
#[unsafe(no_mangle)]
pub extern "C" fn orin_exception_clear() {
    CURRENT_EXCEPTION.with(|ex| ex.set(std::ptr::null_mut()));
    CURRENT_EXCEPTION_TYPE_ID.with(|id| id.set(0));
}

/// Check if there is a pending exception
#[unsafe(no_mangle)]
pub extern "C" fn orin_exception_check() -> i64 {
    CURRENT_EXCEPTION.with(|ex| if ex.get().is_null() { 0 } else { 1 })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exception_slot_roundtrip() {
        assert_eq!(orin_exception_check(), 0);

        let mut payload = 0u8;
        orin_exception_set_typed(&mut payload as *mut u8, EXCEPTION_TYPE_USAGE_ERROR);
        assert_eq!(orin_exception_check(), 1);
        assert_eq!(orin_exception_get_type_id(), EXCEPTION_TYPE_USAGE_ERROR);
        assert_eq!(orin_exception_is_type(EXCEPTION_TYPE_USAGE_ERROR), 1);
        assert_eq!(orin_exception_is_type(EXCEPTION_TYPE_DB_ERROR), 0);
        assert_eq!(orin_exception_get(), &mut payload as *mut u8);

        orin_exception_clear();
        assert_eq!(orin_exception_check(), 0);
        assert_eq!(orin_exception_get_type_id(), EXCEPTION_TYPE_UNKNOWN);
    }
}
