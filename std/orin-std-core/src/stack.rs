//!
//! Shadow Stack Runtime
//!
//! Generated code pushes a frame on function entry and pops it on exit;
//! native modules capture the stack when they throw so the error value
//! carries a trace. Frames reference static name/file literals emitted by
//! codegen, so capture only copies pointers.
//!

use crate::array::{orin_array_new, orin_array_push, OrinArray};
use crate::value::OrinString;

const MAX_DEPTH: usize = 1024;

/// A single frame in a stack trace. Built-in type `stack_frame` in orin.
#[repr(C)]
pub struct StackFrame {
    pub function: *const u8, // static NUL-terminated function name
    pub file: *const u8,     // static NUL-terminated file path
    pub line: i64,
}

#[repr(C)]
pub struct Stack {
    pub depth: usize,
    pub frames: [StackFrame; MAX_DEPTH],
}

// Global shadow stack (exposed for inlining in codegen)
#[unsafe(no_mangle)]
pub static mut ORIN_SHADOW_STACK: Stack = Stack {
    depth: 0,
    frames: [const {
        StackFrame {
            function: std::ptr::null(),
            file: std::ptr::null(),
            line: 0,
        }
    }; MAX_DEPTH],
};

/// Push a frame onto the shadow stack (called at function entry)
#[unsafe(no_mangle)]
pub extern "C" fn orin_stack_push(func_name: *const u8, file: *const u8, line: i64) {
    unsafe {
        let d = ORIN_SHADOW_STACK.depth;
        if d < MAX_DEPTH {
            ORIN_SHADOW_STACK.frames[d].function = func_name;
            ORIN_SHADOW_STACK.frames[d].file = file;
            ORIN_SHADOW_STACK.frames[d].line = line;
            ORIN_SHADOW_STACK.depth = d + 1;
        }
    }
}

/// Pop a frame from the shadow stack (called at function exit)
#[unsafe(no_mangle)]
pub extern "C" fn orin_stack_pop() {
    unsafe {
        if ORIN_SHADOW_STACK.depth > 0 {
            ORIN_SHADOW_STACK.depth -= 1;
        }
    }
}

/// Capture the current stack as an array of stack_frame, most recent first.
/// Frame copies are owned by the returned array; the interpreter frees them
/// with the error value.
#[unsafe(no_mangle)]
pub extern "C" fn orin_stack_capture() -> *mut u8 {
    unsafe {
        let depth = ORIN_SHADOW_STACK.depth;
        let array = orin_array_new(if depth == 0 { 1 } else { depth });

        for i in (0..depth).rev() {
            let frame_ptr = {
                let layout = std::alloc::Layout::new::<StackFrame>();
                let ptr = std::alloc::alloc(layout) as *mut StackFrame;
                if ptr.is_null() {
                    panic!("Failed to allocate stack frame");
                }
                (*ptr).function = ORIN_SHADOW_STACK.frames[i].function;
                (*ptr).file = ORIN_SHADOW_STACK.frames[i].file;
                (*ptr).line = ORIN_SHADOW_STACK.frames[i].line;
                ptr as i64
            };
            orin_array_push(array, frame_ptr);
        }

        array as *mut u8
    }
}

/// Clear the stack (called on thread init or after an unhandled exception)
#[unsafe(no_mangle)]
pub extern "C" fn orin_stack_clear() {
    unsafe {
        ORIN_SHADOW_STACK.depth = 0;
    }
}

/// Format a captured stack as a string. Takes the array returned by
/// `orin_stack_capture`, returns an OrinString pointer.
#[unsafe(no_mangle)]
pub extern "C" fn orin_stack_format(stack_ptr: *mut u8) -> *mut OrinString {
    if stack_ptr.is_null() {
        let empty = b"Stack trace: (empty)\n";
        return unsafe { crate::value::orin_string_new(empty.as_ptr(), empty.len()) };
    }

    unsafe {
        let array = stack_ptr as *mut OrinArray;
        let len = (*array).len;

        let mut result = String::from("Stack trace:\n");

        for i in 0..len {
            let frame_ptr = *(*array).data.add(i) as *const StackFrame;
            if frame_ptr.is_null() {
                continue;
            }
            let func = if !(*frame_ptr).function.is_null() {
                std::ffi::CStr::from_ptr((*frame_ptr).function as *const std::ffi::c_char)
                    .to_string_lossy()
            } else {
                std::borrow::Cow::Borrowed("<unknown>")
            };
            let file = if !(*frame_ptr).file.is_null() {
                std::ffi::CStr::from_ptr((*frame_ptr).file as *const std::ffi::c_char)
                    .to_string_lossy()
            } else {
                std::borrow::Cow::Borrowed("<unknown>")
            };
            result.push_str(&format!("  at {} ({}:{})\n", func, file, (*frame_ptr).line));
        }

        crate::value::orin_string_new(result.as_bytes().as_ptr(), result.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::orin_array_len;
    use crate::value::orin_string_decref;

    #[test]
    fn test_capture_and_format() {
        orin_stack_clear();
        orin_stack_push(c"main".as_ptr() as *const u8, c"main.or".as_ptr() as *const u8, 3);
        orin_stack_push(c"query".as_ptr() as *const u8, c"db.or".as_ptr() as *const u8, 14);

        let captured = orin_stack_capture();
        assert_eq!(unsafe { orin_array_len(captured as *const OrinArray) }, 2);

        let formatted = orin_stack_format(captured);
        let text = unsafe { (*formatted).as_str().to_owned() };
        assert!(text.starts_with("Stack trace:\n"));
        // most recent frame first
        let query_at = text.find("query (db.or:14)").unwrap();
        let main_at = text.find("main (main.or:3)").unwrap();
        assert!(query_at < main_at);

        unsafe { orin_string_decref(formatted) };
        orin_stack_pop();
        orin_stack_pop();
        orin_stack_clear();
    }

    #[test]
    fn test_format_null_stack() {
        let formatted = orin_stack_format(std::ptr::null_mut());
        let text = unsafe { (*formatted).as_str().to_owned() };
        assert_eq!(text, "Stack trace: (empty)\n");
        unsafe { orin_string_decref(formatted) };
    }
}
