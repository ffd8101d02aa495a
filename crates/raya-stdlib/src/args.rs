//! Argument validation shared by the native modules
//!
//! Every helper checks the runtime type with `raya_value_type()` before
//! reading, and reports mismatches as an `ArgumentError` value for the
//! native function to return.

use raya_ffi::{
    raya_array_length, raya_value_error, raya_value_to_i32, raya_value_to_string,
    raya_value_type, RayaContext, RayaValue,
};
use std::ffi::{CStr, CString};

/// `RAYA_TYPE_I32`
pub const TYPE_I32: i32 = 2;
/// `RAYA_TYPE_STRING`
pub const TYPE_STRING: i32 = 3;
/// `RAYA_TYPE_ARRAY`
pub const TYPE_ARRAY: i32 = 4;

/// An error value ready to be returned from a native function
pub type Thrown = *mut RayaValue;

/// Borrowed view of a native call's arguments
pub struct Args<'a> {
    ctx: *mut RayaContext,
    name: &'static str,
    values: &'a [*mut RayaValue],
}

impl<'a> Args<'a> {
    /// Wrap the raw argument vector of a call to `name`
    ///
    /// # Safety
    /// `argv` must be NULL or point to `argc` handles that stay valid for `'a`.
    pub unsafe fn new(
        ctx: *mut RayaContext,
        name: &'static str,
        argv: *const *mut RayaValue,
        argc: usize,
    ) -> Self {
        let values = if argv.is_null() || argc == 0 {
            &[]
        } else {
            std::slice::from_raw_parts(argv, argc)
        };
        Self { ctx, name, values }
    }

    /// Call context, for creating result values
    pub fn ctx(&self) -> *mut RayaContext {
        self.ctx
    }

    /// Fail unless exactly `count` arguments were passed
    pub fn expect_count(&self, count: usize) -> Result<(), Thrown> {
        if self.values.len() == count {
            Ok(())
        } else {
            Err(self.argument_error(format!(
                "expected {} argument{}, got {}",
                count,
                if count == 1 { "" } else { "s" },
                self.values.len()
            )))
        }
    }

    fn check_type(&self, index: usize, expected: i32, what: &str) -> Result<*mut RayaValue, Thrown> {
        let Some(&value) = self.values.get(index) else {
            return Err(self.argument_error(format!("missing argument {}", index + 1)));
        };
        if unsafe { raya_value_type(value) } == expected {
            Ok(value)
        } else {
            Err(self.argument_error(format!("argument {} must be {}", index + 1, what)))
        }
    }

    /// Integer argument
    pub fn i32(&self, index: usize) -> Result<i32, Thrown> {
        let value = self.check_type(index, TYPE_I32, "an integer")?;
        Ok(unsafe { raya_value_to_i32(value) })
    }

    /// String argument
    pub fn string(&self, index: usize) -> Result<String, Thrown> {
        let value = self.check_type(index, TYPE_STRING, "a string")?;
        let ptr = unsafe { raya_value_to_string(value) };
        if ptr.is_null() {
            return Err(self.argument_error(format!(
                "argument {} must not contain NUL characters",
                index + 1
            )));
        }
        Ok(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
    }

    /// Array argument; the handle stays borrowed
    pub fn array(&self, index: usize) -> Result<(*mut RayaValue, usize), Thrown> {
        let value = self.check_type(index, TYPE_ARRAY, "an array")?;
        Ok((value, unsafe { raya_array_length(value) }))
    }

    /// `ArgumentError` for this function
    pub fn argument_error(&self, detail: impl AsRef<str>) -> Thrown {
        throw(
            self.ctx,
            &format!("ArgumentError: {}: {}", self.name, detail.as_ref()),
        )
    }

    /// Any other failure of this function
    pub fn error(&self, detail: impl AsRef<str>) -> Thrown {
        throw(self.ctx, &format!("{}: {}", self.name, detail.as_ref()))
    }
}

/// Build an error value carrying `message`
pub fn throw(ctx: *mut RayaContext, message: &str) -> Thrown {
    let message = CString::new(message.replace('\0', "\u{FFFD}")).unwrap_or_default();
    unsafe { raya_value_error(ctx, message.as_ptr()) }
}

/// Build a string value
pub fn string_value(ctx: *mut RayaContext, s: &str) -> *mut RayaValue {
    match CString::new(s) {
        Ok(c) => unsafe { raya_ffi::raya_value_string(ctx, c.as_ptr()) },
        Err(_) => throw(ctx, "string result contains NUL characters"),
    }
}

/// Collapse a native function body into its return value
pub fn finish(result: Result<*mut RayaValue, Thrown>) -> *mut RayaValue {
    result.unwrap_or_else(|thrown| thrown)
}
