//! UTF-16 conversions at the native boundary.
//!
//! Strings handed back by the runtime are raw pointers to zero-terminated UTF-16. They are
//! decoded with a bounded scan so that a corrupted pointer fails with
//! [`crate::Error::StringDecode`] instead of walking memory indefinitely.

use widestring::{U16CStr, U16CString, U16String};

use crate::{Error::StringDecode, Result};

/// Longest method signature the loader is willing to decode, in UTF-16 code units.
pub const MAX_NATIVE_STRING: usize = 4096;

/// Decodes a zero-terminated UTF-16 string, scanning at most `max_len` code units.
///
/// # Safety
/// `ptr` must be null or point to at least `max_len` readable code units, or to a terminated
/// string shorter than that.
///
/// # Errors
/// Returns [`crate::Error::StringDecode`] if `ptr` is null, no terminator is found within
/// `max_len` code units, or the content is not valid UTF-16.
pub unsafe fn read_wide_cstr(ptr: *const u16, max_len: usize) -> Result<String> {
    if ptr.is_null() {
        return Err(StringDecode("null string pointer".to_string()));
    }

    let value = U16CStr::from_ptr_truncate(ptr, max_len).map_err(|_| {
        StringDecode(format!("no terminator within {max_len} code units"))
    })?;

    String::from_utf16(value.as_slice()).map_err(|error| StringDecode(error.to_string()))
}

/// Decodes a fixed-width buffer filled by the runtime, stopping at the first zero.
///
/// # Errors
/// Returns [`crate::Error::StringDecode`] if the buffer holds no terminator or invalid UTF-16.
pub fn read_wide_buffer(buffer: &[u16]) -> Result<String> {
    let value = U16CStr::from_slice_truncate(buffer)
        .map_err(|_| StringDecode("version buffer is not terminated".to_string()))?;

    String::from_utf16(value.as_slice()).map_err(|error| StringDecode(error.to_string()))
}

/// Encodes `value` as a zero-terminated UTF-16 string for `LPCWSTR` parameters.
///
/// # Errors
/// Returns [`crate::Error::StringDecode`] if `value` contains an interior zero.
pub fn to_wide_cstring(value: &str) -> Result<U16CString> {
    U16CString::from_str(value).map_err(|error| StringDecode(error.to_string()))
}

/// Encodes `value` as UTF-16 without a terminator, the input format of `SysAllocStringLen`.
#[must_use]
pub fn to_wide(value: &str) -> Vec<u16> {
    U16String::from_str(value).into_vec()
}
