//! The OLE Automation allocator the runtime frees arrays and strings with.

use libloading::Library;

use crate::{
    native::{Allocator, HResult, SafeArray, SafeArrayBound, VarType, Variant},
    Error, Result,
};

type SafeArrayCreateFn =
    unsafe extern "system" fn(u16, u32, *const SafeArrayBound) -> *mut SafeArray;
type SafeArrayDestroyFn = unsafe extern "system" fn(*mut SafeArray) -> HResult;
type SysAllocStringLenFn = unsafe extern "system" fn(*const u16, u32) -> *mut u16;
type SysFreeStringFn = unsafe extern "system" fn(*mut u16);
type VariantClearFn = unsafe extern "system" fn(*mut Variant) -> HResult;

/// `OleAut32.dll`, resolved once.
pub(crate) struct OleAutomation {
    safe_array_create: SafeArrayCreateFn,
    safe_array_destroy: SafeArrayDestroyFn,
    sys_alloc_string_len: SysAllocStringLenFn,
    sys_free_string: SysFreeStringFn,
    variant_clear: VariantClearFn,
    // keeps the function pointers above valid
    _library: Library,
}

pub(super) fn symbol<T: Copy>(library: &Library, name: &[u8]) -> Result<T> {
    let symbol =
        unsafe { library.get::<T>(name) }.map_err(|error| Error::Library(error.to_string()))?;
    Ok(*symbol)
}

impl OleAutomation {
    pub(crate) fn load() -> Result<OleAutomation> {
        let library = unsafe { Library::new("OleAut32.dll") }
            .map_err(|error| Error::Library(error.to_string()))?;

        Ok(OleAutomation {
            safe_array_create: symbol(&library, b"SafeArrayCreate\0")?,
            safe_array_destroy: symbol(&library, b"SafeArrayDestroy\0")?,
            sys_alloc_string_len: symbol(&library, b"SysAllocStringLen\0")?,
            sys_free_string: symbol(&library, b"SysFreeString\0")?,
            variant_clear: symbol(&library, b"VariantClear\0")?,
            _library: library,
        })
    }
}

impl Allocator for OleAutomation {
    fn create_array(&self, element: VarType, bound: SafeArrayBound) -> *mut SafeArray {
        unsafe { (self.safe_array_create)(element as u16, 1, &bound) }
    }

    unsafe fn destroy_array(&self, array: *mut SafeArray) -> HResult {
        (self.safe_array_destroy)(array)
    }

    fn alloc_string(&self, value: &[u16]) -> *mut u16 {
        let Ok(len) = u32::try_from(value.len()) else {
            return std::ptr::null_mut();
        };
        unsafe { (self.sys_alloc_string_len)(value.as_ptr(), len) }
    }

    unsafe fn free_string(&self, bstr: *mut u16) {
        (self.sys_free_string)(bstr);
    }

    unsafe fn clear_variant(&self, variant: *mut Variant) -> HResult {
        (self.variant_clear)(variant)
    }
}
