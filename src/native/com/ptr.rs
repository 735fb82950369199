use std::{ffi::c_void, marker::PhantomData, ptr::NonNull};

use super::interfaces::{Interface, Queryable, UnknownVtbl};
use crate::native::{HResult, Status};

#[repr(C)]
struct Object<V> {
    vtbl: *const V,
}

/// An owned reference to a COM object; released exactly once, on drop.
pub(crate) struct ComPtr<V: Interface> {
    raw: NonNull<Object<V>>,
    _vtbl: PhantomData<V>,
}

// The hosting objects are free-threaded
unsafe impl<V: Interface> Send for ComPtr<V> {}

impl<V: Interface> ComPtr<V> {
    /// Takes ownership of an interface pointer returned through an out-parameter.
    ///
    /// # Safety
    /// `raw` must be null or a live object implementing `V`, carrying a reference the caller
    /// owns.
    pub(crate) unsafe fn from_raw(raw: *mut c_void) -> Option<ComPtr<V>> {
        NonNull::new(raw.cast::<Object<V>>()).map(|raw| ComPtr {
            raw,
            _vtbl: PhantomData,
        })
    }

    /// Like [`ComPtr::from_raw`], failing with `E_POINTER` when a call reported success but
    /// produced no object.
    pub(crate) unsafe fn from_out(raw: *mut c_void) -> Status<ComPtr<V>> {
        Self::from_raw(raw).ok_or_else(|| {
            log::debug!("{} out-parameter was null", V::NAME);
            HResult::E_POINTER
        })
    }

    pub(crate) fn this(&self) -> *mut c_void {
        self.raw.as_ptr().cast()
    }

    pub(crate) fn vtbl(&self) -> &V {
        unsafe { &*(*self.raw.as_ptr()).vtbl }
    }

    fn unknown(&self) -> &UnknownVtbl {
        // every interface vtable begins with IUnknown
        unsafe { &*(*self.raw.as_ptr()).vtbl.cast::<UnknownVtbl>() }
    }

    /// Asks the object for another of its interfaces.
    pub(crate) fn query<U: Queryable>(&self) -> Status<ComPtr<U>> {
        let mut out = std::ptr::null_mut();
        let hr = unsafe { (self.unknown().query_interface)(self.this(), &U::IID, &mut out) };
        check_hr!(hr, format_args!("{}::QueryInterface({})", V::NAME, U::NAME));
        unsafe { ComPtr::from_out(out) }
    }
}

impl<V: Interface> Drop for ComPtr<V> {
    fn drop(&mut self) {
        let remaining = unsafe { (self.unknown().release)(self.this()) };
        log::trace!("Released {} ({remaining} references left)", V::NAME);
    }
}
