//! Native array and string allocation.
//!
//! Arrays and strings handed to the runtime must come from the allocator the runtime will later
//! free them with. [`Allocator`] abstracts over that allocator: on Windows it is OLE Automation
//! (`OleAut32.dll`), and [`HeapAllocator`] reproduces the same header and `BSTR` layouts on the
//! Rust heap for the fake runtime and for non-Windows targets.

use std::{
    alloc::{alloc, alloc_zeroed, dealloc, Layout},
    ptr,
    sync::atomic::{AtomicUsize, Ordering},
};

use crate::native::{
    types::{ArrayFeatures, SafeArray, SafeArrayBound, VarType, Variant, VT_ARRAY},
    HResult,
};

/// The process-wide native allocator for arrays and strings.
///
/// Methods return raw pointers exactly like their native counterparts; ownership is tracked by
/// [`crate::marshal::MarshalledArray`], never by callers of this trait directly.
pub trait Allocator: Send + Sync {
    /// Allocates a one-dimensional array header plus zeroed element storage
    /// (`SafeArrayCreate(vt, 1, &bound)`).
    ///
    /// Returns null on failure.
    fn create_array(&self, element: VarType, bound: SafeArrayBound) -> *mut SafeArray;

    /// Destroys an array and every element it owns (`SafeArrayDestroy`).
    ///
    /// # Safety
    /// `array` must be null or have been returned by [`Allocator::create_array`] on this
    /// allocator and not destroyed since.
    unsafe fn destroy_array(&self, array: *mut SafeArray) -> HResult;

    /// Allocates a length-prefixed string holding `value` (`SysAllocStringLen`).
    ///
    /// Returns null on failure.
    fn alloc_string(&self, value: &[u16]) -> *mut u16;

    /// Frees a string from [`Allocator::alloc_string`] (`SysFreeString`).
    ///
    /// # Safety
    /// `bstr` must be null or a live string from this allocator.
    unsafe fn free_string(&self, bstr: *mut u16);

    /// Releases whatever `variant` owns and resets it to empty (`VariantClear`).
    ///
    /// # Safety
    /// `variant` must point to a valid, initialized variant whose payload was allocated by
    /// this allocator.
    unsafe fn clear_variant(&self, variant: *mut Variant) -> HResult;
}

const DATA_ALIGN: usize = 16;
const BSTR_PREFIX: usize = 4;

fn data_layout(len: usize) -> Option<Layout> {
    Layout::from_size_align(len, DATA_ALIGN).ok()
}

fn bstr_layout(byte_len: usize) -> Option<Layout> {
    // length prefix + characters + terminator
    Layout::from_size_align(BSTR_PREFIX + byte_len + 2, 8).ok()
}

/// Reads the byte-length prefix of a `BSTR`.
///
/// # Safety
/// `bstr` must be a non-null, live `BSTR`.
#[must_use]
pub unsafe fn bstr_byte_len(bstr: *const u16) -> u32 {
    ptr::read_unaligned(bstr.cast::<u8>().sub(BSTR_PREFIX).cast::<u32>())
}

/// An in-process implementation of the OLE Automation allocation contract.
///
/// Headers, element storage and strings use the same layouts the runtime expects, so arrays
/// built here can be decoded by the same code that decodes native ones. Live allocations are
/// counted to make leaks observable in tests.
#[derive(Debug, Default)]
pub struct HeapAllocator {
    arrays: AtomicUsize,
    strings: AtomicUsize,
}

impl HeapAllocator {
    /// Creates an allocator with no live allocations.
    #[must_use]
    pub fn new() -> HeapAllocator {
        HeapAllocator::default()
    }

    /// Number of arrays created and not yet destroyed.
    pub fn live_arrays(&self) -> usize {
        self.arrays.load(Ordering::SeqCst)
    }

    /// Number of strings allocated and not yet freed.
    pub fn live_strings(&self) -> usize {
        self.strings.load(Ordering::SeqCst)
    }
}

impl Allocator for HeapAllocator {
    fn create_array(&self, element: VarType, bound: SafeArrayBound) -> *mut SafeArray {
        let Some(cb_elements) = element.element_size() else {
            return ptr::null_mut();
        };

        let Some(data_len) = (cb_elements as usize).checked_mul(bound.c_elements as usize) else {
            return ptr::null_mut();
        };

        let pv_data = if data_len == 0 {
            ptr::null_mut()
        } else {
            let Some(layout) = data_layout(data_len) else {
                return ptr::null_mut();
            };
            let data = unsafe { alloc_zeroed(layout) };
            if data.is_null() {
                return ptr::null_mut();
            }
            data.cast()
        };

        self.arrays.fetch_add(1, Ordering::SeqCst);
        Box::into_raw(Box::new(SafeArray {
            c_dims: 1,
            f_features: element.array_features().bits(),
            cb_elements,
            c_locks: 0,
            pv_data,
            rgsabound: [bound],
        }))
    }

    unsafe fn destroy_array(&self, array: *mut SafeArray) -> HResult {
        if array.is_null() {
            return HResult::S_OK;
        }

        let header = &*array;
        if header.c_locks > 0 {
            return HResult::DISP_E_ARRAYISLOCKED;
        }

        if !header.pv_data.is_null() {
            let count = header.len() as usize;
            let features = header.features();
            if features.contains(ArrayFeatures::BSTR) {
                let slots = header.pv_data.cast::<*mut u16>();
                for index in 0..count {
                    self.free_string(*slots.add(index));
                }
            } else if features.contains(ArrayFeatures::VARIANT) {
                let slots = header.pv_data.cast::<Variant>();
                for index in 0..count {
                    self.clear_variant(slots.add(index));
                }
            }

            if let Some(layout) = data_layout(header.data_len()) {
                dealloc(header.pv_data.cast(), layout);
            }
        }

        drop(Box::from_raw(array));
        self.arrays.fetch_sub(1, Ordering::SeqCst);
        HResult::S_OK
    }

    fn alloc_string(&self, value: &[u16]) -> *mut u16 {
        let byte_len = value.len() * 2;
        let Ok(prefix) = u32::try_from(byte_len) else {
            return ptr::null_mut();
        };
        let Some(layout) = bstr_layout(byte_len) else {
            return ptr::null_mut();
        };

        unsafe {
            let base = alloc(layout);
            if base.is_null() {
                return ptr::null_mut();
            }

            base.cast::<u32>().write(prefix);
            let chars = base.add(BSTR_PREFIX).cast::<u16>();
            ptr::copy_nonoverlapping(value.as_ptr(), chars, value.len());
            chars.add(value.len()).write(0);

            self.strings.fetch_add(1, Ordering::SeqCst);
            chars
        }
    }

    unsafe fn free_string(&self, bstr: *mut u16) {
        if bstr.is_null() {
            return;
        }

        let byte_len = bstr_byte_len(bstr) as usize;
        if let Some(layout) = bstr_layout(byte_len) {
            dealloc(bstr.cast::<u8>().sub(BSTR_PREFIX), layout);
            self.strings.fetch_sub(1, Ordering::SeqCst);
        }
    }

    unsafe fn clear_variant(&self, variant: *mut Variant) -> HResult {
        let current = &mut *variant;
        if current.vt & VT_ARRAY != 0 {
            let status = self.destroy_array(current.value.parray);
            if !status.is_ok() {
                return status;
            }
        } else if current.vt == VarType::Bstr as u16 {
            self.free_string(current.value.bstr);
        }

        *current = Variant::empty();
        HResult::S_OK
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_array_header() {
        let heap = HeapAllocator::new();
        let array = heap.create_array(
            VarType::Ui1,
            SafeArrayBound {
                c_elements: 10,
                l_lbound: 0,
            },
        );
        assert!(!array.is_null());

        let header = unsafe { &*array };
        assert_eq!(header.c_dims, 1);
        assert_eq!(header.cb_elements, 1);
        assert_eq!(header.c_locks, 0);
        assert_eq!(header.len(), 10);
        assert_eq!(header.features(), ArrayFeatures::HAVEVARTYPE);
        assert!(!header.pv_data.is_null());

        assert_eq!(heap.live_arrays(), 1);
        assert!(unsafe { heap.destroy_array(array) }.is_ok());
        assert_eq!(heap.live_arrays(), 0);
    }

    #[test]
    fn unsupported_element_type() {
        let heap = HeapAllocator::new();
        let array = heap.create_array(VarType::Null, SafeArrayBound::default());
        assert!(array.is_null());
        assert_eq!(heap.live_arrays(), 0);
    }

    #[test]
    fn bstr_layout_matches_native() {
        let heap = HeapAllocator::new();
        let text: Vec<u16> = "klist".encode_utf16().collect();
        let bstr = heap.alloc_string(&text);
        assert!(!bstr.is_null());

        unsafe {
            assert_eq!(bstr_byte_len(bstr), 10);
            assert_eq!(std::slice::from_raw_parts(bstr, 5), text.as_slice());
            assert_eq!(*bstr.add(5), 0);
            heap.free_string(bstr);
        }
        assert_eq!(heap.live_strings(), 0);
    }

    #[test]
    fn destroying_nested_arrays_frees_everything() {
        let heap = HeapAllocator::new();
        let one = SafeArrayBound {
            c_elements: 1,
            l_lbound: 0,
        };

        let strings = heap.create_array(VarType::Bstr, one);
        let value: Vec<u16> = "a".encode_utf16().collect();
        unsafe {
            *(*strings).pv_data.cast::<*mut u16>() = heap.alloc_string(&value);
        }

        let outer = heap.create_array(VarType::Variant, one);
        unsafe {
            *(*outer).pv_data.cast::<Variant>() = Variant::array(VarType::Bstr, strings);
        }

        assert_eq!(heap.live_arrays(), 2);
        assert_eq!(heap.live_strings(), 1);
        assert!(unsafe { heap.destroy_array(outer) }.is_ok());
        assert_eq!(heap.live_arrays(), 0);
        assert_eq!(heap.live_strings(), 0);
    }

    #[test]
    fn locked_array_is_not_destroyed() {
        let heap = HeapAllocator::new();
        let array = heap.create_array(VarType::Ui1, SafeArrayBound::default());
        unsafe {
            (*array).c_locks = 1;
            assert_eq!(heap.destroy_array(array), HResult::DISP_E_ARRAYISLOCKED);
            (*array).c_locks = 0;
            assert!(heap.destroy_array(array).is_ok());
        }
    }
}
