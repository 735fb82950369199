//! Marshalling byte buffers and argument lists into native arrays.
//!
//! A [`MarshalledArray`] owns one `SAFEARRAY` created by the platform [`Allocator`]. Content is
//! copied into the native element storage, never aliased: once [`marshal_bytes`] returns, the
//! caller's buffer may be dropped or moved and the array stays valid for as long as the
//! `MarshalledArray` lives.
//!
//! Entry-point arguments use a two-level layout. The strings become a `BSTR` array, which is
//! wrapped as the single element of a `VARIANT` array, because `Invoke_3` takes one positional
//! parameter array and `Main(string[])` has exactly one parameter.
//!
//! The `read_*` functions decode arrays back into Rust values. They accept any array with the
//! layout the runtime produces, including ones built by [`crate::native::HeapAllocator`].

use std::{fmt, ptr::NonNull, slice, sync::Arc};

use log::{trace, warn};

use crate::{
    native::{
        alloc::bstr_byte_len, wide::to_wide, Allocator, ArrayFeatures, SafeArray,
        SafeArrayBound, VarType, Variant,
    },
    Error, Result,
};

/// A native array owned by Rust, destroyed with its allocator when dropped.
pub struct MarshalledArray {
    raw: NonNull<SafeArray>,
    element: VarType,
    allocator: Arc<dyn Allocator>,
}

// The array is exclusively owned; the allocator is Send + Sync.
unsafe impl Send for MarshalledArray {}

impl MarshalledArray {
    fn create(allocator: &Arc<dyn Allocator>, element: VarType, elements: u32) -> Result<Self> {
        let raw = allocator.create_array(
            element,
            SafeArrayBound {
                c_elements: elements,
                l_lbound: 0,
            },
        );

        let Some(raw) = NonNull::new(raw) else {
            return Err(Error::ArrayAllocFailed { elements });
        };
        trace!("Created {element} array of {elements} elements at {raw:p}");

        Ok(MarshalledArray {
            raw,
            element,
            allocator: Arc::clone(allocator),
        })
    }

    /// The header pointer handed to native calls.
    pub fn as_ptr(&self) -> *mut SafeArray {
        self.raw.as_ptr()
    }

    /// The element type the array was created with.
    pub fn element(&self) -> VarType {
        self.element
    }

    /// Number of elements.
    pub fn len(&self) -> u32 {
        self.header().len()
    }

    /// Returns `true` if the array has no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The array header.
    pub fn header(&self) -> &SafeArray {
        // Owned and live until drop
        unsafe { self.raw.as_ref() }
    }

    /// Releases ownership of the array without destroying it.
    ///
    /// The caller becomes responsible for destroying the returned array.
    pub fn into_raw(self) -> *mut SafeArray {
        let raw = self.raw.as_ptr();
        std::mem::forget(self);
        raw
    }

    /// Decodes the content of a byte array.
    ///
    /// # Errors
    /// Returns [`Error::Malformed`] if this is not a one-dimensional byte array.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        unsafe { read_bytes(self.as_ptr()) }
    }

    /// Decodes the content of a string array.
    ///
    /// # Errors
    /// Returns [`Error::Malformed`] if this is not a one-dimensional `BSTR` array, or
    /// [`Error::StringDecode`] if an element is not valid UTF-16.
    pub fn to_strings(&self) -> Result<Vec<String>> {
        unsafe { read_strings(self.as_ptr()) }
    }
}

impl Drop for MarshalledArray {
    fn drop(&mut self) {
        let status = unsafe { self.allocator.destroy_array(self.raw.as_ptr()) };
        if !status.is_ok() {
            warn!("SafeArrayDestroy returned {status}, leaking array at {:p}", self.raw);
        }
    }
}

impl fmt::Debug for MarshalledArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MarshalledArray")
            .field("raw", &self.raw)
            .field("element", &self.element)
            .field("len", &self.len())
            .finish()
    }
}

/// Copies `buffer` into a new native byte array.
///
/// # Errors
/// - [`Error::Empty`] for an empty buffer
/// - [`Error::OutOfBounds`] if the buffer is longer than a native array can describe
/// - [`Error::ArrayAllocFailed`] if the allocator returns a null header
pub fn marshal_bytes(allocator: &Arc<dyn Allocator>, buffer: &[u8]) -> Result<MarshalledArray> {
    if buffer.is_empty() {
        return Err(Error::Empty);
    }

    let elements = u32::try_from(buffer.len()).map_err(|_| Error::OutOfBounds)?;
    let array = MarshalledArray::create(allocator, VarType::Ui1, elements)?;

    let header = array.header();
    if header.pv_data.is_null() || header.data_len() < buffer.len() {
        return Err(Error::ArrayAllocFailed { elements });
    }

    // Destination holds exactly `elements` one-byte elements
    unsafe {
        std::ptr::copy_nonoverlapping(buffer.as_ptr(), header.pv_data.cast::<u8>(), buffer.len());
    }

    Ok(array)
}

/// Allocates every string as a `BSTR` and packs them into a native string array.
///
/// # Errors
/// - [`Error::ArrayAllocFailed`] if the array cannot be allocated
/// - [`Error::StringAllocFailed`] if a string cannot be allocated; strings allocated so far
///   are freed with the array
pub fn marshal_strings<S: AsRef<str>>(
    allocator: &Arc<dyn Allocator>,
    values: &[S],
) -> Result<MarshalledArray> {
    let elements = u32::try_from(values.len()).map_err(|_| Error::OutOfBounds)?;
    let array = MarshalledArray::create(allocator, VarType::Bstr, elements)?;
    if values.is_empty() {
        return Ok(array);
    }

    let header = array.header();
    if header.pv_data.is_null() || header.len() < elements {
        return Err(Error::ArrayAllocFailed { elements });
    }

    let slots = header.pv_data.cast::<*mut u16>();
    for (index, value) in values.iter().enumerate() {
        let wide = to_wide(value.as_ref());
        let bstr = allocator.alloc_string(&wide);
        if bstr.is_null() {
            return Err(Error::StringAllocFailed(wide.len()));
        }

        // `index` is below the element count the array was created with
        unsafe { slots.add(index).write(bstr) };
    }

    Ok(array)
}

/// Packs entry-point arguments as `VARIANT[] { VT_ARRAY|VT_BSTR -> BSTR[] }`.
///
/// # Errors
/// Any error of [`marshal_strings`], or [`Error::ArrayAllocFailed`] for the outer array.
pub fn marshal_arguments<S: AsRef<str>>(
    allocator: &Arc<dyn Allocator>,
    args: &[S],
) -> Result<MarshalledArray> {
    let strings = marshal_strings(allocator, args)?;
    let parameters = MarshalledArray::create(allocator, VarType::Variant, 1)?;
    if parameters.header().pv_data.is_null() {
        return Err(Error::ArrayAllocFailed { elements: 1 });
    }

    // The outer array takes over the string array; destroying it destroys both
    let slot = parameters.header().pv_data.cast::<Variant>();
    unsafe { slot.write(Variant::array(VarType::Bstr, strings.into_raw())) };

    Ok(parameters)
}

unsafe fn check_header<'a>(array: *const SafeArray, element: VarType) -> Result<&'a SafeArray> {
    if array.is_null() {
        return Err(malformed_error!("Null array header"));
    }

    let header = &*array;
    if header.c_dims != 1 {
        return Err(malformed_error!("Expected one dimension, found {}", header.c_dims));
    }

    let expected = element.element_size().unwrap_or(0);
    if header.cb_elements != expected {
        return Err(malformed_error!(
            "Expected {} byte {} elements, found {} bytes",
            expected,
            element,
            header.cb_elements
        ));
    }

    let features = element
        .array_features()
        .difference(ArrayFeatures::HAVEVARTYPE);
    if !header.features().contains(features) {
        return Err(malformed_error!(
            "Array of {} is missing features {:?}",
            element,
            features
        ));
    }

    if header.pv_data.is_null() && !header.is_empty() {
        return Err(malformed_error!("Array of {} elements has no storage", header.len()));
    }

    Ok(header)
}

/// Decodes a one-dimensional byte array.
///
/// # Safety
/// `array` must be null or point to a live array header whose storage matches its bounds.
///
/// # Errors
/// Returns [`Error::Malformed`] if the header does not describe a byte array.
pub unsafe fn read_bytes(array: *const SafeArray) -> Result<Vec<u8>> {
    let header = check_header(array, VarType::Ui1)?;
    if header.is_empty() {
        return Ok(Vec::new());
    }

    Ok(slice::from_raw_parts(header.pv_data.cast::<u8>(), header.len() as usize).to_vec())
}

/// Decodes a one-dimensional `BSTR` array.
///
/// # Safety
/// `array` must be null or point to a live array header whose storage holds null or live
/// `BSTR` elements.
///
/// # Errors
/// Returns [`Error::Malformed`] if the header does not describe a string array, or
/// [`Error::StringDecode`] if an element is not valid UTF-16.
pub unsafe fn read_strings(array: *const SafeArray) -> Result<Vec<String>> {
    let header = check_header(array, VarType::Bstr)?;
    let mut strings = Vec::with_capacity(header.len() as usize);

    for index in 0..header.len() as usize {
        let bstr = *header.pv_data.cast::<*const u16>().add(index);
        if bstr.is_null() {
            strings.push(String::new());
            continue;
        }

        let units = slice::from_raw_parts(bstr, bstr_byte_len(bstr) as usize / 2);
        strings.push(
            String::from_utf16(units).map_err(|error| Error::StringDecode(error.to_string()))?,
        );
    }

    Ok(strings)
}

/// Decodes a positional parameter array whose elements are string arrays.
///
/// Returns one entry per parameter, each holding the strings of that parameter's array.
///
/// # Safety
/// `array` must be null or point to a live `VARIANT` array header built like the output of
/// [`marshal_arguments`].
///
/// # Errors
/// Returns [`Error::Malformed`] if the outer array is not a variant array or a parameter is not
/// a string array.
pub unsafe fn read_parameters(array: *const SafeArray) -> Result<Vec<Vec<String>>> {
    let header = check_header(array, VarType::Variant)?;
    let mut parameters = Vec::with_capacity(header.len() as usize);

    for index in 0..header.len() as usize {
        let variant = &*header.pv_data.cast::<Variant>().add(index);
        match (variant.array_element(), variant.as_array()) {
            (Some(VarType::Bstr), Some(inner)) => parameters.push(read_strings(inner)?),
            _ => {
                return Err(malformed_error!(
                    "Parameter {} has variant type {:#06x}, expected VT_ARRAY|VT_BSTR",
                    index,
                    variant.vt
                ))
            }
        }
    }

    Ok(parameters)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::{HResult, HeapAllocator};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn heap() -> (Arc<HeapAllocator>, Arc<dyn Allocator>) {
        let heap = Arc::new(HeapAllocator::new());
        let allocator: Arc<dyn Allocator> = heap.clone();
        (heap, allocator)
    }

    /// Delegates to a [`HeapAllocator`] and fails selected calls, counted from zero.
    #[derive(Default)]
    struct FailingAllocator {
        heap: Arc<HeapAllocator>,
        fail_array: Option<usize>,
        fail_string: Option<usize>,
        detach_storage: bool,
        arrays: AtomicUsize,
        strings: AtomicUsize,
    }

    impl FailingAllocator {
        fn shared(self) -> (Arc<HeapAllocator>, Arc<dyn Allocator>) {
            let heap = Arc::clone(&self.heap);
            let allocator: Arc<dyn Allocator> = Arc::new(self);
            (heap, allocator)
        }
    }

    impl Allocator for FailingAllocator {
        fn create_array(&self, element: VarType, bound: SafeArrayBound) -> *mut SafeArray {
            let call = self.arrays.fetch_add(1, Ordering::SeqCst);
            if self.fail_array == Some(call) {
                return std::ptr::null_mut();
            }
            if !self.detach_storage {
                return self.heap.create_array(element, bound);
            }

            // a header that claims elements but carries no storage
            let array = self.heap.create_array(
                element,
                SafeArrayBound {
                    c_elements: 0,
                    l_lbound: 0,
                },
            );
            if let Some(header) = unsafe { array.as_mut() } {
                header.rgsabound[0].c_elements = bound.c_elements;
            }
            array
        }

        unsafe fn destroy_array(&self, array: *mut SafeArray) -> HResult {
            self.heap.destroy_array(array)
        }

        fn alloc_string(&self, value: &[u16]) -> *mut u16 {
            let call = self.strings.fetch_add(1, Ordering::SeqCst);
            if self.fail_string == Some(call) {
                return std::ptr::null_mut();
            }
            self.heap.alloc_string(value)
        }

        unsafe fn free_string(&self, bstr: *mut u16) {
            self.heap.free_string(bstr);
        }

        unsafe fn clear_variant(&self, variant: *mut Variant) -> HResult {
            self.heap.clear_variant(variant)
        }
    }

    #[test]
    fn bytes_are_copied() {
        let (_, allocator) = heap();
        let mut buffer = vec![0x4d, 0x5a, 0x90, 0x00, 0x03];
        let array = marshal_bytes(&allocator, &buffer).unwrap();

        // mutating and dropping the source leaves the native copy untouched
        buffer[0] = 0;
        drop(buffer);

        let header = array.header();
        assert_eq!(header.c_dims, 1);
        assert_eq!(header.cb_elements, 1);
        assert_eq!(header.rgsabound[0].l_lbound, 0);
        assert_eq!(array.len(), 5);
        assert_eq!(array.to_bytes().unwrap(), vec![0x4d, 0x5a, 0x90, 0x00, 0x03]);
    }

    #[test]
    fn round_trip_many_sizes() {
        let (_, allocator) = heap();
        for len in [1_usize, 2, 15, 16, 17, 255, 4096, 65_537] {
            let buffer: Vec<u8> = (0..len).map(|i| (i * 31 % 251) as u8).collect();
            let array = marshal_bytes(&allocator, &buffer).unwrap();
            assert_eq!(array.to_bytes().unwrap(), buffer);
        }
    }

    #[test]
    fn empty_buffer_is_rejected() {
        let (heap, allocator) = heap();
        assert!(matches!(marshal_bytes(&allocator, &[]), Err(Error::Empty)));
        assert_eq!(heap.live_arrays(), 0);
    }

    #[test]
    fn arrays_are_destroyed_on_drop() {
        let (heap, allocator) = heap();
        {
            let _bytes = marshal_bytes(&allocator, b"abc").unwrap();
            let _args = marshal_arguments(&allocator, &["a", "b"]).unwrap();
            assert_eq!(heap.live_arrays(), 3);
            assert_eq!(heap.live_strings(), 2);
        }
        assert_eq!(heap.live_arrays(), 0);
        assert_eq!(heap.live_strings(), 0);
    }

    #[test]
    fn argument_nesting() {
        let (_, allocator) = heap();
        let parameters = marshal_arguments(&allocator, &["/ticket", "ünïcode"]).unwrap();
        assert_eq!(parameters.element(), VarType::Variant);
        assert_eq!(parameters.len(), 1);

        let outer = unsafe { &*parameters.header().pv_data.cast::<Variant>() };
        assert_eq!(outer.vt, 0x2008);

        let decoded = unsafe { read_parameters(parameters.as_ptr()) }.unwrap();
        assert_eq!(decoded, vec![vec!["/ticket".to_string(), "ünïcode".to_string()]]);
    }

    #[test]
    fn strings_round_trip() {
        let (_, allocator) = heap();
        let array = marshal_strings(&allocator, &["", "x y", "v4.0.30319"]).unwrap();
        assert_eq!(array.to_strings().unwrap(), vec!["", "x y", "v4.0.30319"]);
    }

    #[test]
    fn decoding_checks_element_type() {
        let (_, allocator) = heap();
        let bytes = marshal_bytes(&allocator, b"abc").unwrap();
        assert!(matches!(bytes.to_strings(), Err(Error::Malformed { .. })));
        assert!(matches!(
            unsafe { read_parameters(bytes.as_ptr()) },
            Err(Error::Malformed { .. })
        ));
        assert!(unsafe { read_bytes(std::ptr::null()) }.is_err());
    }

    #[test]
    fn byte_array_allocation_failure() {
        let (heap, allocator) = FailingAllocator {
            fail_array: Some(0),
            ..Default::default()
        }
        .shared();

        assert!(matches!(
            marshal_bytes(&allocator, b"MZ\x90\x00"),
            Err(Error::ArrayAllocFailed { elements: 4 })
        ));
        assert_eq!(heap.live_arrays(), 0);
    }

    #[test]
    fn string_allocation_failure_frees_earlier_strings() {
        for failing in 0..3 {
            let (heap, allocator) = FailingAllocator {
                fail_string: Some(failing),
                ..Default::default()
            }
            .shared();

            let result = marshal_strings(&allocator, &["first", "second", "third"]);
            assert!(
                matches!(result, Err(Error::StringAllocFailed(_))),
                "string {failing} should fail"
            );
            assert_eq!(heap.live_strings(), 0);
            assert_eq!(heap.live_arrays(), 0);
        }
    }

    #[test]
    fn argument_allocation_failures() {
        // inner string array
        let (heap, allocator) = FailingAllocator {
            fail_array: Some(0),
            ..Default::default()
        }
        .shared();
        assert!(matches!(
            marshal_arguments(&allocator, &["a", "b"]),
            Err(Error::ArrayAllocFailed { elements: 2 })
        ));
        assert_eq!(heap.live_arrays(), 0);

        // outer parameter array, after the strings were packed
        let (heap, allocator) = FailingAllocator {
            fail_array: Some(1),
            ..Default::default()
        }
        .shared();
        assert!(matches!(
            marshal_arguments(&allocator, &["a", "b"]),
            Err(Error::ArrayAllocFailed { elements: 1 })
        ));
        assert_eq!(heap.live_arrays(), 0);
        assert_eq!(heap.live_strings(), 0);

        // a string inside the inner array
        let (heap, allocator) = FailingAllocator {
            fail_string: Some(1),
            ..Default::default()
        }
        .shared();
        assert!(matches!(
            marshal_arguments(&allocator, &["a", "b"]),
            Err(Error::StringAllocFailed(1))
        ));
        assert_eq!(heap.live_arrays(), 0);
        assert_eq!(heap.live_strings(), 0);
    }

    #[test]
    fn arrays_without_storage_are_rejected() {
        let (heap, allocator) = FailingAllocator {
            detach_storage: true,
            ..Default::default()
        }
        .shared();

        assert!(matches!(
            marshal_bytes(&allocator, b"abc"),
            Err(Error::ArrayAllocFailed { elements: 3 })
        ));
        assert!(matches!(
            marshal_strings(&allocator, &["a", "b"]),
            Err(Error::ArrayAllocFailed { elements: 2 })
        ));
        assert_eq!(heap.live_strings(), 0);
        assert_eq!(heap.live_arrays(), 0);

        // an empty string array needs no storage
        let empty = marshal_strings::<&str>(&allocator, &[]).unwrap();
        assert!(empty.is_empty());
    }
}
