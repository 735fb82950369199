//! Fixed native memory layouts shared with the runtime.
//!
//! These structures are read and written by the runtime through raw pointers; their field
//! order, sizes and alignment are defined by OLE Automation (`OAIdl.h`) and must not change.
//! The tests at the bottom pin the layouts for both pointer widths.

use std::{ffi::c_void, fmt, mem::size_of};

use bitflags::bitflags;
use strum::{Display, FromRepr};

/// Modifier bit: the variant holds a `SAFEARRAY*` of the masked element type.
pub const VT_ARRAY: u16 = 0x2000;
/// Modifier bit: the variant holds a pointer to the value.
pub const VT_BYREF: u16 = 0x4000;
/// Mask extracting the element type from a modified variant type.
pub const VT_TYPEMASK: u16 = 0x0FFF;

/// Element and variant type discriminators (`VARTYPE`) used by the loader.
#[allow(missing_docs)]
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, FromRepr)]
#[strum(serialize_all = "UPPERCASE")]
pub enum VarType {
    Empty = 0,
    Null = 1,
    I2 = 2,
    I4 = 3,
    R4 = 4,
    R8 = 5,
    Cy = 6,
    Date = 7,
    Bstr = 8,
    Dispatch = 9,
    Error = 10,
    Bool = 11,
    Variant = 12,
    Unknown = 13,
    Decimal = 14,
    I1 = 16,
    Ui1 = 17,
    Ui2 = 18,
    Ui4 = 19,
    I8 = 20,
    Ui8 = 21,
    Int = 22,
    Uint = 23,
}

impl VarType {
    /// Size in bytes of one array element of this type, as `SafeArrayCreate` computes it.
    ///
    /// Returns `None` for types that cannot be array elements.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn element_size(self) -> Option<u32> {
        match self {
            VarType::Empty | VarType::Null => None,
            VarType::I1 | VarType::Ui1 => Some(1),
            VarType::I2 | VarType::Ui2 | VarType::Bool => Some(2),
            VarType::I4
            | VarType::Ui4
            | VarType::R4
            | VarType::Int
            | VarType::Uint
            | VarType::Error => Some(4),
            VarType::I8 | VarType::Ui8 | VarType::R8 | VarType::Cy | VarType::Date => Some(8),
            VarType::Bstr | VarType::Dispatch | VarType::Unknown => Some(size_of::<usize>() as u32),
            VarType::Decimal => Some(16),
            VarType::Variant => Some(size_of::<Variant>() as u32),
        }
    }

    /// The feature flags `SafeArrayCreate` records for an array of this element type.
    #[must_use]
    pub const fn array_features(self) -> ArrayFeatures {
        match self {
            VarType::Bstr => ArrayFeatures::HAVEVARTYPE.union(ArrayFeatures::BSTR),
            VarType::Variant => ArrayFeatures::HAVEVARTYPE.union(ArrayFeatures::VARIANT),
            VarType::Unknown => ArrayFeatures::HAVEVARTYPE.union(ArrayFeatures::UNKNOWN),
            VarType::Dispatch => ArrayFeatures::HAVEVARTYPE.union(ArrayFeatures::DISPATCH),
            _ => ArrayFeatures::HAVEVARTYPE,
        }
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    /// `SAFEARRAY::fFeatures` (`FADF_*`)
    pub struct ArrayFeatures: u16 {
        /// Allocated on the stack
        const AUTO = 0x0001;
        /// Statically allocated
        const STATIC = 0x0002;
        /// Embedded in a structure
        const EMBEDDED = 0x0004;
        /// May not be resized or reallocated
        const FIXEDSIZE = 0x0010;
        /// Contains records
        const RECORD = 0x0020;
        /// Has an IID identifying the interface
        const HAVEIID = 0x0040;
        /// Has a VT type
        const HAVEVARTYPE = 0x0080;
        /// Contains BSTRs
        const BSTR = 0x0100;
        /// Contains IUnknown pointers
        const UNKNOWN = 0x0200;
        /// Contains IDispatch pointers
        const DISPATCH = 0x0400;
        /// Contains VARIANTs
        const VARIANT = 0x0800;
    }
}

/// One dimension of a [`SafeArray`] (`SAFEARRAYBOUND`).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SafeArrayBound {
    /// Number of elements in the dimension
    pub c_elements: u32,
    /// Lower bound of the dimension
    pub l_lbound: i32,
}

/// A one-dimensional `SAFEARRAY` header.
///
/// The runtime only ever receives one-dimensional arrays from this crate, so the bound array
/// has a single entry. The element storage at `pv_data` is owned by whichever allocator created
/// the header.
#[repr(C)]
#[derive(Debug)]
pub struct SafeArray {
    /// Number of dimensions
    pub c_dims: u16,
    /// Feature flags, see [`ArrayFeatures`]
    pub f_features: u16,
    /// Size of one element in bytes
    pub cb_elements: u32,
    /// Lock count
    pub c_locks: u32,
    /// Pointer to the element storage
    pub pv_data: *mut c_void,
    /// Bounds, one per dimension
    pub rgsabound: [SafeArrayBound; 1],
}

impl SafeArray {
    /// The decoded feature flags.
    #[must_use]
    pub fn features(&self) -> ArrayFeatures {
        ArrayFeatures::from_bits_truncate(self.f_features)
    }

    /// Number of elements in the (single) dimension.
    #[must_use]
    pub fn len(&self) -> u32 {
        self.rgsabound[0].c_elements
    }

    /// Returns `true` if the array holds no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total size of the element storage in bytes.
    #[must_use]
    pub fn data_len(&self) -> usize {
        self.cb_elements as usize * self.len() as usize
    }
}

/// The payload word of a [`Variant`].
///
/// The largest member is the two-pointer record reference, which makes the union 8 bytes on
/// 32-bit targets and 16 bytes on 64-bit targets.
#[allow(missing_docs)]
#[repr(C)]
#[derive(Clone, Copy)]
pub union VariantValue {
    pub l_val: i32,
    pub ll_val: i64,
    pub ptr: *mut c_void,
    pub parray: *mut SafeArray,
    pub bstr: *mut u16,
    record: [*mut c_void; 2],
}

/// A tagged union passed by value across the invocation boundary (`VARIANT`).
#[repr(C)]
#[derive(Clone, Copy)]
pub struct Variant {
    /// The type discriminator; see [`VarType`] and [`VT_ARRAY`]
    pub vt: u16,
    reserved: [u16; 3],
    /// The payload
    pub value: VariantValue,
}

impl Variant {
    /// A variant with no value (`VT_EMPTY`), as returned by `void` methods.
    #[must_use]
    pub const fn empty() -> Variant {
        Variant {
            vt: VarType::Empty as u16,
            reserved: [0; 3],
            value: VariantValue { record: [std::ptr::null_mut(); 2] },
        }
    }

    /// The "no target object" argument used to invoke static methods: tag 1, payload 0.
    #[must_use]
    pub const fn null() -> Variant {
        let mut variant = Variant::empty();
        variant.vt = VarType::Null as u16;
        variant
    }

    /// A 32-bit integer variant (`VT_I4`).
    #[must_use]
    pub fn i32(value: i32) -> Variant {
        let mut variant = Variant::empty();
        variant.vt = VarType::I4 as u16;
        variant.value.l_val = value;
        variant
    }

    /// A variant referencing an array of `element` (`VT_ARRAY | element`).
    ///
    /// The variant takes over the array; whoever clears the variant destroys the array.
    #[must_use]
    pub fn array(element: VarType, array: *mut SafeArray) -> Variant {
        let mut variant = Variant::empty();
        variant.vt = VT_ARRAY | element as u16;
        variant.value.parray = array;
        variant
    }

    /// The element type of an array variant, or `None` if this is not an array.
    #[must_use]
    pub fn array_element(&self) -> Option<VarType> {
        if self.vt & VT_ARRAY == 0 {
            return None;
        }
        VarType::from_repr(self.vt & VT_TYPEMASK)
    }

    /// The integer payload if this is a `VT_I4` variant.
    #[must_use]
    pub fn as_i32(&self) -> Option<i32> {
        if self.vt == VarType::I4 as u16 {
            // Tag checked above
            Some(unsafe { self.value.l_val })
        } else {
            None
        }
    }

    /// The array payload if this is an array variant.
    #[must_use]
    pub fn as_array(&self) -> Option<*mut SafeArray> {
        self.array_element().map(|_| unsafe { self.value.parray })
    }

    /// Returns `true` for `VT_EMPTY`.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vt == VarType::Empty as u16
    }
}

impl Default for Variant {
    fn default() -> Self {
        Variant::empty()
    }
}

impl fmt::Debug for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = f.debug_struct("Variant");
        out.field("vt", &format_args!("{:#06x}", self.vt));
        if let Some(value) = self.as_i32() {
            out.field("value", &value);
        } else if !self.is_empty() && self.vt != VarType::Null as u16 {
            out.field("ptr", &unsafe { self.value.ptr });
        }
        out.finish()
    }
}
