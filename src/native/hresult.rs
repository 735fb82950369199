//! Native status codes.
//!
//! Every method of the hosting interfaces returns an `HRESULT`: a 32-bit value whose sign bit
//! marks failure. The loader compares against the single success sentinel [`HResult::S_OK`],
//! not the sign bit: `IEnumUnknown::Next` signals exhaustion with the non-failure `S_FALSE`.

use std::fmt;

/// A raw native status code, layout-compatible with `HRESULT`.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct HResult(pub i32);

#[allow(clippy::cast_possible_wrap)]
impl HResult {
    /// Operation succeeded
    pub const S_OK: HResult = HResult(0);
    /// Operation succeeded with a negative outcome (e.g. an enumerator is exhausted)
    pub const S_FALSE: HResult = HResult(1);
    /// Unspecified failure
    pub const E_FAIL: HResult = HResult(0x8000_4005_u32 as i32);
    /// A required pointer was null
    pub const E_POINTER: HResult = HResult(0x8000_4003_u32 as i32);
    /// An argument was invalid
    pub const E_INVALIDARG: HResult = HResult(0x8007_0057_u32 as i32);
    /// The requested interface is not supported
    pub const E_NOINTERFACE: HResult = HResult(0x8000_4002_u32 as i32);
    /// `BadImageFormatException` - the bytes are not a valid program image
    pub const COR_E_BADIMAGEFORMAT: HResult = HResult(0x8007_000B_u32 as i32);
    /// `SafeArrayRankMismatchException`
    pub const COR_E_SAFEARRAYRANKMISMATCH: HResult = HResult(0x8013_1538_u32 as i32);
    /// Invalid number of parameters
    pub const DISP_E_BADPARAMCOUNT: HResult = HResult(0x8002_000E_u32 as i32);
    /// The array is locked and cannot be destroyed
    pub const DISP_E_ARRAYISLOCKED: HResult = HResult(0x8002_000D_u32 as i32);
    /// `TargetInvocationException` - the invoked method threw
    pub const COR_E_TARGETINVOCATION: HResult = HResult(0x8013_1604_u32 as i32);

    /// Returns `true` only for [`HResult::S_OK`].
    #[must_use]
    pub const fn is_ok(self) -> bool {
        self.0 == Self::S_OK.0
    }

    /// Returns `true` if the severity bit is set.
    #[must_use]
    pub const fn is_failure(self) -> bool {
        self.0 < 0
    }

    /// The status reinterpreted as an unsigned value, as it is usually printed.
    #[must_use]
    #[allow(clippy::cast_sign_loss)]
    pub const fn code(self) -> u32 {
        self.0 as u32
    }

    /// Converts a status into a [`Status`], mapping `S_OK` to `Ok(())`.
    ///
    /// # Errors
    /// Returns the status itself if it is not `S_OK`.
    pub const fn ok(self) -> Status<()> {
        if self.is_ok() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for HResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.code())
    }
}

impl fmt::Debug for HResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HResult(0x{:08X})", self.code())
    }
}

impl From<u32> for HResult {
    #[allow(clippy::cast_possible_wrap)]
    fn from(value: u32) -> Self {
        HResult(value as i32)
    }
}

/// The outcome of a single native call: the value it produced, or the status it failed with.
pub type Status<T> = std::result::Result<T, HResult>;
