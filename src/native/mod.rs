//! Native declarations shared by every runtime backend.
//!
//! This module holds the externally fixed pieces of the hosting boundary: status codes,
//! identifiers, the `SAFEARRAY`/`VARIANT` layouts, UTF-16 helpers and the array/string
//! allocator abstraction. The COM implementation that actually calls into `mscoree.dll` lives
//! in the Windows-only `com` submodule.

pub mod alloc;
pub mod guids;
pub mod hresult;
pub mod types;
pub mod wide;

#[cfg(windows)]
pub(crate) mod com;

pub use alloc::{Allocator, HeapAllocator};
pub use hresult::{HResult, Status};
pub use types::{ArrayFeatures, SafeArray, SafeArrayBound, VarType, Variant, VariantValue};
