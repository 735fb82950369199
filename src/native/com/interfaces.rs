//! Vtable layouts of the hosting interfaces.
//!
//! Slot order is fixed by `metahost.h`, `mscoree.h` and the `mscorlib` type library. Only the
//! slots the loader calls are typed; the others are kept as opaque pointer-sized entries so
//! every typed slot sits at its native ordinal. The tests pin those ordinals.

use std::ffi::c_void;

use uguid::Guid;

use crate::native::{guids, HResult, SafeArray, Variant};

type This = *mut c_void;
type Slot = usize;

/// A vtable whose first three slots are `IUnknown`.
///
/// # Safety
/// Implementors must be `#[repr(C)]` and begin with an [`UnknownVtbl`].
pub(crate) unsafe trait Interface {
    /// Interface name for diagnostics
    const NAME: &'static str;
}

/// An interface that is obtained through `QueryInterface`.
pub(crate) trait Queryable: Interface {
    const IID: Guid;
}

#[repr(C)]
pub(crate) struct UnknownVtbl {
    pub query_interface: unsafe extern "system" fn(This, *const Guid, *mut This) -> HResult,
    pub add_ref: unsafe extern "system" fn(This) -> u32,
    pub release: unsafe extern "system" fn(This) -> u32,
}

unsafe impl Interface for UnknownVtbl {
    const NAME: &'static str = "IUnknown";
}

/// `IUnknown` followed by the four `IDispatch` slots.
#[repr(C)]
pub(crate) struct DispatchBase {
    pub unknown: UnknownVtbl,
    _dispatch: [Slot; 4],
}

#[repr(C)]
pub(crate) struct MetaHostVtbl {
    pub unknown: UnknownVtbl,
    pub get_runtime: unsafe extern "system" fn(This, *const u16, *const Guid, *mut This) -> HResult,
    _get_version_from_file: Slot,
    pub enumerate_installed_runtimes: unsafe extern "system" fn(This, *mut This) -> HResult,
    _enumerate_loaded_runtimes: Slot,
    _request_runtime_loaded_notification: Slot,
    _query_legacy_v2_runtime_binding: Slot,
    _exit_process: Slot,
}

unsafe impl Interface for MetaHostVtbl {
    const NAME: &'static str = "ICLRMetaHost";
}

#[repr(C)]
pub(crate) struct EnumUnknownVtbl {
    pub unknown: UnknownVtbl,
    pub next: unsafe extern "system" fn(This, u32, *mut This, *mut u32) -> HResult,
    _skip: Slot,
    _reset: Slot,
    _clone: Slot,
}

unsafe impl Interface for EnumUnknownVtbl {
    const NAME: &'static str = "IEnumUnknown";
}

#[repr(C)]
pub(crate) struct RuntimeInfoVtbl {
    pub unknown: UnknownVtbl,
    pub get_version_string: unsafe extern "system" fn(This, *mut u16, *mut u32) -> HResult,
    _get_runtime_directory: Slot,
    _is_loaded: Slot,
    _load_error_string: Slot,
    _load_library: Slot,
    _get_proc_address: Slot,
    pub get_interface:
        unsafe extern "system" fn(This, *const Guid, *const Guid, *mut This) -> HResult,
    pub is_loadable: unsafe extern "system" fn(This, *mut i32) -> HResult,
    _set_default_startup_flags: Slot,
    _get_default_startup_flags: Slot,
    pub bind_as_legacy_v2_runtime: unsafe extern "system" fn(This) -> HResult,
    _is_started: Slot,
}

unsafe impl Interface for RuntimeInfoVtbl {
    const NAME: &'static str = "ICLRRuntimeInfo";
}

impl Queryable for RuntimeInfoVtbl {
    const IID: Guid = guids::IID_ICLR_RUNTIME_INFO;
}

/// `ICorRuntimeHost`
#[repr(C)]
pub(crate) struct CorRuntimeHostVtbl {
    pub unknown: UnknownVtbl,
    // logical thread state, MapFile, GetConfiguration
    _reserved: [Slot; 7],
    pub start: unsafe extern "system" fn(This) -> HResult,
    _stop: Slot,
    _create_domain: Slot,
    pub get_default_domain: unsafe extern "system" fn(This, *mut This) -> HResult,
    _domains: [Slot; 8],
}

unsafe impl Interface for CorRuntimeHostVtbl {
    const NAME: &'static str = "ICorRuntimeHost";
}

/// `ICLRRuntimeHost`
#[repr(C)]
pub(crate) struct ClrRuntimeHostVtbl {
    pub unknown: UnknownVtbl,
    pub start: unsafe extern "system" fn(This) -> HResult,
    _stop: Slot,
    _set_host_control: Slot,
    _get_clr_control: Slot,
    _unload_app_domain: Slot,
    _execute_in_app_domain: Slot,
    _get_current_app_domain_id: Slot,
    _execute_application: Slot,
    pub execute_in_default_app_domain: unsafe extern "system" fn(
        This,
        *const u16,
        *const u16,
        *const u16,
        *const u16,
        *mut u32,
    ) -> HResult,
}

unsafe impl Interface for ClrRuntimeHostVtbl {
    const NAME: &'static str = "ICLRRuntimeHost";
}

/// `_AppDomain`, up to `Load_3`.
#[repr(C)]
pub(crate) struct AppDomainVtbl {
    pub base: DispatchBase,
    // Object members, Evidence, the event accessors, DefineDynamicAssembly, CreateInstance,
    // Load and Load_2
    _members: [Slot; 38],
    pub load_3: unsafe extern "system" fn(This, *mut SafeArray, *mut This) -> HResult,
}

unsafe impl Interface for AppDomainVtbl {
    const NAME: &'static str = "_AppDomain";
}

impl Queryable for AppDomainVtbl {
    const IID: Guid = guids::IID_APP_DOMAIN;
}

/// `_Assembly`, up to `get_EntryPoint`.
#[repr(C)]
pub(crate) struct AssemblyVtbl {
    pub base: DispatchBase,
    // ToString, Equals, GetHashCode, GetType, CodeBase, EscapedCodeBase, GetName, GetName_2
    _members: [Slot; 8],
    pub get_full_name: unsafe extern "system" fn(This, *mut *mut u16) -> HResult,
    pub get_entry_point: unsafe extern "system" fn(This, *mut This) -> HResult,
}

unsafe impl Interface for AssemblyVtbl {
    const NAME: &'static str = "_Assembly";
}

/// `_MethodInfo`, up to `Invoke_3`.
#[repr(C)]
pub(crate) struct MethodInfoVtbl {
    pub base: DispatchBase,
    pub get_to_string: unsafe extern "system" fn(This, *mut *mut u16) -> HResult,
    // Equals through Invoke_2 and the Is* properties
    _members: [Slot; 29],
    pub invoke_3:
        unsafe extern "system" fn(This, Variant, *mut SafeArray, *mut Variant) -> HResult,
}

unsafe impl Interface for MethodInfoVtbl {
    const NAME: &'static str = "_MethodInfo";
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::{offset_of, size_of};

    fn ordinal(offset: usize) -> usize {
        offset / size_of::<usize>()
    }

    #[test]
    fn unknown_and_dispatch() {
        assert_eq!(ordinal(offset_of!(UnknownVtbl, release)), 2);
        assert_eq!(ordinal(size_of::<DispatchBase>()), 7);
    }

    #[test]
    fn hosting_ordinals() {
        assert_eq!(ordinal(offset_of!(MetaHostVtbl, get_runtime)), 3);
        assert_eq!(ordinal(offset_of!(MetaHostVtbl, enumerate_installed_runtimes)), 5);
        assert_eq!(ordinal(offset_of!(EnumUnknownVtbl, next)), 3);
        assert_eq!(ordinal(offset_of!(RuntimeInfoVtbl, get_version_string)), 3);
        assert_eq!(ordinal(offset_of!(RuntimeInfoVtbl, get_interface)), 9);
        assert_eq!(ordinal(offset_of!(RuntimeInfoVtbl, is_loadable)), 10);
        assert_eq!(ordinal(offset_of!(RuntimeInfoVtbl, bind_as_legacy_v2_runtime)), 13);
        assert_eq!(ordinal(offset_of!(CorRuntimeHostVtbl, start)), 10);
        assert_eq!(ordinal(offset_of!(CorRuntimeHostVtbl, get_default_domain)), 13);
        assert_eq!(ordinal(offset_of!(ClrRuntimeHostVtbl, start)), 3);
        assert_eq!(
            ordinal(offset_of!(ClrRuntimeHostVtbl, execute_in_default_app_domain)),
            11
        );
    }

    #[test]
    fn reflection_ordinals() {
        assert_eq!(ordinal(offset_of!(AppDomainVtbl, load_3)), 45);
        assert_eq!(ordinal(offset_of!(AssemblyVtbl, get_full_name)), 15);
        assert_eq!(ordinal(offset_of!(AssemblyVtbl, get_entry_point)), 16);
        assert_eq!(ordinal(offset_of!(MethodInfoVtbl, get_to_string)), 7);
        assert_eq!(ordinal(offset_of!(MethodInfoVtbl, invoke_3)), 37);
    }
}
