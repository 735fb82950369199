//! The COM backend: the runtime installed on this machine, reached through `mscoree.dll`.
//!
//! Both system libraries are resolved at run time with `libloading`, so the crate links on any
//! Windows machine and fails with [`crate::Error::Library`] only when a runtime is actually
//! requested. Every interface pointer is wrapped in a [`ptr::ComPtr`] the moment it is
//! returned, so each acquisition is matched by exactly one `Release`.

mod interfaces;
mod objects;
mod oleaut;
mod ptr;

use std::{ffi::c_void, sync::Arc};

use libloading::Library;
use uguid::Guid;

use crate::{
    native::{guids, Allocator, HResult, Status},
    runtime::{Platform, RuntimeRoot},
    Error, Result,
};

type ClrCreateInstanceFn =
    unsafe extern "system" fn(*const Guid, *const Guid, *mut *mut c_void) -> HResult;

/// The installed runtime, hosted through `CLRCreateInstance`.
pub(crate) struct ComPlatform {
    create_instance: ClrCreateInstanceFn,
    allocator: Arc<oleaut::OleAutomation>,
    _mscoree: Library,
}

impl ComPlatform {
    pub(crate) fn new() -> Result<ComPlatform> {
        let mscoree = unsafe { Library::new("mscoree.dll") }
            .map_err(|error| Error::Library(error.to_string()))?;
        let create_instance: ClrCreateInstanceFn =
            oleaut::symbol(&mscoree, b"CLRCreateInstance\0")?;

        Ok(ComPlatform {
            create_instance,
            allocator: Arc::new(oleaut::OleAutomation::load()?),
            _mscoree: mscoree,
        })
    }
}

impl Platform for ComPlatform {
    fn create_root(&self) -> Status<Box<dyn RuntimeRoot>> {
        let mut out = std::ptr::null_mut();
        let hr = unsafe {
            (self.create_instance)(
                &guids::CLSID_CLR_META_HOST,
                &guids::IID_ICLR_META_HOST,
                &mut out,
            )
        };
        check_hr!(hr, "CLRCreateInstance");

        let root = unsafe { ptr::ComPtr::from_out(out)? };
        Ok(Box::new(objects::MetaHost::new(root, self.allocator())))
    }

    fn allocator(&self) -> Arc<dyn Allocator> {
        self.allocator.clone()
    }
}
