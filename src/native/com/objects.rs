use std::{ffi::c_void, ptr, sync::Arc};

use log::debug;

use super::{
    interfaces::{
        AppDomainVtbl, AssemblyVtbl, ClrRuntimeHostVtbl, CorRuntimeHostVtbl, EnumUnknownVtbl,
        MetaHostVtbl, MethodInfoVtbl, RuntimeInfoVtbl, UnknownVtbl,
    },
    ptr::ComPtr,
};
use crate::{
    marshal::MarshalledArray,
    native::{
        guids,
        wide::{read_wide_buffer, read_wide_cstr, to_wide_cstring, MAX_NATIVE_STRING},
        Allocator, HResult, Status, Variant,
    },
    runtime::{
        CurrentHost, EntryFunction, ExecutionDomain, LegacyHost, LoadedProgram, RuntimeInfo,
        RuntimeRoot,
    },
    Error,
};

/// Decodes a `BSTR` returned by the runtime and frees it.
unsafe fn take_bstr(
    allocator: &dyn Allocator,
    bstr: *mut u16,
    max_len: usize,
) -> crate::Result<String> {
    let text = read_wide_cstr(bstr, max_len);
    allocator.free_string(bstr);
    text
}

fn wide(value: &str) -> Status<widestring::U16CString> {
    to_wide_cstring(value).map_err(|_| HResult::E_INVALIDARG)
}

pub(super) struct MetaHost {
    ptr: ComPtr<MetaHostVtbl>,
    allocator: Arc<dyn Allocator>,
}

impl MetaHost {
    pub(super) fn new(ptr: ComPtr<MetaHostVtbl>, allocator: Arc<dyn Allocator>) -> MetaHost {
        MetaHost { ptr, allocator }
    }
}

impl RuntimeRoot for MetaHost {
    fn installed_runtimes(&self, buffer_len: u32) -> Status<Vec<String>> {
        let mut out = ptr::null_mut();
        let hr =
            unsafe { (self.ptr.vtbl().enumerate_installed_runtimes)(self.ptr.this(), &mut out) };
        check_hr!(hr, "ICLRMetaHost::EnumerateInstalledRuntimes");
        let runtimes = unsafe { ComPtr::<EnumUnknownVtbl>::from_out(out)? };

        let mut versions = Vec::new();
        loop {
            let mut item: *mut c_void = ptr::null_mut();
            let mut fetched = 0_u32;
            let hr = unsafe { (runtimes.vtbl().next)(runtimes.this(), 1, &mut item, &mut fetched) };
            if hr == HResult::S_FALSE {
                break;
            }
            check_hr!(hr, "IEnumUnknown::Next");

            let Some(item) = (unsafe { ComPtr::<UnknownVtbl>::from_raw(item) }) else {
                break;
            };
            let info = item.query::<RuntimeInfoVtbl>()?;

            let mut buffer = vec![0_u16; buffer_len as usize];
            let mut len = buffer_len;
            let hr = unsafe {
                (info.vtbl().get_version_string)(info.this(), buffer.as_mut_ptr(), &mut len)
            };
            check_hr!(hr, "ICLRRuntimeInfo::GetVersionString");

            let version = read_wide_buffer(&buffer).map_err(|error| {
                debug!("Undecodable runtime version - {error}");
                HResult::E_POINTER
            })?;
            versions.push(version);
        }
        Ok(versions)
    }

    fn runtime(&self, version: &str) -> Status<Box<dyn RuntimeInfo>> {
        let version = wide(version)?;
        let mut out = ptr::null_mut();
        let hr = unsafe {
            (self.ptr.vtbl().get_runtime)(
                self.ptr.this(),
                version.as_ptr(),
                &guids::IID_ICLR_RUNTIME_INFO,
                &mut out,
            )
        };
        check_hr!(hr, "ICLRMetaHost::GetRuntime");

        Ok(Box::new(Info {
            ptr: unsafe { ComPtr::from_out(out)? },
            allocator: Arc::clone(&self.allocator),
        }))
    }
}

struct Info {
    ptr: ComPtr<RuntimeInfoVtbl>,
    allocator: Arc<dyn Allocator>,
}

impl Info {
    fn interface(&self, class: &uguid::Guid, interface: &uguid::Guid) -> Status<*mut c_void> {
        let mut out = ptr::null_mut();
        let hr = unsafe {
            (self.ptr.vtbl().get_interface)(self.ptr.this(), class, interface, &mut out)
        };
        check_hr!(hr, "ICLRRuntimeInfo::GetInterface");
        Ok(out)
    }
}

impl RuntimeInfo for Info {
    fn is_loadable(&self) -> Status<bool> {
        let mut loadable = 0_i32;
        let hr = unsafe { (self.ptr.vtbl().is_loadable)(self.ptr.this(), &mut loadable) };
        check_hr!(hr, "ICLRRuntimeInfo::IsLoadable");
        Ok(loadable != 0)
    }

    fn bind_as_legacy_v2(&self) -> Status<()> {
        let hr = unsafe { (self.ptr.vtbl().bind_as_legacy_v2_runtime)(self.ptr.this()) };
        check_hr!(hr, "ICLRRuntimeInfo::BindAsLegacyV2Runtime");
        Ok(())
    }

    fn legacy_host(&self) -> Status<Box<dyn LegacyHost>> {
        let out = self.interface(&guids::CLSID_COR_RUNTIME_HOST, &guids::IID_ICOR_RUNTIME_HOST)?;
        Ok(Box::new(CorHost {
            ptr: unsafe { ComPtr::from_out(out)? },
            allocator: Arc::clone(&self.allocator),
        }))
    }

    fn current_host(&self) -> Status<Box<dyn CurrentHost>> {
        let out = self.interface(&guids::CLSID_CLR_RUNTIME_HOST, &guids::IID_ICLR_RUNTIME_HOST)?;
        Ok(Box::new(ClrHost {
            ptr: unsafe { ComPtr::from_out(out)? },
        }))
    }
}

struct CorHost {
    ptr: ComPtr<CorRuntimeHostVtbl>,
    allocator: Arc<dyn Allocator>,
}

impl LegacyHost for CorHost {
    fn start(&self) -> Status<()> {
        let hr = unsafe { (self.ptr.vtbl().start)(self.ptr.this()) };
        check_hr!(hr, "ICorRuntimeHost::Start");
        Ok(())
    }

    fn default_domain(&self) -> Status<Box<dyn ExecutionDomain>> {
        let mut out = ptr::null_mut();
        let hr = unsafe { (self.ptr.vtbl().get_default_domain)(self.ptr.this(), &mut out) };
        check_hr!(hr, "ICorRuntimeHost::GetDefaultDomain");

        let unknown = unsafe { ComPtr::<UnknownVtbl>::from_out(out)? };
        Ok(Box::new(Domain {
            ptr: unknown.query::<AppDomainVtbl>()?,
            allocator: Arc::clone(&self.allocator),
        }))
    }
}

struct ClrHost {
    ptr: ComPtr<ClrRuntimeHostVtbl>,
}

impl CurrentHost for ClrHost {
    fn start(&self) -> Status<()> {
        let hr = unsafe { (self.ptr.vtbl().start)(self.ptr.this()) };
        check_hr!(hr, "ICLRRuntimeHost::Start");
        Ok(())
    }

    fn execute_in_default_domain(
        &self,
        path: &str,
        type_name: &str,
        method: &str,
        argument: &str,
    ) -> Status<u32> {
        let (path, type_name, method, argument) =
            (wide(path)?, wide(type_name)?, wide(method)?, wide(argument)?);

        let mut code = 0_u32;
        let hr = unsafe {
            (self.ptr.vtbl().execute_in_default_app_domain)(
                self.ptr.this(),
                path.as_ptr(),
                type_name.as_ptr(),
                method.as_ptr(),
                argument.as_ptr(),
                &mut code,
            )
        };
        check_hr!(hr, "ICLRRuntimeHost::ExecuteInDefaultAppDomain");
        Ok(code)
    }
}

struct Domain {
    ptr: ComPtr<AppDomainVtbl>,
    allocator: Arc<dyn Allocator>,
}

impl ExecutionDomain for Domain {
    fn load(&self, image: &MarshalledArray) -> Status<Box<dyn LoadedProgram>> {
        let mut out = ptr::null_mut();
        let hr = unsafe { (self.ptr.vtbl().load_3)(self.ptr.this(), image.as_ptr(), &mut out) };
        check_hr!(hr, "_AppDomain::Load_3");

        Ok(Box::new(Assembly {
            ptr: unsafe { ComPtr::from_out(out)? },
            allocator: Arc::clone(&self.allocator),
        }))
    }
}

struct Assembly {
    ptr: ComPtr<AssemblyVtbl>,
    allocator: Arc<dyn Allocator>,
}

impl LoadedProgram for Assembly {
    fn full_name(&self) -> Status<String> {
        let mut name = ptr::null_mut();
        let hr = unsafe { (self.ptr.vtbl().get_full_name)(self.ptr.this(), &mut name) };
        check_hr!(hr, "_Assembly::get_FullName");

        unsafe { take_bstr(self.allocator.as_ref(), name, MAX_NATIVE_STRING) }.map_err(|error| {
            debug!("Undecodable assembly name - {error}");
            HResult::E_POINTER
        })
    }

    fn entry_point(&self) -> Status<Option<Box<dyn EntryFunction>>> {
        let mut out = ptr::null_mut();
        let hr = unsafe { (self.ptr.vtbl().get_entry_point)(self.ptr.this(), &mut out) };
        check_hr!(hr, "_Assembly::get_EntryPoint");

        Ok(unsafe { ComPtr::from_raw(out) }.map(|ptr| {
            Box::new(Method {
                ptr,
                allocator: Arc::clone(&self.allocator),
            }) as Box<dyn EntryFunction>
        }))
    }
}

struct Method {
    ptr: ComPtr<MethodInfoVtbl>,
    allocator: Arc<dyn Allocator>,
}

impl EntryFunction for Method {
    fn signature(&self, max_len: usize) -> crate::Result<String> {
        let mut text = ptr::null_mut();
        let hr = unsafe { (self.ptr.vtbl().get_to_string)(self.ptr.this(), &mut text) };
        if !hr.is_ok() {
            return Err(Error::Native {
                call: "_MethodInfo::get_ToString",
                hr,
            });
        }

        unsafe { take_bstr(self.allocator.as_ref(), text, max_len) }
    }

    fn invoke(&self, target: &Variant, parameters: Option<&MarshalledArray>) -> Status<Variant> {
        let parameters = parameters.map_or(ptr::null_mut(), MarshalledArray::as_ptr);
        let mut returned = Variant::empty();

        let hr = unsafe {
            (self.ptr.vtbl().invoke_3)(self.ptr.this(), *target, parameters, &mut returned)
        };
        check_hr!(hr, "_MethodInfo::Invoke_3");
        Ok(returned)
    }
}
