//! An in-memory runtime for tests and non-Windows development.
//!
//! [`FakePlatform`] implements every capability trait of [`crate::runtime`] without a native
//! runtime. Results are scripted up front; every acquisition, release and call is recorded as
//! an [`Event`], so tests can assert on ordering. Arrays and strings go through a
//! [`HeapAllocator`], which uses the native layouts and counts live allocations.
//!
//! Programs are registered by their exact bytes. Loading any other bytes fails with
//! `COR_E_BADIMAGEFORMAT`, like the runtime does for non-program buffers.
//!
//! # Examples
//!
//! ```rust
//! use clrhost::fake::{synthetic_image, FakePlatform, FakeProgram};
//! use clrhost::{Image, ImageKind, Loader, LoaderConfig};
//!
//! let bytes = synthetic_image(ImageKind::Executable, b"answer");
//! let platform =
//!     FakePlatform::new().with_program(&bytes, FakeProgram::returning("Int32 Main()", 42));
//!
//! let loader = Loader::new(platform.clone(), LoaderConfig::default())?;
//! assert_eq!(loader.execute(&Image::from_mem(bytes)?, &[] as &[&str])?, 42);
//! # Ok::<(), clrhost::Error>(())
//! ```

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use crate::{
    image::{header::METADATA_SIGNATURE, ImageId, ImageKind},
    marshal::{read_parameters, MarshalledArray},
    native::{
        wide::{read_wide_cstr, to_wide_cstring},
        Allocator, HResult, HeapAllocator, Status, VarType, Variant,
    },
    program::takes_no_arguments,
    runtime::{
        CurrentHost, EntryFunction, ExecutionDomain, LegacyHost, LoadedProgram, Platform,
        RuntimeInfo, RuntimeRoot,
    },
    Error,
};

/// A native object handed out by the fake runtime.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Handle {
    /// The hosting root
    Root,
    /// A runtime version
    RuntimeInfo(String),
    /// The legacy host
    LegacyHost,
    /// The current-generation host
    CurrentHost,
    /// The default domain
    Domain,
    /// A loaded program, by name
    Program(String),
    /// An entry function, by the name of its program
    EntryFunction(String),
}

/// Something that happened in the fake runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A handle was created
    Acquired(Handle),
    /// A handle was released
    Released(Handle),
    /// `BindAsLegacyV2Runtime` succeeded
    BoundLegacy(String),
    /// A host was started
    Started(Handle),
    /// An image was loaded into the domain
    Loaded(ImageId),
    /// An entry function was invoked
    Invoked {
        /// Name of the program
        program: String,
        /// The decoded parameter array: one entry per parameter, each a list of strings
        parameters: Option<Vec<Vec<String>>>,
    },
    /// `ExecuteInDefaultAppDomain` was called
    Executed {
        /// Assembly path
        path: String,
        /// Type name
        type_name: String,
        /// Method name
        method: String,
        /// The single string argument
        argument: String,
    },
}

/// A native call of the fake runtime that can be scripted to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FakeCall {
    /// `CLRCreateInstance`
    CreateRoot,
    /// `EnumerateInstalledRuntimes`
    Enumerate,
    /// `GetRuntime`
    GetRuntime,
    /// `IsLoadable`
    IsLoadable,
    /// `BindAsLegacyV2Runtime`
    BindLegacy,
    /// `GetInterface` for either host
    GetHost,
    /// `Start` of either host
    Start,
    /// `GetDefaultDomain`
    DefaultDomain,
    /// `Load_3`
    Load,
    /// `get_EntryPoint`
    EntryPoint,
    /// `get_ToString` of the entry function
    Signature,
    /// `ExecuteInDefaultAppDomain`
    Execute,
}

/// What an invoked fake entry point returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FakeReturn {
    /// Nothing (`VT_EMPTY`)
    Void,
    /// A fixed `VT_I4`
    Int32(i32),
    /// The number of strings in the first parameter, as `VT_I4`
    ArgumentCount,
    /// A `VT_BSTR`, which hosted entry points never return
    String(String),
    /// The invocation fails with this status
    Throws(HResult),
}

/// A program known to the fake runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeProgram {
    name: String,
    signature: Option<String>,
    returns: FakeReturn,
}

impl FakeProgram {
    /// An entry point with `signature` that returns `code`.
    #[must_use]
    pub fn returning(signature: &str, code: i32) -> FakeProgram {
        FakeProgram {
            name: "Program, Version=1.0.0.0, Culture=neutral, PublicKeyToken=null".to_string(),
            signature: Some(signature.to_string()),
            returns: FakeReturn::Int32(code),
        }
    }

    /// A `void` entry point with `signature`.
    #[must_use]
    pub fn void(signature: &str) -> FakeProgram {
        FakeProgram {
            returns: FakeReturn::Void,
            ..FakeProgram::returning(signature, 0)
        }
    }

    /// A library without an entry point.
    #[must_use]
    pub fn library(name: &str) -> FakeProgram {
        FakeProgram {
            name: name.to_string(),
            signature: None,
            returns: FakeReturn::Void,
        }
    }

    /// Sets the program's display name.
    #[must_use]
    pub fn named(mut self, name: &str) -> FakeProgram {
        self.name = name.to_string();
        self
    }

    /// Sets what the entry point returns.
    #[must_use]
    pub fn returns(mut self, returns: FakeReturn) -> FakeProgram {
        self.returns = returns;
        self
    }
}

#[derive(Debug)]
struct Script {
    runtimes: Vec<String>,
    loadable: bool,
    failures: HashMap<FakeCall, HResult>,
    programs: HashMap<Vec<u8>, FakeProgram>,
    execute_result: u32,
}

impl Default for Script {
    fn default() -> Self {
        Script {
            runtimes: vec!["v2.0.50727".to_string(), "v4.0.30319".to_string()],
            loadable: true,
            failures: HashMap::new(),
            programs: HashMap::new(),
            execute_result: 0,
        }
    }
}

#[derive(Debug, Default)]
struct State {
    script: Mutex<Script>,
    events: Mutex<Vec<Event>>,
    heap: Arc<HeapAllocator>,
}

impl State {
    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn record(&self, event: Event) {
        self.events
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(event);
    }

    fn check(&self, call: FakeCall) -> Status<()> {
        match self.script().failures.get(&call) {
            Some(hr) => Err(*hr),
            None => Ok(()),
        }
    }
}

/// A scripted runtime platform; clones share the script and the event log.
#[derive(Debug, Clone, Default)]
pub struct FakePlatform {
    state: Arc<State>,
}

impl FakePlatform {
    /// A platform with `v2.0.50727` and `v4.0.30319` installed and no programs.
    #[must_use]
    pub fn new() -> FakePlatform {
        FakePlatform::default()
    }

    /// Replaces the installed runtime versions.
    #[must_use]
    pub fn with_runtimes(self, versions: &[&str]) -> FakePlatform {
        self.state.script().runtimes = versions.iter().map(ToString::to_string).collect();
        self
    }

    /// Makes every runtime report itself as not loadable.
    #[must_use]
    pub fn unloadable(self) -> FakePlatform {
        self.state.script().loadable = false;
        self
    }

    /// Makes `call` fail with `hr`.
    #[must_use]
    pub fn failing(self, call: FakeCall, hr: HResult) -> FakePlatform {
        self.state.script().failures.insert(call, hr);
        self
    }

    /// Registers a program for the exact image `bytes`.
    #[must_use]
    pub fn with_program(self, bytes: &[u8], program: FakeProgram) -> FakePlatform {
        self.state.script().programs.insert(bytes.to_vec(), program);
        self
    }

    /// Sets the value `ExecuteInDefaultAppDomain` returns.
    #[must_use]
    pub fn with_execute_result(self, code: u32) -> FakePlatform {
        self.state.script().execute_result = code;
        self
    }

    /// Everything recorded so far, in order.
    pub fn events(&self) -> Vec<Event> {
        self.state
            .events
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Handles acquired so far, in acquisition order.
    pub fn acquired(&self) -> Vec<Handle> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Acquired(handle) => Some(handle),
                _ => None,
            })
            .collect()
    }

    /// Handles released so far, in release order.
    pub fn released(&self) -> Vec<Handle> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Released(handle) => Some(handle),
                _ => None,
            })
            .collect()
    }

    /// The parameter arrays of every invocation, in order.
    pub fn invocations(&self) -> Vec<Option<Vec<Vec<String>>>> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Invoked { parameters, .. } => Some(parameters),
                _ => None,
            })
            .collect()
    }

    /// The allocator backing this platform.
    pub fn heap(&self) -> &HeapAllocator {
        &self.state.heap
    }
}

impl Platform for FakePlatform {
    fn create_root(&self) -> Status<Box<dyn RuntimeRoot>> {
        self.state.check(FakeCall::CreateRoot)?;
        Ok(Box::new(FakeObject::new(&self.state, Handle::Root, ())))
    }

    fn allocator(&self) -> Arc<dyn Allocator> {
        self.state.heap.clone()
    }
}

/// A recorded handle: logs its acquisition on creation and its release on drop.
struct FakeObject<T> {
    state: Arc<State>,
    handle: Handle,
    inner: T,
}

impl<T> FakeObject<T> {
    fn new(state: &Arc<State>, handle: Handle, inner: T) -> FakeObject<T> {
        state.record(Event::Acquired(handle.clone()));
        FakeObject {
            state: Arc::clone(state),
            handle,
            inner,
        }
    }

    fn child<U>(&self, handle: Handle, inner: U) -> FakeObject<U> {
        FakeObject::new(&self.state, handle, inner)
    }
}

impl<T> Drop for FakeObject<T> {
    fn drop(&mut self) {
        self.state.record(Event::Released(self.handle.clone()));
    }
}

impl RuntimeRoot for FakeObject<()> {
    fn installed_runtimes(&self, buffer_len: u32) -> Status<Vec<String>> {
        self.state.check(FakeCall::Enumerate)?;
        let runtimes = self.state.script().runtimes.clone();

        // GetVersionString needs room for the terminator
        if runtimes
            .iter()
            .any(|version| version.encode_utf16().count() >= buffer_len as usize)
        {
            return Err(HResult::from(0x8007_007A)); // ERROR_INSUFFICIENT_BUFFER
        }
        Ok(runtimes)
    }

    fn runtime(&self, version: &str) -> Status<Box<dyn RuntimeInfo>> {
        self.state.check(FakeCall::GetRuntime)?;
        if !self.state.script().runtimes.iter().any(|v| v == version) {
            return Err(HResult::E_INVALIDARG);
        }

        Ok(Box::new(self.child(
            Handle::RuntimeInfo(version.to_string()),
            version.to_string(),
        )))
    }
}

impl RuntimeInfo for FakeObject<String> {
    fn is_loadable(&self) -> Status<bool> {
        self.state.check(FakeCall::IsLoadable)?;
        Ok(self.state.script().loadable)
    }

    fn bind_as_legacy_v2(&self) -> Status<()> {
        self.state.check(FakeCall::BindLegacy)?;
        self.state.record(Event::BoundLegacy(self.inner.clone()));
        Ok(())
    }

    fn legacy_host(&self) -> Status<Box<dyn LegacyHost>> {
        self.state.check(FakeCall::GetHost)?;
        Ok(Box::new(self.child(Handle::LegacyHost, Legacy)))
    }

    fn current_host(&self) -> Status<Box<dyn CurrentHost>> {
        self.state.check(FakeCall::GetHost)?;
        Ok(Box::new(self.child(Handle::CurrentHost, Current)))
    }
}

struct Legacy;
struct Current;
struct Domain;

impl LegacyHost for FakeObject<Legacy> {
    fn start(&self) -> Status<()> {
        self.state.check(FakeCall::Start)?;
        self.state.record(Event::Started(Handle::LegacyHost));
        Ok(())
    }

    fn default_domain(&self) -> Status<Box<dyn ExecutionDomain>> {
        self.state.check(FakeCall::DefaultDomain)?;
        Ok(Box::new(self.child(Handle::Domain, Domain)))
    }
}

impl CurrentHost for FakeObject<Current> {
    fn start(&self) -> Status<()> {
        self.state.check(FakeCall::Start)?;
        self.state.record(Event::Started(Handle::CurrentHost));
        Ok(())
    }

    fn execute_in_default_domain(
        &self,
        path: &str,
        type_name: &str,
        method: &str,
        argument: &str,
    ) -> Status<u32> {
        self.state.check(FakeCall::Execute)?;
        self.state.record(Event::Executed {
            path: path.to_string(),
            type_name: type_name.to_string(),
            method: method.to_string(),
            argument: argument.to_string(),
        });
        Ok(self.state.script().execute_result)
    }
}

impl ExecutionDomain for FakeObject<Domain> {
    fn load(&self, image: &MarshalledArray) -> Status<Box<dyn LoadedProgram>> {
        self.state.check(FakeCall::Load)?;

        let bytes = image.to_bytes().map_err(|_| HResult::E_INVALIDARG)?;
        let Some(program) = self.state.script().programs.get(&bytes).cloned() else {
            return Err(HResult::COR_E_BADIMAGEFORMAT);
        };

        self.state.record(Event::Loaded(ImageId::of(&bytes)));
        Ok(Box::new(self.child(
            Handle::Program(program.name.clone()),
            program,
        )))
    }
}

impl LoadedProgram for FakeObject<FakeProgram> {
    fn full_name(&self) -> Status<String> {
        Ok(self.inner.name.clone())
    }

    fn entry_point(&self) -> Status<Option<Box<dyn EntryFunction>>> {
        self.state.check(FakeCall::EntryPoint)?;
        if self.inner.signature.is_none() {
            return Ok(None);
        }

        Ok(Some(Box::new(self.child(
            Handle::EntryFunction(self.inner.name.clone()),
            Entry(self.inner.clone()),
        ))))
    }
}

struct Entry(FakeProgram);

impl FakeObject<Entry> {
    fn signature_text(&self) -> &str {
        self.inner.0.signature.as_deref().unwrap_or_default()
    }
}

impl EntryFunction for FakeObject<Entry> {
    fn signature(&self, max_len: usize) -> crate::Result<String> {
        self.state
            .check(FakeCall::Signature)
            .map_err(|hr| Error::Native {
                call: "_MethodInfo::get_ToString",
                hr,
            })?;

        // decoded with the same bounded scan as a native BSTR
        let text = to_wide_cstring(self.signature_text())?;
        unsafe { read_wide_cstr(text.as_ptr(), max_len) }
    }

    fn invoke(&self, target: &Variant, parameters: Option<&MarshalledArray>) -> Status<Variant> {
        if target.vt != VarType::Null as u16 {
            return Err(HResult::E_INVALIDARG);
        }

        let decoded = match parameters {
            Some(array) => Some(
                unsafe { read_parameters(array.as_ptr()) }
                    .map_err(|_| HResult::COR_E_SAFEARRAYRANKMISMATCH)?,
            ),
            None => None,
        };

        self.state.record(Event::Invoked {
            program: self.inner.0.name.clone(),
            parameters: decoded.clone(),
        });

        let expects_parameters = !takes_no_arguments(self.signature_text());
        if expects_parameters != decoded.is_some() {
            return Err(HResult::DISP_E_BADPARAMCOUNT);
        }

        match &self.inner.0.returns {
            FakeReturn::Void => Ok(Variant::empty()),
            FakeReturn::Int32(code) => Ok(Variant::i32(*code)),
            FakeReturn::ArgumentCount => {
                let count = decoded.as_ref().and_then(|p| p.first()).map_or(0, Vec::len);
                Ok(Variant::i32(i32::try_from(count).unwrap_or(i32::MAX)))
            }
            FakeReturn::String(text) => {
                let units: Vec<u16> = text.encode_utf16().collect();
                let mut variant = Variant::empty();
                variant.vt = VarType::Bstr as u16;
                variant.value.bstr = self.state.heap.alloc_string(&units);
                Ok(variant)
            }
            FakeReturn::Throws(hr) => Err(*hr),
        }
    }
}

const PE_OFFSET: usize = 0x80;
const OPTIONAL_HEADER: usize = PE_OFFSET + 4 + 20;
const SECTION_TABLE: usize = OPTIONAL_HEADER + 0xE0;
const SECTION_RVA: u32 = 0x2000;
const RAW_OFFSET: usize = 0x200;
const FILE_ALIGNMENT: usize = 0x200;
const METADATA_VERSION: &[u8; 12] = b"v4.0.30319\0\0";

fn put_u16(image: &mut [u8], offset: usize, value: u16) {
    image[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

fn put_u32(image: &mut [u8], offset: usize, value: u32) {
    image[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// Builds a minimal PE32 image with a CLI header, metadata root and `tag` appended.
///
/// The image parses with [`crate::Image::info`] but contains no code or metadata tables; it is
/// only meaningful to the fake runtime. Different tags give different image ids.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn synthetic_image(kind: ImageKind, tag: &[u8]) -> Vec<u8> {
    let metadata_len = 16 + METADATA_VERSION.len();
    let used = 72 + metadata_len + tag.len();
    let raw_size = used.div_ceil(FILE_ALIGNMENT) * FILE_ALIGNMENT;
    let mut image = vec![0_u8; RAW_OFFSET + raw_size];

    // DOS header
    image[0..2].copy_from_slice(b"MZ");
    put_u32(&mut image, 0x3C, PE_OFFSET as u32);

    // COFF header
    image[PE_OFFSET..PE_OFFSET + 4].copy_from_slice(b"PE\0\0");
    put_u16(&mut image, PE_OFFSET + 4, 0x014C);
    put_u16(&mut image, PE_OFFSET + 6, 1);
    put_u16(&mut image, PE_OFFSET + 20, 0xE0);
    let characteristics = match kind {
        ImageKind::Executable => 0x0102,
        ImageKind::Library => 0x2102,
    };
    put_u16(&mut image, PE_OFFSET + 22, characteristics);

    // PE32 optional header
    let opt = OPTIONAL_HEADER;
    put_u16(&mut image, opt, 0x010B);
    image[opt + 2] = 8;
    put_u32(&mut image, opt + 4, raw_size as u32);
    put_u32(&mut image, opt + 20, SECTION_RVA);
    put_u32(&mut image, opt + 28, 0x0040_0000);
    put_u32(&mut image, opt + 32, 0x2000);
    put_u32(&mut image, opt + 36, FILE_ALIGNMENT as u32);
    put_u16(&mut image, opt + 40, 4);
    put_u16(&mut image, opt + 48, 4);
    put_u32(&mut image, opt + 56, SECTION_RVA + 0x2000);
    put_u32(&mut image, opt + 60, RAW_OFFSET as u32);
    put_u16(&mut image, opt + 68, 3);
    put_u16(&mut image, opt + 70, 0x8540);
    put_u32(&mut image, opt + 72, 0x0010_0000);
    put_u32(&mut image, opt + 76, 0x1000);
    put_u32(&mut image, opt + 80, 0x0010_0000);
    put_u32(&mut image, opt + 84, 0x1000);
    put_u32(&mut image, opt + 92, 16);
    // data directory 14: CLR runtime header
    put_u32(&mut image, opt + 96 + 14 * 8, SECTION_RVA);
    put_u32(&mut image, opt + 96 + 14 * 8 + 4, 72);

    // .text
    image[SECTION_TABLE..SECTION_TABLE + 5].copy_from_slice(b".text");
    put_u32(&mut image, SECTION_TABLE + 8, used as u32);
    put_u32(&mut image, SECTION_TABLE + 12, SECTION_RVA);
    put_u32(&mut image, SECTION_TABLE + 16, raw_size as u32);
    put_u32(&mut image, SECTION_TABLE + 20, RAW_OFFSET as u32);
    put_u32(&mut image, SECTION_TABLE + 36, 0x6000_0020);

    // CLI header
    let cli = RAW_OFFSET;
    put_u32(&mut image, cli, 72);
    put_u16(&mut image, cli + 4, 2);
    put_u16(&mut image, cli + 6, 5);
    put_u32(&mut image, cli + 8, SECTION_RVA + 72);
    put_u32(&mut image, cli + 12, metadata_len as u32);
    put_u32(&mut image, cli + 16, 0x0000_0001);
    let entry_point = match kind {
        ImageKind::Executable => 0x0600_0001,
        ImageKind::Library => 0,
    };
    put_u32(&mut image, cli + 20, entry_point);

    // metadata root
    let root = cli + 72;
    put_u32(&mut image, root, METADATA_SIGNATURE);
    put_u16(&mut image, root + 4, 1);
    put_u16(&mut image, root + 6, 1);
    put_u32(&mut image, root + 12, METADATA_VERSION.len() as u32);
    image[root + 16..root + metadata_len].copy_from_slice(METADATA_VERSION);

    image[root + metadata_len..root + metadata_len + tag.len()].copy_from_slice(tag);
    image
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::LoaderConfig,
        marshal::{marshal_arguments, marshal_bytes},
        runtime::{acquire_runtime, HostMode},
    };

    #[test]
    fn unknown_bytes_are_bad_images() {
        let platform = FakePlatform::new();
        let runtime =
            acquire_runtime(&platform, &LoaderConfig::default(), HostMode::Legacy).unwrap();
        let allocator = platform.allocator();

        let array = marshal_bytes(&allocator, b"garbage").unwrap();
        let result = runtime.domain().unwrap().load(&array);
        assert_eq!(result.err(), Some(HResult::COR_E_BADIMAGEFORMAT));
    }

    #[test]
    fn invocation_records_parameters() {
        let bytes = synthetic_image(ImageKind::Executable, b"args");
        let platform = FakePlatform::new().with_program(
            &bytes,
            FakeProgram::returning("Void Main(System.String[])", 0)
                .returns(FakeReturn::ArgumentCount),
        );
        let runtime =
            acquire_runtime(&platform, &LoaderConfig::default(), HostMode::Legacy).unwrap();
        let allocator = platform.allocator();

        let image = marshal_bytes(&allocator, &bytes).unwrap();
        let program = runtime.domain().unwrap().load(&image).unwrap();
        let entry = program.entry_point().unwrap().unwrap();

        let parameters = marshal_arguments(&allocator, &["a", "b", "c"]).unwrap();
        let returned = entry.invoke(&Variant::null(), Some(&parameters)).unwrap();
        assert_eq!(returned.as_i32(), Some(3));

        assert_eq!(
            entry.invoke(&Variant::null(), None).err(),
            Some(HResult::DISP_E_BADPARAMCOUNT)
        );
        assert_eq!(
            platform.invocations(),
            vec![
                Some(vec![vec!["a".to_string(), "b".to_string(), "c".to_string()]]),
                None
            ]
        );
    }

    #[test]
    fn handles_are_released_on_drop() {
        let platform = FakePlatform::new();
        let runtime =
            acquire_runtime(&platform, &LoaderConfig::default(), HostMode::Current).unwrap();
        assert!(platform.released().is_empty());

        drop(runtime);
        assert_eq!(
            platform.released(),
            vec![
                Handle::CurrentHost,
                Handle::RuntimeInfo("v4.0.30319".to_string()),
                Handle::Root
            ]
        );
    }

    #[test]
    fn short_version_buffer_fails() {
        let platform = FakePlatform::new();
        let config = LoaderConfig {
            version_buffer_len: 8,
            ..LoaderConfig::default()
        };
        let result = acquire_runtime(&platform, &config, HostMode::Legacy);
        assert!(matches!(result, Err(Error::Native { .. })));
        assert_eq!(platform.released(), vec![Handle::Root]);
    }
}
