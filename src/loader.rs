//! The high-level loader: one started runtime, many loaded programs.
//!
//! A [`Loader`] acquires a runtime once, on construction, and keeps it for its whole lifetime.
//! Programs are loaded from [`Image`]s and identified by the SHA-1 of their bytes, so the same
//! program can be invoked repeatedly without being marshalled and loaded again. All state sits
//! behind a single mutex; calls from different threads are serialized.
//!
//! Dropping the loader releases every program handle, then the runtime handles in reverse
//! acquisition order. The runtime itself stays loaded in the process: it can neither be
//! unloaded nor started a second time.
//!
//! # Examples
//!
//! ```rust,no_run
//! use clrhost::{Image, Loader, LoaderConfig};
//! use std::path::Path;
//!
//! let loader = Loader::native(LoaderConfig::default())?;
//! let id = loader.load(&Image::from_file(Path::new("Tool.exe"))?)?;
//!
//! for args in [["triage"], ["dump"]] {
//!     println!("exit {}", loader.invoke(&id, &args)?);
//! }
//! # Ok::<(), clrhost::Error>(())
//! ```

use std::{
    collections::HashMap,
    fmt,
    path::Path,
    sync::{Arc, Mutex},
};

use log::{debug, info, warn};

use crate::{
    config::LoaderConfig,
    image::{Image, ImageId},
    marshal::marshal_bytes,
    native::{Allocator, HResult},
    program::{invoke, load_program, resolve_entry},
    runtime::{acquire_runtime, EntryFunction, HostMode, LoadedProgram, Platform, Runtime},
    Error, Result,
};

/// Identifies a program loaded by a [`Loader`]: the digest of its image.
pub type ProgramId = ImageId;

struct Program {
    // released before the program it belongs to
    entry: Box<dyn EntryFunction>,
    _handle: Box<dyn LoadedProgram>,
    name: String,
}

struct State {
    programs: HashMap<ProgramId, Program>,
    runtime: Runtime,
}

/// Hosts programs in a runtime acquired from a [`Platform`].
pub struct Loader {
    state: Mutex<State>,
    allocator: Arc<dyn Allocator>,
    platform: Arc<dyn Platform>,
    config: LoaderConfig,
}

impl Loader {
    /// Acquires and starts a runtime through the legacy host of `platform`.
    ///
    /// # Errors
    /// Any error of [`acquire_runtime`].
    pub fn new<P: Platform + 'static>(platform: P, config: LoaderConfig) -> Result<Loader> {
        Loader::with_platform(Arc::new(platform), config)
    }

    /// Like [`Loader::new`], for a platform that is already shared.
    ///
    /// # Errors
    /// Any error of [`acquire_runtime`].
    pub fn with_platform(platform: Arc<dyn Platform>, config: LoaderConfig) -> Result<Loader> {
        let runtime = acquire_runtime(platform.as_ref(), &config, HostMode::Legacy)?;

        Ok(Loader {
            state: Mutex::new(State {
                programs: HashMap::new(),
                runtime,
            }),
            allocator: platform.allocator(),
            platform,
            config,
        })
    }

    /// Hosts programs in the runtime installed on this machine.
    ///
    /// # Errors
    /// Any error of [`native_platform`] or [`acquire_runtime`].
    pub fn native(config: LoaderConfig) -> Result<Loader> {
        Loader::with_platform(native_platform()?, config)
    }

    /// The configuration this loader was created with.
    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// The platform this loader hosts programs on.
    pub fn platform(&self) -> &Arc<dyn Platform> {
        &self.platform
    }

    /// The version string of the hosted runtime.
    ///
    /// # Errors
    /// Returns [`Error::LockError`] if the loader's lock was poisoned.
    pub fn runtime_version(&self) -> Result<String> {
        let state = lock!(self.state);
        Ok(state.runtime.version().to_string())
    }

    /// Loads `image` and resolves its entry point.
    ///
    /// With [`LoaderConfig::cache_programs`] set, an image that is already loaded is not sent
    /// to the runtime again. With [`LoaderConfig::validate_images`] set, images whose headers
    /// do not describe a managed program are rejected before they reach the runtime.
    ///
    /// # Errors
    /// - [`Error::BadImageFormat`] if the image is rejected, by validation or by the runtime
    /// - [`Error::LoadFailed`] for other load failures
    /// - [`Error::NoEntryPoint`] if the program has no entry point
    /// - any error of [`marshal_bytes`]
    pub fn load(&self, image: &Image) -> Result<ProgramId> {
        let id = image.id();
        let mut state = lock!(self.state);

        if self.config.cache_programs && state.programs.contains_key(&id) {
            debug!("Program {id} is already loaded");
            return Ok(id);
        }

        if self.config.validate_images {
            let info = image.info().map_err(|error| {
                debug!("Rejected image {id} - {error}");
                Error::BadImageFormat(HResult::COR_E_BADIMAGEFORMAT)
            })?;
            debug!(
                "Validated {} image for runtime {}",
                info.kind,
                info.target_runtime.as_deref().unwrap_or("<unknown>")
            );
        }

        let domain = state.runtime.domain().ok_or(Error::NotSupported)?;
        let handle = {
            let array = marshal_bytes(&self.allocator, image.data())?;
            load_program(domain, &array)?
        };
        let entry = resolve_entry(handle.as_ref())?;
        let name = handle.full_name().unwrap_or_else(|_| id.to_string());

        info!("Program {id} is {name}");
        if state
            .programs
            .insert(
                id,
                Program {
                    entry,
                    _handle: handle,
                    name,
                },
            )
            .is_some()
        {
            debug!("Replaced the handles of program {id}");
        }
        Ok(id)
    }

    /// Invokes the entry point of a loaded program and returns its exit code.
    ///
    /// # Errors
    /// - [`Error::UnknownProgram`] if `id` is not loaded
    /// - any error of [`invoke`]
    pub fn invoke<S: AsRef<str>>(&self, id: &ProgramId, args: &[S]) -> Result<i32> {
        let state = lock!(self.state);
        self.invoke_in(&state, id, args)
    }

    fn invoke_in<S: AsRef<str>>(&self, state: &State, id: &ProgramId, args: &[S]) -> Result<i32> {
        let program = state
            .programs
            .get(id)
            .ok_or_else(|| Error::UnknownProgram(id.to_string()))?;

        debug!("Invoking {} with {} argument(s)", program.name, args.len());
        invoke(
            &self.allocator,
            program.entry.as_ref(),
            args,
            self.config.max_signature_len,
        )
    }

    /// Loads and invokes `image` in one step.
    ///
    /// Without [`LoaderConfig::cache_programs`] the program's handles are released once it
    /// returns, whether or not the invocation succeeded.
    ///
    /// # Errors
    /// Any error of [`Loader::load`] or [`Loader::invoke`].
    pub fn execute<S: AsRef<str>>(&self, image: &Image, args: &[S]) -> Result<i32> {
        let id = self.load(image)?;

        // invoke and release under one guard so the result cannot be lost to the lock
        let mut state = lock!(self.state);
        let result = self.invoke_in(&state, &id, args);
        if !self.config.cache_programs && state.programs.remove(&id).is_some() {
            debug!("Released program {id}");
        }
        result
    }

    /// Releases the handles of a loaded program. Returns `false` if it was not loaded.
    ///
    /// The program's code stays in the runtime; only this loader forgets it.
    ///
    /// # Errors
    /// Returns [`Error::LockError`] if the loader's lock was poisoned.
    pub fn unload(&self, id: &ProgramId) -> Result<bool> {
        let mut state = lock!(self.state);
        let removed = state.programs.remove(id).is_some();
        if removed {
            debug!("Released program {id}");
        }
        Ok(removed)
    }

    /// Every loaded program and its display name, ordered by id.
    ///
    /// # Errors
    /// Returns [`Error::LockError`] if the loader's lock was poisoned.
    pub fn programs(&self) -> Result<Vec<(ProgramId, String)>> {
        let state = lock!(self.state);
        let mut programs: Vec<(ProgramId, String)> = state
            .programs
            .iter()
            .map(|(id, program)| (*id, program.name.clone()))
            .collect();
        programs.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(programs)
    }
}

impl fmt::Debug for Loader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("Loader");
        match self.state.lock() {
            Ok(state) => debug
                .field("runtime", &state.runtime)
                .field("programs", &state.programs.len()),
            Err(_) => debug.field("state", &"<poisoned>"),
        };
        debug.field("config", &self.config).finish()
    }
}

/// The runtime installed on this machine, reached through `mscoree.dll`.
///
/// # Errors
/// Returns [`Error::Library`] if the runtime-hosting or OLE Automation library cannot be
/// loaded.
#[cfg(windows)]
pub fn native_platform() -> Result<Arc<dyn Platform>> {
    Ok(Arc::new(crate::native::com::ComPlatform::new()?))
}

/// The runtime installed on this machine.
///
/// # Errors
/// Always [`Error::NotSupported`]; the runtime-hosting interfaces only exist on Windows.
#[cfg(not(windows))]
pub fn native_platform() -> Result<Arc<dyn Platform>> {
    Err(Error::NotSupported)
}

/// Version strings of every runtime installed on `platform`.
///
/// # Errors
/// Returns [`Error::Native`] if the root cannot be created or the enumeration fails.
pub fn installed_runtimes(platform: &dyn Platform) -> Result<Vec<String>> {
    let root = platform.create_root().map_err(|hr| Error::Native {
        call: "CLRCreateInstance",
        hr,
    })?;

    root.installed_runtimes(LoaderConfig::default().version_buffer_len)
        .map_err(|hr| Error::Native {
            call: "ICLRMetaHost::EnumerateInstalledRuntimes",
            hr,
        })
}

/// Runs `type_name::method(argument)` from the assembly at `path` through the
/// current-generation host and returns the method's result.
///
/// The method must be `static int Method(string)`. The host is acquired for this call only.
///
/// # Errors
/// - [`Error::StringDecode`] if `path` is not valid Unicode
/// - [`Error::InvokeFailed`] if `ExecuteInDefaultAppDomain` fails
/// - any error of [`acquire_runtime`]
pub fn execute_file_in_default_domain(
    platform: &dyn Platform,
    config: &LoaderConfig,
    path: &Path,
    type_name: &str,
    method: &str,
    argument: &str,
) -> Result<u32> {
    let path_text = path
        .to_str()
        .ok_or_else(|| Error::StringDecode(format!("path is not Unicode: {}", path.display())))?;

    let runtime = acquire_runtime(platform, config, HostMode::Current)?;
    let host = runtime.current_host().ok_or(Error::NotSupported)?;

    info!("Executing {type_name}::{method} from {path_text}");
    let code = host
        .execute_in_default_domain(path_text, type_name, method, argument)
        .map_err(|hr| Error::InvokeFailed {
            call: "ICLRRuntimeHost::ExecuteInDefaultAppDomain",
            hr,
        })?;

    if code != 0 {
        warn!("{type_name}::{method} returned {code}");
    }
    Ok(code)
}
