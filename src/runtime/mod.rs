//! Capability traits over the runtime-hosting object model.
//!
//! Each native object role in the hosting sequence is a trait here: [`RuntimeRoot`] enumerates
//! installed versions, [`RuntimeInfo`] describes one of them, [`LegacyHost`] and
//! [`CurrentHost`] are the two host generations, [`ExecutionDomain`] loads images,
//! [`LoadedProgram`] exposes the entry point and [`EntryFunction`] invokes it.
//!
//! Two implementations exist. On Windows, the COM backend calls through the vendor vtables of
//! `mscoree.dll`. Everywhere, [`crate::fake::FakePlatform`] scripts results and records the
//! order of every acquisition and release.
//!
//! Handles release their native object when dropped. Nothing in this crate calls a release
//! method explicitly; ordering is expressed by ownership (see [`Runtime`]).
//!
//! Every method returns the raw [`Status`] of the native call it wraps. Mapping a status to a
//! crate [`crate::Error`] happens one level up, where the operation name is known.

mod acquire;

use std::sync::Arc;

use crate::{
    marshal::MarshalledArray,
    native::{Allocator, Status, Variant},
};

pub use acquire::{acquire_runtime, select_version, HostMode, Runtime};

/// A source of runtime-hosting root objects; the entry point of a backend.
pub trait Platform: Send + Sync {
    /// Instantiates the hosting root object (`CLRCreateInstance`).
    ///
    /// # Errors
    /// Returns the status of the instantiation call.
    fn create_root(&self) -> Status<Box<dyn RuntimeRoot>>;

    /// The allocator the runtime of this platform frees arrays and strings with.
    fn allocator(&self) -> Arc<dyn Allocator>;
}

/// The runtime-hosting root object (`ICLRMetaHost`).
pub trait RuntimeRoot: Send {
    /// Version strings of all installed runtimes, in enumeration order.
    ///
    /// `buffer_len` is the capacity, in UTF-16 units, of the buffer each version string is
    /// read into.
    ///
    /// # Errors
    /// Returns the status of the first failed native call.
    fn installed_runtimes(&self, buffer_len: u32) -> Status<Vec<String>>;

    /// Looks up the runtime with exactly this version string (`GetRuntime`).
    ///
    /// # Errors
    /// Returns the status of the lookup.
    fn runtime(&self, version: &str) -> Status<Box<dyn RuntimeInfo>>;
}

/// One installed runtime version (`ICLRRuntimeInfo`).
pub trait RuntimeInfo: Send {
    /// Whether this runtime can be loaded into the current process.
    ///
    /// # Errors
    /// Returns the status of the query.
    fn is_loadable(&self) -> Status<bool>;

    /// Binds this runtime as the process's legacy runtime. One-time and irreversible.
    ///
    /// # Errors
    /// Returns the status of the binding call.
    fn bind_as_legacy_v2(&self) -> Status<()>;

    /// Requests the legacy, multi-domain host (`ICorRuntimeHost`).
    ///
    /// # Errors
    /// Returns the status of `GetInterface`.
    fn legacy_host(&self) -> Status<Box<dyn LegacyHost>>;

    /// Requests the current-generation host (`ICLRRuntimeHost`).
    ///
    /// # Errors
    /// Returns the status of `GetInterface`.
    fn current_host(&self) -> Status<Box<dyn CurrentHost>>;
}

/// The legacy host; the only one able to load images from memory.
pub trait LegacyHost: Send {
    /// Starts the runtime.
    ///
    /// # Errors
    /// Returns the status of `Start`.
    fn start(&self) -> Status<()>;

    /// The default execution domain, already queried for `_AppDomain`.
    ///
    /// # Errors
    /// Returns the status of `GetDefaultDomain` or of the interface query.
    fn default_domain(&self) -> Status<Box<dyn ExecutionDomain>>;
}

/// The current-generation host; loads programs by path only.
pub trait CurrentHost: Send {
    /// Starts the runtime.
    ///
    /// # Errors
    /// Returns the status of `Start`.
    fn start(&self) -> Status<()>;

    /// Runs `type_name::method(argument)` from the assembly at `path` in the default domain.
    ///
    /// The method must have the signature `static int Method(string)`.
    ///
    /// # Errors
    /// Returns the status of `ExecuteInDefaultAppDomain`.
    fn execute_in_default_domain(
        &self,
        path: &str,
        type_name: &str,
        method: &str,
        argument: &str,
    ) -> Status<u32>;
}

/// An isolated execution context (`_AppDomain`).
pub trait ExecutionDomain: Send {
    /// Loads the image held by a byte array (`Load_3`).
    ///
    /// # Errors
    /// Returns the status of the load; `COR_E_BADIMAGEFORMAT` for malformed images.
    fn load(&self, image: &MarshalledArray) -> Status<Box<dyn LoadedProgram>>;
}

/// A program loaded into a domain (`_Assembly`).
pub trait LoadedProgram: Send {
    /// The program's display name.
    ///
    /// # Errors
    /// Returns the status of `get_FullName` or `E_POINTER` for undecodable names.
    fn full_name(&self) -> Status<String>;

    /// The designated entry function, or `None` if the program has none.
    ///
    /// # Errors
    /// Returns the status of `get_EntryPoint`.
    fn entry_point(&self) -> Status<Option<Box<dyn EntryFunction>>>;
}

/// The entry function of a loaded program (`_MethodInfo`).
pub trait EntryFunction: Send {
    /// The function's signature as text, e.g. `Void Main(System.String[])`.
    ///
    /// At most `max_len` UTF-16 units are decoded.
    ///
    /// # Errors
    /// Returns [`crate::Error::Native`] if the native call fails, or
    /// [`crate::Error::StringDecode`] if the text cannot be decoded.
    fn signature(&self, max_len: usize) -> crate::Result<String>;

    /// Invokes the function (`Invoke_3`).
    ///
    /// `target` is the receiver; static entry points take [`Variant::null`]. `parameters` is
    /// the positional parameter array, or `None` for parameterless functions. The returned
    /// variant is owned by the caller and must be cleared with the platform allocator.
    ///
    /// # Errors
    /// Returns the status of the invocation.
    fn invoke(&self, target: &Variant, parameters: Option<&MarshalledArray>) -> Status<Variant>;
}
