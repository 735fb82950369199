use thiserror::Error;

use crate::native::HResult;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// The first group of variants mirrors the stages of hosting a program: acquiring a runtime,
/// marshalling the image, loading it, resolving the entry point and invoking it. Variants that
/// originate from a native call carry the raw [`HResult`] the runtime returned, and where a
/// stage touches more than one native method, the name of the call that failed.
///
/// # Error Categories
///
/// ## Runtime acquisition
/// - [`Error::NoRuntimeFound`] - The enumeration of installed runtimes was empty
/// - [`Error::RuntimeNotLoadable`] - The selected runtime refuses to load into this process
/// - [`Error::LegacyBindFailed`] - Binding the runtime for legacy activation failed
/// - [`Error::HostStartFailed`] - The runtime host could not be started
///
/// ## Loading and invocation
/// - [`Error::ArrayAllocFailed`] - The native array allocator returned a null header
/// - [`Error::BadImageFormat`] - The runtime rejected the bytes as a program image
/// - [`Error::LoadFailed`] - Any other failure while loading an image
/// - [`Error::NoEntryPoint`] - The image has no startable function (e.g. a library)
/// - [`Error::ArgsRequired`] - The entry point takes arguments but none were supplied
/// - [`Error::InvokeFailed`] - The invocation itself returned a failure code
/// - [`Error::UnexpectedReturn`] - The entry point returned something other than `void` or `int`
///
/// # Examples
///
/// ```rust,no_run
/// use clrhost::{Error, Image, Loader, LoaderConfig};
///
/// let loader = Loader::native(LoaderConfig::default())?;
/// let image = Image::from_file("Hello.exe".as_ref())?;
/// match loader.execute(&image, &["--help"]) {
///     Ok(code) => println!("exited with {code}"),
///     Err(Error::BadImageFormat(hr)) => eprintln!("not a managed image ({hr})"),
///     Err(Error::ArgsRequired) => eprintln!("program expects arguments"),
///     Err(e) => eprintln!("{e}"),
/// }
/// # Ok::<(), clrhost::Error>(())
/// ```
#[derive(Error, Debug)]
pub enum Error {
    // Runtime acquisition
    /// The installed-runtime enumeration yielded no entries.
    #[error("Could not find any installed runtimes")]
    NoRuntimeFound,

    /// The selected runtime version cannot be loaded into the current process.
    ///
    /// Typically another, incompatible runtime is already loaded.
    #[error("Runtime {version} is not loadable in this process")]
    RuntimeNotLoadable {
        /// The version string that was selected
        version: String,
    },

    /// `BindAsLegacyV2Runtime` did not return success.
    ///
    /// The binding is process-wide and irreversible; once this fails the runtime state of
    /// the process is unspecified and the acquisition must not be retried.
    #[error("BindAsLegacyV2Runtime returned {0}")]
    LegacyBindFailed(HResult),

    /// A runtime host could not be obtained or started.
    #[error("{call} returned {hr}")]
    HostStartFailed {
        /// The native call that failed
        call: &'static str,
        /// The raw status code
        hr: HResult,
    },

    // Loading and invocation
    /// The native array allocator returned a null handle.
    #[error("SafeArrayCreate failed for {elements} elements")]
    ArrayAllocFailed {
        /// Number of elements that were requested
        elements: u32,
    },

    /// The native string allocator returned a null handle.
    #[error("SysAllocStringLen failed for a string of {0} code units")]
    StringAllocFailed(usize),

    /// The runtime rejected the buffer as a program image (`COR_E_BADIMAGEFORMAT`).
    #[error("The buffer is not a valid program image - {0}")]
    BadImageFormat(HResult),

    /// Loading the image failed for a reason other than its format.
    #[error("{call} returned {hr}")]
    LoadFailed {
        /// The native call that failed
        call: &'static str,
        /// The raw status code
        hr: HResult,
    },

    /// The program does not define a startable function.
    ///
    /// A successful call that yields a null function is reported with `E_POINTER`.
    #[error("The program has no entry point - {0}")]
    NoEntryPoint(HResult),

    /// The entry point expects arguments but none were supplied.
    #[error("The entry point requires arguments, but none were supplied")]
    ArgsRequired,

    /// A call on the entry function returned a failure code.
    #[error("{call} returned {hr}")]
    InvokeFailed {
        /// The native call that failed
        call: &'static str,
        /// The raw status code
        hr: HResult,
    },

    /// The entry point returned a value that is neither `void` nor a 32-bit integer.
    #[error("The entry point returned an unexpected value of variant type {0:#06x}")]
    UnexpectedReturn(u16),

    /// Any other native call that did not return success.
    #[error("{call} returned {hr}")]
    Native {
        /// The native call that failed
        call: &'static str,
        /// The raw status code
        hr: HResult,
    },

    // Native strings
    /// A native wide string had no terminator within the allowed length, or was not valid UTF-16.
    #[error("Could not decode native string - {0}")]
    StringDecode(String),

    // Image parsing
    /// The image is damaged and could not be parsed.
    ///
    /// # Fields
    ///
    /// * `message` - Detailed description of what was malformed
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// An out of bound access was attempted while reading an image.
    #[error("Out of Bound read would have occurred!")]
    OutOfBounds,

    /// Provided input was empty.
    #[error("Provided input was empty")]
    Empty,

    /// The operation is not supported on this platform.
    #[error("This operation is not supported on this platform")]
    NotSupported,

    /// File I/O error.
    #[error("{0}")]
    FileError(#[from] std::io::Error),

    /// Error from the goblin crate during PE parsing.
    #[error("{0}")]
    GoblinErr(#[from] goblin::error::Error),

    /// A native library or one of its exports could not be resolved.
    #[error("Failed to resolve {0}")]
    Library(String),

    // Output capture
    /// A capture session is already open in this process.
    #[error("An output capture session is already active")]
    CaptureActive,

    /// Failed to lock target.
    #[error("Failed to lock target")]
    LockError,

    /// A program id that is not (or no longer) loaded.
    #[error("Unknown program {0}")]
    UnknownProgram(String),
}

impl Error {
    /// Returns the raw native status code carried by this error, if any.
    #[must_use]
    pub fn hresult(&self) -> Option<HResult> {
        match self {
            Error::LegacyBindFailed(hr) | Error::BadImageFormat(hr) | Error::NoEntryPoint(hr) => {
                Some(*hr)
            }
            Error::HostStartFailed { hr, .. }
            | Error::LoadFailed { hr, .. }
            | Error::InvokeFailed { hr, .. }
            | Error::Native { hr, .. } => Some(*hr),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_call_and_code() {
        let err = Error::InvokeFailed {
            call: "_MethodInfo::Invoke_3",
            hr: HResult::DISP_E_BADPARAMCOUNT,
        };
        assert_eq!(err.to_string(), "_MethodInfo::Invoke_3 returned 0x8002000E");
        assert_eq!(err.hresult(), Some(HResult::DISP_E_BADPARAMCOUNT));
    }

    #[test]
    fn malformed_records_location() {
        let err = malformed_error!("bad header {}", 7);
        match err {
            Error::Malformed { message, file, .. } => {
                assert_eq!(message, "bad header 7");
                assert!(file.ends_with("error.rs"));
            }
            _ => panic!("expected Malformed"),
        }
        assert!(Error::ArgsRequired.hresult().is_none());
    }
}
