//! Configuration of the [`crate::Loader`].

use crate::native::wide::MAX_NATIVE_STRING;

/// Settings for runtime selection, image validation and program caching.
///
/// The defaults reproduce the classic hosting sequence: prefer a `v4` runtime, bind it for
/// legacy activation so images can be loaded from memory, and validate images before they are
/// handed to the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderConfig {
    /// Substring a runtime version must contain to be preferred (default: `"v4"`)
    /// If no installed version contains it, the last enumerated version is used
    pub requested_version: String,

    /// Bind the selected runtime with `BindAsLegacyV2Runtime` before requesting the legacy host
    /// Irreversible for the process; required by most images built for older runtimes
    pub bind_legacy_v2: bool,

    /// Parse the PE and CLI headers before loading and reject non-managed images up front
    /// With this disabled, malformed images are only detected by the runtime itself
    pub validate_images: bool,

    /// Keep loaded programs so the same image is only loaded into the domain once
    pub cache_programs: bool,

    /// Maximum number of UTF-16 units decoded from a method signature (default: 4096)
    pub max_signature_len: usize,

    /// Capacity in UTF-16 units of the buffer each installed version string is read into
    pub version_buffer_len: u32,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            requested_version: "v4".to_string(),
            bind_legacy_v2: true,
            validate_images: true,
            cache_programs: true,
            max_signature_len: MAX_NATIVE_STRING,
            version_buffer_len: 64,
        }
    }
}

impl LoaderConfig {
    /// Creates the default configuration, preferring runtimes whose version contains `version`.
    #[must_use]
    pub fn for_version(version: &str) -> Self {
        Self {
            requested_version: version.to_string(),
            ..Self::default()
        }
    }

    /// Creates a configuration that does exactly what the runtime would do on its own
    ///
    /// No pre-flight validation and no caching: every execution loads the image anew and
    /// malformed images are reported by the runtime's own `BadImageFormat` status.
    #[must_use]
    pub fn passthrough() -> Self {
        Self {
            validate_images: false,
            cache_programs: false,
            ..Self::default()
        }
    }

    /// Creates a configuration for hosting without legacy binding
    ///
    /// Suitable when the process already bound a runtime, or when only images built for the
    /// v4 runtime are loaded.
    #[must_use]
    pub fn unbound() -> Self {
        Self {
            bind_legacy_v2: false,
            ..Self::default()
        }
    }
}
