//! # clrhost Prelude
//!
//! The types needed to host a program: the loader and its configuration, images, errors and
//! output capture.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all clrhost operations
pub use crate::Error;

/// The result type used throughout clrhost
pub use crate::Result;

/// Runtime selection and loading behavior
pub use crate::LoaderConfig;

// ================================================================================================
// Main Entry Points
// ================================================================================================

/// Hosts programs in a started runtime
pub use crate::{Loader, ProgramId};

/// Program images and what their headers say
pub use crate::{Image, ImageId, ImageInfo, ImageKind};

/// One-shot helpers that do not keep a runtime
pub use crate::{execute_file_in_default_domain, installed_runtimes};

// ================================================================================================
// Output Capture
// ================================================================================================

/// Standard stream redirection
pub use crate::capture::{begin as begin_capture, CaptureSession, CapturedOutput};

// ================================================================================================
// Backends
// ================================================================================================

/// The capability trait a runtime backend implements
pub use crate::runtime::{HostMode, Platform};

/// Native status codes
pub use crate::native::HResult;
