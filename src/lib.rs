// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(clippy::missing_safety_doc)]
// Unsafe code is confined to the native boundary:
// - 'native/alloc.rs' and 'marshal.rs' read and write SAFEARRAY and BSTR memory
// - 'native/com' calls through vendor vtables
// - 'capture' swaps process standard handles
// - 'image/physical.rs' uses mmap to map a file into memory

//! # clrhost
//!
//! Host the .NET runtime inside a Rust process and run managed programs, from a file on disk or
//! straight from a byte buffer, without writing them to disk first.
//!
//! `clrhost` drives the runtime's own hosting interfaces (`mscoree.dll`): it selects an installed
//! runtime version, starts a host, marshals the program image into a native byte array, loads it
//! into the default domain, resolves the entry point and invokes it with string arguments. The
//! program's exit code comes back as an `i32`.
//!
//! ## Features
//!
//! - **In-memory loading** - images never touch the file system
//! - **Program cache** - programs are identified by the SHA-1 of their bytes and can be invoked
//!   repeatedly
//! - **Scoped handles** - every native handle is released on drop, in reverse acquisition order
//! - **Output capture** - redirect the process's standard output and error while a program runs
//! - **Pre-flight validation** - PE and CLI headers are checked before the runtime sees them
//! - **Testable everywhere** - a scripted, recording fake runtime runs on any platform
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use clrhost::prelude::*;
//! use std::path::Path;
//!
//! let loader = Loader::native(LoaderConfig::default())?;
//! let image = Image::from_file(Path::new("Hello.exe"))?;
//! let code = loader.execute(&image, &["world"])?;
//! println!("exit code {code}");
//! # Ok::<(), clrhost::Error>(())
//! ```
//!
//! ### From memory
//!
//! ```rust,no_run
//! use clrhost::{Image, Loader, LoaderConfig};
//!
//! let bytes: Vec<u8> = std::fs::read("Hello.exe")?;
//! let loader = Loader::native(LoaderConfig::for_version("v4.0.30319"))?;
//! let id = loader.load(&Image::from_mem(bytes)?)?;
//! loader.invoke(&id, &["first"])?;
//! loader.invoke(&id, &["second"])?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Architecture
//!
//! - [`runtime`] - capability traits over the hosting object model, and runtime acquisition
//! - [`marshal`] - native byte and string arrays with owned lifetimes
//! - [`program`] - loading, entry point resolution and invocation
//! - [`loader`] - the [`Loader`] facade tying the steps together
//! - [`image`] - program images from files or memory, with PE/CLI header parsing
//! - [`capture`] - standard output and error redirection
//! - [`native`] - status codes, identifiers, layouts and allocators of the native boundary
//! - [`fake`] - an in-memory runtime for tests
//!
//! The runtime can only be hosted on Windows. Everything else, including the whole pipeline
//! against [`fake::FakePlatform`], builds and runs on any platform; [`Loader::native`] returns
//! [`Error::NotSupported`] there.
//!
//! ## Error Handling
//!
//! All operations return [`Result<T, Error>`](Result). Errors from native calls carry the raw
//! status code and, where a step makes several calls, the name of the one that failed:
//!
//! ```rust,no_run
//! use clrhost::{Error, Image, Loader, LoaderConfig};
//!
//! let loader = Loader::native(LoaderConfig::default())?;
//! match loader.execute(&Image::from_mem(vec![0x4d, 0x5a])?, &[] as &[&str]) {
//!     Ok(code) => println!("exited with {code}"),
//!     Err(Error::BadImageFormat(hr)) => println!("rejected: {hr}"),
//!     Err(e) => println!("failed: {e}"),
//! }
//! # Ok::<(), clrhost::Error>(())
//! ```
//!
//! Native runtime failures are not recoverable within a process: once a runtime failed to bind
//! or start, it cannot be retried.
#[macro_use]
pub(crate) mod macros;

#[macro_use]
pub(crate) mod error;

/// Convenient re-exports of the most commonly used types.
///
/// # Example
///
/// ```rust,no_run
/// use clrhost::prelude::*;
///
/// let loader = Loader::native(LoaderConfig::default())?;
/// println!("hosting {}", loader.runtime_version()?);
/// # Ok::<(), clrhost::Error>(())
/// ```
pub mod prelude;

pub mod capture;
pub mod config;
pub mod fake;
pub mod image;
pub mod loader;
pub mod marshal;
pub mod native;
pub mod program;
pub mod runtime;

/// `clrhost` Result type
pub type Result<T> = std::result::Result<T, Error>;

/// `clrhost` Error type
pub use error::Error;

pub use config::LoaderConfig;

pub use image::{Image, ImageId, ImageInfo, ImageKind};

pub use loader::{
    execute_file_in_default_domain, installed_runtimes, native_platform, Loader, ProgramId,
};
