use std::{
    ffi::c_void,
    io::{self, PipeWriter},
    os::windows::io::{AsRawHandle, OwnedHandle},
};

use libloading::{Library, Symbol};

use super::Stream;
use crate::{Error, Result};

const STD_OUTPUT_HANDLE: u32 = -11_i32 as u32;
const STD_ERROR_HANDLE: u32 = -12_i32 as u32;

type GetStdHandleFn = unsafe extern "system" fn(u32) -> *mut c_void;
type SetStdHandleFn = unsafe extern "system" fn(u32, *mut c_void) -> i32;

fn kernel32() -> Result<Library> {
    unsafe { Library::new("kernel32.dll") }.map_err(|error| Error::Library(error.to_string()))
}

fn set_std_handle(library: &Library, which: u32, handle: *mut c_void) -> Result<()> {
    let set: Symbol<SetStdHandleFn> = unsafe { library.get(b"SetStdHandle\0") }
        .map_err(|error| Error::Library(error.to_string()))?;

    if unsafe { set(which, handle) } == 0 {
        return Err(io::Error::last_os_error().into());
    }
    Ok(())
}

/// A standard handle pointing at a pipe, and the saved original.
pub(super) struct Redirect {
    which: u32,
    original: usize,
    writer: OwnedHandle,
    library: Library,
}

impl Redirect {
    pub(super) fn install(stream: Stream, writer: PipeWriter) -> Result<Redirect> {
        let which = match stream {
            Stream::Stdout => STD_OUTPUT_HANDLE,
            Stream::Stderr => STD_ERROR_HANDLE,
        };

        let library = kernel32()?;
        let get: Symbol<GetStdHandleFn> = unsafe { library.get(b"GetStdHandle\0") }
            .map_err(|error| Error::Library(error.to_string()))?;
        let original = unsafe { get(which) } as usize;

        // The handle stays owned here; SetStdHandle does not duplicate it
        let writer = OwnedHandle::from(writer);
        set_std_handle(&library, which, writer.as_raw_handle())?;

        Ok(Redirect {
            which,
            original,
            writer,
            library,
        })
    }

    pub(super) fn restore(self) -> Result<()> {
        set_std_handle(&self.library, self.which, self.original as *mut c_void)?;
        // Closing the write end ends the drain thread
        drop(self.writer);
        Ok(())
    }
}
