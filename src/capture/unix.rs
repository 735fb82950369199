use std::{
    io::{self, PipeWriter},
    os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd},
};

use super::Stream;
use crate::Result;

/// A standard file descriptor pointing at a pipe, and the saved original.
pub(super) struct Redirect {
    target: RawFd,
    saved: OwnedFd,
}

impl Redirect {
    pub(super) fn install(stream: Stream, writer: PipeWriter) -> Result<Redirect> {
        let target = match stream {
            Stream::Stdout => libc::STDOUT_FILENO,
            Stream::Stderr => libc::STDERR_FILENO,
        };

        let saved = unsafe { libc::dup(target) };
        if saved < 0 {
            return Err(io::Error::last_os_error().into());
        }
        // dup returned a fresh descriptor we own
        let saved = unsafe { OwnedFd::from_raw_fd(saved) };

        let writer = OwnedFd::from(writer);
        if unsafe { libc::dup2(writer.as_raw_fd(), target) } < 0 {
            return Err(io::Error::last_os_error().into());
        }

        // `target` now holds the only write end once `writer` drops
        Ok(Redirect { target, saved })
    }

    pub(super) fn restore(self) -> Result<()> {
        if unsafe { libc::dup2(self.saved.as_raw_fd(), self.target) } < 0 {
            return Err(io::Error::last_os_error().into());
        }
        Ok(())
    }
}
