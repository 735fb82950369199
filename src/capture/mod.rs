//! Capturing the process's standard output and error streams.
//!
//! Hosted programs write to the process-level standard handles, not to Rust's `std::io`
//! streams, so their output can only be observed by redirecting the handles themselves.
//! [`begin`] replaces both handles with the write ends of anonymous pipes and returns a
//! [`CaptureSession`]. A background thread per stream drains its pipe into a buffer, so reads
//! never block and a chatty program never fills the pipe.
//!
//! The handles are process-global: only one session can be open at a time, and starting a
//! second one fails with [`crate::Error::CaptureActive`]. The original handles are restored by
//! [`CaptureSession::end`], or on drop.
//!
//! A child process started during the session inherits the pipes and keeps them open for as
//! long as it runs. Ending the session waits at most [`DRAIN_TIMEOUT`] per stream for the pipe
//! to close; output the child writes after that is not returned.
//!
//! On Windows the runtime resolves the standard handles when it first writes to the console;
//! start capturing before the runtime is started so the redirected handles are the ones it
//! keeps.
//!
//! # Examples
//!
//! ```rust,no_run
//! use clrhost::{capture, Image, Loader, LoaderConfig};
//! use std::path::Path;
//!
//! let session = capture::begin()?;
//! let loader = Loader::native(LoaderConfig::default())?;
//! let code = loader.execute(&Image::from_file(Path::new("Seatbelt.exe"))?, &["-group=system"])?;
//! let output = session.end()?;
//! println!("exit {code}\n{}", output.stdout_lossy());
//! # Ok::<(), clrhost::Error>(())
//! ```

#[cfg(unix)]
mod unix;
#[cfg(unix)]
use unix::Redirect;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
use windows::Redirect;

use std::{
    borrow::Cow,
    io::{self, Read, Write},
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Receiver, RecvTimeoutError},
        Arc, Mutex,
    },
    thread::JoinHandle,
    time::Duration,
};

use log::{debug, warn};

use crate::{Error, Result};

static ACTIVE: AtomicBool = AtomicBool::new(false);

/// How long ending a session waits for a stream's pipe to be closed by every writer.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// A standard stream that can be redirected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    /// Standard output
    Stdout,
    /// Standard error
    Stderr,
}

/// Bytes written to the redirected streams.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedOutput {
    /// Everything written to standard output
    pub stdout: Vec<u8>,
    /// Everything written to standard error
    pub stderr: Vec<u8>,
}

impl CapturedOutput {
    /// Standard output decoded as UTF-8, replacing invalid sequences.
    #[must_use]
    pub fn stdout_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stdout)
    }

    /// Standard error decoded as UTF-8, replacing invalid sequences.
    #[must_use]
    pub fn stderr_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stderr)
    }

    /// Returns `true` if nothing was captured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stdout.is_empty() && self.stderr.is_empty()
    }
}

struct Drain {
    thread: JoinHandle<()>,
    // disconnects when the thread exits
    done: Receiver<()>,
}

struct Capture {
    stream: Stream,
    redirect: Option<Redirect>,
    buffer: Arc<Mutex<Vec<u8>>>,
    drain: Option<Drain>,
}

impl Capture {
    fn start(stream: Stream) -> Result<Capture> {
        let (mut reader, writer) = io::pipe()?;
        let redirect = Redirect::install(stream, writer)?;

        let buffer = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&buffer);
        let (finished, done) = mpsc::channel::<()>();
        let spawned = std::thread::Builder::new()
            .name(format!("clrhost-capture-{stream:?}").to_lowercase())
            .spawn(move || {
                let _finished = finished;
                let mut chunk = [0_u8; 4096];
                loop {
                    match reader.read(&mut chunk) {
                        Ok(0) | Err(_) => break,
                        Ok(read) => match sink.lock() {
                            Ok(mut sink) => sink.extend_from_slice(&chunk[..read]),
                            Err(_) => break,
                        },
                    }
                }
            });
        let thread = match spawned {
            Ok(thread) => thread,
            Err(error) => {
                redirect.restore()?;
                return Err(error.into());
            }
        };

        Ok(Capture {
            stream,
            redirect: Some(redirect),
            buffer,
            drain: Some(Drain { thread, done }),
        })
    }

    fn take(&self) -> Vec<u8> {
        match self.buffer.lock() {
            Ok(mut buffer) => std::mem::take(&mut *buffer),
            Err(_) => Vec::new(),
        }
    }

    fn stop(&mut self) -> Result<Vec<u8>> {
        if let Some(redirect) = self.redirect.take() {
            // Restoring closes this process's write end
            if let Err(error) = redirect.restore() {
                // write end still open, the drain thread cannot be joined
                self.drain.take();
                return Err(error);
            }
        }
        if let Some(drain) = self.drain.take() {
            match drain.done.recv_timeout(DRAIN_TIMEOUT) {
                Err(RecvTimeoutError::Disconnected) | Ok(()) => {
                    if drain.thread.join().is_err() {
                        warn!("Output capture thread panicked");
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    // another process still holds the write end; leave the thread draining
                    warn!(
                        "{:?} pipe still open after {:?}, detaching its reader",
                        self.stream, DRAIN_TIMEOUT
                    );
                }
            }
        }
        Ok(self.take())
    }
}

impl Drop for Capture {
    fn drop(&mut self) {
        if let Err(error) = self.stop() {
            warn!("Failed to restore a standard handle - {error}");
        }
    }
}

/// An open capture of standard output and standard error.
pub struct CaptureSession {
    stdout: Capture,
    stderr: Capture,
}

/// Redirects standard output and standard error into pipes.
///
/// # Errors
/// - [`crate::Error::CaptureActive`] if another session is still open
/// - [`crate::Error::FileError`] if a pipe cannot be created or a handle cannot be redirected
pub fn begin() -> Result<CaptureSession> {
    if ACTIVE.swap(true, Ordering::SeqCst) {
        return Err(Error::CaptureActive);
    }

    flush_std();
    let session = Capture::start(Stream::Stdout).and_then(|stdout| {
        let stderr = Capture::start(Stream::Stderr)?;
        Ok(CaptureSession { stdout, stderr })
    });

    match session {
        Ok(session) => {
            debug!("Redirected standard output and error");
            Ok(session)
        }
        Err(error) => {
            ACTIVE.store(false, Ordering::SeqCst);
            Err(error)
        }
    }
}

impl CaptureSession {
    /// Returns the output captured since the session began or since the last `read`.
    ///
    /// Never blocks; bytes still in flight in a pipe are returned by a later call.
    pub fn read(&self) -> CapturedOutput {
        flush_std();
        CapturedOutput {
            stdout: self.stdout.take(),
            stderr: self.stderr.take(),
        }
    }

    /// Restores the original handles and returns all output not yet read.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if a handle cannot be restored.
    pub fn end(mut self) -> Result<CapturedOutput> {
        self.finish()
    }

    fn finish(&mut self) -> Result<CapturedOutput> {
        flush_std();
        // stop both before reporting either failure
        let stdout = self.stdout.stop();
        let stderr = self.stderr.stop();
        Ok(CapturedOutput {
            stdout: stdout?,
            stderr: stderr?,
        })
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        if let Err(error) = self.finish() {
            warn!("Failed to restore standard handles - {error}");
        }
        ACTIVE.store(false, Ordering::SeqCst);
        debug!("Restored standard output and error");
    }
}

fn flush_std() {
    let _ = io::stdout().flush();
    let _ = io::stderr().flush();
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn write_fd(fd: i32, text: &[u8]) {
        let written = unsafe { libc::write(fd, text.as_ptr().cast(), text.len()) };
        assert_eq!(written, text.len() as isize);
    }

    #[test]
    fn session_lifecycle() {
        let session = begin().unwrap();
        assert!(matches!(begin(), Err(Error::CaptureActive)));

        write_fd(1, b"to stdout\n");
        write_fd(2, b"to stderr\n");

        let output = session.end().unwrap();
        assert!(output.stdout_lossy().contains("to stdout"));
        assert!(output.stderr_lossy().contains("to stderr"));

        // a new session can begin once the previous one ended
        let session = begin().unwrap();
        write_fd(1, b"second\n");
        drop(session);
        assert!(!ACTIVE.load(Ordering::SeqCst));
    }
}
