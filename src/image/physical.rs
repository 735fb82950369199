//! Memory-mapped image files.
//!
//! [`Physical`] maps an image file read-only instead of reading it into a buffer. The runtime
//! still receives a copy: marshalling copies the mapped bytes into a native array, so the
//! mapping only has to outlive the marshalling step.

use super::Backend;
use crate::{Error::FileError, Result};

use memmap2::Mmap;
use std::{fs, path::Path};

/// An image backend over a memory-mapped file.
#[derive(Debug)]
pub struct Physical {
    /// Memory-mapped file data
    data: Mmap,
}

impl Physical {
    /// Map the file at `path`.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if the file cannot be opened or mapped.
    pub fn new(path: impl AsRef<Path>) -> Result<Physical> {
        let file = match fs::File::open(path) {
            Ok(file) => file,
            Err(error) => return Err(FileError(error)),
        };

        // Read-only mapping; the file is not expected to change while hosted
        let mmap = match unsafe { Mmap::map(&file) } {
            Ok(mmap) => mmap,
            Err(error) => return Err(FileError(error)),
        };

        Ok(Physical { data: mmap })
    }
}

impl Backend for Physical {
    fn data(&self) -> &[u8] {
        self.data.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn physical() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"MZ\x90\x00rest of the image").unwrap();
        file.flush().unwrap();

        let physical = Physical::new(file.path()).unwrap();
        assert_eq!(physical.len(), 21);
        assert_eq!(physical.data_slice(0, 4).unwrap(), b"MZ\x90\x00");
        assert!(physical.data_slice(20, 4).is_err());
    }

    #[test]
    fn missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = Physical::new(dir.path().join("missing.exe"));
        assert!(matches!(result, Err(FileError(_))));
    }
}
