//! Program images: the bytes handed to the runtime.
//!
//! An [`Image`] is a byte source, either a memory-mapped file ([`physical::Physical`]) or an
//! owned `Vec<u8>`, behind the [`Backend`] trait. Its [`ImageId`] is computed once, when the
//! image is created. Images are not validated on construction: the runtime is the authority on
//! what it can load, and malformed bytes must still reach it when pre-flight validation is
//! disabled.
//!
//! [`Image::info`] parses the PE headers with `goblin` and decodes the CLI header, which is
//! enough to tell whether the image is managed at all, whether it is an application or a
//! library, and which runtime it was built for.
//!
//! # Examples
//!
//! ```rust,no_run
//! use clrhost::Image;
//! use std::path::Path;
//!
//! let image = Image::from_file(Path::new("Rubeus.exe"))?;
//! let info = image.info()?;
//! println!(
//!     "{} image for {:?}, entry point 0x{:08X}",
//!     info.kind, info.target_runtime, info.cli.entry_point_token
//! );
//! println!("id {}", image.id());
//! # Ok::<(), clrhost::Error>(())
//! ```

pub mod header;
pub mod io;
pub mod physical;

use std::{fmt, path::Path};

use goblin::pe::PE;
use log::debug;
use sha1::{Digest, Sha1};
use strum::Display;

use crate::{
    image::{
        header::{read_metadata_version, CliHeader, CLI_HEADER_SIZE},
        physical::Physical,
    },
    Error::{Empty, GoblinErr, OutOfBounds},
    Result,
};

/// A source of image bytes.
pub trait Backend: Send + Sync {
    /// The whole image.
    fn data(&self) -> &[u8];

    /// Image size in bytes.
    fn len(&self) -> usize {
        self.data().len()
    }

    /// The `len` bytes at `offset`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the range does not lie within the image.
    fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]> {
        offset
            .checked_add(len)
            .and_then(|end| self.data().get(offset..end))
            .ok_or(OutOfBounds)
    }
}

/// Images handed over as a buffer, e.g. downloaded or decrypted in memory.
impl Backend for Vec<u8> {
    fn data(&self) -> &[u8] {
        self
    }
}

/// Whether an image is started or referenced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ImageKind {
    /// An application with an entry point (`.exe`)
    #[strum(serialize = "executable")]
    Executable,
    /// A library (`IMAGE_FILE_DLL`)
    #[strum(serialize = "library")]
    Library,
}

/// What pre-flight parsing learned about an image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInfo {
    /// COFF machine type, e.g. `0x14c` for x86 and `0x8664` for x64
    pub machine: u16,
    /// `true` for PE32+ images
    pub is_64: bool,
    /// Application or library
    pub kind: ImageKind,
    /// The CLI header
    pub cli: CliHeader,
    /// Runtime version from the metadata root, if the metadata could be located
    pub target_runtime: Option<String>,
}

/// SHA-1 digest of an image's bytes; identifies a loaded program.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageId(pub [u8; 20]);

impl ImageId {
    /// The digest of `data`.
    #[must_use]
    pub fn of(data: &[u8]) -> ImageId {
        let digest = Sha1::digest(data);
        let mut id = [0_u8; 20];
        id.copy_from_slice(&digest);
        ImageId(id)
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ImageId({self})")
    }
}

/// A program image loaded from disk or memory.
pub struct Image {
    data: Box<dyn Backend>,
    id: ImageId,
}

impl Image {
    /// Memory-maps the image at `path`.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if the file cannot be mapped, or
    /// [`crate::Error::Empty`] for an empty file.
    pub fn from_file(path: &Path) -> Result<Image> {
        let image = Image::load(Physical::new(path)?)?;
        debug!("Mapped {} ({} bytes)", path.display(), image.len());
        Ok(image)
    }

    /// Takes ownership of an image held in memory.
    ///
    /// # Errors
    /// Returns [`crate::Error::Empty`] for an empty buffer.
    pub fn from_mem(data: Vec<u8>) -> Result<Image> {
        Image::load(data)
    }

    fn load<T: Backend + 'static>(data: T) -> Result<Image> {
        if data.len() == 0 {
            return Err(Empty);
        }

        let id = ImageId::of(data.data());
        Ok(Image {
            data: Box::new(data),
            id,
        })
    }

    /// The raw image bytes.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        self.data.data()
    }

    /// Size of the image in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Always `false`; empty images are rejected on construction.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.len() == 0
    }

    /// The SHA-1 identity of the image bytes.
    #[must_use]
    pub fn id(&self) -> ImageId {
        self.id
    }

    /// Parses the PE and CLI headers.
    ///
    /// # Errors
    /// - [`crate::Error::GoblinErr`] if the bytes are not a PE image
    /// - [`crate::Error::Malformed`] if the image has no CLR runtime header or it cannot be
    ///   located or decoded
    pub fn info(&self) -> Result<ImageInfo> {
        let pe = PE::parse(self.data()).map_err(GoblinErr)?;

        let Some(optional_header) = pe.header.optional_header else {
            return Err(malformed_error!("File does not have an OptionalHeader"));
        };
        let Some(clr_dir) = optional_header.data_directories.get_clr_runtime_header() else {
            return Err(malformed_error!(
                "File does not have a CLR runtime header directory"
            ));
        };
        if clr_dir.virtual_address == 0 || (clr_dir.size as usize) < CLI_HEADER_SIZE {
            return Err(malformed_error!(
                "CLR runtime header directory is empty - {}:{}",
                clr_dir.virtual_address,
                clr_dir.size
            ));
        }

        let offset = rva_to_offset(&pe, clr_dir.virtual_address as usize)?;
        let cli = CliHeader::read(self.data.data_slice(offset, CLI_HEADER_SIZE)?)?;

        let target_runtime = rva_to_offset(&pe, cli.metadata_rva as usize)
            .and_then(|offset| self.data.data_slice(offset, cli.metadata_size as usize))
            .and_then(read_metadata_version)
            .map_err(|error| debug!("Could not read the metadata version - {error}"))
            .ok();

        Ok(ImageInfo {
            machine: pe.header.coff_header.machine,
            is_64: pe.is_64,
            kind: if pe.is_lib {
                ImageKind::Library
            } else {
                ImageKind::Executable
            },
            cli,
            target_runtime,
        })
    }
}

impl fmt::Debug for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Image")
            .field("len", &self.len())
            .field("id", &self.id)
            .finish()
    }
}

/// Converts a relative virtual address into a file offset using the section table.
fn rva_to_offset(pe: &PE, rva: usize) -> Result<usize> {
    let rva_u32 =
        u32::try_from(rva).map_err(|_| malformed_error!("RVA too large to fit in u32: {}", rva))?;

    for section in &pe.sections {
        let Some(section_max) = section.virtual_address.checked_add(section.virtual_size) else {
            return Err(malformed_error!(
                "Section malformed, causing integer overflow - {} + {}",
                section.virtual_address,
                section.virtual_size
            ));
        };

        if section.virtual_address <= rva_u32 && section_max > rva_u32 {
            return Ok((rva - section.virtual_address as usize)
                + section.pointer_to_raw_data as usize);
        }
    }

    Err(malformed_error!(
        "RVA could not be converted to offset - {}",
        rva
    ))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::{fake::synthetic_image, image::header::CliFlags};

    #[test]
    fn executable_info() {
        let image = Image::from_mem(synthetic_image(ImageKind::Executable, b"hello")).unwrap();
        let info = image.info().unwrap();

        assert_eq!(info.machine, 0x14c);
        assert!(!info.is_64);
        assert_eq!(info.kind, ImageKind::Executable);
        assert_eq!(info.cli.major_runtime_version, 2);
        assert_eq!(info.cli.minor_runtime_version, 5);
        assert!(info.cli.flags.contains(CliFlags::IL_ONLY));
        assert!(info.cli.has_managed_entry_point());
        assert_eq!(info.target_runtime.as_deref(), Some("v4.0.30319"));
    }

    #[test]
    fn library_info() {
        let image = Image::from_mem(synthetic_image(ImageKind::Library, b"")).unwrap();
        let info = image.info().unwrap();
        assert_eq!(info.kind, ImageKind::Library);
        assert_eq!(info.kind.to_string(), "library");
        assert!(!info.cli.has_managed_entry_point());
    }

    #[test]
    fn not_a_pe() {
        let image = Image::from_mem(b"definitely not a program".to_vec()).unwrap();
        assert!(image.info().is_err());
        assert!(matches!(Image::from_mem(Vec::new()), Err(Empty)));
    }

    #[test]
    fn ids_follow_content() {
        let a = Image::from_mem(synthetic_image(ImageKind::Executable, b"a")).unwrap();
        let b = Image::from_mem(synthetic_image(ImageKind::Executable, b"b")).unwrap();
        let a2 = Image::from_mem(a.data().to_vec()).unwrap();

        assert_ne!(a.id(), b.id());
        assert_eq!(a.id(), a2.id());
        assert_eq!(a.id().to_string().len(), 40);
        assert_eq!(
            ImageId::of(b"abc").to_string(),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
    }

    #[test]
    fn buffer_ranges() {
        let mut data = vec![0xCC_u8; 100];
        data[10..15].fill(0xBB);

        assert_eq!(Backend::len(&data), 100);
        assert_eq!(data.data_slice(10, 5).unwrap(), &[0xBB; 5]);
        assert_eq!(data.data_slice(100, 0).unwrap(), &[] as &[u8]);
        assert!(matches!(data.data_slice(99, 2), Err(OutOfBounds)));
        assert!(matches!(data.data_slice(usize::MAX, 1), Err(OutOfBounds)));
    }

    #[test]
    fn id_is_fixed_at_creation() {
        let bytes = synthetic_image(ImageKind::Library, b"fixed");
        let expected = ImageId::of(&bytes);
        let image = Image::from_mem(bytes).unwrap();

        assert_eq!(image.id(), expected);
        assert!(format!("{image:?}").contains(&expected.to_string()));
    }

    #[test]
    fn from_file() {
        let bytes = synthetic_image(ImageKind::Executable, b"on disk");
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&bytes).unwrap();
        file.flush().unwrap();

        let image = Image::from_file(file.path()).unwrap();
        assert_eq!(image.data(), bytes.as_slice());
        assert_eq!(image.id(), ImageId::of(&bytes));
        assert!(image.info().is_ok());
    }
}
