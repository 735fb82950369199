//! The CLI header and metadata root of a managed image.
//!
//! Only the fields needed to decide whether and how an image can be hosted are decoded:
//! runtime version, flags, entry-point token and the location of the metadata, whose root
//! carries the version string of the runtime the image was built against.

use bitflags::bitflags;

use crate::{image::io::Parser, Error::OutOfBounds, Result};

/// Size of the CLI header (`IMAGE_COR20_HEADER`)
pub const CLI_HEADER_SIZE: usize = 72;

/// Signature of the metadata root, `BSJB`
pub const METADATA_SIGNATURE: u32 = 0x424A_5342;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    /// `COMIMAGE_FLAGS_*`
    pub struct CliFlags: u32 {
        /// The image contains only IL code
        const IL_ONLY = 0x0000_0001;
        /// The image can only be loaded into a 32-bit process
        const REQUIRE_32BIT = 0x0000_0002;
        /// The image is a library (obsolete)
        const IL_LIBRARY = 0x0000_0004;
        /// The image is strong-name signed
        const STRONG_NAME_SIGNED = 0x0000_0008;
        /// The entry point is native code, `entry_point_token` is an RVA
        const NATIVE_ENTRYPOINT = 0x0000_0010;
        /// Debug data is tracked
        const TRACK_DEBUG_DATA = 0x0001_0000;
        /// Prefer a 32-bit process on 64-bit systems
        const PREFER_32BIT = 0x0002_0000;
    }
}

/// The decoded CLI header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliHeader {
    /// Size of the header, always 72
    pub cb: u32,
    /// Major version of the runtime required to run the image
    pub major_runtime_version: u16,
    /// Minor version of the runtime required to run the image
    pub minor_runtime_version: u16,
    /// RVA of the metadata root
    pub metadata_rva: u32,
    /// Size of the metadata
    pub metadata_size: u32,
    /// Image flags
    pub flags: CliFlags,
    /// `MethodDef` token of the entry point, or an RVA for native entry points
    pub entry_point_token: u32,
}

impl CliHeader {
    /// Decode a CLI header from the start of `data`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if `data` is shorter than the header, or
    /// [`crate::Error::Malformed`] for an invalid size or missing metadata.
    pub fn read(data: &[u8]) -> Result<CliHeader> {
        if data.len() < CLI_HEADER_SIZE {
            return Err(OutOfBounds);
        }

        let mut parser = Parser::new(data);

        let cb = parser.read_le::<u32>()?;
        if cb as usize != CLI_HEADER_SIZE {
            return Err(malformed_error!(
                "Invalid CLI header size: expected 72, got {}",
                cb
            ));
        }

        let major_runtime_version = parser.read_le::<u16>()?;
        let minor_runtime_version = parser.read_le::<u16>()?;

        let metadata_rva = parser.read_le::<u32>()?;
        let metadata_size = parser.read_le::<u32>()?;
        if metadata_rva == 0 || metadata_size == 0 {
            return Err(malformed_error!("Image has no metadata"));
        }

        let flags = CliFlags::from_bits_retain(parser.read_le::<u32>()?);
        let entry_point_token = parser.read_le::<u32>()?;

        Ok(CliHeader {
            cb,
            major_runtime_version,
            minor_runtime_version,
            metadata_rva,
            metadata_size,
            flags,
            entry_point_token,
        })
    }

    /// Returns `true` if the header names a managed entry point.
    #[must_use]
    pub fn has_managed_entry_point(&self) -> bool {
        // MethodDef table is 0x06
        self.entry_point_token >> 24 == 0x06 && !self.flags.contains(CliFlags::NATIVE_ENTRYPOINT)
    }
}

/// Decode the runtime version string from a metadata root, e.g. `v4.0.30319`.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] for a bad signature or a non-UTF-8 version, and
/// [`crate::Error::OutOfBounds`] if `data` ends inside the root.
pub fn read_metadata_version(data: &[u8]) -> Result<String> {
    let mut parser = Parser::new(data);

    let signature = parser.read_le::<u32>()?;
    if signature != METADATA_SIGNATURE {
        return Err(malformed_error!(
            "Invalid metadata signature: 0x{:08X}",
            signature
        ));
    }

    // major, minor, reserved
    parser.advance_by(8)?;

    let length = parser.read_le::<u32>()? as usize;
    let raw = parser.read_bytes(length)?;
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());

    match std::str::from_utf8(&raw[..end]) {
        Ok(version) => Ok(version.to_string()),
        Err(_) => Err(malformed_error!("Metadata version is not valid UTF-8")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crafted() {
        #[rustfmt::skip]
        let header_bytes = [
            0x48, 0x00, 0x00, 0x00, // cb = 72
            0x02, 0x00,             // major_runtime_version = 2
            0x05, 0x00,             // minor_runtime_version = 5
            0x48, 0x20, 0x00, 0x00, // metadata_rva = 0x2048
            0x20, 0x00, 0x00, 0x00, // metadata_size = 0x20
            0x01, 0x00, 0x02, 0x00, // flags = IL_ONLY | PREFER_32BIT
            0x01, 0x00, 0x00, 0x06, // entry_point_token = 0x06000001
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        ];

        let header = CliHeader::read(&header_bytes).unwrap();
        assert_eq!(header.cb, 72);
        assert_eq!(header.major_runtime_version, 2);
        assert_eq!(header.minor_runtime_version, 5);
        assert_eq!(header.metadata_rva, 0x2048);
        assert_eq!(header.flags, CliFlags::IL_ONLY | CliFlags::PREFER_32BIT);
        assert_eq!(header.entry_point_token, 0x0600_0001);
        assert!(header.has_managed_entry_point());
    }

    #[test]
    fn rejects_bad_headers() {
        assert!(matches!(CliHeader::read(&[0x48; 10]), Err(OutOfBounds)));

        let mut bytes = [0_u8; 72];
        bytes[0] = 0x40;
        assert!(CliHeader::read(&bytes).is_err());

        bytes[0] = 0x48;
        assert!(CliHeader::read(&bytes).is_err(), "no metadata");
    }

    #[test]
    fn metadata_version() {
        let mut root = Vec::new();
        root.extend_from_slice(&METADATA_SIGNATURE.to_le_bytes());
        root.extend_from_slice(&[1, 0, 1, 0, 0, 0, 0, 0]);
        root.extend_from_slice(&12_u32.to_le_bytes());
        root.extend_from_slice(b"v4.0.30319\0\0");

        assert_eq!(read_metadata_version(&root).unwrap(), "v4.0.30319");
        assert!(read_metadata_version(&root[..20]).is_err());

        root[0] = 0;
        assert!(read_metadata_version(&root).is_err());
    }
}
