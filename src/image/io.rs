//! Bounds-checked little-endian reads over image bytes.

use crate::{Error::OutOfBounds, Result};

/// Integer types that can be decoded from little-endian bytes.
pub trait FromLe: Sized {
    /// The byte array the value is decoded from.
    type Bytes: Sized + for<'a> TryFrom<&'a [u8]>;

    /// Decode from little-endian bytes
    fn from_le_bytes(bytes: Self::Bytes) -> Self;
}

macro_rules! impl_from_le {
    ($($ty:ty),*) => {
        $(
            impl FromLe for $ty {
                type Bytes = [u8; std::mem::size_of::<$ty>()];

                fn from_le_bytes(bytes: Self::Bytes) -> Self {
                    <$ty>::from_le_bytes(bytes)
                }
            }
        )*
    };
}

impl_from_le!(u8, u16, u32, u64);

/// Reads a `T` at `offset` and advances `offset` past it.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if fewer than `size_of::<T>()` bytes remain.
pub fn read_le_at<T: FromLe>(data: &[u8], offset: &mut usize) -> Result<T> {
    let type_len = std::mem::size_of::<T>();
    let Some(end) = offset.checked_add(type_len) else {
        return Err(OutOfBounds);
    };
    if end > data.len() {
        return Err(OutOfBounds);
    }

    let Ok(read) = data[*offset..end].try_into() else {
        return Err(OutOfBounds);
    };

    *offset = end;
    Ok(T::from_le_bytes(read))
}

/// A cursor over a byte slice.
pub struct Parser<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> Parser<'a> {
    /// Create a parser positioned at the start of `data`
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Parser { data, position: 0 }
    }

    /// Skip `step` bytes
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if fewer than `step` bytes remain.
    pub fn advance_by(&mut self, step: usize) -> Result<()> {
        match self.position.checked_add(step) {
            Some(end) if end <= self.data.len() => {
                self.position = end;
                Ok(())
            }
            _ => Err(OutOfBounds),
        }
    }

    /// Read a `T` and advance past it
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the data ends first.
    pub fn read_le<T: FromLe>(&mut self) -> Result<T> {
        read_le_at::<T>(self.data, &mut self.position)
    }

    /// Read `len` raw bytes and advance past them
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the data ends first.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let start = self.position;
        self.advance_by(len)?;
        Ok(&self.data[start..self.position])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_values() {
        let data = [0x48, 0x00, 0x00, 0x00, 0x04, 0x00, 0x00, 0x00];
        let mut offset = 0;
        assert_eq!(read_le_at::<u64>(&data, &mut offset).unwrap(), 0x0000_0004_0000_0048);
        assert_eq!(offset, 8);

        let mut offset = 4;
        assert_eq!(read_le_at::<u16>(&data, &mut offset).unwrap(), 4);
        assert_eq!(offset, 6);
    }

    #[test]
    fn read_out_of_bounds() {
        let data = [0x01, 0x02, 0x03];
        let mut offset = 0;
        assert!(matches!(read_le_at::<u32>(&data, &mut offset), Err(OutOfBounds)));
        assert_eq!(offset, 0);

        let mut offset = usize::MAX;
        assert!(matches!(read_le_at::<u8>(&data, &mut offset), Err(OutOfBounds)));
    }

    #[test]
    fn parser() {
        let data = [0x42, 0x53, 0x4A, 0x42, 0x01, 0x00, b'v', b'4'];
        let mut parser = Parser::new(&data);
        assert_eq!(parser.read_le::<u32>().unwrap(), 0x424A_5342);
        assert_eq!(parser.read_le::<u16>().unwrap(), 1);
        assert_eq!(parser.read_bytes(2).unwrap(), b"v4");
        assert!(parser.read_le::<u8>().is_err());
        assert!(parser.advance_by(1).is_err());

        let mut parser = Parser::new(&data);
        parser.advance_by(6).unwrap();
        assert_eq!(parser.read_bytes(2).unwrap(), b"v4");
        assert!(parser.advance_by(usize::MAX).is_err());
    }
}
