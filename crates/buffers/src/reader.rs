//! Binary buffer reader with cursor tracking.

use std::str;

use crate::BufferError;

/// A binary buffer reader over a byte slice.
///
/// The reader maintains a cursor position and provides bounds-checked
/// accessors for the fixed-width and variable-width integers used by the
/// treesync wire format. Multi-byte integers are big-endian.
///
/// # Example
///
/// ```
/// use treesync_buffers::Reader;
///
/// let data = [0x01, 0x02, 0x03];
/// let mut reader = Reader::new(&data);
///
/// assert_eq!(reader.u8().unwrap(), 0x01);
/// assert_eq!(reader.u16().unwrap(), 0x0203);
/// assert!(reader.u8().is_err());
/// ```
pub struct Reader<'a> {
    /// The underlying byte slice.
    pub data: &'a [u8],
    /// Current cursor position.
    pub x: usize,
}

impl<'a> Reader<'a> {
    /// Creates a new reader for the given byte slice.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, x: 0 }
    }

    /// Resets the reader with a new byte slice.
    pub fn reset(&mut self, data: &'a [u8]) {
        self.data = data;
        self.x = 0;
    }

    /// Returns the number of remaining bytes.
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.x)
    }

    /// Returns `true` once the cursor has consumed the whole slice.
    pub fn is_eof(&self) -> bool {
        self.x >= self.data.len()
    }

    #[inline]
    fn check(&self, n: usize) -> Result<(), BufferError> {
        if self.x + n > self.data.len() {
            Err(BufferError::EndOfBuffer)
        } else {
            Ok(())
        }
    }

    /// Peeks at the current byte without advancing the cursor.
    pub fn peek(&self) -> Result<u8, BufferError> {
        self.check(1)?;
        Ok(self.data[self.x])
    }

    /// Advances the cursor by `n` bytes.
    pub fn skip(&mut self, n: usize) -> Result<(), BufferError> {
        self.check(n)?;
        self.x += n;
        Ok(())
    }

    /// Returns a subslice of `len` bytes and advances the cursor.
    pub fn buf(&mut self, len: usize) -> Result<&'a [u8], BufferError> {
        self.check(len)?;
        let start = self.x;
        self.x += len;
        Ok(&self.data[start..self.x])
    }

    /// Reads an unsigned 8-bit integer.
    #[inline]
    pub fn u8(&mut self) -> Result<u8, BufferError> {
        self.check(1)?;
        let val = self.data[self.x];
        self.x += 1;
        Ok(val)
    }

    /// Reads an unsigned 16-bit integer (big-endian).
    #[inline]
    pub fn u16(&mut self) -> Result<u16, BufferError> {
        self.check(2)?;
        let val = u16::from_be_bytes([self.data[self.x], self.data[self.x + 1]]);
        self.x += 2;
        Ok(val)
    }

    /// Reads an unsigned 32-bit integer (big-endian).
    #[inline]
    pub fn u32(&mut self) -> Result<u32, BufferError> {
        self.check(4)?;
        let val = u32::from_be_bytes([
            self.data[self.x],
            self.data[self.x + 1],
            self.data[self.x + 2],
            self.data[self.x + 3],
        ]);
        self.x += 4;
        Ok(val)
    }

    /// Reads a signed 32-bit integer (big-endian).
    #[inline]
    pub fn i32(&mut self) -> Result<i32, BufferError> {
        Ok(self.u32()? as i32)
    }

    /// Reads an unsigned 64-bit integer (big-endian).
    #[inline]
    pub fn u64(&mut self) -> Result<u64, BufferError> {
        self.check(8)?;
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&self.data[self.x..self.x + 8]);
        self.x += 8;
        Ok(u64::from_be_bytes(bytes))
    }

    /// Reads an unsigned 128-bit integer (big-endian).
    #[inline]
    pub fn u128(&mut self) -> Result<u128, BufferError> {
        self.check(16)?;
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&self.data[self.x..self.x + 16]);
        self.x += 16;
        Ok(u128::from_be_bytes(bytes))
    }

    /// Reads a 32-bit floating point number (big-endian).
    #[inline]
    pub fn f32(&mut self) -> Result<f32, BufferError> {
        Ok(f32::from_bits(self.u32()?))
    }

    /// Reads a UTF-8 string of `len` bytes.
    pub fn utf8(&mut self, len: usize) -> Result<&'a str, BufferError> {
        let bytes = self.buf(len)?;
        str::from_utf8(bytes).map_err(|_| BufferError::InvalidUtf8)
    }

    /// Decodes a 57-bit variable-length unsigned integer.
    ///
    /// Each byte's high bit is a continuation flag; the remaining 7 bits
    /// carry payload in little-endian order (LSB first). At most 8 bytes.
    pub fn vu57(&mut self) -> Result<u64, BufferError> {
        let mut value: u64 = 0;
        for i in 0..8 {
            let byte = self.u8()?;
            if i == 7 {
                // Final byte contributes all 8 bits.
                value |= (byte as u64) << (7 * i);
                return Ok(value);
            }
            value |= ((byte & 0x7F) as u64) << (7 * i);
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(BufferError::VarintOverflow)
    }
}
