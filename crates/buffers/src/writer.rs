//! Binary buffer writer with auto-growing capacity.

/// A binary buffer writer that grows automatically as needed.
///
/// Multi-byte integers are written big-endian, matching [`crate::Reader`].
///
/// # Example
///
/// ```
/// use treesync_buffers::Writer;
///
/// let mut writer = Writer::new();
/// writer.u8(0x01);
/// writer.u16(0x0203);
/// assert_eq!(writer.flush(), [0x01, 0x02, 0x03]);
/// ```
pub struct Writer {
    /// The underlying byte buffer.
    pub data: Vec<u8>,
    /// Current cursor position.
    pub x: usize,
    /// Allocation size when the buffer needs to grow.
    alloc_size: usize,
}

impl Default for Writer {
    fn default() -> Self {
        Self::new()
    }
}

impl Writer {
    /// Creates a new writer with the default 4 KB allocation.
    pub fn new() -> Self {
        Self::with_alloc_size(4 * 1024)
    }

    /// Creates a new writer with a custom initial allocation size.
    pub fn with_alloc_size(alloc_size: usize) -> Self {
        Self {
            data: vec![0u8; alloc_size],
            x: 0,
            alloc_size: alloc_size.max(16),
        }
    }

    /// Ensures at least `capacity` more bytes are available.
    pub fn ensure_capacity(&mut self, capacity: usize) {
        let remaining = self.data.len() - self.x;
        if remaining < capacity {
            let required = self.x + capacity;
            let new_size = required.max(self.data.len() + self.alloc_size);
            self.data.resize(new_size, 0);
        }
    }

    /// Discards written data and rewinds the cursor.
    pub fn reset(&mut self) {
        self.x = 0;
    }

    /// Returns the written bytes and rewinds the cursor.
    pub fn flush(&mut self) -> Vec<u8> {
        let result = self.data[..self.x].to_vec();
        self.x = 0;
        result
    }

    /// Returns a view of the written bytes without rewinding.
    pub fn written(&self) -> &[u8] {
        &self.data[..self.x]
    }

    /// Writes an unsigned 8-bit integer.
    #[inline]
    pub fn u8(&mut self, val: u8) {
        self.ensure_capacity(1);
        self.data[self.x] = val;
        self.x += 1;
    }

    /// Writes an unsigned 16-bit integer (big-endian).
    #[inline]
    pub fn u16(&mut self, val: u16) {
        self.ensure_capacity(2);
        self.data[self.x..self.x + 2].copy_from_slice(&val.to_be_bytes());
        self.x += 2;
    }

    /// Writes an unsigned 32-bit integer (big-endian).
    #[inline]
    pub fn u32(&mut self, val: u32) {
        self.ensure_capacity(4);
        self.data[self.x..self.x + 4].copy_from_slice(&val.to_be_bytes());
        self.x += 4;
    }

    /// Writes a signed 32-bit integer (big-endian).
    #[inline]
    pub fn i32(&mut self, val: i32) {
        self.u32(val as u32);
    }

    /// Writes an unsigned 64-bit integer (big-endian).
    #[inline]
    pub fn u64(&mut self, val: u64) {
        self.ensure_capacity(8);
        self.data[self.x..self.x + 8].copy_from_slice(&val.to_be_bytes());
        self.x += 8;
    }

    /// Writes an unsigned 128-bit integer (big-endian).
    #[inline]
    pub fn u128(&mut self, val: u128) {
        self.ensure_capacity(16);
        self.data[self.x..self.x + 16].copy_from_slice(&val.to_be_bytes());
        self.x += 16;
    }

    /// Writes a 32-bit floating point number (big-endian).
    #[inline]
    pub fn f32(&mut self, val: f32) {
        self.u32(val.to_bits());
    }

    /// Writes raw bytes.
    pub fn buf(&mut self, bytes: &[u8]) {
        self.ensure_capacity(bytes.len());
        self.data[self.x..self.x + bytes.len()].copy_from_slice(bytes);
        self.x += bytes.len();
    }

    /// Writes a UTF-8 string (no length prefix) and returns the byte length.
    pub fn utf8(&mut self, s: &str) -> usize {
        self.buf(s.as_bytes());
        s.len()
    }

    /// Encodes a 57-bit variable-length unsigned integer.
    ///
    /// Each byte's high bit is a continuation flag; the remaining 7 bits
    /// carry payload in little-endian order (LSB first). At most 8 bytes.
    pub fn vu57(&mut self, mut val: u64) {
        for _ in 0..7 {
            if val <= 0x7F {
                self.u8(val as u8);
                return;
            }
            self.u8(0x80 | (val & 0x7F) as u8);
            val >>= 7;
        }
        // Final byte carries the remaining 8 bits verbatim.
        self.u8(val as u8);
    }
}
