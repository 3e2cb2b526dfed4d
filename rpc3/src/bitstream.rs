use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Error, ErrorKind, Result};

/// Bit-granular buffer with independent read and write cursors.
///
/// Bits are stored most-significant first. The backing buffer always holds
/// exactly `ceil(bits_used / 8)` bytes and the unused low bits of the last
/// byte are zero, so two streams with the same written bits compare equal
/// regardless of their read cursors.
#[derive(Debug, Clone, Default)]
pub struct BitStream {
    data: BytesMut,
    write_offset: usize,
    read_offset: usize,
}

impl BitStream {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_capacity(bytes: usize) -> Self {
        Self {
            data: BytesMut::with_capacity(bytes),
            ..Default::default()
        }
    }

    /// Wraps whole bytes for reading; every bit is considered written.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            data: BytesMut::from(bytes),
            write_offset: bytes.len() * 8,
            read_offset: 0,
        }
    }

    #[must_use]
    pub fn bits_used(&self) -> usize {
        self.write_offset
    }

    #[must_use]
    pub fn bytes_used(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn read_offset(&self) -> usize {
        self.read_offset
    }

    #[must_use]
    pub fn remaining_bits(&self) -> usize {
        self.write_offset.saturating_sub(self.read_offset)
    }

    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    #[must_use]
    pub fn into_bytes(self) -> Bytes {
        self.data.freeze()
    }

    pub fn reset_read_pointer(&mut self) {
        self.read_offset = 0;
    }

    /// # Errors
    ///
    /// Returns `ReadPastEnd` if fewer than `bits` remain.
    pub fn ignore_bits(&mut self, bits: usize) -> Result<()> {
        self.ensure_readable(bits)?;
        self.read_offset += bits;
        Ok(())
    }

    fn ensure_readable(&self, bits: usize) -> Result<()> {
        let remaining = self.remaining_bits();
        if bits > remaining {
            return Err(Error::new(
                ErrorKind::ReadPastEnd,
                format!("need {bits} bits, {remaining} remaining"),
            ));
        }
        Ok(())
    }

    // Writes the top `n` bits of `value`, 1 <= n <= 8.
    fn push_bits(&mut self, value: u8, n: usize) {
        debug_assert!((1..=8).contains(&n));
        let value = value & (0xFFu8 << (8 - n));
        let used = self.write_offset % 8;
        if used == 0 {
            self.data.put_u8(value);
        } else {
            let last = self.data.len() - 1;
            self.data[last] |= value >> used;
            if n > 8 - used {
                self.data.put_u8(value << (8 - used));
            }
        }
        self.write_offset += n;
    }

    // Reads `n` bits into the top of a byte, 1 <= n <= 8. Caller checks bounds.
    fn pull_bits(&mut self, n: usize) -> u8 {
        debug_assert!((1..=8).contains(&n));
        let used = self.read_offset % 8;
        let index = self.read_offset / 8;
        let mut value = self.data[index] << used;
        if n > 8 - used {
            value |= self.data[index + 1] >> (8 - used);
        }
        self.read_offset += n;
        value & (0xFFu8 << (8 - n))
    }

    pub fn write_bit(&mut self, bit: bool) {
        self.push_bits(if bit { 0x80 } else { 0 }, 1);
    }

    /// # Errors
    pub fn read_bit(&mut self) -> Result<bool> {
        self.ensure_readable(1)?;
        Ok(self.pull_bits(1) != 0)
    }

    /// Appends the first `bit_count` bits of `src`.
    pub fn write_bits(&mut self, src: &[u8], bit_count: usize) {
        debug_assert!(bit_count <= src.len() * 8);
        let full = bit_count / 8;
        if self.write_offset % 8 == 0 {
            self.data.extend_from_slice(&src[..full]);
            self.write_offset += full * 8;
        } else {
            for &byte in &src[..full] {
                self.push_bits(byte, 8);
            }
        }
        let rest = bit_count % 8;
        if rest > 0 {
            self.push_bits(src[full], rest);
        }
    }

    /// Reads `bit_count` bits; the last byte of the result is left-aligned.
    ///
    /// # Errors
    pub fn read_bits(&mut self, bit_count: usize) -> Result<Vec<u8>> {
        self.ensure_readable(bit_count)?;
        let full = bit_count / 8;
        let mut out = Vec::with_capacity(bit_count.div_ceil(8));
        if self.read_offset % 8 == 0 {
            let start = self.read_offset / 8;
            out.extend_from_slice(&self.data[start..start + full]);
            self.read_offset += full * 8;
        } else {
            for _ in 0..full {
                out.push(self.pull_bits(8));
            }
        }
        let rest = bit_count % 8;
        if rest > 0 {
            out.push(self.pull_bits(rest));
        }
        Ok(out)
    }

    pub fn write_u8(&mut self, value: u8) {
        self.push_bits(value, 8);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.write_bits(&value.to_be_bytes(), 16);
    }

    pub fn write_u32(&mut self, value: u32) {
        self.write_bits(&value.to_be_bytes(), 32);
    }

    pub fn write_u64(&mut self, value: u64) {
        self.write_bits(&value.to_be_bytes(), 64);
    }

    /// # Errors
    pub fn read_u8(&mut self) -> Result<u8> {
        self.ensure_readable(8)?;
        Ok(self.pull_bits(8))
    }

    /// # Errors
    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes(self.read_array()?))
    }

    /// # Errors
    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.read_array()?))
    }

    /// # Errors
    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_be_bytes(self.read_array()?))
    }

    /// Reads `N` whole bytes at the current bit position.
    ///
    /// # Errors
    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        self.ensure_readable(N * 8)?;
        let mut out = [0u8; N];
        for byte in &mut out {
            *byte = self.pull_bits(8);
        }
        Ok(out)
    }

    /// Compressed encoding of big-endian bytes: every leading zero byte costs
    /// one bit; the first non-zero leading byte is flagged and the rest is
    /// written verbatim. A final byte with a zero high nibble is written as a
    /// flag plus the low nibble.
    fn write_compressed(&mut self, bytes: &[u8]) {
        let (last, leading) = match bytes.split_last() {
            Some(split) => split,
            None => return,
        };
        for (i, &byte) in leading.iter().enumerate() {
            if byte == 0 {
                self.write_bit(true);
            } else {
                self.write_bit(false);
                self.write_bits(&bytes[i..], (bytes.len() - i) * 8);
                return;
            }
        }
        if *last & 0xF0 == 0 {
            self.write_bit(true);
            self.push_bits(*last << 4, 4);
        } else {
            self.write_bit(false);
            self.push_bits(*last, 8);
        }
    }

    fn read_compressed(&mut self, bytes: &mut [u8]) -> Result<()> {
        let len = bytes.len();
        for i in 0..len.saturating_sub(1) {
            if !self.read_bit()? {
                let rest = self.read_bits((len - i) * 8)?;
                bytes[i..].copy_from_slice(&rest);
                return Ok(());
            }
        }
        if let Some(last) = bytes.last_mut() {
            if self.read_bit()? {
                self.ensure_readable(4)?;
                *last = self.pull_bits(4) >> 4;
            } else {
                *last = self.read_u8()?;
            }
        }
        Ok(())
    }

    pub fn write_compressed_u32(&mut self, value: u32) {
        self.write_compressed(&value.to_be_bytes());
    }

    pub fn write_compressed_u64(&mut self, value: u64) {
        self.write_compressed(&value.to_be_bytes());
    }

    /// # Errors
    pub fn read_compressed_u32(&mut self) -> Result<u32> {
        let mut bytes = [0u8; 4];
        self.read_compressed(&mut bytes)?;
        Ok(u32::from_be_bytes(bytes))
    }

    /// # Errors
    pub fn read_compressed_u64(&mut self) -> Result<u64> {
        let mut bytes = [0u8; 8];
        self.read_compressed(&mut bytes)?;
        Ok(u64::from_be_bytes(bytes))
    }

    /// Pads the write cursor to the next byte boundary with zero bits.
    pub fn align_write(&mut self) {
        self.write_offset = self.write_offset.next_multiple_of(8);
    }

    pub fn align_read(&mut self) {
        self.read_offset = self.read_offset.next_multiple_of(8);
    }

    pub fn write_aligned_bytes(&mut self, bytes: &[u8]) {
        self.align_write();
        self.data.extend_from_slice(bytes);
        self.write_offset += bytes.len() * 8;
    }

    /// # Errors
    pub fn read_aligned_bytes(&mut self, len: usize) -> Result<Bytes> {
        self.align_read();
        self.ensure_readable(len * 8)?;
        let start = self.read_offset / 8;
        let out = Bytes::copy_from_slice(&self.data[start..start + len]);
        self.read_offset += len * 8;
        Ok(out)
    }

    /// Appends every written bit of `other`; its read cursor is ignored.
    pub fn write_stream(&mut self, other: &BitStream) {
        self.write_bits(&other.data, other.write_offset);
    }

    /// # Errors
    pub fn read_stream(&mut self, bit_count: usize) -> Result<BitStream> {
        let bytes = self.read_bits(bit_count)?;
        let mut stream = BitStream::with_capacity(bytes.len());
        stream.write_bits(&bytes, bit_count);
        Ok(stream)
    }

    /// Writes a compressed byte length followed by the raw bytes.
    pub fn write_str(&mut self, value: &str) {
        let bytes = value.as_bytes();
        self.write_compressed_u32(u32::try_from(bytes.len()).unwrap_or(u32::MAX));
        self.write_bits(bytes, bytes.len() * 8);
    }

    /// # Errors
    ///
    /// Fails if the announced length exceeds `max_len`, runs past the end or
    /// is not UTF-8.
    pub fn read_string(&mut self, max_len: usize) -> Result<String> {
        let len = self.read_compressed_u32()? as usize;
        if len > max_len {
            return Err(Error::new(
                ErrorKind::DeserializeFailed,
                format!("string length {len} exceeds {max_len}"),
            ));
        }
        let bytes = self.read_bits(len * 8)?;
        Ok(String::from_utf8(bytes)?)
    }
}

impl PartialEq for BitStream {
    fn eq(&self, other: &Self) -> bool {
        self.write_offset == other.write_offset && self.data == other.data
    }
}

impl Eq for BitStream {}
