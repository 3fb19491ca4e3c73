//! Big-endian typed I/O over a contiguous buffer (reader) or a growing
//! byte vector (writer).
//!
//! Every read fails and leaves the position unchanged if fewer than the
//! required bytes remain.

use std::fs::File;
use std::io::Write;

use bytes::{BufMut, BytesMut};

use crate::error::{Error, Result};

/// Reserved capacity for a fresh [`BufferWriter`] (256 KiB).
const DEFAULT_WRITER_CAPACITY: usize = 0x40000;

/// Reads big-endian integers from a borrowed byte slice.
#[derive(Debug)]
pub struct BufferReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> BufferReader<'a> {
    /// Create a reader over `buf` starting at position 0.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// True if at least `count` more bytes can be read.
    pub fn has_bytes(&self, count: usize) -> bool {
        self.pos + count <= self.buf.len()
    }

    fn take(&mut self, count: usize) -> Result<&'a [u8]> {
        if !self.has_bytes(count) {
            return Err(Error::parser(format!(
                "buffer underflow: need {} bytes at position {}, have {}",
                count,
                self.pos,
                self.buf.len()
            )));
        }
        let slice = &self.buf[self.pos..self.pos + count];
        self.pos += count;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        Ok(u64::from_be_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        Ok(self.read_u16()? as i16)
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(self.read_u32()? as i32)
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        Ok(self.read_u64()? as i64)
    }

    /// Read the low-order `num_bytes` (1..=8) of an unsigned 64-bit value.
    pub fn read_n_bytes(&mut self, num_bytes: usize) -> Result<u64> {
        debug_assert!(num_bytes >= 1 && num_bytes <= 8);
        let b = self.take(num_bytes)?;
        let mut v: u64 = 0;
        for byte in b {
            v = (v << 8) | u64::from(*byte);
        }
        Ok(v)
    }

    /// Read the low-order `num_bytes` (1..=8) of a signed 64-bit value,
    /// sign-extending from bit `8 * num_bytes - 1`.
    pub fn read_n_bytes_signed(&mut self, num_bytes: usize) -> Result<i64> {
        let v = self.read_n_bytes(num_bytes)?;
        if num_bytes == 8 {
            return Ok(v as i64);
        }
        let shift = 64 - 8 * num_bytes as u32;
        Ok(((v << shift) as i64) >> shift)
    }

    /// Append exactly `count` bytes to `vec`.
    pub fn read_to_vec(&mut self, vec: &mut Vec<u8>, count: usize) -> Result<()> {
        let slice = self.take(count)?;
        vec.extend_from_slice(slice);
        Ok(())
    }

    /// Advance the position by `num_bytes`.
    pub fn skip_bytes(&mut self, num_bytes: usize) -> Result<()> {
        self.take(num_bytes)?;
        Ok(())
    }

    pub fn data(&self) -> &'a [u8] {
        self.buf
    }

    pub fn size(&self) -> usize {
        self.buf.len()
    }

    pub fn pos(&self) -> usize {
        self.pos
    }
}

/// Appends big-endian integers to an owned, growing byte buffer.
#[derive(Debug)]
pub struct BufferWriter {
    buf: BytesMut,
}

impl Default for BufferWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl BufferWriter {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(DEFAULT_WRITER_CAPACITY),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    pub fn append_u8(&mut self, v: u8) {
        self.buf.put_u8(v);
    }

    pub fn append_u16(&mut self, v: u16) {
        self.buf.put_u16(v);
    }

    pub fn append_u32(&mut self, v: u32) {
        self.buf.put_u32(v);
    }

    pub fn append_u64(&mut self, v: u64) {
        self.buf.put_u64(v);
    }

    pub fn append_i16(&mut self, v: i16) {
        self.buf.put_i16(v);
    }

    pub fn append_i32(&mut self, v: i32) {
        self.buf.put_i32(v);
    }

    pub fn append_i64(&mut self, v: i64) {
        self.buf.put_i64(v);
    }

    /// Append the low-order `num_bytes` (1..=8) of `v`, big-endian.
    pub fn append_n_bytes(&mut self, v: u64, num_bytes: usize) {
        debug_assert!(num_bytes >= 1 && num_bytes <= 8);
        for i in (0..num_bytes).rev() {
            self.buf.put_u8((v >> (8 * i)) as u8);
        }
    }

    pub fn append_slice(&mut self, data: &[u8]) {
        self.buf.put_slice(data);
    }

    pub fn append_buffer(&mut self, other: &BufferWriter) {
        self.buf.put_slice(&other.buf);
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    pub fn size(&self) -> usize {
        self.buf.len()
    }

    pub fn buffer(&self) -> &[u8] {
        &self.buf
    }

    /// Drain the buffer into `file` and clear it on success. `write_all`
    /// retries partial writes internally.
    pub fn write_to_file(&mut self, file: &mut File) -> Result<()> {
        file.write_all(&self.buf)?;
        self.buf.clear();
        Ok(())
    }
}
