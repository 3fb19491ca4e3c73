//! Symmetric box serialization.
//!
//! Every box implements one `read_write` routine that both parses and
//! serializes, depending on whether the [`BoxBuffer`] wraps a reader or a
//! writer. The variant is dispatched explicitly so that failures name the
//! direction they happened in.

use super::box_reader::BoxReader;
use super::fourcc::FourCC;
use crate::buffer::BufferWriter;
use crate::error::{Error, Result};

/// Plain box header size: 32-bit size + FourCC.
pub const BOX_SIZE: u32 = 8;
/// Full box header size: plain header + version + 24-bit flags.
pub const FULL_BOX_SIZE: u32 = 12;

/// A box in the ISO BMFF tree.
///
/// `compute_size` returns the number of bytes `read_write` emits in write
/// mode, including the header. A computed size of zero marks an optional box
/// as absent; writers suppress it.
pub trait Mp4Box: Default {
    fn box_type(&self) -> FourCC;
    fn read_write(&mut self, buffer: &mut BoxBuffer<'_, '_>) -> Result<()>;
    fn compute_size(&self) -> u32;

    /// Parse this box from a positioned reader.
    fn parse(&mut self, reader: &mut BoxReader<'_>) -> Result<()> {
        let mut buffer = BoxBuffer::Reader(reader);
        self.read_write(&mut buffer)?;
        reader.log_unclaimed_children();
        Ok(())
    }

    /// Serialize this box, header included.
    fn write(&mut self, writer: &mut BufferWriter) -> Result<()> {
        let mut buffer = BoxBuffer::Writer(writer);
        self.read_write(&mut buffer)
    }
}

/// Wraps either a box reader or a buffer writer for symmetric access.
pub enum BoxBuffer<'r, 'a> {
    Reader(&'r mut BoxReader<'a>),
    Writer(&'r mut BufferWriter),
}

impl<'r, 'a> BoxBuffer<'r, 'a> {
    pub fn reading(&self) -> bool {
        matches!(self, Self::Reader(_))
    }

    /// Plain box header. A no-op in read mode, where the framing was already
    /// consumed by the box reader.
    pub fn rw_header(&mut self, box_type: FourCC, size: u32) -> Result<()> {
        match self {
            Self::Reader(_) => Ok(()),
            Self::Writer(writer) => {
                writer.append_u32(size);
                writer.append_slice(&box_type.0);
                Ok(())
            }
        }
    }

    /// Full box header: plain header plus version and 24-bit flags.
    pub fn rw_full_header(
        &mut self,
        box_type: FourCC,
        size: u32,
        version: &mut u8,
        flags: &mut u32,
    ) -> Result<()> {
        match self {
            Self::Reader(reader) => {
                *version = reader.stream.read_u8()?;
                *flags = reader.stream.read_n_bytes(3)? as u32;
                Ok(())
            }
            Self::Writer(writer) => {
                writer.append_u32(size);
                writer.append_slice(&box_type.0);
                writer.append_u8(*version);
                writer.append_n_bytes(u64::from(*flags), 3);
                Ok(())
            }
        }
    }

    pub fn rw_u8(&mut self, v: &mut u8) -> Result<()> {
        match self {
            Self::Reader(reader) => {
                *v = reader.stream.read_u8()?;
                Ok(())
            }
            Self::Writer(writer) => {
                writer.append_u8(*v);
                Ok(())
            }
        }
    }

    pub fn rw_u16(&mut self, v: &mut u16) -> Result<()> {
        match self {
            Self::Reader(reader) => {
                *v = reader.stream.read_u16()?;
                Ok(())
            }
            Self::Writer(writer) => {
                writer.append_u16(*v);
                Ok(())
            }
        }
    }

    pub fn rw_u32(&mut self, v: &mut u32) -> Result<()> {
        match self {
            Self::Reader(reader) => {
                *v = reader.stream.read_u32()?;
                Ok(())
            }
            Self::Writer(writer) => {
                writer.append_u32(*v);
                Ok(())
            }
        }
    }

    pub fn rw_u64(&mut self, v: &mut u64) -> Result<()> {
        match self {
            Self::Reader(reader) => {
                *v = reader.stream.read_u64()?;
                Ok(())
            }
            Self::Writer(writer) => {
                writer.append_u64(*v);
                Ok(())
            }
        }
    }

    pub fn rw_i16(&mut self, v: &mut i16) -> Result<()> {
        match self {
            Self::Reader(reader) => {
                *v = reader.stream.read_i16()?;
                Ok(())
            }
            Self::Writer(writer) => {
                writer.append_i16(*v);
                Ok(())
            }
        }
    }

    pub fn rw_i32(&mut self, v: &mut i32) -> Result<()> {
        match self {
            Self::Reader(reader) => {
                *v = reader.stream.read_i32()?;
                Ok(())
            }
            Self::Writer(writer) => {
                writer.append_i32(*v);
                Ok(())
            }
        }
    }

    pub fn rw_i64(&mut self, v: &mut i64) -> Result<()> {
        match self {
            Self::Reader(reader) => {
                *v = reader.stream.read_i64()?;
                Ok(())
            }
            Self::Writer(writer) => {
                writer.append_i64(*v);
                Ok(())
            }
        }
    }

    /// Transfer the low-order `num_bytes` of an unsigned 64-bit value.
    pub fn rw_u64_n_bytes(&mut self, v: &mut u64, num_bytes: usize) -> Result<()> {
        match self {
            Self::Reader(reader) => {
                *v = reader.stream.read_n_bytes(num_bytes)?;
                Ok(())
            }
            Self::Writer(writer) => {
                writer.append_n_bytes(*v, num_bytes);
                Ok(())
            }
        }
    }

    /// Transfer the low-order `num_bytes` of a signed 64-bit value.
    pub fn rw_i64_n_bytes(&mut self, v: &mut i64, num_bytes: usize) -> Result<()> {
        match self {
            Self::Reader(reader) => {
                *v = reader.stream.read_n_bytes_signed(num_bytes)?;
                Ok(())
            }
            Self::Writer(writer) => {
                writer.append_n_bytes(*v as u64, num_bytes);
                Ok(())
            }
        }
    }

    /// Transfer exactly `count` raw bytes. In read mode the vector is
    /// replaced; in write mode its length must equal `count`.
    pub fn rw_vector(&mut self, v: &mut Vec<u8>, count: usize) -> Result<()> {
        match self {
            Self::Reader(reader) => {
                v.clear();
                reader.stream.read_to_vec(v, count)
            }
            Self::Writer(writer) => {
                debug_assert_eq!(v.len(), count);
                writer.append_slice(v);
                Ok(())
            }
        }
    }

    pub fn rw_fourcc(&mut self, v: &mut FourCC) -> Result<()> {
        let mut raw = v.as_u32();
        self.rw_u32(&mut raw)?;
        *v = FourCC::from_u32(raw);
        Ok(())
    }

    /// Skip `num_bytes` in read mode; emit that many zero bytes in write
    /// mode.
    pub fn ignore_bytes(&mut self, num_bytes: usize) -> Result<()> {
        match self {
            Self::Reader(reader) => reader.stream.skip_bytes(num_bytes),
            Self::Writer(writer) => {
                for _ in 0..num_bytes {
                    writer.append_u8(0);
                }
                Ok(())
            }
        }
    }

    /// Scan child boxes in read mode; a no-op in write mode.
    pub fn prepare_children(&mut self) -> Result<()> {
        match self {
            Self::Reader(reader) => reader.scan_children(),
            Self::Writer(_) => Ok(()),
        }
    }

    /// Transfer a mandatory child box.
    pub fn rw_child<T: Mp4Box>(&mut self, child: &mut T) -> Result<()> {
        match self {
            Self::Reader(reader) => {
                let mut child_reader = reader.take_child(child.box_type())?.ok_or_else(|| {
                    Error::parser(format!(
                        "mandatory child box '{}' missing in '{}'",
                        child.box_type(),
                        reader.box_type()
                    ))
                })?;
                child.parse(&mut child_reader)
            }
            Self::Writer(writer) => child.write(writer),
        }
    }

    /// Transfer an optional child box. Absence in read mode is tolerated; a
    /// computed size of zero suppresses emission in write mode.
    pub fn try_rw_child<T: Mp4Box>(&mut self, child: &mut T) -> Result<()> {
        match self {
            Self::Reader(reader) => match reader.take_child(child.box_type())? {
                Some(mut child_reader) => child.parse(&mut child_reader),
                None => Ok(()),
            },
            Self::Writer(writer) => {
                if child.compute_size() != 0 {
                    child.write(writer)?;
                }
                Ok(())
            }
        }
    }

    /// Transfer at least one child box of the same type.
    pub fn rw_children<T: Mp4Box>(&mut self, children: &mut Vec<T>) -> Result<()> {
        self.maybe_rw_children(children)?;
        if self.reading() && children.is_empty() {
            return Err(Error::parser(format!(
                "expected at least one '{}' child box",
                T::default().box_type()
            )));
        }
        Ok(())
    }

    /// Transfer zero or more child boxes of the same type.
    pub fn maybe_rw_children<T: Mp4Box>(&mut self, children: &mut Vec<T>) -> Result<()> {
        match self {
            Self::Reader(reader) => {
                children.clear();
                let key = T::default().box_type();
                while let Some(mut child_reader) = reader.take_child(key)? {
                    let mut child = T::default();
                    child.parse(&mut child_reader)?;
                    children.push(child);
                }
                Ok(())
            }
            Self::Writer(writer) => {
                for child in children {
                    if child.compute_size() != 0 {
                        child.write(writer)?;
                    }
                }
                Ok(())
            }
        }
    }

    /// Transfer every remaining child regardless of FourCC, in scan order.
    /// Used where entries of differing types share one list (`stsd`).
    pub fn rw_all_children<T: Mp4Box>(&mut self, children: &mut Vec<T>) -> Result<()> {
        match self {
            Self::Reader(reader) => {
                children.clear();
                while let Some(mut child_reader) = reader.take_next_child()? {
                    let mut child = T::default();
                    child.parse(&mut child_reader)?;
                    children.push(child);
                }
                Ok(())
            }
            Self::Writer(writer) => {
                for child in children {
                    child.write(writer)?;
                }
                Ok(())
            }
        }
    }

    /// True if an unconsumed scanned child of the given type remains.
    /// Always false in write mode.
    pub fn reader_has_child(&self, fourcc: FourCC) -> bool {
        match self {
            Self::Reader(reader) => reader.has_child(fourcc),
            Self::Writer(_) => false,
        }
    }

    /// The box type of the wrapped reader, for boxes whose FourCC is data
    /// (sample entry formats).
    pub fn reader_box_type(&self) -> Option<FourCC> {
        match self {
            Self::Reader(reader) => Some(reader.box_type()),
            Self::Writer(_) => None,
        }
    }

    /// The entire current box including its header, read mode only.
    pub fn reader_entire_box(&self) -> Option<&[u8]> {
        match self {
            Self::Reader(reader) => Some(reader.entire_box()),
            Self::Writer(_) => None,
        }
    }

    /// Emit raw pre-serialized bytes, write mode only.
    pub fn write_raw(&mut self, bytes: &[u8]) -> Result<()> {
        match self {
            Self::Reader(_) => Err(Error::parser("raw write attempted in read mode")),
            Self::Writer(writer) => {
                writer.append_slice(bytes);
                Ok(())
            }
        }
    }

    /// Bytes remaining in the current box, read mode only (0 otherwise).
    pub fn bytes_left(&self) -> usize {
        match self {
            Self::Reader(reader) => reader.bytes_left(),
            Self::Writer(_) => 0,
        }
    }
}
