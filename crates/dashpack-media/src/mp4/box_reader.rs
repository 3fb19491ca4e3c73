//! Length-prefixed ISO BMFF box framing and lazy child discovery.

use tracing::{debug, warn};

use super::fourcc::FourCC;
use crate::buffer::BufferReader;
use crate::error::{Error, Result};

/// Box header size without the 64-bit size extension.
pub const BOX_HEADER_SIZE: usize = 8;

/// Boxes legal at the top level of an ISO BMFF stream.
const TOP_LEVEL_TYPES: [FourCC; 15] = [
    FourCC::FTYP,
    FourCC::PDIN,
    FourCC::MOOV,
    FourCC::MOOF,
    FourCC::MFRA,
    FourCC::MDAT,
    FourCC::FREE,
    FourCC::SKIP,
    FourCC::META,
    FourCC::MECO,
    FourCC::STYP,
    FourCC::SIDX,
    FourCC::SSIX,
    FourCC::PRFT,
    FourCC::BLOC,
];

fn is_valid_top_level_box(fourcc: FourCC) -> bool {
    TOP_LEVEL_TYPES.contains(&fourcc)
}

// (type, total size, header size), or None when the buffer holds less than a
// full header.
fn parse_box_header(buf: &[u8]) -> Result<Option<(FourCC, u64, usize)>> {
    if buf.len() < BOX_HEADER_SIZE {
        return Ok(None);
    }
    let size32 = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
    let fourcc = FourCC([buf[4], buf[5], buf[6], buf[7]]);

    let (size, header_size) = if size32 == 1 {
        if buf.len() < BOX_HEADER_SIZE + 8 {
            return Ok(None);
        }
        let size64 = u64::from_be_bytes([
            buf[8], buf[9], buf[10], buf[11], buf[12], buf[13], buf[14], buf[15],
        ]);
        (size64, BOX_HEADER_SIZE + 8)
    } else {
        (u64::from(size32), BOX_HEADER_SIZE)
    };

    // Boxes running to end-of-file are not supported.
    if size == 0 {
        return Err(Error::parser(format!("box '{fourcc}' with size 0")));
    }
    if size < header_size as u64 {
        return Err(Error::parser(format!(
            "box '{fourcc}' size {size} smaller than its header"
        )));
    }
    Ok(Some((fourcc, size, header_size)))
}

// A child box discovered by `scan_children`.
#[derive(Debug)]
struct ChildEntry {
    fourcc: FourCC,
    /// Offset of the child box header within the parent's buffer.
    offset: usize,
    /// Total child size including header.
    size: usize,
    consumed: bool,
}

/// Reader over one box: its header has been parsed, its body can be read
/// either as primitives or as scanned children.
#[derive(Debug)]
pub struct BoxReader<'a> {
    pub(crate) stream: BufferReader<'a>,
    box_type: FourCC,
    box_size: u64,
    children: Vec<ChildEntry>,
    scanned: bool,
}

impl<'a> BoxReader<'a> {
    // `buf` must span exactly one whole box.
    pub(crate) fn for_box(buf: &'a [u8]) -> Result<Self> {
        let (fourcc, size, header_size) = parse_box_header(buf)?
            .ok_or_else(|| Error::parser("truncated box header"))?;
        if size != buf.len() as u64 {
            return Err(Error::parser(format!(
                "box '{fourcc}' size {size} does not match buffer length {}",
                buf.len()
            )));
        }
        let mut stream = BufferReader::new(buf);
        stream.skip_bytes(header_size)?;
        Ok(Self {
            stream,
            box_type: fourcc,
            box_size: size,
            children: Vec::new(),
            scanned: false,
        })
    }

    /// Read a top-level box from `buf`. Returns `Ok(None)` when the buffer
    /// does not yet hold the complete box; fails on malformed headers and on
    /// box types that are not legal at the top level.
    pub fn read_top_level_box(buf: &'a [u8]) -> Result<Option<Self>> {
        let Some((fourcc, size, _)) = parse_box_header(buf)? else {
            return Ok(None);
        };
        if !is_valid_top_level_box(fourcc) {
            return Err(Error::parser(format!(
                "unrecognized top-level box type '{fourcc}'"
            )));
        }
        if (buf.len() as u64) < size {
            return Ok(None);
        }
        Ok(Some(Self::for_box(&buf[..size as usize])?))
    }

    /// Peek the header of a top-level box without requiring the full body.
    /// Returns `Ok(None)` when not even the header is available.
    pub fn start_top_level_box(buf: &[u8]) -> Result<Option<(FourCC, u64)>> {
        match parse_box_header(buf)? {
            Some((fourcc, size, _)) => {
                if !is_valid_top_level_box(fourcc) {
                    return Err(Error::parser(format!(
                        "unrecognized top-level box type '{fourcc}'"
                    )));
                }
                Ok(Some((fourcc, size)))
            }
            None => Ok(None),
        }
    }

    pub fn box_type(&self) -> FourCC {
        self.box_type
    }

    /// Total box size including the header.
    pub fn size(&self) -> u64 {
        self.box_size
    }

    /// The whole box, header included.
    pub fn entire_box(&self) -> &'a [u8] {
        self.stream.data()
    }

    /// Bytes left in the body.
    pub fn bytes_left(&self) -> usize {
        self.stream.size() - self.stream.pos()
    }

    /// Walk the remaining body and record every child box. Must be called
    /// before any child read.
    pub fn scan_children(&mut self) -> Result<()> {
        debug_assert!(!self.scanned);
        while self.bytes_left() > 0 {
            let offset = self.stream.pos();
            let remaining = &self.stream.data()[offset..];
            let (fourcc, size, _) = parse_box_header(remaining)?.ok_or_else(|| {
                Error::parser(format!(
                    "truncated child header inside box '{}'",
                    self.box_type
                ))
            })?;
            if size > remaining.len() as u64 {
                return Err(Error::parser(format!(
                    "child box '{fourcc}' overflows its parent '{}'",
                    self.box_type
                )));
            }
            debug!(parent = %self.box_type, child = %fourcc, size, "scanned child box");
            self.children.push(ChildEntry {
                fourcc,
                offset,
                size: size as usize,
                consumed: false,
            });
            self.stream.skip_bytes(size as usize)?;
        }
        self.scanned = true;
        Ok(())
    }

    fn child_reader(&self, offset: usize, size: usize) -> Result<BoxReader<'a>> {
        BoxReader::for_box(&self.stream.data()[offset..offset + size])
    }

    /// True if an unconsumed child of the given type remains.
    pub fn has_child(&self, fourcc: FourCC) -> bool {
        self.children
            .iter()
            .any(|entry| !entry.consumed && entry.fourcc == fourcc)
    }

    /// Take the next unconsumed child with the given type, if any.
    pub fn take_child(&mut self, fourcc: FourCC) -> Result<Option<BoxReader<'a>>> {
        debug_assert!(self.scanned);
        let found = self
            .children
            .iter()
            .position(|entry| !entry.consumed && entry.fourcc == fourcc);
        match found {
            Some(index) => {
                self.children[index].consumed = true;
                let (offset, size) = (self.children[index].offset, self.children[index].size);
                Ok(Some(self.child_reader(offset, size)?))
            }
            None => Ok(None),
        }
    }

    /// Take the next unconsumed child regardless of type, in scan order.
    pub fn take_next_child(&mut self) -> Result<Option<BoxReader<'a>>> {
        debug_assert!(self.scanned);
        let found = self.children.iter().position(|entry| !entry.consumed);
        match found {
            Some(index) => {
                self.children[index].consumed = true;
                let (offset, size) = (self.children[index].offset, self.children[index].size);
                Ok(Some(self.child_reader(offset, size)?))
            }
            None => Ok(None),
        }
    }

    /// Log children nobody claimed; they are skipped, not errors.
    pub fn log_unclaimed_children(&self) {
        for entry in &self.children {
            if !entry.consumed {
                warn!(parent = %self.box_type, child = %entry.fourcc, "skipping unknown box");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferWriter;

    fn make_box(fourcc: &[u8; 4], body: &[u8]) -> Vec<u8> {
        let mut writer = BufferWriter::new();
        writer.append_u32((8 + body.len()) as u32);
        writer.append_slice(fourcc);
        writer.append_slice(body);
        writer.buffer().to_vec()
    }

    #[test]
    fn top_level_box() {
        let data = make_box(b"free", &[1, 2, 3, 4]);
        let reader = BoxReader::read_top_level_box(&data).unwrap().unwrap();
        assert_eq!(reader.box_type(), FourCC::FREE);
        assert_eq!(reader.size(), 12);
        assert_eq!(reader.bytes_left(), 4);
    }

    #[test]
    fn incomplete_box_returns_none() {
        let data = make_box(b"free", &[0; 100]);
        assert!(BoxReader::read_top_level_box(&data[..20]).unwrap().is_none());
        assert!(BoxReader::read_top_level_box(&data[..5]).unwrap().is_none());
    }

    #[test]
    fn rejects_unknown_top_level_type() {
        let data = make_box(b"zzzz", &[]);
        assert!(BoxReader::read_top_level_box(&data).is_err());
    }

    #[test]
    fn rejects_size_zero() {
        let mut data = make_box(b"free", &[]);
        data[..4].copy_from_slice(&[0, 0, 0, 0]);
        assert!(BoxReader::read_top_level_box(&data).is_err());
    }

    #[test]
    fn extended_size() {
        let mut writer = BufferWriter::new();
        writer.append_u32(1);
        writer.append_slice(b"mdat");
        writer.append_u64(16 + 4);
        writer.append_slice(&[9, 9, 9, 9]);
        let data = writer.buffer().to_vec();
        let reader = BoxReader::read_top_level_box(&data).unwrap().unwrap();
        assert_eq!(reader.box_type(), FourCC::MDAT);
        assert_eq!(reader.size(), 20);
        assert_eq!(reader.bytes_left(), 4);
    }

    #[test]
    fn scan_and_take_children() {
        let child_a = make_box(b"frma", &[0, 0, 0, 1]);
        let child_b = make_box(b"schm", &[0, 0, 0, 2]);
        let child_a2 = make_box(b"frma", &[0, 0, 0, 3]);
        let mut body = Vec::new();
        body.extend_from_slice(&child_a);
        body.extend_from_slice(&child_b);
        body.extend_from_slice(&child_a2);
        let data = make_box(b"moov", &body);

        let mut reader = BoxReader::read_top_level_box(&data).unwrap().unwrap();
        reader.scan_children().unwrap();

        let first = reader.take_child(FourCC::FRMA).unwrap().unwrap();
        assert_eq!(first.bytes_left(), 4);
        let second = reader.take_child(FourCC::FRMA).unwrap().unwrap();
        assert_eq!(second.box_type(), FourCC::FRMA);
        assert!(reader.take_child(FourCC::FRMA).unwrap().is_none());

        let next = reader.take_next_child().unwrap().unwrap();
        assert_eq!(next.box_type(), FourCC::SCHM);
        assert!(reader.take_next_child().unwrap().is_none());
    }

    #[test]
    fn child_overflowing_parent_is_an_error() {
        let mut child = make_box(b"frma", &[0, 0, 0, 1]);
        child[3] = 40; // declared size larger than the parent leaves
        let data = make_box(b"moov", &child);
        let mut reader = BoxReader::read_top_level_box(&data).unwrap().unwrap();
        assert!(reader.scan_children().is_err());
    }
}
