//! Per-sample CENC auxiliary information: IV plus optional subsample map.

use crate::buffer::{BufferReader, BufferWriter};
use crate::error::{Error, Result};
use crate::media_sample::SubsampleEntry;

// 16-bit clear_bytes + 32-bit cipher_bytes.
const SUBSAMPLE_ENTRY_SIZE: usize = 2 + 4;

fn is_iv_size_valid(iv_size: usize) -> bool {
    iv_size == 8 || iv_size == 16
}

/// The auxiliary datum of one encrypted sample, as referenced through
/// `saiz`/`saio`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FrameCencInfo {
    iv: Vec<u8>,
    subsamples: Vec<SubsampleEntry>,
}

impl FrameCencInfo {
    pub fn new(iv: Vec<u8>) -> Self {
        Self {
            iv,
            subsamples: Vec::new(),
        }
    }

    pub fn add_subsample(&mut self, subsample: SubsampleEntry) {
        self.subsamples.push(subsample);
    }

    pub fn iv(&self) -> &[u8] {
        &self.iv
    }

    pub fn subsamples(&self) -> &[SubsampleEntry] {
        &self.subsamples
    }

    /// Parse one entry with the given IV size. The subsample table is
    /// present only when bytes remain.
    pub fn parse(&mut self, iv_size: usize, reader: &mut BufferReader<'_>) -> Result<()> {
        if !is_iv_size_valid(iv_size) {
            return Err(Error::parser(format!("invalid CENC IV size {iv_size}")));
        }
        self.iv.clear();
        reader.read_to_vec(&mut self.iv, iv_size)?;

        self.subsamples.clear();
        if !reader.has_bytes(1) {
            return Ok(());
        }

        let subsample_count = reader.read_u16()? as usize;
        if !reader.has_bytes(subsample_count * SUBSAMPLE_ENTRY_SIZE) {
            return Err(Error::parser("truncated CENC subsample table"));
        }
        for _ in 0..subsample_count {
            let clear_bytes = reader.read_u16()?;
            let cipher_bytes = reader.read_u32()?;
            self.subsamples.push(SubsampleEntry {
                clear_bytes,
                cipher_bytes,
            });
        }
        Ok(())
    }

    pub fn write(&self, writer: &mut BufferWriter) {
        debug_assert!(is_iv_size_valid(self.iv.len()));
        writer.append_slice(&self.iv);
        if self.subsamples.is_empty() {
            return;
        }
        writer.append_u16(self.subsamples.len() as u16);
        for subsample in &self.subsamples {
            writer.append_u16(subsample.clear_bytes);
            writer.append_u32(subsample.cipher_bytes);
        }
    }

    pub fn compute_size(&self) -> usize {
        if self.subsamples.is_empty() {
            return self.iv.len();
        }
        self.iv.len() + 2 + self.subsamples.len() * SUBSAMPLE_ENTRY_SIZE
    }

    /// Sum of all clear and cipher spans; must equal the sample size.
    pub fn total_size_of_subsamples(&self) -> usize {
        self.subsamples
            .iter()
            .map(|s| s.clear_bytes as usize + s.cipher_bytes as usize)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_parse_round_trip_with_subsamples() {
        let mut info = FrameCencInfo::new(vec![1; 8]);
        info.add_subsample(SubsampleEntry {
            clear_bytes: 5,
            cipher_bytes: 100,
        });
        info.add_subsample(SubsampleEntry {
            clear_bytes: 5,
            cipher_bytes: 42,
        });

        let mut writer = BufferWriter::new();
        info.write(&mut writer);
        assert_eq!(writer.size(), info.compute_size());

        let mut parsed = FrameCencInfo::default();
        let mut reader = BufferReader::new(writer.buffer());
        parsed.parse(8, &mut reader).unwrap();
        assert_eq!(parsed, info);
        assert_eq!(parsed.total_size_of_subsamples(), 152);
    }

    #[test]
    fn iv_only_entry() {
        let info = FrameCencInfo::new(vec![7; 16]);
        let mut writer = BufferWriter::new();
        info.write(&mut writer);
        assert_eq!(writer.size(), 16);

        let mut parsed = FrameCencInfo::default();
        let mut reader = BufferReader::new(writer.buffer());
        parsed.parse(16, &mut reader).unwrap();
        assert_eq!(parsed.iv(), &[7; 16]);
        assert!(parsed.subsamples().is_empty());
    }

    #[test]
    fn rejects_bad_iv_size() {
        let mut parsed = FrameCencInfo::default();
        let data = [0u8; 32];
        let mut reader = BufferReader::new(&data);
        assert!(parsed.parse(12, &mut reader).is_err());
    }
}
