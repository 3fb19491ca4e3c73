//! MPEG-4 elementary stream descriptor, as carried inside the `esds` box
//! (ISO/IEC 14496-1 7.2.6.5).

use crate::buffer::{BufferReader, BufferWriter};
use crate::error::{Error, Result};

const ES_DESCR_TAG: u8 = 0x03;
const DECODER_CONFIG_DESCR_TAG: u8 = 0x04;
const DECODER_SPECIFIC_INFO_TAG: u8 = 0x05;
const SL_CONFIG_TAG: u8 = 0x06;

// ISO/IEC 14496-1 7.3.2.3: SL packet header configuration, MP4 predefined.
const SL_PREDEFINED_MP4: u8 = 0x02;

// ISO/IEC 14496-1 7.2.6.6: audio stream type, with the reserved bit set.
const AUDIO_STREAM_TYPE: u8 = (0x05 << 2) | 1;

// Descriptor header: 1-byte tag + 1-byte size. Writing never needs the
// multi-byte size form because decoder specific info is capped well below
// 128 bytes.
const HEADER_SIZE: u32 = 2;
const MAX_DECODER_SPECIFIC_INFO_SIZE: usize = 64;

/// Object type indications we care about (ISO 14496-1 Table 5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ObjectType {
    #[default]
    Forbidden,
    /// MPEG-4 AAC.
    Iso14496_3,
    /// MPEG-2 AAC-LC.
    Iso13818_7AacLc,
    /// Dolby Digital Plus.
    Eac3,
    Other(u8),
}

impl ObjectType {
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Forbidden,
            0x40 => Self::Iso14496_3,
            0x67 => Self::Iso13818_7AacLc,
            0xa6 => Self::Eac3,
            other => Self::Other(other),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            Self::Forbidden => 0,
            Self::Iso14496_3 => 0x40,
            Self::Iso13818_7AacLc => 0x67,
            Self::Eac3 => 0xa6,
            Self::Other(v) => *v,
        }
    }
}

/// Parses and serializes the ES descriptor payload of an `esds` box.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EsDescriptor {
    esid: u16,
    object_type: ObjectType,
    decoder_specific_info: Vec<u8>,
}

// The descriptor size is encoded in up to 4 bytes of 7 bits each, MSB first,
// with the top bit flagging continuation.
fn read_descriptor_size(reader: &mut BufferReader<'_>) -> Result<u32> {
    let mut size: u32 = 0;
    for _ in 0..4 {
        let byte = reader.read_u8()?;
        size = (size << 7) | u32::from(byte & 0x7F);
        if byte & 0x80 == 0 {
            break;
        }
    }
    Ok(size)
}

impl EsDescriptor {
    pub fn esid(&self) -> u16 {
        self.esid
    }

    pub fn set_esid(&mut self, esid: u16) {
        self.esid = esid;
    }

    pub fn object_type(&self) -> ObjectType {
        self.object_type
    }

    pub fn set_object_type(&mut self, object_type: ObjectType) {
        self.object_type = object_type;
    }

    pub fn decoder_specific_info(&self) -> &[u8] {
        &self.decoder_specific_info
    }

    pub fn set_decoder_specific_info(&mut self, info: Vec<u8>) {
        self.decoder_specific_info = info;
    }

    /// True if the stream is an AAC variant.
    pub fn is_aac(&self) -> bool {
        matches!(
            self.object_type,
            ObjectType::Iso14496_3 | ObjectType::Iso13818_7AacLc
        )
    }

    /// True if nothing was ever parsed or set.
    pub fn is_empty(&self) -> bool {
        self.object_type == ObjectType::Forbidden && self.decoder_specific_info.is_empty()
    }

    pub fn parse(&mut self, data: &[u8]) -> Result<()> {
        let mut reader = BufferReader::new(data);

        let tag = reader.read_u8()?;
        if tag != ES_DESCR_TAG {
            return Err(Error::parser(format!("unexpected ES descriptor tag {tag}")));
        }
        read_descriptor_size(&mut reader)?;

        self.esid = reader.read_u16()?;
        let flags = reader.read_u8()?;
        let stream_dependency = flags & 0x80 != 0;
        let url_flag = flags & 0x40 != 0;
        let ocr_stream = flags & 0x20 != 0;
        if url_flag {
            return Err(Error::parser("ES descriptor URL flag is not supported"));
        }
        if stream_dependency {
            reader.skip_bytes(2)?; // dependsOn_ES_ID
        }
        if ocr_stream {
            reader.skip_bytes(2)?; // OCR_ES_Id
        }

        self.parse_decoder_config(&mut reader)
    }

    fn parse_decoder_config(&mut self, reader: &mut BufferReader<'_>) -> Result<()> {
        let tag = reader.read_u8()?;
        if tag != DECODER_CONFIG_DESCR_TAG {
            return Err(Error::parser(format!(
                "unexpected decoder config descriptor tag {tag}"
            )));
        }
        read_descriptor_size(reader)?;

        self.object_type = ObjectType::from_u8(reader.read_u8()?);
        // streamType, bufferSizeDB, maxBitrate, avgBitrate.
        reader.skip_bytes(1 + 3 + 4 + 4)?;

        if !reader.has_bytes(1) {
            self.decoder_specific_info.clear();
            return Ok(());
        }
        self.parse_decoder_specific_info(reader)
    }

    fn parse_decoder_specific_info(&mut self, reader: &mut BufferReader<'_>) -> Result<()> {
        let tag = reader.read_u8()?;
        if tag != DECODER_SPECIFIC_INFO_TAG {
            return Err(Error::parser(format!(
                "unexpected decoder specific info tag {tag}"
            )));
        }
        let size = read_descriptor_size(reader)?;
        self.decoder_specific_info.clear();
        reader.read_to_vec(&mut self.decoder_specific_info, size as usize)
    }

    pub fn write(&self, writer: &mut BufferWriter) {
        debug_assert!(self.decoder_specific_info.len() < MAX_DECODER_SPECIFIC_INFO_SIZE);
        let info_size = self.decoder_specific_info.len() as u8;

        let decoder_config_size = info_size as u32 + HEADER_SIZE + 1 + 1 + 3 + 4 + 4;
        let sl_config_size = 1u32;
        let es_size =
            decoder_config_size + HEADER_SIZE + sl_config_size + HEADER_SIZE + 2 + 1;

        writer.append_u8(ES_DESCR_TAG);
        writer.append_u8(es_size as u8);
        writer.append_u16(self.esid);
        writer.append_u8(0); // no ES flags

        writer.append_u8(DECODER_CONFIG_DESCR_TAG);
        writer.append_u8(decoder_config_size as u8);
        writer.append_u8(self.object_type.as_u8());
        writer.append_u8(AUDIO_STREAM_TYPE);
        writer.append_n_bytes(0, 3); // bufferSizeDB
        writer.append_u32(0); // max_bitrate
        writer.append_u32(0); // avg_bitrate

        writer.append_u8(DECODER_SPECIFIC_INFO_TAG);
        writer.append_u8(info_size);
        writer.append_slice(&self.decoder_specific_info);

        writer.append_u8(SL_CONFIG_TAG);
        writer.append_u8(sl_config_size as u8);
        writer.append_u8(SL_PREDEFINED_MP4);
    }

    pub fn compute_size(&self) -> u32 {
        let info_size = self.decoder_specific_info.len() as u32;
        let decoder_config_size = info_size + HEADER_SIZE + 5 + 8;
        let sl_config_size = 1;
        let es_size =
            decoder_config_size + HEADER_SIZE + sl_config_size + HEADER_SIZE + 2 + 1;
        es_size + HEADER_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_parse_round_trip() {
        let mut descriptor = EsDescriptor::default();
        descriptor.set_esid(1);
        descriptor.set_object_type(ObjectType::Iso14496_3);
        descriptor.set_decoder_specific_info(vec![0x12, 0x10]);

        let mut writer = BufferWriter::new();
        descriptor.write(&mut writer);
        assert_eq!(writer.size() as u32, descriptor.compute_size());

        let mut parsed = EsDescriptor::default();
        parsed.parse(writer.buffer()).unwrap();
        assert_eq!(parsed, descriptor);
        assert!(parsed.is_aac());
    }

    #[test]
    fn multi_byte_descriptor_size() {
        // 0x80 continuation form: size 2 encoded in two bytes.
        let data = [
            ES_DESCR_TAG,
            0x80,
            0x19,              // size 0x19, continuation form
            0x00, 0x01,        // ES_ID
            0x00,              // flags
            DECODER_CONFIG_DESCR_TAG,
            0x13,
            0x40,              // AAC
            0x15, 0x00, 0x00, 0x00, // stream type + buffer size
            0x00, 0x00, 0x00, 0x00, // max bitrate
            0x00, 0x00, 0x00, 0x00, // avg bitrate
            DECODER_SPECIFIC_INFO_TAG,
            0x02,
            0x12, 0x10,
        ];
        let mut parsed = EsDescriptor::default();
        parsed.parse(&data).unwrap();
        assert_eq!(parsed.object_type(), ObjectType::Iso14496_3);
        assert_eq!(parsed.decoder_specific_info(), &[0x12, 0x10]);
    }

    #[test]
    fn rejects_wrong_tag() {
        let mut parsed = EsDescriptor::default();
        assert!(parsed.parse(&[0x07, 0x00]).is_err());
    }
}
