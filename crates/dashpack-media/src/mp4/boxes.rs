//! Declarative struct-per-box data model for the ISO BMFF tree.
//!
//! Every box implements the symmetric [`Mp4Box`] trait: one `read_write`
//! routine drives both parsing and serialization through a [`BoxBuffer`],
//! and `compute_size` returns the exact byte count `read_write` emits.
//! Optional boxes encode absence as a computed size of zero.

use super::aac::AacAudioSpecificConfig;
use super::box_buffer::{BoxBuffer, Mp4Box, BOX_SIZE, FULL_BOX_SIZE};
use super::es_descriptor::EsDescriptor;
use super::fourcc::FourCC;
use crate::buffer::{BufferReader, BufferWriter};
use crate::error::{Error, Result};

/// Handler type of a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrackType {
    #[default]
    Invalid,
    Video,
    Audio,
    Hint,
}

impl TrackType {
    pub fn from_fourcc(fourcc: FourCC) -> Self {
        match fourcc {
            FourCC::VIDE => Self::Video,
            FourCC::SOUN => Self::Audio,
            FourCC::HINT => Self::Hint,
            _ => Self::Invalid,
        }
    }

    pub fn as_fourcc(&self) -> FourCC {
        match self {
            Self::Video => FourCC::VIDE,
            Self::Audio => FourCC::SOUN,
            Self::Hint => FourCC::HINT,
            Self::Invalid => FourCC::NULL,
        }
    }
}

// Width in bytes of a version-selected time field.
fn time_width(version: u8) -> usize {
    if version == 1 {
        8
    } else {
        4
    }
}

fn version_for_times(values: &[u64]) -> u8 {
    if values.iter().any(|v| *v > u64::from(u32::MAX)) {
        1
    } else {
        0
    }
}

// The 3x3 fixed-point transformation matrix; always written as identity.
fn rw_matrix(buffer: &mut BoxBuffer<'_, '_>) -> Result<()> {
    const IDENTITY: [u32; 9] = [
        0x00010000, 0, 0, 0, 0x00010000, 0, 0, 0, 0x40000000,
    ];
    if buffer.reading() {
        return buffer.ignore_bytes(36);
    }
    for value in IDENTITY {
        let mut value = value;
        buffer.rw_u32(&mut value)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// ftyp / styp
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Default)]
pub struct FileType {
    pub major_brand: FourCC,
    pub minor_version: u32,
    pub compatible_brands: Vec<FourCC>,
}

fn rw_brand_box(body: &mut FileType, buffer: &mut BoxBuffer<'_, '_>) -> Result<()> {
    buffer.rw_fourcc(&mut body.major_brand)?;
    buffer.rw_u32(&mut body.minor_version)?;
    if buffer.reading() {
        body.compatible_brands.clear();
        while buffer.bytes_left() >= 4 {
            let mut brand = FourCC::NULL;
            buffer.rw_fourcc(&mut brand)?;
            body.compatible_brands.push(brand);
        }
    } else {
        for brand in body.compatible_brands.iter_mut() {
            buffer.rw_fourcc(brand)?;
        }
    }
    Ok(())
}

fn brand_box_size(body: &FileType) -> u32 {
    BOX_SIZE + 4 + 4 + 4 * body.compatible_brands.len() as u32
}

impl Mp4Box for FileType {
    fn box_type(&self) -> FourCC {
        FourCC::FTYP
    }

    fn read_write(&mut self, buffer: &mut BoxBuffer<'_, '_>) -> Result<()> {
        buffer.rw_header(FourCC::FTYP, self.compute_size())?;
        rw_brand_box(self, buffer)
    }

    fn compute_size(&self) -> u32 {
        brand_box_size(self)
    }
}

/// `styp`: identical layout to `ftyp`, emitted at the head of media
/// segments.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SegmentType(pub FileType);

impl Mp4Box for SegmentType {
    fn box_type(&self) -> FourCC {
        FourCC::STYP
    }

    fn read_write(&mut self, buffer: &mut BoxBuffer<'_, '_>) -> Result<()> {
        buffer.rw_header(FourCC::STYP, self.compute_size())?;
        rw_brand_box(&mut self.0, buffer)
    }

    fn compute_size(&self) -> u32 {
        brand_box_size(&self.0)
    }
}

// ---------------------------------------------------------------------------
// pssh
// ---------------------------------------------------------------------------

/// `pssh`. Parsed boxes keep the raw bytes so DRM init data round-trips
/// untouched; raw bytes also take precedence when writing.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProtectionSystemSpecificHeader {
    pub version: u8,
    pub flags: u32,
    pub system_id: Vec<u8>,
    pub data: Vec<u8>,
    pub raw_box: Vec<u8>,
}

impl Mp4Box for ProtectionSystemSpecificHeader {
    fn box_type(&self) -> FourCC {
        FourCC::PSSH
    }

    fn read_write(&mut self, buffer: &mut BoxBuffer<'_, '_>) -> Result<()> {
        if !buffer.reading() && !self.raw_box.is_empty() {
            return buffer.write_raw(&self.raw_box);
        }
        if buffer.reading() {
            self.raw_box = buffer
                .reader_entire_box()
                .map(|b| b.to_vec())
                .unwrap_or_default();
        }
        buffer.rw_full_header(
            FourCC::PSSH,
            self.compute_size(),
            &mut self.version,
            &mut self.flags,
        )?;
        buffer.rw_vector(&mut self.system_id, 16)?;
        let mut data_size = self.data.len() as u32;
        buffer.rw_u32(&mut data_size)?;
        buffer.rw_vector(&mut self.data, data_size as usize)?;
        Ok(())
    }

    fn compute_size(&self) -> u32 {
        if !self.raw_box.is_empty() {
            return self.raw_box.len() as u32;
        }
        FULL_BOX_SIZE + 16 + 4 + self.data.len() as u32
    }
}

// ---------------------------------------------------------------------------
// saio / saiz
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SampleAuxiliaryInformationOffset {
    pub version: u8,
    pub flags: u32,
    pub offsets: Vec<u64>,
}

impl SampleAuxiliaryInformationOffset {
    fn offset_width(&self) -> usize {
        if self.offsets.iter().any(|o| *o > u64::from(u32::MAX)) {
            8
        } else {
            4
        }
    }
}

impl Mp4Box for SampleAuxiliaryInformationOffset {
    fn box_type(&self) -> FourCC {
        FourCC::SAIO
    }

    fn read_write(&mut self, buffer: &mut BoxBuffer<'_, '_>) -> Result<()> {
        if !buffer.reading() {
            self.version = if self.offset_width() == 8 { 1 } else { 0 };
        }
        buffer.rw_full_header(
            FourCC::SAIO,
            self.compute_size(),
            &mut self.version,
            &mut self.flags,
        )?;
        if self.flags & 1 != 0 {
            // aux_info_type + aux_info_type_parameter
            buffer.ignore_bytes(8)?;
        }
        let mut count = self.offsets.len() as u32;
        buffer.rw_u32(&mut count)?;
        if buffer.reading() {
            self.offsets = vec![0; count as usize];
        }
        let width = time_width(self.version);
        for offset in self.offsets.iter_mut() {
            buffer.rw_u64_n_bytes(offset, width)?;
        }
        Ok(())
    }

    fn compute_size(&self) -> u32 {
        if self.offsets.is_empty() {
            return 0;
        }
        let aux_type = if self.flags & 1 != 0 { 8 } else { 0 };
        FULL_BOX_SIZE + aux_type + 4 + (self.offsets.len() * self.offset_width()) as u32
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SampleAuxiliaryInformationSize {
    pub version: u8,
    pub flags: u32,
    pub default_sample_info_size: u8,
    pub sample_count: u32,
    pub sample_info_sizes: Vec<u8>,
}

impl Mp4Box for SampleAuxiliaryInformationSize {
    fn box_type(&self) -> FourCC {
        FourCC::SAIZ
    }

    fn read_write(&mut self, buffer: &mut BoxBuffer<'_, '_>) -> Result<()> {
        buffer.rw_full_header(
            FourCC::SAIZ,
            self.compute_size(),
            &mut self.version,
            &mut self.flags,
        )?;
        if self.flags & 1 != 0 {
            buffer.ignore_bytes(8)?;
        }
        buffer.rw_u8(&mut self.default_sample_info_size)?;
        buffer.rw_u32(&mut self.sample_count)?;
        if self.default_sample_info_size == 0 {
            buffer.rw_vector(&mut self.sample_info_sizes, self.sample_count as usize)?;
        }
        Ok(())
    }

    fn compute_size(&self) -> u32 {
        if self.sample_count == 0 {
            return 0;
        }
        let aux_type = if self.flags & 1 != 0 { 8 } else { 0 };
        let table = if self.default_sample_info_size == 0 {
            self.sample_count
        } else {
            0
        };
        FULL_BOX_SIZE + aux_type + 1 + 4 + table
    }
}

// ---------------------------------------------------------------------------
// sinf and children
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Default)]
pub struct OriginalFormat {
    pub format: FourCC,
}

impl Mp4Box for OriginalFormat {
    fn box_type(&self) -> FourCC {
        FourCC::FRMA
    }

    fn read_write(&mut self, buffer: &mut BoxBuffer<'_, '_>) -> Result<()> {
        buffer.rw_header(FourCC::FRMA, self.compute_size())?;
        buffer.rw_fourcc(&mut self.format)
    }

    fn compute_size(&self) -> u32 {
        if self.format.is_null() {
            return 0;
        }
        BOX_SIZE + 4
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SchemeType {
    pub version: u8,
    pub flags: u32,
    pub scheme_type: FourCC,
    pub scheme_version: u32,
}

impl Mp4Box for SchemeType {
    fn box_type(&self) -> FourCC {
        FourCC::SCHM
    }

    fn read_write(&mut self, buffer: &mut BoxBuffer<'_, '_>) -> Result<()> {
        buffer.rw_full_header(
            FourCC::SCHM,
            self.compute_size(),
            &mut self.version,
            &mut self.flags,
        )?;
        buffer.rw_fourcc(&mut self.scheme_type)?;
        buffer.rw_u32(&mut self.scheme_version)
    }

    fn compute_size(&self) -> u32 {
        FULL_BOX_SIZE + 8
    }
}

/// `tenc`: CENC track encryption parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackEncryption {
    pub version: u8,
    pub flags: u32,
    pub is_encrypted: bool,
    pub default_iv_size: u8,
    pub default_kid: Vec<u8>,
}

impl Default for TrackEncryption {
    fn default() -> Self {
        Self {
            version: 0,
            flags: 0,
            is_encrypted: false,
            default_iv_size: 0,
            default_kid: vec![0; 16],
        }
    }
}

impl Mp4Box for TrackEncryption {
    fn box_type(&self) -> FourCC {
        FourCC::TENC
    }

    fn read_write(&mut self, buffer: &mut BoxBuffer<'_, '_>) -> Result<()> {
        buffer.rw_full_header(
            FourCC::TENC,
            self.compute_size(),
            &mut self.version,
            &mut self.flags,
        )?;
        let mut encrypted = u64::from(self.is_encrypted);
        buffer.rw_u64_n_bytes(&mut encrypted, 3)?;
        self.is_encrypted = encrypted != 0;
        buffer.rw_u8(&mut self.default_iv_size)?;
        buffer.rw_vector(&mut self.default_kid, 16)
    }

    fn compute_size(&self) -> u32 {
        FULL_BOX_SIZE + 3 + 1 + 16
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SchemeInfo {
    pub track_encryption: TrackEncryption,
}

impl Mp4Box for SchemeInfo {
    fn box_type(&self) -> FourCC {
        FourCC::SCHI
    }

    fn read_write(&mut self, buffer: &mut BoxBuffer<'_, '_>) -> Result<()> {
        buffer.rw_header(FourCC::SCHI, self.compute_size())?;
        buffer.prepare_children()?;
        buffer.rw_child(&mut self.track_encryption)
    }

    fn compute_size(&self) -> u32 {
        BOX_SIZE + self.track_encryption.compute_size()
    }
}

/// `sinf`: marks a sample entry as protected and names the original format.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProtectionSchemeInfo {
    pub format: OriginalFormat,
    pub scheme_type: SchemeType,
    pub info: SchemeInfo,
}

impl Mp4Box for ProtectionSchemeInfo {
    fn box_type(&self) -> FourCC {
        FourCC::SINF
    }

    fn read_write(&mut self, buffer: &mut BoxBuffer<'_, '_>) -> Result<()> {
        buffer.rw_header(FourCC::SINF, self.compute_size())?;
        buffer.prepare_children()?;
        buffer.rw_child(&mut self.format)?;
        buffer.rw_child(&mut self.scheme_type)?;
        buffer.rw_child(&mut self.info)
    }

    fn compute_size(&self) -> u32 {
        if self.format.format.is_null() {
            return 0;
        }
        BOX_SIZE
            + self.format.compute_size()
            + self.scheme_type.compute_size()
            + self.info.compute_size()
    }
}

// ---------------------------------------------------------------------------
// mvhd / tkhd
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct MovieHeader {
    pub version: u8,
    pub flags: u32,
    pub creation_time: u64,
    pub modification_time: u64,
    pub timescale: u32,
    pub duration: u64,
    pub rate: i32,
    pub volume: i16,
    pub next_track_id: u32,
}

impl Default for MovieHeader {
    fn default() -> Self {
        Self {
            version: 0,
            flags: 0,
            creation_time: 0,
            modification_time: 0,
            timescale: 0,
            duration: 0,
            rate: 0x00010000,
            volume: 0x0100,
            next_track_id: 1,
        }
    }
}

impl Mp4Box for MovieHeader {
    fn box_type(&self) -> FourCC {
        FourCC::MVHD
    }

    fn read_write(&mut self, buffer: &mut BoxBuffer<'_, '_>) -> Result<()> {
        if !buffer.reading() {
            self.version =
                version_for_times(&[self.creation_time, self.modification_time, self.duration]);
        }
        buffer.rw_full_header(
            FourCC::MVHD,
            self.compute_size(),
            &mut self.version,
            &mut self.flags,
        )?;
        let width = time_width(self.version);
        buffer.rw_u64_n_bytes(&mut self.creation_time, width)?;
        buffer.rw_u64_n_bytes(&mut self.modification_time, width)?;
        buffer.rw_u32(&mut self.timescale)?;
        buffer.rw_u64_n_bytes(&mut self.duration, width)?;
        buffer.rw_i32(&mut self.rate)?;
        buffer.rw_i16(&mut self.volume)?;
        buffer.ignore_bytes(10)?; // reserved
        rw_matrix(buffer)?;
        buffer.ignore_bytes(24)?; // pre_defined
        buffer.rw_u32(&mut self.next_track_id)
    }

    fn compute_size(&self) -> u32 {
        let version =
            version_for_times(&[self.creation_time, self.modification_time, self.duration]);
        FULL_BOX_SIZE + 3 * time_width(version) as u32 + 4 + 4 + 2 + 10 + 36 + 24 + 4
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrackHeader {
    pub version: u8,
    pub flags: u32,
    pub creation_time: u64,
    pub modification_time: u64,
    pub track_id: u32,
    pub duration: u64,
    pub layer: i16,
    pub alternate_group: i16,
    pub volume: i16,
    /// 16.16 fixed-point display width.
    pub width: u32,
    /// 16.16 fixed-point display height.
    pub height: u32,
}

impl TrackHeader {
    pub const TRACK_ENABLED: u32 = 0x000001;
    pub const TRACK_IN_MOVIE: u32 = 0x000002;
    pub const TRACK_IN_PREVIEW: u32 = 0x000004;
}

impl Default for TrackHeader {
    fn default() -> Self {
        Self {
            version: 0,
            flags: Self::TRACK_ENABLED | Self::TRACK_IN_MOVIE | Self::TRACK_IN_PREVIEW,
            creation_time: 0,
            modification_time: 0,
            track_id: 0,
            duration: 0,
            layer: 0,
            alternate_group: 0,
            volume: 0,
            width: 0,
            height: 0,
        }
    }
}

impl Mp4Box for TrackHeader {
    fn box_type(&self) -> FourCC {
        FourCC::TKHD
    }

    fn read_write(&mut self, buffer: &mut BoxBuffer<'_, '_>) -> Result<()> {
        if !buffer.reading() {
            self.version =
                version_for_times(&[self.creation_time, self.modification_time, self.duration]);
        }
        buffer.rw_full_header(
            FourCC::TKHD,
            self.compute_size(),
            &mut self.version,
            &mut self.flags,
        )?;
        let width = time_width(self.version);
        buffer.rw_u64_n_bytes(&mut self.creation_time, width)?;
        buffer.rw_u64_n_bytes(&mut self.modification_time, width)?;
        buffer.rw_u32(&mut self.track_id)?;
        buffer.ignore_bytes(4)?; // reserved
        buffer.rw_u64_n_bytes(&mut self.duration, width)?;
        buffer.ignore_bytes(8)?; // reserved
        buffer.rw_i16(&mut self.layer)?;
        buffer.rw_i16(&mut self.alternate_group)?;
        buffer.rw_i16(&mut self.volume)?;
        buffer.ignore_bytes(2)?; // reserved
        rw_matrix(buffer)?;
        buffer.rw_u32(&mut self.width)?;
        buffer.rw_u32(&mut self.height)
    }

    fn compute_size(&self) -> u32 {
        let version =
            version_for_times(&[self.creation_time, self.modification_time, self.duration]);
        FULL_BOX_SIZE + 3 * time_width(version) as u32 + 4 + 4 + 8 + 6 + 2 + 36 + 8
    }
}

// ---------------------------------------------------------------------------
// edts / elst
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EditListEntry {
    pub segment_duration: u64,
    pub media_time: i64,
    pub media_rate_integer: i16,
    pub media_rate_fraction: i16,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct EditList {
    pub version: u8,
    pub flags: u32,
    pub edits: Vec<EditListEntry>,
}

impl EditList {
    fn needs_version_1(&self) -> bool {
        self.edits.iter().any(|e| {
            e.segment_duration > u64::from(u32::MAX)
                || e.media_time > i64::from(i32::MAX)
                || e.media_time < i64::from(i32::MIN)
        })
    }
}

impl Mp4Box for EditList {
    fn box_type(&self) -> FourCC {
        FourCC::ELST
    }

    fn read_write(&mut self, buffer: &mut BoxBuffer<'_, '_>) -> Result<()> {
        if !buffer.reading() {
            self.version = if self.needs_version_1() { 1 } else { 0 };
        }
        buffer.rw_full_header(
            FourCC::ELST,
            self.compute_size(),
            &mut self.version,
            &mut self.flags,
        )?;
        let mut count = self.edits.len() as u32;
        buffer.rw_u32(&mut count)?;
        if buffer.reading() {
            self.edits = vec![EditListEntry::default(); count as usize];
        }
        let width = time_width(self.version);
        for edit in self.edits.iter_mut() {
            buffer.rw_u64_n_bytes(&mut edit.segment_duration, width)?;
            buffer.rw_i64_n_bytes(&mut edit.media_time, width)?;
            buffer.rw_i16(&mut edit.media_rate_integer)?;
            buffer.rw_i16(&mut edit.media_rate_fraction)?;
        }
        Ok(())
    }

    fn compute_size(&self) -> u32 {
        if self.edits.is_empty() {
            return 0;
        }
        let width = if self.needs_version_1() { 8 } else { 4 };
        FULL_BOX_SIZE + 4 + (self.edits.len() * (2 * width + 4)) as u32
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Edit {
    pub list: EditList,
}

impl Mp4Box for Edit {
    fn box_type(&self) -> FourCC {
        FourCC::EDTS
    }

    fn read_write(&mut self, buffer: &mut BoxBuffer<'_, '_>) -> Result<()> {
        buffer.rw_header(FourCC::EDTS, self.compute_size())?;
        buffer.prepare_children()?;
        buffer.try_rw_child(&mut self.list)
    }

    fn compute_size(&self) -> u32 {
        let list_size = self.list.compute_size();
        if list_size == 0 {
            return 0;
        }
        BOX_SIZE + list_size
    }
}

// ---------------------------------------------------------------------------
// hdlr
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Default)]
pub struct HandlerReference {
    pub version: u8,
    pub flags: u32,
    pub handler_type: TrackType,
}

impl HandlerReference {
    fn handler_name(&self) -> &'static [u8] {
        match self.handler_type {
            TrackType::Video => b"VideoHandler\0",
            TrackType::Audio => b"SoundHandler\0",
            _ => b"\0",
        }
    }
}

impl Mp4Box for HandlerReference {
    fn box_type(&self) -> FourCC {
        FourCC::HDLR
    }

    fn read_write(&mut self, buffer: &mut BoxBuffer<'_, '_>) -> Result<()> {
        buffer.rw_full_header(
            FourCC::HDLR,
            self.compute_size(),
            &mut self.version,
            &mut self.flags,
        )?;
        buffer.ignore_bytes(4)?; // pre_defined
        let mut handler = self.handler_type.as_fourcc();
        buffer.rw_fourcc(&mut handler)?;
        if buffer.reading() {
            self.handler_type = TrackType::from_fourcc(handler);
        }
        buffer.ignore_bytes(12)?; // reserved
        if buffer.reading() {
            let name_len = buffer.bytes_left();
            buffer.ignore_bytes(name_len)?;
            Ok(())
        } else {
            buffer.write_raw(self.handler_name())
        }
    }

    fn compute_size(&self) -> u32 {
        FULL_BOX_SIZE + 4 + 4 + 12 + self.handler_name().len() as u32
    }
}

// ---------------------------------------------------------------------------
// avcC / pasp
// ---------------------------------------------------------------------------

/// `avcC`: the raw AVCDecoderConfigurationRecord, with the fields this
/// pipeline needs parsed out (ISO 14496-15 5.2.4.1).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AvcDecoderConfigurationRecord {
    pub data: Vec<u8>,
    pub configuration_version: u8,
    pub profile_indication: u8,
    pub profile_compatibility: u8,
    pub avc_level: u8,
    pub length_size: u8,
    pub sps_list: Vec<Vec<u8>>,
    pub pps_list: Vec<Vec<u8>>,
}

impl AvcDecoderConfigurationRecord {
    fn parse_data(&mut self) -> Result<()> {
        let data = std::mem::take(&mut self.data);
        {
            let mut reader = BufferReader::new(&data);
            self.configuration_version = reader.read_u8()?;
            self.profile_indication = reader.read_u8()?;
            self.profile_compatibility = reader.read_u8()?;
            self.avc_level = reader.read_u8()?;
            self.length_size = (reader.read_u8()? & 0x3) + 1;

            let num_sps = reader.read_u8()? & 0x1F;
            self.sps_list.clear();
            for _ in 0..num_sps {
                let length = reader.read_u16()? as usize;
                let mut sps = Vec::new();
                reader.read_to_vec(&mut sps, length)?;
                self.sps_list.push(sps);
            }

            let num_pps = reader.read_u8()?;
            self.pps_list.clear();
            for _ in 0..num_pps {
                let length = reader.read_u16()? as usize;
                let mut pps = Vec::new();
                reader.read_to_vec(&mut pps, length)?;
                self.pps_list.push(pps);
            }
        }
        self.data = data;
        Ok(())
    }

    /// Set the raw record bytes and parse the known fields out of them.
    pub fn set_data(&mut self, data: Vec<u8>) -> Result<()> {
        self.data = data;
        self.parse_data()
    }
}

impl Mp4Box for AvcDecoderConfigurationRecord {
    fn box_type(&self) -> FourCC {
        FourCC::AVCC
    }

    fn read_write(&mut self, buffer: &mut BoxBuffer<'_, '_>) -> Result<()> {
        buffer.rw_header(FourCC::AVCC, self.compute_size())?;
        let count = if buffer.reading() {
            buffer.bytes_left()
        } else {
            self.data.len()
        };
        buffer.rw_vector(&mut self.data, count)?;
        if buffer.reading() {
            self.parse_data()?;
        }
        Ok(())
    }

    fn compute_size(&self) -> u32 {
        if self.data.is_empty() {
            return 0;
        }
        BOX_SIZE + self.data.len() as u32
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PixelAspectRatio {
    pub h_spacing: u32,
    pub v_spacing: u32,
}

impl Mp4Box for PixelAspectRatio {
    fn box_type(&self) -> FourCC {
        FourCC::PASP
    }

    fn read_write(&mut self, buffer: &mut BoxBuffer<'_, '_>) -> Result<()> {
        buffer.rw_header(FourCC::PASP, self.compute_size())?;
        buffer.rw_u32(&mut self.h_spacing)?;
        buffer.rw_u32(&mut self.v_spacing)
    }

    fn compute_size(&self) -> u32 {
        if self.h_spacing == 0 && self.v_spacing == 0 {
            return 0;
        }
        BOX_SIZE + 8
    }
}

// ---------------------------------------------------------------------------
// Sample entries
// ---------------------------------------------------------------------------

/// Visual sample entry (`avc1`, or `encv` for protected tracks).
#[derive(Debug, Clone, PartialEq)]
pub struct VideoSampleEntry {
    /// The entry FourCC; doubles as the box type.
    pub format: FourCC,
    pub data_reference_index: u16,
    pub width: u16,
    pub height: u16,
    pub pixel_aspect: PixelAspectRatio,
    pub sinf: ProtectionSchemeInfo,
    pub avcc: AvcDecoderConfigurationRecord,
}

impl Default for VideoSampleEntry {
    fn default() -> Self {
        Self {
            format: FourCC::NULL,
            data_reference_index: 1,
            width: 0,
            height: 0,
            pixel_aspect: PixelAspectRatio::default(),
            sinf: ProtectionSchemeInfo::default(),
            avcc: AvcDecoderConfigurationRecord::default(),
        }
    }
}

impl Mp4Box for VideoSampleEntry {
    fn box_type(&self) -> FourCC {
        self.format
    }

    fn read_write(&mut self, buffer: &mut BoxBuffer<'_, '_>) -> Result<()> {
        if let Some(fourcc) = buffer.reader_box_type() {
            self.format = fourcc;
        }
        buffer.rw_header(self.format, self.compute_size())?;
        buffer.ignore_bytes(6)?; // reserved
        buffer.rw_u16(&mut self.data_reference_index)?;
        buffer.ignore_bytes(16)?; // pre_defined + reserved
        buffer.rw_u16(&mut self.width)?;
        buffer.rw_u16(&mut self.height)?;
        let mut resolution = 0x00480000u32; // 72 dpi, 16.16
        buffer.rw_u32(&mut resolution)?;
        let mut resolution = 0x00480000u32;
        buffer.rw_u32(&mut resolution)?;
        buffer.ignore_bytes(4)?; // reserved
        let mut frame_count = 1u16;
        buffer.rw_u16(&mut frame_count)?;
        buffer.ignore_bytes(32)?; // compressor name
        let mut depth = 0x0018u16;
        buffer.rw_u16(&mut depth)?;
        let mut pre_defined = -1i16;
        buffer.rw_i16(&mut pre_defined)?;

        buffer.prepare_children()?;
        buffer.try_rw_child(&mut self.sinf)?;
        if buffer.reading() {
            buffer.rw_child(&mut self.avcc)?;
        } else {
            buffer.try_rw_child(&mut self.avcc)?;
        }
        buffer.try_rw_child(&mut self.pixel_aspect)
    }

    fn compute_size(&self) -> u32 {
        BOX_SIZE
            + 78
            + self.sinf.compute_size()
            + self.avcc.compute_size()
            + self.pixel_aspect.compute_size()
    }
}

/// `esds` wrapper holding the elementary stream descriptor and, for AAC, the
/// parsed AudioSpecificConfig.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ElementaryStreamDescriptor {
    pub version: u8,
    pub flags: u32,
    pub es_descriptor: EsDescriptor,
    pub aac_audio_specific_config: AacAudioSpecificConfig,
}

impl Mp4Box for ElementaryStreamDescriptor {
    fn box_type(&self) -> FourCC {
        FourCC::ESDS
    }

    fn read_write(&mut self, buffer: &mut BoxBuffer<'_, '_>) -> Result<()> {
        buffer.rw_full_header(
            FourCC::ESDS,
            self.compute_size(),
            &mut self.version,
            &mut self.flags,
        )?;
        if buffer.reading() {
            let mut payload = Vec::new();
            let count = buffer.bytes_left();
            buffer.rw_vector(&mut payload, count)?;
            self.es_descriptor.parse(&payload)?;
            if self.es_descriptor.is_aac() {
                self.aac_audio_specific_config
                    .parse(self.es_descriptor.decoder_specific_info())?;
            }
            Ok(())
        } else {
            let mut payload = BufferWriter::with_capacity(64);
            self.es_descriptor.write(&mut payload);
            buffer.write_raw(payload.buffer())
        }
    }

    fn compute_size(&self) -> u32 {
        if self.es_descriptor.is_empty() {
            return 0;
        }
        FULL_BOX_SIZE + self.es_descriptor.compute_size()
    }
}

/// Audio sample entry (`mp4a`/`ec-3`, or `enca` for protected tracks).
#[derive(Debug, Clone, PartialEq)]
pub struct AudioSampleEntry {
    pub format: FourCC,
    pub data_reference_index: u16,
    pub channel_count: u16,
    pub sample_size: u16,
    /// Sampling rate in Hz (stored as 16.16 fixed point on the wire).
    pub sample_rate: u32,
    pub sinf: ProtectionSchemeInfo,
    pub esds: ElementaryStreamDescriptor,
}

impl Default for AudioSampleEntry {
    fn default() -> Self {
        Self {
            format: FourCC::NULL,
            data_reference_index: 1,
            channel_count: 2,
            sample_size: 16,
            sample_rate: 0,
            sinf: ProtectionSchemeInfo::default(),
            esds: ElementaryStreamDescriptor::default(),
        }
    }
}

impl Mp4Box for AudioSampleEntry {
    fn box_type(&self) -> FourCC {
        self.format
    }

    fn read_write(&mut self, buffer: &mut BoxBuffer<'_, '_>) -> Result<()> {
        if let Some(fourcc) = buffer.reader_box_type() {
            self.format = fourcc;
        }
        buffer.rw_header(self.format, self.compute_size())?;
        buffer.ignore_bytes(6)?; // reserved
        buffer.rw_u16(&mut self.data_reference_index)?;
        buffer.ignore_bytes(8)?; // reserved
        buffer.rw_u16(&mut self.channel_count)?;
        buffer.rw_u16(&mut self.sample_size)?;
        buffer.ignore_bytes(4)?; // pre_defined + reserved
        let mut fixed_rate = self.sample_rate << 16;
        buffer.rw_u32(&mut fixed_rate)?;
        if buffer.reading() {
            self.sample_rate = fixed_rate >> 16;
        }

        buffer.prepare_children()?;
        buffer.try_rw_child(&mut self.sinf)?;
        buffer.try_rw_child(&mut self.esds)
    }

    fn compute_size(&self) -> u32 {
        BOX_SIZE + 28 + self.sinf.compute_size() + self.esds.compute_size()
    }
}

/// `stsd`. The handler type decides which entry list is used; it is
/// propagated from `hdlr` before this box is transferred.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SampleDescription {
    pub version: u8,
    pub flags: u32,
    pub stream_type: TrackType,
    pub video_entries: Vec<VideoSampleEntry>,
    pub audio_entries: Vec<AudioSampleEntry>,
}

impl Mp4Box for SampleDescription {
    fn box_type(&self) -> FourCC {
        FourCC::STSD
    }

    fn read_write(&mut self, buffer: &mut BoxBuffer<'_, '_>) -> Result<()> {
        buffer.rw_full_header(
            FourCC::STSD,
            self.compute_size(),
            &mut self.version,
            &mut self.flags,
        )?;
        let mut count = match self.stream_type {
            TrackType::Video => self.video_entries.len() as u32,
            TrackType::Audio => self.audio_entries.len() as u32,
            _ => 0,
        };
        buffer.rw_u32(&mut count)?;
        buffer.prepare_children()?;
        match self.stream_type {
            TrackType::Video => buffer.rw_all_children(&mut self.video_entries),
            TrackType::Audio => buffer.rw_all_children(&mut self.audio_entries),
            _ => Ok(()),
        }
    }

    fn compute_size(&self) -> u32 {
        let entries: u32 = self
            .video_entries
            .iter()
            .map(|e| e.compute_size())
            .chain(self.audio_entries.iter().map(|e| e.compute_size()))
            .sum();
        FULL_BOX_SIZE + 4 + entries
    }
}

// ---------------------------------------------------------------------------
// Sample table leaves
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DecodingTime {
    pub sample_count: u32,
    pub sample_delta: u32,
}

/// `stts`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DecodingTimeToSample {
    pub version: u8,
    pub flags: u32,
    pub decoding_time: Vec<DecodingTime>,
}

impl Mp4Box for DecodingTimeToSample {
    fn box_type(&self) -> FourCC {
        FourCC::STTS
    }

    fn read_write(&mut self, buffer: &mut BoxBuffer<'_, '_>) -> Result<()> {
        buffer.rw_full_header(
            FourCC::STTS,
            self.compute_size(),
            &mut self.version,
            &mut self.flags,
        )?;
        let mut count = self.decoding_time.len() as u32;
        buffer.rw_u32(&mut count)?;
        if buffer.reading() {
            self.decoding_time = vec![DecodingTime::default(); count as usize];
        }
        for entry in self.decoding_time.iter_mut() {
            buffer.rw_u32(&mut entry.sample_count)?;
            buffer.rw_u32(&mut entry.sample_delta)?;
        }
        Ok(())
    }

    fn compute_size(&self) -> u32 {
        FULL_BOX_SIZE + 4 + 8 * self.decoding_time.len() as u32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CompositionOffset {
    pub sample_count: u32,
    pub sample_offset: i32,
}

/// `ctts`. Written as version 1 so offsets stay signed.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CompositionTimeToSample {
    pub version: u8,
    pub flags: u32,
    pub composition_offset: Vec<CompositionOffset>,
}

impl Mp4Box for CompositionTimeToSample {
    fn box_type(&self) -> FourCC {
        FourCC::CTTS
    }

    fn read_write(&mut self, buffer: &mut BoxBuffer<'_, '_>) -> Result<()> {
        if !buffer.reading() {
            self.version = 1;
        }
        buffer.rw_full_header(
            FourCC::CTTS,
            self.compute_size(),
            &mut self.version,
            &mut self.flags,
        )?;
        let mut count = self.composition_offset.len() as u32;
        buffer.rw_u32(&mut count)?;
        if buffer.reading() {
            self.composition_offset = vec![CompositionOffset::default(); count as usize];
        }
        for entry in self.composition_offset.iter_mut() {
            buffer.rw_u32(&mut entry.sample_count)?;
            if self.version == 0 {
                let mut unsigned = entry.sample_offset as u32;
                buffer.rw_u32(&mut unsigned)?;
                entry.sample_offset = unsigned as i32;
            } else {
                buffer.rw_i32(&mut entry.sample_offset)?;
            }
        }
        Ok(())
    }

    fn compute_size(&self) -> u32 {
        if self.composition_offset.is_empty() {
            return 0;
        }
        FULL_BOX_SIZE + 4 + 8 * self.composition_offset.len() as u32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ChunkInfo {
    pub first_chunk: u32,
    pub samples_per_chunk: u32,
    pub sample_description_index: u32,
}

/// `stsc`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SampleToChunk {
    pub version: u8,
    pub flags: u32,
    pub chunk_info: Vec<ChunkInfo>,
}

impl Mp4Box for SampleToChunk {
    fn box_type(&self) -> FourCC {
        FourCC::STSC
    }

    fn read_write(&mut self, buffer: &mut BoxBuffer<'_, '_>) -> Result<()> {
        buffer.rw_full_header(
            FourCC::STSC,
            self.compute_size(),
            &mut self.version,
            &mut self.flags,
        )?;
        let mut count = self.chunk_info.len() as u32;
        buffer.rw_u32(&mut count)?;
        if buffer.reading() {
            self.chunk_info = vec![ChunkInfo::default(); count as usize];
        }
        for entry in self.chunk_info.iter_mut() {
            buffer.rw_u32(&mut entry.first_chunk)?;
            buffer.rw_u32(&mut entry.samples_per_chunk)?;
            buffer.rw_u32(&mut entry.sample_description_index)?;
        }
        Ok(())
    }

    fn compute_size(&self) -> u32 {
        FULL_BOX_SIZE + 4 + 12 * self.chunk_info.len() as u32
    }
}

/// `stsz`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SampleSize {
    pub version: u8,
    pub flags: u32,
    pub sample_size: u32,
    pub sample_count: u32,
    pub sizes: Vec<u32>,
}

impl Mp4Box for SampleSize {
    fn box_type(&self) -> FourCC {
        FourCC::STSZ
    }

    fn read_write(&mut self, buffer: &mut BoxBuffer<'_, '_>) -> Result<()> {
        buffer.rw_full_header(
            FourCC::STSZ,
            self.compute_size(),
            &mut self.version,
            &mut self.flags,
        )?;
        buffer.rw_u32(&mut self.sample_size)?;
        buffer.rw_u32(&mut self.sample_count)?;
        if self.sample_size == 0 {
            if buffer.reading() {
                self.sizes = vec![0; self.sample_count as usize];
            }
            for size in self.sizes.iter_mut() {
                buffer.rw_u32(size)?;
            }
        }
        Ok(())
    }

    fn compute_size(&self) -> u32 {
        let table = if self.sample_size == 0 {
            4 * self.sample_count
        } else {
            0
        };
        FULL_BOX_SIZE + 4 + 4 + table
    }
}

/// `stz2`: compact sample sizes with 4-, 8- or 16-bit fields.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CompactSampleSize {
    pub version: u8,
    pub flags: u32,
    pub field_size: u8,
    pub sizes: Vec<u32>,
}

impl Mp4Box for CompactSampleSize {
    fn box_type(&self) -> FourCC {
        FourCC::STZ2
    }

    fn read_write(&mut self, buffer: &mut BoxBuffer<'_, '_>) -> Result<()> {
        buffer.rw_full_header(
            FourCC::STZ2,
            self.compute_size(),
            &mut self.version,
            &mut self.flags,
        )?;
        buffer.ignore_bytes(3)?; // reserved
        buffer.rw_u8(&mut self.field_size)?;
        let mut count = self.sizes.len() as u32;
        buffer.rw_u32(&mut count)?;
        let count = count as usize;

        let mut table = if buffer.reading() {
            Vec::new()
        } else {
            let mut packed = Vec::new();
            match self.field_size {
                4 => {
                    for pair in self.sizes.chunks(2) {
                        let hi = (pair[0] as u8) << 4;
                        let lo = if pair.len() == 2 { pair[1] as u8 } else { 0 };
                        packed.push(hi | (lo & 0x0F));
                    }
                }
                8 => packed.extend(self.sizes.iter().map(|s| *s as u8)),
                16 => {
                    for size in &self.sizes {
                        packed.extend_from_slice(&(*size as u16).to_be_bytes());
                    }
                }
                other => {
                    return Err(Error::parser(format!("invalid stz2 field size {other}")));
                }
            }
            packed
        };
        let table_len = match self.field_size {
            4 => (count + 1) / 2,
            8 => count,
            16 => count * 2,
            other => {
                return Err(Error::parser(format!("invalid stz2 field size {other}")));
            }
        };
        buffer.rw_vector(&mut table, table_len)?;

        if buffer.reading() {
            self.sizes = Vec::with_capacity(count);
            match self.field_size {
                4 => {
                    for i in 0..count {
                        let byte = table[i / 2];
                        let nibble = if i % 2 == 0 { byte >> 4 } else { byte & 0x0F };
                        self.sizes.push(u32::from(nibble));
                    }
                }
                8 => self.sizes.extend(table.iter().map(|b| u32::from(*b))),
                16 => {
                    for pair in table.chunks(2) {
                        self.sizes
                            .push(u32::from(u16::from_be_bytes([pair[0], pair[1]])));
                    }
                }
                _ => unreachable!(),
            }
        }
        Ok(())
    }

    fn compute_size(&self) -> u32 {
        let table = match self.field_size {
            4 => (self.sizes.len() + 1) / 2,
            16 => self.sizes.len() * 2,
            _ => self.sizes.len(),
        };
        FULL_BOX_SIZE + 4 + 4 + table as u32
    }
}

/// `co64`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChunkLargeOffset {
    pub version: u8,
    pub flags: u32,
    pub offsets: Vec<u64>,
}

impl Mp4Box for ChunkLargeOffset {
    fn box_type(&self) -> FourCC {
        FourCC::CO64
    }

    fn read_write(&mut self, buffer: &mut BoxBuffer<'_, '_>) -> Result<()> {
        buffer.rw_full_header(
            FourCC::CO64,
            self.compute_size(),
            &mut self.version,
            &mut self.flags,
        )?;
        let mut count = self.offsets.len() as u32;
        buffer.rw_u32(&mut count)?;
        if buffer.reading() {
            self.offsets = vec![0; count as usize];
        }
        for offset in self.offsets.iter_mut() {
            buffer.rw_u64(offset)?;
        }
        Ok(())
    }

    fn compute_size(&self) -> u32 {
        FULL_BOX_SIZE + 4 + 8 * self.offsets.len() as u32
    }
}

/// `stco`: 32-bit chunk offsets. Offsets are held as u64 for uniformity with
/// `co64`; values must fit in 32 bits when written.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChunkOffset {
    pub version: u8,
    pub flags: u32,
    pub offsets: Vec<u64>,
}

impl Mp4Box for ChunkOffset {
    fn box_type(&self) -> FourCC {
        FourCC::STCO
    }

    fn read_write(&mut self, buffer: &mut BoxBuffer<'_, '_>) -> Result<()> {
        buffer.rw_full_header(
            FourCC::STCO,
            self.compute_size(),
            &mut self.version,
            &mut self.flags,
        )?;
        let mut count = self.offsets.len() as u32;
        buffer.rw_u32(&mut count)?;
        if buffer.reading() {
            self.offsets = vec![0; count as usize];
        }
        for offset in self.offsets.iter_mut() {
            buffer.rw_u64_n_bytes(offset, 4)?;
        }
        Ok(())
    }

    fn compute_size(&self) -> u32 {
        FULL_BOX_SIZE + 4 + 4 * self.offsets.len() as u32
    }
}

/// `stss`. Absence means every sample is a sync sample.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SyncSample {
    pub version: u8,
    pub flags: u32,
    pub sample_number: Vec<u32>,
}

impl Mp4Box for SyncSample {
    fn box_type(&self) -> FourCC {
        FourCC::STSS
    }

    fn read_write(&mut self, buffer: &mut BoxBuffer<'_, '_>) -> Result<()> {
        buffer.rw_full_header(
            FourCC::STSS,
            self.compute_size(),
            &mut self.version,
            &mut self.flags,
        )?;
        let mut count = self.sample_number.len() as u32;
        buffer.rw_u32(&mut count)?;
        if buffer.reading() {
            self.sample_number = vec![0; count as usize];
        }
        for sample in self.sample_number.iter_mut() {
            buffer.rw_u32(sample)?;
        }
        Ok(())
    }

    fn compute_size(&self) -> u32 {
        if self.sample_number.is_empty() {
            return 0;
        }
        FULL_BOX_SIZE + 4 + 4 * self.sample_number.len() as u32
    }
}

/// `stbl`. Compact (`stz2`) sizes and large (`co64`) offsets are folded into
/// the canonical `stsz`/`stco` representations on read.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SampleTable {
    pub description: SampleDescription,
    pub decoding_time_to_sample: DecodingTimeToSample,
    pub composition_time_to_sample: CompositionTimeToSample,
    pub sample_to_chunk: SampleToChunk,
    pub sample_size: SampleSize,
    pub chunk_offset: ChunkOffset,
    pub sync_sample: SyncSample,
}

impl Mp4Box for SampleTable {
    fn box_type(&self) -> FourCC {
        FourCC::STBL
    }

    fn read_write(&mut self, buffer: &mut BoxBuffer<'_, '_>) -> Result<()> {
        buffer.rw_header(FourCC::STBL, self.compute_size())?;
        buffer.prepare_children()?;
        buffer.rw_child(&mut self.description)?;
        buffer.rw_child(&mut self.decoding_time_to_sample)?;
        buffer.try_rw_child(&mut self.composition_time_to_sample)?;
        buffer.rw_child(&mut self.sample_to_chunk)?;

        if buffer.reading() && !buffer.reader_has_child(FourCC::STSZ) {
            let mut compact = CompactSampleSize::default();
            buffer.rw_child(&mut compact)?;
            self.sample_size = SampleSize {
                sample_size: 0,
                sample_count: compact.sizes.len() as u32,
                sizes: compact.sizes,
                ..Default::default()
            };
        } else {
            buffer.rw_child(&mut self.sample_size)?;
        }

        if buffer.reading() && !buffer.reader_has_child(FourCC::STCO) {
            let mut large = ChunkLargeOffset::default();
            buffer.rw_child(&mut large)?;
            self.chunk_offset.offsets = large.offsets;
        } else {
            buffer.rw_child(&mut self.chunk_offset)?;
        }

        buffer.try_rw_child(&mut self.sync_sample)
    }

    fn compute_size(&self) -> u32 {
        BOX_SIZE
            + self.description.compute_size()
            + self.decoding_time_to_sample.compute_size()
            + self.composition_time_to_sample.compute_size()
            + self.sample_to_chunk.compute_size()
            + self.sample_size.compute_size()
            + self.chunk_offset.compute_size()
            + self.sync_sample.compute_size()
    }
}

// ---------------------------------------------------------------------------
// mdhd / vmhd / smhd / dinf
// ---------------------------------------------------------------------------

fn pack_language(language: &str) -> u16 {
    let bytes = language.as_bytes();
    if bytes.len() != 3 {
        // Undetermined.
        return 0x55C4;
    }
    let mut code: u16 = 0;
    for byte in bytes {
        code = (code << 5) | u16::from(byte.saturating_sub(0x60)) & 0x1F;
    }
    code
}

fn unpack_language(code: u16) -> String {
    if code == 0 {
        return String::new();
    }
    let chars = [
        (((code >> 10) & 0x1F) as u8) + 0x60,
        (((code >> 5) & 0x1F) as u8) + 0x60,
        ((code & 0x1F) as u8) + 0x60,
    ];
    String::from_utf8_lossy(&chars).into_owned()
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MediaHeader {
    pub version: u8,
    pub flags: u32,
    pub creation_time: u64,
    pub modification_time: u64,
    pub timescale: u32,
    pub duration: u64,
    /// ISO 639-2/T code, empty when undetermined.
    pub language: String,
}

impl Mp4Box for MediaHeader {
    fn box_type(&self) -> FourCC {
        FourCC::MDHD
    }

    fn read_write(&mut self, buffer: &mut BoxBuffer<'_, '_>) -> Result<()> {
        if !buffer.reading() {
            self.version =
                version_for_times(&[self.creation_time, self.modification_time, self.duration]);
        }
        buffer.rw_full_header(
            FourCC::MDHD,
            self.compute_size(),
            &mut self.version,
            &mut self.flags,
        )?;
        let width = time_width(self.version);
        buffer.rw_u64_n_bytes(&mut self.creation_time, width)?;
        buffer.rw_u64_n_bytes(&mut self.modification_time, width)?;
        buffer.rw_u32(&mut self.timescale)?;
        buffer.rw_u64_n_bytes(&mut self.duration, width)?;
        let mut language = pack_language(&self.language);
        buffer.rw_u16(&mut language)?;
        if buffer.reading() {
            self.language = unpack_language(language);
        }
        buffer.ignore_bytes(2) // pre_defined
    }

    fn compute_size(&self) -> u32 {
        let version =
            version_for_times(&[self.creation_time, self.modification_time, self.duration]);
        FULL_BOX_SIZE + 3 * time_width(version) as u32 + 4 + 2 + 2
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VideoMediaHeader {
    pub version: u8,
    pub flags: u32,
    pub graphics_mode: u16,
    pub op_color_red: u16,
    pub op_color_green: u16,
    pub op_color_blue: u16,
}

impl Default for VideoMediaHeader {
    fn default() -> Self {
        Self {
            version: 0,
            flags: 1,
            graphics_mode: 0,
            op_color_red: 0,
            op_color_green: 0,
            op_color_blue: 0,
        }
    }
}

impl Mp4Box for VideoMediaHeader {
    fn box_type(&self) -> FourCC {
        FourCC::VMHD
    }

    fn read_write(&mut self, buffer: &mut BoxBuffer<'_, '_>) -> Result<()> {
        buffer.rw_full_header(
            FourCC::VMHD,
            self.compute_size(),
            &mut self.version,
            &mut self.flags,
        )?;
        buffer.rw_u16(&mut self.graphics_mode)?;
        buffer.rw_u16(&mut self.op_color_red)?;
        buffer.rw_u16(&mut self.op_color_green)?;
        buffer.rw_u16(&mut self.op_color_blue)
    }

    fn compute_size(&self) -> u32 {
        FULL_BOX_SIZE + 8
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SoundMediaHeader {
    pub version: u8,
    pub flags: u32,
    pub balance: u16,
}

impl Mp4Box for SoundMediaHeader {
    fn box_type(&self) -> FourCC {
        FourCC::SMHD
    }

    fn read_write(&mut self, buffer: &mut BoxBuffer<'_, '_>) -> Result<()> {
        buffer.rw_full_header(
            FourCC::SMHD,
            self.compute_size(),
            &mut self.version,
            &mut self.flags,
        )?;
        buffer.rw_u16(&mut self.balance)?;
        buffer.ignore_bytes(2) // reserved
    }

    fn compute_size(&self) -> u32 {
        FULL_BOX_SIZE + 4
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataEntryUrl {
    pub version: u8,
    pub flags: u32,
    pub location: Vec<u8>,
}

impl Default for DataEntryUrl {
    fn default() -> Self {
        // Flag 1: media data in the same file as the metadata.
        Self {
            version: 0,
            flags: 1,
            location: Vec::new(),
        }
    }
}

impl Mp4Box for DataEntryUrl {
    fn box_type(&self) -> FourCC {
        FourCC::URL
    }

    fn read_write(&mut self, buffer: &mut BoxBuffer<'_, '_>) -> Result<()> {
        buffer.rw_full_header(
            FourCC::URL,
            self.compute_size(),
            &mut self.version,
            &mut self.flags,
        )?;
        let count = if buffer.reading() {
            buffer.bytes_left()
        } else {
            self.location.len()
        };
        buffer.rw_vector(&mut self.location, count)
    }

    fn compute_size(&self) -> u32 {
        FULL_BOX_SIZE + self.location.len() as u32
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataReference {
    pub version: u8,
    pub flags: u32,
    pub data_entry: Vec<DataEntryUrl>,
}

impl Default for DataReference {
    fn default() -> Self {
        Self {
            version: 0,
            flags: 0,
            data_entry: vec![DataEntryUrl::default()],
        }
    }
}

impl Mp4Box for DataReference {
    fn box_type(&self) -> FourCC {
        FourCC::DREF
    }

    fn read_write(&mut self, buffer: &mut BoxBuffer<'_, '_>) -> Result<()> {
        buffer.rw_full_header(
            FourCC::DREF,
            self.compute_size(),
            &mut self.version,
            &mut self.flags,
        )?;
        let mut count = self.data_entry.len() as u32;
        buffer.rw_u32(&mut count)?;
        buffer.prepare_children()?;
        buffer.rw_children(&mut self.data_entry)
    }

    fn compute_size(&self) -> u32 {
        FULL_BOX_SIZE + 4 + self.data_entry.iter().map(|e| e.compute_size()).sum::<u32>()
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DataInformation {
    pub dref: DataReference,
}

impl Mp4Box for DataInformation {
    fn box_type(&self) -> FourCC {
        FourCC::DINF
    }

    fn read_write(&mut self, buffer: &mut BoxBuffer<'_, '_>) -> Result<()> {
        buffer.rw_header(FourCC::DINF, self.compute_size())?;
        buffer.prepare_children()?;
        buffer.rw_child(&mut self.dref)
    }

    fn compute_size(&self) -> u32 {
        BOX_SIZE + self.dref.compute_size()
    }
}

// ---------------------------------------------------------------------------
// minf / mdia / trak
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MediaInformation {
    pub dinf: DataInformation,
    pub sample_table: SampleTable,
    pub vmhd: VideoMediaHeader,
    pub smhd: SoundMediaHeader,
}

impl Mp4Box for MediaInformation {
    fn box_type(&self) -> FourCC {
        FourCC::MINF
    }

    fn read_write(&mut self, buffer: &mut BoxBuffer<'_, '_>) -> Result<()> {
        buffer.rw_header(FourCC::MINF, self.compute_size())?;
        buffer.prepare_children()?;
        // Exactly one media header matching the handler type.
        match self.sample_table.description.stream_type {
            TrackType::Video => buffer.rw_child(&mut self.vmhd)?,
            TrackType::Audio => buffer.rw_child(&mut self.smhd)?,
            _ => {}
        }
        buffer.rw_child(&mut self.dinf)?;
        buffer.rw_child(&mut self.sample_table)
    }

    fn compute_size(&self) -> u32 {
        let media_header = match self.sample_table.description.stream_type {
            TrackType::Video => self.vmhd.compute_size(),
            TrackType::Audio => self.smhd.compute_size(),
            _ => 0,
        };
        BOX_SIZE + media_header + self.dinf.compute_size() + self.sample_table.compute_size()
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Media {
    pub header: MediaHeader,
    pub handler: HandlerReference,
    pub information: MediaInformation,
}

impl Mp4Box for Media {
    fn box_type(&self) -> FourCC {
        FourCC::MDIA
    }

    fn read_write(&mut self, buffer: &mut BoxBuffer<'_, '_>) -> Result<()> {
        buffer.rw_header(FourCC::MDIA, self.compute_size())?;
        buffer.prepare_children()?;
        buffer.rw_child(&mut self.header)?;
        buffer.rw_child(&mut self.handler)?;
        // The sample description needs the handler type before it is
        // transferred.
        self.information.sample_table.description.stream_type = self.handler.handler_type;
        buffer.rw_child(&mut self.information)
    }

    fn compute_size(&self) -> u32 {
        BOX_SIZE
            + self.header.compute_size()
            + self.handler.compute_size()
            + self.information.compute_size()
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Track {
    pub header: TrackHeader,
    pub edit: Edit,
    pub media: Media,
}

impl Mp4Box for Track {
    fn box_type(&self) -> FourCC {
        FourCC::TRAK
    }

    fn read_write(&mut self, buffer: &mut BoxBuffer<'_, '_>) -> Result<()> {
        buffer.rw_header(FourCC::TRAK, self.compute_size())?;
        buffer.prepare_children()?;
        buffer.rw_child(&mut self.header)?;
        buffer.try_rw_child(&mut self.edit)?;
        buffer.rw_child(&mut self.media)
    }

    fn compute_size(&self) -> u32 {
        BOX_SIZE
            + self.header.compute_size()
            + self.edit.compute_size()
            + self.media.compute_size()
    }
}

// ---------------------------------------------------------------------------
// mvex / moov
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MovieExtendsHeader {
    pub version: u8,
    pub flags: u32,
    pub fragment_duration: u64,
}

impl Mp4Box for MovieExtendsHeader {
    fn box_type(&self) -> FourCC {
        FourCC::MEHD
    }

    fn read_write(&mut self, buffer: &mut BoxBuffer<'_, '_>) -> Result<()> {
        if !buffer.reading() {
            self.version = version_for_times(&[self.fragment_duration]);
        }
        buffer.rw_full_header(
            FourCC::MEHD,
            self.compute_size(),
            &mut self.version,
            &mut self.flags,
        )?;
        let width = time_width(self.version);
        buffer.rw_u64_n_bytes(&mut self.fragment_duration, width)
    }

    fn compute_size(&self) -> u32 {
        if self.fragment_duration == 0 {
            return 0;
        }
        FULL_BOX_SIZE + time_width(version_for_times(&[self.fragment_duration])) as u32
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrackExtends {
    pub version: u8,
    pub flags: u32,
    pub track_id: u32,
    pub default_sample_description_index: u32,
    pub default_sample_duration: u32,
    pub default_sample_size: u32,
    pub default_sample_flags: u32,
}

impl Default for TrackExtends {
    fn default() -> Self {
        Self {
            version: 0,
            flags: 0,
            track_id: 0,
            default_sample_description_index: 1,
            default_sample_duration: 0,
            default_sample_size: 0,
            default_sample_flags: 0,
        }
    }
}

impl Mp4Box for TrackExtends {
    fn box_type(&self) -> FourCC {
        FourCC::TREX
    }

    fn read_write(&mut self, buffer: &mut BoxBuffer<'_, '_>) -> Result<()> {
        buffer.rw_full_header(
            FourCC::TREX,
            self.compute_size(),
            &mut self.version,
            &mut self.flags,
        )?;
        buffer.rw_u32(&mut self.track_id)?;
        buffer.rw_u32(&mut self.default_sample_description_index)?;
        buffer.rw_u32(&mut self.default_sample_duration)?;
        buffer.rw_u32(&mut self.default_sample_size)?;
        buffer.rw_u32(&mut self.default_sample_flags)
    }

    fn compute_size(&self) -> u32 {
        FULL_BOX_SIZE + 20
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MovieExtends {
    pub header: MovieExtendsHeader,
    pub tracks: Vec<TrackExtends>,
}

impl Mp4Box for MovieExtends {
    fn box_type(&self) -> FourCC {
        FourCC::MVEX
    }

    fn read_write(&mut self, buffer: &mut BoxBuffer<'_, '_>) -> Result<()> {
        buffer.rw_header(FourCC::MVEX, self.compute_size())?;
        buffer.prepare_children()?;
        buffer.try_rw_child(&mut self.header)?;
        buffer.rw_children(&mut self.tracks)
    }

    fn compute_size(&self) -> u32 {
        if self.tracks.is_empty() {
            return 0;
        }
        BOX_SIZE
            + self.header.compute_size()
            + self.tracks.iter().map(|t| t.compute_size()).sum::<u32>()
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Movie {
    pub header: MovieHeader,
    pub extends: MovieExtends,
    pub tracks: Vec<Track>,
    pub pssh: Vec<ProtectionSystemSpecificHeader>,
}

impl Mp4Box for Movie {
    fn box_type(&self) -> FourCC {
        FourCC::MOOV
    }

    fn read_write(&mut self, buffer: &mut BoxBuffer<'_, '_>) -> Result<()> {
        buffer.rw_header(FourCC::MOOV, self.compute_size())?;
        buffer.prepare_children()?;
        buffer.rw_child(&mut self.header)?;
        buffer.try_rw_child(&mut self.extends)?;
        buffer.rw_children(&mut self.tracks)?;
        buffer.maybe_rw_children(&mut self.pssh)
    }

    fn compute_size(&self) -> u32 {
        BOX_SIZE
            + self.header.compute_size()
            + self.extends.compute_size()
            + self.tracks.iter().map(|t| t.compute_size()).sum::<u32>()
            + self.pssh.iter().map(|p| p.compute_size()).sum::<u32>()
    }
}

// ---------------------------------------------------------------------------
// Movie fragments
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TrackFragmentDecodeTime {
    pub version: u8,
    pub flags: u32,
    pub decode_time: u64,
}

impl Mp4Box for TrackFragmentDecodeTime {
    fn box_type(&self) -> FourCC {
        FourCC::TFDT
    }

    fn read_write(&mut self, buffer: &mut BoxBuffer<'_, '_>) -> Result<()> {
        if !buffer.reading() {
            self.version = version_for_times(&[self.decode_time]);
        }
        buffer.rw_full_header(
            FourCC::TFDT,
            self.compute_size(),
            &mut self.version,
            &mut self.flags,
        )?;
        let width = time_width(self.version);
        buffer.rw_u64_n_bytes(&mut self.decode_time, width)
    }

    fn compute_size(&self) -> u32 {
        FULL_BOX_SIZE + time_width(version_for_times(&[self.decode_time])) as u32
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MovieFragmentHeader {
    pub version: u8,
    pub flags: u32,
    pub sequence_number: u32,
}

impl Mp4Box for MovieFragmentHeader {
    fn box_type(&self) -> FourCC {
        FourCC::MFHD
    }

    fn read_write(&mut self, buffer: &mut BoxBuffer<'_, '_>) -> Result<()> {
        buffer.rw_full_header(
            FourCC::MFHD,
            self.compute_size(),
            &mut self.version,
            &mut self.flags,
        )?;
        buffer.rw_u32(&mut self.sequence_number)
    }

    fn compute_size(&self) -> u32 {
        FULL_BOX_SIZE + 4
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TrackFragmentHeader {
    pub version: u8,
    pub flags: u32,
    pub track_id: u32,
    pub base_data_offset: u64,
    pub sample_description_index: u32,
    pub default_sample_duration: u32,
    pub default_sample_size: u32,
    pub default_sample_flags: u32,
}

impl TrackFragmentHeader {
    pub const BASE_DATA_OFFSET_PRESENT: u32 = 0x000001;
    pub const SAMPLE_DESCRIPTION_INDEX_PRESENT: u32 = 0x000002;
    pub const DEFAULT_SAMPLE_DURATION_PRESENT: u32 = 0x000008;
    pub const DEFAULT_SAMPLE_SIZE_PRESENT: u32 = 0x000010;
    pub const DEFAULT_SAMPLE_FLAGS_PRESENT: u32 = 0x000020;
    pub const DURATION_IS_EMPTY: u32 = 0x010000;
    pub const DEFAULT_BASE_IS_MOOF: u32 = 0x020000;

    /// Per-sample flags bit marking a non-sync sample.
    pub const NON_KEY_SAMPLE_MASK: u32 = 0x00010000;
}

impl Mp4Box for TrackFragmentHeader {
    fn box_type(&self) -> FourCC {
        FourCC::TFHD
    }

    fn read_write(&mut self, buffer: &mut BoxBuffer<'_, '_>) -> Result<()> {
        buffer.rw_full_header(
            FourCC::TFHD,
            self.compute_size(),
            &mut self.version,
            &mut self.flags,
        )?;
        buffer.rw_u32(&mut self.track_id)?;
        if self.flags & Self::BASE_DATA_OFFSET_PRESENT != 0 {
            buffer.rw_u64(&mut self.base_data_offset)?;
        }
        if self.flags & Self::SAMPLE_DESCRIPTION_INDEX_PRESENT != 0 {
            buffer.rw_u32(&mut self.sample_description_index)?;
        }
        if self.flags & Self::DEFAULT_SAMPLE_DURATION_PRESENT != 0 {
            buffer.rw_u32(&mut self.default_sample_duration)?;
        }
        if self.flags & Self::DEFAULT_SAMPLE_SIZE_PRESENT != 0 {
            buffer.rw_u32(&mut self.default_sample_size)?;
        }
        if self.flags & Self::DEFAULT_SAMPLE_FLAGS_PRESENT != 0 {
            buffer.rw_u32(&mut self.default_sample_flags)?;
        }
        Ok(())
    }

    fn compute_size(&self) -> u32 {
        let mut size = FULL_BOX_SIZE + 4;
        if self.flags & Self::BASE_DATA_OFFSET_PRESENT != 0 {
            size += 8;
        }
        if self.flags & Self::SAMPLE_DESCRIPTION_INDEX_PRESENT != 0 {
            size += 4;
        }
        if self.flags & Self::DEFAULT_SAMPLE_DURATION_PRESENT != 0 {
            size += 4;
        }
        if self.flags & Self::DEFAULT_SAMPLE_SIZE_PRESENT != 0 {
            size += 4;
        }
        if self.flags & Self::DEFAULT_SAMPLE_FLAGS_PRESENT != 0 {
            size += 4;
        }
        size
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TrackFragmentRun {
    pub version: u8,
    pub flags: u32,
    pub sample_count: u32,
    pub data_offset: u32,
    pub first_sample_flags: u32,
    pub sample_flags: Vec<u32>,
    pub sample_sizes: Vec<u32>,
    pub sample_durations: Vec<u32>,
    pub sample_composition_time_offsets: Vec<i32>,
}

impl TrackFragmentRun {
    pub const DATA_OFFSET_PRESENT: u32 = 0x000001;
    pub const FIRST_SAMPLE_FLAGS_PRESENT: u32 = 0x000004;
    pub const SAMPLE_DURATION_PRESENT: u32 = 0x000100;
    pub const SAMPLE_SIZE_PRESENT: u32 = 0x000200;
    pub const SAMPLE_FLAGS_PRESENT: u32 = 0x000400;
    pub const SAMPLE_COMP_TIME_OFFSETS_PRESENT: u32 = 0x000800;
}

impl Mp4Box for TrackFragmentRun {
    fn box_type(&self) -> FourCC {
        FourCC::TRUN
    }

    fn read_write(&mut self, buffer: &mut BoxBuffer<'_, '_>) -> Result<()> {
        if !buffer.reading() {
            self.version = if self
                .sample_composition_time_offsets
                .iter()
                .any(|offset| *offset < 0)
            {
                1
            } else {
                0
            };
        }
        buffer.rw_full_header(
            FourCC::TRUN,
            self.compute_size(),
            &mut self.version,
            &mut self.flags,
        )?;
        buffer.rw_u32(&mut self.sample_count)?;
        if self.flags & Self::DATA_OFFSET_PRESENT != 0 {
            buffer.rw_u32(&mut self.data_offset)?;
        }
        if self.flags & Self::FIRST_SAMPLE_FLAGS_PRESENT != 0 {
            buffer.rw_u32(&mut self.first_sample_flags)?;
        }

        let duration_present = self.flags & Self::SAMPLE_DURATION_PRESENT != 0;
        let size_present = self.flags & Self::SAMPLE_SIZE_PRESENT != 0;
        let flags_present = self.flags & Self::SAMPLE_FLAGS_PRESENT != 0;
        let cts_present = self.flags & Self::SAMPLE_COMP_TIME_OFFSETS_PRESENT != 0;

        let count = self.sample_count as usize;
        if buffer.reading() {
            self.sample_durations = vec![0; if duration_present { count } else { 0 }];
            self.sample_sizes = vec![0; if size_present { count } else { 0 }];
            self.sample_flags = vec![0; if flags_present { count } else { 0 }];
            self.sample_composition_time_offsets = vec![0; if cts_present { count } else { 0 }];
        } else {
            debug_assert!(!duration_present || self.sample_durations.len() == count);
            debug_assert!(!size_present || self.sample_sizes.len() == count);
            debug_assert!(!flags_present || self.sample_flags.len() == count);
            debug_assert!(!cts_present || self.sample_composition_time_offsets.len() == count);
        }

        for i in 0..count {
            if duration_present {
                buffer.rw_u32(&mut self.sample_durations[i])?;
            }
            if size_present {
                buffer.rw_u32(&mut self.sample_sizes[i])?;
            }
            if flags_present {
                buffer.rw_u32(&mut self.sample_flags[i])?;
            }
            if cts_present {
                if self.version == 0 {
                    let mut unsigned = self.sample_composition_time_offsets[i] as u32;
                    buffer.rw_u32(&mut unsigned)?;
                    self.sample_composition_time_offsets[i] = unsigned as i32;
                } else {
                    buffer.rw_i32(&mut self.sample_composition_time_offsets[i])?;
                }
            }
        }
        Ok(())
    }

    fn compute_size(&self) -> u32 {
        let mut size = FULL_BOX_SIZE + 4;
        if self.flags & Self::DATA_OFFSET_PRESENT != 0 {
            size += 4;
        }
        if self.flags & Self::FIRST_SAMPLE_FLAGS_PRESENT != 0 {
            size += 4;
        }
        let mut per_sample = 0;
        for mask in [
            Self::SAMPLE_DURATION_PRESENT,
            Self::SAMPLE_SIZE_PRESENT,
            Self::SAMPLE_FLAGS_PRESENT,
            Self::SAMPLE_COMP_TIME_OFFSETS_PRESENT,
        ] {
            if self.flags & mask != 0 {
                per_sample += 4;
            }
        }
        size + self.sample_count * per_sample
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SampleToGroupEntry {
    pub sample_count: u32,
    pub group_description_index: u32,
}

impl SampleToGroupEntry {
    /// Group description indices at or above this base refer to the
    /// fragment-local `sgpd`.
    pub const TRACK_FRAGMENT_GROUP_DESCRIPTION_INDEX_BASE: u32 = 0x10000;
}

/// `sbgp`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SampleToGroup {
    pub version: u8,
    pub flags: u32,
    pub grouping_type: u32,
    pub grouping_type_parameter: u32,
    pub entries: Vec<SampleToGroupEntry>,
}

impl Mp4Box for SampleToGroup {
    fn box_type(&self) -> FourCC {
        FourCC::SBGP
    }

    fn read_write(&mut self, buffer: &mut BoxBuffer<'_, '_>) -> Result<()> {
        buffer.rw_full_header(
            FourCC::SBGP,
            self.compute_size(),
            &mut self.version,
            &mut self.flags,
        )?;
        buffer.rw_u32(&mut self.grouping_type)?;
        if self.version == 1 {
            buffer.rw_u32(&mut self.grouping_type_parameter)?;
        }
        let mut count = self.entries.len() as u32;
        buffer.rw_u32(&mut count)?;
        if buffer.reading() {
            self.entries = vec![SampleToGroupEntry::default(); count as usize];
        }
        for entry in self.entries.iter_mut() {
            buffer.rw_u32(&mut entry.sample_count)?;
            buffer.rw_u32(&mut entry.group_description_index)?;
        }
        Ok(())
    }

    fn compute_size(&self) -> u32 {
        if self.entries.is_empty() {
            return 0;
        }
        let parameter = if self.version == 1 { 4 } else { 0 };
        FULL_BOX_SIZE + 4 + parameter + 4 + 8 * self.entries.len() as u32
    }
}

/// One CENC sample encryption entry of a `seig` sample group description.
#[derive(Debug, Clone, PartialEq)]
pub struct CencSampleEncryptionInfoEntry {
    pub is_encrypted: bool,
    pub iv_size: u8,
    pub key_id: Vec<u8>,
}

impl Default for CencSampleEncryptionInfoEntry {
    fn default() -> Self {
        Self {
            is_encrypted: false,
            iv_size: 0,
            key_id: vec![0; 16],
        }
    }
}

const SEIG_ENTRY_SIZE: u32 = 3 + 1 + 16;

/// `sgpd`, restricted to the `seig` grouping used for rotating CENC keys.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SampleGroupDescription {
    pub version: u8,
    pub flags: u32,
    pub grouping_type: u32,
    pub entries: Vec<CencSampleEncryptionInfoEntry>,
}

impl Mp4Box for SampleGroupDescription {
    fn box_type(&self) -> FourCC {
        FourCC::SGPD
    }

    fn read_write(&mut self, buffer: &mut BoxBuffer<'_, '_>) -> Result<()> {
        if !buffer.reading() {
            self.version = 1;
        }
        buffer.rw_full_header(
            FourCC::SGPD,
            self.compute_size(),
            &mut self.version,
            &mut self.flags,
        )?;
        buffer.rw_u32(&mut self.grouping_type)?;

        if buffer.reading() && self.grouping_type != FourCC::SEIG.as_u32() {
            // Not a CENC grouping; skip the rest.
            let leftover = buffer.bytes_left();
            self.entries.clear();
            return buffer.ignore_bytes(leftover);
        }

        let mut default_length = SEIG_ENTRY_SIZE;
        if self.version == 1 {
            buffer.rw_u32(&mut default_length)?;
        }

        let mut count = self.entries.len() as u32;
        buffer.rw_u32(&mut count)?;
        if buffer.reading() {
            self.entries = vec![CencSampleEncryptionInfoEntry::default(); count as usize];
        }
        for entry in self.entries.iter_mut() {
            let mut entry_length = SEIG_ENTRY_SIZE;
            if self.version == 1 && default_length == 0 {
                buffer.rw_u32(&mut entry_length)?;
                if entry_length < SEIG_ENTRY_SIZE {
                    return Err(Error::parser(format!(
                        "seig entry too short: {entry_length}"
                    )));
                }
            } else if self.version == 1 {
                entry_length = default_length;
            }
            let mut encrypted = u64::from(entry.is_encrypted);
            buffer.rw_u64_n_bytes(&mut encrypted, 3)?;
            entry.is_encrypted = encrypted != 0;
            buffer.rw_u8(&mut entry.iv_size)?;
            buffer.rw_vector(&mut entry.key_id, 16)?;
            if buffer.reading() && entry_length > SEIG_ENTRY_SIZE {
                buffer.ignore_bytes((entry_length - SEIG_ENTRY_SIZE) as usize)?;
            }
        }
        Ok(())
    }

    fn compute_size(&self) -> u32 {
        if self.entries.is_empty() {
            return 0;
        }
        FULL_BOX_SIZE + 4 + 4 + 4 + SEIG_ENTRY_SIZE * self.entries.len() as u32
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TrackFragment {
    pub header: TrackFragmentHeader,
    pub decode_time: TrackFragmentDecodeTime,
    /// Whether a `tfdt` was present; absent decode times fall back to the
    /// running DTS of the previous fragment.
    pub has_decode_time: bool,
    pub runs: Vec<TrackFragmentRun>,
    pub sample_to_group: SampleToGroup,
    pub sample_group_description: SampleGroupDescription,
    pub auxiliary_size: SampleAuxiliaryInformationSize,
    pub auxiliary_offset: SampleAuxiliaryInformationOffset,
}

impl Mp4Box for TrackFragment {
    fn box_type(&self) -> FourCC {
        FourCC::TRAF
    }

    fn read_write(&mut self, buffer: &mut BoxBuffer<'_, '_>) -> Result<()> {
        buffer.rw_header(FourCC::TRAF, self.compute_size())?;
        buffer.prepare_children()?;
        buffer.rw_child(&mut self.header)?;
        if buffer.reading() {
            self.has_decode_time = buffer.reader_has_child(FourCC::TFDT);
        } else {
            self.has_decode_time = true;
        }
        buffer.try_rw_child(&mut self.decode_time)?;
        buffer.try_rw_child(&mut self.sample_group_description)?;
        buffer.try_rw_child(&mut self.sample_to_group)?;
        buffer.try_rw_child(&mut self.auxiliary_size)?;
        buffer.try_rw_child(&mut self.auxiliary_offset)?;
        buffer.maybe_rw_children(&mut self.runs)
    }

    fn compute_size(&self) -> u32 {
        BOX_SIZE
            + self.header.compute_size()
            + self.decode_time.compute_size()
            + self.sample_group_description.compute_size()
            + self.sample_to_group.compute_size()
            + self.auxiliary_size.compute_size()
            + self.auxiliary_offset.compute_size()
            + self.runs.iter().map(|r| r.compute_size()).sum::<u32>()
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MovieFragment {
    pub header: MovieFragmentHeader,
    pub tracks: Vec<TrackFragment>,
    pub pssh: Vec<ProtectionSystemSpecificHeader>,
}

impl Mp4Box for MovieFragment {
    fn box_type(&self) -> FourCC {
        FourCC::MOOF
    }

    fn read_write(&mut self, buffer: &mut BoxBuffer<'_, '_>) -> Result<()> {
        buffer.rw_header(FourCC::MOOF, self.compute_size())?;
        buffer.prepare_children()?;
        buffer.rw_child(&mut self.header)?;
        buffer.maybe_rw_children(&mut self.pssh)?;
        buffer.rw_children(&mut self.tracks)
    }

    fn compute_size(&self) -> u32 {
        BOX_SIZE
            + self.header.compute_size()
            + self.tracks.iter().map(|t| t.compute_size()).sum::<u32>()
            + self.pssh.iter().map(|p| p.compute_size()).sum::<u32>()
    }
}

// ---------------------------------------------------------------------------
// sidx
// ---------------------------------------------------------------------------

/// Stream access point classification (ISO 14496-12 Annex I).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SapType {
    #[default]
    Unknown,
    Type1,
    Type2,
    Type3,
    Type4,
    Type5,
    Type6,
}

impl SapType {
    pub fn as_u8(&self) -> u8 {
        match self {
            Self::Unknown => 0,
            Self::Type1 => 1,
            Self::Type2 => 2,
            Self::Type3 => 3,
            Self::Type4 => 4,
            Self::Type5 => 5,
            Self::Type6 => 6,
        }
    }

    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Type1,
            2 => Self::Type2,
            3 => Self::Type3,
            4 => Self::Type4,
            5 => Self::Type5,
            6 => Self::Type6,
            _ => Self::Unknown,
        }
    }
}

/// One `sidx` reference. `earliest_presentation_time` is bookkeeping used
/// while collapsing references and is not serialized.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SegmentReference {
    pub reference_type: bool,
    pub referenced_size: u32,
    pub subsegment_duration: u32,
    pub starts_with_sap: bool,
    pub sap_type: SapType,
    pub sap_delta_time: u32,
    pub earliest_presentation_time: u64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SegmentIndex {
    pub version: u8,
    pub flags: u32,
    pub reference_id: u32,
    pub timescale: u32,
    pub earliest_presentation_time: u64,
    pub first_offset: u64,
    pub references: Vec<SegmentReference>,
}

impl Mp4Box for SegmentIndex {
    fn box_type(&self) -> FourCC {
        FourCC::SIDX
    }

    fn read_write(&mut self, buffer: &mut BoxBuffer<'_, '_>) -> Result<()> {
        if !buffer.reading() {
            self.version =
                version_for_times(&[self.earliest_presentation_time, self.first_offset]);
        }
        buffer.rw_full_header(
            FourCC::SIDX,
            self.compute_size(),
            &mut self.version,
            &mut self.flags,
        )?;
        buffer.rw_u32(&mut self.reference_id)?;
        buffer.rw_u32(&mut self.timescale)?;
        let width = time_width(self.version);
        buffer.rw_u64_n_bytes(&mut self.earliest_presentation_time, width)?;
        buffer.rw_u64_n_bytes(&mut self.first_offset, width)?;
        buffer.ignore_bytes(2)?; // reserved
        let mut count = self.references.len() as u16;
        buffer.rw_u16(&mut count)?;
        if buffer.reading() {
            self.references = vec![SegmentReference::default(); count as usize];
        }
        for reference in self.references.iter_mut() {
            let mut first = (u32::from(reference.reference_type) << 31)
                | (reference.referenced_size & 0x7FFFFFFF);
            buffer.rw_u32(&mut first)?;
            reference.reference_type = first >> 31 != 0;
            reference.referenced_size = first & 0x7FFFFFFF;

            buffer.rw_u32(&mut reference.subsegment_duration)?;

            let mut third = (u32::from(reference.starts_with_sap) << 31)
                | (u32::from(reference.sap_type.as_u8()) << 28)
                | (reference.sap_delta_time & 0x0FFFFFFF);
            buffer.rw_u32(&mut third)?;
            reference.starts_with_sap = third >> 31 != 0;
            reference.sap_type = SapType::from_u8(((third >> 28) & 0x7) as u8);
            reference.sap_delta_time = third & 0x0FFFFFFF;
        }
        Ok(())
    }

    fn compute_size(&self) -> u32 {
        let version = version_for_times(&[self.earliest_presentation_time, self.first_offset]);
        FULL_BOX_SIZE
            + 4
            + 4
            + 2 * time_width(version) as u32
            + 2
            + 2
            + 12 * self.references.len() as u32
    }
}

// ---------------------------------------------------------------------------
// mdat
// ---------------------------------------------------------------------------

/// `mdat`. Only the header goes through here; payload bytes are appended by
/// the caller.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MediaData {
    pub data_size: u32,
}

impl MediaData {
    pub const HEADER_SIZE: u32 = 8;

    pub fn write_header(&self, writer: &mut BufferWriter) {
        writer.append_u32(self.data_size + Self::HEADER_SIZE);
        writer.append_slice(&FourCC::MDAT.0);
    }

    pub fn compute_size(&self) -> u32 {
        Self::HEADER_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mp4::box_reader::BoxReader;

    // Serialize, check the computed size, parse back, and return the parsed
    // box for comparison.
    fn round_trip<T>(original: &mut T) -> T
    where
        T: Mp4Box + PartialEq + std::fmt::Debug,
    {
        let mut writer = BufferWriter::new();
        original.write(&mut writer).unwrap();
        assert_eq!(
            writer.size() as u32,
            original.compute_size(),
            "compute_size disagrees with bytes written"
        );
        let mut reader = BoxReader::for_box(writer.buffer()).unwrap();
        let mut parsed = T::default();
        parsed.parse(&mut reader).unwrap();
        parsed
    }

    #[test]
    fn ftyp_round_trip() {
        let mut ftyp = FileType {
            major_brand: FourCC::DASH,
            minor_version: 0,
            compatible_brands: vec![FourCC::ISO6, FourCC::MP41, FourCC::AVC1],
        };
        assert_eq!(round_trip(&mut ftyp), ftyp);
        assert_eq!(ftyp.compute_size(), 8 + 8 + 12);
    }

    #[test]
    fn styp_round_trip() {
        let mut styp = SegmentType(FileType {
            major_brand: FourCC::DASH,
            minor_version: 0,
            compatible_brands: vec![FourCC::ISO6],
        });
        assert_eq!(round_trip(&mut styp), styp);
    }

    #[test]
    fn pssh_round_trip_preserves_raw_bytes() {
        let raw = crate::key_source::pssh_box_from_pssh_data(&[1, 2, 3, 4]);
        let mut pssh = ProtectionSystemSpecificHeader {
            raw_box: raw.clone(),
            ..Default::default()
        };
        let parsed = round_trip(&mut pssh);
        assert_eq!(parsed.raw_box, raw);
        assert_eq!(parsed.system_id, crate::key_source::WIDEVINE_SYSTEM_ID);
        assert_eq!(parsed.data, vec![1, 2, 3, 4]);
    }

    #[test]
    fn mvhd_round_trip_both_versions() {
        let mut mvhd = MovieHeader {
            timescale: 90000,
            duration: 12345,
            next_track_id: 3,
            ..Default::default()
        };
        let parsed = round_trip(&mut mvhd);
        assert_eq!(parsed, mvhd);
        assert_eq!(mvhd.version, 0);

        mvhd.duration = u64::from(u32::MAX) + 10;
        let parsed = round_trip(&mut mvhd);
        assert_eq!(parsed.duration, mvhd.duration);
        assert_eq!(mvhd.version, 1);
    }

    #[test]
    fn tkhd_round_trip() {
        let mut tkhd = TrackHeader {
            track_id: 2,
            duration: 1000,
            width: 1280 << 16,
            height: 720 << 16,
            ..Default::default()
        };
        assert_eq!(round_trip(&mut tkhd), tkhd);
        assert_eq!(tkhd.flags, 7);
    }

    #[test]
    fn mdhd_language_round_trip() {
        let mut mdhd = MediaHeader {
            timescale: 44100,
            duration: 88200,
            language: "eng".into(),
            ..Default::default()
        };
        assert_eq!(round_trip(&mut mdhd), mdhd);

        // Empty language is written as "und".
        let mut mdhd = MediaHeader {
            timescale: 25,
            ..Default::default()
        };
        let parsed = round_trip(&mut mdhd);
        assert_eq!(parsed.language, "und");
    }

    #[test]
    fn hdlr_round_trip() {
        let mut hdlr = HandlerReference {
            handler_type: TrackType::Video,
            ..Default::default()
        };
        assert_eq!(round_trip(&mut hdlr), hdlr);
    }

    #[test]
    fn elst_round_trip() {
        let mut elst = EditList {
            edits: vec![EditListEntry {
                segment_duration: 0,
                media_time: 500,
                media_rate_integer: 1,
                media_rate_fraction: 0,
            }],
            ..Default::default()
        };
        assert_eq!(round_trip(&mut elst), elst);

        // Negative media time still fits version 0.
        elst.edits[0].media_time = -1;
        assert_eq!(round_trip(&mut elst), elst);

        // Empty edit list encodes absence.
        let empty = EditList::default();
        assert_eq!(empty.compute_size(), 0);
    }

    #[test]
    fn avcc_parses_record_fields() {
        // Minimal record: version 1, profile 0x64, compat 0, level 0x1f,
        // 4-byte lengths, one SPS, one PPS.
        let record = vec![
            0x01, 0x64, 0x00, 0x1F, 0xFF, 0xE1, 0x00, 0x03, 0x67, 0x42, 0x00, 0x01, 0x00, 0x02,
            0x68, 0xCE,
        ];
        let mut avcc = AvcDecoderConfigurationRecord::default();
        avcc.set_data(record.clone()).unwrap();
        assert_eq!(avcc.profile_indication, 0x64);
        assert_eq!(avcc.avc_level, 0x1F);
        assert_eq!(avcc.length_size, 4);
        assert_eq!(avcc.sps_list.len(), 1);
        assert_eq!(avcc.pps_list.len(), 1);

        let parsed = round_trip(&mut avcc);
        assert_eq!(parsed.data, record);
        assert_eq!(parsed.length_size, 4);
    }

    #[test]
    fn video_sample_entry_round_trip() {
        let mut entry = VideoSampleEntry {
            format: FourCC::AVC1,
            width: 1920,
            height: 1080,
            ..Default::default()
        };
        entry
            .avcc
            .set_data(vec![0x01, 0x64, 0x00, 0x1F, 0xFF, 0xE0, 0x00])
            .unwrap();

        let parsed = round_trip(&mut entry);
        assert_eq!(parsed.format, FourCC::AVC1);
        assert_eq!(parsed.width, 1920);
        assert_eq!(parsed.avcc.data, entry.avcc.data);
    }

    #[test]
    fn encrypted_video_sample_entry_round_trip() {
        let mut entry = VideoSampleEntry {
            format: FourCC::ENCV,
            width: 1280,
            height: 720,
            ..Default::default()
        };
        entry
            .avcc
            .set_data(vec![0x01, 0x64, 0x00, 0x1F, 0xFF, 0xE0, 0x00])
            .unwrap();
        entry.sinf.format.format = FourCC::AVC1;
        entry.sinf.scheme_type.scheme_type = FourCC::CENC;
        entry.sinf.scheme_type.scheme_version = 0x00010000;
        entry.sinf.info.track_encryption.is_encrypted = true;
        entry.sinf.info.track_encryption.default_iv_size = 8;
        entry.sinf.info.track_encryption.default_kid = (0u8..16).collect();

        let parsed = round_trip(&mut entry);
        assert_eq!(parsed.format, FourCC::ENCV);
        assert_eq!(parsed.sinf.format.format, FourCC::AVC1);
        assert!(parsed.sinf.info.track_encryption.is_encrypted);
        assert_eq!(parsed.sinf.info.track_encryption.default_iv_size, 8);
        assert_eq!(
            parsed.sinf.info.track_encryption.default_kid,
            entry.sinf.info.track_encryption.default_kid
        );
    }

    #[test]
    fn audio_sample_entry_round_trip() {
        use crate::mp4::es_descriptor::ObjectType;

        let mut entry = AudioSampleEntry {
            format: FourCC::MP4A,
            channel_count: 2,
            sample_size: 16,
            sample_rate: 44100,
            ..Default::default()
        };
        entry.esds.es_descriptor.set_esid(1);
        entry
            .esds
            .es_descriptor
            .set_object_type(ObjectType::Iso14496_3);
        entry
            .esds
            .es_descriptor
            .set_decoder_specific_info(vec![0x12, 0x10]);
        entry.esds.aac_audio_specific_config.parse(&[0x12, 0x10]).unwrap();

        let parsed = round_trip(&mut entry);
        assert_eq!(parsed.sample_rate, 44100);
        assert_eq!(parsed.esds.es_descriptor, entry.esds.es_descriptor);
        assert_eq!(parsed.esds.aac_audio_specific_config.frequency(), 44100);
    }

    #[test]
    fn sample_table_leaves_round_trip() {
        let mut stts = DecodingTimeToSample {
            decoding_time: vec![DecodingTime {
                sample_count: 82,
                sample_delta: 1,
            }],
            ..Default::default()
        };
        assert_eq!(round_trip(&mut stts), stts);

        let mut ctts = CompositionTimeToSample {
            composition_offset: vec![
                CompositionOffset {
                    sample_count: 1,
                    sample_offset: -2,
                },
                CompositionOffset {
                    sample_count: 3,
                    sample_offset: 5,
                },
            ],
            ..Default::default()
        };
        assert_eq!(round_trip(&mut ctts), ctts);

        let mut stsc = SampleToChunk {
            chunk_info: vec![ChunkInfo {
                first_chunk: 1,
                samples_per_chunk: 10,
                sample_description_index: 1,
            }],
            ..Default::default()
        };
        assert_eq!(round_trip(&mut stsc), stsc);

        let mut stsz = SampleSize {
            sample_size: 0,
            sample_count: 3,
            sizes: vec![10, 20, 30],
            ..Default::default()
        };
        assert_eq!(round_trip(&mut stsz), stsz);

        let mut stco = ChunkOffset {
            offsets: vec![100, 200],
            ..Default::default()
        };
        assert_eq!(round_trip(&mut stco), stco);

        let mut stss = SyncSample {
            sample_number: vec![1, 42],
            ..Default::default()
        };
        assert_eq!(round_trip(&mut stss), stss);
    }

    #[test]
    fn stz2_round_trip_all_field_sizes() {
        for field_size in [4u8, 8, 16] {
            let mut stz2 = CompactSampleSize {
                field_size,
                sizes: vec![1, 2, 3, 4, 5],
                ..Default::default()
            };
            let parsed = round_trip(&mut stz2);
            assert_eq!(parsed.sizes, stz2.sizes, "field size {field_size}");
        }
    }

    #[test]
    fn trex_and_mvex_round_trip() {
        let mut mvex = MovieExtends {
            tracks: vec![TrackExtends {
                track_id: 1,
                default_sample_duration: 1000,
                ..Default::default()
            }],
            ..Default::default()
        };
        assert_eq!(round_trip(&mut mvex), mvex);

        let empty = MovieExtends::default();
        assert_eq!(empty.compute_size(), 0);
    }

    #[test]
    fn tfdt_switches_width_by_value() {
        let mut tfdt = TrackFragmentDecodeTime {
            decode_time: 1000,
            ..Default::default()
        };
        assert_eq!(round_trip(&mut tfdt), tfdt);
        assert_eq!(tfdt.compute_size(), 12 + 4);

        tfdt.decode_time = u64::from(u32::MAX) + 1;
        assert_eq!(round_trip(&mut tfdt), tfdt);
        assert_eq!(tfdt.compute_size(), 12 + 8);
    }

    #[test]
    fn tfhd_flagged_fields() {
        let mut tfhd = TrackFragmentHeader {
            flags: TrackFragmentHeader::DEFAULT_BASE_IS_MOOF
                | TrackFragmentHeader::DEFAULT_SAMPLE_DURATION_PRESENT
                | TrackFragmentHeader::SAMPLE_DESCRIPTION_INDEX_PRESENT,
            track_id: 1,
            sample_description_index: 2,
            default_sample_duration: 3000,
            ..Default::default()
        };
        let parsed = round_trip(&mut tfhd);
        assert_eq!(parsed, tfhd);

        // Absent fields do not consume bytes.
        assert_eq!(tfhd.compute_size(), 12 + 4 + 4 + 4);
    }

    #[test]
    fn trun_round_trip_with_negative_cts() {
        let mut trun = TrackFragmentRun {
            flags: TrackFragmentRun::DATA_OFFSET_PRESENT
                | TrackFragmentRun::SAMPLE_SIZE_PRESENT
                | TrackFragmentRun::SAMPLE_COMP_TIME_OFFSETS_PRESENT,
            sample_count: 3,
            data_offset: 900,
            sample_sizes: vec![10, 20, 30],
            sample_composition_time_offsets: vec![0, -1, 2],
            ..Default::default()
        };
        let parsed = round_trip(&mut trun);
        assert_eq!(parsed.sample_sizes, trun.sample_sizes);
        assert_eq!(
            parsed.sample_composition_time_offsets,
            trun.sample_composition_time_offsets
        );
        assert_eq!(trun.version, 1);
    }

    #[test]
    fn saiz_saio_round_trip() {
        let mut saiz = SampleAuxiliaryInformationSize {
            default_sample_info_size: 8,
            sample_count: 5,
            ..Default::default()
        };
        assert_eq!(round_trip(&mut saiz), saiz);

        let mut saiz = SampleAuxiliaryInformationSize {
            default_sample_info_size: 0,
            sample_count: 3,
            sample_info_sizes: vec![16, 22, 18],
            ..Default::default()
        };
        assert_eq!(round_trip(&mut saiz), saiz);

        let mut saio = SampleAuxiliaryInformationOffset {
            offsets: vec![1234],
            ..Default::default()
        };
        assert_eq!(round_trip(&mut saio), saio);

        let empty = SampleAuxiliaryInformationOffset::default();
        assert_eq!(empty.compute_size(), 0);
    }

    #[test]
    fn sbgp_sgpd_round_trip() {
        let mut sgpd = SampleGroupDescription {
            grouping_type: FourCC::SEIG.as_u32(),
            entries: vec![CencSampleEncryptionInfoEntry {
                is_encrypted: true,
                iv_size: 8,
                key_id: (0u8..16).collect(),
            }],
            ..Default::default()
        };
        let parsed = round_trip(&mut sgpd);
        assert_eq!(parsed, sgpd);
        assert_eq!(sgpd.version, 1);

        let mut sbgp = SampleToGroup {
            grouping_type: FourCC::SEIG.as_u32(),
            entries: vec![SampleToGroupEntry {
                sample_count: 50,
                group_description_index:
                    SampleToGroupEntry::TRACK_FRAGMENT_GROUP_DESCRIPTION_INDEX_BASE + 1,
            }],
            ..Default::default()
        };
        assert_eq!(round_trip(&mut sbgp), sbgp);
    }

    #[test]
    fn sidx_reference_bit_packing() {
        let mut sidx = SegmentIndex {
            reference_id: 1,
            timescale: 25,
            earliest_presentation_time: 0,
            first_offset: 0,
            references: vec![SegmentReference {
                reference_type: false,
                referenced_size: 0x12345,
                subsegment_duration: 250,
                starts_with_sap: true,
                sap_type: SapType::Type1,
                sap_delta_time: 7,
                earliest_presentation_time: 0,
            }],
            ..Default::default()
        };
        let parsed = round_trip(&mut sidx);
        assert_eq!(parsed.references.len(), 1);
        let reference = &parsed.references[0];
        assert_eq!(reference.referenced_size, 0x12345);
        assert_eq!(reference.subsegment_duration, 250);
        assert!(reference.starts_with_sap);
        assert_eq!(reference.sap_type, SapType::Type1);
        assert_eq!(reference.sap_delta_time, 7);
    }

    #[test]
    fn moov_full_round_trip() {
        let mut entry = VideoSampleEntry {
            format: FourCC::AVC1,
            width: 1280,
            height: 720,
            ..Default::default()
        };
        entry
            .avcc
            .set_data(vec![0x01, 0x64, 0x00, 0x1F, 0xFF, 0xE0, 0x00])
            .unwrap();

        let mut track = Track::default();
        track.header.track_id = 1;
        track.header.width = 1280 << 16;
        track.header.height = 720 << 16;
        track.media.header.timescale = 25;
        track.media.handler.handler_type = TrackType::Video;
        track.media.information.sample_table.description.stream_type = TrackType::Video;
        track
            .media
            .information
            .sample_table
            .description
            .video_entries
            .push(entry);

        let mut moov = Movie {
            header: MovieHeader {
                timescale: 25,
                next_track_id: 2,
                ..Default::default()
            },
            extends: MovieExtends {
                tracks: vec![TrackExtends {
                    track_id: 1,
                    ..Default::default()
                }],
                ..Default::default()
            },
            tracks: vec![track],
            pssh: vec![ProtectionSystemSpecificHeader {
                raw_box: crate::key_source::pssh_box_from_pssh_data(&[9, 9]),
                ..Default::default()
            }],
        };

        let parsed = round_trip(&mut moov);
        assert_eq!(parsed.tracks.len(), 1);
        assert_eq!(parsed.header.timescale, 25);
        assert_eq!(parsed.extends.tracks[0].track_id, 1);
        assert_eq!(parsed.pssh.len(), 1);
        let parsed_track = &parsed.tracks[0];
        assert_eq!(parsed_track.media.handler.handler_type, TrackType::Video);
        assert_eq!(
            parsed_track
                .media
                .information
                .sample_table
                .description
                .video_entries[0]
                .width,
            1280
        );
    }

    #[test]
    fn moof_full_round_trip() {
        let mut traf = TrackFragment::default();
        traf.header.track_id = 1;
        traf.header.flags = TrackFragmentHeader::DEFAULT_BASE_IS_MOOF
            | TrackFragmentHeader::DEFAULT_SAMPLE_DURATION_PRESENT;
        traf.header.default_sample_duration = 1;
        traf.decode_time.decode_time = 82;
        traf.runs.push(TrackFragmentRun {
            flags: TrackFragmentRun::DATA_OFFSET_PRESENT | TrackFragmentRun::SAMPLE_SIZE_PRESENT,
            sample_count: 2,
            data_offset: 200,
            sample_sizes: vec![7, 9],
            ..Default::default()
        });

        let mut moof = MovieFragment {
            header: MovieFragmentHeader {
                sequence_number: 4,
                ..Default::default()
            },
            tracks: vec![traf],
            pssh: Vec::new(),
        };

        let parsed = round_trip(&mut moof);
        assert_eq!(parsed.header.sequence_number, 4);
        assert_eq!(parsed.tracks[0].decode_time.decode_time, 82);
        assert_eq!(parsed.tracks[0].runs[0].sample_sizes, vec![7, 9]);
    }

    #[test]
    fn language_packing() {
        assert_eq!(unpack_language(pack_language("eng")), "eng");
        assert_eq!(unpack_language(pack_language("fra")), "fra");
        assert_eq!(pack_language(""), 0x55C4);
        assert_eq!(unpack_language(0x55C4), "und");
    }
}
