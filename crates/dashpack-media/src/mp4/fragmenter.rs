//! Per-track fragment accumulator.
//!
//! Collects samples for one track into a `traf` plus its payload, applying
//! CENC encryption on the way in when configured. Supports a fixed key, a
//! clear lead, and key rotation at fragment boundaries.

use std::sync::Arc;

use super::boxes::{
    CencSampleEncryptionInfoEntry, SampleToGroupEntry, SegmentReference, SapType, TrackFragment,
    TrackFragmentHeader, TrackFragmentRun,
};
use super::cenc::FrameCencInfo;
use super::fourcc::FourCC;
use crate::buffer::BufferWriter;
use crate::crypto::AesCtrEncryptor;
use crate::error::{Error, Result};
use crate::key_source::{EncryptionKey, KeySource, TrackType};
use crate::media_sample::{MediaSample, SubsampleEntry};

const INVALID_TIME: i64 = i64::MAX;

// Generate a 64-bit IV when the key carries none.
const DEFAULT_IV_SIZE: usize = 8;

// With a clear lead, the stsd carries two entries; the clear one is always
// the second.
const CLEAR_SAMPLE_DESCRIPTION_INDEX: u32 = 2;

/// If every entry equals the first, move that value into `default_value`,
/// drop the table and return true; otherwise leave the table alone.
pub(crate) fn optimize_sample_entries<T: PartialEq + Copy>(
    entries: &mut Vec<T>,
    default_value: &mut T,
) -> bool {
    let Some(first) = entries.first().copied() else {
        return false;
    };
    if entries.iter().any(|e| *e != first) {
        return false;
    }
    *default_value = first;
    entries.clear();
    true
}

// Key rotation state; at most one key is active per fragment.
struct KeyRotation {
    key_source: Arc<dyn KeySource>,
    track_type: TrackType,
    crypto_period_duration: i64,
    prev_period_index: Option<u32>,
}

// Encryption state of a fragmenter.
struct FragmentEncryption {
    key: EncryptionKey,
    encryptor: Option<AesCtrEncryptor>,
    /// Remaining clear lead in track ticks; encryption starts once this
    /// drops to zero or below.
    clear_time: i64,
    nalu_length_size: u8,
    rotation: Option<KeyRotation>,
    /// pssh bytes to install in the parent `moof` (key rotation only).
    moof_pssh: Option<Vec<u8>>,
}

/// Accumulates the samples of one track into a track fragment.
pub struct Fragmenter {
    track_id: u32,
    traf: TrackFragment,
    data: BufferWriter,
    aux_data: BufferWriter,
    fragment_initialized: bool,
    fragment_finalized: bool,
    fragment_duration: u64,
    normalize_presentation_timestamp: bool,
    presentation_start_time: i64,
    earliest_presentation_time: i64,
    first_sap_time: i64,
    encryption: Option<FragmentEncryption>,
}

impl Fragmenter {
    pub fn new(track_id: u32, normalize_presentation_timestamp: bool) -> Self {
        Self {
            track_id,
            traf: TrackFragment::default(),
            data: BufferWriter::new(),
            aux_data: BufferWriter::new(),
            fragment_initialized: false,
            fragment_finalized: false,
            fragment_duration: 0,
            normalize_presentation_timestamp,
            presentation_start_time: INVALID_TIME,
            earliest_presentation_time: INVALID_TIME,
            first_sap_time: INVALID_TIME,
            encryption: None,
        }
    }

    /// Fragmenter encrypting with one fixed key after `clear_time` ticks of
    /// clear lead. `nalu_length_size > 0` enables AVC subsample encryption.
    pub fn with_encryption(
        track_id: u32,
        normalize_presentation_timestamp: bool,
        key: EncryptionKey,
        clear_time: i64,
        nalu_length_size: u8,
    ) -> Self {
        let mut fragmenter = Self::new(track_id, normalize_presentation_timestamp);
        fragmenter.encryption = Some(FragmentEncryption {
            key,
            encryptor: None,
            clear_time,
            nalu_length_size,
            rotation: None,
            moof_pssh: None,
        });
        fragmenter
    }

    /// Fragmenter rotating keys every `crypto_period_duration` ticks; keys
    /// are fetched from `key_source` per crypto period.
    pub fn with_key_rotation(
        track_id: u32,
        normalize_presentation_timestamp: bool,
        key_source: Arc<dyn KeySource>,
        track_type: TrackType,
        crypto_period_duration: i64,
        clear_time: i64,
        nalu_length_size: u8,
    ) -> Self {
        let mut fragmenter = Self::new(track_id, normalize_presentation_timestamp);
        fragmenter.encryption = Some(FragmentEncryption {
            key: EncryptionKey {
                key_id: Default::default(),
                key: Default::default(),
                iv: Default::default(),
                pssh: Default::default(),
            },
            encryptor: None,
            clear_time,
            nalu_length_size,
            rotation: Some(KeyRotation {
                key_source,
                track_type,
                crypto_period_duration,
                prev_period_index: None,
            }),
            moof_pssh: None,
        });
        fragmenter
    }

    /// Append one sample. Initializes the fragment lazily from the first
    /// sample's DTS. Encryption rewrites the sample payload in place.
    pub fn add_sample(&mut self, sample: &mut MediaSample) -> Result<()> {
        if sample.duration() <= 0 {
            return Err(Error::muxer(format!(
                "sample duration must be positive, got {}",
                sample.duration()
            )));
        }
        if !self.fragment_initialized {
            self.initialize_fragment(sample.dts())?;
        }

        if let Some(encryption) = self.encryption.as_mut() {
            if encryption.encryptor.is_some() {
                encrypt_sample(encryption, &mut self.traf, &mut self.aux_data, sample)?;
            }
        }

        let run = &mut self.traf.runs[0];
        run.sample_sizes.push(sample.data_size() as u32);
        run.sample_durations.push(sample.duration() as u32);
        run.sample_flags.push(if sample.is_key_frame() {
            0
        } else {
            TrackFragmentHeader::NON_KEY_SAMPLE_MASK
        });

        self.data.append_slice(sample.data());
        self.fragment_duration += sample.duration() as u64;

        let mut pts = sample.pts();
        if self.normalize_presentation_timestamp {
            // Some players reject non-zero presentation start times.
            if self.presentation_start_time == INVALID_TIME {
                self.presentation_start_time = pts;
                pts = 0;
            } else {
                pts -= self.presentation_start_time;
            }
        }

        if self.earliest_presentation_time > pts {
            self.earliest_presentation_time = pts;
        }

        let run = &mut self.traf.runs[0];
        run.sample_composition_time_offsets
            .push((pts - sample.dts()) as i32);
        if pts != sample.dts() {
            run.flags |= TrackFragmentRun::SAMPLE_COMP_TIME_OFFSETS_PRESENT;
        }

        if sample.is_key_frame() && self.first_sap_time == INVALID_TIME {
            self.first_sap_time = pts;
        }
        Ok(())
    }

    fn initialize_fragment(&mut self, first_sample_dts: i64) -> Result<()> {
        self.fragment_initialized = true;
        self.fragment_finalized = false;

        self.traf = TrackFragment::default();
        self.traf.header.track_id = self.track_id;
        self.traf.header.flags = TrackFragmentHeader::DEFAULT_BASE_IS_MOOF;
        self.traf.decode_time.decode_time = first_sample_dts as u64;
        self.traf.runs.push(TrackFragmentRun {
            flags: TrackFragmentRun::DATA_OFFSET_PRESENT,
            ..Default::default()
        });

        self.fragment_duration = 0;
        self.earliest_presentation_time = INVALID_TIME;
        self.first_sap_time = INVALID_TIME;
        self.data.clear();
        self.aux_data.clear();

        if self.encryption.is_some() {
            let clear = self
                .encryption
                .as_ref()
                .map(|e| e.clear_time > 0)
                .unwrap_or(false);
            if clear {
                // Still inside the clear lead: samples reference the clear
                // sample description entry.
                self.traf.header.flags |=
                    TrackFragmentHeader::SAMPLE_DESCRIPTION_INDEX_PRESENT;
                self.traf.header.sample_description_index = CLEAR_SAMPLE_DESCRIPTION_INDEX;
            } else {
                self.prepare_fragment_for_encryption()?;
            }
        }
        Ok(())
    }

    fn prepare_fragment_for_encryption(&mut self) -> Result<()> {
        self.traf.auxiliary_size.sample_info_sizes.clear();
        self.traf.auxiliary_offset.offsets.clear();

        let Some(encryption) = self.encryption.as_mut() else {
            return Ok(());
        };

        if let Some(rotation) = encryption.rotation.as_mut() {
            let current_period = (self.traf.decode_time.decode_time
                / rotation.crypto_period_duration.max(1) as u64)
                as u32;
            if rotation.prev_period_index != Some(current_period) {
                encryption.key = rotation
                    .key_source
                    .get_crypto_period_key(current_period, rotation.track_type)?;
                encryption.encryptor = None;
                rotation.prev_period_index = Some(current_period);
            }
        }

        if encryption.encryptor.is_none() {
            let encryptor = if encryption.key.iv.is_empty() {
                AesCtrEncryptor::with_random_iv(&encryption.key.key, DEFAULT_IV_SIZE)
            } else {
                AesCtrEncryptor::with_iv(&encryption.key.key, &encryption.key.iv)
            }
            .map_err(|_| Error::muxer("failed to create the encryptor"))?;
            encryption.encryptor = Some(encryptor);
        }

        if encryption.rotation.is_some() {
            let iv_size = encryption
                .encryptor
                .as_ref()
                .map(|e| e.iv().len() as u8)
                .unwrap_or(DEFAULT_IV_SIZE as u8);

            // Key rotation happens on fragment boundaries only, so exactly
            // one group description entry and one mapping entry exist per
            // fragment.
            let sgpd = &mut self.traf.sample_group_description;
            sgpd.grouping_type = FourCC::SEIG.as_u32();
            sgpd.entries = vec![CencSampleEncryptionInfoEntry {
                is_encrypted: true,
                iv_size,
                key_id: encryption.key.key_id.to_vec(),
            }];

            let sbgp = &mut self.traf.sample_to_group;
            sbgp.grouping_type = FourCC::SEIG.as_u32();
            sbgp.entries = vec![SampleToGroupEntry {
                // sample_count is fixed up in finalize_fragment.
                sample_count: 0,
                group_description_index:
                    SampleToGroupEntry::TRACK_FRAGMENT_GROUP_DESCRIPTION_INDEX_BASE + 1,
            }];

            encryption.moof_pssh = Some(encryption.key.pssh.to_vec());
        }
        Ok(())
    }

    /// Close the current fragment: apply the default-field optimization and
    /// finish the auxiliary information tables.
    pub fn finalize_fragment(&mut self) {
        let was_initialized = self.fragment_initialized;
        if !was_initialized {
            // Nothing was added since the last reset; produce an empty,
            // finalized fragment so the segmenter can drain uniformly.
            self.traf = TrackFragment::default();
            self.traf.header.track_id = self.track_id;
            self.traf.header.flags = TrackFragmentHeader::DEFAULT_BASE_IS_MOOF;
            self.traf.runs.push(TrackFragmentRun {
                flags: TrackFragmentRun::DATA_OFFSET_PRESENT,
                ..Default::default()
            });
            self.data.clear();
            self.aux_data.clear();
            self.fragment_duration = 0;
        }

        let encrypted = self
            .encryption
            .as_ref()
            .map(|e| e.encryptor.is_some())
            .unwrap_or(false);
        if encrypted && was_initialized {
            // The offset is patched by the segmenter once the moof size is
            // known.
            self.traf.auxiliary_offset.offsets.push(0);

            let sample_count = self.traf.runs[0].sample_sizes.len() as u32;
            let saiz = &mut self.traf.auxiliary_size;
            saiz.sample_count = sample_count;
            if !saiz.sample_info_sizes.is_empty() {
                if !optimize_sample_entries(
                    &mut saiz.sample_info_sizes,
                    &mut saiz.default_sample_info_size,
                ) {
                    saiz.default_sample_info_size = 0;
                }
            } else {
                // Without subsamples each sample's aux info is just its IV.
                saiz.default_sample_info_size = self
                    .encryption
                    .as_ref()
                    .and_then(|e| e.encryptor.as_ref())
                    .map(|e| e.iv().len() as u8)
                    .unwrap_or(DEFAULT_IV_SIZE as u8);
            }

            if !self.traf.sample_to_group.entries.is_empty() {
                self.traf.sample_to_group.entries[0].sample_count = sample_count;
            }
        } else if was_initialized && !encrypted {
            if let Some(encryption) = self.encryption.as_mut() {
                encryption.clear_time -= self.fragment_duration as i64;
            }
        }

        let run = &mut self.traf.runs[0];
        run.sample_count = run.sample_sizes.len() as u32;
        let header = &mut self.traf.header;
        if optimize_sample_entries(
            &mut run.sample_durations,
            &mut header.default_sample_duration,
        ) {
            header.flags |= TrackFragmentHeader::DEFAULT_SAMPLE_DURATION_PRESENT;
        } else {
            run.flags |= TrackFragmentRun::SAMPLE_DURATION_PRESENT;
        }
        if optimize_sample_entries(&mut run.sample_sizes, &mut header.default_sample_size) {
            header.flags |= TrackFragmentHeader::DEFAULT_SAMPLE_SIZE_PRESENT;
        } else {
            run.flags |= TrackFragmentRun::SAMPLE_SIZE_PRESENT;
        }
        if optimize_sample_entries(&mut run.sample_flags, &mut header.default_sample_flags) {
            header.flags |= TrackFragmentHeader::DEFAULT_SAMPLE_FLAGS_PRESENT;
        } else {
            run.flags |= TrackFragmentRun::SAMPLE_FLAGS_PRESENT;
        }

        self.fragment_finalized = true;
        self.fragment_initialized = false;
    }

    /// Segment reference for this finalized fragment. `referenced_size` is
    /// filled in by the segmenter.
    pub fn generate_segment_reference(&self) -> SegmentReference {
        let earliest = if self.earliest_presentation_time == INVALID_TIME {
            0
        } else {
            self.earliest_presentation_time as u64
        };
        let (sap_type, sap_delta_time) = if self.first_sap_time == INVALID_TIME {
            (SapType::Unknown, 0)
        } else {
            (
                SapType::Type1,
                (self.first_sap_time - self.earliest_presentation_time) as u32,
            )
        };
        SegmentReference {
            reference_type: false,
            referenced_size: 0,
            subsegment_duration: self.fragment_duration as u32,
            starts_with_sap: self.starts_with_sap(),
            sap_type,
            sap_delta_time,
            earliest_presentation_time: earliest,
        }
    }

    fn starts_with_sap(&self) -> bool {
        let Some(run) = self.traf.runs.first() else {
            return false;
        };
        let first_sample_flags = if run.flags & TrackFragmentRun::SAMPLE_FLAGS_PRESENT != 0 {
            match run.sample_flags.first() {
                Some(flags) => *flags,
                None => return false,
            }
        } else {
            self.traf.header.default_sample_flags
        };
        first_sample_flags & TrackFragmentHeader::NON_KEY_SAMPLE_MASK == 0
    }

    /// Hand the finished `traf` to the segmenter, leaving a default in its
    /// place.
    pub fn take_traf(&mut self) -> TrackFragment {
        std::mem::take(&mut self.traf)
    }

    /// Make the fragmenter ready for the next fragment.
    pub fn reset(&mut self) {
        self.fragment_initialized = false;
        self.fragment_finalized = false;
    }

    pub fn fragment_finalized(&self) -> bool {
        self.fragment_finalized
    }

    pub fn fragment_initialized(&self) -> bool {
        self.fragment_initialized
    }

    pub fn fragment_duration(&self) -> u64 {
        self.fragment_duration
    }

    pub fn data(&self) -> &BufferWriter {
        &self.data
    }

    pub fn aux_data(&self) -> &BufferWriter {
        &self.aux_data
    }

    /// pssh bytes the parent `moof` must carry for the current key, if any.
    pub fn moof_pssh(&self) -> Option<&[u8]> {
        self.encryption
            .as_ref()
            .and_then(|e| e.moof_pssh.as_deref())
    }
}

// Encrypt one sample in place and emit its aux info entry.
fn encrypt_sample(
    encryption: &mut FragmentEncryption,
    traf: &mut TrackFragment,
    aux_data: &mut BufferWriter,
    sample: &mut MediaSample,
) -> Result<()> {
    let encryptor = encryption
        .encryptor
        .as_mut()
        .ok_or_else(|| Error::muxer("encryptor not initialized"))?;

    let mut cenc_info = FrameCencInfo::new(encryptor.iv().to_vec());
    if encryption.nalu_length_size == 0 {
        encryptor.encrypt(sample.data_mut());
    } else {
        let nalu_length_size = encryption.nalu_length_size as usize;
        let data = sample.data_mut();
        let mut pos = 0;
        while pos < data.len() {
            if pos + nalu_length_size > data.len() {
                return Err(Error::muxer("failed to read NAL unit length"));
            }
            let mut nalu_length = 0usize;
            for byte in &data[pos..pos + nalu_length_size] {
                nalu_length = (nalu_length << 8) | usize::from(*byte);
            }
            if nalu_length == 0 || pos + nalu_length_size + nalu_length > data.len() {
                return Err(Error::muxer("sample size does not match NAL unit length"));
            }

            // The length field plus the one-byte NAL header stay clear.
            let clear_bytes = nalu_length_size + 1;
            let cipher_start = pos + clear_bytes;
            let cipher_end = pos + nalu_length_size + nalu_length;
            encryptor.encrypt(&mut data[cipher_start..cipher_end]);

            cenc_info.add_subsample(SubsampleEntry {
                clear_bytes: clear_bytes as u16,
                cipher_bytes: (nalu_length - 1) as u32,
            });
            pos += nalu_length_size + nalu_length;
        }
        traf.auxiliary_size
            .sample_info_sizes
            .push(cenc_info.compute_size() as u8);
    }

    cenc_info.write(aux_data);
    encryptor.update_iv();
    Ok(())
}
