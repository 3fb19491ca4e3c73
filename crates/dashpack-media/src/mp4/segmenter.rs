//! Fragment and segment orchestration.
//!
//! The segmenter owns `moov`/`moof`/`sidx`, routes samples to per-track
//! fragmenters, enforces fragment/segment durations under SAP alignment, and
//! back-patches data and auxiliary offsets once the `moof` size is known.

use std::sync::Arc;

use tracing::debug;

use super::boxes::{
    FileType, MediaData, Movie, MovieFragment, ProtectionSystemSpecificHeader,
    SampleDescription, SapType, SegmentIndex, SegmentReference, TrackType,
};
use super::fourcc::FourCC;
use super::fragmenter::Fragmenter;
use super::multi_segment_segmenter::MultiSegmentSegmenter;
use super::single_segment_segmenter::SingleSegmentSegmenter;
use crate::buffer::BufferWriter;
use crate::error::{Error, Result};
use crate::key_source::{KeySource, TrackType as KeyTrackType};
use crate::media_sample::MediaSample;
use crate::muxer_options::MuxerOptions;
use crate::stream_info::StreamInfo;

// CENC scheme version, per ISO/IEC 23001-7.
const CENC_SCHEME_VERSION: u32 = 0x00010000;

const DEFAULT_IV_SIZE: u8 = 8;

/// Encryption parameters handed from the muxer to the segmenter.
pub struct EncryptionConfig {
    pub key_source: Arc<dyn KeySource>,
    /// Video tracks up to this many pixels use the SD key.
    pub max_sd_pixels: u32,
    pub clear_lead_in_seconds: f64,
    /// 0 disables key rotation.
    pub crypto_period_duration_in_seconds: f64,
}

/// A finished segment, reported up to the muxer listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewSegmentEvent {
    pub start_time: u64,
    pub duration: u64,
    pub segment_file_size: u64,
}

pub(crate) fn rescale(time: u64, old_scale: u32, new_scale: u32) -> u64 {
    if old_scale == 0 {
        return 0;
    }
    (time as f64 / old_scale as f64 * new_scale as f64) as u64
}

/// Collapse consecutive references into one covering their union.
pub(crate) fn collapse_references(references: &[SegmentReference]) -> SegmentReference {
    debug_assert!(!references.is_empty());
    let mut collapsed = references[0];
    let mut first_sap_time =
        u64::from(collapsed.sap_delta_time) + collapsed.earliest_presentation_time;

    for reference in &references[1..] {
        collapsed.referenced_size += reference.referenced_size;
        // The subsegment duration is the sum of the fragment durations, not
        // the presentation-time span.
        collapsed.subsegment_duration += reference.subsegment_duration;
        collapsed.earliest_presentation_time = collapsed
            .earliest_presentation_time
            .min(reference.earliest_presentation_time);
        if collapsed.sap_type == SapType::Unknown && reference.sap_type != SapType::Unknown {
            collapsed.sap_type = reference.sap_type;
            first_sap_time =
                u64::from(reference.sap_delta_time) + reference.earliest_presentation_time;
        }
    }
    if collapsed.sap_type != SapType::Unknown {
        collapsed.sap_delta_time =
            (first_sap_time - collapsed.earliest_presentation_time) as u32;
    }
    collapsed.starts_with_sap = references.iter().any(|r| r.starts_with_sap);
    collapsed
}

// Rewrite a sample description for CENC: the original entry becomes the
// protected entry (index 1); with a clear lead a duplicate clear entry is
// appended (index 2).
fn generate_encrypted_sample_entry(
    description: &mut SampleDescription,
    key_id: &[u8],
    iv_size: u8,
    clear_lead_in_seconds: f64,
) -> Result<()> {
    match description.stream_type {
        TrackType::Video => {
            if description.video_entries.len() != 1 {
                return Err(Error::muxer("expected exactly one video sample entry"));
            }
            if clear_lead_in_seconds > 0.0 {
                let clear_entry = description.video_entries[0].clone();
                description.video_entries.push(clear_entry);
            }
            let entry = &mut description.video_entries[0];
            entry.sinf.format.format = entry.format;
            entry.sinf.scheme_type.scheme_type = FourCC::CENC;
            entry.sinf.scheme_type.scheme_version = CENC_SCHEME_VERSION;
            entry.sinf.info.track_encryption.is_encrypted = true;
            entry.sinf.info.track_encryption.default_iv_size = iv_size;
            entry.sinf.info.track_encryption.default_kid = key_id.to_vec();
            entry.format = FourCC::ENCV;
        }
        TrackType::Audio => {
            if description.audio_entries.len() != 1 {
                return Err(Error::muxer("expected exactly one audio sample entry"));
            }
            if clear_lead_in_seconds > 0.0 {
                let clear_entry = description.audio_entries[0].clone();
                description.audio_entries.push(clear_entry);
            }
            let entry = &mut description.audio_entries[0];
            entry.sinf.format.format = entry.format;
            entry.sinf.scheme_type.scheme_type = FourCC::CENC;
            entry.sinf.scheme_type.scheme_version = CENC_SCHEME_VERSION;
            entry.sinf.info.track_encryption.is_encrypted = true;
            entry.sinf.info.track_encryption.default_iv_size = iv_size;
            entry.sinf.info.track_encryption.default_kid = key_id.to_vec();
            entry.format = FourCC::ENCA;
        }
        _ => {
            return Err(Error::muxer("cannot encrypt a non-audio/video track"));
        }
    }
    Ok(())
}

enum SegmentOutput {
    Single(SingleSegmentSegmenter),
    Multi(MultiSegmentSegmenter),
}

/// The MP4 segmenter, parameterized over on-demand vs. live output.
pub struct Mp4Segmenter {
    options: MuxerOptions,
    ftyp: FileType,
    moov: Movie,
    moof: MovieFragment,
    fragment_buffer: BufferWriter,
    sidx: SegmentIndex,
    fragmenters: Vec<Fragmenter>,
    segment_durations: Vec<u64>,
    stream_time_scales: Vec<u32>,
    /// Streams whose input has ended; they no longer hold up commits.
    stream_done: Vec<bool>,
    segment_initialized: bool,
    end_of_segment: bool,
    output: SegmentOutput,
    pending_events: Vec<NewSegmentEvent>,
}

impl Mp4Segmenter {
    pub fn new(options: MuxerOptions, ftyp: FileType, moov: Movie) -> Self {
        let output = if options.single_segment {
            SegmentOutput::Single(SingleSegmentSegmenter::new())
        } else {
            SegmentOutput::Multi(MultiSegmentSegmenter::new(&ftyp))
        };
        Self {
            options,
            ftyp,
            moov,
            moof: MovieFragment::default(),
            fragment_buffer: BufferWriter::new(),
            sidx: SegmentIndex::default(),
            fragmenters: Vec::new(),
            segment_durations: Vec::new(),
            stream_time_scales: Vec::new(),
            stream_done: Vec::new(),
            segment_initialized: false,
            end_of_segment: false,
            output,
            pending_events: Vec::new(),
        }
    }

    /// Build the per-stream fragmenters, rewrite sample descriptions for
    /// encryption, pick the `sidx` reference stream, and open the output.
    pub fn initialize(
        &mut self,
        streams: &[Arc<StreamInfo>],
        encryption: Option<&EncryptionConfig>,
    ) -> Result<()> {
        debug_assert!(!streams.is_empty());
        self.moof.header.sequence_number = 1;
        self.segment_durations = vec![0; streams.len()];
        self.stream_time_scales = streams.iter().map(|s| s.time_scale).collect();
        self.stream_done = vec![false; streams.len()];
        self.fragmenters.clear();

        for (i, stream) in streams.iter().enumerate() {
            let track_id = (i + 1) as u32;
            let mut nalu_length_size = 0;
            if let Some(video) = stream.video() {
                nalu_length_size = video.nalu_length_size;
                // The first video stream is the sidx reference stream.
                if self.sidx.reference_id == 0 {
                    self.sidx.reference_id = track_id;
                }
            }

            let fragmenter = match encryption {
                None => Fragmenter::new(track_id, self.options.normalize_presentation_timestamp),
                Some(config) => self.build_encrypting_fragmenter(
                    config,
                    stream,
                    i,
                    track_id,
                    nalu_length_size,
                )?,
            };
            self.fragmenters.push(fragmenter);
        }

        // No video stream: reference the first stream.
        if self.sidx.reference_id == 0 {
            self.sidx.reference_id = 1;
        }
        let reference_stream = (self.sidx.reference_id - 1) as usize;
        self.sidx.timescale = streams[reference_stream].time_scale;
        // The reference stream's time scale doubles as the movie time scale.
        self.moov.header.timescale = self.sidx.timescale;

        match &mut self.output {
            SegmentOutput::Single(single) => single.initialize(&self.options)?,
            SegmentOutput::Multi(multi) => {
                multi.initialize(&self.options, &mut self.ftyp, &mut self.moov)?
            }
        }
        Ok(())
    }

    fn build_encrypting_fragmenter(
        &mut self,
        config: &EncryptionConfig,
        stream: &Arc<StreamInfo>,
        stream_index: usize,
        track_id: u32,
        nalu_length_size: u8,
    ) -> Result<Fragmenter> {
        let track_type = if stream.is_audio() {
            KeyTrackType::Audio
        } else {
            let pixels = stream
                .video()
                .map(|v| u32::from(v.width) * u32::from(v.height))
                .unwrap_or(0);
            if pixels <= config.max_sd_pixels {
                KeyTrackType::Sd
            } else {
                KeyTrackType::Hd
            }
        };
        let time_scale = stream.time_scale;
        let clear_time = (config.clear_lead_in_seconds * time_scale as f64) as i64;
        let description = &mut self.moov.tracks[stream_index]
            .media
            .information
            .sample_table
            .description;

        if config.crypto_period_duration_in_seconds == 0.0 {
            let key = config.key_source.get_key(track_type)?;
            let iv_size = if key.iv.is_empty() {
                DEFAULT_IV_SIZE
            } else {
                key.iv.len() as u8
            };
            generate_encrypted_sample_entry(
                description,
                &key.key_id,
                iv_size,
                config.clear_lead_in_seconds,
            )?;
            // One and only one pssh box under moov.
            if self.moov.pssh.is_empty() {
                self.moov.pssh.push(ProtectionSystemSpecificHeader {
                    raw_box: key.pssh.to_vec(),
                    ..Default::default()
                });
            }
            Ok(Fragmenter::with_encryption(
                track_id,
                self.options.normalize_presentation_timestamp,
                key,
                clear_time,
                nalu_length_size,
            ))
        } else {
            // Key rotation: the track-level kid is a placeholder; the
            // per-fragment seig sample group carries the real key ids, and
            // pssh boxes travel in each moof instead of moov.
            generate_encrypted_sample_entry(
                description,
                &[0u8; 16],
                DEFAULT_IV_SIZE,
                config.clear_lead_in_seconds,
            )?;
            let crypto_period_ticks =
                (config.crypto_period_duration_in_seconds * time_scale as f64) as i64;
            Ok(Fragmenter::with_key_rotation(
                track_id,
                self.options.normalize_presentation_timestamp,
                Arc::clone(&config.key_source),
                track_type,
                crypto_period_ticks,
                clear_time,
                nalu_length_size,
            ))
        }
    }

    /// Route one sample to its fragmenter, closing the current fragment or
    /// segment first when duration and SAP constraints say so.
    ///
    /// Returns [`Error::FragmentFinalized`] without consuming the sample when
    /// this stream's fragment is complete but peers are still filling theirs;
    /// the pull loop re-queues the sample and switches streams.
    pub fn add_sample(&mut self, stream_id: usize, sample: &mut MediaSample) -> Result<()> {
        // First sample of a track also determines the trex default duration.
        if self.moov.extends.tracks[stream_id].default_sample_duration == 0 {
            self.moov.extends.tracks[stream_id].default_sample_duration =
                sample.duration() as u32;
        }

        if !self.segment_initialized {
            self.initialize_segment();
            self.segment_initialized = true;
        }

        if self.fragmenters[stream_id].fragment_finalized() {
            return Err(Error::FragmentFinalized);
        }

        let time_scale = self.stream_time_scales[stream_id] as f64;
        let mut finalize_fragment = false;
        if self.fragmenters[stream_id].fragment_duration() as f64
            >= self.options.fragment_duration * time_scale
        {
            if sample.is_key_frame() || !self.options.fragment_sap_aligned {
                finalize_fragment = true;
            }
        }
        if self.segment_durations[stream_id] as f64
            >= self.options.segment_duration * time_scale
        {
            if sample.is_key_frame() || !self.options.segment_sap_aligned {
                self.end_of_segment = true;
                finalize_fragment = true;
            }
        }

        if finalize_fragment {
            if !self.finalize_fragment(stream_id)? {
                // Peers still have open fragments; retry this sample later.
                return Err(Error::FragmentFinalized);
            }
            // A segment may have ended with that fragment; the triggering
            // sample belongs to the new segment and must count toward it.
            if !self.segment_initialized {
                self.initialize_segment();
                self.segment_initialized = true;
            }
        }

        self.fragmenters[stream_id].add_sample(sample)?;
        self.moov.tracks[stream_id].media.header.duration += sample.duration() as u64;
        self.segment_durations[stream_id] += sample.duration() as u64;
        Ok(())
    }

    /// Mark one stream's input as ended. Its open fragment, if any, is
    /// finalized so it cannot hold up the peers' commits.
    pub fn mark_stream_done(&mut self, stream_id: usize) -> Result<()> {
        if self.stream_done[stream_id] {
            return Ok(());
        }
        self.stream_done[stream_id] = true;
        if self.fragmenters[stream_id].fragment_initialized() {
            self.finalize_fragment(stream_id)?;
        } else if self.all_streams_ready()
            && self.fragmenters.iter().any(|f| f.fragment_finalized())
        {
            // This stream was the last straggler; peers are waiting.
            self.commit_fragment()?;
        }
        Ok(())
    }

    fn all_streams_ready(&self) -> bool {
        self.fragmenters
            .iter()
            .zip(&self.stream_done)
            .all(|(fragmenter, done)| fragmenter.fragment_finalized() || *done)
    }

    /// Drain all fragmenters and assemble the final output.
    pub fn finalize(&mut self) -> Result<()> {
        self.end_of_segment = true;
        for i in 0..self.fragmenters.len() {
            if !self.fragmenters[i].fragment_finalized() && !self.stream_done[i] {
                self.finalize_fragment(i)?;
            }
        }

        // Track and movie durations, rescaled to the movie time scale.
        let movie_timescale = self.moov.header.timescale;
        for track in &mut self.moov.tracks {
            track.header.duration = rescale(
                track.media.header.duration,
                track.media.header.timescale,
                movie_timescale,
            );
            if track.header.duration > self.moov.header.duration {
                self.moov.header.duration = track.header.duration;
            }
        }

        match &mut self.output {
            SegmentOutput::Single(single) => {
                single.finalize(&self.options, &mut self.ftyp, &mut self.moov)
            }
            SegmentOutput::Multi(_) => Ok(()),
        }
    }

    // Finalize one stream's fragment. Returns true if every stream was
    // ready and the whole movie fragment was committed to the buffer.
    fn finalize_fragment(&mut self, stream_id: usize) -> Result<bool> {
        self.fragmenters[stream_id].finalize_fragment();
        if !self.all_streams_ready() {
            return Ok(false);
        }
        self.commit_fragment()?;
        Ok(true)
    }

    fn commit_fragment(&mut self) -> Result<()> {
        let reference_stream = (self.sidx.reference_id - 1) as usize;
        let mut reference = self.fragmenters[reference_stream].generate_segment_reference();

        // Install the rotating key's pssh in the moof, if any.
        if let Some(pssh) = self
            .fragmenters
            .iter()
            .find_map(|f| f.moof_pssh().map(|p| p.to_vec()))
        {
            self.moof.pssh = vec![ProtectionSystemSpecificHeader {
                raw_box: pssh,
                ..Default::default()
            }];
        }

        // Tracks without samples (ended streams, exact boundaries) are left
        // out of the moof entirely. `track_map[k]` is the fragmenter behind
        // `moof.tracks[k]`.
        let mut track_map = Vec::with_capacity(self.fragmenters.len());
        let mut moof_tracks = Vec::with_capacity(self.fragmenters.len());
        for (i, fragmenter) in self.fragmenters.iter_mut().enumerate() {
            let traf = fragmenter.take_traf();
            let sample_count = traf.runs.first().map(|r| r.sample_count).unwrap_or(0);
            if sample_count > 0 {
                track_map.push(i);
                moof_tracks.push(traf);
            }
        }
        self.moof.tracks = moof_tracks;

        if self.moof.tracks.is_empty() {
            // Nothing accumulated since the last commit; do not emit an
            // empty fragment.
            for fragmenter in &mut self.fragmenters {
                fragmenter.reset();
            }
            if self.end_of_segment && !self.sidx.references.is_empty() {
                self.finalize_segment()?;
            }
            return Ok(());
        }

        // Patch data and auxiliary offsets now that the moof size is known.
        // Each track gets its own mdat; its header precedes the track data.
        let mut base = u64::from(self.moof.compute_size());
        for (k, traf) in self.moof.tracks.iter_mut().enumerate() {
            let fragmenter = &self.fragmenters[track_map[k]];
            base += u64::from(MediaData::HEADER_SIZE);
            if fragmenter.aux_data().size() > 0 {
                traf.auxiliary_offset.offsets[0] += base;
                base += fragmenter.aux_data().size() as u64;
            }
            let run = traf
                .runs
                .first_mut()
                .ok_or_else(|| Error::muxer("fragment without a track run"))?;
            let data_offset = base
                .checked_add(u64::from(run.data_offset))
                .filter(|v| *v <= u64::from(u32::MAX))
                .ok_or_else(|| Error::muxer("fragment data offset overflows 32 bits"))?;
            run.data_offset = data_offset as u32;
            base += fragmenter.data().size() as u64;
        }

        reference.referenced_size = base as u32;
        debug!(
            sequence = self.moof.header.sequence_number,
            size = base,
            duration = reference.subsegment_duration,
            "committing fragment"
        );
        self.sidx.references.push(reference);

        use super::box_buffer::Mp4Box;
        self.moof.write(&mut self.fragment_buffer)?;
        for fragmenter_index in &track_map {
            let fragmenter = &self.fragmenters[*fragmenter_index];
            let aux_size = fragmenter.aux_data().size();
            let data_size = fragmenter.data().size();
            let mdat = MediaData {
                data_size: (aux_size + data_size) as u32,
            };
            mdat.write_header(&mut self.fragment_buffer);
            if aux_size > 0 {
                self.fragment_buffer
                    .append_buffer(self.fragmenters[*fragmenter_index].aux_data());
            }
            self.fragment_buffer
                .append_buffer(self.fragmenters[*fragmenter_index].data());
        }

        self.moof.header.sequence_number += 1;
        for fragmenter in &mut self.fragmenters {
            fragmenter.reset();
        }

        if self.end_of_segment {
            self.finalize_segment()?;
        }
        Ok(())
    }

    fn initialize_segment(&mut self) {
        self.sidx.references.clear();
        self.end_of_segment = false;
        for duration in &mut self.segment_durations {
            *duration = 0;
        }
    }

    fn finalize_segment(&mut self) -> Result<()> {
        self.segment_initialized = false;
        let event = match &mut self.output {
            SegmentOutput::Single(single) => {
                single.finalize_segment(&mut self.sidx, &mut self.fragment_buffer)?
            }
            SegmentOutput::Multi(multi) => multi.finalize_segment(
                &self.options,
                &mut self.sidx,
                &mut self.fragment_buffer,
            )?,
        };
        self.pending_events.push(event);
        Ok(())
    }

    /// Segment events accumulated since the last call.
    pub fn drain_events(&mut self) -> Vec<NewSegmentEvent> {
        std::mem::take(&mut self.pending_events)
    }

    /// Byte range of `ftyp` + `moov` in the output file, if meaningful.
    pub fn init_range(&self) -> Option<(u64, u64)> {
        use super::box_buffer::Mp4Box;
        match &self.output {
            SegmentOutput::Single(_) => {
                let size =
                    u64::from(self.ftyp.compute_size()) + u64::from(self.moov.compute_size());
                Some((0, size - 1))
            }
            SegmentOutput::Multi(_) => None,
        }
    }

    /// Byte range of the `sidx` in the output file, if meaningful.
    pub fn index_range(&self) -> Option<(u64, u64)> {
        use super::box_buffer::Mp4Box;
        match &self.output {
            SegmentOutput::Single(single) => {
                let start =
                    u64::from(self.ftyp.compute_size()) + u64::from(self.moov.compute_size());
                let size = u64::from(single.vod_sidx()?.compute_size());
                Some((start, start + size - 1))
            }
            SegmentOutput::Multi(_) => None,
        }
    }

    pub fn reference_time_scale(&self) -> u32 {
        self.moov.header.timescale
    }

    /// Presentation duration in seconds.
    pub fn duration_seconds(&self) -> f64 {
        if self.moov.header.timescale == 0 {
            return 0.0;
        }
        self.moov.header.duration as f64 / self.moov.header.timescale as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference(
        size: u32,
        duration: u32,
        ept: u64,
        sap_type: SapType,
        sap_delta: u32,
        starts_with_sap: bool,
    ) -> SegmentReference {
        SegmentReference {
            reference_type: false,
            referenced_size: size,
            subsegment_duration: duration,
            starts_with_sap,
            sap_type,
            sap_delta_time: sap_delta,
            earliest_presentation_time: ept,
        }
    }

    #[test]
    fn collapse_sums_sizes_and_durations() {
        let refs = [
            reference(100, 50, 10, SapType::Type1, 0, true),
            reference(200, 50, 60, SapType::Type1, 0, true),
            reference(300, 25, 110, SapType::Type1, 0, true),
        ];
        let collapsed = collapse_references(&refs);
        assert_eq!(collapsed.referenced_size, 600);
        assert_eq!(collapsed.subsegment_duration, 125);
        assert_eq!(collapsed.earliest_presentation_time, 10);
        assert_eq!(collapsed.sap_type, SapType::Type1);
        assert_eq!(collapsed.sap_delta_time, 0);
        assert!(collapsed.starts_with_sap);
    }

    #[test]
    fn collapse_takes_first_known_sap() {
        let refs = [
            reference(10, 5, 100, SapType::Unknown, 0, false),
            reference(10, 5, 105, SapType::Type1, 2, true),
        ];
        let collapsed = collapse_references(&refs);
        assert_eq!(collapsed.sap_type, SapType::Type1);
        // First SAP is at 105 + 2; delta is relative to the collapsed EPT.
        assert_eq!(collapsed.sap_delta_time, 7);
        assert!(collapsed.starts_with_sap);
    }

    #[test]
    fn rescale_times() {
        assert_eq!(rescale(1000, 1000, 90000), 90000);
        assert_eq!(rescale(25, 25, 1000), 1000);
        assert_eq!(rescale(0, 25, 1000), 0);
        assert_eq!(rescale(10, 0, 1000), 0);
    }
}
