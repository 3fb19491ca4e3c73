//! MP4 muxer: builds `ftyp`/`moov` from the stream descriptions, owns the
//! segmenter, and drives the pull loop when muxing multiple streams from
//! one demuxer.

use std::sync::Arc;

use tracing::debug;

use super::boxes::{
    AudioSampleEntry, FileType, Movie, Track, TrackExtends, TrackType, VideoSampleEntry,
};
use super::es_descriptor::ObjectType;
use super::fourcc::FourCC;
use super::segmenter::{EncryptionConfig, Mp4Segmenter};
use crate::clock::{Clock, ISOM_TIME_OFFSET};
use crate::container::MediaContainer;
use crate::demuxer::Demuxer;
use crate::error::{Error, Result};
use crate::event::MuxerListener;
use crate::key_source::KeySource;
use crate::media_sample::MediaSample;
use crate::media_stream::MediaStreamOperation;
use crate::muxer_options::MuxerOptions;
use crate::stream_info::{AudioCodec, StreamInfo, StreamKind};

/// Muxes one or more elementary streams into fragmented MP4 output.
pub struct Mp4Muxer {
    options: MuxerOptions,
    /// Demuxer stream indices feeding this muxer, in track order.
    stream_ids: Vec<usize>,
    stream_infos: Vec<Arc<StreamInfo>>,
    segmenter: Option<Mp4Segmenter>,
    listener: Option<Box<dyn MuxerListener>>,
    encryption: Option<EncryptionConfig>,
    clock: Option<Box<dyn Clock>>,
    initialized: bool,
    finalized: bool,
    eos_streams: usize,
}

impl Mp4Muxer {
    pub fn new(options: MuxerOptions) -> Self {
        Self {
            options,
            stream_ids: Vec::new(),
            stream_infos: Vec::new(),
            segmenter: None,
            listener: None,
            encryption: None,
            clock: None,
            initialized: false,
            finalized: false,
            eos_streams: 0,
        }
    }

    /// Add one demuxer stream to this muxer. The stream must also be
    /// connected on the demuxer side.
    pub fn add_stream(&mut self, info: Arc<StreamInfo>, demuxer_stream_index: usize) {
        self.stream_ids.push(demuxer_stream_index);
        self.stream_infos.push(info);
    }

    /// Enable CENC encryption. Must be called before the first sample.
    pub fn set_key_source(
        &mut self,
        key_source: Arc<dyn KeySource>,
        max_sd_pixels: u32,
        clear_lead_in_seconds: f64,
        crypto_period_duration_in_seconds: f64,
    ) {
        self.encryption = Some(EncryptionConfig {
            key_source,
            max_sd_pixels,
            clear_lead_in_seconds,
            crypto_period_duration_in_seconds,
        });
    }

    pub fn set_muxer_listener(&mut self, listener: Box<dyn MuxerListener>) {
        self.listener = Some(listener);
    }

    /// Inject the wall clock used for creation/modification times. Without
    /// one, times are pinned to the epoch so output is reproducible.
    pub fn set_clock(&mut self, clock: Box<dyn Clock>) {
        self.clock = Some(clock);
    }

    fn iso_time_now(&self) -> u64 {
        match &self.clock {
            Some(clock) => ISOM_TIME_OFFSET + clock.now_unix_seconds(),
            None => 0,
        }
    }

    /// Pull-mode driver: rotates between this muxer's streams, switching
    /// whenever the segmenter reports the current fragment finalized, until
    /// every stream's queue has drained past end of file.
    pub fn run(&mut self, demuxer: &mut Demuxer) -> Result<()> {
        debug_assert!(!self.stream_ids.is_empty());
        demuxer.start_streams(MediaStreamOperation::Pull);

        let mut done = vec![false; self.stream_ids.len()];
        let mut current = 0usize;
        while !done.iter().all(|d| *d) {
            if done[current] {
                current = (current + 1) % self.stream_ids.len();
                continue;
            }
            let stream_id = self.stream_ids[current];
            let mut sample = match demuxer.pull_sample(stream_id) {
                Ok(sample) => sample,
                Err(e) if e.is_end_of_stream() => {
                    done[current] = true;
                    if let Some(segmenter) = self.segmenter.as_mut() {
                        segmenter.mark_stream_done(current)?;
                    }
                    continue;
                }
                Err(e) => return Err(e),
            };
            match self.add_sample(stream_id, &mut sample) {
                Ok(()) => {}
                Err(Error::FragmentFinalized) => {
                    // This stream's fragment is complete; give the sample
                    // back and let a peer catch up.
                    demuxer.unread_sample(stream_id, sample);
                    current = (current + 1) % self.stream_ids.len();
                }
                Err(e) => return Err(e),
            }
        }
        self.finalize()
    }

    /// Route one sample into the segmenter. An empty sample marks end of
    /// stream; the muxer finalizes once every stream has ended.
    pub fn add_sample(
        &mut self,
        demuxer_stream_index: usize,
        sample: &mut MediaSample,
    ) -> Result<()> {
        if !self.initialized {
            self.initialize()?;
            self.initialized = true;
        }
        let local_index = self
            .stream_ids
            .iter()
            .position(|id| *id == demuxer_stream_index)
            .ok_or_else(|| Error::muxer("sample for a stream not owned by this muxer"))?;
        if sample.is_end_of_stream() {
            if let Some(segmenter) = self.segmenter.as_mut() {
                segmenter.mark_stream_done(local_index)?;
            }
            self.fire_new_segment_events();
            self.eos_streams += 1;
            if self.eos_streams >= self.stream_ids.len() {
                return self.finalize();
            }
            return Ok(());
        }

        let segmenter = self
            .segmenter
            .as_mut()
            .ok_or_else(|| Error::muxer("muxer is not initialized"))?;
        let result = segmenter.add_sample(local_index, sample);
        self.fire_new_segment_events();
        result
    }

    fn initialize(&mut self) -> Result<()> {
        if self.stream_infos.is_empty() {
            return Err(Error::muxer("muxer has no streams"));
        }
        self.options.validate()?;

        let mut ftyp = FileType {
            major_brand: FourCC::DASH,
            minor_version: 0,
            compatible_brands: vec![FourCC::ISO6, FourCC::MP41],
        };
        if self.stream_infos.len() == 1 && self.stream_infos[0].is_video() {
            ftyp.compatible_brands.push(FourCC::AVC1);
        }

        let now = self.iso_time_now();
        let mut moov = Movie::default();
        moov.header.creation_time = now;
        moov.header.modification_time = now;
        moov.header.next_track_id = self.stream_infos.len() as u32 + 1;

        for (i, info) in self.stream_infos.iter().enumerate() {
            let track_id = (i + 1) as u32;
            let mut trak = Track::default();
            trak.header.track_id = track_id;
            trak.header.creation_time = now;
            trak.header.modification_time = now;
            trak.media.header.creation_time = now;
            trak.media.header.modification_time = now;
            trak.media.header.timescale = info.time_scale;
            trak.media.header.language = info.language.clone();

            match &info.kind {
                StreamKind::Video(video) => {
                    trak.header.width = u32::from(video.width) << 16;
                    trak.header.height = u32::from(video.height) << 16;
                    trak.media.handler.handler_type = TrackType::Video;

                    let mut entry = VideoSampleEntry {
                        format: FourCC::AVC1,
                        width: video.width,
                        height: video.height,
                        ..Default::default()
                    };
                    entry.avcc.set_data(info.extra_data.to_vec()).map_err(|_| {
                        Error::muxer("invalid AVC decoder configuration record")
                    })?;

                    let description = &mut trak.media.information.sample_table.description;
                    description.stream_type = TrackType::Video;
                    description.video_entries.push(entry);
                }
                StreamKind::Audio(audio) => {
                    trak.header.volume = 0x0100;
                    trak.media.handler.handler_type = TrackType::Audio;

                    let mut entry = AudioSampleEntry {
                        channel_count: u16::from(audio.num_channels),
                        sample_size: u16::from(audio.sample_bits),
                        sample_rate: audio.sampling_frequency,
                        ..Default::default()
                    };
                    match audio.codec {
                        AudioCodec::Aac => {
                            entry.format = FourCC::MP4A;
                            entry.esds.es_descriptor.set_esid(track_id as u16);
                            entry
                                .esds
                                .es_descriptor
                                .set_object_type(ObjectType::Iso14496_3);
                            entry
                                .esds
                                .es_descriptor
                                .set_decoder_specific_info(info.extra_data.to_vec());
                            entry
                                .esds
                                .aac_audio_specific_config
                                .parse(&info.extra_data)
                                .map_err(|_| {
                                    Error::muxer("invalid AAC audio specific config")
                                })?;
                        }
                        AudioCodec::Eac3 => {
                            entry.format = FourCC::EAC3;
                        }
                        AudioCodec::Unknown => {
                            return Err(Error::Unimplemented(
                                "cannot mux an unknown audio codec".into(),
                            ));
                        }
                    }

                    let description = &mut trak.media.information.sample_table.description;
                    description.stream_type = TrackType::Audio;
                    description.audio_entries.push(entry);
                }
            }

            moov.tracks.push(trak);
            moov.extends.tracks.push(TrackExtends {
                track_id,
                ..Default::default()
            });
        }

        let mut segmenter = Mp4Segmenter::new(self.options.clone(), ftyp, moov);
        segmenter.initialize(&self.stream_infos, self.encryption.as_ref())?;
        let time_scale = segmenter.reference_time_scale();
        self.segmenter = Some(segmenter);

        debug!(
            streams = self.stream_infos.len(),
            single_segment = self.options.single_segment,
            "muxer initialized"
        );
        if let Some(listener) = self.listener.as_mut() {
            listener.on_media_start(
                &self.options,
                &self.stream_infos,
                time_scale,
                MediaContainer::Mp4,
            );
        }
        Ok(())
    }

    /// Flush the remaining fragments and report the end of the media.
    pub fn finalize(&mut self) -> Result<()> {
        if self.finalized {
            return Ok(());
        }
        let segmenter = self
            .segmenter
            .as_mut()
            .ok_or_else(|| Error::muxer("muxer is not initialized"))?;
        segmenter.finalize()?;
        let init_range = segmenter.init_range();
        let index_range = segmenter.index_range();
        let duration_seconds = segmenter.duration_seconds();
        self.finalized = true;
        self.fire_new_segment_events();

        if let Some(listener) = self.listener.as_mut() {
            let file_size = std::fs::metadata(&self.options.output_file_name)
                .map(|m| m.len())
                .unwrap_or(0);
            listener.on_media_end(
                &self.stream_infos,
                init_range,
                index_range,
                duration_seconds,
                file_size,
            );
        }
        Ok(())
    }

    fn fire_new_segment_events(&mut self) {
        let Some(segmenter) = self.segmenter.as_mut() else {
            return;
        };
        let events = segmenter.drain_events();
        if let Some(listener) = self.listener.as_mut() {
            for event in events {
                listener.on_new_segment(
                    event.start_time,
                    event.duration,
                    event.segment_file_size,
                );
            }
        }
    }
}
