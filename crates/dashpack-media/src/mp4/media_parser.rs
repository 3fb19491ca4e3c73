//! Incremental ISO BMFF media parser.
//!
//! Bytes are appended to an offset-tracking queue; the parser alternates
//! between top-level box dispatch and draining samples from the current
//! fragment. The `moof` at the head of the queue is retained until all of
//! its samples are emitted, because auxiliary info is addressed relative to
//! it; `mdat` bytes are released as soon as they have been peeked.

use tracing::{debug, warn};

use super::box_buffer::Mp4Box;
use super::box_reader::BoxReader;
use super::boxes::{Movie, MovieFragment, ProtectionSystemSpecificHeader, TrackType};
use super::fourcc::FourCC;
use super::track_run_iterator::TrackRunIterator;
use crate::byte_queue::OffsetByteQueue;
use crate::container::MediaContainer;
use crate::error::{Error, Result};
use crate::media_parser::{MediaParser, ParserEventHandler};
use crate::media_sample::MediaSample;
use crate::stream_info::{
    audio_codec_string, video_codec_string, AudioCodec, AudioStreamInfo, StreamInfo, StreamKind,
    VideoCodec, VideoStreamInfo,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    ParsingBoxes,
    EmittingSamples,
    Error,
}

/// Parser for fragmented and progressive MP4.
pub struct Mp4MediaParser {
    state: State,
    queue: OffsetByteQueue,
    runs: Option<TrackRunIterator>,
    moof_head: u64,
    mdat_tail: u64,
    audio_track_id: Option<u32>,
    video_track_id: Option<u32>,
}

impl Default for Mp4MediaParser {
    fn default() -> Self {
        Self::new()
    }
}

impl Mp4MediaParser {
    pub fn new() -> Self {
        Self {
            state: State::ParsingBoxes,
            queue: OffsetByteQueue::new(),
            runs: None,
            moof_head: 0,
            mdat_tail: 0,
            audio_track_id: None,
            video_track_id: None,
        }
    }

    fn parse_inner(&mut self, buf: &[u8], handler: &mut dyn ParserEventHandler) -> Result<()> {
        self.queue.push(buf);
        loop {
            let made_progress = match self.state {
                State::ParsingBoxes => self.parse_box(handler)?,
                State::EmittingSamples => {
                    let progressed = self.enqueue_sample(handler)?;
                    if progressed {
                        let max_clear = self
                            .runs
                            .as_ref()
                            .map(|r| r.get_max_clear_offset())
                            .unwrap_or(i64::MAX);
                        let watermark = if max_clear == i64::MAX {
                            self.mdat_tail
                        } else {
                            (max_clear.max(0) as u64).saturating_add(self.moof_head)
                        };
                        self.read_and_discard_mdats_until(watermark)?;
                    }
                    progressed
                }
                State::Error => return Err(Error::parser("parser is in the error state")),
            };
            if !made_progress {
                return Ok(());
            }
        }
    }

    fn parse_box(&mut self, handler: &mut dyn ParserEventHandler) -> Result<bool> {
        let head = self.queue.head();
        let buf = self.queue.peek();
        if buf.is_empty() {
            return Ok(false);
        }
        let Some((fourcc, size)) = BoxReader::start_top_level_box(buf)? else {
            return Ok(false);
        };
        if (buf.len() as u64) < size {
            return Ok(false); // need more data
        }
        self.mdat_tail = head + size;

        match fourcc {
            FourCC::MOOV => {
                // Metadata boxes are small; work on a copy so the queue can
                // keep growing underneath.
                let box_bytes = self.queue.peek()[..size as usize].to_vec();
                let mut reader = BoxReader::for_box(&box_bytes)?;
                self.parse_moov(&mut reader, handler)?;
            }
            FourCC::MOOF => {
                let box_bytes = self.queue.peek()[..size as usize].to_vec();
                let mut reader = BoxReader::for_box(&box_bytes)?;
                self.moof_head = head;
                self.parse_moof(&mut reader, handler)?;
                // Do not evict the moof: auxiliary info may be addressed
                // anywhere inside it.
                return Ok(true);
            }
            other => {
                debug!(%other, "skipping top-level box");
            }
        }

        self.queue.trim(head + size);
        Ok(true)
    }

    fn parse_moov(
        &mut self,
        reader: &mut BoxReader<'_>,
        handler: &mut dyn ParserEventHandler,
    ) -> Result<()> {
        let mut moov = Movie::default();
        moov.parse(reader)?;

        let mut streams = Vec::new();
        for track in &moov.tracks {
            let timescale = track.media.header.timescale;

            // Infer duration: media header, else movie-level fragment
            // duration, else movie duration, rescaled into track ticks.
            let duration = if track.media.header.duration > 0 {
                track.media.header.duration
            } else if moov.extends.header.fragment_duration > 0 {
                super::segmenter::rescale(
                    moov.extends.header.fragment_duration,
                    moov.header.timescale,
                    timescale,
                )
            } else if moov.header.duration > 0 && moov.header.duration != u64::MAX {
                super::segmenter::rescale(moov.header.duration, moov.header.timescale, timescale)
            } else {
                0
            };

            let description = &track.media.information.sample_table.description;

            // Sample description index from trex when present, else from the
            // first sample-to-chunk entry.
            let one_based_index = if !moov.extends.tracks.is_empty() {
                moov.extends
                    .tracks
                    .iter()
                    .find(|t| t.track_id == track.header.track_id)
                    .map(|t| t.default_sample_description_index)
                    .unwrap_or(1)
            } else {
                let chunk_info = &track.media.information.sample_table.sample_to_chunk.chunk_info;
                if chunk_info.is_empty() {
                    return Err(Error::parser("missing sample to chunk table"));
                }
                chunk_info[0].sample_description_index
            };
            if one_based_index == 0 {
                return Err(Error::parser("invalid sample description index 0"));
            }
            let mut desc_idx = (one_based_index - 1) as usize;

            match track.media.handler.handler_type {
                TrackType::Audio => {
                    if self.audio_track_id.is_some() {
                        return Err(Error::parser("more than one audio track"));
                    }
                    if description.audio_entries.is_empty() {
                        return Err(Error::parser("audio track without sample entries"));
                    }
                    // Some otherwise-valid files carry bad indices.
                    if desc_idx >= description.audio_entries.len() {
                        desc_idx = 0;
                    }
                    let entry = &description.audio_entries[desc_idx];

                    let effective_format = if entry.format == FourCC::ENCA {
                        entry.sinf.format.format
                    } else {
                        entry.format
                    };
                    if effective_format != FourCC::MP4A && effective_format != FourCC::EAC3 {
                        return Err(Error::Unimplemented(format!(
                            "unsupported audio format '{}' in stsd box",
                            entry.format
                        )));
                    }

                    use super::es_descriptor::ObjectType;
                    let mut object_type = entry.esds.es_descriptor.object_type();
                    if object_type == ObjectType::Forbidden && effective_format == FourCC::EAC3 {
                        object_type = ObjectType::Eac3;
                    }

                    let is_encrypted = entry.sinf.info.track_encryption.is_encrypted;
                    let info = if entry.esds.es_descriptor.is_aac() {
                        let aac = &entry.esds.aac_audio_specific_config;
                        StreamInfo {
                            track_id: track.header.track_id,
                            time_scale: timescale,
                            duration,
                            codec_string: audio_codec_string(
                                AudioCodec::Aac,
                                aac.audio_object_type(),
                            ),
                            language: track.media.header.language.clone(),
                            extra_data: entry
                                .esds
                                .es_descriptor
                                .decoder_specific_info()
                                .to_vec()
                                .into(),
                            is_encrypted,
                            kind: StreamKind::Audio(AudioStreamInfo {
                                codec: AudioCodec::Aac,
                                sample_bits: entry.sample_size as u8,
                                num_channels: aac.num_channels(),
                                sampling_frequency: aac.frequency(),
                            }),
                        }
                    } else if object_type == ObjectType::Eac3 {
                        StreamInfo {
                            track_id: track.header.track_id,
                            time_scale: timescale,
                            duration,
                            codec_string: audio_codec_string(AudioCodec::Eac3, 0),
                            language: track.media.header.language.clone(),
                            extra_data: Default::default(),
                            is_encrypted,
                            kind: StreamKind::Audio(AudioStreamInfo {
                                codec: AudioCodec::Eac3,
                                sample_bits: entry.sample_size as u8,
                                num_channels: entry.channel_count as u8,
                                sampling_frequency: entry.sample_rate,
                            }),
                        }
                    } else {
                        return Err(Error::Unimplemented(format!(
                            "unsupported audio object type {:#x} in esds",
                            object_type.as_u8()
                        )));
                    };
                    self.audio_track_id = Some(track.header.track_id);
                    streams.push(info);
                }
                TrackType::Video => {
                    if self.video_track_id.is_some() {
                        return Err(Error::parser("more than one video track"));
                    }
                    if description.video_entries.is_empty() {
                        return Err(Error::parser("video track without sample entries"));
                    }
                    if desc_idx >= description.video_entries.len() {
                        desc_idx = 0;
                    }
                    let entry = &description.video_entries[desc_idx];

                    let effective_format = if entry.format == FourCC::ENCV {
                        entry.sinf.format.format
                    } else {
                        entry.format
                    };
                    if effective_format != FourCC::AVC1 {
                        return Err(Error::Unimplemented(format!(
                            "unsupported video format '{}' in stsd box",
                            entry.format
                        )));
                    }

                    let is_encrypted = entry.sinf.info.track_encryption.is_encrypted;
                    let info = StreamInfo {
                        track_id: track.header.track_id,
                        time_scale: timescale,
                        duration,
                        codec_string: video_codec_string(
                            VideoCodec::H264,
                            entry.avcc.profile_indication,
                            entry.avcc.profile_compatibility,
                            entry.avcc.avc_level,
                        ),
                        language: track.media.header.language.clone(),
                        extra_data: entry.avcc.data.clone().into(),
                        is_encrypted,
                        kind: StreamKind::Video(VideoStreamInfo {
                            codec: VideoCodec::H264,
                            width: entry.width,
                            height: entry.height,
                            nalu_length_size: entry.avcc.length_size,
                        }),
                    };
                    self.video_track_id = Some(track.header.track_id);
                    streams.push(info);
                }
                other => {
                    warn!(?other, track_id = track.header.track_id, "skipping track");
                }
            }
        }

        handler.on_streams_ready(streams)?;
        emit_need_key(&moov.pssh, handler)?;

        let mut runs = TrackRunIterator::new(&moov);
        runs.init()?;
        self.runs = Some(runs);
        self.state = State::EmittingSamples;
        Ok(())
    }

    fn parse_moof(
        &mut self,
        reader: &mut BoxReader<'_>,
        handler: &mut dyn ParserEventHandler,
    ) -> Result<()> {
        let runs = self
            .runs
            .as_mut()
            .ok_or_else(|| Error::parser("moof before moov"))?;
        let mut moof = MovieFragment::default();
        moof.parse(reader)?;
        runs.init_fragment(&moof)?;
        emit_need_key(&moof.pssh, handler)?;
        self.state = State::EmittingSamples;
        Ok(())
    }

    // Emit the next sample (or cache aux info). Returns false when more
    // input bytes are needed.
    fn enqueue_sample(&mut self, handler: &mut dyn ParserEventHandler) -> Result<bool> {
        let Some(runs) = self.runs.as_mut() else {
            return Err(Error::parser("no track run iterator"));
        };

        if !runs.is_run_valid() {
            // Discard data until the end of the current mdat is in the
            // queue, then return to box parsing.
            if !self.queue.trim(self.mdat_tail) {
                return Ok(false);
            }
            self.state = State::ParsingBoxes;
            return Ok(true);
        }

        if !runs.is_sample_valid() {
            runs.advance_run();
            return Ok(true);
        }

        let track_id = runs.track_id();
        let audio = self.audio_track_id == Some(track_id);
        let video = self.video_track_id == Some(track_id);
        if !audio && !video {
            runs.advance_run();
            return Ok(true);
        }

        // Cache aux info first so sample data below it can be released.
        if runs.aux_info_needs_to_be_cached() {
            let offset = (runs.aux_info_offset().max(0) as u64).saturating_add(self.moof_head);
            let buf = self.queue.peek_at(offset);
            if buf.len() < runs.aux_info_size() {
                return Ok(false);
            }
            runs.cache_aux_info(buf)?;
            return Ok(true);
        }

        let offset = (runs.sample_offset().max(0) as u64).saturating_add(self.moof_head);
        let buf = self.queue.peek_at(offset);
        let sample_size = runs.sample_size() as usize;
        if buf.len() < sample_size {
            return Ok(false);
        }

        let mut sample = MediaSample::copy_from(&buf[..sample_size], runs.is_keyframe());
        sample.set_dts(runs.dts());
        sample.set_pts(runs.cts());
        sample.set_duration(runs.duration());
        if runs.is_encrypted() {
            sample.set_decrypt_config(runs.get_decrypt_config()?);
        }

        handler.on_new_sample(track_id, sample)?;
        runs.advance_sample();
        Ok(true)
    }

    // Walk mdat boxes up to `offset` and release queue bytes below it.
    fn read_and_discard_mdats_until(&mut self, offset: u64) -> Result<()> {
        while self.mdat_tail < offset {
            let buf = self.queue.peek_at(self.mdat_tail);
            let Some((fourcc, size)) = BoxReader::start_top_level_box(buf)? else {
                break;
            };
            if fourcc != FourCC::MDAT {
                warn!(%fourcc, "unexpected box type while discarding mdat bytes");
            }
            self.mdat_tail += size;
        }
        self.queue.trim(self.mdat_tail.min(offset));
        Ok(())
    }
}

fn emit_need_key(
    pssh: &[ProtectionSystemSpecificHeader],
    handler: &mut dyn ParserEventHandler,
) -> Result<()> {
    if pssh.is_empty() {
        return Ok(());
    }
    let mut init_data = Vec::new();
    for header in pssh {
        init_data.extend_from_slice(&header.raw_box);
    }
    handler.on_need_key(MediaContainer::Mp4, init_data)
}

impl MediaParser for Mp4MediaParser {
    fn parse(&mut self, buf: &[u8], handler: &mut dyn ParserEventHandler) -> Result<()> {
        let result = self.parse_inner(buf, handler);
        if result.is_err() {
            self.state = State::Error;
            self.runs = None;
            self.queue.reset();
        }
        result
    }
}
