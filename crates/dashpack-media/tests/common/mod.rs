//! Shared fixtures: synthetic fragmented MP4 inputs and output parsing.

#![allow(dead_code)]

use std::fs;
use std::path::Path;

use dashpack_media::buffer::BufferWriter;
use dashpack_media::container::MediaContainer;
use dashpack_media::error::Result;
use dashpack_media::media_parser::{MediaParser, ParserEventHandler};
use dashpack_media::media_sample::MediaSample;
use dashpack_media::mp4::box_buffer::Mp4Box;
use dashpack_media::mp4::box_reader::BoxReader;
use dashpack_media::mp4::boxes::*;
use dashpack_media::mp4::es_descriptor::ObjectType;
use dashpack_media::mp4::fourcc::FourCC;
use dashpack_media::mp4::media_parser::Mp4MediaParser;
use dashpack_media::stream_info::StreamInfo;

pub const NALU_LENGTH_SIZE: usize = 4;

/// Minimal but well-formed AVCDecoderConfigurationRecord with 4-byte NAL
/// length fields, one SPS and one PPS.
pub fn avcc_record() -> Vec<u8> {
    vec![
        0x01, 0x64, 0x00, 0x1F, 0xFF, // version, profile, compat, level, length_size 4
        0xE1, 0x00, 0x04, 0x67, 0x64, 0x00, 0x1F, // 1 SPS
        0x01, 0x00, 0x02, 0x68, 0xCE, // 1 PPS
    ]
}

/// AAC-LC, 44100 Hz, stereo.
pub fn aac_config() -> Vec<u8> {
    vec![0x12, 0x10]
}

pub struct TestSample {
    pub duration: u32,
    pub is_key: bool,
    pub data: Vec<u8>,
}

/// One video access unit: a single length-prefixed NAL with deterministic
/// contents.
pub fn video_sample(index: usize, is_key: bool, duration: u32) -> TestSample {
    let nal_len = 16 + (index % 7);
    let mut data = Vec::with_capacity(NALU_LENGTH_SIZE + nal_len);
    data.extend_from_slice(&(nal_len as u32).to_be_bytes());
    data.push(if is_key { 0x65 } else { 0x41 });
    for i in 1..nal_len {
        data.push(((index * 31 + i * 7) % 251) as u8);
    }
    TestSample {
        duration,
        is_key,
        data,
    }
}

/// One AAC frame with deterministic contents.
pub fn audio_sample(index: usize, duration: u32) -> TestSample {
    let len = 12 + (index % 5);
    let data = (0..len).map(|i| ((index * 13 + i * 3) % 251) as u8).collect();
    TestSample {
        duration,
        is_key: true,
        data,
    }
}

pub struct TestTrack {
    pub is_audio: bool,
    pub timescale: u32,
    pub width: u16,
    pub height: u16,
    pub samples: Vec<TestSample>,
}

pub fn video_track(timescale: u32, width: u16, height: u16, samples: Vec<TestSample>) -> TestTrack {
    TestTrack {
        is_audio: false,
        timescale,
        width,
        height,
        samples,
    }
}

pub fn audio_track(timescale: u32, samples: Vec<TestSample>) -> TestTrack {
    TestTrack {
        is_audio: true,
        timescale,
        width: 0,
        height: 0,
        samples,
    }
}

fn build_moov(tracks: &[TestTrack]) -> Movie {
    let mut moov = Movie::default();
    moov.header.timescale = tracks[0].timescale;
    moov.header.next_track_id = tracks.len() as u32 + 1;

    for (i, test_track) in tracks.iter().enumerate() {
        let track_id = (i + 1) as u32;
        let mut track = Track::default();
        track.header.track_id = track_id;
        track.media.header.timescale = test_track.timescale;

        if test_track.is_audio {
            track.media.handler.handler_type = TrackType::Audio;
            let mut entry = AudioSampleEntry {
                format: FourCC::MP4A,
                channel_count: 2,
                sample_size: 16,
                sample_rate: test_track.timescale,
                ..Default::default()
            };
            entry.esds.es_descriptor.set_esid(track_id as u16);
            entry
                .esds
                .es_descriptor
                .set_object_type(ObjectType::Iso14496_3);
            entry
                .esds
                .es_descriptor
                .set_decoder_specific_info(aac_config());
            entry
                .esds
                .aac_audio_specific_config
                .parse(&aac_config())
                .unwrap();
            let description = &mut track.media.information.sample_table.description;
            description.stream_type = TrackType::Audio;
            description.audio_entries.push(entry);
        } else {
            track.header.width = u32::from(test_track.width) << 16;
            track.header.height = u32::from(test_track.height) << 16;
            track.media.handler.handler_type = TrackType::Video;
            let mut entry = VideoSampleEntry {
                format: FourCC::AVC1,
                width: test_track.width,
                height: test_track.height,
                ..Default::default()
            };
            entry.avcc.set_data(avcc_record()).unwrap();
            let description = &mut track.media.information.sample_table.description;
            description.stream_type = TrackType::Video;
            description.video_entries.push(entry);
        }

        moov.tracks.push(track);
        moov.extends.tracks.push(TrackExtends {
            track_id,
            ..Default::default()
        });
    }
    moov
}

fn write_fragment(
    writer: &mut BufferWriter,
    sequence_number: u32,
    track_id: u32,
    start_dts: u64,
    samples: &[TestSample],
) {
    let mut traf = TrackFragment::default();
    traf.header.track_id = track_id;
    traf.header.flags = TrackFragmentHeader::DEFAULT_BASE_IS_MOOF;
    traf.decode_time.decode_time = start_dts;
    traf.runs.push(TrackFragmentRun {
        flags: TrackFragmentRun::DATA_OFFSET_PRESENT
            | TrackFragmentRun::SAMPLE_DURATION_PRESENT
            | TrackFragmentRun::SAMPLE_SIZE_PRESENT
            | TrackFragmentRun::SAMPLE_FLAGS_PRESENT,
        sample_count: samples.len() as u32,
        data_offset: 0,
        sample_durations: samples.iter().map(|s| s.duration).collect(),
        sample_sizes: samples.iter().map(|s| s.data.len() as u32).collect(),
        sample_flags: samples
            .iter()
            .map(|s| {
                if s.is_key {
                    0
                } else {
                    TrackFragmentHeader::NON_KEY_SAMPLE_MASK
                }
            })
            .collect(),
        ..Default::default()
    });

    let mut moof = MovieFragment {
        header: MovieFragmentHeader {
            sequence_number,
            ..Default::default()
        },
        tracks: vec![traf],
        pssh: Vec::new(),
    };
    let moof_size = moof.compute_size();
    moof.tracks[0].runs[0].data_offset = moof_size + MediaData::HEADER_SIZE;
    moof.write(writer).unwrap();

    let payload: usize = samples.iter().map(|s| s.data.len()).sum();
    let mdat = MediaData {
        data_size: payload as u32,
    };
    mdat.write_header(writer);
    for sample in samples {
        writer.append_slice(&sample.data);
    }
}

/// Write a fragmented MP4 containing the given tracks, `samples_per_fragment`
/// samples per moof, fragments emitted track after track.
pub fn write_input(path: &Path, tracks: &[TestTrack], samples_per_fragment: usize) {
    let mut writer = BufferWriter::new();

    let mut ftyp = FileType {
        major_brand: FourCC::ISOM,
        minor_version: 0x200,
        compatible_brands: vec![FourCC::ISOM, FourCC::ISO6, FourCC::MP41],
    };
    ftyp.write(&mut writer).unwrap();
    build_moov(tracks).write(&mut writer).unwrap();

    let mut sequence_number = 1;
    for (i, track) in tracks.iter().enumerate() {
        let mut dts = 0u64;
        for chunk in track.samples.chunks(samples_per_fragment) {
            write_fragment(&mut writer, sequence_number, (i + 1) as u32, dts, chunk);
            sequence_number += 1;
            dts += chunk.iter().map(|s| u64::from(s.duration)).sum::<u64>();
        }
    }

    fs::write(path, writer.buffer()).unwrap();
}

// ---------------------------------------------------------------------------
// Output inspection helpers
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct Collected {
    pub streams: Vec<StreamInfo>,
    pub samples: Vec<(u32, MediaSample)>,
}

impl ParserEventHandler for Collected {
    fn on_streams_ready(&mut self, streams: Vec<StreamInfo>) -> Result<()> {
        self.streams = streams;
        Ok(())
    }

    fn on_new_sample(&mut self, track_id: u32, sample: MediaSample) -> Result<()> {
        self.samples.push((track_id, sample));
        Ok(())
    }

    fn on_need_key(&mut self, _container: MediaContainer, _init_data: Vec<u8>) -> Result<()> {
        Ok(())
    }
}

/// Run the crate's own parser over `data` and collect everything.
pub fn parse_media(data: &[u8]) -> Collected {
    let mut parser = Mp4MediaParser::new();
    let mut collected = Collected::default();
    for chunk in data.chunks(4096) {
        parser.parse(chunk, &mut collected).unwrap();
    }
    collected
}

/// Walk the top-level boxes of `data` as `(fourcc, offset, size)`.
pub fn top_level_boxes(data: &[u8]) -> Vec<(FourCC, usize, usize)> {
    let mut boxes = Vec::new();
    let mut offset = 0;
    while offset < data.len() {
        let (fourcc, size) = BoxReader::start_top_level_box(&data[offset..])
            .unwrap()
            .unwrap();
        boxes.push((fourcc, offset, size as usize));
        offset += size as usize;
    }
    boxes
}

/// Parse one whole top-level box at `offset`.
pub fn parse_box_at<T: Mp4Box>(data: &[u8], offset: usize) -> T {
    let mut reader = BoxReader::read_top_level_box(&data[offset..])
        .unwrap()
        .unwrap();
    let mut parsed = T::default();
    parsed.parse(&mut reader).unwrap();
    parsed
}
