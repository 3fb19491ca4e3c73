//! End-to-end remux scenarios: on-demand single file, determinism, A+V
//! splitting, and live segmentation.

mod common;

use std::fs;
use std::path::Path;

use common::*;
use dashpack_media::mp4::boxes::{FileType, Movie, SegmentIndex};
use dashpack_media::mp4::fourcc::FourCC;
use dashpack_media::{Demuxer, Mp4Muxer, MuxerOptions};

fn vod_options(output: &Path) -> MuxerOptions {
    MuxerOptions {
        single_segment: true,
        segment_duration: 10.0,
        fragment_duration: 2.0,
        segment_sap_aligned: true,
        fragment_sap_aligned: true,
        num_subsegments_per_sidx: 1,
        normalize_presentation_timestamp: true,
        output_file_name: output.to_string_lossy().into_owned(),
        segment_template: String::new(),
        temp_dir: String::new(),
    }
}

// Remux one selected stream of `input` into `options.output_file_name`.
fn remux_one(input: &Path, options: MuxerOptions, want_audio: bool) {
    let mut demuxer = Demuxer::new(input.to_string_lossy().into_owned());
    demuxer.initialize().unwrap();
    let index = demuxer
        .streams()
        .iter()
        .position(|s| s.info().is_audio() == want_audio)
        .unwrap();
    let mut muxer = Mp4Muxer::new(options);
    demuxer.connect_stream(index, 0);
    muxer.add_stream(demuxer.stream_info(index), index);
    let mut muxers = vec![muxer];
    demuxer.run(&mut muxers).unwrap();
}

// 82 frames of 1280x720 at time_scale 25, one IDR roughly every 41 frames.
fn e1_video_samples() -> Vec<TestSample> {
    (0..82)
        .map(|i| video_sample(i, i % 41 == 0, 1))
        .collect()
}

#[test]
fn vod_remux_video_only() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("input.mp4");
    let output = dir.path().join("output.mp4");
    write_input(&input, &[video_track(25, 1280, 720, e1_video_samples())], 20);

    remux_one(&input, vod_options(&output), false);

    let data = fs::read(&output).unwrap();
    let boxes = top_level_boxes(&data);
    assert_eq!(boxes[0].0, FourCC::FTYP);
    assert_eq!(boxes[1].0, FourCC::MOOV);
    assert_eq!(boxes[2].0, FourCC::SIDX);
    assert_eq!(boxes[3].0, FourCC::MOOF);
    assert_eq!(boxes[4].0, FourCC::MDAT);

    // Brands: dash + iso6, mp41, avc1 (single video stream).
    let ftyp: FileType = parse_box_at(&data, boxes[0].1);
    assert_eq!(ftyp.major_brand, FourCC::DASH);
    assert_eq!(
        ftyp.compatible_brands,
        vec![FourCC::ISO6, FourCC::MP41, FourCC::AVC1]
    );

    let moov: Movie = parse_box_at(&data, boxes[1].1);
    assert_eq!(moov.tracks.len(), 1);
    assert_eq!(moov.tracks[0].header.width, 1280 << 16);
    assert_eq!(moov.tracks[0].header.height, 720 << 16);
    // 82 ticks at time scale 25 in both track and movie time.
    assert_eq!(moov.header.timescale, 25);
    assert_eq!(moov.header.duration, 82);

    // All fragments collapse into one subsegment reference.
    let sidx: SegmentIndex = parse_box_at(&data, boxes[2].1);
    assert_eq!(sidx.references.len(), 1);
    assert_eq!(sidx.earliest_presentation_time, 0);
    assert_eq!(sidx.references[0].subsegment_duration, 82);
    assert!(sidx.references[0].starts_with_sap);
    let fragment_bytes: usize = boxes[3..].iter().map(|(_, _, size)| *size).sum();
    assert_eq!(sidx.references[0].referenced_size as usize, fragment_bytes);

    // The output parses back with every sample byte-identical and DTS
    // strictly monotonic.
    let collected = parse_media(&data);
    assert_eq!(collected.streams.len(), 1);
    assert_eq!(collected.samples.len(), 82);
    let originals = e1_video_samples();
    let mut last_dts = i64::MIN;
    for (i, (_, sample)) in collected.samples.iter().enumerate() {
        assert_eq!(sample.data(), &originals[i].data[..], "sample {i}");
        assert!(sample.dts() > last_dts);
        last_dts = sample.dts();
    }
}

#[test]
fn vod_remux_is_deterministic() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("input.mp4");
    write_input(&input, &[video_track(25, 640, 360, e1_video_samples())], 20);

    let out_a = dir.path().join("a.mp4");
    let out_b = dir.path().join("b.mp4");
    // No clock is injected, so creation times pin to the epoch.
    remux_one(&input, vod_options(&out_a), false);
    remux_one(&input, vod_options(&out_b), false);

    assert_eq!(fs::read(&out_a).unwrap(), fs::read(&out_b).unwrap());
}

#[test]
fn av_split_matches_single_track_remuxes() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("input.mp4");
    let video: Vec<TestSample> = (0..50).map(|i| video_sample(i, i % 25 == 0, 1)).collect();
    let audio: Vec<TestSample> = (0..80).map(|i| audio_sample(i, 1024)).collect();
    write_input(
        &input,
        &[video_track(25, 640, 360, video), audio_track(44100, audio)],
        16,
    );

    // One demuxer feeding two muxers.
    let split_video = dir.path().join("split_video.mp4");
    let split_audio = dir.path().join("split_audio.mp4");
    {
        let mut demuxer = Demuxer::new(input.to_string_lossy().into_owned());
        demuxer.initialize().unwrap();
        let video_index = demuxer
            .streams()
            .iter()
            .position(|s| s.info().is_video())
            .unwrap();
        let audio_index = demuxer
            .streams()
            .iter()
            .position(|s| s.info().is_audio())
            .unwrap();

        let mut video_muxer = Mp4Muxer::new(vod_options(&split_video));
        demuxer.connect_stream(video_index, 0);
        video_muxer.add_stream(demuxer.stream_info(video_index), video_index);

        let mut audio_muxer = Mp4Muxer::new(vod_options(&split_audio));
        demuxer.connect_stream(audio_index, 1);
        audio_muxer.add_stream(demuxer.stream_info(audio_index), audio_index);

        let mut muxers = vec![video_muxer, audio_muxer];
        demuxer.run(&mut muxers).unwrap();
    }

    // The same input remuxed twice, one stream at a time.
    let solo_video = dir.path().join("solo_video.mp4");
    let solo_audio = dir.path().join("solo_audio.mp4");
    remux_one(&input, vod_options(&solo_video), false);
    remux_one(&input, vod_options(&solo_audio), true);

    assert_eq!(fs::read(&split_video).unwrap(), fs::read(&solo_video).unwrap());
    assert_eq!(fs::read(&split_audio).unwrap(), fs::read(&solo_audio).unwrap());
}

#[test]
fn pull_mode_interleaves_two_streams_into_one_output() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("input.mp4");
    let video: Vec<TestSample> = (0..100).map(|i| video_sample(i, i % 25 == 0, 1)).collect();
    let audio: Vec<TestSample> = (0..160).map(|i| audio_sample(i, 1024)).collect();
    write_input(
        &input,
        &[video_track(25, 640, 360, video), audio_track(44100, audio)],
        16,
    );

    let output = dir.path().join("muxed.mp4");
    let mut demuxer = Demuxer::new(input.to_string_lossy().into_owned());
    demuxer.initialize().unwrap();
    let mut muxer = Mp4Muxer::new(vod_options(&output));
    for index in 0..demuxer.streams().len() {
        demuxer.connect_stream(index, 0);
        muxer.add_stream(demuxer.stream_info(index), index);
    }
    muxer.run(&mut demuxer).unwrap();

    // Both tracks survive with all their samples, bytes intact.
    let data = fs::read(&output).unwrap();
    let collected = parse_media(&data);
    assert_eq!(collected.streams.len(), 2);
    let video_id = collected
        .streams
        .iter()
        .find(|s| s.is_video())
        .unwrap()
        .track_id;
    let video_samples: Vec<_> = collected
        .samples
        .iter()
        .filter(|(id, _)| *id == video_id)
        .collect();
    let audio_samples: Vec<_> = collected
        .samples
        .iter()
        .filter(|(id, _)| *id != video_id)
        .collect();
    assert_eq!(video_samples.len(), 100);
    assert_eq!(audio_samples.len(), 160);
    for (i, (_, sample)) in video_samples.iter().enumerate() {
        assert_eq!(sample.data(), &video_sample(i, i % 25 == 0, 1).data[..]);
    }
    for (i, (_, sample)) in audio_samples.iter().enumerate() {
        assert_eq!(sample.data(), &audio_sample(i, 1024).data[..]);
    }
}

#[test]
fn live_segmentation_with_template() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("input.mp4");
    // ~10 seconds of video at 25 fps with one IDR per second.
    let samples: Vec<TestSample> = (0..250).map(|i| video_sample(i, i % 25 == 0, 1)).collect();
    write_input(&input, &[video_track(25, 640, 360, samples)], 25);

    let init = dir.path().join("init.mp4");
    let template = dir
        .path()
        .join("seg$Number$.m4s")
        .to_string_lossy()
        .into_owned();
    let options = MuxerOptions {
        single_segment: false,
        segment_duration: 2.0,
        fragment_duration: 2.0,
        num_subsegments_per_sidx: 0,
        output_file_name: init.to_string_lossy().into_owned(),
        segment_template: template,
        ..MuxerOptions::default()
    };
    remux_one(&input, options, false);

    // Init segment holds exactly ftyp + moov.
    let init_data = fs::read(&init).unwrap();
    let init_boxes = top_level_boxes(&init_data);
    assert_eq!(init_boxes.len(), 2);
    assert_eq!(init_boxes[0].0, FourCC::FTYP);
    assert_eq!(init_boxes[1].0, FourCC::MOOV);

    // Five two-second segments, each styp + sidx + fragments.
    let mut concatenated = init_data.clone();
    for number in 1..=5 {
        let segment = fs::read(dir.path().join(format!("seg{number}.m4s"))).unwrap();
        let segment_boxes = top_level_boxes(&segment);
        assert_eq!(segment_boxes[0].0, FourCC::STYP, "segment {number}");
        assert_eq!(segment_boxes[1].0, FourCC::SIDX);
        let sidx: SegmentIndex = parse_box_at(&segment, segment_boxes[1].1);
        assert_eq!(sidx.references.len(), 1);
        assert_eq!(sidx.references[0].subsegment_duration, 50);

        // Strip styp and sidx when concatenating: the remainder is moof+mdat.
        let fragments_start = segment_boxes[2].1;
        concatenated.extend_from_slice(&segment[fragments_start..]);
    }
    assert!(!dir.path().join("seg6.m4s").exists());

    // Concatenating init + all segments yields the same presentation.
    let collected = parse_media(&concatenated);
    assert_eq!(collected.samples.len(), 250);
    let mut last_dts = i64::MIN;
    for (i, (_, sample)) in collected.samples.iter().enumerate() {
        let original = video_sample(i, i % 25 == 0, 1);
        assert_eq!(sample.data(), &original.data[..], "sample {i}");
        assert!(sample.dts() > last_dts);
        last_dts = sample.dts();
    }
}

#[test]
fn live_segments_append_to_main_file_without_template() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("input.mp4");
    let samples: Vec<TestSample> = (0..100).map(|i| video_sample(i, i % 25 == 0, 1)).collect();
    write_input(&input, &[video_track(25, 640, 360, samples)], 25);

    let output = dir.path().join("live.mp4");
    let options = MuxerOptions {
        single_segment: false,
        segment_duration: 2.0,
        fragment_duration: 2.0,
        num_subsegments_per_sidx: -1,
        output_file_name: output.to_string_lossy().into_owned(),
        ..MuxerOptions::default()
    };
    remux_one(&input, options, false);

    let data = fs::read(&output).unwrap();
    let boxes = top_level_boxes(&data);
    assert_eq!(boxes[0].0, FourCC::FTYP);
    assert_eq!(boxes[1].0, FourCC::MOOV);
    // num_subsegments_per_sidx = -1: no sidx anywhere, styp per segment.
    assert!(boxes.iter().all(|(fourcc, _, _)| *fourcc != FourCC::SIDX));
    assert_eq!(
        boxes
            .iter()
            .filter(|(fourcc, _, _)| *fourcc == FourCC::STYP)
            .count(),
        2
    );

    let collected = parse_media(&data);
    assert_eq!(collected.samples.len(), 100);
}
