//! Converters from muxer state to `MediaInfo`.

use std::sync::Arc;

use crate::container::MediaContainer;
use crate::muxer_options::MuxerOptions;
use crate::stream_info::{StreamInfo, StreamKind};

use super::media_info::{AudioMediaInfo, ByteRange, MediaInfo, VideoMediaInfo};

pub fn generate_media_info(
    options: &MuxerOptions,
    streams: &[Arc<StreamInfo>],
    reference_time_scale: u32,
    container: MediaContainer,
) -> MediaInfo {
    let mut video_info = Vec::new();
    let mut audio_info = Vec::new();
    let mut protected = false;
    for stream in streams {
        protected |= stream.is_encrypted;
        match &stream.kind {
            StreamKind::Video(video) => video_info.push(VideoMediaInfo {
                codec: stream.codec_string.clone(),
                width: video.width,
                height: video.height,
                time_scale: stream.time_scale,
                decoder_config: hex::encode(&stream.extra_data),
            }),
            StreamKind::Audio(audio) => audio_info.push(AudioMediaInfo {
                codec: stream.codec_string.clone(),
                sampling_frequency: audio.sampling_frequency,
                num_channels: audio.num_channels,
                language: stream.language.clone(),
                time_scale: stream.time_scale,
                decoder_config: hex::encode(&stream.extra_data),
            }),
        }
    }

    MediaInfo {
        media_file_name: options.output_file_name.clone(),
        container_type: match container {
            MediaContainer::Mp4 => "mp4".to_string(),
            other => format!("{other:?}").to_lowercase(),
        },
        bandwidth: 0,
        media_duration_seconds: 0.0,
        reference_time_scale,
        init_range: None,
        index_range: None,
        segment_template: if options.segment_template.is_empty() {
            None
        } else {
            Some(options.segment_template.clone())
        },
        protected_content_scheme_id_uri: if protected { Some(String::new()) } else { None },
        video_info,
        audio_info,
    }
}

/// Fill in the fields only known once muxing ended.
pub fn complete_media_info(
    media_info: &mut MediaInfo,
    init_range: Option<(u64, u64)>,
    index_range: Option<(u64, u64)>,
    duration_seconds: f64,
    file_size: u64,
) {
    media_info.init_range = init_range.map(|(begin, end)| ByteRange { begin, end });
    media_info.index_range = index_range.map(|(begin, end)| ByteRange { begin, end });
    media_info.media_duration_seconds = duration_seconds;
    media_info.bandwidth = estimate_bandwidth(file_size, duration_seconds);
}

fn estimate_bandwidth(file_size: u64, duration_seconds: f64) -> u32 {
    if duration_seconds <= 0.0 {
        return 0;
    }
    (file_size as f64 * 8.0 / duration_seconds) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream_info::{VideoCodec, VideoStreamInfo};
    use bytes::Bytes;

    #[test]
    fn media_info_from_video_stream() {
        let stream = Arc::new(StreamInfo {
            track_id: 1,
            time_scale: 25,
            duration: 250,
            codec_string: "avc1.64001f".into(),
            language: String::new(),
            extra_data: Bytes::from_static(&[0x01, 0x64]),
            is_encrypted: false,
            kind: StreamKind::Video(VideoStreamInfo {
                codec: VideoCodec::H264,
                width: 1280,
                height: 720,
                nalu_length_size: 4,
            }),
        });
        let mut options = MuxerOptions::default();
        options.output_file_name = "out.mp4".into();

        let mut info = generate_media_info(
            &options,
            std::slice::from_ref(&stream),
            25,
            MediaContainer::Mp4,
        );
        assert_eq!(info.container_type, "mp4");
        assert_eq!(info.video_info.len(), 1);
        assert_eq!(info.video_info[0].decoder_config, "0164");

        complete_media_info(&mut info, Some((0, 99)), Some((100, 119)), 10.0, 10_000);
        assert_eq!(info.bandwidth, 8_000);
        assert_eq!(info.init_range, Some(ByteRange { begin: 0, end: 99 }));
    }
}
