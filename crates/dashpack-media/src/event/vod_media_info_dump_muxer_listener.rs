//! Listener dumping the final `MediaInfo` as JSON next to the output file.

use std::fs::File;
use std::sync::Arc;

use tracing::{error, info};

use crate::container::MediaContainer;
use crate::muxer_options::MuxerOptions;
use crate::stream_info::StreamInfo;

use super::internal;
use super::media_info::MediaInfo;
use super::muxer_listener::MuxerListener;

/// Writes `<output>.media_info.json` when muxing completes. Intended for
/// the on-demand profile, where a separate manifest generation step consumes
/// the record.
pub struct VodMediaInfoDumpMuxerListener {
    output_path: String,
    scheme_id_uri: String,
    media_info: Option<MediaInfo>,
}

impl VodMediaInfoDumpMuxerListener {
    pub fn new(output_path: impl Into<String>) -> Self {
        Self {
            output_path: output_path.into(),
            scheme_id_uri: String::new(),
            media_info: None,
        }
    }

    /// schemeIdUri recorded for protected content.
    pub fn set_content_protection_scheme_id_uri(&mut self, uri: impl Into<String>) {
        self.scheme_id_uri = uri.into();
    }
}

impl MuxerListener for VodMediaInfoDumpMuxerListener {
    fn on_media_start(
        &mut self,
        options: &MuxerOptions,
        streams: &[Arc<StreamInfo>],
        time_scale: u32,
        container: MediaContainer,
    ) {
        let mut media_info =
            internal::generate_media_info(options, streams, time_scale, container);
        if media_info.protected_content_scheme_id_uri.is_some() {
            media_info.protected_content_scheme_id_uri = Some(self.scheme_id_uri.clone());
        }
        self.media_info = Some(media_info);
    }

    fn on_new_segment(&mut self, _start_time: u64, _duration: u64, _segment_file_size: u64) {
        // Subsegment boundaries are uninteresting for the on-demand record.
    }

    fn on_media_end(
        &mut self,
        _streams: &[Arc<StreamInfo>],
        init_range: Option<(u64, u64)>,
        index_range: Option<(u64, u64)>,
        duration_seconds: f64,
        file_size: u64,
    ) {
        let Some(media_info) = self.media_info.as_mut() else {
            error!("on_media_end without on_media_start");
            return;
        };
        internal::complete_media_info(
            media_info,
            init_range,
            index_range,
            duration_seconds,
            file_size,
        );

        let path = format!("{}.media_info.json", self.output_path);
        match File::create(&path) {
            Ok(file) => {
                if let Err(e) = serde_json::to_writer_pretty(file, media_info) {
                    error!(%path, "failed to serialize media info: {e}");
                } else {
                    info!(%path, "wrote media info");
                }
            }
            Err(e) => error!(%path, "failed to create media info file: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream_info::{AudioCodec, AudioStreamInfo, StreamKind};
    use bytes::Bytes;

    #[test]
    fn dumps_media_info_json() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("audio.mp4").to_string_lossy().into_owned();

        let stream = Arc::new(StreamInfo {
            track_id: 1,
            time_scale: 44100,
            duration: 441000,
            codec_string: "mp4a.40.2".into(),
            language: "eng".into(),
            extra_data: Bytes::from_static(&[0x12, 0x10]),
            is_encrypted: false,
            kind: StreamKind::Audio(AudioStreamInfo {
                codec: AudioCodec::Aac,
                sample_bits: 16,
                num_channels: 2,
                sampling_frequency: 44100,
            }),
        });

        let mut options = MuxerOptions::default();
        options.output_file_name = output.clone();

        let mut listener = VodMediaInfoDumpMuxerListener::new(&output);
        listener.on_media_start(
            &options,
            std::slice::from_ref(&stream),
            44100,
            MediaContainer::Mp4,
        );
        listener.on_media_end(
            std::slice::from_ref(&stream),
            Some((0, 800)),
            Some((801, 900)),
            10.0,
            123_456,
        );

        let json = std::fs::read_to_string(format!("{output}.media_info.json")).unwrap();
        let parsed: MediaInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.audio_info[0].codec, "mp4a.40.2");
        assert_eq!(parsed.audio_info[0].decoder_config, "1210");
        assert_eq!(parsed.media_duration_seconds, 10.0);
        assert!(parsed.bandwidth > 0);
    }
}
