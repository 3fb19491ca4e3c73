//! Elementary stream descriptions produced by the media parsers.

use bytes::Bytes;

/// Whether a stream carries audio or video.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamType {
    Audio,
    Video,
}

/// Audio codecs recognized by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioCodec {
    Aac,
    Eac3,
    Unknown,
}

/// Video codecs recognized by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoCodec {
    H264,
    Unknown,
}

/// Audio-specific stream attributes.
#[derive(Debug, Clone)]
pub struct AudioStreamInfo {
    pub codec: AudioCodec,
    pub sample_bits: u8,
    pub num_channels: u8,
    pub sampling_frequency: u32,
}

/// Video-specific stream attributes.
#[derive(Debug, Clone)]
pub struct VideoStreamInfo {
    pub codec: VideoCodec,
    pub width: u16,
    pub height: u16,
    /// Bytes prefixing each NAL unit in length-prefixed AVC sample data.
    /// 0 means the stream is not length-prefixed AVC.
    pub nalu_length_size: u8,
}

/// The audio/video split of a [`StreamInfo`].
#[derive(Debug, Clone)]
pub enum StreamKind {
    Audio(AudioStreamInfo),
    Video(VideoStreamInfo),
}

/// Description of one elementary stream.
///
/// Created by the media parser during initialization and immutable
/// afterwards, except for the few setters used while the true parameters are
/// still being discovered inside the bitstream.
#[derive(Debug, Clone)]
pub struct StreamInfo {
    pub track_id: u32,
    /// Ticks per second for all timestamps of this stream.
    pub time_scale: u32,
    /// Duration in `time_scale` units.
    pub duration: u64,
    /// RFC 6381 codec string, e.g. "avc1.64001f" or "mp4a.40.2".
    pub codec_string: String,
    /// ISO 639-2/T language code, empty if undetermined.
    pub language: String,
    /// Codec configuration: AudioSpecificConfig for AAC, or the raw
    /// AVCDecoderConfigurationRecord for H.264.
    pub extra_data: Bytes,
    pub is_encrypted: bool,
    pub kind: StreamKind,
}

impl StreamInfo {
    pub fn stream_type(&self) -> StreamType {
        match self.kind {
            StreamKind::Audio(_) => StreamType::Audio,
            StreamKind::Video(_) => StreamType::Video,
        }
    }

    pub fn is_audio(&self) -> bool {
        matches!(self.kind, StreamKind::Audio(_))
    }

    pub fn is_video(&self) -> bool {
        matches!(self.kind, StreamKind::Video(_))
    }

    pub fn audio(&self) -> Option<&AudioStreamInfo> {
        match &self.kind {
            StreamKind::Audio(a) => Some(a),
            StreamKind::Video(_) => None,
        }
    }

    pub fn video(&self) -> Option<&VideoStreamInfo> {
        match &self.kind {
            StreamKind::Video(v) => Some(v),
            StreamKind::Audio(_) => None,
        }
    }

    pub fn set_extra_data(&mut self, extra_data: Bytes) {
        self.extra_data = extra_data;
    }

    pub fn set_codec_string(&mut self, codec_string: String) {
        self.codec_string = codec_string;
    }

    /// Used by parsers that discover the true sampling rate late, inside an
    /// ADTS header.
    pub fn set_sampling_frequency(&mut self, frequency: u32) {
        if let StreamKind::Audio(audio) = &mut self.kind {
            audio.sampling_frequency = frequency;
        }
    }
}

impl std::fmt::Display for StreamInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            StreamKind::Video(v) => write!(
                f,
                "Stream #{}: video codec {} {}x{} time_scale {} duration {}{}",
                self.track_id,
                self.codec_string,
                v.width,
                v.height,
                self.time_scale,
                self.duration,
                if self.is_encrypted { " (encrypted)" } else { "" },
            ),
            StreamKind::Audio(a) => write!(
                f,
                "Stream #{}: audio codec {} {} Hz {} ch time_scale {} duration {}{}",
                self.track_id,
                self.codec_string,
                a.sampling_frequency,
                a.num_channels,
                self.time_scale,
                self.duration,
                if self.is_encrypted { " (encrypted)" } else { "" },
            ),
        }
    }
}

/// RFC 6381 codec string for an audio codec.
pub fn audio_codec_string(codec: AudioCodec, audio_object_type: u8) -> String {
    match codec {
        AudioCodec::Aac => format!("mp4a.40.{audio_object_type}"),
        AudioCodec::Eac3 => "ec-3".to_string(),
        AudioCodec::Unknown => "unknown".to_string(),
    }
}

/// RFC 6381 codec string for a video codec.
pub fn video_codec_string(
    codec: VideoCodec,
    profile: u8,
    compatible_profiles: u8,
    level: u8,
) -> String {
    match codec {
        VideoCodec::H264 => format!("avc1.{profile:02x}{compatible_profiles:02x}{level:02x}"),
        VideoCodec::Unknown => "unknown".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codec_strings() {
        assert_eq!(audio_codec_string(AudioCodec::Aac, 2), "mp4a.40.2");
        assert_eq!(
            video_codec_string(VideoCodec::H264, 0x64, 0x00, 0x1f),
            "avc1.64001f"
        );
    }

    #[test]
    fn sampling_frequency_override() {
        let mut info = StreamInfo {
            track_id: 1,
            time_scale: 44100,
            duration: 0,
            codec_string: "mp4a.40.2".into(),
            language: String::new(),
            extra_data: Bytes::new(),
            is_encrypted: false,
            kind: StreamKind::Audio(AudioStreamInfo {
                codec: AudioCodec::Aac,
                sample_bits: 16,
                num_channels: 2,
                sampling_frequency: 44100,
            }),
        };
        info.set_sampling_frequency(48000);
        assert_eq!(info.audio().unwrap().sampling_frequency, 48000);
    }
}
