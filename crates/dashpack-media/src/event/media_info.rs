//! The `MediaInfo` record describing one muxed representation.

use serde::{Deserialize, Serialize};

/// Inclusive byte range within the media file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteRange {
    pub begin: u64,
    pub end: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoMediaInfo {
    pub codec: String,
    pub width: u16,
    pub height: u16,
    pub time_scale: u32,
    /// Hex-encoded decoder configuration record.
    pub decoder_config: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioMediaInfo {
    pub codec: String,
    pub sampling_frequency: u32,
    pub num_channels: u8,
    pub language: String,
    pub time_scale: u32,
    /// Hex-encoded decoder specific information.
    pub decoder_config: String,
}

/// Everything a manifest writer needs to describe one representation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    pub media_file_name: String,
    pub container_type: String,
    pub bandwidth: u32,
    pub media_duration_seconds: f64,
    pub reference_time_scale: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub init_range: Option<ByteRange>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index_range: Option<ByteRange>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub segment_template: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protected_content_scheme_id_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub video_info: Vec<VideoMediaInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub audio_info: Vec<AudioMediaInfo>,
}
