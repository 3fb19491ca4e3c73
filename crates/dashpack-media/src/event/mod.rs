//! Muxer events and the `MediaInfo` record handed to manifest writers.

pub mod media_info;
pub mod muxer_listener;
pub mod vod_media_info_dump_muxer_listener;

pub(crate) mod internal;

pub use media_info::{AudioMediaInfo, ByteRange, MediaInfo, VideoMediaInfo};
pub use muxer_listener::MuxerListener;
pub use vod_media_info_dump_muxer_listener::VodMediaInfoDumpMuxerListener;
