//! Event handler interface for events fired by the muxer.

use std::sync::Arc;

use crate::container::MediaContainer;
use crate::muxer_options::MuxerOptions;
use crate::stream_info::StreamInfo;

/// Receives muxing lifecycle events; typically implemented by manifest
/// writers.
pub trait MuxerListener: Send {
    /// Muxing starts; fired before any other event. `time_scale` is the
    /// reference scale regardless of the per-stream scales.
    fn on_media_start(
        &mut self,
        options: &MuxerOptions,
        streams: &[Arc<StreamInfo>],
        time_scale: u32,
        container: MediaContainer,
    );

    /// One segment (or subsegment, for on-demand) was written.
    /// `start_time` and `duration` are in the reference time scale.
    fn on_new_segment(&mut self, start_time: u64, duration: u64, segment_file_size: u64);

    /// All files are written. Ranges are inclusive byte ranges within the
    /// media file, when the output layout has them.
    fn on_media_end(
        &mut self,
        streams: &[Arc<StreamInfo>],
        init_range: Option<(u64, u64)>,
        index_range: Option<(u64, u64)>,
        duration_seconds: f64,
        file_size: u64,
    );
}
