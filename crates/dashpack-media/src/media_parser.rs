//! Media parser interface.
//!
//! A parser turns container bytes into stream descriptions and samples,
//! reporting them synchronously through a handler while `parse` runs.

use crate::container::MediaContainer;
use crate::error::Result;
use crate::media_sample::MediaSample;
use crate::stream_info::StreamInfo;

/// Receives parser output while bytes are being consumed.
pub trait ParserEventHandler {
    /// All stream descriptions are known; fired exactly once.
    fn on_streams_ready(&mut self, streams: Vec<StreamInfo>) -> Result<()>;

    /// One demultiplexed sample of the given track.
    fn on_new_sample(&mut self, track_id: u32, sample: MediaSample) -> Result<()>;

    /// DRM init data was encountered in the stream.
    fn on_need_key(&mut self, container: MediaContainer, init_data: Vec<u8>) -> Result<()>;
}

/// Incremental media parser over an unframed byte stream.
pub trait MediaParser: Send {
    /// Consume the next chunk of input, emitting events into `handler`.
    fn parse(&mut self, buf: &[u8], handler: &mut dyn ParserEventHandler) -> Result<()>;
}
