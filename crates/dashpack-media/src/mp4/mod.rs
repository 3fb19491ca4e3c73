//! ISO BMFF: box model, parser, fragmenter, segmenters and muxer.

pub mod aac;
pub mod box_buffer;
pub mod box_reader;
pub mod boxes;
pub mod cenc;
pub mod chunk_info_iterator;
pub mod composition_offset_iterator;
pub mod decoding_time_iterator;
pub mod es_descriptor;
pub mod fourcc;
pub mod fragmenter;
pub mod media_parser;
pub mod mp4_muxer;
pub mod multi_segment_segmenter;
pub mod segmenter;
pub mod single_segment_segmenter;
pub mod sync_sample_iterator;
pub mod track_run_iterator;

pub use box_buffer::{BoxBuffer, Mp4Box};
pub use box_reader::BoxReader;
pub use fourcc::FourCC;
pub use fragmenter::Fragmenter;
pub use media_parser::Mp4MediaParser;
pub use mp4_muxer::Mp4Muxer;
pub use segmenter::{EncryptionConfig, Mp4Segmenter, NewSegmentEvent};
pub use track_run_iterator::TrackRunIterator;
