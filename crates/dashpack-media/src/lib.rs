//! dashpack-media: the remux / encrypt / segment pipeline behind dashpack.
//!
//! The crate ingests ISO BMFF media, extracts elementary streams,
//! optionally applies DASH Common Encryption (CENC) to the samples, and
//! repackages everything as fragmented MP4, either as a single on-demand
//! file with a `sidx` index or as live segments named from a DASH segment
//! template.
//!
//! # Modules
//!
//! - `buffer` / `byte_queue` - big-endian typed I/O and the offset-tracking
//!   input queue
//! - `crypto` - AES-CTR with CENC counter semantics, AES-CBC with PKCS#7
//! - `mp4` - box model, box reader/writer, media parser, track-run
//!   iterator, fragmenter, segmenters and the MP4 muxer
//! - `demuxer` / `media_stream` - container sniffing and the push/pull
//!   stream plumbing between demuxer and muxer
//! - `key_source` - content key acquisition for CENC
//! - `event` - muxer listener events and the `MediaInfo` record
//!
//! # Pipeline
//!
//! File bytes flow through container sniffing into the media parser, which
//! produces immutable [`StreamInfo`] descriptions and a stream of
//! [`MediaSample`]s. Samples queue in [`MediaStream`]s and reach the muxer
//! either pushed by the demuxer (one worker per input file) or pulled by
//! the muxer's own loop when several streams interleave into one output.
//! Inside the segmenter, per-track fragmenters optionally encrypt samples
//! in place, accumulate `traf` payloads, and the segmenter back-patches
//! data offsets once the `moof` size is known.

pub mod buffer;
pub mod byte_queue;
pub mod clock;
pub mod container;
pub mod crypto;
pub mod demuxer;
pub mod error;
pub mod event;
pub mod key_source;
pub mod media_parser;
pub mod media_sample;
pub mod media_stream;
pub mod mp4;
pub mod muxer_options;
pub mod muxer_util;
pub mod stream_info;

pub use clock::{Clock, FixedClock, SystemClock};
pub use container::{determine_container, MediaContainer};
pub use demuxer::Demuxer;
pub use error::{Error, Result};
pub use event::{MediaInfo, MuxerListener, VodMediaInfoDumpMuxerListener};
pub use key_source::{EncryptionKey, FixedKeySource, KeySource, TrackType};
pub use media_sample::{DecryptConfig, MediaSample, SubsampleEntry};
pub use media_stream::{MediaStream, MediaStreamOperation, StreamState};
pub use mp4::{Mp4MediaParser, Mp4Muxer};
pub use muxer_options::MuxerOptions;
pub use muxer_util::{get_segment_name, validate_segment_template};
pub use stream_info::{AudioStreamInfo, StreamInfo, StreamKind, StreamType, VideoStreamInfo};
