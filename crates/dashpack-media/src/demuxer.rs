//! File demuxer: sniffs the container, drives the media parser, and owns
//! the per-track streams.

use std::fs::File;
use std::io::Read;
use std::sync::Arc;

use tracing::{info, warn};

use crate::container::{determine_container, MediaContainer};
use crate::error::{Error, Result};
use crate::media_parser::{MediaParser, ParserEventHandler};
use crate::media_sample::MediaSample;
use crate::media_stream::{MediaStream, MediaStreamOperation, PushOutcome, StreamState};
use crate::mp4::media_parser::Mp4MediaParser;
use crate::mp4::mp4_muxer::Mp4Muxer;
use crate::stream_info::StreamInfo;

const READ_BUF_SIZE: usize = 0x40000; // 256 KiB

// Routes parser events into the demuxer's streams. Samples for pushing
// streams are collected for delivery by the caller.
struct DemuxerSink<'a> {
    streams: &'a mut Vec<MediaStream>,
    deliveries: &'a mut Vec<(usize, MediaSample)>,
    init_received: &'a mut bool,
}

impl ParserEventHandler for DemuxerSink<'_> {
    fn on_streams_ready(&mut self, streams: Vec<StreamInfo>) -> Result<()> {
        *self.init_received = true;
        for info in streams {
            info!(%info, "discovered stream");
            self.streams.push(MediaStream::new(Arc::new(info)));
        }
        Ok(())
    }

    fn on_new_sample(&mut self, track_id: u32, sample: MediaSample) -> Result<()> {
        let index = self
            .streams
            .iter()
            .position(|s| s.info().track_id == track_id)
            .ok_or_else(|| {
                Error::parser(format!("sample for unknown track id {track_id}"))
            })?;
        match self.streams[index].push_sample(sample) {
            PushOutcome::Deliver(sample) => self.deliveries.push((index, sample)),
            PushOutcome::Queued | PushOutcome::Dropped => {}
        }
        Ok(())
    }

    fn on_need_key(&mut self, _container: MediaContainer, _init_data: Vec<u8>) -> Result<()> {
        warn!("input is encrypted; decryption is not supported");
        Ok(())
    }
}

/// Demultiplexes one input file into elementary streams.
pub struct Demuxer {
    file_name: String,
    file: Option<File>,
    parser: Option<Box<dyn MediaParser>>,
    streams: Vec<MediaStream>,
    buffer: Vec<u8>,
    init_received: bool,
}

impl Demuxer {
    pub fn new(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            file: None,
            parser: None,
            streams: Vec::new(),
            buffer: vec![0; READ_BUF_SIZE],
            init_received: false,
        }
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Open the file, sniff the container, construct the matching parser
    /// and parse until the stream descriptions are known.
    pub fn initialize(&mut self) -> Result<()> {
        debug_assert!(self.file.is_none());
        let mut file = File::open(&self.file_name).map_err(|e| {
            Error::FileFailure(format!("cannot open file for read {}: {e}", self.file_name))
        })?;

        let bytes_read = file.read(&mut self.buffer)?;
        if bytes_read == 0 {
            return Err(Error::FileFailure(format!(
                "cannot read file {}",
                self.file_name
            )));
        }

        let container = determine_container(&self.buffer[..bytes_read]);
        let parser: Box<dyn MediaParser> = match container {
            MediaContainer::Mp4 => Box::new(Mp4MediaParser::new()),
            MediaContainer::Mpeg2Ts | MediaContainer::Wvm | MediaContainer::Unknown => {
                return Err(Error::Unimplemented(format!(
                    "container {container:?} is not supported"
                )));
            }
        };
        self.file = Some(file);
        self.parser = Some(parser);

        // Feed the first chunk, then keep parsing until the parser reports
        // the stream descriptions.
        self.feed(bytes_read)?;
        while !self.init_received {
            self.parse()?;
        }
        Ok(())
    }

    fn feed(&mut self, bytes_read: usize) -> Result<Vec<(usize, MediaSample)>> {
        let parser = self
            .parser
            .as_mut()
            .ok_or_else(|| Error::parser("demuxer is not initialized"))?;
        let mut deliveries = Vec::new();
        let mut sink = DemuxerSink {
            streams: &mut self.streams,
            deliveries: &mut deliveries,
            init_received: &mut self.init_received,
        };
        parser
            .parse(&self.buffer[..bytes_read], &mut sink)
            .map_err(|e| match e {
                Error::ParserFailure(message) => Error::ParserFailure(format!(
                    "cannot parse media file {}: {message}",
                    self.file_name
                )),
                other => other,
            })?;
        Ok(deliveries)
    }

    /// Read and parse one chunk of input. Samples for pushing streams are
    /// returned for delivery; others are buffered in their streams.
    pub fn parse(&mut self) -> Result<Vec<(usize, MediaSample)>> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| Error::FileFailure("demuxer file is not open".into()))?;
        let bytes_read = file
            .read(&mut self.buffer)
            .map_err(|e| Error::FileFailure(format!("cannot read file {}: {e}", self.file_name)))?;
        if bytes_read == 0 {
            return Err(Error::EndOfStream);
        }
        self.feed(bytes_read)
    }

    pub fn streams(&self) -> &[MediaStream] {
        &self.streams
    }

    pub fn stream_info(&self, index: usize) -> Arc<StreamInfo> {
        Arc::clone(self.streams[index].info())
    }

    /// Attach a stream to the muxer at `muxer_index`.
    pub fn connect_stream(&mut self, stream_index: usize, muxer_index: usize) {
        self.streams[stream_index].connect(muxer_index);
    }

    /// Start every stream in the given mode. Connected streams switch to
    /// the active state; unconnected ones disconnect and drop their buffers.
    /// Returns flushed `(stream_index, sample)` pairs in push mode.
    pub fn start_streams(
        &mut self,
        operation: MediaStreamOperation,
    ) -> Vec<(usize, MediaSample)> {
        let mut flushed = Vec::new();
        for (index, stream) in self.streams.iter_mut().enumerate() {
            for sample in stream.start(operation) {
                flushed.push((index, sample));
            }
        }
        flushed
    }

    /// Pull the next sample of one stream, parsing more input on demand.
    /// Returns [`Error::EndOfStream`] at the end of the file.
    pub fn pull_sample(&mut self, stream_index: usize) -> Result<MediaSample> {
        loop {
            if let Some(sample) = self.streams[stream_index].pull_sample() {
                return Ok(sample);
            }
            self.parse()?;
        }
    }

    /// Put a sample back at the head of a stream's queue.
    pub fn unread_sample(&mut self, stream_index: usize, sample: MediaSample) {
        self.streams[stream_index].unread_sample(sample);
    }

    /// Push-mode driver: start all streams pushing, parse the whole file,
    /// deliver samples to the connected muxers as they appear, and finalize
    /// the muxers at end of stream.
    pub fn run(&mut self, muxers: &mut [Mp4Muxer]) -> Result<()> {
        let flushed = self.start_streams(MediaStreamOperation::Push);
        for (stream_index, sample) in flushed {
            deliver(&self.streams, muxers, stream_index, sample)?;
        }

        loop {
            match self.parse() {
                Ok(deliveries) => {
                    for (stream_index, sample) in deliveries {
                        deliver(&self.streams, muxers, stream_index, sample)?;
                    }
                }
                Err(e) if e.is_end_of_stream() => break,
                Err(e) => return Err(e),
            }
        }

        // Signal end of stream to every pushing stream's muxer.
        for stream_index in 0..self.streams.len() {
            if self.streams[stream_index].state() == StreamState::Pushing {
                deliver(
                    &self.streams,
                    muxers,
                    stream_index,
                    MediaSample::end_of_stream(),
                )?;
            }
        }
        Ok(())
    }
}

fn deliver(
    streams: &[MediaStream],
    muxers: &mut [Mp4Muxer],
    stream_index: usize,
    mut sample: MediaSample,
) -> Result<()> {
    let Some(muxer_index) = streams[stream_index].muxer_index() else {
        return Ok(());
    };
    match muxers[muxer_index].add_sample(stream_index, &mut sample) {
        Ok(()) => Ok(()),
        Err(Error::FragmentFinalized) => Err(Error::muxer(
            "fragment finalized while pushing; use the pull loop for multi-stream muxing",
        )),
        Err(e) => Err(e),
    }
}
