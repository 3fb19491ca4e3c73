//! Per-track sample queue mediating between demuxer (push) and muxer
//! (pull).
//!
//! The same stream object supports both directions: in push mode the
//! demuxer drives and samples flow straight to the muxer; in pull mode the
//! muxer drives and samples accumulate here until pulled.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::media_sample::MediaSample;
use crate::stream_info::StreamInfo;

/// Connection state of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Connected,
    Pushing,
    Pulling,
    /// Not connected to any muxer; all samples are dropped.
    Disconnected,
}

/// Which side drives the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaStreamOperation {
    Push,
    Pull,
}

/// What to do with a freshly pushed sample.
#[derive(Debug)]
pub enum PushOutcome {
    /// The sample was buffered.
    Queued,
    /// The stream is pushing; the caller must deliver the sample to the
    /// connected muxer now.
    Deliver(MediaSample),
    /// The stream is disconnected; the sample was discarded.
    Dropped,
}

/// One elementary stream of a demuxer.
pub struct MediaStream {
    info: Arc<StreamInfo>,
    samples: VecDeque<MediaSample>,
    state: StreamState,
    muxer_index: Option<usize>,
}

impl MediaStream {
    pub fn new(info: Arc<StreamInfo>) -> Self {
        Self {
            info,
            samples: VecDeque::new(),
            state: StreamState::Idle,
            muxer_index: None,
        }
    }

    pub fn info(&self) -> &Arc<StreamInfo> {
        &self.info
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// The muxer this stream feeds, if any.
    pub fn muxer_index(&self) -> Option<usize> {
        self.muxer_index
    }

    /// Attach this stream to a muxer (identified by an index the caller
    /// understands).
    pub fn connect(&mut self, muxer_index: usize) {
        debug_assert_eq!(self.state, StreamState::Idle);
        self.state = StreamState::Connected;
        self.muxer_index = Some(muxer_index);
    }

    /// Start the stream in push or pull mode. An unconnected stream becomes
    /// disconnected and its buffer is discarded. In push mode any buffered
    /// samples are returned for immediate delivery, oldest first.
    pub fn start(&mut self, operation: MediaStreamOperation) -> Vec<MediaSample> {
        match self.state {
            StreamState::Idle => {
                self.state = StreamState::Disconnected;
                self.samples.clear();
                Vec::new()
            }
            StreamState::Connected => {
                match operation {
                    MediaStreamOperation::Push => {
                        self.state = StreamState::Pushing;
                        self.samples.drain(..).collect()
                    }
                    MediaStreamOperation::Pull => {
                        self.state = StreamState::Pulling;
                        Vec::new()
                    }
                }
            }
            // Restarting an active stream in the same direction is a no-op.
            _ => Vec::new(),
        }
    }

    /// Route one sample according to the stream state.
    pub fn push_sample(&mut self, sample: MediaSample) -> PushOutcome {
        match self.state {
            StreamState::Idle | StreamState::Connected | StreamState::Pulling => {
                self.samples.push_back(sample);
                PushOutcome::Queued
            }
            StreamState::Pushing => PushOutcome::Deliver(sample),
            StreamState::Disconnected => PushOutcome::Dropped,
        }
    }

    /// Pop the oldest buffered sample. Only meaningful in pull mode.
    pub fn pull_sample(&mut self) -> Option<MediaSample> {
        debug_assert_eq!(self.state, StreamState::Pulling);
        self.samples.pop_front()
    }

    /// Put a sample back at the head of the queue; used when the muxer
    /// could not accept it because the current fragment is finalized.
    pub fn unread_sample(&mut self, sample: MediaSample) {
        self.samples.push_front(sample);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use crate::stream_info::{AudioCodec, AudioStreamInfo, StreamKind};

    fn stream() -> MediaStream {
        MediaStream::new(Arc::new(StreamInfo {
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
        }))
    }

    fn sample(tag: u8) -> MediaSample {
        MediaSample::copy_from(&[tag], false)
    }

    #[test]
    fn unconnected_stream_drops_samples() {
        let mut s = stream();
        assert!(matches!(s.push_sample(sample(1)), PushOutcome::Queued));
        let flushed = s.start(MediaStreamOperation::Push);
        assert!(flushed.is_empty());
        assert_eq!(s.state(), StreamState::Disconnected);
        assert!(matches!(s.push_sample(sample(2)), PushOutcome::Dropped));
    }

    #[test]
    fn push_mode_flushes_buffered_samples_in_order() {
        let mut s = stream();
        s.push_sample(sample(1));
        s.push_sample(sample(2));
        s.connect(0);
        let flushed = s.start(MediaStreamOperation::Push);
        assert_eq!(flushed.len(), 2);
        assert_eq!(flushed[0].data(), &[1]);
        assert_eq!(flushed[1].data(), &[2]);
        assert!(matches!(s.push_sample(sample(3)), PushOutcome::Deliver(_)));
    }

    #[test]
    fn pull_mode_queues_and_unreads() {
        let mut s = stream();
        s.connect(0);
        s.start(MediaStreamOperation::Pull);
        assert!(s.pull_sample().is_none());
        s.push_sample(sample(1));
        s.push_sample(sample(2));
        let first = s.pull_sample().unwrap();
        assert_eq!(first.data(), &[1]);
        s.unread_sample(first);
        assert_eq!(s.pull_sample().unwrap().data(), &[1]);
        assert_eq!(s.pull_sample().unwrap().data(), &[2]);
    }
}
