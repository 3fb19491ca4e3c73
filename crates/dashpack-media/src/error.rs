//! Error types for dashpack-media.

use std::io;
use thiserror::Error;

/// Result type for dashpack-media operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for dashpack-media operations.
///
/// The last two variants are control signals rather than failures: they are
/// consumed by the push/pull loops and never surface to the user.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// File open/read/write failed.
    #[error("File failure: {0}")]
    FileFailure(String),

    /// Bitstream or box structure could not be parsed.
    #[error("Parser failure: {0}")]
    ParserFailure(String),

    /// Unsupported container, codec or feature.
    #[error("Unimplemented: {0}")]
    Unimplemented(String),

    /// Muxing failed (encryption init, offset patching, subsample mismatch).
    #[error("Muxer failure: {0}")]
    MuxerFailure(String),

    /// Invalid caller-supplied argument or option.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The current fragment is finalized; the pull loop should switch streams.
    #[error("fragment finalized")]
    FragmentFinalized,

    /// Normal end of stream.
    #[error("end of stream")]
    EndOfStream,
}

impl Error {
    /// Create a parser failure error.
    pub fn parser(msg: impl Into<String>) -> Self {
        Self::ParserFailure(msg.into())
    }

    /// Create a muxer failure error.
    pub fn muxer(msg: impl Into<String>) -> Self {
        Self::MuxerFailure(msg.into())
    }

    /// True for the non-fatal stream-switch signal.
    pub fn is_fragment_finalized(&self) -> bool {
        matches!(self, Self::FragmentFinalized)
    }

    /// True for the non-fatal end-of-stream signal.
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, Self::EndOfStream)
    }
}
