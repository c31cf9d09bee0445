//! Error types for demux-bus.

use crate::stream::MediaType;

pub type Result<T> = std::result::Result<T, DemuxError>;

#[derive(Debug, thiserror::Error)]
pub enum DemuxError {
    #[error("stream not found: {index}")]
    StreamNotFound { index: usize },

    #[error("no {kind} stream in input")]
    NoStream { kind: MediaType },

    #[error("demuxer is closed")]
    Closed,

    /// Failure reported by the container (open, seek).
    #[error("source error: {0:#}")]
    Source(#[from] anyhow::Error),

    /// The dispatcher task died; dispatch cannot continue.
    #[error("dispatcher failed: {0}")]
    Dispatcher(String),
}

impl DemuxError {
    pub fn stream_not_found(index: usize) -> Self {
        Self::StreamNotFound { index }
    }
}
