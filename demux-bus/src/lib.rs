//! Packet demultiplexing with timestamp correction and multi-consumer
//! fan-out.
//!
//! A [`Demuxer`] reads one input with a single task, corrects packet
//! timestamps (counter wrap, discontinuities, DTS prediction) and hands the
//! packets to any number of consumers. [`SyncDemuxer`] does the same on the
//! caller's thread for a single consumer.

/// Registers FFmpeg components. Call once at startup before opening inputs.
#[cfg(feature = "ffmpeg")]
pub fn init() -> anyhow::Result<()> {
    ffmpeg_next::init().map_err(|e| anyhow::anyhow!("ffmpeg_next init: {}", e))
}

pub mod demuxer;
mod dispatcher;
pub mod error;
pub mod input;
pub mod memory;
pub mod metadata;
pub mod options;
pub mod packet;
pub mod rational;
pub mod reader;
mod session;
pub mod stream;
pub mod sync;
pub mod timestamp;

pub use demuxer::Demuxer;
pub use error::{DemuxError, Result};
#[cfg(feature = "ffmpeg")]
pub use input::AvInput;
pub use input::{PacketSource, SeekFlags, SeekRequest};
pub use memory::MemoryInput;
pub use metadata::{FormatInfo, MediaInfo, StreamInfo};
pub use options::DemuxOptions;
pub use packet::{PacketStream, RawPacket, RawPacketCmd};
pub use rational::Rational;
pub use stream::{AvStream, MediaType};
pub use sync::SyncDemuxer;
