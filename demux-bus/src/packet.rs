use std::pin::Pin;

use bytes::Bytes;
use futures::Stream;

use crate::rational::Rational;

/// What a `packets()` session yields: corrected packets, then one `EOF`.
pub type PacketStream = Pin<Box<dyn Stream<Item = RawPacketCmd> + Send>>;

#[derive(Clone, Debug)]
pub enum RawPacketCmd {
    Data(RawPacket),
    EOF,
}

impl RawPacketCmd {
    pub fn into_packet(self) -> Option<RawPacket> {
        match self {
            RawPacketCmd::Data(packet) => Some(packet),
            RawPacketCmd::EOF => None,
        }
    }

    pub fn is_eof(&self) -> bool {
        matches!(self, RawPacketCmd::EOF)
    }
}

/// A compressed data unit of one stream.
///
/// Cloning shares the payload; timestamps are per clone.
#[derive(Clone, Debug)]
pub struct RawPacket {
    stream_index: usize,
    pts: Option<i64>,
    dts: Option<i64>,
    duration: i64,
    time_base: Rational,
    data: Bytes,
    is_key: bool,
}

impl RawPacket {
    pub fn new(stream_index: usize, data: impl Into<Bytes>) -> Self {
        Self {
            stream_index,
            pts: None,
            dts: None,
            duration: 0,
            time_base: Rational::default(),
            data: data.into(),
            is_key: false,
        }
    }

    pub fn with_pts(mut self, pts: i64) -> Self {
        self.pts = Some(pts);
        self
    }

    pub fn with_dts(mut self, dts: i64) -> Self {
        self.dts = Some(dts);
        self
    }

    /// Sets pts and dts to the same value.
    pub fn with_ts(self, ts: i64) -> Self {
        self.with_pts(ts).with_dts(ts)
    }

    pub fn with_duration(mut self, duration: i64) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_time_base(mut self, time_base: Rational) -> Self {
        self.time_base = time_base;
        self
    }

    pub fn with_key(mut self, is_key: bool) -> Self {
        self.is_key = is_key;
        self
    }

    pub fn pts(&self) -> Option<i64> {
        self.pts
    }

    pub fn dts(&self) -> Option<i64> {
        self.dts
    }

    pub fn set_pts(&mut self, pts: Option<i64>) {
        self.pts = pts;
    }

    pub fn set_dts(&mut self, dts: Option<i64>) {
        self.dts = dts;
    }

    pub fn duration(&self) -> i64 {
        self.duration
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn index(&self) -> usize {
        self.stream_index
    }

    pub fn data(&self) -> Bytes {
        self.data.clone()
    }

    pub fn is_key(&self) -> bool {
        self.is_key
    }

    pub fn time_base(&self) -> Rational {
        self.time_base
    }

    pub fn set_time_base(&mut self, time_base: Rational) {
        self.time_base = time_base;
    }
}

#[cfg(feature = "ffmpeg")]
impl From<(&ffmpeg_next::codec::packet::Packet, Rational)> for RawPacket {
    fn from((packet, time_base): (&ffmpeg_next::codec::packet::Packet, Rational)) -> Self {
        Self {
            stream_index: packet.stream(),
            pts: packet.pts(),
            dts: packet.dts(),
            duration: packet.duration(),
            time_base,
            data: packet
                .data()
                .map(Bytes::copy_from_slice)
                .unwrap_or_default(),
            is_key: packet.is_key(),
        }
    }
}
