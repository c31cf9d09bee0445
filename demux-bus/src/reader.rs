//! The single reader of an input: pulls packets from the [`PacketSource`] and
//! runs them through timestamp correction.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use crate::{
    error::{DemuxError, Result},
    input::{PacketSource, SeekFlags, SeekRequest},
    metadata::{FormatInfo, MediaInfo},
    options::DemuxOptions,
    packet::RawPacket,
    rational::{TIME_BASE_Q, seconds_to_ts},
    stream::AvStream,
    timestamp::{ContainerTiming, TimestampState},
};

pub struct PacketReader {
    source: Box<dyn PacketSource>,
    streams: Arc<[AvStream]>,
    format: FormatInfo,
    timing: ContainerTiming,
    options: DemuxOptions,
    timestamps: TimestampState,
    interrupt: Arc<AtomicBool>,
}

impl PacketReader {
    pub fn new(source: Box<dyn PacketSource>, options: DemuxOptions) -> Self {
        let streams: Arc<[AvStream]> = source.streams().to_vec().into();
        let format = source.format_info();
        let timing = ContainerTiming {
            start_time: source.start_time(),
            ts_discontinuous: source.ts_discontinuous(),
        };
        log::debug!(
            "input opened: format={} streams={} start_time={:?} ts_discontinuous={}",
            format.format_name,
            streams.len(),
            timing.start_time,
            timing.ts_discontinuous
        );
        Self {
            source,
            streams,
            format,
            timing,
            options,
            timestamps: TimestampState::new(),
            interrupt: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn streams(&self) -> Arc<[AvStream]> {
        self.streams.clone()
    }

    pub fn options(&self) -> &DemuxOptions {
        &self.options
    }

    pub fn media_info(&self) -> MediaInfo {
        MediaInfo::new(self.format.clone(), &self.streams)
    }

    pub fn timestamps(&self) -> &TimestampState {
        &self.timestamps
    }

    /// Flag that makes the next read report end of stream.
    pub fn interrupt_flag(&self) -> Arc<AtomicBool> {
        self.interrupt.clone()
    }

    /// Reads and corrects the next packet. `Ok(None)` at end of stream or
    /// once interrupted.
    pub fn next_packet(&mut self) -> anyhow::Result<Option<RawPacket>> {
        loop {
            if self.interrupt.load(Ordering::SeqCst) {
                log::debug!("read interrupted");
                return Ok(None);
            }
            let Some(mut packet) = self.source.read_packet()? else {
                return Ok(None);
            };
            let Some(stream) = self.streams.get(packet.index()) else {
                // stream appeared after open; no metadata to correct against
                log::debug!("skip packet of unknown stream {}", packet.index());
                continue;
            };
            let repeat_pict = self.source.repeat_pict(packet.index());
            self.timestamps
                .correct(&mut packet, stream, self.timing, repeat_pict, &self.options);
            return Ok(Some(packet));
        }
    }

    /// Repositions the source and forgets all timestamp history.
    pub fn seek(&mut self, request: &SeekRequest) -> anyhow::Result<()> {
        self.source.seek(request)?;
        self.timestamps.reset();
        log::debug!(
            "seek to {} (stream {:?}, flags {:#x})",
            request.timestamp,
            request.stream_index,
            request.flags.bits()
        );
        Ok(())
    }
}

/// Builds a seek from seconds. Timestamps are expressed in the stream's time
/// base when a stream is named, else in microseconds.
pub(crate) fn seek_request(
    streams: &[AvStream],
    seconds: f64,
    range: Option<(f64, f64)>,
    stream_index: Option<usize>,
    flags: SeekFlags,
) -> Result<SeekRequest> {
    let time_base = match stream_index {
        Some(index) => streams
            .get(index)
            .map(|s| s.time_base())
            .ok_or_else(|| DemuxError::stream_not_found(index))?,
        None => TIME_BASE_Q,
    };
    Ok(SeekRequest {
        stream_index,
        timestamp: seconds_to_ts(seconds, time_base),
        range: range.map(|(min, max)| (seconds_to_ts(min, time_base), seconds_to_ts(max, time_base))),
        flags,
    })
}
