//! Scripted in-memory container.
//!
//! Serves a fixed packet list in order, like a file that has already been
//! parsed. Used by tests and by tools that synthesise input.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use crate::{
    input::{PacketSource, SeekFlags, SeekRequest},
    metadata::FormatInfo,
    packet::RawPacket,
    rational::{TIME_BASE_Q, rescale_q},
    stream::AvStream,
};

pub struct MemoryInput {
    format_name: String,
    streams: Vec<AvStream>,
    packets: Vec<RawPacket>,
    position: usize,
    start_time: Option<i64>,
    ts_discontinuous: bool,
    repeat_pict: HashMap<usize, i32>,
    fail_at: Option<usize>,
    reads: Arc<AtomicUsize>,
}

impl MemoryInput {
    pub fn new(streams: Vec<AvStream>) -> Self {
        Self {
            format_name: "memory".to_string(),
            streams,
            packets: Vec::new(),
            position: 0,
            start_time: None,
            ts_discontinuous: false,
            repeat_pict: HashMap::new(),
            fail_at: None,
            reads: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_format_name(mut self, name: &str) -> Self {
        self.format_name = name.to_string();
        self
    }

    /// Packets get their stream's time base unless one is already set.
    pub fn with_packets(mut self, packets: impl IntoIterator<Item = RawPacket>) -> Self {
        for packet in packets {
            self.push_packet(packet);
        }
        self
    }

    pub fn push_packet(&mut self, mut packet: RawPacket) {
        if !packet.time_base().is_valid() {
            if let Some(stream) = self.streams.get(packet.index()) {
                packet.set_time_base(stream.time_base());
            }
        }
        self.packets.push(packet);
    }

    /// Start time in microseconds.
    pub fn with_start_time(mut self, start_time: i64) -> Self {
        self.start_time = Some(start_time);
        self
    }

    pub fn with_ts_discontinuous(mut self, enabled: bool) -> Self {
        self.ts_discontinuous = enabled;
        self
    }

    pub fn with_repeat_pict(mut self, stream_index: usize, repeat_pict: i32) -> Self {
        self.repeat_pict.insert(stream_index, repeat_pict);
        self
    }

    /// The read with this zero-based number (and every later one) fails.
    pub fn with_failure_at(mut self, read_number: usize) -> Self {
        self.fail_at = Some(read_number);
        self
    }

    /// Shared counter of physical `read_packet` calls.
    pub fn read_counter(&self) -> Arc<AtomicUsize> {
        self.reads.clone()
    }

    pub fn position(&self) -> usize {
        self.position
    }

    fn to_microseconds(&self, packet: &RawPacket) -> Option<i64> {
        packet
            .pts()
            .or(packet.dts())
            .map(|ts| rescale_q(ts, packet.time_base(), TIME_BASE_Q))
    }

    fn seek_position(&self, request: &SeekRequest) -> anyhow::Result<usize> {
        if request.flags.contains(SeekFlags::BYTE) || request.flags.contains(SeekFlags::FRAME) {
            return Ok((request.timestamp.max(0) as usize).min(self.packets.len()));
        }

        let target = match request.stream_index {
            Some(index) => {
                let stream = self
                    .streams
                    .get(index)
                    .ok_or_else(|| anyhow::anyhow!("seek: stream {} not found", index))?;
                rescale_q(request.timestamp, stream.time_base(), TIME_BASE_Q)
            }
            None => request.timestamp,
        };
        let (min_ts, max_ts) = match (request.range, request.stream_index) {
            (Some((min, max)), Some(index)) => {
                let tb = self.streams[index].time_base();
                (rescale_q(min, tb, TIME_BASE_Q), rescale_q(max, tb, TIME_BASE_Q))
            }
            (Some(range), None) => range,
            (None, _) => (i64::MIN, i64::MAX),
        };

        let any = request.flags.contains(SeekFlags::ANY);
        let candidates = self.packets.iter().enumerate().filter(|(_, p)| {
            request.stream_index.is_none_or(|index| p.index() == index) && (any || p.is_key())
        });

        let chosen = if request.flags.contains(SeekFlags::BACKWARD) {
            candidates
                .filter_map(|(i, p)| self.to_microseconds(p).map(|ts| (i, ts)))
                .filter(|(_, ts)| *ts <= target && *ts >= min_ts)
                .last()
        } else {
            candidates
                .filter_map(|(i, p)| self.to_microseconds(p).map(|ts| (i, ts)))
                .find(|(_, ts)| *ts >= target && *ts <= max_ts)
        };

        chosen
            .map(|(i, _)| i)
            .ok_or_else(|| anyhow::anyhow!("seek: no position for timestamp {}", request.timestamp))
    }
}

impl PacketSource for MemoryInput {
    fn streams(&self) -> &[AvStream] {
        &self.streams
    }

    fn format_info(&self) -> FormatInfo {
        let end = self
            .packets
            .iter()
            .filter_map(|p| {
                let duration = rescale_q(p.duration(), p.time_base(), TIME_BASE_Q);
                self.to_microseconds(p).map(|ts| ts + duration)
            })
            .max();
        FormatInfo {
            format_name: self.format_name.clone(),
            duration_sec: end.map(|us| (us - self.start_time.unwrap_or(0)) as f64 / 1_000_000.0),
            bit_rate: 0,
        }
    }

    fn start_time(&self) -> Option<i64> {
        self.start_time
    }

    fn ts_discontinuous(&self) -> bool {
        self.ts_discontinuous
    }

    fn repeat_pict(&self, stream_index: usize) -> Option<i32> {
        self.repeat_pict.get(&stream_index).copied()
    }

    fn read_packet(&mut self) -> anyhow::Result<Option<RawPacket>> {
        let read_number = self.reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_at.is_some_and(|n| read_number >= n) {
            return Err(anyhow::anyhow!("read packet: simulated I/O error"));
        }
        let packet = self.packets.get(self.position).cloned();
        if packet.is_some() {
            self.position += 1;
        }
        Ok(packet)
    }

    fn seek(&mut self, request: &SeekRequest) -> anyhow::Result<()> {
        self.position = self.seek_position(request)?;
        Ok(())
    }
}
