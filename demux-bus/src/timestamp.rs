//! Timestamp correction for demuxed packets.
//!
//! Every packet passes through [`TimestampState::correct`], which runs, in
//! order: wrap-around correction, discontinuity offset application and
//! detection, then DTS prediction. Prediction state is kept in microseconds
//! ([`TIME_BASE_Q`]); packet fields stay in the stream's time base.

use std::collections::HashMap;

use crate::{
    options::DemuxOptions,
    packet::RawPacket,
    rational::{Rational, TIME_BASE, TIME_BASE_Q, rescale_q},
    stream::{AvStream, MediaType},
};

/// Per-stream correction state.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StreamTimestamps {
    pub wrap_correction_done: bool,
    pub saw_first_ts: bool,
    /// DTS of the first packet read for this stream.
    pub first_dts: Option<i64>,
    /// Predicted DTS of the next packet.
    pub next_dts: Option<i64>,
    /// DTS of the last packet read for this stream.
    pub dts: Option<i64>,
}

/// State shared by all streams of one input.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Discontinuity {
    /// Offset added to every packet read from now on, in microseconds.
    pub offset: i64,
    /// DTS of the last audio/video packet of any stream.
    pub last_dts: Option<i64>,
}

/// Container facts needed by the corrector.
#[derive(Clone, Copy, Debug, Default)]
pub struct ContainerTiming {
    /// Start time in microseconds.
    pub start_time: Option<i64>,
    /// The format allows arbitrary timestamp resets.
    pub ts_discontinuous: bool,
}

#[derive(Debug, Default)]
pub struct TimestampState {
    streams: HashMap<usize, StreamTimestamps>,
    discontinuity: Discontinuity,
}

impl TimestampState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stream(&self, index: usize) -> Option<&StreamTimestamps> {
        self.streams.get(&index)
    }

    pub fn discontinuity(&self) -> &Discontinuity {
        &self.discontinuity
    }

    pub fn reset(&mut self) {
        self.streams.clear();
        self.discontinuity = Discontinuity::default();
    }

    /// Corrects `packet` in place and updates the prediction for its stream.
    pub fn correct(
        &mut self,
        packet: &mut RawPacket,
        stream: &AvStream,
        timing: ContainerTiming,
        repeat_pict: Option<i32>,
        options: &DemuxOptions,
    ) {
        packet.set_time_base(stream.time_base());
        let ts = self.streams.entry(stream.index()).or_default();

        correct_wrap(packet, stream, ts, timing.start_time);
        process_discontinuity(
            packet,
            stream,
            ts,
            &mut self.discontinuity,
            timing.ts_discontinuous,
            options,
        );
        predict_dts(packet, stream, ts, repeat_pict);
    }
}

/// Undoes a counter wrap of a `wrap_bits`-wide timestamp field.
pub fn correct_wrap(
    packet: &mut RawPacket,
    stream: &AvStream,
    ts: &mut StreamTimestamps,
    start_time: Option<i64>,
) {
    let bits = stream.wrap_bits();
    let Some(start_time) = start_time else {
        return;
    };
    if ts.wrap_correction_done || bits >= 64 || bits == 0 {
        return;
    }

    let stime = rescale_q(start_time, TIME_BASE_Q, packet.time_base());
    let wrap = (1u64 << bits) as i64;
    let stime2 = stime.wrapping_add(wrap);
    let threshold = stime.wrapping_add(1i64 << (bits - 1));
    ts.wrap_correction_done = true;

    if stime2 <= stime {
        return;
    }
    if let Some(dts) = packet.dts().filter(|dts| *dts > threshold) {
        packet.set_dts(Some(dts.wrapping_sub(wrap)));
        ts.wrap_correction_done = false;
    }
    if let Some(pts) = packet.pts().filter(|pts| *pts > threshold) {
        packet.set_pts(Some(pts.wrapping_sub(wrap)));
        ts.wrap_correction_done = false;
    }
}

/// Applies the accumulated discontinuity offset, then looks for a new jump
/// on audio and video streams.
pub fn process_discontinuity(
    packet: &mut RawPacket,
    stream: &AvStream,
    ts: &StreamTimestamps,
    discontinuity: &mut Discontinuity,
    ts_discontinuous: bool,
    options: &DemuxOptions,
) {
    // applies to every stream, not only audio/video
    let offset = rescale_q(discontinuity.offset, TIME_BASE_Q, packet.time_base());
    if let Some(dts) = packet.dts() {
        packet.set_dts(Some(dts.saturating_add(offset)));
    }
    if let Some(pts) = packet.pts() {
        packet.set_pts(Some(pts.saturating_add(offset)));
    }

    let av = matches!(stream.media_type(), MediaType::Video | MediaType::Audio);
    if av && packet.dts().is_some() {
        detect_discontinuity(packet, stream, ts, discontinuity, ts_discontinuous, options);
    }
}

/// Compares the packet DTS with the prediction and corrects or invalidates it.
pub fn detect_discontinuity(
    packet: &mut RawPacket,
    stream: &AvStream,
    ts: &StreamTimestamps,
    discontinuity: &mut Discontinuity,
    ts_discontinuous: bool,
    options: &DemuxOptions,
) {
    let Some(dts) = packet.dts() else {
        return;
    };
    let time_base = packet.time_base();
    let pkt_dts = rescale_q(dts, time_base, TIME_BASE_Q);
    let delta_threshold = options.dts_delta_threshold_us();

    let mut disable_correction = options.copy_ts;
    if options.copy_ts && ts_discontinuous && stream.wrap_bits() < 60 {
        if let Some(next_dts) = ts.next_dts {
            // a jump a wrap explains is still corrected with copy_ts
            let wrapped = dts.saturating_add(1i64 << stream.wrap_bits());
            let wrap_dts = rescale_q(wrapped, time_base, TIME_BASE_Q);
            if wrap_dts.abs_diff(next_dts) < pkt_dts.abs_diff(next_dts) / 10 {
                disable_correction = false;
            }
        }
    }

    match ts.next_dts {
        Some(next_dts) if !disable_correction => {
            let delta = pkt_dts.saturating_sub(next_dts);
            if ts_discontinuous {
                let behind = ts
                    .dts
                    .is_some_and(|last| pkt_dts.saturating_add(TIME_BASE / 10) < last);
                if delta.unsigned_abs() > delta_threshold.unsigned_abs() || behind {
                    discontinuity.offset = discontinuity.offset.saturating_sub(delta);
                    log::warn!(
                        "timestamp discontinuity (stream {}): {}, new offset= {}",
                        stream.index(),
                        delta,
                        discontinuity.offset
                    );
                    shift(packet, delta.saturating_neg());
                }
            } else {
                let error_threshold = options.dts_error_threshold_us();
                if delta.unsigned_abs() > error_threshold.unsigned_abs() {
                    log::warn!(
                        "DTS {}, next:{} st:{} invalid dropping",
                        dts,
                        next_dts,
                        stream.index()
                    );
                    packet.set_dts(None);
                }
                if let Some(pts) = packet.pts() {
                    let pkt_pts = rescale_q(pts, time_base, TIME_BASE_Q);
                    if pkt_pts.abs_diff(next_dts) > error_threshold.unsigned_abs() {
                        log::warn!(
                            "PTS {}, next:{} invalid dropping st:{}",
                            pts,
                            next_dts,
                            stream.index()
                        );
                        packet.set_pts(None);
                    }
                }
            }
        }
        None if !options.copy_ts && ts_discontinuous => {
            if let Some(last_dts) = discontinuity.last_dts {
                let delta = pkt_dts.saturating_sub(last_dts);
                if delta.unsigned_abs() > delta_threshold.unsigned_abs() {
                    discontinuity.offset = discontinuity.offset.saturating_sub(delta);
                    log::debug!(
                        "inter stream timestamp discontinuity {}, new offset= {}",
                        delta,
                        discontinuity.offset
                    );
                    shift(packet, delta.saturating_neg());
                }
            }
        }
        _ => {}
    }

    if let Some(dts) = packet.dts() {
        discontinuity.last_dts = Some(rescale_q(dts, time_base, TIME_BASE_Q));
    }
}

/// Adds `delta` microseconds to both timestamps of `packet`.
fn shift(packet: &mut RawPacket, delta: i64) {
    let delta = rescale_q(delta, TIME_BASE_Q, packet.time_base());
    if let Some(dts) = packet.dts() {
        packet.set_dts(Some(dts.saturating_add(delta)));
    }
    if let Some(pts) = packet.pts() {
        packet.set_pts(Some(pts.saturating_add(delta)));
    }
}

/// Records the packet DTS and predicts the DTS of the stream's next packet.
pub fn predict_dts(
    packet: &RawPacket,
    stream: &AvStream,
    ts: &mut StreamTimestamps,
    repeat_pict: Option<i32>,
) {
    let time_base = packet.time_base();

    if !ts.saw_first_ts {
        let rate = stream.rate();
        let mut first = if rate.is_valid() {
            ((-(stream.video_delay() as i64) * TIME_BASE) as f64 / rate.to_f64()) as i64
        } else {
            0
        };
        if let Some(pts) = packet.pts() {
            first = first.saturating_add(rescale_q(pts, time_base, TIME_BASE_Q));
        }
        ts.dts = Some(first);
        ts.first_dts = Some(first);
        ts.saw_first_ts = true;
    }

    if ts.next_dts.is_none() {
        ts.next_dts = ts.dts;
    }
    if let Some(dts) = packet.dts() {
        let dts = rescale_q(dts, time_base, TIME_BASE_Q);
        ts.dts = Some(dts);
        ts.next_dts = Some(dts);
    }
    ts.dts = ts.next_dts;

    let advance = match stream.media_type() {
        MediaType::Audio => {
            if stream.sample_rate() != 0 && stream.frame_size() != 0 {
                TIME_BASE * stream.frame_size() as i64 / stream.sample_rate() as i64
            } else {
                rescale_q(packet.duration(), time_base, TIME_BASE_Q)
            }
        }
        MediaType::Video => {
            let frame_rate = stream.codec_frame_rate();
            if packet.duration() != 0 {
                rescale_q(packet.duration(), time_base, TIME_BASE_Q)
            } else if frame_rate.is_valid() {
                let fields = match repeat_pict {
                    Some(repeat_pict) if stream.is_field_coded() => 1 + repeat_pict as i64,
                    _ => 2,
                };
                let field_duration = Rational::new(
                    frame_rate.denominator(),
                    frame_rate.numerator().saturating_mul(2),
                );
                rescale_q(fields, field_duration, TIME_BASE_Q)
            } else {
                0
            }
        }
        _ => 0,
    };

    if let Some(next_dts) = ts.next_dts.as_mut() {
        *next_dts = next_dts.saturating_add(advance);
    }
}

#[cfg(test)]
#[path = "timestamp_test.rs"]
mod timestamp_test;
