//! Media metadata summary (similar to ffprobe).

use std::fmt;

use crate::stream::AvStream;

/// Format-level info (corresponds to ffprobe format).
#[derive(Debug, Clone, Default)]
pub struct FormatInfo {
    /// Format name, e.g. "mov,mp4,m4a,3gp,3g2,mj2"
    pub format_name: String,
    /// Duration in seconds; None if unknown (e.g. raw h264).
    pub duration_sec: Option<f64>,
    /// Total bitrate in bps; 0 if unknown.
    pub bit_rate: i64,
}

/// Per-stream info (corresponds to ffprobe stream).
#[derive(Debug, Clone)]
pub struct StreamInfo {
    pub index: usize,
    /// Type: "video" | "audio" | "subtitle" etc.
    pub codec_type: String,
    pub codec_name: String,
    /// Time base, e.g. "1/90000"
    pub time_base: String,
    /// Stream duration in time_base units; None if unknown.
    pub duration_ts: Option<i64>,
    /// Average frame rate, e.g. "10/1"
    pub rate: String,
    pub wrap_bits: u32,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub sample_rate: Option<u32>,
    pub channels: Option<u32>,
}

impl From<&AvStream> for StreamInfo {
    fn from(stream: &AvStream) -> Self {
        let (width, height, sample_rate, channels) = if stream.is_video() {
            (Some(stream.width()), Some(stream.height()), None, None)
        } else if stream.is_audio() {
            (None, None, Some(stream.sample_rate()), Some(stream.channels()))
        } else {
            (None, None, None, None)
        };

        Self {
            index: stream.index(),
            codec_type: stream.media_type().to_string(),
            codec_name: stream.codec_name().to_string(),
            time_base: stream.time_base().to_string(),
            duration_ts: stream.duration(),
            rate: stream.rate().to_string(),
            wrap_bits: stream.wrap_bits(),
            width,
            height,
            sample_rate,
            channels,
        }
    }
}

/// Full probe result (format + streams, like ffprobe).
#[derive(Debug, Clone)]
pub struct MediaInfo {
    pub format: FormatInfo,
    pub streams: Vec<StreamInfo>,
}

impl MediaInfo {
    pub fn new(format: FormatInfo, streams: &[AvStream]) -> Self {
        Self {
            format,
            streams: streams.iter().map(StreamInfo::from).collect(),
        }
    }

    pub fn nb_streams(&self) -> usize {
        self.streams.len()
    }
}

impl fmt::Display for MediaInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "[FORMAT]")?;
        writeln!(f, "format_name={}", self.format.format_name)?;
        if let Some(d) = self.format.duration_sec {
            writeln!(f, "duration_sec={:.3}", d)?;
        } else {
            writeln!(f, "duration_sec=N/A")?;
        }
        writeln!(f, "bit_rate={}", self.format.bit_rate)?;
        writeln!(f, "nb_streams={}", self.nb_streams())?;
        writeln!(f, "[/FORMAT]")?;
        for s in &self.streams {
            writeln!(f, "[STREAM]")?;
            writeln!(f, "index={}", s.index)?;
            writeln!(f, "codec_type={}", s.codec_type)?;
            writeln!(f, "codec_name={}", s.codec_name)?;
            writeln!(f, "time_base={}", s.time_base)?;
            if let Some(d) = s.duration_ts {
                writeln!(f, "duration_ts={}", d)?;
            }
            writeln!(f, "rate={}", s.rate)?;
            writeln!(f, "pts_wrap_bits={}", s.wrap_bits)?;
            if let Some(w) = s.width {
                writeln!(f, "width={}", w)?;
            }
            if let Some(h) = s.height {
                writeln!(f, "height={}", h)?;
            }
            if let Some(sr) = s.sample_rate {
                writeln!(f, "sample_rate={}", sr)?;
            }
            if let Some(c) = s.channels {
                writeln!(f, "channels={}", c)?;
            }
            writeln!(f, "[/STREAM]")?;
        }
        Ok(())
    }
}
