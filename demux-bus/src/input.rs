use bitflags::bitflags;

use crate::{metadata::FormatInfo, packet::RawPacket, stream::AvStream};

bitflags! {
    /// Seek behaviour flags, bit-compatible with `AVSEEK_FLAG_*`.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct SeekFlags: u32 {
        const NONE = 0;
        /// Seek to the nearest keyframe at or before the target.
        const BACKWARD = 1;
        /// Target is a byte position.
        const BYTE = 2;
        /// Allow landing on non-keyframes.
        const ANY = 4;
        /// Target is a frame number.
        const FRAME = 8;
    }
}

/// A seek as handed to the container.
///
/// Timestamps are in the stream's time base, or in microseconds when
/// `stream_index` is `None`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SeekRequest {
    pub stream_index: Option<usize>,
    pub timestamp: i64,
    /// Acceptable `(min, max)` window; `None` for a point seek.
    pub range: Option<(i64, i64)>,
    pub flags: SeekFlags,
}

/// Sequential container reader.
///
/// Implementations may block in `read_packet` and `seek`; the demuxer only
/// ever calls them from one task at a time.
pub trait PacketSource: Send {
    fn streams(&self) -> &[AvStream];

    fn format_info(&self) -> FormatInfo;

    /// Container start time in microseconds.
    fn start_time(&self) -> Option<i64>;

    /// The format allows arbitrary timestamp resets (e.g. MPEG-TS).
    fn ts_discontinuous(&self) -> bool;

    /// Repeat-field count of the last parsed picture; `None` without a parser.
    fn repeat_pict(&self, _stream_index: usize) -> Option<i32> {
        None
    }

    /// `Ok(None)` at end of stream.
    fn read_packet(&mut self) -> anyhow::Result<Option<RawPacket>>;

    fn seek(&mut self, request: &SeekRequest) -> anyhow::Result<()>;
}

#[cfg(feature = "ffmpeg")]
pub use self::av::AvInput;

#[cfg(feature = "ffmpeg")]
mod av {
    use std::ffi::CString;
    use std::path::Path;

    use ffmpeg_next::{Dictionary, ffi};

    use super::{PacketSource, SeekRequest};
    use crate::{metadata::FormatInfo, packet::RawPacket, rational::Rational, stream::AvStream};

    /// FFmpeg-backed container input.
    pub struct AvInput {
        inner: ffmpeg_next::format::context::Input,
        streams: Vec<AvStream>,
    }

    impl AvInput {
        /// Resolve input format by name (e.g. "mpegts", "lavfi") via FFmpeg's av_find_input_format.
        fn find_input_format(name: &str) -> anyhow::Result<ffmpeg_next::format::format::Input> {
            let cname = CString::new(name)
                .map_err(|e| anyhow::anyhow!("invalid format name {:?}: {}", name, e))?;
            let ptr = unsafe { ffi::av_find_input_format(cname.as_ptr()) };
            if ptr.is_null() {
                return Err(anyhow::anyhow!("input format not found: {}", name));
            }
            Ok(unsafe { ffmpeg_next::format::format::Input::wrap(ptr as *mut _) })
        }

        pub fn new(
            url: &str,
            format: Option<&str>,
            options: Option<Dictionary>,
        ) -> anyhow::Result<Self> {
            use ffmpeg_next::format::format::Format;

            let path = Path::new(url);
            let input = match (format, options) {
                (Some(fmt_name), opts) => {
                    let fmt = Self::find_input_format(fmt_name)?;
                    let ctx = ffmpeg_next::format::open_with(
                        path,
                        &Format::Input(fmt),
                        opts.unwrap_or_else(Dictionary::new),
                    )?;
                    ctx.input()
                }
                (None, Some(opts)) => ffmpeg_next::format::input_with_dictionary(path, opts)?,
                (None, None) => ffmpeg_next::format::input(path)?,
            };

            let streams = input.streams().map(AvStream::from).collect();
            Ok(Self {
                inner: input,
                streams,
            })
        }

        fn time_base_of(&self, index: usize) -> Rational {
            self.streams
                .get(index)
                .map(|s| s.time_base())
                .unwrap_or_default()
        }
    }

    impl PacketSource for AvInput {
        fn streams(&self) -> &[AvStream] {
            &self.streams
        }

        fn format_info(&self) -> FormatInfo {
            // duration is in 1/AV_TIME_BASE seconds
            let duration_sec = match self.inner.duration() {
                d if d == ffi::AV_NOPTS_VALUE || d <= 0 => None,
                d => Some(d as f64 / 1_000_000.0),
            };
            FormatInfo {
                format_name: self.inner.format().name().to_string(),
                duration_sec,
                bit_rate: self.inner.bit_rate(),
            }
        }

        fn start_time(&self) -> Option<i64> {
            let start_time = unsafe { (*self.inner.as_ptr()).start_time };
            (start_time != ffi::AV_NOPTS_VALUE).then_some(start_time)
        }

        fn ts_discontinuous(&self) -> bool {
            unsafe {
                let iformat = (*self.inner.as_ptr()).iformat;
                !iformat.is_null() && ((*iformat).flags & ffi::AVFMT_TS_DISCONT as i32) != 0
            }
        }

        fn repeat_pict(&self, stream_index: usize) -> Option<i32> {
            let stream = self.inner.stream(stream_index)?;
            unsafe {
                let parser = ffi::av_stream_get_parser(stream.as_ptr());
                (!parser.is_null()).then(|| (*parser).repeat_pict)
            }
        }

        fn read_packet(&mut self) -> anyhow::Result<Option<RawPacket>> {
            let mut packet = ffmpeg_next::Packet::empty();
            match packet.read(&mut self.inner) {
                Ok(()) => {
                    let time_base = self.time_base_of(packet.stream());
                    Ok(Some(RawPacket::from((&packet, time_base))))
                }
                Err(ffmpeg_next::Error::Eof) => Ok(None),
                Err(e) => Err(anyhow::anyhow!("read packet: {}", e)),
            }
        }

        fn seek(&mut self, request: &SeekRequest) -> anyhow::Result<()> {
            let stream_index = request.stream_index.map(|i| i as i32).unwrap_or(-1);
            let flags = request.flags.bits() as i32;
            let ret = unsafe {
                match request.range {
                    Some((min_ts, max_ts)) => ffi::avformat_seek_file(
                        self.inner.as_mut_ptr(),
                        stream_index,
                        min_ts,
                        request.timestamp,
                        max_ts,
                        flags,
                    ),
                    None => ffi::av_seek_frame(
                        self.inner.as_mut_ptr(),
                        stream_index,
                        request.timestamp,
                        flags,
                    ),
                }
            };
            if ret < 0 {
                return Err(anyhow::anyhow!(
                    "seek to {} (stream {:?}) failed: {}",
                    request.timestamp,
                    request.stream_index,
                    ffmpeg_next::Error::from(ret)
                ));
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seek_flags_match_avseek_bits() {
        let flags = SeekFlags::BACKWARD | SeekFlags::ANY;
        assert_eq!(flags.bits(), 5);
        assert!(flags.contains(SeekFlags::ANY));
        assert!(!flags.contains(SeekFlags::BYTE));
        assert_eq!(SeekFlags::NONE.bits(), 0);
        assert_eq!(SeekFlags::from_bits(8), Some(SeekFlags::FRAME));
        assert_eq!(SeekFlags::from_bits(16), None);
    }
}
