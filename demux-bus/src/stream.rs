use std::fmt;

use crate::rational::Rational;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MediaType {
    Video,
    Audio,
    Subtitle,
    Data,
    Attachment,
    Unknown,
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MediaType::Video => "video",
            MediaType::Audio => "audio",
            MediaType::Subtitle => "subtitle",
            MediaType::Data => "data",
            MediaType::Attachment => "attachment",
            MediaType::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Per-stream metadata exposed by the container.
#[derive(Clone, Debug)]
pub struct AvStream {
    index: usize,
    media_type: MediaType,
    codec_name: String,
    time_base: Rational,
    /// Bit width of the container's timestamp counter.
    wrap_bits: u32,
    /// Average frame rate from the container; drives the first-DTS seed.
    rate: Rational,
    /// Codec-level frame rate; drives field-based DTS prediction.
    codec_frame_rate: Rational,
    video_delay: i32,
    /// Codec carries field/repeat-field information (interlaced content).
    field_coded: bool,
    sample_rate: u32,
    frame_size: u32,
    channels: u32,
    width: u32,
    height: u32,
    is_default: bool,
    duration: Option<i64>,
}

impl AvStream {
    pub fn new(index: usize, media_type: MediaType, time_base: Rational) -> Self {
        Self {
            index,
            media_type,
            codec_name: "unknown".to_string(),
            time_base,
            wrap_bits: 64,
            rate: Rational::default(),
            codec_frame_rate: Rational::default(),
            video_delay: 0,
            field_coded: false,
            sample_rate: 0,
            frame_size: 0,
            channels: 0,
            width: 0,
            height: 0,
            is_default: false,
            duration: None,
        }
    }

    pub fn video(index: usize, time_base: Rational, rate: Rational) -> Self {
        Self::new(index, MediaType::Video, time_base)
            .with_rate(rate)
            .with_codec_frame_rate(rate)
    }

    pub fn audio(index: usize, time_base: Rational, sample_rate: u32, frame_size: u32) -> Self {
        Self::new(index, MediaType::Audio, time_base).with_audio_format(sample_rate, frame_size, 2)
    }

    pub fn with_codec_name(mut self, name: &str) -> Self {
        self.codec_name = name.to_string();
        self
    }

    pub fn with_wrap_bits(mut self, wrap_bits: u32) -> Self {
        self.wrap_bits = wrap_bits;
        self
    }

    pub fn with_rate(mut self, rate: Rational) -> Self {
        self.rate = rate;
        self
    }

    pub fn with_codec_frame_rate(mut self, rate: Rational) -> Self {
        self.codec_frame_rate = rate;
        self
    }

    pub fn with_video_delay(mut self, video_delay: i32) -> Self {
        self.video_delay = video_delay;
        self
    }

    pub fn with_field_coding(mut self, field_coded: bool) -> Self {
        self.field_coded = field_coded;
        self
    }

    pub fn with_audio_format(mut self, sample_rate: u32, frame_size: u32, channels: u32) -> Self {
        self.sample_rate = sample_rate;
        self.frame_size = frame_size;
        self.channels = channels;
        self
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_default(mut self, is_default: bool) -> Self {
        self.is_default = is_default;
        self
    }

    pub fn with_duration(mut self, duration: Option<i64>) -> Self {
        self.duration = duration;
        self
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn media_type(&self) -> MediaType {
        self.media_type
    }

    pub fn codec_name(&self) -> &str {
        &self.codec_name
    }

    pub fn time_base(&self) -> Rational {
        self.time_base
    }

    pub fn wrap_bits(&self) -> u32 {
        self.wrap_bits
    }

    pub fn rate(&self) -> Rational {
        self.rate
    }

    pub fn codec_frame_rate(&self) -> Rational {
        self.codec_frame_rate
    }

    pub fn video_delay(&self) -> i32 {
        self.video_delay
    }

    pub fn is_field_coded(&self) -> bool {
        self.field_coded
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn frame_size(&self) -> u32 {
        self.frame_size
    }

    pub fn channels(&self) -> u32 {
        self.channels
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn is_default(&self) -> bool {
        self.is_default
    }

    /// Stream duration in `time_base` units.
    pub fn duration(&self) -> Option<i64> {
        self.duration
    }

    pub fn is_video(&self) -> bool {
        self.media_type == MediaType::Video
    }

    pub fn is_audio(&self) -> bool {
        self.media_type == MediaType::Audio
    }

    pub fn fps(&self) -> f32 {
        self.rate.to_f64() as f32
    }
}

/// The `n`-th stream (zero-based) of `kind`, in container order.
pub(crate) fn nth_of_kind(streams: &[AvStream], kind: MediaType, n: usize) -> Option<&AvStream> {
    streams.iter().filter(|s| s.media_type == kind).nth(n)
}

/// The default-disposition stream of `kind`, else the first one.
pub(crate) fn best_of_kind(streams: &[AvStream], kind: MediaType) -> Option<&AvStream> {
    let mut candidates = streams.iter().filter(|s| s.media_type == kind);
    let first = candidates.clone().next();
    candidates.find(|s| s.is_default).or(first)
}

#[cfg(feature = "ffmpeg")]
impl From<ffmpeg_next::format::stream::Stream<'_>> for AvStream {
    fn from(stream: ffmpeg_next::format::stream::Stream<'_>) -> Self {
        use ffmpeg_next::ffi;

        let parameters = stream.parameters();
        let media_type = match parameters.medium() {
            ffmpeg_next::media::Type::Video => MediaType::Video,
            ffmpeg_next::media::Type::Audio => MediaType::Audio,
            ffmpeg_next::media::Type::Subtitle => MediaType::Subtitle,
            ffmpeg_next::media::Type::Data => MediaType::Data,
            ffmpeg_next::media::Type::Attachment => MediaType::Attachment,
            ffmpeg_next::media::Type::Unknown => MediaType::Unknown,
        };
        let duration = match stream.duration() {
            d if d == ffi::AV_NOPTS_VALUE || d < 0 => None,
            d => Some(d),
        };

        let (wrap_bits, is_default) = unsafe {
            let ptr = stream.as_ptr();
            (
                (*ptr).pts_wrap_bits.max(0) as u32,
                ((*ptr).disposition & ffi::AV_DISPOSITION_DEFAULT as i32) != 0,
            )
        };

        let (codec_frame_rate, video_delay, sample_rate, frame_size, channels, width, height) = unsafe {
            let par = parameters.as_ptr() as *const ffi::AVCodecParameters;
            (
                Rational::new((*par).framerate.num, (*par).framerate.den),
                (*par).video_delay,
                (*par).sample_rate.max(0) as u32,
                (*par).frame_size.max(0) as u32,
                (*par).ch_layout.nb_channels.max(0) as u32,
                (*par).width.max(0) as u32,
                (*par).height.max(0) as u32,
            )
        };

        let field_coded = unsafe {
            let descriptor = ffi::avcodec_descriptor_get(parameters.id().into());
            !descriptor.is_null()
                && ((*descriptor).props & ffi::AV_CODEC_PROP_FIELDS as i32) != 0
        };

        Self {
            index: stream.index(),
            media_type,
            codec_name: format!("{:?}", parameters.id()).to_lowercase(),
            time_base: stream.time_base().into(),
            wrap_bits,
            rate: stream.avg_frame_rate().into(),
            codec_frame_rate,
            video_delay,
            field_coded,
            sample_rate,
            frame_size,
            channels,
            width,
            height,
            is_default,
            duration,
        }
    }
}
