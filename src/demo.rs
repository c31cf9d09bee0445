//! Synthetic MPEG-TS-like input used when no real input is given.

use demux_bus::{AvStream, MemoryInput, Rational, RawPacket};

const VIDEO_TB: Rational = Rational::new(1, 90_000);
const AUDIO_TB: Rational = Rational::new(1, 48_000);

/// Two seconds of 25 fps video and 48 kHz audio. Video starts mid-GOP and
/// the timestamps jump forward by an hour halfway through.
pub fn input() -> MemoryInput {
    let streams = vec![
        AvStream::video(0, VIDEO_TB, Rational::new(25, 1))
            .with_codec_name("h264")
            .with_size(1280, 720)
            .with_wrap_bits(33)
            .with_default(true),
        AvStream::audio(1, AUDIO_TB, 48_000, 1024)
            .with_codec_name("aac")
            .with_wrap_bits(33),
    ];

    let jump_video = 3600 * 90_000;
    let jump_audio = 3600 * 48_000;
    let mut input = MemoryInput::new(streams)
        .with_format_name("mpegts")
        .with_start_time(0)
        .with_ts_discontinuous(true);

    let mut audio = 0;
    for i in 0..50i64 {
        let video_jump = if i >= 25 { jump_video } else { 0 };
        input.push_packet(
            RawPacket::new(0, vec![0u8; 1200])
                .with_ts(i * 3600 + video_jump)
                .with_duration(3600)
                .with_key(i % 12 == 3),
        );
        // 1024-sample frames until audio catches up with video
        while audio * 1024 * 90_000 < (i + 1) * 3600 * 48_000 {
            let audio_jump = if i >= 25 { jump_audio } else { 0 };
            input.push_packet(
                RawPacket::new(1, vec![1u8; 300])
                    .with_ts(audio * 1024 + audio_jump)
                    .with_duration(1024)
                    .with_key(true),
            );
            audio += 1;
        }
    }
    input
}
