use std::{sync::atomic::Ordering, time::Duration};

use futures::StreamExt;

use super::*;
use crate::{
    memory::MemoryInput,
    packet::{RawPacket, RawPacketCmd},
    rational::Rational,
};

const VIDEO_TB: Rational = Rational::new(1, 90_000);
const AUDIO_TB: Rational = Rational::new(1, 48_000);
const WAIT: Duration = Duration::from_secs(5);

fn av_streams() -> Vec<AvStream> {
    vec![
        AvStream::video(0, VIDEO_TB, Rational::new(25, 1)).with_codec_name("h264"),
        AvStream::audio(1, AUDIO_TB, 48_000, 1024).with_codec_name("aac"),
    ]
}

fn video_packet(i: i64) -> RawPacket {
    RawPacket::new(0, vec![0, i as u8])
        .with_ts(i * 3600)
        .with_duration(3600)
        .with_key(i % 5 == 0)
}

fn audio_packet(j: i64) -> RawPacket {
    RawPacket::new(1, vec![1, j as u8])
        .with_ts(j * 1024)
        .with_duration(1024)
        .with_key(true)
}

/// One video packet then two audio packets, ten times.
fn av_packets() -> Vec<RawPacket> {
    (0..10)
        .flat_map(|i| [video_packet(i), audio_packet(2 * i), audio_packet(2 * i + 1)])
        .collect()
}

fn av_input() -> MemoryInput {
    MemoryInput::new(av_streams()).with_packets(av_packets())
}

fn ids(packets: &[RawPacket]) -> Vec<(usize, Option<i64>)> {
    packets.iter().map(|p| (p.index(), p.pts())).collect()
}

/// Drains a session; returns its packets and the number of EOF markers.
async fn collect(mut stream: PacketStream) -> (Vec<RawPacket>, usize) {
    let mut packets = Vec::new();
    let mut eofs = 0;
    while let Some(cmd) = stream.next().await {
        match cmd {
            RawPacketCmd::Data(packet) => packets.push(packet),
            RawPacketCmd::EOF => eofs += 1,
        }
    }
    (packets, eofs)
}

async fn collect_all(stream: PacketStream) -> anyhow::Result<Vec<RawPacket>> {
    let (packets, eofs) = tokio::time::timeout(WAIT, collect(stream)).await?;
    assert_eq!(eofs, 1);
    Ok(packets)
}

#[tokio::test]
async fn test_packets_carry_stream_time_base() -> anyhow::Result<()> {
    let demuxer = Demuxer::new(av_input(), DemuxOptions::default());
    let packets = collect_all(demuxer.packets(None).await?).await?;

    assert_eq!(packets.len(), 30);
    for packet in &packets {
        let stream = demuxer.get_stream(packet.index())?;
        assert_eq!(packet.time_base(), stream.time_base());
    }
    assert!(demuxer.is_eof());
    assert!(demuxer.last_error().is_none());
    Ok(())
}

#[tokio::test]
async fn test_single_read_per_packet() -> anyhow::Result<()> {
    let input = av_input();
    let reads = input.read_counter();
    let demuxer = Demuxer::new(input, DemuxOptions::default());

    let all = demuxer.packets(None).await?;
    let video = demuxer.packets(Some(0)).await?;
    let audio = demuxer.packets(Some(1)).await?;
    let (all, video, audio) = tokio::join!(collect_all(all), collect_all(video), collect_all(audio));

    assert_eq!(all?.len(), 30);
    assert_eq!(video?.len(), 10);
    assert_eq!(audio?.len(), 20);
    // one read per packet plus the one that hit the end
    assert_eq!(reads.load(Ordering::SeqCst), 31);
    Ok(())
}

#[tokio::test]
async fn test_filtered_and_unfiltered_fan_out() -> anyhow::Result<()> {
    let demuxer = Demuxer::new(av_input(), DemuxOptions::default());
    let video_index = demuxer.best_stream_index(MediaType::Video)?;

    let all = demuxer.packets(None).await?;
    let video = demuxer.packets(Some(video_index)).await?;
    let (all, video) = tokio::join!(collect_all(all), collect_all(video));
    let (all, video) = (all?, video?);

    assert_eq!(ids(&all), ids(&av_packets()));

    let video_in_all: Vec<_> = all.iter().filter(|p| p.index() == video_index).cloned().collect();
    assert_eq!(ids(&video), ids(&video_in_all));
    assert_eq!(video.len(), 10);

    let audio_in_all: Vec<_> = all.iter().filter(|p| p.index() == 1).cloned().collect();
    let expected: Vec<_> = (0..20).map(|j| (1, Some(j * 1024))).collect();
    assert_eq!(ids(&audio_in_all), expected);
    Ok(())
}

#[tokio::test]
async fn test_stalled_consumer_does_not_starve_others() -> anyhow::Result<()> {
    let options = DemuxOptions::builder().queue_capacity(4).build();
    let demuxer = Demuxer::new(av_input(), options);

    let all = demuxer.packets(None).await?;
    let mut video = demuxer.packets(Some(0)).await?;

    // the unfiltered queue fills after V0 A0 A1 V1; video keeps flowing
    for i in 0..10 {
        let cmd = tokio::time::timeout(Duration::from_millis(300), video.next()).await?;
        let packet = cmd.and_then(RawPacketCmd::into_packet).expect("video packet");
        assert_eq!(packet.pts(), Some(i * 3600));
    }
    let end = tokio::time::timeout(WAIT, video.next()).await?;
    assert!(matches!(end, Some(RawPacketCmd::EOF)));
    assert!(demuxer.is_eof());

    // the stalled consumer kept what fit and lost the rest
    let kept = collect_all(all).await?;
    assert_eq!(ids(&kept), ids(&av_packets()[..4]));
    Ok(())
}

#[tokio::test]
async fn test_start_with_keyframe_drops_leading_video() -> anyhow::Result<()> {
    let packets = (0..10).flat_map(|i| {
        [
            video_packet(i).with_key(i == 3 || i == 8),
            audio_packet(i),
        ]
    });
    let input = MemoryInput::new(av_streams()).with_packets(packets);
    let options = DemuxOptions::builder().start_with_keyframe(true).build();
    let demuxer = Demuxer::new(input, options);

    let all = collect_all(demuxer.packets(None).await?).await?;
    let video: Vec<_> = all.iter().filter(|p| p.index() == 0).collect();
    let audio: Vec<_> = all.iter().filter(|p| p.index() == 1).collect();

    assert_eq!(video.len(), 7);
    assert!(video[0].is_key());
    assert_eq!(video[0].pts(), Some(3 * 3600));
    assert_eq!(audio.len(), 10);
    assert_eq!(audio[0].pts(), Some(0));
    Ok(())
}

#[tokio::test]
async fn test_seek_discards_buffered_packets() -> anyhow::Result<()> {
    let options = DemuxOptions::builder().queue_capacity(2).build();
    let demuxer = Demuxer::new(av_input(), options);

    let mut video = demuxer.packets(Some(0)).await?;
    for i in 0..3 {
        let cmd = tokio::time::timeout(WAIT, video.next()).await?;
        let packet = cmd.and_then(RawPacketCmd::into_packet).expect("video packet");
        assert_eq!(packet.pts(), Some(i * 3600));
    }

    demuxer.seek(0.0, Some(0), SeekFlags::BACKWARD).await?;

    let rest = collect_all(video).await?;
    let pts: Vec<_> = rest.iter().map(|p| p.pts()).collect();
    let expected: Vec<_> = (0..10).map(|i| Some(i * 3600)).collect();
    assert_eq!(pts, expected);
    Ok(())
}

#[tokio::test]
async fn test_seek_range_lands_inside_window() -> anyhow::Result<()> {
    let demuxer = Demuxer::new(av_input(), DemuxOptions::default());

    // video keyframes sit at 0.0s and 0.2s
    let outside = demuxer.seek_range(0.1, 0.05, 0.15, Some(0), SeekFlags::NONE).await;
    assert!(matches!(outside, Err(DemuxError::Source(_))));

    demuxer.seek_range(0.1, 0.0, 0.3, Some(0), SeekFlags::NONE).await?;
    let video = collect_all(demuxer.packets(Some(0)).await?).await?;
    let first = video[0].pts().expect("pts");
    assert!((0..=27_000).contains(&first));
    assert_eq!(first, 5 * 3600);
    assert_eq!(video.len(), 5);
    Ok(())
}

#[tokio::test]
async fn test_sessions_on_same_stream_each_get_everything() -> anyhow::Result<()> {
    let demuxer = Demuxer::new(av_input(), DemuxOptions::default());

    let first = demuxer.packets(Some(1)).await?;
    let second = demuxer.packets(Some(1)).await?;
    let (first, second) = tokio::join!(collect_all(first), collect_all(second));
    let (first, second) = (first?, second?);

    assert_eq!(first.len(), 20);
    assert_eq!(ids(&first), ids(&second));
    Ok(())
}

#[tokio::test]
async fn test_close_ends_sessions_and_rejects_calls() -> anyhow::Result<()> {
    let options = DemuxOptions::builder().queue_capacity(2).build();
    let demuxer = Demuxer::new(av_input(), options);

    let mut all = demuxer.packets(None).await?;
    let first = tokio::time::timeout(WAIT, all.next()).await?;
    assert!(matches!(first, Some(RawPacketCmd::Data(_))));

    demuxer.close().await?;
    assert!(demuxer.is_closed());

    // whatever was buffered, the session ends with one marker
    let (rest, eofs) = tokio::time::timeout(WAIT, collect(all)).await?;
    assert!(rest.len() <= 2);
    assert_eq!(eofs, 1);

    assert!(matches!(demuxer.packets(None).await, Err(DemuxError::Closed)));
    assert!(matches!(
        demuxer.seek(1.0, None, SeekFlags::NONE).await,
        Err(DemuxError::Closed)
    ));
    assert!(matches!(demuxer.get_stream(0), Err(DemuxError::Closed)));
    demuxer.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_read_error_ends_dispatch() -> anyhow::Result<()> {
    let demuxer = Demuxer::new(av_input().with_failure_at(4), DemuxOptions::default());

    let all = demuxer.packets(None).await?;
    let video = demuxer.packets(Some(0)).await?;
    let (all, video) = tokio::join!(collect_all(all), collect_all(video));

    assert_eq!(all?.len(), 4);
    assert_eq!(video?.len(), 2);
    assert!(demuxer.is_eof());
    let error = demuxer.last_error().expect("read error recorded");
    assert!(error.contains("simulated I/O error"));
    Ok(())
}

#[tokio::test]
async fn test_seek_after_end_restarts_dispatch() -> anyhow::Result<()> {
    let input = av_input();
    let reads = input.read_counter();
    let demuxer = Demuxer::new(input, DemuxOptions::default());

    let first = collect_all(demuxer.packets(None).await?).await?;
    assert!(demuxer.is_eof());

    demuxer.seek(0.0, None, SeekFlags::NONE).await?;
    assert!(!demuxer.is_eof());

    let second = collect_all(demuxer.packets(None).await?).await?;
    assert_eq!(ids(&first), ids(&second));
    assert_eq!(reads.load(Ordering::SeqCst), 62);
    Ok(())
}

#[tokio::test]
async fn test_new_session_after_all_left_resumes_reading() -> anyhow::Result<()> {
    let options = DemuxOptions::builder().queue_capacity(1).build();
    let demuxer = Demuxer::new(av_input(), options);

    let mut all = demuxer.packets(None).await?;
    let cmd = tokio::time::timeout(WAIT, all.next()).await?;
    assert_eq!(cmd.and_then(RawPacketCmd::into_packet).map(|p| p.pts()), Some(Some(0)));
    drop(all);

    let rest = collect_all(demuxer.packets(None).await?).await?;
    assert!(!rest.is_empty());
    let source = ids(&av_packets());
    let tail = ids(&rest);
    assert!(source.ends_with(&tail));
    assert!(demuxer.is_eof());
    Ok(())
}

#[tokio::test]
async fn test_discontinuity_corrected_for_every_session() -> anyhow::Result<()> {
    // 20s jump after the fifth video packet
    let jump = 20 * 90_000;
    let packets = (0..10).map(|i| {
        let packet = video_packet(i);
        if i >= 5 {
            packet.with_ts(i * 3600 + jump)
        } else {
            packet
        }
    });
    let input = MemoryInput::new(av_streams())
        .with_ts_discontinuous(true)
        .with_packets(packets);
    let demuxer = Demuxer::new(input, DemuxOptions::default());

    let all = demuxer.packets(None).await?;
    let video = demuxer.packets(Some(0)).await?;
    let (all, video) = tokio::join!(collect_all(all), collect_all(video));

    let expected: Vec<_> = (0..10).map(|i| Some(i * 3600)).collect();
    assert_eq!(all?.iter().map(|p| p.dts()).collect::<Vec<_>>(), expected);
    assert_eq!(video?.iter().map(|p| p.dts()).collect::<Vec<_>>(), expected);
    Ok(())
}

#[tokio::test]
async fn test_stream_lookup() -> anyhow::Result<()> {
    let streams = vec![
        AvStream::video(0, VIDEO_TB, Rational::new(25, 1)),
        AvStream::audio(1, AUDIO_TB, 48_000, 1024),
        AvStream::audio(2, AUDIO_TB, 48_000, 1024).with_default(true),
    ];
    let demuxer = Demuxer::new(MemoryInput::new(streams), DemuxOptions::default());

    assert_eq!(demuxer.streams().len(), 3);
    assert_eq!(demuxer.video(0).map(|s| s.index()), Some(0));
    assert!(demuxer.video(1).is_none());
    assert_eq!(demuxer.audio(1).map(|s| s.index()), Some(2));
    assert_eq!(demuxer.best_stream_index(MediaType::Audio)?, 2);
    assert_eq!(demuxer.best_stream_index(MediaType::Video)?, 0);
    assert!(matches!(
        demuxer.best_stream_index(MediaType::Subtitle),
        Err(DemuxError::NoStream { kind: MediaType::Subtitle })
    ));
    assert!(matches!(
        demuxer.get_stream(7),
        Err(DemuxError::StreamNotFound { index: 7 })
    ));
    assert!(matches!(
        demuxer.packets(Some(7)).await,
        Err(DemuxError::StreamNotFound { index: 7 })
    ));
    assert_eq!(demuxer.media_info().nb_streams(), 3);

    // empty input: a session ends right away
    let (packets, eofs) = tokio::time::timeout(WAIT, collect(demuxer.packets(None).await?)).await?;
    assert!(packets.is_empty());
    assert_eq!(eofs, 1);
    Ok(())
}
