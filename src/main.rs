use demux_bus::{Demuxer, MediaType, PacketStream, RawPacket, RawPacketCmd};
use futures::StreamExt;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

mod config;
mod demo;

fn init_logging() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .filter_module("demux_bus", log::LevelFilter::Debug)
        .filter_module("packet_tap", log::LevelFilter::Info)
        .init();
}

/// One output line per delivered packet.
#[derive(Serialize)]
struct PacketLine<'a> {
    consumer: &'a str,
    stream: usize,
    pts: Option<i64>,
    dts: Option<i64>,
    duration: i64,
    time_base: String,
    key: bool,
    size: usize,
}

impl<'a> PacketLine<'a> {
    fn new(consumer: &'a str, packet: &RawPacket) -> Self {
        Self {
            consumer,
            stream: packet.index(),
            pts: packet.pts(),
            dts: packet.dts(),
            duration: packet.duration(),
            time_base: packet.time_base().to_string(),
            key: packet.is_key(),
            size: packet.size(),
        }
    }
}

fn open(input: Option<&str>) -> anyhow::Result<Demuxer> {
    let options = config::config().demux_options();
    match input {
        #[cfg(feature = "ffmpeg")]
        Some(url) => {
            demux_bus::init()?;
            Ok(Demuxer::open(url, options)?)
        }
        #[cfg(not(feature = "ffmpeg"))]
        Some(url) => Err(anyhow::anyhow!(
            "cannot open {}: built without the ffmpeg feature",
            url
        )),
        None => {
            log::info!("no input given, using synthetic stream");
            Ok(Demuxer::new(demo::input(), options))
        }
    }
}

async fn consume(name: String, mut packets: PacketStream) -> anyhow::Result<usize> {
    let mut count = 0;
    while let Some(cmd) = packets.next().await {
        match cmd {
            RawPacketCmd::Data(packet) => {
                println!("{}", serde_json::to_string(&PacketLine::new(&name, &packet))?);
                count += 1;
            }
            RawPacketCmd::EOF => log::info!("{}: end of stream after {} packets", name, count),
        }
    }
    Ok(count)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    let input = std::env::args().nth(1);
    let demuxer = open(input.as_deref())?;
    eprintln!("{}", demuxer.media_info());

    let mut consumers = vec![("all".to_string(), demuxer.packets(None).await?)];
    match demuxer.best_stream_index(MediaType::Video) {
        Ok(index) => consumers.push((format!("video:{}", index), demuxer.packets(Some(index)).await?)),
        Err(e) => log::warn!("{}", e),
    }

    let cancel = CancellationToken::new();
    let tasks: Vec<_> = consumers
        .into_iter()
        .map(|(name, packets)| {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = cancel.cancelled() => Ok(0),
                    result = consume(name, packets) => result,
                }
            })
        })
        .collect();

    let all_done = futures::future::join_all(tasks);
    tokio::pin!(all_done);
    let results = tokio::select! {
        results = &mut all_done => results,
        _ = tokio::signal::ctrl_c() => {
            log::info!("interrupted");
            cancel.cancel();
            demuxer.close().await?;
            all_done.await
        }
    };

    for result in results {
        if let Err(e) = result? {
            log::error!("consumer failed: {:#}", e);
        }
    }
    if let Some(error) = demuxer.last_error() {
        log::error!("input error: {}", error);
    }
    demuxer.close().await?;
    Ok(())
}
