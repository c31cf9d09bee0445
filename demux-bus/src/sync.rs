//! Single-consumer demuxer without a dispatcher.
//!
//! Packets are read and corrected on the caller's thread, one per call, with
//! the same correction sequence the async [`Demuxer`](crate::Demuxer) uses.

use crate::{
    error::{DemuxError, Result},
    input::{PacketSource, SeekFlags},
    metadata::MediaInfo,
    options::DemuxOptions,
    packet::RawPacket,
    reader::{PacketReader, seek_request},
    session::KeyframeGate,
    stream::{AvStream, MediaType, best_of_kind, nth_of_kind},
};

pub struct SyncDemuxer {
    reader: PacketReader,
    eof: bool,
    last_error: Option<String>,
}

impl SyncDemuxer {
    pub fn new(source: impl PacketSource + 'static, options: DemuxOptions) -> Self {
        Self {
            reader: PacketReader::new(Box::new(source), options),
            eof: false,
            last_error: None,
        }
    }

    #[cfg(feature = "ffmpeg")]
    pub fn open(url: &str, options: DemuxOptions) -> Result<Self> {
        let input = crate::input::AvInput::new(url, None, None)?;
        Ok(Self::new(input, options))
    }

    pub fn streams(&self) -> std::sync::Arc<[AvStream]> {
        self.reader.streams()
    }

    pub fn get_stream(&self, index: usize) -> Result<AvStream> {
        self.reader
            .streams()
            .get(index)
            .cloned()
            .ok_or_else(|| DemuxError::stream_not_found(index))
    }

    pub fn video(&self, n: usize) -> Option<AvStream> {
        nth_of_kind(&self.reader.streams(), MediaType::Video, n).cloned()
    }

    pub fn audio(&self, n: usize) -> Option<AvStream> {
        nth_of_kind(&self.reader.streams(), MediaType::Audio, n).cloned()
    }

    pub fn find_best_stream(&self, kind: MediaType) -> Option<AvStream> {
        best_of_kind(&self.reader.streams(), kind).cloned()
    }

    pub fn best_stream_index(&self, kind: MediaType) -> Result<usize> {
        self.find_best_stream(kind)
            .map(|s| s.index())
            .ok_or(DemuxError::NoStream { kind })
    }

    pub fn media_info(&self) -> MediaInfo {
        self.reader.media_info()
    }

    pub fn is_eof(&self) -> bool {
        self.eof
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Next corrected packet of any stream; `Ok(None)` at end of input.
    pub fn read_packet(&mut self) -> Result<Option<RawPacket>> {
        if self.eof {
            return Ok(None);
        }
        match self.reader.next_packet() {
            Ok(Some(packet)) => Ok(Some(packet)),
            Ok(None) => {
                self.eof = true;
                Ok(None)
            }
            Err(e) => {
                self.eof = true;
                self.last_error = Some(format!("{:#}", e));
                Err(DemuxError::Source(e))
            }
        }
    }

    /// Iterates the packets of one stream, or all with `None`, honouring
    /// `start_with_keyframe`. A read error is yielded once and ends iteration.
    pub fn packets(&mut self, stream_index: Option<usize>) -> Result<SyncPackets<'_>> {
        if let Some(index) = stream_index {
            self.get_stream(index)?;
        }
        let gate = KeyframeGate::new(self.reader.options().start_with_keyframe);
        Ok(SyncPackets {
            demuxer: self,
            stream_index,
            gate,
        })
    }

    pub fn seek(&mut self, seconds: f64, stream_index: Option<usize>, flags: SeekFlags) -> Result<()> {
        let request = seek_request(&self.reader.streams(), seconds, None, stream_index, flags)?;
        self.reader.seek(&request)?;
        self.eof = false;
        Ok(())
    }

    pub fn seek_range(
        &mut self,
        seconds: f64,
        min: f64,
        max: f64,
        stream_index: Option<usize>,
        flags: SeekFlags,
    ) -> Result<()> {
        let request = seek_request(
            &self.reader.streams(),
            seconds,
            Some((min, max)),
            stream_index,
            flags,
        )?;
        self.reader.seek(&request)?;
        self.eof = false;
        Ok(())
    }
}

pub struct SyncPackets<'a> {
    demuxer: &'a mut SyncDemuxer,
    stream_index: Option<usize>,
    gate: KeyframeGate,
}

impl Iterator for SyncPackets<'_> {
    type Item = Result<RawPacket>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let packet = match self.demuxer.read_packet() {
                Ok(Some(packet)) => packet,
                Ok(None) => return None,
                Err(e) => return Some(Err(e)),
            };
            if self.stream_index.is_some_and(|index| index != packet.index()) {
                continue;
            }
            let streams = self.demuxer.reader.streams();
            if self.gate.admit(&packet, streams.get(packet.index())) {
                return Some(Ok(packet));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{memory::MemoryInput, rational::Rational};

    fn input() -> MemoryInput {
        let streams = vec![
            AvStream::video(0, Rational::new(1, 90_000), Rational::new(25, 1)),
            AvStream::audio(1, Rational::new(1, 48_000), 48_000, 1024),
        ];
        let packets = (0..6).flat_map(|i| {
            [
                RawPacket::new(0, vec![0u8])
                    .with_ts(i * 3600)
                    .with_duration(3600)
                    .with_key(i == 2),
                RawPacket::new(1, vec![1u8]).with_ts(i * 1024).with_key(true),
            ]
        });
        MemoryInput::new(streams).with_packets(packets)
    }

    #[test]
    fn test_reads_all_then_eof() -> anyhow::Result<()> {
        let mut demuxer = SyncDemuxer::new(input(), DemuxOptions::default());
        let mut count = 0;
        while let Some(packet) = demuxer.read_packet()? {
            let stream = demuxer.get_stream(packet.index())?;
            assert_eq!(packet.time_base(), stream.time_base());
            count += 1;
        }
        assert_eq!(count, 12);
        assert!(demuxer.is_eof());
        assert!(demuxer.read_packet()?.is_none());
        Ok(())
    }

    #[test]
    fn test_filtered_iteration_with_keyframe_start() -> anyhow::Result<()> {
        let options = DemuxOptions::builder().start_with_keyframe(true).build();
        let mut demuxer = SyncDemuxer::new(input(), options);
        let pts = demuxer
            .packets(Some(0))?
            .map(|p| p.map(|p| p.pts()))
            .collect::<Result<Vec<_>>>()?;
        assert_eq!(pts, vec![Some(7200), Some(10_800), Some(14_400), Some(18_000)]);
        Ok(())
    }

    #[test]
    fn test_seek_rewinds() -> anyhow::Result<()> {
        let mut demuxer = SyncDemuxer::new(input(), DemuxOptions::default());
        assert_eq!(demuxer.packets(Some(1))?.count(), 6);
        assert!(demuxer.is_eof());

        demuxer.seek(0.0, Some(1), SeekFlags::BACKWARD)?;
        assert!(!demuxer.is_eof());
        let first = demuxer.read_packet()?.expect("packet after seek");
        assert_eq!((first.index(), first.pts()), (1, Some(0)));
        Ok(())
    }

    #[test]
    fn test_seek_range_respects_window() -> anyhow::Result<()> {
        let mut demuxer = SyncDemuxer::new(input(), DemuxOptions::default());

        // the only video keyframe is at 0.08s
        let outside = demuxer.seek_range(0.1, 0.09, 0.12, Some(0), SeekFlags::BACKWARD);
        assert!(matches!(outside, Err(DemuxError::Source(_))));

        demuxer.seek_range(0.1, 0.0, 0.12, Some(0), SeekFlags::BACKWARD)?;
        let first = demuxer.read_packet()?.expect("packet after seek");
        assert_eq!((first.index(), first.pts()), (0, Some(7200)));
        Ok(())
    }

    #[test]
    fn test_read_error_is_reported_once() {
        let mut demuxer = SyncDemuxer::new(input().with_failure_at(3), DemuxOptions::default());
        let results: Vec<_> = demuxer.packets(None).expect("all streams").collect();
        assert_eq!(results.len(), 4);
        assert!(results[..3].iter().all(|r| r.is_ok()));
        assert!(matches!(results[3], Err(DemuxError::Source(_))));
        assert!(demuxer.last_error().is_some_and(|e| e.contains("simulated")));
        assert!(demuxer.is_eof());
    }
}
