use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use tokio::sync::mpsc::{self, error::TryRecvError};

use crate::{
    demuxer::SessionGuard,
    dispatcher::{DispatchStatus, Envelope},
    packet::{PacketStream, RawPacket, RawPacketCmd},
    stream::AvStream,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SessionState {
    Registered,
    Draining,
    Waiting,
    Eof,
    Stopped,
    Unregistered,
}

/// Holds back video packets until the first keyframe. Non-video packets
/// always pass.
#[derive(Clone, Debug)]
pub(crate) struct KeyframeGate {
    enabled: bool,
    open: bool,
}

impl KeyframeGate {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            open: !enabled,
        }
    }

    /// Waits for a keyframe again, e.g. after a seek.
    pub fn rearm(&mut self) {
        self.open = !self.enabled;
    }

    pub fn admit(&mut self, packet: &RawPacket, stream: Option<&AvStream>) -> bool {
        if self.open || !stream.is_some_and(|s| s.is_video()) {
            return true;
        }
        if packet.is_key() {
            self.open = true;
        }
        self.open
    }
}

/// One consumer's view of the dispatched packets.
pub(crate) struct ConsumerSession {
    id: u64,
    rx: mpsc::Receiver<Envelope>,
    streams: Arc<[AvStream]>,
    gate: KeyframeGate,
    epoch: u64,
    status: Arc<DispatchStatus>,
    demand: Arc<AtomicBool>,
    state: SessionState,
    guard: Option<SessionGuard>,
}

impl ConsumerSession {
    pub fn new(
        id: u64,
        rx: mpsc::Receiver<Envelope>,
        streams: Arc<[AvStream]>,
        start_with_keyframe: bool,
        status: Arc<DispatchStatus>,
        demand: Arc<AtomicBool>,
        guard: SessionGuard,
    ) -> Self {
        let epoch = status.epoch();
        Self {
            id,
            rx,
            streams,
            gate: KeyframeGate::new(start_with_keyframe),
            epoch,
            status,
            demand,
            state: SessionState::Registered,
            guard: Some(guard),
        }
    }

    pub fn into_stream(self) -> PacketStream {
        Box::pin(futures::stream::unfold(self, |mut session| async move {
            session.next().await.map(|cmd| (cmd, session))
        }))
    }

    /// Next packet, then a single `EOF`, then `None`.
    async fn next(&mut self) -> Option<RawPacketCmd> {
        match self.state {
            SessionState::Eof | SessionState::Stopped => {
                self.state = SessionState::Unregistered;
                return None;
            }
            SessionState::Unregistered => return None,
            SessionState::Registered => self.demand.store(true, Ordering::SeqCst),
            SessionState::Draining | SessionState::Waiting => {}
        }

        loop {
            let envelope = match self.rx.try_recv() {
                Ok(envelope) => envelope,
                Err(TryRecvError::Empty) => {
                    self.state = SessionState::Waiting;
                    match self.rx.recv().await {
                        Some(envelope) => envelope,
                        None => return Some(self.finish()),
                    }
                }
                Err(TryRecvError::Disconnected) => return Some(self.finish()),
            };
            self.state = SessionState::Draining;
            if let Some(packet) = self.accept(envelope) {
                return Some(RawPacketCmd::Data(packet));
            }
        }
    }

    fn accept(&mut self, envelope: Envelope) -> Option<RawPacket> {
        if envelope.epoch < self.status.epoch() {
            // read before the last seek
            return None;
        }
        if envelope.epoch > self.epoch {
            self.epoch = envelope.epoch;
            self.gate.rearm();
        }
        let stream = self.streams.get(envelope.packet.index());
        self.gate
            .admit(&envelope.packet, stream)
            .then_some(envelope.packet)
    }

    fn finish(&mut self) -> RawPacketCmd {
        self.state = if self.status.is_eof() {
            SessionState::Eof
        } else {
            SessionState::Stopped
        };
        log::debug!("session {} finished: {:?}", self.id, self.state);
        // deregister now, not when the stream object is dropped
        self.guard.take();
        RawPacketCmd::EOF
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rational::Rational;

    #[test]
    fn test_gate_holds_video_until_keyframe() {
        let video = AvStream::video(0, Rational::new(1, 25), Rational::new(25, 1));
        let audio = AvStream::audio(1, Rational::new(1, 48_000), 48_000, 1024);
        let mut gate = KeyframeGate::new(true);

        assert!(!gate.admit(&RawPacket::new(0, vec![0u8]), Some(&video)));
        assert!(gate.admit(&RawPacket::new(1, vec![0u8]), Some(&audio)));
        assert!(gate.admit(&RawPacket::new(0, vec![0u8]).with_key(true), Some(&video)));
        assert!(gate.admit(&RawPacket::new(0, vec![0u8]), Some(&video)));

        gate.rearm();
        assert!(!gate.admit(&RawPacket::new(0, vec![0u8]), Some(&video)));
    }

    #[test]
    fn test_disabled_gate_admits_everything() {
        let video = AvStream::video(0, Rational::new(1, 25), Rational::new(25, 1));
        let mut gate = KeyframeGate::new(false);
        assert!(gate.admit(&RawPacket::new(0, vec![0u8]), Some(&video)));
        gate.rearm();
        assert!(gate.admit(&RawPacket::new(0, vec![0u8]), Some(&video)));
    }
}
