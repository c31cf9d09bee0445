//! Fan-out of one packet reader to many bounded consumer queues.
//!
//! The read loop runs on a blocking thread and owns the [`PacketReader`] for
//! as long as it runs; joining the task hands the reader back. The loop
//! stops reading only while every live queue is full. A packet is skipped
//! for a queue that is full when it is read, so a stalled consumer cannot
//! starve the others. Dropping the task handle ends the loop.

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use tokio::sync::{
    mpsc::{self, error::TryRecvError},
    oneshot,
};
use tokio_util::sync::CancellationToken;

use crate::{
    error::{DemuxError, Result},
    input::SeekRequest,
    packet::RawPacket,
    reader::PacketReader,
};

const IDLE_POLL: Duration = Duration::from_millis(1);
const COMMAND_QUEUE: usize = 64;

/// A packet tagged with the seek generation it was read in.
#[derive(Debug)]
pub(crate) struct Envelope {
    pub epoch: u64,
    pub packet: RawPacket,
}

pub(crate) struct Subscriber {
    pub id: u64,
    /// Only packets of this stream; `None` for all.
    pub stream_index: Option<usize>,
    pub tx: mpsc::Sender<Envelope>,
    /// Set once the session is first polled.
    pub demand: Arc<AtomicBool>,
}

impl Subscriber {
    fn wants(&self, packet: &RawPacket) -> bool {
        self.stream_index.is_none_or(|index| index == packet.index())
    }

    fn has_demand(&self) -> bool {
        self.demand.load(Ordering::SeqCst)
    }

    fn is_full(&self) -> bool {
        self.tx.capacity() == 0
    }
}

pub(crate) enum DispatcherCommand {
    Subscribe(Subscriber),
    Seek {
        request: SeekRequest,
        result: oneshot::Sender<anyhow::Result<()>>,
    },
}

/// Dispatch state visible to the façade and to sessions.
#[derive(Default)]
pub(crate) struct DispatchStatus {
    eof: AtomicBool,
    epoch: AtomicU64,
    last_error: Mutex<Option<String>>,
}

impl DispatchStatus {
    pub fn is_eof(&self) -> bool {
        self.eof.load(Ordering::SeqCst)
    }

    pub fn set_eof(&self, eof: bool) {
        self.eof.store(eof, Ordering::SeqCst);
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Starts a new seek generation; packets of older ones are stale.
    pub fn next_epoch(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().ok().and_then(|e| e.clone())
    }

    pub fn set_error(&self, error: &anyhow::Error) {
        if let Ok(mut last) = self.last_error.lock() {
            *last = Some(format!("{:#}", error));
        }
    }
}

pub(crate) struct DispatcherTask {
    cancel: CancellationToken,
    tx: mpsc::Sender<DispatcherCommand>,
    handle: tokio::task::JoinHandle<PacketReader>,
}

impl DispatcherTask {
    pub fn start(reader: PacketReader, status: Arc<DispatchStatus>) -> Self {
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel(COMMAND_QUEUE);

        let cancel_clone = cancel.clone();
        let handle =
            tokio::task::spawn_blocking(move || Self::read_loop(reader, cancel_clone, rx, status));
        log::debug!("dispatcher started");
        Self { cancel, tx, handle }
    }

    fn read_loop(
        mut reader: PacketReader,
        cancel: CancellationToken,
        mut rx: mpsc::Receiver<DispatcherCommand>,
        status: Arc<DispatchStatus>,
    ) -> PacketReader {
        let mut subscribers: Vec<Subscriber> = Vec::new();
        loop {
            if cancel.is_cancelled() {
                log::debug!("dispatcher cancelled");
                break;
            }
            let mut detached = false;
            loop {
                match rx.try_recv() {
                    Ok(cmd) => Self::handle_command(&mut reader, &mut subscribers, &status, cmd),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        detached = true;
                        break;
                    }
                }
            }
            if detached {
                log::debug!("dispatcher handle dropped");
                break;
            }

            subscribers.retain(|s| !s.tx.is_closed());
            if subscribers.is_empty() {
                // idle until someone subscribes; a dropped handle ends the loop
                match rx.blocking_recv() {
                    Some(cmd) => Self::handle_command(&mut reader, &mut subscribers, &status, cmd),
                    None => break,
                }
                continue;
            }
            // sessions opened together all see the first packet: reading
            // waits until one of them is polled
            let waiting = !subscribers.iter().any(Subscriber::has_demand);
            if waiting || subscribers.iter().all(Subscriber::is_full) {
                std::thread::sleep(IDLE_POLL);
                continue;
            }

            match reader.next_packet() {
                Ok(Some(packet)) => Self::dispatch(&subscribers, packet, status.epoch()),
                Ok(None) => {
                    log::debug!("end of input");
                    status.set_eof(true);
                    break;
                }
                Err(e) => {
                    log::error!("read packet error: {:#}", e);
                    status.set_error(&e);
                    status.set_eof(true);
                    break;
                }
            }
        }
        // dropping the senders wakes every waiting session
        drop(subscribers);
        reader
    }

    fn handle_command(
        reader: &mut PacketReader,
        subscribers: &mut Vec<Subscriber>,
        status: &DispatchStatus,
        cmd: DispatcherCommand,
    ) {
        match cmd {
            DispatcherCommand::Subscribe(subscriber) => {
                log::debug!(
                    "session {} subscribed to stream {:?}",
                    subscriber.id,
                    subscriber.stream_index
                );
                subscribers.push(subscriber);
            }
            DispatcherCommand::Seek { request, result } => {
                let seeked = reader.seek(&request);
                if seeked.is_ok() {
                    status.next_epoch();
                }
                let _ = result.send(seeked);
            }
        }
    }

    fn dispatch(subscribers: &[Subscriber], packet: RawPacket, epoch: u64) {
        let mut targets: Vec<&Subscriber> = Vec::new();
        for subscriber in subscribers.iter().filter(|s| s.wants(&packet)) {
            if subscriber.is_full() {
                log::trace!(
                    "session {} full, skipping packet of stream {}",
                    subscriber.id,
                    packet.index()
                );
            } else {
                targets.push(subscriber);
            }
        }
        let Some((last, rest)) = targets.split_last() else {
            return;
        };
        for subscriber in rest {
            Self::deliver(subscriber, Envelope { epoch, packet: packet.clone() });
        }
        Self::deliver(last, Envelope { epoch, packet });
    }

    fn deliver(subscriber: &Subscriber, envelope: Envelope) {
        // this loop is the only producer, so a queue with room stays that way
        if let Err(e) = subscriber.tx.try_send(envelope) {
            log::trace!("session {} gone: {}", subscriber.id, e);
        }
    }

    /// Hands a new session to the loop. `false` once the loop has exited.
    pub async fn subscribe(&self, subscriber: Subscriber) -> bool {
        self.tx
            .send(DispatcherCommand::Subscribe(subscriber))
            .await
            .is_ok()
    }

    /// Runs a seek between two reads. `None` once the loop has exited.
    pub async fn seek(&self, request: SeekRequest) -> Option<anyhow::Result<()>> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(DispatcherCommand::Seek {
                request,
                result: tx,
            })
            .await
            .ok()?;
        rx.await.ok()
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled() && !self.handle.is_finished()
    }

    /// Stops the loop and takes the reader back.
    pub async fn join(self) -> Result<PacketReader> {
        let Self { cancel, tx, handle } = self;
        cancel.cancel();
        drop(tx);
        let reader = handle
            .await
            .map_err(|e| DemuxError::Dispatcher(format!("read loop aborted: {}", e)))?;
        log::debug!("dispatcher stopped");
        Ok(reader)
    }
}
