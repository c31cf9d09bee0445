use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
};

use tokio::sync::{Mutex, mpsc};

use crate::{
    dispatcher::{DispatchStatus, DispatcherTask, Subscriber},
    error::{DemuxError, Result},
    input::{PacketSource, SeekFlags, SeekRequest},
    metadata::MediaInfo,
    options::DemuxOptions,
    packet::PacketStream,
    reader::{PacketReader, seek_request},
    session::ConsumerSession,
    stream::{AvStream, MediaType, best_of_kind, nth_of_kind},
};

/// Asynchronous demuxer over one input.
///
/// Any number of consumers can call [`Demuxer::packets`]; a single reader
/// task feeds all of them, each through its own bounded queue. The reader
/// starts with the first consumer and stops when the last one finishes.
///
/// ```ignore
/// let demuxer = Demuxer::open("input.ts", DemuxOptions::default())?;
/// let mut video = demuxer.packets(Some(demuxer.best_stream_index(MediaType::Video)?)).await?;
/// while let Some(RawPacketCmd::Data(packet)) = video.next().await {
///     println!("{:?}", packet.pts());
/// }
/// ```
pub struct Demuxer {
    shared: Arc<DemuxShared>,
}

impl Demuxer {
    pub fn new(source: impl PacketSource + 'static, options: DemuxOptions) -> Self {
        let reader = PacketReader::new(Box::new(source), options.clone());
        let shared = DemuxShared {
            streams: reader.streams(),
            media_info: reader.media_info(),
            options,
            status: Arc::new(DispatchStatus::default()),
            interrupt: reader.interrupt_flag(),
            closed: AtomicBool::new(false),
            active_sessions: AtomicUsize::new(0),
            next_session_id: AtomicU64::new(0),
            state: Mutex::new(DemuxState {
                reader: Some(reader),
                dispatcher: None,
                closed: false,
            }),
        };
        Self {
            shared: Arc::new(shared),
        }
    }

    #[cfg(feature = "ffmpeg")]
    pub fn open(url: &str, options: DemuxOptions) -> Result<Self> {
        Self::open_with(url, None, None, options)
    }

    /// Opens `url`, optionally forcing the container `format` and passing
    /// format options.
    #[cfg(feature = "ffmpeg")]
    pub fn open_with(
        url: &str,
        format: Option<&str>,
        format_options: Option<ffmpeg_next::Dictionary>,
        options: DemuxOptions,
    ) -> Result<Self> {
        let input = crate::input::AvInput::new(url, format, format_options)?;
        Ok(Self::new(input, options))
    }

    pub fn options(&self) -> &DemuxOptions {
        &self.shared.options
    }

    pub fn streams(&self) -> &[AvStream] {
        &self.shared.streams
    }

    pub fn get_stream(&self, index: usize) -> Result<&AvStream> {
        self.check_open()?;
        self.shared
            .streams
            .get(index)
            .ok_or_else(|| DemuxError::stream_not_found(index))
    }

    /// The `n`-th video stream (zero-based).
    pub fn video(&self, n: usize) -> Option<&AvStream> {
        nth_of_kind(&self.shared.streams, MediaType::Video, n)
    }

    /// The `n`-th audio stream (zero-based).
    pub fn audio(&self, n: usize) -> Option<&AvStream> {
        nth_of_kind(&self.shared.streams, MediaType::Audio, n)
    }

    pub fn find_best_stream(&self, kind: MediaType) -> Option<&AvStream> {
        best_of_kind(&self.shared.streams, kind)
    }

    pub fn best_stream_index(&self, kind: MediaType) -> Result<usize> {
        self.check_open()?;
        self.find_best_stream(kind)
            .map(|s| s.index())
            .ok_or(DemuxError::NoStream { kind })
    }

    pub fn media_info(&self) -> &MediaInfo {
        &self.shared.media_info
    }

    /// The input ended or failed.
    pub fn is_eof(&self) -> bool {
        self.shared.status.is_eof()
    }

    /// Message of the read error that ended dispatch, if any.
    pub fn last_error(&self) -> Option<String> {
        self.shared.status.last_error()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Opens a consumer session over one stream, or all streams with `None`.
    ///
    /// The session yields corrected packets in read order, then a single
    /// [`RawPacketCmd::EOF`](crate::packet::RawPacketCmd::EOF).
    pub async fn packets(&self, stream_index: Option<usize>) -> Result<PacketStream> {
        if let Some(index) = stream_index {
            self.get_stream(index)?;
        }

        let shared = &self.shared;
        let mut state = shared.state.lock().await;
        if state.closed {
            return Err(DemuxError::Closed);
        }

        let others_active = shared.active_sessions.load(Ordering::SeqCst) > 0;
        let guard = SessionGuard::register(shared.clone());
        shared.ensure_dispatcher(&mut state, others_active).await?;

        let id = shared.next_session_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(shared.options.queue_capacity.max(1));
        let demand = Arc::new(AtomicBool::new(false));
        let session = ConsumerSession::new(
            id,
            rx,
            shared.streams.clone(),
            shared.options.start_with_keyframe,
            shared.status.clone(),
            demand.clone(),
            guard,
        );

        let subscriber = Subscriber {
            id,
            stream_index,
            tx,
            demand,
        };
        let subscribed = match state.dispatcher.as_ref() {
            Some(task) => task.subscribe(subscriber).await,
            None => false,
        };
        if !subscribed {
            log::debug!("session {} opened after end of input", id);
        }
        Ok(session.into_stream())
    }

    /// Seeks to `seconds`, in the named stream or across the whole input.
    ///
    /// Packets read before the seek are discarded from every session.
    pub async fn seek(
        &self,
        seconds: f64,
        stream_index: Option<usize>,
        flags: SeekFlags,
    ) -> Result<()> {
        self.check_open()?;
        let request = seek_request(&self.shared.streams, seconds, None, stream_index, flags)?;
        self.shared.seek(request).await
    }

    /// Seeks to `seconds`, accepting any position within `[min, max]`.
    pub async fn seek_range(
        &self,
        seconds: f64,
        min: f64,
        max: f64,
        stream_index: Option<usize>,
        flags: SeekFlags,
    ) -> Result<()> {
        self.check_open()?;
        let request = seek_request(
            &self.shared.streams,
            seconds,
            Some((min, max)),
            stream_index,
            flags,
        )?;
        self.shared.seek(request).await
    }

    /// Stops dispatch and releases the input. Sessions still open receive
    /// their end-of-stream marker; later calls return [`DemuxError::Closed`].
    pub async fn close(&self) -> Result<()> {
        let shared = &self.shared;
        shared.interrupt.store(true, Ordering::SeqCst);
        let mut state = shared.state.lock().await;
        if state.closed {
            return Ok(());
        }
        state.closed = true;
        shared.closed.store(true, Ordering::SeqCst);

        if let Some(task) = state.dispatcher.take() {
            if let Err(e) = task.join().await {
                log::warn!("close: {}", e);
            }
        }
        state.reader = None;
        shared.status.set_eof(true);
        log::debug!("demuxer closed");
        Ok(())
    }

    fn check_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(DemuxError::Closed);
        }
        Ok(())
    }
}

impl Drop for Demuxer {
    fn drop(&mut self) {
        self.shared.interrupt.store(true, Ordering::SeqCst);
        self.shared.closed.store(true, Ordering::SeqCst);
        self.shared.stop_dispatcher();
    }
}

pub(crate) struct DemuxShared {
    streams: Arc<[AvStream]>,
    media_info: MediaInfo,
    options: DemuxOptions,
    status: Arc<DispatchStatus>,
    interrupt: Arc<AtomicBool>,
    closed: AtomicBool,
    active_sessions: AtomicUsize,
    next_session_id: AtomicU64,
    state: Mutex<DemuxState>,
}

struct DemuxState {
    /// Present while no dispatcher owns it.
    reader: Option<PacketReader>,
    dispatcher: Option<DispatcherTask>,
    closed: bool,
}

impl DemuxShared {
    /// Makes sure a dispatcher is there for a new session. A loop that ended
    /// while other sessions are still draining is left alone, so the new
    /// session sees the same end of input.
    async fn ensure_dispatcher(&self, state: &mut DemuxState, others_active: bool) -> Result<()> {
        if let Some(task) = state.dispatcher.as_ref() {
            if task.is_running() || others_active {
                return Ok(());
            }
        }
        if let Some(task) = state.dispatcher.take() {
            state.reader = Some(task.join().await?);
        }
        let reader = state
            .reader
            .take()
            .ok_or_else(|| DemuxError::Dispatcher("packet reader lost".to_string()))?;
        self.status.set_eof(false);
        state.dispatcher = Some(DispatcherTask::start(reader, self.status.clone()));
        Ok(())
    }

    async fn seek(&self, request: SeekRequest) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(DemuxError::Closed);
        }

        if let Some(task) = state.dispatcher.as_ref().filter(|t| t.is_running()) {
            if let Some(result) = task.seek(request.clone()).await {
                return result.map_err(DemuxError::Source);
            }
        }

        // no live loop: seek the idle reader directly
        if let Some(task) = state.dispatcher.take() {
            state.reader = Some(task.join().await?);
        }
        let mut reader = state
            .reader
            .take()
            .ok_or_else(|| DemuxError::Dispatcher("packet reader lost".to_string()))?;
        let (reader, result) = tokio::task::spawn_blocking(move || {
            let result = reader.seek(&request);
            (reader, result)
        })
        .await
        .map_err(|e| DemuxError::Dispatcher(format!("seek aborted: {}", e)))?;
        state.reader = Some(reader);
        result?;

        self.status.next_epoch();
        self.status.set_eof(false);
        Ok(())
    }

    fn stop_dispatcher(&self) {
        if let Ok(state) = self.state.try_lock() {
            if let Some(task) = state.dispatcher.as_ref() {
                task.stop();
            }
        }
    }

    fn release_session(self: &Arc<Self>) {
        if self.active_sessions.fetch_sub(1, Ordering::SeqCst) != 1 {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let shared = self.clone();
                handle.spawn(async move { shared.stop_if_idle().await });
            }
            Err(_) => self.stop_dispatcher(),
        }
    }

    async fn stop_if_idle(&self) {
        let mut state = self.state.lock().await;
        if self.active_sessions.load(Ordering::SeqCst) != 0 {
            return;
        }
        let Some(task) = state.dispatcher.take() else {
            return;
        };
        match task.join().await {
            Ok(reader) => {
                state.reader = Some(reader);
                log::debug!("no active sessions, dispatcher stopped");
            }
            Err(e) => log::error!("stop dispatcher: {}", e),
        }
    }
}

/// Counts a live session; the last one to go stops the dispatcher.
pub(crate) struct SessionGuard {
    shared: Arc<DemuxShared>,
}

impl SessionGuard {
    fn register(shared: Arc<DemuxShared>) -> Self {
        shared.active_sessions.fetch_add(1, Ordering::SeqCst);
        Self { shared }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.shared.release_session();
    }
}

#[cfg(test)]
#[path = "demuxer_test.rs"]
mod demuxer_test;
