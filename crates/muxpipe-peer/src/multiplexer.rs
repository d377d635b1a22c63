use std::collections::HashMap;
use std::convert::Infallible;
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use muxpipe_frame::{encode_frame, Frame, FrameError, MAX_PAYLOAD};
use muxpipe_transport::{dial, write_all_timeout, Endpoint};
use tokio::io::AsyncWrite;
use tokio::sync::{watch, Notify};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{PeerError, Result};
use crate::fingerprint::{send_fingerprint, Fingerprint, IdentityConfig};
use crate::queue::{PendingQueue, Pushed, QueueConfig};

/// Default bound on establishing the outbound connection.
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(5);
/// Default bound on writing one frame.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);
/// Default pause between a failed attempt and the next dial.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(10);

const DROP_LOG_EVERY: u64 = 1024;

/// Multiplexer configuration.
#[derive(Debug, Clone)]
pub struct MultiplexerConfig {
    pub dial_timeout: Duration,
    pub write_timeout: Duration,
    pub retry_delay: Duration,
    pub queue: QueueConfig,
    pub identity: IdentityConfig,
}

impl Default for MultiplexerConfig {
    fn default() -> Self {
        Self {
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            retry_delay: DEFAULT_RETRY_DELAY,
            queue: QueueConfig::default(),
            identity: IdentityConfig::default(),
        }
    }
}

/// State of the outbound connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        })
    }
}

/// Frame counters since the multiplexer was opened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MuxStats {
    /// Frames accepted from stream handles.
    pub written: u64,
    /// Frames fully written to a socket.
    pub sent: u64,
    /// Frames evicted by the queue's overflow policy.
    pub dropped: u64,
    /// Frames whose write failed part way; they are not retried.
    pub lost: u64,
    /// Successful connects (fingerprint delivered).
    pub connects: u64,
    /// Failed dials, handshakes and flushes.
    pub failures: u64,
}

struct State {
    queue: PendingQueue,
    handles: HashMap<u32, StreamHandle>,
    in_flight: bool,
    stats: MuxStats,
}

pub(crate) struct Shared {
    endpoint: Endpoint,
    state: Mutex<State>,
    wake: Notify,
    idle: Notify,
    link: watch::Sender<LinkState>,
    cancel: CancellationToken,
}

impl Shared {
    pub(crate) fn new(endpoint: Endpoint, queue: QueueConfig) -> Self {
        let (link, _) = watch::channel(LinkState::Disconnected);
        Self {
            endpoint,
            state: Mutex::new(State {
                queue: PendingQueue::new(queue),
                handles: HashMap::new(),
                in_flight: false,
                stats: MuxStats::default(),
            }),
            wake: Notify::new(),
            idle: Notify::new(),
            link,
            cancel: CancellationToken::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn enqueue(&self, handle: &HandleInner, payload: &[u8]) -> Result<usize> {
        let mut state = self.lock();
        if handle.closed.load(Ordering::Acquire) || self.cancel.is_cancelled() {
            return Err(PeerError::StreamClosed(handle.stream_id));
        }
        if payload.is_empty() {
            return Ok(0);
        }
        if payload.len() > MAX_PAYLOAD {
            return Err(FrameError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_PAYLOAD,
            }
            .into());
        }

        state.stats.written += 1;
        let frame = Frame::new(handle.stream_id, Bytes::copy_from_slice(payload));
        let evicted = match state.queue.push(frame) {
            Pushed::Dropped(evicted) => {
                state.stats.dropped += 1;
                Some((evicted.stream_id, state.stats.dropped))
            }
            Pushed::Queued => None,
        };
        // Log after unlocking: the subscriber may write back into this multiplexer.
        drop(state);

        if let Some((stream_id, dropped)) = evicted {
            if dropped == 1 || dropped % DROP_LOG_EVERY == 0 {
                warn!(
                    endpoint = %self.endpoint,
                    stream_id,
                    dropped,
                    "pending queue full, dropping frames"
                );
            }
        }
        self.wake.notify_one();
        Ok(payload.len())
    }

    fn is_idle(&self) -> bool {
        let state = self.lock();
        state.queue.is_empty() && !state.in_flight
    }

    fn set_link(&self, link: LinkState) {
        self.link.send_replace(link);
    }

    fn close_handles(&self) {
        let state = self.lock();
        for handle in state.handles.values() {
            handle.inner.closed.store(true, Ordering::Release);
        }
    }
}

/// Writer side of the transport: many logical streams over one outbound
/// TCP connection, re-established as needed.
///
/// Cloning is cheap; every clone drives the same connection.
#[derive(Clone)]
pub struct Multiplexer {
    shared: Arc<Shared>,
}

impl Multiplexer {
    /// Start connecting to `endpoint` in the background.
    ///
    /// Returns immediately; frames written before the link is up are queued.
    /// Must be called from within a tokio runtime.
    pub fn open(endpoint: Endpoint, config: MultiplexerConfig) -> Self {
        let shared = Arc::new(Shared::new(endpoint, config.queue.clone()));
        let fingerprint = Fingerprint::build(&config.identity);
        debug!(
            endpoint = %shared.endpoint,
            id = fingerprint.id().unwrap_or_default(),
            "opening multiplexer"
        );
        tokio::spawn(run_sender(Arc::clone(&shared), config, fingerprint));
        Self { shared }
    }

    /// A write handle for `stream_id`.
    ///
    /// Repeated calls with the same id return the same handle. Stream 0 is
    /// reserved for the fingerprint.
    pub fn new_writer(&self, stream_id: u32) -> Result<StreamHandle> {
        if stream_id == muxpipe_frame::FINGERPRINT {
            return Err(PeerError::ReservedStream(stream_id));
        }
        let mut state = self.shared.lock();
        let handle = state
            .handles
            .entry(stream_id)
            .or_insert_with(|| StreamHandle::new(stream_id, Arc::downgrade(&self.shared)));
        Ok(handle.clone())
    }

    /// Close every handle issued so far.
    ///
    /// The connection and already queued frames are unaffected.
    pub fn close(&self) {
        self.shared.close_handles();
        debug!(endpoint = %self.shared.endpoint, "closed stream handles");
    }

    /// Stop the background sender and close the connection.
    ///
    /// Also closes every handle; frames still queued are discarded.
    pub fn shutdown(&self) {
        self.shared.close_handles();
        self.shared.cancel.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.shared.endpoint
    }

    pub fn link_state(&self) -> LinkState {
        *self.shared.link.borrow()
    }

    /// Observe link state changes.
    pub fn subscribe_link(&self) -> watch::Receiver<LinkState> {
        self.shared.link.subscribe()
    }

    /// Frames waiting to be sent.
    pub fn pending(&self) -> usize {
        self.shared.lock().queue.len()
    }

    pub fn stats(&self) -> MuxStats {
        self.shared.lock().stats
    }

    /// Wait until every queued frame has been written.
    ///
    /// Fails with [`PeerError::NotConnected`] if the link is down when the
    /// timeout expires, or [`PeerError::Timeout`] if it is up but the queue
    /// did not drain in time.
    pub async fn flush(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            let idle = self.shared.idle.notified();
            tokio::pin!(idle);
            idle.as_mut().enable();

            if self.shared.is_idle() {
                return Ok(());
            }
            if tokio::time::timeout_at(deadline, idle).await.is_err() {
                if self.shared.is_idle() {
                    return Ok(());
                }
                return match self.link_state() {
                    LinkState::Connected => Err(PeerError::Timeout { op: "flush", timeout }),
                    _ => Err(PeerError::NotConnected),
                };
            }
        }
    }
}

impl fmt::Debug for Multiplexer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Multiplexer")
            .field("endpoint", &self.shared.endpoint)
            .field("link", &self.link_state())
            .field("pending", &self.pending())
            .finish()
    }
}

struct HandleInner {
    stream_id: u32,
    closed: AtomicBool,
    shared: Weak<Shared>,
}

/// Write handle for one logical stream.
///
/// Clones share the closed flag. Two handles compare equal when they are
/// clones of each other.
#[derive(Clone)]
pub struct StreamHandle {
    inner: Arc<HandleInner>,
}

impl StreamHandle {
    fn new(stream_id: u32, shared: Weak<Shared>) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                stream_id,
                closed: AtomicBool::new(false),
                shared,
            }),
        }
    }

    pub fn stream_id(&self) -> u32 {
        self.inner.stream_id
    }

    /// Queue `payload` as one frame on this stream.
    ///
    /// Returns the number of bytes accepted. Empty payloads are accepted and
    /// discarded. Acceptance does not mean delivery.
    pub fn write(&self, payload: &[u8]) -> Result<usize> {
        match self.inner.shared.upgrade() {
            Some(shared) => shared.enqueue(&self.inner, payload),
            None => Err(PeerError::StreamClosed(self.inner.stream_id)),
        }
    }

    /// Close this handle and all of its clones. Permanent.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

impl PartialEq for StreamHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for StreamHandle {}

impl fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamHandle")
            .field("stream_id", &self.inner.stream_id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl io::Write for StreamHandle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        StreamHandle::write(self, buf).map_err(into_io_error)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl io::Write for &StreamHandle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        StreamHandle::write(self, buf).map_err(into_io_error)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn into_io_error(err: PeerError) -> io::Error {
    match err {
        PeerError::StreamClosed(_) => io::Error::new(io::ErrorKind::BrokenPipe, err),
        other => io::Error::new(io::ErrorKind::InvalidInput, other),
    }
}

async fn run_sender(shared: Arc<Shared>, config: MultiplexerConfig, fingerprint: Fingerprint) {
    loop {
        shared.set_link(LinkState::Connecting);
        let outcome = tokio::select! {
            _ = shared.cancel.cancelled() => break,
            outcome = run_session(&shared, &config, &fingerprint) => outcome,
        };
        shared.set_link(LinkState::Disconnected);

        match outcome {
            Ok(never) => match never {},
            Err(err) => {
                shared.lock().stats.failures += 1;
                warn!(
                    endpoint = %shared.endpoint,
                    error = %err,
                    retry_in = ?config.retry_delay,
                    "link to collector down"
                );
            }
        }

        tokio::select! {
            _ = shared.cancel.cancelled() => break,
            _ = tokio::time::sleep(config.retry_delay) => {}
        }
    }

    {
        let mut state = shared.lock();
        state.in_flight = false;
    }
    shared.set_link(LinkState::Disconnected);
    shared.idle.notify_waiters();
    debug!(endpoint = %shared.endpoint, "multiplexer sender stopped");
}

/// One connection: dial, identify, then flush the queue until a write fails.
async fn run_session(
    shared: &Shared,
    config: &MultiplexerConfig,
    fingerprint: &Fingerprint,
) -> Result<Infallible> {
    let mut stream = dial(&shared.endpoint, config.dial_timeout).await?;
    send_fingerprint(&mut stream, fingerprint, config.write_timeout).await?;

    shared.lock().stats.connects += 1;
    shared.set_link(LinkState::Connected);
    info!(endpoint = %shared.endpoint, "connected to collector");

    loop {
        let sent = drain(shared, &mut stream, config.write_timeout).await?;
        if sent > 0 {
            debug!(sent, "flushed pending frames");
        }
        shared.wake.notified().await;
    }
}

/// Write queued frames in order until the queue is empty.
///
/// The first failed write aborts the drain. The frame being written is
/// discarded even if part of it reached the socket.
pub(crate) async fn drain<W>(shared: &Shared, writer: &mut W, timeout: Duration) -> Result<usize>
where
    W: AsyncWrite + Unpin,
{
    let mut buf = BytesMut::new();
    let mut sent = 0;

    loop {
        let frame = {
            let mut state = shared.lock();
            match state.queue.pop() {
                Some(frame) => {
                    state.in_flight = true;
                    frame
                }
                None => break,
            }
        };

        buf.clear();
        let written = match encode_frame(frame.stream_id, &frame.payload, &mut buf) {
            Ok(()) => write_all_timeout(writer, &buf, timeout)
                .await
                .map_err(PeerError::from),
            Err(err) => Err(err.into()),
        };

        let mut state = shared.lock();
        state.in_flight = false;
        match written {
            Ok(()) => {
                state.stats.sent += 1;
                sent += 1;
            }
            Err(err) => {
                state.stats.lost += 1;
                drop(state);
                warn!(
                    stream_id = frame.stream_id,
                    len = frame.payload.len(),
                    error = %err,
                    "frame lost on write failure"
                );
                return Err(err);
            }
        }
    }

    shared.idle.notify_waiters();
    Ok(sent)
}
