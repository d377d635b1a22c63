use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use muxpipe_frame::{Reassembler, FINGERPRINT, MAX_PAYLOAD};
use muxpipe_transport::TcpBinding;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::connection::{Connection, ConnectionFactory, DisconnectReason};
use crate::error::Result;
use crate::fingerprint::Fingerprint;

/// Default size of each connection's read buffer.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 500_000;

/// Demultiplexer configuration.
#[derive(Debug, Clone)]
pub struct DemuxConfig {
    /// Bytes requested per socket read.
    pub read_buffer_size: usize,
    /// Largest payload a frame header may declare.
    pub max_payload: usize,
    /// Pause after a failed accept.
    pub accept_error_backoff: Duration,
}

impl Default for DemuxConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            max_payload: MAX_PAYLOAD,
            accept_error_backoff: Duration::from_millis(100),
        }
    }
}

/// Receiver side of the transport: accepts connections on one port and
/// hands each one's frames to an application [`Connection`].
///
/// Dropping the demultiplexer stops accepting; connections already
/// accepted keep running until they end or [`shutdown`](Self::shutdown)
/// is called.
#[derive(Debug)]
pub struct Demultiplexer {
    local_addr: SocketAddr,
    accepting: CancellationToken,
    shutdown: CancellationToken,
    live: Arc<AtomicUsize>,
}

impl Demultiplexer {
    /// Bind `host:port` and start accepting. Port `0` picks an ephemeral port.
    pub async fn bind<F>(host: &str, port: u16, factory: F, config: DemuxConfig) -> Result<Self>
    where
        F: ConnectionFactory,
    {
        let binding = TcpBinding::bind(host, port).await?;
        let local_addr = binding.local_addr();
        let shutdown = CancellationToken::new();
        let accepting = shutdown.child_token();
        let live = Arc::new(AtomicUsize::new(0));

        tokio::spawn(accept_loop(
            binding,
            Arc::new(factory),
            config,
            accepting.clone(),
            shutdown.clone(),
            Arc::clone(&live),
        ));

        Ok(Self {
            local_addr,
            accepting,
            shutdown,
            live,
        })
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Connections currently being read.
    pub fn connections(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    /// Stop accepting new connections and release the port.
    pub fn close(&self) {
        self.accepting.cancel();
    }

    /// Stop accepting and disconnect every live connection.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.accepting.is_cancelled()
    }
}

impl Drop for Demultiplexer {
    fn drop(&mut self) {
        self.accepting.cancel();
    }
}

async fn accept_loop<F>(
    binding: TcpBinding,
    factory: Arc<F>,
    config: DemuxConfig,
    accepting: CancellationToken,
    shutdown: CancellationToken,
    live: Arc<AtomicUsize>,
) where
    F: ConnectionFactory,
{
    let port = binding.port();
    loop {
        let accepted = tokio::select! {
            _ = accepting.cancelled() => break,
            accepted = binding.accept() => accepted,
        };

        match accepted {
            Ok((stream, remote)) => {
                let guard = LiveGuard::new(Arc::clone(&live));
                let factory = Arc::clone(&factory);
                let config = config.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    read_connection(stream, remote, factory.as_ref(), &config, &shutdown).await;
                    drop(guard);
                });
            }
            Err(err) => {
                error!(port, error = %err, "accept failed");
                tokio::select! {
                    _ = accepting.cancelled() => break,
                    _ = tokio::time::sleep(config.accept_error_backoff) => {}
                }
            }
        }
    }
    info!(port, "stopped accepting connections");
}

struct LiveGuard(Arc<AtomicUsize>);

impl LiveGuard {
    fn new(live: Arc<AtomicUsize>) -> Self {
        live.fetch_add(1, Ordering::AcqRel);
        Self(live)
    }
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Read one connection until it ends, then notify its handler.
///
/// The reader is dropped (and the socket closed) on return.
pub(crate) async fn read_connection<R, F>(
    mut reader: R,
    remote: SocketAddr,
    factory: &F,
    config: &DemuxConfig,
    shutdown: &CancellationToken,
) where
    R: AsyncRead + Unpin,
    F: ConnectionFactory,
{
    let mut buf = vec![0u8; config.read_buffer_size.max(1)];
    let mut reassembler = Reassembler::with_max_payload(config.max_payload);
    let mut handler: Option<F::Connection> = None;

    let reason = loop {
        let read = tokio::select! {
            _ = shutdown.cancelled() => break DisconnectReason::Shutdown,
            read = reader.read(&mut buf) => read,
        };
        let n = match read {
            Ok(0) => break DisconnectReason::EndOfStream,
            Ok(n) => n,
            Err(err) => break DisconnectReason::Io(err.to_string()),
        };

        reassembler.extend(&buf[..n]);
        if let Err(reason) = dispatch(&mut reassembler, &mut handler, factory, remote) {
            break reason;
        }
    };

    match handler {
        Some(mut handler) => {
            debug!(%remote, %reason, frames = reassembler.frames_decoded(), "connection ended");
            handler.on_disconnect(reason);
        }
        None => match reason {
            DisconnectReason::ProtocolViolation(_) | DisconnectReason::Frame(_) => {
                warn!(%remote, %reason, "dropping unidentified connection");
            }
            _ => debug!(%remote, %reason, "connection ended before fingerprint"),
        },
    }
}

/// Route every complete buffered frame.
///
/// Until the fingerprint arrives any frame ends the connection with a
/// protocol violation. Older collectors logged such frames and kept
/// reading; here the sender must identify itself first.
fn dispatch<F>(
    reassembler: &mut Reassembler,
    handler: &mut Option<F::Connection>,
    factory: &F,
    remote: SocketAddr,
) -> std::result::Result<(), DisconnectReason>
where
    F: ConnectionFactory,
{
    loop {
        let frame = match reassembler.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => return Ok(()),
            Err(err) => return Err(DisconnectReason::Frame(err.to_string())),
        };

        match handler {
            Some(handler) => handler.on_message(frame.stream_id, frame.payload),
            None => {
                if frame.stream_id != FINGERPRINT {
                    return Err(DisconnectReason::ProtocolViolation(format!(
                        "first frame on stream {} instead of fingerprint",
                        frame.stream_id
                    )));
                }
                let mut fingerprint = Fingerprint::parse(&frame.payload)
                    .map_err(|err| DisconnectReason::ProtocolViolation(err.to_string()))?;
                fingerprint.set_remote_addr(remote);
                info!(
                    %remote,
                    id = fingerprint.id().unwrap_or("?"),
                    pid = fingerprint.pid(),
                    "sender identified"
                );
                *handler = Some(factory.create(fingerprint));
            }
        }
    }
}
