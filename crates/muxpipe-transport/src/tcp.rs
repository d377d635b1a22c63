use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info};

use crate::endpoint::Endpoint;
use crate::error::{Result, TransportError};

/// A bound TCP listener together with the port it actually received.
///
/// Binding port `0` asks the OS for an ephemeral port; [`port`](Self::port)
/// reports the value that was assigned.
#[derive(Debug)]
pub struct TcpBinding {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl TcpBinding {
    /// Bind and listen on `host:port`.
    pub async fn bind(host: &str, port: u16) -> Result<Self> {
        let addr = Endpoint::new(host, port).to_string();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| TransportError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| TransportError::Bind { addr, source })?;

        info!(%local_addr, "listening on tcp socket");
        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Accept an incoming connection.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr)> {
        let (stream, remote) = self
            .listener
            .accept()
            .await
            .map_err(TransportError::Accept)?;
        debug!(%remote, "accepted connection");
        Ok((stream, remote))
    }

    /// The port this listener is bound to.
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

/// Connect to `endpoint`, giving up after `timeout`.
pub async fn dial(endpoint: &Endpoint, timeout: Duration) -> Result<TcpStream> {
    let addr = endpoint.to_string();
    let stream = match tokio::time::timeout(timeout, TcpStream::connect(&addr)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(source)) => return Err(TransportError::Connect { addr, source }),
        Err(_) => return Err(TransportError::Timeout { op: "dial", timeout }),
    };
    // Frames are small; send them without Nagle delay.
    stream.set_nodelay(true)?;
    debug!(%endpoint, "connected to collector");
    Ok(stream)
}

/// Write all of `buf`, giving up after `timeout`.
///
/// On failure an unknown prefix of `buf` may already be on the wire.
pub async fn write_all_timeout<W>(writer: &mut W, buf: &[u8], timeout: Duration) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    match tokio::time::timeout(timeout, writer.write_all(buf)).await {
        Ok(result) => result.map_err(TransportError::Io),
        Err(_) => Err(TransportError::Timeout {
            op: "write",
            timeout,
        }),
    }
}
