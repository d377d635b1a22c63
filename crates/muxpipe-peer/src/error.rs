/// Errors that can occur in multiplexer and demultiplexer operations.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] muxpipe_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] muxpipe_frame::FrameError),

    /// The fingerprint could not be serialized or parsed.
    #[error("invalid fingerprint: {0}")]
    Fingerprint(#[from] serde_json::Error),

    /// The stream id is reserved for internal use.
    #[error("stream {0} is reserved for internal use")]
    ReservedStream(u32),

    /// The stream handle was closed.
    #[error("stream {0} is closed")]
    StreamClosed(u32),

    /// There is no connection to write to.
    #[error("not connected")]
    NotConnected,

    /// An operation did not complete in time.
    #[error("{op} timed out after {timeout:?}")]
    Timeout {
        op: &'static str,
        timeout: std::time::Duration,
    },

    /// The remote side broke the framing protocol.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
}

pub type Result<T> = std::result::Result<T, PeerError>;
