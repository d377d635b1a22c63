use std::fmt;
use std::io;

use muxpipe::pipes::PipesError;
use muxpipe_frame::FrameError;
use muxpipe_metrics::MetricsError;
use muxpipe_peer::PeerError;
use muxpipe_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::ConnectionRefused | io::ErrorKind::AddrInUse => TRANSPORT_ERROR,
        io::ErrorKind::NotFound => USAGE,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Bind { source, .. }
        | TransportError::Connect { source, .. }
        | TransportError::Accept(source)
        | TransportError::Io(source) => io_error(context, source),
        TransportError::Timeout { .. } => CliError::new(TIMEOUT, format!("{context}: {err}")),
        TransportError::InvalidPort(_) | TransportError::InvalidEndpoint(_) => {
            CliError::new(USAGE, format!("{context}: {err}"))
        }
    }
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Io(source) => io_error(context, source),
        FrameError::PayloadTooLarge { .. } => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        FrameError::ConnectionClosed => CliError::new(FAILURE, format!("{context}: {err}")),
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

pub fn peer_error(context: &str, err: PeerError) -> CliError {
    match err {
        PeerError::Transport(err) => transport_error(context, err),
        PeerError::Frame(err) => frame_error(context, err),
        PeerError::Timeout { .. } => CliError::new(TIMEOUT, format!("{context}: {err}")),
        PeerError::NotConnected => CliError::new(TRANSPORT_ERROR, format!("{context}: {err}")),
        PeerError::ReservedStream(_) => CliError::new(USAGE, format!("{context}: {err}")),
        PeerError::Fingerprint(_) | PeerError::ProtocolViolation(_) => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        PeerError::StreamClosed(_) => CliError::new(FAILURE, format!("{context}: {err}")),
    }
}

pub fn pipes_error(context: &str, err: PipesError) -> CliError {
    match err {
        PipesError::Read { source, .. } => io_error(context, source),
        PipesError::Parse { .. } | PipesError::NoPorts(_) => {
            CliError::new(USAGE, format!("{context}: {err}"))
        }
        PipesError::Transport(err) => transport_error(context, err),
        PipesError::Peer(err) => peer_error(context, err),
    }
}

pub fn metrics_error(context: &str, err: MetricsError) -> CliError {
    match err {
        MetricsError::Peer(err) => peer_error(context, err),
        MetricsError::ValueTooLong { .. } | MetricsError::IndexExhausted => {
            CliError::new(USAGE, format!("{context}: {err}"))
        }
        MetricsError::Truncated { .. } | MetricsError::MalformedSchema(_) => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn timeouts_map_to_124() {
        let err = peer_error(
            "flush",
            PeerError::Timeout {
                op: "flush",
                timeout: Duration::from_secs(1),
            },
        );
        assert_eq!(err.code, TIMEOUT);

        let err = transport_error(
            "dial",
            TransportError::Timeout {
                op: "dial",
                timeout: Duration::from_secs(1),
            },
        );
        assert_eq!(err.code, TIMEOUT);
    }

    #[test]
    fn bad_ports_are_usage_errors() {
        let err = pipes_error(
            "ports",
            PipesError::Transport(TransportError::InvalidPort(-5)),
        );
        assert_eq!(err.code, USAGE);
        assert!(err.message.contains("-5"));
    }

    #[test]
    fn refused_connection_is_transport_error() {
        let err = peer_error(
            "send",
            PeerError::Transport(TransportError::Connect {
                addr: "127.0.0.1:1".to_string(),
                source: io::Error::from(io::ErrorKind::ConnectionRefused),
            }),
        );
        assert_eq!(err.code, TRANSPORT_ERROR);
        assert_eq!(peer_error("send", PeerError::NotConnected).code, TRANSPORT_ERROR);
    }
}
