use std::fmt;

use bytes::Bytes;

use crate::fingerprint::Fingerprint;

/// Why a demultiplexed connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The sender closed the socket.
    EndOfStream,
    /// Reading from the socket failed.
    Io(String),
    /// The byte stream could not be split into frames.
    Frame(String),
    /// The receiving side was shut down.
    Shutdown,
    /// The sender broke the handshake.
    ProtocolViolation(String),
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EndOfStream => f.write_str("end of stream"),
            Self::Io(err) => write!(f, "read error: {err}"),
            Self::Frame(err) => write!(f, "frame error: {err}"),
            Self::Shutdown => f.write_str("shutdown"),
            Self::ProtocolViolation(msg) => write!(f, "protocol violation: {msg}"),
        }
    }
}

/// Application handler for one accepted connection.
///
/// Calls on one handler are never concurrent: every call comes from the
/// connection's own reader task, in wire order.
pub trait Connection: Send + 'static {
    /// A frame arrived after the fingerprint.
    fn on_message(&mut self, stream_id: u32, payload: Bytes);

    /// The connection ended. Called exactly once.
    fn on_disconnect(&mut self, reason: DisconnectReason) {
        let _ = reason;
    }
}

/// Creates a [`Connection`] from the sender's fingerprint.
pub trait ConnectionFactory: Send + Sync + 'static {
    type Connection: Connection;

    fn create(&self, fingerprint: Fingerprint) -> Self::Connection;
}

impl<F, C> ConnectionFactory for F
where
    F: Fn(Fingerprint) -> C + Send + Sync + 'static,
    C: Connection,
{
    type Connection = C;

    fn create(&self, fingerprint: Fingerprint) -> C {
        self(fingerprint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counter(usize);

    impl Connection for Counter {
        fn on_message(&mut self, _stream_id: u32, payload: Bytes) {
            self.0 += payload.len();
        }
    }

    fn make<F: ConnectionFactory>(factory: &F, fp: Fingerprint) -> F::Connection {
        factory.create(fp)
    }

    #[test]
    fn closures_are_factories() {
        let mut conn = make(&|_fp: Fingerprint| Counter(0), Fingerprint::default());
        conn.on_message(1, Bytes::from_static(b"abc"));
        conn.on_disconnect(DisconnectReason::EndOfStream);
        assert_eq!(conn.0, 3);
    }

    #[test]
    fn reason_display() {
        assert_eq!(DisconnectReason::EndOfStream.to_string(), "end of stream");
        assert_eq!(
            DisconnectReason::ProtocolViolation("first frame on stream 5".into()).to_string(),
            "protocol violation: first frame on stream 5"
        );
    }
}
