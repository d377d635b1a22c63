//! Connection management for muxpipe.
//!
//! The writer side is the [`Multiplexer`]: application code takes a
//! [`StreamHandle`] per logical stream and writes payloads; a background task
//! keeps one TCP connection to the collector alive, identifies the process
//! with a [`Fingerprint`] on every fresh connection and flushes queued frames
//! in order.
//!
//! The receiver side is the [`Demultiplexer`] (one per port) and the
//! [`Registry`] that owns them. Each accepted connection is identified by its
//! first frame and then handed to a [`Connection`] built by the caller's
//! [`ConnectionFactory`].

pub mod connection;
pub mod demultiplexer;
pub mod error;
pub mod fingerprint;
pub mod multiplexer;
pub mod queue;
pub mod registry;

pub use connection::{Connection, ConnectionFactory, DisconnectReason};
pub use demultiplexer::{DemuxConfig, Demultiplexer, DEFAULT_READ_BUFFER_SIZE};
pub use error::{PeerError, Result};
pub use fingerprint::{send_fingerprint, Fingerprint, IdentityConfig};
pub use multiplexer::{
    LinkState, MuxStats, Multiplexer, MultiplexerConfig, StreamHandle, DEFAULT_DIAL_TIMEOUT,
    DEFAULT_RETRY_DELAY, DEFAULT_WRITE_TIMEOUT,
};
pub use queue::{OverflowPolicy, QueueConfig, DEFAULT_QUEUE_CAPACITY};
pub use registry::Registry;
