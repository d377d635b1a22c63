//! TCP transport layer for muxpipe.
//!
//! Provides the endpoint type and the few socket operations the rest of the
//! workspace needs:
//! - binding a listener (including OS-assigned ephemeral ports)
//! - dialing a collector with a bounded timeout
//! - writing a buffer with a bounded timeout
//!
//! This is the lowest layer of muxpipe. Everything else builds on top of it.

pub mod endpoint;
pub mod error;
pub mod tcp;

pub use endpoint::{validate_port, Endpoint, LOCALHOST};
pub use error::{Result, TransportError};
pub use tcp::{dial, write_all_timeout, TcpBinding};
