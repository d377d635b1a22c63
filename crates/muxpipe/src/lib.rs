//! Broker-less multiplexing of logs, metrics and application streams over
//! one TCP connection.
//!
//! A process opens a [`peer::Multiplexer`] to its collector and writes to
//! any number of logical streams through cheap handles. The collector runs a
//! [`peer::Registry`] of demultiplexers and gets one application handler per
//! sending process, identified by its fingerprint.
//!
//! # Crate Structure
//!
//! - [`transport`]: TCP endpoints, bounded dial and write
//! - [`frame`]: frame codec, reassembly, well-known stream ids
//! - [`peer`]: multiplexer, demultiplexer, registry (behind `peer` feature)
//! - [`metrics`]: metric records on the metrics stream (behind `metrics` feature)
//! - [`pipes`]: the standard streams and the ports file (behind `peer` feature)

/// Re-export transport types.
pub mod transport {
    pub use muxpipe_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use muxpipe_frame::*;
}

/// Re-export peer types (requires `peer` feature).
#[cfg(feature = "peer")]
pub mod peer {
    pub use muxpipe_peer::*;
}

/// Re-export metrics types (requires `metrics` feature).
#[cfg(feature = "metrics")]
pub mod metrics {
    pub use muxpipe_metrics::*;
}

#[cfg(feature = "peer")]
pub mod pipes;
