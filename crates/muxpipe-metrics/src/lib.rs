//! Metrics carried on the muxpipe metrics stream.
//!
//! A producer registers metrics in a [`MetricsRegistry`], posts values
//! through [`Metric`] and [`Counter`] handles, and runs a
//! [`MetricsPublisher`] that flushes the latest values once per interval.
//! A collector feeds each metrics payload to a [`MetricsTable`].
//!
//! Each payload is a sequence of records: a 2-byte big-endian index, a
//! 1-byte length and the value. Records whose index has bit 15 set carry a
//! metric's schema (`id\0name\0units\0value\0\0`).

pub mod codec;
pub mod config;
pub mod error;
pub mod publisher;
pub mod registry;
pub mod table;

pub use codec::{decode_records, encode_record, Record, Schema, MAX_VALUE_LEN, SCHEMA_FLAG};
pub use config::{PublisherConfig, DEFAULT_PUBLISH_INTERVAL};
pub use error::{MetricsError, Result};
pub use publisher::MetricsPublisher;
pub use registry::{Counter, Metric, MetricsRegistry, ONE_TIME_PREFIX};
pub use table::{MetricEvent, MetricsTable};
