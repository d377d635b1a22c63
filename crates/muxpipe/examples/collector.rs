//! Collector example: one receiver, one sender in the same process.
//!
//! Run with:
//!   cargo run --example collector --features metrics

use std::time::Duration;

use bytes::Bytes;
use muxpipe::frame::{stream_name, METRICS, STDOUT};
use muxpipe::metrics::{MetricsRegistry, MetricsTable};
use muxpipe::peer::{
    Connection, DisconnectReason, Fingerprint, Multiplexer, MultiplexerConfig, Registry,
};
use muxpipe::transport::Endpoint;

struct Printer {
    pid: u64,
    metrics: MetricsTable,
}

impl Connection for Printer {
    fn on_message(&mut self, stream_id: u32, payload: Bytes) {
        if stream_id == METRICS {
            match self.metrics.apply(&payload) {
                Ok(events) => {
                    for event in events {
                        eprintln!(
                            "[collector] pid={} metric {}={}{}",
                            self.pid, event.id, event.value, event.units
                        );
                    }
                }
                Err(err) => eprintln!("[collector] bad metrics payload: {err}"),
            }
            return;
        }
        eprintln!(
            "[collector] pid={} {}: {}",
            self.pid,
            stream_name(stream_id),
            String::from_utf8_lossy(&payload)
        );
    }

    fn on_disconnect(&mut self, reason: DisconnectReason) {
        eprintln!("[collector] pid={} disconnected: {reason}", self.pid);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let registry = Registry::new();
    let port = registry
        .listen(0, |fingerprint: Fingerprint| {
            eprintln!("[collector] new sender: {}", fingerprint.to_json());
            Printer {
                pid: fingerprint.pid().unwrap_or_default(),
                metrics: MetricsTable::new(),
            }
        })
        .await?;
    eprintln!("[collector] listening on port {port}");

    let mux = Multiplexer::open(Endpoint::localhost(port), MultiplexerConfig::default());
    let stdout = mux.new_writer(STDOUT)?;
    let metrics = MetricsRegistry::new();
    let requests = metrics.counter("requests", "Requests served", "")?;

    for i in 0..3 {
        stdout.write(format!("request {i} handled").as_bytes())?;
        requests.add(1)?;
    }
    metrics.publish(&mux.new_writer(METRICS)?, true)?;

    mux.flush(Duration::from_secs(5)).await?;
    mux.shutdown();

    tokio::time::sleep(Duration::from_millis(200)).await;
    registry.shutdown();
    Ok(())
}
