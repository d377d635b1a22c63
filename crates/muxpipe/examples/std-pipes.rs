//! Standard pipes example: route `tracing` output over the logger stream
//! and publish metrics once per second.
//!
//! Run with:
//!   cargo run --example std-pipes --features metrics,pipe-writer

use std::time::Duration;

use bytes::Bytes;
use muxpipe::frame::stream_name;
use muxpipe::metrics::{MetricsPublisher, MetricsRegistry, PublisherConfig};
use muxpipe::peer::{Connection, Fingerprint, MultiplexerConfig, Registry};
use muxpipe::pipes::Pipes;
use muxpipe::transport::Endpoint;

struct Echo;

impl Connection for Echo {
    fn on_message(&mut self, stream_id: u32, payload: Bytes) {
        eprint!(
            "[collector] {:<7} {}",
            stream_name(stream_id),
            String::from_utf8_lossy(&payload)
        );
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let registry = Registry::new();
    let port = registry
        .listen(0, |_fingerprint: Fingerprint| Echo)
        .await?;

    let pipes = Pipes::open(Endpoint::localhost(port), MultiplexerConfig::default())?;
    tracing_subscriber::fmt()
        .with_writer(pipes.log_writer())
        .with_ansi(false)
        .init();

    let metrics = MetricsRegistry::new();
    let uptime = metrics.metric("uptime", "Uptime", "s")?;
    let publisher = MetricsPublisher::spawn(
        metrics.clone(),
        pipes.metrics().clone(),
        PublisherConfig::default(),
        pipes.multiplexer().subscribe_link(),
    );

    for second in 1..=3u64 {
        tracing::info!(second, "still running");
        uptime.update(second)?;
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    publisher.join().await;
    pipes.multiplexer().flush(Duration::from_secs(5)).await?;
    pipes.multiplexer().shutdown();
    tokio::time::sleep(Duration::from_millis(200)).await;
    registry.shutdown();
    Ok(())
}
