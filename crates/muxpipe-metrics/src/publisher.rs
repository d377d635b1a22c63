use muxpipe_peer::{LinkState, StreamHandle};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::PublisherConfig;
use crate::registry::MetricsRegistry;

/// Background task that flushes a [`MetricsRegistry`] onto the metrics
/// stream at a fixed interval.
///
/// Every time `link` reports [`LinkState::Connected`] all schemas are sent
/// again, so a collector that only sees the new connection can still name
/// every metric. Dropping the publisher stops it after one final flush.
#[derive(Debug)]
pub struct MetricsPublisher {
    cancel: CancellationToken,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl MetricsPublisher {
    /// Start publishing. Must be called from within a tokio runtime.
    pub fn spawn(
        registry: MetricsRegistry,
        sink: StreamHandle,
        config: PublisherConfig,
        link: watch::Receiver<LinkState>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(registry, sink, config, link, cancel.clone()));
        Self {
            cancel,
            task: Some(task),
        }
    }

    /// Ask the task to flush once more and exit.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Stop and wait for the final flush.
    pub async fn join(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                warn!(error = %err, "metrics publisher task failed");
            }
        }
    }
}

impl Drop for MetricsPublisher {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run(
    registry: MetricsRegistry,
    sink: StreamHandle,
    config: PublisherConfig,
    mut link: watch::Receiver<LinkState>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut watching = true;

    loop {
        let force = tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => false,
            changed = link.changed(), if watching => match changed {
                Ok(()) => {
                    if *link.borrow_and_update() != LinkState::Connected {
                        continue;
                    }
                    true
                }
                Err(_) => {
                    watching = false;
                    continue;
                }
            },
        };

        if let Err(err) = registry.publish(&sink, force) {
            debug!(error = %err, "metrics stream closed, stopping publisher");
            return;
        }
    }

    if let Err(err) = registry.publish(&sink, false) {
        debug!(error = %err, "final metrics flush failed");
    }
}
