use std::path::Path;

use bytes::Bytes;
use muxpipe_frame::{data_stream, METRICS};
use muxpipe_metrics::{MetricEvent, MetricsTable};
use muxpipe_peer::{Connection, DisconnectReason, Fingerprint, Registry};
use muxpipe_transport::validate_port;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::cmd::CollectArgs;
use crate::exit::{io_error, peer_error, transport_error, CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::{print_frame, print_link, print_metric, OutputFormat, Sender};

/// What the per-connection handlers report to the printing loop.
#[derive(Debug)]
enum Event {
    Connected(Sender),
    Frame {
        sender: Sender,
        stream_id: u32,
        payload: Bytes,
    },
    Metric {
        sender: Sender,
        event: MetricEvent,
    },
    Disconnected {
        sender: Sender,
        reason: DisconnectReason,
    },
}

/// Handler for one sending process.
struct Collector {
    sender: Sender,
    metrics: Option<MetricsTable>,
    events: mpsc::UnboundedSender<Event>,
}

impl Collector {
    fn new(
        fingerprint: &Fingerprint,
        decode_metrics: bool,
        events: mpsc::UnboundedSender<Event>,
    ) -> Self {
        let sender = Sender::from_fingerprint(fingerprint);
        let _ = events.send(Event::Connected(sender.clone()));
        Self {
            sender,
            metrics: decode_metrics.then(MetricsTable::new),
            events,
        }
    }

    fn emit_frame(&self, stream_id: u32, payload: Bytes) {
        let _ = self.events.send(Event::Frame {
            sender: self.sender.clone(),
            stream_id,
            payload,
        });
    }
}

impl Connection for Collector {
    fn on_message(&mut self, stream_id: u32, payload: Bytes) {
        let table = match self.metrics.as_mut() {
            Some(table) if data_stream(stream_id) == METRICS => table,
            _ => return self.emit_frame(stream_id, payload),
        };

        match table.apply(&payload) {
            Ok(events) => {
                for event in events {
                    let _ = self.events.send(Event::Metric {
                        sender: self.sender.clone(),
                        event,
                    });
                }
            }
            Err(err) => {
                warn!(sender = %self.sender.id, error = %err, "undecodable metrics payload");
                self.emit_frame(stream_id, payload);
            }
        }
    }

    fn on_disconnect(&mut self, reason: DisconnectReason) {
        let _ = self.events.send(Event::Disconnected {
            sender: self.sender.clone(),
            reason,
        });
    }
}

pub async fn run(args: CollectArgs, format: OutputFormat) -> CliResult<i32> {
    let registry = Registry::with_config(args.host.clone(), Default::default());
    let (tx, mut rx) = mpsc::unbounded_channel();

    let mut ports = Vec::with_capacity(args.port.len());
    for port in &args.port {
        let port = validate_port(*port).map_err(|err| transport_error("invalid port", err))?;
        let events = tx.clone();
        let decode_metrics = !args.raw_metrics;
        let bound = registry
            .listen(port, move |fingerprint: Fingerprint| {
                Collector::new(&fingerprint, decode_metrics, events.clone())
            })
            .await
            .map_err(|err| peer_error("listen failed", err))?;
        ports.push(bound);
    }
    drop(tx);

    if let Some(path) = &args.ports_file {
        write_ports_file(path, &ports)?;
    }
    info!(host = %args.host, ?ports, "collecting");

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut printed = 0usize;

    let result = loop {
        let event = tokio::select! {
            event = rx.recv() => event,
            signal = &mut ctrl_c => {
                if let Err(err) = signal {
                    break Err(CliError::new(
                        INTERNAL,
                        format!("signal handler setup failed: {err}"),
                    ));
                }
                info!("interrupted");
                break Ok(SUCCESS);
            }
        };
        let Some(event) = event else {
            break Ok(SUCCESS);
        };

        if print_event(&event, args.streams.as_deref(), format) {
            printed = printed.saturating_add(1);
            if args.count.is_some_and(|count| printed >= count) {
                break Ok(SUCCESS);
            }
        }
    };

    registry.shutdown();
    result
}

/// Print one event; returns true if it counts towards `--count`.
fn print_event(event: &Event, streams: Option<&[u32]>, format: OutputFormat) -> bool {
    let wanted = |stream_id: u32| streams.is_none_or(|streams| streams.contains(&stream_id));

    match event {
        Event::Connected(sender) => {
            print_link(true, sender, None, format);
            false
        }
        Event::Disconnected { sender, reason } => {
            print_link(false, sender, Some(&reason.to_string()), format);
            false
        }
        Event::Frame {
            sender,
            stream_id,
            payload,
        } => {
            if !wanted(*stream_id) {
                return false;
            }
            print_frame(*stream_id, payload, sender, format);
            true
        }
        Event::Metric { sender, event } => {
            if !wanted(METRICS) {
                return false;
            }
            print_metric(event, sender, format);
            true
        }
    }
}

fn write_ports_file(path: &Path, ports: &[u16]) -> CliResult<()> {
    let json = serde_json::to_vec(ports)
        .map_err(|err| CliError::new(INTERNAL, format!("failed encoding ports: {err}")))?;
    std::fs::write(path, json)
        .map_err(|err| io_error(&format!("failed writing {}", path.display()), err))?;
    info!(path = %path.display(), "wrote ports file");
    Ok(())
}

#[cfg(test)]
mod tests {
    use muxpipe_frame::{STDERR, STDOUT};
    use muxpipe_metrics::MetricsRegistry;

    use super::*;

    fn collector(decode_metrics: bool) -> (Collector, mpsc::UnboundedReceiver<Event>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut fingerprint = Fingerprint::from_props(Default::default());
        fingerprint.insert("pid", 7u64);
        let collector = Collector::new(&fingerprint, decode_metrics, tx);
        assert!(matches!(rx.try_recv(), Ok(Event::Connected(sender)) if sender.pid == Some(7)));
        (collector, rx)
    }

    fn metrics_payload() -> Bytes {
        let registry = MetricsRegistry::new();
        let queue = registry.metric("queue", "Queue depth", "frames").unwrap();
        queue.post("12").unwrap();
        registry.collect(false).unwrap()
    }

    #[test]
    fn metrics_stream_is_decoded() {
        let (mut collector, mut rx) = collector(true);
        collector.on_message(METRICS, metrics_payload());

        match rx.try_recv() {
            Ok(Event::Metric { event, .. }) => {
                assert_eq!(event.id, "queue");
                assert_eq!(event.value, "12");
            }
            other => panic!("expected metric event, got {other:?}"),
        }
    }

    #[test]
    fn raw_metrics_pass_through_as_frames() {
        let (mut collector, mut rx) = collector(false);
        collector.on_message(METRICS, metrics_payload());
        assert!(matches!(
            rx.try_recv(),
            Ok(Event::Frame { stream_id: METRICS, .. })
        ));
    }

    #[test]
    fn undecodable_metrics_fall_back_to_frame() {
        let (mut collector, mut rx) = collector(true);
        collector.on_message(METRICS, Bytes::from_static(&[0x00]));
        assert!(matches!(
            rx.try_recv(),
            Ok(Event::Frame { stream_id: METRICS, .. })
        ));
    }

    #[test]
    fn disconnect_is_reported() {
        let (mut collector, mut rx) = collector(true);
        collector.on_disconnect(DisconnectReason::EndOfStream);
        assert!(matches!(
            rx.try_recv(),
            Ok(Event::Disconnected {
                reason: DisconnectReason::EndOfStream,
                ..
            })
        ));
    }

    #[test]
    fn stream_filter_controls_counting() {
        let (mut collector, mut rx) = collector(true);
        collector.on_message(STDOUT, Bytes::from_static(b"out"));
        collector.on_message(STDERR, Bytes::from_static(b"err"));

        let out = rx.try_recv().expect("stdout frame");
        let err = rx.try_recv().expect("stderr frame");
        let filter = [STDERR];
        assert!(!print_event(&out, Some(&filter), OutputFormat::Raw));
        assert!(print_event(&err, Some(&filter), OutputFormat::Raw));
        assert!(print_event(&out, None, OutputFormat::Raw));
    }
}
