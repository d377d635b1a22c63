use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use muxpipe_frame::stream_name;
use muxpipe_metrics::MetricEvent;
use muxpipe_peer::{Fingerprint, MuxStats};
use serde::Serialize;

#[derive(Clone, Debug, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// Who sent a frame, as far as the collector knows.
#[derive(Debug, Clone, Serialize)]
pub struct Sender {
    pub id: String,
    pub pid: Option<u64>,
    pub remote_addr: Option<String>,
}

impl Sender {
    pub fn from_fingerprint(fingerprint: &Fingerprint) -> Self {
        Self {
            id: fingerprint
                .id()
                .map(str::to_string)
                .unwrap_or_else(|| fingerprint.content_id()),
            pid: fingerprint.pid(),
            remote_addr: fingerprint.remote_addr().map(str::to_string),
        }
    }

    fn label(&self) -> String {
        match self.pid {
            Some(pid) => format!("pid:{pid}"),
            None => self.id.chars().take(12).collect(),
        }
    }
}

#[derive(Serialize)]
struct FrameOutput<'a> {
    event: &'static str,
    stream_id: u32,
    stream_name: &'static str,
    payload_size: usize,
    payload: String,
    sender: &'a Sender,
    timestamp: String,
}

#[derive(Serialize)]
struct MetricOutput<'a> {
    event: &'static str,
    index: u16,
    id: &'a str,
    name: &'a str,
    units: &'a str,
    value: &'a str,
    sender: &'a Sender,
    timestamp: String,
}

#[derive(Serialize)]
struct LinkOutput<'a> {
    event: &'static str,
    sender: &'a Sender,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'a str>,
    timestamp: String,
}

#[derive(Serialize)]
struct SendOutput<'a> {
    endpoint: &'a str,
    stream_id: u32,
    stream_name: &'static str,
    frames_written: u64,
    frames_sent: u64,
    frames_dropped: u64,
    frames_lost: u64,
}

pub fn print_frame(stream_id: u32, payload: &[u8], sender: &Sender, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = FrameOutput {
                event: "frame",
                stream_id,
                stream_name: stream_name(stream_id),
                payload_size: payload.len(),
                payload: payload_preview(payload),
                sender,
                timestamp: now_unix_seconds(),
            };
            print_json(&out);
        }
        OutputFormat::Table => {
            let mut table = new_table(vec!["STREAM", "SIZE", "SENDER", "PAYLOAD"]);
            table.add_row(vec![
                format!("{} ({})", stream_name(stream_id), stream_id),
                payload.len().to_string(),
                sender.label(),
                payload_preview(payload),
            ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "stream={} ({}) size={} sender={} payload={}",
                stream_id,
                stream_name(stream_id),
                payload.len(),
                sender.label(),
                payload_preview(payload)
            );
        }
        OutputFormat::Raw => print_raw(payload),
    }
}

pub fn print_metric(event: &MetricEvent, sender: &Sender, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = MetricOutput {
                event: "metric",
                index: event.index,
                id: &event.id,
                name: &event.name,
                units: &event.units,
                value: &event.value,
                sender,
                timestamp: now_unix_seconds(),
            };
            print_json(&out);
        }
        OutputFormat::Table => {
            let mut table = new_table(vec!["METRIC", "VALUE", "UNITS", "SENDER"]);
            table.add_row(vec![
                metric_label(event),
                event.value.clone(),
                event.units.clone(),
                sender.label(),
            ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "metric={} value={}{} sender={}",
                metric_label(event),
                event.value,
                event.units,
                sender.label()
            );
        }
        OutputFormat::Raw => {
            println!("{}={}", metric_label(event), event.value);
        }
    }
}

/// Connect and disconnect notices. Raw output only carries payloads.
pub fn print_link(connected: bool, sender: &Sender, reason: Option<&str>, format: OutputFormat) {
    let event = if connected {
        "connected"
    } else {
        "disconnected"
    };
    match format {
        OutputFormat::Json => {
            let out = LinkOutput {
                event,
                sender,
                reason,
                timestamp: now_unix_seconds(),
            };
            print_json(&out);
        }
        OutputFormat::Table | OutputFormat::Pretty => match reason {
            Some(reason) => println!("{event}: {} ({reason})", sender.label()),
            None => println!(
                "{event}: {} from {}",
                sender.label(),
                sender.remote_addr.as_deref().unwrap_or("unknown")
            ),
        },
        OutputFormat::Raw => {}
    }
}

pub fn print_fingerprint(fingerprint: &Fingerprint, format: OutputFormat) {
    match format {
        OutputFormat::Json | OutputFormat::Raw => print_json(&fingerprint.to_json()),
        OutputFormat::Table => {
            let mut table = new_table(vec!["KEY", "VALUE"]);
            for (key, value) in fingerprint.props() {
                table.add_row(vec![key.clone(), value_text(value)]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for (key, value) in fingerprint.props() {
                println!("{key:<20} {}", value_text(value));
            }
        }
    }
}

pub fn print_send_summary(endpoint: &str, stream_id: u32, stats: MuxStats, format: OutputFormat) {
    let out = SendOutput {
        endpoint,
        stream_id,
        stream_name: stream_name(stream_id),
        frames_written: stats.written,
        frames_sent: stats.sent,
        frames_dropped: stats.dropped,
        frames_lost: stats.lost,
    };
    match format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Table | OutputFormat::Pretty => {
            println!(
                "sent {} of {} frame(s) to {} on {} ({})",
                out.frames_sent, out.frames_written, out.endpoint, out.stream_name, out.stream_id
            );
            if out.frames_dropped > 0 || out.frames_lost > 0 {
                println!(
                    "  dropped={} lost={}",
                    out.frames_dropped, out.frames_lost
                );
            }
        }
        OutputFormat::Raw => {}
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn print_json<T: Serialize + ?Sized>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

fn new_table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header);
    table
}

fn metric_label(event: &MetricEvent) -> String {
    match (event.id.is_empty(), event.name.is_empty()) {
        (true, _) => format!("#{}", event.index),
        (false, true) => event.id.clone(),
        (false, false) => format!("{} ({})", event.id, event.name),
    }
}

fn value_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn payload_preview(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) => text.trim_end_matches('\n').to_string(),
        Err(_) => format!("<binary {} bytes>", payload.len()),
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_preview_marks_binary() {
        assert_eq!(payload_preview(b"hello\n"), "hello");
        assert_eq!(payload_preview(&[0xff, 0xfe]), "<binary 2 bytes>");
    }

    #[test]
    fn metric_label_falls_back_to_index() {
        let mut event = MetricEvent {
            index: 4,
            id: String::new(),
            name: String::new(),
            units: String::new(),
            value: "1".to_string(),
        };
        assert_eq!(metric_label(&event), "#4");

        event.id = "rps".to_string();
        assert_eq!(metric_label(&event), "rps");

        event.name = "Requests".to_string();
        assert_eq!(metric_label(&event), "rps (Requests)");
    }

    #[test]
    fn sender_label_prefers_pid() {
        let sender = Sender {
            id: "0123456789abcdef".to_string(),
            pid: Some(42),
            remote_addr: None,
        };
        assert_eq!(sender.label(), "pid:42");

        let sender = Sender { pid: None, ..sender };
        assert_eq!(sender.label(), "0123456789ab");
    }
}
