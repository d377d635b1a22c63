#![cfg(all(unix, feature = "cli"))]

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

fn unique_temp_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "muxpipe-cli-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

fn wait_for_ports(path: &Path, timeout: Duration) -> Vec<u16> {
    let start = Instant::now();
    loop {
        let ports = std::fs::read(path)
            .ok()
            .and_then(|data| serde_json::from_slice::<Vec<u16>>(&data).ok());
        if let Some(ports) = ports.filter(|ports| !ports.is_empty()) {
            return ports;
        }
        if start.elapsed() >= timeout {
            panic!("collector did not write {}", path.display());
        }
        thread::sleep(Duration::from_millis(25));
    }
}

fn wait_for_exit(child: &mut Child, timeout: Duration) -> ExitStatus {
    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait().expect("child should be waitable") {
            return status;
        }
        if start.elapsed() >= timeout {
            let _ = child.kill();
            panic!("collector did not exit");
        }
        thread::sleep(Duration::from_millis(25));
    }
}

fn json_lines(stdout: &str) -> Vec<serde_json::Value> {
    stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).expect("each line should be json"))
        .collect()
}

#[test]
fn send_reaches_collect_with_frame_and_metric() {
    let dir = unique_temp_dir("collect");
    let ports_file = dir.join("port.json");

    let mut collector = Command::new(env!("CARGO_BIN_EXE_muxpipe"))
        .args(["--log-level", "error", "--format", "json", "collect"])
        .arg("--ports-file")
        .arg(&ports_file)
        .args(["--count", "2"])
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("collect command should start");

    let ports = wait_for_ports(&ports_file, Duration::from_secs(5));
    assert_eq!(ports.len(), 1);

    let output = Command::new(env!("CARGO_BIN_EXE_muxpipe"))
        .args(["--log-level", "error", "--format", "json", "send"])
        .arg("--ports-file")
        .arg(&ports_file)
        .args(["--stream", "107", "--data", "hello collector"])
        .args(["--metric", "queue=3", "--name", "cli-test"])
        .output()
        .expect("send should run");
    assert!(
        output.status.success(),
        "send failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let summary: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("send should emit json");
    assert_eq!(summary["frames_sent"], 2);
    assert_eq!(summary["stream_id"], 107);

    let status = wait_for_exit(&mut collector, Duration::from_secs(10));
    assert!(status.success());

    let mut stdout = String::new();
    collector
        .stdout
        .take()
        .expect("stdout should be piped")
        .read_to_string(&mut stdout)
        .expect("stdout should be readable");
    let events = json_lines(&stdout);

    assert_eq!(events[0]["event"], "connected");
    let frame = events
        .iter()
        .find(|event| event["event"] == "frame")
        .expect("frame event");
    assert_eq!(frame["stream_id"], 107);
    assert_eq!(frame["stream_name"], "USER");
    assert_eq!(frame["payload"], "hello collector");
    assert!(frame["sender"]["pid"].is_u64());

    let metric = events
        .iter()
        .find(|event| event["event"] == "metric")
        .expect("metric event");
    assert_eq!(metric["id"], "queue");
    assert_eq!(metric["value"], "3");

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn collect_filters_streams() {
    let dir = unique_temp_dir("filter");
    let ports_file = dir.join("port.json");

    let mut collector = Command::new(env!("CARGO_BIN_EXE_muxpipe"))
        .args(["--log-level", "error", "--format", "raw", "collect"])
        .arg("--ports-file")
        .arg(&ports_file)
        .args(["--streams", "3", "--count", "1"])
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("collect command should start");

    let port = wait_for_ports(&ports_file, Duration::from_secs(5))[0];
    let endpoint = format!("127.0.0.1:{port}");

    for (stream, data) in [("1", "ignored"), ("3", "wanted")] {
        let status = Command::new(env!("CARGO_BIN_EXE_muxpipe"))
            .args(["--log-level", "error", "send", "--endpoint", &endpoint])
            .args(["--stream", stream, "--data", data])
            .stdout(Stdio::null())
            .status()
            .expect("send should run");
        assert!(status.success());
    }

    let status = wait_for_exit(&mut collector, Duration::from_secs(10));
    assert!(status.success());

    let mut stdout = String::new();
    collector
        .stdout
        .take()
        .expect("stdout should be piped")
        .read_to_string(&mut stdout)
        .expect("stdout should be readable");
    assert_eq!(stdout, "wanted");

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn send_without_collector_reports_transport_error() {
    let probe = std::net::TcpListener::bind("127.0.0.1:0").expect("probe bind");
    let port = probe.local_addr().expect("probe addr").port();
    drop(probe);

    let output = Command::new(env!("CARGO_BIN_EXE_muxpipe"))
        .args(["--log-level", "error", "send"])
        .args(["--endpoint", &format!("127.0.0.1:{port}")])
        .args(["--data", "nobody home", "--timeout", "500ms"])
        .output()
        .expect("send should run");

    assert_eq!(output.status.code(), Some(3));
    assert!(String::from_utf8_lossy(&output.stderr).contains("not connected"));
}
