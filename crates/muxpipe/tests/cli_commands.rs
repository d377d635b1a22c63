#![cfg(all(unix, feature = "cli"))]

use std::process::Command;

#[test]
fn version_prints_package_version() {
    let output = Command::new(env!("CARGO_BIN_EXE_muxpipe"))
        .arg("version")
        .output()
        .expect("version should run");

    assert!(output.status.success());
    assert_eq!(
        String::from_utf8_lossy(&output.stdout).trim(),
        format!("muxpipe {}", env!("CARGO_PKG_VERSION"))
    );
}

#[test]
fn version_extended_reports_wire_limits() {
    let output = Command::new(env!("CARGO_BIN_EXE_muxpipe"))
        .args(["version", "--extended"])
        .output()
        .expect("version should run");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("name: muxpipe"));
    assert!(stdout.contains("header=8 bytes"));
}

#[test]
fn fingerprint_json_describes_this_process() {
    let output = Command::new(env!("CARGO_BIN_EXE_muxpipe"))
        .args(["--format", "json", "fingerprint", "--name", "cli-test"])
        .output()
        .expect("fingerprint should run");

    assert!(output.status.success());
    let fingerprint: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("fingerprint should emit json");
    assert_eq!(fingerprint["name"], "cli-test");
    assert!(fingerprint["pid"].is_u64());
    assert!(fingerprint["id"].is_string());
    assert!(fingerprint.get("remote.addr").is_none());
}

#[test]
fn collect_rejects_out_of_range_port() {
    for port in ["-1", "70000"] {
        let output = Command::new(env!("CARGO_BIN_EXE_muxpipe"))
            .args(["--log-level", "error", "collect", "--port", port])
            .output()
            .expect("collect should run");

        assert_eq!(output.status.code(), Some(64), "port {port}");
        assert!(String::from_utf8_lossy(&output.stderr).contains("invalid port"));
    }
}

#[test]
fn send_rejects_invalid_json_payload() {
    let output = Command::new(env!("CARGO_BIN_EXE_muxpipe"))
        .args(["send", "--endpoint", "127.0.0.1:9", "--json", "{broken"])
        .output()
        .expect("send should run");

    assert_eq!(output.status.code(), Some(64));
    assert!(String::from_utf8_lossy(&output.stderr).contains("--json is not valid JSON"));
}

#[test]
fn send_reports_missing_ports_file() {
    let output = Command::new(env!("CARGO_BIN_EXE_muxpipe"))
        .env_remove("MUXPIPE_ENDPOINT")
        .args(["send", "--data", "x"])
        .arg("--ports-file")
        .arg(std::env::temp_dir().join("muxpipe-no-such-dir").join("port.json"))
        .output()
        .expect("send should run");

    assert_eq!(output.status.code(), Some(64));
    assert!(String::from_utf8_lossy(&output.stderr).contains("no collector"));
}
