use std::process::Command;

fn main() {
    let rustc = std::env::var("RUSTC").unwrap_or_else(|_| "rustc".to_string());
    if let Ok(output) = Command::new(rustc).arg("--version").output() {
        if output.status.success() {
            let version = String::from_utf8_lossy(&output.stdout);
            println!("cargo:rustc-env=MUXPIPE_RUSTC_VERSION={}", version.trim());
        }
    }
    println!("cargo:rerun-if-env-changed=RUSTC");
}
