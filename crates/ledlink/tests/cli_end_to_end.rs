#![cfg(feature = "cli")]

use std::io::{BufRead, BufReader};
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};

struct DriverProcess {
    child: Child,
    addr: String,
}

impl DriverProcess {
    /// Start `ledlink driver` on an ephemeral port and read back its address.
    fn start(store: Option<&Path>) -> Self {
        let mut command = Command::new(env!("CARGO_BIN_EXE_ledlink"));
        command
            .args(["--log-level", "error", "driver", "127.0.0.1:0"])
            .stdout(Stdio::piped())
            .stderr(Stdio::null());
        if let Some(store) = store {
            command.arg("--store").arg(store);
        }
        let mut child = command.spawn().expect("driver should start");

        let stdout = child.stdout.take().expect("driver stdout is piped");
        let mut line = String::new();
        BufReader::new(stdout)
            .read_line(&mut line)
            .expect("driver should print its address");
        let addr = line.trim().to_string();
        assert!(!addr.is_empty(), "driver printed no address");
        Self { child, addr }
    }

    fn stop(mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

impl Drop for DriverProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
    }
}

fn ledlink(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_ledlink"))
        .args(["--log-level", "error", "--format", "json"])
        .args(args)
        .output()
        .expect("ledlink should run")
}

fn unique_temp_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "ledlink-cli-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

fn stdout_json(output: &Output) -> serde_json::Value {
    assert!(
        output.status.success(),
        "command failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("stdout should be JSON")
}

#[test]
fn status_of_unconfigured_driver_is_empty() {
    let driver = DriverProcess::start(None);

    let status = stdout_json(&ledlink(&["status", &driver.addr]));
    assert_eq!(status["driver"], driver.addr.as_str());
    assert_eq!(status["strips"], serde_json::json!([]));

    driver.stop();
}

#[test]
fn play_uploads_layout_then_strips_return_to_idle() {
    let driver = DriverProcess::start(None);

    let played = stdout_json(&ledlink(&[
        "play",
        &driver.addr,
        "--effect",
        "chase",
        "--strips",
        "2",
        "--pixels",
        "16",
        "--frequency",
        "60",
        "--duration",
        "300ms",
    ]));
    assert_eq!(played["stopped_by"], "duration elapsed");
    assert_eq!(played["uploaded_configuration"], true);
    assert_eq!(played["strips"], serde_json::json!([0, 1]));

    let status = stdout_json(&ledlink(&["status", &driver.addr]));
    let strips = status["strips"].as_array().expect("strips array");
    assert_eq!(strips.len(), 2);
    assert!(strips.iter().all(|strip| strip["status"] == "idle"));

    driver.stop();
}

#[test]
fn stored_layout_survives_driver_restart() {
    let dir = unique_temp_dir("store");
    let store = dir.join("config.json");

    let driver = DriverProcess::start(Some(&store));
    let show = ledlink(&["show", &driver.addr, "--pixels", "10", "--duration", "100ms"]);
    assert!(
        show.status.success(),
        "show failed: {}",
        String::from_utf8_lossy(&show.stderr)
    );
    driver.stop();
    assert!(store.exists());

    let driver = DriverProcess::start(Some(&store));
    let played = stdout_json(&ledlink(&[
        "play",
        &driver.addr,
        "--effect",
        "solid",
        "--pixels",
        "10",
        "--duration",
        "100ms",
    ]));
    assert_eq!(played["uploaded_configuration"], false);
    driver.stop();

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn clear_configures_and_leaves_strips_idle() {
    let driver = DriverProcess::start(None);

    let clear = ledlink(&["clear", &driver.addr, "--strips", "3", "--pixels", "4"]);
    assert!(
        clear.status.success(),
        "clear failed: {}",
        String::from_utf8_lossy(&clear.stderr)
    );

    let status = stdout_json(&ledlink(&["status", &driver.addr]));
    let strips = status["strips"].as_array().expect("strips array");
    assert_eq!(strips.len(), 3);
    assert!(strips.iter().all(|strip| strip["status"] == "idle"));

    driver.stop();
}

#[test]
fn unreachable_driver_exits_with_transport_code() {
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind should work");
        listener.local_addr().expect("local addr").to_string()
    };

    let output = ledlink(&["status", &addr, "--timeout", "1s"]);
    assert_eq!(output.status.code(), Some(3));
    assert!(String::from_utf8_lossy(&output.stderr).contains("connect failed"));
}

#[test]
fn out_of_range_frequency_is_a_usage_error() {
    let output = ledlink(&["play", "127.0.0.1:9", "--frequency", "100000"]);
    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn version_prints_package_version() {
    let output = Command::new(env!("CARGO_BIN_EXE_ledlink"))
        .arg("version")
        .output()
        .expect("version should run");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.trim(), format!("ledlink {}", env!("CARGO_PKG_VERSION")));
}
