//! Integration tests for the `uci-host` binary.
//!
//! Each test runs the built binary with `XDG_CONFIG_HOME` pointed at a
//! temporary directory so no real config file is read or written.

use std::path::Path;
use std::process::{Command, Output};

fn uci_host(config_home: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_uci-host"))
        .args(args)
        .env("XDG_CONFIG_HOME", config_home)
        .env_remove("UCI_HOST_MODULE")
        .env("RUST_LOG", "warn")
        .output()
        .expect("failed to run uci-host")
}

#[test]
fn init_writes_config_and_refuses_to_overwrite() {
    let tmp = tempfile::TempDir::new().unwrap();

    let out = uci_host(tmp.path(), &["--module", "/opt/engines/libsf.so", "init"]);
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));

    let written = std::fs::read_to_string(tmp.path().join("uci-host/config.toml")).unwrap();
    assert!(written.contains("/opt/engines/libsf.so"), "config: {written}");

    let again = uci_host(tmp.path(), &["init"]);
    assert!(!again.status.success());
    assert!(String::from_utf8_lossy(&again.stderr).contains("already exists"));

    let forced = uci_host(tmp.path(), &["init", "--force"]);
    assert!(forced.status.success());
}

#[test]
fn check_reports_a_missing_module() {
    let tmp = tempfile::TempDir::new().unwrap();
    let module = tmp.path().join("libmissing.so");

    let out = uci_host(tmp.path(), &["--module", module.to_str().unwrap(), "check"]);

    assert!(!out.status.success());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("libmissing.so"), "stderr: {stderr}");
}

#[test]
fn run_fails_cleanly_when_the_module_cannot_be_bound() {
    let tmp = tempfile::TempDir::new().unwrap();
    let module = tmp.path().join("libmissing.so");

    let out = uci_host(
        tmp.path(),
        &["--module", module.to_str().unwrap(), "run", "--batch"],
    );

    assert!(!out.status.success());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("failed to bind engine module"), "stderr: {stderr}");
}
