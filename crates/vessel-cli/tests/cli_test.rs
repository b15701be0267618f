//! End-to-end tests driving the `vessel` binary.
//!
//! Commands that only touch the state index or profiles run everywhere;
//! running containers needs root and is ignored by default.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::path::Path;
use std::process::{Command, Output};

use vessel_core::security::capability::{CapabilityConfig, DEFAULT_SAFE};

fn vessel(data_dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_vessel"))
        .arg("--data-dir")
        .arg(data_dir)
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("spawn vessel")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

/// Value of a `Key:\tvalue` line from `/proc/self/status` style output.
fn status_field<'a>(text: &'a str, key: &str) -> Option<&'a str> {
    text.lines()
        .find_map(|line| line.strip_prefix(key)?.strip_prefix(':'))
        .map(str::trim)
}

/// ID of the only container in the state index.
fn only_container_id(data_dir: &Path) -> String {
    let out = vessel(data_dir, &["ps", "--all", "--json"]);
    let json: serde_json::Value = serde_json::from_slice(&out.stdout).expect("json");
    let containers = json.as_array().expect("array");
    assert_eq!(containers.len(), 1);
    containers[0]["id"].as_str().expect("id").to_string()
}

// ── Inspection ───────────────────────────────────────────────────────

#[test]
fn ps_on_empty_state() {
    let dir = tempfile::tempdir().expect("tempdir");
    let out = vessel(dir.path(), &["ps", "--all"]);
    assert!(out.status.success());
    assert!(stdout(&out).contains("No containers found."));
}

// ── Seccomp profiles ─────────────────────────────────────────────────

#[test]
fn seccomp_default_is_valid_json() {
    let dir = tempfile::tempdir().expect("tempdir");
    let out = vessel(dir.path(), &["seccomp", "default"]);
    assert!(out.status.success());
    let json: serde_json::Value = serde_json::from_slice(&out.stdout).expect("json");
    assert_eq!(json["defaultAction"], "SCMP_ACT_ERRNO");
    assert!(json["syscalls"].as_array().is_some_and(|rules| !rules.is_empty()));
}

#[test]
fn seccomp_check_accepts_exported_profile() {
    let dir = tempfile::tempdir().expect("tempdir");
    let profile = dir.path().join("profile.json");
    let export = vessel(dir.path(), &["seccomp", "default", "--output", profile.to_str().unwrap()]);
    assert!(export.status.success());

    let out = vessel(dir.path(), &["seccomp", "check", profile.to_str().unwrap()]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    assert!(stdout(&out).contains("default action: errno"));
}

#[test]
fn seccomp_check_rejects_malformed_profile() {
    let dir = tempfile::tempdir().expect("tempdir");
    let profile = dir.path().join("bad.json");
    std::fs::write(&profile, r#"{"defaultAction":"SCMP_ACT_NOPE"}"#).expect("write");
    let out = vessel(dir.path(), &["seccomp", "check", profile.to_str().unwrap()]);
    assert!(!out.status.success());
}

// ── Failure paths ────────────────────────────────────────────────────

#[test]
fn child_without_bootstrap_variables_exits_125() {
    let dir = tempfile::tempdir().expect("tempdir");
    let out = Command::new(env!("CARGO_BIN_EXE_vessel"))
        .args(["child", "true"])
        .env_clear()
        .env("VESSEL_DATA_DIR", dir.path())
        .output()
        .expect("spawn vessel");
    assert_eq!(out.status.code(), Some(125));
}

#[test]
fn unknown_namespace_fails_before_cloning() {
    let dir = tempfile::tempdir().expect("tempdir");
    let out = vessel(dir.path(), &["unshare", "--ns", "uts,bogus", "true"]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("bogus"));
}

#[test]
fn stop_unknown_container_fails() {
    let dir = tempfile::tempdir().expect("tempdir");
    let out = vessel(dir.path(), &["stop", "missing"]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("not-found"));
}

// ── Running containers ───────────────────────────────────────────────

#[test]
#[ignore = "requires root"]
fn run_with_setup_prints_output() {
    let dir = tempfile::tempdir().expect("tempdir");
    let out = vessel(dir.path(), &["run", "--name", "hello", "/bin/echo", "hi"]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    assert_eq!(stdout(&out).trim(), "hi");

    let ps = vessel(dir.path(), &["ps", "--state", "exited"]);
    assert!(stdout(&ps).contains("hello"));
}

#[test]
#[ignore = "requires root"]
fn run_forwards_exit_status() {
    let dir = tempfile::tempdir().expect("tempdir");
    let out = vessel(dir.path(), &["run", "sh", "-c", "exit 3"]);
    assert_eq!(out.status.code(), Some(3));
}

#[test]
#[ignore = "requires root"]
fn run_sets_hostname_and_pid_one() {
    let dir = tempfile::tempdir().expect("tempdir");
    let out = vessel(
        dir.path(),
        &["run", "--hostname", "boxed", "sh", "-c", "echo $(hostname) $$"],
    );
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    assert_eq!(stdout(&out).trim(), "boxed 1");
}

#[test]
#[ignore = "requires root"]
fn run_missing_command_exits_125() {
    let dir = tempfile::tempdir().expect("tempdir");
    let out = vessel(dir.path(), &["run", "/nonexistent/binary"]);
    assert_eq!(out.status.code(), Some(125));
}

const INSPECT: &str = "grep -E '^(CapBnd|Seccomp):' /proc/self/status; \
                       test -e /.pivot_root || echo pivoted";

#[test]
#[ignore = "requires root"]
fn run_with_bind_rootfs_is_pivoted_and_hardened() {
    let dir = tempfile::tempdir().expect("tempdir");
    let out = vessel(dir.path(), &["run", "--rootfs", "/", "--", "sh", "-c", INSPECT]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    let text = stdout(&out);

    let safe = CapabilityConfig::keep(DEFAULT_SAFE.to_vec()).mask();
    assert_eq!(status_field(&text, "CapBnd"), Some(format!("{safe:016x}").as_str()));
    assert_eq!(status_field(&text, "Seccomp"), Some("2"));
    assert!(text.lines().any(|line| line == "pivoted"), "{text}");
}

#[test]
#[ignore = "requires root"]
fn run_with_overlay_writes_to_upper_and_rm_cleans_scratch() {
    let dir = tempfile::tempdir().expect("tempdir");
    let out = vessel(
        dir.path(),
        &["run", "--layer", "/", "--", "sh", "-c", "echo layered > /written_in_container"],
    );
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    assert!(!Path::new("/written_in_container").exists());

    let id = only_container_id(dir.path());
    let scratch = dir.path().join("overlay").join(&id);
    let written = std::fs::read_to_string(scratch.join("upper/written_in_container"))
        .expect("write landed in the upper layer");
    assert_eq!(written.trim(), "layered");

    let rm = vessel(dir.path(), &["rm", &id]);
    assert!(rm.status.success(), "{}", String::from_utf8_lossy(&rm.stderr));
    assert!(!scratch.exists());
    assert!(!dir.path().join("containers").join(&id).exists());
}
