//! Integration tests for the `qgps` CLI binary.
//!
//! Most tests point `--config` at a temporary file and drive the
//! simulated modem described there.
#![allow(clippy::unwrap_used)]

use std::path::{Path, PathBuf};

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::TempDir;

// ── Helpers ─────────────────────────────────────────────────────────

/// Build a [`Command`] for the `qgps` binary with env isolation.
fn qgps_cmd() -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("qgps");
    cmd.env("HOME", "/tmp/qgps-cli-test-nonexistent")
        .env("XDG_CONFIG_HOME", "/tmp/qgps-cli-test-nonexistent")
        .env_remove("QGPS_CONFIG")
        .env_remove("RUST_LOG")
        .env("NO_COLOR", "1");
    cmd
}

const FAST_SESSION: &str = r"
[session]
request_timeout_ms = 2000
discovery_window_ms = 50
report_interval_ms = 100
";

/// Write `body` as a config file in a fresh temp dir.
fn config_with(body: &str) -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, body).unwrap();
    (dir, path)
}

fn with_config(path: &Path) -> assert_cmd::Command {
    let mut cmd = qgps_cmd();
    cmd.arg("--config").arg(path);
    cmd
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn no_args_shows_help() {
    let output = qgps_cmd().output().unwrap();
    assert_eq!(output.status.code(), Some(2));
    let text = String::from_utf8_lossy(&output.stderr);
    assert!(text.contains("Usage"), "Expected 'Usage' in output:\n{text}");
}

#[test]
fn help_lists_commands() {
    qgps_cmd().arg("--help").assert().success().stdout(
        predicate::str::contains("run")
            .and(predicate::str::contains("nodes"))
            .and(predicate::str::contains("config")),
    );
}

#[test]
fn completions_are_generated() {
    qgps_cmd()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("qgps"));
}

#[test]
fn bad_duration_is_a_usage_error() {
    qgps_cmd()
        .args(["run", "--duration", "soon"])
        .assert()
        .code(2);
}

// ── Config ──────────────────────────────────────────────────────────

#[test]
fn config_path_honours_flag() {
    let (_dir, path) = config_with("");
    with_config(&path)
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("config.toml"));
}

#[test]
fn config_init_refuses_to_overwrite() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("qgps").join("config.toml");

    with_config(&path)
        .args(["config", "init"])
        .assert()
        .success();
    let written = std::fs::read_to_string(&path).unwrap();
    assert!(written.contains("[session]"), "{written}");
    assert!(written.contains("[simulator]"), "{written}");

    with_config(&path)
        .args(["config", "init"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("already exists"));

    with_config(&path)
        .args(["config", "init", "--force"])
        .assert()
        .success();
}

#[cfg(target_os = "linux")]
#[test]
fn default_config_location_is_used_without_flag() {
    let home = tempfile::tempdir().unwrap();
    let expected = home.path().join("qgps").join("config.toml");
    let in_home = || {
        let mut cmd = qgps_cmd();
        cmd.env("HOME", home.path()).env("XDG_CONFIG_HOME", home.path());
        cmd
    };

    in_home()
        .args(["config", "init"])
        .assert()
        .success()
        .stdout(predicate::str::contains(expected.display().to_string()));
    assert!(expected.exists());

    std::fs::write(&expected, "[session]\nsession_id = 11\n").unwrap();
    in_home()
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("session_id = 11"));
}

#[test]
fn config_show_merges_environment() {
    let (_dir, path) = config_with(FAST_SESSION);
    with_config(&path)
        .env("QGPS_SESSION__SESSION_ID", "9")
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("session_id = 9")
                .and(predicate::str::contains("discovery_window_ms = 50")),
        );
}

#[test]
fn config_show_rejects_unknown_event_names() {
    let (_dir, path) = config_with("[session]\nevents = [\"weather\"]\n");
    with_config(&path)
        .args(["config", "show"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("weather"));
}

// ── Nodes ───────────────────────────────────────────────────────────

#[test]
fn nodes_lists_every_advertised_service() {
    let (_dir, path) = config_with(&format!(
        "{FAST_SESSION}
[simulator]
gnss_node = 1
gnss_port = 7

[[simulator.extra_nodes]]
id = 3
service = 2
port = 4
"
    ));
    let output = with_config(&path)
        .args(["nodes", "--output", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let nodes: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let ids: Vec<u64> = nodes
        .as_array()
        .unwrap()
        .iter()
        .map(|n| n["id"].as_u64().unwrap())
        .collect();
    assert_eq!(ids, vec![3, 1]);
}

// ── Run ─────────────────────────────────────────────────────────────

#[test]
fn run_streams_json_indications() {
    let (_dir, path) = config_with(FAST_SESSION);
    let output = with_config(&path)
        .args(["run", "--duration", "5s", "--count", "4", "--output", "json"])
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "{}",
        String::from_utf8_lossy(&output.stderr)
    );

    let stdout = String::from_utf8(output.stdout).unwrap();
    let kinds: Vec<String> = stdout
        .lines()
        .map(|line| {
            let value: serde_json::Value = serde_json::from_str(line).unwrap();
            value["kind"].as_str().unwrap().to_owned()
        })
        .collect();
    assert_eq!(kinds.len(), 4, "{stdout}");
    assert!(kinds.iter().any(|k| k == "nmea"), "{stdout}");
}

#[test]
fn run_filters_by_kind() {
    let (_dir, path) = config_with(FAST_SESSION);
    with_config(&path)
        .args(["run", "--duration", "5s", "--count", "2", "--show", "position"])
        .assert()
        .success()
        .stdout(predicate::str::contains("fix").and(predicate::str::contains("nmea").not()))
        .stderr(predicate::str::contains("session started on 0:7"));
}

#[test]
fn rejected_start_exits_with_rejection_code() {
    let (_dir, path) = config_with(&format!("{FAST_SESSION}\n[simulator]\nreject_start = true\n"));
    with_config(&path)
        .args(["run", "--duration", "1s"])
        .assert()
        .code(5)
        .stderr(predicate::str::contains("refused to start fix session 2"));
}

#[test]
fn slow_modem_times_out() {
    let (_dir, path) = config_with(&format!(
        "{FAST_SESSION}\n[simulator]\nresponse_delay_ms = 1000\n"
    ));
    with_config(&path)
        .args(["--timeout", "50ms", "run", "--duration", "1s"])
        .assert()
        .code(8)
        .stderr(predicate::str::contains("register events timed out after 50ms"));
}

#[test]
fn missing_gnss_service_is_not_found() {
    let (_dir, path) = config_with(&format!(
        "{FAST_SESSION}
[simulator]
advertise_gnss = false

[[simulator.extra_nodes]]
id = 2
service = 2
port = 1
"
    ));
    with_config(&path)
        .args(["run", "--duration", "1s"])
        .assert()
        .code(4)
        .stderr(predicate::str::contains("advertises the loc service"));
}

#[test]
fn unknown_nmea_type_from_environment_is_a_usage_error() {
    let (_dir, path) = config_with(FAST_SESSION);
    with_config(&path)
        .env("QGPS_SESSION__NMEA_TYPES", "[\"bogus\"]")
        .args(["run", "--duration", "1s"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("bogus"));
}
