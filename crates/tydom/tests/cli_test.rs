//! Integration tests for the `tydom` CLI binary.
//!
//! These tests validate argument parsing, help output, shell completions,
//! config handling and error exit codes, all without a live gateway.
#![allow(clippy::unwrap_used)]

use std::path::Path;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

// ── Helpers ─────────────────────────────────────────────────────────

/// Build a [`Command`] for the `tydom` binary with env isolation.
///
/// Clears all `TYDOM_*` env vars and points config directories at `home`
/// so tests never touch the user's real configuration.
fn tydom_cmd_in(home: &Path) -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("tydom");
    cmd.env("HOME", home)
        .env("XDG_CONFIG_HOME", home.join(".config"))
        .env("XDG_DATA_HOME", home.join(".local/share"))
        .env_remove("TYDOM_PROFILE")
        .env_remove("TYDOM_MODE")
        .env_remove("TYDOM_HOST")
        .env_remove("TYDOM_PORT")
        .env_remove("TYDOM_MAC")
        .env_remove("TYDOM_PASSWORD")
        .env_remove("TYDOM_CLOUD_EMAIL")
        .env_remove("TYDOM_CLOUD_PASSWORD")
        .env_remove("TYDOM_OUTPUT")
        .env_remove("TYDOM_INSECURE")
        .env_remove("TYDOM_TIMEOUT");
    cmd
}

fn tydom_cmd() -> assert_cmd::Command {
    tydom_cmd_in(Path::new("/tmp/tydom-cli-test-nonexistent"))
}

/// Concatenate stdout + stderr from a command output for flexible matching.
fn combined_output(output: &std::process::Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    format!("{stdout}{stderr}")
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn test_no_args_shows_help() {
    let output = tydom_cmd().output().unwrap();
    assert_eq!(output.status.code(), Some(2), "Expected exit code 2");
    let text = combined_output(&output);
    assert!(text.contains("Usage"), "Expected 'Usage' in output:\n{text}");
}

#[test]
fn test_help_flag() {
    tydom_cmd().arg("--help").assert().success().stdout(
        predicate::str::contains("Tydom")
            .and(predicate::str::contains("devices"))
            .and(predicate::str::contains("scenarios"))
            .and(predicate::str::contains("watch"))
            .and(predicate::str::contains("probe")),
    );
}

#[test]
fn test_version_flag() {
    tydom_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("tydom"));
}

// ── Shell completions ───────────────────────────────────────────────

#[test]
fn test_completions_bash() {
    tydom_cmd()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty().not());
}

#[test]
fn test_completions_zsh() {
    tydom_cmd()
        .args(["completions", "zsh"])
        .assert()
        .success()
        .stdout(predicate::str::contains("#compdef"));
}

// ── Error cases ─────────────────────────────────────────────────────

#[test]
fn test_invalid_subcommand() {
    let output = tydom_cmd().arg("foobar").output().unwrap();
    assert!(
        !output.status.success(),
        "Expected failure for invalid subcommand"
    );
    let text = combined_output(&output);
    assert!(
        text.contains("unrecognized") || text.contains("foobar"),
        "Expected error mentioning invalid subcommand:\n{text}"
    );
}

#[test]
fn test_invalid_mode_is_a_usage_error() {
    let output = tydom_cmd()
        .args(["--mode", "satellite", "probe"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn test_devices_list_without_gateway_identity() {
    let output = tydom_cmd().args(["devices", "list"]).output().unwrap();
    assert_eq!(output.status.code(), Some(3), "Expected auth exit code");
    let text = combined_output(&output);
    assert!(
        text.contains("No credentials"),
        "Expected missing credentials error:\n{text}"
    );
}

#[test]
fn test_invalid_mac_flag_is_rejected() {
    let output = tydom_cmd()
        .args(["--mac", "not-a-mac", "info"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2), "Expected usage exit code");
    assert!(combined_output(&output).contains("mac"));
}

#[test]
fn test_unknown_profile_flag() {
    let output = tydom_cmd()
        .args(["--profile", "cabin", "info"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(4));
    assert!(combined_output(&output).contains("cabin"));
}

// ── Config ──────────────────────────────────────────────────────────

#[test]
fn test_config_profiles_empty() {
    tydom_cmd()
        .args(["config", "profiles"])
        .assert()
        .success()
        .stderr(predicate::str::contains("No profiles configured"));
}

#[test]
fn test_config_show_json_has_defaults() {
    tydom_cmd()
        .args(["config", "show", "--output", "json"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("\"defaults\"").and(predicate::str::contains("\"table\"")),
        );
}

#[test]
fn test_config_set_then_show_masks_password() {
    let home = tempfile::tempdir().unwrap();

    tydom_cmd_in(home.path())
        .args(["--profile", "home", "config", "set", "host", "192.168.1.20"])
        .assert()
        .success();
    tydom_cmd_in(home.path())
        .args(["--profile", "home", "config", "set", "password", "hunter2"])
        .assert()
        .success();
    tydom_cmd_in(home.path())
        .args(["--profile", "home", "config", "set", "mac", "00:1a:25:01:02:03"])
        .assert()
        .success();

    tydom_cmd_in(home.path())
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("[profiles.home]")
                .and(predicate::str::contains("192.168.1.20"))
                .and(predicate::str::contains("001A25010203"))
                .and(predicate::str::contains("hunter2").not()),
        );
}

#[test]
fn test_config_use_unknown_profile() {
    let output = tydom_cmd().args(["config", "use", "cabin"]).output().unwrap();
    assert_eq!(output.status.code(), Some(4));
    assert!(combined_output(&output).contains("cabin"));
}
