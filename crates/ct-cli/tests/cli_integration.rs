//! CLI integration tests
//!
//! Tests the cloudterm CLI using assert_cmd.

use assert_cmd::Command;
use predicates::prelude::*;

fn cloudterm() -> Command {
    Command::cargo_bin("cloudterm")
        .expect("Failed to locate cloudterm binary - ensure it's built before running tests")
}

#[test]
fn test_cli_help() {
    cloudterm()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("cloudterm"))
        .stdout(predicate::str::contains("cloud shell"))
        .stdout(predicate::str::contains("--tenant"))
        .stdout(predicate::str::contains("--reset"));
}

#[test]
fn test_cli_version() {
    cloudterm()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("cloudterm"));
}

#[test]
fn test_cli_unknown_flag() {
    cloudterm()
        .arg("--nonexistent-flag")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unexpected argument"));
}

#[test]
fn test_cli_reset_without_settings_succeeds() {
    let dir = tempfile::tempdir().unwrap();

    cloudterm()
        .arg("--reset")
        .env("CLOUDTERM_CACHE_DIR", dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Settings cleared"));
}

#[test]
fn test_cli_reset_deletes_the_settings_file() {
    let dir = tempfile::tempdir().unwrap();
    let settings_path = dir.path().join("settings.json");
    std::fs::write(&settings_path, r#"{"activeTenant":"contoso"}"#).unwrap();

    cloudterm()
        .arg("--reset")
        .env("CLOUDTERM_CACHE_DIR", dir.path())
        .assert()
        .success();

    assert!(!settings_path.exists());

    // Token caches survive a reset; only the settings file goes
    let token_path = dir.path().join("accessToken.contoso.json");
    std::fs::write(&token_path, "{}").unwrap();
    cloudterm()
        .arg("--reset")
        .env("CLOUDTERM_CACHE_DIR", dir.path())
        .assert()
        .success();
    assert!(token_path.exists());
}
