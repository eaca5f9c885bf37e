// Integration tests for CLI commands
// These run the built binary against temp config directories; nothing here
// touches the operator's real ~/.config.

use std::process::{Command, Output};
use tempfile::TempDir;

fn mirrorshard(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_mirrorshard"))
        .args(args)
        .env_remove("MIRRORSHARD_MNEMONIC")
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to execute command")
}

/// Run `init` into a temp dir, returning (dir, config path, mnemonic path).
fn initialized() -> (TempDir, String, String) {
    let temp_dir = TempDir::new().unwrap();
    let config = temp_dir.path().join("config.toml").to_string_lossy().to_string();
    let phrase = temp_dir.path().join("mnemonic.txt").to_string_lossy().to_string();

    let output = mirrorshard(&["--config", &config, "init", "--mnemonic-file", &phrase]);
    assert!(
        output.status.success(),
        "init failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    (temp_dir, config, phrase)
}

#[test]
fn test_cli_help() {
    let output = mirrorshard(&["--help"]);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Operator CLI for mirrorshard"));
    assert!(stdout.contains("init"));
    assert!(stdout.contains("check-config"));
    assert!(stdout.contains("simulate"));
    assert!(stdout.contains("version"));
}

#[test]
fn test_cli_version() {
    let output = mirrorshard(&["version"]);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("mirrorshard"));
    assert!(stdout.contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_cli_init_then_check_config() {
    let (_dir, config, phrase) = initialized();

    let output = mirrorshard(&["--config", &config, "check-config", "--mnemonic-file", &phrase]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("n = 5, k = 3"));
    assert!(stdout.contains("All checks passed"));
}

#[test]
fn test_cli_init_refuses_overwrite() {
    let (_dir, config, phrase) = initialized();

    let output = mirrorshard(&["--config", &config, "init", "--mnemonic-file", &phrase]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("--force"));
}

#[test]
fn test_cli_check_config_rejects_bad_threshold() {
    let (_dir, config, phrase) = initialized();
    let contents = std::fs::read_to_string(&config).unwrap();
    std::fs::write(&config, contents.replace("k = 3", "k = 9")).unwrap();

    let output = mirrorshard(&["--config", &config, "check-config", "--mnemonic-file", &phrase]);
    assert!(!output.status.success());
}

#[test]
fn test_cli_simulate() {
    let (_dir, config, phrase) = initialized();

    let output = mirrorshard(&[
        "--config",
        &config,
        "simulate",
        "--nodes",
        "7",
        "--records",
        "2",
        "--fail",
        "1",
        "--mnemonic-file",
        &phrase,
    ]);
    assert!(
        output.status.success(),
        "simulate failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("2 of 2 records rebuild intact"));
    assert!(stdout.contains("\"unreachable\""));
}

#[test]
fn test_cli_simulate_threshold_requires_both() {
    let output = mirrorshard(&["simulate", "-n", "7"]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("required") || stderr.contains("-k"));
}
