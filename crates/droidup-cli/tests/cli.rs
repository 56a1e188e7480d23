//! Integration tests for the `droidup` binary.

use std::process::Command;

fn droidup() -> Command {
    Command::new(env!("CARGO_BIN_EXE_droidup"))
}

#[test]
fn test_help_lists_flags() {
    let output = droidup().arg("--help").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for flag in ["--dry-run", "--yes", "--verbose", "--config"] {
        assert!(stdout.contains(flag), "missing {flag} in:\n{stdout}");
    }
}

#[test]
fn test_version() {
    let output = droidup().arg("--version").output().unwrap();
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).starts_with("droidup "));
}

#[test]
fn test_unknown_flag_is_rejected() {
    let output = droidup().arg("--no-such-flag").output().unwrap();
    assert!(!output.status.success());
}

#[test]
fn test_bad_config_exits_with_setup_code() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = dir.path().join("config.toml");
    std::fs::write(&config, "parallel_downloads = \"many\"\n").unwrap();

    let output = droidup()
        .env("DROIDUP_HOME", dir.path())
        .arg("--config")
        .arg(&config)
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
}
