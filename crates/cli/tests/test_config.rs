//! Tests for the config command

use anyhow::Result;
use retrace::system_config::SystemConfig;
use std::fs;
use std::process::Command;
use tempfile::TempDir;

fn retrace(temp_dir: &TempDir) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_retrace"));
    cmd.env("RETRACE_CONFIG", temp_dir.path().join("config.toml"))
        .env("RETRACE_DIR", temp_dir.path().join("data"))
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_config_shows_defaults() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let output = retrace(&temp_dir).arg("config").output()?;

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(stdout.contains("[retention]"));
    assert!(stdout.contains("[storage]"));
    assert!(stdout.contains("max_operations = 10000"));
    assert!(stdout.contains("not created"));
    assert!(!temp_dir.path().join("config.toml").exists());

    Ok(())
}

#[test]
fn test_config_init_writes_file() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let output = retrace(&temp_dir).args(["config", "--init"]).output()?;
    assert!(output.status.success());

    let written = fs::read_to_string(temp_dir.path().join("config.toml"))?;
    let parsed: SystemConfig = toml::from_str(&written)?;
    assert_eq!(parsed, SystemConfig::default());

    // A second init leaves the file alone
    fs::write(
        temp_dir.path().join("config.toml"),
        "[retention]\nmax_age_days = 3\n",
    )?;
    let output = retrace(&temp_dir).args(["config", "--init"]).output()?;
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("already exists"));
    assert!(stdout.contains("max_age_days = 3"));

    Ok(())
}

#[test]
fn test_config_reports_data_dir() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let flag_dir = temp_dir.path().join("elsewhere");

    let output = retrace(&temp_dir)
        .arg("config")
        .arg("--data-dir")
        .arg(&flag_dir)
        .output()?;

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains(&flag_dir.display().to_string()));

    Ok(())
}

#[test]
fn test_invalid_config_is_an_error() -> Result<()> {
    let temp_dir = TempDir::new()?;
    fs::write(
        temp_dir.path().join("config.toml"),
        "[retention]\nmax_operations = \"lots\"\n",
    )?;

    let output = retrace(&temp_dir).arg("stats").output()?;

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Failed to parse config"));

    Ok(())
}
