use assert_cmd::prelude::*;
use std::fs;
use std::path::Path;
use std::process::Command;
use tempfile::tempdir;

fn write_campaign(root: &Path) -> std::path::PathBuf {
    let campaign = root.join("campaign.yaml");
    fs::write(&campaign, "sections:\n  - { id: intro, type: content, body: \"Hello\" }\n").unwrap();
    campaign
}

#[test]
fn test_logging_to_file() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    let log_file = root.join("flowvars.log");
    let campaign = write_campaign(root);

    let config_path = root.join("config.toml");
    let config_content = format!(
        r#"
version = 1

[logging]
level = "debug"
file = "{}"
"#,
        log_file.display()
    );
    fs::write(&config_path, &config_content).unwrap();

    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("fv"));
    cmd.arg("--config").arg(&config_path).arg("check").arg(&campaign).assert().success();

    assert!(log_file.exists(), "Log file should be created");
}

#[test]
fn test_logging_split_levels() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    let log_file = root.join("split.log");
    let campaign = write_campaign(root);

    let config_path = root.join("config.toml");
    let config_content = format!(
        r#"
version = 1

[logging]
level = "warn"
file_level = "trace"
file = "{}"
"#,
        log_file.display()
    );
    fs::write(&config_path, &config_content).unwrap();

    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("fv"));
    cmd.arg("--config").arg(&config_path).arg("order").arg(&campaign).assert().success();

    assert!(log_file.exists());
}

#[test]
fn test_unwritable_log_file_is_an_error() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    let campaign = write_campaign(root);

    let config_path = root.join("config.toml");
    fs::write(&config_path, "version = 1\n[logging]\nfile = \"/nonexistent/dir/fv.log\"\n").unwrap();

    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("fv"));
    cmd.arg("--config").arg(&config_path).arg("check").arg(&campaign).assert().failure();
}
