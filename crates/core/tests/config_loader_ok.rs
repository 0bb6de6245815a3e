use flowvars_core::config::ConfigLoader;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::tempdir;

fn write_file(path: &PathBuf, content: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

#[test]
fn load_full_config_ok() {
    let tmp = tempdir().unwrap();
    let cfg_path = tmp.path().join("config.toml");
    let toml = r#"
version = 1

[logging]
level = "debug"
file_level = "trace"

[cache]
memo_capacity = 64
external_ttl_secs = 30

[provider]
max_attempts = 5
base_delay_ms = 50
max_delay_ms = 400

[updates]
debounce_ms = 25

[publish]
block_on_warnings = true
"#;

    write_file(&cfg_path, toml);

    let cfg = ConfigLoader::load(Some(&cfg_path)).expect("should load");
    assert_eq!(cfg.source.as_deref(), Some(cfg_path.as_path()));
    assert_eq!(cfg.logging.level, "debug");
    assert_eq!(cfg.logging.file_level.as_deref(), Some("trace"));
    assert_eq!(cfg.cache.memo_capacity, 64);
    assert_eq!(cfg.cache.external_ttl(), Duration::from_secs(30));
    assert_eq!(cfg.cache.intern_capacity, 4096);
    assert_eq!(cfg.provider.max_attempts, 5);
    assert_eq!(cfg.provider.timeout_secs, 60);
    assert_eq!(cfg.updates.debounce(), Duration::from_millis(25));
    assert_eq!(cfg.updates.channel_capacity, 256);
    assert!(cfg.publish.block_on_warnings);
}

#[test]
fn minimal_config_uses_defaults() {
    let tmp = tempdir().unwrap();
    let cfg_path = tmp.path().join("flowvars/config.toml");
    write_file(&cfg_path, "version = 1\n");

    let cfg = ConfigLoader::load(Some(&cfg_path)).unwrap();
    assert_eq!(cfg.logging.level, "info");
    assert_eq!(cfg.provider.max_attempts, 3);
    assert_eq!(cfg.provider.base_delay_ms, 200);
    assert_eq!(cfg.provider.max_delay_ms, 5000);
    assert!(cfg.updates.debounce().is_zero());
    assert!(!cfg.publish.block_on_warnings);
}

#[test]
fn log_file_path_is_expanded() {
    let tmp = tempdir().unwrap();
    let cfg_path = tmp.path().join("config.toml");
    let log_dir = tmp.path().join("logs");
    // SAFETY: tests in this file do not read FLOWVARS_TEST_LOGS concurrently.
    unsafe { std::env::set_var("FLOWVARS_TEST_LOGS", &log_dir) };
    write_file(&cfg_path, "version = 1\n[logging]\nfile = \"$FLOWVARS_TEST_LOGS/fv.log\"\n");

    let cfg = ConfigLoader::load(Some(&cfg_path)).unwrap();
    assert_eq!(cfg.logging.file, Some(log_dir.join("fv.log")));
}
