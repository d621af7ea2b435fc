//! Layered settings loading.

use std::io::Write;

use minispec::{BiasPolicy, MinispecConfig};
use serial_test::serial;
use tempfile::NamedTempFile;

fn write_toml(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
#[serial]
fn missing_file_falls_back_to_defaults() {
    let config = MinispecConfig::load_from("/nonexistent/minispec.toml").unwrap();
    assert_eq!(config, MinispecConfig::default());
}

#[test]
#[serial]
fn file_overrides_defaults() {
    let file = write_toml(
        r#"
[application]
log_level = "debug"

[connection]
reply_timeout_ms = 10000
accept_invalid_certs = false

[processing.bias]
mode = "constant"
value = 812.5
"#,
    );

    let config = MinispecConfig::load_from(file.path()).unwrap();
    assert_eq!(config.application.log_level, "debug");
    assert_eq!(config.connection.reply_timeout_ms, 10000);
    assert!(!config.connection.accept_invalid_certs);
    assert_eq!(config.connection.port, 8000);
    assert_eq!(config.discovery.port, 12345);
    assert_eq!(config.processing.bias, BiasPolicy::Constant { value: 812.5 });
}

#[test]
#[serial]
fn environment_overrides_file() {
    let file = write_toml("[discovery]\nsearch_timeout_ms = 5000\n");

    std::env::set_var("MINISPEC_DISCOVERY__SEARCH_TIMEOUT_MS", "750");
    let result = MinispecConfig::load_from(file.path());
    std::env::remove_var("MINISPEC_DISCOVERY__SEARCH_TIMEOUT_MS");

    assert_eq!(result.unwrap().discovery.search_timeout_ms, 750);
}

#[test]
#[serial]
fn invalid_values_fail_validation() {
    let file = write_toml("[application]\nlog_level = \"chatty\"\n");
    let err = MinispecConfig::load_from(file.path()).unwrap_err();
    assert!(err.to_string().contains("log_level"));

    let file = write_toml("[connection]\nconnect_timeout_ms = 0\n");
    assert!(MinispecConfig::load_from(file.path()).is_err());
}

#[test]
#[serial]
fn malformed_file_is_a_load_error() {
    let file = write_toml("[connection]\nport = \"eight thousand\"\n");
    let err = MinispecConfig::load_from(file.path()).unwrap_err();
    assert!(matches!(err, minispec::MinispecError::Config(_)));
}
