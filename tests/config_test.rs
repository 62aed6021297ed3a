//! Tests for configuration loading

use opds_aggregator::config::Config;
use std::io::Write;

#[test]
fn test_example_config_is_valid() {
    let content = include_str!("../config.example.toml");
    let config = Config::from_toml(content).expect("example config should parse");

    assert!(config.validate().is_ok());
    assert_eq!(config.feeds.len(), 2);
    assert_eq!(config.feeds[0].slug(), "project-gutenberg");
    assert_eq!(config.feeds[0].max_entries, 50);
    assert_eq!(config.feeds[1].poll_depth, 2);
    assert!(config.feeds[1].auth.is_some());
    assert!(config.feeds[0].auth.is_none());
}

#[test]
fn test_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[server]
base_path = "/catalog"

[[feeds]]
name = "Local"
url = "http://localhost:9000/opds"
"#
    )
    .unwrap();

    let config = Config::from_file(file.path()).unwrap();
    assert_eq!(config.server.base_path, "/catalog");
    assert_eq!(config.feeds[0].slug(), "local");
    assert_eq!(config.feeds[0].poll_depth, 0);
}

#[test]
fn test_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let result = Config::from_file(&dir.path().join("absent.toml"));
    assert!(result.is_err());
}

#[test]
fn test_malformed_toml() {
    assert!(Config::from_toml("[[feeds]]\nname = ").is_err());
}
