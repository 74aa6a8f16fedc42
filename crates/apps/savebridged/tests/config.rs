use savebridged::{BridgeConfig, ConfigError};
use std::time::Duration;

#[test]
fn partial_file_keeps_defaults_for_missing_keys() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("savebridge.toml");
    std::fs::write(&path, "downloads_dir = \"/tmp/out\"\nstream_ttl_ms = 2500\n").unwrap();

    let config = BridgeConfig::load_from_path(&path).unwrap();
    assert_eq!(config.downloads_dir, "/tmp/out");
    assert_eq!(config.stream_ttl(), Duration::from_millis(2500));
    assert_eq!(config.call_timeout(), Duration::from_secs(5));
    assert_eq!(config.handshake_timeout(), Duration::from_secs(10));
    assert_eq!(config.heartbeat_interval(), Duration::from_secs(1));
}

#[test]
fn example_template_loads_back_as_the_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("example.toml");
    let example = BridgeConfig::example_toml().unwrap();
    std::fs::write(&path, example).unwrap();

    assert_eq!(BridgeConfig::load_from_path(&path).unwrap(), BridgeConfig::default());
}

#[test]
fn load_errors_are_classified() {
    let dir = tempfile::tempdir().unwrap();
    let absent = dir.path().join("absent.toml");
    let missing = BridgeConfig::load_from_path(&absent).unwrap_err();
    assert!(matches!(missing, ConfigError::Io(_)));

    let path = dir.path().join("broken.toml");
    std::fs::write(&path, "chunk_size = \"large\"\n").unwrap();
    let broken = BridgeConfig::load_from_path(&path).unwrap_err();
    assert!(matches!(broken, ConfigError::Decode(_)));
}

#[test]
fn relative_urls_are_rejected() {
    let config = BridgeConfig { helper_url: "helper.html".into(), ..BridgeConfig::default() };
    assert!(matches!(
        config.helper_location(),
        Err(ConfigError::InvalidUrl { field: "helper_url", .. })
    ));
    assert!(config.worker_location().is_ok());
}
