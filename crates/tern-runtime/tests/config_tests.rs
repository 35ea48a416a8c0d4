//! Collector configuration loading tests

use std::io::Write;
use tempfile::NamedTempFile;
use tern_runtime::defaults::{DEFAULT_MAX_BYTES, DEFAULT_POOL_BYTES};
use tern_runtime::{ConfigError, GcConfig, Runtime};

#[test]
fn test_load_from_file() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "max_objects = 500").unwrap();
    writeln!(file, "pool_bytes = 65536").unwrap();

    let config = GcConfig::from_file(file.path()).unwrap();
    assert_eq!(config.max_objects, 500);
    assert_eq!(config.pool_bytes, 65536);
    assert_eq!(config.max_bytes, DEFAULT_MAX_BYTES);
}

#[test]
fn test_empty_file_is_default() {
    let file = NamedTempFile::new().unwrap();
    let config = GcConfig::from_file(file.path()).unwrap();
    assert_eq!(config, GcConfig::default());
    assert_eq!(config.pool_bytes, DEFAULT_POOL_BYTES);
}

#[test]
fn test_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = GcConfig::from_file(&dir.path().join("gc.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::IoError(_)));
}

#[test]
fn test_round_trip_through_toml() {
    let config = GcConfig::default().with_max_objects(7).with_max_bytes(512);
    let text = toml::to_string(&config).unwrap();
    assert_eq!(GcConfig::from_toml_str(&text).unwrap(), config);
}

#[test]
fn test_runtime_rejects_invalid_config() {
    let registry = std::sync::Arc::new(tern_layout::TypeRegistry::new());
    let program = tern_capture::Scope::new(0, tern_capture::ScopeKind::Function);
    let analysis = tern_capture::CaptureAnalyzer::new(&registry)
        .analyze(&program)
        .unwrap();
    let result = Runtime::new(
        registry,
        std::sync::Arc::new(analysis),
        GcConfig::default().with_pool_bytes(0),
    );
    assert!(result.is_err());
}
