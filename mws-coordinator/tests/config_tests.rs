//! Tests for loading coordinator settings from YAML files

use mws_core::error::MwsError;
use mws_coordinator::{Coordinator, CoordinatorSettings};
use mws_executor::mock::MockExecutorFactory;
use mws_executor::{ExecContext, Executor};
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

#[test]
fn test_relative_root_resolves_against_config_dir() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("mws.yaml");
    fs::write(&path, "root: state\nexecutor_options:\n  parallelism: '2'\n").unwrap();

    let settings = CoordinatorSettings::load(&path).unwrap();
    assert_eq!(settings.root, temp_dir.path().join("state"));
    assert_eq!(
        settings.executor_options.get("parallelism").map(String::as_str),
        Some("2")
    );
}

#[test]
fn test_absolute_root_is_kept() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("mws.yaml");
    fs::write(&path, "root: /srv/ws\n").unwrap();

    let settings = CoordinatorSettings::load(&path).unwrap();
    assert_eq!(settings.root, std::path::PathBuf::from("/srv/ws"));
}

#[test]
fn test_missing_and_malformed_files() {
    let temp_dir = TempDir::new().unwrap();

    let err = CoordinatorSettings::load(&temp_dir.path().join("absent.yaml")).unwrap_err();
    assert!(matches!(err, MwsError::Filesystem(_)));

    let path = temp_dir.path().join("bad.yaml");
    fs::write(&path, "root: [unterminated\n").unwrap();
    let err = CoordinatorSettings::load(&path).unwrap_err();
    assert!(matches!(err, MwsError::Config(_)));
    assert!(err.to_string().contains("bad.yaml"));
}

#[tokio::test]
async fn test_settings_drive_a_working_coordinator() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("mws.yaml");
    fs::write(
        &path,
        "root: state\nredact_patterns:\n  - 'secret-\\w+'\nexecutor_options:\n  plugin_cache: /var/cache/plugins\n",
    )
    .unwrap();

    let config = CoordinatorSettings::load(&path).unwrap().into_config().unwrap();
    let factory = MockExecutorFactory::new();
    let coordinator = Coordinator::new(config, Arc::new(factory.clone())).unwrap();
    coordinator.apply(&ExecContext::default()).await.unwrap();

    let key = coordinator.store().load_registry().unwrap().current.unwrap();
    assert!(temp_dir.path().join("state/instances").join(key.as_str()).is_dir());

    let child = factory.executor(key.as_str()).unwrap();
    assert_eq!(child.options().redact("token secret-abc"), "token [REDACTED]");
    assert_eq!(
        child.options().extra.get("plugin_cache").map(String::as_str),
        Some("/var/cache/plugins")
    );
}
