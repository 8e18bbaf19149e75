//! Integration tests for Configuration System

use crate::integration::test_utils::with_xdg_env;
use heritage::config::{CacheBackendKind, ConfigLoader, DeploymentMode, StorageBackendKind};
use heritage::ContextEngine;
use tempfile::TempDir;

#[test]
fn test_global_file_then_workspace_then_env() {
    let test_dir = TempDir::new().unwrap();
    let global_dir = test_dir.path().join("heritage");
    std::fs::create_dir_all(&global_dir).unwrap();
    std::fs::write(
        global_dir.join("config.toml"),
        r#"
tenant = "from-global"

[cache]
ttl_secs = 120
timeout_ms = 900
"#,
    )
    .unwrap();

    let workspace = TempDir::new().unwrap();
    let workspace_config = workspace.path().join("config");
    std::fs::create_dir_all(&workspace_config).unwrap();
    std::fs::write(
        workspace_config.join("config.toml"),
        r#"
tenant = "from-workspace"

[deployment]
mode = "test"
"#,
    )
    .unwrap();

    let config = with_xdg_env(&test_dir, &[("HERITAGE__CACHE__TTL_SECS", "42")], || {
        ConfigLoader::load(workspace.path()).unwrap()
    });

    assert_eq!(config.tenant, "from-workspace");
    assert_eq!(config.deployment.mode, DeploymentMode::Test);
    assert_eq!(config.cache.ttl_secs, 42);
    assert_eq!(config.cache.timeout_ms, 900);
    assert_eq!(
        config.storage.backend.resolve(config.deployment.mode),
        StorageBackendKind::Embedded
    );
}

#[test]
fn test_environment_specific_workspace_file() {
    let test_dir = TempDir::new().unwrap();
    let workspace = TempDir::new().unwrap();
    let workspace_config = workspace.path().join("config");
    std::fs::create_dir_all(&workspace_config).unwrap();
    std::fs::write(workspace_config.join("config.toml"), "tenant = \"base\"\n").unwrap();
    std::fs::write(
        workspace_config.join("staging.toml"),
        "tenant = \"staging\"\n[cache]\nenabled = false\n",
    )
    .unwrap();

    let config = with_xdg_env(&test_dir, &[("HERITAGE_ENV", "staging")], || {
        ConfigLoader::load(workspace.path()).unwrap()
    });
    assert_eq!(config.tenant, "staging");
    assert!(!config.cache.enabled);
}

#[test]
fn test_loaded_file_builds_engine() {
    let temp_dir = TempDir::new().unwrap();
    let store_path = temp_dir.path().join("store");
    let config_file = temp_dir.path().join("heritage.toml");
    std::fs::write(
        &config_file,
        format!(
            r#"
tenant = "acme"

[storage]
backend = "embedded"

[storage.embedded]
path = "{}"

[cache]
backend = "memory"
ttl_secs = 30
"#,
            store_path.display()
        ),
    )
    .unwrap();

    let config = ConfigLoader::load_from_file(&config_file).unwrap();
    assert_eq!(config.cache.backend, CacheBackendKind::Memory);
    assert!(config.validate().is_ok());

    let engine = ContextEngine::from_config(&config).unwrap();
    assert_eq!(engine.tenant().as_str(), "acme");
    assert_eq!(engine.backend_description(), "embedded + memory cache");
    assert!(store_path.exists());
}

#[test]
fn test_invalid_values_are_reported_together() {
    let temp_dir = TempDir::new().unwrap();
    let config_file = temp_dir.path().join("bad.toml");
    std::fs::write(
        &config_file,
        r#"
tenant = ""

[cache]
backend = "rest"
ttl_secs = 0
"#,
    )
    .unwrap();

    let config = ConfigLoader::load_from_file(&config_file).unwrap();
    let errors = config.validate().unwrap_err();
    assert_eq!(errors.len(), 3);
    assert!(ContextEngine::from_config(&config).is_err());
}
