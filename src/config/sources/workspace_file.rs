//! Workspace files: `config/config.toml`, then `config/{HERITAGE_ENV}.toml`.

use config::builder::DefaultState;
use config::{ConfigBuilder, ConfigError, File};
use std::path::{Path, PathBuf};
use tracing::debug;

const DEFAULT_ENVIRONMENT: &str = "development";

/// Candidate files in precedence order (later wins).
pub fn workspace_config_paths(workspace_root: &Path) -> [PathBuf; 2] {
    let dir = workspace_root.join("config");
    let environment =
        std::env::var("HERITAGE_ENV").unwrap_or_else(|_| DEFAULT_ENVIRONMENT.to_string());
    [
        dir.join("config.toml"),
        dir.join(format!("{}.toml", environment)),
    ]
}

pub fn add_to_builder(
    builder: ConfigBuilder<DefaultState>,
    workspace_root: &Path,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    Ok(workspace_config_paths(workspace_root)
        .into_iter()
        .filter(|path| path.is_file())
        .fold(builder, |builder, path| {
            debug!(config_path = %path.display(), "Loading workspace configuration");
            builder.add_source(File::from(path).required(false))
        }))
}
