//! Layered configuration loading.

use crate::config::{sources, HeritageConfig};
use config::{Config, ConfigError, Environment, File};
use std::path::Path;

const ENV_PREFIX: &str = "HERITAGE";
const ENV_SEPARATOR: &str = "__";

/// Configuration loader
///
/// Precedence (lowest to highest): built-in defaults, global file, workspace files,
/// `HERITAGE__SECTION__KEY` environment variables.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration for a workspace rooted at `workspace_root`.
    pub fn load(workspace_root: &Path) -> Result<HeritageConfig, ConfigError> {
        let mut builder = Config::builder().add_source(Config::try_from(&HeritageConfig::default())?);
        builder = sources::global_file::add_to_builder(builder)?;
        builder = sources::workspace_file::add_to_builder(builder, workspace_root)?;
        builder = builder.add_source(environment());
        builder.build()?.try_deserialize()
    }

    /// Load a single explicit file on top of the defaults.
    pub fn load_from_file(path: &Path) -> Result<HeritageConfig, ConfigError> {
        Config::builder()
            .add_source(Config::try_from(&HeritageConfig::default())?)
            .add_source(File::from(path).required(true))
            .build()?
            .try_deserialize()
    }

    /// Defaults only; ignores files and environment.
    pub fn default() -> HeritageConfig {
        HeritageConfig::default()
    }
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator(ENV_SEPARATOR)
        .separator(ENV_SEPARATOR)
        .try_parsing(true)
}
