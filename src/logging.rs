//! Logging System
//!
//! Structured logging through `tracing`. The engine never installs a subscriber on its own;
//! embedding processes call [`init_logging`] once at startup, usually with the `logging`
//! section of [`HeritageConfig`](crate::config::HeritageConfig).
//!
//! Environment overrides win over the configuration:
//! `HERITAGE_LOG` (full filter), `HERITAGE_LOG_MODULES` (extra `module=level` directives),
//! `HERITAGE_LOG_FORMAT` and `HERITAGE_LOG_OUTPUT`.

use crate::error::ContextError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

const ENV_FILTER: &str = "HERITAGE_LOG";
const ENV_MODULES: &str = "HERITAGE_LOG_MODULES";
const ENV_FORMAT: &str = "HERITAGE_LOG_FORMAT";
const ENV_OUTPUT: &str = "HERITAGE_LOG_OUTPUT";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = ContextError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(ContextError::Config(format!(
                "Invalid log format '{}' (expected text or json)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    Stdout,
    #[default]
    Stderr,
    File,
}

impl FromStr for LogOutput {
    type Err = ContextError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stdout" => Ok(LogOutput::Stdout),
            "stderr" => Ok(LogOutput::Stderr),
            "file" => Ok(LogOutput::File),
            other => Err(ContextError::Config(format!(
                "Invalid log output '{}' (expected stdout, stderr or file)",
                other
            ))),
        }
    }
}

/// `[logging]` configuration section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Base level directive: trace, debug, info, warn, error or off.
    #[serde(default = "default_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,

    #[serde(default)]
    pub output: LogOutput,

    /// Used when `output` is `file`.
    #[serde(default = "default_log_file")]
    pub file: PathBuf,

    /// ANSI colors for text output on a terminal stream.
    #[serde(default = "default_color")]
    pub color: bool,

    /// Per-module levels, e.g. `"heritage::cache" = "debug"`.
    #[serde(default)]
    pub modules: BTreeMap<String, String>,
}

fn default_level() -> String {
    "info".to_string()
}

fn default_log_file() -> PathBuf {
    PathBuf::from(".heritage/heritage.log")
}

fn default_color() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: LogFormat::default(),
            output: LogOutput::default(),
            file: default_log_file(),
            color: default_color(),
            modules: BTreeMap::new(),
        }
    }
}

impl LoggingConfig {
    /// Copy with the `HERITAGE_LOG_FORMAT` / `HERITAGE_LOG_OUTPUT` overrides applied.
    fn with_env_overrides(&self) -> Result<Self, ContextError> {
        let mut effective = self.clone();
        if let Ok(format) = std::env::var(ENV_FORMAT) {
            effective.format = format.parse()?;
        }
        if let Ok(output) = std::env::var(ENV_OUTPUT) {
            effective.output = output.parse()?;
        }
        Ok(effective)
    }

    /// Filter from the base level plus module directives, `HERITAGE_LOG_MODULES` last.
    fn env_filter(&self) -> Result<EnvFilter, ContextError> {
        if let Ok(filter) = EnvFilter::try_from_env(ENV_FILTER) {
            return Ok(filter);
        }

        let mut filter = EnvFilter::try_new(&self.level).map_err(|e| {
            ContextError::Config(format!("Invalid log level '{}': {}", self.level, e))
        })?;
        if self.level.trim() == "off" {
            return Ok(filter);
        }

        let mut directives: Vec<String> = self
            .modules
            .iter()
            .map(|(module, level)| format!("{}={}", module, level))
            .collect();
        if let Ok(raw) = std::env::var(ENV_MODULES) {
            directives.extend(parse_module_directives(&raw));
        }
        for directive in directives {
            let parsed: Directive = directive.parse().map_err(|e| {
                ContextError::Config(format!("Invalid log directive '{}': {}", directive, e))
            })?;
            filter = filter.add_directive(parsed);
        }
        Ok(filter)
    }
}

/// Install the global subscriber.
///
/// Fails with `ContextError::Config` on invalid settings or when a subscriber is already
/// installed.
pub fn init_logging(config: Option<&LoggingConfig>) -> Result<(), ContextError> {
    let config = config.cloned().unwrap_or_default().with_env_overrides()?;
    let filter = config.env_filter()?;
    let writer = make_writer(&config)?;
    let ansi = config.color && config.output != LogOutput::File;

    let registry = Registry::default().with(filter);
    let installed = match config.format {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_writer(writer),
            )
            .try_init(),
        LogFormat::Text => registry
            .with(
                fmt::layer()
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_ansi(ansi)
                    .with_writer(writer),
            )
            .try_init(),
    };
    installed.map_err(|e| ContextError::Config(format!("Logging already initialized: {}", e)))
}

fn make_writer(config: &LoggingConfig) -> Result<BoxMakeWriter, ContextError> {
    Ok(match config.output {
        LogOutput::Stdout => BoxMakeWriter::new(std::io::stdout),
        LogOutput::Stderr => BoxMakeWriter::new(std::io::stderr),
        LogOutput::File => BoxMakeWriter::new(Mutex::new(open_append(&config.file)?)),
    })
}

fn open_append(path: &Path) -> Result<File, ContextError> {
    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|e| {
            ContextError::Config(format!("Cannot create log directory {}: {}", dir.display(), e))
        })?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| ContextError::Config(format!("Cannot open log file {}: {}", path.display(), e)))
}

/// `"a=debug, b = warn"` → `["a=debug", "b=warn"]`; malformed entries are skipped.
fn parse_module_directives(raw: &str) -> Vec<String> {
    raw.split(',')
        .filter_map(|entry| {
            let (module, level) = entry.split_once('=')?;
            let (module, level) = (module.trim(), level.trim());
            (!module.is_empty() && !level.is_empty()).then(|| format!("{}={}", module, level))
        })
        .collect()
}
