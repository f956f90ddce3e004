use std::env;
use std::path::{Path, PathBuf};

use relay_agent_core::ModelPricing;
use relay_ai::{ConfigError, ProviderSettings};
use serde::Deserialize;

pub const DEFAULT_CONFIG_FILE: &str = "relay.toml";
const DEFAULT_LOG_LEVEL: &str = "info";

/// Contents of `relay.toml`. Every section is optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub provider: Option<ProviderSettings>,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub pricing: Option<ModelPricing>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// Directory that receives `relay.log`.
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub stderr: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            path: None,
            level: default_log_level(),
            stderr: false,
        }
    }
}

impl LogConfig {
    pub fn log_dir(&self) -> PathBuf {
        self.path
            .as_deref()
            .map(str::trim)
            .filter(|path| !path.is_empty())
            .map(expand_home_path)
            .unwrap_or_else(default_log_dir)
    }
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

impl RelayConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// An explicit path must exist. Without one, `relay.toml` in the working
    /// directory is read when present and defaults apply otherwise.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => {
                let implicit = PathBuf::from(DEFAULT_CONFIG_FILE);
                if !implicit.is_file() {
                    return Ok(Self::default());
                }
                implicit
            }
        };

        let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        Self::from_toml_str(&text)
    }
}

fn home_dir() -> Option<PathBuf> {
    env::var_os("HOME")
        .filter(|home| !home.is_empty())
        .map(PathBuf::from)
}

fn default_log_dir() -> PathBuf {
    home_dir()
        .map(|home| home.join(".relay").join("logs"))
        .unwrap_or_else(|| PathBuf::from(".relay").join("logs"))
}

fn expand_home_path(path: &str) -> PathBuf {
    let home = home_dir();
    match (path, home) {
        ("~", Some(home)) => home,
        (path, Some(home)) if path.starts_with("~/") => home.join(&path[2..]),
        (path, _) => PathBuf::from(path),
    }
}
