//! Configuration loaded from `~/.config/cinescrape/config.toml`.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::error::ConfigError;
use crate::fetch::FetchSettings;
use crate::site::SiteConfig;

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub fetch: FetchSettings,
    #[serde(default)]
    pub sites: Vec<SiteConfig>,
}

impl Config {
    /// Parse and validate configuration text. `origin` names it in errors.
    pub fn from_toml(text: &str, origin: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(text).map_err(|source| ConfigError::Toml {
            path: origin.to_string(),
            source,
        })?;
        for site in &config.sites {
            site.validate()?;
        }
        Ok(config)
    }

    pub fn site(&self, name: &str) -> Option<&SiteConfig> {
        self.sites.iter().find(|s| s.name.eq_ignore_ascii_case(name))
    }
}

/// Load the configuration from `path`, or from the default location.
///
/// Returns an empty configuration if the file doesn't exist.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read, is not valid
/// TOML, or describes an invalid site.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.map_or_else(config_path, Path::to_path_buf);
    if !path.exists() {
        debug!(path = %path.display(), "No configuration file, using defaults");
        return Ok(Config::default());
    }

    let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let config = Config::from_toml(&content, &path.display().to_string())?;
    debug!(path = %path.display(), sites = config.sites.len(), "Configuration loaded");
    Ok(config)
}

/// Return the path to the default config file.
pub fn config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("cinescrape")
        .join("config.toml")
}
