use std::path::{Path, PathBuf};

use strata_common::{Error, Result};
use tracing::{debug, info};

use crate::model::AppConfig;

const CONFIG_FILENAMES: &[&str] = &["config.yml", "config.yaml", "config.toml"];

/// Locates and parses the Strata configuration file.
pub struct ConfigLoader {
    config_dir: PathBuf,
}

impl ConfigLoader {
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
        }
    }

    /// `~/.config/strata` (or the platform equivalent).
    pub fn default_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("strata"))
    }

    /// First of `config.yml`, `config.yaml`, `config.toml` present in the
    /// config directory.
    pub fn find(&self) -> Option<PathBuf> {
        CONFIG_FILENAMES
            .iter()
            .map(|filename| self.config_dir.join(filename))
            .find(|candidate| candidate.is_file())
    }

    /// Load the config file found in the config directory, or the defaults
    /// when there is none.
    pub fn load(&self) -> Result<AppConfig> {
        match self.find() {
            Some(path) => Self::load_file(&path),
            None => {
                debug!(
                    "no config file in {}, using defaults",
                    self.config_dir.display()
                );
                Ok(AppConfig::default())
            }
        }
    }

    /// Parse a specific config file. Relative paths inside it are resolved
    /// against the directory containing the file.
    pub fn load_file(path: &Path) -> Result<AppConfig> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read {}: {e}", path.display()))
        })?;

        let mut config = parse_config(path, &contents)?;
        if let Some(base) = path.parent() {
            config.resolve_relative_to(base);
        }

        info!("config loaded from {}", path.display());
        Ok(config)
    }
}

fn parse_config(path: &Path, contents: &str) -> Result<AppConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    match ext {
        "yml" | "yaml" => serde_yaml::from_str(contents)
            .map_err(|e| Error::Config(format!("YAML parse error in {}: {e}", path.display()))),
        "toml" => toml::from_str(contents)
            .map_err(|e| Error::Config(format!("TOML parse error in {}: {e}", path.display()))),
        other => Err(Error::Config(format!(
            "unsupported config extension: {other}"
        ))),
    }
}
