//! Locating and reading the gateway config file.

use std::path::{Path, PathBuf};

use crate::config::GatewayConfig;

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "TOOLKIT_GATEWAY_CONFIG";

/// Finds the config file and parses it.
#[derive(Debug)]
pub struct ConfigLoader {
    /// Candidate files, highest priority first.
    candidates: Vec<PathBuf>,
    /// An explicit file must exist; a searched one may be absent.
    explicit: bool,
}

impl ConfigLoader {
    /// Search `$TOOLKIT_GATEWAY_CONFIG`, then `./.toolkit-gateway.toml`, then
    /// `<config dir>/toolkit-gateway/config.toml`.
    #[must_use]
    pub fn new() -> Self {
        let mut candidates = Vec::new();
        if let Some(path) = std::env::var_os(CONFIG_ENV) {
            candidates.push(PathBuf::from(path));
        }
        candidates.push(PathBuf::from(".toolkit-gateway.toml"));
        if let Some(dir) = dirs::config_dir() {
            candidates.push(dir.join("toolkit-gateway").join("config.toml"));
        }
        Self {
            candidates,
            explicit: false,
        }
    }

    /// Use exactly `path`. Loading fails if it does not exist.
    #[must_use]
    pub fn with_path(path: PathBuf) -> Self {
        Self {
            candidates: vec![path],
            explicit: true,
        }
    }

    #[must_use]
    pub fn candidates(&self) -> &[PathBuf] {
        &self.candidates
    }

    /// First candidate present on disk.
    #[must_use]
    pub fn find_config_file(&self) -> Option<&Path> {
        self.candidates
            .iter()
            .map(PathBuf::as_path)
            .find(|p| p.is_file())
    }

    /// Load and validate the config, falling back to defaults when no
    /// searched file exists.
    ///
    /// # Errors
    ///
    /// Returns an error if an explicit path is missing, or if the file
    /// cannot be read, parsed or validated.
    pub fn load(&self) -> Result<GatewayConfig, ConfigError> {
        let config = match self.find_config_file() {
            Some(path) => {
                tracing::debug!(path = %path.display(), "Loading config file");
                Self::read(path)?
            }
            None if self.explicit => {
                return Err(ConfigError::NotFound(self.candidates[0].clone()));
            }
            None => {
                tracing::debug!("No config file found, using defaults");
                GatewayConfig::default()
            }
        };
        validate(&config)?;
        Ok(config)
    }

    fn read(path: &Path) -> Result<GatewayConfig, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn validate(config: &GatewayConfig) -> Result<(), ConfigError> {
    if config.worker.program.trim().is_empty() {
        return Err(ConfigError::Invalid("worker.program is empty".to_string()));
    }
    if config.timeouts.readiness_secs == 0 || config.timeouts.request_secs == 0 {
        return Err(ConfigError::Invalid("timeouts must be at least one second".to_string()));
    }
    if config.readiness.required.is_empty() {
        return Err(ConfigError::Invalid(
            "readiness.required must name at least one service".to_string(),
        ));
    }
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config file {0} does not exist")]
    NotFound(PathBuf),

    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
