//! Provisioner configuration - stored as JSON in FEEDERNET_HOME

use std::path::{Path, PathBuf};

use feedernet_proto::DEFAULT_CHUNK_SIZE;
use feedernet_proto::ble::{MAX_WRITE_SIZE, PLACEHOLDER_TOKEN};
use serde::{Deserialize, Serialize};

pub const CONFIG_FILE: &str = "config.json";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("chunk_size must be at least 1")]
    ZeroChunkSize,
    #[error("token cannot be empty")]
    EmptyToken,
    #[error("no home directory, set FEEDERNET_HOME")]
    NoHome,
}

/// Tunables for the provisioning flow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProvisionerConfig {
    /// Payload bytes per credential write, before the BLOCK_END marker
    pub chunk_size: usize,
    /// Third frame field. Shipping firmware only checks that it is present;
    /// firmware that checks a real pairing token needs it set here.
    pub token: String,
    /// Stop scanning at the first feeder and wait for a connect request,
    /// instead of connecting to every feeder as it is discovered
    pub stop_scan_on_first_match: bool,
    /// Only accept a feeder whose credentials characteristic advertises
    /// write-without-response
    pub require_write_without_response: bool,
    /// Start a fresh scan once credentials have been written
    pub rescan_after_submit: bool,
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            token: PLACEHOLDER_TOKEN.to_string(),
            stop_scan_on_first_match: true,
            require_write_without_response: true,
            rescan_after_submit: false,
        }
    }
}

impl ProvisionerConfig {
    /// Load from `path`. A missing file means defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            log::debug!("no config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&data).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        log::info!("loaded config from {}", path.display());
        Ok(config)
    }

    /// Load `$FEEDERNET_HOME/config.json`
    pub fn load_default() -> Result<Self, ConfigError> {
        Self::load(&feedernet_home()?.join(CONFIG_FILE))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::ZeroChunkSize);
        }
        if self.token.is_empty() {
            return Err(ConfigError::EmptyToken);
        }
        if self.chunk_size + 1 > MAX_WRITE_SIZE {
            log::warn!(
                "chunk_size {} plus marker exceeds the {MAX_WRITE_SIZE} byte feeder write limit",
                self.chunk_size
            );
        }
        Ok(())
    }
}

/// FEEDERNET_HOME, defaulting to ~/.feedernet
pub fn feedernet_home() -> Result<PathBuf, ConfigError> {
    if let Ok(home) = std::env::var("FEEDERNET_HOME") {
        return Ok(PathBuf::from(home));
    }
    dirs::home_dir()
        .map(|home| home.join(".feedernet"))
        .ok_or(ConfigError::NoHome)
}
