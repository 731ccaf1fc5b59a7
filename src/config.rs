//! Configuration loading helpers.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::context::{ErrorMode, PmemContext};
use crate::error::PmemError;
use crate::info::{keys, Info, IoMode};

const CONFIG_ENV: &str = "OXIPMEM_CONFIG";
const OVERRIDE_PREFIX: &str = "OXIPMEM__";

/// Errors returned by configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// I/O error while reading config files.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// TOML parse error.
    #[error("toml parse error: {0}")]
    Toml(#[from] toml::de::Error),
    /// Invalid value for a key.
    #[error("invalid value for {key}: {value}")]
    InvalidValue {
        /// Configuration key.
        key: String,
        /// Raw value string.
        value: String,
    },
    /// Unknown configuration key.
    #[error("unknown config key: {0}")]
    UnknownKey(String),
    /// Missing required configuration field.
    #[error("missing required field: {0}")]
    MissingField(String),
}

/// Top-level configuration schema.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OxipmemConfig {
    /// Root path of the persistent windows.
    pub root: Option<RootConfig>,
    /// Error reporting.
    pub errors: Option<ErrorsConfig>,
    /// Defaults for file opens.
    pub io: Option<IoConfig>,
}

impl OxipmemConfig {
    /// Load configuration from a TOML file.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Load configuration from the `OXIPMEM_CONFIG` env var (if set),
    /// then apply `OXIPMEM__section__field` overrides.
    pub fn load_from_env() -> Result<Self, ConfigError> {
        let mut config = match env::var(CONFIG_ENV).ok() {
            Some(path) => Self::load_from_path(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Apply environment overrides in-place.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        for (key, value) in env::vars() {
            let Some(rest) = key.strip_prefix(OVERRIDE_PREFIX) else {
                continue;
            };
            let path = rest.to_ascii_lowercase();
            let parts: Vec<&str> = path.split("__").collect();
            let value = value.trim().to_string();

            match parts.as_slice() {
                ["root", "path"] => {
                    self.root_mut().path = Some(PathBuf::from(value));
                }
                ["root", "per_rank"] => {
                    self.root_mut().per_rank = Some(parse_value(&key, &value)?);
                }
                ["errors", "mode"] => {
                    self.errors_mut().mode = Some(value);
                }
                ["io", "pmem_path"] => {
                    self.io_mut().pmem_path = Some(PathBuf::from(value));
                }
                ["io", "io_mode"] => {
                    self.io_mut().io_mode = Some(value);
                }
                ["io", "failure_recovery"] => {
                    self.io_mut().failure_recovery = Some(parse_value(&key, &value)?);
                }
                _ => return Err(ConfigError::UnknownKey(key)),
            }
        }

        Ok(())
    }

    /// Configured error mode, [`ErrorMode::Abort`] when unset.
    pub fn error_mode(&self) -> Result<ErrorMode, ConfigError> {
        match self.errors.as_ref().and_then(|e| e.mode.as_deref()) {
            Some(value) => value.parse().map_err(|_| ConfigError::InvalidValue {
                key: "errors.mode".into(),
                value: value.to_string(),
            }),
            None => Ok(ErrorMode::default()),
        }
    }

    /// Build the context of `rank`.
    ///
    /// With `per_rank` (the default) the root is `<path>/<rank>`.
    pub fn open_context(&self, rank: usize) -> Result<PmemContext, PmemError> {
        let root = self
            .root
            .as_ref()
            .and_then(|r| r.path.as_ref())
            .ok_or_else(|| ConfigError::MissingField("root.path".into()))?;
        let mode = self.error_mode()?;
        let per_rank = self
            .root
            .as_ref()
            .and_then(|r| r.per_rank)
            .unwrap_or(true);
        let ctx = if per_rank {
            PmemContext::for_rank(root, rank)?
        } else {
            PmemContext::set_root_path(root)?
        };
        Ok(ctx.with_error_mode(mode))
    }

    /// Default options for [`crate::io::PmemFile::open`].
    pub fn file_info(&self) -> Result<Info, ConfigError> {
        let mut info = Info::new();
        let Some(io) = &self.io else {
            return Ok(info);
        };
        if let Some(path) = &io.pmem_path {
            info.set(keys::PMEM_PATH, path.to_string_lossy());
        }
        if let Some(mode) = &io.io_mode {
            let mode: IoMode = mode.parse().map_err(|_| ConfigError::InvalidValue {
                key: "io.io_mode".into(),
                value: mode.clone(),
            })?;
            info.set(keys::IO_MODE, mode.as_str());
        }
        if let Some(enabled) = io.failure_recovery {
            info.set(keys::FAILURE_RECOVERY, if enabled { "true" } else { "false" });
        }
        Ok(info)
    }

    fn root_mut(&mut self) -> &mut RootConfig {
        self.root.get_or_insert_with(RootConfig::default)
    }

    fn errors_mut(&mut self) -> &mut ErrorsConfig {
        self.errors.get_or_insert_with(ErrorsConfig::default)
    }

    fn io_mut(&mut self) -> &mut IoConfig {
        self.io.get_or_insert_with(IoConfig::default)
    }
}

/// Root path configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RootConfig {
    /// Shared root directory.
    pub path: Option<PathBuf>,
    /// Give every rank its own `<path>/<rank>` subtree.
    pub per_rank: Option<bool>,
}

/// Error reporting configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorsConfig {
    /// "abort" or "return".
    pub mode: Option<String>,
}

/// File open defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IoConfig {
    /// Parent of the cache directories.
    pub pmem_path: Option<PathBuf>,
    /// "0" for the distributed cache, "1" for pmem-aware files.
    pub io_mode: Option<String>,
    /// Record writes for replay.
    pub failure_recovery: Option<bool>,
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}
