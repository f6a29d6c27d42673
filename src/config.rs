//! Configuration loading helpers.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::size::MIB;

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
}

/// Top-level configuration schema.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StrataConfig {
    /// Pool configuration.
    pub pool: Option<PoolSection>,
    /// Index configuration.
    pub index: Option<IndexSection>,
}

/// `[pool]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PoolSection {
    /// Path of the pool file.
    pub path: Option<PathBuf>,
    /// Pool length in bytes.
    pub size: Option<u64>,
}

/// `[index]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IndexSection {
    /// Log2 of the per-segment bucket count.
    pub hash_power: Option<u32>,
    /// Log2 of the root layer's segment count.
    pub segs_power: Option<u32>,
}

impl StrataConfig {
    /// Load configuration from a TOML file.
    pub fn load_from_path(path: impl AsRef<Path>) -> std::result::Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Load configuration from the `STRATA_CONFIG` env var (if set),
    /// then apply `STRATA__section__field` overrides.
    pub fn load_from_env() -> std::result::Result<Self, ConfigError> {
        let config_path = env::var("STRATA_CONFIG").ok();
        let mut config = match config_path {
            Some(path) => Self::load_from_path(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Apply environment overrides in-place.
    pub fn apply_env_overrides(&mut self) -> std::result::Result<(), ConfigError> {
        for (key, value) in env::vars() {
            if !key.starts_with("STRATA__") {
                continue;
            }
            let path = key["STRATA__".len()..].to_ascii_lowercase();
            let parts: Vec<&str> = path.split("__").collect();
            let value = value.trim().to_string();

            match parts.as_slice() {
                ["pool", "path"] => {
                    self.pool_mut().path = Some(PathBuf::from(&value));
                }
                ["pool", "size"] => {
                    self.pool_mut().size = Some(parse_value(&key, &value)?);
                }
                ["index", "hash_power"] => {
                    self.index_mut().hash_power = Some(parse_value(&key, &value)?);
                }
                ["index", "segs_power"] => {
                    self.index_mut().segs_power = Some(parse_value(&key, &value)?);
                }
                _ => return Err(ConfigError::UnknownKey(key)),
            }
        }
        Ok(())
    }

    /// Resolve the index options, falling back to defaults.
    pub fn index_options(&self) -> IndexOptions {
        let defaults = IndexOptions::default();
        match &self.index {
            Some(section) => IndexOptions {
                hash_power: section.hash_power.unwrap_or(defaults.hash_power),
                segs_power: section.segs_power.unwrap_or(defaults.segs_power),
            },
            None => defaults,
        }
    }

    /// Resolve the pool options, falling back to defaults.
    pub fn pool_options(&self) -> PoolOptions {
        let defaults = PoolOptions::default();
        match &self.pool {
            Some(section) => PoolOptions {
                path: section.path.clone().unwrap_or(defaults.path),
                size: section.size.unwrap_or(defaults.size),
            },
            None => defaults,
        }
    }

    fn pool_mut(&mut self) -> &mut PoolSection {
        self.pool.get_or_insert_with(PoolSection::default)
    }

    fn index_mut(&mut self) -> &mut IndexSection {
        self.index.get_or_insert_with(IndexSection::default)
    }
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> std::result::Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

/// Shape parameters of a new index.
///
/// Both powers shape the persistent layout and are recorded in the pool;
/// reopening validates them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexOptions {
    /// Log2 of the per-segment bucket count.
    pub hash_power: u32,
    /// Log2 of the root layer's segment count.
    pub segs_power: u32,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            hash_power: 10,
            segs_power: 3,
        }
    }
}

impl IndexOptions {
    /// Create options with explicit powers.
    pub fn new(hash_power: u32, segs_power: u32) -> Self {
        Self {
            hash_power,
            segs_power,
        }
    }

    /// Check both powers are in their accepted ranges.
    pub fn validate(&self) -> Result<()> {
        if self.hash_power == 0 || self.hash_power > 28 {
            return Err(Error::InvalidArgument("hash_power must be in 1..=28"));
        }
        if self.segs_power == 0 || self.segs_power > 24 {
            return Err(Error::InvalidArgument("segs_power must be in 1..=24"));
        }
        Ok(())
    }
}

/// Location and size of a pool file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolOptions {
    /// Path of the pool file.
    pub path: PathBuf,
    /// Pool length in bytes.
    pub size: u64,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            path: PathBuf::from("strata.pool"),
            size: 256 * MIB,
        }
    }
}
