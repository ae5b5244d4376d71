//! Adapter configuration.
//!
//! Defaults cover every embedding; the optional `config` feature adds
//! loading from a TOML file.

use crate::error::{Result, VsiError};
use crate::vsi::ZERO_FILL_CHUNK;

#[cfg(feature = "config")]
use std::path::{Path, PathBuf};

/// Settings shared by the registry, the handles and [`HostFile`](crate::vsi::HostFile).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "config", derive(serde::Deserialize))]
#[cfg_attr(feature = "config", serde(default, deny_unknown_fields))]
pub struct AdapterConfig {
    /// Path prefix of the in-memory address space
    pub mem_prefix: String,

    /// Write granularity when truncation has to extend a file with zeros
    pub zero_fill_chunk: usize,

    /// Methods an object needs before it is accepted as file-like
    pub required_methods: Vec<String>,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            mem_prefix: "/vsimem/".to_string(),
            zero_fill_chunk: ZERO_FILL_CHUNK,
            required_methods: ["read", "seek", "tell"]
                .iter()
                .map(|method| method.to_string())
                .collect(),
        }
    }
}

impl AdapterConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.mem_prefix.starts_with('/') || !self.mem_prefix.ends_with('/') {
            return Err(VsiError::config(format!(
                "mem_prefix must start and end with '/': {:?}",
                self.mem_prefix
            )));
        }
        if self.mem_prefix.len() < 2 {
            return Err(VsiError::config("mem_prefix must name a directory"));
        }
        if self.zero_fill_chunk == 0 {
            return Err(VsiError::config("zero_fill_chunk must be positive"));
        }
        Ok(())
    }
}

#[cfg(feature = "config")]
impl AdapterConfig {
    /// Parse and validate a TOML document; missing keys keep their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(text).map_err(|err| VsiError::config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            VsiError::file_error(format!("Failed to read config: {}", path.display()), e)
        })?;
        Self::from_toml_str(&text)
    }

    /// `<config dir>/pyvsi/config.toml`, if the platform has a config dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("pyvsi").join("config.toml"))
    }

    /// Load the default config file, falling back to defaults when absent.
    pub fn load_default() -> Result<Self> {
        match Self::default_path() {
            Some(path) if path.is_file() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }
}
