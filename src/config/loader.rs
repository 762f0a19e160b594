// src/config/loader.rs
//! TOML configuration loader.
//!
//! Unknown keys are ignored, unset sections fall back to board defaults and
//! every numeric value passes through the spec-range clamp. Loading never
//! fails on out-of-spec values, only on unreadable or unparseable input.

use std::path::Path;

use thiserror::Error;
use tracing::debug;

use super::HardwareConfig;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No file at the given path.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// The file is not valid TOML for [`HardwareConfig`].
    #[error("configuration parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// The file exists but could not be read.
    #[error("io error reading configuration: {0}")]
    Io(#[from] std::io::Error),
}

/// Load and clamp a hardware configuration from a TOML file.
pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<HardwareConfig, ConfigError> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(ConfigError::FileNotFound(path.display().to_string()));
    }
    let content = std::fs::read_to_string(path)?;
    debug!(path = %path.display(), "loading hardware configuration");
    from_toml_str(&content)
}

/// Parse and clamp a hardware configuration from a TOML string.
pub fn from_toml_str(content: &str) -> Result<HardwareConfig, ConfigError> {
    let config: HardwareConfig = toml::from_str(content)?;
    Ok(config.clamped())
}
