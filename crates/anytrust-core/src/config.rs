//! Configuration loading and validation
//!
//! Config structs across the workspace are plain serde types. They are read
//! from TOML or JSON with the helpers here and checked with
//! [`ConfigValidation`] before anything is constructed from them.

use crate::{AnytrustError, Result};
use serde::de::DeserializeOwned;
use std::path::Path;

/// Trait for configuration validation
pub trait ConfigValidation {
    /// Validate this configuration
    fn validate(&self) -> Result<()>;
}

/// Parse and validate a TOML document
pub fn from_toml_str<C>(content: &str) -> Result<C>
where
    C: DeserializeOwned + ConfigValidation,
{
    let config: C = toml::from_str(content)?;
    config.validate()?;
    Ok(config)
}

/// Parse and validate a JSON document
pub fn from_json_str<C>(content: &str) -> Result<C>
where
    C: DeserializeOwned + ConfigValidation,
{
    let config: C = serde_json::from_str(content)
        .map_err(|e| AnytrustError::configuration(format!("Invalid JSON: {e}")))?;
    config.validate()?;
    Ok(config)
}

/// Load a config file, choosing the format by extension (`.json` or TOML)
pub fn load_from_file<C>(path: &Path) -> Result<C>
where
    C: DeserializeOwned + ConfigValidation,
{
    let content = std::fs::read_to_string(path).map_err(|e| {
        AnytrustError::configuration(format!(
            "Failed to read config file {}: {e}",
            path.display()
        ))
    })?;
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => from_json_str(&content),
        _ => from_toml_str(&content),
    }
}
