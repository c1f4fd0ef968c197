//! Backend configuration lookup for the CLI

use anyhow::{Context, Result};
use scand_usb::BackendConfig;
use std::path::{Path, PathBuf};

/// Load the backend configuration
///
/// An explicit path must exist. Without one, the per-user config file is used
/// when present, otherwise the built-in defaults.
pub fn load(path: Option<&Path>) -> Result<BackendConfig> {
    if let Some(path) = path {
        return BackendConfig::load(path)
            .with_context(|| format!("Failed to load config file: {}", path.display()));
    }
    match default_path() {
        Some(path) if path.exists() => BackendConfig::load(&path)
            .with_context(|| format!("Failed to load config file: {}", path.display())),
        _ => Ok(BackendConfig::default()),
    }
}

/// `<config dir>/scand/scand.toml`
pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("scand").join("scand.toml"))
}
