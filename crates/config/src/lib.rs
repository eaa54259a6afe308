//! Configuration directory helpers for mailsync
//!
//! Resolves the shared config directory (~/.config/mailsync/) and data
//! directory (~/.local/share/mailsync/), and loads/saves JSON files there.
//!
//! Call [`init`] at startup to bootstrap both directories.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};

/// Directory name used under the platform config and data roots
const APP_DIR: &str = "mailsync";

/// Create the config and data directories if they don't exist.
///
/// Returns the config directory.
pub fn init() -> Result<PathBuf> {
    ensure_data_dir()?;
    ensure_config_dir()
}

/// Get the config directory (~/.config/mailsync/)
pub fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join(APP_DIR))
}

/// Get the data directory (~/.local/share/mailsync/)
pub fn data_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|p| p.join(APP_DIR))
}

/// Get the path to a file within the config directory
pub fn config_path(filename: &str) -> Option<PathBuf> {
    config_dir().map(|p| p.join(filename))
}

/// Get the path to a file within the data directory
pub fn data_path(filename: &str) -> Option<PathBuf> {
    data_dir().map(|p| p.join(filename))
}

/// Load and parse a JSON file from the config directory
pub fn load_json<T: DeserializeOwned>(filename: &str) -> Result<T> {
    let path = config_path(filename).context("Could not determine config directory")?;
    load_json_file(&path)
}

/// Load a JSON file from the config directory, or `None` when it doesn't exist
pub fn load_json_if_exists<T: DeserializeOwned>(filename: &str) -> Result<Option<T>> {
    if !config_exists(filename) {
        return Ok(None);
    }
    load_json(filename).map(Some)
}

/// Load and parse a JSON file from an arbitrary path
pub fn load_json_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Check if a file exists in the config directory
pub fn config_exists(filename: &str) -> bool {
    config_path(filename).is_some_and(|p| p.exists())
}

/// Ensure the config directory exists
pub fn ensure_config_dir() -> Result<PathBuf> {
    let dir = config_dir().context("Could not determine config directory")?;
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;
    Ok(dir)
}

/// Ensure the data directory exists
pub fn ensure_data_dir() -> Result<PathBuf> {
    let dir = data_dir().context("Could not determine data directory")?;
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create data directory: {}", dir.display()))?;
    Ok(dir)
}

/// Save a value as JSON to a file in the config directory
pub fn save_json<T: serde::Serialize>(filename: &str, value: &T) -> Result<()> {
    let dir = ensure_config_dir()?;
    let path = dir.join(filename);
    let content = serde_json::to_string_pretty(value)?;
    std::fs::write(&path, content)
        .with_context(|| format!("Failed to write config file: {}", path.display()))?;
    Ok(())
}
