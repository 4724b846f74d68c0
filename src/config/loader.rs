// Configuration loader
// Loads ~/.wren/config.toml; a missing file yields the defaults.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use super::settings::{wren_dir, Config};

/// Load configuration from the default location, then resolve the backend
/// API key from the environment if the file did not provide one.
pub fn load_config() -> Result<Config> {
    let mut config = match wren_dir().map(|d| d.join("config.toml")) {
        Some(path) if path.exists() => load_config_from(&path)?,
        _ => Config::default(),
    };
    resolve_api_key(&mut config);
    Ok(config)
}

/// Load configuration from an explicit path.
pub fn load_config_from(path: &Path) -> Result<Config> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

fn resolve_api_key(config: &mut Config) {
    if config.backend.api_key.is_none() {
        if let Ok(key) = std::env::var("ANTHROPIC_API_KEY") {
            if !key.is_empty() {
                config.backend.api_key = Some(key);
            }
        }
    }
}
