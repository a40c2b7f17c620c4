pub mod commands;
pub mod profiles;
pub mod settings;

pub use profiles::*;
pub use settings::*;

use crate::error::AppResult;
use std::path::PathBuf;

/// Environment variable that overrides the config directory
pub const CONFIG_DIR_ENV: &str = "SSHDECK_CONFIG_DIR";

/// Get the sshdeck config directory
pub fn get_config_dir() -> AppResult<PathBuf> {
    if let Some(dir) = std::env::var_os(CONFIG_DIR_ENV) {
        return Ok(PathBuf::from(dir));
    }

    let config_dir = dirs::config_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
        .ok_or_else(|| crate::error::AppError::Config("Could not find config directory".into()))?
        .join("sshdeck");

    Ok(config_dir)
}

/// Path of the known_hosts file used for host key verification
pub fn known_hosts_path(config_dir: &std::path::Path) -> PathBuf {
    config_dir.join("known_hosts")
}
