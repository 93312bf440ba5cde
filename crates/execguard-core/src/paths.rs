use directories::ProjectDirs;
use std::path::PathBuf;

use crate::error::{GuardError, Result};

pub const APP_QUALIFIER: &str = "com";
pub const APP_ORG: &str = "darklock";
pub const APP_NAME: &str = "execguard";

pub const DATA_DIR_ENV: &str = "EXECGUARD_DATA_DIR";
pub const CONFIG_ENV: &str = "EXECGUARD_CONFIG";

pub fn data_dir() -> Result<PathBuf> {
    if let Ok(override_path) = std::env::var(DATA_DIR_ENV) {
        return Ok(PathBuf::from(override_path));
    }
    let dirs = ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME).ok_or_else(|| {
        GuardError::ConfigurationAbsent("cannot determine data directory".to_string())
    })?;
    Ok(dirs.data_dir().to_path_buf())
}

/// Settings file location: `EXECGUARD_CONFIG`, else `<data_dir>/settings.json`.
pub fn settings_path() -> Result<PathBuf> {
    if let Ok(override_path) = std::env::var(CONFIG_ENV) {
        return Ok(PathBuf::from(override_path));
    }
    Ok(data_dir()?.join("settings.json"))
}
