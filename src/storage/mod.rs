//! Storage Locations
//!
//! Platform directories for the config file and task outputs.

use anyhow::Result;
use std::path::PathBuf;

use crate::config::AppConfig;

const CONFIG_FILE: &str = "config.toml";

fn project_dirs() -> Result<directories::ProjectDirs> {
    directories::ProjectDirs::from("com", "phoneredact", "PhoneRedact")
        .ok_or_else(|| anyhow::anyhow!("Could not determine home directory"))
}

/// Get the application data directory
pub fn get_data_dir() -> Result<PathBuf> {
    let data_dir = project_dirs()?.data_dir().to_path_buf();
    std::fs::create_dir_all(&data_dir)?;
    Ok(data_dir)
}

/// Get the configuration directory
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = project_dirs()?.config_dir().to_path_buf();
    std::fs::create_dir_all(&config_dir)?;
    Ok(config_dir)
}

/// Default location of the config file
pub fn default_config_path() -> Result<PathBuf> {
    Ok(get_config_dir()?.join(CONFIG_FILE))
}

/// Root for task outputs: `service.storage_dir`, else the data directory
pub fn task_storage_root(config: &AppConfig) -> Result<PathBuf> {
    match &config.service.storage_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            Ok(dir.clone())
        }
        None => Ok(get_data_dir()?.join("tasks")),
    }
}
