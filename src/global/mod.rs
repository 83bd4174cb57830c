use anyhow::{anyhow, Context, Result};
use std::path::PathBuf;

const APP_DIR: &str = "twi-recorder";

pub fn config_dir() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|dir| dir.join(APP_DIR))
        .context("Unable to determine config directory")
}

pub fn config_file() -> Result<PathBuf> {
    Ok(config_dir()?.join("config.toml"))
}

pub fn data_dir() -> Result<PathBuf> {
    if let Some(dir) = dirs::data_dir() {
        return Ok(dir.join(APP_DIR));
    }
    if let Some(home) = dirs::home_dir() {
        return Ok(home.join(".local").join("share").join(APP_DIR));
    }
    Err(anyhow!("Unable to determine data directory"))
}

pub fn db_file_in(data_dir: &std::path::Path) -> PathBuf {
    data_dir.join("twi-recorder.db")
}

pub fn recordings_dir_in(data_dir: &std::path::Path) -> PathBuf {
    data_dir.join("recordings")
}

pub fn upload_lock_file_in(data_dir: &std::path::Path) -> PathBuf {
    data_dir.join("upload.lock")
}
