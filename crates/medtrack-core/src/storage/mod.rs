mod config;
pub mod database;
pub mod migrations;
pub mod timer_host;

pub use config::{AlertsConfig, Config, HostConfig, RemindersConfig, WakeConfig};
pub use database::{Backup, Database, DoseCounts};
pub use timer_host::SqliteTimerHost;

use std::path::PathBuf;

use crate::error::ConfigError;

/// Returns the data directory, creating it if needed.
///
/// `MEDTRACK_DATA_DIR` wins when set. Otherwise `~/.config/medtrack[-dev]/`,
/// with the `-dev` suffix selected by `MEDTRACK_ENV=dev`.
///
/// # Errors
/// Returns an error if the directory cannot be created.
pub fn data_dir() -> Result<PathBuf, ConfigError> {
    let dir = match std::env::var_os("MEDTRACK_DATA_DIR") {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => {
            let base_dir = dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".config");
            let env = std::env::var("MEDTRACK_ENV").unwrap_or_else(|_| "production".to_string());
            if env == "dev" {
                base_dir.join("medtrack-dev")
            } else {
                base_dir.join("medtrack")
            }
        }
    };

    std::fs::create_dir_all(&dir)
        .map_err(|e| ConfigError::DataDir(format!("{}: {e}", dir.display())))?;
    Ok(dir)
}
