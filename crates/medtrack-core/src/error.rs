//! Core error types for medtrack-core.
//!
//! This module defines the error hierarchy used across the library.
//! Delivery failures have their own [`AlertError`] because they never
//! escape the dispatcher.

use std::path::PathBuf;
use thiserror::Error;

use crate::reminder::{PrecisionMode, TriggerKey};

/// Core error type for medtrack-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Storage-related errors
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Host timer / wake facility errors
    #[error("Host error: {0}")]
    Host(#[from] HostError),

    /// An event referenced a medication the store does not know about
    #[error("Unknown medication id {0}")]
    UnknownOwner(i64),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic errors with context
    #[error("{0}")]
    Custom(String),
}

/// Storage-specific errors.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Failed to open database connection
    #[error("Failed to open database at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Migration failed
    #[error("Database migration failed: {0}")]
    MigrationFailed(String),

    /// Database is locked
    #[error("Database is locked")]
    Locked,

    /// Stored row could not be turned back into a domain value
    #[error("Corrupt row: {0}")]
    CorruptRow(String),
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Unknown configuration key
    #[error("Unknown configuration key: {0}")]
    UnknownKey(String),

    /// Data directory could not be determined or created
    #[error("Data directory unavailable: {0}")]
    DataDir(String),
}

/// Validation errors.
#[derive(Error, Debug)]
pub enum ValidationError {
    /// Malformed `HH:MM` time of day
    #[error("Invalid time of day '{input}': {message}")]
    InvalidTimeOfDay { input: String, message: String },

    /// Unknown trigger kind name
    #[error("Unknown trigger kind '{0}'")]
    UnknownTriggerKind(String),

    /// Snooze duration outside the accepted range
    #[error("Snooze duration must be between 1 second and 24 hours, got {seconds}s")]
    InvalidSnooze { seconds: i64 },

    /// Invalid value
    #[error("Invalid value for '{field}': {message}")]
    InvalidValue { field: String, message: String },
}

/// Errors reported by the host timer and wake facilities.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    /// The requested precision mode is not available; the caller may fall
    /// back to a less precise one.
    #[error("Precision mode {0} is unavailable on this host")]
    ModeUnavailable(PrecisionMode),

    /// The host refused the registration outright.
    #[error("Host refused timer registration for {key}: {message}")]
    Refused { key: TriggerKey, message: String },

    /// Wake resource could not be acquired.
    #[error("Wake hold unavailable: {0}")]
    WakeUnavailable(String),

    /// Backing storage of a host adapter failed.
    #[error("Host storage failure: {0}")]
    Storage(String),
}

/// Failure reported by the alert collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AlertError {
    /// The host refused to show the notification.
    #[error("Alert refused by host: {0}")]
    Refused(String),

    /// The alert channel is not reachable right now.
    #[error("Alert channel unavailable: {0}")]
    Unavailable(String),
}

// Helper implementations for converting from other error types

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(err, _msg) => {
                if err.code == rusqlite::ErrorCode::DatabaseLocked {
                    StoreError::Locked
                } else {
                    StoreError::QueryFailed(err.to_string())
                }
            }
            rusqlite::Error::FromSqlConversionFailure(_, _, cause) => {
                StoreError::CorruptRow(cause.to_string())
            }
            _ => StoreError::QueryFailed(err.to_string()),
        }
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(err: rusqlite::Error) -> Self {
        CoreError::Store(err.into())
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::InvalidValue {
            key: "<file>".to_string(),
            message: err.to_string(),
        }
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reminder::TriggerKind;

    #[test]
    fn locked_sqlite_error_maps_to_locked() {
        let err = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_LOCKED),
            None,
        );
        assert!(matches!(StoreError::from(err), StoreError::Locked));
    }

    #[test]
    fn host_error_names_the_key() {
        let err = HostError::Refused {
            key: TriggerKey::new(7, TriggerKind::Main),
            message: "quota".into(),
        };
        assert_eq!(
            err.to_string(),
            "Host refused timer registration for 7:main: quota"
        );
    }
}
