// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

/// Exit code used when no task source is configured at startup.
pub const EXIT_NO_SUPPORTED_SOURCE: i32 = 10;

#[derive(Error, Debug)]
pub enum TraindError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error(
        "no supported task sources configured; set the environment variables required \
         for either the Service Bus or the Storage Queue task source"
    )]
    NoSupportedSource,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    /// The backend no longer recognises the handle we hold (stale receipt,
    /// expired lock, or already deleted).
    #[error("lease lost: {0}")]
    LeaseLost(String),

    #[error("task handle does not belong to the {0} backend")]
    HandleMismatch(&'static str),

    #[error("backend returned {status}: {message}")]
    Backend { status: u16, message: String },

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("invalid task content: {0}")]
    InvalidContent(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TraindError {
    /// Process exit code for this error when it aborts the daemon.
    pub fn exit_code(&self) -> i32 {
        match self {
            TraindError::NoSupportedSource => EXIT_NO_SUPPORTED_SOURCE,
            _ => 1,
        }
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, TraindError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_source_has_distinguished_exit_code() {
        assert_eq!(TraindError::NoSupportedSource.exit_code(), 10);
        assert_eq!(TraindError::ConfigError("x".into()).exit_code(), 1);
        assert_eq!(TraindError::LeaseLost("gone".into()).exit_code(), 1);
    }
}
