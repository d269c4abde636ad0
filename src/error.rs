//! Custom error types for the application.
//!
//! This module defines the primary error type, `LoggerError`, for the whole crate.
//! Using the `thiserror` crate it gives one consistent way to report the failure
//! classes an acquisition session can run into.
//!
//! ## Error Hierarchy
//!
//! - **`Config`**: Wraps errors from `figment`, typically TOML syntax or type
//!   mismatches in the configuration file or environment overrides.
//! - **`Configuration`**: Semantic errors caught by `LoggerConfig::validate`
//!   (values that parse but make no sense, e.g. zero sensors).
//! - **`Transport` / `TransportClosed`**: The device link failed or went away.
//!   These stop the session but never the process.
//! - **`Persistence`**: The CSV log could not be created, written, or flushed.
//!   Fatal to the session, rows must not be accepted without being recorded.
//! - **`ArityMismatch`**: A record with the wrong number of channel values was
//!   handed to the channel store.
//! - **`ShutdownFailed`**: One or more independent shutdown steps failed.
//!
//! Line-level protocol problems are not errors here: the parser returns a
//! [`crate::protocol::Rejection`] and the acquisition loop drops the line.

use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type LoggerResult<T> = std::result::Result<T, LoggerError>;

/// Every failure a session can report.
#[derive(Error, Debug)]
pub enum LoggerError {
    /// Config file or environment could not be read into `LoggerConfig`.
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    /// Values that parse but fail validation.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Reading from the device failed.
    #[error("Transport error: {0}")]
    Transport(std::io::Error),

    /// The device closed the link.
    #[error("Transport closed by device")]
    TransportClosed,

    /// Built without the `serial` feature.
    #[error("Serial support not enabled. Rebuild with --features serial")]
    SerialFeatureDisabled,

    /// The CSV log could not be created, written or flushed.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// A record handed to the store had the wrong number of values.
    #[error("Record has {found} values, expected {expected}")]
    ArityMismatch {
        /// Values per record for the store's sensor count.
        expected: usize,
        /// Values actually supplied.
        found: usize,
    },

    /// The session has already stopped.
    #[error("Acquisition session is stopped")]
    SessionStopped,

    /// One entry per shutdown step that failed.
    #[error("Shutdown failed with errors")]
    ShutdownFailed(Vec<LoggerError>),
}

impl LoggerError {
    /// Whether the failure came from the device link rather than local storage.
    pub fn is_transport_failure(&self) -> bool {
        matches!(self, LoggerError::Transport(_) | LoggerError::TransportClosed)
    }
}

impl From<csv::Error> for LoggerError {
    fn from(value: csv::Error) -> Self {
        LoggerError::Persistence(value.to_string())
    }
}
