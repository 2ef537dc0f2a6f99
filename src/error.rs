//! Custom error types for the application.
//!
//! `SaError` is the single error type surfaced by sessions, sweep engines and
//! analyzer controllers. It mirrors the failure taxonomy of an instrument
//! control engine:
//!
//! - **`Connection`**: opening the transport or identifying the instrument failed.
//!   The session stays disconnected and nothing is retried.
//! - **`Transport`**: a write, read or timeout on an established session.
//! - **`Validation`**: malformed numeric input, a value outside an enumerated
//!   set, or a frequency range with `start >= stop`.
//! - **`Sweep`**: a trigger or trace read failed while a sweep was running. The
//!   underlying cause is kept in the message.
//! - **`Busy`**: a sweep was requested while another sweep on the same analyzer
//!   is still active.
//! - **`NotConnected`**: an operation that needs an open session was requested
//!   on a disconnected analyzer.
//! - **`Config`**: configuration could not be loaded or failed validation.
//!
//! Point-count mismatches while decoding a trace are deliberately *not* errors;
//! they are logged and flagged on the decoded result instead.

use crate::config::ConfigError;
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type SaResult<T> = std::result::Result<T, SaError>;

/// Application error type.
#[derive(Error, Debug)]
pub enum SaError {
    /// Opening or identifying an instrument failed.
    #[error("Connection error: {0}")]
    Connection(String),

    /// I/O failure on an established session.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Rejected user or configuration input.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Failure while a sweep was in progress.
    #[error("Sweep error: {0}")]
    Sweep(String),

    /// Another sweep is already running on this analyzer.
    #[error("Analyzer '{0}' is busy with another sweep")]
    Busy(String),

    /// The analyzer has no open session.
    #[error("Analyzer '{0}' is not connected")]
    NotConnected(String),

    /// Configuration load or validation failure.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl SaError {
    /// Wraps any error as a sweep failure, keeping its cause chain in the message.
    pub fn sweep(cause: impl std::fmt::Display) -> Self {
        SaError::Sweep(format!("{:#}", cause))
    }

    /// Returns true for I/O failures on a session, including use while disconnected.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(self, SaError::Transport(_) | SaError::NotConnected(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SaError::Transport("read timed out".to_string());
        assert_eq!(err.to_string(), "Transport error: read timed out");
    }

    #[test]
    fn test_sweep_wraps_cause() {
        let err = SaError::sweep(SaError::Transport("socket closed".into()));
        assert_eq!(
            err.to_string(),
            "Sweep error: Transport error: socket closed"
        );
    }

    #[test]
    fn test_busy_names_analyzer() {
        let err = SaError::Busy("sa1".into());
        assert!(err.to_string().contains("'sa1'"));
        assert!(!err.is_transport());
    }
}
