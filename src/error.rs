//! Error types for the webhook handler.

use std::time::Duration;

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures raised by an action's `matches` or `act`.
///
/// An action is expected to absorb failures of its own side effect and
/// describe them in its report. These variants are what escapes to the
/// dispatcher, which records them against the action and moves on.
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("Payload field {field} is missing or not a string")]
    MissingField { field: String },

    #[error("Payload field {field} is invalid: {reason}")]
    InvalidField { field: String, reason: String },

    #[error("Command {command} failed: {reason}")]
    CommandFailed { command: String, reason: String },

    #[error("Action {name} timed out after {timeout:?}")]
    Timeout { name: String, timeout: Duration },

    #[error("Action {name} panicked: {message}")]
    Panicked { name: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Outbound notification errors.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Invalid {role} address {address}: {reason}")]
    InvalidAddress {
        role: &'static str,
        address: String,
        reason: String,
    },

    #[error("Failed to build email: {0}")]
    Build(String),

    #[error("SMTP relay error: {0}")]
    Relay(String),

    #[error("SMTP send failed: {0}")]
    SendFailed(String),
}

/// Failure to start an isolated unit.
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("No async runtime available: {0}")]
    NoRuntime(String),
}
