use serde::{Deserialize, Serialize};
use std::io;
use thiserror::Error;

use crate::contract::Method;
use crate::lifecycle::LifecycleState;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Call error: {0}")]
    Call(#[from] CallError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Plugin not found: {0}")]
    PluginNotFound(String),

    #[error("Logging error: {0}")]
    Logging(String),
}

/// Outcome of a single bridged call that did not produce a payload.
///
/// Errors cross the process boundary unchanged, so a host comparing the
/// error it received against the one the plugin raised sees equal values.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "detail", rename_all = "snake_case")]
pub enum CallError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Application error: {0}")]
    Application(#[from] ApplicationError),

    #[error("Lifecycle violation: {0}")]
    Lifecycle(#[from] LifecycleError),
}

impl CallError {
    pub fn is_transport(&self) -> bool {
        matches!(self, CallError::Transport(_))
    }

    pub fn is_lifecycle(&self) -> bool {
        matches!(self, CallError::Lifecycle(_))
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", content = "message", rename_all = "snake_case")]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("Transport closed")]
    Closed,

    #[error("Invalid message format: {0}")]
    Codec(String),

    #[error("Call timed out after {0}ms")]
    Timeout(u64),

    #[error("Unknown method '{method}' for {kind}")]
    UnknownMethod { kind: String, method: String },

    #[error("Kind mismatch: expected {expected}, got {actual}")]
    KindMismatch { expected: String, actual: String },
}

/// Error raised by a plugin implementation itself.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{message}{}", .context.as_deref().map(|c| format!(" ({c})")).unwrap_or_default())]
pub struct ApplicationError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

impl ApplicationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            context: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{operation} is not permitted while {state}")]
pub struct LifecycleError {
    pub operation: Method,
    pub state: LifecycleState,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Environment variable error: {0}")]
    EnvVar(String),
}

impl From<serde_json::Error> for CallError {
    fn from(err: serde_json::Error) -> Self {
        CallError::Transport(TransportError::Codec(err.to_string()))
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;

/// Result of one bridged operation.
pub type CallResult<T> = std::result::Result<T, CallError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn application_error_display_includes_context() {
        let err = ApplicationError::new("write failed").with_context("setup: disk full");
        assert_eq!(err.to_string(), "write failed (setup: disk full)");
        assert_eq!(ApplicationError::new("boom").to_string(), "boom");
    }

    #[test]
    fn call_error_survives_json() {
        let errors = vec![
            CallError::from(ApplicationError::new("bad event")),
            CallError::from(TransportError::Timeout(250)),
            CallError::from(LifecycleError {
                operation: Method::Execute,
                state: LifecycleState::TornDown,
            }),
        ];

        for err in errors {
            let json = serde_json::to_string(&err).unwrap();
            let back: CallError = serde_json::from_str(&json).unwrap();
            assert_eq!(back, err);
        }
    }
}
