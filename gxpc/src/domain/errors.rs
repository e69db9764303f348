//! Structured error types for gxpc
//!
//! Using thiserror for automatic Display implementation and error chaining.

use super::types::{Pid, SessionState};
use std::path::PathBuf;
use thiserror::Error;

/// Failure reported by the instrumentation backend
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Instrumentation backend unavailable: {0}")]
    Unavailable(String),

    #[error("Backend worker is gone")]
    Disconnected,

    #[error("{operation} failed: {message}")]
    Operation { operation: &'static str, message: String },
}

impl BackendError {
    pub fn operation(operation: &'static str, message: impl ToString) -> Self {
        BackendError::Operation { operation, message: message.to_string() }
    }
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Could not obtain specified device")]
    DeviceNotFound,

    #[error("Missing pid, name, gate or file to spawn")]
    MissingTarget,

    #[error("No process named '{0}' found")]
    ProcessNotFound(String),

    #[error("Cannot {action} while session is {state}")]
    InvalidState { action: &'static str, state: SessionState },

    #[error("Agent already loaded into process {0}")]
    AgentAlreadyLoaded(Pid),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to decode config {}: {source}", .path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to encode config {}: {source}", .path.display())]
    Encode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid config path {}: {reason}", .path.display())]
    InvalidPath { path: PathBuf, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum FilterError {
    #[error("Invalid filter pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// A single envelope that could not be understood; never fatal to the session
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Send payload is not an object: {0}")]
    NotAnObject(String),

    #[error("Send payload has no type field")]
    MissingType,

    #[error("Malformed {kind} payload: {source}")]
    Malformed {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Failed to decode tool payload: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("Failed to run {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} exited with {status}")]
    ExitStatus { tool: String, status: std::process::ExitStatus },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
