//! Error types for surfacelink
//!
//! Provides a unified error type used across all surfacelink crates. The
//! request-level variants render as `Kind: detail`, which is the text clients
//! see in `{"status":"error","message":...}` responses.

use std::fmt;
use std::path::PathBuf;

/// Main error type for surfacelink operations
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    // === Transport / Framing Errors ===

    #[error("MalformedMessage: {0}")]
    MalformedMessage(String),

    #[error("MessageTooLarge: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    // === Dispatch Errors ===

    #[error("UnknownCommand: {0}")]
    UnknownCommand(String),

    #[error("InvalidParameters: {field}: {reason}")]
    InvalidParameters { field: String, reason: String },

    // === Execution Errors ===

    #[error("Timeout: command did not complete within {millis}ms")]
    Timeout { millis: u64 },

    #[error("ShuttingDown: bridge is shutting down")]
    ShuttingDown,

    /// Failure reported by a command handler or the host; shown verbatim
    #[error("{0}")]
    CommandFailed(String),

    // === Connection Errors ===

    #[error("ConnectionFailed: {addr} after {attempts} attempt(s): {reason}")]
    ConnectionFailed {
        addr: String,
        attempts: u32,
        reason: String,
    },

    #[error("Connection closed unexpectedly")]
    ConnectionClosed,

    // === IO Errors ===

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write file {path}: {source}")]
    FileWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    // === Configuration Errors ===

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration at {path}: {message}")]
    ConfigInvalid { path: PathBuf, message: String },

    // === Internal Errors ===

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Taxonomy entry of a [`BridgeError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    MalformedMessage,
    MessageTooLarge,
    UnknownCommand,
    InvalidParameters,
    Timeout,
    ShuttingDown,
    CommandFailed,
    ConnectionFailed,
    Io,
    Config,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl BridgeError {
    /// Create an invalid-parameters error for `field`
    pub fn invalid_params(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidParameters {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a command failure
    pub fn command(msg: impl Into<String>) -> Self {
        Self::CommandFailed(msg.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MalformedMessage(_) => ErrorKind::MalformedMessage,
            Self::MessageTooLarge { .. } => ErrorKind::MessageTooLarge,
            Self::UnknownCommand(_) => ErrorKind::UnknownCommand,
            Self::InvalidParameters { .. } => ErrorKind::InvalidParameters,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::ShuttingDown => ErrorKind::ShuttingDown,
            Self::CommandFailed(_) => ErrorKind::CommandFailed,
            Self::ConnectionFailed { .. } | Self::ConnectionClosed => ErrorKind::ConnectionFailed,
            Self::Io(_) | Self::FileRead { .. } | Self::FileWrite { .. } => ErrorKind::Io,
            Self::Config(_) | Self::ConfigInvalid { .. } => ErrorKind::Config,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed { .. } | Self::ConnectionClosed | Self::Io(_)
        )
    }

    /// Errors that stay local to one request; the connection remains usable
    pub fn is_request_local(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::MalformedMessage
                | ErrorKind::UnknownCommand
                | ErrorKind::InvalidParameters
                | ErrorKind::Timeout
                | ErrorKind::CommandFailed
        )
    }
}

/// Result type alias using BridgeError
pub type Result<T> = std::result::Result<T, BridgeError>;
