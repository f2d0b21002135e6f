//! Unified error handling for the regwatch crate
//!
//! This module provides a unified error type that consolidates the
//! domain-specific errors (decode, HTTP, configuration) into a single
//! `Error` enum, while maintaining the ability to use domain-specific
//! errors when needed.

use std::io;
use thiserror::Error;

// Re-export domain-specific errors for convenience
pub use crate::decode::DecodeError;

/// Unified error type for the regwatch crate
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),

    /// HTTP client errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success response from the coordination service
    #[error("Consul returned {status}: {message}")]
    Consul { status: u16, message: String },

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Base64 decoding of a KV payload failed
    #[error("KV payload error: {0}")]
    Payload(#[from] base64::DecodeError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Registration document decode errors (aggregated, partial-success)
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Errors that abort startup (connect, node name, watch establishment)
    #[error("Startup error: {0}")]
    Startup(String),
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a startup-fatal error
    pub fn startup(msg: impl Into<String>) -> Self {
        Self::Startup(msg.into())
    }

    /// Check if this error is recoverable (can be retried on a later pass)
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Http(_) | Self::Consul { .. } | Self::Io(_) => true,
            Self::Config(_) | Self::Json(_) | Self::Payload(_) | Self::Decode(_) => false,
            Self::Startup(_) => false,
        }
    }
}

// Conversion from toml parse errors surfaced by config loading
impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(err.to_string())
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;
