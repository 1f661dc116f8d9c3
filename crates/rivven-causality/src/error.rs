//! Error types for the causality relay

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error categories for metrics and alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Configuration errors (invalid settings)
    Configuration,
    /// Job queue errors
    Transport,
    /// Table/index model errors
    Schema,
}

/// Causality errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CausalityError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A job queue was closed while the relay was still running
    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    /// Invalid table or index definition
    #[error("Schema error: {0}")]
    Schema(String),
}

impl CausalityError {
    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a channel closed error
    pub fn channel_closed(channel: impl Into<String>) -> Self {
        Self::ChannelClosed(channel.into())
    }

    /// Create a schema error
    pub fn schema(msg: impl Into<String>) -> Self {
        Self::Schema(msg.into())
    }

    /// Check if this error is retriable.
    ///
    /// None are: a closed queue means the owning task is gone.
    pub fn is_retriable(&self) -> bool {
        false
    }

    /// Get the error category for metrics and alerting.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Config(_) => ErrorCategory::Configuration,
            Self::ChannelClosed(_) => ErrorCategory::Transport,
            Self::Schema(_) => ErrorCategory::Schema,
        }
    }

    /// Get a metric-safe error code.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Config(_) => "config_error",
            Self::ChannelClosed(_) => "channel_closed",
            Self::Schema(_) => "schema_error",
        }
    }
}

/// Result type for causality operations
pub type Result<T> = std::result::Result<T, CausalityError>;
