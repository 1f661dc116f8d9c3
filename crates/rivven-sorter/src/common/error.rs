//! Error types for the sorter stage
//!
//! Includes error classification so the enclosing table pipeline can tell an
//! expected shutdown apart from a failure that must stop the table.

use crate::actor::ActorId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error categories for metrics and alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Memory quota errors
    FlowControl,
    /// Sort engine errors (selection, sort dir, run loop)
    Sorter,
    /// Mailbox and channel errors
    Transport,
    /// Configuration errors (invalid settings)
    Configuration,
    /// I/O errors
    Io,
    /// Serialization errors (spilled runs)
    Serialization,
    /// Other/unknown errors
    Other,
}

/// Sorter stage errors
#[derive(Error, Debug)]
pub enum SorterError {
    /// The flow controller was aborted, usually because the table is stopping
    #[error("Flow controller aborted")]
    FlowControllerAborted,

    /// A single event needs more memory than the whole table quota
    #[error("Event of {size} bytes is larger than the flow control quota of {quota} bytes")]
    EventLargerThanQuota { size: u64, quota: u64 },

    /// Unrecognized sort engine name
    #[error("Unknown sort engine: {0}")]
    UnknownSortEngine(String),

    /// Sort directory missing or not writable
    #[error("Sort dir error: {0}")]
    SortDir(String),

    /// Sort engine failure
    #[error("Sorter error: {0}")]
    Sorter(String),

    /// A channel between pipeline tasks was closed
    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    /// No mailbox registered for the actor
    #[error("Actor not found: {0}")]
    ActorNotFound(ActorId),

    /// Mailbox of the actor is full
    #[error("Mailbox full: {0}")]
    MailboxFull(ActorId),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl SorterError {
    /// Create an unknown sort engine error
    pub fn unknown_sort_engine(engine: impl Into<String>) -> Self {
        Self::UnknownSortEngine(engine.into())
    }

    /// Create a sort dir error
    pub fn sort_dir(msg: impl Into<String>) -> Self {
        Self::SortDir(msg.into())
    }

    /// Create a sorter error
    pub fn sorter(msg: impl Into<String>) -> Self {
        Self::Sorter(msg.into())
    }

    /// Create a channel closed error
    pub fn channel_closed(channel: impl Into<String>) -> Self {
        Self::ChannelClosed(channel.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid state error
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    /// Create a generic error
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Check if this error is the flow-control abort raised during shutdown.
    ///
    /// An aborted flow controller ends the dispatch loop quietly; it is never
    /// reported to the supervisor.
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::FlowControllerAborted)
    }

    /// Check if this error is retriable.
    ///
    /// Only a full mailbox is transient. Everything else either ends the
    /// table (and is retried by the task supervisor, not here) or is a
    /// shutdown signal.
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::MailboxFull(_) => true,
            Self::Io(e) => {
                use std::io::ErrorKind;
                matches!(e.kind(), ErrorKind::Interrupted | ErrorKind::WouldBlock)
            }
            Self::FlowControllerAborted
            | Self::EventLargerThanQuota { .. }
            | Self::UnknownSortEngine(_)
            | Self::SortDir(_)
            | Self::Sorter(_)
            | Self::ChannelClosed(_)
            | Self::ActorNotFound(_)
            | Self::Config(_)
            | Self::InvalidState(_)
            | Self::Json(_)
            | Self::Other(_) => false,
        }
    }

    /// Get the error category for metrics and alerting.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::FlowControllerAborted => ErrorCategory::FlowControl,
            Self::EventLargerThanQuota { .. } => ErrorCategory::FlowControl,
            Self::UnknownSortEngine(_) => ErrorCategory::Configuration,
            Self::SortDir(_) => ErrorCategory::Sorter,
            Self::Sorter(_) => ErrorCategory::Sorter,
            Self::ChannelClosed(_) => ErrorCategory::Transport,
            Self::ActorNotFound(_) => ErrorCategory::Transport,
            Self::MailboxFull(_) => ErrorCategory::Transport,
            Self::Config(_) => ErrorCategory::Configuration,
            Self::InvalidState(_) => ErrorCategory::Other,
            Self::Json(_) => ErrorCategory::Serialization,
            Self::Io(_) => ErrorCategory::Io,
            Self::Other(_) => ErrorCategory::Other,
        }
    }

    /// Get a metric-safe error code.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::FlowControllerAborted => "flow_controller_aborted",
            Self::EventLargerThanQuota { .. } => "event_larger_than_quota",
            Self::UnknownSortEngine(_) => "unknown_sort_engine",
            Self::SortDir(_) => "sort_dir_error",
            Self::Sorter(_) => "sorter_error",
            Self::ChannelClosed(_) => "channel_closed",
            Self::ActorNotFound(_) => "actor_not_found",
            Self::MailboxFull(_) => "mailbox_full",
            Self::Config(_) => "config_error",
            Self::InvalidState(_) => "invalid_state",
            Self::Json(_) => "json_error",
            Self::Io(_) => "io_error",
            Self::Other(_) => "unknown",
        }
    }
}

/// Result type for sorter operations
pub type Result<T> = std::result::Result<T, SorterError>;
