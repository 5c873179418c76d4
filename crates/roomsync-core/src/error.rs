use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{config::ConfigError, decode::DecodeError, types::PollLoopState};

/// Broad error category used for containment and caller-facing handling.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum SyncErrorCategory {
    /// A wire payload (one event or a whole document) could not be decoded.
    Decode,
    /// Transient transport failure or retryable server status.
    Network,
    /// The server rejected the request (non-retryable 4xx).
    Api,
    /// The operation needs state that is not set yet (room, user).
    Precondition,
    /// A consumer-registered handler failed.
    Handler,
    /// Invalid configuration or argument.
    Config,
    /// Invariant break inside the engine.
    Internal,
}

/// Stable error payload surfaced by one-shot operations and logged by the poll loop.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[error("{category:?}:{code}: {message}")]
pub struct SyncError {
    /// High-level error category.
    pub category: SyncErrorCategory,
    /// Stable machine-readable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// HTTP status when the failure came from a server response.
    pub status: Option<u16>,
}

impl SyncError {
    /// Construct a new error.
    pub fn new(
        category: SyncErrorCategory,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
            status: None,
        }
    }

    /// Attach the HTTP status that produced the error.
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Operation attempted before a room was joined.
    pub fn room_not_set(action: impl Into<String>) -> Self {
        let action = action.into();
        Self::new(
            SyncErrorCategory::Precondition,
            "room_not_set",
            format!("cannot run '{action}' before a room is set"),
        )
    }

    /// Operation attempted before a user was set.
    pub fn user_not_set(action: impl Into<String>) -> Self {
        let action = action.into();
        Self::new(
            SyncErrorCategory::Precondition,
            "user_not_set",
            format!("cannot run '{action}' before a user is set"),
        )
    }

    /// Build a standard invalid-state-transition error.
    pub fn invalid_state(current: PollLoopState, action: impl Into<String>) -> Self {
        let action = action.into();
        Self::new(
            SyncErrorCategory::Internal,
            "invalid_state_transition",
            format!("cannot run '{action}' while poll loop is {current:?}"),
        )
    }

    /// Whether a poll tick failing with this error should simply wait for the next tick.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.category,
            SyncErrorCategory::Network | SyncErrorCategory::Decode
        )
    }
}

impl From<DecodeError> for SyncError {
    fn from(err: DecodeError) -> Self {
        Self::new(SyncErrorCategory::Decode, err.code(), err.to_string())
    }
}

impl From<ConfigError> for SyncError {
    fn from(err: ConfigError) -> Self {
        Self::new(SyncErrorCategory::Config, "invalid_config", err.to_string())
    }
}

impl From<HandlerError> for SyncError {
    fn from(err: HandlerError) -> Self {
        Self::new(SyncErrorCategory::Handler, "handler_failed", err.0)
    }
}

/// Failure reported by a consumer callback.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("handler failed: {0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Return type of every `EventHandler` callback.
pub type HandlerResult = Result<(), HandlerError>;

/// Map HTTP status codes to error categories.
pub fn classify_http_status(status: u16) -> SyncErrorCategory {
    match status {
        408 | 429 => SyncErrorCategory::Network,
        400..=499 => SyncErrorCategory::Api,
        500..=599 => SyncErrorCategory::Network,
        _ => SyncErrorCategory::Internal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_http_status_categories() {
        assert_eq!(classify_http_status(429), SyncErrorCategory::Network);
        assert_eq!(classify_http_status(408), SyncErrorCategory::Network);
        assert_eq!(classify_http_status(404), SyncErrorCategory::Api);
        assert_eq!(classify_http_status(503), SyncErrorCategory::Network);
        assert_eq!(classify_http_status(700), SyncErrorCategory::Internal);
    }

    #[test]
    fn precondition_codes_are_stable() {
        let err = SyncError::room_not_set("send_command");
        assert_eq!(err.code, "room_not_set");
        assert_eq!(err.category, SyncErrorCategory::Precondition);

        let err = SyncError::user_not_set("react");
        assert_eq!(err.code, "user_not_set");
        assert!(!err.is_transient());
    }

    #[test]
    fn decode_errors_convert_to_transient_sync_errors() {
        let err: SyncError = DecodeError::MissingField {
            index: 2,
            field: "id",
        }
        .into();
        assert_eq!(err.category, SyncErrorCategory::Decode);
        assert_eq!(err.code, "missing_field");
        assert!(err.is_transient());
    }

    #[test]
    fn keeps_status_when_attached() {
        let err = SyncError::new(SyncErrorCategory::Api, "http_status", "nope").with_status(403);
        assert_eq!(err.status, Some(403));
    }
}
