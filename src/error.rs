//! # Client Error Types
//!
//! Error handling for the dispatcher, the call issuer and the transports.
//!
//! Remote failures (the server is down, the server rejected the call) are not
//! errors in this sense: they travel inside [`RpcStatus`](crate::status::RpcStatus)
//! on the call outcome. `ClientError` covers lifecycle misuse, local I/O and
//! configuration problems, and completions that were never delivered.

use thiserror::Error;

use crate::call::CallTag;
use crate::service::CallKind;
use crate::status::RpcStatus;

/// Client operation result type
pub type ClientResult<T> = std::result::Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Completion queue has been shut down")]
    QueueShutdown,

    #[error("Completion queue was already shut down")]
    AlreadyShutdown,

    #[error("Completion queue closed before the call completed")]
    QueueClosed,

    #[error("Poll-once call expected tag {expected} but dequeued {got}")]
    TagMismatch { expected: CallTag, got: CallTag },

    #[error("Completion for call {tag} was not delivered")]
    DeliveryFailed { tag: CallTag },

    #[error("{kind} callback was dropped without being invoked")]
    CallbackDropped { kind: CallKind },

    #[error("Remote call failed: {0}")]
    Rpc(RpcStatus),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Service unavailable: {service} - {reason}")]
    ServiceUnavailable { service: String, reason: String },

    #[error("Runtime error: {0}")]
    Runtime(String),

    #[error("JSON serialization/deserialization failed: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl ClientError {
    /// Create a configuration error
    pub fn config_error(message: impl Into<String>) -> Self {
        Self::ConfigError(message.into())
    }

    /// Create a service unavailable error
    pub fn service_unavailable(service: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ServiceUnavailable {
            service: service.into(),
            reason: reason.into(),
        }
    }

    /// Lifecycle contract violations: the caller used the queue or a
    /// poll-once call in a way the design forbids.
    #[must_use]
    pub fn is_misuse(&self) -> bool {
        matches!(
            self,
            ClientError::QueueShutdown
                | ClientError::AlreadyShutdown
                | ClientError::TagMismatch { .. }
        )
    }

    /// Check if error is recoverable (worth retrying by the caller)
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            ClientError::ServiceUnavailable { .. } => true,
            ClientError::DeliveryFailed { .. } => true,
            ClientError::CallbackDropped { .. } => true,
            ClientError::Rpc(status) => status.code().is_transient(),
            ClientError::IoError(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::StatusCode;

    #[test]
    fn test_misuse_classification() {
        assert!(ClientError::QueueShutdown.is_misuse());
        assert!(ClientError::AlreadyShutdown.is_misuse());
        assert!(ClientError::TagMismatch {
            expected: CallTag::POLL_SENTINEL,
            got: CallTag::from_raw(7),
        }
        .is_misuse());
        assert!(!ClientError::QueueClosed.is_misuse());
        assert!(!ClientError::config_error("bad").is_misuse());
    }

    #[test]
    fn test_recoverable_classification() {
        assert!(ClientError::service_unavailable("robot", "refused").is_recoverable());
        assert!(ClientError::Rpc(RpcStatus::new(StatusCode::Unavailable, "down")).is_recoverable());
        assert!(!ClientError::Rpc(RpcStatus::new(StatusCode::InvalidArgument, "x")).is_recoverable());
        assert!(!ClientError::AlreadyShutdown.is_recoverable());
    }

    #[test]
    fn test_display_includes_tags() {
        let err = ClientError::TagMismatch {
            expected: CallTag::POLL_SENTINEL,
            got: CallTag::from_raw(42),
        };
        assert_eq!(
            err.to_string(),
            "Poll-once call expected tag #0 but dequeued #42"
        );
    }
}
