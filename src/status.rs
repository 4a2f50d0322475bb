//! Completion status of a remote call.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status codes carried by every call outcome, modelled on the gRPC codes
/// the robot service speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusCode {
    Ok,
    Cancelled,
    Unknown,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    FailedPrecondition,
    Aborted,
    Internal,
    Unavailable,
}

impl StatusCode {
    /// Failures that may clear up on their own (server restarting, slow link).
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            StatusCode::Unavailable | StatusCode::DeadlineExceeded | StatusCode::Aborted
        )
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StatusCode::Ok => "OK",
            StatusCode::Cancelled => "CANCELLED",
            StatusCode::Unknown => "UNKNOWN",
            StatusCode::InvalidArgument => "INVALID_ARGUMENT",
            StatusCode::DeadlineExceeded => "DEADLINE_EXCEEDED",
            StatusCode::NotFound => "NOT_FOUND",
            StatusCode::FailedPrecondition => "FAILED_PRECONDITION",
            StatusCode::Aborted => "ABORTED",
            StatusCode::Internal => "INTERNAL",
            StatusCode::Unavailable => "UNAVAILABLE",
        };
        f.write_str(name)
    }
}

/// Final status of one call: success, or a failure code with a diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcStatus {
    code: StatusCode,
    message: String,
}

impl RpcStatus {
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn ok() -> Self {
        Self::new(StatusCode::Ok, "")
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Unavailable, message)
    }

    pub fn deadline_exceeded(message: impl Into<String>) -> Self {
        Self::new(StatusCode::DeadlineExceeded, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Internal, message)
    }

    /// Status reported to completion actions when the transport dropped the
    /// call without ever producing a result.
    pub fn not_delivered() -> Self {
        Self::unavailable("completion was not delivered")
    }

    pub fn is_ok(&self) -> bool {
        self.code == StatusCode::Ok
    }

    pub fn code(&self) -> StatusCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Default for RpcStatus {
    fn default() -> Self {
        Self::ok()
    }
}

impl fmt::Display for RpcStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{}: {}", self.code, self.message)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(RpcStatus::ok().to_string(), "OK");
        assert_eq!(
            RpcStatus::unavailable("connection refused").to_string(),
            "UNAVAILABLE: connection refused"
        );
    }

    #[test]
    fn test_wire_representation() {
        let status = RpcStatus::deadline_exceeded("500ms");
        let json = serde_json::to_string(&status).unwrap();
        assert_eq!(json, r#"{"code":"DeadlineExceeded","message":"500ms"}"#);
    }
}
