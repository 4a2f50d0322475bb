//! # Wire Frames
//!
//! Newline-delimited JSON framing shared by [`TcpTransport`] and
//! [`RobotServer`]. Each line carries one frame; replies echo the request id
//! so calls can finish out of order on one connection.
//!
//! ```text
//! -> {"id":7,"deadline_ms":500,"call":{"method":"move","x":10,"y":20}}
//! <- {"id":7,"status":{"code":"Ok","message":""},"reply":{"kind":"move","message":"Moving to (10, 20)"}}
//! ```
//!
//! [`TcpTransport`]: crate::transport::TcpTransport
//! [`RobotServer`]: crate::server::RobotServer

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::call::{CallOptions, CallOutcome};
use crate::error::ClientResult;
use crate::service::{CallKind, Reply, Request};
use crate::status::RpcStatus;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestFrame {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
    pub call: Request,
}

impl RequestFrame {
    pub fn new(id: u64, options: &CallOptions, call: Request) -> Self {
        Self {
            id,
            deadline_ms: options.deadline.map(|d| d.as_millis() as u64),
            metadata: options.metadata.clone(),
            call,
        }
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyFrame {
    pub id: u64,
    pub status: RpcStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply: Option<Reply>,
}

impl ReplyFrame {
    pub fn from_result(id: u64, result: Result<Reply, RpcStatus>) -> Self {
        match result {
            Ok(reply) => Self {
                id,
                status: RpcStatus::ok(),
                reply: Some(reply),
            },
            Err(status) => Self {
                id,
                status,
                reply: None,
            },
        }
    }

    /// Convert to the outcome of a call of `kind`.
    pub fn into_outcome(self, kind: CallKind) -> CallOutcome<Reply> {
        match (self.status.is_ok(), self.reply) {
            (true, Some(reply)) if reply.kind() == kind => CallOutcome::success(reply),
            (true, Some(reply)) => CallOutcome::failed(
                kind,
                RpcStatus::internal(format!("expected {} reply, got {}", kind, reply.kind())),
            ),
            (true, None) => {
                CallOutcome::failed(kind, RpcStatus::internal("reply frame without a payload"))
            }
            (false, _) => CallOutcome::failed(kind, self.status),
        }
    }
}

/// Serialize a frame as one line, including the trailing newline.
pub fn encode_line<T: Serialize>(frame: &T) -> ClientResult<String> {
    let mut line = serde_json::to_string(frame)?;
    line.push('\n');
    Ok(line)
}

pub fn decode_line<'a, T: Deserialize<'a>>(line: &'a str) -> ClientResult<T> {
    Ok(serde_json::from_str(line.trim_end())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::{MoveRequest, MoveResponse, StopRequest};
    use crate::status::StatusCode;

    #[test]
    fn test_request_frame_line() {
        let options = CallOptions::new().with_deadline(Duration::from_millis(500));
        let frame = RequestFrame::new(7, &options, Request::Move(MoveRequest { x: 10, y: 20 }));

        let line = encode_line(&frame).unwrap();
        assert_eq!(
            line,
            "{\"id\":7,\"deadline_ms\":500,\"call\":{\"method\":\"move\",\"x\":10,\"y\":20}}\n"
        );

        let decoded: RequestFrame = decode_line(&line).unwrap();
        assert_eq!(decoded.deadline(), Some(Duration::from_millis(500)));
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_stop_frame_without_options() {
        let decoded: RequestFrame = decode_line(r#"{"id":1,"call":{"method":"stop"}}"#).unwrap();
        assert_eq!(decoded.call, Request::Stop(StopRequest {}));
        assert!(decoded.metadata.is_empty());
        assert!(decoded.deadline().is_none());
    }

    #[test]
    fn test_reply_frame_outcomes() {
        let ok = ReplyFrame::from_result(
            3,
            Ok(Reply::Move(MoveResponse {
                message: "Moving to (1, 1)".to_string(),
            })),
        );
        assert!(ok.into_outcome(CallKind::Move).is_ok());

        let failed = ReplyFrame::from_result(4, Err(RpcStatus::unavailable("busy")));
        let outcome = failed.into_outcome(CallKind::Stop);
        assert_eq!(outcome.status().code(), StatusCode::Unavailable);
        assert_eq!(outcome.kind(), CallKind::Stop);
    }

    #[test]
    fn test_mismatched_reply_kind_is_internal() {
        let frame = ReplyFrame::from_result(5, Ok(Reply::Move(MoveResponse::default())));
        let outcome = frame.into_outcome(CallKind::Stop);
        assert_eq!(outcome.status().code(), StatusCode::Internal);
    }

    #[test]
    fn test_garbage_line_is_error() {
        assert!(decode_line::<ReplyFrame>("not json").is_err());
    }
}
