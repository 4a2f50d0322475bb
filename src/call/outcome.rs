use std::fmt;

use crate::error::{ClientError, ClientResult};
use crate::service::{CallKind, Reply, ReplyPayload};
use crate::status::RpcStatus;

/// Final status and response of one call.
///
/// When the status is not OK the response holds its default (empty) value and
/// must not be treated as valid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallOutcome<R> {
    status: RpcStatus,
    response: R,
}

impl<R> CallOutcome<R> {
    pub fn success(response: R) -> Self {
        Self {
            status: RpcStatus::ok(),
            response,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status.is_ok()
    }

    pub fn status(&self) -> &RpcStatus {
        &self.status
    }

    pub fn response(&self) -> &R {
        &self.response
    }

    pub fn into_parts(self) -> (RpcStatus, R) {
        (self.status, self.response)
    }

    /// The response if the call succeeded, the failed status otherwise.
    pub fn into_result(self) -> Result<R, RpcStatus> {
        if self.status.is_ok() {
            Ok(self.response)
        } else {
            Err(self.status)
        }
    }

    /// Like [`into_result`](Self::into_result), with the failed status as a
    /// [`ClientError::Rpc`].
    pub fn into_client_result(self) -> ClientResult<R> {
        self.into_result().map_err(ClientError::Rpc)
    }
}

impl<R: Default> CallOutcome<R> {
    pub fn failure(status: RpcStatus) -> Self {
        Self {
            status,
            response: R::default(),
        }
    }
}

impl<R: ReplyPayload> CallOutcome<R> {
    /// Human-readable result line, e.g. `Move response: Moving to (1, 2)`.
    pub fn summary(&self) -> String {
        summary_line(R::KIND, &self.status, self.response.message())
    }
}

impl CallOutcome<Reply> {
    pub fn failed(kind: CallKind, status: RpcStatus) -> Self {
        Self {
            status,
            response: Reply::empty(kind),
        }
    }

    /// Build an outcome from what a service handler returned.
    pub fn from_handler(kind: CallKind, result: Result<Reply, RpcStatus>) -> Self {
        match result {
            Ok(reply) => Self::success(reply),
            Err(status) => Self::failed(kind, status),
        }
    }

    pub fn kind(&self) -> CallKind {
        self.response.kind()
    }

    /// Narrow a type-erased outcome to the response type the caller asked for.
    ///
    /// A reply of the wrong kind becomes an `INTERNAL` failure.
    pub fn narrow<R: ReplyPayload>(self) -> CallOutcome<R> {
        let kind = self.response.kind();
        match R::from_reply(self.response) {
            Some(response) => CallOutcome {
                status: self.status,
                response,
            },
            None => CallOutcome::failure(RpcStatus::internal(format!(
                "expected {} reply, got {}",
                R::KIND,
                kind
            ))),
        }
    }
}

impl fmt::Display for CallOutcome<Reply> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&summary_line(
            self.response.kind(),
            &self.status,
            self.response.message(),
        ))
    }
}

pub(crate) fn summary_line(kind: CallKind, status: &RpcStatus, message: &str) -> String {
    if status.is_ok() {
        format!("{} response: {}", kind, message)
    } else {
        format!("{} RPC failed: {}", kind, status)
    }
}
