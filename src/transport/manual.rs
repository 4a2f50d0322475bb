use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

use super::{ReplyCallback, Responder, Transport};
use crate::call::{CallOptions, CallOutcome};
use crate::service::{MoveResponse, Reply, Request, StopResponse};
use crate::status::RpcStatus;

type Script = dyn Fn(&Request) -> Result<Reply, RpcStatus> + Send + Sync;

enum Completer {
    Queue(Responder),
    Callback(ReplyCallback),
}

/// An asynchronous call parked in a [`ManualTransport`].
pub struct PendingCall {
    request: Request,
    options: CallOptions,
    script: Arc<Script>,
    completer: Completer,
}

impl PendingCall {
    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn options(&self) -> &CallOptions {
        &self.options
    }

    /// Complete with whatever the transport's script answers.
    pub fn complete(self) {
        let kind = self.request.kind();
        let outcome = CallOutcome::from_handler(kind, (self.script)(&self.request));
        self.complete_with(outcome);
    }

    /// Complete with an explicit outcome.
    pub fn complete_with(self, outcome: CallOutcome<Reply>) {
        match self.completer {
            Completer::Queue(responder) => responder.finish(outcome),
            Completer::Callback(callback) => callback(outcome),
        }
    }

    /// Give up on the call without a result. Queue-based calls see an
    /// undelivered completion; callback calls never hear back.
    pub fn abandon(self) {
        drop(self);
    }
}

impl fmt::Debug for PendingCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let path = match self.completer {
            Completer::Queue(ref responder) => format!("queue {}", responder.tag()),
            Completer::Callback(_) => "callback".to_string(),
        };
        f.debug_struct("PendingCall")
            .field("request", &self.request)
            .field("completion", &path)
            .finish()
    }
}

/// Transport that answers blocking calls immediately and parks asynchronous
/// calls until the owner completes them.
///
/// Answers come from a script function, so tests can decide what the "server"
/// says and, by completing parked calls in any order, when it says it.
pub struct ManualTransport {
    script: Arc<Script>,
    pending: Mutex<Vec<PendingCall>>,
}

impl ManualTransport {
    pub fn new<F>(script: F) -> Self
    where
        F: Fn(&Request) -> Result<Reply, RpcStatus> + Send + Sync + 'static,
    {
        Self {
            script: Arc::new(script),
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Answers like a healthy robot: `Moving to (x, y)` and `Stopped`.
    pub fn echo() -> Self {
        Self::new(|request| {
            Ok(match request {
                Request::Move(m) => Reply::Move(MoveResponse {
                    message: format!("Moving to ({}, {})", m.x, m.y),
                }),
                Request::Stop(_) => Reply::Stop(StopResponse {
                    message: "Stopped".to_string(),
                }),
            })
        })
    }

    /// Fails every call with `status`.
    pub fn failing(status: RpcStatus) -> Self {
        Self::new(move |_| Err(status.clone()))
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Take every parked call, oldest first.
    pub fn take_pending(&self) -> Vec<PendingCall> {
        std::mem::take(&mut *self.pending.lock())
    }

    /// Complete every parked call in issue order. Returns how many completed.
    pub fn complete_all(&self) -> usize {
        let calls = self.take_pending();
        let count = calls.len();
        calls.into_iter().for_each(PendingCall::complete);
        count
    }

    fn park(&self, options: CallOptions, request: Request, completer: Completer) {
        self.pending.lock().push(PendingCall {
            request,
            options,
            script: self.script.clone(),
            completer,
        });
    }
}

impl Transport for ManualTransport {
    fn name(&self) -> &'static str {
        "manual"
    }

    fn endpoint(&self) -> &str {
        "manual"
    }

    fn unary(&self, _options: &CallOptions, request: Request) -> CallOutcome<Reply> {
        CallOutcome::from_handler(request.kind(), (self.script)(&request))
    }

    fn start(&self, options: CallOptions, request: Request, responder: Responder) {
        self.park(options, request, Completer::Queue(responder));
    }

    fn start_with_callback(&self, options: CallOptions, request: Request, callback: ReplyCallback) {
        self.park(options, request, Completer::Callback(callback));
    }
}
