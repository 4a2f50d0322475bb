use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};
use std::time::Instant;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use super::{CallOptions, CallOutcome, CallTag};
use crate::error::{ClientError, ClientResult};
use crate::service::{CallKind, Reply};
use crate::status::RpcStatus;

/// Write-once cell the transport fills before posting the call's tag.
///
/// The transport holds one handle (inside its [`Responder`]) and the
/// [`CallContext`] the other; the completion queue hand-off orders the write
/// before the dispatcher's read.
///
/// [`Responder`]: crate::transport::Responder
#[derive(Debug, Clone, Default)]
pub struct ResultSlot(Arc<OnceLock<CallOutcome<Reply>>>);

impl ResultSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the outcome. Returns false if the slot was already filled.
    pub fn fill(&self, outcome: CallOutcome<Reply>) -> bool {
        self.0.set(outcome).is_ok()
    }

    pub fn get(&self) -> Option<&CallOutcome<Reply>> {
        self.0.get()
    }
}

/// Terminal side effect of a call, run exactly once by the dispatcher.
pub enum CompletionAction {
    /// Log a human-readable success/failure line.
    Print,
    /// Resolve a [`CallFuture`](super::CallFuture).
    ///
    /// The future resolves with `Ok` whenever the completion was delivered,
    /// including failed RPCs (callers inspect the status). It resolves with
    /// [`ClientError::DeliveryFailed`] only when the transport dropped the call.
    Fulfill(oneshot::Sender<ClientResult<CallOutcome<Reply>>>),
    /// Hand the outcome to a user function on the dispatcher thread.
    Invoke(Box<dyn FnOnce(CallOutcome<Reply>) + Send + 'static>),
}

impl CompletionAction {
    pub fn name(&self) -> &'static str {
        match self {
            CompletionAction::Print => "print",
            CompletionAction::Fulfill(_) => "fulfill",
            CompletionAction::Invoke(_) => "invoke",
        }
    }
}

impl fmt::Debug for CompletionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CompletionAction").field(&self.name()).finish()
    }
}

/// One outstanding asynchronous call.
///
/// Owned by the issuer until it is registered in a [`CallTable`], then by the
/// table until the dispatcher removes it and calls [`complete`]. Completing
/// consumes the context, so it cannot be completed or referenced again.
///
/// [`CallTable`]: super::CallTable
/// [`complete`]: CallContext::complete
#[derive(Debug)]
pub struct CallContext {
    tag: CallTag,
    kind: CallKind,
    options: CallOptions,
    slot: ResultSlot,
    action: CompletionAction,
    issued_at: Instant,
}

impl CallContext {
    pub fn new(tag: CallTag, kind: CallKind, options: CallOptions, action: CompletionAction) -> Self {
        Self {
            tag,
            kind,
            options,
            slot: ResultSlot::new(),
            action,
            issued_at: Instant::now(),
        }
    }

    pub fn tag(&self) -> CallTag {
        self.tag
    }

    pub fn kind(&self) -> CallKind {
        self.kind
    }

    pub fn options(&self) -> &CallOptions {
        &self.options
    }

    /// Handle on the result slot, for the transport's responder.
    pub fn slot(&self) -> ResultSlot {
        self.slot.clone()
    }

    /// Run the completion action with the delivered result and dispose of
    /// the context.
    ///
    /// `ok` is the flag dequeued with the tag. When it is false, or the
    /// transport posted without filling the slot, the action sees a failed
    /// status and an empty response.
    pub fn complete(self, ok: bool) {
        let outcome = match (ok, self.slot.get()) {
            (true, Some(outcome)) => outcome.clone(),
            (true, None) => CallOutcome::failed(
                self.kind,
                RpcStatus::internal("completion posted without a result"),
            ),
            (false, _) => CallOutcome::failed(self.kind, RpcStatus::not_delivered()),
        };

        debug!(
            tag = %self.tag,
            kind = %self.kind,
            ok,
            action = self.action.name(),
            elapsed_us = self.issued_at.elapsed().as_micros() as u64,
            "Completing call"
        );

        match self.action {
            CompletionAction::Print => {
                if outcome.is_ok() {
                    info!(tag = %self.tag, "{}", outcome);
                } else {
                    warn!(tag = %self.tag, "{}", outcome);
                }
            }
            CompletionAction::Fulfill(sender) => {
                let value = if ok {
                    Ok(outcome)
                } else {
                    Err(ClientError::DeliveryFailed { tag: self.tag })
                };
                if sender.send(value).is_err() {
                    debug!(tag = %self.tag, "Future dropped before its call completed");
                }
            }
            CompletionAction::Invoke(callback) => {
                if panic::catch_unwind(AssertUnwindSafe(|| callback(outcome))).is_err() {
                    error!(tag = %self.tag, "Completion callback panicked");
                }
            }
        }
    }
}
