//! # Transport Abstraction
//!
//! The client issues calls through a [`Transport`] and never touches the wire
//! itself. Every transport offers the same three entry points:
//!
//! - [`Transport::unary`]: blocking request/response on the caller's thread
//! - [`Transport::start`]: asynchronous call that reports completion by
//!   posting the call's tag to a completion queue through a [`Responder`]
//! - [`Transport::start_with_callback`]: asynchronous call that invokes a
//!   callback directly from a transport thread, bypassing any queue
//!
//! Implementations:
//!
//! - [`InProcessTransport`]: hosts a [`RobotControl`] service on its own
//!   tokio runtime
//! - [`TcpTransport`]: JSON lines over one TCP connection to a
//!   [`RobotServer`](crate::server::RobotServer)
//! - [`ManualTransport`]: parks asynchronous calls until the caller completes
//!   them, in any order
//!
//! [`RobotControl`]: crate::service::RobotControl

mod in_process;
mod manual;
mod tcp;

pub use in_process::InProcessTransport;
pub use manual::{ManualTransport, PendingCall};
pub use tcp::TcpTransport;

use std::future::Future;
use std::time::Duration;
use tracing::error;

use crate::call::{CallOptions, CallOutcome, CallTag, ResultSlot};
use crate::completion_queue::CompletionQueue;
use crate::service::{Reply, Request};
use crate::status::RpcStatus;

/// Function a transport calls exactly once with a finished call's outcome.
pub type ReplyCallback = Box<dyn FnOnce(CallOutcome<Reply>) + Send + 'static>;

/// Client side of the robot control contract.
pub trait Transport: Send + Sync {
    /// Transport name for logging.
    fn name(&self) -> &'static str;

    fn endpoint(&self) -> &str;

    /// Perform the call and block until it finishes. Panics if called from
    /// inside an async runtime.
    fn unary(&self, options: &CallOptions, request: Request) -> CallOutcome<Reply>;

    /// Start the call and return immediately. The transport must eventually
    /// either [`finish`](Responder::finish) the responder or drop it.
    fn start(&self, options: CallOptions, request: Request, responder: Responder);

    /// Start the call and return immediately; `callback` runs on a transport
    /// thread when the call finishes.
    fn start_with_callback(&self, options: CallOptions, request: Request, callback: ReplyCallback);
}

/// Completion hook handed to a transport for one asynchronous call.
///
/// [`finish`](Self::finish) stores the outcome in the call's result slot and
/// posts `(tag, true)`. Dropping an unfinished responder posts `(tag, false)`,
/// so every started call produces exactly one completion either way.
#[derive(Debug)]
pub struct Responder {
    tag: CallTag,
    slot: ResultSlot,
    queue: CompletionQueue,
    finished: bool,
}

impl Responder {
    pub fn new(tag: CallTag, slot: ResultSlot, queue: CompletionQueue) -> Self {
        Self {
            tag,
            slot,
            queue,
            finished: false,
        }
    }

    pub fn tag(&self) -> CallTag {
        self.tag
    }

    pub fn finish(mut self, outcome: CallOutcome<Reply>) {
        self.finished = true;
        self.slot.fill(outcome);
        self.post(true);
    }

    /// Adapt this responder to the callback shape used by transports that
    /// keep a table of pending replies.
    pub fn into_callback(self) -> ReplyCallback {
        Box::new(move |outcome| self.finish(outcome))
    }

    fn post(&self, ok: bool) {
        if let Err(e) = self.queue.post(self.tag, ok) {
            error!(tag = %self.tag, ok, error = %e, "Dropping completion");
        }
    }
}

impl Drop for Responder {
    fn drop(&mut self) {
        if !self.finished {
            self.post(false);
        }
    }
}

/// Run a service call under an optional deadline.
pub(crate) async fn with_deadline<F>(deadline: Option<Duration>, call: F) -> Result<Reply, RpcStatus>
where
    F: Future<Output = Result<Reply, RpcStatus>>,
{
    match deadline {
        Some(limit) => match tokio::time::timeout(limit, call).await {
            Ok(result) => result,
            Err(_) => Err(RpcStatus::deadline_exceeded(format!(
                "deadline of {}ms exceeded",
                limit.as_millis()
            ))),
        },
        None => call.await,
    }
}

/// Build the multi-threaded runtime a transport runs its I/O and handlers on.
///
/// The transport owning it must be dropped outside async code; dropping a
/// runtime on a worker thread panics.
pub(crate) fn build_runtime(
    worker_threads: usize,
    thread_name: &str,
) -> crate::error::ClientResult<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(worker_threads.max(1))
        .thread_name(thread_name)
        .enable_all()
        .build()
        .map_err(|e| crate::error::ClientError::Runtime(format!("Failed to build runtime: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion_queue::{Completion, QueueEvent};
    use crate::service::MoveResponse;
    use crate::status::StatusCode;

    #[test]
    fn test_finish_posts_ok_and_fills_slot() {
        let queue = CompletionQueue::new();
        let slot = ResultSlot::new();
        let responder = Responder::new(CallTag::from_raw(11), slot.clone(), queue.clone());

        responder.finish(CallOutcome::success(Reply::Move(MoveResponse {
            message: "Moving to (0, 0)".to_string(),
        })));

        assert_eq!(
            queue.next(),
            QueueEvent::Ready(Completion {
                tag: CallTag::from_raw(11),
                ok: true
            })
        );
        assert!(slot.get().unwrap().is_ok());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_drop_posts_not_ok() {
        let queue = CompletionQueue::new();
        let responder = Responder::new(CallTag::from_raw(12), ResultSlot::new(), queue.clone());
        drop(responder);

        assert_eq!(
            queue.next(),
            QueueEvent::Ready(Completion {
                tag: CallTag::from_raw(12),
                ok: false
            })
        );
    }

    #[test]
    fn test_callback_adapter_posts_once() {
        let queue = CompletionQueue::new();
        let callback =
            Responder::new(CallTag::from_raw(13), ResultSlot::new(), queue.clone()).into_callback();

        callback(CallOutcome::success(Reply::Move(MoveResponse::default())));

        assert_eq!(queue.total_posted(), 1);
    }

    #[tokio::test]
    async fn test_deadline_exceeded() {
        let result = with_deadline(Some(Duration::from_millis(10)), async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(Reply::Move(MoveResponse::default()))
        })
        .await;

        assert_eq!(result.unwrap_err().code(), StatusCode::DeadlineExceeded);
    }
}
