use std::sync::Arc;
use tokio::runtime::Runtime;
use tracing::debug;

use super::{build_runtime, with_deadline, ReplyCallback, Responder, Transport};
use crate::call::{CallOptions, CallOutcome};
use crate::error::ClientResult;
use crate::service::{Reply, Request, RobotControl};

/// Transport that serves calls from a [`RobotControl`] living in the same
/// process.
///
/// Handlers run on the transport's own runtime, so asynchronous calls finish
/// on runtime threads and may finish in any order.
pub struct InProcessTransport {
    runtime: Runtime,
    service: Arc<dyn RobotControl>,
}

impl InProcessTransport {
    pub fn new(service: Arc<dyn RobotControl>, worker_threads: usize) -> ClientResult<Self> {
        let runtime = build_runtime(worker_threads, "robot-in-process")?;
        Ok(Self { runtime, service })
    }

    async fn invoke(
        service: Arc<dyn RobotControl>,
        options: CallOptions,
        request: Request,
    ) -> CallOutcome<Reply> {
        let kind = request.kind();
        let result = with_deadline(options.deadline, service.handle(request)).await;
        CallOutcome::from_handler(kind, result)
    }
}

impl Transport for InProcessTransport {
    fn name(&self) -> &'static str {
        "in-process"
    }

    fn endpoint(&self) -> &str {
        "in-process"
    }

    fn unary(&self, options: &CallOptions, request: Request) -> CallOutcome<Reply> {
        debug!(kind = %request.kind(), "In-process unary call");
        self.runtime
            .block_on(Self::invoke(self.service.clone(), options.clone(), request))
    }

    fn start(&self, options: CallOptions, request: Request, responder: Responder) {
        let service = self.service.clone();
        self.runtime.spawn(async move {
            let outcome = Self::invoke(service, options, request).await;
            responder.finish(outcome);
        });
    }

    fn start_with_callback(&self, options: CallOptions, request: Request, callback: ReplyCallback) {
        let service = self.service.clone();
        self.runtime.spawn(async move {
            let outcome = Self::invoke(service, options, request).await;
            callback(outcome);
        });
    }
}
