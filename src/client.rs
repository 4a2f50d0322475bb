//! # Robot Control Client
//!
//! The call issuer. Every operation of the robot contract is available in
//! four styles:
//!
//! | Style | Methods | Returns |
//! |-------|---------|---------|
//! | Blocking | [`move_to`], [`stop`] | the outcome, after the call finished |
//! | Poll-once | [`move_poll_once`], [`stop_poll_once`] | the outcome, read off the completion queue by the caller |
//! | Fire-and-continue | [`move_detached`], [`move_async`], [`move_then`] (and `stop_*`) | immediately; the dispatcher completes the call later |
//! | Callback | [`move_callback`], [`stop_callback`] | the outcome, delivered by the transport's own callback |
//!
//! Fire-and-continue calls need a dispatcher draining the client's queue,
//! either [`spawn_dispatcher`] or [`run`] on a thread of the caller's choosing.
//! Teardown order: stop issuing calls, [`shutdown`] the queue, join the
//! dispatcher.
//!
//! [`move_to`]: RobotControlClient::move_to
//! [`stop`]: RobotControlClient::stop
//! [`move_poll_once`]: RobotControlClient::move_poll_once
//! [`stop_poll_once`]: RobotControlClient::stop_poll_once
//! [`move_detached`]: RobotControlClient::move_detached
//! [`move_async`]: RobotControlClient::move_async
//! [`move_then`]: RobotControlClient::move_then
//! [`move_callback`]: RobotControlClient::move_callback
//! [`stop_callback`]: RobotControlClient::stop_callback
//! [`spawn_dispatcher`]: RobotControlClient::spawn_dispatcher
//! [`run`]: RobotControlClient::run
//! [`shutdown`]: RobotControlClient::shutdown

use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::call::{
    CallContext, CallFuture, CallOptions, CallOutcome, CallTable, CallTag, CompletionAction,
    ResultSlot,
};
use crate::completion_queue::{CompletionQueue, QueueEvent};
use crate::config::{ClientConfig, DispatcherConfig, TransportKind};
use crate::dispatcher::{DispatchSummary, Dispatcher, DispatcherHandle};
use crate::error::{ClientError, ClientResult};
use crate::service::{
    MoveRequest, MoveResponse, ReplyPayload, Request, RobotControl, RobotController, StopRequest,
    StopResponse,
};
use crate::status::RpcStatus;
use crate::transport::{InProcessTransport, Responder, TcpTransport, Transport};

/// Client for the robot control service.
///
/// # Examples
///
/// ```rust
/// use robot_dispatch::client::RobotControlClient;
/// use robot_dispatch::config::DispatcherConfig;
/// use robot_dispatch::service::RobotController;
/// use std::sync::Arc;
///
/// let client = RobotControlClient::in_process(Arc::new(RobotController::new()), 2)?;
///
/// let moved = client.move_to(0, 0);
/// assert!(moved.is_ok());
///
/// let dispatcher = client.spawn_dispatcher(&DispatcherConfig::default())?;
/// let pending = client.move_async(10, 20)?;
/// let outcome = pending.wait()?;
/// assert_eq!(outcome.response().message, "Moving to (10, 20)");
///
/// client.shutdown()?;
/// dispatcher.join()?;
/// # Ok::<(), robot_dispatch::error::ClientError>(())
/// ```
///
/// The client's blocking entry points and its transport's runtime must not be
/// used or dropped on a tokio worker thread. From async code, move the client
/// into `tokio::task::spawn_blocking` or keep it on a plain thread.
pub struct RobotControlClient {
    transport: Arc<dyn Transport>,
    queue: CompletionQueue,
    table: CallTable,
    default_options: CallOptions,
}

impl RobotControlClient {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            queue: CompletionQueue::new(),
            table: CallTable::new(),
            default_options: CallOptions::default(),
        }
    }

    /// Client whose transport hosts `service` in this process.
    pub fn in_process(service: Arc<dyn RobotControl>, worker_threads: usize) -> ClientResult<Self> {
        let transport = InProcessTransport::new(service, worker_threads)?;
        Ok(Self::new(Arc::new(transport)))
    }

    /// Build the transport described by `config` and connect it.
    pub fn from_config(config: &ClientConfig) -> ClientResult<Self> {
        let transport: Arc<dyn Transport> = match config.endpoint.transport {
            TransportKind::InProcess => Arc::new(InProcessTransport::new(
                Arc::new(RobotController::new()),
                config.runtime.worker_threads,
            )?),
            TransportKind::Tcp => Arc::new(TcpTransport::connect(
                &config.endpoint.address,
                config.endpoint.connect_timeout(),
                config.runtime.worker_threads,
            )?),
        };

        info!(
            transport = transport.name(),
            endpoint = transport.endpoint(),
            "Robot control client ready"
        );
        Ok(Self::new(transport).with_default_options(config.endpoint.default_call_options()))
    }

    #[must_use]
    pub fn with_default_options(mut self, options: CallOptions) -> Self {
        self.default_options = options;
        self
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn queue(&self) -> &CompletionQueue {
        &self.queue
    }

    /// Calls issued through the dispatcher path that have not completed yet.
    pub fn outstanding(&self) -> usize {
        self.table.len()
    }

    // ===================================================================================
    // DISPATCHER LIFECYCLE
    // ===================================================================================

    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(self.queue.clone(), self.table.clone())
    }

    /// Start the dispatcher loop on its own thread.
    pub fn spawn_dispatcher(&self, config: &DispatcherConfig) -> ClientResult<DispatcherHandle> {
        self.dispatcher().spawn(config)
    }

    /// Run the dispatcher loop on the current thread until [`shutdown`](Self::shutdown).
    pub fn run(&self) -> DispatchSummary {
        self.dispatcher().run()
    }

    /// Shut down the completion queue. Call once, after the last call has
    /// been issued; then join the dispatcher.
    pub fn shutdown(&self) -> ClientResult<()> {
        info!(outstanding = self.outstanding(), "Shutting down completion queue");
        self.queue.shutdown()
    }

    // ===================================================================================
    // BLOCKING CALLS
    // ===================================================================================

    /// Blocks the current thread until the reply arrives. Panics if called
    /// from inside an async runtime.
    pub fn move_to(&self, x: i32, y: i32) -> CallOutcome<MoveResponse> {
        self.call_blocking(MoveRequest { x, y }.into(), &self.default_options)
    }

    /// Blocks like [`move_to`](Self::move_to).
    pub fn stop(&self) -> CallOutcome<StopResponse> {
        self.call_blocking(StopRequest {}.into(), &self.default_options)
    }

    /// Must not be called from inside an async runtime.
    pub fn call_blocking<R: ReplyPayload>(
        &self,
        request: Request,
        options: &CallOptions,
    ) -> CallOutcome<R> {
        debug!(kind = %request.kind(), "Blocking call");
        let outcome = self.transport.unary(options, request).narrow::<R>();
        log_outcome(&outcome);
        outcome
    }

    // ===================================================================================
    // POLL-ONCE CALLS
    // ===================================================================================

    pub fn move_poll_once(&self, x: i32, y: i32) -> ClientResult<CallOutcome<MoveResponse>> {
        self.call_poll_once(MoveRequest { x, y }.into(), self.default_options.clone())
    }

    pub fn stop_poll_once(&self) -> ClientResult<CallOutcome<StopResponse>> {
        self.call_poll_once(StopRequest {}.into(), self.default_options.clone())
    }

    /// Start the call under the sentinel tag and dequeue its completion on
    /// this thread.
    ///
    /// Only valid while nothing else uses the queue: no dispatcher running and
    /// no other asynchronous call outstanding. If another completion is
    /// dequeued instead, it is put back and [`ClientError::TagMismatch`] is
    /// returned.
    pub fn call_poll_once<R: ReplyPayload>(
        &self,
        request: Request,
        options: CallOptions,
    ) -> ClientResult<CallOutcome<R>> {
        self.ensure_open()?;

        let kind = request.kind();
        let slot = ResultSlot::new();
        let responder = Responder::new(CallTag::POLL_SENTINEL, slot.clone(), self.queue.clone());
        debug!(%kind, "Poll-once call");
        self.transport.start(options, request, responder);

        let completion = match self.queue.next() {
            QueueEvent::Ready(completion) => completion,
            QueueEvent::Closed => return Err(ClientError::QueueClosed),
        };

        if !completion.tag.is_sentinel() {
            error!(
                got = %completion.tag,
                "Poll-once call dequeued another call's completion"
            );
            self.queue.post(completion.tag, completion.ok)?;
            return Err(ClientError::TagMismatch {
                expected: CallTag::POLL_SENTINEL,
                got: completion.tag,
            });
        }
        if !completion.ok {
            return Err(ClientError::DeliveryFailed {
                tag: CallTag::POLL_SENTINEL,
            });
        }

        let outcome = match slot.get() {
            Some(outcome) => outcome.clone().narrow::<R>(),
            None => CallOutcome::failure(RpcStatus::internal("completion posted without a result")),
        };
        log_outcome(&outcome);
        Ok(outcome)
    }

    // ===================================================================================
    // FIRE-AND-CONTINUE CALLS
    // ===================================================================================

    /// Fire and forget; the dispatcher logs the result.
    pub fn move_detached(&self, x: i32, y: i32) -> ClientResult<CallTag> {
        self.start_call(
            MoveRequest { x, y }.into(),
            self.default_options.clone(),
            CompletionAction::Print,
        )
    }

    pub fn stop_detached(&self) -> ClientResult<CallTag> {
        self.start_call(
            StopRequest {}.into(),
            self.default_options.clone(),
            CompletionAction::Print,
        )
    }

    /// Fire and await; the returned future resolves on the dispatcher thread.
    pub fn move_async(&self, x: i32, y: i32) -> ClientResult<CallFuture<MoveResponse>> {
        self.call_async(MoveRequest { x, y }.into(), self.default_options.clone())
    }

    pub fn stop_async(&self) -> ClientResult<CallFuture<StopResponse>> {
        self.call_async(StopRequest {}.into(), self.default_options.clone())
    }

    /// Fire and continue with `then`, run on the dispatcher thread.
    pub fn move_then<F>(&self, x: i32, y: i32, then: F) -> ClientResult<CallTag>
    where
        F: FnOnce(CallOutcome<MoveResponse>) + Send + 'static,
    {
        self.call_then(MoveRequest { x, y }.into(), self.default_options.clone(), then)
    }

    pub fn stop_then<F>(&self, then: F) -> ClientResult<CallTag>
    where
        F: FnOnce(CallOutcome<StopResponse>) + Send + 'static,
    {
        self.call_then(StopRequest {}.into(), self.default_options.clone(), then)
    }

    pub fn call_async<R: ReplyPayload>(
        &self,
        request: Request,
        options: CallOptions,
    ) -> ClientResult<CallFuture<R>> {
        let (sender, receiver) = oneshot::channel();
        let tag = self.start_call(request, options, CompletionAction::Fulfill(sender))?;
        Ok(CallFuture::new(tag, receiver))
    }

    pub fn call_then<R, F>(&self, request: Request, options: CallOptions, then: F) -> ClientResult<CallTag>
    where
        R: ReplyPayload,
        F: FnOnce(CallOutcome<R>) + Send + 'static,
    {
        self.start_call(
            request,
            options,
            CompletionAction::Invoke(Box::new(move |outcome| then(outcome.narrow::<R>()))),
        )
    }

    /// Register a call context under a fresh tag and start the call.
    pub fn start_call(
        &self,
        request: Request,
        options: CallOptions,
        action: CompletionAction,
    ) -> ClientResult<CallTag> {
        self.ensure_open()?;

        let tag = self.table.next_tag();
        let context = CallContext::new(tag, request.kind(), options.clone(), action);
        let responder = Responder::new(tag, context.slot(), self.queue.clone());
        self.table.register(context);

        debug!(%tag, kind = %request.kind(), "Starting asynchronous call");
        self.transport.start(options, request, responder);
        Ok(tag)
    }

    // ===================================================================================
    // CALLBACK CALLS
    // ===================================================================================

    pub fn move_callback(&self, x: i32, y: i32) -> ClientResult<CallOutcome<MoveResponse>> {
        self.call_with_callback(MoveRequest { x, y }.into(), self.default_options.clone())
    }

    pub fn stop_callback(&self) -> ClientResult<CallOutcome<StopResponse>> {
        self.call_with_callback(StopRequest {}.into(), self.default_options.clone())
    }

    /// Issue through the transport's direct callback path and block this
    /// thread until the callback has fired. Neither the completion queue nor
    /// the dispatcher is involved.
    ///
    /// Must not be called from inside an async runtime.
    pub fn call_with_callback<R: ReplyPayload>(
        &self,
        request: Request,
        options: CallOptions,
    ) -> ClientResult<CallOutcome<R>> {
        self.ensure_open()?;

        let kind = request.kind();
        let (done, signal) = oneshot::channel();
        self.transport.start_with_callback(
            options,
            request,
            Box::new(move |outcome| {
                let _ = done.send(outcome);
            }),
        );

        let outcome = signal
            .blocking_recv()
            .map_err(|_| ClientError::CallbackDropped { kind })?
            .narrow::<R>();
        log_outcome(&outcome);
        Ok(outcome)
    }

    fn ensure_open(&self) -> ClientResult<()> {
        if self.queue.is_shutdown() {
            error!("Call issued after the completion queue was shut down");
            return Err(ClientError::QueueShutdown);
        }
        Ok(())
    }
}

fn log_outcome<R: ReplyPayload>(outcome: &CallOutcome<R>) {
    if outcome.is_ok() {
        info!("{}", outcome.summary());
    } else {
        warn!("{}", outcome.summary());
    }
}
