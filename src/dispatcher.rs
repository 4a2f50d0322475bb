//! # Completion Dispatcher
//!
//! The consumer side of a [`CompletionQueue`]. The dispatcher blocks on the
//! queue, and for every completion it moves the owning [`CallContext`] out of
//! the [`CallTable`] by tag and runs its completion action. The tag is the only
//! lookup key; completions are handled in the order the queue releases them,
//! which need not match the order calls were issued.
//!
//! ```text
//! loop {
//!     match queue.next() {
//!         Closed            => complete leftovers as undelivered, stop
//!         Ready(tag, ok)    => table.take(tag)?.complete(ok)
//!     }
//! }
//! ```
//!
//! [`CallContext`]: crate::call::CallContext

use chrono::{DateTime, Utc};
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

use crate::call::CallTable;
use crate::completion_queue::{Completion, CompletionQueue, QueueEvent};
use crate::config::DispatcherConfig;
use crate::error::{ClientError, ClientResult};
use crate::logging::{log_call_operation, log_error};

/// What one dispatcher run did, returned when its loop ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchSummary {
    /// Completions routed to a registered call
    pub dispatched: u64,
    /// Of those, completions the transport reported as not delivered
    pub delivery_failures: u64,
    /// Completions whose tag had no registered call
    pub unknown_tags: u64,
    /// Calls still registered when the queue closed
    pub abandoned: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl DispatchSummary {
    fn new() -> Self {
        Self {
            dispatched: 0,
            delivery_failures: 0,
            unknown_tags: 0,
            abandoned: 0,
            started_at: Utc::now(),
            finished_at: None,
        }
    }
}

/// Drains one completion queue into the contexts of one call table.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    queue: CompletionQueue,
    table: CallTable,
}

impl Dispatcher {
    pub fn new(queue: CompletionQueue, table: CallTable) -> Self {
        Self { queue, table }
    }

    /// Run the loop on the current thread until the queue is shut down and
    /// drained.
    pub fn run(&self) -> DispatchSummary {
        let mut summary = DispatchSummary::new();
        debug!("Dispatcher loop started");

        while let QueueEvent::Ready(completion) = self.queue.next() {
            self.dispatch(completion, &mut summary);
        }

        let leftovers = self.table.drain();
        if !leftovers.is_empty() {
            warn!(
                count = leftovers.len(),
                "Queue closed with calls still registered; completing them as undelivered"
            );
            summary.abandoned = leftovers.len() as u64;
        }
        // Every registered call still gets its one completion.
        for context in leftovers {
            context.complete(false);
        }

        summary.finished_at = Some(Utc::now());
        info!(
            dispatched = summary.dispatched,
            delivery_failures = summary.delivery_failures,
            unknown_tags = summary.unknown_tags,
            abandoned = summary.abandoned,
            "Dispatcher loop finished"
        );
        summary
    }

    /// Run the loop on a dedicated, named thread.
    pub fn spawn(self, config: &DispatcherConfig) -> ClientResult<DispatcherHandle> {
        let thread = thread::Builder::new()
            .name(config.thread_name.clone())
            .spawn(move || self.run())
            .map_err(|e| ClientError::Runtime(format!("Failed to spawn dispatcher: {}", e)))?;

        Ok(DispatcherHandle { thread })
    }

    fn dispatch(&self, completion: Completion, summary: &mut DispatchSummary) {
        match self.table.take(completion.tag) {
            Some(context) => {
                summary.dispatched += 1;
                if !completion.ok {
                    summary.delivery_failures += 1;
                    log_call_operation(
                        "dispatch",
                        Some(completion.tag),
                        context.kind(),
                        "not_delivered",
                        None,
                    );
                }
                context.complete(completion.ok);
            }
            None => {
                summary.unknown_tags += 1;
                warn!(
                    tag = %completion.tag,
                    ok = completion.ok,
                    "Completion for unregistered tag ignored"
                );
            }
        }
    }
}

/// A dispatcher running on its own thread.
#[derive(Debug)]
pub struct DispatcherHandle {
    thread: JoinHandle<DispatchSummary>,
}

impl DispatcherHandle {
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Wait for the loop to end. Only returns once the queue has been shut
    /// down.
    pub fn join(self) -> ClientResult<DispatchSummary> {
        self.thread.join().map_err(|_| {
            log_error("dispatcher", "join", "dispatcher thread panicked", None);
            ClientError::Runtime("dispatcher thread panicked".to_string())
        })
    }
}
