//! # Completion Queue
//!
//! Thread-safe, unbounded queue of finished-operation notifications shared by
//! every asynchronous call issued on one client.
//!
//! Producers (transports, through a [`Responder`](crate::transport::Responder))
//! post a `(tag, ok)` pair when an operation finishes. A consumer, normally the
//! [`Dispatcher`](crate::dispatcher::Dispatcher), blocks in [`CompletionQueue::next`]
//! until a completion arrives or the queue is shut down. After shutdown the
//! queue drains what it already holds and then reports [`QueueEvent::Closed`]
//! on every further call instead of blocking.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error};

use crate::call::CallTag;
use crate::error::{ClientError, ClientResult};

/// One finished operation.
///
/// `ok` is false when the transport gave up on the call without producing a
/// result (the completion was not delivered); remote failures still arrive
/// with `ok == true` and a failed status on the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    pub tag: CallTag,
    pub ok: bool,
}

/// Result of a blocking dequeue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueEvent {
    Ready(Completion),
    Closed,
}

/// Result of a dequeue with a deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextStatus {
    Ready(Completion),
    Timeout,
    Closed,
}

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<Completion>,
    shutdown: bool,
    total_posted: u64,
}

#[derive(Debug, Default)]
struct Inner {
    state: Mutex<QueueState>,
    available: Condvar,
}

/// Shared completion queue handle. Clones refer to the same queue.
#[derive(Debug, Clone, Default)]
pub struct CompletionQueue {
    inner: Arc<Inner>,
}

impl CompletionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Post a completion for `tag`.
    ///
    /// Fails with [`ClientError::QueueShutdown`] once the queue has been shut
    /// down; the completion is dropped in that case.
    pub fn post(&self, tag: CallTag, ok: bool) -> ClientResult<()> {
        let mut state = self.inner.state.lock();
        if state.shutdown {
            error!(%tag, ok, "Completion posted after queue shutdown");
            return Err(ClientError::QueueShutdown);
        }

        state.pending.push_back(Completion { tag, ok });
        state.total_posted += 1;
        drop(state);

        self.inner.available.notify_one();
        Ok(())
    }

    /// Block until a completion is available or the queue is closed.
    pub fn next(&self) -> QueueEvent {
        let mut state = self.inner.state.lock();
        loop {
            if let Some(completion) = state.pending.pop_front() {
                return QueueEvent::Ready(completion);
            }
            if state.shutdown {
                return QueueEvent::Closed;
            }
            self.inner.available.wait(&mut state);
        }
    }

    /// Like [`next`](Self::next) but gives up after `timeout`.
    pub fn next_timeout(&self, timeout: Duration) -> NextStatus {
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.state.lock();
        loop {
            if let Some(completion) = state.pending.pop_front() {
                return NextStatus::Ready(completion);
            }
            if state.shutdown {
                return NextStatus::Closed;
            }
            if self
                .inner
                .available
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return match state.pending.pop_front() {
                    Some(completion) => NextStatus::Ready(completion),
                    None if state.shutdown => NextStatus::Closed,
                    None => NextStatus::Timeout,
                };
            }
        }
    }

    /// Signal shutdown and wake every blocked consumer.
    ///
    /// Must be called at most once, after the last call that will ever be
    /// issued on this queue. A second call returns
    /// [`ClientError::AlreadyShutdown`].
    pub fn shutdown(&self) -> ClientResult<()> {
        let mut state = self.inner.state.lock();
        if state.shutdown {
            error!("Completion queue shut down twice");
            return Err(ClientError::AlreadyShutdown);
        }
        state.shutdown = true;
        debug!(
            pending = state.pending.len(),
            total_posted = state.total_posted,
            "Completion queue shutting down"
        );
        drop(state);

        self.inner.available.notify_all();
        Ok(())
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.state.lock().shutdown
    }

    /// Completions posted but not yet dequeued.
    pub fn len(&self) -> usize {
        self.inner.state.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn total_posted(&self) -> u64 {
        self.inner.state.lock().total_posted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn tag(raw: u64) -> CallTag {
        CallTag::from_raw(raw)
    }

    #[test]
    fn test_fifo_release_order() {
        let queue = CompletionQueue::new();
        queue.post(tag(3), true).unwrap();
        queue.post(tag(1), false).unwrap();

        assert_eq!(
            queue.next(),
            QueueEvent::Ready(Completion { tag: tag(3), ok: true })
        );
        assert_eq!(
            queue.next(),
            QueueEvent::Ready(Completion { tag: tag(1), ok: false })
        );
        assert!(queue.is_empty());
    }

    #[test]
    fn test_shutdown_drains_before_closing() {
        let queue = CompletionQueue::new();
        queue.post(tag(1), true).unwrap();
        queue.shutdown().unwrap();

        assert!(matches!(queue.next(), QueueEvent::Ready(_)));
        assert_eq!(queue.next(), QueueEvent::Closed);
        assert_eq!(queue.next(), QueueEvent::Closed);
    }

    #[test]
    fn test_post_after_shutdown_is_rejected() {
        let queue = CompletionQueue::new();
        queue.shutdown().unwrap();

        assert!(matches!(
            queue.post(tag(1), true),
            Err(ClientError::QueueShutdown)
        ));
        assert_eq!(queue.total_posted(), 0);
    }

    #[test]
    fn test_double_shutdown_is_rejected() {
        let queue = CompletionQueue::new();
        queue.shutdown().unwrap();
        assert!(matches!(
            queue.shutdown(),
            Err(ClientError::AlreadyShutdown)
        ));
    }

    #[test]
    fn test_shutdown_wakes_blocked_consumer() {
        let queue = CompletionQueue::new();
        let consumer = {
            let queue = queue.clone();
            thread::spawn(move || queue.next())
        };

        thread::sleep(Duration::from_millis(20));
        queue.shutdown().unwrap();

        assert_eq!(consumer.join().unwrap(), QueueEvent::Closed);
    }

    #[test]
    fn test_post_wakes_blocked_consumer() {
        let queue = CompletionQueue::new();
        let consumer = {
            let queue = queue.clone();
            thread::spawn(move || queue.next())
        };

        thread::sleep(Duration::from_millis(20));
        queue.post(tag(9), true).unwrap();

        assert_eq!(
            consumer.join().unwrap(),
            QueueEvent::Ready(Completion { tag: tag(9), ok: true })
        );
    }

    #[test]
    fn test_next_timeout() {
        let queue = CompletionQueue::new();
        assert_eq!(
            queue.next_timeout(Duration::from_millis(10)),
            NextStatus::Timeout
        );

        queue.post(tag(2), true).unwrap();
        assert_eq!(
            queue.next_timeout(Duration::from_millis(10)),
            NextStatus::Ready(Completion { tag: tag(2), ok: true })
        );

        queue.shutdown().unwrap();
        assert_eq!(
            queue.next_timeout(Duration::from_millis(10)),
            NextStatus::Closed
        );
    }
}
