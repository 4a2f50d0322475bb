use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

use super::{CallOutcome, CallTag};
use crate::error::{ClientError, ClientResult};
use crate::service::{Reply, ReplyPayload};

/// Handle returned by fire-and-await calls.
///
/// Resolves exactly once, on the dispatcher thread, with the call's outcome.
/// A failed RPC still resolves with `Ok` and a failed status; the future only
/// resolves with an error when the completion was never delivered.
#[derive(Debug)]
pub struct CallFuture<R> {
    tag: CallTag,
    receiver: oneshot::Receiver<ClientResult<CallOutcome<Reply>>>,
    _response: PhantomData<fn() -> R>,
}

impl<R: ReplyPayload> CallFuture<R> {
    pub(crate) fn new(
        tag: CallTag,
        receiver: oneshot::Receiver<ClientResult<CallOutcome<Reply>>>,
    ) -> Self {
        Self {
            tag,
            receiver,
            _response: PhantomData,
        }
    }

    pub fn tag(&self) -> CallTag {
        self.tag
    }

    /// Block the current thread until the call resolves.
    ///
    /// Must not be called from inside an async runtime; `.await` the future
    /// there instead.
    pub fn wait(self) -> ClientResult<CallOutcome<R>> {
        let tag = self.tag;
        Self::resolve(tag, self.receiver.blocking_recv())
    }

    /// Non-blocking check. Returns `None` while the call is outstanding.
    pub fn try_take(&mut self) -> Option<ClientResult<CallOutcome<R>>> {
        match self.receiver.try_recv() {
            Ok(result) => Some(result.map(|outcome| outcome.narrow::<R>())),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => {
                Some(Err(ClientError::DeliveryFailed { tag: self.tag }))
            }
        }
    }

    fn resolve(
        tag: CallTag,
        received: Result<ClientResult<CallOutcome<Reply>>, oneshot::error::RecvError>,
    ) -> ClientResult<CallOutcome<R>> {
        match received {
            Ok(result) => result.map(|outcome| outcome.narrow::<R>()),
            Err(_) => Err(ClientError::DeliveryFailed { tag }),
        }
    }
}

impl<R: ReplyPayload> Future for CallFuture<R> {
    type Output = ClientResult<CallOutcome<R>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let tag = self.tag;
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|received| Self::resolve(tag, received))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::{MoveResponse, StopResponse};

    #[test]
    fn test_await_resolves_narrowed_outcome() {
        let (tx, rx) = oneshot::channel();
        let future: CallFuture<MoveResponse> = CallFuture::new(CallTag::from_raw(1), rx);

        tx.send(Ok(CallOutcome::success(Reply::Move(MoveResponse {
            message: "Moving to (10, 20)".to_string(),
        }))))
        .unwrap();

        let outcome = tokio_test::block_on(future).unwrap();
        assert_eq!(outcome.response().message, "Moving to (10, 20)");
    }

    #[test]
    fn test_dropped_sender_is_delivery_failure() {
        let (tx, rx) = oneshot::channel::<ClientResult<CallOutcome<Reply>>>();
        let future: CallFuture<StopResponse> = CallFuture::new(CallTag::from_raw(8), rx);
        drop(tx);

        assert!(matches!(
            future.wait(),
            Err(ClientError::DeliveryFailed { tag }) if tag == CallTag::from_raw(8)
        ));
    }

    #[test]
    fn test_try_take_pending_then_ready() {
        let (tx, rx) = oneshot::channel();
        let mut future: CallFuture<StopResponse> = CallFuture::new(CallTag::from_raw(2), rx);
        assert!(future.try_take().is_none());

        tx.send(Ok(CallOutcome::success(Reply::Stop(StopResponse {
            message: "Stopped at (0, 0)".to_string(),
        }))))
        .unwrap();

        let outcome = future.try_take().unwrap().unwrap();
        assert!(outcome.is_ok());
    }
}
