//! Dispatcher behavior under out-of-order completion, many outstanding calls
//! and teardown, driven through the manual transport.

use futures::future::join_all;
use parking_lot::Mutex;
use proptest::prelude::*;
use robot_dispatch::call::CallTable;
use robot_dispatch::transport::PendingCall;
use robot_dispatch::{
    CallOutcome, ClientError, CompletionAction, CompletionQueue, DispatcherConfig, Dispatcher,
    ManualTransport, MoveResponse, RobotControlClient, RpcStatus, StatusCode,
};
use std::sync::Arc;
use std::time::Duration;

fn manual_client() -> (Arc<ManualTransport>, RobotControlClient) {
    let transport = Arc::new(ManualTransport::echo());
    let client = RobotControlClient::new(transport.clone());
    (transport, client)
}

fn permute<T>(mut items: Vec<T>, order: &[usize]) -> Vec<T> {
    let mut out = Vec::with_capacity(items.len());
    for &pick in order {
        if items.is_empty() {
            break;
        }
        out.push(items.remove(pick % items.len()));
    }
    out.append(&mut items);
    out
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Whatever order the transport finishes calls in, each future gets the
    /// reply for its own request.
    #[test]
    fn futures_resolve_with_their_own_reply(
        targets in prop::collection::vec((-1000i32..1000, -1000i32..1000), 1..24),
        order in prop::collection::vec(0usize..64, 0..24),
    ) {
        let (transport, client) = manual_client();
        let dispatcher = client.spawn_dispatcher(&DispatcherConfig::default()).unwrap();

        let futures: Vec<_> = targets
            .iter()
            .map(|&(x, y)| client.move_async(x, y).unwrap())
            .collect();

        for call in permute(transport.take_pending(), &order) {
            call.complete();
        }

        for (future, &(x, y)) in futures.into_iter().zip(&targets) {
            let outcome = future.wait().unwrap();
            prop_assert_eq!(outcome.response().message.clone(), format!("Moving to ({}, {})", x, y));
        }

        client.shutdown().unwrap();
        let summary = dispatcher.join().unwrap();
        prop_assert_eq!(summary.dispatched, targets.len() as u64);
        prop_assert_eq!(summary.abandoned, 0);
        prop_assert_eq!(client.outstanding(), 0);
    }
}

#[test]
fn hundred_detached_moves_all_dispatched() {
    let (transport, client) = manual_client();
    let dispatcher = client.spawn_dispatcher(&DispatcherConfig::default()).unwrap();

    let tags: Vec<_> = (0..100)
        .map(|i| client.move_detached(i, -i).unwrap())
        .collect();
    assert_eq!(client.outstanding(), 100);

    let mut unique = tags.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), 100);
    assert!(tags.iter().all(|tag| !tag.is_sentinel()));

    assert_eq!(transport.complete_all(), 100);
    while client.outstanding() > 0 {
        std::thread::sleep(Duration::from_millis(1));
    }

    client.shutdown().unwrap();
    let summary = dispatcher.join().unwrap();
    assert_eq!(summary.dispatched, 100);
    assert_eq!(summary.unknown_tags, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn awaited_move_resolves_on_dispatcher_thread() {
    let (transport, client) = manual_client();
    let dispatcher = client.spawn_dispatcher(&DispatcherConfig::default()).unwrap();

    let pending = client.move_async(10, 20).unwrap();
    let tag = pending.tag();
    transport.complete_all();

    let outcome = pending.await.unwrap();
    assert!(outcome.is_ok());
    assert_eq!(outcome.response().message, "Moving to (10, 20)");
    assert!(!tag.is_sentinel());

    client.shutdown().unwrap();
    tokio::task::spawn_blocking(move || dispatcher.join())
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_futures_joined() {
    let (transport, client) = manual_client();
    let dispatcher = client.spawn_dispatcher(&DispatcherConfig::default()).unwrap();

    let futures: Vec<_> = (0..10).map(|i| client.move_async(i, i).unwrap()).collect();
    let mut calls = transport.take_pending();
    calls.reverse();
    calls.into_iter().for_each(PendingCall::complete);

    let outcomes = join_all(futures).await;
    for (i, outcome) in outcomes.into_iter().enumerate() {
        assert_eq!(outcome.unwrap().response().message, format!("Moving to ({}, {})", i, i));
    }

    client.shutdown().unwrap();
    tokio::task::spawn_blocking(move || dispatcher.join())
        .await
        .unwrap()
        .unwrap();
}

#[test]
fn blocking_stop_against_failing_stub() {
    let client = RobotControlClient::new(Arc::new(ManualTransport::failing(
        RpcStatus::unavailable("connection refused"),
    )));

    let outcome = client.stop();
    assert_eq!(outcome.status().code(), StatusCode::Unavailable);
    assert_eq!(outcome.response().message, "");
    assert_eq!(
        outcome.summary(),
        "Stop RPC failed: UNAVAILABLE: connection refused"
    );
}

#[test]
fn failed_rpc_resolves_future_but_lost_completion_rejects() {
    let transport = Arc::new(ManualTransport::failing(RpcStatus::deadline_exceeded("slow")));
    let client = RobotControlClient::new(transport.clone());
    let dispatcher = client.spawn_dispatcher(&DispatcherConfig::default()).unwrap();

    let failed = client.move_async(1, 1).unwrap();
    let lost = client.move_async(2, 2).unwrap();
    let lost_tag = lost.tag();

    let mut calls = transport.take_pending().into_iter();
    calls.next().unwrap().complete();
    calls.next().unwrap().abandon();

    let outcome = failed.wait().unwrap();
    assert_eq!(outcome.status().code(), StatusCode::DeadlineExceeded);
    assert_eq!(outcome.response(), &MoveResponse::default());

    assert!(matches!(
        lost.wait(),
        Err(ClientError::DeliveryFailed { tag }) if tag == lost_tag
    ));

    client.shutdown().unwrap();
    let summary = dispatcher.join().unwrap();
    assert_eq!(summary.delivery_failures, 1);
}

#[test]
fn dispatcher_terminates_after_shutdown() {
    let (transport, client) = manual_client();
    let dispatcher = client.spawn_dispatcher(&DispatcherConfig::default()).unwrap();

    let abandoned = client.stop_async().unwrap();
    client.shutdown().unwrap();

    let summary = dispatcher.join().unwrap();
    assert_eq!(summary.abandoned, 1);
    assert!(abandoned.wait().is_err());

    // Completing after shutdown must not panic; the post is rejected and logged.
    transport.complete_all();
    assert!(matches!(client.move_detached(0, 0), Err(ClientError::QueueShutdown)));
}

#[test]
fn no_cross_talk_between_clients() {
    let (first_transport, first) = manual_client();
    let (second_transport, second) = manual_client();
    let first_dispatcher = first.spawn_dispatcher(&DispatcherConfig::default()).unwrap();
    let second_dispatcher = second.spawn_dispatcher(&DispatcherConfig::default()).unwrap();

    let a = first.move_async(1, 1).unwrap();
    let b = second.move_async(2, 2).unwrap();
    // Both clients issue their first tag, so the tags collide numerically.
    assert_eq!(a.tag(), b.tag());

    second_transport.complete_all();
    first_transport.complete_all();

    assert_eq!(a.wait().unwrap().response().message, "Moving to (1, 1)");
    assert_eq!(b.wait().unwrap().response().message, "Moving to (2, 2)");

    first.shutdown().unwrap();
    second.shutdown().unwrap();
    assert_eq!(first_dispatcher.join().unwrap().dispatched, 1);
    assert_eq!(second_dispatcher.join().unwrap().dispatched, 1);
}

#[test]
fn dispatcher_over_raw_queue_and_table() {
    let queue = CompletionQueue::new();
    let table = CallTable::new();
    let seen = Arc::new(Mutex::new(Vec::new()));

    for _ in 0..3 {
        let tag = table.next_tag();
        let sink = seen.clone();
        let context = robot_dispatch::call::CallContext::new(
            tag,
            robot_dispatch::CallKind::Stop,
            Default::default(),
            CompletionAction::Invoke(Box::new(move |outcome| {
                sink.lock().push((tag, outcome.to_string()));
            })),
        );
        context
            .slot()
            .fill(CallOutcome::failed(robot_dispatch::CallKind::Stop, RpcStatus::unavailable("down")));
        table.register(context);
        queue.post(tag, true).unwrap();
    }
    queue.shutdown().unwrap();

    let summary = Dispatcher::new(queue, table).run();
    assert_eq!(summary.dispatched, 3);
    assert!(seen
        .lock()
        .iter()
        .all(|(_, line)| line == "Stop RPC failed: UNAVAILABLE: down"));
}

#[test]
fn continuation_runs_when_call_is_abandoned_at_shutdown() {
    let (_transport, client) = manual_client();
    let dispatcher = client.spawn_dispatcher(&DispatcherConfig::default()).unwrap();

    let (tx, rx) = std::sync::mpsc::channel();
    client
        .move_then(1, 1, move |outcome| {
            tx.send(outcome.status().code()).unwrap();
        })
        .unwrap();
    client.shutdown().unwrap();

    let summary = dispatcher.join().unwrap();
    assert_eq!(summary.abandoned, 1);
    assert_eq!(
        rx.recv_timeout(Duration::from_secs(1)).unwrap(),
        StatusCode::Unavailable
    );
}
