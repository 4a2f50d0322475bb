//! Client and server talking over a real TCP connection on localhost.

use async_trait::async_trait;
use robot_dispatch::service::{MoveRequest, StopRequest};
use robot_dispatch::{
    CallOptions, ClientError, DispatcherConfig, MoveResponse, RobotControl, RobotControlClient,
    RobotController, RobotServer, RpcStatus, ServerHandle, StatusCode, StopResponse, TcpTransport,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;

struct TestServer {
    // Keeps the server's tasks alive.
    _runtime: Runtime,
    handle: ServerHandle,
    address: String,
}

fn start_server(service: Arc<dyn RobotControl>) -> TestServer {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap();

    let server = runtime
        .block_on(RobotServer::bind("127.0.0.1:0", service))
        .unwrap();
    let address = server.local_addr().unwrap().to_string();
    let handle = server.handle();
    runtime.spawn(server.serve());

    TestServer {
        _runtime: runtime,
        handle,
        address,
    }
}

fn connect(server: &TestServer) -> RobotControlClient {
    let transport = TcpTransport::connect(&server.address, Duration::from_secs(2), 1).unwrap();
    RobotControlClient::new(Arc::new(transport))
}

/// Robot that takes its time to acknowledge a move.
struct SlowRobot {
    delay: Duration,
}

#[async_trait]
impl RobotControl for SlowRobot {
    async fn move_to(&self, request: MoveRequest) -> Result<MoveResponse, RpcStatus> {
        tokio::time::sleep(self.delay).await;
        Ok(MoveResponse {
            message: format!("Moving to ({}, {})", request.x, request.y),
        })
    }

    async fn stop(&self, _request: StopRequest) -> Result<StopResponse, RpcStatus> {
        Ok(StopResponse {
            message: "Stopped".to_string(),
        })
    }
}

#[test]
fn blocking_calls_round_trip() {
    let server = start_server(Arc::new(RobotController::new()));
    let client = connect(&server);

    let moved = client.move_to(3, 4);
    assert!(moved.is_ok());
    assert_eq!(moved.response().message, "Moving to (3, 4)");

    let stopped = client.stop();
    assert_eq!(stopped.response().message, "Stopped at (3, 4)");

    let stats = server.handle.stats();
    assert_eq!(stats.total_connections, 1);
    assert_eq!(stats.requests_served, 2);
}

#[test]
fn every_style_over_tcp() {
    let server = start_server(Arc::new(RobotController::new()));
    let client = connect(&server);

    let polled = client.move_poll_once(10, 20).unwrap();
    assert_eq!(polled.response().message, "Moving to (10, 20)");

    let callback = client.stop_callback().unwrap();
    assert_eq!(callback.response().message, "Stopped at (10, 20)");

    let dispatcher = client.spawn_dispatcher(&DispatcherConfig::default()).unwrap();
    let futures: Vec<_> = (0..20).map(|i| client.move_async(i, i * 2).unwrap()).collect();
    for (i, future) in futures.into_iter().enumerate() {
        let outcome = future.wait().unwrap();
        assert_eq!(
            outcome.response().message,
            format!("Moving to ({}, {})", i, i * 2)
        );
    }

    client.shutdown().unwrap();
    let summary = dispatcher.join().unwrap();
    assert_eq!(summary.dispatched, 20);
    assert_eq!(summary.abandoned, 0);
}

#[test]
fn server_errors_reach_the_caller() {
    let server = start_server(Arc::new(RobotController::with_bound(100)));
    let client = connect(&server);

    let outcome = client.move_to(500, 0);
    assert_eq!(outcome.status().code(), StatusCode::InvalidArgument);
    assert_eq!(outcome.response(), &MoveResponse::default());
}

#[test]
fn deadline_exceeded_on_slow_robot() {
    let server = start_server(Arc::new(SlowRobot {
        delay: Duration::from_millis(500),
    }));
    let client = connect(&server)
        .with_default_options(CallOptions::new().with_deadline(Duration::from_millis(50)));

    let outcome = client.move_to(1, 1);
    assert_eq!(outcome.status().code(), StatusCode::DeadlineExceeded);

    // Calls without a deadline through the same connection still succeed.
    let stopped = client.stop();
    assert!(stopped.is_ok());
}

#[test]
fn server_shutdown_fails_pending_calls_unavailable() {
    let server = start_server(Arc::new(SlowRobot {
        delay: Duration::from_secs(5),
    }));
    let client = connect(&server);
    let dispatcher = client.spawn_dispatcher(&DispatcherConfig::default()).unwrap();

    let pending = client.move_async(7, 7).unwrap();
    std::thread::sleep(Duration::from_millis(100));
    server.handle.shutdown();

    let outcome = pending.wait().unwrap();
    assert_eq!(outcome.status().code(), StatusCode::Unavailable);

    // Once the connection is gone, new calls fail fast.
    let after = client.stop();
    assert_eq!(after.status().code(), StatusCode::Unavailable);

    client.shutdown().unwrap();
    dispatcher.join().unwrap();
}

#[test]
fn connect_to_closed_port_is_service_unavailable() {
    let address = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().to_string()
    };

    let result = TcpTransport::connect(&address, Duration::from_millis(500), 1);
    assert!(matches!(result, Err(ClientError::ServiceUnavailable { .. })));
}
