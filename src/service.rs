//! # Robot Control Service
//!
//! Request/response messages of the robot control contract and the
//! server-side [`RobotControl`] trait that transports host.
//!
//! The contract has two operations:
//!
//! - `Move(x, y) -> { message }`
//! - `Stop() -> { message }`
//!
//! While in flight, calls are type-erased into [`Request`] and [`Reply`] so a
//! single completion queue can carry both kinds. [`ReplyPayload`] narrows a
//! [`Reply`] back to the concrete response type at the call site.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info};

use crate::status::{RpcStatus, StatusCode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveRequest {
    pub x: i32,
    pub y: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveResponse {
    pub message: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopRequest {}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopResponse {
    pub message: String,
}

/// Which operation a call performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallKind {
    Move,
    Stop,
}

impl fmt::Display for CallKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallKind::Move => f.write_str("Move"),
            CallKind::Stop => f.write_str("Stop"),
        }
    }
}

/// A request of either kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Request {
    Move(MoveRequest),
    Stop(StopRequest),
}

impl Request {
    pub fn kind(&self) -> CallKind {
        match self {
            Request::Move(_) => CallKind::Move,
            Request::Stop(_) => CallKind::Stop,
        }
    }
}

impl From<MoveRequest> for Request {
    fn from(request: MoveRequest) -> Self {
        Request::Move(request)
    }
}

impl From<StopRequest> for Request {
    fn from(request: StopRequest) -> Self {
        Request::Stop(request)
    }
}

/// A response of either kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Reply {
    Move(MoveResponse),
    Stop(StopResponse),
}

impl Reply {
    /// The empty response for `kind`, used when a call failed.
    pub fn empty(kind: CallKind) -> Self {
        match kind {
            CallKind::Move => Reply::Move(MoveResponse::default()),
            CallKind::Stop => Reply::Stop(StopResponse::default()),
        }
    }

    pub fn kind(&self) -> CallKind {
        match self {
            Reply::Move(_) => CallKind::Move,
            Reply::Stop(_) => CallKind::Stop,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Reply::Move(response) => &response.message,
            Reply::Stop(response) => &response.message,
        }
    }
}

/// Concrete response types a [`Reply`] can be narrowed to.
pub trait ReplyPayload: Default + Send + 'static {
    const KIND: CallKind;

    fn from_reply(reply: Reply) -> Option<Self>;

    fn message(&self) -> &str;
}

impl ReplyPayload for MoveResponse {
    const KIND: CallKind = CallKind::Move;

    fn from_reply(reply: Reply) -> Option<Self> {
        match reply {
            Reply::Move(response) => Some(response),
            Reply::Stop(_) => None,
        }
    }

    fn message(&self) -> &str {
        &self.message
    }
}

impl ReplyPayload for StopResponse {
    const KIND: CallKind = CallKind::Stop;

    fn from_reply(reply: Reply) -> Option<Self> {
        match reply {
            Reply::Stop(response) => Some(response),
            Reply::Move(_) => None,
        }
    }

    fn message(&self) -> &str {
        &self.message
    }
}

/// Server side of the robot control contract.
///
/// Implementations are hosted by a transport ([`InProcessTransport`] or
/// [`RobotServer`]) and may be called concurrently from runtime threads.
///
/// [`InProcessTransport`]: crate::transport::InProcessTransport
/// [`RobotServer`]: crate::server::RobotServer
#[async_trait]
pub trait RobotControl: Send + Sync {
    async fn move_to(&self, request: MoveRequest) -> Result<MoveResponse, RpcStatus>;

    async fn stop(&self, request: StopRequest) -> Result<StopResponse, RpcStatus>;

    /// Route a type-erased request to the matching operation.
    async fn handle(&self, request: Request) -> Result<Reply, RpcStatus> {
        match request {
            Request::Move(request) => self.move_to(request).await.map(Reply::Move),
            Request::Stop(request) => self.stop(request).await.map(Reply::Stop),
        }
    }
}

#[derive(Debug, Default)]
struct RobotState {
    position: (i32, i32),
    moving: bool,
    moves_accepted: u64,
}

/// Default robot: tracks its target position and whether it is moving.
///
/// An optional bound rejects targets outside `[-bound, bound]` on either axis
/// with `INVALID_ARGUMENT`.
#[derive(Debug, Default)]
pub struct RobotController {
    state: Mutex<RobotState>,
    bound: Option<i32>,
}

impl RobotController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bound(bound: i32) -> Self {
        Self {
            state: Mutex::new(RobotState::default()),
            bound: Some(bound.abs()),
        }
    }

    pub fn position(&self) -> (i32, i32) {
        self.state.lock().position
    }

    pub fn is_moving(&self) -> bool {
        self.state.lock().moving
    }

    pub fn moves_accepted(&self) -> u64 {
        self.state.lock().moves_accepted
    }
}

#[async_trait]
impl RobotControl for RobotController {
    async fn move_to(&self, request: MoveRequest) -> Result<MoveResponse, RpcStatus> {
        if let Some(bound) = self.bound {
            if request.x.abs() > bound || request.y.abs() > bound {
                debug!(x = request.x, y = request.y, bound, "Rejecting move outside bounds");
                return Err(RpcStatus::new(
                    StatusCode::InvalidArgument,
                    format!("target ({}, {}) is outside +/-{}", request.x, request.y, bound),
                ));
            }
        }

        let mut state = self.state.lock();
        state.position = (request.x, request.y);
        state.moving = true;
        state.moves_accepted += 1;
        info!(x = request.x, y = request.y, "Robot moving");

        Ok(MoveResponse {
            message: format!("Moving to ({}, {})", request.x, request.y),
        })
    }

    async fn stop(&self, _request: StopRequest) -> Result<StopResponse, RpcStatus> {
        let mut state = self.state.lock();
        state.moving = false;
        let (x, y) = state.position;
        info!(x, y, "Robot stopped");

        Ok(StopResponse {
            message: format!("Stopped at ({}, {})", x, y),
        })
    }
}
