#![allow(clippy::doc_markdown)] // Allow technical terms like gRPC, JSON in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Robot Dispatch
//!
//! Asynchronous remote-call dispatcher for a robot control service.
//!
//! ## Overview
//!
//! The robot exposes two unary operations, `Move(x, y)` and `Stop()`. This
//! crate issues those calls and routes their results back to whoever is
//! waiting, without blocking the issuing thread. Completions are reported as
//! opaque tags on a [`CompletionQueue`]; a [`Dispatcher`] drains the queue and
//! hands each finished call to the context registered under its tag.
//!
//! ## Architecture
//!
//! ```text
//! caller ──issue──▶ RobotControlClient ──start──▶ Transport ──▶ robot service
//!                     │ register(tag)                 │
//!                     ▼                               │ finish → post(tag, ok)
//!                  CallTable ◀──take(tag)── Dispatcher ◀── CompletionQueue
//!                                             │
//!                                             └─▶ print / fulfill future / run callback
//! ```
//!
//! ## Call Styles
//!
//! - **Blocking**: the caller's thread waits for the reply
//! - **Poll-once**: the caller starts one call and dequeues its completion itself
//! - **Fire-and-continue**: returns at once; the dispatcher prints the result,
//!   fulfills a [`CallFuture`], or runs a continuation
//! - **Callback**: the transport invokes a callback directly, bypassing the queue
//!
//! ## Module Organization
//!
//! - [`completion_queue`] - Tag/ok completion queue with shutdown semantics
//! - [`call`] - Tags, per-call contexts, outcomes and futures
//! - [`dispatcher`] - The loop that routes completions to contexts
//! - [`client`] - Call issuer for every style
//! - [`transport`] - In-process, TCP and manual transports
//! - [`server`] - TCP host for a robot service
//! - [`service`] - Robot contract messages and the reference controller
//! - [`config`] - Configuration management
//! - [`error`] - Structured error handling
//!
//! ## Quick Start
//!
//! ```rust
//! use robot_dispatch::{DispatcherConfig, RobotControlClient, RobotController};
//! use std::sync::Arc;
//!
//! let client = RobotControlClient::in_process(Arc::new(RobotController::new()), 2)?;
//! let dispatcher = client.spawn_dispatcher(&DispatcherConfig::default())?;
//!
//! let moved = client.move_async(1, 1)?;
//! let stopped = client.stop_async()?;
//! assert_eq!(moved.wait()?.response().message, "Moving to (1, 1)");
//! assert!(stopped.wait()?.is_ok());
//!
//! client.shutdown()?;
//! let summary = dispatcher.join()?;
//! assert_eq!(summary.dispatched, 2);
//! # Ok::<(), robot_dispatch::ClientError>(())
//! ```

pub mod call;
pub mod client;
pub mod completion_queue;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod logging;
pub mod server;
pub mod service;
pub mod status;
pub mod transport;
pub mod wire;

pub use call::{CallFuture, CallOptions, CallOutcome, CallTag, CompletionAction};
pub use client::RobotControlClient;
pub use completion_queue::{Completion, CompletionQueue, NextStatus, QueueEvent};
pub use config::{ClientConfig, DispatcherConfig, TransportKind};
pub use dispatcher::{DispatchSummary, Dispatcher, DispatcherHandle};
pub use error::{ClientError, ClientResult};
pub use server::{RobotServer, ServerHandle};
pub use service::{
    CallKind, MoveRequest, MoveResponse, RobotControl, RobotController, StopRequest, StopResponse,
};
pub use status::{RpcStatus, StatusCode};
pub use transport::{InProcessTransport, ManualTransport, TcpTransport, Transport};
