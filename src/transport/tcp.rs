use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::runtime::Runtime;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{build_runtime, ReplyCallback, Responder, Transport};
use crate::call::{CallOptions, CallOutcome};
use crate::error::{ClientError, ClientResult};
use crate::service::{CallKind, Reply, Request};
use crate::status::RpcStatus;
use crate::wire::{decode_line, encode_line, ReplyFrame, RequestFrame};

struct PendingReply {
    kind: CallKind,
    callback: ReplyCallback,
    deadline_timer: Option<JoinHandle<()>>,
}

impl PendingReply {
    /// Deliver the outcome and stop the deadline timer, if one is armed.
    fn resolve(mut self, outcome: CallOutcome<Reply>) {
        if let Some(timer) = self.deadline_timer.take() {
            timer.abort();
        }
        (self.callback)(outcome);
    }

    fn fail(self, status: RpcStatus) {
        let kind = self.kind;
        self.resolve(CallOutcome::failed(kind, status));
    }
}

// The callback is `Send` but not `Sync`; the lock makes the map shareable.
type PendingReplies = Arc<DashMap<u64, Mutex<PendingReply>>>;

fn take_pending(pending: &PendingReplies, id: u64) -> Option<PendingReply> {
    pending.remove(&id).map(|(_, waiting)| waiting.into_inner())
}

/// Transport speaking newline-delimited JSON to a
/// [`RobotServer`](crate::server::RobotServer) over one TCP connection.
///
/// Requests are written by a writer task; a reader task matches reply frames
/// to pending calls by request id. Replies may arrive in any order. When the
/// connection drops, every pending call finishes with `UNAVAILABLE`.
pub struct TcpTransport {
    runtime: Runtime,
    endpoint: String,
    outbound: mpsc::UnboundedSender<RequestFrame>,
    pending: PendingReplies,
    next_id: AtomicU64,
    connected: Arc<AtomicBool>,
}

impl TcpTransport {
    /// Connect to `address` and start the connection's reader/writer tasks.
    pub fn connect(
        address: &str,
        connect_timeout: Duration,
        worker_threads: usize,
    ) -> ClientResult<Self> {
        let runtime = build_runtime(worker_threads, "robot-tcp")?;

        let stream = runtime
            .block_on(async {
                tokio::time::timeout(connect_timeout, TcpStream::connect(address)).await
            })
            .map_err(|_| {
                ClientError::service_unavailable(
                    address,
                    format!("connect timed out after {}ms", connect_timeout.as_millis()),
                )
            })?
            .map_err(|e| ClientError::service_unavailable(address, format!("Failed to connect: {}", e)))?;
        stream.set_nodelay(true)?;

        info!(endpoint = %address, "Connected to robot server");

        let (reader, writer) = stream.into_split();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let pending: PendingReplies = Arc::new(DashMap::new());
        let connected = Arc::new(AtomicBool::new(true));

        runtime.spawn(write_frames(
            writer,
            outbound_rx,
            pending.clone(),
            connected.clone(),
        ));
        runtime.spawn(read_replies(reader, pending.clone(), connected.clone()));

        Ok(Self {
            runtime,
            endpoint: address.to_string(),
            outbound,
            pending,
            next_id: AtomicU64::new(1),
            connected,
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Calls sent but not yet answered.
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    fn dispatch(&self, options: CallOptions, request: Request, callback: ReplyCallback) {
        let kind = request.kind();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let frame = RequestFrame::new(id, &options, request);
        self.pending.insert(
            id,
            Mutex::new(PendingReply {
                kind,
                callback,
                deadline_timer: None,
            }),
        );

        // Checked after the insert: the connection tasks clear the flag before
        // failing the pending map, so a call that sees the flag still set is
        // reached by that sweep.
        if !self.is_connected() {
            if let Some(waiting) = take_pending(&self.pending, id) {
                waiting.fail(RpcStatus::unavailable(format!(
                    "not connected to {}",
                    self.endpoint
                )));
            }
            return;
        }

        // The server enforces the deadline too; this timer covers a server
        // that never answers.
        if let Some(deadline) = options.deadline {
            let pending = self.pending.clone();
            let timer = self.runtime.spawn(async move {
                tokio::time::sleep(deadline).await;
                if let Some(mut waiting) = take_pending(&pending, id) {
                    debug!(id, "Call timed out waiting for reply");
                    waiting.deadline_timer = None;
                    waiting.fail(RpcStatus::deadline_exceeded(format!(
                        "no reply within {}ms",
                        deadline.as_millis()
                    )));
                }
            });
            match self.pending.get_mut(&id) {
                Some(mut entry) => entry.value_mut().get_mut().deadline_timer = Some(timer),
                None => timer.abort(),
            }
        }

        if self.outbound.send(frame).is_err() {
            if let Some(waiting) = take_pending(&self.pending, id) {
                waiting.fail(RpcStatus::unavailable("connection writer has stopped"));
            }
        }
    }

    #[cfg(test)]
    fn alive_tasks(&self) -> usize {
        self.runtime.metrics().num_alive_tasks()
    }
}

impl Transport for TcpTransport {
    fn name(&self) -> &'static str {
        "tcp"
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn unary(&self, options: &CallOptions, request: Request) -> CallOutcome<Reply> {
        let kind = request.kind();
        let (tx, rx) = oneshot::channel();
        self.dispatch(
            options.clone(),
            request,
            Box::new(move |outcome| {
                let _ = tx.send(outcome);
            }),
        );
        rx.blocking_recv()
            .unwrap_or_else(|_| CallOutcome::failed(kind, RpcStatus::not_delivered()))
    }

    fn start(&self, options: CallOptions, request: Request, responder: Responder) {
        self.dispatch(options, request, responder.into_callback());
    }

    fn start_with_callback(&self, options: CallOptions, request: Request, callback: ReplyCallback) {
        self.dispatch(options, request, callback);
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.connected.store(false, Ordering::Release);
        fail_pending(&self.pending, "transport closed");
    }
}

async fn write_frames(
    mut writer: OwnedWriteHalf,
    mut outbound: mpsc::UnboundedReceiver<RequestFrame>,
    pending: PendingReplies,
    connected: Arc<AtomicBool>,
) {
    while let Some(frame) = outbound.recv().await {
        let line = match encode_line(&frame) {
            Ok(line) => line,
            Err(e) => {
                error!(id = frame.id, error = %e, "Failed to encode request");
                continue;
            }
        };
        if let Err(e) = writer.write_all(line.as_bytes()).await {
            error!(error = %e, "Failed to write request");
            break;
        }
    }

    connected.store(false, Ordering::Release);
    fail_pending(&pending, "connection closed");
}

async fn read_replies(reader: OwnedReadHalf, pending: PendingReplies, connected: Arc<AtomicBool>) {
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => continue,
            Ok(Some(line)) => match decode_line::<ReplyFrame>(&line) {
                Ok(frame) => match take_pending(&pending, frame.id) {
                    Some(waiting) => {
                        let outcome = frame.into_outcome(waiting.kind);
                        waiting.resolve(outcome);
                    }
                    None => debug!(id = frame.id, "Reply for call that is no longer pending"),
                },
                Err(e) => warn!(error = %e, "Failed to parse reply frame"),
            },
            Ok(None) => {
                info!("Robot server closed the connection");
                break;
            }
            Err(e) => {
                error!(error = %e, "Error reading from robot server");
                break;
            }
        }
    }

    connected.store(false, Ordering::Release);
    fail_pending(&pending, "connection closed");
}

fn fail_pending(pending: &PendingReplies, reason: &str) {
    let ids: Vec<u64> = pending.iter().map(|entry| *entry.key()).collect();
    for id in ids {
        if let Some(waiting) = take_pending(pending, id) {
            waiting.fail(RpcStatus::unavailable(reason));
        }
    }
}
