//! # Robot Server
//!
//! Hosts a [`RobotControl`] implementation over TCP using the
//! [wire frames](crate::wire). One task accepts connections; each connection
//! gets a reader loop and a writer task, and every request runs in its own
//! task so slow calls do not hold up the ones behind them.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::error::{ClientError, ClientResult};
use crate::service::RobotControl;
use crate::transport::with_deadline;
use crate::wire::{decode_line, encode_line, ReplyFrame, RequestFrame};

#[derive(Debug, Default)]
struct ServerCounters {
    total_connections: AtomicU64,
    active_connections: AtomicUsize,
    requests_served: AtomicU64,
}

/// Server statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: usize,
    pub requests_served: u64,
}

/// Handle for stopping a running server and reading its statistics.
#[derive(Debug, Clone)]
pub struct ServerHandle {
    shutdown_tx: broadcast::Sender<()>,
    counters: Arc<ServerCounters>,
}

impl ServerHandle {
    /// Stop accepting connections and close the open ones.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    pub fn stats(&self) -> ServerStats {
        ServerStats {
            total_connections: self.counters.total_connections.load(Ordering::Relaxed),
            active_connections: self.counters.active_connections.load(Ordering::Relaxed),
            requests_served: self.counters.requests_served.load(Ordering::Relaxed),
        }
    }
}

/// TCP server for the robot control contract.
///
/// # Examples
///
/// ```rust,no_run
/// use robot_dispatch::server::RobotServer;
/// use robot_dispatch::service::RobotController;
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let server = RobotServer::bind("127.0.0.1:50051", Arc::new(RobotController::new())).await?;
///     let handle = server.handle();
///     tokio::spawn(async move { server.serve().await });
///
///     // ...
///     handle.shutdown();
///     Ok(())
/// }
/// ```
pub struct RobotServer {
    listener: TcpListener,
    service: Arc<dyn RobotControl>,
    shutdown_tx: broadcast::Sender<()>,
    counters: Arc<ServerCounters>,
}

impl RobotServer {
    pub async fn bind(address: &str, service: Arc<dyn RobotControl>) -> ClientResult<Self> {
        let listener = TcpListener::bind(address).await.map_err(|e| {
            ClientError::service_unavailable(address, format!("Failed to bind: {}", e))
        })?;
        let (shutdown_tx, _) = broadcast::channel(16);

        Ok(Self {
            listener,
            service,
            shutdown_tx,
            counters: Arc::new(ServerCounters::default()),
        })
    }

    pub fn local_addr(&self) -> ClientResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            shutdown_tx: self.shutdown_tx.clone(),
            counters: self.counters.clone(),
        }
    }

    /// Accept connections until [`ServerHandle::shutdown`] is called.
    pub async fn serve(self) -> ClientResult<()> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        info!(address = ?self.listener.local_addr().ok(), "Robot server listening");

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            self.counters.total_connections.fetch_add(1, Ordering::Relaxed);
                            self.counters.active_connections.fetch_add(1, Ordering::Relaxed);
                            info!(%peer, "New connection");

                            let service = self.service.clone();
                            let counters = self.counters.clone();
                            let shutdown_rx = self.shutdown_tx.subscribe();
                            tokio::spawn(async move {
                                handle_connection(stream, peer, service, counters.clone(), shutdown_rx).await;
                                counters.active_connections.fetch_sub(1, Ordering::Relaxed);
                            });
                        }
                        Err(e) => error!(error = %e, "Failed to accept connection"),
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Robot server shutting down");
                    break;
                }
            }
        }

        Ok(())
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    service: Arc<dyn RobotControl>,
    counters: Arc<ServerCounters>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let (reader, mut writer) = stream.into_split();
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<ReplyFrame>();

    let writer_task = tokio::spawn(async move {
        while let Some(frame) = reply_rx.recv().await {
            match encode_line(&frame) {
                Ok(line) => {
                    if let Err(e) = writer.write_all(line.as_bytes()).await {
                        error!(error = %e, "Failed to send reply");
                        break;
                    }
                }
                Err(e) => error!(id = frame.id, error = %e, "Failed to encode reply"),
            }
        }
    });

    let mut lines = BufReader::new(reader).lines();
    let mut shutting_down = false;
    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) if line.trim().is_empty() => {}
                    Ok(Some(line)) => match decode_line::<RequestFrame>(&line) {
                        Ok(frame) => {
                            let service = service.clone();
                            let counters = counters.clone();
                            let reply_tx = reply_tx.clone();
                            tokio::spawn(async move {
                                debug!(id = frame.id, kind = %frame.call.kind(), "Serving request");
                                let deadline = frame.deadline();
                                let result = with_deadline(deadline, service.handle(frame.call)).await;
                                counters.requests_served.fetch_add(1, Ordering::Relaxed);
                                let _ = reply_tx.send(ReplyFrame::from_result(frame.id, result));
                            });
                        }
                        Err(e) => warn!(%peer, error = %e, "Failed to parse request"),
                    },
                    Ok(None) => {
                        info!(%peer, "Connection closed by client");
                        break;
                    }
                    Err(e) => {
                        error!(%peer, error = %e, "Error reading from connection");
                        break;
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                info!(%peer, "Connection shutting down");
                shutting_down = true;
                break;
            }
        }
    }

    // On a client close, replies still being computed are flushed first.
    drop(reply_tx);
    if shutting_down {
        writer_task.abort();
    } else {
        let _ = writer_task.await;
    }
}
