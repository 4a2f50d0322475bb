//! # Robot Control CLI
//!
//! Issues robot control calls in any of the client's call styles, replays the
//! demo sequence, or hosts a robot server.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use robot_dispatch::logging::init_structured_logging;
use robot_dispatch::{
    ClientConfig, DispatcherHandle, RobotControlClient, RobotController, RobotServer,
    TransportKind,
};

#[derive(Parser, Debug)]
#[command(name = "robotctl")]
#[command(about = "Command-line client for the robot control service")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Configuration file path (default: ./robot-dispatch.toml or ~/.robot-dispatch/config.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Server address, overriding the configuration
    #[arg(short, long)]
    address: Option<String>,

    /// Run against a robot hosted inside this process
    #[arg(long)]
    in_process: bool,

    /// Per-call deadline in milliseconds
    #[arg(long)]
    deadline_ms: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the full call sequence: blocking, poll-once, dispatched and callback calls
    Demo,
    /// Move the robot to (x, y)
    Move {
        #[arg(short, long, allow_hyphen_values = true)]
        x: i32,
        #[arg(short, long, allow_hyphen_values = true)]
        y: i32,
        #[arg(short, long, value_enum, default_value_t = Style::Blocking)]
        style: Style,
    },
    /// Stop the robot
    Stop {
        #[arg(short, long, value_enum, default_value_t = Style::Blocking)]
        style: Style,
    },
    /// Host a robot server on the given address
    Serve {
        #[arg(long, default_value = "127.0.0.1:50051")]
        listen: String,
        /// Reject moves outside +/-BOUND on either axis
        #[arg(long)]
        bound: Option<i32>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Style {
    /// Wait for the reply on this thread
    Blocking,
    /// Start the call and dequeue its completion here
    Poll,
    /// Hand the call to the dispatcher, which prints the result
    Detached,
    /// Hand the call to the dispatcher and wait on its future
    Await,
    /// Let the transport invoke a callback directly
    Callback,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_structured_logging();

    let mut config = match &cli.config {
        Some(path) => ClientConfig::load_from_file(Path::new(path))?,
        None => ClientConfig::load()?,
    };
    if let Some(address) = cli.address {
        config.endpoint.address = address;
    }
    if cli.in_process {
        config.endpoint.transport = TransportKind::InProcess;
    }
    if let Some(deadline) = cli.deadline_ms {
        config.endpoint.default_deadline_ms = Some(deadline);
    }

    match cli.command {
        Commands::Serve { listen, bound } => serve(&listen, bound, config.runtime.worker_threads),
        Commands::Demo => demo(&config),
        Commands::Move { x, y, style } => {
            let client = RobotControlClient::from_config(&config)?;
            run_styled(&client, &config, style, |client| match style {
                Style::Blocking => Ok(client.move_to(x, y).summary()),
                Style::Poll => Ok(client.move_poll_once(x, y)?.summary()),
                Style::Detached => Ok(format!("Move issued as {}", client.move_detached(x, y)?)),
                Style::Await => Ok(client.move_async(x, y)?.wait()?.summary()),
                Style::Callback => Ok(client.move_callback(x, y)?.summary()),
            })
        }
        Commands::Stop { style } => {
            let client = RobotControlClient::from_config(&config)?;
            run_styled(&client, &config, style, |client| match style {
                Style::Blocking => Ok(client.stop().summary()),
                Style::Poll => Ok(client.stop_poll_once()?.summary()),
                Style::Detached => Ok(format!("Stop issued as {}", client.stop_detached()?)),
                Style::Await => Ok(client.stop_async()?.wait()?.summary()),
                Style::Callback => Ok(client.stop_callback()?.summary()),
            })
        }
    }
}

/// Run one call, with a dispatcher alongside when the style needs one.
fn run_styled<F>(client: &RobotControlClient, config: &ClientConfig, style: Style, call: F) -> Result<()>
where
    F: FnOnce(&RobotControlClient) -> Result<String>,
{
    let dispatcher = match style {
        Style::Detached | Style::Await => Some(client.spawn_dispatcher(&config.dispatcher)?),
        _ => None,
    };

    println!("{}", call(client)?);
    teardown(client, dispatcher, call_budget(config))
}

fn demo(config: &ClientConfig) -> Result<()> {
    let client = RobotControlClient::from_config(config)?;

    println!("Moving to (0, 0)");
    println!("{}", client.move_to(0, 0).summary());

    println!("Stopping robot");
    println!("{}", client.stop().summary());

    println!("Moving to (10, 20)");
    println!("{}", client.move_poll_once(10, 20)?.summary());

    let dispatcher = client.spawn_dispatcher(&config.dispatcher)?;

    client.move_detached(5, 5)?;
    let awaited = client.move_async(10, 20)?;
    let (tx, rx) = std::sync::mpsc::channel();
    client.stop_then(move |outcome| {
        let _ = tx.send(outcome.summary());
    })?;

    println!("{}", awaited.wait()?.summary());
    if let Ok(line) = rx.recv_timeout(call_budget(config)) {
        println!("{}", line);
    }

    println!("{}", client.move_callback(1, 2)?.summary());
    println!("{}", client.stop_callback()?.summary());

    teardown(&client, Some(dispatcher), call_budget(config))
}

/// Wait for dispatched calls to finish, then shut the queue down and join the
/// dispatcher.
fn teardown(
    client: &RobotControlClient,
    dispatcher: Option<DispatcherHandle>,
    budget: Duration,
) -> Result<()> {
    let Some(dispatcher) = dispatcher else {
        return Ok(());
    };

    let started = Instant::now();
    while client.outstanding() > 0 && started.elapsed() < budget {
        std::thread::sleep(Duration::from_millis(5));
    }
    if client.outstanding() > 0 {
        warn!(outstanding = client.outstanding(), "Shutting down with calls in flight");
    }

    client.shutdown()?;
    let summary = dispatcher.join()?;
    info!(
        dispatched = summary.dispatched,
        abandoned = summary.abandoned,
        "Dispatcher finished"
    );
    Ok(())
}

fn call_budget(config: &ClientConfig) -> Duration {
    Duration::from_millis(config.endpoint.default_deadline_ms.unwrap_or(5000))
}

fn serve(address: &str, bound: Option<i32>, worker_threads: usize) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(worker_threads.max(1))
        .thread_name("robot-server")
        .enable_all()
        .build()
        .context("Failed to build server runtime")?;

    runtime.block_on(async {
        let service = Arc::new(match bound {
            Some(bound) => RobotController::with_bound(bound),
            None => RobotController::new(),
        });
        let server = RobotServer::bind(address, service).await?;
        let handle = server.handle();
        println!("Robot server listening on {}", server.local_addr()?);

        let serving = tokio::spawn(server.serve());
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for ctrl-c")?;

        handle.shutdown();
        serving.await.context("Server task failed")??;

        let stats = handle.stats();
        info!(
            connections = stats.total_connections,
            requests = stats.requests_served,
            "Robot server stopped"
        );
        Ok::<(), anyhow::Error>(())
    })
}
