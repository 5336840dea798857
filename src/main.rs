//! Packetforward CLI
//!
//! Run a forwarding client fed from stdin, or an echo relay for it to talk to.

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::{Parser, Subcommand};
use packetforward_client::{ClientConfig, ForwardingClient, DEFAULT_IDLE_TIMEOUT};
use packetforward_relay::{EchoHandler, RelayConfig, RelayServer, DEFAULT_LISTEN_ADDR};
use packetforward_transport::TcpDialer;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("GIT_HASH"),
    ", built ",
    env!("BUILD_TIME"),
    ")"
);

/// Packetforward - forward IP packets to a relay over a reconnecting stream
#[derive(Parser, Debug)]
#[command(name = "packetforward")]
#[command(about = "Packetforward - forward IP packets to a relay over a reconnecting stream")]
#[command(version = VERSION)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Forward each line of stdin as one packet and print whatever comes back
    #[command(long_about = r#"
Connect to a relay and forward each line read from stdin as one packet.
Packets received from the relay are printed to stdout, one per line.
The connection is dialed lazily and re-established whenever it fails.

EXAMPLES:
  # Talk to a local echo relay
  packetforward client --relay 127.0.0.1:9780

  # Tear idle links down after 30 seconds
  packetforward client --relay relay.example.com:9780 --idle-timeout 30

ENVIRONMENT VARIABLES:
  PACKETFORWARD_RELAY         Relay server address
  PACKETFORWARD_IDLE_TIMEOUT  Idle timeout in seconds
    "#)]
    Client {
        /// Relay server address (e.g., relay.example.com:9780)
        #[arg(long, env = "PACKETFORWARD_RELAY")]
        relay: String,

        /// Seconds a link may stay idle before it is torn down
        #[arg(long, env = "PACKETFORWARD_IDLE_TIMEOUT", default_value_t = DEFAULT_IDLE_TIMEOUT.as_secs())]
        idle_timeout: u64,
    },

    /// Run a relay that echoes every packet back to its client
    Relay {
        /// Address to listen on
        #[arg(long, env = "PACKETFORWARD_LISTEN", default_value = DEFAULT_LISTEN_ADDR)]
        listen: String,

        /// Seconds before an idle connection or detached session is dropped
        #[arg(long, env = "PACKETFORWARD_IDLE_TIMEOUT", default_value_t = DEFAULT_IDLE_TIMEOUT.as_secs())]
        idle_timeout: u64,
    },
}

/// Setup logging with the specified log level
fn setup_logging(verbose: bool) {
    let log_level = if verbose { "debug" } else { "info" };

    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    // stdout carries packets, so logs go to stderr
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_writer(std::io::stderr),
        )
        .with(filter)
        .init();
}

async fn run_client(relay: String, idle_timeout: Duration) -> Result<()> {
    let config = ClientConfig::builder()
        .idle_timeout(idle_timeout)
        .build()
        .context("Invalid client configuration")?;

    let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();
    let client = Arc::new(
        ForwardingClient::new(config, TcpDialer::new(relay.clone()), tx)
            .context("Failed to create forwarding client")?,
    );

    info!("Client ID: {}", client.id());
    info!("Relay: {}", relay);

    let printer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(packet) = rx.recv().await {
            let mut line = packet.to_vec();
            line.push(b'\n');
            if let Err(e) = stdout.write_all(&line).await {
                error!("Failed to write to stdout: {}", e);
                break;
            }
            let _ = stdout.flush().await;
        }
    });

    let mut state = client.subscribe_state();
    let watcher = tokio::spawn(async move {
        while state.changed().await.is_ok() {
            let current = *state.borrow_and_update();
            info!("Client {}", current);
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        let line = tokio::select! {
            _ = &mut ctrl_c => {
                info!("Received Ctrl+C, shutting down...");
                break;
            }
            line = lines.next_line() => line.context("Failed to read stdin")?,
        };
        let Some(line) = line else {
            info!("End of input");
            break;
        };
        if line.is_empty() {
            continue;
        }

        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Received Ctrl+C, shutting down...");
                break;
            }
            result = client.write(line.as_bytes()) => {
                result.context("Failed to forward packet")?;
            }
        }
    }

    client.close().await.context("Failed to close client")?;
    let stats = client.stats();
    info!(
        sent = stats.packets_sent,
        received = stats.packets_received,
        reconnects = stats.handshakes.saturating_sub(1),
        "Client stopped"
    );

    watcher.abort();
    drop(client);
    if let Err(e) = printer.await {
        warn!("Printer task failed: {}", e);
    }
    Ok(())
}

async fn run_relay(listen: String, idle_timeout: Duration) -> Result<()> {
    let server = RelayServer::bind(&listen)
        .await
        .with_context(|| format!("Failed to bind relay to {}", listen))?
        .with_config(RelayConfig {
            idle_timeout,
            ..RelayConfig::default()
        });

    let shutdown = CancellationToken::new();
    let serve = server.serve(Arc::new(EchoHandler), shutdown.clone());
    tokio::pin!(serve);

    tokio::select! {
        result = &mut serve => {
            result.context("Relay failed")?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
            shutdown.cancel();
            serve.await.context("Relay failed during shutdown")?;
        }
    }

    info!(sessions = server.sessions().count().await, "Relay stopped");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    setup_logging(cli.verbose);

    match cli.command {
        Commands::Client {
            relay,
            idle_timeout,
        } => {
            info!("Packetforward client starting...");
            run_client(relay, Duration::from_secs(idle_timeout)).await
        }
        Commands::Relay {
            listen,
            idle_timeout,
        } => {
            info!("Packetforward relay starting...");
            run_relay(listen, Duration::from_secs(idle_timeout)).await
        }
    }
}
