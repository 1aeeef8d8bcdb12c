//! Entry point for `reliable-udp`.
//!
//! Parses CLI arguments and dispatches into either **server** or **client** mode.
//! All actual protocol work is delegated to library modules; `main.rs` owns only
//! process setup (logging, argument parsing, stdio plumbing).

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;

use reliable_udp::config::Config;
use reliable_udp::driver;
use reliable_udp::socket::Socket;
use reliable_udp::timer::TimerConfig;

/// Reliable byte stream over UDP.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(flatten)]
    tuning: Tuning,
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Args)]
struct Tuning {
    /// Maximum unacknowledged packets in flight.
    #[arg(short, long, global = true, default_value_t = 8)]
    window: usize,
    /// Retransmission sweep interval in milliseconds.
    #[arg(long, global = true, default_value_t = 100)]
    tick_ms: u64,
    /// Initial retransmission timeout in milliseconds.
    #[arg(long, global = true, default_value_t = 1000)]
    rto_ms: u64,
    /// Ceiling for the backed-off retransmission timeout in milliseconds.
    #[arg(long, global = true, default_value_t = 60_000)]
    max_rto_ms: u64,
    /// Consecutive timeouts before a silent peer is abandoned.
    #[arg(long, global = true, default_value_t = 6)]
    max_retries: u32,
    /// Seconds a server session with nothing in flight may hear nothing
    /// from its peer before it is dropped (0 disables).
    #[arg(long, global = true, default_value_t = 300)]
    idle_secs: u64,
}

impl Tuning {
    fn config(&self) -> Config {
        Config {
            window: self.window,
            timer: TimerConfig {
                interval: Duration::from_millis(self.tick_ms),
                initial_rto: Duration::from_millis(self.rto_ms),
                max_rto: Duration::from_millis(self.max_rto_ms),
                max_retries: self.max_retries,
                idle_timeout: (self.idle_secs > 0).then(|| Duration::from_secs(self.idle_secs)),
            },
        }
    }
}

#[derive(Subcommand)]
enum Mode {
    /// Echo every incoming connection's stream back to its sender.
    Server {
        /// Local address to bind (e.g. 0.0.0.0:9000).
        #[arg(short, long, default_value = "0.0.0.0:9000")]
        bind: SocketAddr,
    },
    /// Send stdin to a server and write what comes back to stdout.
    Client {
        /// Remote server address (e.g. 127.0.0.1:9000).
        #[arg(short, long)]
        server: SocketAddr,
        /// Local address to bind.
        #[arg(short, long, default_value = "0.0.0.0:0")]
        bind: SocketAddr,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();
    let mut config = cli.tuning.config();
    config.validate().context("invalid tuning flags")?;

    match cli.mode {
        Mode::Server { bind } => {
            log::info!("Starting server on {bind}");
            let socket = Socket::bind(bind)
                .await
                .with_context(|| format!("binding {bind}"))?;
            driver::run_server(socket, config).await?;
        }
        Mode::Client { server, bind } => {
            log::info!("Starting client, connecting to {server}");
            // A client may sit quietly on stdin for as long as it likes.
            config.timer.idle_timeout = None;
            let socket = Socket::bind(bind)
                .await
                .with_context(|| format!("binding {bind}"))?;
            run_client(socket, server, config).await?;
        }
    }
    Ok(())
}

async fn run_client(socket: Socket, server: SocketAddr, config: Config) -> Result<()> {
    let (input_tx, input_rx) = mpsc::channel::<Vec<u8>>(16);
    let (output_tx, mut output_rx) = mpsc::channel::<Vec<u8>>(16);

    tokio::spawn(async move {
        let mut stdin = tokio::io::stdin();
        let mut buf = vec![0u8; 4096];
        loop {
            match stdin.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    if input_tx.send(buf[..n].to_vec()).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    log::warn!("stdin: {e}");
                    break;
                }
            }
        }
    });

    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(chunk) = output_rx.recv().await {
            stdout.write_all(&chunk).await?;
            stdout.flush().await?;
        }
        Ok::<_, std::io::Error>(())
    });

    let shutdown = driver::run_client(socket, server, config, input_rx, output_tx).await?;
    writer.await?.context("writing stdout")?;

    if !shutdown.is_complete() {
        log::error!("connection to {server} abandoned ({shutdown})");
        // The stdin reader may still be parked in a blocking read, which
        // would stall runtime shutdown.
        std::process::exit(1);
    }
    Ok(())
}
