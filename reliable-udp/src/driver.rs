//! Tokio event loops hosting sessions over a real UDP socket.
//!
//! # Architecture
//!
//! ```text
//!  application                       driver task
//!  ───────────                       ───────────
//!  input  ──mpsc──▶ UdpConnection ──▶ Session ──▶ Socket::try_send_to
//!  output ◀─mpsc─── (staged bytes) ◀── Session ◀── Socket::recv_from
//!                                        ▲
//!                                        └── interval tick → on_timer
//! ```
//!
//! One task runs everything: `tokio::select!` waits for a datagram, an input
//! chunk or a timer tick, hands the event to the session, then drains any
//! bytes the session delivered.  Sessions themselves never await.
//!
//! - [`run_client`] drives one session to a fixed peer.
//! - [`run_server`] demultiplexes peers through a [`Registry`] and echoes
//!   every connection's stream back to it.

use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use crate::config::{Config, ConfigError};
use crate::connection::Connection;
use crate::registry::{Registry, SessionId};
use crate::session::{Session, Status};
use crate::socket::{Socket, SocketError};
use crate::state::Shutdown;

/// Most bytes staged between the application and a session in either
/// direction.
const STAGE_LIMIT: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error(transparent)]
    Socket(#[from] SocketError),
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

// ---------------------------------------------------------------------------
// UdpConnection
// ---------------------------------------------------------------------------

/// A [`Connection`] whose transport is a shared UDP socket and whose
/// application side is a pair of in-memory staging buffers filled and
/// drained by the driver.
#[derive(Debug)]
pub struct UdpConnection {
    socket: Arc<Socket>,
    peer: SocketAddr,
    staged_input: VecDeque<u8>,
    input_closed: bool,
    staged_output: Vec<u8>,
    output_closed: bool,
}

impl UdpConnection {
    pub fn new(socket: Arc<Socket>, peer: SocketAddr) -> Self {
        Self {
            socket,
            peer,
            staged_input: VecDeque::new(),
            input_closed: false,
            staged_output: Vec::new(),
            output_closed: false,
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn push_input(&mut self, chunk: &[u8]) {
        self.staged_input.extend(chunk.iter().copied());
    }

    pub fn close_input(&mut self) {
        self.input_closed = true;
    }

    /// `true` while the input side is open and has room for more bytes.
    pub fn wants_input(&self) -> bool {
        !self.input_closed && self.staged_input.len() < STAGE_LIMIT
    }

    pub fn take_output(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.staged_output)
    }

    pub fn output_closed(&self) -> bool {
        self.output_closed
    }
}

impl Connection for UdpConnection {
    fn send_datagram(&mut self, datagram: &[u8]) -> io::Result<()> {
        self.socket.try_send_to(datagram, self.peer)
    }

    fn input(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.staged_input.is_empty() {
            return if self.input_closed {
                Ok(0)
            } else {
                Err(io::ErrorKind::WouldBlock.into())
            };
        }
        let n = buf.len().min(self.staged_input.len());
        for (dst, src) in buf[..n].iter_mut().zip(self.staged_input.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }

    fn bufspace(&self) -> usize {
        if self.output_closed {
            return 0;
        }
        STAGE_LIMIT.saturating_sub(self.staged_output.len())
    }

    fn output(&mut self, data: &[u8]) -> io::Result<()> {
        self.staged_output.extend_from_slice(data);
        Ok(())
    }

    fn output_eof(&mut self) -> io::Result<()> {
        self.output_closed = true;
        Ok(())
    }

    fn close(&mut self) {
        log::debug!("[driver] connection to {} released", self.peer);
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Run one session against `peer` until it tears down.
///
/// Chunks received on `input` are sent to the peer; dropping the sender
/// ends the local stream.  The peer's stream is delivered on `output`, which
/// is dropped once the peer's EOF has been delivered.  Returns the final
/// shutdown flags: all set after an orderly close, some unset when the
/// session gave up on an unresponsive peer.
pub async fn run_client(
    socket: Socket,
    peer: SocketAddr,
    config: Config,
    mut input: mpsc::Receiver<Vec<u8>>,
    output: mpsc::Sender<Vec<u8>>,
) -> Result<Shutdown, DriverError> {
    config.validate()?;
    let socket = Arc::new(socket);
    let mut session = Session::new(UdpConnection::new(socket.clone(), peer), &config);
    let mut output = Some(output);
    let mut ticker = tokio::time::interval(config.timer.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    log::info!("[driver] client {} → {peer}", socket.local_addr);

    loop {
        let status = tokio::select! {
            result = socket.recv_from() => {
                let (datagram, from) = result?;
                if from != peer {
                    log::debug!("[driver] ignoring datagram from stranger {from}");
                    continue;
                }
                session.on_receive(&datagram)
            }
            chunk = input.recv(), if session.connection().wants_input() => {
                match chunk {
                    Some(chunk) => session.connection_mut().push_input(&chunk),
                    None => session.connection_mut().close_input(),
                }
                session.on_input_ready()
            }
            _ = ticker.tick() => session.on_timer(Instant::now()),
        };

        let status = match status {
            Status::Open => session.on_input_ready(),
            Status::Closed => Status::Closed,
        };
        let status = match status {
            Status::Open => drain_output(&mut session, &mut output).await,
            Status::Closed => {
                ship_output(&mut session, &mut output).await;
                Status::Closed
            }
        };

        if status == Status::Closed {
            let shutdown = session.shutdown();
            log::info!("[driver] client finished ({shutdown})");
            return Ok(shutdown);
        }
    }
}

/// Alternate between the session's output assembler and the application
/// channel until no more contiguous data is waiting.
async fn drain_output(
    session: &mut Session<UdpConnection>,
    output: &mut Option<mpsc::Sender<Vec<u8>>>,
) -> Status {
    loop {
        let status = session.on_output_ready();
        let moved = ship_output(session, output).await;
        if status == Status::Closed || !moved || session.receive_buffer().is_empty() {
            return status;
        }
    }
}

/// Hand staged output to the application.  Returns `true` if any bytes moved.
async fn ship_output(
    session: &mut Session<UdpConnection>,
    output: &mut Option<mpsc::Sender<Vec<u8>>>,
) -> bool {
    let chunk = session.connection_mut().take_output();
    let moved = !chunk.is_empty();
    let mut receiver_gone = false;
    if moved {
        if let Some(tx) = output {
            receiver_gone = tx.send(chunk).await.is_err();
        }
    }
    if receiver_gone {
        log::warn!("[driver] application stopped reading output");
    }
    if receiver_gone || session.connection().output_closed() {
        *output = None;
    }
    moved
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// Accept any number of peers on `socket` and echo each stream back to the
/// peer that sent it.  Runs until the socket fails.
pub async fn run_server(socket: Socket, config: Config) -> Result<(), DriverError> {
    config.validate()?;
    let socket = Arc::new(socket);
    let mut registry: Registry<UdpConnection> = Registry::new(config.clone());
    let mut ticker = tokio::time::interval(config.timer.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    log::info!("[driver] server listening on {}", socket.local_addr);

    loop {
        tokio::select! {
            result = socket.recv_from() => {
                let (datagram, from) = result?;
                let factory = |addr: &SocketAddr| Ok(UdpConnection::new(socket.clone(), *addr));
                match registry.demux(&from, &datagram, factory) {
                    Ok(Some(id)) => echo(&mut registry, id),
                    Ok(None) => {}
                    Err(e) => log::warn!("[driver] datagram from {from}: {e}"),
                }
            }
            _ = ticker.tick() => {
                registry.on_timer_tick(Instant::now());
                for id in registry.ids() {
                    echo(&mut registry, id);
                }
            }
        }
    }
}

/// Feed a session's delivered bytes back into its own input.
fn echo(registry: &mut Registry<UdpConnection>, id: SessionId) {
    loop {
        let input_room = match registry.get(id) {
            Some(session) => session.connection().wants_input(),
            None => return,
        };
        if input_room && !matches!(registry.on_output_ready(id), Ok(Status::Open)) {
            return;
        }
        let Some(session) = registry.get_mut(id) else {
            return;
        };
        let conn = session.connection_mut();
        let chunk = conn.take_output();
        conn.push_input(&chunk);
        if conn.output_closed() {
            conn.close_input();
        }
        if !matches!(registry.on_input_ready(id), Ok(Status::Open)) || chunk.is_empty() {
            return;
        }
    }
}
