//! Async UDP socket abstraction.
//!
//! [`Socket`] is a thin wrapper around `tokio::net::UdpSocket` that moves
//! whole protocol datagrams.  Decoding is left to the session, which drops
//! anything malformed; this module owns only byte I/O.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;
use tokio::net::UdpSocket;

use crate::packet::MAX_PACKET_SIZE;

/// Receive buffer size.  One byte larger than the largest legal packet so an
/// oversized datagram arrives with a length the codec rejects instead of
/// being silently truncated to a plausible one.
const RECV_BUF: usize = MAX_PACKET_SIZE + 1;

/// Errors that can arise from socket operations.
#[derive(Debug, Error)]
pub enum SocketError {
    #[error("socket I/O error: {0}")]
    Io(#[from] io::Error),
}

/// A datagram-oriented UDP socket.
///
/// All methods are `&self` so the socket can be shared between every
/// session of a server through an `Arc`.
#[derive(Debug)]
pub struct Socket {
    /// Address this socket is bound to (filled in after OS assigns ephemeral port).
    pub local_addr: SocketAddr,
    inner: UdpSocket,
}

impl Socket {
    /// Bind a new socket to `local_addr`.
    ///
    /// Passing `0.0.0.0:0` lets the OS choose an ephemeral port.
    pub async fn bind(local_addr: SocketAddr) -> Result<Self, SocketError> {
        let inner = UdpSocket::bind(local_addr).await?;
        let local_addr = inner.local_addr()?;
        Ok(Self { local_addr, inner })
    }

    /// Send one datagram without waiting.
    ///
    /// A full kernel buffer surfaces as `WouldBlock`; callers treat it as
    /// loss.
    pub fn try_send_to(&self, datagram: &[u8], dest: SocketAddr) -> io::Result<()> {
        self.inner.try_send_to(datagram, dest)?;
        Ok(())
    }

    /// Receive the next datagram and its sender.
    pub async fn recv_from(&self) -> Result<(Vec<u8>, SocketAddr), SocketError> {
        let mut buf = vec![0u8; RECV_BUF];
        let (n, addr) = self.inner.recv_from(&mut buf).await?;
        buf.truncate(n);
        Ok((buf, addr))
    }
}
