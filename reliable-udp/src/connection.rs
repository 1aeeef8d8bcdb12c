//! The boundary between a session and the outside world.
//!
//! A [`Connection`] bundles the three services a session consumes:
//! - a datagram transport to its peer,
//! - a non-blocking application input source,
//! - an application output sink with backpressure.
//!
//! Each session exclusively owns one connection.  All methods return
//! immediately; a session never waits on its connection.
//!
//! [`MemoryConnection`] keeps everything in memory and is what the tests
//! drive.  [`crate::driver::UdpConnection`] is the UDP-backed implementation
//! used by the binary.

use std::collections::VecDeque;
use std::io;

/// Services a session calls into.
pub trait Connection {
    /// Hand one encoded packet to the transport.
    ///
    /// A failure is treated as packet loss; retransmission recovers.
    fn send_datagram(&mut self, datagram: &[u8]) -> io::Result<()>;

    /// Read application bytes into `buf`.
    ///
    /// `Ok(0)` means the input reached EOF, `Err(WouldBlock)` means no data
    /// is available right now.  Any other error is treated as EOF.
    fn input(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// How many bytes [`output`](Self::output) can accept right now.
    fn bufspace(&self) -> usize;

    /// Deliver in-order bytes; never called with more than
    /// [`bufspace`](Self::bufspace) bytes.
    fn output(&mut self, data: &[u8]) -> io::Result<()>;

    /// Signal that the peer's stream ended.
    fn output_eof(&mut self) -> io::Result<()>;

    /// Release the transport.  Called exactly once, at session teardown.
    fn close(&mut self) {}
}

/// In-memory connection: datagrams are queued for the caller to carry,
/// input is fed with [`push_input`](Self::push_input), output is collected.
#[derive(Debug)]
pub struct MemoryConnection {
    sent: VecDeque<Vec<u8>>,
    input: VecDeque<u8>,
    input_closed: bool,
    output: Vec<u8>,
    output_capacity: usize,
    output_closed: bool,
    close_calls: u32,
}

impl Default for MemoryConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryConnection {
    /// A connection whose output sink never applies backpressure.
    pub fn new() -> Self {
        Self::with_output_capacity(usize::MAX)
    }

    /// A connection whose output sink holds at most `capacity` bytes until
    /// drained with [`take_output`](Self::take_output).
    pub fn with_output_capacity(capacity: usize) -> Self {
        Self {
            sent: VecDeque::new(),
            input: VecDeque::new(),
            input_closed: false,
            output: Vec::new(),
            output_capacity: capacity,
            output_closed: false,
            close_calls: 0,
        }
    }

    pub fn push_input(&mut self, data: &[u8]) {
        self.input.extend(data.iter().copied());
    }

    /// Once the queued input is drained, further reads report EOF.
    pub fn close_input(&mut self) {
        self.input_closed = true;
    }

    /// Take every datagram sent since the last call, oldest first.
    pub fn take_sent(&mut self) -> Vec<Vec<u8>> {
        self.sent.drain(..).collect()
    }

    /// Bytes delivered so far and not yet taken.
    pub fn output_data(&self) -> &[u8] {
        &self.output
    }

    /// Drain delivered bytes, freeing sink capacity.
    pub fn take_output(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.output)
    }

    pub fn set_output_capacity(&mut self, capacity: usize) {
        self.output_capacity = capacity;
    }

    pub fn output_closed(&self) -> bool {
        self.output_closed
    }

    pub fn close_calls(&self) -> u32 {
        self.close_calls
    }
}

impl Connection for MemoryConnection {
    fn send_datagram(&mut self, datagram: &[u8]) -> io::Result<()> {
        self.sent.push_back(datagram.to_vec());
        Ok(())
    }

    fn input(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.input.is_empty() {
            return if self.input_closed {
                Ok(0)
            } else {
                Err(io::ErrorKind::WouldBlock.into())
            };
        }
        let n = buf.len().min(self.input.len());
        for (dst, src) in buf[..n].iter_mut().zip(self.input.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }

    fn bufspace(&self) -> usize {
        if self.output_closed {
            return 0;
        }
        self.output_capacity.saturating_sub(self.output.len())
    }

    fn output(&mut self, data: &[u8]) -> io::Result<()> {
        if self.output_closed {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "output already closed",
            ));
        }
        self.output.extend_from_slice(data);
        Ok(())
    }

    fn output_eof(&mut self) -> io::Result<()> {
        self.output_closed = true;
        Ok(())
    }

    fn close(&mut self) {
        self.close_calls += 1;
    }
}
