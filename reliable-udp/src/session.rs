//! Per-connection reliability state machine.
//!
//! A [`Session`] owns one [`Connection`], a send buffer of packets awaiting
//! acknowledgment, a receive buffer of packets awaiting delivery, the two
//! sequence cursors and the four-flag [`Shutdown`] vector.  It reacts to four
//! events, each handled synchronously to completion:
//!
//! | Event            | Handler                               |
//! |------------------|---------------------------------------|
//! | datagram arrived | [`Session::on_receive`]               |
//! | input readable   | [`Session::on_input_ready`]           |
//! | output writable  | [`Session::on_output_ready`]          |
//! | timer tick       | [`Session::on_timer`]                 |
//!
//! # Acknowledgments
//!
//! Acks are **cumulative**.  An ack-only packet carrying `k` confirms every
//! sequence number below `k`.  A data packet piggy-backs the highest
//! sequence number its sender has received in order, so it confirms
//! everything up to and including its `ackno`.
//!
//! # Teardown
//!
//! After every handler the shutdown vector is checked once; when all four
//! flags hold the session releases its buffers, closes its connection and
//! reports [`Status::Closed`].  Handlers invoked afterwards are no-ops.

use std::io;
use std::time::Instant;

use crate::buffer::{Entry, PacketBuffer};
use crate::config::Config;
use crate::connection::Connection;
use crate::packet::{DataPacket, Packet, MAX_PAYLOAD};
use crate::state::Shutdown;
use crate::timer::{Expiry, RetransmitTimer};

/// Whether a session survived the event it just handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Open,
    Closed,
}

pub struct Session<C> {
    conn: C,
    window: usize,
    send_buffer: PacketBuffer,
    receive_buffer: PacketBuffer,
    /// Sequence number the next outbound data packet will carry.
    next_seqno_to_send: u32,
    /// Lowest sequence number not yet received in order.
    next_seqno_expected: u32,
    /// Sequence number of the peer's EOF marker, once seen.
    peer_eof_seqno: Option<u32>,
    shutdown: Shutdown,
    timer: RetransmitTimer,
    /// When the last valid packet from the peer arrived.
    last_heard: Instant,
    closed: bool,
}

impl<C: Connection> Session<C> {
    pub fn new(conn: C, config: &Config) -> Self {
        Self {
            conn,
            window: config.window.max(1),
            send_buffer: PacketBuffer::new(),
            receive_buffer: PacketBuffer::new(),
            next_seqno_to_send: 1,
            next_seqno_expected: 1,
            peer_eof_seqno: None,
            shutdown: Shutdown::default(),
            timer: RetransmitTimer::new(config.timer.clone()),
            last_heard: Instant::now(),
            closed: false,
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn connection(&self) -> &C {
        &self.conn
    }

    pub fn connection_mut(&mut self) -> &mut C {
        &mut self.conn
    }

    pub fn next_seqno_to_send(&self) -> u32 {
        self.next_seqno_to_send
    }

    pub fn next_seqno_expected(&self) -> u32 {
        self.next_seqno_expected
    }

    pub fn shutdown(&self) -> Shutdown {
        self.shutdown
    }

    pub fn send_buffer(&self) -> &PacketBuffer {
        &self.send_buffer
    }

    pub fn receive_buffer(&self) -> &PacketBuffer {
        &self.receive_buffer
    }

    pub fn retries(&self) -> u32 {
        self.timer.retries()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    // -----------------------------------------------------------------------
    // Event handlers
    // -----------------------------------------------------------------------

    /// Handle one datagram from the peer.
    ///
    /// Corrupt, malformed and out-of-window datagrams are dropped without
    /// any effect on the session.
    pub fn on_receive(&mut self, datagram: &[u8]) -> Status {
        if self.closed {
            return Status::Closed;
        }
        let packet = match Packet::decode(datagram) {
            Ok(packet) => packet,
            Err(e) => {
                log::debug!("[rel] dropping {}-byte datagram: {e}", datagram.len());
                return Status::Open;
            }
        };
        self.last_heard = Instant::now();
        match packet {
            Packet::Ack { ackno } => {
                log::trace!("[rel] ← ACK ackno={ackno}");
                self.handle_ack(ackno);
            }
            Packet::Data(data) => self.handle_data(data),
        }
        self.check_teardown()
    }

    /// Pull application input into new data packets while the window has
    /// room.
    pub fn on_input_ready(&mut self) -> Status {
        if self.closed {
            return Status::Closed;
        }
        let now = Instant::now();

        while !self.shutdown.input_eof && self.send_buffer.len() < self.window {
            let mut packet = DataPacket::blank();
            packet.payload.resize(MAX_PAYLOAD, 0);

            let n = match self.conn.input(&mut packet.payload) {
                Ok(0) => {
                    self.shutdown.input_eof = true;
                    0
                }
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    log::warn!("[rel] input failed, treating as EOF: {e}");
                    self.shutdown.input_eof = true;
                    0
                }
            };

            packet.payload.truncate(n);
            packet.ackno = self.next_seqno_expected - 1;
            packet.seqno = self.next_seqno_to_send;
            self.next_seqno_to_send += 1;

            let mut entry = Entry::new(packet);
            transmit(&mut self.conn, &mut entry, now);
            log::debug!(
                "[rel] → DATA seqno={} len={} in_flight={}",
                entry.seqno(),
                n,
                self.send_buffer.len() + 1
            );
            self.send_buffer.append(entry);
        }

        self.check_teardown()
    }

    /// Deliver as much contiguous data as the output sink can take.
    pub fn on_output_ready(&mut self) -> Status {
        if self.closed {
            return Status::Closed;
        }
        self.flush_output();
        self.check_teardown()
    }

    /// Retransmit the send window if its oldest packet has timed out, or
    /// close a quiet session whose peer has gone silent for too long.
    pub fn on_timer(&mut self, now: Instant) -> Status {
        if self.closed {
            return Status::Closed;
        }
        let oldest = self.send_buffer.front().and_then(|e| e.sent_at);
        match self.timer.poll(oldest, now) {
            Expiry::Idle if oldest.is_none() && self.timer.idle_expired(self.last_heard, now) => {
                log::warn!("[rel] peer silent with nothing outstanding; closing idle session");
                self.teardown();
                return Status::Closed;
            }
            Expiry::Idle => {}
            Expiry::Retransmit => {
                log::debug!(
                    "[rel] timeout, retransmitting {} packet(s), rto={:?}",
                    self.send_buffer.len(),
                    self.timer.current_rto()
                );
                for entry in self.send_buffer.iter_mut() {
                    transmit(&mut self.conn, entry, now);
                }
                self.timer.back_off();
            }
            Expiry::GiveUp => {
                log::warn!(
                    "[rel] no acknowledgment after {} retries; giving up",
                    self.timer.retries()
                );
                self.teardown();
                return Status::Closed;
            }
        }
        self.check_teardown()
    }

    /// Tear the session down immediately, whatever its shutdown flags say.
    pub fn destroy(&mut self) {
        self.teardown();
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    /// Apply a cumulative acknowledgment: everything below `cumulative` has
    /// reached the peer.
    fn handle_ack(&mut self, cumulative: u32) {
        if cumulative > self.next_seqno_to_send {
            log::debug!(
                "[rel] ignoring ack {cumulative} for data never sent (next={})",
                self.next_seqno_to_send
            );
            return;
        }
        let removed = self.send_buffer.prune_acked(cumulative);
        if removed > 0 {
            self.timer.reset();
            log::debug!(
                "[rel] ack {cumulative} released {removed} packet(s), in_flight={}",
                self.send_buffer.len()
            );
        }
        if self.shutdown.input_eof && self.send_buffer.is_empty() && !self.shutdown.all_acked {
            self.shutdown.all_acked = true;
            log::debug!("[rel] all sent data acknowledged");
        }
    }

    fn handle_data(&mut self, data: DataPacket) {
        let seqno = data.seqno;
        self.handle_ack(data.ackno.saturating_add(1));

        let expected = self.next_seqno_expected;
        if seqno < expected || self.receive_buffer.contains(seqno) {
            log::trace!("[rel] ← duplicate DATA seqno={seqno}");
            self.send_ack();
            return;
        }

        // Undelivered packets count against the window, so a stalled output
        // sink eventually stops the peer.
        let base = self
            .receive_buffer
            .front()
            .map_or(expected, |e| e.seqno().min(expected));
        let window = u32::try_from(self.window).unwrap_or(u32::MAX);
        if seqno >= base.saturating_add(window) {
            log::debug!("[rel] ← DATA seqno={seqno} outside window starting at {base}");
            return;
        }
        if self.peer_eof_seqno.is_some_and(|eof| seqno > eof) {
            log::debug!("[rel] ← DATA seqno={seqno} after peer EOF");
            return;
        }

        let is_eof = data.is_eof();
        let len = data.payload.len();
        if self.receive_buffer.insert_ordered(Entry::new(data)).is_err() {
            return;
        }
        if is_eof {
            self.peer_eof_seqno = Some(seqno);
        }

        let advanced_to = self.receive_buffer.contiguous_end(expected);
        log::debug!("[rel] ← DATA seqno={seqno} len={len} expected={advanced_to}");
        self.send_ack_for(advanced_to);

        if advanced_to != expected {
            self.next_seqno_expected = advanced_to;
            if self.peer_eof_seqno.is_some_and(|eof| eof < advanced_to) {
                self.shutdown.peer_eof = true;
            }
            self.flush_output();
        }
    }

    fn send_ack(&mut self) {
        self.send_ack_for(self.next_seqno_expected);
    }

    fn send_ack_for(&mut self, ackno: u32) {
        match (Packet::Ack { ackno }).encode() {
            Ok(bytes) => {
                if let Err(e) = self.conn.send_datagram(&bytes) {
                    log::debug!("[rel] ack {ackno} not sent: {e}");
                }
            }
            Err(e) => log::warn!("[rel] could not encode ack {ackno}: {e}"),
        }
    }

    fn flush_output(&mut self) {
        let expected = self.next_seqno_expected;
        if self.shutdown.output_eof {
            // Output is gone; keep consuming so the peer can finish.
            self.receive_buffer.prune_acked(expected);
            return;
        }

        let space = self.conn.bufspace();
        let size = space.min(self.receive_buffer.contiguous_bytes(expected));
        if size > 0 {
            let mut buf = vec![0u8; size];
            let drained = self.receive_buffer.serialize_contiguous(&mut buf, expected);
            if let Err(e) = self.conn.output(&buf[..drained.written]) {
                log::warn!("[rel] output failed, discarding inbound stream: {e}");
                self.shutdown.output_eof = true;
                self.receive_buffer.prune_acked(expected);
                return;
            }
            self.receive_buffer.consume(&drained);
            log::trace!("[rel] delivered {} byte(s)", drained.written);
        } else if space == 0 {
            log::trace!("[rel] output full, deferring delivery");
        }

        let eof_next = self
            .receive_buffer
            .front()
            .is_some_and(|e| e.packet.is_eof() && e.seqno() < expected);
        if eof_next {
            self.receive_buffer.remove_head();
            if let Err(e) = self.conn.output_eof() {
                log::warn!("[rel] output EOF failed: {e}");
            }
            self.shutdown.output_eof = true;
            log::debug!("[rel] peer stream delivered to EOF");
        }
    }

    fn check_teardown(&mut self) -> Status {
        if !self.closed && self.shutdown.is_complete() {
            self.teardown();
        }
        if self.closed {
            Status::Closed
        } else {
            Status::Open
        }
    }

    fn teardown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.send_buffer.clear();
        self.receive_buffer.clear();
        self.conn.close();
        log::info!("[rel] session closed ({})", self.shutdown);
    }
}

/// Encode and send one buffered packet, stamping its transmission record.
fn transmit<C: Connection>(conn: &mut C, entry: &mut Entry, now: Instant) {
    entry.tx_count += 1;
    entry.sent_at = Some(now);
    match entry.packet.encode() {
        Ok(bytes) => {
            if let Err(e) = conn.send_datagram(&bytes) {
                log::debug!("[rel] send of seqno={} failed: {e}", entry.seqno());
            }
        }
        Err(e) => log::warn!("[rel] could not encode seqno={}: {e}", entry.seqno()),
    }
}
