//! Sequence-ordered packet buffer shared by the send and receive paths.
//!
//! [`PacketBuffer`] keeps [`Entry`] values sorted ascending by sequence
//! number in a `VecDeque`, so removing the earliest entry is O(1) and
//! splicing after an anchor is a single `insert`.
//!
//! - As a **send buffer** it holds packets that were transmitted but not yet
//!   covered by a cumulative acknowledgment.
//! - As a **receive buffer** it holds packets not yet delivered to the
//!   application: a contiguous prefix below the receiver's expected
//!   sequence number, followed by a possibly gapped suffix.
//!
//! [`PacketBuffer::serialize_contiguous`] is the output assembler: it turns
//! the packet-granular receive buffer into a contiguous byte run sized to
//! whatever the application sink can take.

use std::collections::VecDeque;
use std::time::Instant;

use thiserror::Error;

use crate::packet::DataPacket;

/// One buffered packet plus its delivery and transmission bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub packet: DataPacket,
    /// Payload bytes already handed to the application (receive side).
    pub offset: usize,
    /// Number of times this packet has been transmitted (send side).
    pub tx_count: u32,
    /// Time of the most recent transmission (send side).
    pub sent_at: Option<Instant>,
}

impl Entry {
    pub fn new(packet: DataPacket) -> Self {
        Self {
            packet,
            offset: 0,
            tx_count: 0,
            sent_at: None,
        }
    }

    pub fn seqno(&self) -> u32 {
        self.packet.seqno
    }

    /// Payload bytes not yet delivered.
    pub fn remaining(&self) -> &[u8] {
        &self.packet.payload[self.offset.min(self.packet.payload.len())..]
    }
}

/// Errors returned by buffer mutations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BufferError {
    #[error("no buffered packet has sequence number {0}")]
    NotFound(u32),
    #[error("sequence number {0} is already buffered")]
    Duplicate(u32),
    #[error("anchor {index} is out of bounds for a buffer of {len} packets")]
    OutOfBounds { index: usize, len: usize },
}

/// Outcome of [`PacketBuffer::serialize_contiguous`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Drained {
    /// Bytes copied into the output slice.
    pub written: usize,
    /// Leading entries whose payload was copied completely.
    pub consumed: usize,
    /// New delivery offset of the entry after the consumed ones, when it
    /// was only partly copied.
    pub partial: Option<usize>,
}

#[derive(Debug, Default)]
pub struct PacketBuffer {
    entries: VecDeque<Entry>,
}

impl PacketBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of buffered packets.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn front(&self) -> Option<&Entry> {
        self.entries.front()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Entry> {
        self.entries.iter_mut()
    }

    pub fn contains(&self, seqno: u32) -> bool {
        self.position(seqno).is_some()
    }

    fn position(&self, seqno: u32) -> Option<usize> {
        self.entries.iter().position(|e| e.seqno() == seqno)
    }

    /// Remove and return the earliest entry; `None` on an empty buffer.
    pub fn remove_head(&mut self) -> Option<Entry> {
        self.entries.pop_front()
    }

    /// Splice `entry` immediately after position `index`.
    ///
    /// On an empty buffer the entry becomes the sole element regardless of
    /// `index`.
    pub fn insert_after(&mut self, index: usize, entry: Entry) -> Result<(), BufferError> {
        if self.entries.is_empty() {
            self.entries.push_back(entry);
            return Ok(());
        }
        if index >= self.entries.len() {
            return Err(BufferError::OutOfBounds {
                index,
                len: self.entries.len(),
            });
        }
        self.entries.insert(index + 1, entry);
        Ok(())
    }

    /// Splice `entry` after the first entry whose sequence number is `seqno`.
    pub fn insert_after_seqno(&mut self, entry: Entry, seqno: u32) -> Result<(), BufferError> {
        match self.position(seqno) {
            Some(index) => self.insert_after(index, entry),
            None => Err(BufferError::NotFound(seqno)),
        }
    }

    pub fn append(&mut self, entry: Entry) {
        self.entries.push_back(entry);
    }

    /// Insert `entry` where it keeps the buffer ascending by sequence number.
    ///
    /// Returns the index it landed at.
    pub fn insert_ordered(&mut self, entry: Entry) -> Result<usize, BufferError> {
        let seqno = entry.seqno();
        // Arrivals are mostly in order, so search from the tail.
        let mut index = self.entries.len();
        while index > 0 {
            let prev = self.entries[index - 1].seqno();
            if prev == seqno {
                return Err(BufferError::Duplicate(seqno));
            }
            if prev < seqno {
                break;
            }
            index -= 1;
        }
        self.entries.insert(index, entry);
        Ok(index)
    }

    /// Drop every leading entry below the cumulative acknowledgment value
    /// `cumulative`.  Returns how many entries were removed.
    pub fn prune_acked(&mut self, cumulative: u32) -> usize {
        let mut removed = 0;
        while let Some(front) = self.entries.front() {
            if front.seqno() >= cumulative {
                break;
            }
            self.entries.pop_front();
            removed += 1;
        }
        removed
    }

    /// Undelivered payload bytes across every entry.
    pub fn payload_bytes(&self) -> usize {
        self.entries.iter().map(|e| e.remaining().len()).sum()
    }

    /// First sequence number not covered by the gap-free run that starts at
    /// `expected`.  Equals `expected` when that packet has not arrived.
    pub fn contiguous_end(&self, expected: u32) -> u32 {
        let mut cursor = expected;
        for entry in self.entries.iter() {
            let seqno = entry.seqno();
            if seqno < cursor {
                continue;
            }
            if seqno != cursor {
                break;
            }
            cursor += 1;
        }
        cursor
    }

    /// Bytes that [`serialize_contiguous`](Self::serialize_contiguous) could
    /// deliver right now given an unlimited output slice.
    pub fn contiguous_bytes(&self, expected: u32) -> usize {
        let mut total = 0;
        self.walk_contiguous(expected, |entry| {
            total += entry.remaining().len();
            true
        });
        total
    }

    /// Copy deliverable payload bytes into `out`.
    ///
    /// Only entries below `expected` that form a gap-free run from the head
    /// are copied, and copying stops at the first EOF marker.  The buffer
    /// itself is not modified; pass the result to [`consume`](Self::consume).
    pub fn serialize_contiguous(&self, out: &mut [u8], expected: u32) -> Drained {
        let mut drained = Drained::default();
        self.walk_contiguous(expected, |entry| {
            let space = out.len() - drained.written;
            if space == 0 {
                return false;
            }
            let remaining = entry.remaining();
            let n = remaining.len().min(space);
            out[drained.written..drained.written + n].copy_from_slice(&remaining[..n]);
            drained.written += n;
            if n < remaining.len() {
                drained.partial = Some(entry.offset + n);
                return false;
            }
            drained.consumed += 1;
            true
        });
        drained
    }

    /// Apply a [`Drained`] result: remove fully copied entries and advance
    /// the offset of a partially copied one.
    pub fn consume(&mut self, drained: &Drained) {
        for _ in 0..drained.consumed {
            self.entries.pop_front();
        }
        if let (Some(offset), Some(front)) = (drained.partial, self.entries.front_mut()) {
            front.offset = offset;
        }
    }

    fn walk_contiguous(&self, expected: u32, mut visit: impl FnMut(&Entry) -> bool) {
        let mut cursor: Option<u32> = None;
        for entry in self.entries.iter() {
            let seqno = entry.seqno();
            if seqno >= expected || entry.packet.is_eof() {
                break;
            }
            if cursor.is_some_and(|c| c != seqno) {
                break;
            }
            if !visit(entry) {
                break;
            }
            cursor = Some(seqno + 1);
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
