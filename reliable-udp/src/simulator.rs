//! Seeded network simulator for deterministic testing.
//!
//! Real networks drop, reorder, duplicate and corrupt packets.  To exercise
//! the reliability mechanisms without depending on actual network
//! conditions, a [`Simulator`] models one direction of a link between two
//! in-memory sessions and applies a configurable fault model:
//!
//! | Fault        | Description                                          |
//! |--------------|------------------------------------------------------|
//! | Packet loss  | Drop a packet with probability `loss_rate`.          |
//! | Reordering   | Let the packet overtake the one queued before it.    |
//! | Duplication  | Deliver a packet twice.                              |
//! | Corruption   | Flip one random bit.                                 |
//!
//! Every decision is drawn from a `StdRng` seeded from the config, so a
//! failing run replays exactly.

use std::collections::VecDeque;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;

use crate::connection::MemoryConnection;

/// Configuration for the fault-injection model.
///
/// All probabilities are in the range `[0.0, 1.0]`.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Probability that any given packet is silently dropped.
    pub loss_rate: f64,
    /// Probability that a packet swaps places with the previous one in flight.
    pub reorder_rate: f64,
    /// Probability that a packet is duplicated.
    pub duplicate_rate: f64,
    /// Probability that one bit of a packet is flipped.
    pub corrupt_rate: f64,
    /// RNG seed.
    pub seed: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        // No faults: a transparent pass-through.
        Self {
            loss_rate: 0.0,
            reorder_rate: 0.0,
            duplicate_rate: 0.0,
            corrupt_rate: 0.0,
            seed: 0,
        }
    }
}

impl SimulatorConfig {
    /// Same fault rate for every kind of fault.
    pub fn uniform(rate: f64, seed: u64) -> Self {
        Self {
            loss_rate: rate,
            reorder_rate: rate,
            duplicate_rate: rate,
            corrupt_rate: rate,
            seed,
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum SimulatorError {
    #[error("{name} must be within [0, 1], got {value}")]
    InvalidRate { name: &'static str, value: f64 },
}

/// Counters of what the simulator did to the traffic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimulatorStats {
    pub sent: u64,
    pub dropped: u64,
    pub reordered: u64,
    pub duplicated: u64,
    pub corrupted: u64,
}

/// One direction of a faulty link.
pub struct Simulator {
    config: SimulatorConfig,
    rng: StdRng,
    in_flight: VecDeque<Vec<u8>>,
    stats: SimulatorStats,
}

impl Simulator {
    pub fn new(config: SimulatorConfig) -> Result<Self, SimulatorError> {
        for (name, value) in [
            ("loss_rate", config.loss_rate),
            ("reorder_rate", config.reorder_rate),
            ("duplicate_rate", config.duplicate_rate),
            ("corrupt_rate", config.corrupt_rate),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(SimulatorError::InvalidRate { name, value });
            }
        }
        Ok(Self {
            rng: StdRng::seed_from_u64(config.seed),
            config,
            in_flight: VecDeque::new(),
            stats: SimulatorStats::default(),
        })
    }

    pub fn stats(&self) -> SimulatorStats {
        self.stats
    }

    /// Number of datagrams waiting for [`deliver`](Self::deliver).
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Put one datagram on the wire, applying the fault model.
    pub fn send(&mut self, mut datagram: Vec<u8>) {
        self.stats.sent += 1;
        if self.rng.random_bool(self.config.loss_rate) {
            self.stats.dropped += 1;
            log::trace!("[sim] dropped {} bytes", datagram.len());
            return;
        }
        if !datagram.is_empty() && self.rng.random_bool(self.config.corrupt_rate) {
            let bit = self.rng.random_range(0..datagram.len() * 8);
            datagram[bit / 8] ^= 1 << (bit % 8);
            self.stats.corrupted += 1;
        }
        if self.rng.random_bool(self.config.duplicate_rate) {
            self.in_flight.push_back(datagram.clone());
            self.stats.duplicated += 1;
        }
        self.in_flight.push_back(datagram);
        if self.in_flight.len() >= 2 && self.rng.random_bool(self.config.reorder_rate) {
            let last = self.in_flight.len() - 1;
            self.in_flight.swap(last, last - 1);
            self.stats.reordered += 1;
        }
    }

    /// Move everything `conn` has sent onto the wire.
    pub fn carry(&mut self, conn: &mut MemoryConnection) {
        for datagram in conn.take_sent() {
            self.send(datagram);
        }
    }

    /// Take every datagram that survived the link, in arrival order.
    pub fn deliver(&mut self) -> Vec<Vec<u8>> {
        self.in_flight.drain(..).collect()
    }
}
