//! Retransmission timer policy.
//!
//! The session is driven by an external periodic tick.  On every tick it
//! asks its [`RetransmitTimer`] whether the oldest unacknowledged packet has
//! been in flight for at least the current retransmit timeout (RTO).  If so
//! the whole send window is resent and the RTO doubles (exponential
//! back-off) up to `max_rto`.  Any acknowledgment that removes packets from
//! the send buffer restores the initial RTO and clears the retry count.
//!
//! After `max_retries` consecutive timeouts without progress the session
//! gives up on its peer.  A session with nothing in flight is never
//! retransmitted, so `max_retries` cannot reap a peer that vanished after
//! everything was acknowledged; `idle_timeout` bounds that case instead.

use std::time::{Duration, Instant};

/// Adjustable timeout parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerConfig {
    /// Period of the external tick that drives retransmission.
    pub interval: Duration,
    /// RTO used until the first timeout and after every acknowledged advance.
    pub initial_rto: Duration,
    /// Upper bound for the backed-off RTO.
    pub max_rto: Duration,
    /// Consecutive timeouts tolerated before the session is abandoned.
    pub max_retries: u32,
    /// How long a session with nothing outstanding may go without hearing
    /// from its peer.  `None` keeps quiet sessions forever.
    pub idle_timeout: Option<Duration>,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(100),
            initial_rto: Duration::from_millis(1000),
            max_rto: Duration::from_secs(60),
            max_retries: 6,
            idle_timeout: None,
        }
    }
}

/// What a tick should do with the send window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    /// Nothing outstanding, or the oldest packet is still within its RTO.
    Idle,
    /// Resend every unacknowledged packet.
    Retransmit,
    /// Retries exhausted; tear the session down.
    GiveUp,
}

/// Per-session retransmit state.
#[derive(Debug, Clone)]
pub struct RetransmitTimer {
    config: TimerConfig,
    current_rto: Duration,
    retries: u32,
}

impl RetransmitTimer {
    pub fn new(config: TimerConfig) -> Self {
        let current_rto = config.initial_rto;
        Self {
            config,
            current_rto,
            retries: 0,
        }
    }

    pub fn current_rto(&self) -> Duration {
        self.current_rto
    }

    /// Consecutive timeouts since the last acknowledged progress.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Decide what to do given when the oldest outstanding packet was last
    /// sent (`None` when nothing is outstanding).
    pub fn poll(&self, oldest_sent_at: Option<Instant>, now: Instant) -> Expiry {
        let Some(sent_at) = oldest_sent_at else {
            return Expiry::Idle;
        };
        if now.saturating_duration_since(sent_at) < self.current_rto {
            return Expiry::Idle;
        }
        if self.retries >= self.config.max_retries {
            Expiry::GiveUp
        } else {
            Expiry::Retransmit
        }
    }

    /// `true` once a peer last heard from at `last_heard` has been silent for
    /// longer than the idle timeout.
    pub fn idle_expired(&self, last_heard: Instant, now: Instant) -> bool {
        self.config
            .idle_timeout
            .is_some_and(|limit| now.saturating_duration_since(last_heard) >= limit)
    }

    /// Record a retransmission of the window and double the RTO.
    pub fn back_off(&mut self) {
        self.retries += 1;
        self.current_rto = (self.current_rto * 2).min(self.config.max_rto);
    }

    /// The peer acknowledged new data.
    pub fn reset(&mut self) {
        self.retries = 0;
        self.current_rto = self.config.initial_rto;
    }
}
