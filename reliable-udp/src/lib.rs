//! `reliable-udp`: a reliable, ordered, bidirectional byte stream over UDP.
//!
//! # Architecture
//!
//! ```text
//!  ┌────────────┐  datagrams  ┌─────────────┐  input / output  ┌─────────────┐
//!  │  Registry  │────────────▶│   Session   │◀────────────────▶│ Connection  │
//!  │ (slab, by  │  timer tick │ send buffer │   send_datagram  │ (UDP or in- │
//!  │  address)  │────────────▶│ recv buffer │─────────────────▶│   memory)   │
//!  └────────────┘             └──────┬──────┘                  └─────────────┘
//!                                    │ packets
//!                              ┌─────▼─────┐
//!                              │  Packet   │  (wire codec + checksum)
//!                              └───────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`packet`]: wire format and Internet checksum
//! - [`buffer`]: seqno-ordered packet buffer shared by both directions
//! - [`state`]: four-flag shutdown vector
//! - [`timer`]: retransmission timeout with exponential back-off
//! - [`session`]: per-connection sliding-window state machine
//! - [`registry`]: live sessions, demultiplexing and the retransmit sweep
//! - [`connection`]: services a session consumes (transport, input, output)
//! - [`config`]: window and timer settings
//! - [`socket`]: async UDP socket abstraction
//! - [`driver`]: tokio event loops for client and server
//! - [`simulator`]: seeded lossy/reordering link for tests

pub mod buffer;
pub mod config;
pub mod connection;
pub mod driver;
pub mod packet;
pub mod registry;
pub mod session;
pub mod simulator;
pub mod socket;
pub mod state;
pub mod timer;
