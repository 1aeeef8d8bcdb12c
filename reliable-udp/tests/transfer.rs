//! End-to-end transfers between two in-memory sessions.
//!
//! Datagrams are carried by hand or through a seeded [`Simulator`], and time
//! is advanced explicitly, so every test is deterministic.

use std::time::{Duration, Instant};

use reliable_udp::{
    config::Config,
    connection::MemoryConnection,
    packet::{DataPacket, Packet},
    session::{Session, Status},
    simulator::{Simulator, SimulatorConfig},
    timer::TimerConfig,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const TICK: Duration = Duration::from_millis(10);

fn config(window: usize, max_retries: u32) -> Config {
    Config {
        window,
        timer: TimerConfig {
            interval: TICK,
            initial_rto: Duration::from_millis(20),
            max_rto: Duration::from_millis(40),
            max_retries,
            idle_timeout: None,
        },
    }
}

fn data(seqno: u32, payload: &[u8]) -> Vec<u8> {
    DataPacket {
        ackno: 0,
        seqno,
        payload: payload.to_vec(),
    }
    .encode()
    .unwrap()
}

fn acks_sent(s: &mut Session<MemoryConnection>) -> Vec<u32> {
    s.connection_mut()
        .take_sent()
        .iter()
        .filter_map(|d| match Packet::decode(d) {
            Ok(Packet::Ack { ackno }) => Some(ackno),
            _ => None,
        })
        .collect()
}

fn permutations(items: &[usize]) -> Vec<Vec<usize>> {
    if items.len() <= 1 {
        return vec![items.to_vec()];
    }
    let mut out = Vec::new();
    for i in 0..items.len() {
        let mut rest = items.to_vec();
        let head = rest.remove(i);
        for mut tail in permutations(&rest) {
            tail.insert(0, head);
            out.push(tail);
        }
    }
    out
}

/// Two sessions joined by a faulty link in each direction.
struct Link {
    a: Session<MemoryConnection>,
    b: Session<MemoryConnection>,
    a_to_b: Simulator,
    b_to_a: Simulator,
    now: Instant,
}

impl Link {
    fn new(config: &Config, faults: SimulatorConfig) -> Self {
        let reverse = SimulatorConfig {
            seed: faults.seed.wrapping_add(1),
            ..faults.clone()
        };
        Self {
            a: Session::new(MemoryConnection::new(), config),
            b: Session::new(MemoryConnection::new(), config),
            a_to_b: Simulator::new(faults).unwrap(),
            b_to_a: Simulator::new(reverse).unwrap(),
            now: Instant::now(),
        }
    }

    /// One round: pull input, carry datagrams both ways, advance the clock.
    fn step(&mut self) {
        self.a.on_input_ready();
        self.b.on_input_ready();
        self.a_to_b.carry(self.a.connection_mut());
        self.b_to_a.carry(self.b.connection_mut());
        for datagram in self.a_to_b.deliver() {
            self.b.on_receive(&datagram);
        }
        for datagram in self.b_to_a.deliver() {
            self.a.on_receive(&datagram);
        }
        self.a.on_output_ready();
        self.b.on_output_ready();
        self.now += TICK;
        self.a.on_timer(self.now);
        self.b.on_timer(self.now);
    }

    fn run(&mut self, max_steps: usize) -> usize {
        for step in 0..max_steps {
            if self.a.is_closed() && self.b.is_closed() {
                return step;
            }
            self.step();
        }
        panic!("link still open after {max_steps} steps");
    }
}

fn pattern(len: usize, salt: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(31) ^ salt).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

/// Window 4; "AB", "CD", "EF" and EOF arrive in order 2, 1, 3, 4.
#[test]
fn reordered_stream_delivered_then_torn_down() {
    let mut s = Session::new(MemoryConnection::new(), &config(4, 6));
    s.connection_mut().close_input();
    assert_eq!(s.on_input_ready(), Status::Open);
    s.connection_mut().take_sent();

    let packets = [data(1, b"AB"), data(2, b"CD"), data(3, b"EF"), data(4, b"")];

    assert_eq!(s.on_receive(&packets[1]), Status::Open);
    assert_eq!(acks_sent(&mut s), vec![1]);
    assert!(s.connection().output_data().is_empty());

    assert_eq!(s.on_receive(&packets[0]), Status::Open);
    assert_eq!(acks_sent(&mut s), vec![3]);
    assert_eq!(s.connection().output_data(), b"ABCD");

    assert_eq!(s.on_receive(&packets[2]), Status::Open);
    assert_eq!(s.on_receive(&packets[3]), Status::Open);
    assert_eq!(acks_sent(&mut s), vec![4, 5]);
    assert_eq!(s.connection().output_data(), b"ABCDEF");
    assert!(s.connection().output_closed());

    // Our own EOF (seqno 1) acknowledged: every flag holds.
    let ack = Packet::Ack { ackno: 2 }.encode().unwrap();
    assert_eq!(s.on_receive(&ack), Status::Closed);
    assert_eq!(s.connection().close_calls(), 1);
    assert!(s.send_buffer().is_empty());
    assert!(s.receive_buffer().is_empty());
}

#[test]
fn any_arrival_order_yields_the_same_stream() {
    let packets = [data(1, b"AB"), data(2, b"CD"), data(3, b"EF"), data(4, b"")];
    for order in permutations(&[0, 1, 2, 3]) {
        let mut s = Session::new(MemoryConnection::new(), &config(4, 6));
        for &i in &order {
            s.on_receive(&packets[i]);
        }
        assert_eq!(s.connection().output_data(), b"ABCDEF", "order {order:?}");
        assert!(s.connection().output_closed(), "order {order:?}");
        assert_eq!(s.next_seqno_expected(), 5);
    }
}

#[test]
fn corrupt_packet_recovered_by_retransmission() {
    let cfg = config(4, 6);
    let mut a = Session::new(MemoryConnection::new(), &cfg);
    let mut b = Session::new(MemoryConnection::new(), &cfg);

    a.connection_mut().push_input(b"hello");
    a.on_input_ready();
    let mut sent = a.connection_mut().take_sent();
    assert_eq!(sent.len(), 1);
    let last = sent[0].len() - 1;
    sent[0][last] ^= 0x40;

    assert_eq!(b.on_receive(&sent[0]), Status::Open);
    assert_eq!(b.next_seqno_expected(), 1);
    assert!(b.connection_mut().take_sent().is_empty(), "corrupt data must not be acked");

    a.on_timer(Instant::now() + Duration::from_millis(25));
    for datagram in a.connection_mut().take_sent() {
        b.on_receive(&datagram);
    }
    assert_eq!(b.connection().output_data(), b"hello");
    assert_eq!(b.next_seqno_expected(), 2);

    for datagram in b.connection_mut().take_sent() {
        a.on_receive(&datagram);
    }
    assert!(a.send_buffer().is_empty());
}

#[test]
fn clean_link_transfers_both_directions() {
    let mut link = Link::new(&config(8, 6), SimulatorConfig::default());
    let from_a = pattern(5_000, 0x11);
    let from_b = pattern(1_234, 0x77);
    link.a.connection_mut().push_input(&from_a);
    link.a.connection_mut().close_input();
    link.b.connection_mut().push_input(&from_b);
    link.b.connection_mut().close_input();

    link.run(1_000);

    assert_eq!(link.b.connection().output_data(), from_a.as_slice());
    assert_eq!(link.a.connection().output_data(), from_b.as_slice());
    assert!(link.a.shutdown().is_complete());
    assert!(link.b.shutdown().is_complete());
}

#[test]
fn lossy_link_still_delivers_everything() {
    let faults = SimulatorConfig {
        loss_rate: 0.1,
        reorder_rate: 0.1,
        duplicate_rate: 0.05,
        corrupt_rate: 0.05,
        seed: 7,
    };
    let mut link = Link::new(&config(6, 16), faults);
    let from_a = pattern(20_000, 0x3c);
    let from_b = pattern(3_000, 0xa5);
    link.a.connection_mut().push_input(&from_a);
    link.a.connection_mut().close_input();
    link.b.connection_mut().push_input(&from_b);
    link.b.connection_mut().close_input();

    link.run(20_000);

    // The last ack of a close can be lost for good, leaving one side to give
    // up; the streams themselves must be complete either way.
    assert_eq!(link.b.connection().output_data(), from_a.as_slice());
    assert_eq!(link.a.connection().output_data(), from_b.as_slice());
    assert!(link.a.connection().output_closed());
    assert!(link.b.connection().output_closed());
    assert!(link.a_to_b.stats().dropped + link.b_to_a.stats().dropped > 0);
}

#[test]
fn stalled_output_limits_the_sender() {
    // Packets beyond a full receive window are dropped without an ack, so a
    // stalled sink looks like loss to the sender.  The generous retry budget
    // keeps the sender alive through the stall; see the next test for what
    // happens when the stall outlasts `max_retries`.
    let cfg = config(4, 100);
    let mut link = Link::new(&cfg, SimulatorConfig::default());
    link.b = Session::new(MemoryConnection::with_output_capacity(0), &cfg);
    let from_a = pattern(10_000, 0x01);
    link.a.connection_mut().push_input(&from_a);
    link.a.connection_mut().close_input();

    for _ in 0..20 {
        link.step();
    }
    assert!(link.b.connection().output_data().is_empty());
    assert!(link.b.receive_buffer().len() <= cfg.window);
    assert!(link.a.send_buffer().len() <= cfg.window);

    link.b.connection_mut().set_output_capacity(usize::MAX);
    link.b.connection_mut().close_input();
    link.run(2_000);
    assert_eq!(link.b.connection().output_data(), from_a.as_slice());
}

#[test]
fn sink_stalled_past_retry_budget_abandons_sender() {
    let cfg = config(4, 3);
    let mut link = Link::new(&cfg, SimulatorConfig::default());
    link.b = Session::new(MemoryConnection::with_output_capacity(0), &cfg);
    link.a.connection_mut().push_input(&pattern(10_000, 0x02));
    link.a.connection_mut().close_input();

    for _ in 0..40 {
        link.step();
    }
    assert!(link.a.is_closed());
    assert!(!link.a.shutdown().all_acked);
    assert!(!link.b.is_closed());
}
