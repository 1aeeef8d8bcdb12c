//! Registry of live sessions and the retransmission sweep.
//!
//! The registry owns every [`Session`] in a slab, so handles stay stable
//! while sessions come and go, and insert/remove are O(1).  In server mode a
//! session is also indexed by its peer address for demultiplexing.
//!
//! Every dispatch removes the session from the registry as soon as its
//! handler reports [`Status::Closed`], so a torn-down session is never
//! visited by a later sweep.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::io;
use std::net::SocketAddr;
use std::time::Instant;

use slab::Slab;
use thiserror::Error;

use crate::config::Config;
use crate::connection::Connection;
use crate::packet::Packet;
use crate::session::{Session, Status};

/// Handle to a session in a [`Registry`].
///
/// Handles of removed sessions may be reused for later sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub usize);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("no live session {0}")]
    UnknownSession(SessionId),
    #[error("could not create a connection for a new peer: {0}")]
    Factory(#[source] io::Error),
}

struct Slot<C, A> {
    session: Session<C>,
    addr: Option<A>,
}

pub struct Registry<C, A = SocketAddr> {
    config: Config,
    sessions: Slab<Slot<C, A>>,
    by_addr: HashMap<A, SessionId>,
}

impl<C, A> Registry<C, A>
where
    C: Connection,
    A: Eq + Hash + Clone + Debug,
{
    pub fn new(config: Config) -> Self {
        Self {
            config,
            sessions: Slab::new(),
            by_addr: HashMap::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions.contains(id.0)
    }

    pub fn ids(&self) -> Vec<SessionId> {
        self.sessions.iter().map(|(key, _)| SessionId(key)).collect()
    }

    pub fn get(&self, id: SessionId) -> Option<&Session<C>> {
        self.sessions.get(id.0).map(|slot| &slot.session)
    }

    pub fn get_mut(&mut self, id: SessionId) -> Option<&mut Session<C>> {
        self.sessions.get_mut(id.0).map(|slot| &mut slot.session)
    }

    pub fn lookup(&self, addr: &A) -> Option<SessionId> {
        self.by_addr.get(addr).copied()
    }

    /// Register a session for an already-established connection.
    pub fn create(&mut self, conn: C) -> SessionId {
        let session = Session::new(conn, &self.config);
        let id = SessionId(self.sessions.insert(Slot {
            session,
            addr: None,
        }));
        log::debug!("[registry] created session {id}");
        id
    }

    /// Register a session reachable at `addr`.
    pub fn create_for(&mut self, addr: A, conn: C) -> SessionId {
        let session = Session::new(conn, &self.config);
        let id = SessionId(self.sessions.insert(Slot {
            session,
            addr: Some(addr.clone()),
        }));
        log::debug!("[registry] created session {id} for {addr:?}");
        self.by_addr.insert(addr, id);
        id
    }

    /// Tear a session down and forget it.
    pub fn destroy(&mut self, id: SessionId) -> Result<(), RegistryError> {
        let mut slot = self.remove(id)?;
        slot.session.destroy();
        Ok(())
    }

    fn remove(&mut self, id: SessionId) -> Result<Slot<C, A>, RegistryError> {
        if !self.sessions.contains(id.0) {
            return Err(RegistryError::UnknownSession(id));
        }
        let slot = self.sessions.remove(id.0);
        if let Some(addr) = &slot.addr {
            self.by_addr.remove(addr);
        }
        log::debug!("[registry] removed session {id}, {} left", self.sessions.len());
        Ok(slot)
    }

    fn dispatch(
        &mut self,
        id: SessionId,
        handler: impl FnOnce(&mut Session<C>) -> Status,
    ) -> Result<Status, RegistryError> {
        let slot = self
            .sessions
            .get_mut(id.0)
            .ok_or(RegistryError::UnknownSession(id))?;
        let status = handler(&mut slot.session);
        if status == Status::Closed {
            self.remove(id)?;
        }
        Ok(status)
    }

    pub fn on_datagram(&mut self, id: SessionId, datagram: &[u8]) -> Result<Status, RegistryError> {
        self.dispatch(id, |s| s.on_receive(datagram))
    }

    pub fn on_input_ready(&mut self, id: SessionId) -> Result<Status, RegistryError> {
        self.dispatch(id, Session::on_input_ready)
    }

    pub fn on_output_ready(&mut self, id: SessionId) -> Result<Status, RegistryError> {
        self.dispatch(id, Session::on_output_ready)
    }

    /// Route a datagram from `addr` to its session.
    ///
    /// An unknown address gets a new session, with a connection built by
    /// `factory`, only when the datagram is a valid data packet carrying
    /// sequence number 1.  Anything else from an unknown address is dropped
    /// and `Ok(None)` returned.
    pub fn demux<F>(
        &mut self,
        addr: &A,
        datagram: &[u8],
        factory: F,
    ) -> Result<Option<SessionId>, RegistryError>
    where
        F: FnOnce(&A) -> io::Result<C>,
    {
        let id = match self.lookup(addr) {
            Some(id) => id,
            None => {
                let first_contact =
                    matches!(Packet::decode(datagram), Ok(Packet::Data(ref d)) if d.seqno == 1);
                if !first_contact {
                    log::debug!("[registry] dropping stray datagram from {addr:?}");
                    return Ok(None);
                }
                let conn = factory(addr).map_err(RegistryError::Factory)?;
                self.create_for(addr.clone(), conn)
            }
        };
        self.on_datagram(id, datagram)?;
        Ok(Some(id))
    }

    /// One retransmission sweep: every live session is visited exactly once.
    ///
    /// Sessions that close during the sweep are removed.  Returns the number
    /// of sessions visited.
    pub fn on_timer_tick(&mut self, now: Instant) -> usize {
        let mut closed = Vec::new();
        let mut visited = 0;
        for (key, slot) in self.sessions.iter_mut() {
            visited += 1;
            if slot.session.on_timer(now) == Status::Closed {
                closed.push(SessionId(key));
            }
        }
        for id in closed {
            // Present by construction; the result only reports unknown ids.
            let _ = self.remove(id);
        }
        visited
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::connection::MemoryConnection;
    use crate::packet::DataPacket;
    use crate::timer::TimerConfig;

    fn registry() -> Registry<MemoryConnection, u16> {
        Registry::new(Config {
            window: 4,
            timer: TimerConfig {
                interval: Duration::from_millis(10),
                initial_rto: Duration::ZERO,
                max_rto: Duration::ZERO,
                max_retries: 2,
                idle_timeout: None,
            },
        })
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

    #[test]
    fn create_and_destroy() {
        let mut reg = registry();
        let a = reg.create(MemoryConnection::new());
        let b = reg.create(MemoryConnection::new());
        assert_eq!(reg.len(), 2);
        reg.destroy(a).unwrap();
        assert!(!reg.contains(a));
        assert!(reg.contains(b));
        assert!(matches!(
            reg.destroy(a),
            Err(RegistryError::UnknownSession(id)) if id == a
        ));
    }

    #[test]
    fn demux_creates_session_on_first_packet() {
        let mut reg = registry();
        let id = reg
            .demux(&7, &data(1, b"hi"), |_| Ok(MemoryConnection::new()))
            .unwrap()
            .expect("session created");
        assert_eq!(reg.lookup(&7), Some(id));
        assert_eq!(reg.get(id).unwrap().connection().output_data(), b"hi");

        // Known address: routed, no new session.
        let again = reg
            .demux(&7, &data(2, b"!"), |_| panic!("factory must not run"))
            .unwrap();
        assert_eq!(again, Some(id));
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.get(id).unwrap().connection().output_data(), b"hi!");
    }

    #[test]
    fn demux_ignores_stray_datagrams() {
        let mut reg = registry();
        let factory = |_: &u16| -> io::Result<MemoryConnection> { panic!("no session expected") };
        assert!(reg.demux(&1, &data(2, b"x"), factory).unwrap().is_none());
        let ack = Packet::Ack { ackno: 1 }.encode().unwrap();
        assert!(reg.demux(&1, &ack, factory).unwrap().is_none());
        let mut corrupt = data(1, b"x");
        corrupt[0] ^= 1;
        assert!(reg.demux(&1, &corrupt, factory).unwrap().is_none());
        assert!(reg.is_empty());
    }

    #[test]
    fn demux_factory_failure_reported() {
        let mut reg = registry();
        let err = reg
            .demux(&1, &data(1, b"x"), |_| {
                Err(io::Error::new(io::ErrorKind::AddrInUse, "nope"))
            })
            .unwrap_err();
        assert!(matches!(err, RegistryError::Factory(_)));
        assert!(reg.is_empty());
    }

    #[test]
    fn timer_tick_visits_each_session_once() {
        let mut reg = registry();
        let ids: Vec<SessionId> = (0..3).map(|_| reg.create(MemoryConnection::new())).collect();
        for &id in &ids {
            reg.get_mut(id).unwrap().connection_mut().push_input(b"payload");
            reg.on_input_ready(id).unwrap();
            reg.get_mut(id).unwrap().connection_mut().take_sent();
        }

        assert_eq!(reg.on_timer_tick(Instant::now() + Duration::from_millis(1)), 3);
        for &id in &ids {
            let sent = reg.get_mut(id).unwrap().connection_mut().take_sent();
            assert_eq!(sent.len(), 1, "session {id} resent {} packets", sent.len());
        }
    }

    #[test]
    fn sessions_that_give_up_leave_the_registry() {
        let mut reg = registry();
        let stuck = reg.create_for(9, MemoryConnection::new());
        let idle = reg.create(MemoryConnection::new());
        reg.get_mut(stuck).unwrap().connection_mut().push_input(b"x");
        reg.on_input_ready(stuck).unwrap();

        let mut now = Instant::now();
        for _ in 0..3 {
            now += Duration::from_millis(1);
            reg.on_timer_tick(now);
        }
        assert!(!reg.contains(stuck));
        assert_eq!(reg.lookup(&9), None);
        assert!(reg.contains(idle));
        assert_eq!(reg.on_timer_tick(now), 1);
    }

    #[test]
    fn closed_session_removed_after_dispatch() {
        let mut reg = registry();
        let id = reg.create_for(3, MemoryConnection::new());
        reg.get_mut(id).unwrap().connection_mut().close_input();
        reg.on_input_ready(id).unwrap();
        reg.on_datagram(id, &Packet::Ack { ackno: 2 }.encode().unwrap())
            .unwrap();

        let eof = DataPacket {
            ackno: 1,
            seqno: 1,
            payload: Vec::new(),
        }
        .encode()
        .unwrap();
        assert_eq!(reg.on_datagram(id, &eof).unwrap(), Status::Closed);
        assert!(!reg.contains(id));
        assert_eq!(reg.lookup(&3), None);
        assert!(matches!(
            reg.on_output_ready(id),
            Err(RegistryError::UnknownSession(_))
        ));
    }

    #[test]
    fn idle_sessions_leave_the_address_index() {
        let mut config = registry().config().clone();
        config.timer.idle_timeout = Some(Duration::from_secs(30));
        let mut reg: Registry<MemoryConnection, u16> = Registry::new(config);
        let id = reg
            .demux(&5, &data(1, b"hi"), |_| Ok(MemoryConnection::new()))
            .unwrap()
            .expect("session created");

        let later = Instant::now() + Duration::from_secs(31);
        assert_eq!(reg.on_timer_tick(later), 1);
        assert!(!reg.contains(id));
        assert_eq!(reg.lookup(&5), None);
        assert!(reg.is_empty());
    }
}
