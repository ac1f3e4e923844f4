//! Client session manager
//!
//! Owns the single server connection, the per-peer session map and the
//! event queue. Two execution contexts cooperate:
//!
//! - a background polling thread performs the non-blocking receive +
//!   framing + decode for the server connection, drives per-peer transport
//!   events and failure deadlines, and emits keep-alives. Handlers never
//!   mutate shared client state directly; they enqueue events.
//! - the foreground [`SessionClient::update`] call - expected on the
//!   application's main thread - drains the queue, applies state
//!   transitions and fires user callbacks. Re-entrant `update` calls are
//!   rejected by an in-progress guard rather than queued.
//!
//! Lock order is state, then connection, then event queue; the queue lock
//! is only ever held for a single push or pop, never across a handler.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::{SocketAddr, TcpStream as StdTcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use mio::{Events, Poll, Token};

use session_wire::{
    Connection, Dispatcher, Liveness, Packet, ReceiveOutcome, RelayDirectory, RelayServer, Role,
    PROTOCOL_VERSION,
};

use crate::events::{Event, LobbyListEntry, PeerSignal, SessionCallbacks};
use crate::ice::{IceEvent, IceFactory};
use crate::peer::{PeerSession, PhaseEdge, PEER_FAILURE_TIMEOUT};

const CONN_TOKEN: Token = Token(0);

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// One-time dial timeout; the only blocking network wait anywhere.
    pub connect_timeout: Duration,
    /// Background receive/upkeep cadence.
    pub poll_interval: Duration,
    pub keepalive_interval: Duration,
    pub dead_interval: Duration,
    /// Stalled-peer reporting deadline.
    pub peer_failure_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            connect_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(50),
            keepalive_interval: session_wire::KEEPALIVE_INTERVAL,
            dead_interval: session_wire::DEAD_INTERVAL,
            peer_failure_timeout: PEER_FAILURE_TIMEOUT,
        }
    }
}

// ============================================================================
// Shared state
// ============================================================================

struct ClientState {
    user_id: u64,
    lobby_id: u64,
    priority: u32,
    relays: RelayDirectory,
    peers: HashMap<u64, PeerSession>,
    ice_factory: Box<dyn IceFactory>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn push_event(events: &Mutex<VecDeque<Event>>, event: Event) {
    lock(events).push_back(event);
}

// ============================================================================
// Session client
// ============================================================================

pub struct SessionClient {
    conn: Arc<Mutex<Connection>>,
    state: Arc<Mutex<ClientState>>,
    events: Arc<Mutex<VecDeque<Event>>>,
    running: Arc<AtomicBool>,
    updating: AtomicBool,
    config: ClientConfig,
    poll_thread: Option<JoinHandle<()>>,
}

impl SessionClient {
    /// Resolve and dial `host:port`, then start the background thread.
    pub fn connect_host(
        host: &str,
        port: u16,
        ice_factory: Box<dyn IceFactory>,
        config: ClientConfig,
    ) -> io::Result<SessionClient> {
        let addr = (host, port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "host did not resolve"))?;
        SessionClient::connect(addr, ice_factory, config)
    }

    /// Dial the server (the one blocking, timeout-bounded connect) and
    /// start the background polling thread.
    pub fn connect(
        addr: SocketAddr,
        ice_factory: Box<dyn IceFactory>,
        config: ClientConfig,
    ) -> io::Result<SessionClient> {
        let stream = StdTcpStream::connect_timeout(&addr, config.connect_timeout)?;
        stream.set_nonblocking(true)?;

        // Session id 0 is the placeholder until `Joined` assigns the real one.
        let mut conn = Connection::new(0, mio::net::TcpStream::from_std(stream), addr);

        let poll = Poll::new()?;
        conn.register_readable(poll.registry(), CONN_TOKEN)?;

        log::info!("connected to {}", addr);

        let conn = Arc::new(Mutex::new(conn));
        let state = Arc::new(Mutex::new(ClientState {
            user_id: 0,
            lobby_id: 0,
            priority: 0,
            relays: RelayDirectory::default(),
            peers: HashMap::new(),
            ice_factory,
        }));
        let events = Arc::new(Mutex::new(VecDeque::new()));
        let running = Arc::new(AtomicBool::new(true));

        let worker = PollLoop {
            conn: Arc::clone(&conn),
            state: Arc::clone(&state),
            events: Arc::clone(&events),
            running: Arc::clone(&running),
            config: config.clone(),
        };
        let poll_thread = thread::Builder::new()
            .name("client-poll".into())
            .spawn(move || worker.run(poll))?;

        Ok(SessionClient {
            conn,
            state,
            events,
            running,
            updating: AtomicBool::new(false),
            config,
            poll_thread: Some(poll_thread),
        })
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    pub fn is_connected(&self) -> bool {
        lock(&self.conn).is_active()
    }

    pub fn user_id(&self) -> u64 {
        lock(&self.state).user_id
    }

    pub fn current_lobby_id(&self) -> u64 {
        lock(&self.state).lobby_id
    }

    pub fn peer_count(&self) -> usize {
        lock(&self.state).peers.len()
    }

    // ------------------------------------------------------------------
    // Lobby requests (fire-and-forget toward the server)
    // ------------------------------------------------------------------

    pub fn lobby_create(
        &self,
        game: &str,
        version: &str,
        host_name: &str,
        mode: &str,
        max_connections: u16,
        password: &str,
        description: &str,
    ) -> bool {
        lock(&self.conn).send(&Packet::LobbyCreate {
            max_connections,
            game: game.into(),
            version: version.into(),
            host_name: host_name.into(),
            mode: mode.into(),
            password: password.into(),
            description: description.into(),
        })
    }

    pub fn lobby_join(&self, lobby_id: u64, password: &str) -> bool {
        lock(&self.conn).send(&Packet::LobbyJoin { lobby_id, password: password.into() })
    }

    pub fn lobby_leave(&self, lobby_id: u64) -> bool {
        lock(&self.conn).send(&Packet::LobbyLeave { lobby_id })
    }

    pub fn lobby_list(&self, game: &str, password: &str) -> bool {
        lock(&self.conn)
            .send(&Packet::LobbyListGet { game: game.into(), password: password.into() })
    }

    pub fn lobby_update(
        &self,
        lobby_id: u64,
        game: &str,
        version: &str,
        host_name: &str,
        mode: &str,
        description: &str,
    ) -> bool {
        lock(&self.conn).send(&Packet::LobbyUpdate {
            lobby_id,
            game: game.into(),
            version: version.into(),
            host_name: host_name.into(),
            mode: mode.into(),
            description: description.into(),
        })
    }

    // ------------------------------------------------------------------
    // Peer data path
    // ------------------------------------------------------------------

    /// Send to every connected peer; true when at least one accepted it.
    pub fn peer_send(&self, data: &[u8]) -> bool {
        let mut state = lock(&self.state);
        let mut any = false;
        for peer in state.peers.values_mut() {
            match peer.send(data) {
                Ok(()) => any = true,
                Err(e) => log::debug!("peer {} send skipped: {}", peer.id(), e),
            }
        }
        any
    }

    pub fn peer_send_to(&self, peer_id: u64, data: &[u8]) -> bool {
        let mut state = lock(&self.state);
        match state.peers.get_mut(&peer_id) {
            Some(peer) => match peer.send(data) {
                Ok(()) => true,
                Err(e) => {
                    log::debug!("peer {} send refused: {}", peer_id, e);
                    false
                }
            },
            None => false,
        }
    }

    /// Explicitly drop the session for one peer.
    pub fn unpeer(&self, peer_id: u64) {
        let mut state = lock(&self.state);
        if state.peers.remove(&peer_id).is_some() {
            log::info!("peer {} ended, count: {}", peer_id, state.peers.len());
        }
    }

    /// Intentionally close the server connection.
    pub fn disconnect(&self) {
        {
            let mut conn = lock(&self.conn);
            if !conn.is_active() {
                return;
            }
            conn.intentional_disconnect = true;
            conn.close();
        }
        self.running.store(false, Ordering::Relaxed);
        push_event(&self.events, Event::Disconnected { intentional: true });
    }

    // ------------------------------------------------------------------
    // Foreground drain
    // ------------------------------------------------------------------

    /// Drain pending events, apply state transitions and fire callbacks.
    ///
    /// Must be called from one thread (typically the game's main loop).
    /// A re-entrant call - e.g. from inside a callback - is rejected and
    /// returns false.
    pub fn update(&self, callbacks: &mut dyn SessionCallbacks) -> bool {
        if self.updating.swap(true, Ordering::Acquire) {
            log::warn!("re-entrant update() rejected");
            return false;
        }

        loop {
            // Queue lock held only for the pop, never across a handler.
            let event = lock(&self.events).pop_front();
            let Some(event) = event else { break };
            self.apply(event, callbacks);
        }

        self.updating.store(false, Ordering::Release);
        true
    }

    fn apply(&self, event: Event, callbacks: &mut dyn SessionCallbacks) {
        match event {
            Event::Connected { user_id, version } => {
                if version != PROTOCOL_VERSION {
                    // Incompatible server: fatal, drop the connection now.
                    log::error!(
                        "protocol version mismatch: server {} != ours {}",
                        version,
                        PROTOCOL_VERSION
                    );
                    {
                        let mut conn = lock(&self.conn);
                        conn.close();
                    }
                    self.running.store(false, Ordering::Relaxed);
                    callbacks.on_disconnected(false);
                    return;
                }
                lock(&self.state).user_id = user_id;
                log::info!("joined server as {}", user_id);
                callbacks.on_connected(user_id);
            }
            Event::Disconnected { intentional } => {
                {
                    let mut state = lock(&self.state);
                    state.lobby_id = 0;
                    state.priority = 0;
                    state.peers.clear();
                }
                callbacks.on_disconnected(intentional);
            }
            Event::RelayEntry { is_stun, server } => {
                let mut state = lock(&self.state);
                if is_stun {
                    state.relays.stun = Some(server);
                } else {
                    state.relays.turns.push(server);
                }
            }
            Event::LobbyCreated { lobby_id, max_connections, game, version, host_name, mode } => {
                callbacks.on_lobby_created(
                    lobby_id,
                    &game,
                    &version,
                    &host_name,
                    &mode,
                    max_connections,
                );
            }
            Event::LobbyJoined { lobby_id, user_id, owner_id, dest_id, priority } => {
                {
                    let mut state = lock(&self.state);
                    if user_id == state.user_id {
                        state.lobby_id = lobby_id;
                        state.priority = priority;
                    } else if lobby_id == state.lobby_id {
                        self.peer_begin(&mut state, user_id, priority);
                    } else {
                        log::error!("received 'joined' for the wrong lobby {}", lobby_id);
                        return;
                    }
                }
                callbacks.on_lobby_joined(lobby_id, user_id, owner_id, dest_id);
            }
            Event::LobbyLeft { lobby_id, user_id } => {
                {
                    let mut state = lock(&self.state);
                    if user_id == state.user_id {
                        state.lobby_id = 0;
                        state.priority = 0;
                        if !state.peers.is_empty() {
                            log::info!("ending all {} peers", state.peers.len());
                            state.peers.clear();
                        }
                    } else if lobby_id == state.lobby_id {
                        if state.peers.remove(&user_id).is_some() {
                            log::info!("peer {} ended, count: {}", user_id, state.peers.len());
                        }
                    } else {
                        log::error!("received 'left' for the wrong lobby {}", lobby_id);
                    }
                }
                callbacks.on_lobby_left(lobby_id, user_id);
            }
            Event::LobbyListGot { entry } => callbacks.on_lobby_list_got(&entry),
            Event::LobbyListFinish => callbacks.on_lobby_list_finish(),
            Event::PeerSignal { from, signal } => {
                let mut state = lock(&self.state);
                self.apply_peer_signal(&mut state, from, signal);
            }
            Event::PeerConnected { peer_id } => callbacks.on_peer_connected(peer_id),
            Event::PeerDisconnected { peer_id } => callbacks.on_peer_disconnected(peer_id),
            Event::Received { from, data } => callbacks.on_received(from, &data),
            Event::ProtocolError { code, tag } => callbacks.on_error(code, tag),
        }
    }

    /// Create the session for a newly announced lobby mate. The controller
    /// side (larger id) opens signaling immediately.
    fn peer_begin(&self, state: &mut ClientState, remote_id: u64, priority: u32) {
        if state.peers.contains_key(&remote_id) {
            log::warn!("peer {} already exists", remote_id);
            return;
        }

        let transport = match state.ice_factory.create(&state.relays) {
            Ok(transport) => transport,
            Err(e) => {
                log::error!("peer transport creation for {} failed: {}", remote_id, e);
                return;
            }
        };

        let mut peer = PeerSession::new(
            state.user_id,
            remote_id,
            priority,
            transport,
            Instant::now(),
            self.config.peer_failure_timeout,
        );

        if peer.is_controller() {
            self.send_description(state.lobby_id, &mut peer);
        }

        state.peers.insert(remote_id, peer);
        log::info!("peer {} begun, count: {}", remote_id, state.peers.len());
    }

    fn apply_peer_signal(&self, state: &mut ClientState, from: u64, signal: PeerSignal) {
        let lobby_id = state.lobby_id;
        let Some(peer) = state.peers.get_mut(&from) else {
            log::error!("signaling for unknown peer {}", from);
            return;
        };

        match signal {
            PeerSignal::Description(sdp) => {
                if let Err(e) = peer.set_remote_description(&sdp) {
                    log::error!("peer {} remote description rejected: {}", from, e);
                    return;
                }
                // The controlled side answers once the offer arrived.
                if !peer.is_controller() {
                    self.send_description(lobby_id, peer);
                }
            }
            PeerSignal::Candidate(sdp) => {
                if let Err(e) = peer.add_remote_candidate(&sdp) {
                    log::error!("peer {} candidate rejected: {}", from, e);
                }
            }
            PeerSignal::CandidatesDone => peer.remote_gathering_done(),
        }
    }

    /// Send our session description to a peer and start gathering.
    fn send_description(&self, lobby_id: u64, peer: &mut PeerSession) {
        match peer.local_description() {
            Ok(sdp) => {
                lock(&self.conn).send(&Packet::PeerSdp { lobby_id, user_id: peer.id(), sdp });
                if let Err(e) = peer.gather_candidates() {
                    log::error!("peer {} candidate gathering failed: {}", peer.id(), e);
                }
            }
            Err(e) => log::error!("peer {} local description failed: {}", peer.id(), e),
        }
    }
}

impl Drop for SessionClient {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.poll_thread.take() {
            let _ = handle.join();
        }
    }
}

// ============================================================================
// Background polling thread
// ============================================================================

struct PollLoop {
    conn: Arc<Mutex<Connection>>,
    state: Arc<Mutex<ClientState>>,
    events: Arc<Mutex<VecDeque<Event>>>,
    running: Arc<AtomicBool>,
    config: ClientConfig,
}

impl PollLoop {
    fn run(self, mut poll: Poll) {
        let dispatcher = Dispatcher::new(Role::Client);
        let mut poll_events = Events::with_capacity(16);

        while self.running.load(Ordering::Relaxed) {
            if let Err(e) = poll.poll(&mut poll_events, Some(self.config.poll_interval)) {
                if e.kind() != io::ErrorKind::Interrupted {
                    log::error!("client poll failed: {}", e);
                }
            }

            if !self.receive_pass(&dispatcher) {
                break;
            }
            if !self.liveness_pass() {
                break;
            }
            self.peer_pass();
        }

        log::debug!("client poll loop stopped");
    }

    /// Receive + decode; handlers only enqueue. False ends the loop.
    fn receive_pass(&self, dispatcher: &Dispatcher) -> bool {
        let (outcome, intentional) = {
            let mut conn = lock(&self.conn);
            let outcome = conn.receive_once();
            (outcome, conn.intentional_disconnect)
        };

        match outcome {
            ReceiveOutcome::Idle => true,
            ReceiveOutcome::Frames(frames) => {
                for frame in frames {
                    match dispatcher.decode(&frame) {
                        Ok(packet) => {
                            if let Some(event) = event_for(packet) {
                                push_event(&self.events, event);
                            }
                        }
                        Err(e) => log::error!("dropped packet: {}", e),
                    }
                }
                true
            }
            ReceiveOutcome::Disconnected { graceful } => {
                if !graceful {
                    log::error!("server connection errored");
                }
                lock(&self.conn).close();
                push_event(&self.events, Event::Disconnected { intentional });
                false
            }
        }
    }

    /// Keep-alive emission and dead-interval detection. False ends the loop.
    fn liveness_pass(&self) -> bool {
        let mut conn = lock(&self.conn);
        if conn.is_broken() {
            conn.close();
            drop(conn);
            push_event(&self.events, Event::Disconnected { intentional: false });
            return false;
        }

        match conn.liveness(
            Instant::now(),
            self.config.keepalive_interval,
            self.config.dead_interval,
        ) {
            Liveness::Alive => true,
            Liveness::SendKeepAlive => {
                conn.send(&Packet::KeepAlive);
                true
            }
            Liveness::Dead => {
                log::error!("server silent past the dead interval");
                conn.close();
                drop(conn);
                push_event(&self.events, Event::Disconnected { intentional: false });
                false
            }
        }
    }

    /// Drain peer-transport events and run the failure-deadline checks.
    fn peer_pass(&self) {
        let now = Instant::now();
        let mut state = lock(&self.state);
        let lobby_id = state.lobby_id;
        let local_priority = state.priority;

        for (id, peer) in state.peers.iter_mut() {
            while let Some(event) = peer.poll_transport() {
                match event {
                    IceEvent::StateChanged(ice_state) => match peer.observe_state(ice_state) {
                        Some(PhaseEdge::Connected) => {
                            push_event(&self.events, Event::PeerConnected { peer_id: *id });
                        }
                        Some(PhaseEdge::Down) => {
                            push_event(&self.events, Event::PeerDisconnected { peer_id: *id });
                        }
                        None => {}
                    },
                    IceEvent::CandidateFound(sdp) => {
                        lock(&self.conn).send(&Packet::PeerCandidate {
                            lobby_id,
                            user_id: *id,
                            sdp,
                        });
                    }
                    IceEvent::GatheringDone => {
                        lock(&self.conn)
                            .send(&Packet::PeerCandidateDone { lobby_id, user_id: *id });
                    }
                    IceEvent::DataReceived(data) => {
                        push_event(&self.events, Event::Received { from: *id, data });
                    }
                }
            }

            if peer.should_report_failure(now, local_priority) {
                log::info!("reporting stalled peer {} to the server", id);
                lock(&self.conn).send(&Packet::PeerFailed { lobby_id, peer_id: *id });
            }
        }
    }
}

/// Map a decoded server packet onto the internal event it enqueues.
/// Keep-alives map to nothing.
fn event_for(packet: Packet) -> Option<Event> {
    match packet {
        Packet::Joined { user_id, version } => Some(Event::Connected { user_id, version }),
        Packet::StunTurn { is_stun, port, host, username, password } => Some(Event::RelayEntry {
            is_stun,
            server: RelayServer { host, port, username, password },
        }),
        Packet::LobbyCreated { lobby_id, max_connections, game, version, host_name, mode } => {
            Some(Event::LobbyCreated { lobby_id, max_connections, game, version, host_name, mode })
        }
        Packet::LobbyJoined { lobby_id, user_id, owner_id, dest_id, priority } => {
            Some(Event::LobbyJoined { lobby_id, user_id, owner_id, dest_id, priority })
        }
        Packet::LobbyLeft { lobby_id, user_id } => Some(Event::LobbyLeft { lobby_id, user_id }),
        Packet::LobbyListGot {
            lobby_id,
            owner_id,
            connections,
            max_connections,
            game,
            version,
            host_name,
            mode,
            description,
        } => Some(Event::LobbyListGot {
            entry: LobbyListEntry {
                lobby_id,
                owner_id,
                connections,
                max_connections,
                game,
                version,
                host_name,
                mode,
                description,
            },
        }),
        Packet::LobbyListFinish => Some(Event::LobbyListFinish),
        Packet::PeerSdp { user_id, sdp, .. } => {
            Some(Event::PeerSignal { from: user_id, signal: PeerSignal::Description(sdp) })
        }
        Packet::PeerCandidate { user_id, sdp, .. } => {
            Some(Event::PeerSignal { from: user_id, signal: PeerSignal::Candidate(sdp) })
        }
        Packet::PeerCandidateDone { user_id, .. } => {
            Some(Event::PeerSignal { from: user_id, signal: PeerSignal::CandidatesDone })
        }
        Packet::Error { code, tag } => Some(Event::ProtocolError { code, tag }),
        Packet::KeepAlive => None,
        other => {
            log::error!("unhandled packet {:?}", other.packet_type());
            None
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use session_wire::ErrorCode;

    #[test]
    fn test_event_for_keepalive_is_silent() {
        assert_eq!(event_for(Packet::KeepAlive), None);
    }

    #[test]
    fn test_event_for_joined() {
        let event = event_for(Packet::Joined { user_id: 9, version: 1 });
        assert_eq!(event, Some(Event::Connected { user_id: 9, version: 1 }));
    }

    #[test]
    fn test_event_for_relay_entry() {
        let event = event_for(Packet::StunTurn {
            is_stun: true,
            port: 3478,
            host: "stun.example.net".into(),
            username: "".into(),
            password: "".into(),
        });
        match event {
            Some(Event::RelayEntry { is_stun: true, server }) => {
                assert_eq!(server.host, "stun.example.net");
                assert_eq!(server.port, 3478);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_event_for_signaling_carries_sender() {
        let event = event_for(Packet::PeerSdp { lobby_id: 1, user_id: 5, sdp: "v=0".into() });
        assert_eq!(
            event,
            Some(Event::PeerSignal { from: 5, signal: PeerSignal::Description("v=0".into()) })
        );

        let event = event_for(Packet::PeerCandidateDone { lobby_id: 1, user_id: 5 });
        assert_eq!(
            event,
            Some(Event::PeerSignal { from: 5, signal: PeerSignal::CandidatesDone })
        );
    }

    #[test]
    fn test_event_for_error() {
        let event = event_for(Packet::Error { code: ErrorCode::LobbyFull, tag: 7 });
        assert_eq!(
            event,
            Some(Event::ProtocolError { code: ErrorCode::LobbyFull, tag: 7 })
        );
    }
}
