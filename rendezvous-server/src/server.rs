//! Rendezvous server core
//!
//! Owns the connection registry and the lobby registry behind one mutex.
//! Two threads share it:
//!
//! - the accept thread blocks in `accept`, allocates a random session id,
//!   runs the admission predicate and hands the newcomer its `Joined`
//!   acknowledgment plus the STUN/TURN relay directory;
//! - the sweep thread holds the lock across a full pass every 100 ms:
//!   receive + dispatch for every connection, liveness, ban refresh, queued
//!   disconnects, dead-timeout reclamation and gauge recomputation.
//!   Readiness events only wake the sweep early; there are no
//!   per-connection threads.
//!
//! All lobby fan-out (join enumeration, left broadcasts, owner-departure
//! cascade) happens inline in the triggering call, and a failed send to one
//! member never stops the rest of the fan-out.

use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use mio::{Events, Poll, Registry, Token};
use ring::rand::SystemRandom;

use session_wire::packets::{clamp_str, MAX_GAME_LEN, MAX_PASSWORD_LEN};
use session_wire::{
    Connection, Dispatcher, ErrorCode, Liveness, Packet, ReceiveOutcome, Role, PROTOCOL_VERSION,
};

use crate::admission::{AdmissionPolicy, AllowAll, ConnectionInfo};
use crate::config::ServerConfig;
use crate::identity::{allocate_id, AddressHasher, DestinationHasher};
use crate::lobby::{Lobby, LobbySettings};
use crate::metrics::Metrics;
use crate::reputation::Reputation;

/// All connections share one token; events are only a wake-up hint because
/// the sweep reads every connection anyway.
const CONN_TOKEN: Token = Token(1);

// ============================================================================
// Registry state
// ============================================================================

struct ConnEntry {
    conn: Connection,
    /// Disconnect at the next sweep opportunity (admission rejection).
    queued_disconnect: bool,
    /// Whether the stream has been registered with the sweep poll yet.
    registered: bool,
}

/// Everything behind the single server mutex.
pub struct ServerState {
    config: ServerConfig,
    dispatcher: Dispatcher,
    conns: HashMap<u64, ConnEntry>,
    lobbies: HashMap<u64, Lobby>,
    reputation: Reputation,
    admission: Box<dyn AdmissionPolicy>,
    dest_hasher: Box<dyn DestinationHasher>,
    metrics: Arc<Metrics>,
    rng: SystemRandom,
    last_ban_refresh: Instant,
    last_reputation_purge: Instant,
}

impl ServerState {
    pub fn new(
        config: ServerConfig,
        admission: Box<dyn AdmissionPolicy>,
        dest_hasher: Box<dyn DestinationHasher>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let now = Instant::now();
        ServerState {
            config,
            dispatcher: Dispatcher::new(Role::Server),
            conns: HashMap::new(),
            lobbies: HashMap::new(),
            reputation: Reputation::new(),
            admission,
            dest_hasher,
            metrics,
            rng: SystemRandom::new(),
            last_ban_refresh: now,
            last_reputation_purge: now,
        }
    }

    /// Current reputation score for a destination id.
    pub fn reputation_score(&self, dest_id: u64) -> i32 {
        self.reputation.score(dest_id)
    }

    pub fn connection_count(&self) -> usize {
        self.conns.len()
    }

    pub fn lobby_count(&self) -> usize {
        self.lobbies.len()
    }

    // ------------------------------------------------------------------
    // Accept path
    // ------------------------------------------------------------------

    /// Register a freshly accepted transport: allocate a session id, derive
    /// the destination id, run admission, and greet the client with
    /// `Joined` plus the relay directory.
    pub fn accept_connection(&mut self, stream: mio::net::TcpStream, addr: SocketAddr) -> u64 {
        let id = allocate_id(&self.rng, |candidate| self.conns.contains_key(&candidate));
        let mut conn = Connection::new(id, stream, addr);
        conn.dest_id = self.dest_hasher.derive(&addr);

        let info = ConnectionInfo { addr, dest_id: conn.dest_id };
        let permitted = self.admission.permit(&info, true);

        if permitted {
            conn.send(&Packet::Joined { user_id: id, version: PROTOCOL_VERSION });
            if let Some(stun) = &self.config.relays.stun {
                conn.send(&Packet::StunTurn {
                    is_stun: true,
                    port: stun.port,
                    host: stun.host.clone(),
                    username: String::new(),
                    password: String::new(),
                });
            }
            for turn in &self.config.relays.turns {
                conn.send(&Packet::StunTurn {
                    is_stun: false,
                    port: turn.port,
                    host: turn.host.clone(),
                    username: turn.username.clone(),
                    password: turn.password.clone(),
                });
            }
            self.metrics.connections_accepted_total.fetch_add(1, Ordering::Relaxed);
            log::info!("[{}] connection accepted: {}", id, addr);
        } else {
            self.metrics.admission_rejections_total.fetch_add(1, Ordering::Relaxed);
            log::warn!("[{}] connection from {} rejected by admission policy", id, addr);
        }

        self.conns.insert(id, ConnEntry { conn, queued_disconnect: !permitted, registered: false });
        log::info!("[{}] client added, count: {}", id, self.conns.len());
        id
    }

    /// Register newly accepted streams with the sweep poll.
    fn register_pending(&mut self, registry: &Registry) {
        for entry in self.conns.values_mut().filter(|e| !e.registered) {
            if let Err(e) = entry.conn.register_readable(registry, CONN_TOKEN) {
                log::debug!("[{}] poll registration failed: {}", entry.conn.id(), e);
            }
            entry.registered = true;
        }
    }

    // ------------------------------------------------------------------
    // Sweep
    // ------------------------------------------------------------------

    /// One full sweep pass: receive + dispatch for every connection, then
    /// liveness, ban refresh, queued disconnects and dead-timeout
    /// reclamation, then registry cleanup and gauge recomputation.
    pub fn sweep(&mut self, now: Instant) {
        let ban_refresh_due =
            now.duration_since(self.last_ban_refresh) >= self.config.ban_refresh_interval;
        if ban_refresh_due {
            self.last_ban_refresh = now;
        }

        let ids: Vec<u64> = self.conns.keys().copied().collect();
        for id in ids {
            let outcome = match self.conns.get_mut(&id) {
                Some(entry) => entry.conn.receive_once(),
                None => continue,
            };

            match outcome {
                ReceiveOutcome::Idle => {}
                ReceiveOutcome::Frames(frames) => {
                    for frame in frames {
                        match self.dispatcher.decode(&frame) {
                            Ok(packet) => self.handle_packet(id, packet),
                            Err(e) => log::error!("[{}] dropped packet: {}", id, e),
                        }
                    }
                }
                ReceiveOutcome::Disconnected { graceful } => {
                    if !graceful {
                        log::error!("[{}] transport error, disconnecting", id);
                    }
                    self.disconnect(id, false);
                    continue;
                }
            }

            let Some(entry) = self.conns.get_mut(&id) else { continue };
            if !entry.conn.is_active() {
                continue;
            }
            if entry.conn.is_broken() {
                self.disconnect(id, false);
                continue;
            }

            let liveness = entry.conn.liveness(
                now,
                self.config.keepalive_interval,
                self.config.dead_interval,
            );
            if liveness == Liveness::SendKeepAlive && entry.conn.send(&Packet::KeepAlive) {
                self.metrics.keepalives_sent_total.fetch_add(1, Ordering::Relaxed);
            }

            if ban_refresh_due {
                let info = ConnectionInfo {
                    addr: entry.conn.peer_addr(),
                    dest_id: entry.conn.dest_id,
                };
                if !self.admission.permit(&info, false) {
                    log::warn!("[{}] failed admission refresh, queueing disconnect", id);
                    entry.queued_disconnect = true;
                }
            }

            if entry.queued_disconnect {
                self.disconnect(id, false);
                continue;
            }
            if liveness == Liveness::Dead {
                log::info!("[{}] dead timeout", id);
                self.disconnect(id, false);
            }
        }

        // Remove and destroy connections that became inactive this pass.
        let before = self.conns.len();
        self.conns.retain(|_, entry| entry.conn.is_active());
        if self.conns.len() != before {
            log::info!("clients removed, count: {}", self.conns.len());
        }

        if now.duration_since(self.last_reputation_purge) >= self.config.reputation_purge_interval
        {
            self.last_reputation_purge = now;
            let purged = self.reputation.purge_stale(now);
            if purged > 0 {
                log::info!("purged {} stale reputation entries", purged);
            }
        }

        // Simple aggregates for external metrics consumption.
        self.metrics.active_connections.store(self.conns.len() as u64, Ordering::Relaxed);
        self.metrics.active_lobbies.store(self.lobbies.len() as u64, Ordering::Relaxed);
        let players: usize = self.lobbies.values().map(|l| l.member_count()).sum();
        self.metrics.lobby_players.store(players as u64, Ordering::Relaxed);
    }

    // ------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------

    /// Tear a connection down: lobby leave first (so handlers observing
    /// membership during teardown see consistent state), then close.
    /// Idempotent: a second call on an inactive connection is a no-op.
    pub fn disconnect(&mut self, id: u64, intentional: bool) {
        let Some(entry) = self.conns.get_mut(&id) else { return };
        if !entry.conn.is_active() {
            return;
        }
        entry.conn.intentional_disconnect = intentional;

        if let Some(lobby_id) = entry.conn.lobby {
            self.leave_lobby(id, lobby_id);
        }
        if let Some(entry) = self.conns.get_mut(&id) {
            entry.conn.close();
        }
        log::info!("[{}] disconnected", id);
    }

    // ------------------------------------------------------------------
    // Packet handlers
    // ------------------------------------------------------------------

    fn handle_packet(&mut self, from: u64, packet: Packet) {
        match packet {
            Packet::LobbyCreate {
                max_connections,
                game,
                version,
                host_name,
                mode,
                password,
                description,
            } => {
                self.handle_lobby_create(from, LobbySettings {
                    game,
                    version,
                    host_name,
                    mode,
                    password,
                    description,
                    max_connections,
                });
            }
            Packet::LobbyJoin { lobby_id, password } => {
                self.join_lobby(from, lobby_id, &password);
            }
            Packet::LobbyLeave { lobby_id } => {
                if self.lobbies.contains_key(&lobby_id) {
                    self.leave_lobby(from, lobby_id);
                } else {
                    self.send_error(from, ErrorCode::LobbyNotFound, lobby_id);
                }
            }
            Packet::LobbyListGet { game, password } => {
                self.handle_lobby_list(from, &game, &password);
            }
            Packet::LobbyUpdate { lobby_id, game, version, host_name, mode, description } => {
                self.handle_lobby_update(
                    from, lobby_id, &game, &version, &host_name, &mode, &description,
                );
            }
            Packet::PeerSdp { lobby_id, user_id, sdp } => {
                let forwarded = Packet::PeerSdp { lobby_id, user_id: from, sdp };
                self.relay_signal(from, user_id, forwarded);
            }
            Packet::PeerCandidate { lobby_id, user_id, sdp } => {
                let forwarded = Packet::PeerCandidate { lobby_id, user_id: from, sdp };
                self.relay_signal(from, user_id, forwarded);
            }
            Packet::PeerCandidateDone { lobby_id, user_id } => {
                let forwarded = Packet::PeerCandidateDone { lobby_id, user_id: from };
                self.relay_signal(from, user_id, forwarded);
            }
            Packet::PeerFailed { lobby_id, peer_id } => {
                self.handle_peer_failed(from, lobby_id, peer_id);
            }
            Packet::KeepAlive => {}
            other => {
                // The dispatcher's role check keeps server-origin packets
                // out; anything else reaching here is a bug.
                log::error!("[{}] unhandled packet {:?}", from, other.packet_type());
            }
        }
    }

    fn handle_lobby_create(&mut self, owner: u64, mut settings: LobbySettings) {
        // Public lobbies are capped by the server-wide ceiling; private
        // (password-protected) lobbies are exempt.
        let requested = settings.max_connections;
        settings.max_connections = if settings.password.is_empty() {
            requested.min(self.config.public_lobby_ceiling)
        } else {
            requested
        }
        .max(1);

        let lobby_id = allocate_id(&self.rng, |candidate| self.lobbies.contains_key(&candidate));
        let lobby = Lobby::new(lobby_id, owner, settings);

        log::info!(
            "[{}] lobby created by {}: game '{}', version '{}', host '{}', mode '{}', max {}",
            lobby_id,
            owner,
            lobby.game,
            lobby.version,
            lobby.host_name,
            lobby.mode,
            lobby.max_connections
        );

        let ack = Packet::LobbyCreated {
            lobby_id,
            max_connections: lobby.max_connections as u64,
            game: lobby.game.clone(),
            version: lobby.version.clone(),
            host_name: lobby.host_name.clone(),
            mode: lobby.mode.clone(),
        };
        let password = lobby.password.clone();

        self.lobbies.insert(lobby_id, lobby);
        self.metrics.lobbies_created_total.fetch_add(1, Ordering::Relaxed);
        log::info!("[{}] lobby added, count: {}", lobby_id, self.lobbies.len());

        self.send_to(owner, &ack);
        self.join_lobby(owner, lobby_id, &password);
    }

    /// Join a connection to a lobby, leaving any previous lobby first.
    /// The full bidirectional fan-out runs on success: every member learns
    /// about the joiner, and the joiner learns about every existing member.
    fn join_lobby(&mut self, conn_id: u64, lobby_id: u64, password: &str) {
        let Some(lobby) = self.lobbies.get(&lobby_id) else {
            self.send_error(conn_id, ErrorCode::LobbyNotFound, lobby_id);
            return;
        };
        if lobby.is_member(conn_id) {
            self.send_error(conn_id, ErrorCode::AlreadyMember, lobby_id);
            return;
        }

        // Leaving the old lobby happens before the capacity check, inside
        // the same locked pass (no packet interleaving between the two).
        let previous = self.conns.get(&conn_id).and_then(|e| e.conn.lobby);
        if let Some(previous_id) = previous {
            self.leave_lobby(conn_id, previous_id);
        }

        let Some(lobby) = self.lobbies.get_mut(&lobby_id) else {
            self.send_error(conn_id, ErrorCode::LobbyNotFound, lobby_id);
            return;
        };
        if let Err(rejection) = lobby.check_join(conn_id, password) {
            let code = rejection.error_code();
            log::info!("[{}] join of lobby {} refused: {:?}", conn_id, lobby_id, rejection);
            self.send_error(conn_id, code, lobby_id);
            return;
        }

        let priority = lobby.admit(conn_id);
        let owner_id = lobby.owner;
        let members: Vec<u64> = lobby.members().to_vec();

        let dest_id = match self.conns.get_mut(&conn_id) {
            Some(entry) => {
                entry.conn.lobby = Some(lobby_id);
                entry.conn.priority = priority;
                entry.conn.dest_id
            }
            None => 0,
        };

        log::info!("[{}] joined lobby {} with priority {}", conn_id, lobby_id, priority);

        // Everyone (joiner included) hears about the new member...
        let joined = Packet::LobbyJoined { lobby_id, user_id: conn_id, owner_id, dest_id, priority };
        for member in &members {
            self.send_to(*member, &joined);
        }

        // ...and the joiner retroactively enumerates the existing members.
        for member in members.iter().filter(|m| **m != conn_id) {
            let Some(entry) = self.conns.get(member) else { continue };
            let announce = Packet::LobbyJoined {
                lobby_id,
                user_id: *member,
                owner_id,
                dest_id: entry.conn.dest_id,
                priority: entry.conn.priority,
            };
            self.send_to(conn_id, &announce);
        }
    }

    /// Remove a connection from a lobby. No-op when it is not a member of
    /// *this* lobby. Destroys the lobby when the owner departs.
    fn leave_lobby(&mut self, conn_id: u64, lobby_id: u64) -> bool {
        let Some(lobby) = self.lobbies.get_mut(&lobby_id) else { return false };
        if !lobby.is_member(conn_id) {
            return false;
        }

        let members: Vec<u64> = lobby.members().to_vec();
        let was_owner = lobby.is_owner(conn_id);
        lobby.remove(conn_id);

        // The membership as of departure (leaver included) hears about it.
        let left = Packet::LobbyLeft { lobby_id, user_id: conn_id };
        for member in &members {
            self.send_to(*member, &left);
        }

        if let Some(entry) = self.conns.get_mut(&conn_id) {
            entry.conn.lobby = None;
            entry.conn.priority = 0;
        }

        log::info!("[{}] left lobby {}", conn_id, lobby_id);

        if was_owner {
            self.destroy_lobby(lobby_id);
        }
        true
    }

    /// Cascading destruction: force every remaining member out in join
    /// order, each departure with its own broadcast, then deregister.
    fn destroy_lobby(&mut self, lobby_id: u64) {
        log::info!("[{}] destroying lobby", lobby_id);

        loop {
            let Some(lobby) = self.lobbies.get_mut(&lobby_id) else { break };
            let Some(next) = lobby.first_member() else { break };
            let members: Vec<u64> = lobby.members().to_vec();
            lobby.remove(next);

            let left = Packet::LobbyLeft { lobby_id, user_id: next };
            for member in &members {
                self.send_to(*member, &left);
            }
            if let Some(entry) = self.conns.get_mut(&next) {
                entry.conn.lobby = None;
                entry.conn.priority = 0;
            }
        }

        self.lobbies.remove(&lobby_id);
        log::info!("[{}] lobby removed, count: {}", lobby_id, self.lobbies.len());
    }

    /// Enumerate lobbies matching the exact game and password. The password
    /// gates visibility here, not just joinability; the explicit finish
    /// marker tells the requester the fan-out is complete.
    fn handle_lobby_list(&mut self, conn_id: u64, game: &str, password: &str) {
        let game = clamp_str(game, MAX_GAME_LEN);
        let password = clamp_str(password, MAX_PASSWORD_LEN);

        let summaries: Vec<Packet> = self
            .lobbies
            .values()
            .filter(|l| l.game == game && l.password == password)
            .map(|l| Packet::LobbyListGot {
                lobby_id: l.id,
                owner_id: l.owner,
                connections: l.member_count() as u16,
                max_connections: l.max_connections,
                game: l.game.clone(),
                version: l.version.clone(),
                host_name: l.host_name.clone(),
                mode: l.mode.clone(),
                description: l.description.clone(),
            })
            .collect();

        for summary in &summaries {
            self.send_to(conn_id, summary);
        }
        self.send_to(conn_id, &Packet::LobbyListFinish);
    }

    fn handle_lobby_update(
        &mut self,
        conn_id: u64,
        lobby_id: u64,
        game: &str,
        version: &str,
        host_name: &str,
        mode: &str,
        description: &str,
    ) {
        let Some(lobby) = self.lobbies.get_mut(&lobby_id) else {
            self.send_error(conn_id, ErrorCode::LobbyNotFound, lobby_id);
            return;
        };
        if !lobby.is_owner(conn_id) {
            log::warn!("[{}] lobby update for {} ignored: not the owner", conn_id, lobby_id);
            return;
        }
        lobby.apply_update(game, version, host_name, mode, description);
        log::info!("[{}] lobby {} updated", conn_id, lobby_id);
    }

    /// Forward a signaling packet to its target, with the sender id already
    /// rewritten into the packet by the caller.
    fn relay_signal(&mut self, from: u64, target: u64, packet: Packet) {
        if !self.conns.contains_key(&target) {
            log::error!("[{}] signaling target {} not found", from, target);
            return;
        }
        self.send_to(target, &packet);
        self.metrics.signaling_relayed_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Validate and apply a peer-failure report. Only the earlier joiner
    /// (strictly lower priority) may evict the later one, and both must
    /// still be members of the named lobby.
    fn handle_peer_failed(&mut self, reporter_id: u64, lobby_id: u64, peer_id: u64) {
        let reporter = match self.conns.get(&reporter_id) {
            Some(entry) if entry.conn.lobby == Some(lobby_id) => &entry.conn,
            _ => {
                log::error!("[{}] peer-failure report: reporter not in lobby {}", reporter_id, lobby_id);
                self.reject_report(reporter_id, peer_id);
                return;
            }
        };
        let reporter_priority = reporter.priority;
        let reporter_dest = reporter.dest_id;

        let reported = match self.conns.get(&peer_id) {
            Some(entry) if entry.conn.lobby == Some(lobby_id) => &entry.conn,
            _ => {
                log::error!("[{}] peer-failure report: peer {} not in lobby {}", reporter_id, peer_id, lobby_id);
                self.reject_report(reporter_id, peer_id);
                return;
            }
        };
        let reported_priority = reported.priority;
        let reported_dest = reported.dest_id;

        if reporter_priority >= reported_priority {
            log::error!(
                "[{}] peer-failure report rejected: priority {} >= {}",
                reporter_id,
                reporter_priority,
                reported_priority
            );
            self.reject_report(reporter_id, peer_id);
            return;
        }

        log::info!("[{}] evicting failed peer {} from lobby {}", reporter_id, peer_id, lobby_id);
        self.leave_lobby(peer_id, lobby_id);

        let now = Instant::now();
        self.reputation.credit(reporter_dest, now);
        self.reputation.penalize(reported_dest, now);
        self.metrics.peer_reports_accepted_total.fetch_add(1, Ordering::Relaxed);
    }

    fn reject_report(&mut self, reporter_id: u64, peer_id: u64) {
        self.metrics.peer_reports_rejected_total.fetch_add(1, Ordering::Relaxed);
        self.send_error(reporter_id, ErrorCode::StaleReport, peer_id);
    }

    // ------------------------------------------------------------------
    // Send helpers
    // ------------------------------------------------------------------

    fn send_to(&mut self, conn_id: u64, packet: &Packet) {
        if let Some(entry) = self.conns.get_mut(&conn_id) {
            entry.conn.send(packet);
        }
    }

    fn send_error(&mut self, conn_id: u64, code: ErrorCode, tag: u64) {
        self.send_to(conn_id, &Packet::Error { code, tag });
    }
}

// ============================================================================
// Server front: listener + threads
// ============================================================================

fn lock_state(state: &Mutex<ServerState>) -> MutexGuard<'_, ServerState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A bound, not-yet-running server.
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    sweep_interval: Duration,
    state: Arc<Mutex<ServerState>>,
    metrics: Arc<Metrics>,
}

impl Server {
    /// Bind with the default admission policy (allow all) and destination
    /// hasher.
    pub fn bind(config: ServerConfig) -> io::Result<Server> {
        Server::bind_with(config, Box::new(AllowAll), Box::new(AddressHasher))
    }

    pub fn bind_with(
        config: ServerConfig,
        admission: Box<dyn AdmissionPolicy>,
        dest_hasher: Box<dyn DestinationHasher>,
    ) -> io::Result<Server> {
        let listener = TcpListener::bind(("0.0.0.0", config.port))?;
        let local_addr = listener.local_addr()?;
        let metrics = Arc::new(Metrics::new());
        let sweep_interval = config.sweep_interval;
        let state = Arc::new(Mutex::new(ServerState::new(
            config,
            admission,
            dest_hasher,
            Arc::clone(&metrics),
        )));

        log::info!("listening on {}", local_addr);
        Ok(Server { listener, local_addr, sweep_interval, state, metrics })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        Arc::clone(&self.metrics)
    }

    /// Spawn the accept and sweep threads.
    pub fn start(self) -> io::Result<ServerHandle> {
        let poll = Poll::new()?;
        let shutdown = Arc::new(AtomicBool::new(false));

        let accept_state = Arc::clone(&self.state);
        let accept_shutdown = Arc::clone(&shutdown);
        let listener = self.listener.try_clone()?;
        thread::Builder::new()
            .name("accept".into())
            .spawn(move || accept_loop(listener, accept_state, accept_shutdown))?;

        let sweep_state = Arc::clone(&self.state);
        let sweep_shutdown = Arc::clone(&shutdown);
        let sweep_interval = self.sweep_interval;
        let sweep = thread::Builder::new()
            .name("sweep".into())
            .spawn(move || sweep_loop(poll, sweep_state, sweep_shutdown, sweep_interval))?;

        Ok(ServerHandle {
            local_addr: self.local_addr,
            shutdown,
            sweep: Some(sweep),
            metrics: self.metrics,
        })
    }
}

/// Handle to a running server; shuts it down when dropped.
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    sweep: Option<JoinHandle<()>>,
    metrics: Arc<Metrics>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        Arc::clone(&self.metrics)
    }

    /// Stop both threads and wait for the sweep to finish.
    pub fn shutdown(mut self) {
        self.shutdown_inner();
    }

    fn shutdown_inner(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        // The accept thread sits in a blocking accept; a throwaway dial
        // wakes it so it can observe the flag.
        let wake = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), self.local_addr.port());
        let _ = std::net::TcpStream::connect(wake);
        if let Some(handle) = self.sweep.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        if self.sweep.is_some() {
            self.shutdown_inner();
        }
    }
}

fn accept_loop(
    listener: TcpListener,
    state: Arc<Mutex<ServerState>>,
    shutdown: Arc<AtomicBool>,
) {
    log::info!("waiting for connections...");
    loop {
        match listener.accept() {
            Ok((stream, addr)) => {
                if shutdown.load(Ordering::Relaxed) {
                    break;
                }
                if let Err(e) = stream.set_nonblocking(true) {
                    log::error!("failed to set accepted socket non-blocking: {}", e);
                    continue;
                }
                let stream = mio::net::TcpStream::from_std(stream);
                lock_state(&state).accept_connection(stream, addr);
            }
            Err(e) => {
                if shutdown.load(Ordering::Relaxed) {
                    break;
                }
                log::error!("accept failed: {}", e);
            }
        }
    }
    log::info!("accept loop stopped");
}

fn sweep_loop(
    mut poll: Poll,
    state: Arc<Mutex<ServerState>>,
    shutdown: Arc<AtomicBool>,
    interval: Duration,
) {
    let mut events = Events::with_capacity(256);
    while !shutdown.load(Ordering::Relaxed) {
        if let Err(e) = poll.poll(&mut events, Some(interval)) {
            if e.kind() != io::ErrorKind::Interrupted {
                log::error!("poll failed: {}", e);
            }
        }

        let mut state = lock_state(&state);
        state.register_pending(poll.registry());
        state.sweep(Instant::now());
    }
    log::info!("sweep loop stopped");
}

// ============================================================================
// Tests
// ============================================================================
