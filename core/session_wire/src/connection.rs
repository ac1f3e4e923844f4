//! One transport connection endpoint
//!
//! Wraps a non-blocking TCP stream, owns the receive buffer, reassembles
//! frames, and tracks liveness timestamps. Nothing here ever blocks: reads
//! are single non-blocking syscalls, sends are fire-and-forget best-effort.
//!
//! The connection does not know about lobbies beyond an id back-reference;
//! the owning manager is responsible for the leave-lobby-then-close teardown
//! ordering so that handlers observing membership during teardown see
//! consistent state.

use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use mio::net::TcpStream;
use mio::{Interest, Registry, Token};

use crate::codec::{self, DecodeOutcome, Frame, MAX_PACKET_SIZE};
use crate::packets::Packet;

// ============================================================================
// Constants
// ============================================================================

/// Emit a keep-alive when nothing has been sent for this long.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(180);

/// Force-disconnect when nothing has been received for this long.
pub const DEAD_INTERVAL: Duration = Duration::from_secs(240);

/// Upper bound for a single non-blocking read.
const READ_CHUNK: usize = 1024;

/// Bounded spin budget for a send that hits a full socket buffer.
const SEND_RETRY_BUDGET: u32 = 100;

// ============================================================================
// Outcomes
// ============================================================================

/// What one receive pass produced.
#[derive(Debug)]
pub enum ReceiveOutcome {
    /// Nothing to read (or the connection is already inactive).
    Idle,
    /// Complete frames, in arrival order.
    Frames(Vec<Frame>),
    /// The transport ended; the owning manager must run teardown.
    Disconnected {
        /// Orderly close or reset (as opposed to an unexpected error).
        graceful: bool,
    },
}

/// Result of a liveness check against the two idle intervals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Alive,
    /// Send-idle: the owner should emit a keep-alive now.
    SendKeepAlive,
    /// Receive-idle past the dead interval: force-disconnect.
    Dead,
}

// ============================================================================
// Connection
// ============================================================================

/// One live transport endpoint and its protocol bookkeeping.
pub struct Connection {
    id: u64,
    /// Stable per-machine reputation key, distinct from the session id.
    pub dest_id: u64,
    /// Join-order priority inside the current lobby.
    pub priority: u32,
    /// Back-reference to at most one lobby, by id.
    pub lobby: Option<u64>,
    /// Set by the owner before an intentional close.
    pub intentional_disconnect: bool,

    stream: TcpStream,
    peer_addr: SocketAddr,
    active: bool,
    /// A send hit a transport error; the owner should tear this down.
    broken: bool,

    recv_buf: Vec<u8>,
    last_send: Instant,
    last_recv: Instant,
}

impl Connection {
    pub fn new(id: u64, stream: TcpStream, peer_addr: SocketAddr) -> Self {
        let now = Instant::now();
        Connection {
            id,
            dest_id: 0,
            priority: 0,
            lobby: None,
            intentional_disconnect: false,
            stream,
            peer_addr,
            active: true,
            broken: false,
            recv_buf: Vec::with_capacity(MAX_PACKET_SIZE),
            last_send: now,
            last_recv: now,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Register the underlying stream for readability wake-ups.
    pub fn register_readable(&mut self, registry: &Registry, token: Token) -> io::Result<()> {
        registry.register(&mut self.stream, token, Interest::READABLE)
    }

    /// Perform at most one non-blocking read and reassemble complete frames.
    pub fn receive_once(&mut self) -> ReceiveOutcome {
        if !self.active {
            return ReceiveOutcome::Idle;
        }

        let room = MAX_PACKET_SIZE.saturating_sub(self.recv_buf.len());
        if room == 0 {
            // A full buffer with no extractable frame means the stream is
            // desynchronized; nothing valid can ever complete.
            log::error!("[{}] receive buffer full, dropping connection", self.id);
            return ReceiveOutcome::Disconnected { graceful: false };
        }

        let mut chunk = [0u8; READ_CHUNK];
        let want = room.min(READ_CHUNK);
        match self.stream.read(&mut chunk[..want]) {
            Ok(0) => {
                log::info!("[{}] connection closed by peer", self.id);
                return ReceiveOutcome::Disconnected { graceful: true };
            }
            Ok(n) => {
                self.last_recv = Instant::now();
                self.recv_buf.extend_from_slice(&chunk[..n]);
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return ReceiveOutcome::Idle,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return ReceiveOutcome::Idle,
            Err(e)
                if e.kind() == io::ErrorKind::ConnectionReset
                    || e.kind() == io::ErrorKind::ConnectionAborted =>
            {
                log::info!("[{}] connection reset by peer", self.id);
                return ReceiveOutcome::Disconnected { graceful: true };
            }
            Err(e) => {
                log::error!("[{}] receive error: {}", self.id, e);
                return ReceiveOutcome::Disconnected { graceful: false };
            }
        }

        let mut frames = Vec::new();
        loop {
            match codec::try_decode(&self.recv_buf) {
                Ok(DecodeOutcome::NeedMore) => break,
                Ok(DecodeOutcome::Frame { frame, consumed }) => {
                    frames.push(frame);
                    self.recv_buf.drain(..consumed);
                }
                Err(e) => {
                    log::error!("[{}] framing error: {}", self.id, e);
                    return ReceiveOutcome::Disconnected { graceful: false };
                }
            }
        }

        if frames.is_empty() {
            ReceiveOutcome::Idle
        } else {
            ReceiveOutcome::Frames(frames)
        }
    }

    /// Fire-and-forget send. Failures are logged; a transport failure marks
    /// the connection broken for the owner's next sweep, and never
    /// interrupts the caller's fan-out loop.
    pub fn send(&mut self, packet: &Packet) -> bool {
        if !self.active {
            return false;
        }

        let bytes = match packet.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                log::error!("[{}] dropping {:?}: {}", self.id, packet.packet_type(), e);
                return false;
            }
        };

        let mut written = 0;
        let mut retries = 0;
        while written < bytes.len() {
            match self.stream.write(&bytes[written..]) {
                Ok(0) => {
                    log::error!("[{}] send wrote zero bytes", self.id);
                    self.broken = true;
                    return false;
                }
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if retries >= SEND_RETRY_BUDGET {
                        // Can't stall the sweep on one congested socket; a
                        // partially written frame is unrecoverable anyway.
                        log::error!("[{}] send stalled, dropping connection", self.id);
                        self.broken = true;
                        return false;
                    }
                    retries += 1;
                    std::thread::yield_now();
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    log::error!("[{}] send error: {}", self.id, e);
                    self.broken = true;
                    return false;
                }
            }
        }

        self.last_send = Instant::now();
        true
    }

    /// Check idle timers. The owner reacts: `SendKeepAlive` emits a
    /// [`Packet::KeepAlive`], `Dead` runs teardown.
    pub fn liveness(&self, now: Instant, keepalive: Duration, dead: Duration) -> Liveness {
        if !self.active {
            return Liveness::Alive;
        }
        if now.duration_since(self.last_recv) >= dead {
            Liveness::Dead
        } else if now.duration_since(self.last_send) >= keepalive {
            Liveness::SendKeepAlive
        } else {
            Liveness::Alive
        }
    }

    /// Mark inactive and shut the stream down. Idempotent; all further
    /// operations on this connection no-op.
    pub fn close(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        if let Err(e) = self.stream.shutdown(std::net::Shutdown::Both) {
            log::debug!("[{}] shutdown: {}", self.id, e);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
