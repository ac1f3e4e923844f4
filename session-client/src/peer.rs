//! Per-peer session state machine
//!
//! One session per remote lobby mate, layered over an opaque NAT-traversal
//! transport. The transport's states collapse into three observable phases;
//! phase *edges* (not levels) drive the peer-connected/disconnected
//! notifications.
//!
//! Role derivation is symmetric and deterministic from the two identifiers
//! alone: the peer with the numerically larger id is the controller and
//! sends the first offer, the other side answers once it arrives. No
//! coordination round is needed.

use std::time::{Duration, Instant};

use crate::ice::{IceError, IceEvent, IceState, IceTransport};

/// How long a not-yet-connected peer may stall before the earlier joiner
/// reports it to the server.
pub const PEER_FAILURE_TIMEOUT: Duration = Duration::from_secs(45);

// ============================================================================
// Phases
// ============================================================================

/// Observable peer phases, collapsed from the transport states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerPhase {
    /// Signaling or connectivity checks still in progress.
    Negotiating,
    /// Transport reached Connected/Completed; data may flow.
    Connected,
    /// Transport reported Disconnected/Failed.
    Down,
}

fn collapse(state: IceState) -> PeerPhase {
    match state {
        IceState::New | IceState::Gathering | IceState::Connecting => PeerPhase::Negotiating,
        IceState::Connected | IceState::Completed => PeerPhase::Connected,
        IceState::Disconnected | IceState::Failed => PeerPhase::Down,
    }
}

/// A phase transition worth notifying the application about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseEdge {
    Connected,
    Down,
}

// ============================================================================
// Peer session
// ============================================================================

pub struct PeerSession {
    id: u64,
    /// The remote's join priority, for failure arbitration.
    priority: u32,
    controller: bool,
    transport: Box<dyn IceTransport>,
    phase: PeerPhase,
    deadline: Instant,
    failure_timeout: Duration,
}

impl PeerSession {
    pub fn new(
        local_id: u64,
        remote_id: u64,
        priority: u32,
        transport: Box<dyn IceTransport>,
        now: Instant,
        failure_timeout: Duration,
    ) -> Self {
        PeerSession {
            id: remote_id,
            priority,
            // Larger identifier controls and offers first.
            controller: local_id > remote_id,
            transport,
            phase: PeerPhase::Negotiating,
            deadline: now + failure_timeout,
            failure_timeout,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn priority(&self) -> u32 {
        self.priority
    }

    pub fn is_controller(&self) -> bool {
        self.controller
    }

    pub fn phase(&self) -> PeerPhase {
        self.phase
    }

    // ------------------------------------------------------------------
    // Signaling pass-through
    // ------------------------------------------------------------------

    pub fn local_description(&mut self) -> Result<String, IceError> {
        self.transport.local_description()
    }

    pub fn set_remote_description(&mut self, sdp: &str) -> Result<(), IceError> {
        self.transport.set_remote_description(sdp)
    }

    pub fn gather_candidates(&mut self) -> Result<(), IceError> {
        self.transport.gather_candidates()
    }

    pub fn add_remote_candidate(&mut self, sdp: &str) -> Result<(), IceError> {
        self.transport.add_remote_candidate(sdp)
    }

    pub fn remote_gathering_done(&mut self) {
        self.transport.remote_gathering_done();
    }

    pub fn poll_transport(&mut self) -> Option<IceEvent> {
        self.transport.poll_event()
    }

    // ------------------------------------------------------------------
    // Phase tracking
    // ------------------------------------------------------------------

    /// Fold a transport state report into the phase machine. Returns an
    /// edge only on actual transitions; repeated reports of the same phase
    /// (e.g. Connected then Completed) never re-fire.
    pub fn observe_state(&mut self, state: IceState) -> Option<PhaseEdge> {
        let next = collapse(state);
        if next == self.phase {
            return None;
        }
        let edge = match next {
            PeerPhase::Connected => Some(PhaseEdge::Connected),
            PeerPhase::Down => Some(PhaseEdge::Down),
            PeerPhase::Negotiating => None,
        };
        self.phase = next;
        edge
    }

    // ------------------------------------------------------------------
    // Failure arbitration
    // ------------------------------------------------------------------

    /// Decide whether the local side should report this peer as failed.
    ///
    /// Only the side whose own join priority is strictly lower (the earlier
    /// joiner - exactly the reporter the server will accept) reports, so a
    /// stalled pair produces a single report instead of two. A successful
    /// decision resets the deadline for the next round.
    pub fn should_report_failure(&mut self, now: Instant, local_priority: u32) -> bool {
        if self.phase == PeerPhase::Connected {
            return false;
        }
        if local_priority >= self.priority {
            return false;
        }
        if now < self.deadline {
            return false;
        }
        self.deadline = now + self.failure_timeout;
        true
    }

    // ------------------------------------------------------------------
    // Data path
    // ------------------------------------------------------------------

    /// Send over the peer transport; refused until the transport reached
    /// Connected/Completed.
    pub fn send(&mut self, data: &[u8]) -> Result<(), IceError> {
        if self.phase != PeerPhase::Connected {
            return Err(IceError::NotConnected);
        }
        self.transport.send(data)
    }
}

// ============================================================================
// Tests
// ============================================================================
