//! Client events and the user-facing callback surface
//!
//! Packet handlers on the background thread never mutate client state
//! directly; they enqueue [`Event`]s into a mutex-guarded queue. The
//! foreground [`crate::SessionClient::update`] call drains that queue,
//! applies state transitions and fires [`SessionCallbacks`] - which is why
//! user callbacks never run concurrently with each other or with the
//! background thread.

use session_wire::{ErrorCode, RelayServer};

// ============================================================================
// Internal events
// ============================================================================

/// Peer signaling relayed from a lobby mate via the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerSignal {
    /// Remote session description (offer or answer).
    Description(String),
    /// One remote candidate.
    Candidate(String),
    /// The remote side finished gathering candidates.
    CandidatesDone,
}

/// One lobby summary from a list request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LobbyListEntry {
    pub lobby_id: u64,
    pub owner_id: u64,
    pub connections: u16,
    pub max_connections: u16,
    pub game: String,
    pub version: String,
    pub host_name: String,
    pub mode: String,
    pub description: String,
}

/// Everything the background thread hands to the update drain.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Connected { user_id: u64, version: u32 },
    Disconnected { intentional: bool },
    LobbyCreated {
        lobby_id: u64,
        max_connections: u64,
        game: String,
        version: String,
        host_name: String,
        mode: String,
    },
    LobbyJoined {
        lobby_id: u64,
        user_id: u64,
        owner_id: u64,
        dest_id: u64,
        priority: u32,
    },
    LobbyLeft { lobby_id: u64, user_id: u64 },
    LobbyListGot { entry: LobbyListEntry },
    LobbyListFinish,
    /// One relay directory entry from the server.
    RelayEntry { is_stun: bool, server: RelayServer },
    /// Signaling for one of our peer sessions; applied, never surfaced.
    PeerSignal { from: u64, signal: PeerSignal },
    PeerConnected { peer_id: u64 },
    PeerDisconnected { peer_id: u64 },
    Received { from: u64, data: Vec<u8> },
    ProtocolError { code: ErrorCode, tag: u64 },
}

// ============================================================================
// Callback surface
// ============================================================================

/// Observer interface the embedding application implements. Every method
/// fires on the thread calling `update()`, never concurrently.
pub trait SessionCallbacks {
    fn on_connected(&mut self, _user_id: u64) {}
    fn on_disconnected(&mut self, _intentional: bool) {}
    fn on_lobby_created(
        &mut self,
        _lobby_id: u64,
        _game: &str,
        _version: &str,
        _host_name: &str,
        _mode: &str,
        _max_connections: u64,
    ) {
    }
    fn on_lobby_joined(&mut self, _lobby_id: u64, _user_id: u64, _owner_id: u64, _dest_id: u64) {}
    fn on_lobby_left(&mut self, _lobby_id: u64, _user_id: u64) {}
    fn on_lobby_list_got(&mut self, _entry: &LobbyListEntry) {}
    fn on_lobby_list_finish(&mut self) {}
    fn on_received(&mut self, _from: u64, _data: &[u8]) {}
    fn on_error(&mut self, _code: ErrorCode, _tag: u64) {}
    fn on_peer_connected(&mut self, _peer_id: u64) {}
    fn on_peer_disconnected(&mut self, _peer_id: u64) {}
}
