//! Opaque peer-transport abstraction
//!
//! The actual ICE/STUN/TURN NAT-traversal library is an external
//! collaborator; the client only needs the narrow surface below. One
//! transport exists per peer session, created from the relay directory the
//! server handed out at join time. Event delivery is a poll-based queue
//! drained by the client's background thread, so no foreign callback thread
//! ever touches client state.

use std::fmt;

use session_wire::RelayDirectory;

// ============================================================================
// States and events
// ============================================================================

/// Raw NAT-traversal transport states, as reported by the library.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceState {
    New,
    Gathering,
    Connecting,
    Connected,
    Completed,
    Disconnected,
    Failed,
}

/// Asynchronous transport notifications, polled by the background thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IceEvent {
    StateChanged(IceState),
    /// A local candidate was discovered; relay it to the peer.
    CandidateFound(String),
    /// Local candidate gathering finished.
    GatheringDone,
    /// Data arrived over the established peer transport.
    DataReceived(Vec<u8>),
}

// ============================================================================
// Errors
// ============================================================================

/// Peer-transport failure.
#[derive(Debug)]
pub enum IceError {
    /// Transport creation failed.
    Create(String),
    /// A signaling operation (descriptions, candidates) failed.
    Signaling(String),
    /// Send refused: the transport has not reached Connected/Completed.
    NotConnected,
    /// Send failed on an established transport.
    Send(String),
}

impl fmt::Display for IceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IceError::Create(msg) => write!(f, "transport creation failed: {}", msg),
            IceError::Signaling(msg) => write!(f, "signaling failed: {}", msg),
            IceError::NotConnected => write!(f, "peer transport not connected"),
            IceError::Send(msg) => write!(f, "send failed: {}", msg),
        }
    }
}

impl std::error::Error for IceError {}

// ============================================================================
// Transport traits
// ============================================================================

/// One NAT-traversal transport toward one peer.
pub trait IceTransport: Send {
    /// Local session description (the SDP offer/answer body).
    fn local_description(&mut self) -> Result<String, IceError>;

    fn set_remote_description(&mut self, sdp: &str) -> Result<(), IceError>;

    /// Start local candidate gathering; discovered candidates surface as
    /// [`IceEvent::CandidateFound`].
    fn gather_candidates(&mut self) -> Result<(), IceError>;

    fn add_remote_candidate(&mut self, sdp: &str) -> Result<(), IceError>;

    /// The remote side finished gathering; no more candidates will arrive.
    fn remote_gathering_done(&mut self);

    fn send(&mut self, data: &[u8]) -> Result<(), IceError>;

    fn state(&self) -> IceState;

    /// Next pending notification, if any.
    fn poll_event(&mut self) -> Option<IceEvent>;
}

/// Creates one transport per peer from the server's relay directory.
pub trait IceFactory: Send {
    fn create(&self, relays: &RelayDirectory) -> Result<Box<dyn IceTransport>, IceError>;
}
