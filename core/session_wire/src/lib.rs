//! Shared protocol core for the rendezvous session engine
//!
//! This crate is the language both sides speak:
//! - `codec` — length-prefixed binary framing and string-block parsing
//! - `packets` — the packet registry and typed [`Packet`] enum
//! - `dispatch` — shape/role validation of incoming frames
//! - `connection` — one non-blocking transport endpoint with liveness
//! - `relay` — STUN/TURN directory entries
//!
//! ```text
//! bytes ──codec──► Frame ──dispatch──► Packet ──► server / client handlers
//! ```

pub mod codec;
pub mod connection;
pub mod dispatch;
pub mod packets;
pub mod relay;

pub use codec::{Frame, MAX_PACKET_SIZE};
pub use connection::{Connection, Liveness, ReceiveOutcome, DEAD_INTERVAL, KEEPALIVE_INTERVAL};
pub use dispatch::{DispatchError, Dispatcher, Role};
pub use packets::{ErrorCode, Packet, PacketType, PROTOCOL_VERSION};
pub use relay::{RelayDirectory, RelayServer};
