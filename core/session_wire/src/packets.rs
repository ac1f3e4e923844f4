//! Packet registry for the rendezvous protocol
//!
//! Each packet type pairs a fixed-layout payload struct (serialized with
//! bincode's fixed-width little-endian integers, i.e. a packed struct on the
//! wire) with a declared string count and an origin role. The registry in
//! [`spec`] is what the dispatcher validates incoming frames against before
//! any handler runs.

use serde::{Deserialize, Serialize};

use crate::codec::{self, EncodeError};

// ============================================================================
// Protocol constants
// ============================================================================

/// Protocol version carried in [`Packet::Joined`]; clients disconnect on
/// mismatch.
pub const PROTOCOL_VERSION: u32 = 1;

/// Server-side truncation caps for lobby metadata strings.
pub const MAX_GAME_LEN: usize = 32;
pub const MAX_VERSION_LEN: usize = 32;
pub const MAX_HOST_NAME_LEN: usize = 32;
pub const MAX_MODE_LEN: usize = 32;
pub const MAX_PASSWORD_LEN: usize = 64;
pub const MAX_DESCRIPTION_LEN: usize = 256;

// ============================================================================
// Packet types
// ============================================================================

/// Wire identifier for each packet type. Zero is reserved and invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum PacketType {
    Joined = 1,
    LobbyCreate = 2,
    LobbyCreated = 3,
    LobbyJoin = 4,
    LobbyJoined = 5,
    LobbyLeave = 6,
    LobbyLeft = 7,
    LobbyListGet = 8,
    LobbyListGot = 9,
    LobbyListFinish = 10,
    PeerSdp = 11,
    PeerCandidate = 12,
    PeerCandidateDone = 13,
    PeerFailed = 14,
    StunTurn = 15,
    Error = 16,
    LobbyUpdate = 17,
    KeepAlive = 18,
}

impl PacketType {
    /// Map a raw wire id back to a packet type.
    pub fn from_wire(raw: u16) -> Option<PacketType> {
        match raw {
            1 => Some(PacketType::Joined),
            2 => Some(PacketType::LobbyCreate),
            3 => Some(PacketType::LobbyCreated),
            4 => Some(PacketType::LobbyJoin),
            5 => Some(PacketType::LobbyJoined),
            6 => Some(PacketType::LobbyLeave),
            7 => Some(PacketType::LobbyLeft),
            8 => Some(PacketType::LobbyListGet),
            9 => Some(PacketType::LobbyListGot),
            10 => Some(PacketType::LobbyListFinish),
            11 => Some(PacketType::PeerSdp),
            12 => Some(PacketType::PeerCandidate),
            13 => Some(PacketType::PeerCandidateDone),
            14 => Some(PacketType::PeerFailed),
            15 => Some(PacketType::StunTurn),
            16 => Some(PacketType::Error),
            17 => Some(PacketType::LobbyUpdate),
            18 => Some(PacketType::KeepAlive),
            _ => None,
        }
    }
}

/// Which side of the connection is allowed to originate a packet type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Sent by clients, received by the server.
    Client,
    /// Sent by the server, received by clients.
    Server,
    /// Valid in both directions (signaling relay, keep-alive).
    Both,
}

/// Registered shape of one packet type.
#[derive(Debug, Clone, Copy)]
pub struct PacketSpec {
    pub packet_type: PacketType,
    pub payload_size: u16,
    pub string_count: u16,
    pub origin: Origin,
}

/// Look up the registered shape for a packet type.
pub fn spec(packet_type: PacketType) -> PacketSpec {
    use PacketType::*;
    let (payload_size, string_count, origin) = match packet_type {
        Joined => (JoinedData::WIRE_SIZE, 0, Origin::Server),
        LobbyCreate => (LobbyCreateData::WIRE_SIZE, 6, Origin::Client),
        LobbyCreated => (LobbyCreatedData::WIRE_SIZE, 4, Origin::Server),
        LobbyJoin => (LobbyJoinData::WIRE_SIZE, 1, Origin::Client),
        LobbyJoined => (LobbyJoinedData::WIRE_SIZE, 0, Origin::Server),
        LobbyLeave => (LobbyLeaveData::WIRE_SIZE, 0, Origin::Client),
        LobbyLeft => (LobbyLeftData::WIRE_SIZE, 0, Origin::Server),
        LobbyListGet => (0, 2, Origin::Client),
        LobbyListGot => (LobbyListGotData::WIRE_SIZE, 5, Origin::Server),
        LobbyListFinish => (0, 0, Origin::Server),
        PeerSdp => (PeerSignalData::WIRE_SIZE, 1, Origin::Both),
        PeerCandidate => (PeerSignalData::WIRE_SIZE, 1, Origin::Both),
        PeerCandidateDone => (PeerSignalData::WIRE_SIZE, 0, Origin::Both),
        PeerFailed => (PeerFailedData::WIRE_SIZE, 0, Origin::Client),
        StunTurn => (StunTurnData::WIRE_SIZE, 3, Origin::Server),
        Error => (ErrorData::WIRE_SIZE, 0, Origin::Server),
        LobbyUpdate => (LobbyUpdateData::WIRE_SIZE, 5, Origin::Client),
        KeepAlive => (0, 0, Origin::Both),
    };
    PacketSpec { packet_type, payload_size, string_count, origin }
}

// ============================================================================
// Error codes
// ============================================================================

/// Semantic error codes carried in [`Packet::Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ErrorCode {
    None = 0,
    LobbyNotFound = 1,
    LobbyFull = 2,
    JoinFailed = 3,
    PasswordIncorrect = 4,
    AlreadyMember = 5,
    StaleReport = 6,
}

impl ErrorCode {
    pub fn from_wire(raw: u16) -> ErrorCode {
        match raw {
            1 => ErrorCode::LobbyNotFound,
            2 => ErrorCode::LobbyFull,
            3 => ErrorCode::JoinFailed,
            4 => ErrorCode::PasswordIncorrect,
            5 => ErrorCode::AlreadyMember,
            6 => ErrorCode::StaleReport,
            _ => ErrorCode::None,
        }
    }
}

// ============================================================================
// Fixed-layout payload structs
// ============================================================================

// bincode's default options serialize these as fixed-width little-endian
// fields with no padding, so WIRE_SIZE is the plain sum of field widths.
// The sizes are asserted against bincode in the tests below.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinedData {
    pub user_id: u64,
    pub version: u32,
}

impl JoinedData {
    pub const WIRE_SIZE: u16 = 12;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LobbyCreateData {
    pub max_connections: u16,
}

impl LobbyCreateData {
    pub const WIRE_SIZE: u16 = 2;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LobbyCreatedData {
    pub lobby_id: u64,
    pub max_connections: u64,
}

impl LobbyCreatedData {
    pub const WIRE_SIZE: u16 = 16;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LobbyJoinData {
    pub lobby_id: u64,
}

impl LobbyJoinData {
    pub const WIRE_SIZE: u16 = 8;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LobbyJoinedData {
    pub lobby_id: u64,
    pub user_id: u64,
    pub owner_id: u64,
    pub dest_id: u64,
    pub priority: u32,
}

impl LobbyJoinedData {
    pub const WIRE_SIZE: u16 = 36;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LobbyLeaveData {
    pub lobby_id: u64,
}

impl LobbyLeaveData {
    pub const WIRE_SIZE: u16 = 8;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LobbyLeftData {
    pub lobby_id: u64,
    pub user_id: u64,
}

impl LobbyLeftData {
    pub const WIRE_SIZE: u16 = 16;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LobbyListGotData {
    pub lobby_id: u64,
    pub owner_id: u64,
    pub connections: u16,
    pub max_connections: u16,
}

impl LobbyListGotData {
    pub const WIRE_SIZE: u16 = 20;
}

/// Shared layout of the three peer-signaling packets (sdp, candidate,
/// candidate-done). `user_id` is the relay target on the way in and the
/// original sender on the way out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerSignalData {
    pub lobby_id: u64,
    pub user_id: u64,
}

impl PeerSignalData {
    pub const WIRE_SIZE: u16 = 16;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerFailedData {
    pub lobby_id: u64,
    pub peer_id: u64,
}

impl PeerFailedData {
    pub const WIRE_SIZE: u16 = 16;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StunTurnData {
    pub is_stun: u8,
    pub port: u16,
}

impl StunTurnData {
    pub const WIRE_SIZE: u16 = 3;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorData {
    pub error_number: u16,
    pub tag: u64,
}

impl ErrorData {
    pub const WIRE_SIZE: u16 = 10;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LobbyUpdateData {
    pub lobby_id: u64,
}

impl LobbyUpdateData {
    pub const WIRE_SIZE: u16 = 8;
}

// ============================================================================
// Typed packets
// ============================================================================

/// A fully decoded, validated packet.
///
/// This is the closed set of messages the engine speaks; handlers match on
/// it directly instead of going through any dynamic handler table.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Joined {
        user_id: u64,
        version: u32,
    },
    LobbyCreate {
        max_connections: u16,
        game: String,
        version: String,
        host_name: String,
        mode: String,
        password: String,
        description: String,
    },
    LobbyCreated {
        lobby_id: u64,
        max_connections: u64,
        game: String,
        version: String,
        host_name: String,
        mode: String,
    },
    LobbyJoin {
        lobby_id: u64,
        password: String,
    },
    LobbyJoined {
        lobby_id: u64,
        user_id: u64,
        owner_id: u64,
        dest_id: u64,
        priority: u32,
    },
    LobbyLeave {
        lobby_id: u64,
    },
    LobbyLeft {
        lobby_id: u64,
        user_id: u64,
    },
    LobbyListGet {
        game: String,
        password: String,
    },
    LobbyListGot {
        lobby_id: u64,
        owner_id: u64,
        connections: u16,
        max_connections: u16,
        game: String,
        version: String,
        host_name: String,
        mode: String,
        description: String,
    },
    LobbyListFinish,
    PeerSdp {
        lobby_id: u64,
        user_id: u64,
        sdp: String,
    },
    PeerCandidate {
        lobby_id: u64,
        user_id: u64,
        sdp: String,
    },
    PeerCandidateDone {
        lobby_id: u64,
        user_id: u64,
    },
    PeerFailed {
        lobby_id: u64,
        peer_id: u64,
    },
    StunTurn {
        is_stun: bool,
        port: u16,
        host: String,
        username: String,
        password: String,
    },
    Error {
        code: ErrorCode,
        tag: u64,
    },
    LobbyUpdate {
        lobby_id: u64,
        game: String,
        version: String,
        host_name: String,
        mode: String,
        description: String,
    },
    KeepAlive,
}

impl Packet {
    /// The wire type of this packet.
    pub fn packet_type(&self) -> PacketType {
        match self {
            Packet::Joined { .. } => PacketType::Joined,
            Packet::LobbyCreate { .. } => PacketType::LobbyCreate,
            Packet::LobbyCreated { .. } => PacketType::LobbyCreated,
            Packet::LobbyJoin { .. } => PacketType::LobbyJoin,
            Packet::LobbyJoined { .. } => PacketType::LobbyJoined,
            Packet::LobbyLeave { .. } => PacketType::LobbyLeave,
            Packet::LobbyLeft { .. } => PacketType::LobbyLeft,
            Packet::LobbyListGet { .. } => PacketType::LobbyListGet,
            Packet::LobbyListGot { .. } => PacketType::LobbyListGot,
            Packet::LobbyListFinish => PacketType::LobbyListFinish,
            Packet::PeerSdp { .. } => PacketType::PeerSdp,
            Packet::PeerCandidate { .. } => PacketType::PeerCandidate,
            Packet::PeerCandidateDone { .. } => PacketType::PeerCandidateDone,
            Packet::PeerFailed { .. } => PacketType::PeerFailed,
            Packet::StunTurn { .. } => PacketType::StunTurn,
            Packet::Error { .. } => PacketType::Error,
            Packet::LobbyUpdate { .. } => PacketType::LobbyUpdate,
            Packet::KeepAlive => PacketType::KeepAlive,
        }
    }

    /// Serialize into the raw `(payload, strings)` parts of a frame.
    fn parts(&self) -> (Vec<u8>, Vec<String>) {
        fn ser<T: Serialize>(value: &T) -> Vec<u8> {
            // Fixed-layout structs of integers cannot fail to serialize.
            bincode::serialize(value).unwrap_or_default()
        }

        match self {
            Packet::Joined { user_id, version } => (
                ser(&JoinedData { user_id: *user_id, version: *version }),
                vec![],
            ),
            Packet::LobbyCreate {
                max_connections,
                game,
                version,
                host_name,
                mode,
                password,
                description,
            } => (
                ser(&LobbyCreateData { max_connections: *max_connections }),
                vec![
                    game.clone(),
                    version.clone(),
                    host_name.clone(),
                    mode.clone(),
                    password.clone(),
                    description.clone(),
                ],
            ),
            Packet::LobbyCreated {
                lobby_id,
                max_connections,
                game,
                version,
                host_name,
                mode,
            } => (
                ser(&LobbyCreatedData {
                    lobby_id: *lobby_id,
                    max_connections: *max_connections,
                }),
                vec![game.clone(), version.clone(), host_name.clone(), mode.clone()],
            ),
            Packet::LobbyJoin { lobby_id, password } => (
                ser(&LobbyJoinData { lobby_id: *lobby_id }),
                vec![password.clone()],
            ),
            Packet::LobbyJoined { lobby_id, user_id, owner_id, dest_id, priority } => (
                ser(&LobbyJoinedData {
                    lobby_id: *lobby_id,
                    user_id: *user_id,
                    owner_id: *owner_id,
                    dest_id: *dest_id,
                    priority: *priority,
                }),
                vec![],
            ),
            Packet::LobbyLeave { lobby_id } => {
                (ser(&LobbyLeaveData { lobby_id: *lobby_id }), vec![])
            }
            Packet::LobbyLeft { lobby_id, user_id } => (
                ser(&LobbyLeftData { lobby_id: *lobby_id, user_id: *user_id }),
                vec![],
            ),
            Packet::LobbyListGet { game, password } => {
                (vec![], vec![game.clone(), password.clone()])
            }
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
            } => (
                ser(&LobbyListGotData {
                    lobby_id: *lobby_id,
                    owner_id: *owner_id,
                    connections: *connections,
                    max_connections: *max_connections,
                }),
                vec![
                    game.clone(),
                    version.clone(),
                    host_name.clone(),
                    mode.clone(),
                    description.clone(),
                ],
            ),
            Packet::LobbyListFinish => (vec![], vec![]),
            Packet::PeerSdp { lobby_id, user_id, sdp } => (
                ser(&PeerSignalData { lobby_id: *lobby_id, user_id: *user_id }),
                vec![sdp.clone()],
            ),
            Packet::PeerCandidate { lobby_id, user_id, sdp } => (
                ser(&PeerSignalData { lobby_id: *lobby_id, user_id: *user_id }),
                vec![sdp.clone()],
            ),
            Packet::PeerCandidateDone { lobby_id, user_id } => (
                ser(&PeerSignalData { lobby_id: *lobby_id, user_id: *user_id }),
                vec![],
            ),
            Packet::PeerFailed { lobby_id, peer_id } => (
                ser(&PeerFailedData { lobby_id: *lobby_id, peer_id: *peer_id }),
                vec![],
            ),
            Packet::StunTurn { is_stun, port, host, username, password } => (
                ser(&StunTurnData { is_stun: u8::from(*is_stun), port: *port }),
                vec![host.clone(), username.clone(), password.clone()],
            ),
            Packet::Error { code, tag } => (
                ser(&ErrorData { error_number: *code as u16, tag: *tag }),
                vec![],
            ),
            Packet::LobbyUpdate { lobby_id, game, version, host_name, mode, description } => (
                ser(&LobbyUpdateData { lobby_id: *lobby_id }),
                vec![
                    game.clone(),
                    version.clone(),
                    host_name.clone(),
                    mode.clone(),
                    description.clone(),
                ],
            ),
            Packet::KeepAlive => (vec![], vec![]),
        }
    }

    /// Encode into wire bytes.
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        let (payload, strings) = self.parts();
        codec::encode_frame(self.packet_type() as u16, &payload, &strings)
    }
}

/// Truncate a lobby metadata string to its protocol cap, respecting UTF-8
/// boundaries.
pub fn clamp_str(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_sizes_match_bincode() {
        // WIRE_SIZE constants are what the dispatcher validates against, so
        // they must agree with what bincode actually produces.
        let sample = JoinedData { user_id: 1, version: 2 };
        assert_eq!(bincode::serialize(&sample).unwrap().len(), JoinedData::WIRE_SIZE as usize);

        let sample = LobbyCreateData { max_connections: 4 };
        assert_eq!(bincode::serialize(&sample).unwrap().len(), LobbyCreateData::WIRE_SIZE as usize);

        let sample = LobbyCreatedData { lobby_id: 1, max_connections: 2 };
        assert_eq!(bincode::serialize(&sample).unwrap().len(), LobbyCreatedData::WIRE_SIZE as usize);

        let sample = LobbyJoinedData { lobby_id: 1, user_id: 2, owner_id: 3, dest_id: 4, priority: 5 };
        assert_eq!(bincode::serialize(&sample).unwrap().len(), LobbyJoinedData::WIRE_SIZE as usize);

        let sample = LobbyListGotData { lobby_id: 1, owner_id: 2, connections: 3, max_connections: 4 };
        assert_eq!(bincode::serialize(&sample).unwrap().len(), LobbyListGotData::WIRE_SIZE as usize);

        let sample = PeerSignalData { lobby_id: 1, user_id: 2 };
        assert_eq!(bincode::serialize(&sample).unwrap().len(), PeerSignalData::WIRE_SIZE as usize);

        let sample = StunTurnData { is_stun: 1, port: 3478 };
        assert_eq!(bincode::serialize(&sample).unwrap().len(), StunTurnData::WIRE_SIZE as usize);

        let sample = ErrorData { error_number: 2, tag: 9 };
        assert_eq!(bincode::serialize(&sample).unwrap().len(), ErrorData::WIRE_SIZE as usize);
    }

    #[test]
    fn test_payload_is_little_endian() {
        let bytes = bincode::serialize(&LobbyJoinData { lobby_id: 0x0102_0304_0506_0708 }).unwrap();
        assert_eq!(bytes, vec![0x08, 0x07, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01]);
    }

    #[test]
    fn test_packet_type_round_trip() {
        for raw in 1..=18u16 {
            let pt = PacketType::from_wire(raw).unwrap();
            assert_eq!(pt as u16, raw);
        }
        assert_eq!(PacketType::from_wire(0), None);
        assert_eq!(PacketType::from_wire(19), None);
    }

    #[test]
    fn test_spec_string_counts() {
        assert_eq!(spec(PacketType::LobbyCreate).string_count, 6);
        assert_eq!(spec(PacketType::LobbyCreated).string_count, 4);
        assert_eq!(spec(PacketType::LobbyListGot).string_count, 5);
        assert_eq!(spec(PacketType::PeerSdp).string_count, 1);
        assert_eq!(spec(PacketType::PeerCandidateDone).string_count, 0);
        assert_eq!(spec(PacketType::KeepAlive).payload_size, 0);
    }

    #[test]
    fn test_error_code_round_trip() {
        for code in [
            ErrorCode::LobbyNotFound,
            ErrorCode::LobbyFull,
            ErrorCode::JoinFailed,
            ErrorCode::PasswordIncorrect,
            ErrorCode::AlreadyMember,
            ErrorCode::StaleReport,
        ] {
            assert_eq!(ErrorCode::from_wire(code as u16), code);
        }
        assert_eq!(ErrorCode::from_wire(999), ErrorCode::None);
    }

    #[test]
    fn test_clamp_str() {
        assert_eq!(clamp_str("short", 32), "short");
        assert_eq!(clamp_str("abcdef", 3), "abc");
        // Multi-byte characters are never split.
        let s = "aé"; // 'é' is two bytes starting at index 1
        assert_eq!(clamp_str(s, 2), "a");
    }
}
