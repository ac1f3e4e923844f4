//! Frame validation and decoding into typed packets
//!
//! The dispatcher checks every reassembled frame against the packet registry
//! before anything else sees it. Validation order (first failure wins, the
//! packet is dropped and logged by the caller, the connection stays up):
//!
//! 1. packet type is known and non-zero
//! 2. payload size matches the registration exactly
//! 3. the string block partitions cleanly and the count matches exactly
//! 4. the sender role may originate this packet type

use std::fmt;

use serde::de::DeserializeOwned;

use crate::codec::{self, Frame};
use crate::packets::{
    spec, ErrorCode, ErrorData, JoinedData, LobbyCreateData, LobbyCreatedData, LobbyJoinData,
    LobbyJoinedData, LobbyLeaveData, LobbyLeftData, LobbyListGotData, LobbyUpdateData, Origin,
    Packet, PacketType, PeerFailedData, PeerSignalData, StunTurnData,
};

// ============================================================================
// Roles
// ============================================================================

/// Which side of the protocol this endpoint is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

impl Role {
    /// May this endpoint receive a packet with the given origin?
    fn accepts(self, origin: Origin) -> bool {
        match origin {
            Origin::Both => true,
            Origin::Client => self == Role::Server,
            Origin::Server => self == Role::Client,
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Why a frame was rejected before reaching a handler.
#[derive(Debug, PartialEq, Eq)]
pub enum DispatchError {
    UnknownType(u16),
    PayloadSizeMismatch { packet_type: PacketType, got: u16, expected: u16 },
    BadStringBlock { packet_type: PacketType },
    StringCountMismatch { packet_type: PacketType, got: u16, expected: u16 },
    WrongOrigin { packet_type: PacketType, role: Role },
    Payload { packet_type: PacketType, detail: String },
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchError::UnknownType(raw) => write!(f, "unknown packet type {}", raw),
            DispatchError::PayloadSizeMismatch { packet_type, got, expected } => write!(
                f,
                "{:?}: payload size {} != expected {}",
                packet_type, got, expected
            ),
            DispatchError::BadStringBlock { packet_type } => {
                write!(f, "{:?}: malformed string block", packet_type)
            }
            DispatchError::StringCountMismatch { packet_type, got, expected } => write!(
                f,
                "{:?}: string count {} != expected {}",
                packet_type, got, expected
            ),
            DispatchError::WrongOrigin { packet_type, role } => {
                write!(f, "{:?}: not receivable by a {:?}", packet_type, role)
            }
            DispatchError::Payload { packet_type, detail } => {
                write!(f, "{:?}: payload decode failed: {}", packet_type, detail)
            }
        }
    }
}

impl std::error::Error for DispatchError {}

// ============================================================================
// Dispatcher
// ============================================================================

/// Validates frames for one endpoint role and decodes them into [`Packet`]s.
#[derive(Debug, Clone, Copy)]
pub struct Dispatcher {
    role: Role,
}

impl Dispatcher {
    pub fn new(role: Role) -> Self {
        Dispatcher { role }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Validate a frame against the registry and decode it.
    pub fn decode(&self, frame: &Frame) -> Result<Packet, DispatchError> {
        let packet_type = PacketType::from_wire(frame.packet_type)
            .ok_or(DispatchError::UnknownType(frame.packet_type))?;
        let spec = spec(packet_type);

        if frame.payload.len() != spec.payload_size as usize {
            return Err(DispatchError::PayloadSizeMismatch {
                packet_type,
                got: frame.payload.len() as u16,
                expected: spec.payload_size,
            });
        }

        let strings = codec::parse_strings(&frame.string_block)
            .map_err(|_| DispatchError::BadStringBlock { packet_type })?;
        if strings.len() != spec.string_count as usize {
            return Err(DispatchError::StringCountMismatch {
                packet_type,
                got: strings.len() as u16,
                expected: spec.string_count,
            });
        }

        if !self.role.accepts(spec.origin) {
            return Err(DispatchError::WrongOrigin { packet_type, role: self.role });
        }

        build_packet(packet_type, &frame.payload, strings)
    }
}

fn de<T: DeserializeOwned>(packet_type: PacketType, payload: &[u8]) -> Result<T, DispatchError> {
    bincode::deserialize(payload).map_err(|e| DispatchError::Payload {
        packet_type,
        detail: e.to_string(),
    })
}

fn build_packet(
    packet_type: PacketType,
    payload: &[u8],
    strings: Vec<String>,
) -> Result<Packet, DispatchError> {
    let mut strings = strings.into_iter();
    let mut next = || strings.next().unwrap_or_default();

    let packet = match packet_type {
        PacketType::Joined => {
            let d: JoinedData = de(packet_type, payload)?;
            Packet::Joined { user_id: d.user_id, version: d.version }
        }
        PacketType::LobbyCreate => {
            let d: LobbyCreateData = de(packet_type, payload)?;
            Packet::LobbyCreate {
                max_connections: d.max_connections,
                game: next(),
                version: next(),
                host_name: next(),
                mode: next(),
                password: next(),
                description: next(),
            }
        }
        PacketType::LobbyCreated => {
            let d: LobbyCreatedData = de(packet_type, payload)?;
            Packet::LobbyCreated {
                lobby_id: d.lobby_id,
                max_connections: d.max_connections,
                game: next(),
                version: next(),
                host_name: next(),
                mode: next(),
            }
        }
        PacketType::LobbyJoin => {
            let d: LobbyJoinData = de(packet_type, payload)?;
            Packet::LobbyJoin { lobby_id: d.lobby_id, password: next() }
        }
        PacketType::LobbyJoined => {
            let d: LobbyJoinedData = de(packet_type, payload)?;
            Packet::LobbyJoined {
                lobby_id: d.lobby_id,
                user_id: d.user_id,
                owner_id: d.owner_id,
                dest_id: d.dest_id,
                priority: d.priority,
            }
        }
        PacketType::LobbyLeave => {
            let d: LobbyLeaveData = de(packet_type, payload)?;
            Packet::LobbyLeave { lobby_id: d.lobby_id }
        }
        PacketType::LobbyLeft => {
            let d: LobbyLeftData = de(packet_type, payload)?;
            Packet::LobbyLeft { lobby_id: d.lobby_id, user_id: d.user_id }
        }
        PacketType::LobbyListGet => Packet::LobbyListGet { game: next(), password: next() },
        PacketType::LobbyListGot => {
            let d: LobbyListGotData = de(packet_type, payload)?;
            Packet::LobbyListGot {
                lobby_id: d.lobby_id,
                owner_id: d.owner_id,
                connections: d.connections,
                max_connections: d.max_connections,
                game: next(),
                version: next(),
                host_name: next(),
                mode: next(),
                description: next(),
            }
        }
        PacketType::LobbyListFinish => Packet::LobbyListFinish,
        PacketType::PeerSdp => {
            let d: PeerSignalData = de(packet_type, payload)?;
            Packet::PeerSdp { lobby_id: d.lobby_id, user_id: d.user_id, sdp: next() }
        }
        PacketType::PeerCandidate => {
            let d: PeerSignalData = de(packet_type, payload)?;
            Packet::PeerCandidate { lobby_id: d.lobby_id, user_id: d.user_id, sdp: next() }
        }
        PacketType::PeerCandidateDone => {
            let d: PeerSignalData = de(packet_type, payload)?;
            Packet::PeerCandidateDone { lobby_id: d.lobby_id, user_id: d.user_id }
        }
        PacketType::PeerFailed => {
            let d: PeerFailedData = de(packet_type, payload)?;
            Packet::PeerFailed { lobby_id: d.lobby_id, peer_id: d.peer_id }
        }
        PacketType::StunTurn => {
            let d: StunTurnData = de(packet_type, payload)?;
            Packet::StunTurn {
                is_stun: d.is_stun != 0,
                port: d.port,
                host: next(),
                username: next(),
                password: next(),
            }
        }
        PacketType::Error => {
            let d: ErrorData = de(packet_type, payload)?;
            Packet::Error { code: ErrorCode::from_wire(d.error_number), tag: d.tag }
        }
        PacketType::LobbyUpdate => {
            let d: LobbyUpdateData = de(packet_type, payload)?;
            Packet::LobbyUpdate {
                lobby_id: d.lobby_id,
                game: next(),
                version: next(),
                host_name: next(),
                mode: next(),
                description: next(),
            }
        }
        PacketType::KeepAlive => Packet::KeepAlive,
    };

    Ok(packet)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{try_decode, DecodeOutcome};

    fn frame_of(packet: &Packet) -> Frame {
        let bytes = packet.encode().unwrap();
        match try_decode(&bytes).unwrap() {
            DecodeOutcome::Frame { frame, .. } => frame,
            DecodeOutcome::NeedMore => panic!("encode produced a short frame"),
        }
    }

    #[test]
    fn test_decode_round_trips_every_type() {
        let packets = vec![
            Packet::Joined { user_id: 42, version: 1 },
            Packet::LobbyCreated {
                lobby_id: 9,
                max_connections: 16,
                game: "game1".into(),
                version: "v1".into(),
                host_name: "Alice".into(),
                mode: "ffa".into(),
            },
            Packet::LobbyJoined { lobby_id: 9, user_id: 42, owner_id: 42, dest_id: 7, priority: 0 },
            Packet::LobbyLeft { lobby_id: 9, user_id: 42 },
            Packet::LobbyListGot {
                lobby_id: 9,
                owner_id: 42,
                connections: 1,
                max_connections: 16,
                game: "game1".into(),
                version: "v1".into(),
                host_name: "Alice".into(),
                mode: "ffa".into(),
                description: "".into(),
            },
            Packet::LobbyListFinish,
            Packet::PeerSdp { lobby_id: 9, user_id: 3, sdp: "v=0...".into() },
            Packet::PeerCandidate { lobby_id: 9, user_id: 3, sdp: "a=candidate...".into() },
            Packet::PeerCandidateDone { lobby_id: 9, user_id: 3 },
            Packet::StunTurn {
                is_stun: true,
                port: 3478,
                host: "stun.example.net".into(),
                username: "".into(),
                password: "".into(),
            },
            Packet::Error { code: ErrorCode::LobbyFull, tag: 9 },
            Packet::KeepAlive,
        ];

        let client = Dispatcher::new(Role::Client);
        for packet in packets {
            let decoded = client.decode(&frame_of(&packet)).unwrap();
            assert_eq!(decoded, packet);
        }

        let server = Dispatcher::new(Role::Server);
        let packets = vec![
            Packet::LobbyCreate {
                max_connections: 4,
                game: "game1".into(),
                version: "v1".into(),
                host_name: "Alice".into(),
                mode: "ffa".into(),
                password: "".into(),
                description: "fun".into(),
            },
            Packet::LobbyJoin { lobby_id: 9, password: "pw".into() },
            Packet::LobbyLeave { lobby_id: 9 },
            Packet::LobbyListGet { game: "game1".into(), password: "".into() },
            Packet::PeerFailed { lobby_id: 9, peer_id: 3 },
            Packet::LobbyUpdate {
                lobby_id: 9,
                game: "game1".into(),
                version: "v2".into(),
                host_name: "Alice".into(),
                mode: "coop".into(),
                description: "updated".into(),
            },
        ];
        for packet in packets {
            let decoded = server.decode(&frame_of(&packet)).unwrap();
            assert_eq!(decoded, packet);
        }
    }

    #[test]
    fn test_unknown_type_rejected() {
        let frame = Frame { packet_type: 999, payload: vec![], string_block: vec![] };
        assert_eq!(
            Dispatcher::new(Role::Server).decode(&frame),
            Err(DispatchError::UnknownType(999))
        );
    }

    #[test]
    fn test_zero_type_rejected() {
        let frame = Frame { packet_type: 0, payload: vec![], string_block: vec![] };
        assert_eq!(
            Dispatcher::new(Role::Server).decode(&frame),
            Err(DispatchError::UnknownType(0))
        );
    }

    #[test]
    fn test_payload_size_mismatch_rejected() {
        let frame = Frame {
            packet_type: PacketType::LobbyJoin as u16,
            payload: vec![0; 4], // registered size is 8
            string_block: vec![],
        };
        assert!(matches!(
            Dispatcher::new(Role::Server).decode(&frame),
            Err(DispatchError::PayloadSizeMismatch { .. })
        ));
    }

    #[test]
    fn test_string_count_mismatch_rejected() {
        // LobbyLeave declares zero strings.
        let packet = Packet::LobbyLeave { lobby_id: 1 };
        let mut frame = frame_of(&packet);
        frame.string_block.extend_from_slice(&2u16.to_le_bytes());
        frame.string_block.extend_from_slice(b"xx");
        assert!(matches!(
            Dispatcher::new(Role::Server).decode(&frame),
            Err(DispatchError::StringCountMismatch { .. })
        ));
    }

    #[test]
    fn test_bad_string_block_rejected() {
        let packet = Packet::LobbyJoin { lobby_id: 1, password: "pw".into() };
        let mut frame = frame_of(&packet);
        // Declare a longer string than the block holds.
        frame.string_block[0] = 0xFF;
        assert!(matches!(
            Dispatcher::new(Role::Server).decode(&frame),
            Err(DispatchError::BadStringBlock { .. })
        ));
    }

    #[test]
    fn test_role_enforcement() {
        // A server must not accept server-origin packets.
        let joined = frame_of(&Packet::Joined { user_id: 1, version: 1 });
        assert!(matches!(
            Dispatcher::new(Role::Server).decode(&joined),
            Err(DispatchError::WrongOrigin { .. })
        ));

        // A client must not accept client-origin packets.
        let leave = frame_of(&Packet::LobbyLeave { lobby_id: 1 });
        assert!(matches!(
            Dispatcher::new(Role::Client).decode(&leave),
            Err(DispatchError::WrongOrigin { .. })
        ));

        // Both directions accept the signaling relay packets.
        let sdp = frame_of(&Packet::PeerSdp { lobby_id: 1, user_id: 2, sdp: "x".into() });
        assert!(Dispatcher::new(Role::Client).decode(&sdp).is_ok());
        assert!(Dispatcher::new(Role::Server).decode(&sdp).is_ok());
    }
}
