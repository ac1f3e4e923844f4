//! STUN/TURN relay directory entries
//!
//! The server hands its relay directory to every client right after the
//! `Joined` acknowledgment, one `StunTurn` packet per entry. Clients feed
//! the collected entries into the peer-transport configuration.

use serde::{Deserialize, Serialize};

/// One STUN or TURN server the clients may use for NAT traversal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayServer {
    pub host: String,
    pub port: u16,
    /// Empty for STUN entries.
    #[serde(default)]
    pub username: String,
    /// Empty for STUN entries.
    #[serde(default)]
    pub password: String,
}

/// Full relay directory: at most one STUN server plus any number of TURN
/// servers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayDirectory {
    #[serde(default)]
    pub stun: Option<RelayServer>,
    #[serde(default)]
    pub turns: Vec<RelayServer>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directory_from_json() {
        let json = r#"{
            "stun": { "host": "stun.example.net", "port": 3478 },
            "turns": [
                { "host": "turn.example.net", "port": 3478,
                  "username": "u", "password": "p" }
            ]
        }"#;
        let dir: RelayDirectory = serde_json::from_str(json).unwrap();
        assert_eq!(dir.stun.as_ref().unwrap().host, "stun.example.net");
        assert_eq!(dir.stun.as_ref().unwrap().username, "");
        assert_eq!(dir.turns.len(), 1);
        assert_eq!(dir.turns[0].username, "u");
    }

    #[test]
    fn test_directory_defaults_empty() {
        let dir: RelayDirectory = serde_json::from_str("{}").unwrap();
        assert!(dir.stun.is_none());
        assert!(dir.turns.is_empty());
    }
}
