//! Lobby membership rules
//!
//! A lobby is a named, capacity- and password-gated session owned by exactly
//! one connection. Membership is kept in join order; each admission hands
//! out the next value of a monotonically increasing priority counter that is
//! never reused, which is what the peer-failure arbitration ties against.
//!
//! This module holds only the rules. Notification fan-out, cascade on owner
//! departure and registry bookkeeping live in the server, which owns the
//! connections the packets go to.

use session_wire::packets::{
    clamp_str, ErrorCode, MAX_DESCRIPTION_LEN, MAX_GAME_LEN, MAX_HOST_NAME_LEN, MAX_MODE_LEN,
    MAX_PASSWORD_LEN, MAX_VERSION_LEN,
};

// ============================================================================
// Settings
// ============================================================================

/// Creation-time lobby parameters, as sent by the owning client.
#[derive(Debug, Clone, Default)]
pub struct LobbySettings {
    pub game: String,
    pub version: String,
    pub host_name: String,
    pub mode: String,
    pub password: String,
    pub description: String,
    pub max_connections: u16,
}

// ============================================================================
// Join rejections
// ============================================================================

/// Why a join was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinRejection {
    Full,
    PasswordIncorrect,
    AlreadyMember,
}

impl JoinRejection {
    /// Wire error code reported back to the requester.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            JoinRejection::Full => ErrorCode::LobbyFull,
            JoinRejection::PasswordIncorrect => ErrorCode::PasswordIncorrect,
            JoinRejection::AlreadyMember => ErrorCode::AlreadyMember,
        }
    }
}

// ============================================================================
// Lobby
// ============================================================================

pub struct Lobby {
    pub id: u64,
    pub owner: u64,
    pub game: String,
    pub version: String,
    pub host_name: String,
    pub mode: String,
    pub password: String,
    pub description: String,
    pub max_connections: u16,
    next_priority: u32,
    /// Insertion order == join order; used for iteration only.
    members: Vec<u64>,
}

impl Lobby {
    pub fn new(id: u64, owner: u64, settings: LobbySettings) -> Self {
        Lobby {
            id,
            owner,
            game: clamp_str(&settings.game, MAX_GAME_LEN),
            version: clamp_str(&settings.version, MAX_VERSION_LEN),
            host_name: clamp_str(&settings.host_name, MAX_HOST_NAME_LEN),
            mode: clamp_str(&settings.mode, MAX_MODE_LEN),
            password: clamp_str(&settings.password, MAX_PASSWORD_LEN),
            description: clamp_str(&settings.description, MAX_DESCRIPTION_LEN),
            max_connections: settings.max_connections,
            next_priority: 0,
            members: Vec::new(),
        }
    }

    pub fn is_member(&self, conn_id: u64) -> bool {
        self.members.contains(&conn_id)
    }

    pub fn is_owner(&self, conn_id: u64) -> bool {
        self.owner == conn_id
    }

    pub fn members(&self) -> &[u64] {
        &self.members
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Oldest remaining member (cascade order on destruction).
    pub fn first_member(&self) -> Option<u64> {
        self.members.first().copied()
    }

    /// Gate a prospective join. Capacity is enforced before the password so
    /// a full lobby never leaks whether a guess was right.
    pub fn check_join(&self, conn_id: u64, password: &str) -> Result<(), JoinRejection> {
        if self.is_member(conn_id) {
            return Err(JoinRejection::AlreadyMember);
        }
        if self.members.len() >= self.max_connections as usize {
            return Err(JoinRejection::Full);
        }
        if self.password != password {
            return Err(JoinRejection::PasswordIncorrect);
        }
        Ok(())
    }

    /// Admit a member and hand out its join priority. Priorities are never
    /// reused, even after members leave.
    pub fn admit(&mut self, conn_id: u64) -> u32 {
        let priority = self.next_priority;
        self.next_priority += 1;
        self.members.push(conn_id);
        priority
    }

    /// Remove a member; true when it was present.
    pub fn remove(&mut self, conn_id: u64) -> bool {
        let before = self.members.len();
        self.members.retain(|m| *m != conn_id);
        self.members.len() != before
    }

    /// Owner-initiated metadata refresh (everything except the password and
    /// capacity).
    pub fn apply_update(
        &mut self,
        game: &str,
        version: &str,
        host_name: &str,
        mode: &str,
        description: &str,
    ) {
        self.game = clamp_str(game, MAX_GAME_LEN);
        self.version = clamp_str(version, MAX_VERSION_LEN);
        self.host_name = clamp_str(host_name, MAX_HOST_NAME_LEN);
        self.mode = clamp_str(mode, MAX_MODE_LEN);
        self.description = clamp_str(description, MAX_DESCRIPTION_LEN);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn lobby(max: u16, password: &str) -> Lobby {
        Lobby::new(
            100,
            1,
            LobbySettings {
                game: "game1".into(),
                version: "v1".into(),
                host_name: "Alice".into(),
                mode: "ffa".into(),
                password: password.into(),
                description: "".into(),
                max_connections: max,
            },
        )
    }

    #[test]
    fn test_join_and_capacity() {
        let mut l = lobby(2, "");
        assert!(l.check_join(1, "").is_ok());
        l.admit(1);
        assert!(l.check_join(2, "").is_ok());
        l.admit(2);

        // At capacity: rejected, membership unchanged.
        assert_eq!(l.check_join(3, ""), Err(JoinRejection::Full));
        assert_eq!(l.member_count(), 2);
    }

    #[test]
    fn test_password_gate() {
        let mut l = lobby(4, "secret");
        assert_eq!(l.check_join(2, "wrong"), Err(JoinRejection::PasswordIncorrect));
        assert_eq!(l.check_join(2, ""), Err(JoinRejection::PasswordIncorrect));
        assert!(l.check_join(2, "secret").is_ok());
        l.admit(2);
        assert!(l.is_member(2));
    }

    #[test]
    fn test_empty_password_is_public() {
        let l = lobby(4, "");
        assert!(l.check_join(2, "").is_ok());
        assert_eq!(l.check_join(2, "anything"), Err(JoinRejection::PasswordIncorrect));
    }

    #[test]
    fn test_already_member_rejected() {
        let mut l = lobby(4, "");
        l.admit(2);
        assert_eq!(l.check_join(2, ""), Err(JoinRejection::AlreadyMember));
    }

    #[test]
    fn test_priorities_strictly_increase_and_never_reused() {
        let mut l = lobby(8, "");
        let p1 = l.admit(1);
        let p2 = l.admit(2);
        let p3 = l.admit(3);
        assert!(p1 < p2 && p2 < p3);

        // Leaving and rejoining must not recycle a priority.
        l.remove(2);
        let p4 = l.admit(2);
        assert!(p4 > p3);
    }

    #[test]
    fn test_members_keep_join_order() {
        let mut l = lobby(8, "");
        l.admit(5);
        l.admit(3);
        l.admit(9);
        assert_eq!(l.members(), &[5, 3, 9]);
        l.remove(3);
        assert_eq!(l.members(), &[5, 9]);
        assert_eq!(l.first_member(), Some(5));
    }

    #[test]
    fn test_metadata_clamped() {
        let long = "x".repeat(500);
        let l = Lobby::new(
            1,
            1,
            LobbySettings {
                game: long.clone(),
                version: long.clone(),
                host_name: long.clone(),
                mode: long.clone(),
                password: long.clone(),
                description: long.clone(),
                max_connections: 4,
            },
        );
        assert_eq!(l.game.len(), MAX_GAME_LEN);
        assert_eq!(l.password.len(), MAX_PASSWORD_LEN);
        assert_eq!(l.description.len(), MAX_DESCRIPTION_LEN);
    }

    #[test]
    fn test_apply_update_clamps() {
        let mut l = lobby(4, "");
        let long = "y".repeat(300);
        l.apply_update("game2", "v2", "Bob", "coop", &long);
        assert_eq!(l.game, "game2");
        assert_eq!(l.mode, "coop");
        assert_eq!(l.description.len(), MAX_DESCRIPTION_LEN);
    }
}
