//! Server configuration
//!
//! Tunables for the sweep cadence, liveness intervals, lobby limits and the
//! STUN/TURN relay directory handed to every client on join. The relay
//! directory is loaded from a small JSON file; everything else has sane
//! defaults overridable from `main`.

use std::fmt;
use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

use session_wire::RelayDirectory;

/// Default listen port.
pub const DEFAULT_PORT: u16 = 8888;

/// Server tunables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// TCP listen port.
    pub port: u16,
    /// Capacity ceiling applied to passwordless (public) lobbies.
    /// Password-protected lobbies are exempt.
    pub public_lobby_ceiling: u16,
    /// Cadence of the per-connection sweep pass.
    pub sweep_interval: Duration,
    /// Send-idle interval before a keep-alive is emitted.
    pub keepalive_interval: Duration,
    /// Receive-idle interval before a connection is declared dead.
    pub dead_interval: Duration,
    /// How often all live connections are re-validated against the
    /// admission policy.
    pub ban_refresh_interval: Duration,
    /// How often stale reputation entries are purged.
    pub reputation_purge_interval: Duration,
    /// STUN/TURN directory sent to every accepted connection.
    pub relays: RelayDirectory,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            port: DEFAULT_PORT,
            public_lobby_ceiling: 16,
            sweep_interval: Duration::from_millis(100),
            keepalive_interval: session_wire::KEEPALIVE_INTERVAL,
            dead_interval: session_wire::DEAD_INTERVAL,
            ban_refresh_interval: Duration::from_secs(30),
            reputation_purge_interval: Duration::from_secs(3600),
            relays: RelayDirectory::default(),
        }
    }
}

/// Failure to load the relay directory file.
#[derive(Debug)]
pub enum RelayConfigError {
    Io(io::Error),
    Parse(serde_json::Error),
}

impl fmt::Display for RelayConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayConfigError::Io(e) => write!(f, "relay directory read failed: {}", e),
            RelayConfigError::Parse(e) => write!(f, "relay directory parse failed: {}", e),
        }
    }
}

impl std::error::Error for RelayConfigError {}

/// Load the STUN/TURN directory from a JSON file.
pub fn load_relay_directory(path: &Path) -> Result<RelayDirectory, RelayConfigError> {
    let raw = fs::read_to_string(path).map_err(RelayConfigError::Io)?;
    serde_json::from_str(&raw).map_err(RelayConfigError::Parse)
}
