//! Rendezvous server library
//!
//! Everything the binary does is reachable through [`Server`] so that
//! integration tests (and embedders that want an in-process server) can run
//! the full accept/sweep machinery on an ephemeral port.

pub mod admission;
pub mod config;
pub mod identity;
pub mod lobby;
pub mod metrics;
pub mod reputation;
pub mod server;

pub use admission::{AdmissionPolicy, AllowAll, ConnectionInfo, DenyList};
pub use config::{load_relay_directory, ServerConfig, DEFAULT_PORT};
pub use identity::{AddressHasher, DestinationHasher, DigestHasher};
pub use metrics::Metrics;
pub use server::{Server, ServerHandle};
