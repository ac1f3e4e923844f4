//! Embeddable rendezvous client
//!
//! The client side of the rendezvous session engine: one connection to the
//! server, lobby membership, and per-peer NAT-traversal signaling. The
//! embedding application supplies an [`IceFactory`] for the actual peer
//! transport and a [`SessionCallbacks`] implementation, then pumps
//! [`SessionClient::update`] from its main loop:
//!
//! ```no_run
//! use session_client::{ClientConfig, SessionCallbacks, SessionClient};
//! # use session_client::ice::{IceFactory, IceTransport, IceError};
//! # use session_wire::RelayDirectory;
//! # struct MyIceFactory;
//! # impl IceFactory for MyIceFactory {
//! #     fn create(&self, _relays: &RelayDirectory) -> Result<Box<dyn IceTransport>, IceError> {
//! #         Err(IceError::Create("example".into()))
//! #     }
//! # }
//! struct Game;
//! impl SessionCallbacks for Game {
//!     fn on_connected(&mut self, user_id: u64) {
//!         println!("connected as {}", user_id);
//!     }
//! }
//!
//! let client = SessionClient::connect_host(
//!     "rendezvous.example.net",
//!     8888,
//!     Box::new(MyIceFactory),
//!     ClientConfig::default(),
//! ).unwrap();
//!
//! let mut game = Game;
//! loop {
//!     client.update(&mut game); // on the game's main thread
//!     # break;
//! }
//! ```

pub mod client;
pub mod events;
pub mod ice;
pub mod peer;

pub use client::{ClientConfig, SessionClient};
pub use events::{Event, LobbyListEntry, PeerSignal, SessionCallbacks};
pub use ice::{IceError, IceEvent, IceFactory, IceState, IceTransport};
pub use peer::{PeerPhase, PeerSession, PhaseEdge, PEER_FAILURE_TIMEOUT};
