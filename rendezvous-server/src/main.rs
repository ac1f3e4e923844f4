//! Rendezvous server binary
//!
//! A TCP server that:
//! - accepts game clients and hands out random session identifiers
//! - hosts the lobby registry (create/join/leave/list with passwords)
//! - relays NAT-traversal signaling between lobby mates
//! - arbitrates peer-failure reports and tracks per-machine reputation

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rendezvous_server::{config, Server, ServerConfig};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info"),
    )
    .init();

    // Parse command line arguments
    let args: Vec<String> = std::env::args().collect();
    let mut cfg = ServerConfig::default();
    if let Some(port) = args.get(1) {
        cfg.port = port.parse().unwrap_or(config::DEFAULT_PORT);
    }
    if let Some(relay_path) = args.get(2) {
        cfg.relays = config::load_relay_directory(Path::new(relay_path))?;
    }

    log::info!("rendezvous server starting...");
    log::info!("  port:  {}", cfg.port);
    log::info!("  stun:  {}", cfg.relays.stun.as_ref().map_or("none", |s| s.host.as_str()));
    log::info!("  turns: {}", cfg.relays.turns.len());

    // Graceful shutdown on SIGINT/SIGTERM
    let term = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&term))?;
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&term))?;

    let server = Server::bind(cfg)?;
    let metrics = server.metrics();
    let handle = server.start()?;

    let mut ticks: u64 = 0;
    while !term.load(Ordering::Relaxed) {
        thread::sleep(Duration::from_secs(1));
        ticks += 1;
        if ticks % 60 == 0 {
            log::info!(
                "status: {} connections, {} lobbies, {} players",
                metrics.active_connections.load(Ordering::Relaxed),
                metrics.active_lobbies.load(Ordering::Relaxed),
                metrics.lobby_players.load(Ordering::Relaxed),
            );
        }
    }

    log::info!("shutting down...");
    handle.shutdown();
    Ok(())
}
