//! Lightweight Prometheus-compatible metrics for the rendezvous server.
//!
//! Uses atomic counters for lock-free instrumentation. Gauges are recomputed
//! by the sweep as simple aggregates; counters accumulate monotonically.
//! Rendered in Prometheus text exposition format for external scraping.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Lightweight Prometheus-compatible metrics for the rendezvous server.
pub struct Metrics {
    /// Live registered connections (gauge, recomputed each sweep)
    pub active_connections: AtomicU64,
    /// Live lobbies (gauge, recomputed each sweep)
    pub active_lobbies: AtomicU64,
    /// Players currently in lobbies (gauge, recomputed each sweep)
    pub lobby_players: AtomicU64,
    /// Total accepted connections (counter)
    pub connections_accepted_total: AtomicU64,
    /// Total connections rejected by the admission policy (counter)
    pub admission_rejections_total: AtomicU64,
    /// Total lobbies created (counter)
    pub lobbies_created_total: AtomicU64,
    /// Total peer signaling packets relayed - sdp + candidates (counter)
    pub signaling_relayed_total: AtomicU64,
    /// Total accepted peer-failure reports (counter)
    pub peer_reports_accepted_total: AtomicU64,
    /// Total rejected (stale) peer-failure reports (counter)
    pub peer_reports_rejected_total: AtomicU64,
    /// Total keep-alives emitted (counter)
    pub keepalives_sent_total: AtomicU64,
    /// Server start time (for uptime calculation)
    pub start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            active_connections: AtomicU64::new(0),
            active_lobbies: AtomicU64::new(0),
            lobby_players: AtomicU64::new(0),
            connections_accepted_total: AtomicU64::new(0),
            admission_rejections_total: AtomicU64::new(0),
            lobbies_created_total: AtomicU64::new(0),
            signaling_relayed_total: AtomicU64::new(0),
            peer_reports_accepted_total: AtomicU64::new(0),
            peer_reports_rejected_total: AtomicU64::new(0),
            keepalives_sent_total: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Render metrics in Prometheus text exposition format.
    pub fn render(&self) -> String {
        let uptime = self.start_time.elapsed().as_secs();
        format!(
            "# HELP rendezvous_active_connections Current number of registered connections\n\
             # TYPE rendezvous_active_connections gauge\n\
             rendezvous_active_connections {}\n\
             # HELP rendezvous_active_lobbies Current number of lobbies\n\
             # TYPE rendezvous_active_lobbies gauge\n\
             rendezvous_active_lobbies {}\n\
             # HELP rendezvous_lobby_players Players currently in lobbies\n\
             # TYPE rendezvous_lobby_players gauge\n\
             rendezvous_lobby_players {}\n\
             # HELP rendezvous_connections_accepted_total Total accepted connections\n\
             # TYPE rendezvous_connections_accepted_total counter\n\
             rendezvous_connections_accepted_total {}\n\
             # HELP rendezvous_admission_rejections_total Total admission rejections\n\
             # TYPE rendezvous_admission_rejections_total counter\n\
             rendezvous_admission_rejections_total {}\n\
             # HELP rendezvous_lobbies_created_total Total lobbies created\n\
             # TYPE rendezvous_lobbies_created_total counter\n\
             rendezvous_lobbies_created_total {}\n\
             # HELP rendezvous_signaling_relayed_total Total peer signaling packets relayed\n\
             # TYPE rendezvous_signaling_relayed_total counter\n\
             rendezvous_signaling_relayed_total {}\n\
             # HELP rendezvous_peer_reports_accepted_total Total accepted peer-failure reports\n\
             # TYPE rendezvous_peer_reports_accepted_total counter\n\
             rendezvous_peer_reports_accepted_total {}\n\
             # HELP rendezvous_peer_reports_rejected_total Total rejected peer-failure reports\n\
             # TYPE rendezvous_peer_reports_rejected_total counter\n\
             rendezvous_peer_reports_rejected_total {}\n\
             # HELP rendezvous_keepalives_sent_total Total keep-alives emitted\n\
             # TYPE rendezvous_keepalives_sent_total counter\n\
             rendezvous_keepalives_sent_total {}\n\
             # HELP rendezvous_uptime_seconds Server uptime in seconds\n\
             # TYPE rendezvous_uptime_seconds gauge\n\
             rendezvous_uptime_seconds {}\n",
            self.active_connections.load(Ordering::Relaxed),
            self.active_lobbies.load(Ordering::Relaxed),
            self.lobby_players.load(Ordering::Relaxed),
            self.connections_accepted_total.load(Ordering::Relaxed),
            self.admission_rejections_total.load(Ordering::Relaxed),
            self.lobbies_created_total.load(Ordering::Relaxed),
            self.signaling_relayed_total.load(Ordering::Relaxed),
            self.peer_reports_accepted_total.load(Ordering::Relaxed),
            self.peer_reports_rejected_total.load(Ordering::Relaxed),
            self.keepalives_sent_total.load(Ordering::Relaxed),
            uptime,
        )
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_default_zero() {
        let m = Metrics::new();
        assert_eq!(m.active_connections.load(Ordering::Relaxed), 0);
        assert_eq!(m.active_lobbies.load(Ordering::Relaxed), 0);
        assert_eq!(m.lobbies_created_total.load(Ordering::Relaxed), 0);
        assert_eq!(m.signaling_relayed_total.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_metrics_render_format() {
        let m = Metrics::new();
        m.connections_accepted_total.fetch_add(5, Ordering::Relaxed);
        m.active_lobbies.store(2, Ordering::Relaxed);
        let output = m.render();
        assert!(output.contains("rendezvous_connections_accepted_total 5"));
        assert!(output.contains("rendezvous_active_lobbies 2"));
        assert!(output.contains("# TYPE rendezvous_uptime_seconds gauge"));
        assert!(output.contains("# TYPE rendezvous_lobbies_created_total counter"));
    }

    #[test]
    fn test_gauges_store_overwrites() {
        let m = Metrics::new();
        m.active_connections.store(10, Ordering::Relaxed);
        m.active_connections.store(3, Ordering::Relaxed);
        assert!(m.render().contains("rendezvous_active_connections 3"));
    }
}
