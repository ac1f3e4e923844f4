//! Connection admission control
//!
//! An external predicate decides whether a connection may stay: checked once
//! immediately after accept (`is_new = true`) and re-checked for every live
//! connection on the periodic ban-refresh sweep (`is_new = false`).
//! Connections that fail the check are queued for disconnect rather than
//! torn down inline. Loading ban lists from disk is the embedder's problem;
//! this module only defines the hook and two stock policies.

use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};

/// What the predicate gets to look at.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionInfo {
    pub addr: SocketAddr,
    pub dest_id: u64,
}

/// Admission predicate.
pub trait AdmissionPolicy: Send {
    /// `is_new` distinguishes the post-accept check from the periodic
    /// re-validation of already-admitted connections.
    fn permit(&self, info: &ConnectionInfo, is_new: bool) -> bool;
}

/// Default policy: everyone is welcome.
pub struct AllowAll;

impl AdmissionPolicy for AllowAll {
    fn permit(&self, _info: &ConnectionInfo, _is_new: bool) -> bool {
        true
    }
}

/// Deny list keyed by destination id or peer address.
#[derive(Default)]
pub struct DenyList {
    dest_ids: HashSet<u64>,
    addrs: HashSet<IpAddr>,
}

impl DenyList {
    pub fn new() -> Self {
        DenyList::default()
    }

    pub fn ban_dest(&mut self, dest_id: u64) {
        self.dest_ids.insert(dest_id);
    }

    pub fn ban_addr(&mut self, addr: IpAddr) {
        self.addrs.insert(addr);
    }
}

impl AdmissionPolicy for DenyList {
    fn permit(&self, info: &ConnectionInfo, _is_new: bool) -> bool {
        !self.dest_ids.contains(&info.dest_id) && !self.addrs.contains(&info.addr.ip())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(addr: &str, dest_id: u64) -> ConnectionInfo {
        ConnectionInfo { addr: addr.parse().unwrap(), dest_id }
    }

    #[test]
    fn test_allow_all() {
        let policy = AllowAll;
        assert!(policy.permit(&info("10.0.0.1:5000", 1), true));
        assert!(policy.permit(&info("10.0.0.1:5000", 1), false));
    }

    #[test]
    fn test_deny_list_by_dest_id() {
        let mut policy = DenyList::new();
        policy.ban_dest(7);
        assert!(!policy.permit(&info("10.0.0.1:5000", 7), true));
        assert!(policy.permit(&info("10.0.0.1:5000", 8), true));
    }

    #[test]
    fn test_deny_list_by_address_ignores_port() {
        let mut policy = DenyList::new();
        policy.ban_addr("10.0.0.9".parse().unwrap());
        assert!(!policy.permit(&info("10.0.0.9:1111", 1), false));
        assert!(!policy.permit(&info("10.0.0.9:2222", 2), false));
        assert!(policy.permit(&info("10.0.0.10:1111", 1), false));
    }
}
