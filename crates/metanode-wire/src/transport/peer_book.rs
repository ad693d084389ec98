//! Peer book: addresses of peers with currently open sessions.
//!
//! Every dialed stream holds a [`SessionGuard`]. The entry for a peer lives
//! as long as at least one guard for it does; dropping the last guard evicts
//! it, so a cached entry always corresponds to a live session.

use chrono::{DateTime, Utc};
use metanode_types::{PeerId, PeerInfo};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::debug;

#[derive(Debug, Clone)]
struct PeerBookEntry {
    info: PeerInfo,
    open_sessions: usize,
    connected_at: DateTime<Utc>,
}

/// Thread-safe cache of connected peers, keyed by peer id.
#[derive(Debug, Clone, Default)]
pub struct PeerBook {
    peers: Arc<RwLock<HashMap<PeerId, PeerBookEntry>>>,
}

impl PeerBook {
    /// Create a new empty peer book.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an open session with `info`. The entry is refreshed with the
    /// latest address info.
    pub fn open_session(&self, info: &PeerInfo) -> SessionGuard {
        let mut peers = self.peers.write().unwrap_or_else(|e| e.into_inner());
        let entry = peers
            .entry(info.id.clone())
            .or_insert_with(|| PeerBookEntry {
                info: info.clone(),
                open_sessions: 0,
                connected_at: Utc::now(),
            });
        entry.info = info.clone();
        entry.open_sessions += 1;

        SessionGuard {
            book: self.clone(),
            id: info.id.clone(),
        }
    }

    fn close_session(&self, id: &PeerId) {
        let mut peers = self.peers.write().unwrap_or_else(|e| e.into_inner());
        let evict = match peers.get_mut(id) {
            Some(entry) => {
                entry.open_sessions = entry.open_sessions.saturating_sub(1);
                entry.open_sessions == 0
            }
            None => false,
        };
        if evict {
            if let Some(entry) = peers.remove(id) {
                debug!(
                    peer = %id,
                    connected_for_secs = (Utc::now() - entry.connected_at).num_seconds(),
                    "Evicted peer book entry"
                );
            }
        }
    }

    /// Address info for a peer with an open session.
    pub fn lookup(&self, id: &PeerId) -> Option<PeerInfo> {
        let peers = self.peers.read().unwrap_or_else(|e| e.into_inner());
        peers.get(id).map(|e| e.info.clone())
    }

    /// Number of open sessions to `id`.
    pub fn session_count(&self, id: &PeerId) -> usize {
        let peers = self.peers.read().unwrap_or_else(|e| e.into_inner());
        peers.get(id).map(|e| e.open_sessions).unwrap_or(0)
    }

    /// Number of peers with open sessions.
    pub fn connected_count(&self) -> usize {
        let peers = self.peers.read().unwrap_or_else(|e| e.into_inner());
        peers.len()
    }
}

/// Keeps a peer book entry alive; releases it on drop.
#[derive(Debug)]
pub struct SessionGuard {
    book: PeerBook,
    id: PeerId,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.book.close_session(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metanode_types::NodeIdentity;

    fn make_peer(port: u16) -> PeerInfo {
        PeerInfo::new(
            NodeIdentity::generate().peer_id(),
            vec![format!("/ip4/127.0.0.1/tcp/{port}").parse().unwrap()],
        )
    }

    #[test]
    fn test_entry_lives_while_session_open() {
        let book = PeerBook::new();
        let peer = make_peer(9000);
        assert!(book.lookup(&peer.id).is_none());

        let guard = book.open_session(&peer);
        assert_eq!(book.lookup(&peer.id), Some(peer.clone()));
        assert_eq!(book.connected_count(), 1);

        drop(guard);
        assert!(book.lookup(&peer.id).is_none());
        assert_eq!(book.connected_count(), 0);
    }

    #[test]
    fn test_multiple_sessions_refcounted() {
        let book = PeerBook::new();
        let peer = make_peer(9000);
        let first = book.open_session(&peer);
        let second = book.open_session(&peer);
        assert_eq!(book.session_count(&peer.id), 2);

        drop(first);
        assert!(book.lookup(&peer.id).is_some());
        drop(second);
        assert!(book.lookup(&peer.id).is_none());
    }

    #[test]
    fn test_reopen_refreshes_addresses() {
        let book = PeerBook::new();
        let peer = make_peer(9000);
        let _a = book.open_session(&peer);
        let moved = PeerInfo::new(peer.id.clone(), vec!["/ip4/10.0.0.2/tcp/9001".parse().unwrap()]);
        let _b = book.open_session(&moved);
        assert_eq!(book.lookup(&peer.id), Some(moved));
    }

    #[test]
    fn test_clones_share_state() {
        let book = PeerBook::new();
        let view = book.clone();
        let peer = make_peer(9000);
        let _guard = book.open_session(&peer);
        assert!(view.lookup(&peer.id).is_some());
    }
}
