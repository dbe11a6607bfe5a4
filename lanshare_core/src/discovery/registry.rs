//! Known peers keyed by `address:port`.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard, PoisonError};
use std::time::{Duration, SystemTime};
use tokio::sync::broadcast;

/// Peers not seen for this long are dropped by cleanup
pub const PEER_TIMEOUT: Duration = Duration::from_secs(300);

const CHANGE_CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, Clone, PartialEq)]
pub struct PeerRecord {
    pub address: IpAddr,
    pub port: u16,
    /// Beacon timestamp of the first announcement; `None` when the peer
    /// was only ever found by scanning
    pub first_announced: Option<f64>,
    pub last_seen: SystemTime,
}

impl PeerRecord {
    pub fn key(&self) -> String {
        peer_key(self.address, self.port)
    }

    pub fn url(&self) -> String {
        format!("http://{}:{}", self.address, self.port)
    }
}

pub fn peer_key(address: IpAddr, port: u16) -> String {
    format!("{}:{}", address, port)
}

/// Peer table shared between the discovery loops and readers.
///
/// Every mutation publishes a snapshot to subscribers.
pub struct PeerRegistry {
    peers: RwLock<HashMap<String, PeerRecord>>,
    changes: broadcast::Sender<Vec<PeerRecord>>,
}

impl Default for PeerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PeerRegistry {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            peers: RwLock::new(HashMap::new()),
            changes,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, PeerRecord>> {
        self.peers.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, PeerRecord>> {
        self.peers.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Receive a full snapshot after every change
    pub fn subscribe(&self) -> broadcast::Receiver<Vec<PeerRecord>> {
        self.changes.subscribe()
    }

    pub fn record_sighting(&self, address: IpAddr, port: u16, announced: Option<f64>) -> bool {
        self.record_sighting_at(address, port, announced, SystemTime::now())
    }

    /// Create or refresh `address:port`; returns true for a new peer
    pub fn record_sighting_at(
        &self,
        address: IpAddr,
        port: u16,
        announced: Option<f64>,
        now: SystemTime,
    ) -> bool {
        let key = peer_key(address, port);
        let is_new = {
            let mut peers = self.write();
            match peers.get_mut(&key) {
                Some(peer) => {
                    peer.last_seen = now;
                    if peer.first_announced.is_none() {
                        peer.first_announced = announced;
                    }
                    false
                }
                None => {
                    peers.insert(
                        key.clone(),
                        PeerRecord {
                            address,
                            port,
                            first_announced: announced,
                            last_seen: now,
                        },
                    );
                    true
                }
            }
        };

        if is_new {
            tracing::info!("Discovered peer at {}", key);
        }
        self.notify();
        is_new
    }

    pub fn cleanup(&self) -> usize {
        self.cleanup_at(SystemTime::now())
    }

    /// Drop peers whose last sighting is older than [`PEER_TIMEOUT`] at `now`
    pub fn cleanup_at(&self, now: SystemTime) -> usize {
        let removed = {
            let mut peers = self.write();
            let before = peers.len();
            peers.retain(|_, peer| {
                now.duration_since(peer.last_seen)
                    .map(|age| age <= PEER_TIMEOUT)
                    .unwrap_or(true)
            });
            before - peers.len()
        };

        if removed > 0 {
            tracing::debug!("Removed {} stale peers", removed);
            self.notify();
        }
        removed
    }

    pub fn get(&self, key: &str) -> Option<PeerRecord> {
        self.read().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// All peers ordered by key
    pub fn snapshot(&self) -> Vec<PeerRecord> {
        let mut peers: Vec<_> = self.read().values().cloned().collect();
        peers.sort_by_key(PeerRecord::key);
        peers
    }

    fn notify(&self) {
        // no subscribers is fine
        let _ = self.changes.send(self.snapshot());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(192, 168, 1, last))
    }

    #[test]
    fn test_sighting_creates_then_refreshes() {
        let registry = PeerRegistry::new();
        let t0 = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000);

        assert!(registry.record_sighting_at(ip(5), 8000, None, t0));
        assert!(!registry.record_sighting_at(ip(5), 8000, Some(42.0), t0 + Duration::from_secs(10)));

        let peer = registry.get("192.168.1.5:8000").unwrap();
        assert_eq!(peer.url(), "http://192.168.1.5:8000");
        assert_eq!(peer.first_announced, Some(42.0));
        assert_eq!(peer.last_seen, t0 + Duration::from_secs(10));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_cleanup_removes_only_stale() {
        let registry = PeerRegistry::new();
        let now = SystemTime::UNIX_EPOCH + Duration::from_secs(10_000);

        registry.record_sighting_at(ip(1), 8000, None, now - Duration::from_secs(301));
        registry.record_sighting_at(ip(2), 8000, None, now - Duration::from_secs(100));

        assert_eq!(registry.cleanup_at(now), 1);
        assert!(registry.get("192.168.1.1:8000").is_none());
        assert!(registry.get("192.168.1.2:8000").is_some());
        assert_eq!(registry.cleanup_at(now), 0);
    }

    #[tokio::test]
    async fn test_subscribers_get_snapshots() {
        let registry = PeerRegistry::new();
        let mut rx = registry.subscribe();

        registry.record_sighting(ip(9), 9000, Some(1.0));
        let snapshot = rx.recv().await.unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].key(), "192.168.1.9:9000");
    }
}
