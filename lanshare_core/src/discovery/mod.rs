//! LAN peer discovery.
//!
//! Three independent loops feed one [`PeerRegistry`]: a UDP beacon
//! broadcaster, a beacon listener and a periodic active scan of the local
//! network.

pub mod registry;
pub mod scan;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::config::TransferConfig;

pub use registry::{PEER_TIMEOUT, PeerRecord, PeerRegistry};
pub use scan::{local_ipv4, network_range, probe_host};

/// Interval between beacons
pub const BROADCAST_INTERVAL: Duration = Duration::from_secs(30);
/// Delay before retrying after a socket error
pub const RETRY_BACKOFF: Duration = Duration::from_secs(5);
/// Interval between steady-state scans
pub const SCAN_INTERVAL: Duration = Duration::from_secs(300);
/// Delay before rescanning after a failed scan
pub const SCAN_RETRY: Duration = Duration::from_secs(60);
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(2);
/// Pause between subnet probes
pub const PROBE_DELAY: Duration = Duration::from_millis(100);

const SEND_TIMEOUT: Duration = Duration::from_secs(2);
const MAX_DATAGRAM: usize = 1024;

/// Presence announcement broadcast by every peer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Beacon {
    Announcement { port: u16, timestamp: f64 },
}

impl Beacon {
    pub fn announcement(port: u16) -> Self {
        Beacon::Announcement {
            port,
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or(Duration::ZERO)
                .as_secs_f64(),
        }
    }
}

/// Ports, intervals and timeouts for one discovery instance
#[derive(Debug, Clone)]
pub struct DiscoverySettings {
    /// Port our file server listens on; announced and probed
    pub service_port: u16,
    pub discovery_port: u16,
    /// Where beacons are sent
    pub broadcast_addr: IpAddr,
    pub broadcast_interval: Duration,
    pub scan_interval: Duration,
    pub probe_timeout: Duration,
    pub probe_delay: Duration,
}

impl DiscoverySettings {
    pub fn from_config(config: &TransferConfig) -> Self {
        Self {
            service_port: config.server_port,
            discovery_port: config.discovery_port,
            broadcast_addr: IpAddr::V4(Ipv4Addr::BROADCAST),
            broadcast_interval: BROADCAST_INTERVAL,
            scan_interval: SCAN_INTERVAL,
            probe_timeout: PROBE_TIMEOUT,
            probe_delay: PROBE_DELAY,
        }
    }
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self::from_config(&TransferConfig::default())
    }
}

pub struct DiscoveryService {
    settings: DiscoverySettings,
    registry: Arc<PeerRegistry>,
    running: Mutex<Option<CancellationToken>>,
}

impl DiscoveryService {
    pub fn new(settings: DiscoverySettings) -> Arc<Self> {
        Arc::new(Self {
            settings,
            registry: Arc::new(PeerRegistry::new()),
            running: Mutex::new(None),
        })
    }

    pub fn settings(&self) -> &DiscoverySettings {
        &self.settings
    }

    pub fn registry(&self) -> Arc<PeerRegistry> {
        self.registry.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Vec<PeerRecord>> {
        self.registry.subscribe()
    }

    fn current_token(&self) -> Option<CancellationToken> {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_running(&self) -> bool {
        self.current_token().is_some()
    }

    /// Spawn the broadcast, listen and scan loops. A second call while
    /// running does nothing.
    pub fn start(self: &Arc<Self>) {
        let token = {
            let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
            if running.is_some() {
                return;
            }
            let token = CancellationToken::new();
            *running = Some(token.clone());
            token
        };

        tracing::info!(
            "Starting discovery (service port {}, discovery port {})",
            self.settings.service_port,
            self.settings.discovery_port
        );
        tokio::spawn(self.clone().broadcast_loop(token.clone()));
        tokio::spawn(self.clone().listen_loop(token.clone()));
        tokio::spawn(self.clone().scan_loop(token));
    }

    /// Signal all loops to exit; their sockets close as they return
    pub fn stop(&self) {
        let token = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(token) = token {
            token.cancel();
            tracing::info!("Discovery stopped");
        }
    }

    /// Run one scan in the background; ignored when not running
    pub fn trigger_scan(self: &Arc<Self>) {
        let Some(token) = self.current_token() else {
            return;
        };
        let this = self.clone();
        tokio::spawn(async move {
            if let Err(e) = this.scan_once(&token).await {
                tracing::warn!("Manual scan failed: {}", e);
            }
        });
    }

    pub fn cleanup(&self) -> usize {
        self.registry.cleanup()
    }

    /// Apply one received datagram. Returns true when it was a beacon from
    /// another service port and the registry was updated.
    pub fn handle_datagram(&self, data: &[u8], from: IpAddr) -> bool {
        let beacon: Beacon = match serde_json::from_slice(data) {
            Ok(b) => b,
            Err(_) => return false,
        };
        let Beacon::Announcement { port, timestamp } = beacon;

        if port == 0 || port == self.settings.service_port {
            return false;
        }
        self.registry.record_sighting(from, port, Some(timestamp));
        true
    }

    async fn broadcast_loop(self: Arc<Self>, cancel: CancellationToken) {
        let target = SocketAddr::new(self.settings.broadcast_addr, self.settings.discovery_port);

        while !cancel.is_cancelled() {
            let socket = match bind_broadcast_socket().await {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!("Failed to start broadcasting: {}", e);
                    if !sleep_or_cancel(RETRY_BACKOFF, &cancel).await {
                        break;
                    }
                    continue;
                }
            };

            loop {
                let payload = match serde_json::to_vec(&Beacon::announcement(self.settings.service_port)) {
                    Ok(p) => p,
                    Err(e) => {
                        tracing::error!("Cannot encode beacon: {}", e);
                        return;
                    }
                };

                let wait = match tokio::time::timeout(SEND_TIMEOUT, socket.send_to(&payload, target)).await {
                    Ok(Ok(_)) => self.settings.broadcast_interval,
                    Ok(Err(e)) => {
                        tracing::warn!("Broadcast error: {}", e);
                        RETRY_BACKOFF
                    }
                    Err(_) => {
                        tracing::warn!("Broadcast timed out");
                        RETRY_BACKOFF
                    }
                };
                if !sleep_or_cancel(wait, &cancel).await {
                    break;
                }
            }
        }
        tracing::debug!("Broadcast loop exited");
    }

    async fn listen_loop(self: Arc<Self>, cancel: CancellationToken) {
        let bind_addr = SocketAddr::from(([0, 0, 0, 0], self.settings.discovery_port));

        while !cancel.is_cancelled() {
            let socket = match UdpSocket::bind(bind_addr).await {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!("Failed to bind discovery port {}: {}", bind_addr, e);
                    if !sleep_or_cancel(RETRY_BACKOFF, &cancel).await {
                        break;
                    }
                    continue;
                }
            };
            tracing::debug!("Listening for beacons on {}", bind_addr);

            let mut buf = [0u8; MAX_DATAGRAM];
            loop {
                let received = tokio::select! {
                    r = socket.recv_from(&mut buf) => r,
                    _ = cancel.cancelled() => break,
                };
                match received {
                    Ok((len, from)) => {
                        self.handle_datagram(&buf[..len], from.ip());
                    }
                    Err(e) => {
                        tracing::warn!("Listen error: {}", e);
                        if !sleep_or_cancel(RETRY_BACKOFF, &cancel).await {
                            break;
                        }
                    }
                }
            }
        }
        tracing::debug!("Listen loop exited");
    }

    async fn scan_loop(self: Arc<Self>, cancel: CancellationToken) {
        while !cancel.is_cancelled() {
            let wait = match self.scan_once(&cancel).await {
                Ok(found) => {
                    tracing::debug!("Scan found {} servers", found);
                    self.registry.cleanup();
                    self.settings.scan_interval
                }
                Err(e) => {
                    tracing::warn!("Network scan error: {}", e);
                    SCAN_RETRY
                }
            };
            if !sleep_or_cancel(wait, &cancel).await {
                break;
            }
        }
        tracing::debug!("Scan loop exited");
    }

    /// Probe neighbor-table hosts, or the local `/24` when the table is empty.
    /// Returns how many hosts answered.
    pub async fn scan_once(&self, cancel: &CancellationToken) -> Result<usize> {
        let neighbors = scan::neighbor_hosts().await;
        if !neighbors.is_empty() {
            tracing::info!("Scanning {} hosts from the neighbor table", neighbors.len());
            return Ok(self.probe_candidates(&neighbors, Duration::ZERO, cancel).await);
        }

        let local = scan::local_ipv4().context("No local IPv4 address for subnet scan")?;
        tracing::info!("Neighbor table empty, scanning {}", scan::network_range_of(local));
        let candidates = scan::subnet_candidates(local);
        Ok(self
            .probe_candidates(&candidates, self.settings.probe_delay, cancel)
            .await)
    }

    /// Probe each host in turn on the service port, registering responders
    pub async fn probe_candidates(
        &self,
        hosts: &[Ipv4Addr],
        delay: Duration,
        cancel: &CancellationToken,
    ) -> usize {
        let mut found = 0;
        for host in hosts {
            if cancel.is_cancelled() {
                break;
            }
            let ip = IpAddr::V4(*host);
            if probe_host(ip, self.settings.service_port, self.settings.probe_timeout).await {
                tracing::info!("Found server at {}:{}", ip, self.settings.service_port);
                self.registry.record_sighting(ip, self.settings.service_port, None);
                found += 1;
            }
            if !delay.is_zero() && !sleep_or_cancel(delay, cancel).await {
                break;
            }
        }
        found
    }
}

impl Drop for DiscoveryService {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn bind_broadcast_socket() -> std::io::Result<UdpSocket> {
    let socket = UdpSocket::bind(SocketAddr::from(([0, 0, 0, 0], 0))).await?;
    socket.set_broadcast(true)?;
    Ok(socket)
}

/// Sleep for `duration`; false when cancelled first
async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        _ = cancel.cancelled() => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(port: u16) -> Arc<DiscoveryService> {
        DiscoveryService::new(DiscoverySettings {
            service_port: port,
            ..DiscoverySettings::default()
        })
    }

    #[test]
    fn test_beacon_wire_format() {
        let json = serde_json::to_value(Beacon::Announcement {
            port: 8000,
            timestamp: 12.5,
        })
        .unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "announcement", "port": 8000, "timestamp": 12.5})
        );
    }

    #[test]
    fn test_beacon_from_peer_is_registered() {
        let discovery = service(8000);
        let from: IpAddr = "192.168.1.50".parse().unwrap();

        assert!(discovery.handle_datagram(
            br#"{"type":"announcement","port":8010,"timestamp":1.0}"#,
            from
        ));
        let peer = discovery.registry().get("192.168.1.50:8010").unwrap();
        assert_eq!(peer.url(), "http://192.168.1.50:8010");
    }

    #[test]
    fn test_own_port_and_garbage_ignored() {
        let discovery = service(8000);
        let from: IpAddr = "192.168.1.50".parse().unwrap();

        assert!(!discovery.handle_datagram(
            br#"{"type":"announcement","port":8000,"timestamp":1.0}"#,
            from
        ));
        assert!(!discovery.handle_datagram(b"not json", from));
        assert!(!discovery.handle_datagram(br#"{"type":"hello","port":9000}"#, from));
        assert!(discovery.registry().is_empty());
    }

    #[tokio::test]
    async fn test_probe_candidates_registers_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let discovery = service(port);

        let found = discovery
            .probe_candidates(&[Ipv4Addr::LOCALHOST], Duration::ZERO, &CancellationToken::new())
            .await;
        assert_eq!(found, 1);
        assert!(discovery.registry().get(&format!("127.0.0.1:{}", port)).is_some());
    }

    #[tokio::test]
    async fn test_start_stop_idempotent() {
        let discovery = DiscoveryService::new(DiscoverySettings {
            discovery_port: 0,
            scan_interval: Duration::from_secs(3600),
            ..DiscoverySettings::default()
        });
        discovery.start();
        discovery.start();
        assert!(discovery.is_running());

        discovery.stop();
        discovery.stop();
        assert!(!discovery.is_running());
        // no-op once stopped
        discovery.trigger_scan();
    }
}
