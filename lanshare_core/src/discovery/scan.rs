//! Active scanning helpers: neighbor table, subnet candidates, TCP probes.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::net::TcpStream;

/// Upper bound for running the `arp` command
pub const NEIGHBOR_TABLE_TIMEOUT: Duration = Duration::from_secs(10);

#[cfg(target_os = "linux")]
const PROC_ARP: &str = "/proc/net/arp";

/// Addresses worth probing: not loopback, link-local, multicast,
/// broadcast or unspecified.
pub fn is_probe_candidate(ip: &Ipv4Addr) -> bool {
    !(ip.is_loopback()
        || ip.is_link_local()
        || ip.is_multicast()
        || ip.is_broadcast()
        || ip.is_unspecified())
}

/// Extract IPv4 addresses from `arp -a` or `/proc/net/arp` output.
///
/// The first address-looking token of each line is taken; the result is
/// filtered with [`is_probe_candidate`] and de-duplicated. Windows
/// `Interface:` headers name this machine and are skipped.
pub fn parse_neighbor_table(text: &str) -> Vec<Ipv4Addr> {
    let mut hosts: Vec<Ipv4Addr> = text
        .lines()
        .filter(|line| !line.trim_start().starts_with("Interface:"))
        .filter_map(|line| {
            line.split_whitespace()
                .map(|token| token.trim_matches(|c| c == '(' || c == ')'))
                .find_map(|token| token.parse::<Ipv4Addr>().ok())
        })
        .filter(is_probe_candidate)
        .collect();
    hosts.sort();
    hosts.dedup();
    hosts
}

/// Drop any of this machine's own addresses from `hosts`
pub fn without_local(mut hosts: Vec<Ipv4Addr>, local: &[Ipv4Addr]) -> Vec<Ipv4Addr> {
    hosts.retain(|ip| !local.contains(ip));
    hosts
}

/// Every IPv4 address bound to a local interface
pub fn local_ipv4_addresses() -> Vec<Ipv4Addr> {
    match local_ip_address::list_afinet_netifas() {
        Ok(interfaces) => interfaces
            .into_iter()
            .filter_map(|(_name, ip)| match ip {
                IpAddr::V4(ip) => Some(ip),
                IpAddr::V6(_) => None,
            })
            .collect(),
        Err(e) => {
            tracing::debug!("Cannot list local interfaces: {}", e);
            Vec::new()
        }
    }
}

/// Hosts from the platform neighbor table, minus this machine; empty when
/// unavailable
pub async fn neighbor_hosts() -> Vec<Ipv4Addr> {
    without_local(read_neighbor_table().await, &local_ipv4_addresses())
}

async fn read_neighbor_table() -> Vec<Ipv4Addr> {
    #[cfg(target_os = "linux")]
    {
        if let Ok(text) = tokio::fs::read_to_string(PROC_ARP).await {
            let hosts = parse_neighbor_table(&text);
            if !hosts.is_empty() {
                return hosts;
            }
        }
    }

    let mut command = tokio::process::Command::new("arp");
    command.arg("-a").kill_on_drop(true);
    match tokio::time::timeout(NEIGHBOR_TABLE_TIMEOUT, command.output()).await {
        Ok(Ok(output)) if output.status.success() => {
            parse_neighbor_table(&String::from_utf8_lossy(&output.stdout))
        }
        Ok(Ok(output)) => {
            tracing::debug!("arp -a exited with {}", output.status);
            Vec::new()
        }
        Ok(Err(e)) => {
            tracing::debug!("arp -a unavailable: {}", e);
            Vec::new()
        }
        Err(_) => {
            tracing::warn!("arp -a timed out");
            Vec::new()
        }
    }
}

/// Preferred LAN IPv4 address: 192.168.x.x, then 10.x.x.x, then 172.x.x.x,
/// then any other non-loopback IPv4.
pub fn local_ipv4() -> Option<Ipv4Addr> {
    let interfaces = local_ip_address::list_afinet_netifas().ok()?;
    let mut best: Option<(u8, Ipv4Addr)> = None;

    for (_name, ip) in interfaces {
        let IpAddr::V4(ip) = ip else {
            continue;
        };
        if ip.is_loopback() {
            continue;
        }
        let rank = match ip.octets() {
            [192, 168, ..] => 0,
            [10, ..] => 1,
            [172, ..] => 2,
            _ => 3,
        };
        if best.is_none_or(|(r, _)| rank < r) {
            best = Some((rank, ip));
        }
    }

    best.map(|(_, ip)| ip)
}

/// The `/24` around `ip`, e.g. `192.168.1.0/24`
pub fn network_range_of(ip: Ipv4Addr) -> String {
    let [a, b, c, _] = ip.octets();
    format!("{}.{}.{}.0/24", a, b, c)
}

pub fn network_range() -> Option<String> {
    local_ipv4().map(network_range_of)
}

/// Every host of the `/24` around `local` except `local` itself
pub fn subnet_candidates(local: Ipv4Addr) -> Vec<Ipv4Addr> {
    let [a, b, c, _] = local.octets();
    (1..=254u8)
        .map(|d| Ipv4Addr::new(a, b, c, d))
        .filter(|ip| *ip != local)
        .collect()
}

/// Bounded-timeout TCP connect to `ip:port`
pub async fn probe_host(ip: IpAddr, port: u16, timeout: Duration) -> bool {
    matches!(
        tokio::time::timeout(timeout, TcpStream::connect(SocketAddr::new(ip, port))).await,
        Ok(Ok(_))
    )
}
