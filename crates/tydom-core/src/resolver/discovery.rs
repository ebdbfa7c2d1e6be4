// ── Local gateway discovery ──
//
// Candidate hosts come from three places, in priority order: the cached
// IP, a TCP reachability scan of the local /24, and mDNS announcements.
// Discovery only lists hosts; the resolver confirms each one with an
// authenticated ping before using it.

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use futures_util::StreamExt;
use futures_util::stream;
use mdns_sd::{ServiceDaemon, ServiceEvent};
use serde::Serialize;
use strum::Display;
use tokio::net::{TcpStream, UdpSocket};
use tracing::{debug, trace, warn};

use crate::config::DiscoveryConfig;

/// Concurrent TCP connects during the subnet scan.
const SCAN_CONCURRENCY: usize = 64;

/// Any routable address works: no packet is sent, the socket only asks
/// the kernel which interface it would use.
const ROUTE_PROBE_ADDR: &str = "8.8.8.8:80";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DiscoveryMethod {
    CachedIp,
    SubnetScan,
    Mdns,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveryCandidate {
    pub host: String,
    pub method: DiscoveryMethod,
}

/// List candidate hosts, best first, without duplicates.
pub async fn discover(
    config: &DiscoveryConfig,
    port: u16,
    cached_ip: Option<&str>,
) -> Vec<DiscoveryCandidate> {
    let scanned = if config.subnet_scan {
        match local_ipv4().await {
            Some(ip) => scan_subnet(ip, port, config.scan_timeout).await,
            None => {
                warn!("no local IPv4 address, skipping subnet scan");
                Vec::new()
            }
        }
    } else {
        Vec::new()
    };

    let announced = match &config.mdns_service_type {
        Some(service_type) => browse_mdns(service_type, config.mdns_timeout).await,
        None => Vec::new(),
    };

    let candidates = merge_candidates(cached_ip, scanned, announced);
    debug!(count = candidates.len(), "discovery finished");
    candidates
}

/// Order-preserving merge; the first method to report a host keeps it.
pub fn merge_candidates(
    cached_ip: Option<&str>,
    scanned: Vec<String>,
    announced: Vec<String>,
) -> Vec<DiscoveryCandidate> {
    let mut seen = HashSet::new();
    let ordered = cached_ip
        .map(|host| (host.to_owned(), DiscoveryMethod::CachedIp))
        .into_iter()
        .chain(scanned.into_iter().map(|h| (h, DiscoveryMethod::SubnetScan)))
        .chain(announced.into_iter().map(|h| (h, DiscoveryMethod::Mdns)));

    ordered
        .filter(|(host, _)| seen.insert(host.clone()))
        .map(|(host, method)| DiscoveryCandidate { host, method })
        .collect()
}

/// Address of the interface carrying the default route.
pub async fn local_ipv4() -> Option<Ipv4Addr> {
    let socket = UdpSocket::bind("0.0.0.0:0").await.ok()?;
    socket.connect(ROUTE_PROBE_ADDR).await.ok()?;
    match socket.local_addr().ok()?.ip() {
        IpAddr::V4(ip) if !ip.is_loopback() && !ip.is_unspecified() => Some(ip),
        _ => None,
    }
}

/// Every other host address in `ip`'s /24.
pub fn subnet_hosts(ip: Ipv4Addr) -> Vec<Ipv4Addr> {
    let [a, b, c, own] = ip.octets();
    (1..=254_u8)
        .filter(|&d| d != own)
        .map(|d| Ipv4Addr::new(a, b, c, d))
        .collect()
}

/// Hosts in the local /24 accepting TCP on `port`, sorted by address.
pub async fn scan_subnet(ip: Ipv4Addr, port: u16, connect_timeout: Duration) -> Vec<String> {
    debug!(%ip, port, "scanning local subnet");

    let mut open: Vec<Ipv4Addr> = stream::iter(subnet_hosts(ip))
        .map(|host| async move {
            let addr = SocketAddr::new(IpAddr::V4(host), port);
            match tokio::time::timeout(connect_timeout, TcpStream::connect(addr)).await {
                Ok(Ok(_)) => {
                    trace!(%host, "port open");
                    Some(host)
                }
                _ => None,
            }
        })
        .buffer_unordered(SCAN_CONCURRENCY)
        .filter_map(|host| async move { host })
        .collect()
        .await;

    open.sort_unstable();
    open.into_iter().map(|h| h.to_string()).collect()
}

/// IPv4 addresses announced for `service_type` within `window`.
pub async fn browse_mdns(service_type: &str, window: Duration) -> Vec<String> {
    let daemon = match ServiceDaemon::new() {
        Ok(daemon) => daemon,
        Err(e) => {
            warn!(error = %e, "mDNS daemon unavailable");
            return Vec::new();
        }
    };
    let receiver = match daemon.browse(service_type) {
        Ok(receiver) => receiver,
        Err(e) => {
            warn!(error = %e, service_type, "mDNS browse failed");
            let _ = daemon.shutdown();
            return Vec::new();
        }
    };

    let mut hosts = Vec::new();
    let deadline = tokio::time::Instant::now() + window;
    loop {
        match tokio::time::timeout_at(deadline, receiver.recv_async()).await {
            Ok(Ok(ServiceEvent::ServiceResolved(info))) => {
                for addr in info.get_addresses() {
                    if let IpAddr::V4(v4) = addr {
                        let host = v4.to_string();
                        if !hosts.contains(&host) {
                            debug!(host = %host, name = info.get_fullname(), "mDNS gateway announcement");
                            hosts.push(host);
                        }
                    }
                }
            }
            Ok(Ok(_)) => {}
            Ok(Err(_)) | Err(_) => break,
        }
    }

    let _ = daemon.shutdown();
    hosts
}
