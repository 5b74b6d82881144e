//! The active network scan [`DiscoveryHandler`]: enumerate hosts, probe
//! reachability, scan ports, identify services, assemble devices.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use discovery_core::{Device, DeviceType, DiscoveryHandler, DiscoveryResult};
use discovery_runtime::{FailureKind, RateLimiter, RateLimiterConfig};
use ipnetwork::Ipv4Network;
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::{interfaces, ping, ports};

#[derive(Debug, Clone)]
pub struct NetworkScanConfig {
    /// CIDR ranges to scan. Empty means "derive from local interfaces".
    pub networks: Vec<String>,
    pub ping_enabled: bool,
    pub max_concurrent_hosts: usize,
    pub max_concurrent_ports_per_host: usize,
    pub rate_limiter: RateLimiterConfig,
}

impl Default for NetworkScanConfig {
    fn default() -> Self {
        NetworkScanConfig {
            networks: Vec::new(),
            ping_enabled: true,
            max_concurrent_hosts: 50,
            max_concurrent_ports_per_host: 10,
            rate_limiter: RateLimiterConfig::default(),
        }
    }
}

pub struct NetworkScanHandler {
    config: NetworkScanConfig,
    rate_limiter: Arc<RateLimiter>,
}

impl NetworkScanHandler {
    pub fn new(config: NetworkScanConfig) -> Self {
        let rate_limiter = Arc::new(RateLimiter::new(config.rate_limiter.clone()));
        NetworkScanHandler { config, rate_limiter }
    }

    /// Parses `self.config.networks`, falling back to locally-derived `/24`
    /// subnets when empty. Invalid CIDR strings are logged and skipped;
    /// the remaining ranges are still processed.
    fn resolve_networks(&self) -> Vec<Ipv4Network> {
        if self.config.networks.is_empty() {
            return interfaces::local_v4_networks();
        }
        self.config
            .networks
            .iter()
            .filter_map(|raw| match raw.parse::<Ipv4Network>() {
                Ok(net) => Some(net),
                Err(e) => {
                    log::warn!("invalid CIDR '{raw}': {e}");
                    None
                }
            })
            .collect()
    }

    async fn scan_host(&self, ip: Ipv4Addr) -> Option<Device> {
        let host = ip.to_string();

        if self
            .rate_limiter
            .acquire(&host, Duration::from_secs(2))
            .await
            .is_err()
        {
            return None;
        }

        let start = Instant::now();
        if self.config.ping_enabled && !ping::is_reachable(&host).await {
            self.rate_limiter
                .record_failure(&host, FailureKind::Timeout)
                .await;
            return None;
        }

        let open_ports = ports::scan_open_ports(&host, self.config.max_concurrent_ports_per_host).await;
        if open_ports.is_empty() {
            self.rate_limiter
                .record_failure(&host, FailureKind::ConnectionFailed)
                .await;
            return None;
        }
        self.rate_limiter.record_success(&host, start.elapsed()).await;

        let banners = ports::identify_services(&host, &open_ports).await;
        let services: Vec<String> = banners
            .iter()
            .map(|(port, banner)| ports::classify_service(*port, banner.as_deref()))
            .collect();

        let mut device = Device::new(Uuid::new_v4().to_string(), host.clone(), "network_scan");
        device.ports = open_ports.clone();
        device.services = services.iter().cloned().collect();
        device.device_type = classify(&open_ports, &services);
        device.hostname = dns_lookup::lookup_addr(&std::net::IpAddr::V4(ip))
            .ok()
            .filter(|name| name != &host);

        Some(device)
    }

    async fn run(&self) -> anyhow::Result<Vec<Device>> {
        let networks = self.resolve_networks();
        if networks.is_empty() {
            return Ok(Vec::new());
        }

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_hosts.max(1)));
        let mut tasks = Vec::new();
        for network in networks {
            for ip in interfaces::hosts_in(&network) {
                let semaphore = semaphore.clone();
                tasks.push(async move {
                    let _permit = semaphore.acquire_owned().await.ok()?;
                    self.scan_host(ip).await
                });
            }
        }
        let results = futures::future::join_all(tasks).await;
        Ok(results.into_iter().flatten().collect())
    }
}

fn classify(ports: &std::collections::BTreeSet<u16>, services: &[String]) -> DeviceType {
    let has_port = |p: u16| ports.contains(&p);
    let has_service = |s: &str| services.iter().any(|svc| svc == s);

    let has_http = has_port(80) || has_service("http");
    let has_ssh_or_telnet = has_port(22) || has_port(23) || has_service("ssh") || has_service("telnet");

    if has_port(80) && has_port(443) && has_ssh_or_telnet {
        DeviceType::Router
    } else if has_port(631) || has_port(9100) || has_port(515) || has_service("printer") {
        DeviceType::Printer
    } else if has_port(8080) || has_port(8200) || has_port(32400) || has_service("media") {
        DeviceType::MediaServer
    } else if has_port(1883) || has_service("mqtt") {
        DeviceType::IotGateway
    } else if (has_port(554) || has_port(8000) || has_port(8080)) && has_http {
        DeviceType::Camera
    } else if has_port(161) || (has_port(22) && has_port(80)) {
        DeviceType::Switch
    } else if has_port(5683) || has_port(8883) || has_port(5353) {
        DeviceType::IotSensor
    } else {
        DeviceType::Unknown
    }
}

#[async_trait]
impl DiscoveryHandler for NetworkScanHandler {
    async fn discover(&self, _params: &HashMap<String, serde_json::Value>) -> DiscoveryResult {
        let start = Instant::now();
        match self.run().await {
            Ok(devices) => DiscoveryResult::ok("network_scan", devices, start.elapsed().as_secs_f64()),
            Err(e) => DiscoveryResult::failed("network_scan", start.elapsed().as_secs_f64(), e.to_string()),
        }
    }

    async fn available(&self) -> bool {
        tokio::net::TcpSocket::new_v4().is_ok()
    }

    fn name(&self) -> &str {
        "network_scan"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn classify_router_needs_http_https_and_shell() {
        let ports: BTreeSet<u16> = [80, 443, 22].into_iter().collect();
        let services = vec!["http".to_string(), "https".to_string(), "ssh".to_string()];
        assert_eq!(classify(&ports, &services), DeviceType::Router);
    }

    #[test]
    fn classify_router_outranks_media_server_alt_http_port() {
        // 80/443/22/8080 is a common router admin-UI-on-alt-port pattern.
        // Router must be checked before MediaServer's 8080 branch.
        let ports: BTreeSet<u16> = [80, 443, 22, 8080].into_iter().collect();
        assert_eq!(classify(&ports, &[]), DeviceType::Router);
    }

    #[test]
    fn classify_printer_by_port() {
        let ports: BTreeSet<u16> = [9100].into_iter().collect();
        assert_eq!(classify(&ports, &[]), DeviceType::Printer);
    }

    #[test]
    fn classify_iot_sensor_by_coap_port() {
        let ports: BTreeSet<u16> = [5683].into_iter().collect();
        assert_eq!(classify(&ports, &[]), DeviceType::IotSensor);
    }

    #[test]
    fn invalid_cidr_is_skipped_without_panicking() {
        let handler = NetworkScanHandler::new(NetworkScanConfig {
            networks: vec!["not-a-cidr".to_string(), "192.168.50.0/24".to_string()],
            ..Default::default()
        });
        let networks = handler.resolve_networks();
        assert_eq!(networks.len(), 1);
        assert_eq!(networks[0].to_string(), "192.168.50.0/24");
    }

    #[test]
    fn empty_networks_falls_back_to_local_interfaces() {
        let handler = NetworkScanHandler::new(NetworkScanConfig::default());
        // Can't assert a specific value in a sandboxed test runner, but the
        // call must not panic and must return a (possibly empty) vec.
        let _ = handler.resolve_networks();
    }
}
