//! The mDNS [`DiscoveryHandler`]: multicast query/response collection and
//! device assembly.

use std::collections::{HashMap, HashSet};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use discovery_core::{Device, DeviceType, DiscoveryHandler, DiscoveryResult};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use uuid::Uuid;

use crate::dns::{self, QCLASS_IN, QTYPE_A, QTYPE_PTR, QTYPE_SRV, QTYPE_TXT};

pub const MULTICAST_ADDR: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 251);
pub const MULTICAST_PORT: u16 = 5353;

#[derive(Debug, Clone)]
pub struct MdnsConfig {
    pub service_types: Vec<String>,
    pub timeout: Duration,
}

impl Default for MdnsConfig {
    fn default() -> Self {
        MdnsConfig {
            service_types: vec![
                "_services._dns-sd._udp.local.".to_string(),
                "_http._tcp.local.".to_string(),
                "_ipp._tcp.local.".to_string(),
                "_ssh._tcp.local.".to_string(),
                "_mqtt._tcp.local.".to_string(),
                "_coap._udp.local.".to_string(),
                "_airplay._tcp.local.".to_string(),
                "_homekit._tcp.local.".to_string(),
                "_hap._tcp.local.".to_string(),
            ],
            timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Default)]
struct PartialDevice {
    services: HashSet<String>,
    ports: HashSet<u16>,
    txt: HashMap<String, String>,
}

pub struct MdnsHandler {
    config: MdnsConfig,
}

impl MdnsHandler {
    pub fn new(config: MdnsConfig) -> Self {
        MdnsHandler { config }
    }

    fn build_socket() -> anyhow::Result<UdpSocket> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        #[cfg(unix)]
        socket.set_reuse_port(true)?;
        socket.set_nonblocking(true)?;
        let bind_addr: SocketAddr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, MULTICAST_PORT).into();
        socket.bind(&bind_addr.into())?;
        socket.join_multicast_v4(&MULTICAST_ADDR, &Ipv4Addr::UNSPECIFIED)?;
        Ok(UdpSocket::from_std(socket.into())?)
    }

    async fn run(&self) -> anyhow::Result<Vec<Device>> {
        let socket = Self::build_socket()?;
        let dest: SocketAddr = SocketAddrV4::new(MULTICAST_ADDR, MULTICAST_PORT).into();

        for service_type in &self.config.service_types {
            let query = dns::build_query(service_type, QTYPE_PTR, QCLASS_IN);
            socket.send_to(&query, dest).await?;
        }

        let mut partials: HashMap<Ipv4Addr, PartialDevice> = HashMap::new();
        let mut buf = [0u8; 4096];
        let deadline = Instant::now() + self.config.timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            let recv = tokio::time::timeout(remaining, socket.recv_from(&mut buf)).await;
            let (len, _) = match recv {
                Ok(Ok(v)) => v,
                Ok(Err(e)) => {
                    log::debug!("mdns recv error: {e}");
                    continue;
                }
                Err(_) => break,
            };
            if let Some(message) = dns::parse_response(&buf[..len]) {
                self.absorb_message(&buf[..len], &message, &mut partials);
            }
        }

        Ok(partials
            .into_iter()
            .map(|(ip, partial)| assemble_device(ip, partial))
            .collect())
    }

    fn absorb_message(
        &self,
        raw: &[u8],
        message: &dns::DnsMessage,
        partials: &mut HashMap<Ipv4Addr, PartialDevice>,
    ) {
        // A-records tell us which IP a set of service/SRV/TXT records in
        // this same datagram describes; mDNS responses from a single host
        // carry them together, so we first collect services/ports/TXT
        // irrespective of IP, then fan them out to every A record present.
        let mut services = HashSet::new();
        let mut ports = HashSet::new();
        let mut txt = HashMap::new();
        let mut ips = Vec::new();

        for record in &message.answers {
            match record.rtype {
                t if t == QTYPE_PTR => {
                    if let Some((name, _)) = dns::parse_name(raw, record.rdata_offset) {
                        services.insert(service_label(&name));
                    }
                }
                t if t == QTYPE_TXT => {
                    txt.extend(dns::parse_txt(&record.rdata));
                }
                t if t == QTYPE_SRV => {
                    if let Some(srv) = dns::parse_srv(raw, record.rdata_offset, &record.rdata) {
                        ports.insert(srv.port);
                        services.insert(service_label(&record.name));
                    }
                }
                t if t == QTYPE_A => {
                    if let Some(ip) = dns::parse_a(&record.rdata) {
                        ips.push(ip);
                    }
                }
                _ => {}
            }
        }

        for ip in ips {
            let entry = partials.entry(ip).or_default();
            entry.services.extend(services.iter().cloned());
            entry.ports.extend(ports.iter().copied());
            for (k, v) in &txt {
                entry.txt.insert(k.clone(), v.clone());
            }
        }
    }
}

fn service_label(name: &str) -> String {
    name.split('.')
        .find(|label| label.starts_with('_'))
        .unwrap_or(name)
        .trim_start_matches('_')
        .to_string()
}

fn assemble_device(ip: Ipv4Addr, partial: PartialDevice) -> Device {
    let mut device = Device::new(Uuid::new_v4().to_string(), ip.to_string(), "mdns");
    device.ports = partial.ports.into_iter().collect();
    device.services = partial.services.clone();

    device.model = partial.txt.get("model").cloned();
    device.manufacturer = partial
        .txt
        .get("manufacturer")
        .or_else(|| partial.txt.get("vendor"))
        .cloned();
    device.firmware_version = partial
        .txt
        .get("version")
        .or_else(|| partial.txt.get("fw"))
        .cloned();
    device.name = partial
        .txt
        .get("name")
        .or_else(|| partial.txt.get("friendly_name"))
        .cloned();

    device.device_type = classify(&partial.services, &partial.txt);
    for (k, v) in partial.txt {
        device
            .capabilities
            .insert(k, serde_json::Value::String(v));
    }
    device
}

fn classify(services: &HashSet<String>, txt: &HashMap<String, String>) -> DeviceType {
    let has = |needle: &str| services.iter().any(|s| s.contains(needle));
    let txt_contains = |needle: &str| txt.keys().any(|k| k.contains(needle)) || txt.values().any(|v| v.contains(needle));

    if has("ipp") || has("printer") {
        DeviceType::Printer
    } else if has("ssh") || has("telnet") {
        DeviceType::IotGateway
    } else if has("mqtt") || has("coap") {
        DeviceType::IotSensor
    } else if has("http") || has("https") {
        if txt_contains("camera") {
            DeviceType::Camera
        } else if txt_contains("media") || txt_contains("dlna") {
            DeviceType::MediaServer
        } else {
            DeviceType::IotGateway
        }
    } else {
        DeviceType::Unknown
    }
}

#[async_trait]
impl DiscoveryHandler for MdnsHandler {
    async fn discover(&self, _params: &HashMap<String, serde_json::Value>) -> DiscoveryResult {
        let start = Instant::now();
        match self.run().await {
            Ok(devices) => DiscoveryResult::ok("mdns", devices, start.elapsed().as_secs_f64()),
            Err(e) => DiscoveryResult::failed("mdns", start.elapsed().as_secs_f64(), e.to_string()),
        }
    }

    async fn available(&self) -> bool {
        Self::build_socket().is_ok()
    }

    fn name(&self) -> &str {
        "mdns"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_label_strips_leading_underscore_and_suffix() {
        assert_eq!(service_label("_mqtt._tcp.local."), "mqtt");
        assert_eq!(service_label("_ipp._tcp.local."), "ipp");
    }

    #[test]
    fn classify_prefers_printer_then_gateway_then_sensor() {
        let mut services = HashSet::new();
        services.insert("ipp".to_string());
        assert_eq!(classify(&services, &HashMap::new()), DeviceType::Printer);

        let mut services = HashSet::new();
        services.insert("mqtt".to_string());
        assert_eq!(classify(&services, &HashMap::new()), DeviceType::IotSensor);
    }

    #[test]
    fn classify_http_with_camera_txt_token() {
        let mut services = HashSet::new();
        services.insert("http".to_string());
        let mut txt = HashMap::new();
        txt.insert("device".to_string(), "camera".to_string());
        assert_eq!(classify(&services, &txt), DeviceType::Camera);
    }

    #[test]
    fn assemble_device_maps_txt_fields() {
        let mut partial = PartialDevice::default();
        partial.ports.insert(80);
        partial.services.insert("http".to_string());
        partial.txt.insert("model".to_string(), "sensor-x".to_string());
        partial.txt.insert("vendor".to_string(), "acme".to_string());

        let device = assemble_device(Ipv4Addr::new(10, 0, 0, 5), partial);
        assert_eq!(device.ip_address, "10.0.0.5");
        assert_eq!(device.model.as_deref(), Some("sensor-x"));
        assert_eq!(device.manufacturer.as_deref(), Some("acme"));
        assert!(device.ports.contains(&80));
    }
}
