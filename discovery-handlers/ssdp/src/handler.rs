//! The SSDP/UPnP [`DiscoveryHandler`]: M-SEARCH broadcast, response
//! collection, XML description fetch and device assembly.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use discovery_core::{Device, DeviceType, DiscoveryHandler, DiscoveryResult};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use uuid::Uuid;

use crate::ssdp::{self, MULTICAST_ADDR, MULTICAST_PORT};
use crate::xml::{self, DeviceDescription, ServiceDescription};

#[derive(Debug, Clone)]
pub struct SsdpConfig {
    pub search_targets: Vec<String>,
    pub mx: u32,
    pub search_timeout: Duration,
    pub description_timeout: Duration,
}

impl Default for SsdpConfig {
    fn default() -> Self {
        SsdpConfig {
            search_targets: ssdp::default_search_targets(),
            mx: 3,
            search_timeout: Duration::from_secs(5),
            description_timeout: Duration::from_secs(3),
        }
    }
}

pub struct SsdpHandler {
    config: SsdpConfig,
    http: reqwest::Client,
}

impl SsdpHandler {
    pub fn new(config: SsdpConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(config.description_timeout)
            .build()
            .expect("reqwest client with a fixed timeout always builds");
        SsdpHandler { config, http }
    }

    fn build_socket() -> anyhow::Result<UdpSocket> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_nonblocking(true)?;
        let bind_addr: SocketAddr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0).into();
        socket.bind(&bind_addr.into())?;
        Ok(UdpSocket::from_std(socket.into())?)
    }

    async fn collect_locations(&self) -> anyhow::Result<Vec<String>> {
        let socket = Self::build_socket()?;
        let dest: SocketAddr = SocketAddrV4::new(MULTICAST_ADDR.parse().unwrap(), MULTICAST_PORT).into();

        for target in &self.config.search_targets {
            let request = ssdp::build_msearch(target, self.config.mx);
            socket.send_to(&request, dest).await?;
        }

        let mut locations = std::collections::HashSet::new();
        let mut buf = [0u8; 2048];
        let deadline = Instant::now() + self.config.search_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            let recv = tokio::time::timeout(remaining, socket.recv_from(&mut buf)).await;
            let (len, _) = match recv {
                Ok(Ok(v)) => v,
                Ok(Err(e)) => {
                    log::debug!("ssdp recv error: {e}");
                    continue;
                }
                Err(_) => break,
            };
            let text = String::from_utf8_lossy(&buf[..len]);
            if let Some(headers) = ssdp::parse_response(&text) {
                if let Some(location) = headers.get("location") {
                    locations.insert(location.clone());
                }
            }
        }
        Ok(locations.into_iter().collect())
    }

    async fn fetch_description(&self, location: &str) -> anyhow::Result<DeviceDescription> {
        let body = self.http.get(location).send().await?.text().await?;
        xml::parse(&body)
    }

    async fn run(&self) -> anyhow::Result<Vec<Device>> {
        let locations = self.collect_locations().await?;
        let mut devices = Vec::new();
        for location in locations {
            match self.fetch_description(&location).await {
                Ok(description) => devices.push(assemble_device(&location, description)),
                Err(e) => log::debug!("failed to fetch/parse {location}: {e}"),
            }
        }
        Ok(devices)
    }
}

fn assemble_device(location: &str, description: DeviceDescription) -> Device {
    let host = location
        .split("://")
        .nth(1)
        .and_then(|rest| rest.split('/').next())
        .and_then(|authority| authority.split(':').next())
        .unwrap_or(location)
        .to_string();

    let mut device = Device::new(Uuid::new_v4().to_string(), host, "ssdp");
    device.name = Some(description.friendly_name.clone());
    device.manufacturer = Some(description.manufacturer.clone());
    device.model = description.model_name.clone();
    device.firmware_version = description.model_number.clone();

    let services = xml::all_services(&description);
    device.services = services.iter().map(|s| s.service_type.clone()).collect();
    device.device_type = classify(&description.device_type, &services);

    device
        .capabilities
        .insert("upnp_device_type".to_string(), serde_json::json!(description.device_type));
    if let Some(udn) = &description.udn {
        device.capabilities.insert("udn".to_string(), serde_json::json!(udn));
    }
    device
}

fn classify(device_type: &str, services: &[&ServiceDescription]) -> DeviceType {
    let lower = device_type.to_lowercase();
    if lower.contains("mediaserver") || lower.contains("mediarenderer") {
        DeviceType::MediaServer
    } else if lower.contains("internetgatewaydevice") || lower.contains("wandevice") {
        DeviceType::Router
    } else if lower.contains("printer") {
        DeviceType::Printer
    } else if lower.contains("camera") {
        DeviceType::Camera
    } else if ["light", "thermostat", "sensor", "switch"]
        .iter()
        .any(|k| lower.contains(k) || services.iter().any(|s| s.service_type.to_lowercase().contains(k)))
    {
        DeviceType::SmartHome
    } else {
        DeviceType::Unknown
    }
}

#[async_trait]
impl DiscoveryHandler for SsdpHandler {
    async fn discover(&self, _params: &HashMap<String, serde_json::Value>) -> DiscoveryResult {
        let start = Instant::now();
        match self.run().await {
            Ok(devices) => DiscoveryResult::ok("ssdp", devices, start.elapsed().as_secs_f64()),
            Err(e) => DiscoveryResult::failed("ssdp", start.elapsed().as_secs_f64(), e.to_string()),
        }
    }

    async fn available(&self) -> bool {
        Self::build_socket().is_ok()
    }

    fn name(&self) -> &str {
        "ssdp"
    }
}
