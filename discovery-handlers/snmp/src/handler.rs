//! The SNMP [`DiscoveryHandler`]: sysInfo GET, optional interface walk,
//! and device assembly.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use discovery_core::{Device, DeviceType, DiscoveryHandler, DiscoveryResult};
use tokio::net::UdpSocket;
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::ber::{self, BerValue};

pub const SNMP_PORT: u16 = 161;

const SYS_DESCR: &str = "1.3.6.1.2.1.1.1.0";
const SYS_OBJECT_ID: &str = "1.3.6.1.2.1.1.2.0";
const SYS_UPTIME: &str = "1.3.6.1.2.1.1.3.0";
const SYS_CONTACT: &str = "1.3.6.1.2.1.1.4.0";
const SYS_NAME: &str = "1.3.6.1.2.1.1.5.0";
const SYS_LOCATION: &str = "1.3.6.1.2.1.1.6.0";
const SYS_SERVICES: &str = "1.3.6.1.2.1.1.7.0";
const IF_TABLE_PREFIX: &str = "1.3.6.1.2.1.2.2.1";
const MAX_INTERFACE_ROWS: usize = 100;

const VENDOR_TOKENS: &[&str] = &[
    "cisco", "juniper", "hp", "dell", "netgear", "linksys", "dlink", "tplink", "ubiquiti", "mikrotik",
];

/// USM auth/privacy settings for SNMPv3. Keys are accepted as opaque,
/// already-localized bytes (MD5/SHA x DES/AES per `auth_protocol`/
/// `priv_protocol`) — deriving them from a passphrase is out of scope
/// (spec.md §1 Non-goal: "full SNMPv3 USM key derivation").
#[derive(Debug, Clone, Default)]
pub struct SnmpV3Credentials {
    pub user: String,
    pub auth_protocol: Option<String>,
    pub auth_key: Option<Vec<u8>>,
    pub priv_protocol: Option<String>,
    pub priv_key: Option<Vec<u8>>,
}

#[derive(Debug, Clone)]
pub struct SnmpConfig {
    pub hosts: Vec<String>,
    pub community: String,
    pub version: i64,
    pub v3_credentials: Option<SnmpV3Credentials>,
    pub timeout: Duration,
    pub max_concurrent: usize,
    pub include_interfaces: bool,
}

impl Default for SnmpConfig {
    fn default() -> Self {
        SnmpConfig {
            hosts: Vec::new(),
            community: "public".to_string(),
            version: 1,
            v3_credentials: None,
            timeout: Duration::from_secs(2),
            max_concurrent: 50,
            include_interfaces: false,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct InterfaceInfo {
    pub index: i64,
    pub descr: String,
    pub if_type: i64,
    pub mtu: i64,
    pub speed: i64,
    pub phys_address: Option<String>,
    pub admin_status: i64,
    pub oper_status: i64,
}

pub struct SnmpHandler {
    config: SnmpConfig,
}

impl SnmpHandler {
    pub fn new(config: SnmpConfig) -> Self {
        SnmpHandler { config }
    }

    async fn query_host(&self, host: &str) -> anyhow::Result<Option<Device>> {
        let oids = [
            SYS_DESCR,
            SYS_OBJECT_ID,
            SYS_UPTIME,
            SYS_CONTACT,
            SYS_NAME,
            SYS_LOCATION,
            SYS_SERVICES,
        ]
        .iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>();

        let values = self.get(host, &oids).await?;
        if values.is_empty() {
            return Ok(None);
        }

        let sys_descr = string_value(&values, SYS_DESCR);
        let sys_object_id = oid_value(&values, SYS_OBJECT_ID);

        let mut device = Device::new(Uuid::new_v4().to_string(), host.to_string(), "snmp");
        device.name = string_value(&values, SYS_NAME);
        device.hostname = device.name.clone();
        device.ports.insert(SNMP_PORT);
        device.services.insert("snmp".to_string());

        if let Some(descr) = &sys_descr {
            let (manufacturer, model) = parse_vendor_model(descr);
            device.manufacturer = manufacturer;
            device.model = model;
        }

        if let Some(object_id) = &sys_object_id {
            device.device_type = classify_by_object_id(object_id);
        }

        if let Some(descr) = sys_descr {
            device.capabilities.insert("sys_descr".to_string(), serde_json::json!(descr));
        }
        if let Some(contact) = string_value(&values, SYS_CONTACT) {
            device.capabilities.insert("sys_contact".to_string(), serde_json::json!(contact));
        }
        if let Some(location) = string_value(&values, SYS_LOCATION) {
            device.capabilities.insert("sys_location".to_string(), serde_json::json!(location));
        }

        if self.config.include_interfaces {
            let interfaces = self.walk_interfaces(host).await.unwrap_or_default();
            if let Some(mac) = interfaces.iter().find_map(|i| i.phys_address.clone()) {
                device.mac_address = Some(mac);
            }
            device.capabilities.insert(
                "interfaces".to_string(),
                serde_json::to_value(
                    interfaces
                        .iter()
                        .map(|i| {
                            serde_json::json!({
                                "index": i.index,
                                "descr": i.descr,
                                "type": i.if_type,
                                "mtu": i.mtu,
                                "speed": i.speed,
                                "mac": i.phys_address,
                                "admin_status": i.admin_status,
                                "oper_status": i.oper_status,
                            })
                        })
                        .collect::<Vec<_>>(),
                )
                .unwrap_or(serde_json::Value::Null),
            );
        }

        Ok(Some(device))
    }

    async fn get(&self, host: &str, oids: &[String]) -> anyhow::Result<HashMap<String, BerValue>> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        let addr: SocketAddr = format!("{host}:{SNMP_PORT}").parse()?;
        let request_id = rand_request_id();
        let packet = ber::build_get_request(self.config.version, &self.config.community, request_id, oids);
        socket.send_to(&packet, addr).await?;

        let mut buf = [0u8; 2048];
        let recv = tokio::time::timeout(self.config.timeout, socket.recv_from(&mut buf)).await;
        let (len, _) = match recv {
            Ok(Ok(v)) => v,
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => return Ok(HashMap::new()),
        };
        let response = match ber::parse_get_response(&buf[..len]) {
            Some(r) => r,
            None => return Ok(HashMap::new()),
        };
        Ok(response.varbinds.into_iter().collect())
    }

    async fn walk_interfaces(&self, host: &str) -> anyhow::Result<Vec<InterfaceInfo>> {
        let mut interfaces = HashMap::<i64, InterfaceInfo>::new();
        for column in 1..=8u32 {
            for row in 1..=(MAX_INTERFACE_ROWS as u32) {
                let oid = format!("{IF_TABLE_PREFIX}.{column}.{row}");
                let values = self.get(host, &[oid.clone()]).await?;
                let Some(value) = values.get(&oid) else { continue };
                let entry = interfaces.entry(row as i64).or_insert_with(|| InterfaceInfo {
                    index: row as i64,
                    ..Default::default()
                });
                apply_interface_column(entry, column, value);
            }
        }
        let mut out: Vec<InterfaceInfo> = interfaces.into_values().collect();
        out.sort_by_key(|i| i.index);
        out.truncate(MAX_INTERFACE_ROWS);
        Ok(out)
    }
}

fn apply_interface_column(entry: &mut InterfaceInfo, column: u32, value: &BerValue) {
    match column {
        2 => entry.descr = string_from(value).unwrap_or_default(),
        3 => entry.if_type = int_from(value),
        4 => entry.mtu = int_from(value),
        5 => entry.speed = int_from(value),
        6 => entry.phys_address = mac_from(value),
        7 => entry.admin_status = int_from(value),
        8 => entry.oper_status = int_from(value),
        _ => {}
    }
}

fn int_from(value: &BerValue) -> i64 {
    match value {
        BerValue::Integer(i) => *i,
        _ => 0,
    }
}

fn string_from(value: &BerValue) -> Option<String> {
    match value {
        BerValue::OctetString(bytes) => Some(String::from_utf8_lossy(bytes).to_string()),
        _ => None,
    }
}

fn mac_from(value: &BerValue) -> Option<String> {
    match value {
        BerValue::OctetString(bytes) if bytes.len() == 6 => Some(
            bytes
                .iter()
                .map(|b| format!("{b:02x}"))
                .collect::<Vec<_>>()
                .join(":"),
        ),
        _ => None,
    }
}

fn string_value(values: &HashMap<String, BerValue>, oid: &str) -> Option<String> {
    values.get(oid).and_then(string_from)
}

fn oid_value(values: &HashMap<String, BerValue>, oid: &str) -> Option<String> {
    match values.get(oid) {
        Some(BerValue::ObjectId(s)) => Some(s.clone()),
        _ => None,
    }
}

fn rand_request_id() -> i64 {
    rand::random::<u16>() as i64
}

fn parse_vendor_model(descr: &str) -> (Option<String>, Option<String>) {
    let lower = descr.to_lowercase();
    for token in VENDOR_TOKENS {
        if let Some(pos) = lower.find(token) {
            let manufacturer = token.to_string();
            let after = &descr[pos + token.len()..];
            let model = after
                .split_whitespace()
                .find(|w| !w.chars().all(|c| c.is_ascii_digit()))
                .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_uppercase())
                .filter(|w| !w.is_empty());
            return (Some(manufacturer), model);
        }
    }
    (None, None)
}

fn classify_by_object_id(object_id: &str) -> DeviceType {
    let prefixes: &[(&str, DeviceType)] = &[
        (".1.3.6.1.4.1.9.", DeviceType::Router),
        (".1.3.6.1.4.1.11.", DeviceType::Switch),
        (".1.3.6.1.4.1.43.", DeviceType::Switch),
        (".1.3.6.1.4.1.2636.", DeviceType::Router),
        (".1.3.6.1.4.1.1991.", DeviceType::Switch),
        (".1.3.6.1.4.1.14179.", DeviceType::AccessPoint),
    ];
    let dotted = format!(".{object_id}");
    for (prefix, kind) in prefixes {
        if dotted.starts_with(prefix) {
            return *kind;
        }
    }
    DeviceType::Unknown
}

#[async_trait]
impl DiscoveryHandler for SnmpHandler {
    async fn discover(&self, _params: &HashMap<String, serde_json::Value>) -> DiscoveryResult {
        let start = Instant::now();
        if self.config.hosts.is_empty() {
            return DiscoveryResult::failed(
                "snmp",
                start.elapsed().as_secs_f64(),
                "No valid IP addresses to scan",
            );
        }
        if self.config.version == 3 {
            return DiscoveryResult::failed(
                "snmp",
                start.elapsed().as_secs_f64(),
                "SNMPv3 is not implemented: only v1/v2c community-string GET is supported",
            );
        }
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent.max(1)));
        let mut tasks = Vec::new();
        for host in &self.config.hosts {
            let host = host.clone();
            let semaphore = semaphore.clone();
            tasks.push(async move {
                let _permit = semaphore.acquire_owned().await.ok()?;
                self.query_host(&host).await.unwrap_or_else(|e| {
                    log::debug!("snmp query to {host} failed: {e}");
                    None
                })
            });
        }
        let results = futures::future::join_all(tasks).await;
        let devices: Vec<Device> = results.into_iter().flatten().collect();
        DiscoveryResult::ok("snmp", devices, start.elapsed().as_secs_f64())
    }

    async fn available(&self) -> bool {
        UdpSocket::bind("0.0.0.0:0").await.is_ok()
    }

    fn name(&self) -> &str {
        "snmp"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_by_object_id_cisco_prefix() {
        assert_eq!(classify_by_object_id("1.3.6.1.4.1.9.1.1"), DeviceType::Router);
        assert_eq!(classify_by_object_id("1.3.6.1.4.1.14179.1"), DeviceType::AccessPoint);
        assert_eq!(classify_by_object_id("1.2.3"), DeviceType::Unknown);
    }

    #[test]
    fn parse_vendor_model_extracts_token_and_following_word() {
        let (vendor, model) = parse_vendor_model("Cisco IOS Software, C2960 Software");
        assert_eq!(vendor.as_deref(), Some("cisco"));
        assert_eq!(model.as_deref(), Some("IOS"));
    }

    #[test]
    fn mac_from_formats_colon_separated_lowercase_hex() {
        let value = BerValue::OctetString(vec![0xAA, 0xBB, 0x0C, 0xDD, 0xEE, 0xFF]);
        assert_eq!(mac_from(&value).as_deref(), Some("aa:bb:0c:dd:ee:ff"));
    }

    #[tokio::test]
    async fn empty_host_list_fails_without_scanning() {
        let handler = SnmpHandler::new(SnmpConfig { hosts: vec![], ..SnmpConfig::default() });
        let result = handler.discover(&HashMap::new()).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("No valid IP addresses to scan"));
    }

    #[tokio::test]
    async fn version_3_fails_instead_of_sending_a_malformed_v1_packet() {
        let handler = SnmpHandler::new(SnmpConfig {
            hosts: vec!["127.0.0.1".to_string()],
            version: 3,
            v3_credentials: Some(SnmpV3Credentials {
                user: "admin".to_string(),
                ..SnmpV3Credentials::default()
            }),
            ..SnmpConfig::default()
        });
        let result = handler.discover(&HashMap::new()).await;
        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("SNMPv3"));
    }
}
