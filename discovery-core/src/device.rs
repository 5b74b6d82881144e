//! The central data model: [`Device`] and its supporting enums.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Broad classification of a discovered device.
///
/// Unknown values encountered during deserialization fall back to
/// [`DeviceType::Unknown`] rather than failing the parse — discovery sources
/// are allowed to report device kinds this crate hasn't been taught yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    Unknown,
    IotSensor,
    IotGateway,
    Camera,
    Router,
    Switch,
    AccessPoint,
    Printer,
    MediaServer,
    SmartHome,
    Industrial,
}

impl Default for DeviceType {
    fn default() -> Self {
        DeviceType::Unknown
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    Online,
    Offline,
    Unknown,
    Unreachable,
}

impl Default for DeviceStatus {
    fn default() -> Self {
        DeviceStatus::Unknown
    }
}

/// A reachable networked endpoint, normalized across discovery protocols.
///
/// Invariants (enforced by [`Device::new`] and [`Device::merge_from`], not by
/// the field types themselves):
/// - `ip_address` is the merge key; a registry never holds two devices with
///   the same IP.
/// - `last_seen >= discovery_time` always.
/// - collections (`ports`, `services`, `capabilities`, `metadata`) are always
///   present, never represented as "missing" — an unseen attribute is an
///   empty collection, not a null.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub device_id: String,
    pub ip_address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub device_type: DeviceType,
    pub status: DeviceStatus,
    #[serde(default)]
    pub ports: BTreeSet<u16>,
    #[serde(default)]
    pub services: BTreeSet<String>,
    pub discovery_protocol: String,
    pub discovery_time: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firmware_version: Option<String>,
    #[serde(default)]
    pub capabilities: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Device {
    /// Build a freshly-discovered device. `discovery_time` and `last_seen`
    /// start out equal (I2), status starts `online` since a device is only
    /// constructed from a successful discovery hit.
    pub fn new(device_id: impl Into<String>, ip_address: impl Into<String>, protocol: impl Into<String>) -> Self {
        let now = Utc::now();
        Device {
            device_id: device_id.into(),
            ip_address: ip_address.into(),
            mac_address: None,
            hostname: None,
            name: None,
            device_type: DeviceType::Unknown,
            status: DeviceStatus::Online,
            ports: BTreeSet::new(),
            services: BTreeSet::new(),
            discovery_protocol: protocol.into(),
            discovery_time: now,
            last_seen: now,
            manufacturer: None,
            model: None,
            firmware_version: None,
            capabilities: HashMap::new(),
            metadata: HashMap::new(),
        }
    }

    /// Merge `other` (a freshly discovered record for the same IP) into
    /// `self`: fill-if-empty for scalars, set-union for
    /// `ports`/`services`, map-merge (new wins) for `capabilities`/`metadata`,
    /// `last_seen` bumped to the max of the two, `status` forced to `online`.
    ///
    /// `self.device_id` and `self.discovery_protocol` (the first-seen
    /// source) are never overwritten — those identify the record, not its
    /// content.
    pub fn merge_from(&mut self, other: Device) {
        if self.mac_address.is_none() {
            self.mac_address = other.mac_address;
        }
        if self.hostname.is_none() {
            self.hostname = other.hostname;
        }
        if self.name.is_none() {
            self.name = other.name;
        }
        if self.manufacturer.is_none() {
            self.manufacturer = other.manufacturer;
        }
        if self.model.is_none() {
            self.model = other.model;
        }
        if self.firmware_version.is_none() {
            self.firmware_version = other.firmware_version;
        }
        if matches!(self.device_type, DeviceType::Unknown) {
            self.device_type = other.device_type;
        }
        self.ports.extend(other.ports);
        self.services.extend(other.services);
        for (k, v) in other.capabilities {
            self.capabilities.insert(k, v);
        }
        for (k, v) in other.metadata {
            self.metadata.insert(k, v);
        }
        if other.last_seen > self.last_seen {
            self.last_seen = other.last_seen;
        }
        self.status = DeviceStatus::Online;
    }

    pub fn is_stale(&self, now: DateTime<Utc>, stale_ttl: chrono::Duration) -> bool {
        now - self.last_seen > stale_ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_device_satisfies_i2() {
        let d = Device::new("id-1", "192.168.1.10", "mdns");
        assert_eq!(d.discovery_time, d.last_seen);
        assert_eq!(d.status, DeviceStatus::Online);
        assert!(d.ports.is_empty());
        assert!(d.capabilities.is_empty());
    }

    #[test]
    fn merge_unions_ports_and_services_and_fills_scalars() {
        let mut a = Device::new("id-1", "192.168.1.10", "mdns");
        a.name = Some("d1".to_string());
        a.ports.insert(80);

        let mut b = Device::new("id-2", "192.168.1.10", "ssdp");
        b.hostname = Some("h.local".to_string());
        b.ports.insert(22);
        b.last_seen = a.last_seen + chrono::Duration::seconds(5);

        a.merge_from(b);

        assert_eq!(a.name.as_deref(), Some("d1"));
        assert_eq!(a.hostname.as_deref(), Some("h.local"));
        assert_eq!(a.ports, BTreeSet::from([22, 80]));
        assert_eq!(a.status, DeviceStatus::Online);
        // device_id is never overwritten by a merge
        assert_eq!(a.device_id, "id-1");
    }

    #[test]
    fn merge_keeps_max_last_seen() {
        let mut a = Device::new("id-1", "192.168.1.10", "mdns");
        let earlier = a.last_seen - chrono::Duration::seconds(60);
        let mut b = Device::new("id-2", "192.168.1.10", "ssdp");
        b.last_seen = earlier;

        let original_last_seen = a.last_seen;
        a.merge_from(b);
        assert_eq!(a.last_seen, original_last_seen);
    }

    #[test]
    fn metadata_merge_new_wins() {
        let mut a = Device::new("id-1", "192.168.1.10", "mdns");
        a.metadata.insert("k".into(), serde_json::json!("old"));
        let mut b = Device::new("id-2", "192.168.1.10", "ssdp");
        b.metadata.insert("k".into(), serde_json::json!("new"));
        a.merge_from(b);
        assert_eq!(a.metadata.get("k"), Some(&serde_json::json!("new")));
    }

    #[test]
    fn json_round_trip_preserves_fields() {
        let mut d = Device::new("id-1", "10.0.0.5", "snmp");
        d.ports.insert(161);
        d.services.insert("snmp".into());
        d.manufacturer = Some("Cisco".into());
        d.capabilities.insert("ifcount".into(), serde_json::json!(4));

        let encoded = serde_json::to_string(&d).unwrap();
        let decoded: Device = serde_json::from_str(&encoded).unwrap();
        assert_eq!(d, decoded);
    }

    #[test]
    fn stale_eviction_threshold() {
        let mut d = Device::new("id-1", "10.0.0.5", "snmp");
        d.last_seen = Utc::now() - chrono::Duration::seconds(120);
        assert!(d.is_stale(Utc::now(), chrono::Duration::seconds(60)));
        assert!(!d.is_stale(Utc::now(), chrono::Duration::seconds(600)));
    }
}
