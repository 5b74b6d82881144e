//! C4 — the authoritative in-memory device table.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{Duration as ChronoDuration, Utc};
use discovery_core::Device;

#[derive(Default)]
struct Inner {
    by_id: HashMap<String, Device>,
    id_by_ip: HashMap<String, String>,
}

/// Owns `device_id -> Device` plus the `ip -> device_id` secondary index
/// behind a single lock.
pub struct DeviceRegistry {
    inner: RwLock<Inner>,
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceRegistry {
    pub fn new() -> Self {
        DeviceRegistry {
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Insert `device`, or merge it into the existing record for its IP
    /// (I1, I3). Returns `true` if a new record was created, `false` if an
    /// existing one was merged into.
    pub fn add_or_merge(&self, device: Device) -> bool {
        let mut inner = self.inner.write().unwrap();
        if let Some(existing_id) = inner.id_by_ip.get(&device.ip_address).cloned() {
            let existing = inner
                .by_id
                .get_mut(&existing_id)
                .expect("id_by_ip and by_id must stay in sync");
            existing.merge_from(device);
            false
        } else {
            inner.id_by_ip.insert(device.ip_address.clone(), device.device_id.clone());
            inner.by_id.insert(device.device_id.clone(), device);
            true
        }
    }

    pub fn get(&self, device_id: &str) -> Option<Device> {
        self.inner.read().unwrap().by_id.get(device_id).cloned()
    }

    pub fn get_by_ip(&self, ip: &str) -> Option<Device> {
        let inner = self.inner.read().unwrap();
        let id = inner.id_by_ip.get(ip)?;
        inner.by_id.get(id).cloned()
    }

    pub fn all(&self) -> Vec<Device> {
        self.inner.read().unwrap().by_id.values().cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.inner.read().unwrap().by_id.len()
    }

    /// Removes a device by id. Returns the removed record, if present.
    pub fn remove(&self, device_id: &str) -> Option<Device> {
        let mut inner = self.inner.write().unwrap();
        let device = inner.by_id.remove(device_id)?;
        inner.id_by_ip.remove(&device.ip_address);
        Some(device)
    }

    /// Evicts every device with `now - last_seen > stale_ttl` (I4).
    /// Returns the number of records removed.
    pub fn evict_stale(&self, stale_ttl: ChronoDuration) -> usize {
        let now = Utc::now();
        let mut inner = self.inner.write().unwrap();
        let stale_ids: Vec<String> = inner
            .by_id
            .values()
            .filter(|d| d.is_stale(now, stale_ttl))
            .map(|d| d.device_id.clone())
            .collect();
        for id in &stale_ids {
            if let Some(device) = inner.by_id.remove(id) {
                inner.id_by_ip.remove(&device.ip_address);
            }
        }
        stale_ids.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_new_device_returns_true() {
        let registry = DeviceRegistry::new();
        let device = Device::new("id-1", "10.0.0.1", "mdns");
        assert!(registry.add_or_merge(device));
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn reinsert_same_ip_merges_not_duplicates() {
        let registry = DeviceRegistry::new();
        let mut a = Device::new("id-1", "10.0.0.1", "mdns");
        a.ports.insert(80);
        assert!(registry.add_or_merge(a));

        let mut b = Device::new("id-2", "10.0.0.1", "ssdp");
        b.ports.insert(443);
        assert!(!registry.add_or_merge(b));

        assert_eq!(registry.count(), 1);
        let merged = registry.get("id-1").unwrap();
        assert_eq!(merged.ports, std::collections::BTreeSet::from([80, 443]));
    }

    #[test]
    fn ip_index_and_id_index_stay_in_sync() {
        let registry = DeviceRegistry::new();
        registry.add_or_merge(Device::new("id-1", "10.0.0.1", "mdns"));
        let by_ip = registry.get_by_ip("10.0.0.1").unwrap();
        assert_eq!(by_ip.device_id, "id-1");

        registry.remove("id-1");
        assert!(registry.get_by_ip("10.0.0.1").is_none());
        assert!(registry.get("id-1").is_none());
    }

    #[test]
    fn evict_stale_removes_only_expired_devices() {
        let registry = DeviceRegistry::new();
        let mut fresh = Device::new("id-1", "10.0.0.1", "mdns");
        fresh.last_seen = Utc::now();
        let mut stale = Device::new("id-2", "10.0.0.2", "mdns");
        stale.last_seen = Utc::now() - ChronoDuration::seconds(3600);

        registry.add_or_merge(fresh);
        registry.add_or_merge(stale);

        let evicted = registry.evict_stale(ChronoDuration::seconds(60));
        assert_eq!(evicted, 1);
        assert_eq!(registry.count(), 1);
        assert!(registry.get("id-1").is_some());
        assert!(registry.get_by_ip("10.0.0.2").is_none());
    }
}
