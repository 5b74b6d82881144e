//! C2 — TTL key/value cache fronting the Registry, with an in-process
//! backend and an external-KV backend trait.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use discovery_core::{Device, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;

/// Pluggable storage the cache delegates actual key/value work to.
/// An in-process map and an external KV client both implement this the
/// same way, so the cache itself never special-cases the backend.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Option<String>;
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>);
    async fn delete(&self, key: &str) -> bool;
    async fn exists(&self, key: &str) -> bool;
    async fn clear(&self);
    /// `*` matches any, `prefix*` matches a prefix, anything else is exact.
    async fn keys(&self, pattern: &str) -> Vec<String>;
}

struct Entry {
    payload: String,
    expires_at: Option<Instant>,
}

#[derive(Default)]
pub struct InProcessBackend {
    store: Mutex<HashMap<String, Entry>>,
}

impl InProcessBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

fn matches(pattern: &str, key: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix('*') {
        return key.starts_with(prefix);
    }
    pattern == key
}

#[async_trait]
impl CacheBackend for InProcessBackend {
    async fn get(&self, key: &str) -> Option<String> {
        let mut store = self.store.lock().await;
        match store.get(key) {
            Some(entry) => {
                if entry.expires_at.map(|e| Instant::now() >= e).unwrap_or(false) {
                    store.remove(key);
                    None
                } else {
                    Some(entry.payload.clone())
                }
            }
            None => None,
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) {
        let mut store = self.store.lock().await;
        store.insert(
            key.to_string(),
            Entry {
                payload: value,
                expires_at: ttl.map(|d| Instant::now() + d),
            },
        );
    }

    async fn delete(&self, key: &str) -> bool {
        self.store.lock().await.remove(key).is_some()
    }

    async fn exists(&self, key: &str) -> bool {
        self.get(key).await.is_some()
    }

    async fn clear(&self) {
        self.store.lock().await.clear();
    }

    async fn keys(&self, pattern: &str) -> Vec<String> {
        let now = Instant::now();
        let store = self.store.lock().await;
        store
            .iter()
            .filter(|(_, e)| !e.expires_at.map(|x| now >= x).unwrap_or(false))
            .map(|(k, _)| k.clone())
            .filter(|k| matches(pattern, k))
            .collect()
    }
}

/// Handle to an external KV service (Redis, etcd, …). Concrete
/// implementations live outside this crate; anything satisfying
/// [`CacheBackend`] with TTL-set and glob-`keys` semantics fits here.
pub type ExternalBackend = Box<dyn CacheBackend>;

pub struct DiscoveryCache {
    backend: Box<dyn CacheBackend>,
    default_ttl: Duration,
}

impl DiscoveryCache {
    pub fn in_process(default_ttl: Duration) -> Self {
        DiscoveryCache {
            backend: Box::new(InProcessBackend::new()),
            default_ttl,
        }
    }

    /// Attempt to use `external` as the backend; on any probe failure
    /// (signalled by the caller passing `None`), fall back to in-process
    /// with a logged warning.
    pub fn with_external(external: Option<ExternalBackend>, default_ttl: Duration) -> Self {
        match external {
            Some(backend) => DiscoveryCache { backend, default_ttl },
            None => {
                log::warn!("external cache backend unavailable, falling back to in-process");
                DiscoveryCache::in_process(default_ttl)
            }
        }
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.backend.get(key).await?;
        match serde_json::from_str(&normalize_timestamps(&raw)) {
            Ok(v) => Some(v),
            Err(e) => {
                log::warn!("cache entry for {key} failed to deserialize: {e}");
                None
            }
        }
    }

    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Option<Duration>) -> Result<()> {
        let payload = serde_json::to_string(value)
            .map_err(|e| discovery_core::DiscoveryError::Cache(e.to_string()))?;
        self.backend.set(key, payload, ttl.or(Some(self.default_ttl))).await;
        Ok(())
    }

    pub async fn delete(&self, key: &str) -> bool {
        self.backend.delete(key).await
    }

    pub async fn exists(&self, key: &str) -> bool {
        self.backend.exists(key).await
    }

    pub async fn clear(&self) {
        self.backend.clear().await
    }

    pub async fn keys(&self, pattern: &str) -> Vec<String> {
        self.backend.keys(pattern).await
    }

    /// Writes both `device:{id}` and `ip:{ip}` entries. Best-effort: both
    /// writes are attempted regardless of the other's outcome, and the
    /// combined result is their logical AND.
    pub async fn cache_device(&self, device: &Device) -> Result<()> {
        let device_key = format!("device:{}", device.device_id);
        let ip_key = format!("ip:{}", device.ip_address);
        let by_device = self.set(&device_key, device, None).await;
        let by_ip = self.set(&ip_key, device, None).await;
        by_device.and(by_ip)
    }

    /// Scans `device:*`, deserializing each entry. Per-key failures are
    /// logged and skipped rather than aborting the scan.
    pub async fn cached_devices(&self) -> Vec<Device> {
        let mut out = Vec::new();
        for key in self.keys("device:*").await {
            if let Some(device) = self.get::<Device>(&key).await {
                out.push(device);
            }
        }
        out
    }
}

/// ISO-8601 timestamps with a bare `Z` suffix parse fine under chrono's
/// serde support already, but external backends sourced from other
/// ecosystems sometimes hand back `Z` where a `+00:00` is expected; this
/// keeps decoding lenient at the cache boundary.
fn normalize_timestamps(raw: &str) -> String {
    raw.replace("Z\"", "+00:00\"")
}

#[cfg(test)]
mod tests {
    use super::*;
    use discovery_core::DeviceType;

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let cache = DiscoveryCache::in_process(Duration::from_secs(60));
        cache.set("k", &"v".to_string(), None).await.unwrap();
        let got: Option<String> = cache.get("k").await;
        assert_eq!(got, Some("v".to_string()));
    }

    #[tokio::test]
    async fn expired_entries_are_lazily_evicted() {
        let cache = DiscoveryCache::in_process(Duration::from_millis(1));
        cache.set("k", &"v".to_string(), Some(Duration::from_millis(1))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let got: Option<String> = cache.get("k").await;
        assert_eq!(got, None);
    }

    #[tokio::test]
    async fn keys_supports_exact_and_prefix_wildcard() {
        let cache = DiscoveryCache::in_process(Duration::from_secs(60));
        cache.set("device:1", &"a".to_string(), None).await.unwrap();
        cache.set("device:2", &"b".to_string(), None).await.unwrap();
        cache.set("ip:1.2.3.4", &"c".to_string(), None).await.unwrap();

        let mut device_keys = cache.keys("device:*").await;
        device_keys.sort();
        assert_eq!(device_keys, vec!["device:1", "device:2"]);

        assert_eq!(cache.keys("ip:1.2.3.4").await, vec!["ip:1.2.3.4"]);
        assert_eq!(cache.keys("nope").await.len(), 0);
    }

    #[tokio::test]
    async fn cache_device_writes_both_keys() {
        let cache = DiscoveryCache::in_process(Duration::from_secs(60));
        let mut device = Device::new("dev-1", "10.0.0.5", "mdns");
        device.device_type = DeviceType::IotSensor;
        cache.cache_device(&device).await.unwrap();

        assert!(cache.exists(&format!("device:{}", device.device_id)).await);
        assert!(cache.exists("ip:10.0.0.5").await);

        let devices = cache.cached_devices().await;
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].ip_address, "10.0.0.5");
    }
}
