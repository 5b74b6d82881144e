//! C5 — fans registered handlers out concurrently and upserts their
//! results into the Registry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use discovery_core::{AggregatedResult, DiscoveryHandler, DiscoveryResult};

use crate::cache::DiscoveryCache;
use crate::registry::DeviceRegistry;

/// Exclusively owns the [`DeviceRegistry`]: every
/// other component only reads it.
pub struct DiscoveryEngine {
    handlers: std::sync::RwLock<HashMap<String, Arc<dyn DiscoveryHandler>>>,
    registry: Arc<DeviceRegistry>,
    cache: Option<Arc<DiscoveryCache>>,
}

impl DiscoveryEngine {
    pub fn new(registry: Arc<DeviceRegistry>) -> Self {
        DiscoveryEngine {
            handlers: std::sync::RwLock::new(HashMap::new()),
            registry,
            cache: None,
        }
    }

    /// Attaches a cache that every successfully upserted device is also
    /// written through to (§2: "Engine upserts into Registry (C4) and
    /// Cache (C2)"). Cache failures are logged, never fatal (§7
    /// `CacheError` propagation policy).
    pub fn with_cache(mut self, cache: Arc<DiscoveryCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn register_handler(&self, handler: Arc<dyn DiscoveryHandler>) {
        self.handlers
            .write()
            .unwrap()
            .insert(handler.name().to_string(), handler);
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    pub fn registered_protocols(&self) -> Vec<String> {
        self.handlers.read().unwrap().keys().cloned().collect()
    }

    /// Runs the handlers named in `protocols` (or every registered handler
    /// if `None`) concurrently, each in its own logical task. A handler
    /// failure is isolated: it contributes zero devices and is logged, it
    /// never aborts the other handlers or the call as a whole.
    pub async fn discover_all(
        &self,
        protocols: Option<&[String]>,
        params: &HashMap<String, serde_json::Value>,
    ) -> AggregatedResult {
        let start = Instant::now();
        let selected: Vec<Arc<dyn DiscoveryHandler>> = {
            let handlers = self.handlers.read().unwrap();
            match protocols {
                Some(names) => names
                    .iter()
                    .filter_map(|n| handlers.get(n).cloned())
                    .collect(),
                None => handlers.values().cloned().collect(),
            }
        };

        let params = params.clone();
        let tasks = selected.into_iter().map(|handler| {
            let params = params.clone();
            async move { handler.discover(&params).await }
        });
        let per_protocol: Vec<DiscoveryResult> = futures::future::join_all(tasks).await;

        let mut devices = Vec::new();
        let mut protocols_succeeded = 0;
        for result in &per_protocol {
            if !result.success {
                log::warn!(
                    "handler {} failed: {}",
                    result.protocol,
                    result.error.as_deref().unwrap_or("unknown error")
                );
                continue;
            }
            protocols_succeeded += 1;
            for device in result.devices.clone() {
                self.registry.add_or_merge(device);
                if let Some(cache) = &self.cache {
                    if let Some(merged) = self.registry.get_by_ip(&device.ip_address) {
                        if let Err(e) = cache.cache_device(&merged).await {
                            log::warn!("failed to cache device {}: {e}", merged.device_id);
                        }
                    }
                }
            }
            devices.extend(result.devices.clone());
        }

        AggregatedResult {
            devices,
            duration_s: start.elapsed().as_secs_f64(),
            protocols_succeeded,
            protocols_total: per_protocol.len(),
            per_protocol,
        }
    }
}
