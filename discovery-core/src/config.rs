//! Configuration value types. These are pure data — the core
//! never reads a file or an environment variable; an external loader
//! (`discoveryd`'s `env_config` module, or a future file-based one) builds
//! these and calls [`Validate::validate`] before handing them to the
//! runtime.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Implemented by every configuration section. Accumulates every violation
/// rather than failing fast, so a caller can surface all of them at once.
pub trait Validate {
    fn validate(&self) -> Vec<String>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkConfig {
    #[serde(default = "default_ip_ranges")]
    pub ip_ranges: Vec<String>,
    #[serde(default)]
    pub interface: Option<String>,
    #[serde(default)]
    pub connect_timeout_s: f64,
    #[serde(default)]
    pub read_timeout_s: f64,
    #[serde(default = "default_max_concurrent_connections")]
    pub max_concurrent_connections: u32,
    #[serde(default = "default_max_connections_per_host")]
    pub max_connections_per_host: u32,
}

fn default_ip_ranges() -> Vec<String> {
    vec!["192.168.1.0/24".to_string()]
}
fn default_max_concurrent_connections() -> u32 {
    50
}
fn default_max_connections_per_host() -> u32 {
    5
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            ip_ranges: default_ip_ranges(),
            interface: None,
            connect_timeout_s: 5.0,
            read_timeout_s: 10.0,
            max_concurrent_connections: default_max_concurrent_connections(),
            max_connections_per_host: default_max_connections_per_host(),
        }
    }
}

impl Validate for NetworkConfig {
    fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.ip_ranges.is_empty() {
            errors.push("at least one IP range must be specified".to_string());
        }
        if self.connect_timeout_s <= 0.0 {
            errors.push("connect timeout must be positive".to_string());
        }
        if self.read_timeout_s <= 0.0 {
            errors.push("read timeout must be positive".to_string());
        }
        if self.max_concurrent_connections == 0 {
            errors.push("max concurrent connections must be positive".to_string());
        }
        errors
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimingConfig {
    #[serde(default = "default_discovery_interval")]
    pub discovery_interval_s: u64,
    #[serde(default = "default_protocol_timeout")]
    pub protocol_timeout_s: f64,
    #[serde(default = "default_total_timeout")]
    pub total_timeout_s: f64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_s: f64,
    #[serde(default = "default_backoff_factor")]
    pub retry_backoff_factor: f64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_s: f64,
    #[serde(default)]
    pub adaptive_timing_enabled: bool,
    #[serde(default = "default_min_interval")]
    pub min_interval_s: u64,
    #[serde(default = "default_max_interval")]
    pub max_interval_s: u64,
    #[serde(default)]
    pub jitter_enabled: bool,
    #[serde(default = "default_jitter_max_percent")]
    pub jitter_max_percent: f64,
}

fn default_discovery_interval() -> u64 {
    300
}
fn default_protocol_timeout() -> f64 {
    30.0
}
fn default_total_timeout() -> f64 {
    300.0
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_delay() -> f64 {
    1.0
}
fn default_backoff_factor() -> f64 {
    2.0
}
fn default_max_backoff() -> f64 {
    60.0
}
fn default_min_interval() -> u64 {
    30
}
fn default_max_interval() -> u64 {
    7200
}
fn default_jitter_max_percent() -> f64 {
    10.0
}

impl Default for TimingConfig {
    fn default() -> Self {
        TimingConfig {
            discovery_interval_s: default_discovery_interval(),
            protocol_timeout_s: default_protocol_timeout(),
            total_timeout_s: default_total_timeout(),
            max_retries: default_max_retries(),
            retry_delay_s: default_retry_delay(),
            retry_backoff_factor: default_backoff_factor(),
            max_backoff_s: default_max_backoff(),
            adaptive_timing_enabled: true,
            min_interval_s: default_min_interval(),
            max_interval_s: default_max_interval(),
            jitter_enabled: true,
            jitter_max_percent: default_jitter_max_percent(),
        }
    }
}

impl Validate for TimingConfig {
    fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.discovery_interval_s == 0 {
            errors.push("discovery interval must be positive".to_string());
        }
        if self.protocol_timeout_s <= 0.0 {
            errors.push("protocol timeout must be positive".to_string());
        }
        if self.total_timeout_s <= 0.0 {
            errors.push("total timeout must be positive".to_string());
        }
        if self.adaptive_timing_enabled {
            if self.min_interval_s == 0 {
                errors.push("min interval must be positive".to_string());
            }
            if self.max_interval_s <= self.min_interval_s {
                errors.push("max interval must be greater than min interval".to_string());
            }
        }
        errors
    }
}

/// Settings for one discovery protocol (`mdns`, `ssdp`, `snmp`,
/// `network_scan`). `settings` is an open schema — each protocol handler
/// interprets its own keys via [`ProtocolConfig::get_setting`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_priority")]
    pub priority: u32,
    #[serde(default = "default_protocol_timeout")]
    pub timeout_s: f64,
    #[serde(default)]
    pub settings: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub credentials: HashMap<String, String>,
    #[serde(default = "default_max_concurrent_protocol")]
    pub max_concurrent: u32,
    #[serde(default = "default_max_retries")]
    pub retry_count: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_s: f64,
}

fn default_true() -> bool {
    true
}
fn default_priority() -> u32 {
    100
}
fn default_max_concurrent_protocol() -> u32 {
    10
}

impl ProtocolConfig {
    pub fn get_setting(&self, key: &str) -> Option<&serde_json::Value> {
        self.settings.get(key)
    }

    pub fn get_credential(&self, key: &str) -> Option<&str> {
        self.credentials.get(key).map(String::as_str)
    }
}

impl Validate for ProtocolConfig {
    fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.timeout_s <= 0.0 {
            errors.push("timeout must be positive".to_string());
        }
        if self.max_concurrent == 0 {
            errors.push("max concurrent must be positive".to_string());
        }
        errors
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginConfig {
    #[serde(default = "default_plugin_dirs")]
    pub plugin_directories: Vec<String>,
    #[serde(default = "default_true")]
    pub hot_reload_enabled: bool,
    #[serde(default = "default_reload_interval")]
    pub reload_check_interval_s: f64,
    #[serde(default = "default_true")]
    pub auto_load_plugins: bool,
    #[serde(default = "default_plugin_load_timeout")]
    pub plugin_load_timeout_s: f64,
    #[serde(default)]
    pub allow_external_plugins: bool,
}

fn default_plugin_dirs() -> Vec<String> {
    vec!["plugins".to_string()]
}
fn default_reload_interval() -> f64 {
    5.0
}
fn default_plugin_load_timeout() -> f64 {
    30.0
}

impl Default for PluginConfig {
    fn default() -> Self {
        PluginConfig {
            plugin_directories: default_plugin_dirs(),
            hot_reload_enabled: true,
            reload_check_interval_s: default_reload_interval(),
            auto_load_plugins: true,
            plugin_load_timeout_s: default_plugin_load_timeout(),
            allow_external_plugins: false,
        }
    }
}

impl Validate for PluginConfig {
    fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.plugin_directories.is_empty() {
            errors.push("at least one plugin directory must be specified".to_string());
        }
        if self.reload_check_interval_s <= 0.0 {
            errors.push("reload check interval must be positive".to_string());
        }
        if self.plugin_load_timeout_s <= 0.0 {
            errors.push("plugin load timeout must be positive".to_string());
        }
        errors
    }
}

/// Credential storage mode. Only [`CredentialStore::Memory`] is implemented
/// by this crate — `File`/`Keyring` are accepted shapes handed to an
/// external collaborator; see `DESIGN.md`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialStore {
    Memory,
    File,
    Keyring,
}

impl Default for CredentialStore {
    fn default() -> Self {
        CredentialStore::Memory
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityConfig {
    #[serde(default)]
    pub allowed_networks: Vec<String>,
    #[serde(default)]
    pub blocked_networks: Vec<String>,
    #[serde(default = "default_true")]
    pub rate_limit_enabled: bool,
    #[serde(default = "default_requests_per_second")]
    pub max_requests_per_second: f64,
    #[serde(default = "default_requests_per_minute")]
    pub max_requests_per_minute: f64,
    #[serde(default)]
    pub credential_store: CredentialStore,
}

fn default_requests_per_second() -> f64 {
    10.0
}
fn default_requests_per_minute() -> f64 {
    100.0
}

impl Default for SecurityConfig {
    fn default() -> Self {
        SecurityConfig {
            allowed_networks: Vec::new(),
            blocked_networks: Vec::new(),
            rate_limit_enabled: true,
            max_requests_per_second: default_requests_per_second(),
            max_requests_per_minute: default_requests_per_minute(),
            credential_store: CredentialStore::Memory,
        }
    }
}

impl Validate for SecurityConfig {
    fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.rate_limit_enabled {
            if self.max_requests_per_second <= 0.0 {
                errors.push("max requests per second must be positive".to_string());
            }
            if self.max_requests_per_minute <= 0.0 {
                errors.push("max requests per minute must be positive".to_string());
            }
        }
        errors
    }
}

/// The root configuration. An external loader populates this
/// (environment variables per §6, or any other source) and calls
/// `validate()` before handing it to the runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub plugins: PluginConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default = "default_protocols")]
    pub protocols: HashMap<String, ProtocolConfig>,
    #[serde(default = "default_true")]
    pub event_bus_enabled: bool,
    #[serde(default = "default_history_size")]
    pub event_history_size: usize,
    #[serde(default = "default_true")]
    pub scheduler_enabled: bool,
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
    #[serde(default = "default_true")]
    pub repository_integration: bool,
    #[serde(default = "default_true")]
    pub auto_register_devices: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_history_size() -> usize {
    1000
}
fn default_max_concurrent_jobs() -> usize {
    5
}

fn default_protocols() -> HashMap<String, ProtocolConfig> {
    let mut protocols = HashMap::new();
    protocols.insert(
        "mdns".to_string(),
        ProtocolConfig {
            enabled: true,
            priority: 90,
            timeout_s: 10.0,
            settings: HashMap::new(),
            credentials: HashMap::new(),
            max_concurrent: default_max_concurrent_protocol(),
            retry_count: default_max_retries(),
            retry_delay_s: default_retry_delay(),
        },
    );
    protocols.insert(
        "ssdp".to_string(),
        ProtocolConfig {
            enabled: true,
            priority: 80,
            timeout_s: 15.0,
            settings: HashMap::new(),
            credentials: HashMap::new(),
            max_concurrent: default_max_concurrent_protocol(),
            retry_count: default_max_retries(),
            retry_delay_s: default_retry_delay(),
        },
    );
    protocols.insert(
        "snmp".to_string(),
        ProtocolConfig {
            // Disabled by default: SNMP community strings are a soft credential.
            enabled: false,
            priority: 70,
            timeout_s: 10.0,
            settings: HashMap::new(),
            credentials: HashMap::new(),
            max_concurrent: 50,
            retry_count: default_max_retries(),
            retry_delay_s: default_retry_delay(),
        },
    );
    protocols.insert(
        "network_scan".to_string(),
        ProtocolConfig {
            enabled: true,
            priority: 60,
            timeout_s: 30.0,
            settings: HashMap::new(),
            credentials: HashMap::new(),
            max_concurrent: default_max_concurrent_protocol(),
            retry_count: default_max_retries(),
            retry_delay_s: default_retry_delay(),
        },
    );
    protocols
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        DiscoveryConfig {
            enabled: true,
            log_level: default_log_level(),
            network: NetworkConfig::default(),
            timing: TimingConfig::default(),
            plugins: PluginConfig::default(),
            security: SecurityConfig::default(),
            protocols: default_protocols(),
            event_bus_enabled: true,
            event_history_size: default_history_size(),
            scheduler_enabled: true,
            max_concurrent_jobs: default_max_concurrent_jobs(),
            repository_integration: true,
            auto_register_devices: true,
        }
    }
}

impl DiscoveryConfig {
    pub fn is_protocol_enabled(&self, name: &str) -> bool {
        self.protocols.get(name).map(|p| p.enabled).unwrap_or(false)
    }

    pub fn enabled_protocols(&self) -> Vec<String> {
        self.protocols
            .iter()
            .filter(|(_, cfg)| cfg.enabled)
            .map(|(name, _)| name.clone())
            .collect()
    }
}

impl Validate for DiscoveryConfig {
    fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.network.validate());
        errors.extend(self.timing.validate());
        errors.extend(self.plugins.validate());
        errors.extend(self.security.validate());
        for (name, cfg) in &self.protocols {
            for e in cfg.validate() {
                errors.push(format!("protocol '{}': {}", name, e));
            }
        }
        if self.scheduler_enabled && self.max_concurrent_jobs == 0 {
            errors.push("max concurrent jobs must be positive when scheduler is enabled".to_string());
        }
        if self.event_bus_enabled && self.event_history_size == 0 {
            errors.push("event history size must be positive when event bus is enabled".to_string());
        }
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let cfg = DiscoveryConfig::default();
        assert!(cfg.validate().is_empty());
        assert!(cfg.is_protocol_enabled("mdns"));
        assert!(!cfg.is_protocol_enabled("snmp"));
    }

    #[test]
    fn invalid_timing_accumulates_all_errors() {
        let mut cfg = DiscoveryConfig::default();
        cfg.timing.protocol_timeout_s = -1.0;
        cfg.timing.total_timeout_s = 0.0;
        cfg.max_concurrent_jobs = 0;
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.contains("protocol timeout")));
        assert!(errors.iter().any(|e| e.contains("total timeout")));
        assert!(errors.iter().any(|e| e.contains("max concurrent jobs")));
    }

    #[test]
    fn yaml_round_trip() {
        let cfg = DiscoveryConfig::default();
        let yaml = serde_yaml::to_string(&cfg).unwrap();
        let decoded: DiscoveryConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(decoded.protocols.len(), cfg.protocols.len());
    }
}
