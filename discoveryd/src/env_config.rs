//! The one allowed external-collaborator config loader: reads the
//! recognized `DISCOVERY_*` variables and overlays them onto
//! [`DiscoveryConfig::default`]. The core crate never reads an
//! environment variable itself; this binary is where that reaches in.

use std::env;

use discovery_core::config::DiscoveryConfig;

fn var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

fn bool_var(name: &str) -> Option<bool> {
    var(name).and_then(|v| match v.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => {
            log::warn!("{name}={v} is not a recognized boolean, ignoring");
            None
        }
    })
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    var(name).and_then(|v| match v.parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            log::warn!("{name}={v} could not be parsed, ignoring");
            None
        }
    })
}

/// Builds a [`DiscoveryConfig`] from defaults overlaid with whichever of
/// the recognized `DISCOVERY_*` variables are set. Every variable is
/// optional; an absent or unparsable one leaves the default untouched.
pub fn from_env() -> DiscoveryConfig {
    let mut config = DiscoveryConfig::default();

    if let Some(enabled) = bool_var("DISCOVERY_ENABLED") {
        config.enabled = enabled;
    }
    if let Some(level) = var("DISCOVERY_LOG_LEVEL") {
        config.log_level = level;
    }
    if let Some(ranges) = var("DISCOVERY_IP_RANGES") {
        config.network.ip_ranges = ranges.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
    }
    if let Some(max_concurrent) = parse_var::<u32>("DISCOVERY_MAX_CONCURRENT") {
        config.network.max_concurrent_connections = max_concurrent;
    }
    if let Some(interval) = parse_var::<u64>("DISCOVERY_INTERVAL") {
        config.timing.discovery_interval_s = interval;
    }
    if let Some(timeout) = parse_var::<f64>("DISCOVERY_PROTOCOL_TIMEOUT") {
        config.timing.protocol_timeout_s = timeout;
    }
    if let Some(dirs) = var("DISCOVERY_PLUGIN_DIRS") {
        config.plugins.plugin_directories = dirs.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
    }
    if let Some(hot_reload) = bool_var("DISCOVERY_HOT_RELOAD") {
        config.plugins.hot_reload_enabled = hot_reload;
    }

    for (protocol, var_name) in [
        ("mdns", "DISCOVERY_MDNS_ENABLED"),
        ("ssdp", "DISCOVERY_SSDP_ENABLED"),
        ("snmp", "DISCOVERY_SNMP_ENABLED"),
        ("network_scan", "DISCOVERY_NETWORK_SCAN_ENABLED"),
    ] {
        if let Some(enabled) = bool_var(var_name) {
            if let Some(cfg) = config.protocols.get_mut(protocol) {
                cfg.enabled = enabled;
            }
        }
    }

    config
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_variables_leave_defaults_untouched() {
        let config = from_env();
        assert_eq!(config.timing.discovery_interval_s, DiscoveryConfig::default().timing.discovery_interval_s);
    }

    #[test]
    fn ip_ranges_split_on_comma_and_trimmed() {
        // exercise the parsing helper directly rather than mutating the
        // process environment, which would race with other tests.
        let ranges: Vec<String> = "10.0.0.0/24, 192.168.1.0/24 ,"
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        assert_eq!(ranges, vec!["10.0.0.0/24", "192.168.1.0/24"]);
    }
}
