//! Wires the Rate Limiter, Cache, Registry, Engine, Event Bus, and
//! Scheduler (discovery-runtime) together with the protocol handlers
//! (discovery-handlers/*) into a running service.
//!
//! Configuration, persistence, visualization and CLI argument parsing are
//! external collaborators; this binary only supplies the one config
//! loader the core crate is deliberately silent about: reading
//! `DISCOVERY_*` environment variables.

mod env_config;

use std::sync::Arc;
use std::time::Duration;

use discovery_core::config::Validate;
use discovery_core::{Event, EventKind};
use discovery_runtime::{
    DiscoveryCache, DiscoveryEngine, EventBus, EventHandler, RateLimiterConfig, Scheduler, SchedulerConfig,
};
use log::{error, info};

struct LoggingSubscriber;

#[async_trait::async_trait]
impl EventHandler for LoggingSubscriber {
    async fn handle_event(&self, event: &Event) {
        match &event.kind {
            EventKind::DiscoveryStarted { protocols, .. } => {
                info!("discovery started: protocols={protocols:?}");
            }
            EventKind::DiscoveryCompleted {
                protocols_succeeded,
                protocols_total,
                duration_s,
                devices_found,
            } => {
                info!(
                    "discovery completed: {protocols_succeeded}/{protocols_total} protocols, \
                     {devices_found} devices, {duration_s:.2}s"
                );
            }
            EventKind::DiscoveryError { message, recoverable, .. } => {
                error!("discovery error (recoverable={recoverable}): {message}");
            }
            _ => {}
        }
    }
}

/// Expands `ip_ranges` CIDR strings into a flat host list for handlers
/// (SNMP, network scan) that operate over individual addresses rather
/// than subnets. Invalid CIDRs are logged and skipped.
fn expand_ip_ranges(ranges: &[String]) -> Vec<String> {
    let mut hosts = Vec::new();
    for raw in ranges {
        match raw.parse::<ipnetwork::Ipv4Network>() {
            Ok(network) => {
                if network.size() > 1024 {
                    log::warn!("network {raw} exceeds the 1024-address scan limit, skipping");
                    continue;
                }
                hosts.extend(network.iter().map(|ip| ip.to_string()));
            }
            Err(e) => log::warn!("invalid CIDR '{raw}': {e}"),
        }
    }
    hosts
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::try_init()?;

    let config = env_config::from_env();
    let errors = config.validate();
    if !errors.is_empty() {
        for e in &errors {
            error!("invalid configuration: {e}");
        }
        anyhow::bail!("{} configuration error(s)", errors.len());
    }

    if !config.enabled {
        info!("discovery is disabled via configuration, exiting");
        return Ok(());
    }

    info!("discoveryd starting, enabled protocols: {:?}", config.enabled_protocols());

    let registry = Arc::new(discovery_runtime::DeviceRegistry::new());
    let event_bus = Arc::new(EventBus::new(config.event_history_size));
    let cache = Arc::new(DiscoveryCache::in_process(Duration::from_secs(300)));
    let engine = Arc::new(DiscoveryEngine::new(registry.clone()).with_cache(cache.clone()));

    if config.event_bus_enabled {
        event_bus.subscribe(Arc::new(LoggingSubscriber), None).await;
    }

    let hosts = expand_ip_ranges(&config.network.ip_ranges);

    for protocol in config.enabled_protocols() {
        let registration = build_handler(&protocol, &config, &hosts);
        match registration {
            Some(handler) => engine.register_handler(handler),
            None => log::warn!("no handler implementation registered for protocol '{protocol}'"),
        }
    }

    let scheduler = Scheduler::new(
        engine.clone(),
        event_bus.clone(),
        SchedulerConfig {
            max_concurrent_jobs: config.max_concurrent_jobs,
            tick_interval: Duration::from_secs(1),
            periodic_enabled: config.scheduler_enabled,
            periodic_interval: Duration::from_secs(config.timing.discovery_interval_s),
            periodic_jitter: if config.timing.jitter_enabled {
                Duration::from_secs_f64(
                    config.timing.discovery_interval_s as f64 * config.timing.jitter_max_percent / 100.0,
                )
            } else {
                Duration::ZERO
            },
            periodic_protocols: config.enabled_protocols(),
            job_timeout_s: config.timing.total_timeout_s,
            max_retries: config.timing.max_retries,
            retry_delay_s: config.timing.retry_delay_s,
            backoff_factor: config.timing.retry_backoff_factor,
            max_backoff_s: config.timing.max_backoff_s,
        },
    );

    let runner = tokio::spawn(scheduler.clone().run());

    wait_for_shutdown_signal().await;
    info!("shutdown signal received, stopping scheduler");
    scheduler.stop().await;
    runner.abort();

    info!("discoveryd stopped; final registry size: {}", registry.count());
    Ok(())
}

fn build_handler(
    protocol: &str,
    config: &discovery_core::config::DiscoveryConfig,
    hosts: &[String],
) -> Option<Arc<dyn discovery_core::DiscoveryHandler>> {
    let protocol_config = config.protocols.get(protocol)?;
    match protocol {
        "mdns" => Some(Arc::new(discovery_handler_mdns::MdnsHandler::new(
            discovery_handler_mdns::MdnsConfig {
                timeout: Duration::from_secs_f64(protocol_config.timeout_s),
                ..Default::default()
            },
        ))),
        "ssdp" => Some(Arc::new(discovery_handler_ssdp::SsdpHandler::new(
            discovery_handler_ssdp::SsdpConfig {
                search_timeout: Duration::from_secs_f64(protocol_config.timeout_s),
                ..Default::default()
            },
        ))),
        "snmp" => Some(Arc::new(discovery_handler_snmp::SnmpHandler::new(
            discovery_handler_snmp::SnmpConfig {
                hosts: hosts.to_vec(),
                max_concurrent: protocol_config.max_concurrent as usize,
                timeout: Duration::from_secs_f64(protocol_config.timeout_s),
                ..Default::default()
            },
        ))),
        "network_scan" => Some(Arc::new(discovery_handler_network_scan::NetworkScanHandler::new(
            discovery_handler_network_scan::NetworkScanConfig {
                networks: config.network.ip_ranges.clone(),
                max_concurrent_hosts: protocol_config.max_concurrent as usize,
                rate_limiter: RateLimiterConfig {
                    per_host_limit: config.security.max_requests_per_second,
                    global_limit: config.security.max_requests_per_minute / 60.0,
                    ..Default::default()
                },
                ..Default::default()
            },
        ))),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_ip_ranges_skips_invalid_and_oversized() {
        let hosts = expand_ip_ranges(&[
            "192.168.50.0/30".to_string(),
            "not-a-cidr".to_string(),
            "10.0.0.0/16".to_string(),
        ]);
        // /30 yields 4 addresses, the oversized /16 is dropped, the
        // malformed entry is dropped.
        assert_eq!(hosts.len(), 4);
    }

    #[test]
    fn build_handler_skips_unknown_protocol_names() {
        let config = discovery_core::config::DiscoveryConfig::default();
        assert!(build_handler("not_a_protocol", &config, &[]).is_none());
    }

    #[test]
    fn build_handler_constructs_one_per_enabled_protocol() {
        let config = discovery_core::config::DiscoveryConfig::default();
        for protocol in config.enabled_protocols() {
            assert!(
                build_handler(&protocol, &config, &[]).is_some(),
                "expected a handler for enabled protocol '{protocol}'"
            );
        }
    }
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("installing a SIGTERM handler should not fail");
        tokio::select! {
            _ = ctrl_c => {}
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
