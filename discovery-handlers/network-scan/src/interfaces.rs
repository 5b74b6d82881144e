//! Local interface enumeration: when no network ranges are configured,
//! derive `/24` subnets from this host's own addresses.

use ipnetwork::Ipv4Network;

const MAX_NETWORK_HOSTS: u32 = 1024;

/// Returns the `/24` networks implied by this host's non-loopback IPv4
/// interface addresses, deduplicated.
pub fn local_v4_networks() -> Vec<Ipv4Network> {
    let addrs = match if_addrs::get_if_addrs() {
        Ok(addrs) => addrs,
        Err(e) => {
            log::warn!("failed to enumerate local network interfaces: {e}");
            return Vec::new();
        }
    };

    let mut networks = Vec::new();
    for iface in addrs {
        if iface.is_loopback() {
            continue;
        }
        if let std::net::IpAddr::V4(ip) = iface.ip() {
            if let Ok(network) = Ipv4Network::new(ip, 24) {
                let network = network.network();
                if let Ok(net) = Ipv4Network::new(network, 24) {
                    if !networks.contains(&net) {
                        networks.push(net);
                    }
                }
            }
        }
    }
    networks
}

/// Expands a network into its usable host addresses, skipping networks
/// larger than [`MAX_NETWORK_HOSTS`] with a warning (spec edge case).
pub fn hosts_in(network: &Ipv4Network) -> Vec<std::net::Ipv4Addr> {
    if network.size() > MAX_NETWORK_HOSTS {
        log::warn!(
            "network {network} has {} addresses, exceeding the {MAX_NETWORK_HOSTS} scan limit; skipping",
            network.size()
        );
        return Vec::new();
    }
    network.iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hosts_in_skips_oversized_network() {
        let big: Ipv4Network = "10.0.0.0/16".parse().unwrap();
        assert!(hosts_in(&big).is_empty());
    }

    #[test]
    fn hosts_in_enumerates_a_slash_24() {
        let small: Ipv4Network = "192.168.1.0/24".parse().unwrap();
        let hosts = hosts_in(&small);
        assert_eq!(hosts.len(), 256);
    }
}
