//! TCP port scanning and banner-grab service identification.

use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Semaphore;

pub const COMMON_PORTS: &[u16] = &[22, 23, 53, 80, 135, 139, 443, 445, 993, 995, 1883, 5353, 8080, 8443, 9000];
pub const IOT_PORTS: &[u16] = &[1883, 8883, 5683, 5684, 1900, 5353, 6667, 8000, 8008, 8081, 8888, 9999];

const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);
const BANNER_TIMEOUT: Duration = Duration::from_secs(2);
const BANNER_READ_CAP: usize = 1024;
const MAX_BANNER_PORTS: usize = 5;

pub fn candidate_ports() -> BTreeSet<u16> {
    COMMON_PORTS.iter().chain(IOT_PORTS.iter()).copied().collect()
}

/// Attempts a bounded-concurrency TCP connect to every candidate port on
/// `host`. Returns the sorted set of ports that accepted a connection.
pub async fn scan_open_ports(host: &str, max_concurrent: usize) -> BTreeSet<u16> {
    let semaphore = std::sync::Arc::new(Semaphore::new(max_concurrent.max(1)));
    let tasks = candidate_ports().into_iter().map(|port| {
        let host = host.to_string();
        let semaphore = semaphore.clone();
        async move {
            let _permit = semaphore.acquire_owned().await.ok()?;
            connect(&host, port).await.then_some(port)
        }
    });
    futures::future::join_all(tasks).await.into_iter().flatten().collect()
}

async fn connect(host: &str, port: u16) -> bool {
    let addr = format!("{host}:{port}");
    let Ok(Ok(addr)) = tokio::time::timeout(CONNECT_TIMEOUT, resolve(&addr)).await else {
        return false;
    };
    matches!(
        tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr)).await,
        Ok(Ok(_))
    )
}

async fn resolve(addr: &str) -> anyhow::Result<SocketAddr> {
    tokio::net::lookup_host(addr)
        .await?
        .next()
        .ok_or_else(|| anyhow::anyhow!("no address resolved for {addr}"))
}

const WEB_PORTS: &[u16] = &[80, 443, 8080, 8443, 8000, 8008, 8081, 8888, 9000, 9999];

/// Grabs a service banner from up to [`MAX_BANNER_PORTS`] of the given open
/// ports, sending an HTTP probe on well-known web ports.
pub async fn identify_services(host: &str, open_ports: &BTreeSet<u16>) -> Vec<(u16, Option<String>)> {
    let mut results = Vec::new();
    for &port in open_ports.iter().take(MAX_BANNER_PORTS) {
        let banner = grab_banner(host, port).await;
        results.push((port, banner));
    }
    results
}

async fn grab_banner(host: &str, port: u16) -> Option<String> {
    let addr = format!("{host}:{port}");
    let socket_addr = resolve(&addr).await.ok()?;
    let mut stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(socket_addr))
        .await
        .ok()?
        .ok()?;

    if WEB_PORTS.contains(&port) {
        let _ = tokio::time::timeout(BANNER_TIMEOUT, stream.write_all(b"GET / HTTP/1.0\r\n\r\n")).await;
    }

    let mut buf = vec![0u8; BANNER_READ_CAP];
    let read = tokio::time::timeout(BANNER_TIMEOUT, stream.read(&mut buf)).await;
    match read {
        Ok(Ok(n)) if n > 0 => Some(String::from_utf8_lossy(&buf[..n]).to_string()),
        _ => None,
    }
}

/// Refines a bare port number into a service name using banner contents
/// first, falling back to a well-known port→name table.
pub fn classify_service(port: u16, banner: Option<&str>) -> String {
    if let Some(banner) = banner {
        let lower = banner.to_lowercase();
        if lower.starts_with("http/") || lower.contains("server:") {
            return "http".to_string();
        }
        if lower.starts_with("ssh-") {
            return "ssh".to_string();
        }
        if lower.starts_with("220") && (lower.contains("ftp") || lower.contains("ftpd")) {
            return "ftp".to_string();
        }
    }
    default_service_name(port).to_string()
}

fn default_service_name(port: u16) -> &'static str {
    match port {
        22 => "ssh",
        23 => "telnet",
        53 => "dns",
        80 | 8080 | 8000 | 8008 | 8081 | 8888 | 9000 | 9999 => "http",
        135 => "rpc",
        139 | 445 => "smb",
        443 | 8443 => "https",
        993 => "imaps",
        995 => "pop3s",
        1883 | 8883 => "mqtt",
        1900 => "ssdp",
        5353 => "mdns",
        5683 | 5684 => "coap",
        6667 => "irc",
        _ => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidate_ports_union_common_and_iot() {
        let ports = candidate_ports();
        assert!(ports.contains(&22));
        assert!(ports.contains(&5683));
        // 1883 and 5353 appear in both lists; the union must still dedup.
        assert_eq!(ports.iter().filter(|&&p| p == 1883).count(), 1);
    }

    #[test]
    fn classify_service_prefers_banner_over_default() {
        assert_eq!(classify_service(9999, Some("SSH-2.0-OpenSSH_8.1")), "ssh");
        assert_eq!(classify_service(9999, None), "unknown");
        assert_eq!(classify_service(1883, None), "mqtt");
    }

    #[test]
    fn classify_service_detects_http_from_status_line() {
        assert_eq!(classify_service(8123, Some("HTTP/1.1 200 OK\r\nServer: nginx")), "http");
    }
}
