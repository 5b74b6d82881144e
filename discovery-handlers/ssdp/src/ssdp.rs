//! HTTP-over-UDP wire format for SSDP: building
//! `M-SEARCH * HTTP/1.1` requests and folding response headers into a
//! case-normalized map.

use discovery_core::CaseInsensitiveMap;

pub const MULTICAST_ADDR: &str = "239.255.255.250";
pub const MULTICAST_PORT: u16 = 1900;

pub fn build_msearch(search_target: &str, mx: u32) -> Vec<u8> {
    format!(
        "M-SEARCH * HTTP/1.1\r\n\
         HOST: {MULTICAST_ADDR}:{MULTICAST_PORT}\r\n\
         MAN: \"ssdp:discover\"\r\n\
         ST: {search_target}\r\n\
         MX: {mx}\r\n\r\n"
    )
    .into_bytes()
}

/// Parses an SSDP response: the status line must be `HTTP/1.1 200 ...`;
/// remaining lines are folded into a case-insensitive header map.
pub fn parse_response(raw: &str) -> Option<CaseInsensitiveMap<String>> {
    let mut lines = raw.split("\r\n");
    let status_line = lines.next()?;
    if !status_line.starts_with("HTTP/1.1 200") && !status_line.starts_with("HTTP/1.0 200") {
        return None;
    }

    let mut headers = CaseInsensitiveMap::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        if let Some((key, value)) = line.split_once(':') {
            headers.insert(key.trim(), value.trim().to_string());
        }
    }
    Some(headers)
}

pub fn default_search_targets() -> Vec<String> {
    vec![
        "upnp:rootdevice".to_string(),
        "ssdp:all".to_string(),
        "urn:schemas-upnp-org:device:MediaServer:1".to_string(),
        "urn:schemas-upnp-org:device:MediaRenderer:1".to_string(),
        "urn:schemas-upnp-org:device:InternetGatewayDevice:1".to_string(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn msearch_contains_required_headers() {
        let req = String::from_utf8(build_msearch("ssdp:all", 3)).unwrap();
        assert!(req.starts_with("M-SEARCH * HTTP/1.1\r\n"));
        assert!(req.contains("MAN: \"ssdp:discover\"\r\n"));
        assert!(req.contains("ST: ssdp:all\r\n"));
        assert!(req.contains("MX: 3\r\n"));
    }

    #[test]
    fn parse_response_requires_200_status_and_folds_headers() {
        let raw = "HTTP/1.1 200 OK\r\nLOCATION: http://10.0.0.1:80/desc.xml\r\nST: upnp:rootdevice\r\n\r\n";
        let headers = parse_response(raw).unwrap();
        assert_eq!(
            headers.get("location"),
            Some(&"http://10.0.0.1:80/desc.xml".to_string())
        );
        assert_eq!(headers.get("Location"), headers.get("location"));
    }

    #[test]
    fn parse_response_rejects_non_200() {
        assert!(parse_response("HTTP/1.1 404 Not Found\r\n\r\n").is_none());
    }
}
