//! Minimal DNS wire format (RFC 1035 §4 / RFC 6762) — just enough to build
//! mDNS PTR queries and parse PTR/TXT/SRV/A records back out of a
//! multicast response.

use std::collections::HashMap;
use std::net::Ipv4Addr;

pub const QTYPE_PTR: u16 = 12;
pub const QTYPE_TXT: u16 = 16;
pub const QTYPE_SRV: u16 = 33;
pub const QTYPE_A: u16 = 1;
pub const QCLASS_IN: u16 = 1;

/// Builds a standard DNS query packet: header with `qdcount=1` and all
/// other counts zero, one question section for `name`/`qtype`/`qclass`.
pub fn build_query(name: &str, qtype: u16, qclass: u16) -> Vec<u8> {
    let mut packet = Vec::with_capacity(32);
    packet.extend_from_slice(&0u16.to_be_bytes()); // id
    packet.extend_from_slice(&0u16.to_be_bytes()); // flags
    packet.extend_from_slice(&1u16.to_be_bytes()); // qdcount
    packet.extend_from_slice(&0u16.to_be_bytes()); // ancount
    packet.extend_from_slice(&0u16.to_be_bytes()); // nscount
    packet.extend_from_slice(&0u16.to_be_bytes()); // arcount
    packet.extend_from_slice(&encode_name(name));
    packet.extend_from_slice(&qtype.to_be_bytes());
    packet.extend_from_slice(&qclass.to_be_bytes());
    packet
}

fn encode_name(name: &str) -> Vec<u8> {
    let mut out = Vec::new();
    for label in name.trim_end_matches('.').split('.') {
        if label.is_empty() {
            continue;
        }
        out.push(label.len() as u8);
        out.extend_from_slice(label.as_bytes());
    }
    out.push(0);
    out
}

#[derive(Debug, Clone)]
pub struct ResourceRecord {
    pub name: String,
    pub rtype: u16,
    pub class: u16,
    pub ttl: u32,
    pub rdata: Vec<u8>,
    /// Offset of `rdata`'s first byte within the original packet buffer,
    /// needed to follow compression pointers inside PTR/SRV rdata.
    pub rdata_offset: usize,
}

#[derive(Debug, Default)]
pub struct DnsMessage {
    pub answers: Vec<ResourceRecord>,
}

/// Parses a complete DNS response: skips the question section, reads
/// every record in the answer/authority/additional sections (mDNS
/// responses commonly answer in any of the three, spec broadens parsing
/// across all of them — see SPEC_FULL.md's resolved Open Question on
/// mDNS record scope).
pub fn parse_response(buf: &[u8]) -> Option<DnsMessage> {
    if buf.len() < 12 {
        return None;
    }
    let qdcount = u16::from_be_bytes([buf[4], buf[5]]) as usize;
    let ancount = u16::from_be_bytes([buf[6], buf[7]]) as usize;
    let nscount = u16::from_be_bytes([buf[8], buf[9]]) as usize;
    let arcount = u16::from_be_bytes([buf[10], buf[11]]) as usize;

    let mut offset = 12usize;
    for _ in 0..qdcount {
        let (_, next) = parse_name(buf, offset)?;
        offset = next + 4; // qtype + qclass
    }

    let mut answers = Vec::new();
    for _ in 0..(ancount + nscount + arcount) {
        let (name, next) = parse_name(buf, offset)?;
        if next + 10 > buf.len() {
            break;
        }
        let rtype = u16::from_be_bytes([buf[next], buf[next + 1]]);
        let class = u16::from_be_bytes([buf[next + 2], buf[next + 3]]);
        let ttl = u32::from_be_bytes([buf[next + 4], buf[next + 5], buf[next + 6], buf[next + 7]]);
        let rdlength = u16::from_be_bytes([buf[next + 8], buf[next + 9]]) as usize;
        let rdata_start = next + 10;
        let rdata_end = rdata_start + rdlength;
        if rdata_end > buf.len() {
            break;
        }
        answers.push(ResourceRecord {
            name,
            rtype,
            class,
            ttl,
            rdata: buf[rdata_start..rdata_end].to_vec(),
            rdata_offset: rdata_start,
        });
        offset = rdata_end;
    }

    Some(DnsMessage { answers })
}

/// Reads a (possibly compressed) name starting at `offset`. Returns the
/// decoded name and the offset immediately after it in the *original*
/// stream (a pointer jump does not advance the caller's cursor beyond the
/// two bytes of the pointer itself).
pub fn parse_name(buf: &[u8], offset: usize) -> Option<(String, usize)> {
    let mut labels = Vec::new();
    let mut pos = offset;
    let mut jumped = false;
    let mut after_pointer = offset;
    let mut hops = 0;

    loop {
        if pos >= buf.len() {
            return None;
        }
        let len = buf[pos];
        if len == 0 {
            pos += 1;
            if !jumped {
                after_pointer = pos;
            }
            break;
        }
        if len & 0xC0 == 0xC0 {
            if pos + 1 >= buf.len() {
                return None;
            }
            let pointer = (((len as u16) & 0x3F) << 8 | buf[pos + 1] as u16) as usize;
            if !jumped {
                after_pointer = pos + 2;
            }
            jumped = true;
            pos = pointer;
            hops += 1;
            if hops > 64 {
                return None; // guard against a pointer cycle
            }
            continue;
        }
        let len = len as usize;
        let start = pos + 1;
        let end = start + len;
        if end > buf.len() {
            return None;
        }
        labels.push(String::from_utf8_lossy(&buf[start..end]).to_string());
        pos = end;
    }

    Some((labels.join("."), after_pointer))
}

pub fn parse_txt(rdata: &[u8]) -> HashMap<String, String> {
    let mut map = HashMap::new();
    let mut pos = 0;
    while pos < rdata.len() {
        let len = rdata[pos] as usize;
        pos += 1;
        if pos + len > rdata.len() {
            break;
        }
        let entry = String::from_utf8_lossy(&rdata[pos..pos + len]).to_string();
        pos += len;
        match entry.split_once('=') {
            Some((k, v)) => {
                map.insert(k.to_string(), v.to_string());
            }
            None if !entry.is_empty() => {
                map.insert(entry, String::new());
            }
            None => {}
        }
    }
    map
}

pub struct SrvRecord {
    pub priority: u16,
    pub weight: u16,
    pub port: u16,
    pub target: String,
}

pub fn parse_srv(buf: &[u8], rdata_offset: usize, rdata: &[u8]) -> Option<SrvRecord> {
    if rdata.len() < 6 {
        return None;
    }
    let priority = u16::from_be_bytes([rdata[0], rdata[1]]);
    let weight = u16::from_be_bytes([rdata[2], rdata[3]]);
    let port = u16::from_be_bytes([rdata[4], rdata[5]]);
    let (target, _) = parse_name(buf, rdata_offset + 6)?;
    Some(SrvRecord {
        priority,
        weight,
        port,
        target,
    })
}

pub fn parse_a(rdata: &[u8]) -> Option<Ipv4Addr> {
    if rdata.len() != 4 {
        return None;
    }
    Some(Ipv4Addr::new(rdata[0], rdata[1], rdata[2], rdata[3]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_query_encodes_labels_and_counts() {
        let packet = build_query("_http._tcp.local.", QTYPE_PTR, QCLASS_IN);
        assert_eq!(&packet[4..6], &1u16.to_be_bytes()); // qdcount
        assert_eq!(packet[12], 5); // "_http" label length
        assert_eq!(&packet[12 + 1..12 + 6], b"_http");
    }

    #[test]
    fn parse_name_follows_compression_pointer() {
        // name at offset 12: "local." stored directly; a second name at
        // offset 20 points back at offset 12 via 0xC0 0x0C.
        let mut buf = vec![0u8; 12];
        buf.extend_from_slice(b"\x05local\x00"); // offset 12
        buf.extend_from_slice(&[0xC0, 0x0C]); // offset 19, pointer to 12

        let (name, next) = parse_name(&buf, 12).unwrap();
        assert_eq!(name, "local");
        assert_eq!(next, 19);

        let (name2, next2) = parse_name(&buf, 19).unwrap();
        assert_eq!(name2, "local");
        assert_eq!(next2, 21);
    }

    #[test]
    fn txt_parses_kv_and_bare_tokens() {
        let mut rdata = Vec::new();
        for token in ["model=sensor-1", "mqtt"] {
            rdata.push(token.len() as u8);
            rdata.extend_from_slice(token.as_bytes());
        }
        let map = parse_txt(&rdata);
        assert_eq!(map.get("model"), Some(&"sensor-1".to_string()));
        assert_eq!(map.get("mqtt"), Some(&String::new()));
    }

    #[test]
    fn a_record_decodes_ipv4() {
        assert_eq!(parse_a(&[192, 168, 1, 10]), Some(Ipv4Addr::new(192, 168, 1, 10)));
        assert_eq!(parse_a(&[1, 2, 3]), None);
    }
}
