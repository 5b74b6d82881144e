//! Minimal BER/DER encode and decode for SNMPv1/v2c GET PDUs.
//! Covers exactly the ASN.1 universal types SNMP's GET path needs:
//! INTEGER, OCTET STRING, NULL, OBJECT IDENTIFIER, and SEQUENCE, plus the
//! context-specific PDU tags.

pub const TAG_INTEGER: u8 = 0x02;
pub const TAG_OCTET_STRING: u8 = 0x04;
pub const TAG_NULL: u8 = 0x05;
pub const TAG_OID: u8 = 0x06;
pub const TAG_SEQUENCE: u8 = 0x30;
pub const TAG_GET_REQUEST: u8 = 0xA0;
pub const TAG_GET_NEXT_REQUEST: u8 = 0xA1;
pub const TAG_GET_RESPONSE: u8 = 0xA2;

fn encode_length(len: usize) -> Vec<u8> {
    if len < 0x80 {
        vec![len as u8]
    } else {
        let bytes = len.to_be_bytes();
        let trimmed: Vec<u8> = bytes.into_iter().skip_while(|&b| b == 0).collect();
        let mut out = vec![0x80 | trimmed.len() as u8];
        out.extend(trimmed);
        out
    }
}

fn tlv(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut out = vec![tag];
    out.extend(encode_length(content.len()));
    out.extend_from_slice(content);
    out
}

pub fn encode_integer(value: i64) -> Vec<u8> {
    let mut bytes = value.to_be_bytes().to_vec();
    while bytes.len() > 1 && ((bytes[0] == 0 && bytes[1] & 0x80 == 0) || (bytes[0] == 0xFF && bytes[1] & 0x80 != 0)) {
        bytes.remove(0);
    }
    tlv(TAG_INTEGER, &bytes)
}

pub fn encode_octet_string(value: &[u8]) -> Vec<u8> {
    tlv(TAG_OCTET_STRING, value)
}

pub fn encode_null() -> Vec<u8> {
    tlv(TAG_NULL, &[])
}

/// Parses a dotted OID string (`"1.3.6.1.2.1.1.1.0"`) into the standard
/// base-128 BER encoding; the first two arcs fold into a single byte as
/// `40*x + y` per X.690.
pub fn encode_oid(dotted: &str) -> Vec<u8> {
    let arcs: Vec<u32> = dotted.split('.').filter_map(|s| s.parse().ok()).collect();
    let mut content = Vec::new();
    if arcs.len() >= 2 {
        content.push((arcs[0] * 40 + arcs[1]) as u8);
        for &arc in &arcs[2..] {
            content.extend(encode_base128(arc));
        }
    }
    tlv(TAG_OID, &content)
}

fn encode_base128(mut value: u32) -> Vec<u8> {
    let mut groups = vec![value & 0x7F];
    value >>= 7;
    while value > 0 {
        groups.push((value & 0x7F) | 0x80);
        value >>= 7;
    }
    groups.reverse();
    groups.into_iter().map(|b| b as u8).collect()
}

pub fn encode_sequence(parts: &[Vec<u8>]) -> Vec<u8> {
    let content: Vec<u8> = parts.concat();
    tlv(TAG_SEQUENCE, &content)
}

pub fn encode_pdu(tag: u8, parts: &[Vec<u8>]) -> Vec<u8> {
    let content: Vec<u8> = parts.concat();
    tlv(tag, &content)
}

/// Builds a full SNMPv1/v2c message: `{version, community, pdu}`.
pub fn build_get_request(version: i64, community: &str, request_id: i64, oids: &[String]) -> Vec<u8> {
    let varbinds: Vec<u8> = oids
        .iter()
        .map(|oid| encode_sequence(&[encode_oid(oid), encode_null()]))
        .collect::<Vec<_>>()
        .concat();
    let pdu = encode_pdu(
        TAG_GET_REQUEST,
        &[
            encode_integer(request_id),
            encode_integer(0), // error-status
            encode_integer(0), // error-index
            encode_sequence(&[varbinds]),
        ],
    );
    encode_sequence(&[
        encode_integer(version),
        encode_octet_string(community.as_bytes()),
        pdu,
    ])
}

#[derive(Debug, Clone, PartialEq)]
pub enum BerValue {
    Integer(i64),
    OctetString(Vec<u8>),
    ObjectId(String),
    Null,
    Sequence(Vec<(u8, Vec<u8>)>),
    Other(u8, Vec<u8>),
}

struct Tlv<'a> {
    tag: u8,
    content: &'a [u8],
}

fn read_tlv(buf: &[u8]) -> Option<(Tlv<'_>, &[u8])> {
    if buf.is_empty() {
        return None;
    }
    let tag = buf[0];
    let (len, header_len) = if buf.len() > 1 && buf[1] & 0x80 != 0 {
        let n = (buf[1] & 0x7F) as usize;
        if buf.len() < 2 + n {
            return None;
        }
        let mut len = 0usize;
        for &b in &buf[2..2 + n] {
            len = (len << 8) | b as usize;
        }
        (len, 2 + n)
    } else if buf.len() > 1 {
        (buf[1] as usize, 2)
    } else {
        return None;
    };
    if header_len + len > buf.len() {
        return None;
    }
    let content = &buf[header_len..header_len + len];
    let rest = &buf[header_len + len..];
    Some((Tlv { tag, content }, rest))
}

fn decode_integer(content: &[u8]) -> i64 {
    if content.is_empty() {
        return 0;
    }
    let mut value: i64 = if content[0] & 0x80 != 0 { -1 } else { 0 };
    for &b in content {
        value = (value << 8) | b as i64;
    }
    value
}

fn decode_oid(content: &[u8]) -> String {
    if content.is_empty() {
        return String::new();
    }
    let mut arcs = vec![(content[0] / 40) as u32, (content[0] % 40) as u32];
    let mut value: u32 = 0;
    for &b in &content[1..] {
        value = (value << 7) | (b & 0x7F) as u32;
        if b & 0x80 == 0 {
            arcs.push(value);
            value = 0;
        }
    }
    arcs.iter().map(|a| a.to_string()).collect::<Vec<_>>().join(".")
}

fn value_from_tag_content(tag: u8, content: &[u8]) -> BerValue {
    match tag {
        TAG_INTEGER => BerValue::Integer(decode_integer(content)),
        TAG_OCTET_STRING => BerValue::OctetString(content.to_vec()),
        TAG_OID => BerValue::ObjectId(decode_oid(content)),
        TAG_NULL => BerValue::Null,
        TAG_SEQUENCE | TAG_GET_RESPONSE => {
            let mut children = Vec::new();
            let mut rest = content;
            while let Some((child, next)) = read_tlv(rest) {
                children.push((child.tag, child.content.to_vec()));
                rest = next;
            }
            BerValue::Sequence(children)
        }
        other => BerValue::Other(other, content.to_vec()),
    }
}

/// Decodes one BER value starting at the front of `buf`. Used recursively
/// for GET-RESPONSE PDUs, whose varbind sequence nests several levels.
pub fn decode(buf: &[u8]) -> Option<BerValue> {
    let (tlv, _) = read_tlv(buf)?;
    Some(value_from_tag_content(tlv.tag, tlv.content))
}

/// A parsed GET-RESPONSE: request-id plus the `{oid, value}` varbind list.
pub struct GetResponse {
    pub request_id: i64,
    pub varbinds: Vec<(String, BerValue)>,
}

pub fn parse_get_response(buf: &[u8]) -> Option<GetResponse> {
    let message = decode(buf)?;
    let BerValue::Sequence(top) = message else { return None };
    // top: [version, community, pdu]
    let (_, pdu_bytes) = top.get(2)?;
    let pdu = decode(pdu_bytes)?;
    let BerValue::Sequence(pdu_fields) = pdu else { return None };
    // pdu_fields: [request-id, error-status, error-index, varbind-list]
    let (_, request_id_bytes) = pdu_fields.first()?;
    let request_id = decode_integer(request_id_bytes);
    let (_, varbind_list_bytes) = pdu_fields.get(3)?;
    let varbind_list = decode(varbind_list_bytes)?;
    let BerValue::Sequence(varbind_entries) = varbind_list else { return None };

    let mut varbinds = Vec::new();
    for (_, entry_bytes) in varbind_entries {
        if let Some(BerValue::Sequence(pair)) = decode(&entry_bytes) {
            if pair.len() == 2 {
                let oid = decode_oid(&pair[0].1);
                let value = value_from_tag_content(pair[1].0, &pair[1].1);
                varbinds.push((oid, value));
            }
        }
    }

    Some(GetResponse { request_id, varbinds })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oid_round_trips() {
        let encoded = encode_oid("1.3.6.1.2.1.1.1.0");
        let (tlv, _) = read_tlv(&encoded).unwrap();
        assert_eq!(tlv.tag, TAG_OID);
        assert_eq!(decode_oid(tlv.content), "1.3.6.1.2.1.1.1.0");
    }

    #[test]
    fn integer_round_trips_small_and_negative() {
        for value in [0i64, 1, 127, 128, 255, 256, -1, -128, 65535] {
            let encoded = encode_integer(value);
            let (tlv, _) = read_tlv(&encoded).unwrap();
            assert_eq!(decode_integer(tlv.content), value, "value={value}");
        }
    }

    #[test]
    fn build_get_request_contains_community_and_oid() {
        let packet = build_get_request(1, "public", 42, &["1.3.6.1.2.1.1.1.0".to_string()]);
        let (tlv, _) = read_tlv(&packet).unwrap();
        assert_eq!(tlv.tag, TAG_SEQUENCE);
        // community string bytes appear verbatim in the encoded message
        assert!(packet.windows(b"public".len()).any(|w| w == b"public"));
    }
}
