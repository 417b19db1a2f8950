//! Minimal STUN message codec (RFC 5389)
//!
//! Covers exactly what the endpoint and probes need: binding
//! requests/responses for gathering and connectivity checks, and Allocate
//! requests for TURN reachability. Attributes other than the handful below
//! are carried opaquely and ignored.

use hearth_core::{HearthError, Result};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

/// RFC 5389 magic cookie
pub const MAGIC_COOKIE: u32 = 0x2112_A442;

/// STUN header size in bytes
pub const HEADER_LEN: usize = 20;

/// Message types (method | class), big-endian on the wire
pub mod message_type {
    /// Binding request
    pub const BINDING_REQUEST: u16 = 0x0001;
    /// Binding success response
    pub const BINDING_RESPONSE: u16 = 0x0101;
    /// Binding error response
    pub const BINDING_ERROR: u16 = 0x0111;
    /// TURN Allocate request
    pub const ALLOCATE_REQUEST: u16 = 0x0003;
    /// TURN Allocate success response
    pub const ALLOCATE_RESPONSE: u16 = 0x0103;
    /// TURN Allocate error response
    pub const ALLOCATE_ERROR: u16 = 0x0113;
}

/// Attribute types
pub mod attribute {
    /// MAPPED-ADDRESS
    pub const MAPPED_ADDRESS: u16 = 0x0001;
    /// USERNAME
    pub const USERNAME: u16 = 0x0006;
    /// ERROR-CODE
    pub const ERROR_CODE: u16 = 0x0009;
    /// REQUESTED-TRANSPORT (RFC 5766)
    pub const REQUESTED_TRANSPORT: u16 = 0x0019;
    /// XOR-MAPPED-ADDRESS
    pub const XOR_MAPPED_ADDRESS: u16 = 0x0020;
}

const UDP_PROTOCOL_NUMBER: u8 = 17;

/// A decoded or under-construction STUN message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StunMessage {
    /// Combined method and class
    pub message_type: u16,
    /// 96-bit transaction identifier
    pub transaction_id: [u8; 12],
    attributes: Vec<(u16, Vec<u8>)>,
}

impl StunMessage {
    /// Create an empty message of the given type with a fresh transaction id
    pub fn new(message_type: u16) -> Self {
        let mut transaction_id = [0u8; 12];
        fastrand::fill(&mut transaction_id);
        Self {
            message_type,
            transaction_id,
            attributes: Vec::new(),
        }
    }

    /// Binding request with a fresh transaction id
    pub fn binding_request() -> Self {
        Self::new(message_type::BINDING_REQUEST)
    }

    /// Binding success response echoing `transaction_id`, reporting `mapped`
    pub fn binding_response(transaction_id: [u8; 12], mapped: SocketAddr) -> Self {
        let mut msg = Self {
            message_type: message_type::BINDING_RESPONSE,
            transaction_id,
            attributes: Vec::new(),
        };
        let encoded = encode_xor_address(mapped, &transaction_id);
        msg.attributes.push((attribute::XOR_MAPPED_ADDRESS, encoded));
        msg
    }

    /// TURN Allocate request asking for a UDP relay
    pub fn allocate_request() -> Self {
        let mut msg = Self::new(message_type::ALLOCATE_REQUEST);
        msg.attributes.push((
            attribute::REQUESTED_TRANSPORT,
            vec![UDP_PROTOCOL_NUMBER, 0, 0, 0],
        ));
        msg
    }

    /// Append a raw attribute
    pub fn push_attribute(&mut self, attr_type: u16, value: Vec<u8>) {
        self.attributes.push((attr_type, value));
    }

    /// Attach a USERNAME attribute
    pub fn with_username(mut self, username: &str) -> Self {
        self.attributes
            .push((attribute::USERNAME, username.as_bytes().to_vec()));
        self
    }

    /// True when `buf` plausibly holds a STUN message
    ///
    /// The first two bits of a STUN message are zero and the magic cookie
    /// sits at bytes 4..8, which is how the endpoint demuxes checks from
    /// channel datagrams sharing the socket.
    pub fn is_stun(buf: &[u8]) -> bool {
        buf.len() >= HEADER_LEN
            && buf[0] & 0xC0 == 0
            && u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]) == MAGIC_COOKIE
    }

    /// True for any success-class response
    pub fn is_success_response(&self) -> bool {
        self.message_type & 0x0110 == 0x0100
    }

    /// True for any error-class response
    pub fn is_error_response(&self) -> bool {
        self.message_type & 0x0110 == 0x0110
    }

    /// True for any request
    pub fn is_request(&self) -> bool {
        self.message_type & 0x0110 == 0x0000
    }

    /// USERNAME attribute, if present and valid UTF-8
    pub fn username(&self) -> Option<&str> {
        self.attribute(attribute::USERNAME)
            .and_then(|v| std::str::from_utf8(v).ok())
    }

    /// ERROR-CODE attribute as a numeric code (class * 100 + number)
    pub fn error_code(&self) -> Option<u16> {
        let value = self.attribute(attribute::ERROR_CODE)?;
        if value.len() < 4 {
            return None;
        }
        let class = u16::from(value[2] & 0x07);
        let number = u16::from(value[3]);
        Some(class * 100 + number)
    }

    /// Mapped address from XOR-MAPPED-ADDRESS (preferred) or MAPPED-ADDRESS
    pub fn mapped_address(&self) -> Result<SocketAddr> {
        if let Some(value) = self.attribute(attribute::XOR_MAPPED_ADDRESS) {
            return decode_xor_address(value, &self.transaction_id);
        }
        if let Some(value) = self.attribute(attribute::MAPPED_ADDRESS) {
            return decode_plain_address(value);
        }
        Err(HearthError::protocol(
            "no mapped address attribute in STUN response",
        ))
    }

    fn attribute(&self, attr_type: u16) -> Option<&[u8]> {
        self.attributes
            .iter()
            .find(|(t, _)| *t == attr_type)
            .map(|(_, v)| v.as_slice())
    }

    /// Serialize to wire format
    pub fn encode(&self) -> Vec<u8> {
        let body_len: usize = self
            .attributes
            .iter()
            .map(|(_, v)| 4 + padded_len(v.len()))
            .sum();

        let mut packet = Vec::with_capacity(HEADER_LEN + body_len);
        packet.extend_from_slice(&self.message_type.to_be_bytes());
        packet.extend_from_slice(&(body_len as u16).to_be_bytes());
        packet.extend_from_slice(&MAGIC_COOKIE.to_be_bytes());
        packet.extend_from_slice(&self.transaction_id);

        for (attr_type, value) in &self.attributes {
            packet.extend_from_slice(&attr_type.to_be_bytes());
            packet.extend_from_slice(&(value.len() as u16).to_be_bytes());
            packet.extend_from_slice(value);
            for _ in value.len()..padded_len(value.len()) {
                packet.push(0);
            }
        }
        packet
    }

    /// Parse from wire format, validating cookie and length
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_LEN {
            return Err(HearthError::protocol("packet too short for STUN header"));
        }
        let cookie = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
        if cookie != MAGIC_COOKIE {
            return Err(HearthError::protocol("invalid STUN magic cookie"));
        }

        let message_type = u16::from_be_bytes([buf[0], buf[1]]);
        let body_len = u16::from_be_bytes([buf[2], buf[3]]) as usize;
        if buf.len() < HEADER_LEN + body_len {
            return Err(HearthError::protocol("truncated STUN message"));
        }

        let mut transaction_id = [0u8; 12];
        transaction_id.copy_from_slice(&buf[8..20]);

        let mut attributes = Vec::new();
        let mut offset = HEADER_LEN;
        let end = HEADER_LEN + body_len;
        while offset + 4 <= end {
            let attr_type = u16::from_be_bytes([buf[offset], buf[offset + 1]]);
            let attr_len = u16::from_be_bytes([buf[offset + 2], buf[offset + 3]]) as usize;
            offset += 4;
            if offset + attr_len > end {
                break;
            }
            attributes.push((attr_type, buf[offset..offset + attr_len].to_vec()));
            offset += padded_len(attr_len);
        }

        Ok(Self {
            message_type,
            transaction_id,
            attributes,
        })
    }
}

fn padded_len(len: usize) -> usize {
    (len + 3) & !3
}

/// Encode XOR-MAPPED-ADDRESS for v4 and v6 addresses
fn encode_xor_address(addr: SocketAddr, transaction_id: &[u8; 12]) -> Vec<u8> {
    let cookie = MAGIC_COOKIE.to_be_bytes();
    let x_port = addr.port() ^ (MAGIC_COOKIE >> 16) as u16;

    let mut value = Vec::with_capacity(20);
    value.push(0);
    match addr.ip() {
        IpAddr::V4(ip) => {
            value.push(0x01);
            value.extend_from_slice(&x_port.to_be_bytes());
            for (octet, key) in ip.octets().iter().zip(cookie.iter()) {
                value.push(octet ^ key);
            }
        }
        IpAddr::V6(ip) => {
            value.push(0x02);
            value.extend_from_slice(&x_port.to_be_bytes());
            let mut key = [0u8; 16];
            key[..4].copy_from_slice(&cookie);
            key[4..].copy_from_slice(transaction_id);
            for (octet, key) in ip.octets().iter().zip(key.iter()) {
                value.push(octet ^ key);
            }
        }
    }
    value
}

/// Decode XOR-MAPPED-ADDRESS for v4 and v6 addresses
fn decode_xor_address(value: &[u8], transaction_id: &[u8; 12]) -> Result<SocketAddr> {
    if value.len() < 8 {
        return Err(HearthError::protocol("XOR-MAPPED-ADDRESS too short"));
    }
    let family = value[1];
    let x_port = u16::from_be_bytes([value[2], value[3]]);
    let port = x_port ^ (MAGIC_COOKIE >> 16) as u16;
    let cookie = MAGIC_COOKIE.to_be_bytes();

    match family {
        0x01 => {
            let mut octets = [0u8; 4];
            for i in 0..4 {
                octets[i] = value[4 + i] ^ cookie[i];
            }
            Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::from(octets)), port))
        }
        0x02 => {
            if value.len() < 20 {
                return Err(HearthError::protocol("XOR-MAPPED-ADDRESS v6 too short"));
            }
            let mut key = [0u8; 16];
            key[..4].copy_from_slice(&cookie);
            key[4..].copy_from_slice(transaction_id);
            let mut octets = [0u8; 16];
            for i in 0..16 {
                octets[i] = value[4 + i] ^ key[i];
            }
            Ok(SocketAddr::new(IpAddr::V6(Ipv6Addr::from(octets)), port))
        }
        other => Err(HearthError::protocol(format!(
            "unsupported address family: {other}"
        ))),
    }
}

/// Decode the non-XOR MAPPED-ADDRESS attribute
fn decode_plain_address(value: &[u8]) -> Result<SocketAddr> {
    if value.len() < 8 {
        return Err(HearthError::protocol("MAPPED-ADDRESS too short"));
    }
    let family = value[1];
    let port = u16::from_be_bytes([value[2], value[3]]);
    match family {
        0x01 => {
            let mut octets = [0u8; 4];
            octets.copy_from_slice(&value[4..8]);
            Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::from(octets)), port))
        }
        0x02 => {
            if value.len() < 20 {
                return Err(HearthError::protocol("MAPPED-ADDRESS v6 too short"));
            }
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&value[4..20]);
            Ok(SocketAddr::new(IpAddr::V6(Ipv6Addr::from(octets)), port))
        }
        other => Err(HearthError::protocol(format!(
            "unsupported address family: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binding_request_wire_shape() {
        let msg = StunMessage::binding_request();
        let packet = msg.encode();
        assert_eq!(packet.len(), HEADER_LEN);
        assert_eq!(
            u16::from_be_bytes([packet[0], packet[1]]),
            message_type::BINDING_REQUEST
        );
        assert_eq!(u16::from_be_bytes([packet[2], packet[3]]), 0);
        assert_eq!(
            u32::from_be_bytes([packet[4], packet[5], packet[6], packet[7]]),
            MAGIC_COOKIE
        );
        assert_eq!(&packet[8..20], &msg.transaction_id);
    }

    #[test]
    fn test_binding_response_roundtrip_v4() {
        let mapped: SocketAddr = "203.0.113.42:61000".parse().unwrap();
        let txid = [0xAB; 12];
        let packet = StunMessage::binding_response(txid, mapped).encode();

        assert!(StunMessage::is_stun(&packet));
        let decoded = StunMessage::decode(&packet).unwrap();
        assert!(decoded.is_success_response());
        assert_eq!(decoded.transaction_id, txid);
        assert_eq!(decoded.mapped_address().unwrap(), mapped);
    }

    #[test]
    fn test_binding_response_roundtrip_v6() {
        let mapped: SocketAddr = "[2001:db8::7]:443".parse().unwrap();
        let txid = [0x21; 12];
        let packet = StunMessage::binding_response(txid, mapped).encode();
        let decoded = StunMessage::decode(&packet).unwrap();
        assert_eq!(decoded.mapped_address().unwrap(), mapped);
    }

    #[test]
    fn test_username_attribute_padding() {
        // 5-byte username forces 3 bytes of attribute padding
        let msg = StunMessage::binding_request().with_username("ab:cd");
        let packet = msg.encode();
        assert_eq!(packet.len(), HEADER_LEN + 4 + 8);

        let decoded = StunMessage::decode(&packet).unwrap();
        assert_eq!(decoded.username(), Some("ab:cd"));
        assert!(decoded.is_request());
    }

    #[test]
    fn test_allocate_request_has_requested_transport() {
        let msg = StunMessage::allocate_request();
        let decoded = StunMessage::decode(&msg.encode()).unwrap();
        assert_eq!(decoded.message_type, message_type::ALLOCATE_REQUEST);
        assert_eq!(
            decoded.attribute(attribute::REQUESTED_TRANSPORT),
            Some(&[17u8, 0, 0, 0][..])
        );
    }

    #[test]
    fn test_error_code_parse() {
        let mut msg = StunMessage::new(message_type::ALLOCATE_ERROR);
        // 401 Unauthorized: class 4, number 1
        msg.push_attribute(attribute::ERROR_CODE, vec![0, 0, 4, 1]);
        let decoded = StunMessage::decode(&msg.encode()).unwrap();
        assert!(decoded.is_error_response());
        assert_eq!(decoded.error_code(), Some(401));
    }

    #[test]
    fn test_decode_rejects_non_stun() {
        assert!(StunMessage::decode(b"hearthchan open diag").is_err());
        assert!(!StunMessage::is_stun(b"hearthchan open diag"));
        assert!(StunMessage::decode(&[0u8; 8]).is_err());
    }
}
