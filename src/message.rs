//! Wire protocol between the coordinator and its agents.
//!
//! Every message is a TLV frame on a TCP stream: a 1-byte type, a 2-byte
//! big-endian total length (header included), and a JSON body. The frame
//! geometry is fixed; the body schema is pinned by the types in this module.
//! `ResultCode` discriminants are wire-load-bearing — independently compiled
//! agents must agree on the exact numbering.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Length of the type and length fields of a frame.
pub const HEADER_LEN: usize = 3;

/// Maximum total length of a frame in bytes.
pub const MAX_LEN: usize = 4096;

const TYPE_NOP: u8 = 1;
const TYPE_REGISTER: u8 = 2;
const TYPE_TEST: u8 = 3;
const TYPE_RESULT: u8 = 4;

/// Error reading or writing a protocol frame.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("connection error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid message type {0}")]
    InvalidType(u8),

    #[error("invalid message length {0}")]
    InvalidLength(u16),

    #[error("message body of {0} bytes exceeds frame limit")]
    Oversize(usize),

    #[error("message body decode failed: {0}")]
    Decode(#[from] serde_json::Error),
}

// ─────────────────────────────────────────────────────────────────────────────
// Field types
// ─────────────────────────────────────────────────────────────────────────────

/// A 6-byte Ethernet hardware address, parsed from and rendered as the
/// usual colon-separated form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct MacAddr(pub [u8; 6]);

/// Error parsing a MAC address string.
#[derive(Debug, thiserror::Error)]
#[error("invalid MAC address: '{0}'")]
pub struct MacParseError(String);

impl FromStr for MacAddr {
    type Err = MacParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split(':').collect();
        if parts.len() != 6 {
            return Err(MacParseError(s.to_string()));
        }
        let mut mac = [0u8; 6];
        for (i, p) in parts.iter().enumerate() {
            mac[i] = u8::from_str_radix(p, 16).map_err(|_| MacParseError(s.to_string()))?;
        }
        Ok(MacAddr(mac))
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            m[0], m[1], m[2], m[3], m[4], m[5]
        )
    }
}

impl From<MacAddr> for String {
    fn from(mac: MacAddr) -> Self {
        mac.to_string()
    }
}

impl TryFrom<String> for MacAddr {
    type Error = MacParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Layer-4 protocol selected for a probe. Serialized as the IP protocol
/// number so both agents agree without string matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum, Serialize, Deserialize)]
#[serde(into = "u16", try_from = "u16")]
pub enum Protocol {
    /// No layer-4 constraint (wildcard in match contexts).
    #[default]
    None,
    /// TCP (probes are single SYN segments).
    Tcp,
    /// UDP (empty datagram probes).
    Udp,
}

impl From<Protocol> for u16 {
    fn from(p: Protocol) -> u16 {
        match p {
            Protocol::None => 0,
            Protocol::Tcp => 6,
            Protocol::Udp => 17,
        }
    }
}

impl TryFrom<u16> for Protocol {
    type Error = String;

    fn try_from(v: u16) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(Protocol::None),
            6 => Ok(Protocol::Tcp),
            17 => Ok(Protocol::Udp),
            other => Err(format!("unknown protocol number {other}")),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::None => write!(f, "none"),
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Result codes
// ─────────────────────────────────────────────────────────────────────────────

/// Outcome of a single test step, reported by an agent.
///
/// Discriminants are fixed u8 wire values. The ICMPv4 reject family is
/// `32 + code` for destination-unreachable codes 0–15 (RFC 792/1812); the
/// ICMPv6 family is `64 + code` for codes 0–8 (RFC 4443, 8754, 8883), so a
/// wire value embeds the ICMP code it was derived from. Renumbering breaks
/// interoperability with already-deployed agents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum ResultCode {
    /// Receiver is subscribed and listening.
    Ready = 0,
    /// Probe arrived at the receiver.
    Pass = 1,
    /// Agent-side failure (for example an injection error).
    Error = 2,
    /// Sender observed a TCP RST for the probe's reversed four-tuple.
    TcpReset = 3,

    Icmpv4NetUnreachable = 32,
    Icmpv4HostUnreachable = 33,
    Icmpv4ProtocolUnreachable = 34,
    Icmpv4PortUnreachable = 35,
    Icmpv4FragmentationNeeded = 36,
    Icmpv4SourceRouteFailed = 37,
    Icmpv4NetUnknown = 38,
    Icmpv4HostUnknown = 39,
    Icmpv4SourceHostIsolated = 40,
    Icmpv4NetProhibited = 41,
    Icmpv4HostProhibited = 42,
    Icmpv4NetUnreachableTos = 43,
    Icmpv4HostUnreachableTos = 44,
    Icmpv4CommProhibited = 45,
    Icmpv4HostPrecedence = 46,
    Icmpv4PrecedenceCutoff = 47,

    Icmpv6NoRoute = 64,
    Icmpv6AdminProhibited = 65,
    Icmpv6BeyondScope = 66,
    Icmpv6AddressUnreachable = 67,
    Icmpv6PortUnreachable = 68,
    Icmpv6SourceAddressFailed = 69,
    Icmpv6RejectRoute = 70,
    Icmpv6SourceRoutingHeader = 71,
    Icmpv6HeadersTooLong = 72,
}

impl ResultCode {
    /// Convert a raw wire value back to a code.
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Ready),
            1 => Some(Self::Pass),
            2 => Some(Self::Error),
            3 => Some(Self::TcpReset),
            32..=47 => Self::from_icmpv4_code(v - 32),
            64..=72 => Self::from_icmpv6_code(v - 64),
            _ => None,
        }
    }

    /// Map an ICMPv4 destination-unreachable code (0–15) to a result code.
    pub fn from_icmpv4_code(code: u8) -> Option<Self> {
        let code = match code {
            0 => Self::Icmpv4NetUnreachable,
            1 => Self::Icmpv4HostUnreachable,
            2 => Self::Icmpv4ProtocolUnreachable,
            3 => Self::Icmpv4PortUnreachable,
            4 => Self::Icmpv4FragmentationNeeded,
            5 => Self::Icmpv4SourceRouteFailed,
            6 => Self::Icmpv4NetUnknown,
            7 => Self::Icmpv4HostUnknown,
            8 => Self::Icmpv4SourceHostIsolated,
            9 => Self::Icmpv4NetProhibited,
            10 => Self::Icmpv4HostProhibited,
            11 => Self::Icmpv4NetUnreachableTos,
            12 => Self::Icmpv4HostUnreachableTos,
            13 => Self::Icmpv4CommProhibited,
            14 => Self::Icmpv4HostPrecedence,
            15 => Self::Icmpv4PrecedenceCutoff,
            _ => return None,
        };
        Some(code)
    }

    /// Map an ICMPv6 destination-unreachable code (0–8) to a result code.
    pub fn from_icmpv6_code(code: u8) -> Option<Self> {
        let code = match code {
            0 => Self::Icmpv6NoRoute,
            1 => Self::Icmpv6AdminProhibited,
            2 => Self::Icmpv6BeyondScope,
            3 => Self::Icmpv6AddressUnreachable,
            4 => Self::Icmpv6PortUnreachable,
            5 => Self::Icmpv6SourceAddressFailed,
            6 => Self::Icmpv6RejectRoute,
            7 => Self::Icmpv6SourceRoutingHeader,
            8 => Self::Icmpv6HeadersTooLong,
            _ => return None,
        };
        Some(code)
    }

    /// Whether this code counts as a filter rejection for classification.
    pub fn is_reject(&self) -> bool {
        matches!(*self as u8, 3 | 32..=47 | 64..=72)
    }
}

impl From<ResultCode> for u8 {
    fn from(c: ResultCode) -> u8 {
        c as u8
    }
}

impl TryFrom<u8> for ResultCode {
    type Error = String;

    fn try_from(v: u8) -> Result<Self, String> {
        ResultCode::from_u8(v).ok_or_else(|| format!("unknown result code {v}"))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Message payloads
// ─────────────────────────────────────────────────────────────────────────────

/// One per-port test, as sent to an agent.
///
/// `initiate` selects the role: the sender builds and injects the probe, the
/// receiver matches captured packets against these fields. Absent options,
/// zero ports, and `Protocol::None` mean "don't care" in match contexts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestDescriptor {
    pub id: u32,
    pub initiate: bool,
    pub device: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub src_mac: Option<MacAddr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dst_mac: Option<MacAddr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub src_ip: Option<IpAddr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dst_ip: Option<IpAddr>,
    pub protocol: Protocol,
    pub src_port: u16,
    pub dst_port: u16,
}

/// A test observation reported by an agent, keyed by plan item id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultMsg {
    pub id: u32,
    pub result: ResultCode,
    /// Raw captured frame bytes, when the observation has one.
    #[serde(with = "base64_bytes")]
    pub packet: Vec<u8>,
}

impl ResultMsg {
    /// A result with no captured packet.
    pub fn new(id: u32, result: ResultCode) -> Self {
        Self {
            id,
            result,
            packet: Vec::new(),
        }
    }
}

/// Serialize packet bytes as base64 so a full captured Ethernet frame stays
/// within the 4096-byte frame limit.
mod base64_bytes {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
        serializer.serialize_str(&encoded)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        base64::engine::general_purpose::STANDARD
            .decode(&s)
            .map_err(serde::de::Error::custom)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Framing
// ─────────────────────────────────────────────────────────────────────────────

/// A protocol message, one variant per frame type.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Keep-alive; empty body.
    Nop,
    /// First frame an agent sends, announcing its id.
    Register { client: u8 },
    /// Test command from coordinator to agent.
    Test(TestDescriptor),
    /// Observation from agent to coordinator.
    Result(ResultMsg),
}

#[derive(Serialize, Deserialize)]
struct RegisterBody {
    client: u8,
}

impl Message {
    /// Wire type tag for this variant.
    pub fn type_id(&self) -> u8 {
        match self {
            Message::Nop => TYPE_NOP,
            Message::Register { .. } => TYPE_REGISTER,
            Message::Test(_) => TYPE_TEST,
            Message::Result(_) => TYPE_RESULT,
        }
    }

    fn encode_body(&self) -> Result<Vec<u8>, ProtocolError> {
        let body = match self {
            Message::Nop => Vec::new(),
            Message::Register { client } => serde_json::to_vec(&RegisterBody { client: *client })?,
            Message::Test(test) => serde_json::to_vec(test)?,
            Message::Result(result) => serde_json::to_vec(result)?,
        };
        Ok(body)
    }

    fn decode_body(typ: u8, body: &[u8]) -> Result<Self, ProtocolError> {
        match typ {
            TYPE_NOP => Ok(Message::Nop),
            TYPE_REGISTER => {
                let reg: RegisterBody = serde_json::from_slice(body)?;
                Ok(Message::Register { client: reg.client })
            }
            TYPE_TEST => Ok(Message::Test(serde_json::from_slice(body)?)),
            TYPE_RESULT => Ok(Message::Result(serde_json::from_slice(body)?)),
            other => Err(ProtocolError::InvalidType(other)),
        }
    }
}

/// Serialize `msg` and write the complete frame to `conn`.
pub async fn write_message<W>(conn: &mut W, msg: &Message) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    let body = msg.encode_body()?;
    let total = HEADER_LEN + body.len();
    if total > MAX_LEN {
        return Err(ProtocolError::Oversize(body.len()));
    }

    let mut frame = Vec::with_capacity(total);
    frame.push(msg.type_id());
    frame.extend_from_slice(&(total as u16).to_be_bytes());
    frame.extend_from_slice(&body);
    conn.write_all(&frame).await?;
    Ok(())
}

/// Read one complete frame from `conn` and decode it.
///
/// Validates the type tag and the length bound before reading the body.
/// Callers treat any error as end-of-stream for that connection.
pub async fn read_message<R>(conn: &mut R) -> Result<Message, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    conn.read_exact(&mut header).await?;

    let typ = header[0];
    if !(TYPE_NOP..=TYPE_RESULT).contains(&typ) {
        return Err(ProtocolError::InvalidType(typ));
    }
    let length = u16::from_be_bytes([header[1], header[2]]);
    if (length as usize) < HEADER_LEN || (length as usize) > MAX_LEN {
        return Err(ProtocolError::InvalidLength(length));
    }

    let mut body = vec![0u8; length as usize - HEADER_LEN];
    conn.read_exact(&mut body).await?;
    Message::decode_body(typ, &body)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    fn sample_test() -> TestDescriptor {
        TestDescriptor {
            id: 7,
            initiate: true,
            device: "eth0".to_string(),
            src_mac: Some("aa:bb:cc:dd:ee:ff".parse().unwrap()),
            dst_mac: Some("00:11:22:33:44:55".parse().unwrap()),
            src_ip: Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))),
            dst_ip: Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2))),
            protocol: Protocol::Tcp,
            src_port: 40000,
            dst_port: 443,
        }
    }

    async fn roundtrip(msg: Message) -> Message {
        let (mut a, mut b) = tokio::io::duplex(MAX_LEN);
        write_message(&mut a, &msg).await.unwrap();
        read_message(&mut b).await.unwrap()
    }

    #[tokio::test]
    async fn test_roundtrip_nop() {
        assert_eq!(roundtrip(Message::Nop).await, Message::Nop);
    }

    #[tokio::test]
    async fn test_roundtrip_register() {
        let msg = Message::Register { client: 1 };
        assert_eq!(roundtrip(msg.clone()).await, msg);
    }

    #[tokio::test]
    async fn test_roundtrip_test_descriptor() {
        let msg = Message::Test(sample_test());
        assert_eq!(roundtrip(msg.clone()).await, msg);
    }

    #[tokio::test]
    async fn test_roundtrip_test_descriptor_sparse() {
        // Absent fields are sentinels and must survive the trip as such.
        let msg = Message::Test(TestDescriptor {
            id: 0,
            device: "lo".to_string(),
            ..Default::default()
        });
        assert_eq!(roundtrip(msg.clone()).await, msg);
    }

    #[tokio::test]
    async fn test_roundtrip_test_descriptor_v6() {
        let mut test = sample_test();
        test.src_ip = Some(IpAddr::V6(Ipv6Addr::new(0xfd00, 0, 0, 0, 0, 0, 0, 1)));
        test.dst_ip = Some(IpAddr::V6(Ipv6Addr::new(0xfd00, 0, 0, 0, 0, 0, 0, 2)));
        let msg = Message::Test(test);
        assert_eq!(roundtrip(msg.clone()).await, msg);
    }

    #[tokio::test]
    async fn test_roundtrip_result_with_packet() {
        let msg = Message::Result(ResultMsg {
            id: 3,
            result: ResultCode::Pass,
            packet: vec![0xde, 0xad, 0xbe, 0xef],
        });
        assert_eq!(roundtrip(msg.clone()).await, msg);
    }

    #[tokio::test]
    async fn test_roundtrip_result_full_frame_packet() {
        // A 1514-byte captured Ethernet frame must fit the 4096 frame cap.
        let msg = Message::Result(ResultMsg {
            id: 9,
            result: ResultCode::Pass,
            packet: vec![0xa5; 1514],
        });
        assert_eq!(roundtrip(msg.clone()).await, msg);
    }

    #[tokio::test]
    async fn test_frame_header_layout() {
        let (mut a, mut b) = tokio::io::duplex(64);
        write_message(&mut a, &Message::Register { client: 5 })
            .await
            .unwrap();
        drop(a);

        let mut buf = Vec::new();
        b.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf[0], TYPE_REGISTER);
        let length = u16::from_be_bytes([buf[1], buf[2]]) as usize;
        assert_eq!(length, buf.len(), "length field covers header and body");
    }

    #[tokio::test]
    async fn test_nop_frame_is_header_only() {
        let (mut a, mut b) = tokio::io::duplex(64);
        write_message(&mut a, &Message::Nop).await.unwrap();
        drop(a);

        let mut buf = Vec::new();
        b.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, vec![TYPE_NOP, 0, HEADER_LEN as u8]);
    }

    #[tokio::test]
    async fn test_read_rejects_unknown_type() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&[9, 0, 3]).await.unwrap();
        let err = read_message(&mut b).await.unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidType(9)));
    }

    #[tokio::test]
    async fn test_read_rejects_bad_length() {
        let (mut a, mut b) = tokio::io::duplex(64);
        // Length below the header size is impossible.
        a.write_all(&[TYPE_NOP, 0, 2]).await.unwrap();
        let err = read_message(&mut b).await.unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidLength(2)));

        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&[TYPE_NOP, 0xff, 0xff]).await.unwrap();
        let err = read_message(&mut b).await.unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidLength(0xffff)));
    }

    #[tokio::test]
    async fn test_read_eof_is_error() {
        let (a, mut b) = tokio::io::duplex(64);
        drop(a);
        assert!(read_message(&mut b).await.is_err());
    }

    #[tokio::test]
    async fn test_write_rejects_oversize_body() {
        let msg = Message::Result(ResultMsg {
            id: 1,
            result: ResultCode::Pass,
            packet: vec![0; MAX_LEN],
        });
        let (mut a, _b) = tokio::io::duplex(2 * MAX_LEN);
        let err = write_message(&mut a, &msg).await.unwrap_err();
        assert!(matches!(err, ProtocolError::Oversize(_)));
    }

    #[test]
    fn test_result_code_values_stable() {
        // Wire values; renumbering breaks deployed agents.
        assert_eq!(ResultCode::Ready as u8, 0);
        assert_eq!(ResultCode::Pass as u8, 1);
        assert_eq!(ResultCode::Error as u8, 2);
        assert_eq!(ResultCode::TcpReset as u8, 3);
        assert_eq!(ResultCode::Icmpv4NetUnreachable as u8, 32);
        assert_eq!(ResultCode::Icmpv4PortUnreachable as u8, 35);
        assert_eq!(ResultCode::Icmpv4PrecedenceCutoff as u8, 47);
        assert_eq!(ResultCode::Icmpv6NoRoute as u8, 64);
        assert_eq!(ResultCode::Icmpv6PortUnreachable as u8, 68);
        assert_eq!(ResultCode::Icmpv6SourceAddressFailed as u8, 69);
        assert_eq!(ResultCode::Icmpv6SourceRoutingHeader as u8, 71);
        assert_eq!(ResultCode::Icmpv6HeadersTooLong as u8, 72);
    }

    #[test]
    fn test_result_code_from_u8_roundtrip() {
        for v in 0u8..=255 {
            if let Some(code) = ResultCode::from_u8(v) {
                assert_eq!(code as u8, v);
            }
        }
        assert!(ResultCode::from_u8(4).is_none());
        assert!(ResultCode::from_u8(31).is_none());
        assert!(ResultCode::from_u8(48).is_none());
        assert!(ResultCode::from_u8(73).is_none());
    }

    #[test]
    fn test_icmp_code_mapping_embeds_wire_code() {
        assert_eq!(
            ResultCode::from_icmpv4_code(3),
            Some(ResultCode::Icmpv4PortUnreachable)
        );
        assert_eq!(
            ResultCode::from_icmpv4_code(13),
            Some(ResultCode::Icmpv4CommProhibited)
        );
        assert!(ResultCode::from_icmpv4_code(16).is_none());
        assert_eq!(
            ResultCode::from_icmpv6_code(1),
            Some(ResultCode::Icmpv6AdminProhibited)
        );
        assert_eq!(
            ResultCode::from_icmpv6_code(8),
            Some(ResultCode::Icmpv6HeadersTooLong)
        );
        assert!(ResultCode::from_icmpv6_code(9).is_none());
    }

    #[test]
    fn test_reject_set() {
        assert!(ResultCode::TcpReset.is_reject());
        assert!(ResultCode::Icmpv4NetUnreachable.is_reject());
        assert!(ResultCode::Icmpv4PrecedenceCutoff.is_reject());
        assert!(ResultCode::Icmpv6NoRoute.is_reject());
        assert!(ResultCode::Icmpv6HeadersTooLong.is_reject());
        assert!(!ResultCode::Ready.is_reject());
        assert!(!ResultCode::Pass.is_reject());
        assert!(!ResultCode::Error.is_reject());
    }

    #[test]
    fn test_mac_addr_parse_and_display() {
        let mac: MacAddr = "aa:bb:cc:dd:ee:ff".parse().unwrap();
        assert_eq!(mac.0, [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
        assert_eq!(mac.to_string(), "aa:bb:cc:dd:ee:ff");
        assert!("aa:bb:cc:dd:ee".parse::<MacAddr>().is_err());
        assert!("gg:bb:cc:dd:ee:ff".parse::<MacAddr>().is_err());
    }

    #[test]
    fn test_protocol_numbers() {
        assert_eq!(u16::from(Protocol::None), 0);
        assert_eq!(u16::from(Protocol::Tcp), 6);
        assert_eq!(u16::from(Protocol::Udp), 17);
        assert_eq!(Protocol::try_from(17u16).unwrap(), Protocol::Udp);
        assert!(Protocol::try_from(50u16).is_err());
    }
}
