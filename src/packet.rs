//! Probe packet synthesis and captured-frame parsing.
//!
//! Probes are built byte-for-byte: Ethernet header from the descriptor MACs,
//! an IPv4 (DF, TTL 64) or IPv6 (hop limit 64) header chosen by the address
//! family, and a TCP SYN (window 64000) or empty UDP datagram on top, with
//! all length and checksum fields computed including the layer-4
//! pseudo-header. Parsing is the inverse view used by the receiver's match
//! predicate, the sender's response correlator, and the packet differ.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use rand::Rng;

use crate::message::{MacAddr, Protocol, TestDescriptor};

/// Ethernet header: dst(6) + src(6) + ethertype(2).
pub const ETH_HDR_LEN: usize = 14;
const IPV4_HDR_LEN: usize = 20;
const IPV6_HDR_LEN: usize = 40;
const TCP_HDR_LEN: usize = 20;
const UDP_HDR_LEN: usize = 8;

pub const ETHERTYPE_IPV4: u16 = 0x0800;
pub const ETHERTYPE_IPV6: u16 = 0x86dd;

pub const IPPROTO_ICMPV4: u8 = 1;
pub const IPPROTO_TCP: u8 = 6;
pub const IPPROTO_UDP: u8 = 17;
pub const IPPROTO_ICMPV6: u8 = 58;

/// ICMPv4 type 3: destination unreachable.
pub const ICMPV4_DEST_UNREACHABLE: u8 = 3;
/// ICMPv6 type 1: destination unreachable.
pub const ICMPV6_DEST_UNREACHABLE: u8 = 1;

pub const TCP_FLAG_SYN: u8 = 0x02;
pub const TCP_FLAG_RST: u8 = 0x04;

const PROBE_TTL: u8 = 64;
const PROBE_TCP_WINDOW: u16 = 64000;

/// Error synthesizing a probe from a test descriptor.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("descriptor is missing {0}")]
    MissingField(&'static str),

    #[error("source and destination IP address families differ")]
    AddressFamilyMismatch,

    #[error("no layer-4 protocol selected for the probe")]
    UnsupportedProtocol,
}

// ─────────────────────────────────────────────────────────────────────────────
// Synthesis
// ─────────────────────────────────────────────────────────────────────────────

/// Build the complete probe frame for a sender-side descriptor.
///
/// Requires both MACs, both IPs (same family), and a TCP or UDP protocol
/// selection; ports may be zero if the filter under test ignores them.
pub fn build_probe(test: &TestDescriptor) -> Result<Vec<u8>, ProbeError> {
    let src_mac = test.src_mac.ok_or(ProbeError::MissingField("source MAC"))?;
    let dst_mac = test
        .dst_mac
        .ok_or(ProbeError::MissingField("destination MAC"))?;
    let src_ip = test.src_ip.ok_or(ProbeError::MissingField("source IP"))?;
    let dst_ip = test
        .dst_ip
        .ok_or(ProbeError::MissingField("destination IP"))?;

    let (l4, proto) = match test.protocol {
        Protocol::Tcp => (build_tcp_syn(test.src_port, test.dst_port), IPPROTO_TCP),
        Protocol::Udp => (build_udp(test.src_port, test.dst_port), IPPROTO_UDP),
        Protocol::None => return Err(ProbeError::UnsupportedProtocol),
    };

    match (src_ip, dst_ip) {
        (IpAddr::V4(src), IpAddr::V4(dst)) => {
            Ok(assemble_v4(&src_mac, &dst_mac, src, dst, proto, l4))
        }
        (IpAddr::V6(src), IpAddr::V6(dst)) => {
            Ok(assemble_v6(&src_mac, &dst_mac, src, dst, proto, l4))
        }
        _ => Err(ProbeError::AddressFamilyMismatch),
    }
}

fn eth_header(frame: &mut Vec<u8>, src: &MacAddr, dst: &MacAddr, ethertype: u16) {
    frame.extend_from_slice(&dst.0);
    frame.extend_from_slice(&src.0);
    frame.extend_from_slice(&ethertype.to_be_bytes());
}

fn assemble_v4(
    src_mac: &MacAddr,
    dst_mac: &MacAddr,
    src: Ipv4Addr,
    dst: Ipv4Addr,
    proto: u8,
    mut l4: Vec<u8>,
) -> Vec<u8> {
    let total_len = (IPV4_HDR_LEN + l4.len()) as u16;
    let mut frame = Vec::with_capacity(ETH_HDR_LEN + total_len as usize);
    eth_header(&mut frame, src_mac, dst_mac, ETHERTYPE_IPV4);

    let mut ip = [0u8; IPV4_HDR_LEN];
    ip[0] = 0x45; // version 4, IHL 5
    ip[2..4].copy_from_slice(&total_len.to_be_bytes());
    let id: u16 = rand::thread_rng().gen();
    ip[4..6].copy_from_slice(&id.to_be_bytes());
    ip[6] = 0x40; // DF
    ip[8] = PROBE_TTL;
    ip[9] = proto;
    ip[12..16].copy_from_slice(&src.octets());
    ip[16..20].copy_from_slice(&dst.octets());
    let cksum = ones_complement_sum(&ip);
    ip[10..12].copy_from_slice(&cksum.to_be_bytes());

    let pseudo = pseudo_header_v4(src, dst, proto, l4.len());
    patch_l4_checksum(&mut l4, proto, &pseudo);
    frame.extend_from_slice(&ip);
    frame.extend_from_slice(&l4);
    frame
}

fn assemble_v6(
    src_mac: &MacAddr,
    dst_mac: &MacAddr,
    src: Ipv6Addr,
    dst: Ipv6Addr,
    proto: u8,
    mut l4: Vec<u8>,
) -> Vec<u8> {
    let mut frame = Vec::with_capacity(ETH_HDR_LEN + IPV6_HDR_LEN + l4.len());
    eth_header(&mut frame, src_mac, dst_mac, ETHERTYPE_IPV6);

    let mut ip = [0u8; IPV6_HDR_LEN];
    ip[0] = 0x60; // version 6
    ip[4..6].copy_from_slice(&(l4.len() as u16).to_be_bytes());
    ip[6] = proto;
    ip[7] = PROBE_TTL; // hop limit
    ip[8..24].copy_from_slice(&src.octets());
    ip[24..40].copy_from_slice(&dst.octets());

    let pseudo = pseudo_header_v6(src, dst, proto, l4.len());
    patch_l4_checksum(&mut l4, proto, &pseudo);
    frame.extend_from_slice(&ip);
    frame.extend_from_slice(&l4);
    frame
}

/// TCP header with SYN set and a random initial sequence number.
fn build_tcp_syn(src_port: u16, dst_port: u16) -> Vec<u8> {
    let mut tcp = vec![0u8; TCP_HDR_LEN];
    tcp[0..2].copy_from_slice(&src_port.to_be_bytes());
    tcp[2..4].copy_from_slice(&dst_port.to_be_bytes());
    let isn: u32 = rand::random();
    tcp[4..8].copy_from_slice(&isn.to_be_bytes());
    tcp[12] = ((TCP_HDR_LEN / 4) as u8) << 4; // data offset, no options
    tcp[13] = TCP_FLAG_SYN;
    tcp[14..16].copy_from_slice(&PROBE_TCP_WINDOW.to_be_bytes());
    tcp
}

/// Empty UDP datagram.
fn build_udp(src_port: u16, dst_port: u16) -> Vec<u8> {
    let mut udp = vec![0u8; UDP_HDR_LEN];
    udp[0..2].copy_from_slice(&src_port.to_be_bytes());
    udp[2..4].copy_from_slice(&dst_port.to_be_bytes());
    udp[4..6].copy_from_slice(&(UDP_HDR_LEN as u16).to_be_bytes());
    udp
}

fn pseudo_header_v4(src: Ipv4Addr, dst: Ipv4Addr, proto: u8, l4_len: usize) -> Vec<u8> {
    let mut pseudo = Vec::with_capacity(12);
    pseudo.extend_from_slice(&src.octets());
    pseudo.extend_from_slice(&dst.octets());
    pseudo.push(0);
    pseudo.push(proto);
    pseudo.extend_from_slice(&(l4_len as u16).to_be_bytes());
    pseudo
}

fn pseudo_header_v6(src: Ipv6Addr, dst: Ipv6Addr, proto: u8, l4_len: usize) -> Vec<u8> {
    let mut pseudo = Vec::with_capacity(40);
    pseudo.extend_from_slice(&src.octets());
    pseudo.extend_from_slice(&dst.octets());
    pseudo.extend_from_slice(&(l4_len as u32).to_be_bytes());
    pseudo.extend_from_slice(&[0, 0, 0]);
    pseudo.push(proto);
    pseudo
}

/// Compute and store the layer-4 checksum over pseudo-header + segment.
///
/// The checksum field offset differs between TCP (16) and UDP (6). A UDP
/// checksum of zero means "not computed" on the wire, so an actual zero is
/// substituted with 0xffff.
fn patch_l4_checksum(l4: &mut [u8], proto: u8, pseudo: &[u8]) {
    let mut data = Vec::with_capacity(pseudo.len() + l4.len());
    data.extend_from_slice(pseudo);
    data.extend_from_slice(l4);
    let mut cksum = ones_complement_sum(&data);
    let offset = match proto {
        IPPROTO_TCP => 16,
        IPPROTO_UDP => {
            if cksum == 0 {
                cksum = 0xffff;
            }
            6
        }
        _ => return,
    };
    l4[offset..offset + 2].copy_from_slice(&cksum.to_be_bytes());
}

/// Internet checksum: one's complement of the one's complement sum of
/// 16-bit big-endian words, odd trailing byte padded with zero.
pub fn ones_complement_sum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut i = 0;
    while i + 1 < data.len() {
        sum += u16::from_be_bytes([data[i], data[i + 1]]) as u32;
        i += 2;
    }
    if i < data.len() {
        sum += (data[i] as u32) << 8;
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

// ─────────────────────────────────────────────────────────────────────────────
// Parsing
// ─────────────────────────────────────────────────────────────────────────────

/// Parsed Ethernet header.
#[derive(Debug, Clone, PartialEq)]
pub struct EthHeader {
    pub dst: MacAddr,
    pub src: MacAddr,
    pub ethertype: u16,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Ipv4Header {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub protocol: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Ipv6Header {
    pub src: Ipv6Addr,
    pub dst: Ipv6Addr,
    pub next_header: u8,
}

/// Ports of a TCP or UDP header; `flags` is zero for UDP.
#[derive(Debug, Clone, PartialEq)]
pub struct L4Header {
    pub src_port: u16,
    pub dst_port: u16,
    pub flags: u8,
}

/// An ICMP message with the quoted original packet that follows its header.
#[derive(Debug, Clone, PartialEq)]
pub struct IcmpMsg {
    pub icmp_type: u8,
    pub code: u8,
    /// Bytes after the 8-byte ICMP header: the embedded original IP packet.
    pub embedded: Vec<u8>,
}

/// Layered view of a captured Ethernet frame. Layers the frame does not
/// carry are `None`; a frame too short for its declared layers fails to
/// parse entirely.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedFrame {
    pub eth: EthHeader,
    pub ipv4: Option<Ipv4Header>,
    pub ipv6: Option<Ipv6Header>,
    pub tcp: Option<L4Header>,
    pub udp: Option<L4Header>,
    pub icmpv4: Option<IcmpMsg>,
    pub icmpv6: Option<IcmpMsg>,
}

/// Parse a captured frame from the Ethernet header down.
pub fn parse_frame(bytes: &[u8]) -> Option<ParsedFrame> {
    if bytes.len() < ETH_HDR_LEN {
        return None;
    }
    let eth = EthHeader {
        dst: MacAddr(bytes[0..6].try_into().ok()?),
        src: MacAddr(bytes[6..12].try_into().ok()?),
        ethertype: u16::from_be_bytes([bytes[12], bytes[13]]),
    };

    let mut frame = ParsedFrame {
        eth,
        ipv4: None,
        ipv6: None,
        tcp: None,
        udp: None,
        icmpv4: None,
        icmpv6: None,
    };

    match frame.eth.ethertype {
        ETHERTYPE_IPV4 => parse_ipv4(&bytes[ETH_HDR_LEN..], &mut frame)?,
        ETHERTYPE_IPV6 => parse_ipv6(&bytes[ETH_HDR_LEN..], &mut frame)?,
        _ => {}
    }
    Some(frame)
}

fn parse_ipv4(bytes: &[u8], frame: &mut ParsedFrame) -> Option<()> {
    if bytes.len() < IPV4_HDR_LEN || bytes[0] >> 4 != 4 {
        return None;
    }
    let header_len = ((bytes[0] & 0x0f) as usize) * 4;
    if header_len < IPV4_HDR_LEN || bytes.len() < header_len {
        return None;
    }
    let protocol = bytes[9];
    frame.ipv4 = Some(Ipv4Header {
        src: Ipv4Addr::new(bytes[12], bytes[13], bytes[14], bytes[15]),
        dst: Ipv4Addr::new(bytes[16], bytes[17], bytes[18], bytes[19]),
        protocol,
    });
    parse_l4(&bytes[header_len..], protocol, frame)
}

fn parse_ipv6(bytes: &[u8], frame: &mut ParsedFrame) -> Option<()> {
    if bytes.len() < IPV6_HDR_LEN || bytes[0] >> 4 != 6 {
        return None;
    }
    let next_header = bytes[6];
    frame.ipv6 = Some(Ipv6Header {
        src: Ipv6Addr::from(<[u8; 16]>::try_from(&bytes[8..24]).ok()?),
        dst: Ipv6Addr::from(<[u8; 16]>::try_from(&bytes[24..40]).ok()?),
        next_header,
    });
    parse_l4(&bytes[IPV6_HDR_LEN..], next_header, frame)
}

fn parse_l4(bytes: &[u8], protocol: u8, frame: &mut ParsedFrame) -> Option<()> {
    match protocol {
        IPPROTO_TCP => {
            if bytes.len() < TCP_HDR_LEN {
                return None;
            }
            frame.tcp = Some(L4Header {
                src_port: u16::from_be_bytes([bytes[0], bytes[1]]),
                dst_port: u16::from_be_bytes([bytes[2], bytes[3]]),
                flags: bytes[13],
            });
        }
        IPPROTO_UDP => {
            if bytes.len() < UDP_HDR_LEN {
                return None;
            }
            frame.udp = Some(L4Header {
                src_port: u16::from_be_bytes([bytes[0], bytes[1]]),
                dst_port: u16::from_be_bytes([bytes[2], bytes[3]]),
                flags: 0,
            });
        }
        IPPROTO_ICMPV4 => {
            if bytes.len() < 8 {
                return None;
            }
            frame.icmpv4 = Some(IcmpMsg {
                icmp_type: bytes[0],
                code: bytes[1],
                embedded: bytes[8..].to_vec(),
            });
        }
        IPPROTO_ICMPV6 => {
            if bytes.len() < 8 {
                return None;
            }
            frame.icmpv6 = Some(IcmpMsg {
                icmp_type: bytes[0],
                code: bytes[1],
                embedded: bytes[8..].to_vec(),
            });
        }
        _ => {}
    }
    Some(())
}

impl ParsedFrame {
    /// Source IP of whichever IP layer the frame carries.
    pub fn src_ip(&self) -> Option<IpAddr> {
        self.ipv4
            .as_ref()
            .map(|ip| IpAddr::V4(ip.src))
            .or_else(|| self.ipv6.as_ref().map(|ip| IpAddr::V6(ip.src)))
    }

    /// Destination IP of whichever IP layer the frame carries.
    pub fn dst_ip(&self) -> Option<IpAddr> {
        self.ipv4
            .as_ref()
            .map(|ip| IpAddr::V4(ip.dst))
            .or_else(|| self.ipv6.as_ref().map(|ip| IpAddr::V6(ip.dst)))
    }

    /// TCP or UDP header, whichever the frame carries.
    pub fn l4(&self) -> Option<&L4Header> {
        self.tcp.as_ref().or(self.udp.as_ref())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Embedded original packets (ICMP payloads)
// ─────────────────────────────────────────────────────────────────────────────

/// Four-tuple and protocol of the original packet quoted in an ICMP error.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddedPacket {
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
    pub protocol: u8,
    pub src_port: u16,
    pub dst_port: u16,
}

/// Parse the original IPv4 packet quoted in an ICMPv4 error payload.
///
/// ICMP quotes the full IP header plus at least the first 8 bytes of the
/// original layer-4 header, which is exactly enough for both ports.
pub fn parse_embedded_ipv4(bytes: &[u8]) -> Option<EmbeddedPacket> {
    if bytes.len() < IPV4_HDR_LEN || bytes[0] >> 4 != 4 {
        return None;
    }
    let header_len = ((bytes[0] & 0x0f) as usize) * 4;
    if header_len < IPV4_HDR_LEN || bytes.len() < header_len + 4 {
        return None;
    }
    let l4 = &bytes[header_len..];
    Some(EmbeddedPacket {
        src_ip: IpAddr::V4(Ipv4Addr::new(bytes[12], bytes[13], bytes[14], bytes[15])),
        dst_ip: IpAddr::V4(Ipv4Addr::new(bytes[16], bytes[17], bytes[18], bytes[19])),
        protocol: bytes[9],
        src_port: u16::from_be_bytes([l4[0], l4[1]]),
        dst_port: u16::from_be_bytes([l4[2], l4[3]]),
    })
}

/// Parse the original IPv6 packet quoted in an ICMPv6 error payload.
pub fn parse_embedded_ipv6(bytes: &[u8]) -> Option<EmbeddedPacket> {
    if bytes.len() < IPV6_HDR_LEN + 4 || bytes[0] >> 4 != 6 {
        return None;
    }
    let l4 = &bytes[IPV6_HDR_LEN..];
    Some(EmbeddedPacket {
        src_ip: IpAddr::V6(Ipv6Addr::from(<[u8; 16]>::try_from(&bytes[8..24]).ok()?)),
        dst_ip: IpAddr::V6(Ipv6Addr::from(<[u8; 16]>::try_from(&bytes[24..40]).ok()?)),
        protocol: bytes[6],
        src_port: u16::from_be_bytes([l4[0], l4[1]]),
        dst_port: u16::from_be_bytes([l4[2], l4[3]]),
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
