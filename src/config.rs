//! Command line parsing and the immutable run configuration.
//!
//! One binary serves all three roles; `--server` selects the coordinator,
//! everything else describes the agents and the probes the coordinator
//! plans. Sender-side and receiver-side addresses are configured separately
//! because the packet filter between them may rewrite either view.

use std::net::IpAddr;
use std::path::PathBuf;

use clap::Parser;

use crate::message::{MacAddr, Protocol};

/// fwprobe — distributed firewall and port-policy probe.
#[derive(Parser, Debug)]
#[command(name = "fwprobe", version, about)]
#[command(
    long_about = "fwprobe drives a sender and a receiver agent on opposite sides of a \
    packet-filtering device. For each port in a range the sender injects a crafted \
    TCP/UDP probe and the coordinator classifies the port as pass, reject, or drop \
    from what the receiver captured and what the filter answered. Agents need raw \
    packet capture privileges (CAP_NET_RAW) on their capture devices."
)]
pub struct Cli {
    /// Run as the coordinator instead of an agent
    #[arg(long)]
    pub server: bool,

    /// Coordinator address to bind (server) or dial (agent)
    #[arg(long, default_value = "127.0.0.1:32323")]
    pub address: String,

    /// Id of this agent (1-255)
    #[arg(long, default_value_t = 1)]
    pub id: u8,

    /// Id of the sender agent
    #[arg(long, default_value_t = 1)]
    pub sender_id: u8,

    /// Id of the receiver agent
    #[arg(long, default_value_t = 2)]
    pub receiver_id: u8,

    /// Capture device on the sender side
    #[arg(long, default_value = "")]
    pub sender_device: String,

    /// Capture device on the receiver side
    #[arg(long, default_value = "")]
    pub receiver_device: String,

    /// Source MAC of the probe as the sender builds it
    #[arg(long)]
    pub sender_src_mac: Option<MacAddr>,

    /// Destination MAC of the probe as the sender builds it
    #[arg(long)]
    pub sender_dst_mac: Option<MacAddr>,

    /// Source MAC the receiver expects to capture
    #[arg(long)]
    pub receiver_src_mac: Option<MacAddr>,

    /// Destination MAC the receiver expects to capture
    #[arg(long)]
    pub receiver_dst_mac: Option<MacAddr>,

    /// Source IP of the probe as the sender builds it
    #[arg(long)]
    pub sender_src_ip: Option<IpAddr>,

    /// Destination IP of the probe as the sender builds it
    #[arg(long)]
    pub sender_dst_ip: Option<IpAddr>,

    /// Source IP the receiver expects to capture
    #[arg(long)]
    pub receiver_src_ip: Option<IpAddr>,

    /// Destination IP the receiver expects to capture
    #[arg(long)]
    pub receiver_dst_ip: Option<IpAddr>,

    /// Layer-4 protocol of the probes
    #[arg(long, value_enum, default_value_t = Protocol::Tcp)]
    pub protocol: Protocol,

    /// Source port of the probes (0 = unset)
    #[arg(long, default_value_t = 0)]
    pub src_port: u16,

    /// Destination port range: "N" or "first:last"
    #[arg(long, default_value = "1:65535")]
    pub ports: String,

    /// Write the full plan with all results as indented JSON to this file
    #[arg(long)]
    pub results_file: Option<PathBuf>,
}

/// Parsed configuration, immutable for the lifetime of the run.
#[derive(Debug, Clone)]
pub struct Config {
    pub server_mode: bool,
    pub address: String,
    pub id: u8,
    pub sender_id: u8,
    pub receiver_id: u8,
    pub sender_device: String,
    pub receiver_device: String,
    pub sender_src_mac: Option<MacAddr>,
    pub sender_dst_mac: Option<MacAddr>,
    pub receiver_src_mac: Option<MacAddr>,
    pub receiver_dst_mac: Option<MacAddr>,
    pub sender_src_ip: Option<IpAddr>,
    pub sender_dst_ip: Option<IpAddr>,
    pub receiver_src_ip: Option<IpAddr>,
    pub receiver_dst_ip: Option<IpAddr>,
    pub protocol: Protocol,
    pub src_port: u16,
    pub port_range: String,
    pub results_file: Option<PathBuf>,
}

impl From<Cli> for Config {
    fn from(cli: Cli) -> Self {
        Config {
            server_mode: cli.server,
            address: cli.address,
            id: cli.id,
            sender_id: cli.sender_id,
            receiver_id: cli.receiver_id,
            sender_device: cli.sender_device,
            receiver_device: cli.receiver_device,
            sender_src_mac: cli.sender_src_mac,
            sender_dst_mac: cli.sender_dst_mac,
            receiver_src_mac: cli.receiver_src_mac,
            receiver_dst_mac: cli.receiver_dst_mac,
            sender_src_ip: cli.sender_src_ip,
            sender_dst_ip: cli.sender_dst_ip,
            receiver_src_ip: cli.receiver_src_ip,
            receiver_dst_ip: cli.receiver_dst_ip,
            protocol: cli.protocol,
            src_port: cli.src_port,
            port_range: cli.ports,
            results_file: cli.results_file,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server_mode: false,
            address: "127.0.0.1:32323".to_string(),
            id: 1,
            sender_id: 1,
            receiver_id: 2,
            sender_device: String::new(),
            receiver_device: String::new(),
            sender_src_mac: None,
            sender_dst_mac: None,
            receiver_src_mac: None,
            receiver_dst_mac: None,
            sender_src_ip: None,
            sender_dst_ip: None,
            receiver_src_ip: None,
            receiver_dst_ip: None,
            protocol: Protocol::Tcp,
            src_port: 0,
            port_range: "1:65535".to_string(),
            results_file: None,
        }
    }
}

/// Parse a destination port range expression.
///
/// `"N"` is the single port `N`, `"a:b"` the inclusive range. Ports are
/// 1-65535 and the range must not be descending. Every other form,
/// including the empty string, is invalid and yields `None` (the plan built
/// from it is empty).
pub fn parse_port_range(s: &str) -> Option<(u16, u16)> {
    fn port(p: &str) -> Option<u16> {
        let v: u32 = p.parse().ok()?;
        if (1..=65535).contains(&v) {
            Some(v as u16)
        } else {
            None
        }
    }

    match s.split_once(':') {
        Some((first, last)) => {
            let first = port(first)?;
            let last = port(last)?;
            if first <= last {
                Some((first, last))
            } else {
                None
            }
        }
        None => port(s).map(|p| (p, p)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_ports() {
        assert_eq!(parse_port_range("1"), Some((1, 1)));
        assert_eq!(parse_port_range("1024"), Some((1024, 1024)));
        assert_eq!(parse_port_range("65535"), Some((65535, 65535)));
    }

    #[test]
    fn test_parse_ranges() {
        assert_eq!(parse_port_range("1:1024"), Some((1, 1024)));
        assert_eq!(parse_port_range("1024:32000"), Some((1024, 32000)));
        assert_eq!(parse_port_range("32000:65535"), Some((32000, 65535)));
        assert_eq!(parse_port_range("1:65535"), Some((1, 65535)));
    }

    #[test]
    fn test_parse_invalid_ranges() {
        assert_eq!(parse_port_range("0"), None);
        assert_eq!(parse_port_range("0:0"), None);
        assert_eq!(parse_port_range("1024:3"), None);
        assert_eq!(parse_port_range("65536"), None);
        assert_eq!(parse_port_range("65555"), None);
        assert_eq!(parse_port_range("100000"), None);
        assert_eq!(parse_port_range("65534:65555"), None);
        assert_eq!(parse_port_range(""), None);
        assert_eq!(parse_port_range("abc"), None);
        assert_eq!(parse_port_range("80:"), None);
        assert_eq!(parse_port_range(":80"), None);
    }

    #[test]
    fn test_default_config_covers_full_range() {
        let config = Config::default();
        assert_eq!(parse_port_range(&config.port_range), Some((1, 65535)));
    }

    #[test]
    fn test_cli_parses_agent_flags() {
        let cli = Cli::parse_from([
            "fwprobe",
            "--address",
            "10.0.0.1:32323",
            "--id",
            "2",
            "--receiver-device",
            "eth1",
        ]);
        let config = Config::from(cli);
        assert!(!config.server_mode);
        assert_eq!(config.address, "10.0.0.1:32323");
        assert_eq!(config.id, 2);
        assert_eq!(config.receiver_device, "eth1");
        assert_eq!(config.protocol, Protocol::Tcp);
    }

    #[test]
    fn test_cli_parses_server_flags() {
        let cli = Cli::parse_from([
            "fwprobe",
            "--server",
            "--ports",
            "1024:1032",
            "--protocol",
            "udp",
            "--sender-src-mac",
            "aa:bb:cc:dd:ee:ff",
            "--sender-src-ip",
            "10.0.1.1",
        ]);
        let config = Config::from(cli);
        assert!(config.server_mode);
        assert_eq!(config.port_range, "1024:1032");
        assert_eq!(config.protocol, Protocol::Udp);
        assert_eq!(
            config.sender_src_mac.unwrap().to_string(),
            "aa:bb:cc:dd:ee:ff"
        );
        assert_eq!(config.sender_src_ip.unwrap().to_string(), "10.0.1.1");
    }

    #[test]
    fn test_cli_rejects_oversized_id() {
        assert!(Cli::try_parse_from(["fwprobe", "--id", "256"]).is_err());
    }
}
