//! fwprobe — distributed firewall and port-policy probe.
//!
//! A coordinator (`--server`) drives two agents on opposite sides of a
//! packet-filtering device. For each port in a range the sender agent
//! injects a crafted TCP/UDP probe toward the receiver agent; the receiver
//! reports whether the probe arrived and the sender reports any ICMP
//! destination-unreachable or TCP reset that came back. The coordinator
//! correlates both views into a per-port verdict of pass, reject, or drop,
//! and records header fields the filter rewrote along the way.
//!
//! Usable as a library for the protocol, plan, and packet pieces; the
//! binary wires them to real sockets and capture devices.

pub mod capture;
pub mod client;
pub mod config;
pub mod message;
pub mod packet;
pub mod plan;
pub mod receiver;
pub mod sender;
pub mod server;

pub use config::{parse_port_range, Cli, Config};
pub use message::{MacAddr, Message, Protocol, ResultCode, ResultMsg, TestDescriptor};
pub use plan::{Plan, PortClass};
