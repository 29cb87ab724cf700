//! Test execution plan, result routing, and port classification.
//!
//! The plan is built once from the configuration and owned exclusively by
//! the coordinator's event loop: one item per destination port, each
//! carrying the sender-side and receiver-side test descriptors. Results
//! stream in keyed by item id and are reconciled against the right item
//! regardless of which port is currently being probed. At shutdown the
//! classifier folds each item into pass, reject, or drop and renders
//! adjacent identical classifications as ranges.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::{parse_port_range, Config};
use crate::message::{ResultCode, ResultMsg, TestDescriptor};
use crate::packet;

// ─────────────────────────────────────────────────────────────────────────────
// Packet diffs
// ─────────────────────────────────────────────────────────────────────────────

/// Header field compared between the probe as configured and as captured.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum DiffField {
    SrcMac,
    DstMac,
    SrcIp,
    DstIp,
    SrcPort,
    DstPort,
}

impl fmt::Display for DiffField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiffField::SrcMac => write!(f, "SrcMAC"),
            DiffField::DstMac => write!(f, "DstMAC"),
            DiffField::SrcIp => write!(f, "SrcIP"),
            DiffField::DstIp => write!(f, "DstIP"),
            DiffField::SrcPort => write!(f, "SrcPort"),
            DiffField::DstPort => write!(f, "DstPort"),
        }
    }
}

/// One field rewritten between sender and receiver, evidence of NAT or
/// similar rewriting by the device under test.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Diff {
    pub field: DiffField,
    pub sent: String,
    pub observed: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Plan items
// ─────────────────────────────────────────────────────────────────────────────

/// One per-port test with everything observed about it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanItem {
    pub id: u32,
    pub port: u16,
    pub sender_msg: TestDescriptor,
    pub receiver_msg: TestDescriptor,
    pub receiver_ready: bool,
    pub sender_results: Vec<ResultMsg>,
    pub receiver_results: Vec<ResultMsg>,
    pub packet_diffs: BTreeSet<Diff>,
}

impl PlanItem {
    fn new(id: u32, port: u16, config: &Config) -> Self {
        let sender_msg = TestDescriptor {
            id,
            initiate: true,
            device: config.sender_device.clone(),
            src_mac: config.sender_src_mac,
            dst_mac: config.sender_dst_mac,
            src_ip: config.sender_src_ip,
            dst_ip: config.sender_dst_ip,
            protocol: config.protocol,
            src_port: config.src_port,
            dst_port: port,
        };
        let receiver_msg = TestDescriptor {
            id,
            initiate: false,
            device: config.receiver_device.clone(),
            src_mac: config.receiver_src_mac,
            dst_mac: config.receiver_dst_mac,
            src_ip: config.receiver_src_ip,
            dst_ip: config.receiver_dst_ip,
            protocol: config.protocol,
            src_port: config.src_port,
            dst_port: port,
        };
        PlanItem {
            id,
            port,
            sender_msg,
            receiver_msg,
            receiver_ready: false,
            sender_results: Vec::new(),
            receiver_results: Vec::new(),
            packet_diffs: BTreeSet::new(),
        }
    }

    /// Classify this port, by priority: pass beats reject beats drop.
    /// Anything without pass or reject evidence is a drop, including ports
    /// that only collected non-signal results such as `Error` — every
    /// probed port shows up in the report.
    pub fn classify(&self) -> PortClass {
        if self
            .receiver_results
            .iter()
            .any(|r| r.result == ResultCode::Pass)
        {
            return PortClass::Pass;
        }
        if self.sender_results.iter().any(|r| r.result.is_reject()) {
            return PortClass::Reject;
        }
        PortClass::Drop
    }

    /// Record differences between the configured probe and the captured
    /// packet. Only configured sender-side fields participate; duplicates
    /// collapse through set semantics.
    fn accumulate_diffs(&mut self, captured: &[u8]) {
        let Some(frame) = packet::parse_frame(captured) else {
            tracing::debug!(id = self.id, "captured pass packet does not parse, no diff");
            return;
        };
        let sent = &self.sender_msg;
        let mut diffs: Vec<Diff> = Vec::new();
        let mut record = |field: DiffField, sent: String, observed: String| {
            if sent != observed {
                diffs.push(Diff {
                    field,
                    sent,
                    observed,
                });
            }
        };

        if let Some(mac) = sent.src_mac {
            record(DiffField::SrcMac, mac.to_string(), frame.eth.src.to_string());
        }
        if let Some(mac) = sent.dst_mac {
            record(DiffField::DstMac, mac.to_string(), frame.eth.dst.to_string());
        }
        if let (Some(ip), Some(observed)) = (sent.src_ip, frame.src_ip()) {
            record(DiffField::SrcIp, ip.to_string(), observed.to_string());
        }
        if let (Some(ip), Some(observed)) = (sent.dst_ip, frame.dst_ip()) {
            record(DiffField::DstIp, ip.to_string(), observed.to_string());
        }
        if let Some(l4) = frame.l4() {
            if sent.src_port != 0 {
                record(
                    DiffField::SrcPort,
                    sent.src_port.to_string(),
                    l4.src_port.to_string(),
                );
            }
            if sent.dst_port != 0 {
                record(
                    DiffField::DstPort,
                    sent.dst_port.to_string(),
                    l4.dst_port.to_string(),
                );
            }
        }
        drop(record);
        self.packet_diffs.extend(diffs);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Classification
// ─────────────────────────────────────────────────────────────────────────────

/// Verdict for one port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PortClass {
    /// Probe reached the receiver.
    Pass,
    /// The filter answered with a rejection indication.
    Reject,
    /// No evidence either way within the timeout.
    Drop,
}

impl fmt::Display for PortClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortClass::Pass => write!(f, "pass"),
            PortClass::Reject => write!(f, "reject"),
            PortClass::Drop => write!(f, "drop"),
        }
    }
}

/// A run of adjacent ports sharing one classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedRange {
    pub class: PortClass,
    pub first: u16,
    pub last: u16,
}

// ─────────────────────────────────────────────────────────────────────────────
// Plan
// ─────────────────────────────────────────────────────────────────────────────

/// The ordered set of per-port tests and the run state around them.
#[derive(Debug)]
pub struct Plan {
    sender_id: u8,
    receiver_id: u8,
    items: BTreeMap<u32, PlanItem>,
    current: u32,
    sender_active: bool,
    receiver_active: bool,
}

impl Plan {
    /// Build the plan for the configured port range. An invalid range
    /// yields an empty plan, which is a legal terminal state.
    pub fn new(config: &Config) -> Self {
        let mut items = BTreeMap::new();
        if let Some((first, last)) = parse_port_range(&config.port_range) {
            for (id, port) in (first..=last).enumerate() {
                let id = id as u32;
                items.insert(id, PlanItem::new(id, port, config));
            }
        } else if !config.port_range.is_empty() {
            tracing::warn!(range = %config.port_range, "invalid port range, plan is empty");
        }
        Plan {
            sender_id: config.sender_id,
            receiver_id: config.receiver_id,
            items,
            current: 0,
            sender_active: false,
            receiver_active: false,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn receiver_id(&self) -> u8 {
        self.receiver_id
    }

    pub fn sender_id(&self) -> u8 {
        self.sender_id
    }

    /// Mark the registering client active if it plays a role in this plan.
    pub fn handle_client(&mut self, client_id: u8) {
        if client_id == self.sender_id {
            self.sender_active = true;
        }
        if client_id == self.receiver_id {
            self.receiver_active = true;
        }
    }

    /// Both sender and receiver have registered.
    pub fn clients_active(&self) -> bool {
        self.sender_active && self.receiver_active
    }

    /// The item being probed right now.
    pub fn current_item(&self) -> Option<&PlanItem> {
        self.items.get(&self.current)
    }

    /// Advance to the next item and return it.
    pub fn next_item(&mut self) -> Option<&PlanItem> {
        self.current += 1;
        self.items.get(&self.current)
    }

    /// Route one result into its plan item.
    ///
    /// Returns true only when this call transitioned the item's
    /// `receiver_ready` from false to true, so the caller can trigger the
    /// sender exactly once per item. Results for unknown items or from
    /// clients playing neither role are logged and dropped.
    pub fn handle_result(&mut self, client_id: u8, result: ResultMsg) -> bool {
        let Some(item) = self.items.get_mut(&result.id) else {
            tracing::warn!(client = client_id, id = result.id, "result for unknown plan item");
            return false;
        };

        if client_id == self.sender_id {
            item.sender_results.push(result);
            return false;
        }
        if client_id == self.receiver_id {
            match result.result {
                ResultCode::Ready => {
                    if item.receiver_ready {
                        tracing::warn!(id = result.id, "duplicate ready from receiver");
                        return false;
                    }
                    item.receiver_ready = true;
                    return true;
                }
                ResultCode::Pass => {
                    let captured = result.packet.clone();
                    item.accumulate_diffs(&captured);
                    item.receiver_results.push(result);
                }
                _ => item.receiver_results.push(result),
            }
            return false;
        }

        tracing::warn!(
            client = client_id,
            id = result.id,
            "result from client that is neither sender nor receiver"
        );
        false
    }

    /// Fold items into the minimal list of classified port ranges.
    pub fn classified_ranges(&self) -> Vec<ClassifiedRange> {
        let mut ranges: Vec<ClassifiedRange> = Vec::new();
        for item in self.items.values() {
            let class = item.classify();
            match ranges.last_mut() {
                Some(last) if last.class == class && item.port == last.last.wrapping_add(1) => {
                    last.last = item.port;
                }
                _ => ranges.push(ClassifiedRange {
                    class,
                    first: item.port,
                    last: item.port,
                }),
            }
        }
        ranges
    }

    /// Render the classification report.
    pub fn format_results(&self) -> String {
        let mut out = String::from("Printing results:\n");
        for range in self.classified_ranges() {
            if range.first == range.last {
                out.push_str(&format!("{}\t{}\n", range.first, range.class));
            } else {
                out.push_str(&format!("{}:{}\t{}\n", range.first, range.last, range.class));
            }
        }
        out
    }

    /// Render per-port packet differences; empty when nothing was rewritten.
    pub fn format_packet_diffs(&self) -> String {
        let mut out = String::new();
        for item in self.items.values() {
            if item.packet_diffs.is_empty() {
                continue;
            }
            out.push_str(&format!("Port {} packet differences:\n", item.port));
            for diff in &item.packet_diffs {
                out.push_str(&format!(
                    "{}: {} -> {}\n",
                    diff.field, diff.sent, diff.observed
                ));
            }
        }
        out
    }

    /// Serialize all items with their descriptors and results as indented
    /// JSON for the optional results file.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.items)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Protocol;

    fn plan_for(range: &str) -> Plan {
        let config = Config {
            port_range: range.to_string(),
            ..Config::default()
        };
        Plan::new(&config)
    }

    fn pass(plan: &mut Plan, id: u32) {
        plan.handle_result(
            plan.receiver_id(),
            ResultMsg::new(id, ResultCode::Pass),
        );
    }

    fn reset(plan: &mut Plan, id: u32) {
        plan.handle_result(
            plan.sender_id(),
            ResultMsg::new(id, ResultCode::TcpReset),
        );
    }

    // ── plan creation ───────────────────────────────────────────────────────

    #[test]
    fn test_plan_sizes() {
        let cases = [
            ("1", 1),
            ("1024", 1),
            ("65535", 1),
            ("1:1024", 1024),
            ("1024:32000", 30977),
            ("32000:65535", 33536),
            ("1:65535", 65535),
            ("0", 0),
            ("0:0", 0),
            ("1024:3", 0),
            ("65536", 0),
            ("65555", 0),
            ("100000", 0),
            ("65534:65555", 0),
            ("", 0),
        ];
        for (range, want) in cases {
            assert_eq!(plan_for(range).len(), want, "range '{range}'");
        }
    }

    #[test]
    fn test_plan_item_invariants() {
        let plan = plan_for("1024:1032");
        for (id, item) in &plan.items {
            assert_eq!(item.id, *id);
            assert_eq!(item.port, 1024 + *id as u16);
            assert!(item.sender_msg.initiate);
            assert!(!item.receiver_msg.initiate);
            assert_eq!(item.sender_msg.dst_port, item.port);
            assert_eq!(item.receiver_msg.dst_port, item.port);
            assert_eq!(item.sender_msg.id, *id);
            assert_eq!(item.receiver_msg.id, *id);
        }
    }

    #[test]
    fn test_plan_descriptors_carry_config_sides() {
        let config = Config {
            port_range: "80".to_string(),
            sender_device: "eth0".to_string(),
            receiver_device: "eth1".to_string(),
            sender_src_ip: Some("10.0.1.1".parse().unwrap()),
            receiver_src_ip: Some("10.0.2.1".parse().unwrap()),
            protocol: Protocol::Udp,
            src_port: 4242,
            ..Config::default()
        };
        let plan = Plan::new(&config);
        let item = plan.current_item().unwrap();
        assert_eq!(item.sender_msg.device, "eth0");
        assert_eq!(item.receiver_msg.device, "eth1");
        assert_eq!(item.sender_msg.src_ip, config.sender_src_ip);
        assert_eq!(item.receiver_msg.src_ip, config.receiver_src_ip);
        assert_eq!(item.sender_msg.protocol, Protocol::Udp);
        assert_eq!(item.sender_msg.src_port, 4242);
    }

    // ── registration and progression ────────────────────────────────────────

    #[test]
    fn test_clients_active_needs_both_roles() {
        let mut plan = plan_for("80");
        assert!(!plan.clients_active());
        plan.handle_client(1);
        assert!(!plan.clients_active());
        plan.handle_client(2);
        assert!(plan.clients_active());
    }

    #[test]
    fn test_unrelated_client_does_not_activate() {
        let mut plan = plan_for("80");
        plan.handle_client(9);
        assert!(!plan.clients_active());
    }

    #[test]
    fn test_item_progression() {
        let mut plan = plan_for("1024:1026");
        assert_eq!(plan.current_item().unwrap().port, 1024);
        assert_eq!(plan.next_item().unwrap().port, 1025);
        assert_eq!(plan.next_item().unwrap().port, 1026);
        assert!(plan.next_item().is_none());
        assert!(plan.current_item().is_none());
    }

    // ── result routing ──────────────────────────────────────────────────────

    #[test]
    fn test_ready_transition_reported_once() {
        let mut plan = plan_for("1024:1032");
        let fresh = plan.handle_result(2, ResultMsg::new(0, ResultCode::Ready));
        assert!(fresh, "first ready must report the transition");
        assert!(plan.current_item().unwrap().receiver_ready);

        let again = plan.handle_result(2, ResultMsg::new(0, ResultCode::Ready));
        assert!(!again, "duplicate ready must be ignored");
    }

    #[test]
    fn test_result_for_unknown_item_ignored() {
        let mut plan = plan_for("1024:1032");
        assert!(!plan.handle_result(2, ResultMsg::new(999, ResultCode::Pass)));
        for item in plan.items.values() {
            assert!(item.receiver_results.is_empty());
        }
    }

    #[test]
    fn test_result_from_foreign_client_ignored() {
        let mut plan = plan_for("1024:1032");
        plan.handle_result(42, ResultMsg::new(0, ResultCode::Pass));
        assert!(plan.current_item().unwrap().receiver_results.is_empty());
        assert!(plan.current_item().unwrap().sender_results.is_empty());
    }

    #[test]
    fn test_results_keyed_by_id_not_current() {
        let mut plan = plan_for("1024:1032");
        plan.next_item();
        plan.next_item();
        // A result for item 0 lands on item 0 even though item 2 is current.
        plan.handle_result(2, ResultMsg::new(0, ResultCode::Pass));
        assert_eq!(plan.items[&0].receiver_results.len(), 1);
        assert!(plan.items[&2].receiver_results.is_empty());
    }

    #[test]
    fn test_sender_results_appended() {
        let mut plan = plan_for("1024:1032");
        plan.handle_result(1, ResultMsg::new(3, ResultCode::TcpReset));
        plan.handle_result(1, ResultMsg::new(3, ResultCode::Icmpv4PortUnreachable));
        assert_eq!(plan.items[&3].sender_results.len(), 2);
    }

    // ── classification scenarios ────────────────────────────────────────────

    #[test]
    fn test_default_range_all_drop() {
        let plan = Plan::new(&Config::default());
        assert_eq!(plan.format_results(), "Printing results:\n1:65535\tdrop\n");
    }

    #[test]
    fn test_small_range_all_drop() {
        let plan = plan_for("1024:1032");
        assert_eq!(plan.format_results(), "Printing results:\n1024:1032\tdrop\n");
    }

    #[test]
    fn test_mixed_drop_and_pass() {
        let mut plan = plan_for("1024:1032");
        for id in 3..=5 {
            pass(&mut plan, id);
        }
        assert_eq!(
            plan.format_results(),
            "Printing results:\n1024:1026\tdrop\n1027:1029\tpass\n1030:1032\tdrop\n"
        );
    }

    #[test]
    fn test_mixed_drop_and_reset() {
        let mut plan = plan_for("1024:1032");
        for id in 3..=5 {
            reset(&mut plan, id);
        }
        assert_eq!(
            plan.format_results(),
            "Printing results:\n1024:1026\tdrop\n1027:1029\treject\n1030:1032\tdrop\n"
        );
    }

    #[test]
    fn test_uniform_reject() {
        let mut plan = plan_for("1024:1032");
        for id in 0..9 {
            reset(&mut plan, id);
        }
        assert_eq!(plan.format_results(), "Printing results:\n1024:1032\treject\n");
    }

    #[test]
    fn test_fully_interleaved() {
        let mut plan = plan_for("1024:1032");
        for id in 0..9u32 {
            match id % 3 {
                1 => reset(&mut plan, id),
                2 => pass(&mut plan, id),
                _ => {}
            }
        }
        assert_eq!(
            plan.format_results(),
            "Printing results:\n\
             1024\tdrop\n1025\treject\n1026\tpass\n\
             1027\tdrop\n1028\treject\n1029\tpass\n\
             1030\tdrop\n1031\treject\n1032\tpass\n"
        );
    }

    #[test]
    fn test_pass_beats_reject() {
        let mut plan = plan_for("1024");
        reset(&mut plan, 0);
        pass(&mut plan, 0);
        assert_eq!(plan.current_item().unwrap().classify(), PortClass::Pass);
    }

    #[test]
    fn test_icmp_rejects_classify() {
        let codes = [
            ResultCode::Icmpv4NetUnreachable,
            ResultCode::Icmpv4PortUnreachable,
            ResultCode::Icmpv4PrecedenceCutoff,
            ResultCode::Icmpv6NoRoute,
            ResultCode::Icmpv6SourceAddressFailed,
            ResultCode::Icmpv6HeadersTooLong,
        ];
        for code in codes {
            let mut plan = plan_for("80");
            plan.handle_result(1, ResultMsg::new(0, code));
            assert_eq!(
                plan.current_item().unwrap().classify(),
                PortClass::Reject,
                "{code:?}"
            );
        }
    }

    #[test]
    fn test_error_result_classifies_as_drop() {
        // An injection failure is no evidence either way; the port must
        // still appear in the report.
        let mut plan = plan_for("80");
        plan.handle_result(1, ResultMsg::new(0, ResultCode::Error));
        assert_eq!(plan.current_item().unwrap().classify(), PortClass::Drop);
        assert_eq!(plan.format_results(), "Printing results:\n80\tdrop\n");
    }

    #[test]
    fn test_error_result_merges_into_drop_range() {
        let mut plan = plan_for("1024:1026");
        plan.handle_result(1, ResultMsg::new(1, ResultCode::Error));
        assert_eq!(plan.format_results(), "Printing results:\n1024:1026\tdrop\n");
    }

    #[test]
    fn test_empty_plan_renders_header_only() {
        let plan = plan_for("bogus");
        assert!(plan.is_empty());
        assert_eq!(plan.format_results(), "Printing results:\n");
    }

    // ── diffs ───────────────────────────────────────────────────────────────

    fn configured_plan() -> Plan {
        let config = Config {
            port_range: "443".to_string(),
            sender_src_mac: Some("aa:bb:cc:dd:ee:01".parse().unwrap()),
            sender_dst_mac: Some("aa:bb:cc:dd:ee:02".parse().unwrap()),
            sender_src_ip: Some("10.0.1.1".parse().unwrap()),
            sender_dst_ip: Some("10.0.2.1".parse().unwrap()),
            protocol: Protocol::Tcp,
            src_port: 40000,
            ..Config::default()
        };
        Plan::new(&config)
    }

    #[test]
    fn test_pass_with_identical_packet_records_no_diff() {
        let mut plan = configured_plan();
        let probe = packet::build_probe(&plan.current_item().unwrap().sender_msg).unwrap();
        plan.handle_result(
            2,
            ResultMsg {
                id: 0,
                result: ResultCode::Pass,
                packet: probe,
            },
        );
        assert!(plan.current_item().unwrap().packet_diffs.is_empty());
        assert!(plan.format_packet_diffs().is_empty());
    }

    #[test]
    fn test_pass_with_rewritten_source_records_diff() {
        let mut plan = configured_plan();
        // The filter rewrote the source address and port (NAT).
        let mut observed = plan.current_item().unwrap().sender_msg.clone();
        observed.src_ip = Some("192.168.7.7".parse().unwrap());
        observed.src_port = 61000;
        let captured = packet::build_probe(&observed).unwrap();

        plan.handle_result(
            2,
            ResultMsg {
                id: 0,
                result: ResultCode::Pass,
                packet: captured,
            },
        );
        let diffs = &plan.current_item().unwrap().packet_diffs;
        assert_eq!(diffs.len(), 2);
        assert!(diffs.iter().any(|d| d.field == DiffField::SrcIp
            && d.sent == "10.0.1.1"
            && d.observed == "192.168.7.7"));
        assert!(diffs
            .iter()
            .any(|d| d.field == DiffField::SrcPort && d.observed == "61000"));

        let rendered = plan.format_packet_diffs();
        assert!(rendered.starts_with("Port 443 packet differences:\n"));
        assert!(rendered.contains("SrcIP: 10.0.1.1 -> 192.168.7.7\n"));
        assert!(rendered.contains("SrcPort: 40000 -> 61000\n"));
    }

    #[test]
    fn test_duplicate_diffs_collapse() {
        let mut plan = configured_plan();
        let mut observed = plan.current_item().unwrap().sender_msg.clone();
        observed.src_ip = Some("192.168.7.7".parse().unwrap());
        let captured = packet::build_probe(&observed).unwrap();

        for _ in 0..3 {
            plan.handle_result(
                2,
                ResultMsg {
                    id: 0,
                    result: ResultCode::Pass,
                    packet: captured.clone(),
                },
            );
        }
        assert_eq!(plan.current_item().unwrap().packet_diffs.len(), 1);
        assert_eq!(plan.current_item().unwrap().receiver_results.len(), 3);
    }

    #[test]
    fn test_unconfigured_fields_never_diff() {
        // No sender-side values configured: nothing to compare against.
        let mut plan = plan_for("443");
        let observed = TestDescriptor {
            src_mac: Some("aa:bb:cc:dd:ee:01".parse().unwrap()),
            dst_mac: Some("aa:bb:cc:dd:ee:02".parse().unwrap()),
            src_ip: Some("10.9.9.9".parse().unwrap()),
            dst_ip: Some("10.8.8.8".parse().unwrap()),
            protocol: Protocol::Tcp,
            src_port: 1234,
            dst_port: 4321,
            ..Default::default()
        };
        let captured = packet::build_probe(&observed).unwrap();
        plan.handle_result(
            2,
            ResultMsg {
                id: 0,
                result: ResultCode::Pass,
                packet: captured,
            },
        );
        // dst_port is configured (the probed port) and differs; everything
        // else is unconfigured and ignored.
        let diffs = &plan.current_item().unwrap().packet_diffs;
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs.iter().next().unwrap().field, DiffField::DstPort);
    }

    #[test]
    fn test_unparseable_pass_packet_still_counts() {
        let mut plan = configured_plan();
        plan.handle_result(
            2,
            ResultMsg {
                id: 0,
                result: ResultCode::Pass,
                packet: vec![1, 2, 3],
            },
        );
        let item = plan.current_item().unwrap();
        assert_eq!(item.receiver_results.len(), 1);
        assert!(item.packet_diffs.is_empty());
        assert_eq!(item.classify(), PortClass::Pass);
    }

    // ── persistence ─────────────────────────────────────────────────────────

    #[test]
    fn test_plan_json_roundtrip() {
        let mut plan = configured_plan();
        reset(&mut plan, 0);
        pass(&mut plan, 0);
        let json = plan.to_json().unwrap();

        let restored: BTreeMap<u32, PlanItem> = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.len(), 1);
        let item = &restored[&0];
        assert_eq!(item.port, 443);
        assert_eq!(item.sender_msg, plan.items[&0].sender_msg);
        assert_eq!(item.receiver_msg, plan.items[&0].receiver_msg);
        assert_eq!(item.sender_results, plan.items[&0].sender_results);
        assert_eq!(item.receiver_results, plan.items[&0].receiver_results);
        assert_eq!(item.packet_diffs, plan.items[&0].packet_diffs);
    }
}
