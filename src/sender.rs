//! Sender engine: fires the probe and correlates what comes back.
//!
//! One engine task runs per test, started only after the receiver reported
//! `Ready`. It synthesizes the probe frame from its descriptor, injects it
//! three times with a short gap (loss insurance on the capture path), then
//! dwells listening for responses addressed to the probe: ICMP destination
//! unreachable errors quoting the probe's four-tuple, or a TCP RST on the
//! reversed port pair.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::sleep;

use crate::capture::ListenerHandle;
use crate::message::{Protocol, ResultCode, ResultMsg, TestDescriptor};
use crate::packet::{self, EmbeddedPacket};

/// How long the sender keeps collecting responses after the burst.
pub const SEND_DWELL: Duration = Duration::from_secs(1);
/// Gap between the repeated injections of one probe.
pub const PROBE_GAP: Duration = Duration::from_millis(1);
/// How many times each probe is injected.
pub const PROBE_REPEAT: usize = 3;

/// Run one sender test to completion.
///
/// The subscription is dropped on every exit path, deregistering the
/// handler from the device listener.
pub async fn run(test: TestDescriptor, results: mpsc::Sender<ResultMsg>, listener: ListenerHandle) {
    let frame = match packet::build_probe(&test) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::error!(id = test.id, error = %e, "cannot build probe");
            let _ = results.send(ResultMsg::new(test.id, ResultCode::Error)).await;
            return;
        }
    };

    let mut subscription = match listener.subscribe() {
        Ok(subscription) => subscription,
        Err(e) => {
            tracing::error!(id = test.id, error = %e, "sender cannot subscribe to device");
            let _ = results.send(ResultMsg::new(test.id, ResultCode::Error)).await;
            return;
        }
    };

    tracing::debug!(id = test.id, port = test.dst_port, "sending probe");
    for attempt in 0..PROBE_REPEAT {
        if let Err(e) = listener.inject(frame.clone()).await {
            tracing::error!(id = test.id, error = %e, "probe injection failed");
            let _ = results.send(ResultMsg::new(test.id, ResultCode::Error)).await;
            break;
        }
        if attempt + 1 < PROBE_REPEAT {
            sleep(PROBE_GAP).await;
        }
    }

    let dwell = sleep(SEND_DWELL);
    tokio::pin!(dwell);
    loop {
        tokio::select! {
            _ = &mut dwell => break,
            captured = subscription.recv() => {
                let Some(captured) = captured else { break };
                if let Some(code) = correlate(&test, &captured) {
                    tracing::debug!(id = test.id, result = ?code, "response correlated");
                    let msg = ResultMsg {
                        id: test.id,
                        result: code,
                        packet: captured.as_ref().clone(),
                    };
                    if results.send(msg).await.is_err() {
                        break;
                    }
                }
            }
        }
    }
}

/// Map a captured frame to a result code if it answers this probe.
///
/// ICMP destination-unreachable errors must quote the probe's exact
/// four-tuple; a RST must come back on the reversed port pair. Everything
/// else, including ICMP errors with codes outside the unreachable tables,
/// is dropped without a result.
pub fn correlate(test: &TestDescriptor, bytes: &[u8]) -> Option<ResultCode> {
    let frame = packet::parse_frame(bytes)?;

    if let Some(icmp) = &frame.icmpv4 {
        if icmp.icmp_type != packet::ICMPV4_DEST_UNREACHABLE {
            return None;
        }
        let embedded = packet::parse_embedded_ipv4(&icmp.embedded)?;
        if !embedded_matches(test, &embedded) {
            return None;
        }
        let code = ResultCode::from_icmpv4_code(icmp.code);
        if code.is_none() {
            tracing::debug!(id = test.id, code = icmp.code, "unexpected icmpv4 code, dropped");
        }
        return code;
    }

    if let Some(icmp) = &frame.icmpv6 {
        if icmp.icmp_type != packet::ICMPV6_DEST_UNREACHABLE {
            return None;
        }
        let embedded = packet::parse_embedded_ipv6(&icmp.embedded)?;
        if !embedded_matches(test, &embedded) {
            return None;
        }
        let code = ResultCode::from_icmpv6_code(icmp.code);
        if code.is_none() {
            tracing::debug!(id = test.id, code = icmp.code, "unexpected icmpv6 code, dropped");
        }
        return code;
    }

    if let Some(tcp) = &frame.tcp {
        if tcp.flags & packet::TCP_FLAG_RST != 0
            && tcp.src_port == test.dst_port
            && tcp.dst_port == test.src_port
        {
            return Some(ResultCode::TcpReset);
        }
    }

    None
}

/// The quoted original packet must carry the probe's protocol and
/// four-tuple exactly.
fn embedded_matches(test: &TestDescriptor, embedded: &EmbeddedPacket) -> bool {
    let proto = match test.protocol {
        Protocol::Tcp => packet::IPPROTO_TCP,
        Protocol::Udp => packet::IPPROTO_UDP,
        Protocol::None => return false,
    };
    embedded.protocol == proto
        && Some(embedded.src_ip) == test.src_ip
        && Some(embedded.dst_ip) == test.dst_ip
        && embedded.src_port == test.src_port
        && embedded.dst_port == test.dst_port
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
