//! Receiver engine: waits for the probe on the far side of the filter.
//!
//! One engine task runs per test. It subscribes to the device listener,
//! reports `Ready` so the coordinator knows the trap is armed before the
//! sender fires, then matches every captured frame against the descriptor
//! for a fixed dwell. Each full match produces a `Pass` carrying the raw
//! captured bytes; the first one is authoritative for classification, later
//! ones feed the packet differ.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::sleep;

use crate::capture::ListenerHandle;
use crate::message::{Protocol, ResultCode, ResultMsg, TestDescriptor};
use crate::packet;

/// How long the receiver keeps matching after reporting `Ready`.
pub const RECEIVE_DWELL: Duration = Duration::from_secs(2);

/// Run one receiver test to completion.
///
/// The subscription is dropped on every exit path, deregistering the
/// handler from the device listener.
pub async fn run(test: TestDescriptor, results: mpsc::Sender<ResultMsg>, listener: ListenerHandle) {
    let mut subscription = match listener.subscribe() {
        Ok(subscription) => subscription,
        Err(e) => {
            tracing::error!(id = test.id, error = %e, "receiver cannot subscribe to device");
            let _ = results.send(ResultMsg::new(test.id, ResultCode::Error)).await;
            return;
        }
    };

    if results
        .send(ResultMsg::new(test.id, ResultCode::Ready))
        .await
        .is_err()
    {
        return;
    }
    tracing::debug!(id = test.id, port = test.dst_port, "receiver listening");

    let dwell = sleep(RECEIVE_DWELL);
    tokio::pin!(dwell);
    loop {
        tokio::select! {
            _ = &mut dwell => break,
            frame = subscription.recv() => {
                let Some(frame) = frame else { break };
                if frame_matches(&test, &frame) {
                    tracing::debug!(id = test.id, port = test.dst_port, "probe captured");
                    let msg = ResultMsg {
                        id: test.id,
                        result: ResultCode::Pass,
                        packet: frame.as_ref().clone(),
                    };
                    if results.send(msg).await.is_err() {
                        break;
                    }
                }
            }
        }
    }
}

/// Layered match of a captured frame against a test descriptor.
///
/// Absent descriptor fields are wildcards. Checks short-circuit from the
/// Ethernet layer down: configured MACs must byte-equal, configured IPs
/// must equal in the address family the descriptor selects, and a
/// configured protocol pins the layer-4 type before nonzero ports are
/// compared.
pub fn frame_matches(test: &TestDescriptor, bytes: &[u8]) -> bool {
    let Some(frame) = packet::parse_frame(bytes) else {
        return false;
    };

    if let Some(mac) = test.src_mac {
        if frame.eth.src != mac {
            return false;
        }
    }
    if let Some(mac) = test.dst_mac {
        if frame.eth.dst != mac {
            return false;
        }
    }

    if test.src_ip.is_some() || test.dst_ip.is_some() {
        // The src address picks the family to check, dst if src is unset.
        let want_v4 = test
            .src_ip
            .or(test.dst_ip)
            .map(|ip| ip.is_ipv4())
            .unwrap_or(true);
        if want_v4 && frame.ipv4.is_none() {
            return false;
        }
        if !want_v4 && frame.ipv6.is_none() {
            return false;
        }
        if let Some(want) = test.src_ip {
            if frame.src_ip() != Some(want) {
                return false;
            }
        }
        if let Some(want) = test.dst_ip {
            if frame.dst_ip() != Some(want) {
                return false;
            }
        }
    }

    let l4 = match test.protocol {
        Protocol::None => return true,
        Protocol::Tcp => &frame.tcp,
        Protocol::Udp => &frame.udp,
    };
    let Some(l4) = l4 else {
        return false;
    };
    if test.src_port != 0 && l4.src_port != test.src_port {
        return false;
    }
    if test.dst_port != 0 && l4.dst_port != test.dst_port {
        return false;
    }
    true
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
