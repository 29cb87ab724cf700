//! Agent runtime: one TCP connection to the coordinator, three duties.
//!
//! A dedicated reader task receives test commands and starts the matching
//! engine; engines feed observations into a results channel that is drained
//! here; and a ticker emits keep-alive Nops. Everything outbound funnels
//! through a single writer task so frames from concurrent duties never
//! interleave on the wire.

use std::time::Duration;

use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::capture;
use crate::config::Config;
use crate::message::{read_message, write_message, Message, ResultCode, ResultMsg, TestDescriptor};
use crate::{receiver, sender};

/// Seconds between keep-alive Nop messages.
pub const NOP_INTERVAL: Duration = Duration::from_secs(15);

/// Error running the agent.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("cannot connect to coordinator at {address}: {source}")]
    Connect {
        address: String,
        source: std::io::Error,
    },

    #[error("connection to coordinator lost")]
    ConnectionLost,
}

/// Connect to the coordinator, register, and serve test commands until the
/// connection goes away.
pub async fn run_client(config: &Config) -> Result<(), ClientError> {
    let stream = TcpStream::connect(&config.address)
        .await
        .map_err(|source| ClientError::Connect {
            address: config.address.clone(),
            source,
        })?;
    tracing::info!(address = %config.address, "connected to coordinator");
    let (read_half, write_half) = stream.into_split();

    let (out_tx, out_rx) = mpsc::channel::<Message>(64);
    let (result_tx, mut result_rx) = mpsc::channel::<ResultMsg>(64);

    out_tx
        .send(Message::Register { client: config.id })
        .await
        .map_err(|_| ClientError::ConnectionLost)?;
    tracing::info!(id = config.id, "registered with coordinator");

    let _writer = tokio::spawn(write_loop(write_half, out_rx));
    let mut reader = tokio::spawn(read_loop(read_half, result_tx));

    let mut nop = tokio::time::interval_at(
        tokio::time::Instant::now() + NOP_INTERVAL,
        NOP_INTERVAL,
    );

    tracing::info!("ready and waiting for test commands");
    loop {
        tokio::select! {
            _ = nop.tick() => {
                if out_tx.send(Message::Nop).await.is_err() {
                    break;
                }
            }
            result = result_rx.recv() => {
                let Some(result) = result else { break };
                if out_tx.send(Message::Result(result)).await.is_err() {
                    break;
                }
            }
            _ = &mut reader => break,
        }
    }
    Ok(())
}

/// Sole owner of the write half; drains the outbound channel.
async fn write_loop(mut write_half: OwnedWriteHalf, mut out_rx: mpsc::Receiver<Message>) {
    while let Some(msg) = out_rx.recv().await {
        if let Err(e) = write_message(&mut write_half, &msg).await {
            tracing::error!(error = %e, "write to coordinator failed");
            break;
        }
    }
}

/// Reads coordinator messages and starts engines for test commands.
async fn read_loop(mut read_half: OwnedReadHalf, results: mpsc::Sender<ResultMsg>) {
    loop {
        match read_message(&mut read_half).await {
            Ok(Message::Test(test)) => dispatch(test, results.clone()),
            Ok(Message::Nop) => {}
            Ok(other) => {
                tracing::warn!(typ = other.type_id(), "unexpected message from coordinator");
            }
            Err(e) => {
                tracing::info!(error = %e, "coordinator connection closed");
                return;
            }
        }
    }
}

/// Start the sender or receiver engine for one test command.
fn dispatch(test: TestDescriptor, results: mpsc::Sender<ResultMsg>) {
    tracing::debug!(
        id = test.id,
        initiate = test.initiate,
        port = test.dst_port,
        device = %test.device,
        "test command"
    );
    let handle = match capture::listener(&test.device) {
        Ok(handle) => handle,
        Err(e) => {
            tracing::error!(device = %test.device, error = %e, "cannot open capture device");
            let id = test.id;
            tokio::spawn(async move {
                let _ = results.send(ResultMsg::new(id, ResultCode::Error)).await;
            });
            return;
        }
    };
    if test.initiate {
        tokio::spawn(sender::run(test, results, handle));
    } else {
        tokio::spawn(receiver::run(test, results, handle));
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio::time::timeout;

    /// The agent registers first and answers an unopenable device with an
    /// Error result, all through the one connection.
    #[tokio::test]
    async fn test_client_registers_and_reports_device_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        let config = Config {
            id: 7,
            address,
            ..Config::default()
        };
        tokio::spawn(async move {
            let _ = run_client(&config).await;
        });

        let (mut coordinator_side, _) = listener.accept().await.unwrap();
        let registered = timeout(Duration::from_secs(2), read_message(&mut coordinator_side))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(registered, Message::Register { client: 7 });

        // A test command for a device that cannot exist on any test host.
        let test = TestDescriptor {
            id: 3,
            initiate: false,
            device: "fwprobe-test-no-such-device".to_string(),
            ..Default::default()
        };
        write_message(&mut coordinator_side, &Message::Test(test))
            .await
            .unwrap();

        let result = timeout(Duration::from_secs(2), read_message(&mut coordinator_side))
            .await
            .unwrap()
            .unwrap();
        match result {
            Message::Result(result) => {
                assert_eq!(result.id, 3);
                assert_eq!(result.result, ResultCode::Error);
            }
            other => panic!("expected a result message, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_client_fails_fast_without_coordinator() {
        let config = Config {
            // Reserved TEST-NET-3 address, nothing listens there.
            address: "203.0.113.1:9".to_string(),
            ..Config::default()
        };
        // Either the dial errors immediately or times out at the test level;
        // it must not pretend to connect.
        let outcome = timeout(Duration::from_secs(5), run_client(&config)).await;
        if let Ok(result) = outcome {
            assert!(matches!(result, Err(ClientError::Connect { .. })));
        }
    }
}
