//! Coordinator: accepts agents and drives the plan, port by port.
//!
//! A handler task per agent connection reads its registration and then
//! forwards results; the main loop is the only place the plan and the
//! client write halves are touched, multiplexing over registrations,
//! results, and the two timer channels. The per-port handshake is strict:
//! the receiver is armed and reports `Ready` before the sender is told to
//! fire, and the next port starts only after a fixed gap. Results may keep
//! arriving for earlier ports while later ports run; they reconcile by item
//! id.
//!
//! The loop is generic over the stream type so tests can drive it with
//! in-memory duplex connections instead of sockets.

use std::collections::HashMap;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, WriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use crate::config::Config;
use crate::message::{read_message, write_message, Message, ProtocolError, ResultCode, ResultMsg};
use crate::plan::Plan;

/// Gap between telling the sender to fire and starting the next port.
pub const NEXT_DELAY: Duration = Duration::from_millis(10);
/// How long to keep collecting results after the final port.
pub const DONE_DELAY: Duration = Duration::from_secs(5);

/// Error running the coordinator.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("cannot bind listener on {address}: {source}")]
    Bind {
        address: String,
        source: std::io::Error,
    },

    #[error("client {id} is not connected")]
    ClientMissing { id: u8 },

    #[error("write to client {id} failed: {source}")]
    ClientWrite { id: u8, source: ProtocolError },

    #[error("cannot serialize plan: {0}")]
    ResultsJson(#[from] serde_json::Error),

    #[error("cannot write results file: {0}")]
    ResultsFile(#[from] std::io::Error),
}

/// A registered agent connection, published by its handler task.
struct Registration<S> {
    id: u8,
    writer: WriteHalf<S>,
}

/// A result forwarded by an agent's handler task.
struct ClientResult {
    client_id: u8,
    result: ResultMsg,
}

/// Bind, accept agents, run the plan, and render the verdict.
pub async fn run_server(config: &Config) -> Result<(), ServerError> {
    let plan = Plan::new(config);
    let listener = TcpListener::bind(&config.address)
        .await
        .map_err(|source| ServerError::Bind {
            address: config.address.clone(),
            source,
        })?;
    tracing::info!(address = %config.address, "server listening");

    let (reg_tx, reg_rx) = mpsc::channel::<Registration<TcpStream>>(8);
    let (res_tx, res_rx) = mpsc::channel::<ClientResult>(256);
    tokio::spawn(accept_loop(listener, reg_tx, res_tx));

    let plan = run_plan(plan, reg_rx, res_rx).await?;

    print!("{}", plan.format_results());
    let diffs = plan.format_packet_diffs();
    if !diffs.is_empty() {
        print!("{diffs}");
    }
    if let Some(path) = &config.results_file {
        std::fs::write(path, plan.to_json()?)?;
        tracing::info!(file = %path.display(), "plan written");
    }
    Ok(())
}

/// Accept agent connections and spawn a handler per connection.
async fn accept_loop(
    listener: TcpListener,
    registrations: mpsc::Sender<Registration<TcpStream>>,
    results: mpsc::Sender<ClientResult>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                tracing::info!(%addr, "client connected");
                tokio::spawn(handle_client(stream, registrations.clone(), results.clone()));
            }
            Err(e) => {
                tracing::error!(error = %e, "accept failed");
                return;
            }
        }
    }
}

/// Serve one agent connection: registration first, then results.
///
/// Nop keep-alives are absorbed; any other frame, or a protocol error,
/// disconnects this agent without touching the rest of the run.
async fn handle_client<S>(
    stream: S,
    registrations: mpsc::Sender<Registration<S>>,
    results: mpsc::Sender<ClientResult>,
) where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut reader, writer) = tokio::io::split(stream);

    let id = match read_message(&mut reader).await {
        Ok(Message::Register { client }) => client,
        Ok(other) => {
            tracing::warn!(typ = other.type_id(), "client sent no registration, disconnecting");
            return;
        }
        Err(e) => {
            tracing::warn!(error = %e, "client failed before registering");
            return;
        }
    };
    if registrations.send(Registration { id, writer }).await.is_err() {
        return;
    }
    tracing::info!(id, "client registered");

    loop {
        match read_message(&mut reader).await {
            Ok(Message::Nop) => {}
            Ok(Message::Result(result)) => {
                if results
                    .send(ClientResult {
                        client_id: id,
                        result,
                    })
                    .await
                    .is_err()
                {
                    return;
                }
            }
            Ok(other) => {
                tracing::warn!(id, typ = other.type_id(), "invalid message from client, disconnecting");
                return;
            }
            Err(e) => {
                tracing::debug!(id, error = %e, "client connection closed");
                return;
            }
        }
    }
}

/// Write `msg` to the agent registered under `id`; failure aborts the run.
async fn send_to<S>(
    clients: &mut HashMap<u8, WriteHalf<S>>,
    id: u8,
    msg: &Message,
) -> Result<(), ServerError>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let Some(writer) = clients.get_mut(&id) else {
        return Err(ServerError::ClientMissing { id });
    };
    write_message(writer, msg)
        .await
        .map_err(|source| ServerError::ClientWrite { id, source })
}

/// The coordinator's main event loop; sole owner of the plan.
async fn run_plan<S>(
    mut plan: Plan,
    mut registrations: mpsc::Receiver<Registration<S>>,
    mut results: mpsc::Receiver<ClientResult>,
) -> Result<Plan, ServerError>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let mut clients: HashMap<u8, WriteHalf<S>> = HashMap::new();
    let (next_tx, mut next_rx) = mpsc::channel::<()>(1);
    let (done_tx, mut done_rx) = mpsc::channel::<()>(1);

    let num_items = plan.len() as u32;
    let percent_items = (num_items / 100).max(1);

    loop {
        tokio::select! {
            registration = registrations.recv() => {
                let Some(Registration { id, writer }) = registration else { break };
                clients.insert(id, writer);
                plan.handle_client(id);

                if plan.clients_active() {
                    let Some(msg) = plan
                        .current_item()
                        .map(|item| Message::Test(item.receiver_msg.clone()))
                    else {
                        tracing::info!("no items in plan");
                        break;
                    };
                    tracing::info!(items = num_items, "starting test plan");
                    send_to(&mut clients, plan.receiver_id(), &msg).await?;
                }
            }

            client_result = results.recv() => {
                let Some(ClientResult { client_id, result }) = client_result else { break };
                let code = result.result;
                let item_id = result.id;
                let armed = plan.handle_result(client_id, result);

                let Some(item) = plan.current_item() else { continue };
                if code == ResultCode::Ready && armed && item.id == item_id {
                    let msg = Message::Test(item.sender_msg.clone());
                    send_to(&mut clients, plan.sender_id(), &msg).await?;

                    let next_tx = next_tx.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(NEXT_DELAY).await;
                        let _ = next_tx.send(()).await;
                    });
                }
            }

            _ = next_rx.recv() => {
                let next = plan
                    .next_item()
                    .map(|item| (item.id, Message::Test(item.receiver_msg.clone())));
                match next {
                    None => {
                        tracing::info!("no more items in plan");
                        tracing::info!(
                            "collecting results for {} seconds",
                            DONE_DELAY.as_secs()
                        );
                        let done_tx = done_tx.clone();
                        tokio::spawn(async move {
                            tokio::time::sleep(DONE_DELAY).await;
                            let _ = done_tx.send(()).await;
                        });
                    }
                    Some((item_id, msg)) => {
                        if item_id % percent_items == 0 {
                            let percent = item_id as f32 / num_items as f32 * 100.0;
                            tracing::info!(
                                "reached plan item {}/{} ({:.0}%)",
                                item_id,
                                num_items,
                                percent
                            );
                        }
                        send_to(&mut clients, plan.receiver_id(), &msg).await?;
                    }
                }
            }

            _ = done_rx.recv() => {
                tracing::info!("shutting down");
                break;
            }
        }
    }
    Ok(plan)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
