//! Shared per-device packet capture and injection.
//!
//! At most one capture handle exists per device name, process-wide. A
//! blocking reader thread pulls frames off the backend and hands them to a
//! fan-out task, which owns the subscriber list and forwards every frame to
//! current subscribers in registration order. Subscribe, unsubscribe, and
//! inject all go through the fan-out task's mailbox, so the subscriber list
//! needs no locks and injections are serialized.
//!
//! The backend is a trait with a raw AF_PACKET implementation on Linux and
//! an in-memory mock for tests, so engines are fully testable without
//! capture privileges.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use tokio::sync::{mpsc, oneshot};

/// A captured frame, shared between subscribers without copying.
pub type Frame = Arc<Vec<u8>>;

/// Error opening a capture device or using its handle.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CaptureError {
    #[error("capture device '{0}' cannot be opened: {1}")]
    Open(String, String),

    #[error("packet capture is not supported on this platform")]
    Unsupported,

    #[error("packet injection failed: {0}")]
    Inject(String),

    #[error("capture read failed: {0}")]
    Read(String),

    #[error("capture listener is gone")]
    Closed,
}

/// Raw packet capture and injection on one device.
///
/// `recv` blocks on the next frame and runs on a dedicated thread; `send`
/// may be called concurrently from any task.
pub trait CaptureBackend: Send + Sync + 'static {
    fn recv(&self) -> Result<Vec<u8>, CaptureError>;
    fn send(&self, frame: &[u8]) -> Result<(), CaptureError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Listener
// ─────────────────────────────────────────────────────────────────────────────

enum Command {
    Subscribe {
        token: u64,
        tx: mpsc::UnboundedSender<Frame>,
    },
    Unsubscribe {
        token: u64,
    },
    Inject {
        frame: Vec<u8>,
        reply: oneshot::Sender<Result<(), CaptureError>>,
    },
}

/// Cloneable handle to one device's listener.
#[derive(Clone)]
pub struct ListenerHandle {
    commands: mpsc::UnboundedSender<Command>,
    next_token: Arc<AtomicU64>,
}

/// A live subscription; dropping it deregisters the handler, so every exit
/// path of an engine task unsubscribes.
pub struct Subscription {
    token: u64,
    rx: mpsc::UnboundedReceiver<Frame>,
    commands: mpsc::UnboundedSender<Command>,
}

impl ListenerHandle {
    /// Register a new packet handler; frames arrive in capture order.
    pub fn subscribe(&self) -> Result<Subscription, CaptureError> {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.commands
            .send(Command::Subscribe { token, tx })
            .map_err(|_| CaptureError::Closed)?;
        Ok(Subscription {
            token,
            rx,
            commands: self.commands.clone(),
        })
    }

    /// Inject a raw frame on the device.
    pub async fn inject(&self, frame: Vec<u8>) -> Result<(), CaptureError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Inject { frame, reply })
            .map_err(|_| CaptureError::Closed)?;
        response.await.map_err(|_| CaptureError::Closed)?
    }
}

impl Subscription {
    /// Next captured frame, or `None` when the listener is gone.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Unsubscribe { token: self.token });
    }
}

/// Start the reader thread and fan-out task for `backend`.
///
/// Must run inside a tokio runtime. The reader thread ends when the backend
/// errors; the fan-out task ends when reader and all handles are gone.
pub fn spawn_listener(backend: Arc<dyn CaptureBackend>) -> ListenerHandle {
    let (frame_tx, mut frame_rx) = mpsc::unbounded_channel::<Frame>();
    let (command_tx, mut command_rx) = mpsc::unbounded_channel::<Command>();

    let reader_backend = backend.clone();
    std::thread::spawn(move || loop {
        match reader_backend.recv() {
            Ok(frame) => {
                if frame_tx.send(Arc::new(frame)).is_err() {
                    return;
                }
            }
            Err(e) => {
                tracing::debug!(error = %e, "capture read loop ended");
                return;
            }
        }
    });

    tokio::spawn(async move {
        // Registration order is delivery order.
        let mut subscribers: Vec<(u64, mpsc::UnboundedSender<Frame>)> = Vec::new();
        loop {
            tokio::select! {
                frame = frame_rx.recv() => {
                    let Some(frame) = frame else { break };
                    for (_, tx) in &subscribers {
                        let _ = tx.send(frame.clone());
                    }
                }
                command = command_rx.recv() => {
                    match command {
                        Some(Command::Subscribe { token, tx }) => {
                            // Double-register is a no-op.
                            if !subscribers.iter().any(|(t, _)| *t == token) {
                                subscribers.push((token, tx));
                            }
                        }
                        Some(Command::Unsubscribe { token }) => {
                            if let Some(pos) =
                                subscribers.iter().position(|(t, _)| *t == token)
                            {
                                subscribers.remove(pos);
                            }
                        }
                        Some(Command::Inject { frame, reply }) => {
                            let _ = reply.send(backend.send(&frame));
                        }
                        None => break,
                    }
                }
            }
        }
    });

    ListenerHandle {
        commands: command_tx,
        next_token: Arc::new(AtomicU64::new(1)),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Process-wide registry
// ─────────────────────────────────────────────────────────────────────────────

static LISTENERS: OnceLock<Mutex<HashMap<String, ListenerHandle>>> = OnceLock::new();

/// Handle for `device`, opening the capture backend on first use.
///
/// Handles live for the rest of the process; every later caller shares the
/// one capture socket per device.
pub fn listener(device: &str) -> Result<ListenerHandle, CaptureError> {
    let registry = LISTENERS.get_or_init(|| Mutex::new(HashMap::new()));
    let mut map = registry.lock().unwrap_or_else(|poison| poison.into_inner());
    if let Some(handle) = map.get(device) {
        return Ok(handle.clone());
    }
    let backend = open_device(device)?;
    let handle = spawn_listener(backend);
    map.insert(device.to_string(), handle.clone());
    Ok(handle)
}

#[cfg(target_os = "linux")]
fn open_device(device: &str) -> Result<Arc<dyn CaptureBackend>, CaptureError> {
    Ok(Arc::new(RawPacketSocket::open(device)?))
}

#[cfg(not(target_os = "linux"))]
fn open_device(_device: &str) -> Result<Arc<dyn CaptureBackend>, CaptureError> {
    Err(CaptureError::Unsupported)
}

// ─────────────────────────────────────────────────────────────────────────────
// AF_PACKET backend (Linux)
// ─────────────────────────────────────────────────────────────────────────────

/// AF_PACKET/SOCK_RAW socket bound to one interface.
///
/// Sees and injects complete Ethernet frames. Requires `CAP_NET_RAW`.
#[cfg(target_os = "linux")]
pub struct RawPacketSocket {
    fd: i32,
}

#[cfg(target_os = "linux")]
impl RawPacketSocket {
    const ETH_P_ALL: u16 = 0x0003;
    /// Upper bound on a single captured frame.
    const FRAME_BUF: usize = 65536;

    /// Open and bind the capture socket for `device`.
    pub fn open(device: &str) -> Result<Self, CaptureError> {
        let open_err =
            |what: &str| CaptureError::Open(device.to_string(), format!("{what}: {}", std::io::Error::last_os_error()));

        let fd = unsafe {
            libc::socket(
                libc::AF_PACKET,
                libc::SOCK_RAW,
                (Self::ETH_P_ALL as u16).to_be() as libc::c_int,
            )
        };
        if fd < 0 {
            return Err(open_err("socket (requires CAP_NET_RAW)"));
        }

        let ifname = match std::ffi::CString::new(device) {
            Ok(s) => s,
            Err(_) => {
                unsafe { libc::close(fd) };
                return Err(CaptureError::Open(
                    device.to_string(),
                    "device name contains a NUL byte".to_string(),
                ));
            }
        };
        let ifindex = unsafe { libc::if_nametoindex(ifname.as_ptr()) };
        if ifindex == 0 {
            unsafe { libc::close(fd) };
            return Err(open_err("interface not found"));
        }

        let mut addr: libc::sockaddr_ll = unsafe { std::mem::zeroed() };
        addr.sll_family = libc::AF_PACKET as libc::sa_family_t;
        addr.sll_protocol = (Self::ETH_P_ALL as u16).to_be();
        addr.sll_ifindex = ifindex as libc::c_int;
        let ret = unsafe {
            libc::bind(
                fd,
                &addr as *const libc::sockaddr_ll as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            unsafe { libc::close(fd) };
            return Err(open_err("bind"));
        }

        Ok(Self { fd })
    }
}

#[cfg(target_os = "linux")]
impl Drop for RawPacketSocket {
    fn drop(&mut self) {
        if self.fd >= 0 {
            unsafe { libc::close(self.fd) };
        }
    }
}

#[cfg(target_os = "linux")]
impl CaptureBackend for RawPacketSocket {
    fn recv(&self) -> Result<Vec<u8>, CaptureError> {
        let mut buf = vec![0u8; Self::FRAME_BUF];
        let n = unsafe {
            libc::recv(
                self.fd,
                buf.as_mut_ptr() as *mut libc::c_void,
                buf.len(),
                0,
            )
        };
        if n < 0 {
            return Err(CaptureError::Read(
                std::io::Error::last_os_error().to_string(),
            ));
        }
        buf.truncate(n as usize);
        Ok(buf)
    }

    fn send(&self, frame: &[u8]) -> Result<(), CaptureError> {
        let n = unsafe {
            libc::send(
                self.fd,
                frame.as_ptr() as *const libc::c_void,
                frame.len(),
                0,
            )
        };
        if n < 0 {
            return Err(CaptureError::Inject(
                std::io::Error::last_os_error().to_string(),
            ));
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Mock backend for tests
// ─────────────────────────────────────────────────────────────────────────────

/// In-memory capture backend: the test side feeds frames in through a
/// [`MockCaptureDriver`] and inspects what engines injected.
pub struct MockCapture {
    incoming: Mutex<std::sync::mpsc::Receiver<Vec<u8>>>,
    injected: Mutex<Vec<Vec<u8>>>,
    fail_inject: std::sync::atomic::AtomicBool,
}

/// Test-side handle that plays the role of the wire.
pub struct MockCaptureDriver(std::sync::mpsc::Sender<Vec<u8>>);

impl MockCapture {
    pub fn new() -> (Arc<Self>, MockCaptureDriver) {
        let (tx, rx) = std::sync::mpsc::channel();
        let capture = Arc::new(Self {
            incoming: Mutex::new(rx),
            injected: Mutex::new(Vec::new()),
            fail_inject: std::sync::atomic::AtomicBool::new(false),
        });
        (capture, MockCaptureDriver(tx))
    }

    /// Frames injected so far, in order.
    pub fn injected(&self) -> Vec<Vec<u8>> {
        self.injected
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .clone()
    }

    /// Make every subsequent injection fail.
    pub fn fail_injections(&self) {
        self.fail_inject.store(true, Ordering::Relaxed);
    }
}

impl MockCaptureDriver {
    /// Deliver a frame as if captured off the wire.
    pub fn push(&self, frame: Vec<u8>) {
        let _ = self.0.send(frame);
    }
}

impl CaptureBackend for MockCapture {
    fn recv(&self) -> Result<Vec<u8>, CaptureError> {
        let incoming = self
            .incoming
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        incoming.recv().map_err(|_| CaptureError::Closed)
    }

    fn send(&self, frame: &[u8]) -> Result<(), CaptureError> {
        if self.fail_inject.load(Ordering::Relaxed) {
            return Err(CaptureError::Inject("mock injection failure".to_string()));
        }
        self.injected
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .push(frame.to_vec());
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
