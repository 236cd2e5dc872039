//! A [`Transport`] that speaks the expedition frame protocol over any
//! bidirectional text channel.
//!
//! [`SocketClient`] is a thin handle over a background loop, in the same
//! shape as most async network clients: public methods push commands into an
//! unbounded MPSC channel and return immediately, the loop multiplexes those
//! commands with incoming frames via `tokio::select!`, and every lifecycle
//! change is fanned out to the registered listeners.
//!
//! The loop never reconnects on its own. After a receive error or a clean
//! close it parks until [`Transport::reconnect`] is called.
//!
//! # Example
//!
//! ```rust,ignore
//! let dialer = WebSocketDialer::new("wss://example.com/socket");
//! let client = SocketClient::start(dialer, SocketConfig::default());
//! let sync = SyncFacade::new(client.clone(), SyncConfig::new(), haptics, popups)?;
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::error::SyncError;
use crate::protocol::{ClientFrame, ServerFrame};
use crate::transport::{Listener, ListenerId, ListenerSet, Transport, TransportEvent};
use crate::update::{ExpeditionId, Update};

/// Default timeout for the graceful shutdown.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

// ── Channel abstraction ─────────────────────────────────────────────

/// A bidirectional text frame channel.
///
/// Each call to [`send`](FrameChannel::send) transmits one complete JSON
/// frame and each call to [`recv`](FrameChannel::recv) returns one.
///
/// # Cancel Safety
///
/// [`recv`](FrameChannel::recv) **MUST** be cancel-safe because it is polled
/// inside `tokio::select!`. Channel-based implementations (e.g. wrapping
/// `mpsc::Receiver`) are naturally cancel-safe.
#[async_trait]
pub trait FrameChannel: Send + 'static {
    /// # Errors
    ///
    /// Returns [`SyncError::TransportSend`] if the frame could not be sent.
    async fn send(&mut self, frame: String) -> Result<(), SyncError>;

    /// Receive the next frame.
    ///
    /// Returns:
    /// - `Some(Ok(text))`: a complete frame was received
    /// - `Some(Err(e))`: the channel failed
    /// - `None`: the server closed the channel cleanly
    async fn recv(&mut self) -> Option<Result<String, SyncError>>;

    /// Close the channel gracefully.
    ///
    /// # Errors
    ///
    /// Returns an error if the close handshake fails. Resources must still
    /// be released.
    async fn close(&mut self) -> Result<(), SyncError>;
}

/// Opens fresh [`FrameChannel`]s, once at start and again on every reconnect.
#[async_trait]
pub trait Dialer: Send + Sync + 'static {
    /// # Errors
    ///
    /// Any error is reported to listeners as a transport `error` signal.
    async fn dial(&self) -> Result<Box<dyn FrameChannel>, SyncError>;
}

// ── Configuration ───────────────────────────────────────────────────

/// Configuration for a [`SocketClient`].
///
/// ```
/// use expedition_sync::socket::SocketConfig;
/// use std::time::Duration;
///
/// let config = SocketConfig::default().with_shutdown_timeout(Duration::from_secs(5));
/// assert_eq!(config.shutdown_timeout, Duration::from_secs(5));
/// ```
#[derive(Debug, Clone)]
pub struct SocketConfig {
    /// Time [`SocketClient::shutdown`] gives the loop to close the channel
    /// before aborting it.
    ///
    /// Defaults to **1 second**. A zero timeout aborts immediately.
    pub shutdown_timeout: Duration,
}

impl SocketConfig {
    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

// ── Commands ────────────────────────────────────────────────────────

#[derive(Debug)]
enum Command {
    Send(ClientFrame),
    Reconnect,
}

// ── Shared state ────────────────────────────────────────────────────

struct SocketShared {
    connected: AtomicBool,
    listeners: ListenerSet,
}

impl SocketShared {
    fn emit(&self, event: TransportEvent) {
        debug!(event = event.name(), "socket event");
        self.listeners.emit(&event);
    }

    /// Mark the channel down, then report why.
    fn lost(&self, event: TransportEvent) {
        self.connected.store(false, Ordering::Release);
        self.emit(event);
    }
}

// ── Client handle ───────────────────────────────────────────────────

/// Socket-backed [`Transport`].
///
/// Created via [`SocketClient::start`], which spawns the background loop.
/// Must be called inside a tokio runtime.
pub struct SocketClient {
    cmd_tx: mpsc::UnboundedSender<Command>,
    shared: Arc<SocketShared>,
    task: Mutex<Option<JoinHandle<()>>>,
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
    shutdown_timeout: Duration,
}

impl SocketClient {
    /// Dial with `dialer` and start the background loop.
    pub fn start(dialer: impl Dialer, config: SocketConfig) -> Arc<Self> {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let shared = Arc::new(SocketShared {
            connected: AtomicBool::new(false),
            listeners: ListenerSet::new(),
        });

        let task = tokio::spawn(socket_loop(
            dialer,
            cmd_rx,
            Arc::clone(&shared),
            shutdown_rx,
        ));

        Arc::new(Self {
            cmd_tx,
            shared,
            task: Mutex::new(Some(task)),
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            shutdown_timeout: config.shutdown_timeout,
        })
    }

    /// Close the channel and stop the background loop.
    ///
    /// Listeners receive a final `disconnected` signal if the loop exits
    /// gracefully within the configured timeout.
    pub async fn shutdown(&self) {
        debug!("SocketClient: shutdown requested");

        let shutdown_tx = self
            .shutdown_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(tx) = shutdown_tx {
            let _ = tx.send(());
        }

        let task = self.task.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(mut task) = task {
            match tokio::time::timeout(self.shutdown_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    warn!("socket loop terminated with join error: {join_err}");
                }
                Err(_) => {
                    warn!("socket loop did not exit within timeout; aborting task");
                    task.abort();
                    if let Err(join_err) = task.await {
                        debug!("socket loop aborted: {join_err}");
                    }
                }
            }
        }

        self.shared.connected.store(false, Ordering::Release);
    }

    fn command(&self, command: Command) {
        if self.cmd_tx.send(command).is_err() {
            debug!("socket loop gone, dropping command");
        }
    }
}

impl Transport for SocketClient {
    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    fn on(&self, listener: Listener) -> ListenerId {
        self.shared.listeners.add(listener)
    }

    fn off(&self, id: ListenerId) {
        self.shared.listeners.remove(id);
    }

    fn join_expedition(&self, id: ExpeditionId) {
        self.command(Command::Send(ClientFrame::JoinExpedition { expedition_id: id }));
    }

    fn leave_expedition(&self, id: ExpeditionId) {
        self.command(Command::Send(ClientFrame::LeaveExpedition { expedition_id: id }));
    }

    fn reconnect(&self) {
        self.command(Command::Reconnect);
    }
}

impl fmt::Debug for SocketClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketClient")
            .field("connected", &self.is_connected())
            .field("listeners", &self.shared.listeners.len())
            .finish()
    }
}

impl Drop for SocketClient {
    fn drop(&mut self) {
        // `Drop` cannot await a graceful close; abort the loop instead.
        let task = self.task.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(task) = task {
            task.abort();
        }
    }
}

// ── Background loop ─────────────────────────────────────────────────

/// How a connected session ended.
enum SessionEnd {
    /// Caller asked for a reconnect; dial again right away.
    Reconnect,
    /// Channel failed or closed; park until a reconnect is requested.
    Lost,
    /// Shut down or every handle dropped.
    Exit,
}

/// Dial, run a session, park, repeat.
async fn socket_loop(
    dialer: impl Dialer,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    shared: Arc<SocketShared>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    debug!("socket loop started");
    let mut has_connected = false;

    loop {
        match dialer.dial().await {
            Ok(channel) => {
                shared.connected.store(true, Ordering::Release);
                if has_connected {
                    shared.emit(TransportEvent::Reconnected);
                } else {
                    shared.emit(TransportEvent::Connected);
                }
                has_connected = true;

                match run_session(channel, &mut cmd_rx, &shared, &mut shutdown_rx).await {
                    SessionEnd::Reconnect => continue,
                    SessionEnd::Lost => {}
                    SessionEnd::Exit => break,
                }
            }
            Err(e) => {
                error!("socket dial failed: {e}");
                shared.emit(TransportEvent::Error {
                    message: e.to_string(),
                });
            }
        }

        if !park(&mut cmd_rx, &mut shutdown_rx).await {
            break;
        }
    }

    debug!("socket loop exited");
}

/// Pump one connected channel until it ends.
async fn run_session(
    mut channel: Box<dyn FrameChannel>,
    cmd_rx: &mut mpsc::UnboundedReceiver<Command>,
    shared: &SocketShared,
    shutdown_rx: &mut oneshot::Receiver<()>,
) -> SessionEnd {
    loop {
        tokio::select! {
            // Branch 1: outgoing command from the client handle
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(Command::Send(frame)) => {
                        if let Err(e) = send_frame(channel.as_mut(), &frame).await {
                            error!("socket send error: {e}");
                            shared.lost(TransportEvent::Error { message: e.to_string() });
                            return SessionEnd::Lost;
                        }
                    }
                    Some(Command::Reconnect) => {
                        debug!("reconnect requested, closing current channel");
                        let _ = channel.close().await;
                        shared.lost(TransportEvent::Disconnected {
                            reason: Some("reconnect requested".into()),
                        });
                        return SessionEnd::Reconnect;
                    }
                    // Command channel closed: client handle dropped.
                    None => {
                        let _ = channel.close().await;
                        shared.lost(TransportEvent::Disconnected {
                            reason: Some("client shut down".into()),
                        });
                        return SessionEnd::Exit;
                    }
                }
            }

            // Branch 2: shutdown signal
            _ = &mut *shutdown_rx => {
                debug!("shutdown signal received");
                let _ = channel.close().await;
                shared.lost(TransportEvent::Disconnected {
                    reason: Some("client shut down".into()),
                });
                return SessionEnd::Exit;
            }

            // Branch 3: incoming frame from the server
            incoming = channel.recv() => {
                match incoming {
                    Some(Ok(text)) => match parse_frame(&text) {
                        Ok(update) => shared.emit(TransportEvent::Update(update)),
                        Err(e) => warn!(raw = %text, "failed to parse server frame: {e}"),
                    },
                    Some(Err(e)) => {
                        error!("socket receive error: {e}");
                        shared.lost(TransportEvent::Error { message: e.to_string() });
                        return SessionEnd::Lost;
                    }
                    None => {
                        debug!("socket closed by server");
                        shared.lost(TransportEvent::Disconnected {
                            reason: Some("server closed connection".into()),
                        });
                        return SessionEnd::Lost;
                    }
                }
            }
        }
    }
}

/// Wait while disconnected. Returns `false` when the loop should exit.
///
/// Frames queued while offline are dropped; only a reconnect wakes the loop.
async fn park(
    cmd_rx: &mut mpsc::UnboundedReceiver<Command>,
    shutdown_rx: &mut oneshot::Receiver<()>,
) -> bool {
    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(Command::Reconnect) => return true,
                Some(Command::Send(frame)) => {
                    debug!(?frame, "not connected, dropping frame");
                }
                None => return false,
            },
            _ = &mut *shutdown_rx => return false,
        }
    }
}

async fn send_frame(channel: &mut dyn FrameChannel, frame: &ClientFrame) -> Result<(), SyncError> {
    let json = serde_json::to_string(frame)?;
    channel.send(json).await
}

/// Parse one server frame into an [`Update`].
pub fn parse_frame(text: &str) -> Result<Update, SyncError> {
    let frame: ServerFrame = serde_json::from_str(text)?;
    Ok(frame.into())
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::update::UpdateKind;
    use std::sync::Mutex as StdMutex;

    // ── Mock channel ────────────────────────────────────────────────

    /// Server side of a [`MockChannel`].
    struct MockServer {
        to_client: mpsc::UnboundedSender<Option<Result<String, SyncError>>>,
        sent: Arc<StdMutex<Vec<String>>>,
    }

    struct MockChannel {
        incoming: mpsc::UnboundedReceiver<Option<Result<String, SyncError>>>,
        sent: Arc<StdMutex<Vec<String>>>,
    }

    #[async_trait]
    impl FrameChannel for MockChannel {
        async fn send(&mut self, frame: String) -> Result<(), SyncError> {
            self.sent.lock().unwrap().push(frame);
            Ok(())
        }

        async fn recv(&mut self) -> Option<Result<String, SyncError>> {
            match self.incoming.recv().await {
                Some(item) => item,
                None => std::future::pending().await,
            }
        }

        async fn close(&mut self) -> Result<(), SyncError> {
            Ok(())
        }
    }

    /// Hands out a fresh mock channel per dial; fails once `fail` is set.
    #[derive(Clone, Default)]
    struct MockDialer {
        servers: Arc<StdMutex<Vec<MockServer>>>,
        fail: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Dialer for MockDialer {
        async fn dial(&self) -> Result<Box<dyn FrameChannel>, SyncError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(SyncError::Io(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    "connection refused",
                )));
            }
            let (to_client, incoming) = mpsc::unbounded_channel();
            let sent = Arc::new(StdMutex::new(Vec::new()));
            self.servers.lock().unwrap().push(MockServer {
                to_client,
                sent: Arc::clone(&sent),
            });
            Ok(Box::new(MockChannel { incoming, sent }))
        }
    }

    impl MockDialer {
        fn dials(&self) -> usize {
            self.servers.lock().unwrap().len()
        }

        fn push(&self, item: Option<Result<String, SyncError>>) {
            let servers = self.servers.lock().unwrap();
            servers.last().unwrap().to_client.send(item).unwrap();
        }

        fn sent(&self) -> Vec<String> {
            let servers = self.servers.lock().unwrap();
            let sent = servers.last().unwrap().sent.lock().unwrap().clone();
            sent
        }
    }

    // ── Helpers ─────────────────────────────────────────────────────

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<TransportEvent>) -> TransportEvent {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for socket event")
            .expect("listener closed")
    }

    fn start(dialer: &MockDialer) -> (Arc<SocketClient>, mpsc::UnboundedReceiver<TransportEvent>) {
        let client = SocketClient::start(dialer.clone(), SocketConfig::default());
        let (tx, rx) = mpsc::unbounded_channel();
        client.on(tx);
        (client, rx)
    }

    const CONSUMED: &str = r#"{"event":"itemConsumed","data":{"expedition_id":4,"expedition_name":"Tortuga","timestamp":"2026-01-01T00:00:00Z","item_name":"rum","quantity":2}}"#;

    // ── Tests ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn connects_and_forwards_updates() {
        let dialer = MockDialer::default();
        let (client, mut events) = start(&dialer);

        assert_eq!(next_event(&mut events).await, TransportEvent::Connected);
        assert!(client.is_connected());

        dialer.push(Some(Ok("not json".into())));
        dialer.push(Some(Ok(CONSUMED.into())));
        match next_event(&mut events).await {
            TransportEvent::Update(update) => {
                assert_eq!(update.kind(), UpdateKind::ItemConsumed);
                assert_eq!(update.expedition_id, 4);
            }
            other => panic!("expected update, got {other:?}"),
        }

        client.shutdown().await;
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn join_and_leave_become_frames() {
        let dialer = MockDialer::default();
        let (client, mut events) = start(&dialer);
        next_event(&mut events).await;

        client.join_expedition(5);
        client.leave_expedition(5);
        tokio::time::sleep(Duration::from_millis(50)).await;

        let sent: Vec<ClientFrame> = dialer
            .sent()
            .iter()
            .map(|s| serde_json::from_str(s).unwrap())
            .collect();
        assert_eq!(
            sent,
            vec![
                ClientFrame::JoinExpedition { expedition_id: 5 },
                ClientFrame::LeaveExpedition { expedition_id: 5 },
            ]
        );

        client.shutdown().await;
    }

    #[tokio::test]
    async fn receive_error_parks_until_reconnect() {
        let dialer = MockDialer::default();
        let (client, mut events) = start(&dialer);
        next_event(&mut events).await;

        dialer.push(Some(Err(SyncError::TransportReceive("reset".into()))));
        assert!(matches!(
            next_event(&mut events).await,
            TransportEvent::Error { .. }
        ));
        assert!(!client.is_connected());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(dialer.dials(), 1);

        client.reconnect();
        assert_eq!(next_event(&mut events).await, TransportEvent::Reconnected);
        assert_eq!(dialer.dials(), 2);
        assert!(client.is_connected());

        client.shutdown().await;
    }

    #[tokio::test]
    async fn server_close_reports_disconnected() {
        let dialer = MockDialer::default();
        let (client, mut events) = start(&dialer);
        next_event(&mut events).await;

        dialer.push(None);
        assert!(matches!(
            next_event(&mut events).await,
            TransportEvent::Disconnected { reason: Some(_) }
        ));
        assert!(!client.is_connected());

        client.shutdown().await;
    }

    #[tokio::test]
    async fn reconnect_while_connected_redials() {
        let dialer = MockDialer::default();
        let (client, mut events) = start(&dialer);
        next_event(&mut events).await;

        client.reconnect();
        assert!(matches!(
            next_event(&mut events).await,
            TransportEvent::Disconnected { .. }
        ));
        assert_eq!(next_event(&mut events).await, TransportEvent::Reconnected);
        assert_eq!(dialer.dials(), 2);

        client.shutdown().await;
    }

    #[tokio::test]
    async fn dial_failure_reports_error() {
        let dialer = MockDialer::default();
        dialer.fail.store(true, Ordering::SeqCst);
        let (client, mut events) = start(&dialer);

        match next_event(&mut events).await {
            TransportEvent::Error { message } => assert!(message.contains("refused")),
            other => panic!("expected error, got {other:?}"),
        }
        assert!(!client.is_connected());

        dialer.fail.store(false, Ordering::SeqCst);
        client.reconnect();
        assert_eq!(next_event(&mut events).await, TransportEvent::Connected);

        client.shutdown().await;
    }

    #[test]
    fn parse_frame_rejects_garbage() {
        assert!(matches!(
            parse_frame("{"),
            Err(SyncError::Serialization(_))
        ));
    }
}
