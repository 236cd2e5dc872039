//! Connection health and the rolling buffer of received updates.
//!
//! [`ConnectionMonitor`] registers one listener with the [`Transport`] and
//! drains it on a background task. That task is the only writer of the
//! connection state and the update log (besides [`clear_updates`], which goes
//! through the same lock), so every event is applied in the order the
//! transport delivered it. [`reconnect`] feeds the same queue rather than
//! writing the state directly.
//!
//! # Example
//!
//! ```rust,ignore
//! let monitor = ConnectionMonitor::new(transport, MonitorConfig::default());
//! monitor.on_update(|update| println!("{} changed", update.expedition_name));
//!
//! let mut states = monitor.state_changes();
//! states.wait_for(|s| s.is_connected()).await?;
//! ```
//!
//! [`clear_updates`]: ConnectionMonitor::clear_updates
//! [`reconnect`]: ConnectionMonitor::reconnect

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::transport::{ListenerId, Transport, TransportEvent};
use crate::update::Update;
use crate::update_log::{UpdateLog, DEFAULT_MAX_UPDATES};

/// Default capacity of the update broadcast channel.
pub(crate) const DEFAULT_UPDATE_CHANNEL_CAPACITY: usize = 256;

// ── Connection state ────────────────────────────────────────────────

/// Health of the transport connection as seen by the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// State after receiving a transport signal.
    ///
    /// `Error` is sticky: only a `Reconnecting` signal leaves it. Updates
    /// never change the state.
    pub fn on_signal(self, event: &TransportEvent) -> ConnectionState {
        use ConnectionState::*;

        match (self, event) {
            (state, TransportEvent::Reconnecting) => state.on_reconnect_request(),
            (_, TransportEvent::Error { .. }) => Error,
            (Error, _) => Error,
            (_, TransportEvent::Connected) | (_, TransportEvent::Reconnected) => Connected,
            (Connected | Connecting, TransportEvent::Disconnected { .. }) => Disconnected,
            (Disconnected, TransportEvent::Disconnected { .. }) => Disconnected,
            (state, TransportEvent::Update(_)) => state,
        }
    }

    /// State after the caller asks for a reconnect.
    pub fn on_reconnect_request(self) -> ConnectionState {
        ConnectionState::Connecting
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Error => "error",
        })
    }
}

// ── Configuration ───────────────────────────────────────────────────

/// Configuration for a [`ConnectionMonitor`].
///
/// ```
/// use expedition_sync::MonitorConfig;
///
/// let config = MonitorConfig::default().with_max_updates(50);
/// assert_eq!(config.max_updates, 50);
/// ```
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Number of updates kept by [`ConnectionMonitor::recent_updates`].
    ///
    /// Defaults to **20**. Values below 1 are clamped to 1.
    pub max_updates: usize,
    /// Capacity of the channel behind [`ConnectionMonitor::subscribe`].
    ///
    /// Slow subscribers that fall further behind than this observe a
    /// `Lagged` error and skip ahead. Defaults to **256**; values below 1 are
    /// clamped to 1.
    pub update_channel_capacity: usize,
}

impl MonitorConfig {
    #[must_use]
    pub fn with_max_updates(mut self, max_updates: usize) -> Self {
        self.max_updates = max_updates.max(1);
        self
    }

    #[must_use]
    pub fn with_update_channel_capacity(mut self, capacity: usize) -> Self {
        self.update_channel_capacity = capacity.max(1);
        self
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            max_updates: DEFAULT_MAX_UPDATES,
            update_channel_capacity: DEFAULT_UPDATE_CHANNEL_CAPACITY,
        }
    }
}

// ── Handlers ────────────────────────────────────────────────────────

/// Callback invoked once per accepted update.
pub type UpdateHandler = Arc<dyn Fn(&Update) + Send + Sync>;

/// Handle returned by [`ConnectionMonitor::on_update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

// ── Shared state ────────────────────────────────────────────────────

#[derive(Debug)]
struct Details {
    log: UpdateLog,
    last_error: Option<String>,
    last_disconnect_reason: Option<String>,
}

/// State shared between the monitor handle and its event loop.
struct MonitorShared {
    state_tx: watch::Sender<ConnectionState>,
    details: Mutex<Details>,
    handlers: Mutex<Vec<(HandlerId, UpdateHandler)>>,
    next_handler: AtomicU64,
    updates_tx: broadcast::Sender<Update>,
}

impl MonitorShared {
    fn details(&self) -> MutexGuard<'_, Details> {
        self.details.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn handlers(&self) -> MutexGuard<'_, Vec<(HandlerId, UpdateHandler)>> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn apply(&self, event: TransportEvent) {
        match event {
            TransportEvent::Update(update) => self.accept(update),
            signal => self.transition(&signal),
        }
    }

    fn transition(&self, signal: &TransportEvent) {
        match signal {
            TransportEvent::Error { message } => {
                error!(error = %message, "transport connection error");
                self.details().last_error = Some(message.clone());
            }
            TransportEvent::Disconnected { reason } => {
                debug!(reason = ?reason, "transport disconnected");
                self.details().last_disconnect_reason = reason.clone();
            }
            _ => {}
        }

        self.state_tx.send_if_modified(|state| {
            let next = state.on_signal(signal);
            if next == *state {
                debug!(state = %state, signal = signal.name(), "signal left state unchanged");
                return false;
            }
            debug!(from = %state, to = %next, signal = signal.name(), "connection state changed");
            *state = next;
            true
        });
    }

    fn accept(&self, update: Update) {
        // Snapshot so handlers may register or remove handlers themselves.
        let handlers: Vec<UpdateHandler> = self
            .handlers()
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();

        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(&update))).is_err() {
                warn!(
                    expedition_id = update.expedition_id,
                    kind = %update.kind(),
                    "update handler panicked"
                );
            }
        }

        if let Some(evicted) = self.details().log.push(update.clone()) {
            debug!(expedition_id = evicted.expedition_id, "evicted oldest update");
        }

        // No receivers is fine; the log still holds the update.
        let _ = self.updates_tx.send(update);
    }
}

// ── Monitor ─────────────────────────────────────────────────────────

/// Single source of truth for connection health and recent updates.
///
/// Must be created inside a tokio runtime. Dropping the monitor disposes it.
pub struct ConnectionMonitor {
    transport: Arc<dyn Transport>,
    shared: Arc<MonitorShared>,
    /// Second sender into the listener queue, used for local requests.
    requests: mpsc::UnboundedSender<TransportEvent>,
    listener: Mutex<Option<ListenerId>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionMonitor {
    /// Register with `transport` and start draining its events.
    pub fn new(transport: Arc<dyn Transport>, config: MonitorConfig) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        // Register before sampling `is_connected` so no signal slips between.
        let listener = transport.on(event_tx.clone());

        let initial = if transport.is_connected() {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        };
        debug!(state = %initial, listener = %listener, "connection monitor created");

        let (state_tx, _) = watch::channel(initial);
        let (updates_tx, _) = broadcast::channel(config.update_channel_capacity.max(1));
        let shared = Arc::new(MonitorShared {
            state_tx,
            details: Mutex::new(Details {
                log: UpdateLog::with_capacity(config.max_updates),
                last_error: None,
                last_disconnect_reason: None,
            }),
            handlers: Mutex::new(Vec::new()),
            next_handler: AtomicU64::new(0),
            updates_tx,
        });

        let task = tokio::spawn(monitor_loop(event_rx, Arc::clone(&shared)));

        Self {
            transport,
            shared,
            requests: event_tx,
            listener: Mutex::new(Some(listener)),
            task: Mutex::new(Some(task)),
        }
    }

    // ── Reads ───────────────────────────────────────────────────────

    pub fn current_state(&self) -> ConnectionState {
        *self.shared.state_tx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.current_state().is_connected()
    }

    /// Snapshot of the update log, newest first.
    pub fn recent_updates(&self) -> Vec<Update> {
        self.shared.details().log.snapshot()
    }

    /// Message of the most recent transport error, if any.
    pub fn last_error(&self) -> Option<String> {
        self.shared.details().last_error.clone()
    }

    /// Reason carried by the most recent `disconnected` signal.
    pub fn last_disconnect_reason(&self) -> Option<String> {
        self.shared.details().last_disconnect_reason.clone()
    }

    /// Watch connection state transitions.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Receive every update accepted from now on, after handlers have run.
    pub fn subscribe(&self) -> broadcast::Receiver<Update> {
        self.shared.updates_tx.subscribe()
    }

    // ── Handlers ────────────────────────────────────────────────────

    /// Register `handler` to run once per accepted update, in arrival order.
    ///
    /// Handlers run in registration order on the monitor task and before the
    /// update is visible through [`recent_updates`](Self::recent_updates).
    /// A panicking handler is logged and skipped.
    pub fn on_update<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&Update) + Send + Sync + 'static,
    {
        let id = HandlerId(self.shared.next_handler.fetch_add(1, Ordering::Relaxed));
        self.shared.handlers().push((id, Arc::new(handler)));
        id
    }

    /// Returns `true` if the handler was registered.
    pub fn remove_handler(&self, id: HandlerId) -> bool {
        let mut handlers = self.shared.handlers();
        let before = handlers.len();
        handlers.retain(|(existing, _)| *existing != id);
        handlers.len() != before
    }

    // ── Commands ────────────────────────────────────────────────────

    /// Empty the update log. Connection state is untouched.
    pub fn clear_updates(&self) {
        self.shared.details().log.clear();
    }

    /// Move to `Connecting` and ask the transport to reconnect.
    ///
    /// The `Connecting` transition is queued behind every signal the
    /// transport has already delivered, and ahead of anything the reconnect
    /// itself produces. Every call re-issues the request; completion arrives
    /// later as a `connected` or `error` signal.
    pub fn reconnect(&self) {
        debug!("reconnect requested");
        if self.requests.send(TransportEvent::Reconnecting).is_err() {
            debug!("monitor loop stopped, reconnect not recorded");
        }
        self.transport.reconnect();
    }

    /// Deregister from the transport and stop the event loop.
    ///
    /// Safe to call more than once; only the first call has an effect.
    pub fn dispose(&self) {
        let listener = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(id) = listener {
            self.transport.off(id);
            debug!(listener = %id, "connection monitor disposed");
        }

        let task = self.task.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(task) = task {
            task.abort();
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

impl fmt::Debug for ConnectionMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionMonitor")
            .field("state", &self.current_state())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl Drop for ConnectionMonitor {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Apply transport events one at a time until the listener is dropped.
async fn monitor_loop(
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
    shared: Arc<MonitorShared>,
) {
    debug!("connection monitor loop started");
    while let Some(event) = events.recv().await {
        shared.apply(event);
    }
    debug!("connection monitor loop exited");
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
    use crate::transport::{Listener, ListenerSet};
    use crate::update::{
        DeadlineWarning, ExpeditionCompleted, ExpeditionId, ItemConsumed, UpdatePayload,
    };
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(2);

    // ── Mock transport ──────────────────────────────────────────────

    #[derive(Default)]
    struct ScriptedTransport {
        connected: AtomicBool,
        listeners: ListenerSet,
        reconnects: AtomicUsize,
    }

    impl ScriptedTransport {
        fn connected() -> Arc<Self> {
            let transport = Self::default();
            transport.connected.store(true, Ordering::SeqCst);
            Arc::new(transport)
        }

        fn emit(&self, event: TransportEvent) {
            self.listeners.emit(&event);
        }
    }

    impl Transport for ScriptedTransport {
        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        fn on(&self, listener: Listener) -> ListenerId {
            self.listeners.add(listener)
        }

        fn off(&self, id: ListenerId) {
            self.listeners.remove(id);
        }

        fn join_expedition(&self, _id: ExpeditionId) {}

        fn leave_expedition(&self, _id: ExpeditionId) {}

        fn reconnect(&self) {
            self.reconnects.fetch_add(1, Ordering::SeqCst);
        }
    }

    // ── Helpers ─────────────────────────────────────────────────────

    fn consumed(id: ExpeditionId) -> Update {
        Update::new(
            id,
            format!("expedition {id}"),
            "2026-01-01T00:00:00Z",
            UpdatePayload::ItemConsumed(ItemConsumed {
                item_name: "hardtack".into(),
                quantity: 1,
                consumer_name: None,
            }),
        )
    }

    async fn wait_for_state(monitor: &ConnectionMonitor, want: ConnectionState) {
        let mut rx = monitor.state_changes();
        tokio::time::timeout(WAIT, rx.wait_for(|s| *s == want))
            .await
            .expect("timed out waiting for state")
            .expect("state channel closed");
    }

    /// Emit a marker update and wait until the monitor has applied it, which
    /// proves every earlier event has been applied too.
    async fn flush(transport: &ScriptedTransport, monitor: &ConnectionMonitor) {
        let mut rx = monitor.subscribe();
        transport.emit(TransportEvent::Update(consumed(u64::MAX)));
        loop {
            let update = tokio::time::timeout(WAIT, rx.recv())
                .await
                .expect("timed out flushing monitor")
                .unwrap();
            if update.expedition_id == u64::MAX {
                break;
            }
        }
    }

    // ── State machine ───────────────────────────────────────────────

    #[test]
    fn error_only_leaves_via_reconnect_request() {
        use ConnectionState::*;

        let signals = [
            TransportEvent::Connected,
            TransportEvent::Reconnected,
            TransportEvent::Disconnected { reason: None },
            TransportEvent::Update(consumed(1)),
        ];
        for signal in &signals {
            assert_eq!(Error.on_signal(signal), Error, "signal {}", signal.name());
        }
        assert_eq!(Error.on_reconnect_request(), Connecting);
        assert_eq!(Error.on_signal(&TransportEvent::Reconnecting), Connecting);
    }

    #[test]
    fn transition_table() {
        use ConnectionState::*;

        let disconnected = TransportEvent::Disconnected {
            reason: Some("io".into()),
        };
        let error = TransportEvent::Error {
            message: "boom".into(),
        };

        assert_eq!(Disconnected.on_signal(&TransportEvent::Connected), Connected);
        assert_eq!(Connecting.on_signal(&TransportEvent::Connected), Connected);
        assert_eq!(Connected.on_signal(&disconnected), Disconnected);
        assert_eq!(Connecting.on_signal(&disconnected), Disconnected);
        assert_eq!(Disconnected.on_signal(&disconnected), Disconnected);
        assert_eq!(Connected.on_signal(&TransportEvent::Reconnected), Connected);
        assert_eq!(Disconnected.on_signal(&TransportEvent::Reconnected), Connected);
        for state in [Disconnected, Connecting, Connected, Error] {
            assert_eq!(state.on_signal(&error), Error);
            assert_eq!(state.on_signal(&TransportEvent::Reconnecting), Connecting);
            assert_eq!(state.on_reconnect_request(), Connecting);
        }
    }

    #[test]
    fn state_display_matches_serde() {
        for state in [
            ConnectionState::Disconnected,
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Error,
        ] {
            let json = serde_json::to_string(&state).unwrap();
            assert_eq!(json, format!("\"{state}\""));
        }
    }

    // ── Monitor ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn initial_state_follows_transport() {
        let online = ScriptedTransport::connected();
        let monitor = ConnectionMonitor::new(online, MonitorConfig::default());
        assert_eq!(monitor.current_state(), ConnectionState::Connected);

        let offline = Arc::new(ScriptedTransport::default());
        let monitor = ConnectionMonitor::new(offline, MonitorConfig::default());
        assert_eq!(monitor.current_state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn log_keeps_most_recent_updates() {
        let transport = ScriptedTransport::connected();
        let monitor = ConnectionMonitor::new(
            transport.clone(),
            MonitorConfig::default().with_max_updates(3),
        );
        let mut rx = monitor.subscribe();

        for id in 0..5 {
            transport.emit(TransportEvent::Update(consumed(id)));
        }
        for _ in 0..5 {
            tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        }

        let ids: Vec<_> = monitor
            .recent_updates()
            .iter()
            .map(|u| u.expedition_id)
            .collect();
        assert_eq!(ids, vec![4, 3, 2]);
    }

    #[tokio::test]
    async fn every_update_kind_is_logged_but_signals_are_not() {
        let transport = ScriptedTransport::connected();
        let monitor = ConnectionMonitor::new(transport.clone(), MonitorConfig::default());

        transport.emit(TransportEvent::Reconnected);
        transport.emit(TransportEvent::Update(Update::new(
            1,
            "a",
            "t",
            UpdatePayload::ExpeditionCompleted(ExpeditionCompleted::default()),
        )));
        transport.emit(TransportEvent::Disconnected { reason: None });
        transport.emit(TransportEvent::Update(Update::new(
            2,
            "b",
            "t",
            UpdatePayload::DeadlineWarning(DeadlineWarning {
                deadline: "2026-02-01T00:00:00Z".into(),
                hours_remaining: Some(3),
            }),
        )));
        flush(&transport, &monitor).await;

        let ids: Vec<_> = monitor
            .recent_updates()
            .iter()
            .map(|u| u.expedition_id)
            .collect();
        assert_eq!(ids, vec![u64::MAX, 2, 1]);
        assert_eq!(monitor.current_state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn disconnected_while_in_error_is_ignored() {
        let transport = ScriptedTransport::connected();
        let monitor = ConnectionMonitor::new(transport.clone(), MonitorConfig::default());

        transport.emit(TransportEvent::Error {
            message: "socket hang up".into(),
        });
        wait_for_state(&monitor, ConnectionState::Error).await;
        assert_eq!(monitor.last_error().as_deref(), Some("socket hang up"));

        transport.emit(TransportEvent::Disconnected {
            reason: Some("transport close".into()),
        });
        transport.emit(TransportEvent::Connected);
        flush(&transport, &monitor).await;
        assert_eq!(monitor.current_state(), ConnectionState::Error);
        assert_eq!(
            monitor.last_disconnect_reason().as_deref(),
            Some("transport close")
        );

        monitor.reconnect();
        assert_eq!(transport.reconnects.load(Ordering::SeqCst), 1);
        wait_for_state(&monitor, ConnectionState::Connecting).await;

        transport.emit(TransportEvent::Connected);
        wait_for_state(&monitor, ConnectionState::Connected).await;
    }

    #[tokio::test]
    async fn reconnect_reissues_request_every_call() {
        let transport = Arc::new(ScriptedTransport::default());
        let monitor = ConnectionMonitor::new(transport.clone(), MonitorConfig::default());

        monitor.reconnect();
        monitor.reconnect();
        assert_eq!(transport.reconnects.load(Ordering::SeqCst), 2);
        flush(&transport, &monitor).await;
        assert_eq!(monitor.current_state(), ConnectionState::Connecting);
    }

    #[tokio::test]
    async fn reconnect_is_ordered_between_queued_signals() {
        let transport = ScriptedTransport::connected();
        let monitor = ConnectionMonitor::new(transport.clone(), MonitorConfig::default());

        // The error is still queued when reconnect() runs.
        transport.emit(TransportEvent::Error {
            message: "socket hang up".into(),
        });
        monitor.reconnect();
        transport.emit(TransportEvent::Connected);

        flush(&transport, &monitor).await;
        assert_eq!(monitor.current_state(), ConnectionState::Connected);
        assert_eq!(monitor.last_error().as_deref(), Some("socket hang up"));
    }

    #[tokio::test]
    async fn reconnect_after_dispose_still_asks_transport() {
        let transport = ScriptedTransport::connected();
        let monitor = ConnectionMonitor::new(transport.clone(), MonitorConfig::default());

        monitor.dispose();
        monitor.reconnect();
        assert_eq!(transport.reconnects.load(Ordering::SeqCst), 1);
        assert_eq!(monitor.current_state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn handlers_run_before_update_is_visible() {
        let transport = ScriptedTransport::connected();
        let monitor = Arc::new(ConnectionMonitor::new(
            transport.clone(),
            MonitorConfig::default(),
        ));

        let seen_in_log = Arc::new(AtomicBool::new(true));
        let weak = Arc::downgrade(&monitor);
        let flag = Arc::clone(&seen_in_log);
        monitor.on_update(move |update: &Update| {
            if let Some(monitor) = weak.upgrade() {
                let visible = monitor
                    .recent_updates()
                    .iter()
                    .any(|u| u.expedition_id == update.expedition_id);
                flag.store(visible, Ordering::SeqCst);
            }
        });

        transport.emit(TransportEvent::Update(consumed(9)));
        flush(&transport, &monitor).await;
        assert!(!seen_in_log.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn panicking_handler_does_not_stop_delivery() {
        let transport = ScriptedTransport::connected();
        let monitor = ConnectionMonitor::new(transport.clone(), MonitorConfig::default());

        let calls = Arc::new(AtomicUsize::new(0));
        monitor.on_update(|_: &Update| panic!("handler bug"));
        {
            let calls = Arc::clone(&calls);
            monitor.on_update(move |_: &Update| {
                calls.fetch_add(1, Ordering::SeqCst);
            });
        }

        transport.emit(TransportEvent::Update(consumed(1)));
        flush(&transport, &monitor).await;
        // The marker update counts as well.
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(monitor.recent_updates().len(), 2);
    }

    #[tokio::test]
    async fn removed_handler_is_not_called() {
        let transport = ScriptedTransport::connected();
        let monitor = ConnectionMonitor::new(transport.clone(), MonitorConfig::default());

        let calls = Arc::new(AtomicUsize::new(0));
        let id = {
            let calls = Arc::clone(&calls);
            monitor.on_update(move |_: &Update| {
                calls.fetch_add(1, Ordering::SeqCst);
            })
        };
        assert!(monitor.remove_handler(id));
        assert!(!monitor.remove_handler(id));

        flush(&transport, &monitor).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn clear_updates_keeps_connection_state() {
        let transport = ScriptedTransport::connected();
        let monitor = ConnectionMonitor::new(transport.clone(), MonitorConfig::default());

        flush(&transport, &monitor).await;
        assert_eq!(monitor.recent_updates().len(), 1);

        monitor.clear_updates();
        assert!(monitor.recent_updates().is_empty());
        assert_eq!(monitor.current_state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn dispose_deregisters_listener_once() {
        let transport = ScriptedTransport::connected();
        let monitor = ConnectionMonitor::new(transport.clone(), MonitorConfig::default());
        assert_eq!(transport.listeners.len(), 1);

        monitor.dispose();
        monitor.dispose();
        assert!(monitor.is_disposed());
        assert!(transport.listeners.is_empty());

        transport.emit(TransportEvent::Update(consumed(1)));
        tokio::task::yield_now().await;
        assert!(monitor.recent_updates().is_empty());
    }

    #[tokio::test]
    async fn drop_deregisters_listener() {
        let transport = ScriptedTransport::connected();
        {
            let _monitor = ConnectionMonitor::new(transport.clone(), MonitorConfig::default());
            assert_eq!(transport.listeners.len(), 1);
        }
        assert!(transport.listeners.is_empty());
    }
}
