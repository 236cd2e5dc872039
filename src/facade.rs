//! The one object UI surfaces depend on.
//!
//! [`SyncFacade`] wires a [`ConnectionMonitor`], a [`NotificationDispatcher`]
//! and a [`RoomSubscriptionManager`] together:
//!
//! - the dispatcher is the monitor's first update handler, so the haptic cue
//!   and popup for an update fire before the update shows up in
//!   [`recent_updates`](SyncFacade::recent_updates) or
//!   [`subscribe`](SyncFacade::subscribe);
//! - a watcher task rejoins every room (and the bound target room) each time
//!   the connection comes back.
//!
//! # Example
//!
//! ```rust,ignore
//! let config = SyncConfig::new()
//!     .with_room(Some(42))
//!     .with_policy(NotificationPolicy::default().with_haptic(false));
//! let sync = SyncFacade::new(transport, config, Arc::new(TracingSink), Arc::new(TracingSink))?;
//!
//! let mut updates = sync.subscribe();
//! while let Ok(update) = updates.recv().await {
//!     render(&sync.recent_updates());
//! }
//! ```

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::{Result, SyncError};
use crate::monitor::{
    ConnectionMonitor, ConnectionState, HandlerId, MonitorConfig, DEFAULT_UPDATE_CHANNEL_CAPACITY,
};
use crate::notify::{HapticSink, NotificationDispatcher, NotificationPolicy, PopupSink};
use crate::rooms::{RoomBinding, RoomSubscriptionManager};
use crate::transport::Transport;
use crate::update::{ExpeditionId, Update};
use crate::update_log::DEFAULT_MAX_UPDATES;

// ── Configuration ───────────────────────────────────────────────────

/// Construction parameters for a [`SyncFacade`].
///
/// ```
/// use expedition_sync::SyncConfig;
///
/// let config = SyncConfig::new().with_room(Some(7)).with_max_updates(50);
/// assert_eq!(config.room, Some(7));
/// assert!(config.auto_join_expeditions);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Expedition whose room this facade follows, if any.
    pub room: Option<ExpeditionId>,
    /// Haptic/popup switches.
    pub policy: NotificationPolicy,
    /// Join [`room`](Self::room) automatically whenever connected.
    ///
    /// Defaults to **true**.
    pub auto_join_expeditions: bool,
    /// Number of recent updates retained. Defaults to **20**; must be > 0.
    pub max_updates: usize,
    /// Capacity of the [`SyncFacade::subscribe`] channel. Defaults to
    /// **256**; must be > 0.
    pub update_channel_capacity: usize,
}

impl SyncConfig {
    pub fn new() -> Self {
        Self {
            room: None,
            policy: NotificationPolicy::default(),
            auto_join_expeditions: true,
            max_updates: DEFAULT_MAX_UPDATES,
            update_channel_capacity: DEFAULT_UPDATE_CHANNEL_CAPACITY,
        }
    }

    #[must_use]
    pub fn with_room(mut self, room: Option<ExpeditionId>) -> Self {
        self.room = room;
        self
    }

    #[must_use]
    pub fn with_policy(mut self, policy: NotificationPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn with_auto_join(mut self, auto_join: bool) -> Self {
        self.auto_join_expeditions = auto_join;
        self
    }

    #[must_use]
    pub fn with_max_updates(mut self, max_updates: usize) -> Self {
        self.max_updates = max_updates;
        self
    }

    #[must_use]
    pub fn with_update_channel_capacity(mut self, capacity: usize) -> Self {
        self.update_channel_capacity = capacity;
        self
    }

    /// # Errors
    ///
    /// Returns [`SyncError::InvalidConfig`] for a zero `max_updates` or
    /// `update_channel_capacity`.
    pub fn validate(&self) -> Result<()> {
        if self.max_updates == 0 {
            return Err(SyncError::InvalidConfig(
                "max_updates must be at least 1".into(),
            ));
        }
        if self.update_channel_capacity == 0 {
            return Err(SyncError::InvalidConfig(
                "update_channel_capacity must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

// ── Facade ──────────────────────────────────────────────────────────

/// Connection health, recent updates, room membership and notifications
/// behind one handle.
///
/// Must be created inside a tokio runtime. Dropping the facade leaves the
/// bound room and deregisters from the transport.
pub struct SyncFacade {
    monitor: Arc<ConnectionMonitor>,
    rooms: Arc<RoomSubscriptionManager>,
    binding: Arc<Mutex<RoomBinding>>,
    policy: NotificationPolicy,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl SyncFacade {
    /// Build the facade over `transport`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidConfig`] if `config` fails
    /// [`SyncConfig::validate`].
    pub fn new(
        transport: Arc<dyn Transport>,
        config: SyncConfig,
        haptics: Arc<dyn HapticSink>,
        popups: Arc<dyn PopupSink>,
    ) -> Result<Self> {
        config.validate()?;

        let monitor = Arc::new(ConnectionMonitor::new(
            Arc::clone(&transport),
            MonitorConfig::default()
                .with_max_updates(config.max_updates)
                .with_update_channel_capacity(config.update_channel_capacity),
        ));

        // Registered first so notifications precede every other consumer.
        let dispatcher = NotificationDispatcher::new(config.policy, haptics, popups);
        monitor.on_update(move |update| dispatcher.notify(update));

        // Subscribe before the binding's first sync samples the transport, so a
        // connect landing in between still reaches the watcher.
        let states = monitor.state_changes();
        let rooms = Arc::new(RoomSubscriptionManager::new(transport));
        let binding = Arc::new(Mutex::new(RoomBinding::new(
            Arc::clone(&rooms),
            config.room,
            config.auto_join_expeditions,
        )));

        let watcher = tokio::spawn(rejoin_on_connect(
            states,
            Arc::clone(&rooms),
            Arc::clone(&binding),
        ));

        debug!(
            room = ?config.room,
            auto_join = config.auto_join_expeditions,
            "sync facade started"
        );

        Ok(Self {
            monitor,
            rooms,
            binding,
            policy: config.policy,
            watcher: Mutex::new(Some(watcher)),
        })
    }

    // ── Connection ──────────────────────────────────────────────────

    pub fn is_connected(&self) -> bool {
        self.monitor.is_connected()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.monitor.current_state()
    }

    pub fn last_error(&self) -> Option<String> {
        self.monitor.last_error()
    }

    /// Request a reconnect; see [`ConnectionMonitor::reconnect`].
    pub fn reconnect(&self) {
        self.monitor.reconnect();
    }

    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.monitor.state_changes()
    }

    // ── Updates ─────────────────────────────────────────────────────

    /// Recent updates, newest first.
    pub fn recent_updates(&self) -> Vec<Update> {
        self.monitor.recent_updates()
    }

    pub fn clear_updates(&self) {
        self.monitor.clear_updates();
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Update> {
        self.monitor.subscribe()
    }

    /// Register an extra update handler. It runs after notifications.
    pub fn on_update<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&Update) + Send + Sync + 'static,
    {
        self.monitor.on_update(handler)
    }

    pub fn policy(&self) -> NotificationPolicy {
        self.policy
    }

    // ── Rooms ───────────────────────────────────────────────────────

    /// Join a room; discarded with a warning while offline.
    pub fn join(&self, id: ExpeditionId) -> bool {
        self.rooms.join(id)
    }

    pub fn leave(&self, id: ExpeditionId) {
        self.rooms.leave(id);
    }

    /// Rooms this facade intends to be in, sorted.
    pub fn rooms(&self) -> Vec<ExpeditionId> {
        self.rooms.rooms()
    }

    /// Follow a different expedition, leaving the previous one.
    pub fn set_room(&self, room: Option<ExpeditionId>) {
        self.binding().set_target(room);
    }

    pub fn room(&self) -> Option<ExpeditionId> {
        self.binding().target()
    }

    // ── Teardown ────────────────────────────────────────────────────

    /// Stop the watcher, leave the bound room and deregister from the
    /// transport. Idempotent.
    pub fn shutdown(&self) {
        let watcher = self
            .watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(watcher) = watcher else {
            return;
        };
        watcher.abort();
        self.binding().set_target(None);
        self.monitor.dispose();
        debug!("sync facade shut down");
    }

    fn binding(&self) -> MutexGuard<'_, RoomBinding> {
        self.binding.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for SyncFacade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncFacade")
            .field("state", &self.connection_state())
            .field("room", &self.room())
            .field("rooms", &self.rooms())
            .field("policy", &self.policy)
            .finish()
    }
}

impl Drop for SyncFacade {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Restore room membership every time the connection comes back.
///
/// A change notification only fires when the state actually moved, so seeing
/// `Connected` here means the connection was (re-)established.
async fn rejoin_on_connect(
    mut states: watch::Receiver<ConnectionState>,
    rooms: Arc<RoomSubscriptionManager>,
    binding: Arc<Mutex<RoomBinding>>,
) {
    while states.changed().await.is_ok() {
        let connected = states.borrow_and_update().is_connected();
        if !connected {
            continue;
        }
        let rejoined = rooms.rejoin_all();
        let joined_target = binding
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .sync();
        debug!(rejoined, joined_target, "restored rooms after connect");
    }
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

    #[test]
    fn config_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.room, None);
        assert!(config.auto_join_expeditions);
        assert_eq!(config.max_updates, 20);
        assert_eq!(config.update_channel_capacity, 256);
        assert_eq!(
            config.update_channel_capacity,
            MonitorConfig::default().update_channel_capacity
        );
        assert_eq!(config.policy, NotificationPolicy::default());
    }

    #[test]
    fn zero_max_updates_is_rejected() {
        let err = SyncConfig::new().with_max_updates(0).validate().unwrap_err();
        assert!(matches!(err, SyncError::InvalidConfig(_)));
    }

    #[test]
    fn zero_channel_capacity_is_rejected() {
        let err = SyncConfig::new()
            .with_update_channel_capacity(0)
            .validate()
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidConfig(_)));
    }
}
