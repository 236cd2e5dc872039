//! Transport abstraction consumed by the sync layer.
//!
//! The [`Transport`] trait is the minimum surface the sync components need
//! from a live socket connection: connection status, listener registration,
//! room join/leave commands and a reconnect request. Every method is
//! non-blocking; outcomes are reported later as [`TransportEvent`]s delivered
//! to registered listeners.
//!
//! Listeners are unbounded MPSC senders. Each registered listener therefore
//! owns a single-consumer queue, which is what lets the
//! [`ConnectionMonitor`](crate::ConnectionMonitor) apply events in a strict
//! total order even when the transport delivers them from several threads.
//!
//! # Implementing a Custom Transport
//!
//! ```rust
//! use expedition_sync::transport::{Listener, ListenerId, ListenerSet, Transport};
//! use expedition_sync::ExpeditionId;
//!
//! struct MyTransport {
//!     listeners: ListenerSet,
//! }
//!
//! impl Transport for MyTransport {
//!     fn is_connected(&self) -> bool {
//!         false
//!     }
//!
//!     fn on(&self, listener: Listener) -> ListenerId {
//!         self.listeners.add(listener)
//!     }
//!
//!     fn off(&self, id: ListenerId) {
//!         self.listeners.remove(id);
//!     }
//!
//!     fn join_expedition(&self, _id: ExpeditionId) {}
//!     fn leave_expedition(&self, _id: ExpeditionId) {}
//!     fn reconnect(&self) {}
//! }
//! ```

use std::fmt;
use std::sync::{Mutex, PoisonError};

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::update::{ExpeditionId, Update};

/// A signal delivered by the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The connection was established.
    Connected,
    /// The connection was lost.
    Disconnected {
        /// Why, if the transport knows.
        reason: Option<String>,
    },
    /// The connection attempt or the live connection failed.
    Error {
        message: String,
    },
    /// The connection was re-established after a loss.
    Reconnected,
    /// A reconnect attempt has started.
    ///
    /// [`ConnectionMonitor::reconnect`](crate::ConnectionMonitor::reconnect)
    /// queues this on its own listener so the attempt is ordered after every
    /// signal already delivered. Transports may emit it as well.
    Reconnecting,
    /// A server-pushed update.
    Update(Update),
}

impl TransportEvent {
    /// Event name as the server protocol spells it.
    pub fn name(&self) -> &'static str {
        match self {
            TransportEvent::Connected => "connected",
            TransportEvent::Disconnected { .. } => "disconnected",
            TransportEvent::Error { .. } => "error",
            TransportEvent::Reconnected => "reconnected",
            TransportEvent::Reconnecting => "reconnecting",
            TransportEvent::Update(update) => update.kind().event_name(),
        }
    }

    /// `true` for connection lifecycle signals, `false` for updates.
    pub fn is_lifecycle(&self) -> bool {
        !matches!(self, TransportEvent::Update(_))
    }
}

/// Sending half of a listener's event queue.
pub type Listener = mpsc::UnboundedSender<TransportEvent>;

/// Handle returned by [`Transport::on`] and accepted by [`Transport::off`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(Uuid);

impl ListenerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ListenerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A live, bidirectional connection to the expedition server.
///
/// # Object Safety
///
/// This trait is object-safe; the sync components hold it as
/// `Arc<dyn Transport>` so tests and multiple facades can share or replace it.
pub trait Transport: Send + Sync + 'static {
    /// Whether the connection is currently up.
    fn is_connected(&self) -> bool;

    /// Register a listener for every [`TransportEvent`].
    fn on(&self, listener: Listener) -> ListenerId;

    /// Deregister a listener. Unknown ids are ignored.
    fn off(&self, id: ListenerId);

    /// Ask the server to add this client to an expedition room.
    fn join_expedition(&self, id: ExpeditionId);

    /// Ask the server to remove this client from an expedition room.
    fn leave_expedition(&self, id: ExpeditionId);

    /// Request a reconnect. Returns immediately; completion is reported as a
    /// `Connected`/`Reconnected` or `Error` event.
    fn reconnect(&self);
}

// ── ListenerSet ─────────────────────────────────────────────────────

/// Registration and fan-out of listeners for [`Transport`] implementors.
#[derive(Debug, Default)]
pub struct ListenerSet {
    listeners: Mutex<Vec<(ListenerId, Listener)>>,
}

impl ListenerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, listener: Listener) -> ListenerId {
        let id = ListenerId::new();
        self.lock().push((id, listener));
        id
    }

    /// Returns `true` if the listener was registered.
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut listeners = self.lock();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    /// Deliver `event` to every listener, pruning those whose receiver is gone.
    ///
    /// Returns the number of listeners that accepted the event.
    pub fn emit(&self, event: &TransportEvent) -> usize {
        let mut listeners = self.lock();
        listeners.retain(|(id, tx)| {
            let alive = tx.send(event.clone()).is_ok();
            if !alive {
                tracing::debug!(listener = %id, "pruning closed transport listener");
            }
            alive
        });
        listeners.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(ListenerId, Listener)>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

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
    use crate::update::{ExpeditionCreated, UpdatePayload};

    #[test]
    fn emit_reaches_every_listener() {
        let set = ListenerSet::new();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        set.add(tx1);
        set.add(tx2);

        assert_eq!(set.emit(&TransportEvent::Connected), 2);
        assert_eq!(rx1.try_recv().unwrap(), TransportEvent::Connected);
        assert_eq!(rx2.try_recv().unwrap(), TransportEvent::Connected);
    }

    #[test]
    fn removed_listener_gets_nothing() {
        let set = ListenerSet::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = set.add(tx);
        assert!(set.remove(id));
        assert!(!set.remove(id));

        assert_eq!(set.emit(&TransportEvent::Reconnected), 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn closed_listeners_are_pruned() {
        let set = ListenerSet::new();
        let (tx, rx) = mpsc::unbounded_channel();
        set.add(tx);
        drop(rx);

        assert_eq!(set.emit(&TransportEvent::Connected), 0);
        assert!(set.is_empty());
    }

    #[test]
    fn event_names_follow_protocol() {
        let update = crate::update::Update::new(
            1,
            "Treasure",
            "2026-01-01T00:00:00Z",
            UpdatePayload::ExpeditionCreated(ExpeditionCreated::default()),
        );
        assert_eq!(TransportEvent::Update(update).name(), "expeditionCreated");
        assert_eq!(
            TransportEvent::Disconnected { reason: None }.name(),
            "disconnected"
        );
        assert!(TransportEvent::Reconnected.is_lifecycle());
        assert!(TransportEvent::Reconnecting.is_lifecycle());
        assert_eq!(TransportEvent::Reconnecting.name(), "reconnecting");
    }
}
