//! Room (expedition topic) membership.
//!
//! [`RoomSubscriptionManager`] owns the RoomSet: the expeditions this client
//! *intends* to be joined to. While connected the transport's joined rooms
//! should equal that set; while disconnected the set is what
//! [`rejoin_all`](RoomSubscriptionManager::rejoin_all) will restore once the
//! connection is back. Losing the connection never clears it.
//!
//! [`RoomBinding`] is the auto-join contract for one UI surface: it follows a
//! single target room and leaves it on teardown.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use crate::transport::Transport;
use crate::update::ExpeditionId;

// ── Manager ─────────────────────────────────────────────────────────

/// Keeps the transport's joined rooms consistent with the client's intent.
pub struct RoomSubscriptionManager {
    transport: Arc<dyn Transport>,
    rooms: Mutex<BTreeSet<ExpeditionId>>,
}

impl RoomSubscriptionManager {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            rooms: Mutex::new(BTreeSet::new()),
        }
    }

    /// Join `id` if the transport is connected.
    ///
    /// Offline joins are discarded with a warning rather than queued; the
    /// room is not added to the set. Returns `true` when a join was issued.
    pub fn join(&self, id: ExpeditionId) -> bool {
        let mut rooms = self.rooms_guard();
        if !self.transport.is_connected() {
            warn!(expedition_id = id, "cannot join expedition: not connected");
            return false;
        }
        self.transport.join_expedition(id);
        if rooms.insert(id) {
            debug!(expedition_id = id, "joined expedition");
        } else {
            debug!(expedition_id = id, "re-issued join for expedition");
        }
        true
    }

    /// Leave `id`. The room is always dropped from the set; the transport is
    /// only told when connected.
    pub fn leave(&self, id: ExpeditionId) {
        let mut rooms = self.rooms_guard();
        if self.transport.is_connected() {
            self.transport.leave_expedition(id);
        } else {
            debug!(expedition_id = id, "leaving expedition while offline");
        }
        if rooms.remove(&id) {
            debug!(expedition_id = id, "left expedition");
        }
    }

    /// Re-issue a join for every room in the set.
    ///
    /// The set stays locked for the whole pass. Returns the number of joins
    /// issued, which is zero when disconnected.
    pub fn rejoin_all(&self) -> usize {
        let rooms = self.rooms_guard();
        if !self.transport.is_connected() {
            debug!(rooms = rooms.len(), "skipping rejoin: not connected");
            return 0;
        }
        for id in rooms.iter() {
            self.transport.join_expedition(*id);
        }
        if !rooms.is_empty() {
            debug!(rooms = rooms.len(), "rejoined expeditions");
        }
        rooms.len()
    }

    /// Sorted snapshot of the room set.
    pub fn rooms(&self) -> Vec<ExpeditionId> {
        self.rooms_guard().iter().copied().collect()
    }

    pub fn contains(&self, id: ExpeditionId) -> bool {
        self.rooms_guard().contains(&id)
    }

    pub fn len(&self) -> usize {
        self.rooms_guard().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms_guard().is_empty()
    }

    fn rooms_guard(&self) -> MutexGuard<'_, BTreeSet<ExpeditionId>> {
        self.rooms.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for RoomSubscriptionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoomSubscriptionManager")
            .field("rooms", &*self.rooms_guard())
            .finish()
    }
}

// ── Binding ─────────────────────────────────────────────────────────

/// Auto-join contract for a single target room.
///
/// The target is joined when `auto_join` is set, the transport is connected
/// and a target is defined. Changing the target leaves the old room and
/// joins the new one; dropping the binding leaves the target.
#[derive(Debug)]
pub struct RoomBinding {
    manager: Arc<RoomSubscriptionManager>,
    target: Option<ExpeditionId>,
    auto_join: bool,
}

impl RoomBinding {
    /// Create the binding and join the target right away if possible.
    pub fn new(
        manager: Arc<RoomSubscriptionManager>,
        target: Option<ExpeditionId>,
        auto_join: bool,
    ) -> Self {
        let binding = Self {
            manager,
            target,
            auto_join,
        };
        binding.sync();
        binding
    }

    pub fn target(&self) -> Option<ExpeditionId> {
        self.target
    }

    pub fn auto_join(&self) -> bool {
        self.auto_join
    }

    /// Join the target if the auto-join conditions hold and it is not
    /// already in the room set. Returns `true` when a join was issued.
    pub fn sync(&self) -> bool {
        let Some(id) = self.target else {
            return false;
        };
        if !self.auto_join || !self.manager.transport.is_connected() {
            return false;
        }
        if self.manager.contains(id) {
            return false;
        }
        self.manager.join(id)
    }

    /// Point the binding at a different room.
    ///
    /// A no-op when the target is unchanged.
    pub fn set_target(&mut self, target: Option<ExpeditionId>) {
        if self.target == target {
            return;
        }
        self.release();
        debug!(from = ?self.target, to = ?target, "room binding retargeted");
        self.target = target;
        self.sync();
    }

    fn release(&self) {
        if let (true, Some(id)) = (self.auto_join, self.target) {
            self.manager.leave(id);
        }
    }
}

impl Drop for RoomBinding {
    fn drop(&mut self) {
        self.release();
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
    use crate::transport::{Listener, ListenerId};
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Join(ExpeditionId),
        Leave(ExpeditionId),
    }

    #[derive(Default)]
    struct RecordingTransport {
        connected: AtomicBool,
        calls: Mutex<Vec<Call>>,
    }

    impl RecordingTransport {
        fn new(connected: bool) -> Arc<Self> {
            let transport = Self::default();
            transport.connected.store(connected, Ordering::SeqCst);
            Arc::new(transport)
        }

        fn set_connected(&self, connected: bool) {
            self.connected.store(connected, Ordering::SeqCst);
        }

        fn take_calls(&self) -> Vec<Call> {
            std::mem::take(&mut *self.calls.lock().unwrap())
        }
    }

    impl Transport for RecordingTransport {
        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        fn on(&self, _listener: Listener) -> ListenerId {
            ListenerId::new()
        }

        fn off(&self, _id: ListenerId) {}

        fn join_expedition(&self, id: ExpeditionId) {
            self.calls.lock().unwrap().push(Call::Join(id));
        }

        fn leave_expedition(&self, id: ExpeditionId) {
            self.calls.lock().unwrap().push(Call::Leave(id));
        }

        fn reconnect(&self) {}
    }

    fn manager(transport: &Arc<RecordingTransport>) -> Arc<RoomSubscriptionManager> {
        Arc::new(RoomSubscriptionManager::new(transport.clone()))
    }

    #[test]
    fn double_join_keeps_single_entry() {
        let transport = RecordingTransport::new(true);
        let rooms = manager(&transport);

        assert!(rooms.join(5));
        assert!(rooms.join(5));
        assert_eq!(rooms.rooms(), vec![5]);
        assert_eq!(transport.take_calls(), vec![Call::Join(5), Call::Join(5)]);
    }

    #[test]
    fn join_while_offline_is_discarded() {
        let transport = RecordingTransport::new(false);
        let rooms = manager(&transport);

        assert!(!rooms.join(1));
        assert!(rooms.is_empty());
        assert!(transport.take_calls().is_empty());

        transport.set_connected(true);
        assert_eq!(rooms.rejoin_all(), 0);
    }

    #[test]
    fn leave_always_removes_but_only_sends_when_connected() {
        let transport = RecordingTransport::new(true);
        let rooms = manager(&transport);
        rooms.join(1);
        rooms.join(2);
        transport.take_calls();

        transport.set_connected(false);
        rooms.leave(1);
        assert_eq!(rooms.rooms(), vec![2]);
        assert!(transport.take_calls().is_empty());

        transport.set_connected(true);
        rooms.leave(2);
        assert!(rooms.is_empty());
        assert_eq!(transport.take_calls(), vec![Call::Leave(2)]);
    }

    #[test]
    fn disconnect_preserves_rooms_for_rejoin() {
        let transport = RecordingTransport::new(true);
        let rooms = manager(&transport);
        for id in [1, 2, 3] {
            rooms.join(id);
        }
        transport.take_calls();

        transport.set_connected(false);
        assert_eq!(rooms.rejoin_all(), 0);
        assert_eq!(rooms.len(), 3);

        transport.set_connected(true);
        assert_eq!(rooms.rejoin_all(), 3);
        let mut calls = transport.take_calls();
        calls.sort_by_key(|c| match c {
            Call::Join(id) | Call::Leave(id) => *id,
        });
        assert_eq!(calls, vec![Call::Join(1), Call::Join(2), Call::Join(3)]);
    }

    #[test]
    fn rejoin_with_empty_set_issues_nothing() {
        let transport = RecordingTransport::new(true);
        let rooms = manager(&transport);
        assert_eq!(rooms.rejoin_all(), 0);
        assert!(transport.take_calls().is_empty());
    }

    #[test]
    fn binding_switches_rooms_on_target_change() {
        let transport = RecordingTransport::new(true);
        let rooms = manager(&transport);

        let mut binding = RoomBinding::new(Arc::clone(&rooms), Some(1), true);
        assert_eq!(transport.take_calls(), vec![Call::Join(1)]);

        binding.set_target(Some(2));
        assert_eq!(transport.take_calls(), vec![Call::Leave(1), Call::Join(2)]);
        assert_eq!(rooms.rooms(), vec![2]);

        binding.set_target(Some(2));
        assert!(transport.take_calls().is_empty());
    }

    #[test]
    fn binding_leaves_on_drop() {
        let transport = RecordingTransport::new(true);
        let rooms = manager(&transport);
        {
            let _binding = RoomBinding::new(Arc::clone(&rooms), Some(4), true);
            assert!(rooms.contains(4));
        }
        assert!(rooms.is_empty());
        assert_eq!(transport.take_calls(), vec![Call::Join(4), Call::Leave(4)]);
    }

    #[test]
    fn binding_without_auto_join_does_nothing() {
        let transport = RecordingTransport::new(true);
        let rooms = manager(&transport);
        {
            let mut binding = RoomBinding::new(Arc::clone(&rooms), Some(4), false);
            binding.set_target(Some(5));
            assert!(!binding.sync());
        }
        assert!(transport.take_calls().is_empty());
    }

    #[test]
    fn binding_joins_once_connection_is_up() {
        let transport = RecordingTransport::new(false);
        let rooms = manager(&transport);

        let binding = RoomBinding::new(Arc::clone(&rooms), Some(8), true);
        assert!(rooms.is_empty());

        transport.set_connected(true);
        assert!(binding.sync());
        assert!(!binding.sync());
        assert_eq!(transport.take_calls(), vec![Call::Join(8)]);
    }
}
