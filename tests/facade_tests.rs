#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
//! End-to-end tests for `SyncFacade`.
//!
//! A scriptable `MockTransport` from `tests/common` drives connection signals
//! and updates; a `RecordingSink` captures haptic cues and popups.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use expedition_sync::transport::{Listener, ListenerId, Transport};
use expedition_sync::{
    ConnectionState, ExpeditionId, HapticCue, NotificationPolicy, SyncConfig, SyncError,
    SyncFacade, Update, UpdateKind,
};
use tokio::sync::broadcast;
use tokio_test::assert_ok;

use common::{
    completed, consumed, created, deadline, init_tracing, updated, wait_until, Call, Effect,
    Failure, MockTransport, RecordingSink, WAIT,
};

// ════════════════════════════════════════════════════════════════════
// Helpers
// ════════════════════════════════════════════════════════════════════

fn start(transport: &Arc<MockTransport>, config: SyncConfig) -> (SyncFacade, Arc<RecordingSink>) {
    start_with_sink(transport, config, RecordingSink::new())
}

fn start_with_sink(
    transport: &Arc<MockTransport>,
    config: SyncConfig,
    sink: Arc<RecordingSink>,
) -> (SyncFacade, Arc<RecordingSink>) {
    init_tracing();
    let facade = assert_ok!(SyncFacade::new(
        transport.clone(),
        config,
        sink.clone(),
        sink.clone(),
    ));
    (facade, sink)
}

async fn next_update(rx: &mut broadcast::Receiver<Update>) -> Update {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for update")
        .expect("update channel closed")
}

/// Push `updates` and wait until the facade has accepted all of them.
async fn deliver(facade: &SyncFacade, transport: &MockTransport, updates: Vec<Update>) {
    let mut rx = facade.subscribe();
    let count = updates.len();
    for update in updates {
        transport.push(update);
    }
    for _ in 0..count {
        next_update(&mut rx).await;
    }
}

async fn wait_for_state(facade: &SyncFacade, state: ConnectionState) {
    let mut states = facade.state_changes();
    tokio::time::timeout(WAIT, states.wait_for(|s| *s == state))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {state}"))
        .expect("state channel closed");
}

// ════════════════════════════════════════════════════════════════════
// Construction
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn initial_state_follows_transport() {
    let online = MockTransport::new(true);
    let (facade, _) = start(&online, SyncConfig::new());
    assert_eq!(facade.connection_state(), ConnectionState::Connected);
    assert!(facade.is_connected());

    let offline = MockTransport::new(false);
    let (facade, _) = start(&offline, SyncConfig::new());
    assert_eq!(facade.connection_state(), ConnectionState::Disconnected);
    assert!(facade.recent_updates().is_empty());
    assert_eq!(facade.last_error(), None);
}

#[tokio::test]
async fn invalid_config_is_rejected() {
    let transport = MockTransport::new(true);
    let sink = RecordingSink::new();
    let err = SyncFacade::new(
        transport.clone(),
        SyncConfig::new().with_max_updates(0),
        sink.clone(),
        sink,
    )
    .unwrap_err();
    assert!(matches!(err, SyncError::InvalidConfig(_)));
    assert_eq!(transport.listener_count(), 0);
}

// ════════════════════════════════════════════════════════════════════
// Update log
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn recent_updates_are_bounded_and_newest_first() {
    let transport = MockTransport::new(true);
    let (facade, _) = start(&transport, SyncConfig::new().with_max_updates(3));

    deliver(
        &facade,
        &transport,
        vec![updated(1), updated(2), updated(3), updated(4)],
    )
    .await;

    let ids: Vec<_> = facade
        .recent_updates()
        .iter()
        .map(|u| u.expedition_id)
        .collect();
    assert_eq!(ids, vec![4, 3, 2]);
}

#[tokio::test]
async fn default_log_keeps_twenty_updates() {
    let transport = MockTransport::new(true);
    let (facade, _) = start(&transport, SyncConfig::new());

    deliver(&facade, &transport, (1..=25).map(updated).collect()).await;

    let recent = facade.recent_updates();
    assert_eq!(recent.len(), 20);
    assert_eq!(recent.first().map(|u| u.expedition_id), Some(25));
    assert_eq!(recent.last().map(|u| u.expedition_id), Some(6));
}

#[tokio::test]
async fn clear_updates_keeps_connection_state() {
    let transport = MockTransport::new(true);
    let (facade, _) = start(&transport, SyncConfig::new());
    deliver(&facade, &transport, vec![updated(1), updated(2)]).await;

    facade.clear_updates();
    assert!(facade.recent_updates().is_empty());
    assert_eq!(facade.connection_state(), ConnectionState::Connected);

    deliver(&facade, &transport, vec![updated(3)]).await;
    assert_eq!(facade.recent_updates().len(), 1);
}

#[tokio::test]
async fn updates_never_change_connection_state() {
    let transport = MockTransport::new(false);
    let (facade, _) = start(&transport, SyncConfig::new());

    deliver(&facade, &transport, vec![updated(1), created(2)]).await;
    assert_eq!(facade.connection_state(), ConnectionState::Disconnected);
    assert_eq!(facade.recent_updates().len(), 2);
}

// ════════════════════════════════════════════════════════════════════
// Connection lifecycle
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn error_is_sticky_until_reconnect() {
    let transport = MockTransport::new(true);
    let (facade, _) = start(&transport, SyncConfig::new());

    transport.fail("socket reset");
    wait_for_state(&facade, ConnectionState::Error).await;
    assert_eq!(facade.last_error().as_deref(), Some("socket reset"));

    transport.connect();
    deliver(&facade, &transport, vec![updated(1)]).await;
    assert_eq!(facade.connection_state(), ConnectionState::Error);

    facade.reconnect();
    assert_eq!(transport.reconnect_requests(), 1);
    wait_for_state(&facade, ConnectionState::Connecting).await;

    transport.connect();
    wait_for_state(&facade, ConnectionState::Connected).await;
}

#[tokio::test]
async fn reconnect_is_reissued_while_connecting() {
    let transport = MockTransport::new(false);
    let (facade, _) = start(&transport, SyncConfig::new());

    facade.reconnect();
    facade.reconnect();
    assert_eq!(transport.reconnect_requests(), 2);
    wait_for_state(&facade, ConnectionState::Connecting).await;

    transport.reconnected();
    wait_for_state(&facade, ConnectionState::Connected).await;
}

#[tokio::test]
async fn fast_reconnect_after_error_recovers_rooms() {
    let transport = MockTransport::new(true);
    let (facade, _) = start(&transport, SyncConfig::new().with_room(Some(7)));
    transport.take_calls();

    // The transport answers before the monitor has applied the error.
    transport.fail("socket reset");
    facade.reconnect();
    transport.connect();

    wait_for_state(&facade, ConnectionState::Connected).await;
    wait_until("rejoin after recovery", || {
        transport.calls().contains(&Call::Join(7))
    })
    .await;
    assert_eq!(facade.rooms(), vec![7]);
    assert_eq!(facade.last_error().as_deref(), Some("socket reset"));
}

#[tokio::test]
async fn disconnect_then_connect() {
    let transport = MockTransport::new(true);
    let (facade, _) = start(&transport, SyncConfig::new());

    transport.disconnect("server restart");
    wait_for_state(&facade, ConnectionState::Disconnected).await;
    assert!(!facade.is_connected());

    transport.connect();
    wait_for_state(&facade, ConnectionState::Connected).await;
}

// ════════════════════════════════════════════════════════════════════
// Rooms
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn bound_room_is_joined_on_start() {
    let transport = MockTransport::new(true);
    let (facade, _) = start(&transport, SyncConfig::new().with_room(Some(7)));

    assert_eq!(facade.room(), Some(7));
    assert_eq!(facade.rooms(), vec![7]);
    assert_eq!(transport.calls(), vec![Call::Join(7)]);
}

#[tokio::test]
async fn auto_join_disabled_leaves_rooms_alone() {
    let transport = MockTransport::new(true);
    let (facade, _) = start(
        &transport,
        SyncConfig::new().with_room(Some(7)).with_auto_join(false),
    );

    assert!(facade.rooms().is_empty());
    facade.shutdown();
    assert!(transport.calls().is_empty());
}

#[tokio::test]
async fn joining_twice_keeps_one_room() {
    let transport = MockTransport::new(true);
    let (facade, _) = start(&transport, SyncConfig::new());

    assert!(facade.join(5));
    assert!(facade.join(5));
    assert_eq!(facade.rooms(), vec![5]);
}

#[tokio::test]
async fn join_while_offline_is_discarded() {
    let transport = MockTransport::new(false);
    let (facade, _) = start(&transport, SyncConfig::new().with_room(Some(9)));

    assert!(!facade.join(3));
    assert!(facade.rooms().is_empty());
    assert!(transport.calls().is_empty());

    // The bound room is still joined once the connection comes up.
    transport.connect();
    wait_until("bound room join", || transport.calls() == vec![Call::Join(9)]).await;
    assert_eq!(facade.rooms(), vec![9]);
}

/// Comes online while the facade's room binding takes its first look at it.
///
/// The first `is_connected` call (the monitor's initial sample) reports
/// offline. The second one, from the binding's initial sync, connects the
/// inner transport, waits long enough for the monitor task to apply the
/// signal on another worker, and still reports offline.
struct ConnectsDuringStartup {
    inner: Arc<MockTransport>,
    checks: AtomicUsize,
}

impl Transport for ConnectsDuringStartup {
    fn is_connected(&self) -> bool {
        if self.checks.fetch_add(1, Ordering::SeqCst) == 1 {
            self.inner.connect();
            std::thread::sleep(Duration::from_millis(100));
            return false;
        }
        self.inner.is_connected()
    }

    fn on(&self, listener: Listener) -> ListenerId {
        self.inner.on(listener)
    }

    fn off(&self, id: ListenerId) {
        self.inner.off(id);
    }

    fn join_expedition(&self, id: ExpeditionId) {
        self.inner.join_expedition(id);
    }

    fn leave_expedition(&self, id: ExpeditionId) {
        self.inner.leave_expedition(id);
    }

    fn reconnect(&self) {
        self.inner.reconnect();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn connect_during_startup_still_joins_bound_room() {
    init_tracing();
    let inner = MockTransport::new(false);
    let transport = Arc::new(ConnectsDuringStartup {
        inner: inner.clone(),
        checks: AtomicUsize::new(0),
    });
    let sink = RecordingSink::new();
    let facade = assert_ok!(SyncFacade::new(
        transport,
        SyncConfig::new().with_room(Some(11)),
        sink.clone(),
        sink,
    ));

    wait_for_state(&facade, ConnectionState::Connected).await;
    wait_until("bound room join", || inner.calls() == vec![Call::Join(11)]).await;
    assert_eq!(facade.rooms(), vec![11]);
}

#[tokio::test]
async fn rooms_survive_disconnect_and_are_rejoined() {
    let transport = MockTransport::new(true);
    let (facade, _) = start(&transport, SyncConfig::new().with_room(Some(7)));
    facade.join(1);
    facade.join(2);

    transport.disconnect("network lost");
    wait_for_state(&facade, ConnectionState::Disconnected).await;
    assert_eq!(facade.rooms(), vec![1, 2, 7]);
    transport.take_calls();

    transport.connect();
    wait_until("rejoin after connect", || transport.calls().len() == 3).await;
    assert_eq!(
        transport.take_calls(),
        vec![Call::Join(1), Call::Join(2), Call::Join(7)]
    );
    assert_eq!(facade.rooms(), vec![1, 2, 7]);
}

#[tokio::test]
async fn rejoin_follows_every_recovery() {
    let transport = MockTransport::new(true);
    let (facade, _) = start(&transport, SyncConfig::new());
    facade.join(4);
    transport.take_calls();

    for round in 1..=3 {
        transport.fail("flaky link");
        wait_for_state(&facade, ConnectionState::Error).await;
        facade.reconnect();
        transport.reconnected();
        wait_until("rejoin", || transport.calls().len() == round).await;
    }
    assert_eq!(transport.take_calls(), vec![Call::Join(4); 3]);
}

#[tokio::test]
async fn leave_removes_room() {
    let transport = MockTransport::new(true);
    let (facade, _) = start(&transport, SyncConfig::new());
    facade.join(1);
    facade.join(2);

    facade.leave(1);
    assert_eq!(facade.rooms(), vec![2]);
    assert_eq!(
        transport.calls(),
        vec![Call::Join(1), Call::Join(2), Call::Leave(1)]
    );
}

#[tokio::test]
async fn set_room_leaves_previous_room() {
    let transport = MockTransport::new(true);
    let (facade, _) = start(&transport, SyncConfig::new().with_room(Some(1)));

    facade.set_room(Some(2));
    facade.set_room(Some(2));
    facade.set_room(None);

    assert_eq!(facade.room(), None);
    assert!(facade.rooms().is_empty());
    assert_eq!(
        transport.calls(),
        vec![
            Call::Join(1),
            Call::Leave(1),
            Call::Join(2),
            Call::Leave(2)
        ]
    );
}

// ════════════════════════════════════════════════════════════════════
// Notifications
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn each_update_kind_produces_its_effects() {
    let transport = MockTransport::new(true);
    let (facade, sink) = start(&transport, SyncConfig::new());

    deliver(
        &facade,
        &transport,
        vec![
            consumed(1, "rum", 2, Some("Jack")),
            completed(1, None),
            created(2),
            updated(2),
            deadline(3, Some(6)),
        ],
    )
    .await;

    assert_eq!(
        sink.effects(),
        vec![
            Effect::Haptic(HapticCue::Light),
            Effect::Popup("Jack consumed 2x rum in Expedition 1".into()),
            Effect::Haptic(HapticCue::Success),
            Effect::Popup("Expedition \"Expedition 1\" completed!".into()),
            Effect::Haptic(HapticCue::Medium),
            Effect::Haptic(HapticCue::Light),
            Effect::Haptic(HapticCue::Warning),
            Effect::Popup("Deadline approaching for \"Expedition 3\" (6h left)".into()),
        ]
    );
}

#[tokio::test]
async fn notification_fires_before_update_is_visible() {
    let transport = MockTransport::new(true);
    let (facade, sink) = start(&transport, SyncConfig::new());

    let seen = Arc::new(Mutex::new(Vec::new()));
    let observed = Arc::clone(&seen);
    let effects = Arc::clone(&sink);
    facade.on_update(move |update| {
        observed
            .lock()
            .unwrap()
            .push((update.kind(), effects.effects().len()));
    });

    deliver(&facade, &transport, vec![completed(8, Some("Mary"))]).await;

    assert_eq!(
        *seen.lock().unwrap(),
        vec![(UpdateKind::ExpeditionCompleted, 2)]
    );
}

#[tokio::test]
async fn silent_policy_suppresses_effects() {
    let transport = MockTransport::new(true);
    let (facade, sink) = start(
        &transport,
        SyncConfig::new().with_policy(NotificationPolicy::silent()),
    );

    deliver(
        &facade,
        &transport,
        vec![consumed(1, "water", 1, None), completed(1, None)],
    )
    .await;

    assert!(sink.effects().is_empty());
    assert_eq!(facade.recent_updates().len(), 2);
}

#[tokio::test]
async fn popups_only_policy() {
    let transport = MockTransport::new(true);
    let (facade, sink) = start(
        &transport,
        SyncConfig::new().with_policy(NotificationPolicy::default().with_haptic(false)),
    );

    deliver(&facade, &transport, vec![consumed(1, "biscuits", 3, None)]).await;

    assert_eq!(
        sink.effects(),
        vec![Effect::Popup("Someone consumed 3x biscuits in Expedition 1".into())]
    );
}

#[tokio::test]
async fn failing_sink_does_not_lose_updates() {
    for failure in [Failure::Error, Failure::Panic] {
        let transport = MockTransport::new(true);
        let (facade, sink) = start_with_sink(
            &transport,
            SyncConfig::new(),
            RecordingSink::failing(failure),
        );

        deliver(
            &facade,
            &transport,
            vec![completed(1, None), deadline(2, None)],
        )
        .await;

        let ids: Vec<_> = facade
            .recent_updates()
            .iter()
            .map(|u| u.expedition_id)
            .collect();
        assert_eq!(ids, vec![2, 1], "failure mode {failure:?}");
        // Haptic and popup are both attempted even when the first fails.
        assert_eq!(sink.effects().len(), 4, "failure mode {failure:?}");
    }
}

// ════════════════════════════════════════════════════════════════════
// Teardown
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn shutdown_leaves_room_and_deregisters() {
    let transport = MockTransport::new(true);
    let (facade, _) = start(&transport, SyncConfig::new().with_room(Some(7)));
    assert_eq!(transport.listener_count(), 1);

    facade.shutdown();
    facade.shutdown();

    assert_eq!(transport.listener_count(), 0);
    assert_eq!(transport.calls(), vec![Call::Join(7), Call::Leave(7)]);
}

#[tokio::test]
async fn drop_tears_down() {
    let transport = MockTransport::new(true);
    {
        let _ = start(&transport, SyncConfig::new().with_room(Some(3)));
    }
    assert_eq!(transport.listener_count(), 0);
    assert_eq!(transport.calls(), vec![Call::Join(3), Call::Leave(3)]);
}
