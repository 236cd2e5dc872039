#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing,
    dead_code
)]
//! Shared test utilities for expedition sync integration tests.
//!
//! Provides a scriptable [`MockTransport`], a [`RecordingSink`] for haptic
//! and popup effects, and helpers for building updates and waiting on
//! background tasks.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use expedition_sync::transport::{Listener, ListenerId, ListenerSet, Transport, TransportEvent};
use expedition_sync::update::{
    DeadlineWarning, ExpeditionCompleted, ExpeditionCreated, ExpeditionUpdated, ItemConsumed,
};
use expedition_sync::{
    ExpeditionId, HapticCue, HapticSink, PopupSink, SyncError, Update, UpdatePayload,
};

/// How long helpers wait for background tasks before failing the test.
pub const WAIT: Duration = Duration::from_secs(2);

/// Install a `tracing` subscriber honouring `RUST_LOG`. Safe to call from
/// every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ── MockTransport ───────────────────────────────────────────────────

/// A room command observed by [`MockTransport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    Join(ExpeditionId),
    Leave(ExpeditionId),
}

/// Transport whose signals are driven by the test.
///
/// Lifecycle helpers flip the connected flag *before* emitting, mirroring a
/// real socket.
#[derive(Default)]
pub struct MockTransport {
    connected: AtomicBool,
    listeners: ListenerSet,
    calls: StdMutex<Vec<Call>>,
    reconnects: AtomicUsize,
}

impl MockTransport {
    pub fn new(connected: bool) -> Arc<Self> {
        let transport = Self::default();
        transport.connected.store(connected, Ordering::SeqCst);
        Arc::new(transport)
    }

    pub fn connect(&self) {
        self.connected.store(true, Ordering::SeqCst);
        self.listeners.emit(&TransportEvent::Connected);
    }

    pub fn reconnected(&self) {
        self.connected.store(true, Ordering::SeqCst);
        self.listeners.emit(&TransportEvent::Reconnected);
    }

    pub fn disconnect(&self, reason: &str) {
        self.connected.store(false, Ordering::SeqCst);
        self.listeners.emit(&TransportEvent::Disconnected {
            reason: Some(reason.into()),
        });
    }

    pub fn fail(&self, message: &str) {
        self.connected.store(false, Ordering::SeqCst);
        self.listeners.emit(&TransportEvent::Error {
            message: message.into(),
        });
    }

    pub fn push(&self, update: Update) {
        self.listeners.emit(&TransportEvent::Update(update));
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn take_calls(&self) -> Vec<Call> {
        std::mem::take(&mut *self.calls.lock().unwrap())
    }

    pub fn reconnect_requests(&self) -> usize {
        self.reconnects.load(Ordering::SeqCst)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

impl Transport for MockTransport {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn on(&self, listener: Listener) -> ListenerId {
        self.listeners.add(listener)
    }

    fn off(&self, id: ListenerId) {
        self.listeners.remove(id);
    }

    fn join_expedition(&self, id: ExpeditionId) {
        self.calls.lock().unwrap().push(Call::Join(id));
    }

    fn leave_expedition(&self, id: ExpeditionId) {
        self.calls.lock().unwrap().push(Call::Leave(id));
    }

    fn reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::SeqCst);
    }
}

// ── RecordingSink ───────────────────────────────────────────────────

/// A side effect observed by [`RecordingSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Haptic(HapticCue),
    Popup(String),
}

/// How a [`RecordingSink`] misbehaves after recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    None,
    Error,
    Panic,
}

/// Haptic and popup sink that records every effect in order.
pub struct RecordingSink {
    effects: StdMutex<Vec<Effect>>,
    failure: Failure,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Self::failing(Failure::None)
    }

    pub fn failing(failure: Failure) -> Arc<Self> {
        Arc::new(Self {
            effects: StdMutex::new(Vec::new()),
            failure,
        })
    }

    pub fn effects(&self) -> Vec<Effect> {
        self.effects.lock().unwrap().clone()
    }

    fn record(&self, effect: Effect) -> expedition_sync::Result<()> {
        self.effects.lock().unwrap().push(effect);
        match self.failure {
            Failure::None => Ok(()),
            Failure::Error => Err(SyncError::Sink("device unavailable".into())),
            Failure::Panic => panic!("sink exploded"),
        }
    }
}

impl HapticSink for RecordingSink {
    fn emit(&self, cue: HapticCue) -> expedition_sync::Result<()> {
        self.record(Effect::Haptic(cue))
    }
}

impl PopupSink for RecordingSink {
    fn show(&self, message: &str) -> expedition_sync::Result<()> {
        self.record(Effect::Popup(message.to_owned()))
    }
}

// ── Update helpers ──────────────────────────────────────────────────

const TIMESTAMP: &str = "2026-05-01T09:30:00Z";

pub fn updated(id: ExpeditionId) -> Update {
    Update::new(
        id,
        format!("Expedition {id}"),
        TIMESTAMP,
        UpdatePayload::ExpeditionUpdated(ExpeditionUpdated::default()),
    )
}

pub fn consumed(id: ExpeditionId, item: &str, quantity: u32, by: Option<&str>) -> Update {
    Update::new(
        id,
        format!("Expedition {id}"),
        TIMESTAMP,
        UpdatePayload::ItemConsumed(ItemConsumed {
            item_name: item.into(),
            quantity,
            consumer_name: by.map(Into::into),
        }),
    )
}

pub fn completed(id: ExpeditionId, by: Option<&str>) -> Update {
    Update::new(
        id,
        format!("Expedition {id}"),
        TIMESTAMP,
        UpdatePayload::ExpeditionCompleted(ExpeditionCompleted {
            completed_by: by.map(Into::into),
        }),
    )
}

pub fn created(id: ExpeditionId) -> Update {
    Update::new(
        id,
        format!("Expedition {id}"),
        TIMESTAMP,
        UpdatePayload::ExpeditionCreated(ExpeditionCreated::default()),
    )
}

pub fn deadline(id: ExpeditionId, hours: Option<u32>) -> Update {
    Update::new(
        id,
        format!("Expedition {id}"),
        TIMESTAMP,
        UpdatePayload::DeadlineWarning(DeadlineWarning {
            deadline: "2026-05-02T00:00:00Z".into(),
            hours_remaining: hours,
        }),
    )
}

// ── Waiting ─────────────────────────────────────────────────────────

/// Poll `condition` until it holds, failing the test after [`WAIT`].
pub async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
