#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
//! Wire protocol and socket client tests.
//!
//! Covers parsing of every server frame, the client frames emitted for room
//! commands, and a `SyncFacade` running over a `SocketClient` whose channel
//! is an in-memory loopback.

mod common;

use std::time::Duration;

use async_trait::async_trait;
use expedition_sync::protocol::{ClientFrame, ServerFrame};
use expedition_sync::socket::{parse_frame, Dialer, FrameChannel};
use expedition_sync::update::{DeadlineWarning, ItemConsumed};
use expedition_sync::{
    ConnectionState, SocketClient, SocketConfig, SyncConfig, SyncError, SyncFacade, Transport,
    Update, UpdateKind, UpdatePayload,
};
use serde_json::json;
use tokio::sync::mpsc;

use common::{init_tracing, RecordingSink, WAIT};

// ════════════════════════════════════════════════════════════════════
// Frame parsing
// ════════════════════════════════════════════════════════════════════

fn frame(event: &str, extra: serde_json::Value) -> String {
    let mut data = json!({
        "expedition_id": 12,
        "expedition_name": "Port Royal",
        "timestamp": "2026-04-01T08:00:00Z",
    });
    if let (Some(data), Some(extra)) = (data.as_object_mut(), extra.as_object()) {
        data.extend(extra.clone());
    }
    json!({ "event": event, "data": data }).to_string()
}

#[test]
fn every_server_event_parses_to_its_kind() {
    let cases = [
        (
            "expeditionUpdate",
            json!({"changes": {"deadline": "2026-05-01"}}),
            UpdateKind::ExpeditionUpdated,
        ),
        (
            "itemConsumed",
            json!({"item_name": "rope", "quantity": 3}),
            UpdateKind::ItemConsumed,
        ),
        (
            "expeditionCompleted",
            json!({"completed_by": "Anne"}),
            UpdateKind::ExpeditionCompleted,
        ),
        ("expeditionCreated", json!({}), UpdateKind::ExpeditionCreated),
        (
            "deadlineWarning",
            json!({"deadline": "2026-04-02T00:00:00Z", "hours_remaining": 4}),
            UpdateKind::DeadlineWarning,
        ),
    ];

    for (event, extra, kind) in cases {
        let update = parse_frame(&frame(event, extra)).unwrap();
        assert_eq!(update.kind(), kind, "event {event}");
        assert_eq!(update.expedition_id, 12);
        assert_eq!(update.expedition_name, "Port Royal");
        assert_eq!(kind.event_name(), event);
    }
}

#[test]
fn optional_fields_default_to_none() {
    let update = parse_frame(&frame(
        "itemConsumed",
        json!({"item_name": "flour", "quantity": 1}),
    ))
    .unwrap();
    assert_eq!(
        update.payload,
        UpdatePayload::ItemConsumed(ItemConsumed {
            item_name: "flour".into(),
            quantity: 1,
            consumer_name: None,
        })
    );

    let update = parse_frame(&frame(
        "deadlineWarning",
        json!({"deadline": "2026-04-02T00:00:00Z"}),
    ))
    .unwrap();
    assert_eq!(
        update.payload,
        UpdatePayload::DeadlineWarning(DeadlineWarning {
            deadline: "2026-04-02T00:00:00Z".into(),
            hours_remaining: None,
        })
    );
}

#[test]
fn malformed_frames_are_rejected() {
    let negative_quantity = frame("itemConsumed", json!({"item_name": "rope", "quantity": -1}));
    for text in [
        "",
        "null",
        r#"{"event":"itemConsumed"}"#,
        r#"{"event":"itemConsumed","data":{"expedition_id":1}}"#,
        r#"{"event":"boarding","data":{}}"#,
        negative_quantity.as_str(),
    ] {
        assert!(
            matches!(parse_frame(text), Err(SyncError::Serialization(_))),
            "accepted {text:?}"
        );
    }
}

#[test]
fn update_json_uses_type_tag() {
    let update = parse_frame(&frame("expeditionCreated", json!({"created_by": "Ned"}))).unwrap();
    let value = serde_json::to_value(&update).unwrap();
    assert_eq!(value["type"], "expedition_created");
    assert_eq!(value["created_by"], "Ned");

    let back: Update = serde_json::from_value(value).unwrap();
    assert_eq!(back, update);
}

#[test]
fn server_frame_from_update_matches_wire_shape() {
    let update = parse_frame(&frame("expeditionCompleted", json!({"completed_by": "Anne"}))).unwrap();
    let value = serde_json::to_value(ServerFrame::from(&update)).unwrap();
    assert_eq!(
        value,
        json!({
            "event": "expeditionCompleted",
            "data": {
                "expedition_id": 12,
                "expedition_name": "Port Royal",
                "timestamp": "2026-04-01T08:00:00Z",
                "completed_by": "Anne",
            }
        })
    );
}

// ════════════════════════════════════════════════════════════════════
// Loopback channel
// ════════════════════════════════════════════════════════════════════

/// In-memory channel. Dropping the server's sender is a clean close.
struct LoopbackChannel {
    from_server: mpsc::UnboundedReceiver<String>,
    to_server: mpsc::UnboundedSender<String>,
}

#[async_trait]
impl FrameChannel for LoopbackChannel {
    async fn send(&mut self, frame: String) -> Result<(), SyncError> {
        self.to_server
            .send(frame)
            .map_err(|e| SyncError::TransportSend(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, SyncError>> {
        self.from_server.recv().await.map(Ok)
    }

    async fn close(&mut self) -> Result<(), SyncError> {
        self.from_server.close();
        Ok(())
    }
}

/// Server side of one dialed [`LoopbackChannel`].
struct ServerEnd {
    to_client: mpsc::UnboundedSender<String>,
    from_client: mpsc::UnboundedReceiver<String>,
}

impl ServerEnd {
    fn send(&self, frame: String) {
        self.to_client.send(frame).unwrap();
    }

    async fn next_frame(&mut self) -> ClientFrame {
        let text = tokio::time::timeout(WAIT, self.from_client.recv())
            .await
            .expect("timed out waiting for client frame")
            .expect("client channel closed");
        serde_json::from_str(&text).unwrap()
    }

    fn assert_quiet(&mut self) {
        assert!(self.from_client.try_recv().is_err());
    }
}

/// Hands every dialed connection's server end to the test.
struct LoopbackDialer {
    accepted: mpsc::UnboundedSender<ServerEnd>,
}

#[async_trait]
impl Dialer for LoopbackDialer {
    async fn dial(&self) -> Result<Box<dyn FrameChannel>, SyncError> {
        let (to_client, from_server) = mpsc::unbounded_channel();
        let (to_server, from_client) = mpsc::unbounded_channel();
        self.accepted
            .send(ServerEnd {
                to_client,
                from_client,
            })
            .map_err(|_| SyncError::TransportClosed)?;
        Ok(Box::new(LoopbackChannel {
            from_server,
            to_server,
        }))
    }
}

async fn accept(accepted: &mut mpsc::UnboundedReceiver<ServerEnd>) -> ServerEnd {
    tokio::time::timeout(WAIT, accepted.recv())
        .await
        .expect("timed out waiting for dial")
        .expect("dialer dropped")
}

async fn wait_for_state(facade: &SyncFacade, state: ConnectionState) {
    let mut states = facade.state_changes();
    tokio::time::timeout(WAIT, states.wait_for(|s| *s == state))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {state}"))
        .expect("state channel closed");
}

// ════════════════════════════════════════════════════════════════════
// SocketClient + SyncFacade
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn facade_over_socket_client() {
    init_tracing();
    let (accepted_tx, mut accepted) = mpsc::unbounded_channel();
    let client = SocketClient::start(
        LoopbackDialer {
            accepted: accepted_tx,
        },
        SocketConfig::default().with_shutdown_timeout(Duration::from_millis(200)),
    );
    let mut server = accept(&mut accepted).await;

    let sink = RecordingSink::new();
    let facade = SyncFacade::new(
        client.clone(),
        SyncConfig::new().with_room(Some(12)),
        sink.clone(),
        sink.clone(),
    )
    .unwrap();
    wait_for_state(&facade, ConnectionState::Connected).await;

    // The bound room is joined on start.
    assert_eq!(
        server.next_frame().await,
        ClientFrame::JoinExpedition { expedition_id: 12 }
    );

    let mut updates = facade.subscribe();
    server.send(frame(
        "itemConsumed",
        json!({"item_name": "rum", "quantity": 1, "consumer_name": "Jack"}),
    ));
    let update = tokio::time::timeout(WAIT, updates.recv()).await.unwrap().unwrap();
    assert_eq!(update.kind(), UpdateKind::ItemConsumed);
    assert_eq!(facade.recent_updates(), vec![update]);
    assert_eq!(sink.effects().len(), 2);

    // Server goes away: rooms are kept, nothing is retried.
    drop(server);
    wait_for_state(&facade, ConnectionState::Disconnected).await;
    assert_eq!(facade.rooms(), vec![12]);
    assert!(accepted.try_recv().is_err());

    // Reconnect dials again and restores the room.
    facade.reconnect();
    let mut server = accept(&mut accepted).await;
    wait_for_state(&facade, ConnectionState::Connected).await;
    assert_eq!(
        server.next_frame().await,
        ClientFrame::JoinExpedition { expedition_id: 12 }
    );
    server.assert_quiet();

    // Teardown leaves the room before the socket closes.
    facade.shutdown();
    assert_eq!(
        server.next_frame().await,
        ClientFrame::LeaveExpedition { expedition_id: 12 }
    );
    client.shutdown().await;
    assert!(!client.is_connected());
}

#[tokio::test]
async fn malformed_frames_are_skipped() {
    init_tracing();
    let (accepted_tx, mut accepted) = mpsc::unbounded_channel();
    let client = SocketClient::start(
        LoopbackDialer {
            accepted: accepted_tx,
        },
        SocketConfig::default(),
    );
    let server = accept(&mut accepted).await;

    let sink = RecordingSink::new();
    let facade = SyncFacade::new(client.clone(), SyncConfig::new(), sink.clone(), sink).unwrap();
    let mut updates = facade.subscribe();

    server.send("{not json".into());
    server.send(frame("mutiny", json!({})));
    server.send(frame("expeditionCreated", json!({})));

    let update = tokio::time::timeout(WAIT, updates.recv()).await.unwrap().unwrap();
    assert_eq!(update.kind(), UpdateKind::ExpeditionCreated);
    assert_eq!(facade.recent_updates().len(), 1);
    assert_eq!(facade.connection_state(), ConnectionState::Connected);

    client.shutdown().await;
}
