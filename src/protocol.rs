//! Wire frames spoken by [`SocketClient`](crate::socket::SocketClient).
//!
//! Every frame is a JSON object `{"event": <name>, "data": <payload>}`.
//! Server frames carry one update each; the event name selects the kind and
//! `data` holds the common update fields with the kind's own fields beside
//! them:
//!
//! ```json
//! {"event": "itemConsumed",
//!  "data": {"expedition_id": 4, "expedition_name": "Tortuga",
//!           "timestamp": "2026-01-01T00:00:00Z",
//!           "item_name": "rum", "quantity": 2}}
//! ```

use serde::{Deserialize, Serialize};

use crate::update::{
    DeadlineWarning, ExpeditionCompleted, ExpeditionCreated, ExpeditionId, ExpeditionUpdated,
    ItemConsumed, Update, UpdatePayload,
};

// ── Bodies ──────────────────────────────────────────────────────────

/// `data` of a server frame: update header plus kind-specific fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateBody<T> {
    pub expedition_id: ExpeditionId,
    pub expedition_name: String,
    pub timestamp: String,
    #[serde(flatten)]
    pub fields: T,
}

impl<T> UpdateBody<T> {
    fn into_update(self, wrap: impl FnOnce(T) -> UpdatePayload) -> Update {
        Update {
            expedition_id: self.expedition_id,
            expedition_name: self.expedition_name,
            timestamp: self.timestamp,
            payload: wrap(self.fields),
        }
    }
}

fn body<T>(update: &Update, fields: T) -> UpdateBody<T> {
    UpdateBody {
        expedition_id: update.expedition_id,
        expedition_name: update.expedition_name.clone(),
        timestamp: update.timestamp.clone(),
        fields,
    }
}

// ── Frames ──────────────────────────────────────────────────────────

/// Frames sent from the server to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerFrame {
    ExpeditionUpdate(UpdateBody<ExpeditionUpdated>),
    ItemConsumed(UpdateBody<ItemConsumed>),
    ExpeditionCompleted(UpdateBody<ExpeditionCompleted>),
    ExpeditionCreated(UpdateBody<ExpeditionCreated>),
    DeadlineWarning(UpdateBody<DeadlineWarning>),
}

impl From<ServerFrame> for Update {
    fn from(frame: ServerFrame) -> Self {
        match frame {
            ServerFrame::ExpeditionUpdate(b) => b.into_update(UpdatePayload::ExpeditionUpdated),
            ServerFrame::ItemConsumed(b) => b.into_update(UpdatePayload::ItemConsumed),
            ServerFrame::ExpeditionCompleted(b) => {
                b.into_update(UpdatePayload::ExpeditionCompleted)
            }
            ServerFrame::ExpeditionCreated(b) => b.into_update(UpdatePayload::ExpeditionCreated),
            ServerFrame::DeadlineWarning(b) => b.into_update(UpdatePayload::DeadlineWarning),
        }
    }
}

impl From<&Update> for ServerFrame {
    fn from(update: &Update) -> Self {
        match &update.payload {
            UpdatePayload::ExpeditionUpdated(f) => {
                ServerFrame::ExpeditionUpdate(body(update, f.clone()))
            }
            UpdatePayload::ItemConsumed(f) => ServerFrame::ItemConsumed(body(update, f.clone())),
            UpdatePayload::ExpeditionCompleted(f) => {
                ServerFrame::ExpeditionCompleted(body(update, f.clone()))
            }
            UpdatePayload::ExpeditionCreated(f) => {
                ServerFrame::ExpeditionCreated(body(update, f.clone()))
            }
            UpdatePayload::DeadlineWarning(f) => {
                ServerFrame::DeadlineWarning(body(update, f.clone()))
            }
        }
    }
}

/// Frames sent from the client to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientFrame {
    JoinExpedition { expedition_id: ExpeditionId },
    LeaveExpedition { expedition_id: ExpeditionId },
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
    use crate::update::UpdateKind;

    #[test]
    fn parses_item_consumed_frame() {
        let json = r#"{"event":"itemConsumed","data":{
            "expedition_id":4,"expedition_name":"Tortuga",
            "timestamp":"2026-01-01T00:00:00Z",
            "item_name":"rum","quantity":2}}"#;
        let update: Update = serde_json::from_str::<ServerFrame>(json).unwrap().into();
        assert_eq!(update.expedition_id, 4);
        assert_eq!(
            update.payload,
            UpdatePayload::ItemConsumed(ItemConsumed {
                item_name: "rum".into(),
                quantity: 2,
                consumer_name: None,
            })
        );
    }

    #[test]
    fn frame_event_names_match_update_kinds() {
        let update = Update::new(
            1,
            "Nassau",
            "2026-01-01T00:00:00Z",
            UpdatePayload::ExpeditionUpdated(ExpeditionUpdated::default()),
        );
        for kind in UpdateKind::ALL {
            let payload = match kind {
                UpdateKind::ExpeditionUpdated => {
                    UpdatePayload::ExpeditionUpdated(ExpeditionUpdated::default())
                }
                UpdateKind::ItemConsumed => UpdatePayload::ItemConsumed(ItemConsumed {
                    item_name: "salt pork".into(),
                    quantity: 1,
                    consumer_name: None,
                }),
                UpdateKind::ExpeditionCompleted => {
                    UpdatePayload::ExpeditionCompleted(ExpeditionCompleted::default())
                }
                UpdateKind::ExpeditionCreated => {
                    UpdatePayload::ExpeditionCreated(ExpeditionCreated::default())
                }
                UpdateKind::DeadlineWarning => UpdatePayload::DeadlineWarning(DeadlineWarning {
                    deadline: "2026-01-02T00:00:00Z".into(),
                    hours_remaining: None,
                }),
            };
            let update = Update {
                payload,
                ..update.clone()
            };
            let json = serde_json::to_value(ServerFrame::from(&update)).unwrap();
            assert_eq!(json["event"], kind.event_name());
            assert!(json["data"].get("type").is_none());
        }
    }

    #[test]
    fn unknown_event_is_rejected() {
        let json = r#"{"event":"mutiny","data":{}}"#;
        assert!(serde_json::from_str::<ServerFrame>(json).is_err());
    }

    #[test]
    fn client_frames_are_camel_case() {
        let json = serde_json::to_string(&ClientFrame::JoinExpedition { expedition_id: 5 }).unwrap();
        assert_eq!(json, r#"{"event":"joinExpedition","data":{"expedition_id":5}}"#);
        let json =
            serde_json::to_string(&ClientFrame::LeaveExpedition { expedition_id: 5 }).unwrap();
        assert_eq!(json, r#"{"event":"leaveExpedition","data":{"expedition_id":5}}"#);
    }
}
