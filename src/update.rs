//! Update records pushed by the server.
//!
//! An [`Update`] is immutable once produced. The event kind is a closed
//! tagged union ([`UpdatePayload`]) so every consumer matches exhaustively.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of an expedition, which doubles as its room identifier.
pub type ExpeditionId = u64;

// ── Kinds ───────────────────────────────────────────────────────────

/// Fieldless discriminant of an [`UpdatePayload`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateKind {
    ExpeditionUpdated,
    ItemConsumed,
    ExpeditionCompleted,
    ExpeditionCreated,
    DeadlineWarning,
}

impl UpdateKind {
    /// All kinds, in declaration order.
    pub const ALL: [UpdateKind; 5] = [
        UpdateKind::ExpeditionUpdated,
        UpdateKind::ItemConsumed,
        UpdateKind::ExpeditionCompleted,
        UpdateKind::ExpeditionCreated,
        UpdateKind::DeadlineWarning,
    ];

    /// Event name used on the wire for this kind.
    pub fn event_name(self) -> &'static str {
        match self {
            UpdateKind::ExpeditionUpdated => "expeditionUpdate",
            UpdateKind::ItemConsumed => "itemConsumed",
            UpdateKind::ExpeditionCompleted => "expeditionCompleted",
            UpdateKind::ExpeditionCreated => "expeditionCreated",
            UpdateKind::DeadlineWarning => "deadlineWarning",
        }
    }
}

impl fmt::Display for UpdateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.event_name())
    }
}

// ── Payloads ────────────────────────────────────────────────────────

/// Expedition metadata changed (name, deadline, item list, ...).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExpeditionUpdated {
    /// Free-form description of what changed.
    #[serde(default)]
    pub changes: serde_json::Value,
}

/// A participant consumed some quantity of an item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemConsumed {
    pub item_name: String,
    pub quantity: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumer_name: Option<String>,
}

/// All items of an expedition were consumed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExpeditionCompleted {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_by: Option<String>,
}

/// A new expedition was created.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExpeditionCreated {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
}

/// An expedition deadline is close.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadlineWarning {
    /// ISO 8601 deadline.
    pub deadline: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hours_remaining: Option<u32>,
}

/// Type-specific part of an [`Update`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UpdatePayload {
    ExpeditionUpdated(ExpeditionUpdated),
    ItemConsumed(ItemConsumed),
    ExpeditionCompleted(ExpeditionCompleted),
    ExpeditionCreated(ExpeditionCreated),
    DeadlineWarning(DeadlineWarning),
}

impl UpdatePayload {
    pub fn kind(&self) -> UpdateKind {
        match self {
            UpdatePayload::ExpeditionUpdated(_) => UpdateKind::ExpeditionUpdated,
            UpdatePayload::ItemConsumed(_) => UpdateKind::ItemConsumed,
            UpdatePayload::ExpeditionCompleted(_) => UpdateKind::ExpeditionCompleted,
            UpdatePayload::ExpeditionCreated(_) => UpdateKind::ExpeditionCreated,
            UpdatePayload::DeadlineWarning(_) => UpdateKind::DeadlineWarning,
        }
    }
}

// ── Update ──────────────────────────────────────────────────────────

/// One event received from the server.
///
/// `timestamp` is whatever the server stamped (ISO 8601) and is descriptive
/// only. Ordering inside the sync layer is always arrival order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Update {
    pub expedition_id: ExpeditionId,
    pub expedition_name: String,
    pub timestamp: String,
    #[serde(flatten)]
    pub payload: UpdatePayload,
}

impl Update {
    pub fn new(
        expedition_id: ExpeditionId,
        expedition_name: impl Into<String>,
        timestamp: impl Into<String>,
        payload: UpdatePayload,
    ) -> Self {
        Self {
            expedition_id,
            expedition_name: expedition_name.into(),
            timestamp: timestamp.into(),
            payload,
        }
    }

    pub fn kind(&self) -> UpdateKind {
        self.payload.kind()
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

    #[test]
    fn update_serializes_with_flat_type_tag() {
        let update = Update::new(
            7,
            "Rum run",
            "2026-01-01T00:00:00Z",
            UpdatePayload::ItemConsumed(ItemConsumed {
                item_name: "rum".into(),
                quantity: 2,
                consumer_name: Some("Anne".into()),
            }),
        );
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json["type"], "item_consumed");
        assert_eq!(json["expedition_id"], 7);
        assert_eq!(json["item_name"], "rum");
        assert_eq!(json["consumer_name"], "Anne");
    }

    #[test]
    fn update_deserializes_with_optional_fields_missing() {
        let json = r#"{
            "expedition_id": 3,
            "expedition_name": "Grog",
            "timestamp": "2026-01-01T00:00:00Z",
            "type": "expedition_completed"
        }"#;
        let update: Update = serde_json::from_str(json).unwrap();
        assert_eq!(update.kind(), UpdateKind::ExpeditionCompleted);
        assert_eq!(
            update.payload,
            UpdatePayload::ExpeditionCompleted(ExpeditionCompleted { completed_by: None })
        );
    }

    #[test]
    fn unknown_type_is_rejected() {
        let json = r#"{
            "expedition_id": 3,
            "expedition_name": "Grog",
            "timestamp": "2026-01-01T00:00:00Z",
            "type": "mutiny"
        }"#;
        assert!(serde_json::from_str::<Update>(json).is_err());
    }

    #[test]
    fn event_names_are_distinct() {
        let mut names: Vec<_> = UpdateKind::ALL.iter().map(|k| k.event_name()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), UpdateKind::ALL.len());
        assert_eq!(UpdateKind::DeadlineWarning.to_string(), "deadlineWarning");
    }
}
