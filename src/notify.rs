//! Haptic and popup notifications for incoming updates.
//!
//! [`NotificationDispatcher`] is a pure mapping layer: for one [`Update`] it
//! fires at most one [`HapticCue`] and at most one popup message, according
//! to a fixed per-kind table and the [`NotificationPolicy`]. It keeps no
//! state between calls and never lets a failing sink reach its caller.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::Result;
use crate::update::{Update, UpdateKind, UpdatePayload};

// ── Policy ──────────────────────────────────────────────────────────

/// Global switches for notification side effects.
///
/// ```
/// use expedition_sync::NotificationPolicy;
///
/// let quiet = NotificationPolicy::default().with_haptic(false);
/// assert!(!quiet.enable_haptic);
/// assert!(quiet.enable_popups);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPolicy {
    pub enable_haptic: bool,
    pub enable_popups: bool,
}

impl NotificationPolicy {
    /// Neither haptics nor popups.
    pub fn silent() -> Self {
        Self {
            enable_haptic: false,
            enable_popups: false,
        }
    }

    #[must_use]
    pub fn with_haptic(mut self, enabled: bool) -> Self {
        self.enable_haptic = enabled;
        self
    }

    #[must_use]
    pub fn with_popups(mut self, enabled: bool) -> Self {
        self.enable_popups = enabled;
        self
    }
}

impl Default for NotificationPolicy {
    fn default() -> Self {
        Self {
            enable_haptic: true,
            enable_popups: true,
        }
    }
}

// ── Haptic cues ─────────────────────────────────────────────────────

/// Intensity or category of a haptic signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HapticCue {
    Light,
    Medium,
    Heavy,
    Success,
    Warning,
    Error,
}

impl HapticCue {
    /// Cue fired for an update of `kind`.
    pub fn for_kind(kind: UpdateKind) -> HapticCue {
        match kind {
            UpdateKind::ExpeditionUpdated | UpdateKind::ItemConsumed => HapticCue::Light,
            UpdateKind::ExpeditionCreated => HapticCue::Medium,
            UpdateKind::ExpeditionCompleted => HapticCue::Success,
            UpdateKind::DeadlineWarning => HapticCue::Warning,
        }
    }
}

impl fmt::Display for HapticCue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HapticCue::Light => "light",
            HapticCue::Medium => "medium",
            HapticCue::Heavy => "heavy",
            HapticCue::Success => "success",
            HapticCue::Warning => "warning",
            HapticCue::Error => "error",
        })
    }
}

// ── Messages ────────────────────────────────────────────────────────

/// Whether updates of `kind` produce a popup at all.
pub fn should_show(kind: UpdateKind) -> bool {
    match kind {
        UpdateKind::ItemConsumed | UpdateKind::ExpeditionCompleted | UpdateKind::DeadlineWarning => {
            true
        }
        UpdateKind::ExpeditionCreated | UpdateKind::ExpeditionUpdated => false,
    }
}

/// Popup text for `update`, or `None` for kinds that stay silent.
pub fn message_for(update: &Update) -> Option<String> {
    let name = &update.expedition_name;
    match &update.payload {
        UpdatePayload::ItemConsumed(item) => Some(format!(
            "{} consumed {}x {} in {name}",
            item.consumer_name.as_deref().unwrap_or("Someone"),
            item.quantity,
            item.item_name,
        )),
        UpdatePayload::ExpeditionCompleted(done) => Some(match &done.completed_by {
            Some(who) => format!("Expedition \"{name}\" completed by {who}!"),
            None => format!("Expedition \"{name}\" completed!"),
        }),
        UpdatePayload::DeadlineWarning(warning) => Some(match warning.hours_remaining {
            Some(hours) => format!("Deadline approaching for \"{name}\" ({hours}h left)"),
            None => format!("Deadline approaching for \"{name}\""),
        }),
        UpdatePayload::ExpeditionCreated(_) | UpdatePayload::ExpeditionUpdated(_) => None,
    }
}

// ── Sinks ───────────────────────────────────────────────────────────

/// Receives haptic cues. Rendering them is the host's business.
pub trait HapticSink: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if the cue could not be delivered. The dispatcher
    /// logs and discards it.
    fn emit(&self, cue: HapticCue) -> Result<()>;
}

/// Receives user-visible popup messages.
pub trait PopupSink: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if the popup could not be shown. The dispatcher logs
    /// and discards it.
    fn show(&self, message: &str) -> Result<()>;
}

/// Sink that writes cues and messages to the `tracing` log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl HapticSink for TracingSink {
    fn emit(&self, cue: HapticCue) -> Result<()> {
        info!(cue = %cue, "haptic cue");
        Ok(())
    }
}

impl PopupSink for TracingSink {
    fn show(&self, message: &str) -> Result<()> {
        info!(popup = message, "popup shown");
        Ok(())
    }
}

// ── Dispatcher ──────────────────────────────────────────────────────

/// Turns updates into haptic cues and popups.
#[derive(Clone)]
pub struct NotificationDispatcher {
    policy: NotificationPolicy,
    haptics: Arc<dyn HapticSink>,
    popups: Arc<dyn PopupSink>,
}

impl NotificationDispatcher {
    pub fn new(
        policy: NotificationPolicy,
        haptics: Arc<dyn HapticSink>,
        popups: Arc<dyn PopupSink>,
    ) -> Self {
        Self {
            policy,
            haptics,
            popups,
        }
    }

    pub fn policy(&self) -> NotificationPolicy {
        self.policy
    }

    /// Fire the effects for `update`. Sink failures and panics are logged
    /// and swallowed; the haptic cue always goes out before the popup.
    pub fn notify(&self, update: &Update) {
        let kind = update.kind();

        if self.policy.enable_haptic {
            let cue = HapticCue::for_kind(kind);
            let outcome = catch_unwind(AssertUnwindSafe(|| self.haptics.emit(cue)));
            report("haptic", kind, outcome);
        }

        if self.policy.enable_popups {
            if let Some(message) = message_for(update) {
                let outcome = catch_unwind(AssertUnwindSafe(|| self.popups.show(&message)));
                report("popup", kind, outcome);
            }
        }
    }
}

impl fmt::Debug for NotificationDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationDispatcher")
            .field("policy", &self.policy)
            .finish()
    }
}

fn report(sink: &'static str, kind: UpdateKind, outcome: std::thread::Result<Result<()>>) {
    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(sink, kind = %kind, error = %e, "notification sink failed"),
        Err(_) => warn!(sink, kind = %kind, "notification sink panicked"),
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
    use crate::error::SyncError;
    use crate::update::{
        DeadlineWarning, ExpeditionCompleted, ExpeditionCreated, ExpeditionUpdated, ItemConsumed,
    };
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        cues: Mutex<Vec<HapticCue>>,
        messages: Mutex<Vec<String>>,
    }

    impl HapticSink for Recorder {
        fn emit(&self, cue: HapticCue) -> Result<()> {
            self.cues.lock().unwrap().push(cue);
            Ok(())
        }
    }

    impl PopupSink for Recorder {
        fn show(&self, message: &str) -> Result<()> {
            self.messages.lock().unwrap().push(message.to_string());
            Ok(())
        }
    }

    struct FailingPopups;

    impl PopupSink for FailingPopups {
        fn show(&self, _message: &str) -> Result<()> {
            Err(SyncError::Sink("toast service unavailable".into()))
        }
    }

    struct PanickingPopups;

    impl PopupSink for PanickingPopups {
        fn show(&self, _message: &str) -> Result<()> {
            panic!("popup renderer crashed")
        }
    }

    fn update(payload: UpdatePayload) -> Update {
        Update::new(11, "Spice Islands", "2026-03-01T12:00:00Z", payload)
    }

    fn every_kind() -> Vec<Update> {
        vec![
            update(UpdatePayload::ExpeditionUpdated(ExpeditionUpdated::default())),
            update(UpdatePayload::ItemConsumed(ItemConsumed {
                item_name: "rum".into(),
                quantity: 3,
                consumer_name: Some("Calico Jack".into()),
            })),
            update(UpdatePayload::ExpeditionCompleted(ExpeditionCompleted {
                completed_by: None,
            })),
            update(UpdatePayload::ExpeditionCreated(ExpeditionCreated {
                created_by: Some("Anne".into()),
            })),
            update(UpdatePayload::DeadlineWarning(DeadlineWarning {
                deadline: "2026-03-02T00:00:00Z".into(),
                hours_remaining: Some(12),
            })),
        ]
    }

    #[test]
    fn haptic_mapping() {
        assert_eq!(HapticCue::for_kind(UpdateKind::ItemConsumed), HapticCue::Light);
        assert_eq!(HapticCue::for_kind(UpdateKind::ExpeditionUpdated), HapticCue::Light);
        assert_eq!(HapticCue::for_kind(UpdateKind::ExpeditionCreated), HapticCue::Medium);
        assert_eq!(
            HapticCue::for_kind(UpdateKind::ExpeditionCompleted),
            HapticCue::Success
        );
        assert_eq!(
            HapticCue::for_kind(UpdateKind::DeadlineWarning),
            HapticCue::Warning
        );
    }

    #[test]
    fn message_templates() {
        let updates = every_kind();
        let messages: Vec<_> = updates.iter().map(message_for).collect();
        assert_eq!(
            messages,
            vec![
                None,
                Some("Calico Jack consumed 3x rum in Spice Islands".to_string()),
                Some("Expedition \"Spice Islands\" completed!".to_string()),
                None,
                Some("Deadline approaching for \"Spice Islands\" (12h left)".to_string()),
            ]
        );
        for u in &updates {
            assert_eq!(message_for(u).is_some(), should_show(u.kind()));
        }
    }

    #[test]
    fn anonymous_consumer_reads_as_someone() {
        let u = update(UpdatePayload::ItemConsumed(ItemConsumed {
            item_name: "limes".into(),
            quantity: 1,
            consumer_name: None,
        }));
        assert_eq!(
            message_for(&u).unwrap(),
            "Someone consumed 1x limes in Spice Islands"
        );
    }

    #[test]
    fn popups_only_policy_never_touches_haptics() {
        let recorder = Arc::new(Recorder::default());
        let dispatcher = NotificationDispatcher::new(
            NotificationPolicy::default().with_haptic(false),
            recorder.clone(),
            recorder.clone(),
        );

        for u in every_kind() {
            dispatcher.notify(&u);
        }

        assert!(recorder.cues.lock().unwrap().is_empty());
        let messages = recorder.messages.lock().unwrap();
        assert_eq!(messages.len(), 3);
        assert!(messages.iter().all(|m| !m.contains("Anne")));
    }

    #[test]
    fn full_policy_fires_one_cue_per_update() {
        let recorder = Arc::new(Recorder::default());
        let dispatcher = NotificationDispatcher::new(
            NotificationPolicy::default(),
            recorder.clone(),
            recorder.clone(),
        );

        for u in every_kind() {
            dispatcher.notify(&u);
        }

        assert_eq!(
            *recorder.cues.lock().unwrap(),
            vec![
                HapticCue::Light,
                HapticCue::Light,
                HapticCue::Success,
                HapticCue::Medium,
                HapticCue::Warning,
            ]
        );
    }

    #[test]
    fn silent_policy_fires_nothing() {
        let recorder = Arc::new(Recorder::default());
        let dispatcher = NotificationDispatcher::new(
            NotificationPolicy::silent(),
            recorder.clone(),
            recorder.clone(),
        );
        for u in every_kind() {
            dispatcher.notify(&u);
        }
        assert!(recorder.cues.lock().unwrap().is_empty());
        assert!(recorder.messages.lock().unwrap().is_empty());
    }

    #[test]
    fn failing_popup_sink_is_isolated() {
        let recorder = Arc::new(Recorder::default());
        let dispatcher = NotificationDispatcher::new(
            NotificationPolicy::default(),
            recorder.clone(),
            Arc::new(FailingPopups),
        );

        dispatcher.notify(&update(UpdatePayload::ExpeditionCompleted(
            ExpeditionCompleted::default(),
        )));

        assert_eq!(*recorder.cues.lock().unwrap(), vec![HapticCue::Success]);
    }

    #[test]
    fn panicking_popup_sink_is_isolated() {
        let recorder = Arc::new(Recorder::default());
        let dispatcher = NotificationDispatcher::new(
            NotificationPolicy::default(),
            recorder.clone(),
            Arc::new(PanickingPopups),
        );

        let warning = update(UpdatePayload::DeadlineWarning(DeadlineWarning {
            deadline: "2026-03-02T00:00:00Z".into(),
            hours_remaining: None,
        }));
        dispatcher.notify(&warning);
        dispatcher.notify(&warning);

        assert_eq!(
            *recorder.cues.lock().unwrap(),
            vec![HapticCue::Warning, HapticCue::Warning]
        );
    }

    #[test]
    fn tracing_sink_accepts_everything() {
        let sink = TracingSink;
        assert!(sink.emit(HapticCue::Heavy).is_ok());
        assert!(sink.show("hello").is_ok());
    }
}
