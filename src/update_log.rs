//! Bounded, newest-first buffer of recently received updates.

use std::collections::VecDeque;

use crate::update::Update;

/// Default number of updates retained by an [`UpdateLog`].
pub const DEFAULT_MAX_UPDATES: usize = 20;

/// A bounded ordered sequence of [`Update`]s, newest first.
///
/// Inserting into a full log evicts the oldest entry. Order is arrival order;
/// the updates' own timestamps are never consulted.
#[derive(Debug, Clone)]
pub struct UpdateLog {
    entries: VecDeque<Update>,
    capacity: usize,
}

impl UpdateLog {
    /// Create an empty log holding at most `capacity` updates.
    ///
    /// Values below 1 are clamped to 1.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Insert `update` as the newest entry, evicting the oldest when full.
    ///
    /// Returns the evicted update, if any.
    pub fn push(&mut self, update: Update) -> Option<Update> {
        self.entries.push_front(update);
        if self.entries.len() > self.capacity {
            self.entries.pop_back()
        } else {
            None
        }
    }

    /// Copy of the current contents, newest first.
    pub fn snapshot(&self) -> Vec<Update> {
        self.entries.iter().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Update> {
        self.entries.iter()
    }

    pub fn latest(&self) -> Option<&Update> {
        self.entries.front()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for UpdateLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_MAX_UPDATES)
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
    use crate::update::{ItemConsumed, UpdatePayload};

    fn consumed(id: u64) -> Update {
        Update::new(
            id,
            format!("expedition {id}"),
            "2026-01-01T00:00:00Z",
            UpdatePayload::ItemConsumed(ItemConsumed {
                item_name: "biscuit".into(),
                quantity: 1,
                consumer_name: None,
            }),
        )
    }

    fn ids(log: &UpdateLog) -> Vec<u64> {
        log.iter().map(|u| u.expedition_id).collect()
    }

    #[test]
    fn keeps_most_recent_updates_newest_first() {
        let mut log = UpdateLog::with_capacity(3);
        for id in 0..5 {
            log.push(consumed(id));
        }
        assert_eq!(log.len(), 3);
        assert_eq!(ids(&log), vec![4, 3, 2]);
    }

    #[test]
    fn push_reports_evicted_entry() {
        let mut log = UpdateLog::with_capacity(2);
        assert!(log.push(consumed(0)).is_none());
        assert!(log.push(consumed(1)).is_none());
        let evicted = log.push(consumed(2)).unwrap();
        assert_eq!(evicted.expedition_id, 0);
    }

    #[test]
    fn arrival_order_wins_over_timestamps() {
        let mut log = UpdateLog::with_capacity(5);
        let mut late = consumed(1);
        late.timestamp = "2030-01-01T00:00:00Z".into();
        let mut early = consumed(2);
        early.timestamp = "2000-01-01T00:00:00Z".into();
        log.push(late);
        log.push(early);
        assert_eq!(log.latest().unwrap().expedition_id, 2);
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let mut log = UpdateLog::with_capacity(0);
        assert_eq!(log.capacity(), 1);
        log.push(consumed(1));
        log.push(consumed(2));
        assert_eq!(ids(&log), vec![2]);
    }

    #[test]
    fn clear_empties_the_log() {
        let mut log = UpdateLog::default();
        assert_eq!(log.capacity(), DEFAULT_MAX_UPDATES);
        log.push(consumed(1));
        log.clear();
        assert!(log.is_empty());
        assert!(log.snapshot().is_empty());
    }
}
