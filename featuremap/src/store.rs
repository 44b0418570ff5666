//! The canonical set of features in a room, rebuilt deterministically from
//! the room's ordered event stream.
//!
//! Two stores fed the same events in the same order always end up with the
//! same snapshot. Nothing here performs I/O; the consume loop owns the only
//! mutable handle while it runs.

use std::collections::BTreeMap;

use tracing::debug;

use crate::event::{Event, FeatureRecord};

/// What applying an event changed, for forwarding to a render sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    Cleared,
    Upserted(FeatureRecord),
    /// An event kind with no effect on the features.
    Unchanged,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FeatureStore {
    features: BTreeMap<String, FeatureRecord>,
    /// Number of events applied since the last reset.
    position: u64,
}

impl FeatureStore {
    pub fn new() -> Self {
        Default::default()
    }

    /// Remove every feature.
    pub fn apply_clear(&mut self) -> u64 {
        self.features.clear();
        self.advance()
    }

    /// Insert `record`, replacing any feature with the same id.
    pub fn apply_add(&mut self, record: FeatureRecord) -> u64 {
        self.features.insert(record.id.clone(), record);
        self.advance()
    }

    /// Replace the feature with `record`'s id. Stream order normally puts the
    /// add first; if it hasn't been seen the record is inserted.
    pub fn apply_modify(&mut self, record: FeatureRecord) -> u64 {
        if !self.features.contains_key(&record.id) {
            debug!("Modify for unseen feature {}, inserting", record.id);
        }
        self.features.insert(record.id.clone(), record);
        self.advance()
    }

    /// Dispatch `event` to its apply method. Unknown kinds change nothing
    /// but still take a position.
    pub fn apply(&mut self, event: &Event) -> Change {
        match event {
            Event::Clear => {
                self.apply_clear();
                Change::Cleared
            }
            Event::AddFeature(record) => {
                self.apply_add(record.clone());
                Change::Upserted(record.clone())
            }
            Event::ModifyFeature(record) => {
                self.apply_modify(record.clone());
                Change::Upserted(record.clone())
            }
            Event::Unknown(_) => {
                self.advance();
                Change::Unchanged
            }
        }
    }

    /// The visible features, ordered by id.
    pub fn snapshot(&self) -> Vec<FeatureRecord> {
        self.features.values().cloned().collect()
    }

    pub fn get(&self, id: &str) -> Option<&FeatureRecord> {
        self.features.get(id)
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Number of events applied since the last reset.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Back to an empty store at position zero.
    pub fn reset(&mut self) {
        *self = Default::default();
    }

    fn advance(&mut self) -> u64 {
        self.position += 1;
        self.position
    }
}
