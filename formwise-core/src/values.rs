//! Field value store with dirty tracking
//!
//! The store holds the current value of every field alongside the snapshot
//! taken at construction (or reset) and the snapshot taken at the last
//! successful draft save. `dirty_fields` is kept in lockstep with the
//! difference between current and initial values.

use chrono::{DateTime, Utc};
use formwise_types::{FieldChange, FieldId, Value, ValueSource, Values};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};

use crate::history::FieldDelta;

/// Who touched which fields, and since when
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EditMetadata {
    pub started_at: DateTime<Utc>,
    pub ai_assisted_fields: BTreeSet<FieldId>,
    pub user_edited_fields: BTreeSet<FieldId>,
}

impl EditMetadata {
    fn new() -> Self {
        Self {
            started_at: Utc::now(),
            ai_assisted_fields: BTreeSet::new(),
            user_edited_fields: BTreeSet::new(),
        }
    }
}

/// Result of a value write that actually changed something
#[derive(Debug, Clone, PartialEq)]
pub struct ValueWrite {
    pub delta: FieldDelta,
    /// Whether the number of dirty fields changed with this write
    pub dirty_changed: bool,
}

/// Current values, snapshots and dirty state for one form
#[derive(Debug, Clone)]
pub struct ValueStore {
    values: Values,
    initial_values: Values,
    last_saved_values: Option<Values>,
    last_saved_at: Option<DateTime<Utc>>,
    dirty_fields: BTreeSet<FieldId>,
    versions: HashMap<FieldId, u64>,
    metadata: EditMetadata,
}

impl ValueStore {
    pub fn new(initial_values: Values) -> Self {
        Self {
            values: initial_values.clone(),
            initial_values,
            last_saved_values: None,
            last_saved_at: None,
            dirty_fields: BTreeSet::new(),
            versions: HashMap::new(),
            metadata: EditMetadata::new(),
        }
    }

    pub fn get(&self, field_id: &FieldId) -> Option<&Value> {
        self.values.get(field_id)
    }

    pub fn values(&self) -> &Values {
        &self.values
    }

    pub fn initial_values(&self) -> &Values {
        &self.initial_values
    }

    pub fn last_saved_values(&self) -> Option<&Values> {
        self.last_saved_values.as_ref()
    }

    pub fn last_saved_at(&self) -> Option<DateTime<Utc>> {
        self.last_saved_at
    }

    pub fn metadata(&self) -> &EditMetadata {
        &self.metadata
    }

    /// Monotonic per-field write counter, used to detect stale async results
    pub fn version(&self, field_id: &FieldId) -> u64 {
        self.versions.get(field_id).copied().unwrap_or(0)
    }

    /// Write a value.
    ///
    /// Returns `None` without touching anything when the value equals the
    /// current one.
    pub fn set_value(
        &mut self,
        field_id: &FieldId,
        value: Value,
        source: ValueSource,
    ) -> Option<ValueWrite> {
        if self.values.get(field_id) == Some(&value) {
            return None;
        }

        let dirty_before = self.dirty_fields.len();
        let before = self.values.insert(field_id.clone(), value.clone());

        if self.initial_values.get(field_id) == Some(&value) {
            self.dirty_fields.remove(field_id);
        } else {
            self.dirty_fields.insert(field_id.clone());
        }

        match source {
            ValueSource::User => {
                self.metadata.user_edited_fields.insert(field_id.clone());
            }
            ValueSource::Suggested => {
                self.metadata.ai_assisted_fields.insert(field_id.clone());
            }
            ValueSource::System => {}
        }

        *self.versions.entry(field_id.clone()).or_insert(0) += 1;

        Some(ValueWrite {
            delta: FieldDelta {
                field_id: field_id.clone(),
                before,
                after: Some(value),
            },
            dirty_changed: dirty_before != self.dirty_fields.len(),
        })
    }

    /// Restore a field to a previous value (or remove it), bypassing edit metadata.
    pub fn restore(&mut self, field_id: &FieldId, value: Option<Value>) -> Option<ValueWrite> {
        match value {
            Some(value) => self.set_value(field_id, value, ValueSource::System),
            None => {
                let before = self.values.remove(field_id)?;
                let dirty_before = self.dirty_fields.len();
                if self.initial_values.contains_key(field_id) {
                    self.dirty_fields.insert(field_id.clone());
                } else {
                    self.dirty_fields.remove(field_id);
                }
                *self.versions.entry(field_id.clone()).or_insert(0) += 1;
                Some(ValueWrite {
                    delta: FieldDelta {
                        field_id: field_id.clone(),
                        before: Some(before),
                        after: None,
                    },
                    dirty_changed: dirty_before != self.dirty_fields.len(),
                })
            }
        }
    }

    /// Restore the initial snapshot. Returns true if the form was dirty before.
    pub fn reset(&mut self) -> bool {
        let was_dirty = !self.dirty_fields.is_empty();
        let touched: BTreeSet<FieldId> = self
            .values
            .keys()
            .chain(self.initial_values.keys())
            .cloned()
            .collect();
        for field_id in touched {
            if self.values.get(&field_id) != self.initial_values.get(&field_id) {
                *self.versions.entry(field_id).or_insert(0) += 1;
            }
        }
        self.values = self.initial_values.clone();
        self.dirty_fields.clear();
        self.metadata.ai_assisted_fields.clear();
        self.metadata.user_edited_fields.clear();
        was_dirty
    }

    /// Treat the current values as saved
    pub fn mark_clean(&mut self) {
        let snapshot = self.values.clone();
        self.mark_saved(snapshot);
    }

    /// Record a successful save of `snapshot`, which may be older than the
    /// current values if edits landed while the save was in flight.
    pub fn mark_saved(&mut self, snapshot: Values) {
        self.last_saved_at = Some(Utc::now());
        self.last_saved_values = Some(snapshot);
    }

    /// Whether anything differs from the last saved snapshot
    pub fn has_unsaved_changes(&self) -> bool {
        let baseline = self.last_saved_values.as_ref().unwrap_or(&self.initial_values);
        &self.values != baseline
    }

    pub fn is_dirty(&self) -> bool {
        !self.dirty_fields.is_empty()
    }

    pub fn is_field_dirty(&self, field_id: &FieldId) -> bool {
        self.dirty_fields.contains(field_id)
    }

    pub fn dirty_fields(&self) -> Vec<FieldId> {
        self.dirty_fields.iter().cloned().collect()
    }

    /// Diff current values against the last saved snapshot (or the initial
    /// one if nothing was saved yet).
    ///
    /// `accepted` reports whether a field's current value came from an
    /// accepted suggestion.
    pub fn changes(&self, accepted: impl Fn(&FieldId) -> bool) -> Vec<FieldChange> {
        let baseline = self.last_saved_values.as_ref().unwrap_or(&self.initial_values);
        let keys: BTreeSet<&FieldId> = self.values.keys().chain(baseline.keys()).collect();

        keys.into_iter()
            .filter_map(|field_id| {
                let old_value = baseline.get(field_id);
                let new_value = self.values.get(field_id);
                if old_value == new_value {
                    return None;
                }
                let source = if accepted(field_id) {
                    ValueSource::Suggested
                } else {
                    ValueSource::User
                };
                Some(FieldChange {
                    field_id: field_id.clone(),
                    old_value: old_value.cloned(),
                    new_value: new_value.cloned(),
                    source,
                })
            })
            .collect()
    }
}

impl Default for ValueStore {
    fn default() -> Self {
        Self::new(Values::new())
    }
}
