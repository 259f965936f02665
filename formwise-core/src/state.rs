//! Shared mutable form state
//!
//! Every sub-engine works against one `FormState` behind a mutex. The lock is
//! only ever held for synchronous bookkeeping, never across an `.await`.
//! Observer callbacks are collected as [`Notice`]s while the lock is held and
//! delivered by a [`Notifier`] after it is released.

use formwise_types::{FieldChange, FieldId, Value, ValueSource, Values};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use crate::collaborators::EngineObserver;
use crate::history::{FieldDelta, HistoryEntry, HistoryKind, HistoryLog};
use crate::suggestion::{SuggestionState, SuggestionStatus};
use crate::validation::ValidationResult;
use crate::values::{ValueStore, ValueWrite};

pub type SharedState = Arc<Mutex<FormState>>;

#[derive(Debug)]
pub struct FormState {
    pub values: ValueStore,
    pub history: HistoryLog,
    pub suggestions: HashMap<FieldId, SuggestionState>,
    pub validations: HashMap<FieldId, ValidationResult>,
}

impl FormState {
    pub fn new(initial_values: Values, max_history_size: usize) -> Self {
        Self {
            values: ValueStore::new(initial_values),
            history: HistoryLog::new(max_history_size),
            suggestions: HashMap::new(),
            validations: HashMap::new(),
        }
    }

    pub fn shared(self) -> SharedState {
        Arc::new(Mutex::new(self))
    }

    /// A user-level edit: writes the value and records one `FieldEdit` entry
    pub fn edit(
        &mut self,
        field_id: &FieldId,
        value: Value,
        source: ValueSource,
        notices: &mut Vec<Notice>,
    ) -> bool {
        let Some(write) = self.values.set_value(field_id, value, source) else {
            return false;
        };
        let description = format!("Edit {field_id}");
        let delta = self.observe(write, notices);
        self.history.push(
            HistoryEntry::new(HistoryKind::FieldEdit, vec![field_id.clone()], description)
                .with_changes(vec![delta]),
        );
        true
    }

    /// Write a value as part of a larger intent. The caller records history.
    pub fn write(
        &mut self,
        field_id: &FieldId,
        value: Option<Value>,
        source: ValueSource,
        notices: &mut Vec<Notice>,
    ) -> Option<FieldDelta> {
        let write = match value {
            Some(value) => self.values.set_value(field_id, value, source)?,
            None => self.values.restore(field_id, None)?,
        };
        Some(self.observe(write, notices))
    }

    fn observe(&mut self, write: ValueWrite, notices: &mut Vec<Notice>) -> FieldDelta {
        if write.dirty_changed {
            notices.push(self.dirty_notice());
        }
        write.delta
    }

    pub fn dirty_notice(&self) -> Notice {
        Notice::DirtyStateChanged {
            is_dirty: self.values.is_dirty(),
            dirty_fields: self.values.dirty_fields(),
        }
    }

    /// Whether the field's current value came from an accepted suggestion
    pub fn is_accepted(&self, field_id: &FieldId) -> bool {
        self.suggestions
            .get(field_id)
            .is_some_and(|s| s.status == SuggestionStatus::Accepted)
    }

    pub fn changes(&self) -> Vec<FieldChange> {
        self.values.changes(|field_id| self.is_accepted(field_id))
    }
}

/// An observer callback waiting to be delivered
#[derive(Debug, Clone)]
pub enum Notice {
    DirtyStateChanged {
        is_dirty: bool,
        dirty_fields: Vec<FieldId>,
    },
    Undo(HistoryEntry),
    Redo(HistoryEntry),
    PageChanged(usize),
}

/// Delivers notices to the configured observer, if any
#[derive(Clone, Default)]
pub struct Notifier {
    observer: Option<Arc<dyn EngineObserver>>,
}

impl Notifier {
    pub fn new(observer: Option<Arc<dyn EngineObserver>>) -> Self {
        Self { observer }
    }

    pub fn emit(&self, notices: Vec<Notice>) {
        let Some(observer) = &self.observer else {
            return;
        };
        for notice in notices {
            match notice {
                Notice::DirtyStateChanged {
                    is_dirty,
                    dirty_fields,
                } => observer.on_dirty_state_change(is_dirty, &dirty_fields),
                Notice::Undo(entry) => observer.on_undo(&entry),
                Notice::Redo(entry) => observer.on_redo(&entry),
                Notice::PageChanged(index) => observer.on_page_change(index),
            }
        }
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("observer", &self.observer.is_some())
            .finish()
    }
}
