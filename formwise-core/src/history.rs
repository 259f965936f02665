//! Bounded undo/redo history
//!
//! History is a capped sequence of state-changing intents plus a cursor.
//! Appending truncates everything after the cursor, appends, then evicts the
//! oldest entry once the cap is exceeded.

use chrono::{DateTime, Utc};
use formwise_types::{FieldId, Value};
use serde::Serialize;
use std::collections::VecDeque;

/// Default cap on the number of retained entries
pub const DEFAULT_MAX_HISTORY_SIZE: usize = 50;

/// Kind of intent recorded in history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum HistoryKind {
    FieldEdit,
    AcceptSuggestion,
    DismissSuggestion,
    ToggleValue,
    BulkAccept,
}

/// Before/after value of one field touched by an intent
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDelta {
    pub field_id: FieldId,
    pub before: Option<Value>,
    pub after: Option<Value>,
}

/// One recorded intent
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: HistoryKind,
    pub field_ids: Vec<FieldId>,
    pub description: String,
    pub changes: Vec<FieldDelta>,
}

impl HistoryEntry {
    pub fn new(kind: HistoryKind, field_ids: Vec<FieldId>, description: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
            field_ids,
            description: description.into(),
            changes: Vec::new(),
        }
    }

    pub fn with_changes(mut self, changes: Vec<FieldDelta>) -> Self {
        self.changes = changes;
        self
    }
}

/// Capped, pointer-based history log
#[derive(Debug, Clone)]
pub struct HistoryLog {
    entries: VecDeque<HistoryEntry>,
    /// Index of the most recently applied entry; `None` is "before the first entry"
    cursor: Option<usize>,
    max_size: usize,
}

impl HistoryLog {
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            cursor: None,
            max_size: max_size.max(1),
        }
    }

    /// Append an entry, discarding any redo tail first
    pub fn push(&mut self, entry: HistoryEntry) {
        let keep = self.cursor.map_or(0, |c| c + 1);
        self.entries.truncate(keep);
        self.entries.push_back(entry);
        while self.entries.len() > self.max_size {
            self.entries.pop_front();
        }
        self.cursor = Some(self.entries.len() - 1);
    }

    /// Step back, returning the entry that was under the cursor
    pub fn undo(&mut self) -> Option<HistoryEntry> {
        let current = self.cursor?;
        let entry = self.entries.get(current).cloned();
        self.cursor = current.checked_sub(1);
        entry
    }

    /// Step forward, returning the entry now under the cursor
    pub fn redo(&mut self) -> Option<HistoryEntry> {
        let next = self.cursor.map_or(0, |c| c + 1);
        let entry = self.entries.get(next).cloned()?;
        self.cursor = Some(next);
        Some(entry)
    }

    pub fn can_undo(&self) -> bool {
        self.cursor.is_some()
    }

    pub fn can_redo(&self) -> bool {
        let next = self.cursor.map_or(0, |c| c + 1);
        next < self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.cursor = None;
    }

    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    pub fn entries(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }
}

impl Default for HistoryLog {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HISTORY_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edit(field: &str) -> HistoryEntry {
        HistoryEntry::new(HistoryKind::FieldEdit, vec![FieldId::new(field)], format!("edit {field}"))
    }

    #[test]
    fn test_cap_evicts_oldest() {
        let mut log = HistoryLog::new(3);
        for field in ["a", "b", "c", "d"] {
            log.push(edit(field));
        }

        assert_eq!(log.len(), 3);
        assert_eq!(log.cursor(), Some(2));
        let first = log.entries().next().unwrap();
        assert_eq!(first.field_ids, vec![FieldId::new("b")]);
    }

    #[test]
    fn test_undo_redo_bounds() {
        let mut log = HistoryLog::new(10);
        assert!(log.undo().is_none());
        assert!(log.redo().is_none());

        log.push(edit("a"));
        log.push(edit("b"));
        assert!(!log.can_redo());
        assert!(log.redo().is_none());
        assert_eq!(log.cursor(), Some(1));

        assert_eq!(log.undo().unwrap().field_ids[0].as_str(), "b");
        assert_eq!(log.undo().unwrap().field_ids[0].as_str(), "a");
        assert_eq!(log.cursor(), None);
        assert!(!log.can_undo());
        assert!(log.undo().is_none());

        assert_eq!(log.redo().unwrap().field_ids[0].as_str(), "a");
        assert_eq!(log.cursor(), Some(0));
        assert!(log.can_redo());
    }

    #[test]
    fn test_push_truncates_redo_tail() {
        let mut log = HistoryLog::new(10);
        log.push(edit("a"));
        log.push(edit("b"));
        log.push(edit("c"));
        log.undo();
        log.undo();

        log.push(edit("z"));
        let ids: Vec<_> = log.entries().map(|e| e.field_ids[0].as_str().to_string()).collect();
        assert_eq!(ids, vec!["a", "z"]);
        assert_eq!(log.cursor(), Some(1));
        assert!(!log.can_redo());
    }

    #[test]
    fn test_push_after_full_undo_replaces_everything() {
        let mut log = HistoryLog::new(10);
        log.push(edit("a"));
        log.undo();
        log.push(edit("b"));
        assert_eq!(log.len(), 1);
        assert_eq!(log.cursor(), Some(0));
    }

    #[test]
    fn test_clear() {
        let mut log = HistoryLog::default();
        log.push(edit("a"));
        log.clear();
        assert!(log.is_empty());
        assert_eq!(log.cursor(), None);
        assert_eq!(log.max_size(), DEFAULT_MAX_HISTORY_SIZE);
    }

    #[test]
    fn test_entry_serializes_kind_as_type() {
        let json = serde_json::to_value(edit("a")).unwrap();
        assert_eq!(json["type"], "field-edit");
        assert_eq!(json["fieldIds"][0], "a");
    }
}
