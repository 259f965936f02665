//! Suggestion lifecycle
//!
//! Every field with a `suggest` descriptor can carry a [`SuggestionState`]
//! holding both the user's own value and a suggested value, plus a status:
//!
//! ```text
//! none ─▶ loading ─▶ available ─▶ reviewing ─▶ accepted
//!   │                    │             │
//!   └▶ expecting ────────┘             └──────▶ dismissed
//! ```
//!
//! `expecting` is set while a background job is expected to produce a value,
//! `loading` while a single-field request is in flight. Unaccepted
//! suggestions expire after the field's TTL and fall back to `none`.

use chrono::{DateTime, Utc};
use formwise_types::{is_empty_value, FieldId, JobId, PageId, Value, ValueSource, Values};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use crate::collaborators::SuggestionProvider;
use crate::history::{FieldDelta, HistoryEntry, HistoryKind};
use crate::schema::{FormSchema, DEFAULT_SUGGESTION_TTL_SECS};
use crate::state::{FormState, Notice, Notifier, SharedState};

/// Lifecycle status of a field's suggestion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionStatus {
    #[default]
    None,
    Expecting,
    Loading,
    Available,
    Reviewing,
    Accepted,
    Dismissed,
}

impl SuggestionStatus {
    /// A suggestion the user can still act on
    pub fn is_actionable(self) -> bool {
        matches!(self, SuggestionStatus::Available | SuggestionStatus::Reviewing)
    }

    /// A request or job is expected to deliver a value
    pub fn is_in_flight(self) -> bool {
        matches!(self, SuggestionStatus::Expecting | SuggestionStatus::Loading)
    }
}

/// Which of the two values the field currently shows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActiveValue {
    #[default]
    User,
    Suggested,
}

/// Where a suggestion came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceOrigin {
    Provider,
    Bulk,
    Job,
}

/// Provenance of a suggestion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestionSource {
    pub origin: SourceOrigin,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
    /// Opaque descriptor supplied by the provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
}

impl SuggestionSource {
    pub fn provider(detail: Option<Value>) -> Self {
        Self {
            origin: SourceOrigin::Provider,
            job_id: None,
            detail,
        }
    }

    pub fn bulk(detail: Option<Value>) -> Self {
        Self {
            origin: SourceOrigin::Bulk,
            job_id: None,
            detail,
        }
    }

    pub fn job(job_id: &JobId) -> Self {
        Self {
            origin: SourceOrigin::Job,
            job_id: Some(job_id.clone()),
            detail: None,
        }
    }
}

/// What a suggestion provider returns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestionResult {
    pub suggested_value: Value,
    /// Missing confidence counts as certain
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub source: Option<Value>,
}

impl SuggestionResult {
    pub fn new(suggested_value: Value) -> Self {
        Self {
            suggested_value,
            confidence: None,
            reason: None,
            source: None,
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// Suggestion bookkeeping for one field
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestionState {
    pub user_value: Option<Value>,
    pub suggested_value: Option<Value>,
    pub original_suggested_value: Option<Value>,
    pub active_value: ActiveValue,
    pub suggested_value_modified: bool,
    pub status: SuggestionStatus,
    pub confidence: f64,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip)]
    pub expires_at: Option<Instant>,
    pub source: SuggestionSource,
    pub error: Option<String>,
}

impl SuggestionState {
    /// Placeholder while a value is being fetched or expected
    fn pending(user_value: Option<Value>, status: SuggestionStatus, source: SuggestionSource) -> Self {
        Self {
            user_value,
            suggested_value: None,
            original_suggested_value: None,
            active_value: ActiveValue::User,
            suggested_value_modified: false,
            status,
            confidence: 0.0,
            reason: String::new(),
            timestamp: Utc::now(),
            expires_at: None,
            source,
            error: None,
        }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }

    /// Counts as "a suggestion exists" for trigger purposes
    fn is_live(&self, now: Instant) -> bool {
        matches!(
            self.status,
            SuggestionStatus::Available
                | SuggestionStatus::Reviewing
                | SuggestionStatus::Accepted
                | SuggestionStatus::Dismissed
        ) && !self.is_expired(now)
    }
}

type PendingSuggestion = Shared<BoxFuture<'static, Option<SuggestionResult>>>;
type Pending = Mutex<HashMap<FieldId, PendingSuggestion>>;

struct Inner {
    schema: Arc<FormSchema>,
    state: SharedState,
    provider: Option<Arc<dyn SuggestionProvider>>,
    notifier: Notifier,
    pending: Arc<Pending>,
}

/// Drives suggestion state for every field
#[derive(Clone)]
pub struct SuggestionEngine {
    inner: Arc<Inner>,
}

impl SuggestionEngine {
    pub fn new(
        schema: Arc<FormSchema>,
        state: SharedState,
        provider: Option<Arc<dyn SuggestionProvider>>,
        notifier: Notifier,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                schema,
                state,
                provider,
                notifier,
                pending: Arc::new(Mutex::new(HashMap::new())),
            }),
        }
    }

    pub fn suggestion(&self, field_id: &FieldId) -> Option<SuggestionState> {
        self.inner.state.lock().suggestions.get(field_id).cloned()
    }

    pub fn status(&self, field_id: &FieldId) -> SuggestionStatus {
        self.inner
            .state
            .lock()
            .suggestions
            .get(field_id)
            .map(|s| s.status)
            .unwrap_or_default()
    }

    pub fn suggestions(&self) -> BTreeMap<FieldId, SuggestionState> {
        self.inner
            .state
            .lock()
            .suggestions
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Whether an edit to `field_id` should ask the provider for a suggestion
    pub fn should_trigger_suggestion(&self, field_id: &FieldId, new_value: &Value) -> bool {
        let has_descriptor = self
            .inner
            .schema
            .field(field_id)
            .is_some_and(|f| f.suggest.is_some());
        if !has_descriptor || is_empty_value(new_value) {
            return false;
        }

        let state = self.inner.state.lock();
        match state.suggestions.get(field_id) {
            None => true,
            Some(s) if s.status.is_in_flight() => false,
            Some(s) => !s.is_live(Instant::now()),
        }
    }

    /// Ask the provider for a suggestion.
    ///
    /// Concurrent requests for the same field share one provider call.
    /// Results below the field's confidence threshold and provider failures
    /// both yield `None`.
    #[instrument(skip(self), fields(field = %field_id))]
    pub async fn request_suggestion(&self, field_id: &FieldId) -> Option<SuggestionResult> {
        let Some(provider) = self.inner.provider.clone() else {
            debug!("No suggestion provider configured");
            return None;
        };
        let Some(field) = self.inner.schema.field(field_id) else {
            warn!("request_suggestion called for unknown field");
            return None;
        };
        let Some(suggest) = field.suggest.as_ref() else {
            debug!("Field has no suggest descriptor");
            return None;
        };
        let min_confidence = suggest.min_confidence();

        let (current, values) = {
            let state = self.inner.state.lock();
            (
                state.values.get(field_id).cloned().unwrap_or(Value::Null),
                state.values.values().clone(),
            )
        };

        let pending = {
            let mut pending = self.inner.pending.lock();
            match pending.get(field_id) {
                Some(request) => request.clone(),
                None => {
                    let request = fetch(
                        provider,
                        field_id.clone(),
                        current,
                        values,
                        min_confidence,
                        Arc::downgrade(&self.inner.pending),
                    )
                    .boxed()
                    .shared();
                    pending.insert(field_id.clone(), request.clone());
                    request
                }
            }
        };

        pending.await
    }

    /// Install a provider result as an available suggestion
    pub fn apply_suggestion_result(&self, field_id: &FieldId, result: SuggestionResult) -> bool {
        let source = SuggestionSource::provider(result.source.clone());
        self.apply(field_id, result, source)
    }

    pub(crate) fn apply(
        &self,
        field_id: &FieldId,
        result: SuggestionResult,
        source: SuggestionSource,
    ) -> bool {
        if self.inner.schema.field(field_id).is_none() {
            warn!(field = %field_id, "Ignoring suggestion for unknown field");
            return false;
        }
        let ttl = self.ttl(field_id);
        let mut state = self.inner.state.lock();
        install(&mut state, field_id, result, source, ttl);
        true
    }

    /// React to an edit: request a suggestion when warranted and install it
    /// unless the field changed again in the meantime.
    pub async fn handle_field_change(&self, field_id: &FieldId, new_value: &Value) {
        if self.inner.provider.is_none() || !self.should_trigger_suggestion(field_id, new_value) {
            return;
        }

        let (version, previous) = {
            let mut state = self.inner.state.lock();
            let version = state.values.version(field_id);
            let current = state.values.get(field_id).cloned();
            let previous = match state.suggestions.get_mut(field_id) {
                Some(s) => {
                    let previous = s.status;
                    s.status = SuggestionStatus::Loading;
                    Some(previous)
                }
                None => {
                    state.suggestions.insert(
                        field_id.clone(),
                        SuggestionState::pending(
                            current,
                            SuggestionStatus::Loading,
                            SuggestionSource::provider(None),
                        ),
                    );
                    None
                }
            };
            (version, previous)
        };

        let result = self.request_suggestion(field_id).await;
        let ttl = self.ttl(field_id);

        let mut state = self.inner.state.lock();
        let stale = state.values.version(field_id) != version;
        let still_loading = state
            .suggestions
            .get(field_id)
            .is_some_and(|s| s.status == SuggestionStatus::Loading);

        match result {
            Some(result) if !stale && still_loading => {
                let source = SuggestionSource::provider(result.source.clone());
                install(&mut state, field_id, result, source, ttl);
            }
            _ => {
                if stale {
                    debug!(field = %field_id, "Discarding suggestion for an edited field");
                }
                if still_loading {
                    match previous {
                        Some(status) => {
                            if let Some(s) = state.suggestions.get_mut(field_id) {
                                s.status = status;
                            }
                        }
                        None => {
                            state.suggestions.remove(field_id);
                        }
                    }
                }
            }
        }
    }

    /// Write the suggested value into the field and record one history entry
    pub fn accept_suggestion(&self, field_id: &FieldId) -> bool {
        let preserve = self.preserves_both(field_id);
        self.with_state(|state, notices| {
            let Some(delta) = accept_in(state, field_id, preserve, notices) else {
                warn!(field = %field_id, "No suggestion to accept");
                return false;
            };
            state.history.push(
                HistoryEntry::new(
                    HistoryKind::AcceptSuggestion,
                    vec![field_id.clone()],
                    format!("Accept suggestion for {field_id}"),
                )
                .with_changes(delta.into_iter().collect()),
            );
            true
        })
    }

    /// Mark the suggestion dismissed. The field value is untouched.
    pub fn dismiss_suggestion(&self, field_id: &FieldId) -> bool {
        let mut state = self.inner.state.lock();
        if dismiss_in(&mut state, field_id) {
            true
        } else {
            warn!(field = %field_id, "No suggestion to dismiss");
            false
        }
    }

    /// Swap which of the two values the field shows
    pub fn toggle_value(&self, field_id: &FieldId) -> bool {
        self.with_state(|state, notices| {
            let current = state.values.get(field_id).cloned();
            let Some(s) = state.suggestions.get_mut(field_id) else {
                warn!(field = %field_id, "No suggestion to toggle");
                return false;
            };
            let togglable = matches!(
                s.status,
                SuggestionStatus::Available | SuggestionStatus::Reviewing | SuggestionStatus::Accepted
            );
            if !togglable || s.suggested_value.is_none() {
                warn!(field = %field_id, status = ?s.status, "Suggestion cannot be toggled");
                return false;
            }

            let (target, source) = match s.active_value {
                ActiveValue::User => {
                    s.user_value = current;
                    s.active_value = ActiveValue::Suggested;
                    (s.suggested_value.clone(), ValueSource::Suggested)
                }
                ActiveValue::Suggested => {
                    s.active_value = ActiveValue::User;
                    (s.user_value.clone(), ValueSource::User)
                }
            };

            let delta = state.write(field_id, target, source, notices);
            state.history.push(
                HistoryEntry::new(
                    HistoryKind::ToggleValue,
                    vec![field_id.clone()],
                    format!("Toggle value for {field_id}"),
                )
                .with_changes(delta.into_iter().collect()),
            );
            true
        })
    }

    /// Undo edits to the suggested value
    pub fn reset_to_original_suggestion(&self, field_id: &FieldId) -> bool {
        self.with_state(|state, notices| {
            let Some(s) = state.suggestions.get_mut(field_id) else {
                return false;
            };
            let Some(original) = s.original_suggested_value.clone() else {
                return false;
            };
            s.suggested_value = Some(original.clone());
            s.suggested_value_modified = false;
            if s.active_value == ActiveValue::Suggested {
                state.edit(field_id, original, ValueSource::Suggested, notices);
            }
            true
        })
    }

    /// Replace the suggested value with a user-edited one
    pub fn edit_suggested_value(&self, field_id: &FieldId, value: Value) -> bool {
        self.with_state(|state, notices| {
            let Some(s) = state.suggestions.get_mut(field_id) else {
                return false;
            };
            if s.suggested_value.is_none() {
                return false;
            }
            s.suggested_value_modified = s.original_suggested_value.as_ref() != Some(&value);
            s.suggested_value = Some(value.clone());
            if s.active_value == ActiveValue::Suggested {
                state.edit(field_id, value, ValueSource::User, notices);
            }
            true
        })
    }

    pub fn mark_as_reviewed(&self, field_id: &FieldId) -> bool {
        let mut state = self.inner.state.lock();
        match state.suggestions.get_mut(field_id) {
            Some(s) if s.status == SuggestionStatus::Available => {
                s.status = SuggestionStatus::Reviewing;
                true
            }
            _ => false,
        }
    }

    /// Accept every actionable suggestion in the form as one history entry
    pub fn accept_all_suggestions(&self) -> Vec<FieldId> {
        let fields: Vec<FieldId> = self.inner.schema.fields().map(|f| f.id.clone()).collect();
        self.accept_many(fields, "Accept all suggestions".to_string())
    }

    pub fn accept_all_on_page(&self, page_id: &PageId) -> Vec<FieldId> {
        let Some(page) = self.inner.schema.page(page_id) else {
            warn!(page = %page_id, "accept_all_on_page called for unknown page");
            return Vec::new();
        };
        let fields = page.fields.iter().map(|f| f.id.clone()).collect();
        self.accept_many(fields, format!("Accept all suggestions on {page_id}"))
    }

    /// Dismiss every actionable suggestion on a page; the batch is logged
    /// as one `bulk-accept` entry like the other bulk actions
    pub fn dismiss_all_on_page(&self, page_id: &PageId) -> Vec<FieldId> {
        let Some(page) = self.inner.schema.page(page_id) else {
            warn!(page = %page_id, "dismiss_all_on_page called for unknown page");
            return Vec::new();
        };

        let mut state = self.inner.state.lock();
        let dismissed: Vec<FieldId> = page
            .fields
            .iter()
            .filter(|f| dismiss_in(&mut state, &f.id))
            .map(|f| f.id.clone())
            .collect();
        if !dismissed.is_empty() {
            state.history.push(HistoryEntry::new(
                HistoryKind::BulkAccept,
                dismissed.clone(),
                format!("Dismiss all suggestions on {page_id}"),
            ));
        }
        dismissed
    }

    /// Revert expired, unaccepted suggestions to `none`
    pub fn clear_expired_suggestions(&self) -> Vec<FieldId> {
        let now = Instant::now();
        self.with_state(|state, notices| {
            let expired: Vec<FieldId> = state
                .suggestions
                .iter()
                .filter(|(_, s)| s.status.is_actionable() && s.is_expired(now))
                .map(|(id, _)| id.clone())
                .collect();

            for field_id in &expired {
                let Some(s) = state.suggestions.get_mut(field_id) else {
                    continue;
                };
                let restore = (s.active_value == ActiveValue::Suggested).then(|| s.user_value.clone());
                s.status = SuggestionStatus::None;
                s.suggested_value = None;
                s.original_suggested_value = None;
                s.suggested_value_modified = false;
                s.active_value = ActiveValue::User;
                s.expires_at = None;
                if let Some(value) = restore {
                    state.write(field_id, value, ValueSource::System, notices);
                }
            }
            if !expired.is_empty() {
                debug!(count = expired.len(), "Cleared expired suggestions");
            }
            expired
        })
    }

    /// Mark fields as waiting on a background job
    pub(crate) fn mark_expecting(&self, fields: &[FieldId], job_id: &JobId) {
        let mut state = self.inner.state.lock();
        for field_id in fields {
            if self.inner.schema.field(field_id).is_none() {
                warn!(field = %field_id, job = %job_id, "Job names unknown field");
                continue;
            }
            let current = state.values.get(field_id).cloned();
            match state.suggestions.get_mut(field_id) {
                Some(s) => {
                    s.status = SuggestionStatus::Expecting;
                    s.error = None;
                    s.source = SuggestionSource::job(job_id);
                }
                None => {
                    state.suggestions.insert(
                        field_id.clone(),
                        SuggestionState::pending(
                            current,
                            SuggestionStatus::Expecting,
                            SuggestionSource::job(job_id),
                        ),
                    );
                }
            }
        }
    }

    /// Promote an `expecting` field to `available` with a job result
    pub(crate) fn promote_expecting(&self, field_id: &FieldId, value: Value, job_id: &JobId) -> bool {
        if self.status(field_id) != SuggestionStatus::Expecting {
            return false;
        }
        self.apply(field_id, SuggestionResult::new(value), SuggestionSource::job(job_id))
    }

    /// Settle a field a finished job never delivered incrementally
    pub(crate) fn settle_expecting(
        &self,
        field_id: &FieldId,
        partial: Option<Value>,
        error: Option<String>,
        job_id: &JobId,
    ) {
        if self.status(field_id) != SuggestionStatus::Expecting {
            return;
        }
        match partial {
            Some(value) => {
                self.apply(field_id, SuggestionResult::new(value), SuggestionSource::job(job_id));
            }
            None => {
                let mut state = self.inner.state.lock();
                if let Some(s) = state.suggestions.get_mut(field_id) {
                    s.status = SuggestionStatus::None;
                    s.error = error;
                }
            }
        }
    }

    /// Revert every expecting or loading field to `none`
    pub(crate) fn revert_in_flight(&self) -> Vec<FieldId> {
        let mut state = self.inner.state.lock();
        let mut reverted = Vec::new();
        for (field_id, s) in state.suggestions.iter_mut() {
            if s.status.is_in_flight() {
                s.status = SuggestionStatus::None;
                reverted.push(field_id.clone());
            }
        }
        reverted
    }

    fn accept_many(&self, candidates: Vec<FieldId>, description: String) -> Vec<FieldId> {
        let preserve: Vec<bool> = candidates.iter().map(|f| self.preserves_both(f)).collect();
        self.with_state(|state, notices| {
            let mut accepted = Vec::new();
            let mut changes = Vec::new();
            for (field_id, preserve) in candidates.iter().zip(preserve) {
                if let Some(delta) = accept_in(state, field_id, preserve, notices) {
                    accepted.push(field_id.clone());
                    changes.extend(delta);
                }
            }
            if !accepted.is_empty() {
                state.history.push(
                    HistoryEntry::new(HistoryKind::BulkAccept, accepted.clone(), description)
                        .with_changes(changes),
                );
            }
            accepted
        })
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut FormState, &mut Vec<Notice>) -> R) -> R {
        let mut notices = Vec::new();
        let result = {
            let mut state = self.inner.state.lock();
            f(&mut state, &mut notices)
        };
        self.inner.notifier.emit(notices);
        result
    }

    fn ttl(&self, field_id: &FieldId) -> Duration {
        self.inner
            .schema
            .field(field_id)
            .and_then(|f| f.suggest.as_ref())
            .map_or(Duration::from_secs(DEFAULT_SUGGESTION_TTL_SECS), |s| s.ttl())
    }

    fn preserves_both(&self, field_id: &FieldId) -> bool {
        self.inner
            .schema
            .field(field_id)
            .and_then(|f| f.suggest.as_ref())
            .map_or(true, |s| s.preserve_both_values)
    }
}

impl std::fmt::Debug for SuggestionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SuggestionEngine")
            .field("provider", &self.inner.provider.is_some())
            .field("pending", &self.inner.pending.lock().len())
            .finish()
    }
}

fn install(
    state: &mut FormState,
    field_id: &FieldId,
    result: SuggestionResult,
    source: SuggestionSource,
    ttl: Duration,
) {
    let current = state.values.get(field_id).cloned();
    // a field already showing a suggested value keeps its remembered user value
    let user_value = match state.suggestions.get(field_id) {
        Some(s) if s.active_value == ActiveValue::Suggested => s.user_value.clone(),
        _ => current,
    };
    state.suggestions.insert(
        field_id.clone(),
        SuggestionState {
            user_value,
            suggested_value: Some(result.suggested_value.clone()),
            original_suggested_value: Some(result.suggested_value),
            active_value: ActiveValue::User,
            suggested_value_modified: false,
            status: SuggestionStatus::Available,
            confidence: result.confidence.unwrap_or(1.0),
            reason: result.reason.unwrap_or_default(),
            timestamp: Utc::now(),
            expires_at: Some(Instant::now() + ttl),
            source,
            error: None,
        },
    );
    debug!(field = %field_id, "Suggestion available");
}

/// Accept one field's suggestion. `None` when there is nothing to accept;
/// otherwise the value change, if the value actually changed.
fn accept_in(
    state: &mut FormState,
    field_id: &FieldId,
    preserve_both: bool,
    notices: &mut Vec<Notice>,
) -> Option<Option<FieldDelta>> {
    let current = state.values.get(field_id).cloned();
    let s = state.suggestions.get_mut(field_id)?;
    if !s.status.is_actionable() {
        return None;
    }
    let value = s.suggested_value.clone()?;

    if s.active_value == ActiveValue::User {
        s.user_value = current;
    }
    s.status = SuggestionStatus::Accepted;
    s.active_value = ActiveValue::Suggested;
    if !preserve_both {
        s.user_value = Some(value.clone());
    }

    Some(state.write(field_id, Some(value), ValueSource::Suggested, notices))
}

fn dismiss_in(state: &mut FormState, field_id: &FieldId) -> bool {
    match state.suggestions.get_mut(field_id) {
        Some(s) if s.status.is_actionable() => {
            s.status = SuggestionStatus::Dismissed;
            true
        }
        _ => false,
    }
}

/// One shared provider call. Removes its own pending entry when done.
async fn fetch(
    provider: Arc<dyn SuggestionProvider>,
    field_id: FieldId,
    current: Value,
    values: Values,
    min_confidence: f64,
    pending: Weak<Pending>,
) -> Option<SuggestionResult> {
    let result = match provider.suggest(&field_id, &current, &values).await {
        Ok(result) if result.confidence.unwrap_or(1.0) < min_confidence => {
            debug!(
                field = %field_id,
                confidence = ?result.confidence,
                min_confidence,
                "Suggestion below confidence threshold"
            );
            None
        }
        Ok(result) => Some(result),
        Err(err) => {
            warn!(field = %field_id, error = %err, "Suggestion provider failed");
            None
        }
    };

    if let Some(pending) = pending.upgrade() {
        pending.lock().remove(&field_id);
    }
    result
}
