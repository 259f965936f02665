//! The form engine facade
//!
//! [`FormEngine`] composes the value store, history, validation, suggestion
//! and job components over one shared [`FormState`] and adds page
//! navigation, submit orchestration and the background tasks (autosave and
//! the suggestion expiry sweep).
//!
//! The engine is cheap to clone; clones share state. Background tasks only
//! hold a weak reference, so dropping the last handle stops them.

use formwise_types::{FieldChange, FieldId, JobId, PageId, Value, ValueSource, Values};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use crate::collaborators::{Collaborators, DraftSaver, SubmitHandler};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::history::HistoryEntry;
use crate::jobs::{BackgroundJob, BulkFile, JobOrchestrator};
use crate::schema::FormSchema;
use crate::state::{FormState, Notice, Notifier, SharedState};
use crate::suggestion::{SuggestionEngine, SuggestionResult, SuggestionState, SuggestionStatus};
use crate::validation::{CacheStats, ValidationEngine, ValidationResult};

/// What happened to a submit request
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// The submit handler accepted the values
    Submitted,
    /// Ignored: a page transition just landed
    Guarded,
    /// Ignored: the current page is not the last one
    NotOnLastPage,
    /// Validation produced blocking failures; nothing was submitted
    Blocked(BTreeMap<FieldId, ValidationResult>),
    /// The submit handler returned an error
    HandlerFailed(String),
    /// Validation passed but no submit handler is configured
    NoHandler,
}

#[derive(Debug, Default)]
struct Navigation {
    current_page: usize,
    navigated_at: Option<Instant>,
}

#[derive(Default)]
struct Background {
    shutdown: Option<watch::Sender<bool>>,
    tasks: Vec<JoinHandle<()>>,
}

struct EngineInner {
    schema: Arc<FormSchema>,
    config: EngineConfig,
    state: SharedState,
    validation: ValidationEngine,
    suggestions: SuggestionEngine,
    jobs: JobOrchestrator,
    save_draft: Option<Arc<dyn DraftSaver>>,
    submit: Option<Arc<dyn SubmitHandler>>,
    notifier: Notifier,
    nav: Mutex<Navigation>,
    background: Mutex<Background>,
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        let background = self.background.get_mut();
        if let Some(shutdown) = background.shutdown.take() {
            let _ = shutdown.send(true);
        }
        for task in background.tasks.drain(..) {
            task.abort();
        }
        self.jobs.shutdown();
        self.validation.cancel_pending();
    }
}

/// One form's interaction engine
#[derive(Clone)]
pub struct FormEngine {
    inner: Arc<EngineInner>,
}

impl FormEngine {
    /// Build an engine over `schema`.
    ///
    /// Initial values are the schema's field defaults overlaid with
    /// `initial_values`. Fails on an invalid config, a schema that does not
    /// lint clean, or initial values for fields the schema does not declare.
    pub fn new(
        schema: FormSchema,
        config: EngineConfig,
        collaborators: Collaborators,
        initial_values: Values,
    ) -> Result<Self> {
        config.validate()?;
        if let Some(problem) = schema.lint().into_iter().next() {
            return Err(problem.into());
        }
        if let Some(unknown) = initial_values.keys().find(|f| schema.field(f).is_none()) {
            return Err(EngineError::UnknownField(unknown.to_string()));
        }

        let mut values = schema.default_values();
        values.extend(initial_values);

        let schema = Arc::new(schema);
        let state = FormState::new(values, config.max_history_size).shared();
        let notifier = Notifier::new(collaborators.observer.clone());

        let validation = ValidationEngine::new(schema.clone(), state.clone());
        let suggestions = SuggestionEngine::new(
            schema.clone(),
            state.clone(),
            collaborators.suggest.clone(),
            notifier.clone(),
        );
        let jobs = JobOrchestrator::new(
            schema.clone(),
            state.clone(),
            suggestions.clone(),
            &config.features.background_jobs,
            collaborators.bulk_suggest.clone(),
            collaborators.job_progress.clone(),
            collaborators.job_cancel.clone(),
        );

        debug!(
            pages = schema.pages().len(),
            fields = schema.fields().count(),
            "Form engine created"
        );

        Ok(Self {
            inner: Arc::new(EngineInner {
                schema,
                config,
                state,
                validation,
                suggestions,
                jobs,
                save_draft: collaborators.save_draft,
                submit: collaborators.submit,
                notifier,
                nav: Mutex::new(Navigation::default()),
                background: Mutex::new(Background::default()),
            }),
        })
    }

    pub fn schema(&self) -> &FormSchema {
        &self.inner.schema
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    // Values and dirty tracking

    pub fn get_value(&self, field_id: &FieldId) -> Option<Value> {
        self.inner.state.lock().values.get(field_id).cloned()
    }

    pub fn values(&self) -> Values {
        self.inner.state.lock().values.values().clone()
    }

    /// Write a field value and record a `field-edit` history entry.
    ///
    /// Writing the current value again is a no-op. A real change schedules
    /// debounced validation of the field and re-validates its dependents;
    /// user edits also give the suggestion engine a chance to fetch a
    /// suggestion. Returns whether the value changed.
    pub fn set_value(&self, field_id: &FieldId, value: Value, source: ValueSource) -> bool {
        if self.inner.schema.field(field_id).is_none() {
            warn!(field = %field_id, "set_value called for unknown field");
            return false;
        }

        let mut notices = Vec::new();
        let changed = self
            .inner
            .state
            .lock()
            .edit(field_id, value.clone(), source, &mut notices);
        self.inner.notifier.emit(notices);

        if changed {
            self.fan_out(field_id, value, source == ValueSource::User);
        }
        changed
    }

    /// Kick off the asynchronous follow-ups of an edit on the ambient runtime
    fn fan_out(&self, field_id: &FieldId, value: Value, user_edit: bool) {
        let Ok(runtime) = Handle::try_current() else {
            debug!(field = %field_id, "No async runtime; skipping validation follow-ups");
            return;
        };

        let validation = self.inner.validation.clone();
        let field = field_id.clone();
        runtime.spawn(async move {
            validation.validate_field_debounced(&field).await;
        });

        if !self.inner.schema.dependents_of(field_id).is_empty() {
            let validation = self.inner.validation.clone();
            let field = field_id.clone();
            runtime.spawn(async move {
                validation.validate_dependent_fields(&field).await;
            });
        }

        if user_edit {
            let suggestions = self.inner.suggestions.clone();
            let field = field_id.clone();
            runtime.spawn(async move {
                suggestions.handle_field_change(&field, &value).await;
            });
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.inner.state.lock().values.is_dirty()
    }

    pub fn dirty_fields(&self) -> Vec<FieldId> {
        self.inner.state.lock().values.dirty_fields()
    }

    /// Changes since the last successful draft save
    pub fn get_changes(&self) -> Vec<FieldChange> {
        self.inner.state.lock().changes()
    }

    pub fn mark_clean(&self) {
        self.inner.state.lock().values.mark_clean();
    }

    pub fn has_unsaved_changes(&self) -> bool {
        self.inner.state.lock().values.has_unsaved_changes()
    }

    /// Restore the initial values and clear suggestions, validations and
    /// history
    pub fn reset(&self) {
        self.inner.validation.cancel_pending();
        let notices = {
            let mut state = self.inner.state.lock();
            let was_dirty = state.values.reset();
            state.suggestions.clear();
            state.validations.clear();
            state.history.clear();
            if was_dirty {
                vec![state.dirty_notice()]
            } else {
                Vec::new()
            }
        };
        self.inner.notifier.emit(notices);
        debug!("Form reset");
    }

    // History

    /// Step back one history entry, restoring the values it changed
    pub fn undo(&self) -> bool {
        self.step_history(true)
    }

    /// Step forward one history entry, re-applying the values it changed
    pub fn redo(&self) -> bool {
        self.step_history(false)
    }

    fn step_history(&self, backwards: bool) -> bool {
        let mut notices = Vec::new();
        let restored = {
            let mut state = self.inner.state.lock();
            let entry = if backwards {
                state.history.undo()
            } else {
                state.history.redo()
            };
            let Some(entry) = entry else {
                return false;
            };

            let mut restored = Vec::new();
            for delta in &entry.changes {
                let value = if backwards {
                    delta.before.clone()
                } else {
                    delta.after.clone()
                };
                if state
                    .write(&delta.field_id, value.clone(), ValueSource::System, &mut notices)
                    .is_some()
                {
                    restored.push((delta.field_id.clone(), value));
                }
            }

            debug!(kind = ?entry.kind, backwards, "History step");
            notices.push(if backwards {
                Notice::Undo(entry)
            } else {
                Notice::Redo(entry)
            });
            restored
        };
        self.inner.notifier.emit(notices);

        for (field_id, value) in restored {
            self.fan_out(&field_id, value.unwrap_or(Value::Null), false);
        }
        true
    }

    pub fn can_undo(&self) -> bool {
        self.inner.state.lock().history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.inner.state.lock().history.can_redo()
    }

    pub fn history(&self) -> Vec<HistoryEntry> {
        self.inner.state.lock().history.entries().cloned().collect()
    }

    /// Cursor into [`history`](Self::history); `None` means before the first entry
    pub fn history_index(&self) -> Option<usize> {
        self.inner.state.lock().history.cursor()
    }

    pub fn clear_history(&self) {
        self.inner.state.lock().history.clear();
    }

    // Validation

    pub async fn validate_field(&self, field_id: &FieldId) -> ValidationResult {
        self.inner.validation.validate_field(field_id).await
    }

    pub async fn validate_field_debounced(&self, field_id: &FieldId) -> ValidationResult {
        self.inner.validation.validate_field_debounced(field_id).await
    }

    pub async fn validate_dependent_fields(
        &self,
        field_id: &FieldId,
    ) -> BTreeMap<FieldId, ValidationResult> {
        self.inner.validation.validate_dependent_fields(field_id).await
    }

    pub async fn validate_page(&self, page_id: &PageId) -> BTreeMap<FieldId, ValidationResult> {
        self.inner.validation.validate_page(page_id).await
    }

    pub async fn validate_all(&self) -> BTreeMap<FieldId, ValidationResult> {
        self.inner.validation.validate_all().await
    }

    pub fn validate_cross_field(&self) -> BTreeMap<FieldId, ValidationResult> {
        self.inner.validation.validate_cross_field()
    }

    pub fn clear_cache_for_field(&self, field_id: &FieldId) -> usize {
        self.inner.validation.clear_cache_for_field(field_id)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.inner.validation.cache_stats()
    }

    pub fn get_validation(&self, field_id: &FieldId) -> Option<ValidationResult> {
        self.inner.validation.validation(field_id)
    }

    pub fn validations(&self) -> BTreeMap<FieldId, ValidationResult> {
        self.inner.validation.validations()
    }

    // Suggestions

    pub fn get_suggestion_state(&self, field_id: &FieldId) -> Option<SuggestionState> {
        self.inner.suggestions.suggestion(field_id)
    }

    pub fn suggestion_status(&self, field_id: &FieldId) -> SuggestionStatus {
        self.inner.suggestions.status(field_id)
    }

    pub fn suggestions(&self) -> BTreeMap<FieldId, SuggestionState> {
        self.inner.suggestions.suggestions()
    }

    pub fn should_trigger_suggestion(&self, field_id: &FieldId, new_value: &Value) -> bool {
        self.inner.suggestions.should_trigger_suggestion(field_id, new_value)
    }

    pub async fn request_suggestion(&self, field_id: &FieldId) -> Option<SuggestionResult> {
        self.inner.suggestions.request_suggestion(field_id).await
    }

    pub fn apply_suggestion_result(&self, field_id: &FieldId, result: SuggestionResult) -> bool {
        self.inner.suggestions.apply_suggestion_result(field_id, result)
    }

    pub async fn handle_field_change(&self, field_id: &FieldId, new_value: &Value) {
        self.inner.suggestions.handle_field_change(field_id, new_value).await
    }

    pub fn accept_suggestion(&self, field_id: &FieldId) -> bool {
        self.inner.suggestions.accept_suggestion(field_id)
    }

    pub fn dismiss_suggestion(&self, field_id: &FieldId) -> bool {
        self.inner.suggestions.dismiss_suggestion(field_id)
    }

    pub fn toggle_value(&self, field_id: &FieldId) -> bool {
        self.inner.suggestions.toggle_value(field_id)
    }

    pub fn reset_to_original_suggestion(&self, field_id: &FieldId) -> bool {
        self.inner.suggestions.reset_to_original_suggestion(field_id)
    }

    pub fn edit_suggested_value(&self, field_id: &FieldId, value: Value) -> bool {
        self.inner.suggestions.edit_suggested_value(field_id, value)
    }

    pub fn mark_as_reviewed(&self, field_id: &FieldId) -> bool {
        self.inner.suggestions.mark_as_reviewed(field_id)
    }

    pub fn accept_all_suggestions(&self) -> Vec<FieldId> {
        self.inner.suggestions.accept_all_suggestions()
    }

    pub fn accept_all_on_page(&self, page_id: &PageId) -> Vec<FieldId> {
        self.inner.suggestions.accept_all_on_page(page_id)
    }

    pub fn dismiss_all_on_page(&self, page_id: &PageId) -> Vec<FieldId> {
        self.inner.suggestions.dismiss_all_on_page(page_id)
    }

    pub fn clear_expired_suggestions(&self) -> Vec<FieldId> {
        self.inner.suggestions.clear_expired_suggestions()
    }

    // Background jobs

    pub async fn start_bulk_suggest(&self, files: Vec<BulkFile>) -> Option<JobId> {
        self.inner.jobs.start_bulk_suggest(files).await
    }

    pub fn start_polling(&self, job_id: JobId) {
        self.inner.jobs.start_polling(job_id)
    }

    pub fn stop_polling(&self) {
        self.inner.jobs.stop_polling()
    }

    pub async fn cancel_job(&self, job_id: &JobId) -> bool {
        self.inner.jobs.cancel_job(job_id).await
    }

    pub async fn resume_job(&self, job_id: &JobId) -> bool {
        self.inner.jobs.resume_job(job_id).await
    }

    pub fn active_job(&self) -> Option<BackgroundJob> {
        self.inner.jobs.active_job()
    }

    pub fn is_blocking(&self) -> bool {
        self.inner.jobs.is_blocking()
    }

    pub fn is_polling(&self) -> bool {
        self.inner.jobs.is_polling()
    }

    // Navigation and submit

    pub fn current_page(&self) -> usize {
        self.inner.nav.lock().current_page
    }

    pub fn is_last_page(&self) -> bool {
        self.current_page() + 1 >= self.inner.schema.pages().len()
    }

    pub fn is_field_visible(&self, field_id: &FieldId) -> bool {
        let Some(field) = self.inner.schema.field(field_id) else {
            return false;
        };
        field.is_visible(self.inner.state.lock().values.values())
    }

    /// Validate the current page and advance if nothing blocks.
    ///
    /// Returns whether the page changed. A successful advance arms the
    /// submit guard.
    #[instrument(skip(self))]
    pub async fn handle_next_page(&self) -> bool {
        let index = self.current_page();
        let Some(page) = self.inner.schema.pages().get(index) else {
            warn!(index, "Current page index is out of range");
            return false;
        };
        if self.is_last_page() {
            debug!("Already on the last page");
            return false;
        }

        let results = self.inner.validation.validate_page(&page.id).await;
        if let Some(field_id) = first_blocking(&results) {
            debug!(page = %page.id, field = %field_id, "Page has blocking failures; staying");
            return false;
        }

        let next = {
            let mut nav = self.inner.nav.lock();
            if nav.current_page != index {
                debug!("Page changed while validating; not advancing");
                return false;
            }
            nav.current_page = index + 1;
            nav.navigated_at = Some(Instant::now());
            nav.current_page
        };
        self.inner.notifier.emit(vec![Notice::PageChanged(next)]);
        true
    }

    /// Move back one page without validating
    pub fn handle_previous_page(&self) -> bool {
        let previous = {
            let mut nav = self.inner.nav.lock();
            if nav.current_page == 0 {
                return false;
            }
            nav.current_page -= 1;
            nav.current_page
        };
        self.inner.notifier.emit(vec![Notice::PageChanged(previous)]);
        true
    }

    /// Validate everything and hand the values to the submit handler.
    ///
    /// Submit is ignored right after a page transition and anywhere but
    /// the last page. Handler errors are logged and reported in the
    /// outcome, never returned.
    #[instrument(skip(self))]
    pub async fn handle_submit(&self) -> SubmitOutcome {
        {
            let nav = self.inner.nav.lock();
            let guard = self.inner.config.submit_guard();
            if nav.navigated_at.is_some_and(|at| at.elapsed() < guard) {
                debug!("Submit ignored right after navigation");
                return SubmitOutcome::Guarded;
            }
        }
        if !self.is_last_page() {
            debug!("Submit ignored before the last page");
            return SubmitOutcome::NotOnLastPage;
        }

        let mut failures: BTreeMap<FieldId, ValidationResult> = self
            .inner
            .validation
            .validate_all()
            .await
            .into_iter()
            .filter(|(_, r)| r.is_blocking_failure())
            .collect();
        for (field_id, result) in self.inner.validation.validate_cross_field() {
            if result.is_blocking_failure() {
                failures.entry(field_id).or_insert(result);
            }
        }
        if !failures.is_empty() {
            debug!(failures = failures.len(), "Submit blocked by validation");
            return SubmitOutcome::Blocked(failures);
        }

        let Some(handler) = self.inner.submit.clone() else {
            warn!("Form is valid but no submit handler is configured");
            return SubmitOutcome::NoHandler;
        };
        let values = self.values();
        match handler.submit(&values).await {
            Ok(()) => {
                info!(fields = values.len(), "Form submitted");
                SubmitOutcome::Submitted
            }
            Err(err) => {
                warn!(error = %err, "Submit handler failed");
                SubmitOutcome::HandlerFailed(err.to_string())
            }
        }
    }

    // Drafts and lifecycle

    /// Hand the current values and changes to the draft saver.
    ///
    /// On success the saved snapshot becomes the baseline for
    /// [`get_changes`](Self::get_changes). On failure nothing changes, so
    /// the next autosave retries.
    pub async fn save_draft(&self) -> bool {
        let Some(saver) = self.inner.save_draft.clone() else {
            warn!("save_draft called without a draft saver");
            return false;
        };
        let (values, changes) = {
            let state = self.inner.state.lock();
            (state.values.values().clone(), state.changes())
        };

        match saver.save_draft(&values, &changes).await {
            Ok(()) => {
                debug!(changes = changes.len(), "Draft saved");
                self.inner.state.lock().values.mark_saved(values);
                true
            }
            Err(err) => {
                warn!(error = %err, "Draft save failed; will retry");
                false
            }
        }
    }

    /// Spawn the autosave and expiry sweep tasks, then resume `resume_job`
    /// if one is given.
    ///
    /// Must be called from within a tokio runtime. Calling it twice is a
    /// no-op.
    pub async fn start(&self, resume_job: Option<JobId>) {
        self.spawn_background();
        if let Some(job_id) = resume_job {
            self.inner.jobs.resume_job(&job_id).await;
        }
    }

    fn spawn_background(&self) {
        let mut background = self.inner.background.lock();
        if background.shutdown.is_some() {
            warn!("Form engine already started");
            return;
        }
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let weak = Arc::downgrade(&self.inner);

        let auto_save = &self.inner.config.features.auto_save;
        if auto_save.enabled {
            if self.inner.save_draft.is_some() {
                background.tasks.push(spawn_periodic(
                    "autosave",
                    auto_save.interval(),
                    weak.clone(),
                    shutdown_rx.clone(),
                    |engine| async move {
                        if !engine.get_changes().is_empty() {
                            engine.save_draft().await;
                        }
                    },
                ));
            } else {
                warn!("Autosave is enabled but no draft saver is configured");
            }
        }

        background.tasks.push(spawn_periodic(
            "suggestion sweep",
            self.inner.config.suggestion_sweep_interval(),
            weak,
            shutdown_rx,
            |engine| async move {
                engine.clear_expired_suggestions();
            },
        ));

        background.shutdown = Some(shutdown_tx);
        info!(tasks = background.tasks.len(), "Form engine started");
    }

    /// Stop background tasks, job polling and pending debounce timers
    pub fn shutdown(&self) {
        {
            let mut background = self.inner.background.lock();
            if let Some(shutdown) = background.shutdown.take() {
                let _ = shutdown.send(true);
            }
            for task in background.tasks.drain(..) {
                task.abort();
            }
        }
        self.inner.jobs.shutdown();
        self.inner.validation.cancel_pending();
        info!("Form engine shut down");
    }
}

fn first_blocking(results: &BTreeMap<FieldId, ValidationResult>) -> Option<&FieldId> {
    results
        .iter()
        .find(|(_, r)| r.is_blocking_failure())
        .map(|(f, _)| f)
}

/// Run `tick` every `period` until shutdown is signalled or the engine is
/// dropped. The first run happens one period after spawning.
fn spawn_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    engine: Weak<EngineInner>,
    mut shutdown: watch::Receiver<bool>,
    tick: F,
) -> JoinHandle<()>
where
    F: Fn(FormEngine) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    let Some(inner) = engine.upgrade() else {
                        break;
                    };
                    tick(FormEngine { inner }).await;
                }
            }
        }
        debug!(task = name, "Background task stopped");
    })
}

impl std::fmt::Debug for FormEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormEngine")
            .field("pages", &self.inner.schema.pages().len())
            .field("current_page", &self.current_page())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldDefinition, FieldType, Page};
    use serde_json::json;

    fn two_pages() -> FormSchema {
        FormSchema::new(vec![
            Page::new("about").with_field(
                FieldDefinition::new("name", FieldType::Text).required(),
            ),
            Page::new("contact").with_field(FieldDefinition::new("email", FieldType::Email)),
        ])
    }

    fn engine(schema: FormSchema) -> FormEngine {
        FormEngine::new(schema, EngineConfig::default(), Collaborators::new(), Values::new())
            .unwrap()
    }

    #[test]
    fn test_rejects_unknown_initial_value() {
        let err = FormEngine::new(
            two_pages(),
            EngineConfig::default(),
            Collaborators::new(),
            Values::from([(FieldId::new("nope"), json!(1))]),
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::UnknownField(f) if f == "nope"));
    }

    #[test]
    fn test_defaults_seed_initial_values() {
        let schema = FormSchema::new(vec![Page::new("p").with_field(
            FieldDefinition::new("country", FieldType::Text).with_default(json!("NO")),
        )]);
        let engine = engine(schema);
        assert_eq!(engine.get_value(&FieldId::new("country")), Some(json!("NO")));
        assert!(!engine.is_dirty());
    }

    #[test]
    fn test_unknown_field_write_is_ignored() {
        let engine = engine(two_pages());
        assert!(!engine.set_value(&FieldId::new("ghost"), json!("x"), ValueSource::User));
        assert!(engine.history().is_empty());
    }

    #[test]
    fn test_undo_redo_restore_values() {
        let engine = engine(two_pages());
        let name = FieldId::new("name");
        engine.set_value(&name, json!("Ada"), ValueSource::User);
        engine.set_value(&name, json!("Grace"), ValueSource::User);

        assert!(engine.undo());
        assert_eq!(engine.get_value(&name), Some(json!("Ada")));
        assert_eq!(engine.history_index(), Some(0));

        assert!(engine.undo());
        assert_eq!(engine.get_value(&name), None);
        assert!(!engine.is_dirty());
        assert!(!engine.undo());

        assert!(engine.redo());
        assert_eq!(engine.get_value(&name), Some(json!("Ada")));
        assert!(engine.is_dirty());
        assert_eq!(engine.history().len(), 2);
    }

    #[test]
    fn test_reset_clears_everything() {
        let engine = engine(two_pages());
        let name = FieldId::new("name");
        engine.set_value(&name, json!("Ada"), ValueSource::User);
        engine.reset();
        assert_eq!(engine.get_value(&name), None);
        assert!(engine.history().is_empty());
        assert!(!engine.can_undo());
        assert!(engine.validations().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_next_page_blocks_on_required_field() {
        let engine = engine(two_pages());
        assert!(!engine.handle_next_page().await);
        assert_eq!(engine.current_page(), 0);

        engine.set_value(&FieldId::new("name"), json!("Ada"), ValueSource::User);
        assert!(engine.handle_next_page().await);
        assert_eq!(engine.current_page(), 1);
        assert!(engine.is_last_page());
        assert!(!engine.handle_next_page().await);

        assert!(engine.handle_previous_page());
        assert!(!engine.handle_previous_page());
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_guard_after_navigation() {
        let engine = engine(two_pages());
        assert_eq!(engine.handle_submit().await, SubmitOutcome::NotOnLastPage);

        engine.set_value(&FieldId::new("name"), json!("Ada"), ValueSource::User);
        assert!(engine.handle_next_page().await);
        assert_eq!(engine.handle_submit().await, SubmitOutcome::Guarded);

        tokio::time::advance(Duration::from_millis(301)).await;
        assert_eq!(engine.handle_submit().await, SubmitOutcome::NoHandler);
    }
}
