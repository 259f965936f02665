//! Caller-supplied collaborators.
//!
//! The engine never fetches, stores or renders anything itself. Everything
//! that crosses the process boundary goes through one of these traits, and
//! every collaborator is optional: a missing one turns the corresponding
//! operation into a logged no-op.

use async_trait::async_trait;
use formwise_types::{FieldChange, FieldId, JobId, Value, Values};
use std::fmt;
use std::sync::Arc;

use crate::history::HistoryEntry;
use crate::jobs::{BackgroundJob, BulkFile, BulkSuggestResponse};
use crate::schema::FormSchema;
use crate::suggestion::SuggestionResult;
use crate::validation::ValidationOutcome;

/// Remote or otherwise slow per-field validation
#[async_trait]
pub trait AsyncValidator: Send + Sync {
    async fn validate(
        &self,
        field_id: &FieldId,
        value: &Value,
        values: &Values,
    ) -> anyhow::Result<ValidationOutcome>;
}

/// Produces a suggestion for one field
#[async_trait]
pub trait SuggestionProvider: Send + Sync {
    async fn suggest(
        &self,
        field_id: &FieldId,
        current_value: &Value,
        values: &Values,
    ) -> anyhow::Result<SuggestionResult>;
}

/// Analyzes uploaded files and either answers immediately or starts a job
#[async_trait]
pub trait BulkSuggestProvider: Send + Sync {
    async fn bulk_suggest(
        &self,
        files: &[BulkFile],
        schema: &FormSchema,
        values: &Values,
    ) -> anyhow::Result<BulkSuggestResponse>;
}

/// Reports the progress of a background job
#[async_trait]
pub trait JobProgressSource: Send + Sync {
    async fn progress(&self, job_id: &JobId) -> anyhow::Result<BackgroundJob>;
}

/// Cancels a background job on the remote side
#[async_trait]
pub trait JobCanceller: Send + Sync {
    async fn cancel(&self, job_id: &JobId) -> anyhow::Result<()>;
}

/// Persists draft values
#[async_trait]
pub trait DraftSaver: Send + Sync {
    async fn save_draft(&self, values: &Values, changes: &[FieldChange]) -> anyhow::Result<()>;
}

/// Receives the final values on submit
#[async_trait]
pub trait SubmitHandler: Send + Sync {
    async fn submit(&self, values: &Values) -> anyhow::Result<()>;
}

/// Observation hooks. All methods default to doing nothing.
pub trait EngineObserver: Send + Sync {
    fn on_dirty_state_change(&self, _is_dirty: bool, _dirty_fields: &[FieldId]) {}

    fn on_undo(&self, _entry: &HistoryEntry) {}

    fn on_redo(&self, _entry: &HistoryEntry) {}

    /// A page transition landed; the rendering layer scrolls to top here
    fn on_page_change(&self, _page_index: usize) {}
}

/// The full set of collaborators handed to an engine
#[derive(Clone, Default)]
pub struct Collaborators {
    pub suggest: Option<Arc<dyn SuggestionProvider>>,
    pub bulk_suggest: Option<Arc<dyn BulkSuggestProvider>>,
    pub job_progress: Option<Arc<dyn JobProgressSource>>,
    pub job_cancel: Option<Arc<dyn JobCanceller>>,
    pub save_draft: Option<Arc<dyn DraftSaver>>,
    pub submit: Option<Arc<dyn SubmitHandler>>,
    pub observer: Option<Arc<dyn EngineObserver>>,
}

impl Collaborators {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_suggest(mut self, provider: impl SuggestionProvider + 'static) -> Self {
        self.suggest = Some(Arc::new(provider));
        self
    }

    pub fn with_bulk_suggest(mut self, provider: impl BulkSuggestProvider + 'static) -> Self {
        self.bulk_suggest = Some(Arc::new(provider));
        self
    }

    pub fn with_job_progress(mut self, source: impl JobProgressSource + 'static) -> Self {
        self.job_progress = Some(Arc::new(source));
        self
    }

    pub fn with_job_cancel(mut self, canceller: impl JobCanceller + 'static) -> Self {
        self.job_cancel = Some(Arc::new(canceller));
        self
    }

    pub fn with_save_draft(mut self, saver: impl DraftSaver + 'static) -> Self {
        self.save_draft = Some(Arc::new(saver));
        self
    }

    pub fn with_submit(mut self, handler: impl SubmitHandler + 'static) -> Self {
        self.submit = Some(Arc::new(handler));
        self
    }

    pub fn with_observer(mut self, observer: impl EngineObserver + 'static) -> Self {
        self.observer = Some(Arc::new(observer));
        self
    }
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators")
            .field("suggest", &self.suggest.is_some())
            .field("bulk_suggest", &self.bulk_suggest.is_some())
            .field("job_progress", &self.job_progress.is_some())
            .field("job_cancel", &self.job_cancel.is_some())
            .field("save_draft", &self.save_draft.is_some())
            .field("submit", &self.submit.is_some())
            .field("observer", &self.observer.is_some())
            .finish()
    }
}
