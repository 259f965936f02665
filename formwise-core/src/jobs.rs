//! Background suggestion jobs
//!
//! A bulk suggestion request either answers immediately or hands back a job
//! ticket. For a job, the affected fields go to `expecting` and a poller
//! asks the progress source for updates on a fixed interval until the job
//! reaches a terminal status, is cancelled, or the engine shuts down.
//!
//! Each poll applies, in order: unseen incremental updates, completed fields
//! that have a partial result, and on a terminal status the settlement of
//! every field still pending.

use chrono::{DateTime, Utc};
use formwise_types::{FieldId, JobId, Value};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use crate::collaborators::{BulkSuggestProvider, JobCanceller, JobProgressSource};
use crate::config::BackgroundJobConfig;
use crate::schema::FormSchema;
use crate::state::SharedState;
use crate::suggestion::{SuggestionEngine, SuggestionResult, SuggestionSource};

/// Lifecycle status of a background job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    /// Some fields are done and more may follow
    Partial,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled)
    }
}

/// One incremental field result reported by a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobUpdate {
    pub field_id: FieldId,
    pub value: Value,
    #[serde(default)]
    pub confidence: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

/// Identity of an update, used to apply each one once
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct UpdateKey {
    job_id: JobId,
    field_id: FieldId,
    timestamp: DateTime<Utc>,
}

/// Snapshot of a job as reported by the progress source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackgroundJob {
    pub job_id: JobId,
    pub status: JobStatus,
    /// 0.0 to 1.0
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub partial_results: BTreeMap<FieldId, Value>,
    #[serde(default)]
    pub fields_completed: Vec<FieldId>,
    #[serde(default)]
    pub fields_pending: Vec<FieldId>,
    #[serde(default)]
    pub new_updates: Vec<JobUpdate>,
    #[serde(default)]
    pub errors: BTreeMap<FieldId, String>,
    pub started_at: DateTime<Utc>,
    /// Seconds
    #[serde(default)]
    pub estimated_time_remaining: Option<u64>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl BackgroundJob {
    /// A freshly queued job waiting on `fields`
    pub fn queued(job_id: JobId, fields: Vec<FieldId>) -> Self {
        Self {
            job_id,
            status: JobStatus::Queued,
            progress: 0.0,
            partial_results: BTreeMap::new(),
            fields_completed: Vec::new(),
            fields_pending: fields,
            new_updates: Vec::new(),
            errors: BTreeMap::new(),
            started_at: Utc::now(),
            estimated_time_remaining: None,
            completed_at: None,
        }
    }
}

/// A file handed to the bulk suggestion provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkFile {
    pub name: String,
    #[serde(default)]
    pub media_type: Option<String>,
    #[serde(default)]
    pub data: Vec<u8>,
}

impl BulkFile {
    pub fn new(name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            media_type: None,
            data,
        }
    }
}

/// Handle returned when a bulk request became a background job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobTicket {
    pub job_id: JobId,
    pub affected_fields: Vec<FieldId>,
    /// Seconds
    #[serde(default)]
    pub estimated_duration: Option<u64>,
    #[serde(default)]
    pub estimated_field_count: Option<usize>,
}

/// What a bulk suggestion request returns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BulkSuggestResponse {
    Immediate {
        suggestions: BTreeMap<FieldId, SuggestionResult>,
    },
    Job(JobTicket),
}

#[derive(Debug, Default)]
struct JobState {
    active: Option<BackgroundJob>,
    blocking: bool,
    processed: HashSet<UpdateKey>,
    poller: Option<JoinHandle<()>>,
    /// Bumped whenever polling starts or stops, so a poll that was already
    /// in flight can tell its results are no longer wanted
    generation: u64,
}

impl JobState {
    fn stop(&mut self) {
        self.generation += 1;
        if let Some(poller) = self.poller.take() {
            poller.abort();
        }
        self.blocking = false;
        self.processed.clear();
    }
}

struct Inner {
    schema: Arc<FormSchema>,
    state: SharedState,
    suggestions: SuggestionEngine,
    bulk: Option<Arc<dyn BulkSuggestProvider>>,
    progress: Option<Arc<dyn JobProgressSource>>,
    canceller: Option<Arc<dyn JobCanceller>>,
    blocking: bool,
    poll_interval: Duration,
    job: Mutex<JobState>,
}

/// Starts, polls, cancels and resumes background suggestion jobs
#[derive(Clone)]
pub struct JobOrchestrator {
    inner: Arc<Inner>,
}

impl JobOrchestrator {
    pub fn new(
        schema: Arc<FormSchema>,
        state: SharedState,
        suggestions: SuggestionEngine,
        config: &BackgroundJobConfig,
        bulk: Option<Arc<dyn BulkSuggestProvider>>,
        progress: Option<Arc<dyn JobProgressSource>>,
        canceller: Option<Arc<dyn JobCanceller>>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                schema,
                state,
                suggestions,
                bulk,
                progress,
                canceller,
                blocking: config.blocking,
                poll_interval: config.poll_interval(),
                job: Mutex::new(JobState::default()),
            }),
        }
    }

    /// Whether a running job is holding the form
    pub fn is_blocking(&self) -> bool {
        self.inner.job.lock().blocking
    }

    pub fn active_job(&self) -> Option<BackgroundJob> {
        self.inner.job.lock().active.clone()
    }

    /// Whether a poller is currently scheduled
    pub fn is_polling(&self) -> bool {
        self.inner.job.lock().poller.is_some()
    }

    /// Send files to the bulk provider.
    ///
    /// Immediate answers are installed as available suggestions. A job
    /// ticket marks its fields `expecting` before this returns and starts
    /// polling; its id is returned.
    #[instrument(skip(self, files), fields(files = files.len()))]
    pub async fn start_bulk_suggest(&self, files: Vec<BulkFile>) -> Option<JobId> {
        let Some(bulk) = self.inner.bulk.clone() else {
            warn!("start_bulk_suggest called without a bulk suggestion provider");
            return None;
        };
        let values = self.inner.state.lock().values.values().clone();

        let response = match bulk.bulk_suggest(&files, &self.inner.schema, &values).await {
            Ok(response) => response,
            Err(err) => {
                warn!(error = %err, "Bulk suggestion request failed");
                return None;
            }
        };

        match response {
            BulkSuggestResponse::Immediate { suggestions } => {
                debug!(count = suggestions.len(), "Bulk suggestions returned immediately");
                for (field_id, result) in suggestions {
                    let source = SuggestionSource::bulk(result.source.clone());
                    self.inner.suggestions.apply(&field_id, result, source);
                }
                None
            }
            BulkSuggestResponse::Job(ticket) => {
                info!(
                    job = %ticket.job_id,
                    fields = ticket.affected_fields.len(),
                    estimated_secs = ?ticket.estimated_duration,
                    "Background job started"
                );
                self.inner
                    .suggestions
                    .mark_expecting(&ticket.affected_fields, &ticket.job_id);
                {
                    let mut job = self.inner.job.lock();
                    job.active = Some(BackgroundJob::queued(
                        ticket.job_id.clone(),
                        ticket.affected_fields.clone(),
                    ));
                    job.processed.clear();
                    job.blocking = self.inner.blocking;
                }
                self.start_polling(ticket.job_id.clone());
                Some(ticket.job_id)
            }
        }
    }

    /// Poll `job_id` on the configured interval, replacing any running poller.
    /// The first poll happens immediately.
    pub fn start_polling(&self, job_id: JobId) {
        if self.inner.progress.is_none() {
            warn!(job = %job_id, "Cannot poll without a job progress source");
            return;
        }

        let mut job = self.inner.job.lock();
        job.generation += 1;
        if let Some(poller) = job.poller.take() {
            poller.abort();
        }
        let generation = job.generation;
        let orchestrator = self.clone();
        let period = self.inner.poll_interval;

        job.poller = Some(tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if !orchestrator.poll_once(&job_id, generation).await {
                    break;
                }
            }
        }));
    }

    /// Stop the poller without touching job or suggestion state
    pub fn stop_polling(&self) {
        let mut job = self.inner.job.lock();
        job.generation += 1;
        if let Some(poller) = job.poller.take() {
            poller.abort();
        }
    }

    /// Cancel the job remotely and locally.
    ///
    /// A failing cancel collaborator is logged and the local cancellation
    /// still happens.
    #[instrument(skip(self), fields(job = %job_id))]
    pub async fn cancel_job(&self, job_id: &JobId) -> bool {
        let Some(canceller) = self.inner.canceller.clone() else {
            warn!("cancel_job called without a job canceller");
            return false;
        };
        if let Err(err) = canceller.cancel(job_id).await {
            warn!(error = %err, "Remote job cancellation failed; cancelling locally");
        }

        {
            let mut job = self.inner.job.lock();
            if let Some(active) = job.active.as_mut().filter(|a| &a.job_id == job_id) {
                active.status = JobStatus::Cancelled;
            }
            job.stop();
        }
        let reverted = self.inner.suggestions.revert_in_flight();
        info!(reverted = reverted.len(), "Background job cancelled");
        true
    }

    /// Pick up a job that was started before a reload.
    ///
    /// Only queued, processing or partial jobs resume; returns whether
    /// polling started.
    #[instrument(skip(self), fields(job = %job_id))]
    pub async fn resume_job(&self, job_id: &JobId) -> bool {
        let Some(progress) = self.inner.progress.clone() else {
            warn!("resume_job called without a job progress source");
            return false;
        };
        let snapshot = match progress.progress(job_id).await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(error = %err, "Could not fetch job to resume");
                return false;
            }
        };
        if snapshot.status.is_terminal() {
            info!(status = ?snapshot.status, "Job already finished; not resuming");
            return false;
        }

        self.inner
            .suggestions
            .mark_expecting(&snapshot.fields_pending, job_id);
        {
            let mut job = self.inner.job.lock();
            job.active = Some(snapshot);
            job.processed.clear();
            job.blocking = self.inner.blocking;
        }
        info!("Resuming background job");
        self.start_polling(job_id.clone());
        true
    }

    /// Stop polling and drop the blocking flag
    pub fn shutdown(&self) {
        self.inner.job.lock().stop();
    }

    /// One poll. Returns whether polling should continue.
    async fn poll_once(&self, job_id: &JobId, generation: u64) -> bool {
        let Some(progress) = self.inner.progress.clone() else {
            return false;
        };
        let snapshot = match progress.progress(job_id).await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(job = %job_id, error = %err, "Job progress poll failed; stopping");
                let mut job = self.inner.job.lock();
                if job.generation == generation {
                    job.poller = None;
                    job.blocking = false;
                }
                return false;
            }
        };

        let terminal = snapshot.status.is_terminal();
        let fresh_updates = {
            let mut job = self.inner.job.lock();
            if job.generation != generation {
                debug!(job = %job_id, "Dropping poll result for a superseded poller");
                return false;
            }
            let fresh: Vec<JobUpdate> = snapshot
                .new_updates
                .iter()
                .filter(|update| {
                    job.processed.insert(UpdateKey {
                        job_id: job_id.clone(),
                        field_id: update.field_id.clone(),
                        timestamp: update.timestamp,
                    })
                })
                .cloned()
                .collect();
            job.active = Some(snapshot.clone());
            if terminal {
                job.poller = None;
                job.blocking = false;
                job.processed.clear();
            }
            fresh
        };

        for update in fresh_updates {
            let mut result = SuggestionResult::new(update.value);
            result.confidence = update.confidence;
            self.inner
                .suggestions
                .apply(&update.field_id, result, SuggestionSource::job(job_id));
        }

        for field_id in &snapshot.fields_completed {
            if let Some(value) = snapshot.partial_results.get(field_id) {
                self.inner
                    .suggestions
                    .promote_expecting(field_id, value.clone(), job_id);
            }
        }

        if terminal {
            let job_error = (snapshot.status == JobStatus::Failed).then(|| "Job failed".to_string());
            for field_id in &snapshot.fields_pending {
                let partial = match snapshot.status {
                    JobStatus::Failed => None,
                    _ => snapshot.partial_results.get(field_id).cloned(),
                };
                let error = snapshot.errors.get(field_id).cloned().or_else(|| job_error.clone());
                self.inner
                    .suggestions
                    .settle_expecting(field_id, partial, error, job_id);
            }
            info!(
                job = %job_id,
                status = ?snapshot.status,
                completed = snapshot.fields_completed.len(),
                "Background job finished"
            );
            return false;
        }

        debug!(job = %job_id, progress = snapshot.progress, "Job progress");
        true
    }
}

impl std::fmt::Debug for JobOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let job = self.inner.job.lock();
        f.debug_struct("JobOrchestrator")
            .field("active", &job.active.as_ref().map(|j| &j.job_id))
            .field("blocking", &job.blocking)
            .field("polling", &job.poller.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldDefinition, FieldType, Page};
    use crate::state::{FormState, Notifier};
    use crate::suggestion::SuggestionStatus;
    use async_trait::async_trait;
    use formwise_types::Values;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Replays scripted snapshots; the last one repeats forever
    #[derive(Clone)]
    struct Script {
        snapshots: Arc<Mutex<VecDeque<BackgroundJob>>>,
        calls: Arc<AtomicUsize>,
    }

    impl Script {
        fn new(snapshots: Vec<BackgroundJob>) -> Self {
            Self {
                snapshots: Arc::new(Mutex::new(snapshots.into())),
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl JobProgressSource for Script {
        async fn progress(&self, _job_id: &JobId) -> anyhow::Result<BackgroundJob> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut snapshots = self.snapshots.lock();
            let next = if snapshots.len() > 1 {
                snapshots.pop_front()
            } else {
                snapshots.front().cloned()
            };
            next.ok_or_else(|| anyhow::anyhow!("no snapshot scripted"))
        }
    }

    struct Ticket(Vec<&'static str>);

    #[async_trait]
    impl BulkSuggestProvider for Ticket {
        async fn bulk_suggest(
            &self,
            _files: &[BulkFile],
            _schema: &FormSchema,
            _values: &Values,
        ) -> anyhow::Result<BulkSuggestResponse> {
            Ok(BulkSuggestResponse::Job(JobTicket {
                job_id: JobId::new("job-1"),
                affected_fields: self.0.iter().map(|f| FieldId::new(*f)).collect(),
                estimated_duration: Some(20),
                estimated_field_count: None,
            }))
        }
    }

    struct FlakyCanceller;

    #[async_trait]
    impl JobCanceller for FlakyCanceller {
        async fn cancel(&self, _job_id: &JobId) -> anyhow::Result<()> {
            anyhow::bail!("connection reset")
        }
    }

    fn snapshot(status: JobStatus) -> BackgroundJob {
        let mut job = BackgroundJob::queued(JobId::new("job-1"), vec![FieldId::new("name"), FieldId::new("title")]);
        job.status = status;
        job
    }

    fn orchestrator(script: &Script, blocking: bool) -> (JobOrchestrator, SuggestionEngine) {
        let schema = Arc::new(FormSchema::new(vec![Page::new("main")
            .with_field(FieldDefinition::new("name", FieldType::Text))
            .with_field(FieldDefinition::new("title", FieldType::Text))]));
        let state = FormState::new(Values::new(), 50).shared();
        let suggestions = SuggestionEngine::new(schema.clone(), state.clone(), None, Notifier::default());
        let config = BackgroundJobConfig {
            blocking,
            poll_interval_ms: 2_000,
        };
        let orchestrator = JobOrchestrator::new(
            schema,
            state,
            suggestions.clone(),
            &config,
            Some(Arc::new(Ticket(vec!["name", "title"]))),
            Some(Arc::new(script.clone())),
            Some(Arc::new(FlakyCanceller)),
        );
        (orchestrator, suggestions)
    }

    #[tokio::test(start_paused = true)]
    async fn test_incremental_updates_apply_once() {
        let update = JobUpdate {
            field_id: FieldId::new("name"),
            value: json!("Jane"),
            confidence: Some(0.9),
            timestamp: Utc::now(),
        };
        let mut first = snapshot(JobStatus::Processing);
        first.new_updates = vec![update.clone()];
        let mut second = snapshot(JobStatus::Partial);
        second.new_updates = vec![update];

        let script = Script::new(vec![first, second]);
        let (orchestrator, suggestions) = orchestrator(&script, true);
        let name = FieldId::new("name");

        let job_id = orchestrator.start_bulk_suggest(Vec::new()).await.unwrap();
        assert_eq!(job_id.as_str(), "job-1");
        assert_eq!(suggestions.status(&name), SuggestionStatus::Expecting);
        assert!(orchestrator.is_blocking());

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(suggestions.status(&name), SuggestionStatus::Available);
        assert!(suggestions.mark_as_reviewed(&name));

        // the same update arrives again and must not reset the reviewed state
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(script.calls(), 2);
        assert_eq!(suggestions.status(&name), SuggestionStatus::Reviewing);
        assert!(orchestrator.is_polling());
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_status_settles_pending_fields() {
        let mut done = snapshot(JobStatus::Completed);
        done.fields_completed = vec![FieldId::new("name")];
        done.fields_pending = vec![FieldId::new("title")];
        done.partial_results.insert(FieldId::new("name"), json!("Jane"));

        let script = Script::new(vec![done]);
        let (orchestrator, suggestions) = orchestrator(&script, true);

        orchestrator.start_bulk_suggest(Vec::new()).await;
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(script.calls(), 1);
        assert!(!orchestrator.is_blocking());
        assert!(!orchestrator.is_polling());
        assert_eq!(suggestions.status(&FieldId::new("name")), SuggestionStatus::Available);
        assert_eq!(suggestions.status(&FieldId::new("title")), SuggestionStatus::None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_job_attaches_errors() {
        let mut failed = snapshot(JobStatus::Failed);
        failed.errors.insert(FieldId::new("title"), "OCR failed".into());

        let script = Script::new(vec![failed]);
        let (orchestrator, suggestions) = orchestrator(&script, false);

        orchestrator.start_bulk_suggest(Vec::new()).await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        let title = suggestions.suggestion(&FieldId::new("title")).unwrap();
        assert_eq!(title.status, SuggestionStatus::None);
        assert_eq!(title.error.as_deref(), Some("OCR failed"));
        let name = suggestions.suggestion(&FieldId::new("name")).unwrap();
        assert_eq!(name.error.as_deref(), Some("Job failed"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_reverts_even_when_remote_cancel_fails() {
        let script = Script::new(vec![snapshot(JobStatus::Processing)]);
        let (orchestrator, suggestions) = orchestrator(&script, true);

        let job_id = orchestrator.start_bulk_suggest(Vec::new()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(orchestrator.cancel_job(&job_id).await);

        assert!(!orchestrator.is_blocking());
        assert!(!orchestrator.is_polling());
        assert_eq!(orchestrator.active_job().unwrap().status, JobStatus::Cancelled);
        assert_eq!(suggestions.status(&FieldId::new("name")), SuggestionStatus::None);

        let calls = script.calls();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(script.calls(), calls);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_only_running_jobs() {
        let script = Script::new(vec![snapshot(JobStatus::Completed)]);
        let (finished, _) = orchestrator(&script, false);
        assert!(!finished.resume_job(&JobId::new("job-1")).await);
        assert!(!finished.is_polling());

        let script = Script::new(vec![snapshot(JobStatus::Processing)]);
        let (running, suggestions) = orchestrator(&script, false);
        assert!(running.resume_job(&JobId::new("job-1")).await);
        assert!(running.is_polling());
        assert_eq!(suggestions.status(&FieldId::new("title")), SuggestionStatus::Expecting);
        running.shutdown();
        assert!(!running.is_polling());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(!JobStatus::Partial.is_terminal());
        assert!(!JobStatus::Queued.is_terminal());
    }

    #[test]
    fn test_bulk_response_shape() {
        let response: BulkSuggestResponse = serde_json::from_value(json!({
            "job": {
                "jobId": "job-9",
                "affectedFields": ["name"],
                "estimatedDuration": 30
            }
        }))
        .unwrap();
        assert!(matches!(response, BulkSuggestResponse::Job(ticket) if ticket.job_id.as_str() == "job-9"));
    }

    #[test]
    fn test_immediate_response_reads_suggested_value() {
        let response: BulkSuggestResponse = serde_json::from_value(json!({
            "immediate": {
                "suggestions": { "name": { "suggestedValue": "Jane", "confidence": 0.95 } }
            }
        }))
        .unwrap();
        let BulkSuggestResponse::Immediate { suggestions } = response else {
            panic!("expected an immediate response");
        };
        let name = &suggestions[&FieldId::new("name")];
        assert_eq!(name.suggested_value, json!("Jane"));
        assert_eq!(name.confidence, Some(0.95));
    }
}
