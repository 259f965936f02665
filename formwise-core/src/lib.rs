//! Formwise form interaction engine
//!
//! This crate keeps a form's values, validation results, suggestions and
//! undo history consistent while validators, suggestion providers and
//! background analysis jobs answer asynchronously.
//!
//! # Architecture
//!
//! All components share one [`FormState`](state::FormState) behind a
//! mutex and are composed by the [`FormEngine`] facade:
//!
//! ```text
//!              set_value
//!  caller ───────────────▶ ValueStore + HistoryLog
//!                               │
//!               ┌───────────────┴──────────────┐
//!               ▼                              ▼
//!        ValidationEngine               SuggestionEngine ◀── JobOrchestrator
//!   (sync rules, debounced and          (lifecycle state       (bulk suggest,
//!    cached async validators,            machine per field)     job polling)
//!    cross-field rules)
//! ```
//!
//! Everything that crosses the process boundary goes through the
//! collaborator traits in [`collaborators`]; all of them are optional.
//!
//! # Example
//!
//! ```rust,ignore
//! use formwise_core::{Collaborators, EngineConfig, FormEngine, FormSchema};
//! use formwise_types::{FieldId, ValueSource, Values};
//! use serde_json::json;
//!
//! let schema = FormSchema::from_file("signup.yaml")?;
//! let engine = FormEngine::new(schema, EngineConfig::default(), Collaborators::new(), Values::new())?;
//!
//! engine.set_value(&FieldId::new("email"), json!("a@b.com"), ValueSource::User);
//! let outcome = engine.handle_submit().await;
//! ```

pub mod collaborators;
pub mod config;
pub mod engine;
pub mod error;
pub mod history;
pub mod jobs;
pub mod schema;
pub mod state;
pub mod suggestion;
pub mod validation;
pub mod values;

pub use collaborators::{
    AsyncValidator, BulkSuggestProvider, Collaborators, DraftSaver, EngineObserver,
    JobCanceller, JobProgressSource, SubmitHandler, SuggestionProvider,
};
pub use config::{AutoSaveConfig, BackgroundJobConfig, EngineConfig, FeatureConfig};
pub use engine::{FormEngine, SubmitOutcome};
pub use error::{ConfigError, EngineError, Result, SchemaError};
pub use formwise_types::{FieldChange, FieldId, JobId, PageId, Value, ValueSource, Values};
pub use history::{FieldDelta, HistoryEntry, HistoryKind, HistoryLog};
pub use jobs::{
    BackgroundJob, BulkFile, BulkSuggestResponse, JobOrchestrator, JobStatus, JobTicket, JobUpdate,
};
pub use schema::{
    Condition, CrossFieldRule, FieldDefinition, FieldType, FormSchema, Page, SuggestConfig,
    ValidationRules,
};
pub use suggestion::{
    ActiveValue, SourceOrigin, SuggestionEngine, SuggestionResult, SuggestionSource,
    SuggestionState, SuggestionStatus,
};
pub use validation::{
    CacheStats, PartialResult, Severity, ValidationEngine, ValidationOutcome, ValidationResult,
};
pub use values::{EditMetadata, ValueStore};
