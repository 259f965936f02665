//! Validation engine
//!
//! Per-field validation runs the synchronous checks in [`rules`] first and
//! only calls the field's async validator when all of them pass. Empty
//! values are sent to the validator too. Async results are cached per `(field, value)` for the
//! field's TTL, and concurrent calls for the same key share one in-flight
//! request.
//!
//! Results are written to the shared validation map only if the field has
//! not been edited since the validation started.

mod cache;
mod result;
pub mod rules;

pub use cache::{CacheKey, CacheStats, ValidationCache};
pub use result::{PartialResult, Severity, ValidationOutcome, ValidationResult};

use formwise_types::{FieldId, PageId, Value, Values};
use futures::future::{join_all, BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

use crate::collaborators::AsyncValidator;
use crate::schema::{FieldDefinition, FormSchema};
use crate::state::SharedState;

type PendingResult = Shared<BoxFuture<'static, ValidationResult>>;
type InFlight = Mutex<HashMap<CacheKey, PendingResult>>;

/// True if any result should stop page advancement or submission
pub fn has_blocking_failure<'a>(results: impl IntoIterator<Item = &'a ValidationResult>) -> bool {
    results.into_iter().any(ValidationResult::is_blocking_failure)
}

#[derive(Default)]
struct DebounceSlot {
    generation: u64,
    timer: Option<JoinHandle<()>>,
    waiters: Vec<oneshot::Sender<ValidationResult>>,
}

struct Inner {
    schema: Arc<FormSchema>,
    state: SharedState,
    patterns: HashMap<FieldId, Regex>,
    cache: Arc<ValidationCache>,
    in_flight: Arc<InFlight>,
    debounce: Mutex<HashMap<FieldId, DebounceSlot>>,
}

/// Runs field, page and cross-field validation against shared form state
#[derive(Clone)]
pub struct ValidationEngine {
    inner: Arc<Inner>,
}

impl ValidationEngine {
    pub fn new(schema: Arc<FormSchema>, state: SharedState) -> Self {
        let mut patterns = HashMap::new();
        for field in schema.fields() {
            let Some(pattern) = field.validation.as_ref().and_then(|r| r.pattern.as_ref()) else {
                continue;
            };
            match Regex::new(pattern) {
                Ok(regex) => {
                    patterns.insert(field.id.clone(), regex);
                }
                Err(err) => {
                    warn!(field = %field.id, error = %err, "Ignoring invalid validation pattern");
                }
            }
        }

        Self {
            inner: Arc::new(Inner {
                schema,
                state,
                patterns,
                cache: Arc::new(ValidationCache::new()),
                in_flight: Arc::new(Mutex::new(HashMap::new())),
                debounce: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Validate one field now and record the result.
    #[instrument(skip(self), fields(field = %field_id))]
    pub async fn validate_field(&self, field_id: &FieldId) -> ValidationResult {
        let Some(field) = self.inner.schema.field(field_id) else {
            warn!("validate_field called for unknown field");
            return ValidationResult::valid();
        };

        let (value, values, version) = {
            let state = self.inner.state.lock();
            (
                state.values.get(field_id).cloned().unwrap_or(Value::Null),
                state.values.values().clone(),
                state.values.version(field_id),
            )
        };

        let result = self.evaluate(field, &value, &values).await;
        self.record(field_id, version, &result);
        result
    }

    /// Validate after the field's debounce delay has passed without another
    /// call. Every caller coalesced into one run receives that run's result.
    pub async fn validate_field_debounced(&self, field_id: &FieldId) -> ValidationResult {
        let Some(field) = self.inner.schema.field(field_id) else {
            warn!(field = %field_id, "validate_field_debounced called for unknown field");
            return ValidationResult::valid();
        };
        let delay = field
            .validation
            .as_ref()
            .map(|r| r.debounce())
            .unwrap_or(Duration::from_millis(crate::schema::DEFAULT_DEBOUNCE_MS));

        let (tx, rx) = oneshot::channel();
        {
            let mut slots = self.inner.debounce.lock();
            let slot = slots.entry(field_id.clone()).or_default();
            slot.generation += 1;
            if let Some(timer) = slot.timer.take() {
                timer.abort();
            }
            slot.waiters.push(tx);

            let generation = slot.generation;
            let engine = self.clone();
            let field_id = field_id.clone();
            slot.timer = Some(tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let waiters = {
                    let mut slots = engine.inner.debounce.lock();
                    match slots.get_mut(&field_id) {
                        Some(slot) if slot.generation == generation => {
                            slot.timer = None;
                            std::mem::take(&mut slot.waiters)
                        }
                        _ => return,
                    }
                };
                let result = engine.validate_field(&field_id).await;
                for waiter in waiters {
                    let _ = waiter.send(result.clone());
                }
            }));
        }

        match rx.await {
            Ok(result) => result,
            Err(_) => {
                debug!(field = %field_id, "Debounced validation cancelled");
                ValidationResult::valid()
            }
        }
    }

    /// Re-validate every field that lists `field_id` in `dependsOn`
    pub async fn validate_dependent_fields(
        &self,
        field_id: &FieldId,
    ) -> BTreeMap<FieldId, ValidationResult> {
        let dependents = self.inner.schema.dependents_of(field_id);
        self.validate_many(dependents).await
    }

    /// Validate every visible field on a page
    #[instrument(skip(self), fields(page = %page_id))]
    pub async fn validate_page(&self, page_id: &PageId) -> BTreeMap<FieldId, ValidationResult> {
        let Some(page) = self.inner.schema.page(page_id) else {
            warn!("validate_page called for unknown page");
            return BTreeMap::new();
        };
        let values = self.inner.state.lock().values.values().clone();
        let fields = page
            .fields
            .iter()
            .filter(|f| f.is_visible(&values))
            .map(|f| f.id.clone())
            .collect();
        self.validate_many(fields).await
    }

    /// Validate every visible field in the form
    pub async fn validate_all(&self) -> BTreeMap<FieldId, ValidationResult> {
        let values = self.inner.state.lock().values.values().clone();
        let fields = self
            .inner
            .schema
            .fields()
            .filter(|f| f.is_visible(&values))
            .map(|f| f.id.clone())
            .collect();
        self.validate_many(fields).await
    }

    /// Run the schema's cross-field rules.
    ///
    /// A failing rule's result is attached to every field it names. Only
    /// failures are returned.
    pub fn validate_cross_field(&self) -> BTreeMap<FieldId, ValidationResult> {
        let values = self.inner.state.lock().values.values().clone();

        let mut failures = BTreeMap::new();
        for rule in self.inner.schema.cross_field_rules() {
            let result = rule.evaluate(&values).normalize();
            if result.valid {
                continue;
            }
            debug!(rule = %rule.id, message = ?result.message, "Cross-field rule failed");
            for field_id in &rule.fields {
                failures.entry(field_id.clone()).or_insert_with(|| result.clone());
            }
        }

        let mut state = self.inner.state.lock();
        for (field_id, result) in &failures {
            state.validations.insert(field_id.clone(), result.clone());
        }
        failures
    }

    /// Drop cached async results for a field. Returns how many were removed.
    pub fn clear_cache_for_field(&self, field_id: &FieldId) -> usize {
        self.inner.cache.remove_field(field_id)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.inner.cache.stats()
    }

    /// Last recorded result for a field
    pub fn validation(&self, field_id: &FieldId) -> Option<ValidationResult> {
        self.inner.state.lock().validations.get(field_id).cloned()
    }

    pub fn validations(&self) -> BTreeMap<FieldId, ValidationResult> {
        self.inner
            .state
            .lock()
            .validations
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Cancel every pending debounce timer. Waiting callers receive a
    /// passing result.
    pub fn cancel_pending(&self) {
        let mut slots = self.inner.debounce.lock();
        for (_, slot) in slots.drain() {
            if let Some(timer) = slot.timer {
                timer.abort();
            }
        }
    }

    async fn validate_many(&self, fields: Vec<FieldId>) -> BTreeMap<FieldId, ValidationResult> {
        let runs = fields.into_iter().map(|field_id| async move {
            let result = self.validate_field(&field_id).await;
            (field_id, result)
        });
        join_all(runs).await.into_iter().collect()
    }

    async fn evaluate(
        &self,
        field: &FieldDefinition,
        value: &Value,
        values: &Values,
    ) -> ValidationResult {
        let pattern = self.inner.patterns.get(&field.id);
        if let Some(failure) = rules::check_field(field, pattern, value, values) {
            return failure;
        }

        let Some(rules) = field.validation.as_ref() else {
            return ValidationResult::valid();
        };
        match &rules.validate_async {
            Some(validator) => {
                let cache = rules
                    .caches_results()
                    .then(|| (self.inner.cache.clone(), rules.cache_ttl()));
                self.run_async(&field.id, validator.0.clone(), cache, value, values)
                    .await
            }
            None => ValidationResult::valid(),
        }
    }

    async fn run_async(
        &self,
        field_id: &FieldId,
        validator: Arc<dyn AsyncValidator>,
        cache: Option<(Arc<ValidationCache>, Duration)>,
        value: &Value,
        values: &Values,
    ) -> ValidationResult {
        let key = CacheKey::new(field_id, value);

        if cache.is_some() {
            if let Some(hit) = self.inner.cache.get(&key) {
                debug!(field = %field_id, "Async validation cache hit");
                return hit;
            }
        }

        let pending = {
            let mut in_flight = self.inner.in_flight.lock();
            match in_flight.get(&key) {
                Some(pending) => pending.clone(),
                None => {
                    let pending = call_validator(
                        validator,
                        key.clone(),
                        value.clone(),
                        values.clone(),
                        cache,
                        Arc::downgrade(&self.inner.in_flight),
                    )
                    .boxed()
                    .shared();
                    in_flight.insert(key, pending.clone());
                    pending
                }
            }
        };

        pending.await
    }

    fn record(&self, field_id: &FieldId, version: u64, result: &ValidationResult) {
        let mut state = self.inner.state.lock();
        if state.values.version(field_id) != version {
            debug!(field = %field_id, "Discarding stale validation result");
            return;
        }
        state.validations.insert(field_id.clone(), result.clone());
    }
}

impl std::fmt::Debug for ValidationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidationEngine")
            .field("patterns", &self.inner.patterns.len())
            .field("cache", &self.inner.cache.stats())
            .finish_non_exhaustive()
    }
}

/// One shared call to an async validator. Writes the cache on success and
/// removes its own in-flight entry when done.
async fn call_validator(
    validator: Arc<dyn AsyncValidator>,
    key: CacheKey,
    value: Value,
    values: Values,
    cache: Option<(Arc<ValidationCache>, Duration)>,
    in_flight: Weak<InFlight>,
) -> ValidationResult {
    let result = match validator.validate(&key.field_id, &value, &values).await {
        Ok(outcome) => {
            let result = outcome.normalize();
            if let Some((cache, ttl)) = &cache {
                cache.insert(key.clone(), result.clone(), *ttl);
            }
            result
        }
        Err(err) => {
            warn!(field = %key.field_id, error = %err, "Async validator failed");
            ValidationResult::error(format!("Validation could not be completed: {err}"))
        }
    };

    if let Some(in_flight) = in_flight.upgrade() {
        in_flight.lock().remove(&key);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Condition, CrossFieldRule, FieldType, Page, ValidationRules};
    use crate::state::FormState;
    use async_trait::async_trait;
    use formwise_types::{is_empty_value, ValueSource};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Default)]
    struct Recorder {
        calls: Arc<AtomicUsize>,
        seen: Arc<Mutex<Vec<Value>>>,
        delay: Duration,
        fail: bool,
    }

    impl Recorder {
        fn slow(delay: Duration) -> Self {
            Self {
                delay,
                ..Default::default()
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl AsyncValidator for Recorder {
        async fn validate(
            &self,
            _field_id: &FieldId,
            value: &Value,
            _values: &Values,
        ) -> anyhow::Result<ValidationOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().push(value.clone());
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail {
                anyhow::bail!("service unavailable");
            }
            if value == &json!("taken") {
                return Ok("Username is taken".into());
            }
            Ok(true.into())
        }
    }

    fn username_field(recorder: &Recorder, rules: ValidationRules) -> FieldDefinition {
        FieldDefinition::new("username", FieldType::Text)
            .with_validation(rules)
            .with_async_validator(recorder.clone())
    }

    fn engine_with(fields: Vec<FieldDefinition>) -> (ValidationEngine, SharedState) {
        let mut page = Page::new("main");
        for field in fields {
            page = page.with_field(field);
        }
        let state = FormState::new(Values::new(), 50).shared();
        let engine = ValidationEngine::new(Arc::new(FormSchema::new(vec![page])), state.clone());
        (engine, state)
    }

    fn set(state: &SharedState, field: &str, value: Value) {
        state
            .lock()
            .values
            .set_value(&FieldId::new(field), value, ValueSource::User);
    }

    #[tokio::test]
    async fn test_cached_result_skips_second_call() {
        let recorder = Recorder::default();
        let (engine, state) = engine_with(vec![username_field(&recorder, Default::default())]);
        let username = FieldId::new("username");

        set(&state, "username", json!("taken"));
        let first = engine.validate_field(&username).await;
        let second = engine.validate_field(&username).await;

        assert_eq!(first.message.as_deref(), Some("Username is taken"));
        assert_eq!(first, second);
        assert_eq!(recorder.calls(), 1);
        assert_eq!(engine.cache_stats().hits, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_calls_share_one_request() {
        let recorder = Recorder::slow(Duration::from_millis(100));
        let rules = ValidationRules {
            cache_results: Some(false),
            ..Default::default()
        };
        let (engine, state) = engine_with(vec![username_field(&recorder, rules)]);
        let username = FieldId::new("username");

        set(&state, "username", json!("jane"));
        let (a, b) = tokio::join!(engine.validate_field(&username), engine.validate_field(&username));

        assert!(a.valid && b.valid);
        assert_eq!(recorder.calls(), 1);

        // nothing cached, so a later call goes out again
        engine.validate_field(&username).await;
        assert_eq!(recorder.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_entry_expires_after_ttl() {
        let recorder = Recorder::default();
        let rules = ValidationRules {
            cache_ttl: Some(1),
            ..Default::default()
        };
        let (engine, state) = engine_with(vec![username_field(&recorder, rules)]);
        let username = FieldId::new("username");

        set(&state, "username", json!("jane"));
        engine.validate_field(&username).await;
        tokio::time::sleep(Duration::from_secs(2)).await;
        engine.validate_field(&username).await;

        assert_eq!(recorder.calls(), 2);
    }

    #[tokio::test]
    async fn test_clear_cache_for_field() {
        let recorder = Recorder::default();
        let (engine, state) = engine_with(vec![username_field(&recorder, Default::default())]);
        let username = FieldId::new("username");

        set(&state, "username", json!("jane"));
        engine.validate_field(&username).await;
        assert_eq!(engine.clear_cache_for_field(&username), 1);
        engine.validate_field(&username).await;

        assert_eq!(recorder.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_coalesces_rapid_calls() {
        let recorder = Recorder::default();
        let (engine, state) = engine_with(vec![username_field(&recorder, Default::default())]);

        let mut handles = Vec::new();
        for value in ["j", "ja", "jan"] {
            set(&state, "username", json!(value));
            let engine = engine.clone();
            handles.push(tokio::spawn(async move {
                engine.validate_field_debounced(&FieldId::new("username")).await
            }));
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        for handle in handles {
            assert!(handle.await.unwrap().valid);
        }
        assert_eq!(recorder.calls(), 1);
        assert_eq!(recorder.seen.lock().as_slice(), &[json!("jan")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_result_is_not_recorded() {
        let recorder = Recorder::slow(Duration::from_millis(100));
        let (engine, state) = engine_with(vec![username_field(&recorder, Default::default())]);
        let username = FieldId::new("username");

        set(&state, "username", json!("taken"));
        let running = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.validate_field(&FieldId::new("username")).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        set(&state, "username", json!("fresh"));

        let result = running.await.unwrap();
        assert!(!result.valid);
        assert!(engine.validation(&username).is_none());
    }

    #[tokio::test]
    async fn test_validator_error_is_blocking_and_not_cached() {
        let recorder = Recorder {
            fail: true,
            ..Default::default()
        };
        let (engine, state) = engine_with(vec![username_field(&recorder, Default::default())]);
        let username = FieldId::new("username");

        set(&state, "username", json!("jane"));
        let result = engine.validate_field(&username).await;
        assert!(result.is_blocking_failure());
        assert!(result.message.unwrap().contains("service unavailable"));

        engine.validate_field(&username).await;
        assert_eq!(recorder.calls(), 2);
    }

    #[tokio::test]
    async fn test_sync_failure_skips_async_but_empty_value_does_not() {
        let recorder = Recorder::default();
        let rules = ValidationRules {
            min_length: Some(3),
            ..Default::default()
        };
        let (engine, state) = engine_with(vec![username_field(&recorder, rules)]);
        let username = FieldId::new("username");

        set(&state, "username", json!(""));
        assert!(engine.validate_field(&username).await.valid);
        assert_eq!(recorder.calls(), 1);
        assert_eq!(recorder.seen.lock().as_slice(), &[json!("")]);

        set(&state, "username", json!("ab"));
        assert!(!engine.validate_field(&username).await.valid);
        assert_eq!(recorder.calls(), 1);
    }

    #[tokio::test]
    async fn test_async_validator_can_reject_empty_value() {
        #[derive(Clone)]
        struct NeedsValue;

        #[async_trait]
        impl AsyncValidator for NeedsValue {
            async fn validate(
                &self,
                _field_id: &FieldId,
                value: &Value,
                _values: &Values,
            ) -> anyhow::Result<ValidationOutcome> {
                if is_empty_value(value) {
                    return Ok("Pick a username".into());
                }
                Ok(true.into())
            }
        }

        let (engine, _) = engine_with(vec![FieldDefinition::new("username", FieldType::Text)
            .with_validation(ValidationRules::default())
            .with_async_validator(NeedsValue)]);

        let result = engine.validate_field(&FieldId::new("username")).await;
        assert!(result.is_blocking_failure());
        assert_eq!(result.message.as_deref(), Some("Pick a username"));
    }

    #[tokio::test]
    async fn test_page_skips_hidden_fields() {
        let (engine, state) = engine_with(vec![
            FieldDefinition::new("country", FieldType::Select),
            FieldDefinition::new("state", FieldType::Text)
                .required()
                .show_if(Condition::Equals {
                    field: FieldId::new("country"),
                    value: json!("US"),
                }),
        ]);
        let page = PageId::new("main");

        set(&state, "country", json!("NO"));
        let results = engine.validate_page(&page).await;
        assert_eq!(results.keys().map(FieldId::as_str).collect::<Vec<_>>(), vec!["country"]);

        set(&state, "country", json!("US"));
        let results = engine.validate_page(&page).await;
        assert!(has_blocking_failure(results.values()));
        assert!(engine.validation(&FieldId::new("state")).is_some());
    }

    #[tokio::test]
    async fn test_dependent_fields_revalidate() {
        let (engine, state) = engine_with(vec![
            FieldDefinition::new("password", FieldType::Text),
            FieldDefinition::new("confirm", FieldType::Text)
                .depends_on("password")
                .with_validator(|value, values| {
                    (values.get("password") == Some(value)).into()
                }),
        ]);

        set(&state, "password", json!("hunter2"));
        set(&state, "confirm", json!("hunter2"));
        let results = engine.validate_dependent_fields(&FieldId::new("password")).await;
        assert!(results[&FieldId::new("confirm")].valid);

        set(&state, "password", json!("hunter3"));
        let results = engine.validate_dependent_fields(&FieldId::new("password")).await;
        assert!(!results[&FieldId::new("confirm")].valid);
    }

    #[test]
    fn test_cross_field_failure_attaches_to_every_field() {
        let state = FormState::new(Values::new(), 50).shared();
        let schema = FormSchema::new(vec![Page::new("dates")
            .with_field(FieldDefinition::new("start", FieldType::Date))
            .with_field(FieldDefinition::new("end", FieldType::Date))])
        .with_cross_field_rule(CrossFieldRule::new(
            "order",
            vec![FieldId::new("start"), FieldId::new("end")],
            |values| match (values.get("start"), values.get("end")) {
                (Some(Value::String(start)), Some(Value::String(end))) if end < start => {
                    "End date must be after start date".into()
                }
                _ => true.into(),
            },
        ));
        let engine = ValidationEngine::new(Arc::new(schema), state.clone());

        set(&state, "start", json!("2024-05-02"));
        set(&state, "end", json!("2024-05-01"));
        let failures = engine.validate_cross_field();

        assert_eq!(failures.len(), 2);
        let end = engine.validation(&FieldId::new("end")).unwrap();
        insta::assert_snapshot!(end.message.unwrap(), @"End date must be after start date");
    }
}
