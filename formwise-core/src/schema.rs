//! Form schema description
//!
//! A schema is an ordered list of pages, each an ordered list of field
//! definitions, plus optional cross-field rules. The declarative parts load
//! from YAML or JSON; validator functions and visibility predicates are
//! attached in code.

use formwise_types::{is_empty_value, FieldId, PageId, Value, Values};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::collaborators::AsyncValidator;
use crate::error::SchemaError;
use crate::validation::ValidationOutcome;

/// Default debounce applied to `validate_field_debounced`
pub const DEFAULT_DEBOUNCE_MS: u64 = 500;
/// Default lifetime of a cached async validation result
pub const DEFAULT_CACHE_TTL_SECS: u64 = 300;
/// Default lifetime of an unaccepted suggestion
pub const DEFAULT_SUGGESTION_TTL_SECS: u64 = 3600;
/// Suggestions scored below this are discarded
pub const DEFAULT_MIN_CONFIDENCE: f64 = 0.7;

static NULL: Value = Value::Null;

/// Field type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Text,
    Textarea,
    Number,
    Email,
    Url,
    Phone,
    Date,
    Select,
    Multiselect,
    Checkbox,
    Radio,
    File,
}

/// Synchronous custom validator: `(value, all_values) -> outcome`
#[derive(Clone)]
pub struct SyncValidator(Arc<dyn Fn(&Value, &Values) -> ValidationOutcome + Send + Sync>);

impl SyncValidator {
    pub fn new(f: impl Fn(&Value, &Values) -> ValidationOutcome + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn call(&self, value: &Value, values: &Values) -> ValidationOutcome {
        (self.0)(value, values)
    }
}

impl fmt::Debug for SyncValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SyncValidator(..)")
    }
}

/// Handle to an async validator collaborator
#[derive(Clone)]
pub struct AsyncValidatorRef(pub Arc<dyn AsyncValidator>);

impl fmt::Debug for AsyncValidatorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AsyncValidator(..)")
    }
}

/// Code-supplied visibility predicate
#[derive(Clone)]
pub struct VisibilityPredicate(Arc<dyn Fn(&Values) -> bool + Send + Sync>);

impl VisibilityPredicate {
    pub fn new(f: impl Fn(&Values) -> bool + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn call(&self, values: &Values) -> bool {
        (self.0)(values)
    }
}

impl fmt::Debug for VisibilityPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("VisibilityPredicate(..)")
    }
}

/// Declarative visibility condition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Condition {
    Equals { field: FieldId, value: Value },
    NotEquals { field: FieldId, value: Value },
    In { field: FieldId, values: Vec<Value> },
    NotEmpty { field: FieldId },
    Empty { field: FieldId },
    All(Vec<Condition>),
    Any(Vec<Condition>),
    Not(Box<Condition>),
}

impl Condition {
    pub fn evaluate(&self, values: &Values) -> bool {
        let lookup = |field: &FieldId| values.get(field).unwrap_or(&NULL);
        match self {
            Condition::Equals { field, value } => lookup(field) == value,
            Condition::NotEquals { field, value } => lookup(field) != value,
            Condition::In { field, values: options } => options.contains(lookup(field)),
            Condition::NotEmpty { field } => !is_empty_value(lookup(field)),
            Condition::Empty { field } => is_empty_value(lookup(field)),
            Condition::All(conditions) => conditions.iter().all(|c| c.evaluate(values)),
            Condition::Any(conditions) => conditions.iter().any(|c| c.evaluate(values)),
            Condition::Not(condition) => !condition.evaluate(values),
        }
    }

    /// Every field this condition reads
    pub fn referenced_fields(&self) -> Vec<&FieldId> {
        match self {
            Condition::Equals { field, .. }
            | Condition::NotEquals { field, .. }
            | Condition::In { field, .. }
            | Condition::NotEmpty { field }
            | Condition::Empty { field } => vec![field],
            Condition::All(conditions) | Condition::Any(conditions) => {
                conditions.iter().flat_map(|c| c.referenced_fields()).collect()
            }
            Condition::Not(condition) => condition.referenced_fields(),
        }
    }
}

/// Validation descriptor for one field
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationRules {
    #[serde(default)]
    pub min_length: Option<usize>,
    #[serde(default)]
    pub max_length: Option<usize>,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    #[serde(default)]
    pub pattern: Option<String>,
    /// Message shown when `pattern` does not match
    #[serde(default)]
    pub pattern_message: Option<String>,
    #[serde(default)]
    pub email: bool,
    #[serde(default)]
    pub url: bool,
    #[serde(default)]
    pub phone: bool,
    /// Debounce for async validation, in milliseconds
    #[serde(default)]
    pub debounce: Option<u64>,
    #[serde(default)]
    pub cache_results: Option<bool>,
    /// Lifetime of cached async results, in seconds
    #[serde(default)]
    pub cache_ttl: Option<u64>,
    #[serde(skip)]
    pub validate: Option<SyncValidator>,
    #[serde(skip)]
    pub validate_async: Option<AsyncValidatorRef>,
}

impl ValidationRules {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce.unwrap_or(DEFAULT_DEBOUNCE_MS))
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl.unwrap_or(DEFAULT_CACHE_TTL_SECS))
    }

    pub fn caches_results(&self) -> bool {
        self.cache_results != Some(false)
    }
}

/// Suggestion descriptor for one field
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestConfig {
    #[serde(default)]
    pub min_confidence: Option<f64>,
    /// Lifetime of a suggestion, in seconds
    #[serde(default)]
    pub ttl: Option<u64>,
    /// Keep the user's own value around after accepting, so it can be toggled back
    #[serde(default = "default_true")]
    pub preserve_both_values: bool,
}

fn default_true() -> bool {
    true
}

impl SuggestConfig {
    pub fn min_confidence(&self) -> f64 {
        self.min_confidence.unwrap_or(DEFAULT_MIN_CONFIDENCE)
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl.unwrap_or(DEFAULT_SUGGESTION_TTL_SECS))
    }
}

impl Default for SuggestConfig {
    fn default() -> Self {
        Self {
            min_confidence: None,
            ttl: None,
            preserve_both_values: true,
        }
    }
}

/// One input field
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDefinition {
    pub id: FieldId,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default_value: Option<Value>,
    #[serde(default)]
    pub depends_on: Vec<FieldId>,
    /// Conditions are written as single-key maps, `{equals: {field, value}}`
    #[serde(default, with = "serde_yaml::with::singleton_map_recursive")]
    pub show_if: Option<Condition>,
    #[serde(skip)]
    pub show_if_predicate: Option<VisibilityPredicate>,
    #[serde(default)]
    pub validation: Option<ValidationRules>,
    #[serde(default)]
    pub suggest: Option<SuggestConfig>,
}

impl FieldDefinition {
    pub fn new(id: impl Into<FieldId>, field_type: FieldType) -> Self {
        let id = id.into();
        Self {
            label: id.as_str().to_string(),
            id,
            field_type,
            required: false,
            default_value: None,
            depends_on: Vec::new(),
            show_if: None,
            show_if_predicate: None,
            validation: None,
            suggest: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default_value = Some(value);
        self
    }

    pub fn depends_on(mut self, field: impl Into<FieldId>) -> Self {
        self.depends_on.push(field.into());
        self
    }

    pub fn show_if(mut self, condition: Condition) -> Self {
        self.show_if = Some(condition);
        self
    }

    pub fn show_if_fn(mut self, f: impl Fn(&Values) -> bool + Send + Sync + 'static) -> Self {
        self.show_if_predicate = Some(VisibilityPredicate::new(f));
        self
    }

    pub fn with_validation(mut self, rules: ValidationRules) -> Self {
        self.validation = Some(rules);
        self
    }

    /// Attach a synchronous custom validator
    pub fn with_validator(
        mut self,
        f: impl Fn(&Value, &Values) -> ValidationOutcome + Send + Sync + 'static,
    ) -> Self {
        self.validation.get_or_insert_with(Default::default).validate = Some(SyncValidator::new(f));
        self
    }

    /// Attach an async validator collaborator
    pub fn with_async_validator(mut self, validator: impl AsyncValidator + 'static) -> Self {
        self.validation.get_or_insert_with(Default::default).validate_async =
            Some(AsyncValidatorRef(Arc::new(validator)));
        self
    }

    pub fn with_suggest(mut self, config: SuggestConfig) -> Self {
        self.suggest = Some(config);
        self
    }

    /// Evaluate `showIf` against the given values; fields without a condition are visible
    pub fn is_visible(&self, values: &Values) -> bool {
        if let Some(predicate) = &self.show_if_predicate {
            if !predicate.call(values) {
                return false;
            }
        }
        self.show_if.as_ref().map_or(true, |c| c.evaluate(values))
    }

    pub fn display_name(&self) -> &str {
        if self.label.is_empty() {
            self.id.as_str()
        } else {
            &self.label
        }
    }
}

/// An ordered group of fields shown together
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub id: PageId,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub fields: Vec<FieldDefinition>,
}

impl Page {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: PageId::new(id),
            title: None,
            description: None,
            fields: Vec::new(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_field(mut self, field: FieldDefinition) -> Self {
        self.fields.push(field);
        self
    }
}

/// A validator spanning several fields
#[derive(Clone)]
pub struct CrossFieldRule {
    pub id: String,
    pub fields: Vec<FieldId>,
    validate: Arc<dyn Fn(&Values) -> ValidationOutcome + Send + Sync>,
}

impl CrossFieldRule {
    pub fn new(
        id: impl Into<String>,
        fields: Vec<FieldId>,
        validate: impl Fn(&Values) -> ValidationOutcome + Send + Sync + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            fields,
            validate: Arc::new(validate),
        }
    }

    /// Run the rule against a values map restricted to `fields`
    pub fn evaluate(&self, values: &Values) -> ValidationOutcome {
        let scoped: Values = self
            .fields
            .iter()
            .filter_map(|f| values.get(f).map(|v| (f.clone(), v.clone())))
            .collect();
        (self.validate)(&scoped)
    }
}

impl fmt::Debug for CrossFieldRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CrossFieldRule")
            .field("id", &self.id)
            .field("fields", &self.fields)
            .finish_non_exhaustive()
    }
}

/// Form-level validation settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaValidation {
    #[serde(skip)]
    pub cross_field: Vec<CrossFieldRule>,
}

/// Static description of a form
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormSchema {
    #[serde(default = "default_version")]
    pub version: String,
    pub pages: Vec<Page>,
    #[serde(default)]
    pub validation: SchemaValidation,
}

fn default_version() -> String {
    String::from("1")
}

impl FormSchema {
    pub fn new(pages: Vec<Page>) -> Self {
        Self {
            version: default_version(),
            pages,
            validation: SchemaValidation::default(),
        }
    }

    pub fn from_yaml_str(source: &str) -> Result<Self, SchemaError> {
        Ok(serde_yaml::from_str(source)?)
    }

    pub fn from_json_str(source: &str) -> Result<Self, SchemaError> {
        Ok(serde_json::from_str(source)?)
    }

    /// Load a schema file; `.json` is parsed as JSON, anything else as YAML
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SchemaError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&contents),
            _ => Self::from_yaml_str(&contents),
        }
    }

    pub fn with_cross_field_rule(mut self, rule: CrossFieldRule) -> Self {
        self.validation.cross_field.push(rule);
        self
    }

    pub fn cross_field_rules(&self) -> &[CrossFieldRule] {
        &self.validation.cross_field
    }

    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    pub fn page(&self, page_id: &PageId) -> Option<&Page> {
        self.pages.iter().find(|p| &p.id == page_id)
    }

    pub fn page_index(&self, page_id: &PageId) -> Option<usize> {
        self.pages.iter().position(|p| &p.id == page_id)
    }

    /// All fields in page order
    pub fn fields(&self) -> impl Iterator<Item = &FieldDefinition> {
        self.pages.iter().flat_map(|p| p.fields.iter())
    }

    pub fn field(&self, field_id: &FieldId) -> Option<&FieldDefinition> {
        self.fields().find(|f| &f.id == field_id)
    }

    /// The page a field lives on
    pub fn page_of(&self, field_id: &FieldId) -> Option<&Page> {
        self.pages
            .iter()
            .find(|p| p.fields.iter().any(|f| &f.id == field_id))
    }

    /// Fields whose `dependsOn` lists `field_id`
    pub fn dependents_of(&self, field_id: &FieldId) -> Vec<FieldId> {
        self.fields()
            .filter(|f| f.depends_on.contains(field_id))
            .map(|f| f.id.clone())
            .collect()
    }

    /// Default values declared on fields
    pub fn default_values(&self) -> Values {
        self.fields()
            .filter_map(|f| f.default_value.clone().map(|v| (f.id.clone(), v)))
            .collect()
    }

    /// Structural problems with the schema. Empty means the schema is usable.
    pub fn lint(&self) -> Vec<SchemaError> {
        let mut problems = Vec::new();

        let mut page_ids = HashSet::new();
        for page in &self.pages {
            if !page_ids.insert(&page.id) {
                problems.push(SchemaError::DuplicatePage(page.id.to_string()));
            }
        }

        let mut field_ids = HashSet::new();
        for field in self.fields() {
            if !field_ids.insert(&field.id) {
                problems.push(SchemaError::DuplicateField(field.id.to_string()));
            }
        }

        for field in self.fields() {
            let condition_refs = field
                .show_if
                .as_ref()
                .map(|c| c.referenced_fields())
                .unwrap_or_default();
            for reference in field.depends_on.iter().chain(condition_refs) {
                if !field_ids.contains(reference) {
                    problems.push(SchemaError::UnknownReference {
                        field: field.id.to_string(),
                        reference: reference.to_string(),
                    });
                }
            }

            if let Some(pattern) = field.validation.as_ref().and_then(|v| v.pattern.as_ref()) {
                if let Err(err) = Regex::new(pattern) {
                    problems.push(SchemaError::InvalidPattern {
                        field: field.id.to_string(),
                        message: err.to_string(),
                    });
                }
            }
        }

        for rule in self.cross_field_rules() {
            for field in &rule.fields {
                if !field_ids.contains(field) {
                    problems.push(SchemaError::UnknownRuleField {
                        rule: rule.id.clone(),
                        field: field.to_string(),
                    });
                }
            }
        }

        problems
    }
}
