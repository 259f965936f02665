//! Validate a values file against a schema without a running form.

use anyhow::{bail, Context, Result};
use formwise_core::{Collaborators, EngineConfig, FormEngine, FormSchema, ValidationResult};
use formwise_types::{FieldId, ValueSource, Values};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::debug;

#[derive(Serialize)]
struct ValidationSummary<'a> {
    fields: usize,
    valid: bool,
    failures: &'a BTreeMap<FieldId, ValidationResult>,
}

fn load_values(path: &Path) -> Result<Values> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read values {}", path.display()))?;
    let values = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => serde_json::from_str(&contents).context("Failed to parse values JSON")?,
        _ => serde_yaml::from_str(&contents).context("Failed to parse values YAML")?,
    };
    Ok(values)
}

/// Write every value into a fresh engine, run full and cross-field
/// validation and exit non-zero when a blocking failure exists.
pub async fn validate_values(
    schema_path: &Path,
    values_path: &Path,
    config_path: Option<&Path>,
    json: bool,
) -> Result<()> {
    let schema = FormSchema::from_file(schema_path)
        .with_context(|| format!("Failed to load schema {}", schema_path.display()))?;
    let config = match config_path {
        Some(path) => EngineConfig::from_file(path)
            .with_context(|| format!("Failed to load configuration {}", path.display()))?,
        None => EngineConfig::default(),
    };
    let values = load_values(values_path)?;

    if let Some(unknown) = values.keys().find(|f| schema.field(f).is_none()) {
        bail!("Values file sets unknown field `{}`", unknown);
    }

    let engine = FormEngine::new(schema, config, Collaborators::new(), Values::new())
        .context("Schema is not usable; run `formwise lint` for details")?;
    for (field_id, value) in values {
        engine.set_value(&field_id, value, ValueSource::System);
    }

    let mut failures: BTreeMap<FieldId, ValidationResult> = engine
        .validate_all()
        .await
        .into_iter()
        .filter(|(_, r)| !r.valid)
        .collect();
    for (field_id, result) in engine.validate_cross_field() {
        failures.entry(field_id).or_insert(result);
    }
    debug!(cache = %engine.cache_stats(), "Async validation cache");
    engine.shutdown();

    let blocking = failures.values().filter(|r| r.is_blocking_failure()).count();
    let summary = ValidationSummary {
        fields: engine.schema().fields().count(),
        valid: blocking == 0,
        failures: &failures,
    };

    if json {
        let payload = serde_json::to_string_pretty(&summary)?;
        println!("{}", payload);
    } else {
        println!(
            "Validation complete: {} fields, {} failures, {} blocking",
            summary.fields,
            failures.len(),
            blocking
        );
        for (field_id, result) in &failures {
            println!(
                "- {} [{:?}]: {}",
                field_id,
                result.severity,
                result.message.as_deref().unwrap_or("invalid")
            );
        }
    }

    if blocking > 0 {
        std::process::exit(1);
    }
    Ok(())
}
