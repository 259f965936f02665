//! Lint a schema file and report structural problems.

use anyhow::{Context, Result};
use formwise_core::FormSchema;
use serde::Serialize;
use std::path::Path;

#[derive(Serialize)]
struct LintSummary {
    pages: usize,
    fields: usize,
    problems: Vec<String>,
}

/// Load the schema, run its lint checks and exit non-zero on problems.
pub fn lint_schema(schema_path: &Path, json: bool) -> Result<()> {
    let schema = FormSchema::from_file(schema_path)
        .with_context(|| format!("Failed to load schema {}", schema_path.display()))?;

    let summary = LintSummary {
        pages: schema.pages().len(),
        fields: schema.fields().count(),
        problems: schema.lint().iter().map(ToString::to_string).collect(),
    };

    if json {
        let payload = serde_json::to_string_pretty(&summary)?;
        println!("{}", payload);
    } else {
        println!(
            "Lint complete: {} pages, {} fields, {} problems",
            summary.pages,
            summary.fields,
            summary.problems.len()
        );
        for problem in &summary.problems {
            println!("- {}", problem);
        }
    }

    if !summary.problems.is_empty() {
        std::process::exit(1);
    }
    Ok(())
}
