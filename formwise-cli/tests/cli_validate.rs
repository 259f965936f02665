use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use std::fs;
use tempfile::tempdir;

const SCHEMA: &str = r#"
pages:
  - id: account
    fields:
      - id: email
        type: email
        label: Email
        required: true
      - id: age
        type: number
        label: Age
        validation:
          min: 18
  - id: profile
    fields:
      - id: bio
        type: textarea
        validation:
          maxLength: 20
"#;

#[test]
fn validate_reports_blocking_failures() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    fs::write(dir.path().join("form.yaml"), SCHEMA)?;
    fs::write(
        dir.path().join("values.json"),
        r#"{"email": "not-an-email", "age": 16, "bio": "hi"}"#,
    )?;

    #[allow(deprecated)]
    let assert = Command::cargo_bin("formwise")?
        .current_dir(dir.path())
        .args(["validate", "form.yaml", "--values", "values.json", "--json"])
        .assert()
        .failure();

    let output = String::from_utf8(assert.get_output().stdout.clone())?;
    let summary: Value = serde_json::from_str(&output)?;
    assert_eq!(summary["valid"], Value::Bool(false));
    assert_eq!(summary["fields"], 3);
    assert_eq!(
        summary["failures"]["email"]["message"],
        "Email must be a valid email address"
    );
    assert_eq!(summary["failures"]["age"]["message"], "Age must be at least 18");
    assert!(summary["failures"].get("bio").is_none());
    Ok(())
}

#[test]
fn validate_passes_clean_values() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    fs::write(dir.path().join("form.yaml"), SCHEMA)?;
    fs::write(dir.path().join("values.yaml"), "email: a@b.com\nage: 30\n")?;

    #[allow(deprecated)]
    Command::cargo_bin("formwise")?
        .current_dir(dir.path())
        .args(["validate", "form.yaml", "--values", "values.yaml"])
        .assert()
        .success()
        .stdout(predicate::str::contains("3 fields, 0 failures, 0 blocking"));
    Ok(())
}

#[test]
fn validate_rejects_unknown_fields() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    fs::write(dir.path().join("form.yaml"), SCHEMA)?;
    fs::write(dir.path().join("values.json"), r#"{"nickname": "ace"}"#)?;

    #[allow(deprecated)]
    Command::cargo_bin("formwise")?
        .current_dir(dir.path())
        .args(["validate", "form.yaml", "--values", "values.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown field `nickname`"));
    Ok(())
}

#[test]
fn lint_flags_broken_references() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    fs::write(
        dir.path().join("form.yaml"),
        r#"
pages:
  - id: main
    fields:
      - id: state
        type: text
        dependsOn: [country]
      - id: state
        type: text
"#,
    )?;

    #[allow(deprecated)]
    Command::cargo_bin("formwise")?
        .current_dir(dir.path())
        .args(["lint", "form.yaml"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("1 pages, 2 fields, 2 problems"));
    Ok(())
}

#[test]
fn lint_clean_schema_as_json() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    fs::write(dir.path().join("form.yaml"), SCHEMA)?;

    #[allow(deprecated)]
    let assert = Command::cargo_bin("formwise")?
        .current_dir(dir.path())
        .args(["lint", "form.yaml", "--json"])
        .assert()
        .success();

    let summary: Value = serde_json::from_slice(&assert.get_output().stdout)?;
    assert_eq!(summary["pages"], 2);
    assert_eq!(summary["problems"].as_array().map(Vec::len), Some(0));
    Ok(())
}

const CONDITIONAL_SCHEMA: &str = r#"
pages:
  - id: address
    fields:
      - id: country
        type: select
        required: true
      - id: state
        type: text
        required: true
        showIf:
          equals: { field: country, value: US }
"#;

#[test]
fn validate_skips_hidden_conditional_fields() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    fs::write(dir.path().join("form.yaml"), CONDITIONAL_SCHEMA)?;
    fs::write(dir.path().join("abroad.yaml"), "country: NO\n")?;
    fs::write(dir.path().join("domestic.yaml"), "country: US\n")?;

    #[allow(deprecated)]
    Command::cargo_bin("formwise")?
        .current_dir(dir.path())
        .args(["lint", "form.yaml"])
        .assert()
        .success()
        .stdout(predicate::str::contains("1 pages, 2 fields, 0 problems"));

    #[allow(deprecated)]
    Command::cargo_bin("formwise")?
        .current_dir(dir.path())
        .args(["validate", "form.yaml", "--values", "abroad.yaml"])
        .assert()
        .success()
        .stdout(predicate::str::contains("2 fields, 0 failures, 0 blocking"));

    #[allow(deprecated)]
    Command::cargo_bin("formwise")?
        .current_dir(dir.path())
        .args(["validate", "form.yaml", "--values", "domestic.yaml"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("- state [Error]"));
    Ok(())
}

#[test]
fn validate_verbose_logs_cache_stats() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    fs::write(dir.path().join("form.yaml"), SCHEMA)?;
    fs::write(dir.path().join("values.yaml"), "email: a@b.com\n")?;

    #[allow(deprecated)]
    Command::cargo_bin("formwise")?
        .current_dir(dir.path())
        .args(["--verbose", "validate", "form.yaml", "--values", "values.yaml"])
        .assert()
        .success()
        .stderr(predicate::str::contains("Async validation cache"))
        .stderr(predicate::str::contains("hit rate: 0.0%"));
    Ok(())
}
