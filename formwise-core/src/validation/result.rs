//! Validation result types and normalization

use formwise_types::Value;
use serde::{Deserialize, Serialize};

/// How serious a validation failure is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Error,
    Warning,
    Info,
}

/// Normalized outcome of validating one field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub severity: Severity,
    pub blocking: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_fix: Option<Value>,
}

impl ValidationResult {
    pub fn valid() -> Self {
        Self {
            valid: true,
            message: None,
            severity: Severity::Error,
            blocking: false,
            auto_fix: None,
        }
    }

    /// A blocking error with the given message
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            valid: false,
            message: Some(message.into()),
            severity: Severity::Error,
            blocking: true,
            auto_fix: None,
        }
    }

    /// A non-blocking warning with the given message
    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            valid: false,
            message: Some(message.into()),
            severity: Severity::Warning,
            blocking: false,
            auto_fix: None,
        }
    }

    pub fn with_auto_fix(mut self, value: Value) -> Self {
        self.auto_fix = Some(value);
        self
    }

    /// True when this result should stop page advancement and submission
    pub fn is_blocking_failure(&self) -> bool {
        !self.valid && self.blocking
    }
}

/// A partially specified result as returned by custom validators.
///
/// Missing `severity` defaults to error; missing `blocking` defaults to
/// `severity == Error`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialResult {
    pub valid: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub severity: Option<Severity>,
    #[serde(default)]
    pub blocking: Option<bool>,
    #[serde(default)]
    pub auto_fix: Option<Value>,
}

/// What a custom validator may return: a pass/fail flag, an error message,
/// or a (partial) result object.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationOutcome {
    Pass(bool),
    Message(String),
    Result(PartialResult),
}

impl ValidationOutcome {
    /// Normalize into a full [`ValidationResult`]
    pub fn normalize(self) -> ValidationResult {
        match self {
            ValidationOutcome::Pass(true) => ValidationResult::valid(),
            ValidationOutcome::Pass(false) => ValidationResult::error("Validation failed"),
            ValidationOutcome::Message(message) => ValidationResult::error(message),
            ValidationOutcome::Result(partial) => {
                let severity = partial.severity.unwrap_or_default();
                let blocking = partial.blocking.unwrap_or(severity == Severity::Error);
                ValidationResult {
                    valid: partial.valid,
                    message: partial.message,
                    severity,
                    blocking: if partial.valid { false } else { blocking },
                    auto_fix: partial.auto_fix,
                }
            }
        }
    }
}

impl From<bool> for ValidationOutcome {
    fn from(valid: bool) -> Self {
        ValidationOutcome::Pass(valid)
    }
}

impl From<String> for ValidationOutcome {
    fn from(message: String) -> Self {
        ValidationOutcome::Message(message)
    }
}

impl From<&str> for ValidationOutcome {
    fn from(message: &str) -> Self {
        ValidationOutcome::Message(message.to_string())
    }
}

impl From<PartialResult> for ValidationOutcome {
    fn from(partial: PartialResult) -> Self {
        ValidationOutcome::Result(partial)
    }
}

impl From<ValidationResult> for ValidationOutcome {
    fn from(result: ValidationResult) -> Self {
        ValidationOutcome::Result(PartialResult {
            valid: result.valid,
            message: result.message,
            severity: Some(result.severity),
            blocking: Some(result.blocking),
            auto_fix: result.auto_fix,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_bool_and_message() {
        assert!(ValidationOutcome::from(true).normalize().valid);

        let failed = ValidationOutcome::from(false).normalize();
        assert!(failed.is_blocking_failure());

        let message = ValidationOutcome::from("Too short").normalize();
        assert!(!message.valid);
        assert!(message.blocking);
        assert_eq!(message.message.as_deref(), Some("Too short"));
    }

    #[test]
    fn test_normalize_partial_defaults() {
        let partial = PartialResult {
            valid: false,
            message: Some("Check this".into()),
            ..Default::default()
        };
        let result = ValidationOutcome::from(partial).normalize();
        assert_eq!(result.severity, Severity::Error);
        assert!(result.blocking);

        let warning = PartialResult {
            valid: false,
            severity: Some(Severity::Warning),
            ..Default::default()
        };
        let result = ValidationOutcome::from(warning).normalize();
        assert!(!result.blocking);
        assert!(!result.is_blocking_failure());
    }

    #[test]
    fn test_explicit_blocking_overrides_severity_default() {
        let partial = PartialResult {
            valid: false,
            severity: Some(Severity::Info),
            blocking: Some(true),
            ..Default::default()
        };
        assert!(ValidationOutcome::from(partial).normalize().is_blocking_failure());
    }
}
