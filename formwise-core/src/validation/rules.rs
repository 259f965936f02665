//! Built-in synchronous checks
//!
//! Checks run in a fixed order and stop at the first failure: required,
//! length bounds, numeric bounds, pattern, format, then the field's custom
//! validator.

use formwise_types::{is_empty_value, Value, Values};
use once_cell::sync::Lazy;
use regex::Regex;
use std::borrow::Cow;

use super::ValidationResult;
use crate::schema::{FieldDefinition, FieldType};

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid email regex"));

static URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^https?://[^\s/$.?#][^\s]*$").expect("valid url regex"));

static PHONE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\+?[0-9\s\-().]{7,20}$").expect("valid phone regex"));

/// Scalars as text; arrays and objects have no textual form here
fn as_text(value: &Value) -> Option<Cow<'_, str>> {
    match value {
        Value::String(s) => Some(Cow::Borrowed(s.as_str())),
        Value::Number(n) => Some(Cow::Owned(n.to_string())),
        Value::Bool(b) => Some(Cow::Owned(b.to_string())),
        _ => None,
    }
}

fn as_number(field: &FieldDefinition, value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) if field.field_type == FieldType::Number => s.trim().parse().ok(),
        _ => None,
    }
}

pub fn is_email(text: &str) -> bool {
    EMAIL_RE.is_match(text)
}

pub fn is_url(text: &str) -> bool {
    URL_RE.is_match(text)
}

pub fn is_phone(text: &str) -> bool {
    PHONE_RE.is_match(text) && text.chars().filter(char::is_ascii_digit).count() >= 7
}

/// Run the synchronous checks for one field.
///
/// Returns the first failing result, or `None` when every check passes.
/// `pattern` is the field's compiled pattern, if it has a valid one.
pub fn check_field(
    field: &FieldDefinition,
    pattern: Option<&Regex>,
    value: &Value,
    values: &Values,
) -> Option<ValidationResult> {
    let label = field.display_name();
    let empty = is_empty_value(value);

    if field.required && empty {
        return Some(ValidationResult::error(format!("{label} is required")));
    }

    let rules = field.validation.as_ref();

    if !empty {
        if let Some(failure) = check_bounds(field, value) {
            return Some(failure);
        }
        if let (Some(pattern), Some(text)) = (pattern, as_text(value)) {
            if !pattern.is_match(&text) {
                let message = rules
                    .and_then(|r| r.pattern_message.clone())
                    .unwrap_or_else(|| format!("{label} has an invalid format"));
                return Some(ValidationResult::error(message));
            }
        }
        if let Some(failure) = check_format(field, value) {
            return Some(failure);
        }
    }

    let validator = rules.and_then(|r| r.validate.as_ref())?;
    let result = validator.call(value, values).normalize();
    (!result.valid).then_some(result)
}

fn check_bounds(field: &FieldDefinition, value: &Value) -> Option<ValidationResult> {
    let label = field.display_name();

    if field.field_type == FieldType::Number && as_number(field, value).is_none() {
        return Some(ValidationResult::error(format!("{label} must be a number")));
    }

    let rules = field.validation.as_ref()?;

    if let Value::String(text) = value {
        let length = text.chars().count();
        if let Some(min) = rules.min_length {
            if length < min {
                return Some(ValidationResult::error(format!(
                    "{label} must be at least {min} characters"
                )));
            }
        }
        if let Some(max) = rules.max_length {
            if length > max {
                return Some(ValidationResult::error(format!(
                    "{label} must be at most {max} characters"
                )));
            }
        }
    }

    if let Some(number) = as_number(field, value) {
        if let Some(min) = rules.min {
            if number < min {
                return Some(ValidationResult::error(format!("{label} must be at least {min}")));
            }
        }
        if let Some(max) = rules.max {
            if number > max {
                return Some(ValidationResult::error(format!("{label} must be at most {max}")));
            }
        }
    }

    None
}

fn check_format(field: &FieldDefinition, value: &Value) -> Option<ValidationResult> {
    let label = field.display_name();
    let rules = field.validation.as_ref();
    let flag = |f: fn(&crate::schema::ValidationRules) -> bool| rules.is_some_and(f);
    let text = as_text(value)?;

    if (flag(|r| r.email) || field.field_type == FieldType::Email) && !is_email(&text) {
        return Some(ValidationResult::error(format!(
            "{label} must be a valid email address"
        )));
    }
    if (flag(|r| r.url) || field.field_type == FieldType::Url) && !is_url(&text) {
        return Some(ValidationResult::error(format!("{label} must be a valid URL")));
    }
    if (flag(|r| r.phone) || field.field_type == FieldType::Phone) && !is_phone(&text) {
        return Some(ValidationResult::error(format!(
            "{label} must be a valid phone number"
        )));
    }
    None
}
