//! Error types for the form engine

use thiserror::Error;

/// Problems loading or checking a form schema
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("Failed to read schema file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse YAML schema: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON schema: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Duplicate field id: {0}")]
    DuplicateField(String),

    #[error("Duplicate page id: {0}")]
    DuplicatePage(String),

    #[error("Field {field} references unknown field {reference}")]
    UnknownReference { field: String, reference: String },

    #[error("Cross-field rule {rule} names unknown field {field}")]
    UnknownRuleField { rule: String, field: String },

    #[error("Invalid pattern on field {field}: {message}")]
    InvalidPattern { field: String, message: String },
}

/// Problems loading engine configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: &'static str, message: String },
}

/// Top-level engine error
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Unknown field: {0}")]
    UnknownField(String),
}

/// Result type using EngineError
pub type Result<T> = std::result::Result<T, EngineError>;
