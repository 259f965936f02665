//! CLI command implementations.

pub mod lint;
pub mod validate;

pub use lint::lint_schema;
pub use validate::validate_values;
