//! Template resolution.
//!
//! Templates reference earlier step outputs with `{{ path }}` placeholders.
//! Resolution is a path lookup against the [`ExecutionContext`]; nothing is
//! evaluated, and every unresolvable reference is an error.
//!
//! [`ExecutionContext`]: crate::context::ExecutionContext

mod path;
mod resolver;

pub use path::{Alias, RefPath, Segment, RESERVED_NAMES};
pub(crate) use path::is_identifier;
pub use resolver::TemplateResolver;

use thiserror::Error;

/// Template resolution errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    /// Malformed placeholder.
    #[error("template syntax error: {0}")]
    Syntax(String),

    /// Placeholder path does not follow the path grammar.
    #[error("invalid reference '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    /// The alias does not name a step with an output.
    #[error("unknown step '{0}'")]
    UnknownStep(String),

    /// A path segment is absent from the referenced value.
    #[error("'{path}' has no field '{field}'")]
    MissingField { path: String, field: String },

    /// A path segment was applied to a value that cannot hold it.
    #[error("'{path}' is {found}, cannot access '{field}'")]
    WrongType {
        path: String,
        field: String,
        found: &'static str,
    },

    /// A null value cannot be embedded in text.
    #[error("'{0}' is null and cannot be interpolated")]
    NullInterpolation(String),
}

/// JSON type name used in error messages.
pub(crate) fn type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}
