//! Placeholder substitution.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use super::{RefPath, TemplateError};
use crate::context::ExecutionContext;

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{\s*([^{}]*?)\s*\}\}")
        .unwrap_or_else(|e| panic!("invalid placeholder pattern: {e}"))
});

/// Resolves `{{ path }}` placeholders against an [`ExecutionContext`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateResolver;

impl TemplateResolver {
    pub fn new() -> Self {
        Self
    }

    /// Check if a string contains placeholder syntax.
    pub fn is_template(s: &str) -> bool {
        s.contains("{{")
    }

    /// Parse every placeholder in `template` without resolving it.
    pub fn references(template: &str) -> Result<Vec<RefPath>, TemplateError> {
        let mut paths = Vec::new();
        for caps in PLACEHOLDER.captures_iter(template) {
            paths.push(RefPath::parse(&caps[1])?);
        }
        let leftover = PLACEHOLDER.replace_all(template, "");
        if leftover.contains("{{") {
            return Err(TemplateError::Syntax(
                "unterminated or nested '{{' placeholder".to_string(),
            ));
        }
        Ok(paths)
    }

    /// Parse every placeholder found in string leaves of a JSON value.
    pub fn references_in(value: &Value) -> Result<Vec<RefPath>, TemplateError> {
        let mut paths = Vec::new();
        collect_references(value, &mut paths)?;
        Ok(paths)
    }

    /// Resolve a template string.
    ///
    /// A string that is exactly one placeholder yields the referenced value
    /// with its JSON type preserved. Otherwise placeholders are interpolated
    /// into the surrounding text and the result is a string.
    pub fn resolve_str(&self, template: &str, ctx: &ExecutionContext) -> Result<Value, TemplateError> {
        if !Self::is_template(template) {
            return Ok(Value::String(template.to_string()));
        }

        if let Some(caps) = PLACEHOLDER.captures(template) {
            if let Some(whole) = caps.get(0) {
                if whole.start() == 0 && whole.end() == template.len() {
                    let path = RefPath::parse(&caps[1])?;
                    return ctx.lookup(&path);
                }
            }
        }

        self.render(template, ctx).map(Value::String)
    }

    /// Resolve a template into text. Non-string values are rendered in their
    /// canonical form; objects and arrays as compact JSON.
    pub fn render(&self, template: &str, ctx: &ExecutionContext) -> Result<String, TemplateError> {
        Self::references(template)?;

        let mut out = String::with_capacity(template.len());
        let mut last = 0;
        for caps in PLACEHOLDER.captures_iter(template) {
            let Some(whole) = caps.get(0) else { continue };
            out.push_str(&template[last..whole.start()]);
            let path = RefPath::parse(&caps[1])?;
            let value = ctx.lookup(&path)?;
            out.push_str(&interpolate(&path, &value)?);
            last = whole.end();
        }
        out.push_str(&template[last..]);
        Ok(out)
    }

    /// Resolve every string leaf of a JSON value. Object keys are literal.
    pub fn resolve_value(&self, value: &Value, ctx: &ExecutionContext) -> Result<Value, TemplateError> {
        match value {
            Value::String(s) => self.resolve_str(s, ctx),
            Value::Array(items) => items
                .iter()
                .map(|item| self.resolve_value(item, ctx))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Value::Object(map) => {
                let mut out = serde_json::Map::with_capacity(map.len());
                for (key, val) in map {
                    out.insert(key.clone(), self.resolve_value(val, ctx)?);
                }
                Ok(Value::Object(out))
            }
            other => Ok(other.clone()),
        }
    }
}

fn collect_references(value: &Value, paths: &mut Vec<RefPath>) -> Result<(), TemplateError> {
    match value {
        Value::String(s) => paths.extend(TemplateResolver::references(s)?),
        Value::Array(items) => {
            for item in items {
                collect_references(item, paths)?;
            }
        }
        Value::Object(map) => {
            for val in map.values() {
                collect_references(val, paths)?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn interpolate(path: &RefPath, value: &Value) -> Result<String, TemplateError> {
    match value {
        Value::Null => Err(TemplateError::NullInterpolation(path.to_string())),
        Value::String(s) => Ok(s.clone()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Number(n) => Ok(n.to_string()),
        other => Ok(other.to_string()),
    }
}
