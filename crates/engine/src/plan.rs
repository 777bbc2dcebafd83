//! Validation and compilation of workflow definitions.
//!
//! A [`PreparedWorkflow`] is the checked, typed form of a definition: every
//! step config has been parsed into its variant, every placeholder parses,
//! and every reference points at an earlier step that produces output. A
//! workflow that fails here never creates an execution.

use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};

use crate::connection::HttpMethod;
use crate::definition::{RetryOverride, StepDefinition, StepType, WorkflowDefinition};
use crate::error::ValidationError;
use crate::expression::{is_keyword, Expression};
use crate::template::{is_identifier, Alias, RefPath, Segment, TemplateError, TemplateResolver, RESERVED_NAMES};

/// Inclusive range of accepted HTTP statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusRange {
    pub min: u16,
    pub max: u16,
}

impl StatusRange {
    /// Parse `"2xx"`, `"404"` or `"400-499"`.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let raw = raw.trim();
        let range = if let Some(class) = raw.strip_suffix("xx").or_else(|| raw.strip_suffix("XX")) {
            let digit = match class.as_bytes() {
                [d @ b'1'..=b'5'] => u16::from(d - b'0'),
                _ => return Err(format!("invalid status class '{raw}'")),
            };
            Self {
                min: digit * 100,
                max: digit * 100 + 99,
            }
        } else if let Some((lo, hi)) = raw.split_once('-') {
            let min = lo.trim().parse().map_err(|_| format!("invalid status range '{raw}'"))?;
            let max = hi.trim().parse().map_err(|_| format!("invalid status range '{raw}'"))?;
            Self { min, max }
        } else {
            let status = raw.parse().map_err(|_| format!("invalid status '{raw}'"))?;
            Self {
                min: status,
                max: status,
            }
        };

        if range.min < 100 || range.max > 599 || range.min > range.max {
            return Err(format!("status range '{raw}' is outside 100-599"));
        }
        Ok(range)
    }

    pub fn contains(&self, status: u16) -> bool {
        (self.min..=self.max).contains(&status)
    }
}

/// How the response body becomes step output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseFormat {
    /// Parse JSON, falling back to text.
    #[default]
    Json,
    /// Return the body as text.
    Text,
    /// Return the body base64-encoded.
    Binary,
}

/// Where an API call goes, before template resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetTemplate {
    Url(String),
    Path(String),
}

/// A checked API call step.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiCallStep {
    pub method: HttpMethod,
    pub target: TargetTemplate,
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, Value)>,
    pub body: Option<Value>,
    pub accept_status: Vec<StatusRange>,
    pub timeout_ms: Option<u64>,
    pub response_format: ResponseFormat,
}

impl ApiCallStep {
    /// Whether a status counts as success. Without explicit ranges only 2xx
    /// is accepted.
    pub fn accepts(&self, status: u16) -> bool {
        if self.accept_status.is_empty() {
            (200..300).contains(&status)
        } else {
            self.accept_status.iter().any(|r| r.contains(status))
        }
    }
}

/// Dotted path inside the object a transform builds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath(pub Vec<String>);

impl FieldPath {
    pub fn parse(raw: &str) -> Result<Self, String> {
        let segments: Vec<String> = raw.split('.').map(str::to_string).collect();
        if segments.iter().any(|s| s.trim().is_empty()) {
            return Err(format!("invalid field path '{raw}'"));
        }
        Ok(Self(segments))
    }
}

impl std::fmt::Display for FieldPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0.join("."))
    }
}

/// One transform operation.
#[derive(Debug, Clone)]
pub enum MappingOp {
    /// Copy a referenced value into the output.
    Copy { from: RefPath, to: FieldPath },
    /// Assign a literal; placeholders inside strings are resolved.
    Set { to: FieldPath, value: Value },
    /// Move a field within the output.
    Rename { from: FieldPath, to: FieldPath },
    /// Delete a field from the output.
    Remove { path: FieldPath },
    /// Assign the result of an expression.
    Compute { to: FieldPath, expr: Expression },
}

/// A checked transform step.
#[derive(Debug, Clone)]
pub struct TransformStep {
    pub base: Option<RefPath>,
    pub ops: Vec<MappingOp>,
}

/// A checked condition step.
#[derive(Debug, Clone)]
pub struct ConditionStep {
    pub expression: Expression,
}

/// Typed step variants.
#[derive(Debug, Clone)]
pub enum StepKind {
    ApiCall(ApiCallStep),
    Transform(TransformStep),
    Condition(ConditionStep),
}

impl StepKind {
    pub fn step_type(&self) -> StepType {
        match self {
            StepKind::ApiCall(_) => StepType::ApiCall,
            StepKind::Transform(_) => StepType::Transform,
            StepKind::Condition(_) => StepType::Condition,
        }
    }

    /// Whether the step stores an output other steps can reference.
    pub fn produces_output(&self) -> bool {
        !matches!(self, StepKind::Condition(_))
    }
}

#[derive(Debug, Clone)]
pub struct PreparedStep {
    pub index: usize,
    pub name: String,
    pub kind: StepKind,
    pub retry: Option<RetryOverride>,
}

/// A validated workflow, ready to execute.
#[derive(Debug, Clone)]
pub struct PreparedWorkflow {
    pub id: String,
    pub name: String,
    pub timeout_ms: Option<u64>,
    pub connection_id: Option<String>,
    pub steps: Vec<PreparedStep>,
}

impl PreparedWorkflow {
    /// Check a definition and compile its steps.
    pub fn compile(definition: &WorkflowDefinition) -> Result<Self, ValidationError> {
        if definition.id.trim().is_empty() {
            return Err(ValidationError::Workflow("workflow id is empty".to_string()));
        }
        if definition.timeout_ms == Some(0) {
            return Err(ValidationError::Workflow(
                "timeout_ms must be greater than zero".to_string(),
            ));
        }
        if definition.steps.is_empty() {
            return Err(ValidationError::NoSteps(definition.id.clone()));
        }

        let mut seen = HashSet::new();
        let mut steps: Vec<PreparedStep> = Vec::with_capacity(definition.steps.len());
        for (position, step) in definition.steps.iter().enumerate() {
            check_name(step)?;
            if !seen.insert(step.name.as_str()) {
                return Err(ValidationError::DuplicateStep(step.name.clone()));
            }
            if let Some(index) = step.index {
                if index != position {
                    return Err(ValidationError::step(
                        &step.name,
                        format!("index {index} does not match position {position}"),
                    ));
                }
            }
            if let Some(retry) = &step.retry {
                if retry.max_attempts == Some(0) {
                    return Err(ValidationError::step(&step.name, "retry.max_attempts must be at least 1"));
                }
            }

            let kind = compile_kind(step)?;
            check_references(&step.name, &references(&kind)?, &steps)?;

            steps.push(PreparedStep {
                index: position,
                name: step.name.clone(),
                kind,
                retry: step.retry,
            });
        }

        Ok(Self {
            id: definition.id.clone(),
            name: if definition.name.is_empty() {
                definition.id.clone()
            } else {
                definition.name.clone()
            },
            timeout_ms: definition.timeout_ms,
            connection_id: definition.connection_id.clone(),
            steps,
        })
    }

    pub fn total_steps(&self) -> usize {
        self.steps.len()
    }
}

fn check_name(step: &StepDefinition) -> Result<(), ValidationError> {
    if !is_identifier(&step.name) {
        return Err(ValidationError::step(
            &step.name,
            "step names must start with a letter or '_' and contain only letters, digits and '_'",
        ));
    }
    if RESERVED_NAMES.contains(&step.name.as_str()) {
        return Err(ValidationError::step(&step.name, "step name is reserved"));
    }
    if is_keyword(&step.name) {
        return Err(ValidationError::step(
            &step.name,
            "step name is an expression keyword and could not be referenced in conditions",
        ));
    }
    Ok(())
}

fn compile_kind(step: &StepDefinition) -> Result<StepKind, ValidationError> {
    let invalid = |message: String| ValidationError::step(&step.name, message);
    match step.step_type {
        StepType::ApiCall => compile_api_call(&step.config).map(StepKind::ApiCall).map_err(invalid),
        StepType::Transform => compile_transform(&step.config)
            .map(StepKind::Transform)
            .map_err(invalid),
        StepType::Condition => compile_condition(&step.config)
            .map(StepKind::Condition)
            .map_err(invalid),
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ApiCallConfig {
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    #[serde(default)]
    query: BTreeMap<String, Value>,
    #[serde(default)]
    body: Option<Value>,
    #[serde(default)]
    accept_status: Vec<String>,
    #[serde(default)]
    timeout_ms: Option<u64>,
    #[serde(default)]
    response_type: ResponseFormat,
}

fn compile_api_call(config: &Value) -> Result<ApiCallStep, String> {
    let config: ApiCallConfig =
        serde_json::from_value(config.clone()).map_err(|e| format!("invalid api_call config: {e}"))?;

    let method = match &config.method {
        Some(m) => m.parse::<HttpMethod>()?,
        None => HttpMethod::GET,
    };

    let target = match (config.url, config.path) {
        (Some(url), None) => TargetTemplate::Url(url),
        (None, Some(path)) => TargetTemplate::Path(path),
        (Some(_), Some(_)) => return Err("set either 'url' or 'path', not both".to_string()),
        (None, None) => return Err("one of 'url' or 'path' is required".to_string()),
    };

    if config.timeout_ms == Some(0) {
        return Err("timeout_ms must be greater than zero".to_string());
    }

    for value in config.query.values() {
        if value.is_object() || value.is_array() {
            return Err("query values must be scalars".to_string());
        }
    }

    let accept_status = config
        .accept_status
        .iter()
        .map(|raw| StatusRange::parse(raw))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ApiCallStep {
        method,
        target,
        headers: config.headers.into_iter().collect(),
        query: config.query.into_iter().collect(),
        body: config.body,
        accept_status,
        timeout_ms: config.timeout_ms,
        response_format: config.response_type,
    })
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct TransformConfig {
    #[serde(default)]
    base: Option<String>,
    #[serde(default)]
    mapping: Vec<MappingConfig>,
}

#[derive(Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum MappingConfig {
    Copy { from: String, to: String },
    Set { to: String, value: Value },
    Rename { from: String, to: String },
    Remove { path: String },
    Compute { to: String, expr: String },
}

/// Accept a reference written either bare or as a single placeholder.
fn parse_reference(raw: &str) -> Result<RefPath, String> {
    let trimmed = raw.trim();
    let inner = trimmed
        .strip_prefix("{{")
        .and_then(|rest| rest.strip_suffix("}}"))
        .unwrap_or(trimmed);
    RefPath::parse(inner).map_err(|e| e.to_string())
}

fn compile_transform(config: &Value) -> Result<TransformStep, String> {
    let config: TransformConfig = if config.is_null() {
        TransformConfig {
            base: None,
            mapping: Vec::new(),
        }
    } else {
        serde_json::from_value(config.clone()).map_err(|e| format!("invalid transform config: {e}"))?
    };

    let base = config.base.as_deref().map(parse_reference).transpose()?;

    let ops = config
        .mapping
        .into_iter()
        .map(|op| -> Result<MappingOp, String> {
            Ok(match op {
                MappingConfig::Copy { from, to } => MappingOp::Copy {
                    from: parse_reference(&from)?,
                    to: FieldPath::parse(&to)?,
                },
                MappingConfig::Set { to, value } => MappingOp::Set {
                    to: FieldPath::parse(&to)?,
                    value,
                },
                MappingConfig::Rename { from, to } => MappingOp::Rename {
                    from: FieldPath::parse(&from)?,
                    to: FieldPath::parse(&to)?,
                },
                MappingConfig::Remove { path } => MappingOp::Remove {
                    path: FieldPath::parse(&path)?,
                },
                MappingConfig::Compute { to, expr } => MappingOp::Compute {
                    to: FieldPath::parse(&to)?,
                    expr: Expression::parse(&expr).map_err(|e| e.to_string())?,
                },
            })
        })
        .collect::<Result<Vec<_>, String>>()?;

    Ok(TransformStep { base, ops })
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ConditionConfig {
    expression: String,
}

fn compile_condition(config: &Value) -> Result<ConditionStep, String> {
    let source = match config {
        Value::String(s) => s.clone(),
        other => {
            serde_json::from_value::<ConditionConfig>(other.clone())
                .map_err(|e| format!("invalid condition config: {e}"))?
                .expression
        }
    };
    let expression = Expression::parse(&source).map_err(|e| e.to_string())?;
    Ok(ConditionStep { expression })
}

/// Every reference a step reads, for static checking.
fn references(kind: &StepKind) -> Result<Vec<RefPath>, ValidationError> {
    let template = |e: TemplateError| ValidationError::Workflow(e.to_string());
    let mut refs = Vec::new();
    match kind {
        StepKind::ApiCall(call) => {
            let target = match &call.target {
                TargetTemplate::Url(t) | TargetTemplate::Path(t) => t,
            };
            refs.extend(TemplateResolver::references(target).map_err(template)?);
            for (_, value) in &call.headers {
                refs.extend(TemplateResolver::references(value).map_err(template)?);
            }
            for (_, value) in &call.query {
                refs.extend(TemplateResolver::references_in(value).map_err(template)?);
            }
            if let Some(body) = &call.body {
                refs.extend(TemplateResolver::references_in(body).map_err(template)?);
            }
        }
        StepKind::Transform(transform) => {
            refs.extend(transform.base.iter().cloned());
            for op in &transform.ops {
                match op {
                    MappingOp::Copy { from, .. } => refs.push(from.clone()),
                    MappingOp::Set { value, .. } => {
                        refs.extend(TemplateResolver::references_in(value).map_err(template)?)
                    }
                    MappingOp::Compute { expr, .. } => refs.extend(expr.references().into_iter().cloned()),
                    MappingOp::Rename { .. } | MappingOp::Remove { .. } => {}
                }
            }
        }
        StepKind::Condition(condition) => {
            refs.extend(condition.expression.references().into_iter().cloned())
        }
    }
    Ok(refs)
}

const EXECUTION_FIELDS: &[&str] = &["id", "workflow_id", "triggered_by"];

fn check_references(
    step: &str,
    refs: &[RefPath],
    earlier: &[PreparedStep],
) -> Result<(), ValidationError> {
    for path in refs {
        let target = match &path.alias {
            Alias::Step(name) => earlier.iter().find(|s| &s.name == name).ok_or_else(|| {
                ValidationError::step(step, format!("references unknown or later step '{name}'"))
            })?,
            Alias::Index(i) => earlier.get(*i).ok_or_else(|| {
                ValidationError::step(step, format!("references unknown or later step index {i}"))
            })?,
            Alias::Previous => earlier
                .iter()
                .rev()
                .find(|s| s.kind.produces_output())
                .ok_or_else(|| {
                    ValidationError::step(step, "previous_step has no earlier step with output")
                })?,
            Alias::Execution => {
                match path.segments.first() {
                    Some(Segment::Key(key)) if EXECUTION_FIELDS.contains(&key.as_str()) => {}
                    None => {}
                    _ => {
                        return Err(ValidationError::step(
                            step,
                            format!("unknown execution field in '{path}'"),
                        ))
                    }
                }
                continue;
            }
        };

        if !target.kind.produces_output() {
            return Err(ValidationError::step(
                step,
                format!("references condition step '{}', which has no output", target.name),
            ));
        }
    }
    Ok(())
}
