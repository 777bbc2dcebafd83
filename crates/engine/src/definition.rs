//! Workflow definitions as supplied by the authoring service.
//!
//! These types mirror the stored document. They are checked and compiled into
//! a [`PreparedWorkflow`](crate::plan::PreparedWorkflow) before anything runs.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ValidationError;

/// A user-authored workflow: an ordered list of typed steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Workflow identifier. May be left out of a stored document whose
    /// location already names it.
    #[serde(default)]
    pub id: String,

    /// Display name.
    #[serde(default)]
    pub name: String,

    /// Overall execution deadline, measured from start.
    #[serde(default, alias = "timeoutMs", skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,

    /// Selects a pre-authenticated HTTP client.
    #[serde(default, alias = "connectionId", skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<String>,

    /// Steps in execution order.
    #[serde(default)]
    pub steps: Vec<StepDefinition>,
}

impl WorkflowDefinition {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            timeout_ms: None,
            connection_id: None,
            steps: Vec::new(),
        }
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_connection(mut self, connection_id: impl Into<String>) -> Self {
        self.connection_id = Some(connection_id.into());
        self
    }

    /// Append a step. Its index is its position.
    pub fn with_step(mut self, mut step: StepDefinition) -> Self {
        step.index = Some(self.steps.len());
        self.steps.push(step);
        self
    }

    /// Parse a YAML document.
    pub fn from_yaml(source: &str) -> Result<Self, ValidationError> {
        serde_yaml::from_str(source).map_err(|e| ValidationError::Workflow(e.to_string()))
    }

    /// Parse a JSON document.
    pub fn from_json(source: &str) -> Result<Self, ValidationError> {
        serde_json::from_str(source).map_err(|e| ValidationError::Workflow(e.to_string()))
    }
}

/// Step variants. The set is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    #[serde(alias = "ApiCall", alias = "api")]
    ApiCall,
    #[serde(alias = "Transform")]
    Transform,
    #[serde(alias = "Condition")]
    Condition,
}

impl StepType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepType::ApiCall => "api_call",
            StepType::Transform => "transform",
            StepType::Condition => "condition",
        }
    }
}

impl std::fmt::Display for StepType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One step as authored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDefinition {
    /// Position in the workflow. Must equal the actual position if present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,

    pub name: String,

    #[serde(rename = "type")]
    pub step_type: StepType,

    /// Variant-specific configuration; see the `plan` module for the shapes.
    #[serde(default)]
    pub config: Value,

    /// Per-step retry override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryOverride>,
}

impl StepDefinition {
    pub fn new(name: impl Into<String>, step_type: StepType, config: Value) -> Self {
        Self {
            index: None,
            name: name.into(),
            step_type,
            config,
            retry: None,
        }
    }

    pub fn api_call(name: impl Into<String>, config: Value) -> Self {
        Self::new(name, StepType::ApiCall, config)
    }

    pub fn transform(name: impl Into<String>, config: Value) -> Self {
        Self::new(name, StepType::Transform, config)
    }

    pub fn condition(name: impl Into<String>, expression: impl Into<String>) -> Self {
        Self::new(
            name,
            StepType::Condition,
            serde_json::json!({ "expression": expression.into() }),
        )
    }

    pub fn with_retry(mut self, retry: RetryOverride) -> Self {
        self.retry = Some(retry);
        self
    }
}

/// Per-step override of the engine's retry defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_delay_ms: Option<u64>,
}
