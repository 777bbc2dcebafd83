//! Execution context: the ordered outputs of the steps run so far.

use serde_json::{json, Value};
use uuid::Uuid;

use crate::template::{type_name, Alias, RefPath, Segment, TemplateError};

/// Output produced by one completed step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutput {
    pub index: usize,
    pub name: String,
    pub value: Value,
}

/// Transient per-execution state consulted by templates and expressions.
///
/// Owned by the execution's runner task and dropped when the execution
/// reaches a terminal state. Condition steps never add outputs.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    execution_id: Uuid,
    workflow_id: String,
    triggered_by: String,
    outputs: Vec<StepOutput>,
}

impl ExecutionContext {
    /// Create an empty context for an execution.
    pub fn new(
        execution_id: Uuid,
        workflow_id: impl Into<String>,
        triggered_by: impl Into<String>,
    ) -> Self {
        Self {
            execution_id,
            workflow_id: workflow_id.into(),
            triggered_by: triggered_by.into(),
            outputs: Vec::new(),
        }
    }

    pub fn execution_id(&self) -> Uuid {
        self.execution_id
    }

    /// Record a step's output. Outputs are kept in step order.
    pub fn insert(&mut self, index: usize, name: impl Into<String>, value: Value) {
        self.outputs.push(StepOutput {
            index,
            name: name.into(),
            value,
        });
    }

    /// Output of a step by name.
    pub fn by_name(&self, name: &str) -> Option<&Value> {
        self.outputs
            .iter()
            .find(|o| o.name == name)
            .map(|o| &o.value)
    }

    /// Output of a step by its 0-based index.
    pub fn by_index(&self, index: usize) -> Option<&Value> {
        self.outputs
            .iter()
            .find(|o| o.index == index)
            .map(|o| &o.value)
    }

    /// The most recent output.
    pub fn previous(&self) -> Option<&StepOutput> {
        self.outputs.last()
    }

    pub fn outputs(&self) -> &[StepOutput] {
        &self.outputs
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    fn metadata(&self) -> Value {
        json!({
            "id": self.execution_id.to_string(),
            "workflow_id": self.workflow_id,
            "triggered_by": self.triggered_by,
        })
    }

    /// Resolve a reference path to a value. Fails closed on any missing step
    /// or field.
    pub fn lookup(&self, path: &RefPath) -> Result<Value, TemplateError> {
        let metadata;
        let root = match &path.alias {
            Alias::Step(name) => self
                .by_name(name)
                .ok_or_else(|| TemplateError::UnknownStep(name.clone()))?,
            Alias::Index(i) => self
                .by_index(*i)
                .ok_or_else(|| TemplateError::UnknownStep(format!("steps.{i}")))?,
            Alias::Previous => {
                &self
                    .previous()
                    .ok_or_else(|| TemplateError::UnknownStep("previous_step".to_string()))?
                    .value
            }
            Alias::Execution => {
                metadata = self.metadata();
                &metadata
            }
        };

        let mut current = root;
        let mut walked = match &path.alias {
            Alias::Step(name) => name.clone(),
            Alias::Index(i) => format!("steps.{i}"),
            Alias::Previous => "previous_step".to_string(),
            Alias::Execution => "execution".to_string(),
        };

        for segment in &path.segments {
            let field = segment.to_string();
            let next = match (current, segment) {
                (Value::Object(map), Segment::Key(key)) => map.get(key),
                (Value::Object(map), Segment::Index(i)) => map.get(&i.to_string()),
                (Value::Array(items), Segment::Index(i)) => items.get(*i),
                (other, _) => {
                    return Err(TemplateError::WrongType {
                        path: walked,
                        field,
                        found: type_name(other),
                    })
                }
            };
            current = next.ok_or_else(|| TemplateError::MissingField {
                path: walked.clone(),
                field: field.clone(),
            })?;
            walked.push('.');
            walked.push_str(&field);
        }

        Ok(current.clone())
    }
}
