//! Transform step executor.
//!
//! Builds a JSON object from an optional base value and an ordered list of
//! mapping operations. Nothing here evaluates host code; computed fields go
//! through the bounded expression language.

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use super::StepExecutor;
use crate::context::ExecutionContext;
use crate::error::StepError;
use crate::expression::ExpressionError;
use crate::plan::{FieldPath, MappingOp, TransformStep};
use crate::template::{type_name, TemplateResolver};

#[derive(Debug, Default, Clone, Copy)]
pub struct TransformExecutor {
    resolver: TemplateResolver,
}

impl TransformExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a transform to the context and return the built object.
    pub fn apply(&self, step: &TransformStep, ctx: &ExecutionContext) -> Result<Value, StepError> {
        let mut output = match &step.base {
            Some(base) => match ctx.lookup(base)? {
                Value::Object(map) => map,
                other => {
                    return Err(StepError::Transform(format!(
                        "base '{base}' must be an object, found {}",
                        type_name(&other)
                    )))
                }
            },
            None => Map::new(),
        };

        for op in &step.ops {
            match op {
                MappingOp::Copy { from, to } => {
                    let value = ctx.lookup(from)?;
                    set_path(&mut output, to, value)?;
                }
                MappingOp::Set { to, value } => {
                    let value = self.resolver.resolve_value(value, ctx)?;
                    set_path(&mut output, to, value)?;
                }
                MappingOp::Rename { from, to } => {
                    let value = take_path(&mut output, from)
                        .ok_or_else(|| StepError::Transform(format!("cannot rename missing field '{from}'")))?;
                    set_path(&mut output, to, value)?;
                }
                MappingOp::Remove { path } => {
                    take_path(&mut output, path);
                }
                MappingOp::Compute { to, expr } => {
                    let value = expr.evaluate(ctx).map_err(|e| match e {
                        ExpressionError::Reference(t) => StepError::Template(t),
                        other => StepError::Transform(format!("'{to}': {other}")),
                    })?;
                    set_path(&mut output, to, value)?;
                }
            }
        }

        Ok(Value::Object(output))
    }
}

/// Assign a value, creating intermediate objects.
fn set_path(root: &mut Map<String, Value>, path: &FieldPath, value: Value) -> Result<(), StepError> {
    let Some((last, parents)) = path.0.split_last() else {
        return Err(StepError::Transform("empty target path".into()));
    };

    let mut current = root;
    for segment in parents {
        let entry = current
            .entry(segment.clone())
            .or_insert_with(|| Value::Object(Map::new()));
        current = match entry {
            Value::Object(map) => map,
            other => {
                return Err(StepError::Transform(format!(
                    "cannot assign '{path}': '{segment}' is {}",
                    type_name(other)
                )))
            }
        };
    }
    current.insert(last.clone(), value);
    Ok(())
}

/// Remove and return a value, if present.
fn take_path(root: &mut Map<String, Value>, path: &FieldPath) -> Option<Value> {
    let (last, parents) = path.0.split_last()?;
    let mut current = root;
    for segment in parents {
        current = current.get_mut(segment)?.as_object_mut()?;
    }
    current.remove(last)
}

#[async_trait]
impl StepExecutor for TransformExecutor {
    type Step = TransformStep;

    async fn execute(
        &self,
        step: &TransformStep,
        ctx: &ExecutionContext,
        _cancel: &CancellationToken,
    ) -> Result<Value, StepError> {
        self.apply(step, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::Expression;
    use crate::template::RefPath;
    use serde_json::json;
    use uuid::Uuid;

    fn context() -> ExecutionContext {
        let mut ctx = ExecutionContext::new(Uuid::new_v4(), "wf", "tester");
        ctx.insert(
            0,
            "fetch",
            json!({"status": 200, "data": {"price": 10, "qty": 3, "sku": "A-1", "tags": ["x"]}}),
        );
        ctx
    }

    fn path(raw: &str) -> FieldPath {
        FieldPath::parse(raw).unwrap()
    }

    #[test]
    fn test_mapping_operations() {
        let step = TransformStep {
            base: Some(RefPath::parse("fetch.data").unwrap()),
            ops: vec![
                MappingOp::Copy {
                    from: RefPath::parse("fetch.status").unwrap(),
                    to: path("meta.status"),
                },
                MappingOp::Set {
                    to: path("meta.label"),
                    value: json!("sku {{ fetch.data.sku }}"),
                },
                MappingOp::Rename {
                    from: path("sku"),
                    to: path("id"),
                },
                MappingOp::Remove { path: path("tags") },
                MappingOp::Compute {
                    to: path("total"),
                    expr: Expression::parse("fetch.data.price * fetch.data.qty").unwrap(),
                },
            ],
        };

        let output = TransformExecutor::new().apply(&step, &context()).unwrap();
        assert_eq!(
            output,
            json!({
                "price": 10,
                "qty": 3,
                "id": "A-1",
                "total": 30,
                "meta": {"status": 200, "label": "sku A-1"}
            })
        );
    }

    #[test]
    fn test_base_must_be_object() {
        let step = TransformStep {
            base: Some(RefPath::parse("fetch.status").unwrap()),
            ops: Vec::new(),
        };
        let err = TransformExecutor::new().apply(&step, &context()).unwrap_err();
        assert!(matches!(err, StepError::Transform(_)));
    }

    #[test]
    fn test_missing_reference_is_template_error() {
        let step = TransformStep {
            base: None,
            ops: vec![MappingOp::Compute {
                to: path("x"),
                expr: Expression::parse("fetch.data.missing + 1").unwrap(),
            }],
        };
        let err = TransformExecutor::new().apply(&step, &context()).unwrap_err();
        assert!(matches!(err, StepError::Template(_)));
    }

    #[test]
    fn test_assign_through_scalar_fails() {
        let step = TransformStep {
            base: None,
            ops: vec![
                MappingOp::Set {
                    to: path("a"),
                    value: json!(1),
                },
                MappingOp::Set {
                    to: path("a.b"),
                    value: json!(2),
                },
            ],
        };
        let err = TransformExecutor::new().apply(&step, &context()).unwrap_err();
        assert!(matches!(err, StepError::Transform(_)));
    }

    #[test]
    fn test_rename_missing_field_fails_and_remove_missing_is_noop() {
        let executor = TransformExecutor::new();
        let remove = TransformStep {
            base: None,
            ops: vec![MappingOp::Remove { path: path("nothing.here") }],
        };
        assert_eq!(executor.apply(&remove, &context()).unwrap(), json!({}));

        let rename = TransformStep {
            base: None,
            ops: vec![MappingOp::Rename {
                from: path("ghost"),
                to: path("x"),
            }],
        };
        assert!(executor.apply(&rename, &context()).is_err());
    }
}
