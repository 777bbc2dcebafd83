//! Condition step executor.

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::StepExecutor;
use crate::condition::ConditionEvaluator;
use crate::context::ExecutionContext;
use crate::error::StepError;
use crate::plan::ConditionStep;

/// Evaluates a condition step. The output is the boolean outcome.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConditionExecutor {
    evaluator: ConditionEvaluator,
}

impl ConditionExecutor {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StepExecutor for ConditionExecutor {
    type Step = ConditionStep;

    async fn execute(
        &self,
        step: &ConditionStep,
        ctx: &ExecutionContext,
        _cancel: &CancellationToken,
    ) -> Result<Value, StepError> {
        let passed = self
            .evaluator
            .evaluate(&step.expression, ctx)
            .map_err(StepError::Condition)?;
        tracing::debug!(expression = step.expression.source(), passed, "Evaluated condition");
        Ok(Value::Bool(passed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::expression::Expression;
    use serde_json::json;
    use uuid::Uuid;

    fn context() -> ExecutionContext {
        let mut ctx = ExecutionContext::new(Uuid::new_v4(), "wf", "tester");
        ctx.insert(0, "check", json!({"status": 200, "data": {"items": [1, 2]}}));
        ctx
    }

    async fn run(source: &str) -> Result<Value, StepError> {
        let step = ConditionStep {
            expression: Expression::parse(source).unwrap(),
        };
        ConditionExecutor::new()
            .execute(&step, &context(), &CancellationToken::new())
            .await
    }

    #[tokio::test]
    async fn test_condition_outcomes() {
        assert_eq!(run("check.status == 200").await.unwrap(), json!(true));
        assert_eq!(run("check.data.items contains 3").await.unwrap(), json!(false));
    }

    #[tokio::test]
    async fn test_condition_errors_are_terminal() {
        let err = run("check.data.nope == 1").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConditionEvaluation);
        assert!(!err.is_retryable());

        let err = run("check.status < 'abc'").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConditionEvaluation);
    }
}
