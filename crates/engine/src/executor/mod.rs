//! Step executors.
//!
//! One executor per step variant. Each receives a checked step, the current
//! context and the execution's cancellation token, and returns the step's
//! output or a classified [`StepError`].

mod api_call;
mod condition;
mod transform;

pub use api_call::ApiCallExecutor;
pub use condition::ConditionExecutor;
pub use transform::TransformExecutor;

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::connection::ConnectionClient;
use crate::context::ExecutionContext;
use crate::error::StepError;
use crate::plan::StepKind;

/// Executes one kind of step.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    /// The checked step this executor runs.
    type Step: Send + Sync;

    /// Run a single attempt of the step.
    async fn execute(
        &self,
        step: &Self::Step,
        ctx: &ExecutionContext,
        cancel: &CancellationToken,
    ) -> Result<Value, StepError>;
}

/// Result of a successful step attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// Data to store in the context.
    Output(Value),
    /// Outcome of a condition; never stored in the context.
    Branch(bool),
}

/// The executor set used by one execution.
pub struct Executors {
    api_call: ApiCallExecutor,
    transform: TransformExecutor,
    condition: ConditionExecutor,
}

impl Executors {
    /// Executors whose API calls go through `client`.
    pub fn new(client: Arc<dyn ConnectionClient>, call_timeout: Duration) -> Self {
        Self {
            api_call: ApiCallExecutor::new(client, call_timeout),
            transform: TransformExecutor::new(),
            condition: ConditionExecutor::new(),
        }
    }

    /// Dispatch a step to the executor for its variant.
    pub async fn execute(
        &self,
        kind: &StepKind,
        ctx: &ExecutionContext,
        cancel: &CancellationToken,
    ) -> Result<StepOutcome, StepError> {
        match kind {
            StepKind::ApiCall(step) => self
                .api_call
                .execute(step, ctx, cancel)
                .await
                .map(StepOutcome::Output),
            StepKind::Transform(step) => self
                .transform
                .execute(step, ctx, cancel)
                .await
                .map(StepOutcome::Output),
            StepKind::Condition(step) => {
                let value = self.condition.execute(step, ctx, cancel).await?;
                Ok(StepOutcome::Branch(value.as_bool().unwrap_or(false)))
            }
        }
    }
}

#[cfg(test)]
pub(crate) use api_call::tests;
