//! Condition evaluation for branch steps.

use crate::context::ExecutionContext;
use crate::expression::{Expression, ExpressionError};

/// Evaluates boolean branch expressions against an execution's outputs.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConditionEvaluator;

impl ConditionEvaluator {
    pub fn new() -> Self {
        Self
    }

    /// Evaluate a parsed expression. Non-boolean results use truthiness.
    pub fn evaluate(&self, expr: &Expression, ctx: &ExecutionContext) -> Result<bool, ExpressionError> {
        expr.evaluate_bool(ctx)
    }

    /// Parse and evaluate in one call.
    pub fn evaluate_str(&self, source: &str, ctx: &ExecutionContext) -> Result<bool, ExpressionError> {
        self.evaluate(&Expression::parse(source)?, ctx)
    }
}
