//! Bounded expression language shared by condition steps and transform
//! `compute` operations.
//!
//! Supports literals, references to prior step outputs, boolean connectives,
//! comparisons, membership, regex matching and basic arithmetic. There are no
//! function calls, assignments or loops, and expressions are capped in length
//! and nesting depth.

mod eval;
mod lexer;
mod parser;

pub use eval::is_truthy;
pub use lexer::is_keyword;

use serde_json::Value;
use thiserror::Error;

use crate::context::ExecutionContext;
use crate::template::{RefPath, TemplateError};
use parser::{Expr, Parser};

/// Maximum accepted source length in bytes.
pub const MAX_EXPRESSION_LEN: usize = 4096;

/// Maximum nesting of parentheses, lists and unary operators.
pub const MAX_DEPTH: usize = 32;

/// Expression parsing and evaluation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExpressionError {
    #[error("syntax error at offset {position}: {message}")]
    Syntax { position: usize, message: String },

    #[error("expression is {0} bytes, limit is 4096")]
    TooLong(usize),

    #[error("expression nesting exceeds {0} levels")]
    TooDeep(usize),

    /// A referenced value could not be resolved.
    #[error(transparent)]
    Reference(#[from] TemplateError),

    #[error("type error: {0}")]
    Type(String),

    #[error("division by zero")]
    DivisionByZero,

    #[error("invalid regex: {0}")]
    Regex(String),
}

/// A parsed expression, ready to evaluate any number of times.
#[derive(Debug, Clone)]
pub struct Expression {
    source: String,
    root: Expr,
}

impl Expression {
    /// Parse an expression.
    pub fn parse(source: &str) -> Result<Self, ExpressionError> {
        if source.len() > MAX_EXPRESSION_LEN {
            return Err(ExpressionError::TooLong(source.len()));
        }
        let tokens = lexer::tokenize(source)?;
        let root = Parser::new(tokens, source.len()).parse()?;
        Ok(Self {
            source: source.to_string(),
            root,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Every reference the expression reads.
    pub fn references(&self) -> Vec<&RefPath> {
        let mut refs = Vec::new();
        self.root.collect_refs(&mut refs);
        refs
    }

    /// Evaluate to a JSON value.
    pub fn evaluate(&self, ctx: &ExecutionContext) -> Result<Value, ExpressionError> {
        eval::evaluate(&self.root, ctx)
    }

    /// Evaluate and apply truthiness.
    pub fn evaluate_bool(&self, ctx: &ExecutionContext) -> Result<bool, ExpressionError> {
        self.evaluate(ctx).map(|v| is_truthy(&v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn context() -> ExecutionContext {
        let mut ctx = ExecutionContext::new(Uuid::nil(), "wf", "tester");
        ctx.insert(
            0,
            "fetch",
            json!({"status": 200, "data": {"count": 4, "price": 2.5, "name": "Widget-42", "tags": ["new", "sale"], "note": null}}),
        );
        ctx
    }

    fn eval(source: &str) -> Result<Value, ExpressionError> {
        Expression::parse(source)?.evaluate(&context())
    }

    #[test]
    fn test_comparisons_and_connectives() {
        assert_eq!(eval("fetch.status == 200").unwrap(), json!(true));
        assert_eq!(eval("fetch.status >= 200 and fetch.status < 300").unwrap(), json!(true));
        assert_eq!(eval("fetch.data.count > 10 || fetch.data.count == 4").unwrap(), json!(true));
        assert_eq!(eval("not (fetch.data.count > 1)").unwrap(), json!(false));
        assert_eq!(eval("!fetch.data.note").unwrap(), json!(true));
    }

    #[test]
    fn test_membership_and_regex() {
        assert_eq!(eval("'sale' in fetch.data.tags").unwrap(), json!(true));
        assert_eq!(eval("'old' not in fetch.data.tags").unwrap(), json!(true));
        assert_eq!(eval("fetch.data.name contains 'dget'").unwrap(), json!(true));
        assert_eq!(eval("fetch.data.name matches '^Widget-[0-9]+$'").unwrap(), json!(true));
        assert_eq!(eval("fetch.status in [200, 201]").unwrap(), json!(true));
    }

    #[test]
    fn test_arithmetic_and_concat() {
        assert_eq!(eval("fetch.data.count * fetch.data.price").unwrap(), json!(10.0));
        assert_eq!(eval("fetch.data.count + 1 - 2 * 3").unwrap(), json!(-1));
        assert_eq!(eval("(fetch.data.count + 2) % 4").unwrap(), json!(2));
        assert_eq!(eval("'id-' + fetch.data.name").unwrap(), json!("id-Widget-42"));
        assert_eq!(eval("-fetch.data.count").unwrap(), json!(-4));
    }

    #[test]
    fn test_placeholder_references() {
        assert_eq!(eval("{{ previous_step.status }} == 200").unwrap(), json!(true));
        assert_eq!(eval("{{ steps.0.data.count }} == 4").unwrap(), json!(true));
    }

    #[test]
    fn test_bare_operand_truthiness() {
        let expr = Expression::parse("fetch.data.tags").unwrap();
        assert!(expr.evaluate_bool(&context()).unwrap());
        let expr = Expression::parse("fetch.data.note").unwrap();
        assert!(!expr.evaluate_bool(&context()).unwrap());
    }

    #[test]
    fn test_evaluation_errors() {
        assert!(matches!(eval("fetch.data.missing == 1"), Err(ExpressionError::Reference(_))));
        assert!(matches!(eval("fetch.data.name > 3"), Err(ExpressionError::Type(_))));
        assert_eq!(eval("fetch.data.count / 0"), Err(ExpressionError::DivisionByZero));
        assert!(matches!(eval("fetch.data.tags + 1"), Err(ExpressionError::Type(_))));
    }

    #[test]
    fn test_short_circuit_skips_missing_reference() {
        assert_eq!(eval("false and fetch.data.missing").unwrap(), json!(false));
        assert_eq!(eval("true or fetch.data.missing").unwrap(), json!(true));
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(Expression::parse(""), Err(ExpressionError::Syntax { .. })));
        assert!(matches!(Expression::parse("a =="), Err(ExpressionError::Syntax { .. })));
        assert!(matches!(Expression::parse("(a == 1"), Err(ExpressionError::Syntax { .. })));
        assert!(matches!(Expression::parse("a == 1 b"), Err(ExpressionError::Syntax { .. })));
        assert!(matches!(Expression::parse("a matches '('"), Err(ExpressionError::Regex(_))));
        assert!(matches!(Expression::parse("1abc"), Err(ExpressionError::Syntax { .. })));
    }

    #[test]
    fn test_limits() {
        let long = "1 + ".repeat(1100) + "1";
        assert!(matches!(Expression::parse(&long), Err(ExpressionError::TooLong(_))));

        let deep = format!("{}1{}", "(".repeat(40), ")".repeat(40));
        assert_eq!(Expression::parse(&deep).unwrap_err(), ExpressionError::TooDeep(MAX_DEPTH));

        let ok = format!("{}1{}", "(".repeat(10), ")".repeat(10));
        assert!(Expression::parse(&ok).is_ok());
    }

    #[test]
    fn test_references() {
        let expr = Expression::parse("fetch.status == 200 and {{ other.flag }}").unwrap();
        let names: Vec<_> = expr.references().iter().filter_map(|r| r.step_name()).collect();
        assert_eq!(names, vec!["fetch", "other"]);
    }
}
