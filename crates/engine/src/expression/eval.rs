//! Expression evaluation over JSON values.

use regex::Regex;
use serde_json::{Number, Value};

use super::parser::{ArithOp, CmpOp, Expr, Pattern};
use super::ExpressionError;
use crate::context::ExecutionContext;
use crate::template::type_name;

/// JSON truthiness: null, false, 0, "", [] and {} are false.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn type_error(message: String) -> ExpressionError {
    ExpressionError::Type(message)
}

pub(crate) fn evaluate(expr: &Expr, ctx: &ExecutionContext) -> Result<Value, ExpressionError> {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Ref(path) => Ok(ctx.lookup(path)?),
        Expr::List(items) => items
            .iter()
            .map(|e| evaluate(e, ctx))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Expr::Not(inner) => Ok(Value::Bool(!is_truthy(&evaluate(inner, ctx)?))),
        Expr::Neg(inner) => negate(&evaluate(inner, ctx)?),
        Expr::And(l, r) => {
            if !is_truthy(&evaluate(l, ctx)?) {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(is_truthy(&evaluate(r, ctx)?)))
        }
        Expr::Or(l, r) => {
            if is_truthy(&evaluate(l, ctx)?) {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(is_truthy(&evaluate(r, ctx)?)))
        }
        Expr::Compare { op, left, right } => {
            let left = evaluate(left, ctx)?;
            let right = evaluate(right, ctx)?;
            compare(*op, &left, &right).map(Value::Bool)
        }
        Expr::Arith { op, left, right } => {
            let left = evaluate(left, ctx)?;
            let right = evaluate(right, ctx)?;
            arithmetic(*op, &left, &right)
        }
        Expr::Matches { subject, pattern } => {
            let subject = evaluate(subject, ctx)?;
            let Value::String(text) = &subject else {
                return Err(type_error(format!(
                    "'matches' needs a string, got {}",
                    type_name(&subject)
                )));
            };
            let matched = match pattern {
                Pattern::Compiled(re) => re.is_match(text),
                Pattern::Dynamic(e) => match evaluate(e, ctx)? {
                    Value::String(p) => Regex::new(&p)
                        .map_err(|e| ExpressionError::Regex(e.to_string()))?
                        .is_match(text),
                    other => {
                        return Err(type_error(format!(
                            "'matches' pattern must be a string, got {}",
                            type_name(&other)
                        )))
                    }
                },
            };
            Ok(Value::Bool(matched))
        }
    }
}

/// Equality treats 1 and 1.0 as equal; everything else is structural.
fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => left == right,
    }
}

fn compare(op: CmpOp, left: &Value, right: &Value) -> Result<bool, ExpressionError> {
    match op {
        CmpOp::Eq => Ok(values_equal(left, right)),
        CmpOp::Ne => Ok(!values_equal(left, right)),
        CmpOp::Lt | CmpOp::Le | CmpOp::Gt | CmpOp::Ge => {
            let ordering = match (left, right) {
                (Value::Number(a), Value::Number(b)) => {
                    let (a, b) = (a.as_f64().unwrap_or(f64::NAN), b.as_f64().unwrap_or(f64::NAN));
                    a.partial_cmp(&b)
                }
                (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                _ => None,
            }
            .ok_or_else(|| {
                type_error(format!(
                    "cannot order {} and {}",
                    type_name(left),
                    type_name(right)
                ))
            })?;
            Ok(match op {
                CmpOp::Lt => ordering.is_lt(),
                CmpOp::Le => ordering.is_le(),
                CmpOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            })
        }
        CmpOp::Contains => contains(left, right),
        CmpOp::In => contains(right, left),
        CmpOp::NotIn => contains(right, left).map(|found| !found),
    }
}

fn contains(container: &Value, item: &Value) -> Result<bool, ExpressionError> {
    match (container, item) {
        (Value::String(haystack), Value::String(needle)) => Ok(haystack.contains(needle.as_str())),
        (Value::Array(items), item) => Ok(items.iter().any(|v| values_equal(v, item))),
        (Value::Object(map), Value::String(key)) => Ok(map.contains_key(key)),
        _ => Err(type_error(format!(
            "{} cannot contain {}",
            type_name(container),
            type_name(item)
        ))),
    }
}

fn negate(value: &Value) -> Result<Value, ExpressionError> {
    let Value::Number(n) = value else {
        return Err(type_error(format!("cannot negate {}", type_name(value))));
    };
    if let Some(i) = n.as_i64() {
        if let Some(neg) = i.checked_neg() {
            return Ok(Value::from(neg));
        }
    }
    float_value(-n.as_f64().unwrap_or(f64::NAN))
}

fn float_value(f: f64) -> Result<Value, ExpressionError> {
    Number::from_f64(f)
        .map(Value::Number)
        .ok_or_else(|| type_error("arithmetic result is not a finite number".to_string()))
}

fn arithmetic(op: ArithOp, left: &Value, right: &Value) -> Result<Value, ExpressionError> {
    if let (ArithOp::Add, Value::String(a), Value::String(b)) = (op, left, right) {
        return Ok(Value::String(format!("{a}{b}")));
    }

    let (Value::Number(a), Value::Number(b)) = (left, right) else {
        return Err(type_error(format!(
            "arithmetic needs numbers, got {} and {}",
            type_name(left),
            type_name(right)
        )));
    };

    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        let exact = match op {
            ArithOp::Add => x.checked_add(y),
            ArithOp::Sub => x.checked_sub(y),
            ArithOp::Mul => x.checked_mul(y),
            ArithOp::Div => {
                if y == 0 {
                    return Err(ExpressionError::DivisionByZero);
                }
                if x % y == 0 {
                    x.checked_div(y)
                } else {
                    None
                }
            }
            ArithOp::Rem => {
                if y == 0 {
                    return Err(ExpressionError::DivisionByZero);
                }
                x.checked_rem(y)
            }
        };
        if let Some(n) = exact {
            return Ok(Value::from(n));
        }
    }

    let (x, y) = (
        a.as_f64().unwrap_or(f64::NAN),
        b.as_f64().unwrap_or(f64::NAN),
    );
    let result = match op {
        ArithOp::Add => x + y,
        ArithOp::Sub => x - y,
        ArithOp::Mul => x * y,
        ArithOp::Div | ArithOp::Rem if y == 0.0 => return Err(ExpressionError::DivisionByZero),
        ArithOp::Div => x / y,
        ArithOp::Rem => x % y,
    };
    float_value(result)
}
