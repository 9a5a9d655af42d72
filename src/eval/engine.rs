//! String / integer / boolean evaluators
//!
//! Three mutually recursive evaluators mirror the three value contexts an
//! expression can appear in. Integer arithmetic is `u32` with C-like wrapping
//! on add/subtract/negate and truncating division, for compatibility with
//! deployed data-model expressions.
//!
//! A `None` result is not an error: it means a guard suppressed the value.
//! Absent operands propagate outwards, so `(X ? Y) ++ Z` is absent as a whole
//! when `X` is false.

use super::context::ValueResolver;
use crate::ast::{BinaryOperator, ExpressionNode, UnaryOperator};
use crate::error::{DmResult, Fault};
use chrono::{DateTime, NaiveDateTime, Utc};

/// Evaluate an expression to its string form
pub fn eval(
    expr: &ExpressionNode,
    resolver: &mut dyn ValueResolver,
    dest: &str,
) -> DmResult<Option<String>> {
    match expr {
        ExpressionNode::StringLiteral(s) => Ok(Some(s.clone())),
        ExpressionNode::Number(n) => Ok(Some(n.to_string())),
        ExpressionNode::Identifier(name) => resolver.get_value(name, dest).map(Some),
        ExpressionNode::Unary { op, operand } => match op {
            UnaryOperator::Not => Ok(eval_bool(operand, resolver, dest)?
                .map(|b| if b { "0" } else { "1" }.to_string())),
            _ => Ok(eval_uint(expr, resolver, dest)?.map(|n| n.to_string())),
        },
        ExpressionNode::Binary { op, left, right } => match op {
            BinaryOperator::Cons => join_pair(left, right, resolver, dest, ":"),
            BinaryOperator::Concat => join_pair(left, right, resolver, dest, ""),
            BinaryOperator::Or
            | BinaryOperator::And
            | BinaryOperator::LessThan
            | BinaryOperator::LessThanOrEqual
            | BinaryOperator::GreaterThan
            | BinaryOperator::GreaterThanOrEqual
            | BinaryOperator::Equal
            | BinaryOperator::NotEqual => Ok(eval_bool(expr, resolver, dest)?
                .map(|b| if b { "1" } else { "0" }.to_string())),
            BinaryOperator::Add
            | BinaryOperator::Subtract
            | BinaryOperator::Multiply
            | BinaryOperator::Divide => {
                Ok(eval_uint(expr, resolver, dest)?.map(|n| n.to_string()))
            }
        },
        ExpressionNode::Guard { condition, body } => {
            match eval_bool(condition, resolver, dest)? {
                Some(true) => eval(body, resolver, dest),
                _ => Ok(None),
            }
        }
        ExpressionNode::Call { .. } => eval_call(expr, resolver, dest),
        ExpressionNode::List(items) => {
            let mut parts = Vec::with_capacity(items.len());
            for item in items {
                if let Some(value) = eval(item, resolver, dest)? {
                    parts.push(value);
                }
            }
            if parts.is_empty() {
                Ok(None)
            } else {
                Ok(Some(parts.join(",")))
            }
        }
    }
}

/// Evaluate an expression as an unsigned integer (wrapping semantics)
pub fn eval_uint(
    expr: &ExpressionNode,
    resolver: &mut dyn ValueResolver,
    dest: &str,
) -> DmResult<Option<u32>> {
    match expr {
        ExpressionNode::Number(n) => Ok(Some(*n)),
        ExpressionNode::Unary { op, operand } => {
            let Some(value) = eval_uint(operand, resolver, dest)? else {
                return Ok(None);
            };
            Ok(Some(match op {
                UnaryOperator::Plus => value,
                UnaryOperator::Minus => value.wrapping_neg(),
                UnaryOperator::Not => u32::from(value == 0),
            }))
        }
        ExpressionNode::Binary { op, left, right } if is_arithmetic(*op) => {
            let (Some(a), Some(b)) = (
                eval_uint(left, resolver, dest)?,
                eval_uint(right, resolver, dest)?,
            ) else {
                return Ok(None);
            };
            let result = match op {
                BinaryOperator::Add => a.wrapping_add(b),
                BinaryOperator::Subtract => a.wrapping_sub(b),
                BinaryOperator::Multiply => a.wrapping_mul(b),
                BinaryOperator::Divide => {
                    if b == 0 {
                        return Err(Fault::internal(format!("division by zero in `{expr}`")));
                    }
                    a / b
                }
                _ => unreachable!(),
            };
            Ok(Some(result))
        }
        _ => match eval(expr, resolver, dest)? {
            None => Ok(None),
            Some(text) => parse_uint(&text)
                .map(Some)
                .ok_or_else(|| Fault::InvalidParameterValue {
                    name: dest.to_string(),
                    value: text,
                }),
        },
    }
}

/// Evaluate an expression as a boolean
pub fn eval_bool(
    expr: &ExpressionNode,
    resolver: &mut dyn ValueResolver,
    dest: &str,
) -> DmResult<Option<bool>> {
    match expr {
        ExpressionNode::Unary {
            op: UnaryOperator::Not,
            operand,
        } => Ok(eval_bool(operand, resolver, dest)?.map(|b| !b)),
        ExpressionNode::Binary { op, left, right } => match op {
            BinaryOperator::And => match eval_bool(left, resolver, dest)? {
                Some(true) => eval_bool(right, resolver, dest),
                other => Ok(other),
            },
            BinaryOperator::Or => match eval_bool(left, resolver, dest)? {
                Some(false) => eval_bool(right, resolver, dest),
                other => Ok(other),
            },
            BinaryOperator::LessThan
            | BinaryOperator::LessThanOrEqual
            | BinaryOperator::GreaterThan
            | BinaryOperator::GreaterThanOrEqual => {
                let (Some(a), Some(b)) = (
                    eval_uint(left, resolver, dest)?,
                    eval_uint(right, resolver, dest)?,
                ) else {
                    return Ok(None);
                };
                Ok(Some(match op {
                    BinaryOperator::LessThan => a < b,
                    BinaryOperator::LessThanOrEqual => a <= b,
                    BinaryOperator::GreaterThan => a > b,
                    BinaryOperator::GreaterThanOrEqual => a >= b,
                    _ => unreachable!(),
                }))
            }
            BinaryOperator::Equal | BinaryOperator::NotEqual => {
                let (Some(a), Some(b)) = (
                    eval(left, resolver, dest)?,
                    eval(right, resolver, dest)?,
                ) else {
                    return Ok(None);
                };
                // numeric comparison when both sides are numbers, else string
                let equal = match (parse_uint(&a), parse_uint(&b)) {
                    (Some(x), Some(y)) => x == y,
                    _ => a == b,
                };
                Ok(Some(if *op == BinaryOperator::Equal {
                    equal
                } else {
                    !equal
                }))
            }
            _ => fallback_bool(expr, resolver, dest),
        },
        ExpressionNode::Guard { condition, body } => {
            match eval_bool(condition, resolver, dest)? {
                Some(true) => eval_bool(body, resolver, dest),
                _ => Ok(None),
            }
        }
        _ => fallback_bool(expr, resolver, dest),
    }
}

fn fallback_bool(
    expr: &ExpressionNode,
    resolver: &mut dyn ValueResolver,
    dest: &str,
) -> DmResult<Option<bool>> {
    Ok(eval(expr, resolver, dest)?.map(|text| truthy(&text)))
}

fn eval_call(
    expr: &ExpressionNode,
    resolver: &mut dyn ValueResolver,
    dest: &str,
) -> DmResult<Option<String>> {
    let ExpressionNode::Call { name, args } = expr else {
        return Err(Fault::internal("eval_call on non-call node"));
    };
    match name.as_str() {
        "Class" => {
            if args.is_empty() {
                return Err(Fault::InvalidArguments("Class needs a value".into()));
            }
            let Some(value) = eval_uint(&args[0], resolver, dest)? else {
                return Ok(None);
            };
            let mut class = args.len() - 1;
            for (index, threshold) in args[1..].iter().enumerate() {
                let Some(bound) = eval_uint(threshold, resolver, dest)? else {
                    return Ok(None);
                };
                if bound >= value {
                    class = index;
                    break;
                }
            }
            Ok(Some(class.to_string()))
        }
        "DiffTime" => {
            if args.is_empty() || args.len() > 2 {
                return Err(Fault::InvalidArguments(
                    "DiffTime takes one or two dates".into(),
                ));
            }
            let Some(t1_text) = eval(&args[0], resolver, dest)? else {
                return Ok(None);
            };
            let t1 = parse_date(&t1_text).ok_or_else(|| Fault::InvalidParameterValue {
                name: dest.to_string(),
                value: t1_text,
            })?;
            let t2 = match args.get(1) {
                Some(arg) => {
                    let Some(text) = eval(arg, resolver, dest)? else {
                        return Ok(None);
                    };
                    parse_date(&text).ok_or_else(|| Fault::InvalidParameterValue {
                        name: dest.to_string(),
                        value: text,
                    })?
                }
                None => resolver.now(),
            };
            if t2 < t1 {
                return Err(Fault::InvalidArguments("DiffTime: t2 precedes t1".into()));
            }
            Ok(Some((t2 - t1).num_seconds().to_string()))
        }
        other => {
            // `ident.suffix(args)` resolves as the synthetic parameter
            // `ident!suffix`; arguments configure aggregation, not evaluation
            let Some((prefix, suffix)) = other.rsplit_once('.') else {
                return Err(Fault::InvalidArguments(format!("unknown function {other}")));
            };
            resolver.get_value(&format!("{prefix}!{suffix}"), dest).map(Some)
        }
    }
}

fn join_pair(
    left: &ExpressionNode,
    right: &ExpressionNode,
    resolver: &mut dyn ValueResolver,
    dest: &str,
    separator: &str,
) -> DmResult<Option<String>> {
    let (Some(a), Some(b)) = (eval(left, resolver, dest)?, eval(right, resolver, dest)?) else {
        return Ok(None);
    };
    Ok(Some(format!("{a}{separator}{b}")))
}

#[inline]
fn is_arithmetic(op: BinaryOperator) -> bool {
    matches!(
        op,
        BinaryOperator::Add
            | BinaryOperator::Subtract
            | BinaryOperator::Multiply
            | BinaryOperator::Divide
    )
}

/// Lenient unsigned parse: empty is zero, booleans map to 1/0
pub(crate) fn parse_uint(text: &str) -> Option<u32> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Some(0);
    }
    match trimmed {
        "true" => Some(1),
        "false" => Some(0),
        _ => trimmed.parse::<u32>().ok(),
    }
}

/// Boolean interpretation of a string value
pub(crate) fn truthy(text: &str) -> bool {
    let trimmed = text.trim();
    !(trimmed.is_empty() || trimmed == "0" || trimmed.eq_ignore_ascii_case("false"))
}

/// Parse a TR-069 date value: RFC 3339, bare `%Y-%m-%dT%H:%M:%S`, or epoch
/// seconds
pub(crate) fn parse_date(text: &str) -> Option<DateTime<Utc>> {
    let trimmed = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S") {
        return Some(naive.and_utc());
    }
    trimmed
        .parse::<i64>()
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
}
