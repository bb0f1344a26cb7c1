use crate::ast::BinaryOp;
use crate::source::Span;
use crate::value::Value;

use std::rc::Rc;

use anyhow::{bail, Result};

/// Operator precedence, low to high. Assignment is the only
/// right-associative operator.
pub fn precedence(op: BinaryOp) -> u8 {
    match op {
        BinaryOp::InEdge
        | BinaryOp::InEdgeSubscribe
        | BinaryOp::OutEdge
        | BinaryOp::OutEdgeSubscribe => 1,
        BinaryOp::Assignment => 2,
        BinaryOp::Or => 3,
        BinaryOp::And => 4,
        BinaryOp::GreaterThan
        | BinaryOp::GreaterEqual
        | BinaryOp::LessThan
        | BinaryOp::LessEqual => 5,
        BinaryOp::Equals | BinaryOp::NotEquals => 6,
        BinaryOp::LeftShift | BinaryOp::RightShift => 7,
        BinaryOp::Plus | BinaryOp::Minus => 8,
        BinaryOp::Multiply | BinaryOp::Divide | BinaryOp::Modulo => 9,
        BinaryOp::Match | BinaryOp::NotMatch => 10,
        BinaryOp::In => 11,
    }
}

pub fn is_right_associative(op: BinaryOp) -> bool {
    op == BinaryOp::Assignment
}

/// Dispatches the context-free binary operators. Assignment, the edge
/// operators, logical operators, and match are handled by the evaluator
/// because they touch the evaluation context.
pub fn binary(
    op: BinaryOp,
    left: &Value,
    left_span: &Span,
    right: &Value,
    right_span: &Span,
) -> Result<Value> {
    match op {
        BinaryOp::Plus => plus(left, left_span, right, right_span),
        BinaryOp::Minus => minus(left, left_span, right, right_span),
        BinaryOp::Multiply => multiply(left, left_span, right, right_span),
        BinaryOp::Divide => divide(left, left_span, right, right_span),
        BinaryOp::Modulo => modulo(left, left_span, right, right_span),
        BinaryOp::LeftShift => left_shift(left, left_span, right, right_span),
        BinaryOp::RightShift => right_shift(left, left_span, right, right_span),
        BinaryOp::Equals => Ok(Value::Boolean(left == right)),
        BinaryOp::NotEquals => Ok(Value::Boolean(left != right)),
        BinaryOp::GreaterThan
        | BinaryOp::GreaterEqual
        | BinaryOp::LessThan
        | BinaryOp::LessEqual => compare(op, left, left_span, right, right_span),
        BinaryOp::In => Ok(Value::Boolean(contains(left, right))),
        _ => bail!(left_span.error(format!("unsupported binary operator '{op}'."))),
    }
}

enum Numbers {
    Integers(i64, i64),
    Floats(f64, f64),
}

/// Integer-preserving widening: both integers stay integers; any float
/// widens both sides to float.
fn numeric_operands(
    operation: &str,
    left: &Value,
    left_span: &Span,
    right: &Value,
    right_span: &Span,
) -> Result<Numbers> {
    let (span, found) = match (left.dereference(), right.dereference()) {
        (Value::Integer(a), Value::Integer(b)) => return Ok(Numbers::Integers(*a, *b)),
        (Value::Integer(a), Value::Float(b)) => return Ok(Numbers::Floats(*a as f64, *b)),
        (Value::Float(a), Value::Integer(b)) => return Ok(Numbers::Floats(*a, *b as f64)),
        (Value::Float(a), Value::Float(b)) => return Ok(Numbers::Floats(*a, *b)),
        (Value::Integer(_) | Value::Float(_), other) => (right_span, other.type_name()),
        (other, _) => (left_span, other.type_name()),
    };
    Err(span.error(format!("expected Numeric for {operation} but found {found}.")))
}

fn plus(left: &Value, left_span: &Span, right: &Value, right_span: &Span) -> Result<Value> {
    match (left.dereference(), right.dereference()) {
        (Value::Array(a), Value::Array(b)) => {
            let mut result = a.as_ref().clone();
            result.extend(b.iter().cloned());
            Ok(Value::from(result))
        }
        (Value::Array(a), Value::Hash(h)) => {
            let mut result = a.as_ref().clone();
            for (k, v) in h.iter() {
                result.push(Value::from(vec![k.clone(), v.clone()]));
            }
            Ok(Value::from(result))
        }
        (Value::Hash(a), Value::Hash(b)) => {
            let mut result = a.as_ref().clone();
            for (k, v) in b.iter() {
                result.insert(k.clone(), v.clone());
            }
            Ok(Value::from(result))
        }
        (Value::Hash(a), Value::Array(items)) => {
            let mut result = a.as_ref().clone();
            for item in items.iter() {
                match item.as_array() {
                    Some(pair) if pair.len() == 2 => {
                        result.insert(pair[0].clone(), pair[1].clone());
                    }
                    _ => {
                        bail!(right_span.error(
                            "expected an Array of [key, value] pairs to merge into a Hash."
                        ))
                    }
                }
            }
            Ok(Value::from(result))
        }
        _ => match numeric_operands("addition", left, left_span, right, right_span)? {
            Numbers::Integers(a, b) => match a.checked_add(b) {
                Some(result) => Ok(Value::Integer(result)),
                None => bail!(left_span.error("integer overflow in addition.")),
            },
            Numbers::Floats(a, b) => Ok(Value::Float(a + b)),
        },
    }
}

fn minus(left: &Value, left_span: &Span, right: &Value, right_span: &Span) -> Result<Value> {
    match (left.dereference(), right.dereference()) {
        (Value::Array(a), Value::Array(b)) => {
            let result: Vec<Value> = a
                .iter()
                .filter(|v| !b.iter().any(|r| r == *v))
                .cloned()
                .collect();
            Ok(Value::from(result))
        }
        (Value::Array(a), other) => {
            let result: Vec<Value> = a.iter().filter(|v| *v != other).cloned().collect();
            Ok(Value::from(result))
        }
        (Value::Hash(a), Value::Array(keys)) => {
            let mut result = a.as_ref().clone();
            for key in keys.iter() {
                result.remove(key);
            }
            Ok(Value::from(result))
        }
        (Value::Hash(a), Value::Hash(b)) => {
            let mut result = a.as_ref().clone();
            for (k, _) in b.iter() {
                result.remove(k);
            }
            Ok(Value::from(result))
        }
        _ => match numeric_operands("subtraction", left, left_span, right, right_span)? {
            Numbers::Integers(a, b) => match a.checked_sub(b) {
                Some(result) => Ok(Value::Integer(result)),
                None => bail!(left_span.error("integer overflow in subtraction.")),
            },
            Numbers::Floats(a, b) => Ok(Value::Float(a - b)),
        },
    }
}

fn multiply(left: &Value, left_span: &Span, right: &Value, right_span: &Span) -> Result<Value> {
    match numeric_operands("multiplication", left, left_span, right, right_span)? {
        Numbers::Integers(a, b) => match a.checked_mul(b) {
            Some(result) => Ok(Value::Integer(result)),
            None => bail!(left_span.error("integer overflow in multiplication.")),
        },
        Numbers::Floats(a, b) => Ok(Value::Float(a * b)),
    }
}

fn divide(left: &Value, left_span: &Span, right: &Value, right_span: &Span) -> Result<Value> {
    match numeric_operands("division", left, left_span, right, right_span)? {
        Numbers::Integers(_, 0) => bail!(right_span.error("cannot divide by zero.")),
        Numbers::Integers(a, b) => match a.checked_div(b) {
            Some(result) => Ok(Value::Integer(result)),
            None => bail!(left_span.error("integer overflow in division.")),
        },
        Numbers::Floats(_, b) if b == 0.0 => bail!(right_span.error("cannot divide by zero.")),
        Numbers::Floats(a, b) => Ok(Value::Float(a / b)),
    }
}

fn modulo(left: &Value, left_span: &Span, right: &Value, right_span: &Span) -> Result<Value> {
    match numeric_operands("modulo", left, left_span, right, right_span)? {
        Numbers::Integers(_, 0) => bail!(right_span.error("cannot modulo by zero.")),
        Numbers::Integers(a, b) => match a.checked_rem(b) {
            Some(result) => Ok(Value::Integer(result)),
            None => bail!(left_span.error("integer overflow in modulo.")),
        },
        Numbers::Floats(..) => {
            bail!(left_span.error("expected Integer for modulo but found Float."))
        }
    }
}

fn shift_integers(left: i64, right: i64, span: &Span, leftward: bool) -> Result<i64> {
    // A negative shift count reverses direction; a negative left operand
    // keeps its sign bit.
    if right < 0 {
        let reversed = right
            .checked_neg()
            .ok_or_else(|| span.error("shift count out of range."))?;
        return shift_integers(left, reversed, span, !leftward);
    }
    let amount =
        u32::try_from(right).map_err(|_| span.error("shift count out of range."))?;
    let magnitude_shift = |value: i64| -> Result<i64> {
        let result = if leftward {
            value.checked_shl(amount).filter(|r| r >> amount == value)
        } else {
            value.checked_shr(amount)
        };
        result.ok_or_else(|| span.error("shift count out of range."))
    };
    if left < 0 {
        let magnitude = left
            .checked_neg()
            .ok_or_else(|| span.error("integer overflow in shift."))?;
        let shifted = magnitude_shift(magnitude)?;
        shifted
            .checked_neg()
            .ok_or_else(|| span.error("integer overflow in shift."))
    } else {
        magnitude_shift(left)
    }
}

fn left_shift(left: &Value, left_span: &Span, right: &Value, right_span: &Span) -> Result<Value> {
    // Appending to an array.
    if let Some(items) = left.as_array() {
        let mut result = items.as_ref().clone();
        result.push(right.clone().into_dereferenced());
        return Ok(Value::from(result));
    }
    match (left.as_integer(), right.as_integer()) {
        (Some(a), Some(b)) => Ok(Value::Integer(shift_integers(a, b, right_span, true)?)),
        (Some(_), None) => Err(right_span.error(format!(
            "expected Integer for bitwise left shift but found {}.",
            right.type_name()
        ))),
        _ => Err(left_span.error(format!(
            "expected Integer for bitwise left shift but found {}.",
            left.type_name()
        ))),
    }
}

fn right_shift(left: &Value, left_span: &Span, right: &Value, right_span: &Span) -> Result<Value> {
    match (left.as_integer(), right.as_integer()) {
        (Some(a), Some(b)) => Ok(Value::Integer(shift_integers(a, b, right_span, false)?)),
        (Some(_), None) => Err(right_span.error(format!(
            "expected Integer for bitwise right shift but found {}.",
            right.type_name()
        ))),
        _ => Err(left_span.error(format!(
            "expected Integer for bitwise right shift but found {}.",
            left.type_name()
        ))),
    }
}

fn compare(
    op: BinaryOp,
    left: &Value,
    left_span: &Span,
    right: &Value,
    right_span: &Span,
) -> Result<Value> {
    use core::cmp::Ordering;

    let ordering = match (left.dereference(), right.dereference()) {
        (Value::Integer(a), Value::Integer(b)) => a.partial_cmp(b),
        (Value::Integer(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
        (Value::Float(a), Value::Integer(b)) => a.partial_cmp(&(*b as f64)),
        (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
        (Value::String(a), Value::String(b)) => Some(a.as_bytes().cmp(b.as_bytes())),
        (Value::Type(a), Value::Type(b)) => {
            // A type is less than the types it specializes.
            if a == b {
                Some(Ordering::Equal)
            } else if b.is_specialization(a) {
                Some(Ordering::Less)
            } else if a.is_specialization(b) {
                Some(Ordering::Greater)
            } else {
                None
            }
        }
        (Value::Integer(_) | Value::Float(_) | Value::String(_) | Value::Type(_), other) => {
            bail!(right_span.error(format!(
                "expected {} for comparison but found {}.",
                left.type_name(),
                other.type_name()
            )))
        }
        (other, _) => {
            bail!(left_span.error(format!(
                "values of type {} are not comparable.",
                other.type_name()
            )))
        }
    };

    let result = match (op, ordering) {
        (_, None) => false,
        (BinaryOp::LessThan, Some(o)) => o == Ordering::Less,
        (BinaryOp::LessEqual, Some(o)) => o != Ordering::Greater,
        (BinaryOp::GreaterThan, Some(o)) => o == Ordering::Greater,
        (BinaryOp::GreaterEqual, Some(o)) => o != Ordering::Less,
        _ => false,
    };
    Ok(Value::Boolean(result))
}

/// The `in` operator: substring or regex search for strings, element
/// equality (or regex match) for arrays, key membership for hashes.
fn contains(left: &Value, right: &Value) -> bool {
    match right.dereference() {
        Value::String(haystack) => match left.dereference() {
            Value::String(needle) => haystack.contains(needle.as_ref()),
            Value::Regex(r) => r.regex().is_match(haystack),
            _ => false,
        },
        Value::Array(items) => match left.dereference() {
            Value::Regex(r) => items.iter().any(|item| {
                item.as_string()
                    .is_some_and(|s| r.regex().is_match(s))
            }),
            Value::Type(t) => items.iter().any(|item| t.is_instance(item)),
            needle => items.iter().any(|item| item == needle),
        },
        Value::Hash(hash) => match left.dereference() {
            Value::Regex(r) => hash.keys().any(|key| {
                key.as_string()
                    .is_some_and(|s| r.regex().is_match(s))
            }),
            needle => hash.contains_key(needle),
        },
        _ => false,
    }
}

/// The splat operator: arrays pass through, hashes unfold to an array of
/// [key, value] pairs, any other value wraps into a single-element array.
pub fn splat(operand: &Value) -> Value {
    match operand.dereference() {
        Value::Hash(hash) => {
            let pairs: Vec<Value> = hash
                .iter()
                .map(|(k, v)| Value::from(vec![k.clone(), v.clone()]))
                .collect();
            Value::from(pairs)
        }
        other => Value::from(other.to_array()),
    }
}

/// Arithmetic negation.
pub fn negate(operand: &Value, span: &Span) -> Result<Value> {
    match operand.dereference() {
        Value::Integer(i) => match i.checked_neg() {
            Some(result) => Ok(Value::Integer(result)),
            None => bail!(span.error("integer overflow in negation.")),
        },
        Value::Float(f) => Ok(Value::Float(-f)),
        other => bail!(span.error(format!(
            "expected Numeric for negation but found {}.",
            other.type_name()
        ))),
    }
}

/// Builds the value a successful regex match publishes into the match
/// scope: `$0` is the whole match, `$n` the nth capture group.
pub fn capture_values(captures: &regex::Captures<'_>) -> Vec<Rc<Value>> {
    captures
        .iter()
        .map(|group| {
            Rc::new(match group {
                Some(m) => Value::from(m.as_str()),
                None => Value::Undef,
            })
        })
        .collect()
}
