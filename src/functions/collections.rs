//! Iteration built-ins. Receivers enumerate as: strings by grapheme,
//! non-negative integers as `0..n`, arrays by element, hashes by entry, and
//! enumerable Integer types by range. The lambda's arity selects whether an
//! index or key is supplied.

use super::{ensure_args_count, ensure_lambda, ensure_min_args, BuiltinFcn, CallSite};
use crate::evaluator::Evaluator;
use crate::source::Span;
use crate::value::{enumerate_string, Value, ValueHash};

use std::collections::HashMap;

use anyhow::{bail, Result};

pub fn register(m: &mut HashMap<&'static str, BuiltinFcn>) {
    m.insert("each", each);
    m.insert("filter", filter);
    m.insert("map", map);
    m.insert("reduce", reduce);
    m.insert("with", with);
}

fn lambda_arity(call: &CallSite) -> Result<usize> {
    let lambda = ensure_lambda(call)?;
    let count = lambda.parameters.len();
    if count == 0 || count > 2 {
        bail!(lambda
            .span
            .error(format!("expected 1 or 2 lambda parameters but {count} were given.")));
    }
    Ok(count)
}

/// Builds the argument vectors one lambda invocation receives per element.
fn enumerable_items(receiver: &Value, arity: usize, span: &Span) -> Result<Vec<Vec<Value>>> {
    let items = match receiver.dereference() {
        Value::String(s) => {
            let mut items = Vec::new();
            let mut index = 0i64;
            enumerate_string(s, |grapheme| {
                if arity == 1 {
                    items.push(vec![Value::from(grapheme)]);
                } else {
                    items.push(vec![Value::Integer(index), Value::from(grapheme)]);
                }
                index += 1;
                true
            });
            items
        }
        Value::Integer(n) => {
            if *n <= 0 {
                Vec::new()
            } else {
                (0..*n)
                    .map(|value| {
                        if arity == 1 {
                            vec![Value::Integer(value)]
                        } else {
                            vec![Value::Integer(value), Value::Integer(value)]
                        }
                    })
                    .collect()
            }
        }
        Value::Array(values) => values
            .iter()
            .enumerate()
            .map(|(index, value)| {
                if arity == 1 {
                    vec![value.clone()]
                } else {
                    vec![Value::Integer(index as i64), value.clone()]
                }
            })
            .collect(),
        Value::Hash(hash) => hash
            .iter()
            .map(|(key, value)| {
                if arity == 1 {
                    vec![Value::from(vec![key.clone(), value.clone()])]
                } else {
                    vec![key.clone(), value.clone()]
                }
            })
            .collect(),
        Value::Type(t) => match t.enumerable_range() {
            Some((from, to)) => (from..=to)
                .enumerate()
                .map(|(index, value)| {
                    if arity == 1 {
                        vec![Value::Integer(value)]
                    } else {
                        vec![Value::Integer(index as i64), Value::Integer(value)]
                    }
                })
                .collect(),
            None => bail!(span.error(format!("{t} is not enumerable."))),
        },
        other => bail!(span.error(format!(
            "expected enumerable value for first argument but found {}.",
            other.type_name()
        ))),
    };
    Ok(items)
}

fn each<'src>(ev: &mut Evaluator<'_, 'src>, call: &CallSite<'src>) -> Result<Value> {
    ensure_args_count(call, 1)?;
    let arity = lambda_arity(call)?;
    let lambda = ensure_lambda(call)?;
    let items = enumerable_items(&call.arguments[0], arity, call.argument_span(0))?;
    for item in items {
        ev.yield_lambda(lambda, item)?;
    }
    Ok(call.arguments[0].clone())
}

fn map<'src>(ev: &mut Evaluator<'_, 'src>, call: &CallSite<'src>) -> Result<Value> {
    ensure_args_count(call, 1)?;
    let arity = lambda_arity(call)?;
    let lambda = ensure_lambda(call)?;
    let items = enumerable_items(&call.arguments[0], arity, call.argument_span(0))?;
    let mut result = Vec::with_capacity(items.len());
    for item in items {
        result.push(ev.yield_lambda(lambda, item)?.into_dereferenced());
    }
    Ok(Value::from(result))
}

fn filter<'src>(ev: &mut Evaluator<'_, 'src>, call: &CallSite<'src>) -> Result<Value> {
    ensure_args_count(call, 1)?;
    let arity = lambda_arity(call)?;
    let lambda = ensure_lambda(call)?;
    let receiver = &call.arguments[0];
    let items = enumerable_items(receiver, arity, call.argument_span(0))?;

    // Hash receivers keep their shape; everything else filters to an array.
    if let Some(hash) = receiver.as_hash() {
        let mut result = ValueHash::new();
        for (entry, item) in hash.iter().zip(items) {
            if ev.yield_lambda(lambda, item)?.is_truthy() {
                result.insert(entry.0.clone(), entry.1.clone());
            }
        }
        return Ok(Value::from(result));
    }
    let mut result = Vec::new();
    for item in items {
        let kept = item
            .last()
            .cloned()
            .unwrap_or(Value::Undef);
        if ev.yield_lambda(lambda, item)?.is_truthy() {
            result.push(kept);
        }
    }
    Ok(Value::from(result))
}

fn reduce<'src>(ev: &mut Evaluator<'_, 'src>, call: &CallSite<'src>) -> Result<Value> {
    ensure_min_args(call, 1)?;
    if call.arguments.len() > 2 {
        bail!(call.span.error(format!(
            "expected at most 2 arguments to '{}' function but {} were given.",
            call.name,
            call.arguments.len()
        )));
    }
    let lambda = ensure_lambda(call)?;
    if lambda.parameters.len() != 2 {
        bail!(lambda.span.error(format!(
            "expected 2 lambda parameters but {} were given.",
            lambda.parameters.len()
        )));
    }

    // Elements as single values: hash entries reduce as [key, value] pairs.
    let elements: Vec<Value> = enumerable_items(&call.arguments[0], 1, call.argument_span(0))?
        .into_iter()
        .filter_map(|mut item| item.pop())
        .collect();

    let mut iterator = elements.into_iter();
    let mut memo = match call.arguments.get(1) {
        Some(seed) => seed.clone(),
        None => match iterator.next() {
            Some(first) => first,
            None => return Ok(Value::Undef),
        },
    };
    for element in iterator {
        memo = ev.yield_lambda(lambda, vec![memo, element])?.into_dereferenced();
    }
    Ok(memo)
}

fn with<'src>(ev: &mut Evaluator<'_, 'src>, call: &CallSite<'src>) -> Result<Value> {
    let lambda = ensure_lambda(call)?;
    ev.yield_lambda(lambda, call.arguments.clone())
}
