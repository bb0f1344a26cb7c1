//! Evaluation of access expressions (`value[...]`): indexing for strings,
//! arrays, and hashes, and type parametrisation for type values.

use crate::source::Span;
use crate::types::Type;
use crate::value::{Value, ValueHash, ValueRegex};

use std::rc::Rc;

use anyhow::{bail, Result};
use unicode_segmentation::UnicodeSegmentation;

pub fn evaluate(
    target: Value,
    target_span: &Span,
    arguments: Vec<(Value, Span)>,
    span: &Span,
) -> Result<Value> {
    if arguments.is_empty() {
        bail!(span.error("expected at least one argument for an access expression."));
    }
    match target.dereference() {
        Value::String(s) => access_string(s, &arguments, span),
        Value::Array(items) => access_array(items, &arguments, span),
        Value::Hash(hash) => Ok(access_hash(hash, &arguments)),
        Value::Type(t) => access_type(t, arguments, span),
        other => bail!(target_span.error(format!(
            "access expressions are not supported for {} values.",
            other.type_name()
        ))),
    }
}

fn index_argument(value: &Value, span: &Span) -> Result<i64> {
    value
        .as_integer()
        .ok_or_else(|| span.error(format!("expected Integer for index but found {}.", value.type_name())))
}

/// Resolves `[from, count]` against a sequence length: negative `from`
/// counts back from the end, a negative `count` addresses up to that many
/// elements before the end.
fn resolve_range(from: i64, count: Option<i64>, len: usize) -> (usize, usize) {
    let len = len as i64;
    let start = if from < 0 { len + from } else { from };
    let start = start.clamp(0, len);
    let end = match count {
        Some(count) if count < 0 => len + count + 1,
        Some(count) => start + count,
        None => start + 1,
    };
    let end = end.clamp(start, len);
    (start as usize, end as usize)
}

fn access_string(s: &Rc<str>, arguments: &[(Value, Span)], span: &Span) -> Result<Value> {
    if arguments.len() > 2 {
        bail!(span.error("expected at most two arguments for string access."));
    }
    let graphemes: Vec<&str> = s.graphemes(true).collect();
    let from = index_argument(&arguments[0].0, &arguments[0].1)?;
    let count = arguments
        .get(1)
        .map(|(v, s)| index_argument(v, s))
        .transpose()?;
    let (start, end) = resolve_range(from, count, graphemes.len());
    Ok(Value::from(graphemes[start..end].concat()))
}

fn access_array(items: &Rc<Vec<Value>>, arguments: &[(Value, Span)], span: &Span) -> Result<Value> {
    if arguments.len() > 2 {
        bail!(span.error("expected at most two arguments for array access."));
    }
    let from = index_argument(&arguments[0].0, &arguments[0].1)?;
    if arguments.len() == 1 {
        let index = if from < 0 { items.len() as i64 + from } else { from };
        if index < 0 || index as usize >= items.len() {
            return Ok(Value::Undef);
        }
        return Ok(items[index as usize].clone());
    }
    let count = index_argument(&arguments[1].0, &arguments[1].1)?;
    let (start, end) = resolve_range(from, Some(count), items.len());
    Ok(Value::from(items[start..end].to_vec()))
}

fn access_hash(hash: &ValueHash, arguments: &[(Value, Span)]) -> Value {
    if arguments.len() == 1 {
        return hash.get(&arguments[0].0).cloned().unwrap_or(Value::Undef);
    }
    // Multiple keys yield the values that are present.
    let values: Vec<Value> = arguments
        .iter()
        .filter_map(|(key, _)| hash.get(key).cloned())
        .collect();
    Value::from(values)
}

fn type_argument(value: &Value, span: &Span) -> Result<Type> {
    match value.as_type() {
        Some(t) => Ok((**t).clone()),
        None => Err(span.error(format!(
            "expected Type for type parameter but found {}.",
            value.type_name()
        ))),
    }
}

fn string_argument<'a>(value: &'a Value, span: &Span) -> Result<&'a Rc<str>> {
    value.as_string().ok_or_else(|| {
        span.error(format!(
            "expected String for type parameter but found {}.",
            value.type_name()
        ))
    })
}

fn bound_argument(value: &Value, span: &Span, unbounded: i64) -> Result<i64> {
    match value.dereference() {
        Value::Integer(i) => Ok(*i),
        Value::Default => Ok(unbounded),
        other => Err(span.error(format!(
            "expected Integer or default for type parameter but found {}.",
            other.type_name()
        ))),
    }
}

fn float_bound_argument(value: &Value, span: &Span, unbounded: f64) -> Result<f64> {
    match value.dereference() {
        Value::Integer(i) => Ok(*i as f64),
        Value::Float(f) => Ok(*f),
        Value::Default => Ok(unbounded),
        other => Err(span.error(format!(
            "expected Numeric or default for type parameter but found {}.",
            other.type_name()
        ))),
    }
}

/// Splits a parameter list into leading types and up to two trailing
/// integer bounds (Tuple-style parametrisation).
fn types_then_bounds(arguments: &[(Value, Span)]) -> Result<(Vec<Type>, i64, i64)> {
    let mut types = Vec::new();
    let mut bounds = Vec::new();
    for (value, arg_span) in arguments {
        match value.dereference() {
            Value::Integer(_) | Value::Default => {
                if bounds.len() == 2 {
                    bail!(arg_span.error("expected at most two range parameters."));
                }
                bounds.push((value.clone(), arg_span.clone()));
            }
            _ if bounds.is_empty() => types.push(type_argument(value, arg_span)?),
            _ => bail!(arg_span.error("type parameters must precede range parameters.")),
        }
    }
    let from = match bounds.first() {
        Some((value, bound_span)) => bound_argument(value, bound_span, i64::MIN)?,
        None => i64::MIN,
    };
    let to = match bounds.get(1) {
        Some((value, bound_span)) => bound_argument(value, bound_span, i64::MAX)?,
        None => i64::MAX,
    };
    Ok((types, from, to))
}

fn access_type(t: &Rc<Type>, arguments: Vec<(Value, Span)>, span: &Span) -> Result<Value> {
    let result = match t.as_ref() {
        Type::Integer { .. } => {
            if arguments.len() > 2 {
                bail!(span.error("expected at most two parameters for Integer."));
            }
            let from = bound_argument(&arguments[0].0, &arguments[0].1, i64::MIN)?;
            let to = match arguments.get(1) {
                Some((value, bound_span)) => bound_argument(value, bound_span, i64::MAX)?,
                None => i64::MAX,
            };
            Type::Integer { from, to }
        }
        Type::Float { .. } => {
            if arguments.len() > 2 {
                bail!(span.error("expected at most two parameters for Float."));
            }
            let from = float_bound_argument(&arguments[0].0, &arguments[0].1, f64::NEG_INFINITY)?;
            let to = match arguments.get(1) {
                Some((value, bound_span)) => float_bound_argument(value, bound_span, f64::INFINITY)?,
                None => f64::INFINITY,
            };
            Type::Float { from, to }
        }
        Type::String { .. } => {
            if arguments.len() > 2 {
                bail!(span.error("expected at most two parameters for String."));
            }
            let from = bound_argument(&arguments[0].0, &arguments[0].1, 0)?;
            let to = match arguments.get(1) {
                Some((value, bound_span)) => bound_argument(value, bound_span, i64::MAX)?,
                None => i64::MAX,
            };
            Type::String { from, to }
        }
        Type::Enum(_) => {
            let mut members = Vec::with_capacity(arguments.len());
            for (value, arg_span) in &arguments {
                members.push(Rc::from(string_argument(value, arg_span)?.as_ref()));
            }
            Type::Enum(members)
        }
        Type::Pattern(_) => {
            let mut regexes = Vec::with_capacity(arguments.len());
            for (value, arg_span) in &arguments {
                match value.dereference() {
                    Value::Regex(r) => regexes.push(r.clone()),
                    Value::String(s) => regexes
                        .push(ValueRegex::new(s).map_err(|e| arg_span.error(e.to_string()))?),
                    other => bail!(arg_span.error(format!(
                        "expected String or Regexp for type parameter but found {}.",
                        other.type_name()
                    ))),
                }
            }
            Type::Pattern(regexes)
        }
        Type::Regexp(_) => {
            if arguments.len() != 1 {
                bail!(span.error("expected one parameter for Regexp."));
            }
            match arguments[0].0.dereference() {
                Value::Regex(r) => Type::Regexp(Some(r.pattern().into())),
                Value::String(s) => Type::Regexp(Some(s.as_ref().into())),
                other => bail!(arguments[0].1.error(format!(
                    "expected String or Regexp for type parameter but found {}.",
                    other.type_name()
                ))),
            }
        }
        Type::Array { .. } => {
            let (types, from, to) = types_then_bounds(&arguments)?;
            if types.len() > 1 {
                bail!(span.error("expected at most one element type for Array."));
            }
            Type::Array {
                element: Box::new(types.into_iter().next().unwrap_or(Type::Data)),
                from,
                to,
            }
        }
        Type::Hash { .. } => {
            let (mut types, from, to) = types_then_bounds(&arguments)?;
            if types.len() != 2 {
                bail!(span.error("expected a key type and a value type for Hash."));
            }
            let value = types.pop().unwrap_or(Type::Data);
            let key = types.pop().unwrap_or(Type::Scalar);
            Type::Hash {
                key: Box::new(key),
                value: Box::new(value),
                from,
                to,
            }
        }
        Type::Tuple { .. } => {
            let (types, from, to) = types_then_bounds(&arguments)?;
            Type::Tuple { types, from, to }
        }
        Type::Struct(_) => {
            if arguments.len() != 1 {
                bail!(span.error("expected one parameter for Struct."));
            }
            let Some(hash) = arguments[0].0.as_hash() else {
                bail!(arguments[0].1.error(format!(
                    "expected Hash for type parameter but found {}.",
                    arguments[0].0.type_name()
                )));
            };
            let mut fields = Vec::with_capacity(hash.len());
            for (key, value) in hash.iter() {
                let name = string_argument(key, &arguments[0].1)?;
                let field_type = type_argument(value, &arguments[0].1)?;
                fields.push((Rc::from(name.as_ref()), field_type));
            }
            Type::Struct(fields)
        }
        Type::Variant(_) => {
            let mut alternatives = Vec::with_capacity(arguments.len());
            for (value, arg_span) in &arguments {
                alternatives.push(type_argument(value, arg_span)?);
            }
            Type::Variant(alternatives)
        }
        Type::Optional(_) => {
            if arguments.len() != 1 {
                bail!(span.error("expected one parameter for Optional."));
            }
            match arguments[0].0.dereference() {
                Value::String(s) => {
                    Type::Optional(Some(Box::new(Type::Enum(vec![s.as_ref().into()]))))
                }
                _ => Type::Optional(Some(Box::new(type_argument(
                    &arguments[0].0,
                    &arguments[0].1,
                )?))),
            }
        }
        Type::NotUndef(_) => {
            if arguments.len() != 1 {
                bail!(span.error("expected one parameter for NotUndef."));
            }
            match arguments[0].0.dereference() {
                Value::String(s) => {
                    Type::NotUndef(Some(Box::new(Type::Enum(vec![s.as_ref().into()]))))
                }
                _ => Type::NotUndef(Some(Box::new(type_argument(
                    &arguments[0].0,
                    &arguments[0].1,
                )?))),
            }
        }
        Type::Callable { .. } => {
            let mut params = Vec::with_capacity(arguments.len());
            for (value, arg_span) in &arguments {
                params.push(type_argument(value, arg_span)?);
            }
            Type::Callable {
                params,
                block: None,
            }
        }
        Type::Type(_) => {
            if arguments.len() != 1 {
                bail!(span.error("expected one parameter for Type."));
            }
            Type::Type(Some(Box::new(type_argument(&arguments[0].0, &arguments[0].1)?)))
        }
        Type::Class(None) => {
            let mut classes = Vec::with_capacity(arguments.len());
            for (value, arg_span) in &arguments {
                let name = match value.dereference() {
                    Value::String(s) => s.to_string(),
                    Value::Type(t) => match t.as_ref() {
                        Type::Resource { type_name, title } if title.is_empty() => {
                            type_name.to_string()
                        }
                        other => bail!(arg_span.error(format!(
                            "expected String for class name but found {other}."
                        ))),
                    },
                    other => bail!(arg_span.error(format!(
                        "expected String for class name but found {}.",
                        other.type_name()
                    ))),
                };
                classes.push(Value::from(Type::class(&name)));
            }
            if classes.len() == 1 {
                return classes
                    .into_iter()
                    .next()
                    .ok_or_else(|| span.error("internal error: expected a class reference."));
            }
            return Ok(Value::from(classes));
        }
        Type::Resource { type_name, title } if title.is_empty() => {
            let (name, titles) = if type_name.is_empty() {
                // Abstract Resource: the first parameter names the type.
                let name = match arguments[0].0.dereference() {
                    Value::String(s) => s.to_string(),
                    Value::Type(t) => match t.as_ref() {
                        Type::Resource {
                            type_name: inner,
                            title,
                        } if title.is_empty() => inner.to_string(),
                        other => bail!(arguments[0].1.error(format!(
                            "expected String or Resource for type name but found {other}."
                        ))),
                    },
                    other => bail!(arguments[0].1.error(format!(
                        "expected String or Resource for type name but found {}.",
                        other.type_name()
                    ))),
                };
                (name, &arguments[1..])
            } else {
                (type_name.to_string(), &arguments[..])
            };
            if titles.is_empty() {
                return Ok(Value::from(Type::resource(&name)));
            }
            let mut references = Vec::with_capacity(titles.len());
            for (value, arg_span) in titles {
                let title = string_argument(value, arg_span)?;
                references.push(Value::from(Type::resource_title(&name, title)));
            }
            if references.len() == 1 {
                return references
                    .into_iter()
                    .next()
                    .ok_or_else(|| span.error("internal error: expected a resource reference."));
            }
            return Ok(Value::from(references));
        }
        other => bail!(span.error(format!("type {other} does not support parameters."))),
    };
    Ok(Value::from(result))
}
