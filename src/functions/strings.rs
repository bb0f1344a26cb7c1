use super::{ensure_args_count, ensure_string, BuiltinFcn, CallSite};
use crate::evaluator::Evaluator;
use crate::value::{Value, ValueRegex};

use std::collections::HashMap;

use anyhow::{bail, Result};

pub fn register(m: &mut HashMap<&'static str, BuiltinFcn>) {
    m.insert("split", split);
    m.insert("versioncmp", versioncmp);
}

/// Splits a string by a regex given as a pattern string or regex value.
fn split<'src>(_ev: &mut Evaluator<'_, 'src>, call: &CallSite<'src>) -> Result<Value> {
    ensure_args_count(call, 2)?;
    let subject = ensure_string(call, 0)?;
    let regex = match call.arguments[1].dereference() {
        Value::Regex(r) => r.clone(),
        Value::String(pattern) => {
            ValueRegex::new(pattern).map_err(|e| call.argument_span(1).error(e.to_string()))?
        }
        other => bail!(call.argument_span(1).error(format!(
            "expected String or Regexp for split pattern but found {}.",
            other.type_name()
        ))),
    };
    let parts: Vec<Value> = regex
        .regex()
        .split(subject)
        .map(Value::from)
        .collect();
    Ok(Value::from(parts))
}

/// Compares two version strings segment-wise: runs of digits compare
/// numerically, anything else byte-wise. Returns -1, 0, or 1.
fn versioncmp<'src>(_ev: &mut Evaluator<'_, 'src>, call: &CallSite<'src>) -> Result<Value> {
    use core::cmp::Ordering;

    ensure_args_count(call, 2)?;
    let left = ensure_string(call, 0)?;
    let right = ensure_string(call, 1)?;

    fn chunks(s: &str) -> Vec<&str> {
        let mut out = Vec::new();
        let mut start = 0;
        let mut digits = None;
        for (i, c) in s.char_indices() {
            let is_digit = c.is_ascii_digit();
            if Some(is_digit) != digits {
                if i > start {
                    out.push(&s[start..i]);
                }
                start = i;
                digits = Some(is_digit);
            }
        }
        if start < s.len() {
            out.push(&s[start..]);
        }
        out
    }

    let left_chunks = chunks(left);
    let right_chunks = chunks(right);
    let mut ordering = Ordering::Equal;
    for index in 0..left_chunks.len().max(right_chunks.len()) {
        let a = left_chunks.get(index).copied().unwrap_or("");
        let b = right_chunks.get(index).copied().unwrap_or("");
        ordering = match (a.parse::<u64>(), b.parse::<u64>()) {
            (Ok(a), Ok(b)) => a.cmp(&b),
            _ => a.cmp(b),
        };
        if ordering != Ordering::Equal {
            break;
        }
    }
    Ok(Value::Integer(match ordering {
        Ordering::Less => -1,
        Ordering::Equal => 0,
        Ordering::Greater => 1,
    }))
}
