use super::{ensure_args_count, ensure_min_args, BuiltinFcn, CallSite};
use crate::evaluator::Evaluator;
use crate::types::Type;
use crate::value::Value;

use std::collections::HashMap;

use anyhow::Result;

pub fn register(m: &mut HashMap<&'static str, BuiltinFcn>) {
    m.insert("defined", defined);
    m.insert("type", type_of);
}

/// True when every argument names a known class or resource type, or
/// references a resource present in the catalog.
fn defined<'src>(ev: &mut Evaluator<'_, 'src>, call: &CallSite<'src>) -> Result<Value> {
    ensure_min_args(call, 1)?;
    let mut result = true;
    for argument in &call.arguments {
        result &= is_defined(ev, argument);
        if !result {
            break;
        }
    }
    Ok(Value::Boolean(result))
}

fn is_defined(ev: &mut Evaluator<'_, '_>, value: &Value) -> bool {
    let context = ev.context();
    match value.dereference() {
        Value::String(name) => {
            context.registry().is_defined(name)
                || crate::evaluator::is_builtin_type(&crate::types::canonicalize_type_name(name))
        }
        Value::Type(t) => match t.as_ref() {
            Type::Class(Some(name)) => context.catalog().find("class", name).is_some(),
            Type::Resource { type_name, title } if !title.is_empty() => {
                context.catalog().find(type_name, title).is_some()
            }
            Type::Resource { type_name, .. } => {
                context.registry().is_defined(&type_name.to_lowercase())
                    || crate::evaluator::is_builtin_type(type_name)
            }
            _ => true,
        },
        _ => false,
    }
}

/// The inferred type of the argument.
fn type_of<'src>(_ev: &mut Evaluator<'_, 'src>, call: &CallSite<'src>) -> Result<Value> {
    ensure_args_count(call, 1)?;
    Ok(Value::from(call.arguments[0].infer_type()))
}
