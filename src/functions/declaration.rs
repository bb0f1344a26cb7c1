use super::{ensure_min_args, BuiltinFcn, CallSite};
use crate::context::{Collector, CollectorQuery};
use crate::evaluator::Evaluator;
use crate::source::Span;
use crate::types::Type;
use crate::value::Value;

use std::collections::{HashMap, HashSet};

use anyhow::{bail, Result};

pub fn register(m: &mut HashMap<&'static str, BuiltinFcn>) {
    m.insert("fail", fail);
    m.insert("include", include);
    m.insert("realize", realize);
    m.insert("tag", tag);
}

/// Declares one or more classes by name, class reference, or array thereof.
fn include<'src>(ev: &mut Evaluator<'_, 'src>, call: &CallSite<'src>) -> Result<Value> {
    ensure_min_args(call, 1)?;
    for (index, argument) in call.arguments.iter().enumerate() {
        declare_value(ev, argument, call.argument_span(index))?;
    }
    Ok(Value::Undef)
}

fn declare_value(ev: &mut Evaluator<'_, '_>, value: &Value, span: &Span) -> Result<()> {
    match value.dereference() {
        Value::String(name) => {
            let name = name.to_string();
            ev.declare_class(&name, span)?;
        }
        Value::Array(items) => {
            let items = items.clone();
            for item in items.iter() {
                declare_value(ev, item, span)?;
            }
        }
        Value::Type(t) => match t.as_ref() {
            Type::Class(Some(name)) => {
                let name = name.to_string();
                ev.declare_class(&name, span)?;
            }
            other => bail!(span.error(format!(
                "expected String or Class for class name but found {other}."
            ))),
        },
        other => bail!(span.error(format!(
            "expected String or Class for class name but found {}.",
            other.type_name()
        ))),
    }
    Ok(())
}

/// Realizes virtual resources through a list collector; every reference
/// must exist in the catalog by the end of finalization.
fn realize<'src>(ev: &mut Evaluator<'_, 'src>, call: &CallSite<'src>) -> Result<Value> {
    ensure_min_args(call, 1)?;
    let mut references = Vec::new();
    for (index, argument) in call.arguments.iter().enumerate() {
        collect_references(argument, call.argument_span(index), &mut references)?;
    }
    let context = ev.context();
    let collector = Collector {
        query: CollectorQuery::List(references),
        scope: context.current_scope(),
        attributes: Vec::new(),
        collected: HashSet::new(),
    };
    context.add_collector(collector);
    Ok(Value::Undef)
}

fn collect_references(
    value: &Value,
    span: &Span,
    references: &mut Vec<(Type, Span)>,
) -> Result<()> {
    match value.dereference() {
        Value::Array(items) => {
            for item in items.iter() {
                collect_references(item, span, references)?;
            }
        }
        Value::Type(t) => match t.as_ref() {
            Type::Resource { .. } if t.is_fully_qualified_resource() => {
                references.push(((**t).clone(), span.clone()));
            }
            Type::Class(_) => bail!(span.error("classes cannot be realized.")),
            other => bail!(span.error(format!(
                "expected a fully qualified resource reference but found {other}."
            ))),
        },
        other => bail!(span.error(format!(
            "expected a fully qualified resource reference but found {}.",
            other.type_name()
        ))),
    }
    Ok(())
}

/// Tags the resource of the calling scope.
fn tag<'src>(ev: &mut Evaluator<'_, 'src>, call: &CallSite<'src>) -> Result<Value> {
    ensure_min_args(call, 1)?;
    let context = ev.context();
    let scope = context.current_scope();
    let Some(id) = context.scopes.containing_resource(scope) else {
        return Ok(Value::Undef);
    };
    for (index, argument) in call.arguments.iter().enumerate() {
        for tag in argument.to_array() {
            match tag.as_string() {
                Some(tag) => {
                    let tag = tag.to_string();
                    context.catalog_mut().get_mut(id).tag(tag);
                }
                None => bail!(call.argument_span(index).error(format!(
                    "expected String for tag but found {}.",
                    tag.type_name()
                ))),
            }
        }
    }
    Ok(Value::Undef)
}

/// Aborts the compilation with the given message.
fn fail<'src>(_ev: &mut Evaluator<'_, 'src>, call: &CallSite<'src>) -> Result<Value> {
    let message: Vec<String> = call.arguments.iter().map(|v| v.to_string()).collect();
    bail!(call.span.error(format!("evaluation failed: {}.", message.join(" "))))
}
