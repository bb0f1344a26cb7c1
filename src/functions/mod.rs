mod collections;
mod declaration;
mod inspection;
mod logging;
mod strings;

use crate::ast::{Expr, Lambda};
use crate::evaluator::Evaluator;
use crate::source::Span;
use crate::value::Value;

use std::collections::HashMap;

use anyhow::{bail, Result};
use lazy_static::lazy_static;

/// A built-in function implementation: the evaluator plus the call site.
pub type BuiltinFcn =
    for<'a, 'c, 'src> fn(&'a mut Evaluator<'c, 'src>, &'a CallSite<'src>) -> Result<Value>;

lazy_static! {
    pub static ref BUILTINS: HashMap<&'static str, BuiltinFcn> = {
        let mut m: HashMap<&'static str, BuiltinFcn> = HashMap::new();
        collections::register(&mut m);
        declaration::register(&mut m);
        inspection::register(&mut m);
        logging::register(&mut m);
        strings::register(&mut m);
        m
    };
}

/// An evaluated function call: positional arguments with their spans, the
/// optional lambda, and the call-site span. Method-call receivers arrive as
/// the first argument.
pub struct CallSite<'src> {
    pub name: &'src str,
    pub span: &'src Span,
    pub arguments: Vec<Value>,
    pub argument_spans: Vec<Span>,
    pub lambda: Option<&'src Lambda>,
}

impl<'src> CallSite<'src> {
    pub fn argument_span(&self, index: usize) -> &Span {
        self.argument_spans.get(index).unwrap_or(self.span)
    }
}

/// Evaluates the arguments and dispatches the call: a built-in first, then
/// the context's fallback resolver, then an unknown-function error.
pub fn dispatch<'src>(
    ev: &mut Evaluator<'_, 'src>,
    name: &'src str,
    span: &'src Span,
    argument_exprs: &'src [Expr],
    lambda: Option<&'src Lambda>,
    receiver: Option<(Value, &'src Span, bool)>,
) -> Result<Value> {
    let mut arguments = Vec::with_capacity(argument_exprs.len() + 1);
    let mut argument_spans = Vec::with_capacity(argument_exprs.len() + 1);

    if let Some((value, receiver_span, splat)) = receiver {
        let unfolded = match value.as_array() {
            Some(items) if splat => Some(items.as_ref().clone()),
            _ => None,
        };
        match unfolded {
            Some(items) => {
                for item in items {
                    arguments.push(item);
                    argument_spans.push(receiver_span.clone());
                }
            }
            None => {
                arguments.push(value.into_dereferenced());
                argument_spans.push(receiver_span.clone());
            }
        }
    }

    for expr in argument_exprs {
        let value = ev.evaluate(expr)?;
        if expr.is_splat() {
            if let Some(unfolded) = value.as_array() {
                for item in unfolded.iter() {
                    arguments.push(item.clone());
                    argument_spans.push(expr.span().clone());
                }
                continue;
            }
        }
        arguments.push(value.into_dereferenced());
        argument_spans.push(expr.span().clone());
    }

    let call = CallSite {
        name,
        span,
        arguments,
        argument_spans,
        lambda,
    };
    if let Some(function) = BUILTINS.get(name) {
        return function(ev, &call);
    }
    if let Some(result) = ev.context().resolve_function(name, &call.arguments) {
        return result;
    }
    bail!(span.error(format!("unknown function '{name}'.")))
}

pub(crate) fn ensure_args_count(call: &CallSite, expected: usize) -> Result<()> {
    if call.arguments.len() != expected {
        let plural = if expected == 1 { "" } else { "s" };
        bail!(call.span.error(format!(
            "expected {expected} argument{plural} to '{}' function but {} were given.",
            call.name,
            call.arguments.len()
        )));
    }
    Ok(())
}

pub(crate) fn ensure_min_args(call: &CallSite, minimum: usize) -> Result<()> {
    if call.arguments.len() < minimum {
        bail!(call.span.error(format!(
            "expected at least {minimum} argument{} to '{}' function but {} were given.",
            if minimum == 1 { "" } else { "s" },
            call.name,
            call.arguments.len()
        )));
    }
    Ok(())
}

pub(crate) fn ensure_lambda<'src>(call: &CallSite<'src>) -> Result<&'src Lambda> {
    match call.lambda {
        Some(lambda) => Ok(lambda),
        None => bail!(call.span.error(format!(
            "expected a lambda to '{}' function but one was not given.",
            call.name
        ))),
    }
}

pub(crate) fn ensure_string<'a>(call: &'a CallSite<'_>, index: usize) -> Result<&'a str> {
    match call.arguments.get(index).and_then(|v| v.as_string()) {
        Some(s) => Ok(s),
        None => bail!(call.argument_span(index).error(format!(
            "expected String for argument {} to '{}' function.",
            index + 1,
            call.name
        ))),
    }
}
