//! One built-in per diagnostic level; each logs its arguments joined with
//! a space and returns undef.

use super::{BuiltinFcn, CallSite};
use crate::evaluator::Evaluator;
use crate::value::Value;
use crate::Level;

use std::collections::HashMap;

use anyhow::Result;

pub fn register(m: &mut HashMap<&'static str, BuiltinFcn>) {
    m.insert("alert", alert);
    m.insert("crit", crit);
    m.insert("debug", debug);
    m.insert("emerg", emerg);
    m.insert("err", err);
    m.insert("info", info);
    m.insert("notice", notice);
    m.insert("verbose", verbose);
    m.insert("warning", warning);
}

fn log_at(ev: &mut Evaluator<'_, '_>, call: &CallSite<'_>, level: Level) -> Result<Value> {
    let message: Vec<String> = call.arguments.iter().map(|v| v.to_string()).collect();
    ev.context()
        .log(level, message.join(" "), Some(call.span));
    Ok(Value::Undef)
}

fn alert<'src>(ev: &mut Evaluator<'_, 'src>, call: &CallSite<'src>) -> Result<Value> {
    log_at(ev, call, Level::Alert)
}

fn crit<'src>(ev: &mut Evaluator<'_, 'src>, call: &CallSite<'src>) -> Result<Value> {
    log_at(ev, call, Level::Crit)
}

fn debug<'src>(ev: &mut Evaluator<'_, 'src>, call: &CallSite<'src>) -> Result<Value> {
    log_at(ev, call, Level::Debug)
}

fn emerg<'src>(ev: &mut Evaluator<'_, 'src>, call: &CallSite<'src>) -> Result<Value> {
    log_at(ev, call, Level::Emerg)
}

fn err<'src>(ev: &mut Evaluator<'_, 'src>, call: &CallSite<'src>) -> Result<Value> {
    log_at(ev, call, Level::Err)
}

fn info<'src>(ev: &mut Evaluator<'_, 'src>, call: &CallSite<'src>) -> Result<Value> {
    log_at(ev, call, Level::Info)
}

fn notice<'src>(ev: &mut Evaluator<'_, 'src>, call: &CallSite<'src>) -> Result<Value> {
    log_at(ev, call, Level::Notice)
}

fn verbose<'src>(ev: &mut Evaluator<'_, 'src>, call: &CallSite<'src>) -> Result<Value> {
    log_at(ev, call, Level::Verbose)
}

fn warning<'src>(ev: &mut Evaluator<'_, 'src>, call: &CallSite<'src>) -> Result<Value> {
    log_at(ev, call, Level::Warning)
}
