//! declarus is the evaluation core of a compiler for a declarative
//! configuration DSL. It ingests parsed syntax trees containing class,
//! defined-type, node, and resource declarations, evaluates them against a
//! per-node facts scope, and emits a catalog: a graph of concrete resources
//! with attributes and edges.
//!
//! The external collaborators are a parser producing [`ast::SyntaxTree`]
//! values, a fact provider filling a [`Node`], and a consumer of the
//! compiled [`Catalog`]. A compilation is driven through [`Node::compile`]:
//!
//! - every tree is imported into a [`Registry`], which indexes class,
//!   defined-type, and node definitions;
//! - an evaluation context is bound to the node and seeds the catalog;
//! - the evaluator walks each tree's top-level statements, declaring
//!   resources and queueing deferred work (collectors, defined types,
//!   overrides, relationships);
//! - finalization discharges the deferred work to a fixed point and the
//!   relationship metaparameters are populated as edges.

// Unsafe code should not be used.
#![forbid(unsafe_code)]
// Ensure that all lint names are valid.
#![deny(unknown_lints)]
#![deny(
    clippy::todo,
    clippy::unimplemented,
    deprecated,
    keyword_idents,
    macro_use_extern_crate,
    non_ascii_idents,
    nonstandard_style,
    noop_method_call,
    trivial_casts,
    unreachable_patterns,
    unused_extern_crates,
    unused_import_braces
)]
#![warn(clippy::dbg_macro, clippy::match_like_matches_macro, clippy::needless_continue)]

mod access;
pub mod ast;
mod catalog;
mod context;
mod evaluator;
mod functions;
mod node;
mod operators;
mod registry;
mod scope;
mod source;
pub mod types;
mod value;

pub use catalog::{Attribute, Catalog, Edge, Relationship, Resource, ResourceId};
pub use context::{Context, FunctionResolver};
pub use evaluator::Evaluator;
pub use node::Node;
pub use registry::Registry;
pub use scope::{Scope, ScopeArena, ScopeId};
pub use source::{Source, Span};
pub use types::Type;
pub use value::{enumerate_string, Value, ValueHash, ValueRegex};

use serde::Serialize;

/// A diagnostic severity of the DSL. The nine DSL levels map onto the four
/// levels of the `log` facade; the structured [`Diagnostic`] record keeps
/// the original level.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Debug,
    Info,
    Notice,
    Warning,
    Err,
    Alert,
    Emerg,
    Crit,
    Verbose,
}

impl Level {
    pub const NAMES: [&'static str; 9] = [
        "debug", "info", "notice", "warning", "err", "alert", "emerg", "crit", "verbose",
    ];

    pub fn name(self) -> &'static str {
        match self {
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Notice => "notice",
            Level::Warning => "warning",
            Level::Err => "err",
            Level::Alert => "alert",
            Level::Emerg => "emerg",
            Level::Crit => "crit",
            Level::Verbose => "verbose",
        }
    }

    pub fn from_name(name: &str) -> Option<Level> {
        match name {
            "debug" => Some(Level::Debug),
            "info" => Some(Level::Info),
            "notice" => Some(Level::Notice),
            "warning" => Some(Level::Warning),
            "err" => Some(Level::Err),
            "alert" => Some(Level::Alert),
            "emerg" => Some(Level::Emerg),
            "crit" => Some(Level::Crit),
            "verbose" => Some(Level::Verbose),
            _ => None,
        }
    }

    pub fn as_log_level(self) -> log::Level {
        match self {
            Level::Debug | Level::Verbose => log::Level::Debug,
            Level::Info | Level::Notice => log::Level::Info,
            Level::Warning => log::Level::Warn,
            Level::Err | Level::Alert | Level::Emerg | Level::Crit => log::Level::Error,
        }
    }
}

impl core::fmt::Display for Level {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

/// A structured diagnostic attached to a source position.
#[derive(Clone, Debug, Serialize)]
pub struct Diagnostic {
    pub level: Level,
    pub message: String,
    pub file: String,
    pub line: u32,
    pub column: u32,
    pub length: u32,
}
