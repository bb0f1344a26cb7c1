use crate::ast::{AttributeOp, DefinedTypeExpr, Query};
use crate::catalog::{Attribute, Catalog, Relationship, ResourceId};
use crate::node::Node;
use crate::registry::Registry;
use crate::scope::{ScopeArena, ScopeId};
use crate::source::{Source, Span};
use crate::types::Type;
use crate::value::{Value, ValueHash};
use crate::{Diagnostic, Level};

use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use anyhow::{anyhow, Result};

/// The fallback resolver consulted for functions the dispatcher does not
/// know; the hook through which lazily-loaded functions are provided.
pub type FunctionResolver = Box<dyn Fn(&str, &[Value]) -> Option<Result<Value>>>;

/// The predicate side of a registered collector.
#[derive(Debug)]
pub enum CollectorQuery<'src> {
    /// A `Type <| query |>` expression.
    Expression {
        type_name: String,
        exported: bool,
        query: Option<&'src Query>,
    },
    /// A list of concrete references from `realize`; every entry must end up
    /// collected by the time finalization completes.
    List(Vec<(Type, Span)>),
}

#[derive(Debug)]
pub struct Collector<'src> {
    pub query: CollectorQuery<'src>,
    pub scope: ScopeId,
    pub attributes: Vec<(AttributeOp, Rc<Attribute>)>,
    pub collected: HashSet<ResourceId>,
}

/// A defined type accepted into the catalog, awaiting body evaluation
/// during finalization.
#[derive(Debug)]
pub struct DeclaredDefinedType<'src> {
    pub resource: ResourceId,
    pub name: String,
    pub definition: &'src DefinedTypeExpr,
    pub evaluated: bool,
}

/// A queued `Type[title] { ... }` override, captured with its scope.
#[derive(Debug)]
pub struct ResourceOverride {
    pub type_name: String,
    pub title: String,
    pub span: Span,
    pub attributes: Vec<(AttributeOp, Rc<Attribute>)>,
    pub scope: ScopeId,
}

/// A relationship produced by an edge operator, evaluated at finalization.
#[derive(Debug)]
pub struct ResourceRelationship {
    pub relationship: Relationship,
    pub source: Value,
    pub source_span: Span,
    pub target: Value,
    pub target_span: Span,
}

/// The per-compilation evaluation state: scope stacks, match captures, EPP
/// output streams, the deferred-work queues, and the catalog under
/// construction.
pub struct Context<'src> {
    node: &'src Node,
    registry: &'src Registry<'src>,
    catalog: Catalog,
    pub(crate) scopes: ScopeArena,
    scope_index: HashMap<String, ScopeId>,
    scope_stack: Vec<ScopeId>,
    node_scope: Option<ScopeId>,
    match_stack: Vec<Vec<Rc<Value>>>,
    declared_classes: HashSet<String>,
    pub(crate) collectors: Vec<Collector<'src>>,
    pub(crate) defined_types: Vec<DeclaredDefinedType<'src>>,
    pub(crate) overrides: Vec<ResourceOverride>,
    pub(crate) relationships: Vec<ResourceRelationship>,
    streams: Vec<String>,
    diagnostics: Vec<Diagnostic>,
    resolver: Option<FunctionResolver>,
}

impl<'src> Context<'src> {
    /// Creates a context bound to a node, seeding the catalog with the
    /// initial `Stage[main]`, `Class[settings]`, and `Class[main]` resources
    /// and publishing the node's facts into the top scope.
    pub fn new(node: &'src Node, registry: &'src Registry<'src>) -> Result<Context<'src>> {
        let mut catalog = Catalog::new(node.name(), node.environment_name());
        let mut scopes = ScopeArena::new();
        let top = scopes.alloc("", None, None);

        let initial = Source::from_contents(format!("<{}>", node.name()), "").span();
        let stage = catalog
            .add("stage", "main", None, initial.clone(), false, false)
            .ok_or_else(|| anyhow!("internal error: expected main stage to not be present"))?;
        let settings = catalog
            .add("class", "settings", Some(stage), initial.clone(), false, false)
            .ok_or_else(|| anyhow!("internal error: expected settings class to not be present"))?;
        let main = catalog
            .add("class", "main", Some(stage), initial, false, false)
            .ok_or_else(|| anyhow!("internal error: expected main class to not be present"))?;

        let settings_scope = scopes.alloc("settings", Some(top), Some(settings));
        scopes.get_mut(top).set_resource(main);

        let mut context = Context {
            node,
            registry,
            catalog,
            scopes,
            scope_index: HashMap::new(),
            scope_stack: vec![top],
            node_scope: None,
            match_stack: Vec::new(),
            declared_classes: HashSet::new(),
            collectors: Vec::new(),
            defined_types: Vec::new(),
            overrides: Vec::new(),
            relationships: Vec::new(),
            streams: Vec::new(),
            diagnostics: Vec::new(),
            resolver: None,
        };
        context.scope_index.insert("settings".to_string(), settings_scope);
        context.declared_classes.insert("settings".to_string());
        context.declared_classes.insert("main".to_string());
        context.publish_facts();
        Ok(context)
    }

    fn publish_facts(&mut self) {
        let top = self.top_scope();
        let mut facts_hash = ValueHash::new();
        for (key, value) in self.node.facts().iter() {
            facts_hash.insert(key.clone(), value.clone());
            if let Some(name) = key.as_string() {
                let name = name.to_string();
                self.scopes
                    .get_mut(top)
                    .set(&name, Rc::new(value.clone()));
            }
        }
        let scope = self.scopes.get_mut(top);
        scope.set("facts", Rc::new(Value::from(facts_hash)));
        scope.set(
            "environment",
            Rc::new(Value::from(self.node.environment_name())),
        );
    }

    pub fn node(&self) -> &'src Node {
        self.node
    }

    pub fn registry(&self) -> &'src Registry<'src> {
        self.registry
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn catalog_mut(&mut self) -> &mut Catalog {
        &mut self.catalog
    }

    /// Surrenders the finished catalog.
    pub fn into_catalog(self) -> Catalog {
        self.catalog
    }

    pub fn set_function_resolver(&mut self, resolver: FunctionResolver) {
        self.resolver = Some(resolver);
    }

    pub fn resolve_function(&self, name: &str, arguments: &[Value]) -> Option<Result<Value>> {
        self.resolver.as_ref().and_then(|r| r(name, arguments))
    }

    // Scopes

    /// The top of the scope stack; the stack is never empty.
    pub fn current_scope(&self) -> ScopeId {
        *self.scope_stack.last().unwrap_or(&ScopeId(0))
    }

    pub fn top_scope(&self) -> ScopeId {
        self.scope_stack.first().copied().unwrap_or(ScopeId(0))
    }

    pub fn node_scope(&self) -> Option<ScopeId> {
        self.node_scope
    }

    /// The node scope if one is established, otherwise the top scope.
    pub fn node_or_top(&self) -> ScopeId {
        self.node_scope.unwrap_or_else(|| self.top_scope())
    }

    /// Registers a named scope; returns false if the name is taken.
    pub fn add_scope(&mut self, name: &str, scope: ScopeId) -> bool {
        if self.scope_index.contains_key(name) {
            return false;
        }
        self.scope_index.insert(name.to_string(), scope);
        true
    }

    pub fn find_scope(&self, name: &str) -> Option<ScopeId> {
        if name.is_empty() {
            return Some(self.top_scope());
        }
        self.scope_index.get(name).copied()
    }

    pub(crate) fn push_scope(&mut self, scope: ScopeId) {
        self.scope_stack.push(scope);
    }

    pub(crate) fn pop_scope(&mut self) {
        if self.scope_stack.len() > 1 {
            self.scope_stack.pop();
        }
    }

    pub(crate) fn set_node_scope(&mut self, scope: ScopeId) {
        self.node_scope = Some(scope);
    }

    pub(crate) fn clear_node_scope(&mut self) {
        self.node_scope = None;
    }

    // Match variables

    pub(crate) fn push_match_scope(&mut self) {
        self.match_stack.push(Vec::new());
    }

    pub(crate) fn pop_match_scope(&mut self) {
        self.match_stack.pop();
    }

    /// Replaces the captures of the innermost match scope. Has no effect
    /// when no match scope is present.
    pub fn set_matches(&mut self, matches: Vec<Rc<Value>>) {
        if let Some(frame) = self.match_stack.last_mut() {
            *frame = matches;
        }
    }

    /// Returns the capture group from the most recent set of matches.
    pub fn lookup_match(&self, index: usize) -> Option<Rc<Value>> {
        for frame in self.match_stack.iter().rev() {
            if !frame.is_empty() {
                return frame.get(index).cloned();
            }
        }
        None
    }

    /// Looks up a variable value. Qualified lookups resolve the namespace
    /// through the scope index; an unknown namespace logs a warning and
    /// yields `None` rather than failing.
    pub fn lookup_variable(&mut self, name: &str, span: &Span, warn: bool) -> Option<Rc<Value>> {
        let name = name.trim_start_matches("::");
        match name.rsplit_once("::") {
            Some((namespace, local)) => match self.find_scope(namespace) {
                Some(scope) => self.scopes.get(scope).get(local).cloned(),
                None => {
                    if warn {
                        self.log(
                            Level::Warning,
                            format!(
                                "could not look up variable ${name}: namespace '{namespace}' does not exist."
                            ),
                            Some(span),
                        );
                    }
                    None
                }
            },
            None => self.scopes.lookup(self.current_scope(), name),
        }
    }

    // Classes

    pub fn is_class_declared(&self, name: &str) -> bool {
        self.declared_classes.contains(name)
    }

    pub(crate) fn mark_class_declared(&mut self, name: &str) {
        self.declared_classes.insert(name.to_string());
    }

    // Deferred work

    /// Registers a collector and returns its index; the index doubles as the
    /// runtime object identity for collector-attribute chaining.
    pub fn add_collector(&mut self, collector: Collector<'src>) -> usize {
        self.collectors.push(collector);
        self.collectors.len() - 1
    }

    pub fn add_defined_type(&mut self, declared: DeclaredDefinedType<'src>) {
        self.defined_types.push(declared);
    }

    pub fn add_relationship(&mut self, relationship: ResourceRelationship) {
        self.relationships.push(relationship);
    }

    /// Queues an override, applying it immediately when the target resource
    /// is already declared.
    pub fn add_override(&mut self, resource_override: ResourceOverride) -> Result<()> {
        if self.try_apply_override(&resource_override)? {
            return Ok(());
        }
        self.overrides.push(resource_override);
        Ok(())
    }

    /// Applies the override when its target exists; returns whether it was
    /// applied.
    pub(crate) fn try_apply_override(
        &mut self,
        resource_override: &ResourceOverride,
    ) -> Result<bool> {
        let Some(id) = self
            .catalog
            .find(&resource_override.type_name, &resource_override.title)
        else {
            return Ok(false);
        };
        let resource = self.catalog.get_mut(id);
        for (op, attribute) in &resource_override.attributes {
            resource.apply(attribute.clone(), *op)?;
        }
        Ok(true)
    }

    /// Applies every queued override targeting the given resource;
    /// called immediately after each resource declaration.
    pub fn evaluate_overrides(&mut self, type_name: &str, title: &str) -> Result<()> {
        let mut remaining = Vec::with_capacity(self.overrides.len());
        for resource_override in std::mem::take(&mut self.overrides) {
            if resource_override.type_name == type_name && resource_override.title == title {
                if self.try_apply_override(&resource_override)? {
                    continue;
                }
            }
            remaining.push(resource_override);
        }
        self.overrides = remaining;
        Ok(())
    }

    // EPP streams

    pub(crate) fn push_stream(&mut self) {
        self.streams.push(String::new());
    }

    pub(crate) fn pop_stream(&mut self) -> String {
        self.streams.pop().unwrap_or_default()
    }

    /// Writes to the innermost EPP stream; false when no stream is active.
    pub fn epp_write(&mut self, text: &str) -> bool {
        match self.streams.last_mut() {
            Some(stream) => {
                stream.push_str(text);
                true
            }
            None => false,
        }
    }

    // Diagnostics

    /// Records a structured diagnostic and forwards it to the log facade.
    pub fn log(&mut self, level: Level, message: impl Into<String>, span: Option<&Span>) {
        let message = message.into();
        match level.as_log_level() {
            log::Level::Error => log::error!("node '{}': {message}", self.node.name()),
            log::Level::Warn => log::warn!("node '{}': {message}", self.node.name()),
            log::Level::Info => log::info!("node '{}': {message}", self.node.name()),
            _ => log::debug!("node '{}': {message}", self.node.name()),
        }
        let diagnostic = match span {
            Some(span) => Diagnostic {
                level,
                message,
                file: span.source.path().to_string(),
                line: span.line,
                column: span.col,
                length: span.len(),
            },
            None => Diagnostic {
                level,
                message,
                file: String::new(),
                line: 0,
                column: 0,
                length: 0,
            },
        };
        self.diagnostics.push(diagnostic);
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }
}
