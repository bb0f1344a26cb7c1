use crate::ast::{ClassExpr, DefinedTypeExpr, Expr, NodeExpr, NodeMatcher, SyntaxTree};
use crate::node::Node;
use crate::source::Span;
use crate::types::normalize_class_name;

use std::collections::{HashMap, HashSet};

use anyhow::Result;

/// A registered class definition. A class may be defined more than once;
/// every definition evaluates into the single class scope on first
/// declaration.
#[derive(Debug)]
pub struct ClassDefinition<'src> {
    name: String,
    expression: &'src ClassExpr,
}

impl<'src> ClassDefinition<'src> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn expression(&self) -> &'src ClassExpr {
        self.expression
    }
}

#[derive(Debug)]
pub struct DefinedTypeDefinition<'src> {
    name: String,
    expression: &'src DefinedTypeExpr,
}

impl<'src> DefinedTypeDefinition<'src> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn expression(&self) -> &'src DefinedTypeExpr {
        self.expression
    }
}

#[derive(Debug)]
pub struct NodeDefinition<'src> {
    expression: &'src NodeExpr,
}

impl<'src> NodeDefinition<'src> {
    pub fn expression(&self) -> &'src NodeExpr {
        self.expression
    }
}

/// Indexes class, defined-type, and node definitions by name.
///
/// The registry borrows from the imported trees and is logically read-only
/// once every tree is imported; contexts share it by reference.
#[derive(Debug, Default)]
pub struct Registry<'src> {
    imported: HashSet<*const SyntaxTree>,
    classes: HashMap<String, Vec<ClassDefinition<'src>>>,
    defined_types: HashMap<String, DefinedTypeDefinition<'src>>,
    nodes: Vec<NodeDefinition<'src>>,
    named_nodes: HashMap<String, usize>,
    regex_nodes: Vec<(regex::Regex, usize)>,
    default_node: Option<usize>,
}

impl<'src> Registry<'src> {
    pub fn new() -> Registry<'src> {
        Registry::default()
    }

    /// Scans a parsed tree and registers every class, defined-type, and node
    /// expression it contains. Importing the same tree again is a no-op;
    /// scanning is order-independent.
    pub fn import(&mut self, tree: &'src SyntaxTree) -> Result<()> {
        let tree_ptr: *const SyntaxTree = tree;
        if !self.imported.insert(tree_ptr) {
            return Ok(());
        }
        self.scan(&tree.statements, "")
    }

    fn scan(&mut self, statements: &'src [Expr], namespace: &str) -> Result<()> {
        for statement in statements {
            match statement {
                Expr::Class(class) => {
                    let name = qualify(namespace, &class.name);
                    self.register_class(name.clone(), class)?;
                    // Nested definitions qualify under the enclosing class.
                    self.scan(&class.body, &name)?;
                }
                Expr::DefinedType(defined_type) => {
                    let name = qualify(namespace, &defined_type.name);
                    self.register_defined_type(name, defined_type)?;
                }
                Expr::Node(node) => {
                    self.register_node(node)?;
                    self.scan(&node.body, namespace)?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn register_class(&mut self, name: String, expression: &'src ClassExpr) -> Result<()> {
        if let Some(defined_type) = self.defined_types.get(&name) {
            return Err(redefinition(
                &expression.span,
                "class",
                &name,
                &defined_type.expression.span,
            ));
        }
        self.classes
            .entry(name.clone())
            .or_default()
            .push(ClassDefinition { name, expression });
        Ok(())
    }

    fn register_defined_type(
        &mut self,
        name: String,
        expression: &'src DefinedTypeExpr,
    ) -> Result<()> {
        if let Some(classes) = self.classes.get(&name) {
            if let Some(first) = classes.first() {
                return Err(redefinition(
                    &expression.span,
                    "defined type",
                    &name,
                    &first.expression.span,
                ));
            }
        }
        if let Some(previous) = self.defined_types.get(&name) {
            return Err(redefinition(
                &expression.span,
                "defined type",
                &name,
                &previous.expression.span,
            ));
        }
        self.defined_types
            .insert(name.clone(), DefinedTypeDefinition { name, expression });
        Ok(())
    }

    fn register_node(&mut self, expression: &'src NodeExpr) -> Result<()> {
        let index = self.nodes.len();
        for matcher in &expression.matchers {
            match matcher {
                NodeMatcher::Name(name) => {
                    let name = name.to_lowercase();
                    if let Some(&previous) = self.named_nodes.get(&name) {
                        return Err(redefinition(
                            &expression.span,
                            "node",
                            &name,
                            &self.nodes[previous].expression.span,
                        ));
                    }
                    self.named_nodes.insert(name, index);
                }
                NodeMatcher::Regex(pattern) => {
                    let regex = regex::Regex::new(pattern).map_err(|e| {
                        expression
                            .span
                            .error(format!("invalid node matcher regular expression: {e}"))
                    })?;
                    self.regex_nodes.push((regex, index));
                }
                NodeMatcher::Default => {
                    if let Some(previous) = self.default_node {
                        return Err(redefinition(
                            &expression.span,
                            "node",
                            "default",
                            &self.nodes[previous].expression.span,
                        ));
                    }
                    self.default_node = Some(index);
                }
            }
        }
        self.nodes.push(NodeDefinition { expression });
        Ok(())
    }

    /// All definitions of a class, in import order.
    pub fn find_class(&self, name: &str) -> Option<&[ClassDefinition<'src>]> {
        self.classes
            .get(&normalize_class_name(name))
            .map(|v| v.as_slice())
    }

    pub fn find_defined_type(&self, name: &str) -> Option<&DefinedTypeDefinition<'src>> {
        self.defined_types.get(&normalize_class_name(name))
    }

    pub fn is_defined(&self, name: &str) -> bool {
        let name = normalize_class_name(name);
        self.classes.contains_key(&name) || self.defined_types.contains_key(&name)
    }

    /// Finds the node definition matching the given node, along with the
    /// name to use for the node scope. Exact hostnames win (most specific
    /// `.`-separated prefix first), then regex definitions in declaration
    /// order, then the default.
    pub fn find_node(&self, node: &Node) -> Option<(&NodeDefinition<'src>, String)> {
        for name in node.names() {
            if let Some(&index) = self.named_nodes.get(name) {
                return Some((&self.nodes[index], name.clone()));
            }
        }
        for (regex, index) in &self.regex_nodes {
            if regex.is_match(node.name()) {
                return Some((&self.nodes[*index], node.name().to_string()));
            }
        }
        self.default_node
            .map(|index| (&self.nodes[index], "default".to_string()))
    }

    pub fn has_nodes(&self) -> bool {
        !self.nodes.is_empty()
    }
}

fn qualify(namespace: &str, name: &str) -> String {
    let name = normalize_class_name(name);
    if namespace.is_empty() || name.contains("::") {
        name
    } else {
        format!("{namespace}::{name}")
    }
}

fn redefinition(span: &Span, kind: &str, name: &str, previous: &Span) -> anyhow::Error {
    span.error(format!(
        "{kind} '{name}' was previously defined at {}.",
        previous.location()
    ))
}
