use crate::ast::SyntaxTree;
use crate::catalog::Catalog;
use crate::context::Context;
use crate::evaluator::Evaluator;
use crate::registry::Registry;
use crate::value::ValueHash;

use anyhow::Result;

/// The node a catalog is compiled for: a name, an environment, and the
/// facts provided by an external fact source.
#[derive(Debug)]
pub struct Node {
    /// Every `.`-separated prefix of the name, most specific first; node
    /// definition matching walks these in order.
    names: Vec<String>,
    environment: String,
    facts: ValueHash,
}

impl Node {
    pub fn new(
        name: impl AsRef<str>,
        environment: impl Into<String>,
        facts: ValueHash,
    ) -> Node {
        let name = name.as_ref().to_lowercase();
        let mut names = Vec::new();
        let mut end = 0;
        for segment in name.split('.') {
            end += segment.len() + usize::from(end > 0);
            if !segment.is_empty() {
                names.push(name[..end].to_string());
            }
        }
        if names.is_empty() {
            names.push(name);
        }
        names.reverse();
        Node {
            names,
            environment: environment.into(),
            facts,
        }
    }

    /// The full node name.
    pub fn name(&self) -> &str {
        &self.names[0]
    }

    /// Subnames, most specific first.
    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.names.iter()
    }

    pub fn environment_name(&self) -> &str {
        &self.environment
    }

    pub fn facts(&self) -> &ValueHash {
        &self.facts
    }

    /// Compiles a catalog for this node: evaluates every tree's top-level
    /// statements, evaluates the matching node definition, finalizes the
    /// deferred work, and populates relationship metaparameter edges.
    pub fn compile<'src>(
        &'src self,
        registry: &'src Registry<'src>,
        trees: &[&'src SyntaxTree],
    ) -> Result<Catalog> {
        let mut context = Context::new(self, registry)?;
        {
            let mut evaluator = Evaluator::new(&mut context);
            for tree in trees {
                evaluator.evaluate_tree(tree)?;
            }
            evaluator.evaluate_node()?;
            evaluator.finalize()?;
        }
        let mut catalog = context.into_catalog();
        catalog.populate_graph()?;
        Ok(catalog)
    }

    /// Renders an EPP template tree against this node's facts, returning
    /// the rendered text. `arguments` binds the template's parameter block.
    pub fn evaluate_epp<'src>(
        &'src self,
        registry: &'src Registry<'src>,
        template: &'src SyntaxTree,
        arguments: Option<ValueHash>,
    ) -> Result<String> {
        let mut context = Context::new(self, registry)?;
        let mut evaluator = Evaluator::new(&mut context);
        evaluator.evaluate_template(template, arguments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subnames_are_most_specific_first() {
        let node = Node::new("Web01.Example.COM", "production", ValueHash::new());
        assert_eq!(node.name(), "web01.example.com");
        let names: Vec<&str> = node.names().map(|s| s.as_str()).collect();
        assert_eq!(names, vec!["web01.example.com", "web01.example", "web01"]);
    }
}
