use crate::catalog::ResourceId;
use crate::value::Value;

use std::collections::HashMap;
use std::rc::Rc;

/// Index of a scope in the context's arena.
///
/// Scopes parent-chain back to the top scope; holding them in an arena with
/// parent indices avoids reference-counted cycles.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ScopeId(pub(crate) usize);

#[derive(Debug)]
pub struct Scope {
    name: String,
    parent: Option<ScopeId>,
    resource: Option<ResourceId>,
    variables: HashMap<String, Rc<Value>>,
}

impl Scope {
    /// The fully-qualified name, e.g. `foo::bar`; empty for the top scope
    /// and for ephemeral scopes.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<ScopeId> {
        self.parent
    }

    /// The resource this scope declares into, if any.
    pub fn resource(&self) -> Option<ResourceId> {
        self.resource
    }

    pub fn set_resource(&mut self, resource: ResourceId) {
        self.resource = Some(resource);
    }

    /// Prefixes a local name with this scope's fully-qualified name.
    pub fn qualify(&self, local: &str) -> String {
        if self.name.is_empty() {
            local.to_string()
        } else {
            format!("{}::{local}", self.name)
        }
    }

    pub fn get(&self, name: &str) -> Option<&Rc<Value>> {
        self.variables.get(name)
    }

    /// Binds a variable. Returns false when the name is already bound in
    /// this scope; a variable cannot be assigned twice in the same scope.
    pub fn set(&mut self, name: &str, value: Rc<Value>) -> bool {
        if self.variables.contains_key(name) {
            return false;
        }
        self.variables.insert(name.to_string(), value);
        true
    }
}

#[derive(Debug, Default)]
pub struct ScopeArena {
    scopes: Vec<Scope>,
}

impl ScopeArena {
    pub fn new() -> ScopeArena {
        ScopeArena::default()
    }

    pub fn alloc(
        &mut self,
        name: impl Into<String>,
        parent: Option<ScopeId>,
        resource: Option<ResourceId>,
    ) -> ScopeId {
        let id = ScopeId(self.scopes.len());
        self.scopes.push(Scope {
            name: name.into(),
            parent,
            resource,
            variables: HashMap::new(),
        });
        id
    }

    pub fn get(&self, id: ScopeId) -> &Scope {
        &self.scopes[id.0]
    }

    pub fn get_mut(&mut self, id: ScopeId) -> &mut Scope {
        &mut self.scopes[id.0]
    }

    /// Resolves an unqualified variable by walking the parent chain; the
    /// chain always terminates in the top scope.
    pub fn lookup(&self, scope: ScopeId, name: &str) -> Option<Rc<Value>> {
        let mut current = Some(scope);
        while let Some(id) = current {
            let scope = self.get(id);
            if let Some(value) = scope.get(name) {
                return Some(value.clone());
            }
            current = scope.parent();
        }
        None
    }

    /// The resource of the nearest scope in the chain that has one.
    pub fn containing_resource(&self, scope: ScopeId) -> Option<ResourceId> {
        let mut current = Some(scope);
        while let Some(id) = current {
            let scope = self.get(id);
            if let Some(resource) = scope.resource() {
                return Some(resource);
            }
            current = scope.parent();
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assignment_guard() {
        let mut arena = ScopeArena::new();
        let top = arena.alloc("", None, None);
        assert!(arena.get_mut(top).set("x", Rc::new(Value::Integer(1))));
        assert!(!arena.get_mut(top).set("x", Rc::new(Value::Integer(2))));
        assert_eq!(
            arena.lookup(top, "x").as_deref(),
            Some(&Value::Integer(1))
        );
    }

    #[test]
    fn lookup_walks_parent_chain() {
        let mut arena = ScopeArena::new();
        let top = arena.alloc("", None, None);
        let class = arena.alloc("foo", Some(top), None);
        let inner = arena.alloc("foo::bar", Some(class), None);
        arena.get_mut(top).set("a", Rc::new(Value::Integer(1)));
        arena.get_mut(class).set("b", Rc::new(Value::Integer(2)));
        assert_eq!(arena.lookup(inner, "a").as_deref(), Some(&Value::Integer(1)));
        assert_eq!(arena.lookup(inner, "b").as_deref(), Some(&Value::Integer(2)));
        assert!(arena.lookup(inner, "c").is_none());
    }

    #[test]
    fn qualification() {
        let mut arena = ScopeArena::new();
        let top = arena.alloc("", None, None);
        let class = arena.alloc("foo::bar", Some(top), None);
        assert_eq!(arena.get(top).qualify("x"), "x");
        assert_eq!(arena.get(class).qualify("x"), "foo::bar::x");
    }
}
