use crate::ast::AttributeOp;
use crate::source::Span;
use crate::types::{canonicalize_type_name, normalize_class_name, Type};
use crate::value::Value;

use std::collections::{BTreeSet, HashMap};
use std::rc::Rc;

use anyhow::Result;
use lazy_static::lazy_static;
use serde::ser::{SerializeMap, SerializeSeq, Serializer};
use serde::Serialize;

/// Index of a resource in its catalog.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ResourceId(pub(crate) usize);

/// A relationship between two resources, as declared.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Relationship {
    Before,
    Notify,
    Require,
    Subscribe,
}

impl Relationship {
    pub fn name(self) -> &'static str {
        match self {
            Relationship::Before => "before",
            Relationship::Notify => "notify",
            Relationship::Require => "require",
            Relationship::Subscribe => "subscribe",
        }
    }

    pub fn from_attribute(name: &str) -> Option<Relationship> {
        match name {
            "before" => Some(Relationship::Before),
            "notify" => Some(Relationship::Notify),
            "require" => Some(Relationship::Require),
            "subscribe" => Some(Relationship::Subscribe),
            _ => None,
        }
    }
}

/// An evaluated attribute. Overrides share one evaluated attribute across
/// every resource they apply to.
#[derive(Clone, Debug)]
pub struct Attribute {
    pub name: String,
    pub name_span: Span,
    pub value: Value,
    pub value_span: Span,
}

/// A concrete catalog entry identified by canonical (type, title).
#[derive(Clone, Debug)]
pub struct Resource {
    type_name: String,
    title: String,
    span: Span,
    container: Option<ResourceId>,
    virtual_: bool,
    exported: bool,
    tags: BTreeSet<String>,
    attributes: Vec<Rc<Attribute>>,
}

impl Resource {
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn container(&self) -> Option<ResourceId> {
        self.container
    }

    pub fn is_class(&self) -> bool {
        self.type_name == "Class"
    }

    pub fn is_virtual(&self) -> bool {
        self.virtual_
    }

    pub fn is_exported(&self) -> bool {
        self.exported
    }

    /// Clears the virtual and exported flags; the resource becomes part of
    /// the compiled catalog.
    pub fn realize(&mut self) {
        self.virtual_ = false;
        self.exported = false;
    }

    pub fn tag(&mut self, tag: impl Into<String>) {
        self.tags.insert(tag.into().to_lowercase());
    }

    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    /// The type value referencing this resource: `Class[name]` for class
    /// resources, `Type[title]` otherwise.
    pub fn reference(&self) -> Type {
        if self.is_class() {
            Type::class(&self.title)
        } else {
            Type::resource_title(&self.type_name, &self.title)
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&Rc<Attribute>> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn value_of(&self, name: &str) -> Option<&Value> {
        self.attribute(name).map(|a| &a.value)
    }

    pub fn attributes(&self) -> impl Iterator<Item = &Rc<Attribute>> {
        self.attributes.iter()
    }

    /// Sets or overrides an attribute. An assignment replaces any existing
    /// value in place; an append merges the new value onto the existing one
    /// as an array.
    pub fn apply(&mut self, attribute: Rc<Attribute>, op: AttributeOp) -> Result<()> {
        let existing = self.attributes.iter_mut().find(|a| a.name == attribute.name);
        match op {
            AttributeOp::Assignment => match existing {
                Some(slot) => {
                    if **slot != *attribute {
                        *slot = attribute;
                    }
                    Ok(())
                }
                None => {
                    self.attributes.push(attribute);
                    Ok(())
                }
            },
            AttributeOp::Append => match existing {
                Some(slot) => {
                    let mut merged = slot.value.to_array();
                    merged.extend(attribute.value.to_array());
                    *slot = Rc::new(Attribute {
                        name: attribute.name.clone(),
                        name_span: attribute.name_span.clone(),
                        value: Value::from(merged),
                        value_span: attribute.value_span.clone(),
                    });
                    Ok(())
                }
                None => {
                    self.attributes.push(attribute);
                    Ok(())
                }
            },
        }
    }
}

impl PartialEq for Attribute {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.value == other.value
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Edge {
    pub source: ResourceId,
    pub target: ResourceId,
    pub relationship: Relationship,
}

/// The compiled output for one node: an insertion-ordered resource store
/// with relationship and containment edge lists.
#[derive(Debug)]
pub struct Catalog {
    node_name: String,
    environment: String,
    resources: Vec<Resource>,
    index: HashMap<(String, String), ResourceId>,
    relationships: Vec<Edge>,
    containment: Vec<(ResourceId, ResourceId)>,
}

impl Catalog {
    pub fn new(node_name: impl Into<String>, environment: impl Into<String>) -> Catalog {
        Catalog {
            node_name: node_name.into(),
            environment: environment.into(),
            resources: Vec::new(),
            index: HashMap::new(),
            relationships: Vec::new(),
            containment: Vec::new(),
        }
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// Inserts a new resource, returning its id, or `None` when a resource
    /// with the same (type, title) already exists.
    pub fn add(
        &mut self,
        type_name: &str,
        title: &str,
        container: Option<ResourceId>,
        span: Span,
        virtual_: bool,
        exported: bool,
    ) -> Option<ResourceId> {
        let type_name = canonicalize_type_name(type_name);
        let title = if type_name == "Class" {
            normalize_class_name(title)
        } else {
            title.to_string()
        };
        let key = (type_name.clone(), title.clone());
        if self.index.contains_key(&key) {
            return None;
        }
        let id = ResourceId(self.resources.len());
        let mut resource = Resource {
            type_name,
            title,
            span,
            container,
            virtual_,
            exported,
            tags: BTreeSet::new(),
            attributes: Vec::new(),
        };
        resource.tag(resource.type_name.clone());
        self.index.insert(key, id);
        self.resources.push(resource);
        if let Some(container) = container {
            self.containment.push((container, id));
        }
        Some(id)
    }

    pub fn find(&self, type_name: &str, title: &str) -> Option<ResourceId> {
        let type_name = canonicalize_type_name(type_name);
        let title = if type_name == "Class" {
            normalize_class_name(title)
        } else {
            title.to_string()
        };
        self.index.get(&(type_name, title)).copied()
    }

    pub fn find_type(&self, reference: &Type) -> Option<ResourceId> {
        match reference {
            Type::Resource { type_name, title } => self.find(type_name, title),
            Type::Class(Some(name)) => self.find("Class", name),
            _ => None,
        }
    }

    pub fn get(&self, id: ResourceId) -> &Resource {
        &self.resources[id.0]
    }

    pub fn get_mut(&mut self, id: ResourceId) -> &mut Resource {
        &mut self.resources[id.0]
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Resources in declaration order.
    pub fn resources(&self) -> impl Iterator<Item = (ResourceId, &Resource)> {
        self.resources
            .iter()
            .enumerate()
            .map(|(i, r)| (ResourceId(i), r))
    }

    pub fn ids(&self) -> impl Iterator<Item = ResourceId> {
        (0..self.resources.len()).map(ResourceId)
    }

    pub fn add_relationship(&mut self, edge: Edge) {
        if !self.relationships.contains(&edge) {
            self.relationships.push(edge);
        }
    }

    pub fn add_containment(&mut self, container: ResourceId, contained: ResourceId) {
        let edge = (container, contained);
        if !self.containment.contains(&edge) {
            self.containment.push(edge);
        }
    }

    pub fn relationships(&self) -> &[Edge] {
        &self.relationships
    }

    pub fn containment(&self) -> &[(ResourceId, ResourceId)] {
        &self.containment
    }

    /// Walks every resource's relationship metaparameters and records the
    /// corresponding edges. Runs after finalization.
    pub fn populate_graph(&mut self) -> Result<()> {
        let mut edges = Vec::new();
        for (id, resource) in self.resources() {
            for attribute in resource.attributes() {
                let Some(relationship) = Relationship::from_attribute(&attribute.name) else {
                    continue;
                };
                for reference in reference_list(&attribute.value) {
                    let target = self.find_type(&reference).ok_or_else(|| {
                        attribute.value_span.error(format!(
                            "resource {reference} referenced by attribute '{}' does not exist in the catalog.",
                            attribute.name
                        ))
                    })?;
                    edges.push(Edge {
                        source: id,
                        target,
                        relationship,
                    });
                }
            }
        }
        for edge in edges {
            self.add_relationship(edge);
        }
        Ok(())
    }

    pub fn to_json_str(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Flattens a relationship value into the resource references it names.
/// Accepts resource reference types, `Class[name]` types, strings in
/// `Type[title]` form, and arrays thereof; anything else is skipped (the
/// attribute was validated on assignment).
pub fn reference_list(value: &Value) -> Vec<Type> {
    lazy_static! {
        static ref REFERENCE: regex::Regex =
            regex::Regex::new(r"^((?:(?:::)?[A-Za-z]\w*)+)\[([^\]]+)\]$").unwrap();
    }

    fn collect(value: &Value, references: &mut Vec<Type>) {
        match value.dereference() {
            Value::Array(items) => {
                for item in items.iter() {
                    collect(item, references);
                }
            }
            Value::Type(t) => match t.as_ref() {
                Type::Resource { .. } | Type::Class(_) => references.push((**t).clone()),
                _ => {}
            },
            Value::String(s) => {
                if let Some(captures) = REFERENCE.captures(s) {
                    let name = &captures[1];
                    let title = captures[2].trim().trim_matches(|c| c == '\'' || c == '"');
                    if canonicalize_type_name(name) == "Class" {
                        references.push(Type::class(title));
                    } else {
                        references.push(Type::resource_title(name, title));
                    }
                }
            }
            _ => {}
        }
    }

    let mut references = Vec::new();
    collect(value, &mut references);
    references
}

impl Serialize for Catalog {
    fn serialize<S>(&self, serializer: S) -> core::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        struct Resources<'a>(&'a Catalog);
        struct Edges<'a>(&'a Catalog);

        impl Serialize for Resources<'_> {
            fn serialize<S>(&self, serializer: S) -> core::result::Result<S::Ok, S::Error>
            where
                S: Serializer,
            {
                let mut seq = serializer.serialize_seq(None)?;
                for resource in &self.0.resources {
                    if resource.is_virtual() {
                        continue;
                    }
                    seq.serialize_element(&SerializedResource(resource))?;
                }
                seq.end()
            }
        }

        impl Serialize for Edges<'_> {
            fn serialize<S>(&self, serializer: S) -> core::result::Result<S::Ok, S::Error>
            where
                S: Serializer,
            {
                let mut seq = serializer.serialize_seq(Some(self.0.relationships.len()))?;
                for edge in &self.0.relationships {
                    let source = self.0.get(edge.source);
                    let target = self.0.get(edge.target);
                    let mut map = std::collections::BTreeMap::new();
                    map.insert("source", source.reference().to_string());
                    map.insert("target", target.reference().to_string());
                    map.insert("relationship", edge.relationship.name().to_string());
                    seq.serialize_element(&map)?;
                }
                seq.end()
            }
        }

        let mut map = serializer.serialize_map(Some(4))?;
        map.serialize_entry("name", &self.node_name)?;
        map.serialize_entry("environment", &self.environment)?;
        map.serialize_entry("resources", &Resources(self))?;
        map.serialize_entry("edges", &Edges(self))?;
        map.end()
    }
}

struct SerializedResource<'a>(&'a Resource);

impl Serialize for SerializedResource<'_> {
    fn serialize<S>(&self, serializer: S) -> core::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let resource = self.0;
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("type", &resource.type_name)?;
        map.serialize_entry("title", &resource.title)?;
        map.serialize_entry("tags", &resource.tags)?;
        map.serialize_entry("file", resource.span.source.path())?;
        map.serialize_entry("line", &resource.span.line)?;
        if resource.exported {
            map.serialize_entry("exported", &true)?;
        }
        let parameters: Vec<(&str, &Value)> = resource
            .attributes
            .iter()
            .map(|a| (a.name.as_str(), &a.value))
            .collect();
        struct Parameters<'a>(Vec<(&'a str, &'a Value)>);
        impl Serialize for Parameters<'_> {
            fn serialize<S>(&self, serializer: S) -> core::result::Result<S::Ok, S::Error>
            where
                S: Serializer,
            {
                let mut map = serializer.serialize_map(Some(self.0.len()))?;
                for (name, value) in &self.0 {
                    map.serialize_entry(name, value)?;
                }
                map.end()
            }
        }
        map.serialize_entry("parameters", &Parameters(parameters))?;
        map.end()
    }
}
