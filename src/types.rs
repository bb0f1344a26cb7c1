use crate::value::{Value, ValueRegex};

use core::fmt;
use std::rc::Rc;

use anyhow::{bail, Result};

/// A structural type of the DSL's type system.
///
/// Every alternative answers two predicates: [`Type::is_instance`] decides
/// membership of a value, and [`Type::is_specialization`] decides whether
/// another type is strictly more specific than this one. Specialization
/// induces the subtype lattice used by Variant resolution, parameter
/// validation, and the access operators.
#[derive(Clone, Debug, PartialEq)]
pub enum Type {
    Any,
    Undef,
    Default,
    Boolean,
    Integer { from: i64, to: i64 },
    Float { from: f64, to: f64 },
    /// Byte-length bounds.
    String { from: i64, to: i64 },
    Regexp(Option<Rc<str>>),
    Enum(Vec<Rc<str>>),
    Pattern(Vec<ValueRegex>),
    Numeric,
    Scalar,
    Data,
    CatalogEntry,
    Collection,
    Array {
        element: Box<Type>,
        from: i64,
        to: i64,
    },
    Hash {
        key: Box<Type>,
        value: Box<Type>,
        from: i64,
        to: i64,
    },
    Tuple {
        types: Vec<Type>,
        from: i64,
        to: i64,
    },
    Struct(Vec<(Rc<str>, Type)>),
    Variant(Vec<Type>),
    Optional(Option<Box<Type>>),
    NotUndef(Option<Box<Type>>),
    Callable {
        params: Vec<Type>,
        block: Option<Box<Type>>,
    },
    Class(Option<Rc<str>>),
    /// Both names empty denotes the abstract Resource kind; only the title
    /// empty denotes all resources of one type.
    Resource {
        type_name: Rc<str>,
        title: Rc<str>,
    },
    /// Internal runtime objects; carries the index of a registered collector
    /// when a collector expression's value is chained into an override body.
    Runtime(Option<usize>),
    Type(Option<Box<Type>>),
}

/// Canonicalises a resource type name to TitleCase segments separated by
/// `::` (e.g. `foo::bar` becomes `Foo::Bar`).
pub fn canonicalize_type_name(name: &str) -> String {
    let lowered = name.to_lowercase();
    let mut result = String::with_capacity(lowered.len());
    for (i, segment) in lowered.split("::").enumerate() {
        if i > 0 {
            result.push_str("::");
        }
        let mut chars = segment.chars();
        if let Some(first) = chars.next() {
            result.extend(first.to_uppercase());
            result.push_str(chars.as_str());
        }
    }
    result
}

/// Canonicalises a class name: lowercase, with any leading `::` stripped.
pub fn normalize_class_name(name: &str) -> String {
    name.trim_start_matches("::").to_lowercase()
}

impl Type {
    pub fn integer(from: i64, to: i64) -> Type {
        Type::Integer { from, to }
    }

    pub fn integer_unbounded() -> Type {
        Type::Integer {
            from: i64::MIN,
            to: i64::MAX,
        }
    }

    pub fn float(from: f64, to: f64) -> Type {
        Type::Float { from, to }
    }

    pub fn float_unbounded() -> Type {
        Type::Float {
            from: f64::NEG_INFINITY,
            to: f64::INFINITY,
        }
    }

    pub fn string() -> Type {
        Type::String {
            from: 0,
            to: i64::MAX,
        }
    }

    pub fn string_range(from: i64, to: i64) -> Type {
        Type::String { from, to }
    }

    pub fn array(element: Type) -> Type {
        Type::Array {
            element: Box::new(element),
            from: i64::MIN,
            to: i64::MAX,
        }
    }

    pub fn hash(key: Type, value: Type) -> Type {
        Type::Hash {
            key: Box::new(key),
            value: Box::new(value),
            from: i64::MIN,
            to: i64::MAX,
        }
    }

    pub fn resource(type_name: &str) -> Type {
        Type::Resource {
            type_name: canonicalize_type_name(type_name).into(),
            title: "".into(),
        }
    }

    pub fn resource_title(type_name: &str, title: &str) -> Type {
        Type::Resource {
            type_name: canonicalize_type_name(type_name).into(),
            title: title.into(),
        }
    }

    pub fn class(name: &str) -> Type {
        Type::Class(Some(normalize_class_name(name).into()))
    }

    /// True for `Resource[name, title]` references that name a single
    /// concrete resource.
    pub fn is_fully_qualified_resource(&self) -> bool {
        match self {
            Type::Resource { type_name, title } => !type_name.is_empty() && !title.is_empty(),
            _ => false,
        }
    }

    /// An `Integer` range is enumerable when both bounds are finite.
    pub fn enumerable_range(&self) -> Option<(i64, i64)> {
        match self {
            Type::Integer { from, to } if *from != i64::MIN && *to != i64::MAX && from <= to => {
                Some((*from, *to))
            }
            _ => None,
        }
    }

    /// Decides membership of a value in this type.
    pub fn is_instance(&self, value: &Value) -> bool {
        let value = value.dereference();
        match self {
            Type::Any => true,
            Type::Undef => matches!(value, Value::Undef),
            Type::Default => matches!(value, Value::Default),
            Type::Boolean => matches!(value, Value::Boolean(_)),
            Type::Integer { from, to } => match value {
                Value::Integer(i) => from <= i && i <= to,
                _ => false,
            },
            Type::Float { from, to } => match value {
                Value::Float(f) => from <= f && f <= to,
                _ => false,
            },
            Type::String { from, to } => match value {
                Value::String(s) => {
                    let len = s.len() as i64;
                    *from <= len && len <= *to
                }
                _ => false,
            },
            Type::Regexp(pattern) => match value {
                Value::Regex(r) => match pattern {
                    Some(p) => p.as_ref() == r.pattern(),
                    None => true,
                },
                _ => false,
            },
            Type::Enum(members) => match value {
                Value::String(s) => members.iter().any(|m| m.as_ref() == s.as_ref()),
                _ => false,
            },
            Type::Pattern(regexes) => match value {
                Value::String(s) => regexes.iter().any(|r| r.regex().is_match(s)),
                _ => false,
            },
            Type::Numeric => matches!(value, Value::Integer(_) | Value::Float(_)),
            Type::Scalar => matches!(
                value,
                Value::Integer(_)
                    | Value::Float(_)
                    | Value::String(_)
                    | Value::Boolean(_)
                    | Value::Regex(_)
            ),
            Type::Data => match value {
                Value::Undef => true,
                Value::Array(items) => items.iter().all(|v| Type::Data.is_instance(v)),
                Value::Hash(hash) => hash.iter().all(|(k, v)| {
                    matches!(k.dereference(), Value::String(_)) && Type::Data.is_instance(v)
                }),
                other => Type::Scalar.is_instance(other),
            },
            Type::CatalogEntry => match value {
                Value::Type(t) => {
                    matches!(t.as_ref(), Type::Resource { .. } | Type::Class(_))
                }
                _ => false,
            },
            Type::Collection => matches!(value, Value::Array(_) | Value::Hash(_)),
            Type::Array { element, from, to } => match value {
                Value::Array(items) => {
                    let len = items.len() as i64;
                    range_includes(*from, *to, len)
                        && items.iter().all(|v| element.is_instance(v))
                }
                _ => false,
            },
            Type::Hash {
                key,
                value: val,
                from,
                to,
            } => match value {
                Value::Hash(hash) => {
                    let len = hash.len() as i64;
                    range_includes(*from, *to, len)
                        && hash
                            .iter()
                            .all(|(k, v)| key.is_instance(k) && val.is_instance(v))
                }
                _ => false,
            },
            Type::Tuple { types, from, to } => match value {
                Value::Array(items) => {
                    let len = items.len() as i64;
                    // Without explicit bounds the tuple requires exactly its
                    // declared arity; an explicit `to` admits trailing
                    // elements checked against the last declared type.
                    let (eff_from, eff_to) = if *from == i64::MIN && *to == i64::MAX {
                        (types.len() as i64, types.len() as i64)
                    } else if *from == i64::MIN {
                        (types.len() as i64, *to)
                    } else {
                        (*from, *to)
                    };
                    if !range_includes(eff_from, eff_to, len) {
                        return false;
                    }
                    items.iter().enumerate().all(|(i, v)| {
                        match types.get(i).or_else(|| types.last()) {
                            Some(t) => t.is_instance(v),
                            None => false,
                        }
                    })
                }
                _ => false,
            },
            Type::Struct(fields) => match value {
                Value::Hash(hash) => {
                    for (name, field_type) in fields {
                        let key = Value::from(name.as_ref());
                        match hash.get(&key) {
                            Some(v) => {
                                if !field_type.is_instance(v) {
                                    return false;
                                }
                            }
                            None => {
                                if !field_type.is_instance(&Value::Undef) {
                                    return false;
                                }
                            }
                        }
                    }
                    // No keys beyond the declared fields.
                    hash.keys().all(|k| match k.dereference() {
                        Value::String(s) => {
                            fields.iter().any(|(name, _)| name.as_ref() == s.as_ref())
                        }
                        _ => false,
                    })
                }
                _ => false,
            },
            Type::Variant(alternatives) => alternatives.iter().any(|t| t.is_instance(value)),
            Type::Optional(inner) => {
                matches!(value, Value::Undef)
                    || inner.as_ref().is_some_and(|t| t.is_instance(value))
            }
            Type::NotUndef(inner) => {
                !matches!(value, Value::Undef)
                    && inner.as_ref().map_or(true, |t| t.is_instance(value))
            }
            // No first-class callable values exist in the value model.
            Type::Callable { .. } => false,
            Type::Class(name) => match value {
                Value::Type(t) => match t.as_ref() {
                    Type::Class(other) => match name {
                        Some(n) => other.as_ref().is_some_and(|o| o == n),
                        None => true,
                    },
                    _ => false,
                },
                _ => false,
            },
            Type::Resource { type_name, title } => match value {
                Value::Type(t) => match t.as_ref() {
                    Type::Resource {
                        type_name: other_name,
                        title: other_title,
                    } => {
                        if type_name.is_empty() {
                            return true;
                        }
                        if type_name != other_name {
                            return false;
                        }
                        title.is_empty() || title == other_title
                    }
                    _ => false,
                },
                _ => false,
            },
            Type::Runtime(object) => match value {
                Value::Type(t) => match t.as_ref() {
                    Type::Runtime(other) => object.is_none() || object == other,
                    _ => false,
                },
                _ => false,
            },
            Type::Type(parameter) => match value {
                Value::Type(t) => match parameter {
                    Some(p) => p.as_ref() == t.as_ref() || p.is_specialization(t),
                    None => true,
                },
                _ => false,
            },
        }
    }

    /// Decides whether `other` is strictly more specific than this type;
    /// false when the types are equal. Conservative where the full lattice
    /// would require a join computation.
    pub fn is_specialization(&self, other: &Type) -> bool {
        if self == other {
            return false;
        }
        match self {
            Type::Any => true,
            Type::Integer { from, to } => match other {
                Type::Integer {
                    from: other_from,
                    to: other_to,
                } => from <= other_from && other_to <= to,
                _ => false,
            },
            Type::Float { from, to } => match other {
                Type::Float {
                    from: other_from,
                    to: other_to,
                } => from <= other_from && other_to <= to,
                _ => false,
            },
            Type::String { from, to } => match other {
                Type::String {
                    from: other_from,
                    to: other_to,
                } => from <= other_from && other_to <= to,
                Type::Enum(members) => members
                    .iter()
                    .all(|m| range_includes(*from, *to, m.len() as i64)),
                Type::Pattern(_) => *from == 0 && *to == i64::MAX,
                _ => false,
            },
            Type::Regexp(pattern) => pattern.is_none() && matches!(other, Type::Regexp(Some(_))),
            Type::Enum(members) => match other {
                Type::Enum(other_members) => {
                    other_members.iter().all(|m| members.contains(m))
                }
                _ => false,
            },
            Type::Numeric => matches!(other, Type::Integer { .. } | Type::Float { .. }),
            Type::Scalar => {
                matches!(
                    other,
                    Type::Numeric
                        | Type::Integer { .. }
                        | Type::Float { .. }
                        | Type::String { .. }
                        | Type::Boolean
                        | Type::Regexp(_)
                        | Type::Enum(_)
                        | Type::Pattern(_)
                )
            }
            Type::Data => match other {
                Type::Undef | Type::Scalar => true,
                Type::Array { element, .. } => {
                    **element == Type::Data || Type::Data.is_specialization(element)
                }
                Type::Hash { key, value, .. } => {
                    assignable(&Type::string(), key)
                        && (**value == Type::Data || Type::Data.is_specialization(value))
                }
                other => Type::Scalar.is_specialization(other),
            },
            Type::CatalogEntry => matches!(other, Type::Resource { .. } | Type::Class(_)),
            Type::Collection => matches!(
                other,
                Type::Array { .. } | Type::Hash { .. } | Type::Tuple { .. } | Type::Struct(_)
            ),
            Type::Array { element, from, to } => match other {
                Type::Array {
                    element: other_element,
                    from: other_from,
                    to: other_to,
                } => {
                    assignable(element, other_element)
                        && from <= other_from
                        && other_to <= to
                }
                _ => false,
            },
            Type::Hash {
                key,
                value,
                from,
                to,
            } => match other {
                Type::Hash {
                    key: other_key,
                    value: other_value,
                    from: other_from,
                    to: other_to,
                } => {
                    assignable(key, other_key)
                        && assignable(value, other_value)
                        && from <= other_from
                        && other_to <= to
                }
                _ => false,
            },
            Type::Tuple { types, from, to } => match other {
                Type::Tuple {
                    types: other_types,
                    from: other_from,
                    to: other_to,
                } => {
                    from <= other_from
                        && other_to <= to
                        && other_types.len() >= types.len()
                        && other_types.iter().enumerate().all(|(i, t)| {
                            match types.get(i).or_else(|| types.last()) {
                                Some(mine) => assignable(mine, t),
                                None => false,
                            }
                        })
                }
                _ => false,
            },
            Type::Struct(fields) => match other {
                Type::Struct(other_fields) => {
                    fields.len() == other_fields.len()
                        && fields.iter().all(|(name, t)| {
                            other_fields
                                .iter()
                                .any(|(other_name, other_t)| {
                                    name == other_name && assignable(t, other_t)
                                })
                        })
                }
                _ => false,
            },
            // Per-alternative join: every alternative of the other type must
            // be assignable to one of ours.
            Type::Variant(alternatives) => {
                let others: &[Type] = match other {
                    Type::Variant(ts) => ts,
                    single => core::slice::from_ref(single),
                };
                !others.is_empty()
                    && others
                        .iter()
                        .all(|t| alternatives.iter().any(|mine| assignable(mine, t)))
            }
            Type::Optional(inner) => match inner {
                Some(t) => match other {
                    Type::Undef => true,
                    Type::Optional(Some(other_inner)) => assignable(t, other_inner),
                    other => assignable(t, other),
                },
                None => matches!(other, Type::Undef),
            },
            Type::NotUndef(inner) => match inner {
                Some(t) => assignable(t, other) && !other.is_instance(&Value::Undef),
                None => !matches!(other, Type::Undef | Type::Any) && self != other,
            },
            Type::Class(name) => match other {
                Type::Class(other_name) => name.is_none() && other_name.is_some(),
                _ => false,
            },
            Type::Resource { type_name, title } => match other {
                Type::Resource {
                    type_name: other_name,
                    title: other_title,
                } => {
                    if type_name.is_empty() {
                        return !other_name.is_empty();
                    }
                    if type_name != other_name {
                        return false;
                    }
                    title.is_empty() && !other_title.is_empty()
                }
                _ => false,
            },
            Type::Type(parameter) => match other {
                Type::Type(other_parameter) => match (parameter, other_parameter) {
                    (None, Some(_)) => true,
                    (Some(p), Some(o)) => p.is_specialization(o),
                    _ => false,
                },
                _ => false,
            },
            _ => false,
        }
    }
}

/// True when `specific` is `general` or a specialization of it.
pub fn assignable(general: &Type, specific: &Type) -> bool {
    general == specific || general.is_specialization(specific)
}

fn range_includes(from: i64, to: i64, len: i64) -> bool {
    (from == i64::MIN || from <= len) && (to == i64::MAX || len <= to)
}

fn write_int_bound(f: &mut fmt::Formatter<'_>, value: i64) -> fmt::Result {
    if value == i64::MIN || value == i64::MAX {
        write!(f, "default")
    } else {
        write!(f, "{value}")
    }
}

fn write_float_bound(f: &mut fmt::Formatter<'_>, value: f64) -> fmt::Result {
    if value.is_infinite() {
        write!(f, "default")
    } else if value.fract() == 0.0 {
        write!(f, "{value:.1}")
    } else {
        write!(f, "{value}")
    }
}

fn write_int_range(
    f: &mut fmt::Formatter<'_>,
    prefix: &str,
    from: i64,
    to: i64,
) -> fmt::Result {
    // Unbounded parameters are elided from the stream form.
    if from == i64::MIN && to == i64::MAX {
        return write!(f, "{prefix}");
    }
    write!(f, "{prefix}[")?;
    write_int_bound(f, from)?;
    if to != i64::MAX {
        write!(f, ", ")?;
        write_int_bound(f, to)?;
    }
    write!(f, "]")
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Any => write!(f, "Any"),
            Type::Undef => write!(f, "Undef"),
            Type::Default => write!(f, "Default"),
            Type::Boolean => write!(f, "Boolean"),
            Type::Integer { from, to } => write_int_range(f, "Integer", *from, *to),
            Type::Float { from, to } => {
                if from.is_infinite() && to.is_infinite() {
                    return write!(f, "Float");
                }
                write!(f, "Float[")?;
                write_float_bound(f, *from)?;
                if !to.is_infinite() {
                    write!(f, ", ")?;
                    write_float_bound(f, *to)?;
                }
                write!(f, "]")
            }
            Type::String { from, to } => {
                if *from == 0 && *to == i64::MAX {
                    return write!(f, "String");
                }
                write_int_range(f, "String", *from, *to)
            }
            Type::Regexp(pattern) => match pattern {
                Some(p) => write!(f, "Regexp[/{p}/]"),
                None => write!(f, "Regexp"),
            },
            Type::Enum(members) => {
                write!(f, "Enum[")?;
                for (i, m) in members.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "'{m}'")?;
                }
                write!(f, "]")
            }
            Type::Pattern(regexes) => {
                write!(f, "Pattern[")?;
                for (i, r) in regexes.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "/{}/", r.pattern())?;
                }
                write!(f, "]")
            }
            Type::Numeric => write!(f, "Numeric"),
            Type::Scalar => write!(f, "Scalar"),
            Type::Data => write!(f, "Data"),
            Type::CatalogEntry => write!(f, "CatalogEntry"),
            Type::Collection => write!(f, "Collection"),
            Type::Array { element, from, to } => {
                // The default element type is elided.
                if **element == Type::Data && *from == i64::MIN && *to == i64::MAX {
                    return write!(f, "Array");
                }
                write!(f, "Array[{element}")?;
                if *from != i64::MIN || *to != i64::MAX {
                    write!(f, ", ")?;
                    write_int_bound(f, *from)?;
                    if *to != i64::MAX {
                        write!(f, ", ")?;
                        write_int_bound(f, *to)?;
                    }
                }
                write!(f, "]")
            }
            Type::Hash {
                key,
                value,
                from,
                to,
            } => {
                if **key == Type::Scalar
                    && **value == Type::Data
                    && *from == i64::MIN
                    && *to == i64::MAX
                {
                    return write!(f, "Hash");
                }
                write!(f, "Hash[{key}, {value}")?;
                if *from != i64::MIN || *to != i64::MAX {
                    write!(f, ", ")?;
                    write_int_bound(f, *from)?;
                    if *to != i64::MAX {
                        write!(f, ", ")?;
                        write_int_bound(f, *to)?;
                    }
                }
                write!(f, "]")
            }
            Type::Tuple { types, from, to } => {
                if types.is_empty() && *from == i64::MIN && *to == i64::MAX {
                    return write!(f, "Tuple");
                }
                write!(f, "Tuple[")?;
                for (i, t) in types.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{t}")?;
                }
                if *from != i64::MIN || *to != i64::MAX {
                    write!(f, ", ")?;
                    write_int_bound(f, *from)?;
                    if *to != i64::MAX {
                        write!(f, ", ")?;
                        write_int_bound(f, *to)?;
                    }
                }
                write!(f, "]")
            }
            Type::Struct(fields) => {
                write!(f, "Struct[{{")?;
                for (i, (name, t)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "'{name}' => {t}")?;
                }
                write!(f, "}}]")
            }
            Type::Variant(alternatives) => {
                if alternatives.is_empty() {
                    return write!(f, "Variant");
                }
                write!(f, "Variant[")?;
                for (i, t) in alternatives.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{t}")?;
                }
                write!(f, "]")
            }
            Type::Optional(inner) => match inner {
                Some(t) => write!(f, "Optional[{t}]"),
                None => write!(f, "Optional"),
            },
            Type::NotUndef(inner) => match inner {
                Some(t) => write!(f, "NotUndef[{t}]"),
                None => write!(f, "NotUndef"),
            },
            Type::Callable { params, block } => {
                if params.is_empty() && block.is_none() {
                    return write!(f, "Callable");
                }
                write!(f, "Callable[")?;
                for (i, t) in params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{t}")?;
                }
                if let Some(b) = block {
                    if !params.is_empty() {
                        write!(f, ", ")?;
                    }
                    write!(f, "{b}")?;
                }
                write!(f, "]")
            }
            Type::Class(name) => match name {
                Some(n) => write!(f, "Class[{n}]"),
                None => write!(f, "Class"),
            },
            Type::Resource { type_name, title } => {
                if type_name.is_empty() {
                    return write!(f, "Resource");
                }
                write!(f, "{type_name}")?;
                if !title.is_empty() {
                    write!(f, "[{title}]")?;
                }
                Ok(())
            }
            Type::Runtime(object) => match object {
                Some(_) => write!(f, "Runtime[Collector]"),
                None => write!(f, "Runtime"),
            },
            Type::Type(parameter) => match parameter {
                Some(p) => write!(f, "Type[{p}]"),
                None => write!(f, "Type"),
            },
        }
    }
}

/// Parses a type from its display form. Every type the evaluator produces
/// round-trips through this parser.
pub fn parse(input: &str) -> Result<Type> {
    let mut parser = TypeParser {
        chars: input.char_indices().peekable(),
        input,
    };
    let parsed = parser.parse_type()?;
    parser.skip_ws();
    if let Some((i, _)) = parser.chars.peek() {
        bail!("unexpected trailing characters at offset {i} in type '{input}'");
    }
    Ok(parsed)
}

struct TypeParser<'a> {
    chars: core::iter::Peekable<core::str::CharIndices<'a>>,
    input: &'a str,
}

impl<'a> TypeParser<'a> {
    fn skip_ws(&mut self) {
        while matches!(self.chars.peek(), Some((_, c)) if c.is_whitespace()) {
            self.chars.next();
        }
    }

    fn eat(&mut self, expected: char) -> Result<()> {
        self.skip_ws();
        match self.chars.next() {
            Some((_, c)) if c == expected => Ok(()),
            Some((i, c)) => bail!("expected '{expected}' but found '{c}' at offset {i}"),
            None => bail!("expected '{expected}' but found end of input"),
        }
    }

    fn peek_is(&mut self, expected: char) -> bool {
        self.skip_ws();
        matches!(self.chars.peek(), Some((_, c)) if *c == expected)
    }

    fn parse_name(&mut self) -> Result<String> {
        self.skip_ws();
        let mut name = String::new();
        while let Some((_, c)) = self.chars.peek() {
            if c.is_ascii_alphanumeric() || *c == '_' || *c == ':' {
                name.push(*c);
                self.chars.next();
            } else {
                break;
            }
        }
        if name.is_empty() {
            bail!("expected a type name in '{}'", self.input);
        }
        Ok(name)
    }

    fn parse_type(&mut self) -> Result<Type> {
        let name = self.parse_name()?;
        let params = self.parse_name_params(&name)?;
        self.to_type(&name, params)
    }

    /// Brackets after a known type name hold type parameters; brackets
    /// after a resource type name hold raw, possibly unquoted titles
    /// (`File[/etc/motd]`).
    fn parse_name_params(&mut self, name: &str) -> Result<Vec<Param>> {
        if !self.peek_is('[') {
            return Ok(vec![]);
        }
        if is_known_type_name(name) {
            self.parse_params()
        } else {
            self.parse_title_params()
        }
    }

    fn parse_title_params(&mut self) -> Result<Vec<Param>> {
        self.eat('[')?;
        let mut params = vec![];
        let mut current = String::new();
        loop {
            match self.chars.next() {
                Some((_, ']')) => {
                    params.push(Param::Str(unquote(&current)));
                    break;
                }
                Some((_, ',')) => {
                    params.push(Param::Str(unquote(&current)));
                    current.clear();
                }
                Some((_, c)) => current.push(c),
                None => bail!("unterminated title in type '{}'", self.input),
            }
        }
        Ok(params)
    }

    fn parse_params(&mut self) -> Result<Vec<Param>> {
        self.eat('[')?;
        let mut params = vec![];
        loop {
            if self.peek_is(']') {
                self.chars.next();
                break;
            }
            params.push(self.parse_param()?);
            if self.peek_is(',') {
                self.chars.next();
            }
        }
        Ok(params)
    }

    fn parse_param(&mut self) -> Result<Param> {
        self.skip_ws();
        match self.chars.peek() {
            Some((_, '\'')) | Some((_, '"')) => {
                let quote = self.chars.next().map(|(_, c)| c).unwrap_or('\'');
                let mut s = String::new();
                for (_, c) in self.chars.by_ref() {
                    if c == quote {
                        return Ok(Param::Str(s));
                    }
                    s.push(c);
                }
                bail!("unterminated string in type '{}'", self.input)
            }
            Some((_, '/')) => {
                self.chars.next();
                let mut s = String::new();
                for (_, c) in self.chars.by_ref() {
                    if c == '/' {
                        return Ok(Param::Pattern(s));
                    }
                    s.push(c);
                }
                bail!("unterminated pattern in type '{}'", self.input)
            }
            Some((_, '{')) => {
                self.chars.next();
                let mut fields = vec![];
                loop {
                    self.skip_ws();
                    if self.peek_is('}') {
                        self.chars.next();
                        break;
                    }
                    let key = match self.parse_param()? {
                        Param::Str(s) => s,
                        other => bail!("expected string key in struct type but found {other:?}"),
                    };
                    self.skip_ws();
                    self.eat('=')?;
                    self.eat('>')?;
                    let value = self.parse_param_type()?;
                    fields.push((key.into(), value));
                    if self.peek_is(',') {
                        self.chars.next();
                    }
                }
                Ok(Param::Fields(fields))
            }
            Some((_, c)) if *c == '-' || c.is_ascii_digit() => {
                let mut s = String::new();
                while let Some((_, c)) = self.chars.peek() {
                    if c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E') {
                        s.push(*c);
                        self.chars.next();
                    } else {
                        break;
                    }
                }
                if s.contains('.') || s.contains('e') || s.contains('E') {
                    Ok(Param::Float(s.parse()?))
                } else {
                    Ok(Param::Int(s.parse()?))
                }
            }
            _ => {
                let name = self.parse_name()?;
                if name == "default" {
                    return Ok(Param::Default);
                }
                let params = self.parse_name_params(&name)?;
                Ok(Param::Type(self.to_type(&name, params)?))
            }
        }
    }

    fn parse_param_type(&mut self) -> Result<Type> {
        match self.parse_param()? {
            Param::Type(t) => Ok(t),
            other => bail!("expected a type but found {other:?} in '{}'", self.input),
        }
    }

    fn to_type(&self, name: &str, params: Vec<Param>) -> Result<Type> {
        let int_bound = |p: &Param, unbounded: i64| -> Result<i64> {
            match p {
                Param::Int(i) => Ok(*i),
                Param::Default => Ok(unbounded),
                other => bail!("expected an integer parameter but found {other:?}"),
            }
        };

        Ok(match name {
            "Any" => require_empty(name, params, Type::Any)?,
            "Undef" => require_empty(name, params, Type::Undef)?,
            "Default" => require_empty(name, params, Type::Default)?,
            "Boolean" => require_empty(name, params, Type::Boolean)?,
            "Numeric" => require_empty(name, params, Type::Numeric)?,
            "Scalar" => require_empty(name, params, Type::Scalar)?,
            "Data" => require_empty(name, params, Type::Data)?,
            "CatalogEntry" => require_empty(name, params, Type::CatalogEntry)?,
            "Collection" => require_empty(name, params, Type::Collection)?,
            "Runtime" => require_empty(name, params, Type::Runtime(None))?,
            "Integer" => {
                let from = params.first().map(|p| int_bound(p, i64::MIN)).transpose()?;
                let to = params.get(1).map(|p| int_bound(p, i64::MAX)).transpose()?;
                Type::Integer {
                    from: from.unwrap_or(i64::MIN),
                    to: to.unwrap_or(i64::MAX),
                }
            }
            "Float" => {
                let bound = |p: &Param, unbounded: f64| -> Result<f64> {
                    match p {
                        Param::Float(v) => Ok(*v),
                        Param::Int(i) => Ok(*i as f64),
                        Param::Default => Ok(unbounded),
                        other => bail!("expected a float parameter but found {other:?}"),
                    }
                };
                let from = params
                    .first()
                    .map(|p| bound(p, f64::NEG_INFINITY))
                    .transpose()?;
                let to = params.get(1).map(|p| bound(p, f64::INFINITY)).transpose()?;
                Type::Float {
                    from: from.unwrap_or(f64::NEG_INFINITY),
                    to: to.unwrap_or(f64::INFINITY),
                }
            }
            "String" => {
                let from = params.first().map(|p| int_bound(p, 0)).transpose()?;
                let to = params.get(1).map(|p| int_bound(p, i64::MAX)).transpose()?;
                Type::String {
                    from: from.unwrap_or(0),
                    to: to.unwrap_or(i64::MAX),
                }
            }
            "Regexp" => match params.into_iter().next() {
                Some(Param::Pattern(p)) | Some(Param::Str(p)) => Type::Regexp(Some(p.into())),
                Some(other) => bail!("expected a pattern parameter but found {other:?}"),
                None => Type::Regexp(None),
            },
            "Enum" => {
                let mut members = vec![];
                for p in params {
                    match p {
                        Param::Str(s) => members.push(s.into()),
                        other => bail!("expected a string parameter but found {other:?}"),
                    }
                }
                Type::Enum(members)
            }
            "Pattern" => {
                let mut regexes = vec![];
                for p in params {
                    match p {
                        Param::Pattern(s) | Param::Str(s) => regexes.push(ValueRegex::new(&s)?),
                        other => bail!("expected a pattern parameter but found {other:?}"),
                    }
                }
                Type::Pattern(regexes)
            }
            "Array" => {
                let mut iter = params.into_iter();
                let element = match iter.next() {
                    Some(Param::Type(t)) => t,
                    Some(other) => bail!("expected a type parameter but found {other:?}"),
                    None => Type::Data,
                };
                let from = iter.next().map(|p| int_bound(&p, i64::MIN)).transpose()?;
                let to = iter.next().map(|p| int_bound(&p, i64::MAX)).transpose()?;
                Type::Array {
                    element: Box::new(element),
                    from: from.unwrap_or(i64::MIN),
                    to: to.unwrap_or(i64::MAX),
                }
            }
            "Hash" => {
                let mut iter = params.into_iter();
                let key = match iter.next() {
                    Some(Param::Type(t)) => t,
                    Some(other) => bail!("expected a type parameter but found {other:?}"),
                    None => Type::Scalar,
                };
                let value = match iter.next() {
                    Some(Param::Type(t)) => t,
                    Some(other) => bail!("expected a type parameter but found {other:?}"),
                    None => Type::Data,
                };
                let from = iter.next().map(|p| int_bound(&p, i64::MIN)).transpose()?;
                let to = iter.next().map(|p| int_bound(&p, i64::MAX)).transpose()?;
                Type::Hash {
                    key: Box::new(key),
                    value: Box::new(value),
                    from: from.unwrap_or(i64::MIN),
                    to: to.unwrap_or(i64::MAX),
                }
            }
            "Tuple" => {
                let mut types = vec![];
                let mut bounds = vec![];
                for p in params {
                    match p {
                        Param::Type(t) if bounds.is_empty() => types.push(t),
                        Param::Int(_) | Param::Default => bounds.push(p),
                        other => bail!("unexpected Tuple parameter {other:?}"),
                    }
                }
                let from = bounds
                    .first()
                    .map(|p| int_bound(p, i64::MIN))
                    .transpose()?;
                let to = bounds.get(1).map(|p| int_bound(p, i64::MAX)).transpose()?;
                Type::Tuple {
                    types,
                    from: from.unwrap_or(i64::MIN),
                    to: to.unwrap_or(i64::MAX),
                }
            }
            "Struct" => match params.into_iter().next() {
                Some(Param::Fields(fields)) => Type::Struct(fields),
                Some(other) => bail!("expected a hash parameter but found {other:?}"),
                None => Type::Struct(vec![]),
            },
            "Variant" => {
                let mut alternatives = vec![];
                for p in params {
                    match p {
                        Param::Type(t) => alternatives.push(t),
                        other => bail!("expected a type parameter but found {other:?}"),
                    }
                }
                Type::Variant(alternatives)
            }
            "Optional" => match params.into_iter().next() {
                Some(Param::Type(t)) => Type::Optional(Some(Box::new(t))),
                Some(Param::Str(s)) => {
                    Type::Optional(Some(Box::new(Type::Enum(vec![s.into()]))))
                }
                Some(other) => bail!("expected a type parameter but found {other:?}"),
                None => Type::Optional(None),
            },
            "NotUndef" => match params.into_iter().next() {
                Some(Param::Type(t)) => Type::NotUndef(Some(Box::new(t))),
                Some(other) => bail!("expected a type parameter but found {other:?}"),
                None => Type::NotUndef(None),
            },
            "Callable" => {
                let mut types = vec![];
                for p in params {
                    match p {
                        Param::Type(t) => types.push(t),
                        other => bail!("expected a type parameter but found {other:?}"),
                    }
                }
                Type::Callable {
                    params: types,
                    block: None,
                }
            }
            "Class" => match params.into_iter().next() {
                Some(Param::Str(s)) => Type::class(&s),
                Some(Param::Type(Type::Resource { type_name, .. })) => {
                    Type::class(&type_name.to_lowercase())
                }
                Some(other) => bail!("expected a class name but found {other:?}"),
                None => Type::Class(None),
            },
            "Type" => match params.into_iter().next() {
                Some(Param::Type(t)) => Type::Type(Some(Box::new(t))),
                Some(other) => bail!("expected a type parameter but found {other:?}"),
                None => Type::Type(None),
            },
            "Resource" => {
                let mut iter = params.into_iter();
                let type_name = match iter.next() {
                    Some(Param::Str(s)) => s,
                    Some(Param::Type(Type::Resource { type_name, .. })) => type_name.to_string(),
                    Some(other) => bail!("expected a type name but found {other:?}"),
                    None => return Ok(Type::resource("")),
                };
                match iter.next() {
                    Some(Param::Str(title)) => Type::resource_title(&type_name, &title),
                    Some(other) => bail!("expected a title but found {other:?}"),
                    None => Type::resource(&type_name),
                }
            }
            // An unknown TitleCase name denotes a resource type; a bracketed
            // parameter is its title.
            other => {
                let mut iter = params.into_iter();
                match iter.next() {
                    Some(Param::Str(title)) => Type::resource_title(other, &title),
                    Some(Param::Type(Type::Resource { type_name, title })) if title.is_empty() => {
                        Type::resource_title(other, &type_name.to_lowercase())
                    }
                    Some(p) => bail!("expected a title parameter but found {p:?}"),
                    None => Type::resource(other),
                }
            }
        })
    }
}

fn is_known_type_name(name: &str) -> bool {
    matches!(
        name,
        "Any"
            | "Undef"
            | "Default"
            | "Boolean"
            | "Numeric"
            | "Scalar"
            | "Data"
            | "CatalogEntry"
            | "Collection"
            | "Runtime"
            | "Integer"
            | "Float"
            | "String"
            | "Regexp"
            | "Enum"
            | "Pattern"
            | "Array"
            | "Hash"
            | "Tuple"
            | "Struct"
            | "Variant"
            | "Optional"
            | "NotUndef"
            | "Callable"
            | "Class"
            | "Type"
            | "Resource"
    )
}

fn unquote(text: &str) -> String {
    let trimmed = text.trim();
    let bytes = trimmed.as_bytes();
    if bytes.len() >= 2
        && (bytes[0] == b'\'' || bytes[0] == b'"')
        && bytes[bytes.len() - 1] == bytes[0]
    {
        trimmed[1..trimmed.len() - 1].to_string()
    } else {
        trimmed.to_string()
    }
}

fn require_empty(name: &str, params: Vec<Param>, t: Type) -> Result<Type> {
    if !params.is_empty() {
        bail!("type {name} does not accept parameters");
    }
    Ok(t)
}

#[derive(Debug)]
enum Param {
    Int(i64),
    Float(f64),
    Str(String),
    Pattern(String),
    Default,
    Type(Type),
    Fields(Vec<(Rc<str>, Type)>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_range_membership() {
        let t = Type::integer(1, 10);
        assert!(t.is_instance(&Value::Integer(5)));
        assert!(t.is_instance(&Value::Integer(1)));
        assert!(t.is_instance(&Value::Integer(10)));
        assert!(!t.is_instance(&Value::Integer(11)));
        assert!(!t.is_instance(&Value::Float(5.0)));
    }

    #[test]
    fn integer_specialization() {
        assert!(Type::integer_unbounded().is_specialization(&Type::integer(1, 10)));
        assert!(Type::integer(0, 100).is_specialization(&Type::integer(1, 10)));
        assert!(!Type::integer(1, 10).is_specialization(&Type::integer(1, 10)));
        assert!(!Type::integer(5, 6).is_specialization(&Type::integer(1, 10)));
        assert!(Type::Numeric.is_specialization(&Type::integer(1, 10)));
        assert!(Type::Any.is_specialization(&Type::Numeric));
        assert!(!Type::Any.is_specialization(&Type::Any));
    }

    #[test]
    fn data_membership() {
        let nested = Value::from(vec![
            Value::Integer(1),
            Value::from("two"),
            Value::from(vec![Value::Boolean(true)]),
        ]);
        assert!(Type::Data.is_instance(&nested));
        assert!(!Type::Data.is_instance(&Value::from(Type::Any)));
    }

    #[test]
    fn tuple_trailing_elements() {
        let t = Type::Tuple {
            types: vec![Type::string(), Type::integer_unbounded()],
            from: i64::MIN,
            to: 4,
        };
        let v = Value::from(vec![
            Value::from("a"),
            Value::Integer(1),
            Value::Integer(2),
            Value::Integer(3),
        ]);
        assert!(t.is_instance(&v));
        let short = Value::from(vec![Value::from("a")]);
        assert!(!t.is_instance(&short));
    }

    #[test]
    fn struct_membership() {
        let t = Type::Struct(vec![
            ("name".into(), Type::string()),
            ("port".into(), Type::Optional(Some(Box::new(Type::integer_unbounded())))),
        ]);
        let mut hash = crate::value::ValueHash::new();
        hash.insert(Value::from("name"), Value::from("web"));
        assert!(t.is_instance(&Value::from(hash.clone())));
        hash.insert(Value::from("extra"), Value::Integer(1));
        assert!(!t.is_instance(&Value::from(hash)));
    }

    #[test]
    fn resource_canonicalization() {
        let t = Type::resource_title("foo::bar_baz", "/etc/motd");
        assert_eq!(t.to_string(), "Foo::Bar_baz[/etc/motd]");
        assert!(Type::resource("foo::bar_baz").is_specialization(&t));
        assert!(Type::resource("").is_specialization(&t));
        assert!(!t.is_specialization(&Type::resource("foo::bar_baz")));
    }

    #[test]
    fn variant_join_specialization() {
        let v = Type::Variant(vec![Type::string(), Type::integer_unbounded()]);
        assert!(v.is_specialization(&Type::integer(1, 5)));
        assert!(v.is_specialization(&Type::Variant(vec![Type::string()])));
        assert!(!v.is_specialization(&Type::Boolean));
    }

    #[test]
    fn instance_specialization_coherence() {
        // If T2 ⊒ T1 and v ∈ T1 then v ∈ T2.
        let pairs: Vec<(Type, Type, Value)> = vec![
            (Type::integer(1, 10), Type::Numeric, Value::Integer(5)),
            (Type::Enum(vec!["a".into()]), Type::string(), Value::from("a")),
            (Type::string(), Type::Scalar, Value::from("x")),
            (Type::Scalar, Type::Data, Value::Integer(3)),
            (
                Type::array(Type::Data),
                Type::Collection,
                Value::from(vec![Value::Integer(1)]),
            ),
        ];
        for (specific, general, value) in pairs {
            assert!(general.is_specialization(&specific), "{general} ⊒ {specific}");
            assert!(specific.is_instance(&value));
            assert!(general.is_instance(&value), "{value} ∈ {general}");
        }
    }

    #[test]
    fn display_round_trips() {
        let types = vec![
            Type::Any,
            Type::integer(1, 10),
            Type::Integer { from: 0, to: i64::MAX },
            Type::float(0.5, 2.5),
            Type::string_range(1, 16),
            Type::Regexp(Some("^a.*b$".into())),
            Type::Enum(vec!["red".into(), "green".into()]),
            Type::array(Type::string()),
            Type::Array {
                element: Box::new(Type::string()),
                from: 1,
                to: 3,
            },
            Type::hash(Type::string(), Type::Data),
            Type::Tuple {
                types: vec![Type::string(), Type::integer_unbounded()],
                from: i64::MIN,
                to: i64::MAX,
            },
            Type::Struct(vec![("name".into(), Type::string())]),
            Type::Variant(vec![Type::string(), Type::Undef]),
            Type::Optional(Some(Box::new(Type::Boolean))),
            Type::NotUndef(Some(Box::new(Type::string()))),
            Type::class("foo::bar"),
            Type::resource("file"),
            Type::resource_title("file", "/etc/motd"),
            Type::Type(Some(Box::new(Type::integer(1, 2)))),
            Type::Integer { from: i64::MIN, to: 10 },
        ];
        for t in types {
            let text = t.to_string();
            let parsed = parse(&text).unwrap_or_else(|e| panic!("parsing '{text}': {e}"));
            assert_eq!(parsed, t, "round trip of '{text}'");
        }
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(parse("Integer[").is_err());
        assert!(parse("Integer[1, 2] trailing").is_err());
        assert!(parse("Boolean[1]").is_err());
    }
}
