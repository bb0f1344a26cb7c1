use crate::types::Type;

use core::fmt;
use core::hash::{Hash, Hasher};
use std::rc::Rc;

use anyhow::{anyhow, Result};
use indexmap::IndexMap;
use serde::ser::{SerializeMap, SerializeSeq, Serializer};
use serde::Serialize;
use unicode_segmentation::UnicodeSegmentation;

/// A compiled regex value. Equality and hashing use the original pattern;
/// the compiled engine state is shared.
#[derive(Clone, Debug)]
pub struct ValueRegex {
    pattern: Rc<str>,
    regex: Rc<regex::Regex>,
}

impl ValueRegex {
    pub fn new(pattern: &str) -> Result<ValueRegex> {
        let regex =
            regex::Regex::new(pattern).map_err(|e| anyhow!("invalid regular expression: {e}"))?;
        Ok(ValueRegex {
            pattern: pattern.into(),
            regex: Rc::new(regex),
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn regex(&self) -> &regex::Regex {
        &self.regex
    }
}

impl PartialEq for ValueRegex {
    fn eq(&self, other: &Self) -> bool {
        self.pattern == other.pattern
    }
}

impl Eq for ValueRegex {}

/// A variable reference produced by evaluating `$name`. Keeps the name for
/// assignment targets and diagnostics; every other consumer sees through it
/// via [`Value::dereference`].
#[derive(Clone, Debug)]
pub struct BoundVariable {
    pub name: Rc<str>,
    pub value: Rc<Value>,
}

/// A runtime value of the DSL.
///
/// Composite alternatives are structurally shared through `Rc`; a value is
/// semantically immutable once published into a scope, a hash, an array, or
/// a resource attribute. `Rc::make_mut` style mutation is only used while a
/// value is still exclusively owned by the evaluator.
#[derive(Clone, Debug)]
pub enum Value {
    Undef,
    /// The `default` sentinel used for case/selector fall-through.
    Default,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(Rc<str>),
    Regex(ValueRegex),
    Array(Rc<Vec<Value>>),
    Hash(Rc<ValueHash>),
    Type(Rc<Type>),
    Variable(Rc<BoundVariable>),
}

impl Default for Value {
    fn default() -> Self {
        Value::Undef
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.into())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s.into())
    }
}

impl From<Vec<Value>> for Value {
    fn from(a: Vec<Value>) -> Self {
        Value::Array(Rc::new(a))
    }
}

impl From<ValueHash> for Value {
    fn from(h: ValueHash) -> Self {
        Value::Hash(Rc::new(h))
    }
}

impl From<Type> for Value {
    fn from(t: Type) -> Self {
        Value::Type(Rc::new(t))
    }
}

impl Value {
    pub fn variable(name: &str, value: Rc<Value>) -> Value {
        Value::Variable(Rc::new(BoundVariable {
            name: name.into(),
            value,
        }))
    }

    /// Sees through a variable reference to the value it holds.
    pub fn dereference(&self) -> &Value {
        match self {
            Value::Variable(v) => v.value.dereference(),
            _ => self,
        }
    }

    /// Like [`Value::dereference`] but takes ownership, cloning only when the
    /// value is actually a variable reference.
    pub fn into_dereferenced(self) -> Value {
        match self {
            Value::Variable(v) => v.value.dereference().clone(),
            other => other,
        }
    }

    pub fn is_undef(&self) -> bool {
        matches!(self.dereference(), Value::Undef)
    }

    pub fn is_default(&self) -> bool {
        matches!(self.dereference(), Value::Default)
    }

    /// `undef` and `false` are falsy; every other value is truthy, including
    /// `0` and empty collections.
    pub fn is_truthy(&self) -> bool {
        !matches!(self.dereference(), Value::Undef | Value::Boolean(false))
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self.dereference() {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self.dereference() {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self.dereference() {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<&Rc<str>> {
        match self.dereference() {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_regex(&self) -> Option<&ValueRegex> {
        match self.dereference() {
            Value::Regex(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Rc<Vec<Value>>> {
        match self.dereference() {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_hash(&self) -> Option<&Rc<ValueHash>> {
        match self.dereference() {
            Value::Hash(h) => Some(h),
            _ => None,
        }
    }

    pub fn as_type(&self) -> Option<&Rc<Type>> {
        match self.dereference() {
            Value::Type(t) => Some(t),
            _ => None,
        }
    }

    /// The short type name used in diagnostics ("expected Integer but found
    /// String").
    pub fn type_name(&self) -> &'static str {
        match self.dereference() {
            Value::Undef => "Undef",
            Value::Default => "Default",
            Value::Boolean(_) => "Boolean",
            Value::Integer(_) => "Integer",
            Value::Float(_) => "Float",
            Value::String(_) => "String",
            Value::Regex(_) => "Regexp",
            Value::Array(_) => "Array",
            Value::Hash(_) => "Hash",
            Value::Type(_) => "Type",
            Value::Variable(_) => "Variable",
        }
    }

    /// Infers the type of the value, as returned by the `type` built-in.
    pub fn infer_type(&self) -> Type {
        match self.dereference() {
            Value::Undef => Type::Undef,
            Value::Default => Type::Default,
            Value::Boolean(_) => Type::Boolean,
            Value::Integer(i) => Type::integer(*i, *i),
            Value::Float(f) => Type::float(*f, *f),
            Value::String(_) => Type::string(),
            Value::Regex(r) => Type::Regexp(Some(r.pattern().into())),
            Value::Array(_) => Type::array(Type::Data),
            Value::Hash(_) => Type::hash(Type::Scalar, Type::Data),
            Value::Type(t) => Type::Type(Some(Box::new((**t).clone()))),
            Value::Variable(_) => Type::Any,
        }
    }

    /// Wraps a non-array value in a single-element array; arrays are
    /// returned as-is.
    pub fn to_array(&self) -> Vec<Value> {
        match self.dereference() {
            Value::Array(a) => a.as_ref().clone(),
            other => vec![other.clone()],
        }
    }
}

/// Enumerates a string as extended grapheme clusters, yielding each as a
/// one-grapheme string. Return false from the callback to stop.
pub fn enumerate_string(s: &str, mut callback: impl FnMut(&str) -> bool) {
    for grapheme in s.graphemes(true) {
        if !callback(grapheme) {
            return;
        }
    }
}

fn float_eq(a: f64, b: f64) -> bool {
    (a == b) || (a.is_nan() && b.is_nan())
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self.dereference(), other.dereference()) {
            (Value::Undef, Value::Undef) => true,
            (Value::Default, Value::Default) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => float_eq(*a, *b),
            // Numeric equality widens the integer and compares exactly.
            (Value::Integer(a), Value::Float(b)) => float_eq(*a as f64, *b),
            (Value::Float(a), Value::Integer(b)) => float_eq(*a, *b as f64),
            // Byte-exact; no locale folding.
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Regex(a), Value::Regex(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Hash(a), Value::Hash(b)) => a == b,
            (Value::Type(a), Value::Type(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // Numbers exactly representable as f64 hash through their widened
        // bit pattern so that Integer(1) and Float(1.0) collide, matching
        // the equality relation. -0.0 is normalized to 0.0 and NaN to a
        // canonical NaN.
        fn hash_f64<H: Hasher>(f: f64, state: &mut H) {
            let f = if f == 0.0 {
                0.0
            } else if f.is_nan() {
                f64::NAN
            } else {
                f
            };
            state.write_u64(f.to_bits());
        }

        match self.dereference() {
            Value::Undef => state.write_u8(0),
            Value::Default => state.write_u8(1),
            Value::Boolean(b) => {
                state.write_u8(2);
                b.hash(state);
            }
            Value::Integer(i) => {
                state.write_u8(3);
                if (*i as f64) as i64 == *i {
                    hash_f64(*i as f64, state);
                } else {
                    state.write_i64(*i);
                }
            }
            Value::Float(f) => {
                state.write_u8(3);
                hash_f64(*f, state);
            }
            Value::String(s) => {
                state.write_u8(4);
                s.hash(state);
            }
            Value::Regex(r) => {
                state.write_u8(5);
                r.pattern().hash(state);
            }
            Value::Array(a) => {
                state.write_u8(6);
                for v in a.iter() {
                    v.hash(state);
                }
            }
            Value::Hash(h) => {
                state.write_u8(7);
                for (k, v) in h.iter() {
                    k.hash(state);
                    v.hash(state);
                }
            }
            Value::Type(t) => {
                state.write_u8(8);
                t.to_string().hash(state);
            }
            Value::Variable(_) => {}
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.dereference() {
            Value::Undef => Ok(()),
            Value::Default => write!(f, "default"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Float(v) => {
                if v.fract() == 0.0 && v.is_finite() {
                    write!(f, "{v:.1}")
                } else {
                    write!(f, "{v}")
                }
            }
            Value::String(s) => write!(f, "{s}"),
            Value::Regex(r) => write!(f, "/{}/", r.pattern()),
            Value::Array(a) => {
                write!(f, "[")?;
                for (i, v) in a.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, "]")
            }
            Value::Hash(h) => {
                write!(f, "{{")?;
                for (i, (k, v)) in h.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k} => {v}")?;
                }
                write!(f, "}}")
            }
            Value::Type(t) => write!(f, "{t}"),
            Value::Variable(_) => Ok(()),
        }
    }
}

impl Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> core::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self.dereference() {
            Value::Undef => serializer.serialize_none(),
            Value::Default => serializer.serialize_str("default"),
            Value::Boolean(b) => serializer.serialize_bool(*b),
            Value::Integer(i) => serializer.serialize_i64(*i),
            Value::Float(f) => serializer.serialize_f64(*f),
            Value::String(s) => serializer.serialize_str(s),
            Value::Regex(r) => serializer.serialize_str(r.pattern()),
            Value::Array(a) => {
                let mut seq = serializer.serialize_seq(Some(a.len()))?;
                for v in a.iter() {
                    seq.serialize_element(v)?;
                }
                seq.end()
            }
            Value::Hash(h) => {
                let mut map = serializer.serialize_map(Some(h.len()))?;
                for (k, v) in h.iter() {
                    match k {
                        Value::String(s) => map.serialize_entry(s.as_ref(), v)?,
                        other => map.serialize_entry(&other.to_string(), v)?,
                    }
                }
                map.end()
            }
            Value::Type(t) => serializer.serialize_str(&t.to_string()),
            Value::Variable(_) => serializer.serialize_none(),
        }
    }
}

impl Value {
    /// Reads a value from JSON text; the entry point for fact providers.
    pub fn from_json_str(json: &str) -> Result<Value> {
        let parsed: serde_json::Value = serde_json::from_str(json)?;
        Ok(Value::from_json(parsed))
    }

    fn from_json(v: serde_json::Value) -> Value {
        match v {
            serde_json::Value::Null => Value::Undef,
            serde_json::Value::Bool(b) => Value::Boolean(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Integer(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Value::from(s),
            serde_json::Value::Array(a) => {
                Value::from(a.into_iter().map(Value::from_json).collect::<Vec<_>>())
            }
            serde_json::Value::Object(o) => {
                let mut hash = ValueHash::new();
                for (k, v) in o {
                    hash.insert(Value::from(k), Value::from_json(v));
                }
                Value::from(hash)
            }
        }
    }
}

/// An insertion-ordered mapping from value to value; keys are unique by
/// structural equality.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ValueHash {
    entries: IndexMap<Value, Value>,
}

impl ValueHash {
    pub fn new() -> ValueHash {
        ValueHash::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &Value) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn contains_key(&self, key: &Value) -> bool {
        self.entries.contains_key(key)
    }

    /// Inserts or replaces; a replaced key keeps its original position.
    pub fn insert(&mut self, key: Value, value: Value) {
        self.entries.insert(key, value);
    }

    pub fn remove(&mut self, key: &Value) -> Option<Value> {
        self.entries.shift_remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.entries.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &Value> {
        self.entries.keys()
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.entries.values()
    }
}

impl FromIterator<(Value, Value)> for ValueHash {
    fn from_iter<T: IntoIterator<Item = (Value, Value)>>(iter: T) -> Self {
        let mut hash = ValueHash::new();
        for (k, v) in iter {
            hash.insert(k, v);
        }
        hash
    }
}
