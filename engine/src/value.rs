//! The decoded value tree.
//!
//! Sidecar files are Lua table literals whose shape changes between device
//! firmware generations. [`Value`] keeps that shape as a tagged tree instead
//! of guessing structure up front: a table whose keys are exactly `1..=n` is a
//! [`Value::Sequence`], every other table (sparse integer keys, keys starting
//! at 0, string keys, the empty table) is a [`Value::Map`].
//!
//! Tables never store `nil`: assigning `nil` to a key removes it, as Lua does.

use serde::de::{self, MapAccess, SeqAccess, Visitor};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// A table key. Integer keys sort before string keys.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Key {
    Int(i64),
    Str(String),
}

impl Key {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Key::Int(i) => Some(*i),
            Key::Str(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Key::Int(_) => None,
            Key::Str(s) => Some(s),
        }
    }

    /// Parse a JSON object key, turning canonical decimal integers back into
    /// integer keys.
    fn from_json_key(key: &str) -> Self {
        match key.parse::<i64>() {
            Ok(i) if i.to_string() == key => Key::Int(i),
            _ => Key::Str(key.to_string()),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Int(i) => write!(f, "{}", i),
            Key::Str(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for Key {
    fn from(i: i64) -> Self {
        Key::Int(i)
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::Str(s.to_string())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::Str(s)
    }
}

/// A node of a decoded sidecar.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// Dense 1-based table, stored 0-based.
    Sequence(Vec<Value>),
    Map(BTreeMap<Key, Value>),
}

impl Value {
    /// An empty table.
    pub fn empty_table() -> Self {
        Value::Map(BTreeMap::new())
    }

    /// Build a table from key/value pairs with Lua semantics: later keys
    /// overwrite earlier ones and `nil` values are dropped. The result is a
    /// sequence only when its keys are exactly `1..=n`.
    pub fn table<K, I>(entries: I) -> Self
    where
        K: Into<Key>,
        I: IntoIterator<Item = (K, Value)>,
    {
        let mut map = BTreeMap::new();
        for (key, value) in entries {
            let key = key.into();
            if value.is_nil() {
                map.remove(&key);
            } else {
                map.insert(key, value);
            }
        }
        Self::from_map(map)
    }

    /// Build a table from positional items, numbered from 1.
    pub fn sequence(items: impl IntoIterator<Item = Value>) -> Self {
        Self::table(
            items
                .into_iter()
                .enumerate()
                .map(|(i, v)| (Key::Int(i as i64 + 1), v)),
        )
    }

    fn from_map(map: BTreeMap<Key, Value>) -> Self {
        let dense = !map.is_empty()
            && map
                .keys()
                .enumerate()
                .all(|(i, k)| *k == Key::Int(i as i64 + 1));
        if dense {
            Value::Sequence(map.into_values().collect())
        } else {
            Value::Map(map)
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn is_table(&self) -> bool {
        matches!(self, Value::Sequence(_) | Value::Map(_))
    }

    /// Human-readable name of the variant, used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "boolean",
            Value::Int(_) => "integer",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Sequence(_) => "sequence",
            Value::Map(_) => "map",
        }
    }

    /// Look up a key in a table. Sequences answer integer keys `1..=n`.
    pub fn get(&self, key: impl Into<Key>) -> Option<&Value> {
        let key = key.into();
        match (self, &key) {
            (Value::Map(map), _) => map.get(&key),
            (Value::Sequence(items), Key::Int(i)) if *i >= 1 => items.get(*i as usize - 1),
            _ => None,
        }
    }

    /// Follow a chain of string keys.
    pub fn path(&self, keys: &[&str]) -> Option<&Value> {
        keys.iter().try_fold(self, |node, key| node.get(*key))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric value of an integer or float.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Integer value; floats qualify only when they have no fractional part.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Children of a table in key order, with their keys. Scalars have none.
    pub fn entries(&self) -> Vec<(Key, &Value)> {
        match self {
            Value::Sequence(items) => items
                .iter()
                .enumerate()
                .map(|(i, v)| (Key::Int(i as i64 + 1), v))
                .collect(),
            Value::Map(map) => map.iter().map(|(k, v)| (k.clone(), v)).collect(),
            _ => Vec::new(),
        }
    }

    fn into_entries(self) -> BTreeMap<Key, Value> {
        match self {
            Value::Sequence(items) => items
                .into_iter()
                .enumerate()
                .map(|(i, v)| (Key::Int(i as i64 + 1), v))
                .collect(),
            Value::Map(map) => map,
            _ => BTreeMap::new(),
        }
    }

    /// Deep-merge `other` into `self`. Tables merge key by key; any other
    /// combination replaces `self` with `other`.
    pub fn merge(&mut self, other: Value) {
        if !(self.is_table() && other.is_table()) {
            *self = other;
            return;
        }

        let mut base = std::mem::take(self).into_entries();
        for (key, incoming) in other.into_entries() {
            match base.get_mut(&key) {
                Some(existing) => existing.merge(incoming),
                None => {
                    base.insert(key, incoming);
                }
            }
        }
        *self = Value::from_map(base);
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

// JSON projection: maps become objects with stringified keys.
impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Nil => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Float(f) => serializer.serialize_f64(*f),
            Value::Str(s) => serializer.serialize_str(s),
            Value::Sequence(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Map(map) => {
                let mut out = serializer.serialize_map(Some(map.len()))?;
                for (key, value) in map {
                    out.serialize_entry(&key.to_string(), value)?;
                }
                out.end()
            }
        }
    }
}

struct ValueVisitor;

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a JSON projection of a sidecar value")
    }

    fn visit_unit<E: de::Error>(self) -> Result<Value, E> {
        Ok(Value::Nil)
    }

    fn visit_none<E: de::Error>(self) -> Result<Value, E> {
        Ok(Value::Nil)
    }

    fn visit_bool<E: de::Error>(self, b: bool) -> Result<Value, E> {
        Ok(Value::Bool(b))
    }

    fn visit_i64<E: de::Error>(self, i: i64) -> Result<Value, E> {
        Ok(Value::Int(i))
    }

    fn visit_u64<E: de::Error>(self, u: u64) -> Result<Value, E> {
        Ok(i64::try_from(u).map_or(Value::Float(u as f64), Value::Int))
    }

    fn visit_f64<E: de::Error>(self, f: f64) -> Result<Value, E> {
        Ok(Value::Float(f))
    }

    fn visit_str<E: de::Error>(self, s: &str) -> Result<Value, E> {
        Ok(Value::Str(s.to_string()))
    }

    fn visit_string<E: de::Error>(self, s: String) -> Result<Value, E> {
        Ok(Value::Str(s))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Value, A::Error> {
        let mut items = Vec::new();
        while let Some(item) = seq.next_element::<Value>()? {
            items.push(item);
        }
        Ok(Value::sequence(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Value, A::Error> {
        let mut entries = Vec::new();
        while let Some((key, value)) = access.next_entry::<String, Value>()? {
            entries.push((Key::from_json_key(&key), value));
        }
        Ok(Value::table(entries))
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(ValueVisitor)
    }
}
