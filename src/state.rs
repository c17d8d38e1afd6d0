use std::{fmt, rc::Rc};

use derive_ex::derive_ex;
use serde::Serialize;
use serde_json::{Map, Value};


pub const VALUE_KEY: &str = "value";
pub const PATH_KEY: &str = "path";
pub const INDEX_KEY: &str = "index";
pub const NAME_KEY: &str = "name";

/// A string-keyed record of state entries.
///
/// Used both for the composed state of a field and for the partial updates
/// passed to [`Field::update`](crate::Field::update).
#[derive(Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct FieldState(Map<String, Value>);

impl FieldState {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Returns a copy of `self` with `key` set to `value`.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }
    pub fn len(&self) -> usize {
        self.0.len()
    }
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Copies every entry of `part` into `self`, overwriting existing keys.
    pub fn merge(&mut self, part: &FieldState) {
        for (key, value) in &part.0 {
            self.0.insert(key.clone(), value.clone());
        }
    }

    pub fn value(&self) -> Option<&Value> {
        self.get(VALUE_KEY)
    }
    pub fn path(&self) -> Option<&str> {
        self.get(PATH_KEY).and_then(Value::as_str)
    }
    pub fn index(&self) -> Option<usize> {
        self.get(INDEX_KEY)
            .and_then(Value::as_u64)
            .and_then(|index| usize::try_from(index).ok())
    }
    pub fn name(&self) -> Option<&str> {
        self.get(NAME_KEY).and_then(Value::as_str)
    }

    /// Snapshot of the record as a JSON object.
    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }
}
impl fmt::Debug for FieldState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.0.iter()).finish()
    }
}
impl From<Map<String, Value>> for FieldState {
    fn from(value: Map<String, Value>) -> Self {
        Self(value)
    }
}
impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for FieldState {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        )
    }
}
impl<K: Into<String>, V: Into<Value>, const N: usize> From<[(K, V); N]> for FieldState {
    fn from(value: [(K, V); N]) -> Self {
        value.into_iter().collect()
    }
}
impl PartialEq<Value> for FieldState {
    fn eq(&self, other: &Value) -> bool {
        match other {
            Value::Object(other) => &self.0 == other,
            _ => false,
        }
    }
}

/// Payload delivered to listeners of a field.
#[derive(Debug)]
#[derive_ex(Clone)]
pub struct FieldChange {
    /// State delivered by the previous emission (or the initial state).
    pub prev_state: Rc<FieldState>,
    pub next_state: Rc<FieldState>,
}

impl FieldChange {
    pub fn value_changed(&self) -> bool {
        self.prev_state.value() != self.next_state.value()
    }
    pub fn name_changed(&self) -> bool {
        self.prev_state.name() != self.next_state.name()
    }
    pub fn path_changed(&self) -> bool {
        self.prev_state.path() != self.next_state.path()
    }
}
