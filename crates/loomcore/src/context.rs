use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Values produced by completed nodes, keyed by variable name.
///
/// The map is shared copy-on-write: `merge` returns a new context and leaves
/// every earlier snapshot untouched, so snapshots can be logged or handed to
/// callers without aliasing hazards.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionContext {
    values: Arc<Map<String, Value>>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context seeded by a trigger event
    pub fn from_seed(seed: Map<String, Value>) -> Self {
        Self {
            values: Arc::new(seed),
        }
    }

    /// New context equal to this one with `key` set to `value`
    pub fn merge(&self, key: impl Into<String>, value: Value) -> Self {
        let mut values = Map::clone(&self.values);
        values.insert(key.into(), value);
        Self {
            values: Arc::new(values),
        }
    }

    /// New context with every entry of `values` set, other keys kept
    pub fn merge_all(&self, values: Map<String, Value>) -> Self {
        if values.is_empty() {
            return self.clone();
        }
        let mut merged = Map::clone(&self.values);
        merged.extend(values);
        Self {
            values: Arc::new(merged),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.values.keys()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.values
    }

    pub fn to_json(&self) -> Value {
        Value::Object(Map::clone(&self.values))
    }

    /// True if both contexts share the same underlying map
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.values, &other.values)
    }
}

impl From<Map<String, Value>> for ExecutionContext {
    fn from(seed: Map<String, Value>) -> Self {
        Self::from_seed(seed)
    }
}

impl Serialize for ExecutionContext {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.values.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ExecutionContext {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Map::deserialize(deserializer).map(Self::from_seed)
    }
}

/// How a node changes the context. A node owns at most one key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ContextPatch {
    Unchanged,
    Set { key: String, value: Value },
    /// Reinstate entries a trigger committed, so a resumed run sees the
    /// context it started with
    Restore { values: Map<String, Value> },
}

impl ContextPatch {
    pub fn set(key: impl Into<String>, value: Value) -> Self {
        ContextPatch::Set {
            key: key.into(),
            value,
        }
    }

    /// Key written by this patch, if any
    pub fn key(&self) -> Option<&str> {
        match self {
            ContextPatch::Unchanged | ContextPatch::Restore { .. } => None,
            ContextPatch::Set { key, .. } => Some(key),
        }
    }

    pub fn apply(self, context: &ExecutionContext) -> ExecutionContext {
        match self {
            ContextPatch::Unchanged => context.clone(),
            ContextPatch::Set { key, value } => context.merge(key, value),
            ContextPatch::Restore { values } => context.merge_all(values),
        }
    }
}
