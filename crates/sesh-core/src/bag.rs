//! Session bags: named groups of values kept inside a [`SessionRecord`].
//!
//! A storage backend only needs [`SessionBag::storage_key`] and
//! [`SessionBag::initialize`] to hand a loaded map to a bag, and
//! [`SessionBag::to_map`] to collect it back before saving.
//!
//! [`SessionRecord`]: crate::SessionRecord

use serde_json::{Map, Value};

use crate::types::{ATTRIBUTES_KEY, FLASHES_KEY};

pub trait SessionBag: Send + Sync {
    /// Key under which this bag lives in the session record.
    fn storage_key(&self) -> &str;

    /// Replace the bag contents with data loaded from storage.
    fn initialize(&mut self, data: Map<String, Value>);

    /// Current contents, in the shape `initialize` accepts.
    fn to_map(&self) -> Map<String, Value>;
}

// ── Attributes ──

/// Plain key/value attributes.
#[derive(Debug, Clone)]
pub struct AttributeBag {
    storage_key: String,
    attributes: Map<String, Value>,
}

impl Default for AttributeBag {
    fn default() -> Self {
        Self::new()
    }
}

impl AttributeBag {
    pub fn new() -> Self {
        Self::with_storage_key(ATTRIBUTES_KEY)
    }

    pub fn with_storage_key(key: impl Into<String>) -> Self {
        Self {
            storage_key: key.into(),
            attributes: Map::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.attributes.insert(name.into(), value);
    }

    pub fn has(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.attributes.remove(name)
    }

    pub fn all(&self) -> &Map<String, Value> {
        &self.attributes
    }

    pub fn clear(&mut self) {
        self.attributes.clear();
    }
}

impl SessionBag for AttributeBag {
    fn storage_key(&self) -> &str {
        &self.storage_key
    }

    fn initialize(&mut self, data: Map<String, Value>) {
        self.attributes = data;
    }

    fn to_map(&self) -> Map<String, Value> {
        self.attributes.clone()
    }
}

// ── Flashes ──

/// One-shot messages grouped by type (e.g. `"notice"`, `"error"`).
///
/// Each type holds a list of messages. [`FlashBag::take`] returns the list and
/// clears it, so a message is displayed once.
#[derive(Debug, Clone)]
pub struct FlashBag {
    storage_key: String,
    flashes: Map<String, Value>,
}

impl Default for FlashBag {
    fn default() -> Self {
        Self::new()
    }
}

impl FlashBag {
    pub fn new() -> Self {
        Self::with_storage_key(FLASHES_KEY)
    }

    pub fn with_storage_key(key: impl Into<String>) -> Self {
        Self {
            storage_key: key.into(),
            flashes: Map::new(),
        }
    }

    /// Append a message under `kind`.
    pub fn add(&mut self, kind: impl Into<String>, message: Value) {
        let entry = self
            .flashes
            .entry(kind.into())
            .or_insert_with(|| Value::Array(Vec::new()));
        match entry {
            Value::Array(items) => items.push(message),
            other => *other = Value::Array(vec![other.take(), message]),
        }
    }

    /// Messages under `kind` without clearing them.
    pub fn peek(&self, kind: &str) -> Vec<Value> {
        match self.flashes.get(kind) {
            Some(Value::Array(items)) => items.clone(),
            Some(other) => vec![other.clone()],
            None => Vec::new(),
        }
    }

    /// Messages under `kind`, removing them from the bag.
    pub fn take(&mut self, kind: &str) -> Vec<Value> {
        match self.flashes.remove(kind) {
            Some(Value::Array(items)) => items,
            Some(other) => vec![other],
            None => Vec::new(),
        }
    }

    pub fn has(&self, kind: &str) -> bool {
        !self.peek(kind).is_empty()
    }

    pub fn all(&self) -> &Map<String, Value> {
        &self.flashes
    }

    pub fn clear(&mut self) {
        self.flashes.clear();
    }
}

impl SessionBag for FlashBag {
    fn storage_key(&self) -> &str {
        &self.storage_key
    }

    fn initialize(&mut self, data: Map<String, Value>) {
        self.flashes = data;
    }

    fn to_map(&self) -> Map<String, Value> {
        self.flashes.clone()
    }
}
