use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::error::Result;

// ── Bag keys ──
pub const ATTRIBUTES_KEY: &str = "attributes";
pub const FLASHES_KEY: &str = "flashes";

// ── Session record ──

/// A session identifier plus the named bags stored under it.
///
/// Storage backends never look inside a bag. The whole record is encoded as
/// a single JSON object (`{"attributes": {...}, "flashes": {...}, ...}`) and
/// written as one unit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionRecord {
    pub id: String,
    pub bags: BTreeMap<String, Value>,
}

impl SessionRecord {
    /// An empty record with the default bags present.
    pub fn new(id: impl Into<String>) -> Self {
        let mut record = Self {
            id: id.into(),
            bags: BTreeMap::new(),
        };
        record.ensure_default_bags();
        record
    }

    /// Decode a stored payload. An empty payload is an empty session.
    pub fn decode(id: impl Into<String>, data: &[u8]) -> Result<Self> {
        let bags = if data.is_empty() {
            BTreeMap::new()
        } else {
            serde_json::from_slice(data)?
        };
        let mut record = Self {
            id: id.into(),
            bags,
        };
        record.ensure_default_bags();
        Ok(record)
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.bags)?)
    }

    /// Make sure the attribute and flash bags exist, each as an object.
    pub fn ensure_default_bags(&mut self) {
        for key in [ATTRIBUTES_KEY, FLASHES_KEY] {
            self.bags
                .entry(key.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
        }
    }

    pub fn bag(&self, key: &str) -> Option<&Value> {
        self.bags.get(key)
    }

    /// The contents of a bag as a map; non-object values yield an empty map.
    pub fn bag_map(&self, key: &str) -> Map<String, Value> {
        match self.bags.get(key) {
            Some(Value::Object(map)) => map.clone(),
            _ => Map::new(),
        }
    }

    pub fn set_bag(&mut self, key: impl Into<String>, value: Value) {
        self.bags.insert(key.into(), value);
    }

    /// True when every bag is empty.
    pub fn is_empty(&self) -> bool {
        self.bags.values().all(|v| match v {
            Value::Object(map) => map.is_empty(),
            Value::Array(items) => items.is_empty(),
            Value::Null => true,
            _ => false,
        })
    }
}
