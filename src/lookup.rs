//! Slot → text lookup table that accompanies the vector index.
//!
//! Index builders have produced three JSON shapes over time. The shape is
//! detected once at load; afterwards every caller goes through
//! [`LookupTable::resolve`].
//!
//! 1. **Paired**: a document store plus a slot → reference map
//!    ```json
//!    { "docstore": { "ref-a": {...} }, "index_to_docstore_id": { "0": "ref-a" } }
//!    ```
//! 2. **Slot map**: `{ "0": {...}, "1": {...} }`
//! 3. **Sequence**: `[ {...}, {...} ]`, slot = array position
//!
//! An entry is either a bare string (its content) or an object whose text
//! lives in `page_content`, `content`, or `text`, with an optional title
//! in `metadata.title`, `metadata.source`, `title`, or `source`.

use anyhow::{bail, Result};
use serde_json::Value;
use std::collections::HashMap;

/// Resolved text behind one index slot.
#[derive(Debug, Clone, PartialEq)]
pub struct LookupEntry {
    /// Stable reference: docstore key (paired) or slot number (other shapes).
    pub reference: String,
    pub content: String,
    pub title: Option<String>,
}

#[derive(Debug, Clone)]
pub enum LookupTable {
    Paired {
        docstore: HashMap<String, LookupEntry>,
        slots: HashMap<i64, String>,
    },
    SlotMap(HashMap<i64, LookupEntry>),
    Sequence(Vec<LookupEntry>),
}

impl LookupTable {
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(bytes)?;
        Self::from_value(&value)
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Array(items) => Ok(LookupTable::Sequence(
                items
                    .iter()
                    .enumerate()
                    .map(|(slot, item)| parse_entry(slot.to_string(), item))
                    .collect(),
            )),
            Value::Object(map)
                if map.contains_key("docstore") && map.contains_key("index_to_docstore_id") =>
            {
                let docstore = map
                    .get("docstore")
                    .and_then(|d| d.as_object())
                    .ok_or_else(|| anyhow::anyhow!("lookup docstore is not an object"))?
                    .iter()
                    .map(|(reference, entry)| (reference.clone(), parse_entry(reference.clone(), entry)))
                    .collect();

                let mut slots = HashMap::new();
                let mapping = map
                    .get("index_to_docstore_id")
                    .and_then(|m| m.as_object())
                    .ok_or_else(|| anyhow::anyhow!("lookup index_to_docstore_id is not an object"))?;
                for (slot, reference) in mapping {
                    let (Ok(slot), Some(reference)) = (slot.parse::<i64>(), reference.as_str()) else {
                        tracing::warn!(slot = %slot, "skipping malformed lookup mapping");
                        continue;
                    };
                    slots.insert(slot, reference.to_string());
                }

                Ok(LookupTable::Paired { docstore, slots })
            }
            Value::Object(map) => {
                let mut entries = HashMap::with_capacity(map.len());
                for (slot, entry) in map {
                    let Ok(parsed) = slot.parse::<i64>() else {
                        tracing::warn!(slot = %slot, "skipping non-numeric lookup key");
                        continue;
                    };
                    entries.insert(parsed, parse_entry(slot.clone(), entry));
                }
                Ok(LookupTable::SlotMap(entries))
            }
            _ => bail!("lookup table must be a JSON object or array"),
        }
    }

    /// Resolve an index slot. `-1` (the "no hit" sentinel) and unmapped
    /// slots resolve to `None`.
    pub fn resolve(&self, slot: i64) -> Option<&LookupEntry> {
        if slot < 0 {
            return None;
        }
        match self {
            LookupTable::Paired { docstore, slots } => {
                slots.get(&slot).and_then(|reference| docstore.get(reference))
            }
            LookupTable::SlotMap(entries) => entries.get(&slot),
            LookupTable::Sequence(entries) => entries.get(slot as usize),
        }
    }

    /// Number of distinct documents in the table.
    pub fn document_count(&self) -> usize {
        match self {
            LookupTable::Paired { docstore, .. } => docstore.len(),
            LookupTable::SlotMap(entries) => entries.len(),
            LookupTable::Sequence(entries) => entries.len(),
        }
    }
}

fn parse_entry(reference: String, value: &Value) -> LookupEntry {
    match value {
        Value::String(content) => LookupEntry {
            reference,
            content: content.clone(),
            title: None,
        },
        Value::Object(obj) => {
            let content = ["page_content", "content", "text"]
                .iter()
                .find_map(|key| obj.get(*key).and_then(|v| v.as_str()))
                .unwrap_or_default()
                .to_string();
            let metadata = obj.get("metadata");
            let title = ["title", "source"]
                .iter()
                .find_map(|key| metadata.and_then(|m| m.get(*key)).and_then(|v| v.as_str()))
                .or_else(|| {
                    ["title", "source"]
                        .iter()
                        .find_map(|key| obj.get(*key).and_then(|v| v.as_str()))
                })
                .map(str::to_string);
            LookupEntry {
                reference,
                content,
                title,
            }
        }
        other => LookupEntry {
            reference,
            content: other.to_string(),
            title: None,
        },
    }
}
