use std::collections::HashMap;
use std::fmt::{self, Display, Formatter};

use serde_json::{json, Value};

use crate::protocol::{check_fields, string_field, ProtocolError};

/// A single stored entry.
///
/// Entries created by a local `put` remember the plain-text key they were
/// stored under; entries received over the wire only carry the identifier,
/// so the original key is absent.
#[derive(Clone, Debug, PartialEq)]
pub struct KeyValueEntry {
    pub original_key: Option<String>,
    pub value: String,
}

/// The node's local key-value store, mapping base64 identifiers to entries.
///
/// Later writes to the same identifier overwrite earlier ones; entries are
/// never removed.
#[derive(Default)]
pub struct KeyValueStore {
    entries: HashMap<String, KeyValueEntry>,
}

impl KeyValueStore {
    /// Constructs a new, empty `KeyValueStore`.
    pub fn new() -> Self {
        KeyValueStore {
            entries: HashMap::new(),
        }
    }

    /// Overwrite-inserts `value` under `identifier`. `original_key` is the
    /// plain-text key for entries stored through a local put, `None` for
    /// entries learned from the network.
    pub fn put(&mut self, identifier: &str, original_key: Option<&str>, value: &str) {
        self.entries.insert(
            identifier.to_string(),
            KeyValueEntry {
                original_key: original_key.map(str::to_string),
                value: value.to_string(),
            },
        );
    }

    /// Returns the value stored under `identifier`, if any.
    pub fn get(&self, identifier: &str) -> Option<&str> {
        self.entries.get(identifier).map(|entry| entry.value.as_str())
    }

    pub fn get_original_key(&self, identifier: &str) -> Option<&str> {
        self.entries
            .get(identifier)
            .and_then(|entry| entry.original_key.as_deref())
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.entries.contains_key(identifier)
    }

    /// A snapshot of every entry, taken so the replicator can publish
    /// without holding the store's lock.
    pub fn all_entries(&self) -> HashMap<String, KeyValueEntry> {
        self.entries.clone()
    }

    /// Serializes the store to `{"data": [{"key": …, "value": …}, …]}`.
    /// Diagnostics only; this shape never travels on the wire.
    pub fn to_json(&self) -> Value {
        let data: Vec<Value> = self
            .entries
            .iter()
            .map(|(key, entry)| json!({ "key": key, "value": entry.value }))
            .collect();
        json!({ "data": data })
    }

    /// Rebuilds a store from the diagnostics shape produced by `to_json`.
    /// Original keys are not part of that shape, so every rebuilt entry is
    /// keyless.
    pub fn from_json(value: &Value) -> Result<KeyValueStore, ProtocolError> {
        let obj = value.as_object().ok_or_else(|| {
            ProtocolError::Malformed("expected a key-value store object".to_string())
        })?;
        check_fields(obj, &["data"])?;
        let data = obj.get("data").and_then(Value::as_array).ok_or_else(|| {
            ProtocolError::Malformed("field \"data\" is not an array".to_string())
        })?;

        let mut store = KeyValueStore::new();
        for pair in data {
            let pair = pair.as_object().ok_or_else(|| {
                ProtocolError::Malformed("data entry is not an object".to_string())
            })?;
            check_fields(pair, &["key", "value"])?;
            store.put(
                &string_field(pair, "key")?,
                None,
                &string_field(pair, "value")?,
            );
        }
        Ok(store)
    }
}

impl Display for KeyValueStore {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        writeln!(f, "KeyValueStore {{")?;
        for (identifier, entry) in &self.entries {
            match &entry.original_key {
                Some(original_key) => writeln!(
                    f,
                    "  {} : {} (key: {})",
                    identifier, entry.value, original_key
                )?,
                None => writeln!(f, "  {} : {}", identifier, entry.value)?,
            }
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::KeyValueStore;
    use crate::key::Key;

    #[test]
    fn test_put_overwrites() {
        let uid = Key::for_content("fruit").to_base64();
        let mut store = KeyValueStore::new();
        store.put(&uid, Some("fruit"), "apple");
        store.put(&uid, None, "banana");

        assert_eq!(store.get(&uid), Some("banana"));
        assert_eq!(store.get_original_key(&uid), None);
        assert!(store.contains(&uid));
        assert_eq!(store.all_entries().len(), 1);
    }

    #[test]
    fn test_original_key_is_tracked() {
        let uid = Key::for_content("fruit").to_base64();
        let mut store = KeyValueStore::new();
        store.put(&uid, Some("fruit"), "apple");

        assert_eq!(store.get_original_key(&uid), Some("fruit"));
        assert!(store.to_string().contains("(key: fruit)"));
    }

    #[test]
    fn test_missing_identifier() {
        let store = KeyValueStore::new();
        assert_eq!(store.get("bm90LXRoZXJl"), None);
        assert!(!store.contains("bm90LXRoZXJl"));
    }

    #[test]
    fn test_json_round_trip() {
        let mut store = KeyValueStore::new();
        store.put(&Key::for_content("a").to_base64(), Some("a"), "1");
        store.put(&Key::for_content("b").to_base64(), None, "2");

        let rebuilt = KeyValueStore::from_json(&store.to_json()).unwrap();
        assert_eq!(rebuilt.get(&Key::for_content("a").to_base64()), Some("1"));
        assert_eq!(rebuilt.get(&Key::for_content("b").to_base64()), Some("2"));
        // the diagnostics shape does not carry original keys
        assert_eq!(
            rebuilt.get_original_key(&Key::for_content("a").to_base64()),
            None
        );
    }

    #[test]
    fn test_from_json_rejects_wrong_shape() {
        let value = serde_json::json!({ "data": [], "extra": 1 });
        assert!(KeyValueStore::from_json(&value).is_err());
        let value = serde_json::json!({ "data": [{ "key": "abc" }] });
        assert!(KeyValueStore::from_json(&value).is_err());
        let value = serde_json::json!([1, 2]);
        assert!(KeyValueStore::from_json(&value).is_err());
    }
}
