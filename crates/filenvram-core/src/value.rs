//! Typed NVRAM values.
//!
//! NVRAM variables carry one of a small, closed set of types. `Dictionary`
//! only shows up in nested shapes (the backing file and imported platform
//! trees); the live store holds flat keys with scalar values.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A single NVRAM value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Value {
    String(String),
    Bytes(Vec<u8>),
    Integer(i32),
    Boolean(bool),
    Dictionary(Dictionary),
}

impl Value {
    /// Name of the variant, used in log lines and error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Integer(_) => "integer",
            Value::Boolean(_) => "boolean",
            Value::Dictionary(_) => "dictionary",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn is_dictionary(&self) -> bool {
        matches!(self, Value::Dictionary(_))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Vec<u8>> for Value {
    fn from(bytes: Vec<u8>) -> Self {
        Value::Bytes(bytes)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Integer(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<Dictionary> for Value {
    fn from(dict: Dictionary) -> Self {
        Value::Dictionary(dict)
    }
}

/// Insertion-ordered string-keyed mapping.
///
/// Keys are unique; inserting an existing key replaces its value in place so
/// the first-seen position is kept.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Dictionary {
    entries: Vec<(String, Value)>,
}

impl Dictionary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a value. Returns the previous value, if any.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.entries.push((key, value));
                None
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let index = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(index).1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl FromIterator<(String, Value)> for Dictionary {
    /// Later duplicates replace earlier values, as with [`Dictionary::insert`].
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        let mut entries: Vec<(String, Value)> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        for (k, v) in iter {
            match index.get(&k) {
                Some(&i) => entries[i].1 = v,
                None => {
                    index.insert(k.clone(), entries.len());
                    entries.push((k, v));
                }
            }
        }
        Dictionary { entries }
    }
}

impl IntoIterator for Dictionary {
    type Item = (String, Value);
    type IntoIter = std::vec::IntoIter<(String, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod dictionary {
        use super::*;

        #[test]
        fn insert_keeps_first_seen_order() {
            let mut dict = Dictionary::new();
            dict.insert("b", Value::from(1));
            dict.insert("a", Value::from(2));
            dict.insert("b", Value::from(3));

            let keys: Vec<_> = dict.iter().map(|(k, _)| k).collect();
            assert_eq!(keys, vec!["b", "a"]);
            assert_eq!(dict.get("b"), Some(&Value::Integer(3)));
        }

        #[test]
        fn insert_returns_previous() {
            let mut dict = Dictionary::new();
            assert!(dict.insert("k", Value::from(true)).is_none());
            assert_eq!(dict.insert("k", Value::from(false)), Some(Value::Boolean(true)));
        }

        #[test]
        fn remove_missing_is_none() {
            let mut dict = Dictionary::new();
            assert!(dict.remove("nope").is_none());
            assert!(dict.is_empty());
        }

        #[test]
        fn collect_replaces_duplicates_in_place() {
            let dict: Dictionary = [("b", 1), ("a", 2), ("b", 3)]
                .into_iter()
                .map(|(k, v)| (k.to_string(), Value::from(v)))
                .collect();

            let keys: Vec<_> = dict.iter().map(|(k, _)| k).collect();
            assert_eq!(keys, vec!["b", "a"]);
            assert_eq!(dict.get("b"), Some(&Value::Integer(3)));
        }
    }

    mod value {
        use super::*;

        #[test]
        fn kind_names() {
            assert_eq!(Value::from("x").kind(), "string");
            assert_eq!(Value::from(vec![1u8]).kind(), "bytes");
            assert_eq!(Value::from(7).kind(), "integer");
            assert_eq!(Value::from(true).kind(), "boolean");
            assert_eq!(Value::from(Dictionary::new()).kind(), "dictionary");
        }

        #[test]
        fn json_shape_is_tagged() {
            let json = serde_json::to_value(Value::from("-v")).unwrap();
            assert_eq!(json["type"], "string");
            assert_eq!(json["value"], "-v");

            let parsed: Value =
                serde_json::from_str(r#"{"type":"bytes","value":[1,2,3]}"#).unwrap();
            assert_eq!(parsed, Value::Bytes(vec![1, 2, 3]));
        }
    }
}
