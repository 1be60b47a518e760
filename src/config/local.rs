//! Local configuration layers
//!
//! Settings read from the application's own files and environment. They
//! are consulted when the remote store has no value (`base`) or win over
//! the remote store (`overrides`, used for local debugging).

use serde_json::Value;
use std::collections::HashMap;

/// Flattened, case-insensitive key/value layers
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocalConfiguration {
    base: HashMap<String, String>,
    overrides: HashMap<String, String>,
}

impl LocalConfiguration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut local = Self::new();
        for (key, value) in pairs {
            local.insert(key.as_ref(), value);
        }
        local
    }

    /// Build the base layer from a nested document (`{"DemoApp": {"Color": "Red"}}`)
    pub fn from_document(document: &Value) -> Self {
        let mut local = Self::new();
        flatten_into(document, None, &mut local.base);
        local
    }

    pub fn with_overrides_document(mut self, document: &Value) -> Self {
        flatten_into(document, None, &mut self.overrides);
        self
    }

    pub fn insert<V: Into<String>>(&mut self, key: &str, value: V) {
        self.base.insert(normalize_key(key), value.into());
    }

    pub fn insert_override<V: Into<String>>(&mut self, key: &str, value: V) {
        self.overrides.insert(normalize_key(key), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.base.get(&normalize_key(key)).map(String::as_str)
    }

    pub fn get_override(&self, key: &str) -> Option<&str> {
        self.overrides.get(&normalize_key(key)).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.base.len() + self.overrides.len()
    }

    pub fn is_empty(&self) -> bool {
        self.base.is_empty() && self.overrides.is_empty()
    }
}

/// Configuration keys compare case-insensitively
pub fn normalize_key(key: &str) -> String {
    key.trim().to_lowercase()
}

fn flatten_into(value: &Value, prefix: Option<&str>, out: &mut HashMap<String, String>) {
    let join = |segment: &str| match prefix {
        Some(prefix) => format!("{}:{}", prefix, segment),
        None => segment.to_string(),
    };

    match value {
        Value::Object(map) => {
            for (key, child) in map {
                flatten_into(child, Some(&join(key)), out);
            }
        }
        Value::Array(items) => {
            for (index, child) in items.iter().enumerate() {
                flatten_into(child, Some(&join(&index.to_string())), out);
            }
        }
        Value::Null => {}
        Value::String(text) => {
            if let Some(key) = prefix {
                out.insert(normalize_key(key), text.clone());
            }
        }
        other => {
            if let Some(key) = prefix {
                out.insert(normalize_key(key), other.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_flatten_nested_document() {
        let local = LocalConfiguration::from_document(&json!({
            "DemoApp": { "Color": "Red", "Retries": 3, "Hosts": ["a", "b"] },
            "Logging": { "Enabled": true, "Unused": null }
        }));

        assert_eq!(local.get("DemoApp:Color"), Some("Red"));
        assert_eq!(local.get("demoapp:color"), Some("Red"));
        assert_eq!(local.get("DemoApp:Retries"), Some("3"));
        assert_eq!(local.get("DemoApp:Hosts:1"), Some("b"));
        assert_eq!(local.get("Logging:Enabled"), Some("true"));
        assert_eq!(local.get("Logging:Unused"), None);
    }

    #[test]
    fn test_overrides_are_separate_layer() {
        let local = LocalConfiguration::from_pairs([("DemoApp:Color", "Red")])
            .with_overrides_document(&json!({ "DemoApp": { "Color": "Green" } }));

        assert_eq!(local.get("DemoApp:Color"), Some("Red"));
        assert_eq!(local.get_override("DemoApp:Color"), Some("Green"));
        assert_eq!(local.len(), 2);
    }
}
