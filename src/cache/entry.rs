//! Cached settings and the immutable snapshot that holds them

use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::config::local::normalize_key;
use crate::store::models::SecretReference;

/// Where a cached value came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntrySource {
    Plain,
    /// Resolved from Key Vault
    SecretReference { uri: String },
}

/// One resolved setting. Never mutated; a refresh produces a new entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedEntry {
    pub key: String,
    pub value: String,
    pub source: EntrySource,
    pub loaded_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CachedEntry {
    pub fn plain<K: Into<String>, V: Into<String>>(
        key: K,
        value: V,
        loaded_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            source: EntrySource::Plain,
            loaded_at,
            expires_at,
        }
    }

    pub fn secret<K: Into<String>, V: Into<String>>(
        key: K,
        value: V,
        reference: &SecretReference,
        loaded_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            source: EntrySource::SecretReference {
                uri: reference.secret_uri(),
            },
            loaded_at,
            expires_at,
        }
    }

    pub fn is_secret(&self) -> bool {
        matches!(self.source, EntrySource::SecretReference { .. })
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// A complete generation of remote settings.
///
/// Snapshots are replaced as a whole, so a reader never observes a mix of
/// two generations.
#[derive(Debug, Clone)]
pub struct SettingsSnapshot {
    generation: u64,
    loaded_at: DateTime<Utc>,
    entries: HashMap<String, CachedEntry>,
}

impl SettingsSnapshot {
    pub fn empty(now: DateTime<Utc>) -> Self {
        Self {
            generation: 0,
            loaded_at: now,
            entries: HashMap::new(),
        }
    }

    pub fn new(generation: u64, loaded_at: DateTime<Utc>, entries: Vec<CachedEntry>) -> Self {
        let entries = entries
            .into_iter()
            .map(|entry| (normalize_key(&entry.key), entry))
            .collect();
        Self {
            generation,
            loaded_at,
            entries,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    /// Case-insensitive lookup
    pub fn get(&self, key: &str) -> Option<&CachedEntry> {
        self.entries.get(&normalize_key(key))
    }

    pub fn value(&self, key: &str) -> Option<&str> {
        self.get(key).map(|entry| entry.value.as_str())
    }

    pub fn entries(&self) -> impl Iterator<Item = &CachedEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, minute, 0).unwrap()
    }

    #[test]
    fn test_snapshot_lookup_is_case_insensitive() {
        let snapshot = SettingsSnapshot::new(
            3,
            at(0),
            vec![CachedEntry::plain("DemoApp:Color", "Blue", at(0), at(15))],
        );
        assert_eq!(snapshot.value("demoapp:COLOR"), Some("Blue"));
        assert_eq!(snapshot.generation(), 3);
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.value("DemoApp:Missing").is_none());
    }

    #[test]
    fn test_entry_expiry() {
        let entry = CachedEntry::plain("k", "v", at(0), at(0) + Duration::minutes(15));
        assert!(!entry.is_expired(at(14)));
        assert!(entry.is_expired(at(15)));
    }

    #[test]
    fn test_secret_entry_records_source() {
        let reference = SecretReference::parse("https://demo-kv.vault.azure.net/secrets/s").unwrap();
        let entry = CachedEntry::secret("DemoApp:MySecretValue", "hunter2", &reference, at(0), at(15));
        assert!(entry.is_secret());
        assert_eq!(
            entry.source,
            EntrySource::SecretReference {
                uri: "https://demo-kv.vault.azure.net/secrets/s".to_string()
            }
        );
    }

    #[test]
    fn test_empty_snapshot() {
        let snapshot = SettingsSnapshot::empty(at(0));
        assert!(snapshot.is_empty());
        assert_eq!(snapshot.generation(), 0);
    }
}
