#![allow(dead_code)]

use appconfig_refresh::store::{ConfigurationStore, KeySelector, KeyValue, SecretReference, SecretResolver};
use appconfig_refresh::{AppConfigError, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::Semaphore;

pub const ENDPOINT: &str = "https://demo.azconfig.io";
pub const SENTINEL: &str = "Settings:Refresh";

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

/// Configuration store kept in memory, with call counters and a gate that
/// can hold settings listings until released
pub struct InMemoryStore {
    items: Mutex<Vec<KeyValue>>,
    etag_counter: AtomicUsize,
    pub settings_lists: AtomicUsize,
    pub flag_lists: AtomicUsize,
    pub sentinel_reads: AtomicUsize,
    unreachable: AtomicBool,
    gated: AtomicBool,
    gate: Semaphore,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(Vec::new()),
            etag_counter: AtomicUsize::new(0),
            settings_lists: AtomicUsize::new(0),
            flag_lists: AtomicUsize::new(0),
            sentinel_reads: AtomicUsize::new(0),
            unreachable: AtomicBool::new(false),
            gated: AtomicBool::new(false),
            gate: Semaphore::new(0),
        }
    }

    pub fn with(items: Vec<KeyValue>) -> Self {
        let store = Self::new();
        for kv in items {
            store.put(kv);
        }
        store
    }

    /// Insert or replace a key-value; every write gets a fresh etag
    pub fn put(&self, mut kv: KeyValue) {
        let etag = self.etag_counter.fetch_add(1, Ordering::SeqCst);
        kv.etag = Some(format!("etag-{}", etag));
        let mut items = self.items.lock().unwrap();
        items.retain(|existing| !(existing.key == kv.key && existing.label == kv.label));
        items.push(kv);
    }

    pub fn set(&self, key: &str, value: &str) {
        self.put(KeyValue::new(key, value));
    }

    pub fn remove(&self, key: &str) {
        self.items.lock().unwrap().retain(|kv| kv.key != key);
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Hold settings listings until [`Self::open_gate`]
    pub fn close_gate(&self) {
        self.gated.store(true, Ordering::SeqCst);
    }

    pub fn open_gate(&self) {
        self.gated.store(false, Ordering::SeqCst);
        self.gate.add_permits(Semaphore::MAX_PERMITS / 2);
    }

    pub fn settings_lists(&self) -> usize {
        self.settings_lists.load(Ordering::SeqCst)
    }

    pub fn flag_lists(&self) -> usize {
        self.flag_lists.load(Ordering::SeqCst)
    }

    pub fn sentinel_reads(&self) -> usize {
        self.sentinel_reads.load(Ordering::SeqCst)
    }

    fn check_reachable(&self) -> Result<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(AppConfigError::connectivity("demo.azconfig.io is unreachable"));
        }
        Ok(())
    }
}

#[async_trait]
impl ConfigurationStore for InMemoryStore {
    async fn list_settings(&self, selector: &KeySelector) -> Result<Vec<KeyValue>> {
        self.check_reachable()?;

        if selector.key_filter.starts_with(".appconfig.featureflag/") {
            self.flag_lists.fetch_add(1, Ordering::SeqCst);
        } else {
            self.settings_lists.fetch_add(1, Ordering::SeqCst);
            if self.gated.load(Ordering::SeqCst) {
                let _permit = self
                    .gate
                    .acquire()
                    .await
                    .map_err(|e| AppConfigError::unknown(e.to_string()))?;
            }
        }

        let items = self.items.lock().unwrap();
        Ok(items
            .iter()
            .filter(|kv| selector.matches(&kv.key) && kv.label == selector.label)
            .cloned()
            .collect())
    }

    async fn get_setting(&self, selector: &KeySelector) -> Result<Option<KeyValue>> {
        self.check_reachable()?;
        self.sentinel_reads.fetch_add(1, Ordering::SeqCst);

        let items = self.items.lock().unwrap();
        Ok(items
            .iter()
            .find(|kv| kv.key == selector.key_filter && kv.label == selector.label)
            .cloned())
    }
}

/// Secrets by URI, counting lookups
#[derive(Default)]
pub struct StaticSecrets {
    secrets: Mutex<HashMap<String, String>>,
    pub lookups: AtomicUsize,
}

impl StaticSecrets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, uri: &str, value: &str) {
        self.secrets.lock().unwrap().insert(uri.to_string(), value.to_string());
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SecretResolver for StaticSecrets {
    async fn resolve(&self, reference: &SecretReference) -> Result<String> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.secrets
            .lock()
            .unwrap()
            .get(&reference.secret_uri())
            .cloned()
            .ok_or_else(|| AppConfigError::secret_resolution(reference.secret_uri(), "secret not found".to_string()))
    }
}
