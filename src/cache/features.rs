//! Feature flag cache
//!
//! Flags live in their own snapshot with their own expiration clock; the
//! sentinel key has no effect on them.

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::local::normalize_key;
use crate::store::models::KeyValue;
use crate::utils::datetime::{add_duration, parse_timestamp};

pub const ALWAYS_ON_FILTER: &str = "Microsoft.AlwaysOn";
pub const TIME_WINDOW_FILTER: &str = "Microsoft.TimeWindow";
pub const PERCENTAGE_FILTER: &str = "Microsoft.Percentage";

/// A condition attached to an enabled flag
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FeatureFilter {
    pub name: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

impl FeatureFilter {
    fn parameter(&self, name: &str) -> Option<&Value> {
        self.parameters
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value)
    }

    fn evaluate(&self, now: DateTime<Utc>) -> bool {
        let name = self.name.trim();
        if name.eq_ignore_ascii_case(ALWAYS_ON_FILTER) || name.eq_ignore_ascii_case("AlwaysOn") {
            return true;
        }

        if name.eq_ignore_ascii_case(TIME_WINDOW_FILTER) || name.eq_ignore_ascii_case("TimeWindow") {
            let bound = |param: &str| {
                self.parameter(param)
                    .and_then(Value::as_str)
                    .and_then(|text| parse_timestamp(text).ok())
            };
            let after_start = bound("Start").map_or(true, |start| now >= start);
            let before_end = bound("End").map_or(true, |end| now < end);
            return after_start && before_end;
        }

        if name.eq_ignore_ascii_case(PERCENTAGE_FILTER) || name.eq_ignore_ascii_case("Percentage") {
            let percentage = self
                .parameter("Value")
                .and_then(|v| v.as_f64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
                .unwrap_or(0.0);
            if percentage <= 0.0 {
                return false;
            }
            if percentage >= 100.0 {
                return true;
            }
            return rand::thread_rng().gen_range(0.0..100.0) < percentage;
        }

        debug!(filter = %self.name, "Unsupported feature filter evaluates to off");
        false
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct Conditions {
    #[serde(default)]
    client_filters: Vec<FeatureFilter>,
}

#[derive(Debug, Clone, Deserialize)]
struct FeatureFlagDocument {
    id: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    enabled: bool,
    #[serde(default)]
    conditions: Option<Conditions>,
}

/// A boolean toggle loaded from the store
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureFlag {
    pub id: String,
    pub description: Option<String>,
    pub enabled: bool,
    pub client_filters: Vec<FeatureFilter>,
}

impl FeatureFlag {
    pub fn new<S: Into<String>>(id: S, enabled: bool) -> Self {
        Self {
            id: id.into(),
            description: None,
            enabled,
            client_filters: Vec::new(),
        }
    }

    pub fn with_filter(mut self, filter: FeatureFilter) -> Self {
        self.client_filters.push(filter);
        self
    }

    /// Parse a flag from its stored key-value
    pub fn from_key_value(kv: &KeyValue) -> crate::error::Result<Self> {
        let document: FeatureFlagDocument = serde_json::from_str(kv.value_str()).map_err(|e| {
            crate::error::AppConfigError::serialization(format!("Invalid feature flag '{}': {}", kv.key, e))
        })?;

        Ok(Self {
            id: document.id,
            description: document.description,
            enabled: document.enabled,
            client_filters: document.conditions.unwrap_or_default().client_filters,
        })
    }

    /// A disabled flag is off; an enabled flag is on when it has no
    /// filters or when any of its filters evaluates on.
    pub fn is_enabled_at(&self, now: DateTime<Utc>) -> bool {
        if !self.enabled {
            return false;
        }
        self.client_filters.is_empty() || self.client_filters.iter().any(|f| f.evaluate(now))
    }
}

/// Parse every valid flag out of `items`, skipping malformed documents
pub fn parse_feature_flags(items: &[KeyValue]) -> Vec<FeatureFlag> {
    items
        .iter()
        .filter(|kv| kv.is_feature_flag())
        .filter_map(|kv| match FeatureFlag::from_key_value(kv) {
            Ok(flag) => Some(flag),
            Err(e) => {
                warn!("Skipping feature flag: {}", e);
                None
            }
        })
        .collect()
}

/// One generation of feature flags
#[derive(Debug, Clone)]
pub struct FeatureSnapshot {
    generation: u64,
    loaded_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    flags: HashMap<String, FeatureFlag>,
}

impl FeatureSnapshot {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn get(&self, name: &str) -> Option<&FeatureFlag> {
        self.flags.get(&normalize_key(name))
    }

    pub fn len(&self) -> usize {
        self.flags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }
}

/// Feature flags with an elapsed-time refresh policy
#[derive(Debug)]
pub struct FeatureFlagCache {
    expiration: Duration,
    snapshot: ArcSwap<FeatureSnapshot>,
}

impl FeatureFlagCache {
    /// An empty cache that is already due for its first load
    pub fn new(expiration: Duration, now: DateTime<Utc>) -> Self {
        Self {
            expiration,
            snapshot: ArcSwap::from_pointee(FeatureSnapshot {
                generation: 0,
                loaded_at: now,
                expires_at: now,
                flags: HashMap::new(),
            }),
        }
    }

    pub fn expiration(&self) -> Duration {
        self.expiration
    }

    pub fn snapshot(&self) -> Arc<FeatureSnapshot> {
        self.snapshot.load_full()
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        now >= self.snapshot.load().expires_at
    }

    /// Publish a new generation
    pub fn replace(&self, flags: Vec<FeatureFlag>, now: DateTime<Utc>) -> Arc<FeatureSnapshot> {
        let generation = self.snapshot.load().generation + 1;
        let next = Arc::new(FeatureSnapshot {
            generation,
            loaded_at: now,
            expires_at: add_duration(now, self.expiration),
            flags: flags.into_iter().map(|flag| (normalize_key(&flag.id), flag)).collect(),
        });
        self.snapshot.store(next.clone());
        next
    }

    /// Unknown flags are off
    pub fn is_enabled(&self, name: &str, now: DateTime<Utc>) -> bool {
        self.snapshot
            .load()
            .get(name)
            .map(|flag| flag.is_enabled_at(now))
            .unwrap_or(false)
    }
}
