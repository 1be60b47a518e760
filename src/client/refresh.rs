//! Refresh bookkeeping: sentinel watch, due times and failure backoff

use chrono::{DateTime, TimeZone, Utc};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use crate::store::models::KeyValue;
use crate::utils::datetime::add_duration;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// What a per-request refresh check did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshTrigger {
    /// The client is disabled; nothing to refresh
    Disabled,
    NotDue,
    /// A background reload was started
    Spawned,
    /// A reload was already in flight; this check joined it
    Coalesced,
    /// The reload ran to completion before returning
    Completed(RefreshOutcome),
}

/// Result of one pass over the refresh clocks
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshOutcome {
    pub sentinel_checked: bool,
    pub settings_reloaded: bool,
    pub features_reloaded: bool,
    /// At least one reload failed and the stale snapshot was kept
    pub failed: bool,
}

impl RefreshOutcome {
    pub fn reloaded_anything(&self) -> bool {
        self.settings_reloaded || self.features_reloaded
    }
}

/// Value and etag of the sentinel as last seen; `None` when the key is absent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedValue {
    pub value: Option<String>,
    pub etag: Option<String>,
}

impl From<&KeyValue> for ObservedValue {
    fn from(kv: &KeyValue) -> Self {
        Self {
            value: kv.value.clone(),
            etag: kv.etag.clone(),
        }
    }
}

/// The registered sentinel key
#[derive(Debug, Clone)]
pub struct SentinelWatch {
    pub key: String,
    pub cache_expiration: Duration,
    pub last_observed: Option<ObservedValue>,
    pub expires_at: DateTime<Utc>,
}

impl SentinelWatch {
    pub fn new<S: Into<String>>(key: S, cache_expiration: Duration, now: DateTime<Utc>) -> Self {
        Self {
            key: key.into(),
            cache_expiration,
            last_observed: None,
            expires_at: now,
        }
    }

    /// True when `observed` differs from the last observation
    pub fn has_changed(&self, observed: &Option<ObservedValue>) -> bool {
        &self.last_observed != observed
    }

    /// Record an observation and push the expiration forward
    pub fn observe(&mut self, observed: Option<ObservedValue>, now: DateTime<Utc>) {
        self.last_observed = observed;
        self.expires_at = add_duration(now, self.cache_expiration);
    }
}

/// State owned by whoever holds the reload lock
#[derive(Debug)]
pub struct RefreshState {
    pub sentinel: Option<SentinelWatch>,
    /// Set when startup could not load the store
    pub initial_load_pending: bool,
    pub settings_failures: u32,
    pub feature_failures: u32,
}

impl RefreshState {
    pub fn new(sentinel: Option<SentinelWatch>) -> Self {
        Self {
            sentinel,
            initial_load_pending: false,
            settings_failures: 0,
            feature_failures: 0,
        }
    }
}

/// Delay before retrying after `failures` consecutive failures
pub fn backoff_delay(failures: u32, cap: Duration) -> Duration {
    let shift = failures.saturating_sub(1).min(31);
    let delay = INITIAL_BACKOFF.saturating_mul(1u32 << shift);
    delay.min(cap).max(INITIAL_BACKOFF.min(cap))
}

/// A point in time readable without locking
#[derive(Debug)]
pub struct DueTime(AtomicI64);

impl DueTime {
    pub fn never() -> Self {
        Self(AtomicI64::new(i64::MAX))
    }

    pub fn at(when: DateTime<Utc>) -> Self {
        Self(AtomicI64::new(when.timestamp_millis()))
    }

    pub fn set(&self, when: DateTime<Utc>) {
        self.0.store(when.timestamp_millis(), Ordering::Release);
    }

    pub fn set_never(&self) {
        self.0.store(i64::MAX, Ordering::Release);
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        now.timestamp_millis() >= self.0.load(Ordering::Acquire)
    }

    pub fn get(&self) -> Option<DateTime<Utc>> {
        match self.0.load(Ordering::Acquire) {
            i64::MAX => None,
            millis => Utc.timestamp_millis_opt(millis).single(),
        }
    }
}
