//! Configuration client
//!
//! Connects to an App Configuration store, keeps the selected settings and
//! feature flags in memory and refreshes them in the background. Reads
//! never touch the network.
//!
//! ```no_run
//! # async fn demo() -> appconfig_refresh::Result<()> {
//! use appconfig_refresh::auth::{CredentialContext, EnvironmentSnapshot};
//! use appconfig_refresh::client::ConfigurationClient;
//! use appconfig_refresh::config::AppConfigSettings;
//!
//! let settings = AppConfigSettings::for_endpoint("https://myappconfig.azconfig.io")
//!     .with_sentinel_key("Settings:Refresh");
//! let context = CredentialContext::detect(&EnvironmentSnapshot::from_process());
//! let client = ConfigurationClient::initialize(settings, &context, ["DemoApp:*"]).await?;
//!
//! let color = client.get_value_or("DemoApp:Color", "Red");
//! # let _ = color;
//! # Ok(())
//! # }
//! ```

pub mod options;
pub mod refresh;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

use crate::auth::environment::{CredentialContext, EnvironmentSnapshot};
use crate::auth::selector::select_credential;
use crate::cache::entry::{CachedEntry, SettingsSnapshot};
use crate::cache::features::{parse_feature_flags, FeatureFlag, FeatureFlagCache, FeatureSnapshot};
use crate::config::local::{normalize_key, LocalConfiguration};
use crate::config::settings::AppConfigSettings;
use crate::error::{AppConfigError, Result};
use crate::store::models::{KeySelector, KeyValue, SecretReference};
use crate::store::{AppConfigurationStore, ConfigurationStore, KeyVaultSecretResolver, SecretResolver};
use crate::utils::datetime::{add_duration, Clock};

pub use options::ClientOptions;
pub use refresh::{ObservedValue, RefreshOutcome, RefreshTrigger, SentinelWatch};

use refresh::{backoff_delay, DueTime, RefreshState};

/// Local section consulted for flags the store does not know
pub const LOCAL_FEATURE_SECTION: &str = "FeatureManagement";

/// Handle to the cached configuration. Cheap to clone.
#[derive(Clone)]
pub struct ConfigurationClient {
    local: Arc<LocalConfiguration>,
    clock: Arc<dyn Clock>,
    inner: Option<Arc<ClientInner>>,
}

struct ClientInner {
    store: Arc<dyn ConfigurationStore>,
    resolver: Arc<dyn SecretResolver>,
    clock: Arc<dyn Clock>,
    selectors: Vec<KeySelector>,
    label: Option<String>,
    settings_expiration: Duration,
    snapshot: ArcSwap<SettingsSnapshot>,
    features: FeatureFlagCache,
    settings_due: DueTime,
    features_due: DueTime,
    reload: Arc<Mutex<RefreshState>>,
}

impl std::fmt::Debug for ConfigurationClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut debug = f.debug_struct("ConfigurationClient");
        debug.field("enabled", &self.is_enabled());
        if let Some(inner) = &self.inner {
            debug
                .field("selectors", &inner.selectors)
                .field("generation", &inner.snapshot.load().generation());
        }
        debug.finish()
    }
}

impl ConfigurationClient {
    /// Connect with the credential chain selected for `context`.
    ///
    /// The environment credential reads its client secret from the process
    /// environment.
    pub async fn initialize<I, S>(settings: AppConfigSettings, context: &CredentialContext, filters: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::initialize_with_options(settings, context, ClientOptions::new().with_filters(filters)).await
    }

    pub async fn initialize_with_options(
        settings: AppConfigSettings,
        context: &CredentialContext,
        options: ClientOptions,
    ) -> Result<Self> {
        let Some(endpoint) = validate(&settings, &options)? else {
            return Ok(Self::disabled(options));
        };

        let env = EnvironmentSnapshot::from_process();
        let credential_options = select_credential(context, options.tenant_id.as_deref());
        let retry = credential_options.retry.clone();
        let credential = Arc::new(credential_options.build(&env));

        info!(endpoint = %endpoint, sources = ?credential.kinds(), "Connecting to App Configuration");

        let store = Arc::new(AppConfigurationStore::new(endpoint, credential.clone(), retry.clone())?);
        let resolver = Arc::new(KeyVaultSecretResolver::new(credential, retry)?);
        Self::start(&settings, options, store, resolver).await
    }

    /// Connect using caller-supplied backends
    pub async fn connect(
        settings: AppConfigSettings,
        options: ClientOptions,
        store: Arc<dyn ConfigurationStore>,
        resolver: Arc<dyn SecretResolver>,
    ) -> Result<Self> {
        match validate(&settings, &options)? {
            Some(_) => Self::start(&settings, options, store, resolver).await,
            None => Ok(Self::disabled(options)),
        }
    }

    /// A client that serves local configuration only
    pub fn disabled(options: ClientOptions) -> Self {
        Self {
            local: Arc::new(options.local),
            clock: options.clock,
            inner: None,
        }
    }

    async fn start(
        settings: &AppConfigSettings,
        options: ClientOptions,
        store: Arc<dyn ConfigurationStore>,
        resolver: Arc<dyn SecretResolver>,
    ) -> Result<Self> {
        let now = options.clock.now();
        let label = options.label.clone().filter(|l| !l.trim().is_empty());

        let selectors: Vec<KeySelector> = if options.filters.is_empty() {
            vec![KeySelector::all().with_label(label.clone())]
        } else {
            options
                .filters
                .iter()
                .map(|filter| KeySelector::new(filter.trim()).with_label(label.clone()))
                .collect()
        };

        let sentinel = settings
            .sentinel()
            .map(|key| SentinelWatch::new(key, settings.settings_cache_expiration, now));

        let inner = Arc::new(ClientInner {
            store,
            resolver,
            clock: options.clock.clone(),
            selectors,
            label,
            settings_expiration: settings.settings_cache_expiration,
            snapshot: ArcSwap::from_pointee(SettingsSnapshot::empty(now)),
            features: FeatureFlagCache::new(settings.feature_cache_expiration, now),
            settings_due: DueTime::never(),
            features_due: DueTime::at(now),
            reload: Arc::new(Mutex::new(RefreshState::new(sentinel))),
        });

        {
            let mut state = inner.reload.lock().await;
            if let Err(e) = inner.load_all(&mut state, now).await {
                if !options.optional {
                    return Err(e);
                }
                warn!(error = %e, "App Configuration is unreachable; starting with local configuration only");
                state.initial_load_pending = true;
                inner.settings_due.set(now);
                inner.features_due.set(now);
            }
        }

        info!(
            settings = inner.snapshot.load().len(),
            feature_flags = inner.features.snapshot().len(),
            sentinel = settings.sentinel().unwrap_or("<none>"),
            "App Configuration loaded"
        );

        Ok(Self {
            local: Arc::new(options.local),
            clock: options.clock,
            inner: Some(inner),
        })
    }

    /// True when backed by a remote store
    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    /// Overrides, then the remote snapshot, then the local base layer
    pub fn get_value(&self, key: &str) -> Option<String> {
        if let Some(value) = self.local.get_override(key) {
            return Some(value.to_string());
        }
        if let Some(inner) = &self.inner {
            if let Some(value) = inner.snapshot.load().value(key) {
                return Some(value.to_string());
            }
        }
        self.local.get(key).map(str::to_string)
    }

    pub fn get_value_or(&self, key: &str, default: &str) -> String {
        self.get_value(key).unwrap_or_else(|| default.to_string())
    }

    /// Like [`Self::get_value`] but missing or blank values are an error
    pub fn get_required_value(&self, key: &str) -> Result<String> {
        match self.get_value(key) {
            Some(value) if !value.trim().is_empty() => Ok(value),
            _ => Err(AppConfigError::configuration(format!(
                "Required configuration value '{}' is missing",
                key
            ))),
        }
    }

    pub fn is_feature_enabled(&self, name: &str) -> bool {
        if let Some(inner) = &self.inner {
            let snapshot = inner.features.snapshot();
            if let Some(flag) = snapshot.get(name) {
                return flag.is_enabled_at(self.clock.now());
            }
        }
        self.local_feature(name).unwrap_or(false)
    }

    fn local_feature(&self, name: &str) -> Option<bool> {
        let key = format!("{}:{}", LOCAL_FEATURE_SECTION, name);
        let value = self.local.get_override(&key).or_else(|| self.local.get(&key))?;
        match normalize_key(value).as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        }
    }

    /// Current settings generation; empty when disabled
    pub fn snapshot(&self) -> Arc<SettingsSnapshot> {
        match &self.inner {
            Some(inner) => inner.snapshot.load_full(),
            None => Arc::new(SettingsSnapshot::empty(self.clock.now())),
        }
    }

    pub fn feature_snapshot(&self) -> Option<Arc<FeatureSnapshot>> {
        self.inner.as_ref().map(|inner| inner.features.snapshot())
    }

    pub fn local(&self) -> &LocalConfiguration {
        &self.local
    }

    /// True when the sentinel or the feature flags are due for a check
    pub fn is_due(&self) -> bool {
        match &self.inner {
            Some(inner) => inner.is_due(self.clock.now()),
            None => false,
        }
    }

    /// Earliest time a refresh check will do any work
    pub fn next_refresh_due(&self) -> Option<DateTime<Utc>> {
        let inner = self.inner.as_ref()?;
        match (inner.settings_due.get(), inner.features_due.get()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Start a background reload when a clock is due.
    ///
    /// Returns immediately. At most one reload runs per client; checks made
    /// while one is in flight coalesce into it.
    pub fn refresh_if_due(&self) -> RefreshTrigger {
        let Some(inner) = &self.inner else {
            return RefreshTrigger::Disabled;
        };
        if !inner.is_due(self.clock.now()) {
            return RefreshTrigger::NotDue;
        }

        match inner.reload.clone().try_lock_owned() {
            Ok(mut state) => {
                let task = inner.clone();
                tokio::spawn(async move {
                    let now = task.clock.now();
                    task.refresh_locked(&mut state, now).await;
                });
                RefreshTrigger::Spawned
            }
            Err(_) => RefreshTrigger::Coalesced,
        }
    }

    /// Run any due reload and wait for it.
    ///
    /// Waits for an in-flight reload to finish first, then re-checks the
    /// due times, so back-to-back callers do not reload twice.
    pub async fn refresh(&self) -> RefreshOutcome {
        let Some(inner) = &self.inner else {
            return RefreshOutcome::default();
        };
        let mut state = inner.reload.lock().await;
        let now = self.clock.now();
        inner.refresh_locked(&mut state, now).await
    }

    /// Like [`Self::refresh`] but gives up when a reload is already running
    pub async fn try_refresh(&self) -> Option<RefreshOutcome> {
        let Some(inner) = &self.inner else {
            return Some(RefreshOutcome::default());
        };
        let mut state = inner.reload.try_lock().ok()?;
        let now = self.clock.now();
        Some(inner.refresh_locked(&mut state, now).await)
    }
}

/// Check the settings; `Ok(None)` means run disabled.
fn validate(settings: &AppConfigSettings, options: &ClientOptions) -> Result<Option<Url>> {
    settings.validate_expirations()?;

    if !settings.enable {
        warn!("App Configuration is disabled; serving local configuration only");
        return Ok(None);
    }

    if settings.endpoint_text().is_none() && options.optional {
        warn!("AppConfig:Uri is not set; serving local configuration only");
        return Ok(None);
    }

    settings.endpoint().map(Some)
}

impl ClientInner {
    fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.settings_due.is_due(now) || self.features_due.is_due(now)
    }

    fn sentinel_selector(&self, key: &str) -> KeySelector {
        KeySelector::new(key).with_label(self.label.clone())
    }

    async fn observe_sentinel(&self, key: &str) -> Result<Option<ObservedValue>> {
        let current = self.store.get_setting(&self.sentinel_selector(key)).await?;
        Ok(current.as_ref().map(ObservedValue::from))
    }

    /// Full load of settings, feature flags and the sentinel
    async fn load_all(&self, state: &mut RefreshState, now: DateTime<Utc>) -> Result<()> {
        let observed = match &state.sentinel {
            Some(watch) => Some(self.observe_sentinel(&watch.key).await?),
            None => None,
        };

        let generation = self.snapshot.load().generation() + 1;
        let snapshot = self.load_snapshot(generation, now).await?;
        let flags = self.load_feature_flags().await?;

        self.snapshot.store(Arc::new(snapshot));
        let features = self.features.replace(flags, now);
        self.features_due.set(features.expires_at());

        match (state.sentinel.as_mut(), observed) {
            (Some(watch), Some(observed)) => {
                watch.observe(observed, now);
                self.settings_due.set(watch.expires_at);
            }
            _ => self.settings_due.set_never(),
        }

        state.initial_load_pending = false;
        state.settings_failures = 0;
        state.feature_failures = 0;
        Ok(())
    }

    /// Work through every due clock. Failures are logged and leave the
    /// current snapshots in place.
    async fn refresh_locked(&self, state: &mut RefreshState, now: DateTime<Utc>) -> RefreshOutcome {
        let mut outcome = RefreshOutcome::default();

        if state.initial_load_pending {
            if !self.is_due(now) {
                return outcome;
            }
            match self.load_all(state, now).await {
                Ok(()) => {
                    info!("App Configuration became reachable; settings loaded");
                    outcome.settings_reloaded = true;
                    outcome.features_reloaded = true;
                    outcome.sentinel_checked = state.sentinel.is_some();
                }
                Err(e) => {
                    state.settings_failures += 1;
                    let cap = self.settings_expiration.min(self.features.expiration());
                    let delay = backoff_delay(state.settings_failures, cap);
                    warn!(error = %e, retry_in = ?delay, "App Configuration is still unreachable");
                    let next = add_duration(now, delay);
                    self.settings_due.set(next);
                    self.features_due.set(next);
                    outcome.failed = true;
                }
            }
            return outcome;
        }

        if self.settings_due.is_due(now) {
            if let Some(key) = state.sentinel.as_ref().map(|watch| watch.key.clone()) {
                outcome.sentinel_checked = true;
                match self.refresh_settings(state, &key, now).await {
                    Ok(reloaded) => {
                        outcome.settings_reloaded = reloaded;
                        state.settings_failures = 0;
                    }
                    Err(e) => {
                        state.settings_failures += 1;
                        let delay = backoff_delay(state.settings_failures, self.settings_expiration);
                        warn!(error = %e, retry_in = ?delay, "Settings refresh failed; keeping cached settings");
                        self.settings_due.set(add_duration(now, delay));
                        outcome.failed = true;
                    }
                }
            }
        }

        if self.features_due.is_due(now) {
            match self.load_feature_flags().await {
                Ok(flags) => {
                    let features = self.features.replace(flags, now);
                    self.features_due.set(features.expires_at());
                    state.feature_failures = 0;
                    outcome.features_reloaded = true;
                    debug!(
                        generation = features.generation(),
                        count = features.len(),
                        "Feature flags reloaded"
                    );
                }
                Err(e) => {
                    state.feature_failures += 1;
                    let delay = backoff_delay(state.feature_failures, self.features.expiration());
                    warn!(error = %e, retry_in = ?delay, "Feature flag refresh failed; keeping cached flags");
                    self.features_due.set(add_duration(now, delay));
                    outcome.failed = true;
                }
            }
        }

        outcome
    }

    /// Check the sentinel and reload everything when it moved
    async fn refresh_settings(&self, state: &mut RefreshState, key: &str, now: DateTime<Utc>) -> Result<bool> {
        let observed = self.observe_sentinel(key).await?;
        let changed = state
            .sentinel
            .as_ref()
            .map(|watch| watch.has_changed(&observed))
            .unwrap_or(false);

        if changed {
            let generation = self.snapshot.load().generation() + 1;
            let snapshot = self.load_snapshot(generation, now).await?;
            let count = snapshot.len();
            self.snapshot.store(Arc::new(snapshot));
            info!(sentinel = key, generation, settings = count, "Sentinel changed; reloaded all settings");
        } else {
            debug!(sentinel = key, "Sentinel unchanged");
        }

        if let Some(watch) = state.sentinel.as_mut() {
            watch.observe(observed, now);
            self.settings_due.set(watch.expires_at);
        }
        Ok(changed)
    }

    async fn load_snapshot(&self, generation: u64, now: DateTime<Utc>) -> Result<SettingsSnapshot> {
        let pages = try_join_all(self.selectors.iter().map(|selector| self.store.list_settings(selector))).await?;

        // Later filters win when the same key is selected twice
        let mut merged: Vec<KeyValue> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();
        for kv in pages.into_iter().flatten() {
            if kv.is_feature_flag() {
                continue;
            }
            match positions.get(&normalize_key(&kv.key)) {
                Some(&index) => merged[index] = kv,
                None => {
                    positions.insert(normalize_key(&kv.key), merged.len());
                    merged.push(kv);
                }
            }
        }

        let resolved = self.resolve_secrets(&merged).await?;
        let expires_at = add_duration(now, self.settings_expiration);

        let entries = merged
            .into_iter()
            .map(|kv| match resolved.get(&normalize_key(&kv.key)) {
                Some((reference, value)) => CachedEntry::secret(kv.key, value.clone(), reference, now, expires_at),
                None => {
                    let value = kv.value.unwrap_or_default();
                    CachedEntry::plain(kv.key, value, now, expires_at)
                }
            })
            .collect();

        Ok(SettingsSnapshot::new(generation, now, entries))
    }

    /// Resolve every Key Vault reference in `items`, fetching each distinct
    /// secret once. Keyed by normalized setting key.
    async fn resolve_secrets(&self, items: &[KeyValue]) -> Result<HashMap<String, (SecretReference, String)>> {
        let mut references: Vec<(String, SecretReference)> = Vec::new();
        for kv in items.iter().filter(|kv| kv.is_secret_reference()) {
            references.push((normalize_key(&kv.key), kv.parse_secret_reference()?));
        }
        if references.is_empty() {
            return Ok(HashMap::new());
        }

        let mut distinct: Vec<&SecretReference> = Vec::new();
        for (_, reference) in &references {
            if !distinct.contains(&reference) {
                distinct.push(reference);
            }
        }

        let values = try_join_all(distinct.iter().map(|reference| self.resolver.resolve(reference))).await?;
        let by_uri: HashMap<String, String> = distinct
            .iter()
            .map(|reference| reference.secret_uri())
            .zip(values)
            .collect();

        debug!(references = references.len(), secrets = by_uri.len(), "Resolved Key Vault references");

        Ok(references
            .into_iter()
            .map(|(key, reference)| {
                let value = by_uri.get(&reference.secret_uri()).cloned().unwrap_or_default();
                (key, (reference, value))
            })
            .collect())
    }

    async fn load_feature_flags(&self) -> Result<Vec<FeatureFlag>> {
        let selector = KeySelector::feature_flags().with_label(self.label.clone());
        let items = self.store.list_settings(&selector).await?;
        Ok(parse_feature_flags(&items))
    }
}
