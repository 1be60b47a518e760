//! App Configuration connection and refresh settings
//!
//! This module holds the typed `AppConfig` section together with its
//! defaults and the validation applied when a client connects.

use crate::error::{AppConfigError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// Name of the configuration section holding [`AppConfigSettings`]
pub const CONFIG_SECTION: &str = "AppConfig";

/// Conventional sentinel key; bump its value to reload every setting
pub const DEFAULT_SENTINEL_KEY: &str = "Settings:Refresh";

pub const DEFAULT_SETTINGS_CACHE_EXPIRATION: Duration = Duration::from_secs(15 * 60);
pub const DEFAULT_FEATURE_CACHE_EXPIRATION: Duration = Duration::from_secs(60);

pub const MIN_SETTINGS_CACHE_EXPIRATION: Duration = Duration::from_secs(1);
pub const MIN_FEATURE_CACHE_EXPIRATION: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct AppConfigSettings {
    /// Set to false to disable the service, for example for unit tests.
    #[serde(alias = "enable")]
    pub enable: bool,
    /// Full URL of the App Configuration instance, e.g. `https://myappconfig.azconfig.io`
    #[serde(alias = "uri", skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(alias = "sentinelkey", alias = "sentinel_key", skip_serializing_if = "Option::is_none")]
    pub sentinel_key: Option<String>,
    #[serde(
        alias = "settingscacheexpiration",
        alias = "settings_cache_expiration",
        with = "crate::config::duration"
    )]
    pub settings_cache_expiration: Duration,
    #[serde(
        alias = "featurecacheexpiration",
        alias = "feature_cache_expiration",
        with = "crate::config::duration"
    )]
    pub feature_cache_expiration: Duration,
}

impl Default for AppConfigSettings {
    fn default() -> Self {
        Self {
            enable: true,
            uri: None,
            sentinel_key: None,
            settings_cache_expiration: DEFAULT_SETTINGS_CACHE_EXPIRATION,
            feature_cache_expiration: DEFAULT_FEATURE_CACHE_EXPIRATION,
        }
    }
}

impl AppConfigSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Settings for an enabled client pointing at `uri`
    pub fn for_endpoint<S: Into<String>>(uri: S) -> Self {
        Self {
            uri: Some(uri.into()),
            ..Self::default()
        }
    }

    pub fn disabled() -> Self {
        Self {
            enable: false,
            ..Self::default()
        }
    }

    pub fn with_sentinel_key<S: Into<String>>(mut self, key: S) -> Self {
        self.sentinel_key = Some(key.into());
        self
    }

    pub fn with_settings_cache_expiration(mut self, expiration: Duration) -> Self {
        self.settings_cache_expiration = expiration;
        self
    }

    pub fn with_feature_cache_expiration(mut self, expiration: Duration) -> Self {
        self.feature_cache_expiration = expiration;
        self
    }

    /// Sentinel key, treating blank values as unset
    pub fn sentinel(&self) -> Option<&str> {
        self.sentinel_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
    }

    /// Uri, treating blank values as unset
    pub fn endpoint_text(&self) -> Option<&str> {
        self.uri.as_deref().map(str::trim).filter(|uri| !uri.is_empty())
    }

    /// Parse the endpoint as an absolute URI
    pub fn endpoint(&self) -> Result<Url> {
        let text = self.endpoint_text().ok_or_else(missing_uri_error)?;
        let url = Url::parse(text).map_err(|_| missing_uri_error())?;
        if url.cannot_be_a_base() || url.host_str().is_none() {
            return Err(missing_uri_error());
        }
        Ok(url)
    }

    /// Check the cache expiration floors
    pub fn validate_expirations(&self) -> Result<()> {
        if self.sentinel().is_some() && self.settings_cache_expiration < MIN_SETTINGS_CACHE_EXPIRATION {
            return Err(AppConfigError::configuration(format!(
                "Setting {}:SettingsCacheExpiration must be at least 1 second. The default is {}",
                CONFIG_SECTION,
                crate::config::duration::format_timespan(DEFAULT_SETTINGS_CACHE_EXPIRATION)
            )));
        }

        if self.feature_cache_expiration < MIN_FEATURE_CACHE_EXPIRATION {
            return Err(AppConfigError::configuration(format!(
                "Setting {}:FeatureCacheExpiration must be at least 10 seconds. The default is {}",
                CONFIG_SECTION,
                crate::config::duration::format_timespan(DEFAULT_FEATURE_CACHE_EXPIRATION)
            )));
        }

        Ok(())
    }
}

fn missing_uri_error() -> AppConfigError {
    AppConfigError::configuration(format!(
        "Setting {}:Uri is missing or invalid. Expected the full URL of the App Config instance in the format 'https://myappconfig.azconfig.io'",
        CONFIG_SECTION
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = AppConfigSettings::default();
        assert!(settings.enable);
        assert!(settings.uri.is_none());
        assert!(settings.sentinel_key.is_none());
        assert_eq!(settings.settings_cache_expiration, Duration::from_secs(900));
        assert_eq!(settings.feature_cache_expiration, Duration::from_secs(60));
    }

    #[test]
    fn test_deserialize_pascal_case_section() {
        let json = serde_json::json!({
            "Enable": true,
            "Uri": "https://cfg.example.com",
            "SentinelKey": "Settings:Refresh",
            "SettingsCacheExpiration": "00:05:00",
            "FeatureCacheExpiration": 30
        });
        let settings: AppConfigSettings = serde_json::from_value(json).unwrap();
        assert_eq!(settings.uri.as_deref(), Some("https://cfg.example.com"));
        assert_eq!(settings.sentinel(), Some("Settings:Refresh"));
        assert_eq!(settings.settings_cache_expiration, Duration::from_secs(300));
        assert_eq!(settings.feature_cache_expiration, Duration::from_secs(30));
    }

    #[test]
    fn test_deserialize_lowercase_keys_and_defaults() {
        let json = serde_json::json!({ "enable": false, "uri": "not a uri" });
        let settings: AppConfigSettings = serde_json::from_value(json).unwrap();
        assert!(!settings.enable);
        assert_eq!(settings.settings_cache_expiration, DEFAULT_SETTINGS_CACHE_EXPIRATION);
    }

    #[test]
    fn test_endpoint_validation() {
        assert!(AppConfigSettings::for_endpoint("https://cfg.example.com").endpoint().is_ok());
        assert!(AppConfigSettings::for_endpoint("cfg.example.com").endpoint().is_err());
        assert!(AppConfigSettings::for_endpoint("mailto:ops@example.com").endpoint().is_err());
        assert!(AppConfigSettings::for_endpoint("   ").endpoint().is_err());
        assert!(AppConfigSettings::new().endpoint().is_err());
    }

    #[test]
    fn test_blank_sentinel_is_unset() {
        let settings = AppConfigSettings::for_endpoint("https://cfg.example.com")
            .with_sentinel_key("  ")
            .with_settings_cache_expiration(Duration::from_millis(10));
        assert!(settings.sentinel().is_none());
        assert!(settings.validate_expirations().is_ok());
    }

    #[test]
    fn test_expiration_floors() {
        let settings = AppConfigSettings::for_endpoint("https://cfg.example.com")
            .with_sentinel_key(DEFAULT_SENTINEL_KEY)
            .with_settings_cache_expiration(Duration::from_millis(999));
        assert!(settings.validate_expirations().unwrap_err().is_fatal());

        let settings = AppConfigSettings::for_endpoint("https://cfg.example.com")
            .with_feature_cache_expiration(Duration::from_secs(9));
        assert!(settings.validate_expirations().is_err());

        let settings = AppConfigSettings::for_endpoint("https://cfg.example.com")
            .with_sentinel_key(DEFAULT_SENTINEL_KEY)
            .with_settings_cache_expiration(Duration::from_secs(1))
            .with_feature_cache_expiration(Duration::from_secs(10));
        assert!(settings.validate_expirations().is_ok());
    }
}
