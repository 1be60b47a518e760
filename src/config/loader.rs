//! Configuration loading from files and environment variables
//!
//! Priority order (highest first):
//! 1. Environment variables (`DEMOAPP_APPCONFIG__URI`, `DEMOAPP_DEMOAPP__COLOR`, ...)
//! 2. Configuration file (TOML, JSON or YAML, chosen by extension)
//! 3. Default values
//!
//! An optional overrides file is kept in a separate layer that wins over
//! values pulled from the remote store.

use config::{Config, Environment, File};
use serde_json::{Map, Value};
use std::path::Path;
use tracing::{debug, info};

use crate::config::local::LocalConfiguration;
use crate::config::settings::{AppConfigSettings, CONFIG_SECTION};
use crate::error::Result;

/// Prefix of environment variables merged over the configuration file
pub const ENV_PREFIX: &str = "DEMOAPP";

/// Everything read from local sources at startup
#[derive(Debug, Clone)]
pub struct LoadedConfiguration {
    pub settings: AppConfigSettings,
    pub local: LocalConfiguration,
}

/// Load the `AppConfig` section and the local configuration layers
pub fn load_configuration(path: &Path, overrides: Option<&Path>) -> Result<LoadedConfiguration> {
    let document = read_document(path, true)?;
    let settings = settings_from_document(&document)?;
    let mut local = LocalConfiguration::from_document(&document);

    if let Some(overrides_path) = overrides {
        if overrides_path.exists() {
            info!(path = %overrides_path.display(), "Loading local overrides");
            let overrides_document = read_document(overrides_path, false)?;
            local = local.with_overrides_document(&overrides_document);
        } else {
            debug!(path = %overrides_path.display(), "Overrides file not found, skipping");
        }
    }

    Ok(LoadedConfiguration { settings, local })
}

/// Load only the `AppConfig` section
pub fn load_settings(path: &Path) -> Result<AppConfigSettings> {
    let document = read_document(path, true)?;
    settings_from_document(&document)
}

fn read_document(path: &Path, with_env: bool) -> Result<Value> {
    let mut builder = Config::builder().add_source(File::from(path).required(false));

    if with_env {
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );
    }

    let document: Value = builder.build()?.try_deserialize()?;
    Ok(document)
}

/// Extract the `AppConfig` section, merging differently-cased copies
/// (file keys keep their case, environment keys arrive lowercased).
pub fn settings_from_document(document: &Value) -> Result<AppConfigSettings> {
    let Some(root) = document.as_object() else {
        return Ok(AppConfigSettings::default());
    };

    let mut sections: Vec<(&String, &Value)> = root
        .iter()
        .filter(|(key, _)| key.eq_ignore_ascii_case(CONFIG_SECTION))
        .collect();
    // Exact-case section (the file) first, so environment values override it
    sections.sort_by_key(|(key, _)| key.as_str() != CONFIG_SECTION);

    let mut merged = Map::new();
    for (_, section) in sections {
        if let Some(fields) = section.as_object() {
            for (field, value) in fields {
                merged.insert(field.to_lowercase(), value.clone());
            }
        }
    }

    let settings = serde_json::from_value(Value::Object(merged))?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn test_settings_from_document() {
        let document = json!({
            "AppConfig": { "Uri": "https://cfg.example.com", "SentinelKey": "Settings:Refresh" },
            "DemoApp": { "Color": "Red" }
        });
        let settings = settings_from_document(&document).unwrap();
        assert_eq!(settings.uri.as_deref(), Some("https://cfg.example.com"));
        assert_eq!(settings.sentinel(), Some("Settings:Refresh"));
    }

    #[test]
    fn test_lowercase_section_overrides_file_section() {
        let document = json!({
            "AppConfig": { "Uri": "https://file.example.com", "FeatureCacheExpiration": "00:02:00" },
            "appconfig": { "uri": "https://env.example.com" }
        });
        let settings = settings_from_document(&document).unwrap();
        assert_eq!(settings.uri.as_deref(), Some("https://env.example.com"));
        assert_eq!(settings.feature_cache_expiration, Duration::from_secs(120));
    }

    #[test]
    fn test_missing_section_uses_defaults() {
        let settings = settings_from_document(&json!({ "Other": 1 })).unwrap();
        assert_eq!(settings, AppConfigSettings::default());
    }

    #[test]
    fn test_load_configuration_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("appsettings.toml");
        std::fs::write(
            &path,
            r#"
[AppConfig]
Enable = false
SettingsCacheExpiration = "00:01:00"

[DemoApp]
Color = "Blue"
"#,
        )
        .unwrap();

        let overrides = dir.path().join("appsettings.overrides.json");
        std::fs::write(&overrides, r#"{ "DemoApp": { "Color": "Green" } }"#).unwrap();

        let loaded = load_configuration(&path, Some(&overrides)).unwrap();
        assert!(!loaded.settings.enable);
        assert_eq!(loaded.settings.settings_cache_expiration, Duration::from_secs(60));
        assert_eq!(loaded.local.get("DemoApp:Color"), Some("Blue"));
        assert_eq!(loaded.local.get_override("DemoApp:Color"), Some("Green"));
    }

    #[test]
    fn test_missing_files_are_optional() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = load_configuration(
            &dir.path().join("missing.toml"),
            Some(&dir.path().join("missing.overrides.json")),
        )
        .unwrap();
        assert!(loaded.settings.enable);
    }
}
