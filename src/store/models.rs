//! Wire models for the App Configuration and Key Vault REST APIs

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use url::Url;

use crate::error::{AppConfigError, Result};

/// Content type of values that point at a Key Vault secret
pub const KEY_VAULT_REFERENCE_CONTENT_TYPE: &str =
    "application/vnd.microsoft.appconfig.keyvaultref+json;charset=utf-8";
/// Content type of feature flag values
pub const FEATURE_FLAG_CONTENT_TYPE: &str = "application/vnd.microsoft.appconfig.ff+json;charset=utf-8";
/// Key prefix under which feature flags are stored
pub const FEATURE_FLAG_PREFIX: &str = ".appconfig.featureflag/";

/// Which keys to pull, and with which label
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeySelector {
    /// Exact key, prefix filter (`DemoApp:*`) or `*`
    pub key_filter: String,
    /// `None` selects settings without a label
    pub label: Option<String>,
}

impl KeySelector {
    pub fn new<S: Into<String>>(key_filter: S) -> Self {
        Self {
            key_filter: key_filter.into(),
            label: None,
        }
    }

    pub fn with_label<S: Into<String>>(mut self, label: Option<S>) -> Self {
        self.label = label.map(Into::into);
        self
    }

    /// Every key
    pub fn all() -> Self {
        Self::new("*")
    }

    /// Every feature flag
    pub fn feature_flags() -> Self {
        Self::new(format!("{}*", FEATURE_FLAG_PREFIX))
    }

    /// Local evaluation of the filter, mirroring the service's trailing-`*` rule
    pub fn matches(&self, key: &str) -> bool {
        match self.key_filter.strip_suffix('*') {
            Some(prefix) => key.starts_with(prefix),
            None => key == self.key_filter,
        }
    }

    /// Value sent as the `label` query parameter; `\0` means "no label"
    pub fn label_filter(&self) -> &str {
        self.label.as_deref().unwrap_or("\0")
    }
}

/// One key-value as returned by the configuration store
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub etag: Option<String>,
    #[serde(default)]
    pub last_modified: Option<String>,
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

impl KeyValue {
    pub fn new<K: Into<String>, V: Into<String>>(key: K, value: V) -> Self {
        Self {
            key: key.into(),
            value: Some(value.into()),
            ..Self::default()
        }
    }

    pub fn with_etag<S: Into<String>>(mut self, etag: S) -> Self {
        self.etag = Some(etag.into());
        self
    }

    pub fn with_content_type<S: Into<String>>(mut self, content_type: S) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// A Key Vault reference to `secret_uri`
    pub fn secret_reference<K: Into<String>>(key: K, secret_uri: &str) -> Self {
        Self::new(key, serde_json::json!({ "uri": secret_uri }).to_string())
            .with_content_type(KEY_VAULT_REFERENCE_CONTENT_TYPE)
    }

    /// A feature flag document for `id`
    pub fn feature_flag(id: &str, enabled: bool) -> Self {
        Self::new(
            format!("{}{}", FEATURE_FLAG_PREFIX, id),
            serde_json::json!({ "id": id, "enabled": enabled, "conditions": { "client_filters": [] } })
                .to_string(),
        )
        .with_content_type(FEATURE_FLAG_CONTENT_TYPE)
    }

    pub fn value_str(&self) -> &str {
        self.value.as_deref().unwrap_or_default()
    }

    pub fn is_secret_reference(&self) -> bool {
        media_type_is(self.content_type.as_deref(), KEY_VAULT_REFERENCE_CONTENT_TYPE)
    }

    pub fn is_feature_flag(&self) -> bool {
        self.key.starts_with(FEATURE_FLAG_PREFIX)
            || media_type_is(self.content_type.as_deref(), FEATURE_FLAG_CONTENT_TYPE)
    }

    /// Parse the `{"uri": "..."}` body of a Key Vault reference
    pub fn parse_secret_reference(&self) -> Result<SecretReference> {
        #[derive(Deserialize)]
        struct Body {
            uri: String,
        }

        let body: Body = serde_json::from_str(self.value_str()).map_err(|e| {
            AppConfigError::secret_resolution(self.key.clone(), format!("Malformed Key Vault reference: {}", e))
        })?;
        SecretReference::parse(&body.uri)
    }
}

/// Compare the media type part (before `;`) case-insensitively
fn media_type_is(content_type: Option<&str>, expected: &str) -> bool {
    let media = |s: &str| s.split(';').next().unwrap_or_default().trim().to_ascii_lowercase();
    content_type.map(|ct| media(ct) == media(expected)).unwrap_or(false)
}

/// Page of results from `GET /kv`
#[derive(Debug, Clone, Deserialize)]
pub struct KeyValuePage {
    #[serde(default)]
    pub items: Vec<KeyValue>,
    #[serde(rename = "@nextLink", default)]
    pub next_link: Option<String>,
}

/// Location of a secret in Key Vault
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SecretReference {
    pub vault_url: Url,
    pub name: String,
    pub version: Option<String>,
}

impl SecretReference {
    /// Parse `https://{vault}.vault.azure.net/secrets/{name}[/{version}]`
    pub fn parse(uri: &str) -> Result<Self> {
        let invalid = |why: &str| AppConfigError::secret_resolution(uri.to_string(), why.to_string());

        let url = Url::parse(uri).map_err(|_| invalid("not an absolute URI"))?;
        if url.scheme() != "https" {
            return Err(invalid("secret URIs must use https"));
        }

        let segments: Vec<&str> = url
            .path_segments()
            .map(|s| s.filter(|segment| !segment.is_empty()).collect())
            .unwrap_or_default();

        let (name, version) = match segments.as_slice() {
            ["secrets", name] => (name.to_string(), None),
            ["secrets", name, version] => (name.to_string(), Some(version.to_string())),
            _ => return Err(invalid("expected /secrets/{name}[/{version}]")),
        };

        let mut vault_url = url.clone();
        vault_url.set_path("/");
        vault_url.set_query(None);
        vault_url.set_fragment(None);

        Ok(Self {
            vault_url,
            name,
            version,
        })
    }

    /// Canonical secret URI
    pub fn secret_uri(&self) -> String {
        let base = self.vault_url.as_str().trim_end_matches('/');
        match &self.version {
            Some(version) => format!("{}/secrets/{}/{}", base, self.name, version),
            None => format!("{}/secrets/{}", base, self.name),
        }
    }
}

impl std::fmt::Display for SecretReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.secret_uri())
    }
}
