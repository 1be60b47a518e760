//! Key Vault secret resolution
//!
//! Key Vault references stored in App Configuration are resolved with the
//! same credential that reads the configuration store.

use async_trait::async_trait;
use azure_core::auth::TokenCredential;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

use crate::error::{AppConfigError, Result};
use crate::store::models::SecretReference;
use crate::store::SecretResolver;
use crate::utils::network::{classify_network_error, classify_status, create_http_client, NetworkConfig};
use crate::utils::retry::{retry_with_backoff, RetryOptions};

pub const KEY_VAULT_API_VERSION: &str = "7.4";
pub const KEY_VAULT_SCOPE: &str = "https://vault.azure.net/.default";

#[derive(Debug, Deserialize)]
struct SecretBundle {
    value: Option<String>,
}

pub struct KeyVaultSecretResolver {
    http: Client,
    credential: Arc<dyn TokenCredential>,
    retry: RetryOptions,
}

impl KeyVaultSecretResolver {
    pub fn new(credential: Arc<dyn TokenCredential>, retry: RetryOptions) -> Result<Self> {
        let http = create_http_client(&NetworkConfig::with_timeout(retry.network_timeout))?;
        Ok(Self {
            http,
            credential,
            retry,
        })
    }

    async fn fetch(&self, reference: &SecretReference) -> Result<String> {
        let url = format!("{}?api-version={}", reference.secret_uri(), KEY_VAULT_API_VERSION);

        let token = self.credential.get_token(&[KEY_VAULT_SCOPE]).await?;

        let response = self
            .http
            .get(&url)
            .bearer_auth(token.token.secret())
            .send()
            .await
            .map_err(|e| classify_network_error(&e, &url))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(AppConfigError::secret_resolution(
                reference.secret_uri(),
                "secret not found".to_string(),
            ));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, reference.vault_url.host_str().unwrap_or_default(), &body));
        }

        let bundle: SecretBundle = response.json().await.map_err(|e| {
            AppConfigError::serialization(format!("Failed to parse secret response: {}", e))
        })?;

        bundle
            .value
            .ok_or_else(|| AppConfigError::secret_resolution(reference.secret_uri(), "secret has no value".to_string()))
    }
}

#[async_trait]
impl SecretResolver for KeyVaultSecretResolver {
    async fn resolve(&self, reference: &SecretReference) -> Result<String> {
        debug!(secret = %reference.name, vault = %reference.vault_url, "Resolving Key Vault reference");
        retry_with_backoff(|| self.fetch(reference), &self.retry).await
    }
}
