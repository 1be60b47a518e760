//! Azure App Configuration REST client
//!
//! Only the two read operations the refresh core needs are implemented:
//! listing key-values by filter (`GET /kv`) and reading one key
//! (`GET /kv/{key}`), both authenticated with a bearer token.

use async_trait::async_trait;
use azure_core::auth::TokenCredential;
use reqwest::{header, Client, StatusCode};
use std::sync::Arc;
use tracing::debug;
use url::Url;

use crate::error::{AppConfigError, Result};
use crate::store::models::{KeySelector, KeyValue, KeyValuePage};
use crate::store::ConfigurationStore;
use crate::utils::network::{classify_network_error, classify_status, create_http_client, NetworkConfig};
use crate::utils::retry::{retry_with_backoff, RetryOptions};

pub const API_VERSION: &str = "1.0";
const KV_SET_MEDIA_TYPE: &str = "application/vnd.microsoft.appconfig.kvset+json, application/problem+json";
const KV_MEDIA_TYPE: &str = "application/vnd.microsoft.appconfig.kv+json, application/problem+json";
/// Guard against a misbehaving `@nextLink` loop
const MAX_PAGES: usize = 1_000;

pub struct AppConfigurationStore {
    endpoint: Url,
    http: Client,
    credential: Arc<dyn TokenCredential>,
    retry: RetryOptions,
}

impl AppConfigurationStore {
    pub fn new(endpoint: Url, credential: Arc<dyn TokenCredential>, retry: RetryOptions) -> Result<Self> {
        let http = create_http_client(&NetworkConfig::with_timeout(retry.network_timeout))?;
        Ok(Self {
            endpoint,
            http,
            credential,
            retry,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Token scope for this store, e.g. `https://myappconfig.azconfig.io/.default`
    pub fn scope(&self) -> String {
        format!("{}/.default", self.endpoint.origin().ascii_serialization())
    }

    fn list_url(&self, selector: &KeySelector) -> Result<Url> {
        let mut url = self.endpoint.join("kv")?;
        url.query_pairs_mut()
            .append_pair("key", &selector.key_filter)
            .append_pair("label", selector.label_filter())
            .append_pair("api-version", API_VERSION);
        Ok(url)
    }

    fn key_url(&self, selector: &KeySelector) -> Result<Url> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| AppConfigError::configuration(format!("Endpoint '{}' cannot be a base URL", self.endpoint)))?
            .pop_if_empty()
            .push("kv")
            .push(&selector.key_filter);
        url.query_pairs_mut()
            .append_pair("label", selector.label_filter())
            .append_pair("api-version", API_VERSION);
        Ok(url)
    }

    async fn send(&self, url: &Url, accept: &str) -> Result<reqwest::Response> {
        let scope = self.scope();
        let token = self.credential.get_token(&[scope.as_str()]).await?;

        self.http
            .get(url.clone())
            .bearer_auth(token.token.secret())
            .header(header::ACCEPT, accept)
            .header("x-ms-client-request-id", uuid::Uuid::new_v4().to_string())
            .send()
            .await
            .map_err(|e| classify_network_error(&e, url.as_str()))
    }

    async fn fetch_page(&self, url: &Url) -> Result<KeyValuePage> {
        let response = self.send(url, KV_SET_MEDIA_TYPE).await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, self.endpoint.host_str().unwrap_or_default(), &body));
        }

        response
            .json::<KeyValuePage>()
            .await
            .map_err(|e| AppConfigError::serialization(format!("Failed to parse key-value page: {}", e)))
    }

    async fn fetch_one(&self, url: &Url) -> Result<Option<KeyValue>> {
        let response = self.send(url, KV_MEDIA_TYPE).await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, self.endpoint.host_str().unwrap_or_default(), &body));
        }

        let kv = response
            .json::<KeyValue>()
            .await
            .map_err(|e| AppConfigError::serialization(format!("Failed to parse key-value: {}", e)))?;
        Ok(Some(kv))
    }
}

#[async_trait]
impl ConfigurationStore for AppConfigurationStore {
    async fn list_settings(&self, selector: &KeySelector) -> Result<Vec<KeyValue>> {
        let mut items = Vec::new();
        let mut next = Some(self.list_url(selector)?);
        let mut pages = 0;

        while let Some(url) = next.take() {
            pages += 1;
            if pages > MAX_PAGES {
                return Err(AppConfigError::azure_api("Too many pages returned by the configuration store"));
            }

            let page = retry_with_backoff(|| self.fetch_page(&url), &self.retry).await?;
            items.extend(page.items);

            if let Some(link) = page.next_link {
                next = Some(self.endpoint.join(&link)?);
            }
        }

        debug!(filter = %selector.key_filter, count = items.len(), pages, "Listed key-values");
        Ok(items)
    }

    async fn get_setting(&self, selector: &KeySelector) -> Result<Option<KeyValue>> {
        let url = self.key_url(selector)?;
        retry_with_backoff(|| self.fetch_one(&url), &self.retry).await
    }
}
