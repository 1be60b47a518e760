//! Token credential chain
//!
//! [`ChainedCredential`] tries each configured source in order, remembers
//! the first one that works and caches tokens until shortly before they
//! expire. It implements `azure_core`'s `TokenCredential`, so it can be
//! handed to anything that speaks the Azure SDK credential interface.

use async_trait::async_trait;
use azure_core::auth::{AccessToken, TokenCredential};
use azure_identity::ClientSecretCredential;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::auth::environment::{
    EnvironmentSnapshot, AZURE_AUTHORITY_HOST, AZURE_CLIENT_ID, AZURE_CLIENT_SECRET, AZURE_TENANT_ID,
    IDENTITY_ENDPOINT, IDENTITY_HEADER,
};
use crate::auth::selector::{CredentialKind, CredentialSource};
use crate::error::{AppConfigError, Result};
use crate::utils::datetime::offset_from_unix;
use crate::utils::network::{classify_network_error, classify_status, create_http_client, NetworkConfig};
use crate::utils::retry::{retry_with_backoff, RetryOptions};

const DEFAULT_AUTHORITY_HOST: &str = "https://login.microsoftonline.com";
const IMDS_ENDPOINT: &str = "http://169.254.169.254/metadata/identity/oauth2/token";
/// Tokens closer than this to expiry are fetched again
const EXPIRY_MARGIN: time::Duration = time::Duration::minutes(5);

/// Token credential composed from the sources chosen by the selector
#[derive(Debug)]
pub struct ChainedCredential {
    sources: Vec<SourceCredential>,
    retry: RetryOptions,
    selected: Mutex<Option<usize>>,
    cache: tokio::sync::Mutex<HashMap<String, AccessToken>>,
}

impl ChainedCredential {
    pub fn new(sources: Vec<CredentialSource>, retry: RetryOptions, env: &EnvironmentSnapshot) -> Self {
        let http = create_http_client(&NetworkConfig::with_timeout(retry.network_timeout)).unwrap_or_else(|e| {
            warn!("Falling back to a default HTTP client for authentication: {}", e);
            Client::new()
        });

        let sources = sources
            .into_iter()
            .map(|source| SourceCredential::from_source(source, env, &http, retry.network_timeout))
            .collect();

        Self {
            sources,
            retry,
            selected: Mutex::new(None),
            cache: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Kinds of the sources in chain order
    pub fn kinds(&self) -> Vec<CredentialKind> {
        self.sources.iter().map(SourceCredential::kind).collect()
    }

    pub fn retry_options(&self) -> &RetryOptions {
        &self.retry
    }

    fn selected_index(&self) -> Option<usize> {
        *self.selected.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn select(&self, index: Option<usize>) {
        *self.selected.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = index;
    }

    /// Fetch a token without consulting the cache
    pub async fn fetch_token(&self, scopes: &[&str]) -> Result<AccessToken> {
        if self.sources.is_empty() {
            return Err(AppConfigError::authentication("No credential sources are configured"));
        }

        // The previously successful source goes first
        let mut order: Vec<usize> = (0..self.sources.len()).collect();
        if let Some(selected) = self.selected_index() {
            order.retain(|i| *i != selected);
            order.insert(0, selected);
        }

        let mut failures = Vec::new();
        for index in order {
            let source = &self.sources[index];
            match source.get_token(scopes, &self.retry).await {
                Ok(token) => {
                    if self.selected_index() != Some(index) {
                        info!(source = %source.kind(), "Authenticated");
                        self.select(Some(index));
                    }
                    return Ok(token);
                }
                Err(e) => {
                    debug!(source = %source.kind(), error = %e, "Credential source failed");
                    failures.push(format!("{}: {}", source.kind(), e));
                }
            }
        }

        self.select(None);
        Err(AppConfigError::authentication(format!(
            "No credential source could provide a token. {}",
            failures.join("; ")
        )))
    }

    /// Cached token for `scopes`, refreshed when close to expiry
    pub async fn token(&self, scopes: &[&str]) -> Result<AccessToken> {
        let cache_key = scopes.join(" ");
        let mut cache = self.cache.lock().await;

        if let Some(token) = cache.get(&cache_key) {
            if token.expires_on - EXPIRY_MARGIN > time::OffsetDateTime::now_utc() {
                return Ok(token.clone());
            }
        }

        let token = self.fetch_token(scopes).await?;
        cache.insert(cache_key, token.clone());
        Ok(token)
    }
}

#[async_trait]
impl TokenCredential for ChainedCredential {
    async fn get_token(&self, scopes: &[&str]) -> azure_core::Result<AccessToken> {
        self.token(scopes)
            .await
            .map_err(|e| azure_core::Error::new(azure_core::error::ErrorKind::Credential, e))
    }

    async fn clear_cache(&self) -> azure_core::Result<()> {
        self.cache.lock().await.clear();
        self.select(None);
        Ok(())
    }
}

/// A single, fully configured source
enum SourceCredential {
    /// `None` when the service principal variables are incomplete
    Environment(Option<Arc<ClientSecretCredential>>),
    ManagedIdentity(ManagedIdentitySource),
    AzureCli(CliSource),
    AzureDeveloperCli(CliSource),
}

impl fmt::Debug for SourceCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Environment(credential) => f
                .debug_struct("Environment")
                .field("configured", &credential.is_some())
                .finish(),
            Self::ManagedIdentity(source) => f.debug_tuple("ManagedIdentity").field(source).finish(),
            Self::AzureCli(source) => f.debug_tuple("AzureCli").field(source).finish(),
            Self::AzureDeveloperCli(source) => f.debug_tuple("AzureDeveloperCli").field(source).finish(),
        }
    }
}

impl SourceCredential {
    fn from_source(source: CredentialSource, env: &EnvironmentSnapshot, http: &Client, timeout: Duration) -> Self {
        match source {
            CredentialSource::Environment => Self::Environment(environment_credential(env, http)),
            CredentialSource::ManagedIdentity { client_id } => Self::ManagedIdentity(ManagedIdentitySource {
                http: http.clone(),
                client_id,
                app_service: env
                    .get(IDENTITY_ENDPOINT)
                    .zip(env.get(IDENTITY_HEADER))
                    .map(|(endpoint, header)| (endpoint.to_string(), header.to_string())),
            }),
            CredentialSource::AzureCli { tenant_id } => Self::AzureCli(CliSource { tenant_id, timeout }),
            CredentialSource::AzureDeveloperCli { tenant_id } => {
                Self::AzureDeveloperCli(CliSource { tenant_id, timeout })
            }
        }
    }

    fn kind(&self) -> CredentialKind {
        match self {
            Self::Environment(_) => CredentialKind::Environment,
            Self::ManagedIdentity(_) => CredentialKind::ManagedIdentity,
            Self::AzureCli(_) => CredentialKind::AzureCli,
            Self::AzureDeveloperCli(_) => CredentialKind::AzureDeveloperCli,
        }
    }

    async fn get_token(&self, scopes: &[&str], retry: &RetryOptions) -> Result<AccessToken> {
        match self {
            Self::Environment(None) => Err(AppConfigError::authentication(format!(
                "{}, {} and {} are not all set",
                AZURE_TENANT_ID, AZURE_CLIENT_ID, AZURE_CLIENT_SECRET
            ))),
            Self::Environment(Some(credential)) => credential
                .get_token(scopes)
                .await
                .map_err(|e| AppConfigError::authentication(format!("Failed to get token: {}", e))),
            Self::ManagedIdentity(source) => retry_with_backoff(|| source.get_token(scopes), retry).await,
            Self::AzureCli(source) => source.az_token(scopes).await,
            Self::AzureDeveloperCli(source) => source.azd_token(scopes).await,
        }
    }
}

fn environment_credential(env: &EnvironmentSnapshot, http: &Client) -> Option<Arc<ClientSecretCredential>> {
    let tenant_id = env.get(AZURE_TENANT_ID)?;
    let client_id = env.get(AZURE_CLIENT_ID)?;
    let client_secret = env.get(AZURE_CLIENT_SECRET)?;

    let authority = env.get(AZURE_AUTHORITY_HOST).unwrap_or(DEFAULT_AUTHORITY_HOST);
    let authority_url = match url::Url::parse(authority) {
        Ok(url) => url,
        Err(e) => {
            warn!("Ignoring invalid {}: {}", AZURE_AUTHORITY_HOST, e);
            return None;
        }
    };

    Some(Arc::new(ClientSecretCredential::new(
        Arc::new(http.clone()),
        authority_url,
        tenant_id.to_string(),
        client_id.to_string(),
        client_secret.to_string(),
    )))
}

/// Resource identifier for a `.default` scope
fn scope_to_resource(scopes: &[&str]) -> Result<String> {
    match scopes {
        [scope] => Ok(scope.trim_end_matches("/.default").to_string()),
        _ => Err(AppConfigError::invalid_argument(
            "Managed identity tokens support exactly one scope",
        )),
    }
}

#[derive(Debug)]
struct ManagedIdentitySource {
    http: Client,
    client_id: Option<String>,
    /// (`IDENTITY_ENDPOINT`, `IDENTITY_HEADER`) when running on App Service
    app_service: Option<(String, String)>,
}

#[derive(Debug, Deserialize)]
struct ManagedIdentityToken {
    access_token: String,
    #[serde(deserialize_with = "deserialize_unix_seconds")]
    expires_on: i64,
}

fn deserialize_unix_seconds<'de, D>(deserializer: D) -> std::result::Result<i64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Seconds {
        Number(i64),
        Text(String),
    }

    match Seconds::deserialize(deserializer)? {
        Seconds::Number(n) => Ok(n),
        Seconds::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// Parse the token document returned by IMDS and App Service
pub(crate) fn parse_managed_identity_token(body: &str) -> Result<AccessToken> {
    let token: ManagedIdentityToken = serde_json::from_str(body)
        .map_err(|e| AppConfigError::serialization(format!("Failed to parse managed identity token: {}", e)))?;
    Ok(AccessToken::new(token.access_token, offset_from_unix(token.expires_on)))
}

impl ManagedIdentitySource {
    async fn get_token(&self, scopes: &[&str]) -> Result<AccessToken> {
        let resource = scope_to_resource(scopes)?;

        let request = match &self.app_service {
            Some((endpoint, header)) => {
                let mut query = vec![("api-version", "2019-08-01"), ("resource", resource.as_str())];
                if let Some(client_id) = &self.client_id {
                    query.push(("client_id", client_id.as_str()));
                }
                self.http
                    .get(endpoint)
                    .query(&query)
                    .header("X-IDENTITY-HEADER", header)
            }
            None => {
                let mut query = vec![("api-version", "2018-02-01"), ("resource", resource.as_str())];
                if let Some(client_id) = &self.client_id {
                    query.push(("client_id", client_id.as_str()));
                }
                self.http.get(IMDS_ENDPOINT).query(&query).header("Metadata", "true")
            }
        };

        let url = self
            .app_service
            .as_ref()
            .map(|(endpoint, _)| endpoint.as_str())
            .unwrap_or(IMDS_ENDPOINT);

        let response = request.send().await.map_err(|e| classify_network_error(&e, url))?;
        let status = response.status();
        let body = response.text().await.map_err(|e| classify_network_error(&e, url))?;

        if !status.is_success() {
            return Err(classify_status(status, "managed identity endpoint", &body));
        }

        parse_managed_identity_token(&body)
    }
}

#[derive(Debug)]
struct CliSource {
    tenant_id: Option<String>,
    timeout: Duration,
}

impl CliSource {
    async fn az_token(&self, scopes: &[&str]) -> Result<AccessToken> {
        let mut args = vec!["account", "get-access-token", "--output", "json"];
        for scope in scopes {
            args.push("--scope");
            args.push(scope);
        }
        if let Some(tenant_id) = &self.tenant_id {
            args.push("--tenant");
            args.push(tenant_id);
        }

        let stdout = self.run("az", &args).await?;
        parse_az_token(&stdout)
    }

    async fn azd_token(&self, scopes: &[&str]) -> Result<AccessToken> {
        let mut args = vec!["auth", "token", "--output", "json"];
        for scope in scopes {
            args.push("--scope");
            args.push(scope);
        }
        if let Some(tenant_id) = &self.tenant_id {
            args.push("--tenant-id");
            args.push(tenant_id);
        }

        let stdout = self.run("azd", &args).await?;
        parse_azd_token(&stdout)
    }

    async fn run(&self, program: &str, args: &[&str]) -> Result<String> {
        let output = tokio::time::timeout(
            self.timeout,
            Command::new(program).args(args).kill_on_drop(true).output(),
        )
        .await
        .map_err(|_| AppConfigError::connection_timeout(format!("'{}' did not respond in time", program)))?
        .map_err(|e| AppConfigError::authentication(format!("Failed to execute '{}': {}", program, e)))?;

        if !output.status.success() {
            let error_msg = String::from_utf8_lossy(&output.stderr);
            return Err(AppConfigError::authentication(format!(
                "'{}' failed: {}",
                program,
                error_msg.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AzCliToken {
    access_token: String,
    /// Unix seconds, present in newer CLI versions
    #[serde(rename = "expires_on")]
    expires_on_unix: Option<i64>,
    /// Local time without offset, e.g. `2024-05-01 12:34:56.000000`
    expires_on: Option<String>,
}

pub(crate) fn parse_az_token(stdout: &str) -> Result<AccessToken> {
    let token: AzCliToken = serde_json::from_str(stdout)
        .map_err(|e| AppConfigError::serialization(format!("Failed to parse Azure CLI output: {}", e)))?;

    let expires_on = match (token.expires_on_unix, token.expires_on.as_deref()) {
        (Some(seconds), _) => seconds,
        (None, Some(local)) => chrono::NaiveDateTime::parse_from_str(local, "%Y-%m-%d %H:%M:%S%.f")
            .ok()
            .and_then(|naive| naive.and_local_timezone(chrono::Local).earliest())
            .map(|dt| dt.timestamp())
            .ok_or_else(|| AppConfigError::serialization(format!("Unrecognized expiresOn '{}'", local)))?,
        (None, None) => return Err(AppConfigError::serialization("Azure CLI token has no expiry")),
    };

    Ok(AccessToken::new(token.access_token, offset_from_unix(expires_on)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AzdToken {
    token: String,
    expires_on: String,
}

pub(crate) fn parse_azd_token(stdout: &str) -> Result<AccessToken> {
    let token: AzdToken = serde_json::from_str(stdout)
        .map_err(|e| AppConfigError::serialization(format!("Failed to parse azd output: {}", e)))?;
    let expires_on = crate::utils::datetime::parse_timestamp(&token.expires_on)?;
    Ok(AccessToken::new(token.token, offset_from_unix(expires_on.timestamp())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::selector::CredentialOptions;

    #[test]
    fn test_parse_managed_identity_token_string_expiry() {
        let token = parse_managed_identity_token(
            r#"{"access_token":"eyJ0","expires_on":"1700000000","resource":"https://cfg.example.com","token_type":"Bearer"}"#,
        )
        .unwrap();
        assert_eq!(token.token.secret(), "eyJ0");
        assert_eq!(token.expires_on.unix_timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_parse_managed_identity_token_numeric_expiry() {
        let token = parse_managed_identity_token(r#"{"access_token":"abc","expires_on":1700000123}"#).unwrap();
        assert_eq!(token.expires_on.unix_timestamp(), 1_700_000_123);
        assert!(parse_managed_identity_token(r#"{"error":"invalid_request"}"#).is_err());
    }

    #[test]
    fn test_parse_az_token() {
        let token = parse_az_token(
            r#"{"accessToken":"cli-token","expiresOn":"2024-05-01 12:00:00.000000","expires_on":1714564800,"tenant":"t","tokenType":"Bearer"}"#,
        )
        .unwrap();
        assert_eq!(token.token.secret(), "cli-token");
        assert_eq!(token.expires_on.unix_timestamp(), 1_714_564_800);

        let legacy = parse_az_token(r#"{"accessToken":"old","expiresOn":"2024-05-01 12:00:00.123456"}"#).unwrap();
        assert_eq!(legacy.token.secret(), "old");
    }

    #[test]
    fn test_parse_azd_token() {
        let token = parse_azd_token(r#"{"token":"azd-token","expiresOn":"2024-05-01T12:00:00Z"}"#).unwrap();
        assert_eq!(token.expires_on.unix_timestamp(), 1_714_564_800);
    }

    #[test]
    fn test_scope_to_resource() {
        assert_eq!(
            scope_to_resource(&["https://cfg.example.com/.default"]).unwrap(),
            "https://cfg.example.com"
        );
        assert!(scope_to_resource(&["a", "b"]).is_err());
    }

    #[test]
    fn test_build_follows_options() {
        let options = CredentialOptions {
            exclude_azure_cli_credential: true,
            exclude_azure_developer_cli_credential: true,
            ..CredentialOptions::default()
        };
        let credential = options.build(&EnvironmentSnapshot::default());
        assert_eq!(
            credential.kinds(),
            vec![CredentialKind::Environment, CredentialKind::ManagedIdentity]
        );
        assert_eq!(credential.retry_options().max_retries, 2);
    }

    #[tokio::test]
    async fn test_empty_chain_fails_without_network() {
        let credential = ChainedCredential::new(Vec::new(), RetryOptions::fail_fast(), &EnvironmentSnapshot::default());
        let err = credential.fetch_token(&["https://cfg.example.com/.default"]).await.unwrap_err();
        assert!(matches!(err, AppConfigError::AuthenticationError(_)));
    }

    #[tokio::test]
    async fn test_incomplete_environment_source_fails_fast() {
        let credential = ChainedCredential::new(
            vec![CredentialSource::Environment],
            RetryOptions::fail_fast(),
            &EnvironmentSnapshot::from_pairs([(AZURE_TENANT_ID, "t")]),
        );
        let err = credential.token(&["https://cfg.example.com/.default"]).await.unwrap_err();
        assert!(err.to_string().contains("EnvironmentCredential"));
    }
}
