//! Credential selection
//!
//! Chooses which token sources to try for the configuration store and Key
//! Vault. Deployed instances only try non-interactive sources and use a
//! short retry budget so that a misconfiguration fails fast instead of
//! hanging on a developer tool that is not installed.

use std::fmt;

use crate::auth::environment::{CredentialContext, EnvironmentSnapshot};
use crate::auth::provider::ChainedCredential;
use crate::utils::retry::RetryOptions;

/// A way of obtaining an access token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CredentialKind {
    /// Service principal from `AZURE_TENANT_ID` / `AZURE_CLIENT_ID` / `AZURE_CLIENT_SECRET`
    Environment,
    ManagedIdentity,
    AzureCli,
    AzureDeveloperCli,
}

impl CredentialKind {
    /// Chain order
    pub const ALL: [CredentialKind; 4] = [
        CredentialKind::Environment,
        CredentialKind::ManagedIdentity,
        CredentialKind::AzureCli,
        CredentialKind::AzureDeveloperCli,
    ];

    /// Sources that rely on a developer login on the local machine
    pub fn is_local_only(self) -> bool {
        matches!(self, Self::AzureCli | Self::AzureDeveloperCli)
    }

    /// Sources that can be pointed at a specific tenant
    pub fn is_tenant_aware(self) -> bool {
        matches!(self, Self::AzureCli | Self::AzureDeveloperCli)
    }
}

impl fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Environment => "EnvironmentCredential",
            Self::ManagedIdentity => "ManagedIdentityCredential",
            Self::AzureCli => "AzureCliCredential",
            Self::AzureDeveloperCli => "AzureDeveloperCliCredential",
        };
        f.write_str(name)
    }
}

/// One configured entry of the credential chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialSource {
    Environment,
    ManagedIdentity { client_id: Option<String> },
    AzureCli { tenant_id: Option<String> },
    AzureDeveloperCli { tenant_id: Option<String> },
}

impl CredentialSource {
    pub fn kind(&self) -> CredentialKind {
        match self {
            Self::Environment => CredentialKind::Environment,
            Self::ManagedIdentity { .. } => CredentialKind::ManagedIdentity,
            Self::AzureCli { .. } => CredentialKind::AzureCli,
            Self::AzureDeveloperCli { .. } => CredentialKind::AzureDeveloperCli,
        }
    }

    pub fn tenant_id(&self) -> Option<&str> {
        match self {
            Self::AzureCli { tenant_id } | Self::AzureDeveloperCli { tenant_id } => tenant_id.as_deref(),
            _ => None,
        }
    }
}

/// The outcome of credential selection: a description of the chain to build
#[derive(Debug, Clone, PartialEq)]
pub struct CredentialOptions {
    pub exclude_environment_credential: bool,
    pub exclude_managed_identity_credential: bool,
    pub exclude_azure_cli_credential: bool,
    pub exclude_azure_developer_cli_credential: bool,
    pub tenant_id: Option<String>,
    pub managed_identity_client_id: Option<String>,
    pub retry: RetryOptions,
}

impl Default for CredentialOptions {
    fn default() -> Self {
        Self {
            exclude_environment_credential: false,
            exclude_managed_identity_credential: false,
            exclude_azure_cli_credential: false,
            exclude_azure_developer_cli_credential: false,
            tenant_id: None,
            managed_identity_client_id: None,
            retry: RetryOptions::fail_fast(),
        }
    }
}

impl CredentialOptions {
    pub fn is_excluded(&self, kind: CredentialKind) -> bool {
        match kind {
            CredentialKind::Environment => self.exclude_environment_credential,
            CredentialKind::ManagedIdentity => self.exclude_managed_identity_credential,
            CredentialKind::AzureCli => self.exclude_azure_cli_credential,
            CredentialKind::AzureDeveloperCli => self.exclude_azure_developer_cli_credential,
        }
    }

    /// The chain, in the order sources are tried
    pub fn sources(&self) -> Vec<CredentialSource> {
        CredentialKind::ALL
            .into_iter()
            .filter(|kind| !self.is_excluded(*kind))
            .map(|kind| match kind {
                CredentialKind::Environment => CredentialSource::Environment,
                CredentialKind::ManagedIdentity => CredentialSource::ManagedIdentity {
                    client_id: self.managed_identity_client_id.clone(),
                },
                CredentialKind::AzureCli => CredentialSource::AzureCli {
                    tenant_id: self.tenant_id.clone(),
                },
                CredentialKind::AzureDeveloperCli => CredentialSource::AzureDeveloperCli {
                    tenant_id: self.tenant_id.clone(),
                },
            })
            .collect()
    }

    /// Build the token credential described by these options
    pub fn build(&self, env: &EnvironmentSnapshot) -> ChainedCredential {
        ChainedCredential::new(self.sources(), self.retry.clone(), env)
    }
}

/// Choose credential options for the environment described by `context`.
///
/// `tenant_id` wins over the tenant found in the environment.
pub fn select_credential(context: &CredentialContext, tenant_id: Option<&str>) -> CredentialOptions {
    let deployed = context.is_deployed;

    let tenant_id = tenant_id
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .or_else(|| context.tenant_id.clone());

    let options = CredentialOptions {
        // Prevent deployed instances from trying things that don't work and take too long
        exclude_azure_cli_credential: deployed,
        exclude_azure_developer_cli_credential: deployed,
        exclude_environment_credential: false,
        exclude_managed_identity_credential: false,
        tenant_id,
        managed_identity_client_id: context.managed_identity_client_id.clone(),
        retry: RetryOptions::fail_fast(),
    };

    tracing::debug!(
        deployed,
        tenant = options.tenant_id.as_deref().unwrap_or("<default>"),
        user_assigned_identity = options.managed_identity_client_id.is_some(),
        sources = ?options.sources().iter().map(|s| s.kind().to_string()).collect::<Vec<_>>(),
        "Selected credential chain"
    );

    options
}
