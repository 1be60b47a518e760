//! Runtime environment probes for credential selection
//!
//! Everything here is a pure function of an [`EnvironmentSnapshot`], which
//! is captured once at startup.

use std::collections::HashMap;

/// Set by Azure App Service / Azure Web Apps
pub const WEBSITE_SITE_NAME: &str = "WEBSITE_SITE_NAME";
/// Set inside every Kubernetes (AKS) pod
pub const KUBERNETES_SERVICE_HOST: &str = "KUBERNETES_SERVICE_HOST";
pub const AZURE_TENANT_ID: &str = "AZURE_TENANT_ID";
/// Preferred user-assigned managed identity client id
pub const MANAGED_CLIENT_ID: &str = "MANAGED_CLIENT_ID";
pub const AZURE_CLIENT_ID: &str = "AZURE_CLIENT_ID";
pub const AZURE_CLIENT_SECRET: &str = "AZURE_CLIENT_SECRET";
pub const AZURE_AUTHORITY_HOST: &str = "AZURE_AUTHORITY_HOST";
/// App Service managed identity endpoint
pub const IDENTITY_ENDPOINT: &str = "IDENTITY_ENDPOINT";
pub const IDENTITY_HEADER: &str = "IDENTITY_HEADER";

/// Immutable copy of the environment variables relevant to authentication
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnvironmentSnapshot {
    vars: HashMap<String, String>,
}

impl EnvironmentSnapshot {
    /// Capture the relevant variables from the current process
    pub fn from_process() -> Self {
        let names = [
            WEBSITE_SITE_NAME,
            KUBERNETES_SERVICE_HOST,
            AZURE_TENANT_ID,
            MANAGED_CLIENT_ID,
            AZURE_CLIENT_ID,
            AZURE_CLIENT_SECRET,
            AZURE_AUTHORITY_HOST,
            IDENTITY_ENDPOINT,
            IDENTITY_HEADER,
        ];

        Self::from_pairs(
            names
                .iter()
                .filter_map(|name| std::env::var(name).ok().map(|value| (*name, value))),
        )
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Value of `name`, treating empty or whitespace-only values as absent
    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars
            .get(name)
            .map(String::as_str)
            .filter(|value| !value.trim().is_empty())
    }

    pub fn is_set(&self, name: &str) -> bool {
        self.get(name).is_some()
    }
}

/// How the hosting markers combine into "deployed"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeploymentDetection {
    /// Both the web-hosting and the orchestration marker must be present.
    ///
    /// NOTE: this is the literal rule the configuration has always used. It
    /// means a plain App Service or a plain AKS pod is treated as local.
    /// [`DeploymentDetection::AnyMarker`] is probably what was intended; it
    /// is kept opt-in until that is confirmed.
    #[default]
    AllMarkers,
    /// Either marker is enough
    AnyMarker,
}

impl DeploymentDetection {
    pub fn is_deployed(self, env: &EnvironmentSnapshot) -> bool {
        let web = env.is_set(WEBSITE_SITE_NAME);
        let orchestrated = env.is_set(KUBERNETES_SERVICE_HOST);
        match self {
            Self::AllMarkers => web && orchestrated,
            Self::AnyMarker => web || orchestrated,
        }
    }
}

/// What the credential selector needs to know about the runtime environment
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialContext {
    pub is_deployed: bool,
    pub tenant_id: Option<String>,
    pub managed_identity_client_id: Option<String>,
}

impl CredentialContext {
    /// Derive the context from `env` with the default detection rule
    pub fn detect(env: &EnvironmentSnapshot) -> Self {
        Self::detect_with(env, DeploymentDetection::default())
    }

    pub fn detect_with(env: &EnvironmentSnapshot, detection: DeploymentDetection) -> Self {
        let managed_identity_client_id = env
            .get(MANAGED_CLIENT_ID)
            .or_else(|| env.get(AZURE_CLIENT_ID))
            .map(|id| id.trim().to_string());

        Self {
            is_deployed: detection.is_deployed(env),
            tenant_id: env.get(AZURE_TENANT_ID).map(|id| id.trim().to_string()),
            managed_identity_client_id,
        }
    }

    /// Context for a developer workstation
    pub fn local() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> EnvironmentSnapshot {
        EnvironmentSnapshot::from_pairs(pairs.iter().map(|(k, v)| (*k, *v)))
    }

    #[test]
    fn test_deployed_requires_both_markers() {
        let both = env(&[(WEBSITE_SITE_NAME, "demo"), (KUBERNETES_SERVICE_HOST, "10.0.0.1")]);
        let web_only = env(&[(WEBSITE_SITE_NAME, "demo")]);
        let aks_only = env(&[(KUBERNETES_SERVICE_HOST, "10.0.0.1")]);

        assert!(CredentialContext::detect(&both).is_deployed);
        assert!(!CredentialContext::detect(&web_only).is_deployed);
        assert!(!CredentialContext::detect(&aks_only).is_deployed);
        assert!(!CredentialContext::detect(&EnvironmentSnapshot::default()).is_deployed);
    }

    #[test]
    fn test_any_marker_rule() {
        let web_only = env(&[(WEBSITE_SITE_NAME, "demo")]);
        let aks_only = env(&[(KUBERNETES_SERVICE_HOST, "10.0.0.1")]);

        assert!(CredentialContext::detect_with(&web_only, DeploymentDetection::AnyMarker).is_deployed);
        assert!(CredentialContext::detect_with(&aks_only, DeploymentDetection::AnyMarker).is_deployed);
        assert!(
            !CredentialContext::detect_with(&EnvironmentSnapshot::default(), DeploymentDetection::AnyMarker)
                .is_deployed
        );
    }

    #[test]
    fn test_empty_markers_are_absent() {
        let blank = env(&[(WEBSITE_SITE_NAME, ""), (KUBERNETES_SERVICE_HOST, "  ")]);
        assert!(!CredentialContext::detect_with(&blank, DeploymentDetection::AnyMarker).is_deployed);
    }

    #[test]
    fn test_managed_client_id_precedence() {
        let both = env(&[(MANAGED_CLIENT_ID, "managed"), (AZURE_CLIENT_ID, "azure")]);
        assert_eq!(
            CredentialContext::detect(&both).managed_identity_client_id.as_deref(),
            Some("managed")
        );

        let fallback = env(&[(MANAGED_CLIENT_ID, ""), (AZURE_CLIENT_ID, "azure")]);
        assert_eq!(
            CredentialContext::detect(&fallback).managed_identity_client_id.as_deref(),
            Some("azure")
        );

        assert!(CredentialContext::detect(&EnvironmentSnapshot::default())
            .managed_identity_client_id
            .is_none());
    }

    #[test]
    fn test_tenant_from_environment() {
        let snapshot = env(&[(AZURE_TENANT_ID, "72f988bf-86f1-41af-91ab-2d7cd011db47")]);
        assert_eq!(
            CredentialContext::detect(&snapshot).tenant_id.as_deref(),
            Some("72f988bf-86f1-41af-91ab-2d7cd011db47")
        );
    }
}
