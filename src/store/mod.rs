//! Remote configuration store module
//!
//! The client talks to the outside world only through the two traits in
//! this module: [`ConfigurationStore`] for key-values and feature flags,
//! [`SecretResolver`] for Key Vault references.

pub mod app_configuration;
pub mod key_vault;
pub mod models;

use async_trait::async_trait;

use crate::error::Result;

pub use app_configuration::AppConfigurationStore;
pub use key_vault::KeyVaultSecretResolver;
pub use models::*;

/// Read access to a key-value configuration store
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConfigurationStore: Send + Sync {
    /// All key-values matching `selector`, following pagination
    async fn list_settings(&self, selector: &KeySelector) -> Result<Vec<KeyValue>>;

    /// A single key-value; `Ok(None)` when the key does not exist
    async fn get_setting(&self, selector: &KeySelector) -> Result<Option<KeyValue>>;
}

/// Resolves secret references to their current value
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SecretResolver: Send + Sync {
    async fn resolve(&self, reference: &SecretReference) -> Result<String>;
}
