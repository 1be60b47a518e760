//! Authentication module for Azure services
//!
//! Picks a credential chain from the hosting environment and exposes it as
//! an `azure_core` [`TokenCredential`](azure_core::auth::TokenCredential)
//! shared by the configuration store and Key Vault clients.

pub mod environment;
pub mod provider;
pub mod selector;

pub use environment::*;
pub use provider::*;
pub use selector::*;
