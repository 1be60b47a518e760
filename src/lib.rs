//! appconfig-refresh - Azure App Configuration with dynamic refresh
//!
//! Loads settings, Key Vault references and feature flags from an Azure App
//! Configuration store, serves them from memory and reloads them when a
//! sentinel key changes or a cache expires.

pub mod auth;
pub mod cache;
pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod middleware;
pub mod store;
pub mod utils;

// Re-export commonly used types
pub use client::{ClientOptions, ConfigurationClient};
pub use error::{AppConfigError, Result};
pub use middleware::{ConfigurationRefresher, RefreshLayer, RefreshMode};
