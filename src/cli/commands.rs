//! CLI arguments and startup for `demo-app`

use clap::Parser;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::auth::environment::{CredentialContext, EnvironmentSnapshot};
use crate::cli::demo;
use crate::client::{ClientOptions, ConfigurationClient};
use crate::config::loader::load_configuration;
use crate::error::Result;
use crate::middleware::{ConfigurationRefresher, RefreshMode};

/// Overrides file picked up automatically in debug builds
pub const DEFAULT_OVERRIDES_FILE: &str = "appsettings.overrides.json";

#[derive(Parser, Debug)]
#[command(name = "demo-app")]
#[command(about = "Serves settings and feature flags from Azure App Configuration")]
#[command(version, author)]
pub struct Cli {
    /// Configuration file with the AppConfig section and local settings
    #[arg(long, value_name = "PATH", default_value = "appsettings.toml", env = "DEMOAPP_CONFIG")]
    pub config: PathBuf,

    /// File whose values win over the remote store
    #[arg(long, value_name = "PATH")]
    pub overrides: Option<PathBuf>,

    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:8080", env = "DEMOAPP_LISTEN")]
    pub listen: SocketAddr,

    /// Key filters to load (repeatable)
    #[arg(long = "filter", value_name = "FILTER", default_value = "DemoApp:*")]
    pub filters: Vec<String>,

    /// Label to select; unlabeled settings when omitted
    #[arg(long)]
    pub label: Option<String>,

    /// Keep serving local configuration when the store is missing or unreachable
    #[arg(long)]
    pub optional: bool,

    /// Finish due reloads before answering requests
    #[arg(long)]
    pub wait_for_fresh: bool,

    /// Emit logs as JSON
    #[arg(long, env = "DEMOAPP_LOG_JSON")]
    pub log_json: bool,
}

impl Cli {
    /// Overrides file to load, if any
    pub fn overrides_path(&self) -> Option<PathBuf> {
        match &self.overrides {
            Some(path) => Some(path.clone()),
            None if cfg!(debug_assertions) => Some(PathBuf::from(DEFAULT_OVERRIDES_FILE)),
            None => None,
        }
    }

    pub fn refresh_mode(&self) -> RefreshMode {
        if self.wait_for_fresh {
            RefreshMode::WaitForFresh
        } else {
            RefreshMode::Background
        }
    }

    /// Build the client from the configuration file and serve until shutdown
    pub async fn execute(&self) -> Result<()> {
        let client = self.connect().await?;
        let refresher = ConfigurationRefresher::new(client).with_mode(self.refresh_mode());

        let listener = tokio::net::TcpListener::bind(self.listen).await?;
        info!(address = %self.listen, "Listening");
        axum::serve(listener, demo::router(refresher)).await?;
        Ok(())
    }

    pub async fn connect(&self) -> Result<ConfigurationClient> {
        let overrides = self.overrides_path();
        let loaded = load_configuration(&self.config, overrides.as_deref().map(Path::new))?;

        let context = CredentialContext::detect(&EnvironmentSnapshot::from_process());
        info!(deployed = context.is_deployed, "Detected hosting environment");

        let mut options = ClientOptions::new()
            .with_filters(self.filters.iter().cloned())
            .optional(self.optional)
            .with_local(loaded.local);
        if let Some(label) = &self.label {
            options = options.with_label(label.clone());
        }

        ConfigurationClient::initialize_with_options(loaded.settings, &context, options).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::parse_from(["demo-app"]);
        assert_eq!(cli.config, PathBuf::from("appsettings.toml"));
        assert_eq!(cli.filters, vec!["DemoApp:*".to_string()]);
        assert_eq!(cli.listen.port(), 8080);
        assert_eq!(cli.refresh_mode(), RefreshMode::Background);
        assert!(!cli.log_json);
    }

    #[test]
    fn test_repeated_filters_and_mode() {
        let cli = Cli::parse_from([
            "demo-app",
            "--filter",
            "DemoApp:*",
            "--filter",
            "Shared:*",
            "--wait-for-fresh",
            "--overrides",
            "local.json",
        ]);
        assert_eq!(cli.filters.len(), 2);
        assert_eq!(cli.refresh_mode(), RefreshMode::WaitForFresh);
        assert_eq!(cli.overrides_path(), Some(PathBuf::from("local.json")));
    }
}
