//! demo-app - serves settings from Azure App Configuration
//!
//! Reads `DemoApp:Color`, `DemoApp:MySecretValue` and the `Beta` feature
//! flag, refreshing them while the server runs.

use anyhow::Context;
use appconfig_refresh::cli::Cli;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // Parse command-line arguments
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.log_json);

    if let Err(e) = run(cli).await {
        error!("Error: {:#}", e);
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    info!(version = env!("CARGO_PKG_VERSION"), "Starting demo-app");

    cli.execute()
        .await
        .with_context(|| format!("demo-app failed using {}", cli.config.display()))?;

    Ok(())
}

fn init_logging(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "appconfig_refresh=info,demo_app=info".into());

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
