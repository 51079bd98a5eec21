//! CryptoManager Server
//!
//! Runs the asset stats analyzer against the local asset database until
//! interrupted.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cryptomanager_services::{
    AssetQuery, AssetStatsAnalyzer, AssetStatsCalculator, AssetStorage,
    ServiceConfig,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env.local file
    if let Err(e) = dotenvy::from_filename(".env.local") {
        // Not an error if the file doesn't exist
        if !matches!(e, dotenvy::Error::Io(_)) {
            eprintln!("Warning: Failed to load .env.local: {}", e);
        }
    }

    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,cryptomanager_services=debug")),
        )
        .init();

    info!("Starting CryptoManager server");

    let config = ServiceConfig::from_env()?;
    match &config.enabled_exchanges {
        Some(exchanges) => info!("Enabled exchanges: {}", exchanges.join(", ")),
        None => info!("No exchange allow-list configured, all exchanges enabled"),
    }

    info!("Initializing asset storage at: {}", config.database_path);
    let storage = Arc::new(AssetStorage::new(&config.database_path)?);

    let known = storage.query_assets(&AssetQuery::default())?.total;
    info!("Asset storage holds {} canonical assets", known);

    let analyzer = Arc::new(AssetStatsAnalyzer::new(
        storage.clone(),
        storage.clone(),
        AssetStatsCalculator::new(config.stats),
        config.analyzer.clone(),
    ));

    let cancel = CancellationToken::new();
    let analyzer_handle = tokio::spawn(analyzer.run(cancel.clone()));

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");

    cancel.cancel();
    if let Err(e) = analyzer_handle.await {
        warn!("Asset stats analyzer task failed: {}", e);
    }

    info!("CryptoManager server stopped");
    Ok(())
}
