//! Kagura - extension runtime host
//!
//! Loads configuration, starts the extension runtime and serves the command
//! surface over HTTP until a shutdown signal arrives.

use kagura::{api, core, extension};

use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration (handles CLI args, env vars, and config file)
    let config = match core::config::Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            // Print error to stderr since logging isn't initialized yet
            eprintln!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    let _logger = match core::Logger::init(&config.logging) {
        Ok(logger) => logger,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            return Err(e);
        }
    };

    info!("Starting Kagura v{}", kagura::VERSION);
    info!(
        policy = ?config.runtime.context_policy,
        call_timeout_ms = config.runtime.call_timeout_ms,
        fetch_timeout_ms = config.runtime.fetch_timeout_ms,
        "Runtime configuration"
    );

    let dispatcher = Arc::new(extension::Dispatcher::new(
        &config.runtime,
        tokio::runtime::Handle::current(),
    )?);

    if let Some(dir) = &config.extensions.preload_dir {
        match dispatcher.preload_dir(dir).await {
            Ok(loaded) => info!(dir = ?dir, count = loaded.len(), "Preloaded extensions"),
            Err(e) => warn!(dir = ?dir, "Failed to preload extensions: {}", e),
        }
    }

    let server = api::ApiServer::new(&config, dispatcher.clone());
    info!(
        url = %format!("http://{}:{}", config.server.host, config.server.port),
        "Server ready - starting to serve requests"
    );

    // Blocks until shutdown signal
    server.serve().await?;

    dispatcher.shutdown().await;
    info!("Extension runtime stopped");

    Ok(())
}
