//! Chat Relay Gateway - Main entry point.

use anyhow::Result;
use relay_common::config::Config;
use relay_common::logging::init_logging;
use relay_common::Validate;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let (config, source) = Config::load_with_env()?;

    // Initialize logging
    init_logging(&config.observability.log_level, &config.observability.log_format);

    if source.is_file() {
        tracing::info!(path = %source.path().display(), "Loaded config file");
    } else {
        tracing::info!(path = %source.path().display(), "Config file not found, using defaults");
    }

    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {e}"))?;

    tracing::info!("Chat Relay Gateway v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind = %config.bind_address(),
        model = %config.model.default_model,
        has_api_key = config.model.has_api_key(),
        max_turns = config.session.max_turns,
        "Relay configured"
    );
    if !config.model.has_api_key() {
        tracing::warn!("No model API key configured; chat requests will fail until GEMINI_API_KEY is set");
    }

    // Start the relay server
    relay_gateway::start_server(&config).await
}
