//!
//! tripgate server binary
//! ----------------------
//! Reads configuration from the environment and serves the registration API.

use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use tripgate::config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;
    fmt().with_env_filter(filter).init();

    let config = AppConfig::from_env()?;
    info!(
        target: "tripgate",
        "tripgate starting: port={}, store='{}', guild_configured={}, events={:?}",
        config.port,
        config.database_path.as_ref().map(|p| p.display().to_string()).unwrap_or_else(|| "<memory>".into()),
        config.discord.guild_id.is_some(),
        config.enabled_events
    );

    tripgate::server::run(config).await
}
