//! Logging initialization
//!
//! Console logging via `tracing` with an env-driven filter. Records the
//! dependencies emit through the `log` facade (sqlx, redis, reqwest) are
//! bridged into the same subscriber.

use anyhow::Result;
use tracing_log::LogTracer;
use tracing_subscriber::EnvFilter;

use crate::core::config::AppConfig;

/// Initialize the global tracing subscriber.
///
/// The filter comes from `RUST_LOG`, defaulting to `info`.
///
/// # Errors
/// Fails when a global subscriber or logger is already installed.
pub fn init_logger() -> Result<()> {
    LogTracer::init()?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    Ok(())
}

/// Log the effective configuration at startup, secrets excluded.
pub fn log_startup(cfg: &AppConfig) {
    tracing::info!(listen_addr = %cfg.listen_addr, "starting HTTP server");
    tracing::info!(public_base_url = %cfg.public_base_url, hydra_admin_url = %cfg.hydra_admin_url, "upstream endpoints");
    match &cfg.redis_url {
        Some(_) => tracing::info!("replay guard and token cache: redis"),
        None => tracing::warn!(
            "REDIS_URL not set, replay guard and token cache run in-process; \
             this is only correct for a single instance"
        ),
    }
    tracing::info!(
        auth_data_ttl_secs = cfg.auth_data_ttl.as_secs(),
        replay_ttl_secs = cfg.replay_ttl.as_secs(),
        token_cache_ttl_secs = cfg.token_cache_ttl.as_secs(),
        "freshness windows"
    );
}
