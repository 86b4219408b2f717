use std::sync::Arc;

use anyhow::{Context, Result};
use dotenvy::dotenv;

use propusk::cli::{Cli, Commands};
use propusk::core::logging::{self, init_logger};
use propusk::core::AppConfig;
use propusk::hydra::HydraClient;
use propusk::login::{LoginResolver, ResolverConfig};
use propusk::storage::{AuthStore, PgStore};
use propusk::telegram::{
    BotApiClient, BotTokenVerifier, MemoryReplayGuard, MemoryVerificationCache, RedisReplayGuard,
    RedisVerificationCache, ReplayGuard, VerificationCache,
};
use propusk::web;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    // .env before the logger so RUST_LOG set there takes effect.
    let _ = dotenv();
    init_logger()?;

    std::panic::set_hook(Box::new(|panic_info| {
        tracing::error!("panic: {panic_info}");
    }));

    match cli.command {
        Some(Commands::Migrate) => run_migrations().await,
        Some(Commands::Serve) | None => run_server().await,
    }
}

async fn run_migrations() -> Result<()> {
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL is required")?;
    let store = PgStore::connect(&database_url).await?;
    store.migrate().await?;
    tracing::info!("database migrations applied");
    Ok(())
}

async fn run_server() -> Result<()> {
    let cfg = AppConfig::from_env()?;
    logging::log_startup(&cfg);

    let store = PgStore::connect(&cfg.database_url).await?;
    store.migrate().await?;

    let (replay, cache): (Arc<dyn ReplayGuard>, Arc<dyn VerificationCache>) = match &cfg.redis_url {
        Some(redis_url) => {
            let client =
                redis::Client::open(redis_url.as_str()).context("REDIS_URL is not a valid Redis URL")?;
            let conn = client
                .get_multiplexed_tokio_connection()
                .await
                .context("failed to connect to Redis")?;
            let secret = cfg
                .token_cache_secret
                .clone()
                .context("TOKEN_CACHE_SECRET is required when REDIS_URL is set")?;
            (
                Arc::new(RedisReplayGuard::new(conn.clone(), cfg.replay_ttl)),
                Arc::new(RedisVerificationCache::new(conn, secret, cfg.token_cache_ttl)),
            )
        }
        None => (
            Arc::new(MemoryReplayGuard::new(cfg.replay_ttl)),
            Arc::new(MemoryVerificationCache::new(cfg.token_cache_ttl)),
        ),
    };

    let api = BotApiClient::new(cfg.telegram_api_url.clone(), cfg.telegram_api_timeout)?;
    let verifier = BotTokenVerifier::new(api, cache, cfg.cache_write_timeout);
    let hydra = HydraClient::new(cfg.hydra_admin_url.clone(), cfg.hydra_timeout)?;

    let resolver = LoginResolver::new(
        ResolverConfig::from(&cfg),
        hydra,
        Arc::new(store) as Arc<dyn AuthStore>,
        replay,
        verifier,
    );

    web::serve(cfg.listen_addr, Arc::new(resolver)).await
}
