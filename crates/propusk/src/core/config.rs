//! Application configuration
//!
//! One explicit struct, loaded once at startup from environment
//! variables (`.env` is read by `main` before this runs). Every field
//! documents its variable and default; nothing else in the crate reads
//! the environment.

use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use secrecy::SecretString;
use url::Url;

/// Default Telegram widget OAuth endpoint
pub const DEFAULT_TELEGRAM_AUTH_URL: &str = "https://oauth.telegram.org/auth";
/// Default Telegram Bot API endpoint
pub const DEFAULT_TELEGRAM_API_URL: &str = "https://api.telegram.org";

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Socket the HTTP server binds to.
    /// Read from LISTEN_ADDR. Default: 0.0.0.0:8080
    pub listen_addr: SocketAddr,

    /// Public base URL of this service, used to build the login page
    /// origin and the widget/mini-app callback URLs.
    /// Read from PUBLIC_BASE_URL. Required. Example: https://login.example.org
    pub public_base_url: Url,

    /// Telegram OAuth endpoint the login widget redirects through.
    /// Read from TELEGRAM_AUTH_URL. Default: https://oauth.telegram.org/auth
    pub telegram_auth_url: Url,

    /// Telegram Bot API base, overridable for a local Bot API server
    /// and for tests.
    /// Read from TELEGRAM_API_URL. Default: https://api.telegram.org
    pub telegram_api_url: Url,

    /// Per-request deadline for Bot API calls.
    /// Read from TELEGRAM_API_TIMEOUT_SECS. Default: 10
    pub telegram_api_timeout: Duration,

    /// Admin API base of the OAuth2 authorization server (ORY Hydra).
    /// Read from HYDRA_ADMIN_URL. Required. Example: http://hydra:4445
    pub hydra_admin_url: Url,

    /// Per-request deadline for admin API calls.
    /// Read from HYDRA_TIMEOUT_SECS. Default: 10
    pub hydra_timeout: Duration,

    /// Postgres connection string.
    /// Read from DATABASE_URL. Required.
    pub database_url: String,

    /// Redis connection string for the replay guard and the token
    /// verification cache. When absent both run in-process, which is
    /// only correct for a single instance.
    /// Read from REDIS_URL. Optional. Example: redis://redis:6379
    pub redis_url: Option<String>,

    /// Maximum accepted age of a signed Telegram payload.
    /// Read from AUTH_DATA_TTL_SECS. Default: 300
    pub auth_data_ttl: Duration,

    /// How long a consumed signature hash stays blocked.
    /// Read from REPLAY_TTL_SECS. Default: 300
    pub replay_ttl: Duration,

    /// How long a bot-token verification result stays cached.
    /// Read from TOKEN_CACHE_TTL_SECS. Default: 300
    pub token_cache_ttl: Duration,

    /// Key for deriving token cache keys, so raw bot tokens never reach
    /// the shared store. Read from TOKEN_CACHE_SECRET.
    /// Required when REDIS_URL is set.
    pub token_cache_secret: Option<SecretString>,

    /// Deadline for the detached cache-write tasks.
    /// Read from CACHE_WRITE_TIMEOUT_SECS. Default: 30
    pub cache_write_timeout: Duration,

    /// Value of `remember_for` passed on accepted logins, in seconds.
    /// Read from REMEMBER_FOR_SECS. Default: 3600
    pub remember_for: u64,
}

impl AppConfig {
    /// Load the configuration from the process environment.
    ///
    /// # Errors
    /// Returns an error naming the offending variable when a required
    /// value is missing or a value fails to parse.
    pub fn from_env() -> Result<Self> {
        let listen_addr = env_or("LISTEN_ADDR", "0.0.0.0:8080")
            .parse::<SocketAddr>()
            .context("LISTEN_ADDR is not a valid socket address")?;

        let public_base_url = parse_url(&env_required("PUBLIC_BASE_URL")?, "PUBLIC_BASE_URL")?;
        let telegram_auth_url =
            parse_url(&env_or("TELEGRAM_AUTH_URL", DEFAULT_TELEGRAM_AUTH_URL), "TELEGRAM_AUTH_URL")?;
        let telegram_api_url =
            parse_url(&env_or("TELEGRAM_API_URL", DEFAULT_TELEGRAM_API_URL), "TELEGRAM_API_URL")?;
        let hydra_admin_url = parse_url(&env_required("HYDRA_ADMIN_URL")?, "HYDRA_ADMIN_URL")?;

        let redis_url = env::var("REDIS_URL").ok().filter(|v| !v.is_empty());
        let token_cache_secret = env::var("TOKEN_CACHE_SECRET")
            .ok()
            .filter(|v| !v.is_empty())
            .map(SecretString::from);
        if redis_url.is_some() && token_cache_secret.is_none() {
            bail!("TOKEN_CACHE_SECRET is required when REDIS_URL is set");
        }

        Ok(AppConfig {
            listen_addr,
            public_base_url,
            telegram_auth_url,
            telegram_api_url,
            telegram_api_timeout: env_secs("TELEGRAM_API_TIMEOUT_SECS", 10)?,
            hydra_admin_url,
            hydra_timeout: env_secs("HYDRA_TIMEOUT_SECS", 10)?,
            database_url: env_required("DATABASE_URL")?,
            redis_url,
            auth_data_ttl: env_secs("AUTH_DATA_TTL_SECS", 300)?,
            replay_ttl: env_secs("REPLAY_TTL_SECS", 300)?,
            token_cache_ttl: env_secs("TOKEN_CACHE_TTL_SECS", 300)?,
            token_cache_secret,
            cache_write_timeout: env_secs("CACHE_WRITE_TIMEOUT_SECS", 30)?,
            remember_for: env_u64("REMEMBER_FOR_SECS", 3600)?,
        })
    }

    /// URL of the interactive login page, used as the widget `origin`.
    pub fn login_page_url(&self) -> Url {
        crate::login::urls::with_path(&self.public_base_url, &["login"])
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_required(key: &str) -> Result<String> {
    match env::var(key) {
        Ok(v) if !v.is_empty() => Ok(v),
        _ => bail!("{key} is required"),
    }
}

fn env_u64(key: &str, default: u64) -> Result<u64> {
    match env::var(key) {
        Ok(v) => v.parse::<u64>().with_context(|| format!("{key} is not a valid integer")),
        Err(_) => Ok(default),
    }
}

fn env_secs(key: &str, default: u64) -> Result<Duration> {
    Ok(Duration::from_secs(env_u64(key, default)?))
}

fn parse_url(value: &str, key: &str) -> Result<Url> {
    Url::parse(value).with_context(|| format!("{key} is not a valid URL"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn set_base_env() {
        // SAFETY: config tests run serialized and nothing else touches
        // the environment concurrently.
        unsafe {
            env::set_var("PUBLIC_BASE_URL", "https://login.example.org");
            env::set_var("HYDRA_ADMIN_URL", "http://hydra:4445");
            env::set_var("DATABASE_URL", "postgres://propusk@localhost/propusk");
            env::remove_var("REDIS_URL");
            env::remove_var("TOKEN_CACHE_SECRET");
            env::remove_var("LISTEN_ADDR");
            env::remove_var("AUTH_DATA_TTL_SECS");
        }
    }

    #[test]
    #[serial]
    fn defaults_apply_when_vars_are_absent() {
        set_base_env();
        let cfg = AppConfig::from_env().unwrap();
        assert_eq!(cfg.listen_addr.port(), 8080);
        assert_eq!(cfg.telegram_auth_url.as_str(), "https://oauth.telegram.org/auth");
        assert_eq!(cfg.auth_data_ttl, Duration::from_secs(300));
        assert_eq!(cfg.remember_for, 3600);
        assert!(cfg.redis_url.is_none());
    }

    #[test]
    #[serial]
    fn redis_without_cache_secret_is_rejected() {
        set_base_env();
        unsafe {
            env::set_var("REDIS_URL", "redis://localhost:6379");
        }
        let err = AppConfig::from_env().unwrap_err();
        assert!(err.to_string().contains("TOKEN_CACHE_SECRET"));
        unsafe {
            env::remove_var("REDIS_URL");
        }
    }

    #[test]
    #[serial]
    fn ttl_overrides_are_read() {
        set_base_env();
        unsafe {
            env::set_var("AUTH_DATA_TTL_SECS", "60");
        }
        let cfg = AppConfig::from_env().unwrap();
        assert_eq!(cfg.auth_data_ttl, Duration::from_secs(60));
        unsafe {
            env::remove_var("AUTH_DATA_TTL_SECS");
        }
    }

    #[test]
    #[serial]
    fn login_page_url_is_base_plus_login() {
        set_base_env();
        let cfg = AppConfig::from_env().unwrap();
        assert_eq!(cfg.login_page_url().as_str(), "https://login.example.org/login");
    }
}
