//! Bot token liveness verification
//!
//! A bot token is considered live when the Bot API `getMe` call answers
//! for it. Results are cached both ways (valid and invalid) so the
//! login page does not hammer the API; anything that needs certainty
//! passes `skip_cache_read` and pays for a fresh call.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use lazy_regex::regex_captures;
use redis::aio::MultiplexedConnection;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use sha2::Sha256;
use url::Url;

use crate::core::error::{AuthError, AuthResult};

type HmacSha256 = Hmac<Sha256>;

const REDIS_KEY_PREFIX: &str = "auth:token:";
const CACHE_VALID: &str = "1";
const CACHE_INVALID: &str = "0";

/// Minimal bot identity from a successful verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotInfo {
    pub id: i64,
    pub name: String,
    pub username: String,
}

impl BotInfo {
    /// Identity known without a network call: the id is the token prefix.
    fn minimal(id: i64) -> Self {
        Self { id, name: String::new(), username: String::new() }
    }
}

/// Options for a single verification call.
#[derive(Debug, Clone, Copy, Default)]
pub struct VerifyOptions {
    /// Bypass the cache lookup and always ask the Bot API. Cache writes
    /// still happen. Used whenever staleness is unacceptable.
    pub skip_cache_read: bool,
}

/// Cached verification outcomes. `None` is a miss.
#[async_trait]
pub trait VerificationCache: Send + Sync {
    async fn token_status(&self, token: &str) -> AuthResult<Option<bool>>;
    async fn store_token_status(&self, token: &str, valid: bool) -> AuthResult<()>;
}

/// Redis-backed cache. Keys are an HMAC of the token under a deploy
/// secret, so raw bot tokens never reach the shared store.
pub struct RedisVerificationCache {
    conn: MultiplexedConnection,
    secret: SecretString,
    ttl: Duration,
}

impl RedisVerificationCache {
    pub fn new(conn: MultiplexedConnection, secret: SecretString, ttl: Duration) -> Self {
        Self { conn, secret, ttl }
    }

    fn key_for(&self, token: &str) -> AuthResult<String> {
        derive_cache_key(self.secret.expose_secret(), token)
    }
}

#[async_trait]
impl VerificationCache for RedisVerificationCache {
    async fn token_status(&self, token: &str) -> AuthResult<Option<bool>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = redis::cmd("GET")
            .arg(self.key_for(token)?)
            .query_async(&mut conn)
            .await?;
        Ok(value.map(|v| v == CACHE_VALID))
    }

    async fn store_token_status(&self, token: &str, valid: bool) -> AuthResult<()> {
        let mut conn = self.conn.clone();
        let value = if valid { CACHE_VALID } else { CACHE_INVALID };
        redis::cmd("SET")
            .arg(self.key_for(token)?)
            .arg(value)
            .arg("EX")
            .arg(self.ttl.as_secs().max(1))
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }
}

fn derive_cache_key(secret: &str, token: &str) -> AuthResult<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| AuthError::Unexpected("HMAC key setup failed".to_string()))?;
    mac.update(token.as_bytes());
    Ok(format!("{REDIS_KEY_PREFIX}{}", hex::encode(mac.finalize().into_bytes())))
}

/// In-process cache for tests and single-instance runs.
pub struct MemoryVerificationCache {
    cache: moka::future::Cache<String, bool>,
}

impl MemoryVerificationCache {
    pub fn new(ttl: Duration) -> Self {
        let cache = moka::future::Cache::builder()
            .max_capacity(10_000)
            .time_to_live(ttl)
            .build();
        Self { cache }
    }
}

#[async_trait]
impl VerificationCache for MemoryVerificationCache {
    async fn token_status(&self, token: &str) -> AuthResult<Option<bool>> {
        Ok(self.cache.get(token).await)
    }

    async fn store_token_status(&self, token: &str, valid: bool) -> AuthResult<()> {
        self.cache.insert(token.to_string(), valid).await;
        Ok(())
    }
}

/// Thin Bot API client; the verifier only needs `getMe`.
pub struct BotApiClient {
    http: reqwest::Client,
    base: Url,
}

impl BotApiClient {
    pub fn new(base: Url, timeout: Duration) -> AuthResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuthError::Unexpected(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http, base })
    }

    /// Ask the Bot API who this token belongs to.
    ///
    /// 401/404 mean the token is definitively rejected; server-side
    /// failures and timeouts are transport errors, never a verdict.
    pub async fn get_me(&self, token: &str) -> AuthResult<BotInfo> {
        let url = self.method_url(token, "getMe")?;
        let resp = match self.http.get(url).send().await {
            Ok(resp) => resp,
            Err(e) if e.is_timeout() => return Err(AuthError::GatewayTimeout("telegram")),
            Err(_) => return Err(AuthError::BadGateway("telegram")),
        };

        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::NOT_FOUND {
            return Err(AuthError::TokenInvalid);
        }
        if status.is_server_error() {
            return Err(AuthError::BadGateway("telegram"));
        }
        if !status.is_success() {
            return Err(AuthError::Unexpected(format!("telegram answered {status}")));
        }

        let body: GetMeResponse = resp.json().await.map_err(|e| {
            if e.is_timeout() {
                AuthError::GatewayTimeout("telegram")
            } else {
                AuthError::Unexpected(format!("telegram answered with an unreadable body: {e}"))
            }
        })?;
        if !body.ok {
            return Err(AuthError::TokenInvalid);
        }
        let me = body
            .result
            .ok_or_else(|| AuthError::Unexpected("getMe answer has no result".to_string()))?;
        if !me.is_bot {
            return Err(AuthError::Unexpected("token does not belong to a bot".to_string()));
        }

        Ok(BotInfo {
            id: me.id,
            name: me.first_name,
            username: me.username.unwrap_or_default(),
        })
    }

    fn method_url(&self, token: &str, method: &str) -> AuthResult<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| AuthError::Unexpected("telegram api url cannot be a base".to_string()))?
            .pop_if_empty()
            .push(&format!("bot{token}"))
            .push(method);
        Ok(url)
    }
}

#[derive(Deserialize)]
struct GetMeResponse {
    ok: bool,
    #[serde(default)]
    result: Option<GetMeUser>,
}

#[derive(Deserialize)]
struct GetMeUser {
    id: i64,
    is_bot: bool,
    first_name: String,
    #[serde(default)]
    username: Option<String>,
}

/// Verifies bot tokens, consulting the cache first unless told not to.
pub struct BotTokenVerifier {
    api: BotApiClient,
    cache: Arc<dyn VerificationCache>,
    cache_write_timeout: Duration,
}

impl BotTokenVerifier {
    pub fn new(
        api: BotApiClient,
        cache: Arc<dyn VerificationCache>,
        cache_write_timeout: Duration,
    ) -> Self {
        Self { api, cache, cache_write_timeout }
    }

    /// Check that `token` is currently accepted by Telegram.
    ///
    /// The cache answers first unless `skip_cache_read`; a cached
    /// verdict never costs a network call. Then the syntax gate:
    /// violations are `TokenMalformed` and recorded in the cache as
    /// invalid, so repeat lookups degrade to the generic `TokenInvalid`.
    /// Only well-formed, uncached tokens reach `getMe`. Cache writes
    /// never delay or fail the call.
    pub async fn verify(&self, token: &str, opts: VerifyOptions) -> AuthResult<BotInfo> {
        if !opts.skip_cache_read {
            match self.cache.token_status(token).await {
                // The cache stores no identity; the token prefix does.
                Ok(Some(true)) => {
                    if let Some(bot_id) = token_bot_id(token) {
                        return Ok(BotInfo::minimal(bot_id));
                    }
                }
                Ok(Some(false)) => return Err(AuthError::TokenInvalid),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "token cache read failed, asking the API instead");
                }
            }
        }

        if token_bot_id(token).is_none() {
            self.spawn_cache_write(token, false);
            return Err(AuthError::TokenMalformed);
        }

        match self.api.get_me(token).await {
            Ok(info) => {
                self.spawn_cache_write(token, true);
                Ok(info)
            }
            Err(AuthError::TokenInvalid) => {
                self.spawn_cache_write(token, false);
                Err(AuthError::TokenInvalid)
            }
            Err(other) => Err(other),
        }
    }

    fn spawn_cache_write(&self, token: &str, valid: bool) {
        let cache = Arc::clone(&self.cache);
        let token = token.to_string();
        let deadline = self.cache_write_timeout;
        tokio::spawn(async move {
            match tokio::time::timeout(deadline, cache.store_token_status(&token, valid)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "failed to record token verification in cache");
                }
                Err(_) => tracing::warn!("token verification cache write timed out"),
            }
        });
    }
}

/// Syntax gate: `<positive integer>:<non-empty suffix>`. Returns the
/// bot id encoded in the prefix.
fn token_bot_id(token: &str) -> Option<i64> {
    let (_, id, _) = regex_captures!(r"^(\d+):(\S+)$", token)?;
    let id = id.parse::<i64>().ok()?;
    (id > 0).then_some(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn token_syntax_gate() {
        assert_eq!(token_bot_id("5432109876:AAF0k3yu"), Some(5_432_109_876));
        assert_eq!(token_bot_id(""), None);
        assert_eq!(token_bot_id("justtext"), None);
        assert_eq!(token_bot_id("5432109876"), None);
        assert_eq!(token_bot_id("5432109876:"), None);
        assert_eq!(token_bot_id(":AAF0k3yu"), None);
        assert_eq!(token_bot_id("0:AAF0k3yu"), None);
        assert_eq!(token_bot_id("54321:with space"), None);
    }

    #[test]
    fn cache_keys_hide_the_token() {
        let a = derive_cache_key("deploy-secret", "5432109876:AAF0k3yu").unwrap();
        let b = derive_cache_key("deploy-secret", "5432109876:AAF0k3yu").unwrap();
        let c = derive_cache_key("deploy-secret", "5432109876:other").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with(REDIS_KEY_PREFIX));
        assert!(!a.contains("AAF0k3yu"));
    }

    #[tokio::test]
    async fn memory_cache_remembers_both_verdicts_until_ttl() {
        let cache = MemoryVerificationCache::new(Duration::from_millis(30));
        cache.store_token_status("t1", true).await.unwrap();
        cache.store_token_status("t2", false).await.unwrap();
        assert_eq!(cache.token_status("t1").await.unwrap(), Some(true));
        assert_eq!(cache.token_status("t2").await.unwrap(), Some(false));
        assert_eq!(cache.token_status("t3").await.unwrap(), None);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(cache.token_status("t1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn malformed_token_is_cached_invalid_without_a_network_call() {
        let cache = Arc::new(MemoryVerificationCache::new(Duration::from_secs(60)));
        // Port 9 refuses connections; any API attempt would surface as
        // BadGateway, not a token verdict.
        let api = BotApiClient::new(
            Url::parse("http://127.0.0.1:9").unwrap(),
            Duration::from_millis(200),
        )
        .unwrap();
        let verifier = BotTokenVerifier::new(api, cache.clone(), Duration::from_secs(1));

        assert!(matches!(
            verifier.verify("not-a-token", VerifyOptions::default()).await,
            Err(AuthError::TokenMalformed)
        ));

        // The negative verdict lands behind the call.
        let mut cached = None;
        for _ in 0..50 {
            cached = cache.token_status("not-a-token").await.unwrap();
            if cached.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(cached, Some(false));

        // Served from the cache now, as the generic invalid kind.
        assert!(matches!(
            verifier.verify("not-a-token", VerifyOptions::default()).await,
            Err(AuthError::TokenInvalid)
        ));

        // Bypassing the cache re-runs the syntax gate and keeps the
        // precise kind.
        let opts = VerifyOptions { skip_cache_read: true };
        assert!(matches!(
            verifier.verify("not-a-token", opts).await,
            Err(AuthError::TokenMalformed)
        ));
    }
}
