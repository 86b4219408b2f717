//! Login challenge resolution
//!
//! Drives a login challenge from first contact to a terminal decision.
//! The initial page hit either skips straight through on a remembered
//! session or describes the login UI; a signed callback verifies the
//! payload, persists the user and accepts the challenge. Every failure
//! that can still be answered is answered by rejecting the challenge,
//! so the browser always ends up back at the relying party.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use url::Url;

use crate::core::config::AppConfig;
use crate::core::error::{AuthError, AuthResult};
use crate::hydra::{HydraClient, LoginRequestInfo, RejectBody};
use crate::login::oauth2::rejection_for;
use crate::login::urls;
use crate::storage::{AuthStore, Bot, LoginUpdate, User};
use crate::telegram::auth_data::AuthData;
use crate::telegram::{BotTokenVerifier, ReplayGuard, VerifyOptions, hash, miniapp, widget};

const REJECT_HINT: &str = "authentication request was rejected";

/// What the transport layer does next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    /// Show the login page offering both providers.
    Render { widget_uri: Url, miniapp_callback_uri: Url },
    /// Follow the authorization server's redirect.
    Redirect(Url),
}

/// A signed payload as delivered by one of the two providers.
#[derive(Debug, Clone)]
pub enum CallbackPayload {
    /// Query pairs appended by the login widget redirect.
    Widget(HashMap<String, String>),
    /// The `initData` blob a mini app reads from its web view.
    MiniApp(String),
}

/// Everything a callback handler knows about the request.
#[derive(Debug, Clone)]
pub struct CallbackContext {
    pub challenge: String,
    pub payload: CallbackPayload,
    pub ip: IpAddr,
    pub user_agent: Option<String>,
    pub accept_language: Option<String>,
}

/// Resolver knobs lifted out of the application config, so tests can
/// build one without touching the environment.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub public_base_url: Url,
    pub telegram_auth_url: Url,
    pub auth_data_ttl: Duration,
    pub remember_for: u64,
}

impl From<&AppConfig> for ResolverConfig {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            public_base_url: cfg.public_base_url.clone(),
            telegram_auth_url: cfg.telegram_auth_url.clone(),
            auth_data_ttl: cfg.auth_data_ttl,
            remember_for: cfg.remember_for,
        }
    }
}

pub struct LoginResolver {
    hydra: HydraClient,
    store: Arc<dyn AuthStore>,
    replay: Arc<dyn ReplayGuard>,
    verifier: BotTokenVerifier,
    login_page_url: Url,
    cfg: ResolverConfig,
}

impl LoginResolver {
    pub fn new(
        cfg: ResolverConfig,
        hydra: HydraClient,
        store: Arc<dyn AuthStore>,
        replay: Arc<dyn ReplayGuard>,
        verifier: BotTokenVerifier,
    ) -> Self {
        let login_page_url = urls::with_path(&cfg.public_base_url, &["login"]);
        Self { hydra, store, replay, verifier, login_page_url, cfg }
    }

    /// Resolve the initial login page hit.
    ///
    /// Skips straight through to a redirect when the authorization
    /// server already trusts the session, otherwise yields the URIs the
    /// login page needs. A skip that cannot be honored falls back to
    /// the interactive UI rather than failing the flow.
    pub async fn resolve_challenge(&self, challenge: &str) -> AuthResult<LoginOutcome> {
        if challenge.is_empty() {
            return Err(AuthError::invalid_field("login", "challenge"));
        }

        let request = match self.hydra.get_login_request(challenge).await {
            Ok(request) => request,
            Err(e) => return self.reject(challenge, e).await,
        };

        let bot = match self.bot_for(&request).await {
            Ok(bot) => bot,
            Err(e) => return self.reject(challenge, e).await,
        };

        if let Err(e) = self.verify_bot_token(&bot.token).await {
            return self.reject(challenge, e).await;
        }

        if request.skip {
            match self.attempt_skip(&request, &bot).await {
                Ok(redirect) => return Ok(LoginOutcome::Redirect(redirect)),
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        login_challenge = challenge,
                        client_id = %request.client_id,
                        subject = request.subject.as_deref().unwrap_or(""),
                        "skip login failed, falling back to interactive login UI"
                    );
                }
            }
        }

        Ok(self.render_outcome(challenge, &bot))
    }

    /// Resolve a signed provider callback: verify the payload, persist
    /// the user and accept the challenge.
    pub async fn complete_login(&self, ctx: &CallbackContext) -> AuthResult<LoginOutcome> {
        if ctx.challenge.is_empty() {
            return Err(AuthError::invalid_field("login", "challenge"));
        }

        let request = match self.hydra.get_login_request(&ctx.challenge).await {
            Ok(request) => request,
            Err(e) => return self.reject(&ctx.challenge, e).await,
        };

        // A session the authorization server wants reaffirmed cannot be
        // completed by an interactive submission.
        if request.skip_required() {
            let reason = AuthError::Unexpected(
                "login request must be skipped, not completed interactively".to_string(),
            );
            return self.reject(&ctx.challenge, reason).await;
        }

        let auth_data = match self.parse_payload(&ctx.payload) {
            Ok(data) if data.is_expired(self.cfg.auth_data_ttl) => {
                let reason =
                    AuthError::InvalidAuthData("authentication data has expired".to_string());
                return self.reject(&ctx.challenge, reason).await;
            }
            Ok(data) => data,
            Err(e) => return self.reject(&ctx.challenge, e).await,
        };

        let user_id = match self.authenticate(&request, &auth_data, ctx).await {
            Ok(user_id) => user_id,
            Err(e) => return self.reject(&ctx.challenge, e).await,
        };

        let accepted = self
            .hydra
            .accept_login_request(&ctx.challenge, &user_id.to_string(), false, self.cfg.remember_for)
            .await;
        match accepted {
            Ok(redirect) => Ok(LoginOutcome::Redirect(redirect)),
            Err(e) => self.reject(&ctx.challenge, e).await,
        }
    }

    /// Verify, consume and persist a signed payload. The transaction
    /// covers only local storage; dropping it on any failure rolls the
    /// upserts back. Returns the authenticated user id.
    async fn authenticate(
        &self,
        request: &LoginRequestInfo,
        auth_data: &AuthData,
        ctx: &CallbackContext,
    ) -> AuthResult<i64> {
        let mut tx = self.store.begin().await?;

        let bot = tx
            .bot_by_client_id(&request.client_id)
            .await?
            .ok_or_else(|| AuthError::not_found("client", &request.client_id))?;

        hash::verify(&auth_data.raw, &auth_data.hash, &bot.token)?;
        self.replay.check_and_mark_used(&auth_data.hash).await?;

        let user = tx.upsert_user(&User::from(&auth_data.user)).await?;
        let update = LoginUpdate {
            ip: ctx.ip,
            user_agent: ctx.user_agent.clone(),
            language: auth_data
                .user
                .language_code
                .clone()
                .or_else(|| ctx.accept_language.clone()),
        };
        tx.upsert_login(user.id, bot.id, &update).await?;
        tx.commit().await?;

        Ok(user.id)
    }

    /// Reaffirm a remembered session: touch the login record and accept
    /// with `remember = true`. When the session turns out stale, drop
    /// it from the authorization server before reporting failure.
    async fn attempt_skip(&self, request: &LoginRequestInfo, bot: &Bot) -> AuthResult<Url> {
        let subject = request.subject.as_deref().unwrap_or_default();
        let user_id = match parse_subject(subject) {
            Ok(user_id) => user_id,
            Err(e) => {
                self.revoke_stale_session(subject).await;
                return Err(e);
            }
        };

        if let Err(e) = self.touch_last_login(user_id, bot.id).await {
            if matches!(e, AuthError::ObjectNotFound { .. }) {
                self.revoke_stale_session(subject).await;
            }
            return Err(e);
        }

        self.hydra
            .accept_login_request(&request.challenge, subject, true, self.cfg.remember_for)
            .await
    }

    async fn touch_last_login(&self, user_id: i64, bot_id: i64) -> AuthResult<()> {
        let mut tx = self.store.begin().await?;
        tx.touch_login(user_id, bot_id).await?;
        tx.commit().await
    }

    /// Best effort: a failure here only costs the user one extra
    /// interactive login.
    async fn revoke_stale_session(&self, subject: &str) {
        if subject.is_empty() {
            return;
        }
        if let Err(e) = self.hydra.revoke_login_session(subject).await {
            tracing::warn!(error = %e, subject, "failed to revoke stale login session");
        }
    }

    async fn bot_for(&self, request: &LoginRequestInfo) -> AuthResult<Bot> {
        let mut tx = self.store.begin().await?;
        tx.bot_by_client_id(&request.client_id)
            .await?
            .ok_or_else(|| AuthError::not_found("client", &request.client_id))
    }

    /// Token problems keep their kind for the unauthorized_client
    /// mapping; anything else collapses to `Unexpected` so the caller
    /// rejects with server_error.
    async fn verify_bot_token(&self, token: &str) -> AuthResult<()> {
        let opts = VerifyOptions { skip_cache_read: true };
        match self.verifier.verify(token, opts).await {
            Ok(_) => Ok(()),
            Err(e @ (AuthError::TokenMalformed | AuthError::TokenInvalid)) => Err(e),
            Err(e) => Err(AuthError::Unexpected(format!("bot token verification failed: {e}"))),
        }
    }

    fn parse_payload(&self, payload: &CallbackPayload) -> AuthResult<AuthData> {
        match payload {
            CallbackPayload::Widget(fields) => widget::parse(fields),
            CallbackPayload::MiniApp(init_data) => miniapp::parse(init_data),
        }
    }

    fn render_outcome(&self, challenge: &str, bot: &Bot) -> LoginOutcome {
        let return_to = urls::widget_callback_uri(&self.cfg.public_base_url, challenge);
        LoginOutcome::Render {
            widget_uri: urls::widget_uri(
                &self.cfg.telegram_auth_url,
                bot.id,
                &self.login_page_url,
                &return_to,
            ),
            miniapp_callback_uri: urls::miniapp_callback_uri(&self.cfg.public_base_url, challenge),
        }
    }

    /// Translate the failure for the authorization server and follow
    /// its redirect. The reject call failing is the one path where the
    /// transport layer sees an error instead of a redirect.
    async fn reject(&self, challenge: &str, reason: AuthError) -> AuthResult<LoginOutcome> {
        tracing::warn!(
            error = %reason,
            login_challenge = challenge,
            "login resolution failed, rejecting the login request"
        );

        let rejection = rejection_for(&reason);
        let body = RejectBody {
            error: rejection.error.to_string(),
            error_description: rejection.description.to_string(),
            error_hint: REJECT_HINT.to_string(),
            error_debug: reason.to_string(),
            status_code: rejection.status_code,
        };

        match self.hydra.reject_login_request(challenge, &body).await {
            Ok(redirect) => Ok(LoginOutcome::Redirect(redirect)),
            Err(e) => {
                tracing::error!(
                    error = %e,
                    login_challenge = challenge,
                    "failed to reject the login request"
                );
                Err(e)
            }
        }
    }
}

/// The subject must be the decimal Telegram user id a past login
/// stored. Anything else means the remembered session is not ours.
fn parse_subject(subject: &str) -> AuthResult<i64> {
    if subject.is_empty() {
        return Err(AuthError::ObjectInvalid {
            object: "login",
            field: "subject",
            reason: Some("empty".to_string()),
        });
    }
    subject
        .parse::<i64>()
        .ok()
        .filter(|id| *id > 0)
        .ok_or_else(|| AuthError::invalid_field("login", "subject"))
}
