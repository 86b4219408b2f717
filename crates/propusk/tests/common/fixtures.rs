//! Test fixtures for the login flow tests
//!
//! Provides a TestEnvironment wiring the real resolver against mocked
//! upstreams: a wiremock hydra admin API, a wiremock Bot API and the
//! in-memory store and caches.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use url::Url;
use wiremock::matchers::{body_partial_json, method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use propusk::hydra::HydraClient;
use propusk::login::{CallbackContext, CallbackPayload, LoginResolver, ResolverConfig};
use propusk::storage::{AuthStore, Bot, LoginUpdate, MemoryStore};
use propusk::telegram::auth_data::canonical_raw;
use propusk::telegram::{
    hash, BotApiClient, BotTokenVerifier, MemoryReplayGuard, MemoryVerificationCache,
};

pub const BOT_ID: i64 = 7_654_321;
pub const BOT_TOKEN: &str = "7654321:AAHk3yustakzPjTGJCkLvCQzLRvRooqWXY0";
pub const CLIENT_ID: &str = "relying-party-web";

/// Real resolver, mocked upstreams.
pub struct TestEnvironment {
    /// Mock hydra admin API
    pub hydra: MockServer,
    /// Mock Telegram Bot API
    pub telegram: MockServer,
    /// Handle on the store the resolver uses, for assertions
    pub store: MemoryStore,
    pub resolver: Arc<LoginResolver>,
}

impl TestEnvironment {
    pub async fn new() -> Self {
        let hydra = MockServer::start().await;
        let telegram = MockServer::start().await;

        let store = MemoryStore::new();
        store.add_bot(Bot {
            id: BOT_ID,
            client_id: CLIENT_ID.to_string(),
            token: BOT_TOKEN.to_string(),
            name: "Example Login Bot".to_string(),
            username: "example_login_bot".to_string(),
        });

        let cfg = ResolverConfig {
            public_base_url: Url::parse("https://login.example.org").unwrap(),
            telegram_auth_url: Url::parse("https://oauth.telegram.org/auth").unwrap(),
            auth_data_ttl: Duration::from_secs(300),
            remember_for: 3600,
        };
        let hydra_client =
            HydraClient::new(hydra.uri().parse().unwrap(), Duration::from_secs(2)).unwrap();
        let api = BotApiClient::new(telegram.uri().parse().unwrap(), Duration::from_secs(2)).unwrap();
        let verifier = BotTokenVerifier::new(
            api,
            Arc::new(MemoryVerificationCache::new(Duration::from_secs(300))),
            Duration::from_secs(1),
        );
        let resolver = LoginResolver::new(
            cfg,
            hydra_client,
            Arc::new(store.clone()),
            Arc::new(MemoryReplayGuard::new(Duration::from_secs(300))),
            verifier,
        );

        Self { hydra, telegram, store, resolver: Arc::new(resolver) }
    }

    /// Seed a committed login record so skip logins have something to
    /// touch.
    pub async fn seed_login(&self, user_id: i64) {
        let mut tx = self.store.begin().await.unwrap();
        tx.upsert_login(
            user_id,
            BOT_ID,
            &LoginUpdate {
                ip: "198.51.100.7".parse().unwrap(),
                user_agent: Some("Mozilla/5.0".to_string()),
                language: Some("en".to_string()),
            },
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();
    }

    /// Mount the login-request fetch for `challenge`. An empty subject
    /// is what hydra sends for a first-time login.
    pub async fn mock_login_request(&self, challenge: &str, skip: bool, subject: &str) {
        self.mock_login_request_for_client(challenge, skip, subject, CLIENT_ID).await;
    }

    pub async fn mock_login_request_for_client(
        &self,
        challenge: &str,
        skip: bool,
        subject: &str,
        client_id: &str,
    ) {
        Mock::given(method("GET"))
            .and(path("/oauth2/auth/requests/login"))
            .and(query_param("login_challenge", challenge))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "challenge": challenge,
                "skip": skip,
                "subject": subject,
                "session_id": "session-1",
                "client": { "client_id": client_id },
                "request_url": "https://rp.example.org/oauth2/auth?client_id=relying-party-web"
            })))
            .mount(&self.hydra)
            .await;
    }

    /// Mount the accept endpoint and require exactly one call carrying
    /// `expected` (partial body match).
    pub async fn expect_accept(&self, redirect: &str, expected: serde_json::Value) {
        Mock::given(method("PUT"))
            .and(path("/oauth2/auth/requests/login/accept"))
            .and(body_partial_json(expected))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "redirect_to": redirect })),
            )
            .expect(1)
            .mount(&self.hydra)
            .await;
    }

    /// Mount the reject endpoint and require exactly one call carrying
    /// `expected` (partial body match).
    pub async fn expect_reject(&self, redirect: &str, expected: serde_json::Value) {
        Mock::given(method("PUT"))
            .and(path("/oauth2/auth/requests/login/reject"))
            .and(body_partial_json(expected))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "redirect_to": redirect })),
            )
            .expect(1)
            .mount(&self.hydra)
            .await;
    }

    /// Mount the session revocation endpoint and require exactly one
    /// call.
    pub async fn expect_revoke(&self) {
        Mock::given(method("DELETE"))
            .and(path("/oauth2/auth/sessions/login"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&self.hydra)
            .await;
    }

    /// Bot API getMe answering for our test bot.
    pub async fn mock_get_me_ok(&self) {
        Mock::given(method("GET"))
            .and(path_regex("^/bot[^/]+/getMe$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "result": {
                    "id": BOT_ID,
                    "is_bot": true,
                    "first_name": "Example Login Bot",
                    "username": "example_login_bot"
                }
            })))
            .mount(&self.telegram)
            .await;
    }

    /// Bot API getMe answering with an arbitrary status and body.
    pub async fn mock_get_me_status(&self, status: u16, body: serde_json::Value) {
        Mock::given(method("GET"))
            .and(path_regex("^/bot[^/]+/getMe$"))
            .respond_with(ResponseTemplate::new(status).set_body_json(body))
            .mount(&self.telegram)
            .await;
    }
}

/// Build a signed widget parameter map, the way the widget redirect
/// delivers it after the web layer stripped `login_challenge`.
pub fn signed_widget_params(entries: Vec<(&'static str, String)>) -> HashMap<String, String> {
    let raw = canonical_raw(entries.iter().map(|(k, v)| (k.to_string(), v.clone())));
    let signature = hash::sign(&raw, BOT_TOKEN).unwrap();
    let mut params: HashMap<String, String> =
        entries.into_iter().map(|(k, v)| (k.to_string(), v)).collect();
    params.insert("hash".to_string(), signature);
    params
}

/// Standard widget payload for `user_id`, signed with the test bot
/// token.
pub fn widget_payload(user_id: i64, first_name: &str, auth_date: i64) -> CallbackPayload {
    CallbackPayload::Widget(signed_widget_params(vec![
        ("id", user_id.to_string()),
        ("first_name", first_name.to_string()),
        ("username", "test_user".to_string()),
        ("auth_date", auth_date.to_string()),
    ]))
}

/// Build a signed mini-app init-data string around `user_json`.
pub fn signed_init_data(user_json: &str, auth_date: i64) -> String {
    let unsigned = format!(
        "auth_date={auth_date}&query_id=AAHdF6IQAAAAAN0XohDhrOrc&user={}",
        urlencoding::encode(user_json)
    );
    let signature = hash::sign(&unsigned, BOT_TOKEN).unwrap();
    format!("{unsigned}&hash={signature}")
}

/// Callback context the web layer would assemble for a request from
/// 203.0.113.9.
pub fn callback(challenge: &str, payload: CallbackPayload) -> CallbackContext {
    CallbackContext {
        challenge: challenge.to_string(),
        payload,
        ip: "203.0.113.9".parse().unwrap(),
        user_agent: Some("Mozilla/5.0 (X11; Linux x86_64)".to_string()),
        accept_language: Some("en-US".to_string()),
    }
}
