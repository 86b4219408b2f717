//! Integration tests for bot token verification against a mocked Bot API
//!
//! Run with: cargo test --test token_verifier_test

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{method, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

use propusk::telegram::{
    BotApiClient, BotTokenVerifier, MemoryVerificationCache, VerificationCache, VerifyOptions,
};
use propusk::AuthError;

const TOKEN: &str = "7654321:AAHk3yustakzPjTGJCkLvCQzLRvRooqWXY0";

fn verifier_for(server: &MockServer, cache: Arc<MemoryVerificationCache>) -> BotTokenVerifier {
    let api =
        BotApiClient::new(server.uri().parse().unwrap(), Duration::from_millis(250)).unwrap();
    BotTokenVerifier::new(api, cache, Duration::from_secs(1))
}

async fn mount_get_me(server: &MockServer, status: u16, body: serde_json::Value, calls: u64) {
    Mock::given(method("GET"))
        .and(path_regex("^/bot[^/]+/getMe$"))
        .respond_with(ResponseTemplate::new(status).set_body_json(body))
        .expect(calls)
        .mount(server)
        .await;
}

fn get_me_ok_body() -> serde_json::Value {
    json!({
        "ok": true,
        "result": {
            "id": 7654321,
            "is_bot": true,
            "first_name": "Example Login Bot",
            "username": "example_login_bot"
        }
    })
}

#[tokio::test]
async fn positive_verdict_is_cached() {
    let server = MockServer::start().await;
    mount_get_me(&server, 200, get_me_ok_body(), 1).await;
    let verifier = verifier_for(&server, Arc::new(MemoryVerificationCache::new(Duration::from_secs(60))));

    let fresh = verifier.verify(TOKEN, VerifyOptions::default()).await.unwrap();
    assert_eq!(fresh.id, 7654321);
    assert_eq!(fresh.username, "example_login_bot");

    // The cache write is detached; give it a moment to land.
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Second call is answered from the cache: only the id survives.
    let cached = verifier.verify(TOKEN, VerifyOptions::default()).await.unwrap();
    assert_eq!(cached.id, 7654321);
    assert_eq!(cached.username, "");
}

#[tokio::test]
async fn negative_verdict_is_cached() {
    let server = MockServer::start().await;
    mount_get_me(&server, 401, json!({ "ok": false, "error_code": 401 }), 1).await;
    let verifier = verifier_for(&server, Arc::new(MemoryVerificationCache::new(Duration::from_secs(60))));

    assert!(matches!(
        verifier.verify(TOKEN, VerifyOptions::default()).await,
        Err(AuthError::TokenInvalid)
    ));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(matches!(
        verifier.verify(TOKEN, VerifyOptions::default()).await,
        Err(AuthError::TokenInvalid)
    ));
}

#[tokio::test]
async fn skip_cache_read_always_asks_the_api() {
    let server = MockServer::start().await;
    mount_get_me(&server, 401, json!({ "ok": false, "error_code": 401 }), 1).await;

    let cache = Arc::new(MemoryVerificationCache::new(Duration::from_secs(60)));
    // A stale positive verdict sits in the cache; a reader that skips
    // it must see the current rejection.
    cache.store_token_status(TOKEN, true).await.unwrap();

    let verifier = verifier_for(&server, cache.clone());
    assert!(matches!(
        verifier.verify(TOKEN, VerifyOptions { skip_cache_read: true }).await,
        Err(AuthError::TokenInvalid)
    ));
}

#[tokio::test]
async fn transport_errors_are_never_a_verdict() {
    let server = MockServer::start().await;
    mount_get_me(&server, 502, json!({ "ok": false }), 2).await;
    let verifier = verifier_for(&server, Arc::new(MemoryVerificationCache::new(Duration::from_secs(60))));

    assert!(matches!(
        verifier.verify(TOKEN, VerifyOptions::default()).await,
        Err(AuthError::BadGateway("telegram"))
    ));
    // Nothing was cached: the second call reaches the API again.
    assert!(matches!(
        verifier.verify(TOKEN, VerifyOptions::default()).await,
        Err(AuthError::BadGateway("telegram"))
    ));
}

#[tokio::test]
async fn ok_false_answer_means_the_token_is_invalid() {
    let server = MockServer::start().await;
    mount_get_me(&server, 200, json!({ "ok": false }), 1).await;
    let verifier = verifier_for(&server, Arc::new(MemoryVerificationCache::new(Duration::from_secs(60))));

    assert!(matches!(
        verifier.verify(TOKEN, VerifyOptions::default()).await,
        Err(AuthError::TokenInvalid)
    ));
}

#[tokio::test]
async fn non_bot_identity_is_not_cached() {
    let server = MockServer::start().await;
    let body = json!({
        "ok": true,
        "result": { "id": 7654321, "is_bot": false, "first_name": "Some User" }
    });
    mount_get_me(&server, 200, body, 2).await;
    let verifier = verifier_for(&server, Arc::new(MemoryVerificationCache::new(Duration::from_secs(60))));

    assert!(matches!(
        verifier.verify(TOKEN, VerifyOptions::default()).await,
        Err(AuthError::Unexpected(_))
    ));
    assert!(matches!(
        verifier.verify(TOKEN, VerifyOptions::default()).await,
        Err(AuthError::Unexpected(_))
    ));
}

#[tokio::test]
async fn slow_api_answer_is_a_gateway_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path_regex("^/bot[^/]+/getMe$"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(get_me_ok_body())
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;
    let verifier = verifier_for(&server, Arc::new(MemoryVerificationCache::new(Duration::from_secs(60))));

    assert!(matches!(
        verifier.verify(TOKEN, VerifyOptions::default()).await,
        Err(AuthError::GatewayTimeout("telegram"))
    ));
}
