//! HTTP transport for the login flow
//!
//! Routes:
//!   GET /login            - resolve a challenge: redirect or login page
//!   GET /widget/callback  - login widget redirect target
//!   GET /miniapp/callback - mini-app init data submission
//!   GET /health           - liveness probe
//!
//! Handlers only translate between HTTP and the resolver; every
//! decision lives in `login::resolver`.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use anyhow::Context;
use axum::extract::{ConnectInfo, Query, Request, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::Instrument;
use url::Url;
use uuid::Uuid;

use crate::core::error::AuthError;
use crate::login::{CallbackContext, CallbackPayload, LoginOutcome, LoginResolver, rejection_for};

#[derive(Clone)]
struct WebState {
    resolver: Arc<LoginResolver>,
}

/// Run the HTTP server until SIGINT or SIGTERM.
pub async fn serve(addr: SocketAddr, resolver: Arc<LoginResolver>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, "http server listening");

    axum::serve(listener, router(resolver).into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server failed")?;
    Ok(())
}

pub fn router(resolver: Arc<LoginResolver>) -> Router {
    Router::new()
        .route("/login", get(login_page))
        .route("/widget/callback", get(widget_callback))
        .route("/miniapp/callback", get(miniapp_callback))
        .route("/health", get(health))
        .layer(middleware::from_fn(request_id))
        .layer(TraceLayer::new_for_http())
        .with_state(WebState { resolver })
}

/// GET /login — entry point hydra redirects the browser to.
async fn login_page(
    State(state): State<WebState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let challenge = params.get("login_challenge").cloned().unwrap_or_default();
    match state.resolver.resolve_challenge(&challenge).await {
        Ok(LoginOutcome::Redirect(url)) => found(&url),
        Ok(LoginOutcome::Render { widget_uri, miniapp_callback_uri }) => {
            Html(render_login_page(&widget_uri, &miniapp_callback_uri)).into_response()
        }
        Err(e) => error_response(&e),
    }
}

/// GET /widget/callback — Telegram redirects here with the signed
/// fields in the query string.
async fn widget_callback(
    State(state): State<WebState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(mut params): Query<HashMap<String, String>>,
) -> Response {
    let challenge = params.remove("login_challenge").unwrap_or_default();
    let ctx = CallbackContext {
        challenge,
        payload: CallbackPayload::Widget(params),
        ip: client_ip(&headers, peer),
        user_agent: header_value(&headers, header::USER_AGENT),
        accept_language: accept_language(&headers),
    };
    complete(&state, &ctx).await
}

#[derive(Deserialize)]
struct MiniAppQuery {
    #[serde(default)]
    login_challenge: String,
    #[serde(default)]
    init_data: String,
}

/// GET /miniapp/callback — the login page script submits the web
/// view's init data here.
async fn miniapp_callback(
    State(state): State<WebState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(query): Query<MiniAppQuery>,
) -> Response {
    let ctx = CallbackContext {
        challenge: query.login_challenge,
        payload: CallbackPayload::MiniApp(query.init_data),
        ip: client_ip(&headers, peer),
        user_agent: header_value(&headers, header::USER_AGENT),
        accept_language: accept_language(&headers),
    };
    complete(&state, &ctx).await
}

async fn complete(state: &WebState, ctx: &CallbackContext) -> Response {
    match state.resolver.complete_login(ctx).await {
        Ok(LoginOutcome::Redirect(url)) => found(&url),
        Ok(LoginOutcome::Render { .. }) => {
            error_response(&AuthError::Unexpected("callback produced no redirect".to_string()))
        }
        Err(e) => error_response(&e),
    }
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// Tag every request with an id, in logs and on the response.
async fn request_id(request: Request, next: Next) -> Response {
    let id = Uuid::new_v4().to_string();
    let span = tracing::info_span!("request", request_id = %id);
    let mut response = next.run(request).instrument(span).await;
    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

/// 302 with a Location header. The OAuth2 flow expects a plain Found,
/// not the 303/307 variants axum's `Redirect` offers.
fn found(url: &Url) -> Response {
    let mut response = StatusCode::FOUND.into_response();
    if let Ok(value) = HeaderValue::from_str(url.as_str()) {
        response.headers_mut().insert(header::LOCATION, value);
    }
    response
}

fn error_response(err: &AuthError) -> Response {
    let rejection = rejection_for(err);
    let status = StatusCode::from_u16(rejection.status_code as u16)
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Html(render_error_page(status, rejection.description))).into_response()
}

fn client_ip(headers: &HeaderMap, peer: SocketAddr) -> IpAddr {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|v| v.trim().parse::<IpAddr>().ok())
        .unwrap_or_else(|| peer.ip())
}

fn header_value(headers: &HeaderMap, name: header::HeaderName) -> Option<String> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_string)
}

/// First language tag of Accept-Language, without its quality weight.
fn accept_language(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(header::ACCEPT_LANGUAGE)?.to_str().ok()?;
    let first = raw.split(',').next()?.split(';').next()?.trim();
    (!first.is_empty() && first != "*").then(|| first.to_string())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => tracing::error!(error = %e, "failed to listen for SIGTERM"),
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
    tracing::info!("shutdown signal received");
}

/// The login page offers the widget flow as a link and, inside a
/// Telegram web view, forwards the init data to the mini-app callback.
fn render_login_page(widget_uri: &Url, miniapp_callback_uri: &Url) -> String {
    let widget = html_escape(widget_uri.as_str());
    let miniapp = html_escape(miniapp_callback_uri.as_str());

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>Sign in with Telegram</title>
<style>
*{{box-sizing:border-box;margin:0;padding:0}}
body{{background:#17212b;min-height:100vh;display:flex;justify-content:center;align-items:center;font-family:-apple-system,BlinkMacSystemFont,'Segoe UI',sans-serif;padding:20px}}
.card{{background:#1f2936;border-radius:16px;padding:40px 32px;max-width:360px;width:100%;text-align:center;color:#fff;box-shadow:0 8px 40px rgba(0,0,0,.4)}}
h1{{font-size:1.25rem;font-weight:600;margin-bottom:8px}}
p{{color:rgba(255,255,255,.6);font-size:.9rem;margin-bottom:28px;line-height:1.4}}
.btn{{display:inline-block;background:#2ea6da;color:#fff;padding:12px 28px;border-radius:50px;text-decoration:none;font-weight:600;font-size:.95rem;transition:opacity .15s}}
.btn:hover{{opacity:.85}}
</style>
</head>
<body data-miniapp-callback="{miniapp}">
<div class="card">
<h1>Sign in with Telegram</h1>
<p>Continue to the application with your Telegram account.</p>
<a class="btn" href="{widget}">Log in with Telegram</a>
</div>
<script src="https://telegram.org/js/telegram-web-app.js"></script>
<script>
(function () {{
  var tg = window.Telegram && window.Telegram.WebApp;
  if (!tg || !tg.initData) {{ return; }}
  var callback = document.body.dataset.miniappCallback;
  window.location.replace(callback + "&init_data=" + encodeURIComponent(tg.initData));
}})();
</script>
</body>
</html>"#
    )
}

fn render_error_page(status: StatusCode, description: &str) -> String {
    let code = status.as_u16();
    let description = html_escape(description);

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>Sign-in failed</title>
<style>
*{{box-sizing:border-box;margin:0;padding:0}}
body{{background:#17212b;min-height:100vh;display:flex;justify-content:center;align-items:center;font-family:-apple-system,BlinkMacSystemFont,'Segoe UI',sans-serif;padding:20px}}
.card{{background:#1f2936;border-radius:16px;padding:40px 32px;max-width:360px;width:100%;text-align:center;color:#fff}}
h1{{font-size:2.5rem;font-weight:700;margin-bottom:8px;color:#e85c5c}}
p{{color:rgba(255,255,255,.6);font-size:.9rem;line-height:1.4}}
</style>
</head>
<body>
<div class="card">
<h1>{code}</h1>
<p>{description}</p>
</div>
</body>
</html>"#
    )
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}
