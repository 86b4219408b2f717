//! ORY Hydra admin API client, login flow subset
//!
//! Speaks the v1 admin REST endpoints: fetch a login request by its
//! challenge, accept or reject it, and revoke a subject's login
//! session. Accept and reject both answer with the redirect URI that
//! ends the browser round trip.

use std::time::Duration;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::core::error::{AuthError, AuthResult};

/// A pending login request as hydra describes it.
#[derive(Debug, Clone)]
pub struct LoginRequestInfo {
    pub challenge: String,
    /// OAuth2 client that started the flow; the bot is looked up by it.
    pub client_id: String,
    /// Previously authenticated subject, if hydra has a session. An
    /// empty string on the wire is normalized to `None`.
    pub subject: Option<String>,
    pub session_id: String,
    /// Hydra asks us to skip the login UI and reaffirm the session.
    pub skip: bool,
    pub request_url: Option<Url>,
}

impl LoginRequestInfo {
    /// True when hydra wants the session reaffirmed without showing UI.
    pub fn skip_required(&self) -> bool {
        self.skip && self.subject.is_some()
    }
}

/// Body of the reject-login admin call.
#[derive(Debug, Clone, Serialize)]
pub struct RejectBody {
    pub error: String,
    pub error_description: String,
    pub error_hint: String,
    pub error_debug: String,
    pub status_code: i64,
}

#[derive(Serialize)]
struct AcceptBody<'a> {
    subject: &'a str,
    remember: bool,
    remember_for: u64,
}

#[derive(Deserialize)]
struct LoginRequestWire {
    challenge: String,
    #[serde(default)]
    skip: bool,
    #[serde(default)]
    subject: String,
    #[serde(default)]
    session_id: Option<String>,
    client: ClientWire,
    #[serde(default)]
    request_url: Option<String>,
}

#[derive(Deserialize)]
struct ClientWire {
    #[serde(default)]
    client_id: Option<String>,
}

#[derive(Deserialize)]
struct CompletedWire {
    redirect_to: String,
}

pub struct HydraClient {
    http: reqwest::Client,
    admin_base: Url,
}

impl HydraClient {
    pub fn new(admin_base: Url, timeout: Duration) -> AuthResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuthError::Unexpected(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http, admin_base })
    }

    pub async fn get_login_request(&self, challenge: &str) -> AuthResult<LoginRequestInfo> {
        let url = self.login_endpoint(&[], challenge)?;
        let resp = self.http.get(url).send().await.map_err(transport_error)?;
        let wire: LoginRequestWire = read_body(check_status(resp)?).await?;

        let client_id = wire
            .client
            .client_id
            .ok_or_else(|| AuthError::Unexpected("login request has no client id".to_string()))?;
        let session_id = wire
            .session_id
            .ok_or_else(|| AuthError::Unexpected("login request has no session id".to_string()))?;
        let subject = Some(wire.subject).filter(|s| !s.is_empty());
        let request_url = wire.request_url.as_deref().and_then(|u| Url::parse(u).ok());

        Ok(LoginRequestInfo {
            challenge: wire.challenge,
            client_id,
            subject,
            session_id,
            skip: wire.skip,
            request_url,
        })
    }

    /// Accept the login request for `subject` and return the redirect
    /// URI that resumes the OAuth2 flow.
    pub async fn accept_login_request(
        &self,
        challenge: &str,
        subject: &str,
        remember: bool,
        remember_for: u64,
    ) -> AuthResult<Url> {
        let url = self.login_endpoint(&["accept"], challenge)?;
        let body = AcceptBody { subject, remember, remember_for };
        let resp = self.http.put(url).json(&body).send().await.map_err(transport_error)?;
        completed_redirect(resp).await
    }

    /// Reject the login request and return the redirect URI that
    /// carries the error back to the relying party.
    pub async fn reject_login_request(
        &self,
        challenge: &str,
        body: &RejectBody,
    ) -> AuthResult<Url> {
        let url = self.login_endpoint(&["reject"], challenge)?;
        let resp = self.http.put(url).json(body).send().await.map_err(transport_error)?;
        completed_redirect(resp).await
    }

    /// Drop hydra's remembered login session for `subject`. A missing
    /// session is treated as already revoked.
    pub async fn revoke_login_session(&self, subject: &str) -> AuthResult<()> {
        let mut url = self.endpoint(&["oauth2", "auth", "sessions", "login"])?;
        url.query_pairs_mut().append_pair("subject", subject);
        let resp = self.http.delete(url).send().await.map_err(transport_error)?;

        let status = resp.status();
        if status.is_server_error() {
            return Err(AuthError::BadGateway("hydra"));
        }
        if !status.is_success() && status != StatusCode::NOT_FOUND {
            return Err(AuthError::Unexpected(format!("hydra answered {status}")));
        }
        Ok(())
    }

    fn login_endpoint(&self, tail: &[&str], challenge: &str) -> AuthResult<Url> {
        let mut segments = vec!["oauth2", "auth", "requests", "login"];
        segments.extend_from_slice(tail);
        let mut url = self.endpoint(&segments)?;
        url.query_pairs_mut().append_pair("login_challenge", challenge);
        Ok(url)
    }

    fn endpoint(&self, segments: &[&str]) -> AuthResult<Url> {
        let mut url = self.admin_base.clone();
        url.path_segments_mut()
            .map_err(|_| AuthError::Unexpected("hydra admin url cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

/// Timeouts stay recognizable for the temporarily_unavailable mapping;
/// connection-level failures are not an upstream answer and fold into
/// `Unexpected`.
fn transport_error(e: reqwest::Error) -> AuthError {
    if e.is_timeout() {
        AuthError::GatewayTimeout("hydra")
    } else {
        AuthError::Unexpected(format!("hydra request failed: {e}"))
    }
}

/// 404 and 400 mean the challenge token itself is unusable (unknown,
/// expired or already handled), which is the caller's error, not ours.
fn check_status(resp: reqwest::Response) -> AuthResult<reqwest::Response> {
    let status = resp.status();
    if status == StatusCode::NOT_FOUND || status == StatusCode::BAD_REQUEST {
        return Err(AuthError::invalid_field("login", "challenge"));
    }
    if status.is_server_error() {
        return Err(AuthError::BadGateway("hydra"));
    }
    if !status.is_success() {
        return Err(AuthError::Unexpected(format!("hydra answered {status}")));
    }
    Ok(resp)
}

async fn read_body<T: serde::de::DeserializeOwned>(resp: reqwest::Response) -> AuthResult<T> {
    resp.json::<T>().await.map_err(|e| {
        if e.is_timeout() {
            AuthError::GatewayTimeout("hydra")
        } else {
            AuthError::Unexpected(format!("hydra answered with an unreadable body: {e}"))
        }
    })
}

async fn completed_redirect(resp: reqwest::Response) -> AuthResult<Url> {
    let wire: CompletedWire = read_body(check_status(resp)?).await?;
    Url::parse(&wire.redirect_to)
        .map_err(|_| AuthError::Unexpected("hydra returned an unparsable redirect URI".to_string()))
}
