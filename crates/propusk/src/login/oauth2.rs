//! OAuth2 error vocabulary and the internal-to-OAuth2 mapping
//!
//! Rejections leave this service as one of four RFC 6749 codes. The
//! mapping matches on error kind, never on message text, so refactoring
//! a message can never change what a relying party sees.

use strum::{AsRefStr, Display};

use crate::core::error::AuthError;

/// Subset of OAuth2/OIDC error codes this service emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum OAuth2ErrorCode {
    InvalidRequest,
    UnauthorizedClient,
    TemporarilyUnavailable,
    ServerError,
}

/// How a failed login is described to the authorization server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rejection {
    pub error: OAuth2ErrorCode,
    pub status_code: i64,
    pub description: &'static str,
}

pub fn rejection_for(err: &AuthError) -> Rejection {
    match err {
        AuthError::GatewayTimeout(_) | AuthError::BadGateway(_) => Rejection {
            error: OAuth2ErrorCode::TemporarilyUnavailable,
            status_code: 503,
            description: "authentication service is temporarily unavailable",
        },
        AuthError::TokenMalformed | AuthError::TokenInvalid => Rejection {
            error: OAuth2ErrorCode::UnauthorizedClient,
            status_code: 400,
            description: "client is linked to invalid bot credentials",
        },
        AuthError::ObjectNotFound { object: "client", .. } => Rejection {
            error: OAuth2ErrorCode::UnauthorizedClient,
            status_code: 400,
            description: "oauth2 client is not linked to bot configuration",
        },
        AuthError::ObjectInvalid { .. } => Rejection {
            error: OAuth2ErrorCode::InvalidRequest,
            status_code: 400,
            description: "invalid login challenge",
        },
        AuthError::InvalidAuthData(_) | AuthError::ReplayDetected => Rejection {
            error: OAuth2ErrorCode::InvalidRequest,
            status_code: 400,
            description: "invalid authentication request",
        },
        _ => Rejection {
            error: OAuth2ErrorCode::ServerError,
            status_code: 500,
            description: "internal authentication error",
        },
    }
}
