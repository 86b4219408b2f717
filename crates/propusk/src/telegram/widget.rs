//! Login widget payload parser
//!
//! The widget redirects back with the signed fields as individual query
//! parameters (`id`, `first_name`, `auth_date`, `hash`, plus optional
//! profile fields). Input here is the already-decoded parameter map;
//! the canonical `raw` is rebuilt from it so the verifier sees exactly
//! what was parsed.

use std::collections::HashMap;

use crate::core::error::{AuthError, AuthResult};
use crate::telegram::auth_data::{
    canonical_raw, optional_text, parse_i64_field, parse_photo_url, timestamp_to_datetime,
    AuthData, TelegramUser,
};

/// Parse login-widget redirect parameters into [`AuthData`].
pub fn parse(params: &HashMap<String, String>) -> AuthResult<AuthData> {
    let hash = required(params, "hash")?;
    if hash.len() < 64 {
        return Err(AuthError::InvalidAuthData("hash is too short".to_string()));
    }

    let id = parse_i64_field(required(params, "id")?)
        .ok_or_else(|| AuthError::InvalidAuthData("id is not numeric".to_string()))?;
    if id <= 0 {
        return Err(AuthError::InvalidAuthData("id must be positive".to_string()));
    }

    let first_name = required(params, "first_name")?.to_string();

    let auth_date_secs = parse_i64_field(required(params, "auth_date")?)
        .ok_or_else(|| AuthError::InvalidAuthData("auth_date is not numeric".to_string()))?;

    let user = TelegramUser {
        id,
        first_name,
        last_name: optional_text(params.get("last_name").map(String::as_str)),
        username: optional_text(params.get("username").map(String::as_str)),
        language_code: optional_text(params.get("language_code").map(String::as_str)),
        photo_url: parse_photo_url(params.get("photo_url").map(String::as_str))?,
        is_premium: None,
    };

    Ok(AuthData {
        raw: canonical_raw(
            params
                .iter()
                .filter(|(k, _)| k.as_str() != "hash")
                .map(|(k, v)| (k.clone(), v.clone())),
        ),
        hash: hash.to_string(),
        user,
        auth_date: timestamp_to_datetime(auth_date_secs)?,
    })
}

fn required<'a>(params: &'a HashMap<String, String>, key: &str) -> AuthResult<&'a str> {
    match params.get(key).map(String::as_str) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(AuthError::InvalidAuthData(format!("{key} is missing"))),
    }
}
