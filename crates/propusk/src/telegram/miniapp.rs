//! Mini-app init-data parser
//!
//! Mini apps hand over one signed query-string blob. The profile sits
//! in a nested JSON object under the `user` key; `auth_date` and `hash`
//! are top-level pairs. Unknown pairs (`query_id`, `signature`, ...)
//! are kept: they are part of what Telegram signed.

use std::collections::BTreeMap;

use crate::core::error::{AuthError, AuthResult};
use crate::telegram::auth_data::{
    canonical_raw, decode_pairs, json_i64_field, optional_text, parse_i64_field, parse_photo_url,
    timestamp_to_datetime, AuthData, TelegramUser,
};

/// Parse a mini-app init-data string into [`AuthData`].
pub fn parse(init_data: &str) -> AuthResult<AuthData> {
    let pairs = decode_pairs(init_data);
    if pairs.is_empty() {
        return Err(AuthError::InvalidAuthData("init data is empty".to_string()));
    }
    let fields: BTreeMap<&str, &str> =
        pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();

    let hash = match fields.get("hash") {
        Some(h) if !h.is_empty() => *h,
        _ => return Err(AuthError::InvalidAuthData("hash is missing".to_string())),
    };
    if hash.len() < 64 {
        return Err(AuthError::InvalidAuthData("hash is too short".to_string()));
    }

    let auth_date_secs = fields
        .get("auth_date")
        .and_then(|v| parse_i64_field(v))
        .ok_or_else(|| AuthError::InvalidAuthData("auth_date is missing or not numeric".to_string()))?;

    let user_json = fields
        .get("user")
        .ok_or_else(|| AuthError::InvalidAuthData("user field is missing".to_string()))?;
    let user = parse_user(user_json)?;

    Ok(AuthData {
        raw: canonical_raw(pairs.iter().filter(|(k, _)| k != "hash").cloned()),
        hash: hash.to_string(),
        user,
        auth_date: timestamp_to_datetime(auth_date_secs)?,
    })
}

fn parse_user(user_json: &str) -> AuthResult<TelegramUser> {
    let value: serde_json::Value = serde_json::from_str(user_json)
        .map_err(|e| AuthError::InvalidAuthData(format!("user field is not valid JSON: {e}")))?;

    let id = value
        .get("id")
        .and_then(json_i64_field)
        .ok_or_else(|| AuthError::InvalidAuthData("user id is missing or not numeric".to_string()))?;
    if id <= 0 {
        return Err(AuthError::InvalidAuthData("user id must be positive".to_string()));
    }

    let first_name = value
        .get("first_name")
        .and_then(|v| v.as_str())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AuthError::InvalidAuthData("first_name is missing".to_string()))?
        .to_string();

    Ok(TelegramUser {
        id,
        first_name,
        last_name: optional_text(value.get("last_name").and_then(|v| v.as_str())),
        username: optional_text(value.get("username").and_then(|v| v.as_str())),
        language_code: optional_text(value.get("language_code").and_then(|v| v.as_str())),
        photo_url: parse_photo_url(value.get("photo_url").and_then(|v| v.as_str()))?,
        is_premium: value.get("is_premium").and_then(|v| v.as_bool()),
    })
}
