//! Verified Telegram auth payloads
//!
//! `AuthData` is what both parsers produce and what the rest of the
//! login flow consumes. The `raw` field always holds the canonical
//! encoding defined here, so the signature check decodes exactly what
//! the parser encoded regardless of which provider the payload came
//! from.

use chrono::{DateTime, TimeZone, Utc};
use url::Url;

use crate::core::error::{AuthError, AuthResult};

/// Telegram user profile carried inside a signed payload.
///
/// Optional fields are `None` when the provider omitted them or sent an
/// empty string; downstream merge logic relies on that distinction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelegramUser {
    pub id: i64,
    pub first_name: String,
    pub last_name: Option<String>,
    pub username: Option<String>,
    pub language_code: Option<String>,
    pub photo_url: Option<Url>,
    pub is_premium: Option<bool>,
}

/// A parsed, not yet verified, Telegram auth payload.
#[derive(Debug, Clone)]
pub struct AuthData {
    /// Canonical encoding of every received pair except `hash`, which
    /// lives in its own field.
    pub raw: String,
    /// Hex signature extracted from the payload.
    pub hash: String,
    pub user: TelegramUser,
    pub auth_date: DateTime<Utc>,
}

impl AuthData {
    /// True when the payload is older than `ttl`.
    ///
    /// The boundary instant `auth_date + ttl` is still fresh; only
    /// strictly later moments are expired.
    pub fn is_expired(&self, ttl: std::time::Duration) -> bool {
        self.is_expired_at(Utc::now(), ttl)
    }

    /// Deterministic variant of [`Self::is_expired`]. A ttl too large to
    /// represent means the payload never expires.
    pub fn is_expired_at(&self, now: DateTime<Utc>, ttl: std::time::Duration) -> bool {
        let Ok(ttl) = chrono::Duration::from_std(ttl) else {
            return false;
        };
        match self.auth_date.checked_add_signed(ttl) {
            Some(deadline) => now > deadline,
            None => false,
        }
    }
}

/// Build the canonical `raw` encoding: pairs sorted by key, percent
/// encoded, joined with `&`. This is the only encoding the verifier
/// ever has to decode.
pub fn canonical_raw<I>(pairs: I) -> String
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut pairs: Vec<(String, String)> = pairs.into_iter().collect();
    pairs.sort();
    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Split a query-string payload into decoded pairs. Pairs without `=`
/// or with undecodable values are dropped; the signature check catches
/// any tampering that could hide behind that.
pub fn decode_pairs(raw: &str) -> Vec<(String, String)> {
    raw.split('&')
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            let key = urlencoding::decode(key).ok()?;
            let value = urlencoding::decode(value).ok()?;
            Some((key.into_owned(), value.into_owned()))
        })
        .collect()
}

/// Interpret a textual field as an integer, tolerating the float and
/// numeric-string forms some clients produce.
pub(crate) fn parse_i64_field(value: &str) -> Option<i64> {
    if let Ok(n) = value.parse::<i64>() {
        return Some(n);
    }
    let f = value.parse::<f64>().ok()?;
    if !f.is_finite() || f < i64::MIN as f64 || f > i64::MAX as f64 {
        return None;
    }
    Some(f as i64)
}

/// Same tolerance for JSON values (mini-app user objects).
pub(crate) fn json_i64_field(value: &serde_json::Value) -> Option<i64> {
    match value {
        serde_json::Value::Number(n) => {
            n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))
        }
        serde_json::Value::String(s) => parse_i64_field(s),
        _ => None,
    }
}

pub(crate) fn optional_text(value: Option<&str>) -> Option<String> {
    value.filter(|v| !v.is_empty()).map(ToString::to_string)
}

/// Parse `photo_url`, requiring an absolute http(s) URL. Empty input is
/// simply absent.
pub(crate) fn parse_photo_url(value: Option<&str>) -> AuthResult<Option<Url>> {
    let Some(value) = value.filter(|v| !v.is_empty()) else {
        return Ok(None);
    };
    let url = Url::parse(value)
        .map_err(|_| AuthError::InvalidAuthData("photo_url is not an absolute URL".to_string()))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(AuthError::InvalidAuthData(
            "photo_url must use http or https".to_string(),
        ));
    }
    Ok(Some(url))
}

pub(crate) fn timestamp_to_datetime(secs: i64) -> AuthResult<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .ok_or_else(|| AuthError::InvalidAuthData("auth_date is out of range".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn data_at(secs: i64) -> AuthData {
        AuthData {
            raw: String::new(),
            hash: String::new(),
            user: TelegramUser {
                id: 1,
                first_name: "a".to_string(),
                last_name: None,
                username: None,
                language_code: None,
                photo_url: None,
                is_premium: None,
            },
            auth_date: timestamp_to_datetime(secs).unwrap(),
        }
    }

    #[test]
    fn boundary_instant_is_not_expired() {
        let data = data_at(1_700_000_000);
        let ttl = Duration::from_secs(300);
        let boundary = data.auth_date + chrono::Duration::seconds(300);
        assert!(!data.is_expired_at(boundary, ttl));
        assert!(data.is_expired_at(boundary + chrono::Duration::seconds(1), ttl));
    }

    #[test]
    fn canonical_raw_sorts_and_encodes() {
        let raw = canonical_raw(vec![
            ("first_name".to_string(), "Иван Ильич".to_string()),
            ("auth_date".to_string(), "1700000000".to_string()),
        ]);
        assert!(raw.starts_with("auth_date=1700000000&first_name="));
        assert!(!raw.contains(' '));
    }

    #[test]
    fn decode_undoes_canonical_encoding() {
        let pairs = vec![
            ("a".to_string(), "x y".to_string()),
            ("b".to_string(), "k=v&q".to_string()),
            ("c".to_string(), "Пёс".to_string()),
        ];
        let raw = canonical_raw(pairs.clone());
        assert_eq!(decode_pairs(&raw), pairs);
    }

    #[test]
    fn numeric_forms_are_tolerated() {
        assert_eq!(parse_i64_field("42"), Some(42));
        assert_eq!(parse_i64_field("42.0"), Some(42));
        assert_eq!(parse_i64_field("1700000000.9"), Some(1700000000));
        assert_eq!(parse_i64_field("forty-two"), None);
        assert_eq!(json_i64_field(&serde_json::json!(42)), Some(42));
        assert_eq!(json_i64_field(&serde_json::json!(42.0)), Some(42));
        assert_eq!(json_i64_field(&serde_json::json!("42")), Some(42));
        assert_eq!(json_i64_field(&serde_json::json!(true)), None);
    }

    #[test]
    fn photo_url_must_be_absolute_http() {
        assert!(parse_photo_url(Some("https://t.me/i/userpic/a.jpg")).unwrap().is_some());
        assert_eq!(parse_photo_url(Some("")).unwrap(), None);
        assert_eq!(parse_photo_url(None).unwrap(), None);
        assert!(parse_photo_url(Some("/userpic/a.jpg")).is_err());
        assert!(parse_photo_url(Some("ftp://host/a.jpg")).is_err());
    }
}
