//! Telegram auth signature verification
//!
//! Telegram signs login payloads with HMAC-SHA256; the verification key
//! is the SHA256 digest of the bot token. The signed message is the
//! data-check string: every field except `hash`, unique keys sorted,
//! `key=value` lines joined with `\n`, values in decoded form.

use std::collections::BTreeMap;

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::core::error::{AuthError, AuthResult};
use crate::telegram::auth_data::decode_pairs;

type HmacSha256 = Hmac<Sha256>;

/// Verify that `claimed_hash` signs `raw` under `bot_token`.
///
/// `raw` is the canonical query-string encoding produced by the
/// parsers; a stray `hash` pair inside it is excluded from the check.
/// Only the exact lowercase hex spelling of the signature is accepted;
/// the byte comparison is constant time.
pub fn verify(raw: &str, claimed_hash: &str, bot_token: &str) -> AuthResult<()> {
    let claimed = decode_signature_hex(claimed_hash).ok_or_else(|| {
        AuthError::InvalidAuthData("hash is not 64 characters of lowercase hex".to_string())
    })?;

    let mut mac = mac_for(bot_token)?;
    mac.update(data_check_string(raw)?.as_bytes());
    mac.verify_slice(&claimed)
        .map_err(|_| AuthError::InvalidAuthData("signature mismatch".to_string()))
}

/// Produce the lowercase hex signature for `raw` under `bot_token`.
///
/// The service itself only verifies; this is the building block for
/// tests that need genuinely signed payloads.
pub fn sign(raw: &str, bot_token: &str) -> AuthResult<String> {
    let mut mac = mac_for(bot_token)?;
    mac.update(data_check_string(raw)?.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

// Telegram spells signatures as lowercase hex. Another spelling of the
// same bytes is a different string and must not verify; downstream
// replay records are keyed by the string.
fn decode_signature_hex(claimed_hash: &str) -> Option<Vec<u8>> {
    let lowercase = claimed_hash.len() == 64
        && claimed_hash.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
    if !lowercase {
        return None;
    }
    hex::decode(claimed_hash).ok()
}

fn data_check_string(raw: &str) -> AuthResult<String> {
    // BTreeMap: unique keys, sorted iteration, last value wins.
    let fields: BTreeMap<String, String> = decode_pairs(raw)
        .into_iter()
        .filter(|(key, _)| key != "hash")
        .collect();

    if fields.is_empty() {
        return Err(AuthError::InvalidAuthData("no fields to verify".to_string()));
    }

    Ok(fields
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("\n"))
}

fn mac_for(bot_token: &str) -> AuthResult<HmacSha256> {
    let secret_key = Sha256::digest(bot_token.as_bytes());
    HmacSha256::new_from_slice(&secret_key)
        .map_err(|_| AuthError::Unexpected("HMAC key setup failed".to_string()))
}
