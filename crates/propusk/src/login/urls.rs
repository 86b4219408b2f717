//! Login flow URL construction
//!
//! The widget URI points the browser at Telegram's OAuth endpoint and
//! must name our own pages twice: `origin` is the login page the widget
//! was embedded on, `return_to` is the callback Telegram redirects back
//! to with the signed fields appended.

use url::Url;

/// `base` with `segments` appended to its path.
pub fn with_path(base: &Url, segments: &[&str]) -> Url {
    let mut url = base.clone();
    if let Ok(mut path) = url.path_segments_mut() {
        path.pop_if_empty().extend(segments);
    }
    url
}

/// Telegram OAuth URL for the login widget.
pub fn widget_uri(telegram_auth_url: &Url, bot_id: i64, origin: &Url, return_to: &Url) -> Url {
    let mut url = telegram_auth_url.clone();
    url.query_pairs_mut()
        .append_pair("bot_id", &bot_id.to_string())
        .append_pair("origin", origin.as_str())
        .append_pair("request_access", "write")
        .append_pair("return_to", return_to.as_str());
    url
}

/// Widget callback URL carrying the login challenge.
pub fn widget_callback_uri(base: &Url, challenge: &str) -> Url {
    callback_uri(base, &["widget", "callback"], challenge)
}

/// Mini-app callback URL carrying the login challenge.
pub fn miniapp_callback_uri(base: &Url, challenge: &str) -> Url {
    callback_uri(base, &["miniapp", "callback"], challenge)
}

fn callback_uri(base: &Url, segments: &[&str], challenge: &str) -> Url {
    let mut url = with_path(base, segments);
    url.query_pairs_mut().append_pair("login_challenge", challenge);
    url
}
