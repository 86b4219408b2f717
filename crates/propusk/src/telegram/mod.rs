//! Telegram identity verification
//!
//! Everything needed to trust a Telegram-signed login assertion:
//! payload parsing for the two providers (login widget redirect data and
//! mini-app init data), HMAC signature verification, replay prevention
//! and bot-token liveness checks with caching.

pub mod auth_data;
pub mod hash;
pub mod miniapp;
pub mod replay;
pub mod token;
pub mod widget;

pub use auth_data::{AuthData, TelegramUser};
pub use replay::{MemoryReplayGuard, RedisReplayGuard, ReplayGuard};
pub use token::{
    BotApiClient, BotInfo, BotTokenVerifier, MemoryVerificationCache, RedisVerificationCache,
    VerificationCache, VerifyOptions,
};
