//! Propusk - Telegram login provider for ORY-Hydra-style OAuth2/OIDC servers
//!
//! Verifies Telegram-signed login assertions (login widget redirects and
//! mini-app init data) and resolves Hydra login challenges: skip
//! remembered sessions, render the login page, accept or reject the
//! request.
//!
//! # Module Structure
//!
//! - `core`: configuration, errors and logging
//! - `telegram`: payload parsing, HMAC verification, replay prevention,
//!   bot token liveness checks
//! - `hydra`: admin API client of the authorization server
//! - `storage`: bots, users and login records behind a transactional trait
//! - `login`: the challenge resolution flow
//! - `web`: HTTP transport

pub mod cli;
pub mod core;
pub mod hydra;
pub mod login;
pub mod storage;
pub mod telegram;
pub mod web;

// Re-export commonly used types for convenience
pub use crate::core::{AppConfig, AuthError, AuthResult};
pub use login::{LoginOutcome, LoginResolver, ResolverConfig};
pub use storage::{AuthStore, MemoryStore, PgStore};
