//! User and bot persistence
//!
//! Storage is driven through an explicit unit of work: `begin()` hands
//! out a transaction object carrying the repository operations, and
//! dropping it without `commit()` rolls everything back. Callers never
//! smuggle transaction handles through task-local state.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use std::net::IpAddr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use url::Url;

use crate::core::error::AuthResult;
use crate::telegram::TelegramUser;

/// A bot bound to an OAuth2 client. Rows are managed by operators;
/// the login flow only reads them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bot {
    pub id: i64,
    pub client_id: String,
    pub token: String,
    pub name: String,
    pub username: String,
}

/// Stored Telegram profile projection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: i64,
    pub first_name: String,
    pub last_name: Option<String>,
    pub username: Option<String>,
    pub photo_url: Option<Url>,
    pub is_premium: Option<bool>,
}

impl From<&TelegramUser> for User {
    fn from(u: &TelegramUser) -> Self {
        Self {
            id: u.id,
            first_name: u.first_name.clone(),
            last_name: u.last_name.clone(),
            username: u.username.clone(),
            photo_url: u.photo_url.clone(),
            is_premium: u.is_premium,
        }
    }
}

/// Per-(user, bot) login record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginRecord {
    pub user_id: i64,
    pub bot_id: i64,
    pub ip: IpAddr,
    pub user_agent: Option<String>,
    pub language: Option<String>,
    pub last_login_at: DateTime<Utc>,
}

/// What a fresh authentication writes into the login record. The ip is
/// always overwritten; absent optionals keep the stored values.
#[derive(Debug, Clone)]
pub struct LoginUpdate {
    pub ip: IpAddr,
    pub user_agent: Option<String>,
    pub language: Option<String>,
}

#[async_trait]
pub trait AuthStore: Send + Sync {
    async fn begin(&self) -> AuthResult<Box<dyn AuthStoreTx>>;
}

/// One transaction's worth of repository operations.
#[async_trait]
pub trait AuthStoreTx: Send {
    async fn bot_by_client_id(&mut self, client_id: &str) -> AuthResult<Option<Bot>>;

    /// Create the user or merge the fields present in `user` into the
    /// stored row. Returns the row as stored after the merge.
    async fn upsert_user(&mut self, user: &User) -> AuthResult<User>;

    /// Create or refresh the login record and stamp `last_login_at`.
    async fn upsert_login(
        &mut self,
        user_id: i64,
        bot_id: i64,
        update: &LoginUpdate,
    ) -> AuthResult<()>;

    /// Stamp `last_login_at` on an existing login record.
    /// `ObjectNotFound` when the pair has never logged in.
    async fn touch_login(&mut self, user_id: i64, bot_id: i64) -> AuthResult<()>;

    async fn commit(self: Box<Self>) -> AuthResult<()>;
}
