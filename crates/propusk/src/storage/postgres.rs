//! Postgres store
//!
//! Runtime-checked `sqlx` queries over a shared pool. Merge semantics
//! live in the SQL itself: upserts `COALESCE` new optionals against the
//! stored row, so an absent field can never erase a known value.

use anyhow::Context;
use async_trait::async_trait;
use indoc::indoc;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{FromRow, Postgres, Row, Transaction, query, query_as};
use url::Url;

use crate::core::error::{AuthError, AuthResult};
use crate::storage::{AuthStore, AuthStoreTx, Bot, LoginUpdate, User};

const BOT_BY_CLIENT_ID_SQL: &str = indoc! {"
    SELECT id, client_id, token, name, username
    FROM bots
    WHERE client_id = $1
"};

const UPSERT_USER_SQL: &str = indoc! {"
    INSERT INTO users (id, first_name, last_name, username, photo_url, is_premium)
    VALUES ($1, $2, $3, $4, $5, $6)
    ON CONFLICT (id) DO UPDATE SET
        first_name = EXCLUDED.first_name,
        last_name  = COALESCE(EXCLUDED.last_name, users.last_name),
        username   = COALESCE(EXCLUDED.username, users.username),
        photo_url  = COALESCE(EXCLUDED.photo_url, users.photo_url),
        is_premium = COALESCE(EXCLUDED.is_premium, users.is_premium),
        updated_at = now()
    RETURNING id, first_name, last_name, username, photo_url, is_premium
"};

const UPSERT_LOGIN_SQL: &str = indoc! {"
    INSERT INTO user_bot_logins (user_id, bot_id, ip, user_agent, language, last_login_at)
    VALUES ($1, $2, $3, $4, $5, now())
    ON CONFLICT (user_id, bot_id) DO UPDATE SET
        ip            = EXCLUDED.ip,
        user_agent    = COALESCE(EXCLUDED.user_agent, user_bot_logins.user_agent),
        language      = COALESCE(EXCLUDED.language, user_bot_logins.language),
        last_login_at = now(),
        updated_at    = now()
"};

const TOUCH_LOGIN_SQL: &str = indoc! {"
    UPDATE user_bot_logins
    SET last_login_at = now(), updated_at = now()
    WHERE user_id = $1 AND bot_id = $2
"};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .context("failed to connect to Postgres")?;
        Ok(Self { pool })
    }

    /// Apply the embedded migrations.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("failed to run database migrations")?;
        Ok(())
    }
}

#[async_trait]
impl AuthStore for PgStore {
    async fn begin(&self) -> AuthResult<Box<dyn AuthStoreTx>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTx { tx }))
    }
}

pub struct PgTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl AuthStoreTx for PgTx {
    async fn bot_by_client_id(&mut self, client_id: &str) -> AuthResult<Option<Bot>> {
        let bot = query_as::<Postgres, Bot>(BOT_BY_CLIENT_ID_SQL)
            .bind(client_id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(bot)
    }

    async fn upsert_user(&mut self, user: &User) -> AuthResult<User> {
        let stored = query_as::<Postgres, User>(UPSERT_USER_SQL)
            .bind(user.id)
            .bind(&user.first_name)
            .bind(&user.last_name)
            .bind(&user.username)
            .bind(user.photo_url.as_ref().map(Url::as_str))
            .bind(user.is_premium)
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(stored)
    }

    async fn upsert_login(
        &mut self,
        user_id: i64,
        bot_id: i64,
        update: &LoginUpdate,
    ) -> AuthResult<()> {
        query(UPSERT_LOGIN_SQL)
            .bind(user_id)
            .bind(bot_id)
            .bind(update.ip.to_string())
            .bind(&update.user_agent)
            .bind(&update.language)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn touch_login(&mut self, user_id: i64, bot_id: i64) -> AuthResult<()> {
        let result = query(TOUCH_LOGIN_SQL)
            .bind(user_id)
            .bind(bot_id)
            .execute(&mut *self.tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AuthError::not_found("user", user_id));
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> AuthResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}

impl<'r> FromRow<'r, PgRow> for Bot {
    fn from_row(row: &'r PgRow) -> sqlx::Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            client_id: row.try_get("client_id")?,
            token: row.try_get("token")?,
            name: row.try_get("name")?,
            username: row.try_get("username")?,
        })
    }
}

impl<'r> FromRow<'r, PgRow> for User {
    fn from_row(row: &'r PgRow) -> sqlx::Result<Self> {
        let photo_url = row
            .try_get::<Option<String>, _>("photo_url")?
            .map(|raw| Url::parse(&raw))
            .transpose()
            .map_err(|e| sqlx::Error::ColumnDecode {
                index: "photo_url".to_string(),
                source: Box::new(e),
            })?;

        Ok(Self {
            id: row.try_get("id")?,
            first_name: row.try_get("first_name")?,
            last_name: row.try_get("last_name")?,
            username: row.try_get("username")?,
            photo_url,
            is_premium: row.try_get("is_premium")?,
        })
    }
}
