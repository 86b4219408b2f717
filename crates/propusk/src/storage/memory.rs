//! In-memory store
//!
//! Backs tests and single-instance local runs. Transactions stage a
//! copy of the whole state; `commit` publishes it, dropping the
//! transaction discards it. Same merge rules as the Postgres store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::Utc;

use crate::core::error::{AuthError, AuthResult};
use crate::storage::{AuthStore, AuthStoreTx, Bot, LoginRecord, LoginUpdate, User};

#[derive(Default, Clone)]
struct State {
    bots: HashMap<String, Bot>,
    users: HashMap<i64, User>,
    logins: HashMap<(i64, i64), LoginRecord>,
}

#[derive(Default, Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
    fail_writes: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_bot(&self, bot: Bot) {
        lock(&self.state).bots.insert(bot.client_id.clone(), bot);
    }

    pub fn user(&self, id: i64) -> Option<User> {
        lock(&self.state).users.get(&id).cloned()
    }

    pub fn login(&self, user_id: i64, bot_id: i64) -> Option<LoginRecord> {
        lock(&self.state).logins.get(&(user_id, bot_id)).cloned()
    }

    /// Make every write in subsequent transactions fail, to exercise
    /// the storage-failure paths.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl AuthStore for MemoryStore {
    async fn begin(&self) -> AuthResult<Box<dyn AuthStoreTx>> {
        Ok(Box::new(MemoryTx {
            shared: Arc::clone(&self.state),
            staged: lock(&self.state).clone(),
            fail_writes: self.fail_writes.load(Ordering::SeqCst),
        }))
    }
}

pub struct MemoryTx {
    shared: Arc<Mutex<State>>,
    staged: State,
    fail_writes: bool,
}

impl MemoryTx {
    fn write_gate(&self) -> AuthResult<()> {
        if self.fail_writes {
            return Err(AuthError::Unexpected("simulated storage failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl AuthStoreTx for MemoryTx {
    async fn bot_by_client_id(&mut self, client_id: &str) -> AuthResult<Option<Bot>> {
        Ok(self.staged.bots.get(client_id).cloned())
    }

    async fn upsert_user(&mut self, user: &User) -> AuthResult<User> {
        self.write_gate()?;
        let merged = match self.staged.users.get(&user.id) {
            Some(existing) => User {
                id: user.id,
                first_name: user.first_name.clone(),
                last_name: user.last_name.clone().or_else(|| existing.last_name.clone()),
                username: user.username.clone().or_else(|| existing.username.clone()),
                photo_url: user.photo_url.clone().or_else(|| existing.photo_url.clone()),
                is_premium: user.is_premium.or(existing.is_premium),
            },
            None => user.clone(),
        };
        self.staged.users.insert(merged.id, merged.clone());
        Ok(merged)
    }

    async fn upsert_login(
        &mut self,
        user_id: i64,
        bot_id: i64,
        update: &LoginUpdate,
    ) -> AuthResult<()> {
        self.write_gate()?;
        let now = Utc::now();
        match self.staged.logins.get_mut(&(user_id, bot_id)) {
            Some(record) => {
                record.ip = update.ip;
                if update.user_agent.is_some() {
                    record.user_agent = update.user_agent.clone();
                }
                if update.language.is_some() {
                    record.language = update.language.clone();
                }
                record.last_login_at = now;
            }
            None => {
                self.staged.logins.insert(
                    (user_id, bot_id),
                    LoginRecord {
                        user_id,
                        bot_id,
                        ip: update.ip,
                        user_agent: update.user_agent.clone(),
                        language: update.language.clone(),
                        last_login_at: now,
                    },
                );
            }
        }
        Ok(())
    }

    async fn touch_login(&mut self, user_id: i64, bot_id: i64) -> AuthResult<()> {
        self.write_gate()?;
        match self.staged.logins.get_mut(&(user_id, bot_id)) {
            Some(record) => {
                record.last_login_at = Utc::now();
                Ok(())
            }
            None => Err(AuthError::not_found("user", user_id)),
        }
    }

    async fn commit(self: Box<Self>) -> AuthResult<()> {
        *lock(&self.shared) = self.staged;
        Ok(())
    }
}

fn lock(state: &Mutex<State>) -> std::sync::MutexGuard<'_, State> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}
