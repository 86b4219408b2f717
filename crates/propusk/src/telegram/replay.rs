//! Replay prevention for verified auth payloads
//!
//! A signature hash may complete a login exactly once per replay
//! window. The guard is a single atomic set-if-absent with TTL keyed by
//! the hash; whoever lands the insert wins, everyone else gets
//! `ReplayDetected`.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use redis::aio::MultiplexedConnection;

use crate::core::error::{AuthError, AuthResult};

const REDIS_KEY_PREFIX: &str = "auth:replay:";

#[async_trait]
pub trait ReplayGuard: Send + Sync {
    /// Mark `hash` as consumed. `Ok` for the first caller inside the
    /// window, `ReplayDetected` for every other one.
    async fn check_and_mark_used(&self, hash: &str) -> AuthResult<()>;
}

/// Redis-backed guard for multi-instance deployments. One
/// `SET key v NX EX ttl` round trip carries both the check and the mark.
pub struct RedisReplayGuard {
    conn: MultiplexedConnection,
    ttl: Duration,
}

impl RedisReplayGuard {
    pub fn new(conn: MultiplexedConnection, ttl: Duration) -> Self {
        Self { conn, ttl }
    }
}

#[async_trait]
impl ReplayGuard for RedisReplayGuard {
    async fn check_and_mark_used(&self, hash: &str) -> AuthResult<()> {
        let mut conn = self.conn.clone();
        let key = format!("{REDIS_KEY_PREFIX}{hash}");
        // Nil reply means the key already existed and the hash was used.
        let set: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg(1)
            .arg("NX")
            .arg("EX")
            .arg(self.ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await?;
        match set {
            Some(_) => Ok(()),
            None => Err(AuthError::ReplayDetected),
        }
    }
}

/// In-process guard for tests and single-instance runs. The map entry
/// API keeps check-and-insert atomic per hash.
pub struct MemoryReplayGuard {
    seen: DashMap<String, Instant>,
    ttl: Duration,
}

impl MemoryReplayGuard {
    pub fn new(ttl: Duration) -> Self {
        Self { seen: DashMap::new(), ttl }
    }

    fn sweep_expired(&self) {
        if self.seen.len() > 1024 {
            let now = Instant::now();
            self.seen.retain(|_, deadline| *deadline > now);
        }
    }
}

#[async_trait]
impl ReplayGuard for MemoryReplayGuard {
    async fn check_and_mark_used(&self, hash: &str) -> AuthResult<()> {
        self.sweep_expired();
        let now = Instant::now();
        match self.seen.entry(hash.to_string()) {
            Entry::Occupied(mut entry) => {
                if *entry.get() > now {
                    return Err(AuthError::ReplayDetected);
                }
                entry.insert(now + self.ttl);
                Ok(())
            }
            Entry::Vacant(entry) => {
                entry.insert(now + self.ttl);
                Ok(())
            }
        }
    }
}
