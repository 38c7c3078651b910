//! Session registry: a write-through cache over the sessions table.
//!
//! Three maps guarded by one mutex — by token, by connection, by user —
//! with the database as the source of truth. The mutex is only held for map
//! mutation; all database I/O happens outside the critical section. A
//! dedicated worker sweeps idle sessions out of the database every minute
//! and flushes the whole cache when anything was deleted (coarse
//! invalidation is cheaper than per-row sync; the cache rebuilds on the
//! next verify).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use log::{debug, info, warn};
use rand::rngs::OsRng;
use rand::RngCore;

use crate::db::{DbPool, SessionRepository, UserRepository};
use crate::net::ConnId;

/// Sessions idle longer than this are garbage-collected.
pub const SESSION_TIMEOUT_SECS: i64 = 1800;

/// Sleep between cleanup sweeps.
pub const CLEANUP_INTERVAL_SECS: u64 = 60;

const TOKEN_BYTES: usize = 16;

/// The token is already bound to a different live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DuplicateSession;

/// Cached session state.
#[derive(Debug, Clone)]
pub struct SessionEntry {
    pub token: String,
    pub user_id: i32,
    pub username: String,
    pub conn: Option<ConnId>,
    pub created_at: i64,
    pub last_activity: i64,
    pub ip: String,
    pub authenticated: bool,
}

#[derive(Default)]
struct Maps {
    by_token: HashMap<String, SessionEntry>,
    by_conn: HashMap<ConnId, String>,
    by_user: HashMap<i32, String>,
}

impl Maps {
    fn drop_entry(&mut self, token: &str) {
        if let Some(entry) = self.by_token.remove(token) {
            if let Some(conn) = entry.conn {
                self.by_conn.remove(&conn);
            }
            self.by_user.remove(&entry.user_id);
        }
    }
}

pub struct SessionRegistry {
    pool: DbPool,
    inner: Mutex<Maps>,
}

impl SessionRegistry {
    pub fn new(pool: DbPool) -> Self {
        SessionRegistry {
            pool,
            inner: Mutex::new(Maps::default()),
        }
    }

    /// 32 hex characters from the OS random source.
    fn generate_token() -> String {
        let mut bytes = [0u8; TOKEN_BYTES];
        OsRng.fill_bytes(&mut bytes);
        bytes.iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// Creates a session for a freshly authenticated user and binds it to
    /// the connection. Any prior session of the same user is superseded in
    /// both the database (delete-then-insert) and the cache.
    pub async fn create_session(
        &self,
        user_id: i32,
        username: &str,
        conn: ConnId,
        ip: &str,
    ) -> Option<String> {
        let token = Self::generate_token();

        if !SessionRepository::create(&self.pool, &token, user_id, ip).await {
            warn!("could not persist session for user {}", username);
            return None;
        }

        let now = Utc::now().timestamp();
        {
            let mut maps = self.inner.lock().unwrap();
            if let Some(old_token) = maps.by_user.get(&user_id).cloned() {
                maps.drop_entry(&old_token);
            }
            maps.by_conn.insert(conn, token.clone());
            maps.by_user.insert(user_id, token.clone());
            maps.by_token.insert(
                token.clone(),
                SessionEntry {
                    token: token.clone(),
                    user_id,
                    username: username.to_string(),
                    conn: Some(conn),
                    created_at: now,
                    last_activity: now,
                    ip: ip.to_string(),
                    authenticated: true,
                },
            );
        }

        info!("created session for user {} ({})", username, user_id);
        Some(token)
    }

    /// Database-authoritative check. A hit refreshes the cached entry
    /// (lazily loading it when absent) and touches the database row; a miss
    /// invalidates any stale cache entry.
    pub async fn verify(&self, token: &str) -> bool {
        if !SessionRepository::verify(&self.pool, token).await {
            self.invalidate(token);
            return false;
        }

        let cached = {
            let maps = self.inner.lock().unwrap();
            maps.by_token.contains_key(token)
        };
        if !cached {
            self.load_to_cache(token).await;
        }

        {
            let mut maps = self.inner.lock().unwrap();
            if let Some(entry) = maps.by_token.get_mut(token) {
                entry.last_activity = Utc::now().timestamp();
            }
        }

        SessionRepository::touch(&self.pool, token).await;
        true
    }

    pub async fn verify_by_conn(&self, conn: ConnId) -> bool {
        let token = {
            let maps = self.inner.lock().unwrap();
            maps.by_conn.get(&conn).cloned()
        };
        match token {
            Some(token) => self.verify(&token).await,
            None => false,
        }
    }

    /// Binds the token to a connection. CAS-like: a token already bound to
    /// a *different* live connection is rejected rather than rebound.
    pub fn bind(&self, token: &str, conn: ConnId) -> Result<(), DuplicateSession> {
        let mut maps = self.inner.lock().unwrap();

        if let Some(entry) = maps.by_token.get(token) {
            if let Some(existing) = entry.conn {
                if existing != conn && maps.by_conn.contains_key(&existing) {
                    return Err(DuplicateSession);
                }
            }
        }

        maps.by_conn.insert(conn, token.to_string());
        if let Some(entry) = maps.by_token.get_mut(token) {
            entry.conn = Some(conn);
        }
        Ok(())
    }

    /// Removes the reverse mapping for a closed connection.
    pub fn unbind(&self, conn: ConnId) {
        let mut maps = self.inner.lock().unwrap();
        if let Some(token) = maps.by_conn.remove(&conn) {
            if let Some(entry) = maps.by_token.get_mut(&token) {
                if entry.conn == Some(conn) {
                    entry.conn = None;
                }
            }
        }
    }

    /// Refreshes last-activity in cache and database. Idempotent.
    pub async fn touch(&self, token: &str) {
        {
            let mut maps = self.inner.lock().unwrap();
            if let Some(entry) = maps.by_token.get_mut(token) {
                entry.last_activity = Utc::now().timestamp();
            }
        }
        SessionRepository::touch(&self.pool, token).await;
    }

    pub async fn touch_by_conn(&self, conn: ConnId) {
        let token = {
            let maps = self.inner.lock().unwrap();
            maps.by_conn.get(&conn).cloned()
        };
        if let Some(token) = token {
            self.touch(&token).await;
        }
    }

    pub fn session_view(&self, token: &str) -> Option<SessionEntry> {
        let maps = self.inner.lock().unwrap();
        maps.by_token.get(token).cloned()
    }

    /// User bound to a connection, if any.
    pub fn user_for_conn(&self, conn: ConnId) -> Option<(i32, String)> {
        let maps = self.inner.lock().unwrap();
        let token = maps.by_conn.get(&conn)?;
        let entry = maps.by_token.get(token)?;
        Some((entry.user_id, entry.username.clone()))
    }

    /// Cache-only check used by the lobby listing.
    pub fn is_online(&self, user_id: i32) -> bool {
        let maps = self.inner.lock().unwrap();
        maps.by_user.contains_key(&user_id)
    }

    /// Connection currently carrying the user's session, if any. This is
    /// the lookup behind the broadcast callback.
    pub fn conn_for_user(&self, user_id: i32) -> Option<ConnId> {
        let maps = self.inner.lock().unwrap();
        let token = maps.by_user.get(&user_id)?;
        maps.by_token.get(token)?.conn
    }

    pub fn remove_in_cache(&self, token: &str) {
        let mut maps = self.inner.lock().unwrap();
        maps.drop_entry(token);
    }

    pub async fn remove_in_database(&self, token: &str) {
        SessionRepository::delete(&self.pool, token).await;
    }

    /// Logout path: cache and database together.
    pub async fn remove_session(&self, token: &str) {
        self.remove_in_cache(token);
        self.remove_in_database(token).await;
    }

    pub async fn remove_session_by_conn(&self, conn: ConnId) {
        let token = {
            let maps = self.inner.lock().unwrap();
            maps.by_conn.get(&conn).cloned()
        };
        if let Some(token) = token {
            self.remove_session(&token).await;
        }
    }

    pub async fn remove_by_user(&self, user_id: i32) {
        let token = {
            let maps = self.inner.lock().unwrap();
            maps.by_user.get(&user_id).cloned()
        };
        if let Some(token) = token {
            self.remove_in_cache(&token);
        }
        SessionRepository::delete_by_user(&self.pool, user_id).await;
    }

    pub async fn has_active(&self, user_id: i32) -> bool {
        SessionRepository::has_active(&self.pool, user_id).await
    }

    pub async fn token_by_user(&self, user_id: i32) -> Option<String> {
        SessionRepository::token_by_user(&self.pool, user_id).await
    }

    pub async fn count(&self) -> i64 {
        SessionRepository::count(&self.pool).await
    }

    /// One sweep: bulk-delete idle rows, then flush the whole cache if
    /// anything went.
    pub async fn cleanup_expired(&self) {
        let removed = SessionRepository::cleanup(&self.pool, SESSION_TIMEOUT_SECS).await;
        if removed > 0 {
            let mut maps = self.inner.lock().unwrap();
            maps.by_token.clear();
            maps.by_conn.clear();
            maps.by_user.clear();
            drop(maps);
            info!("cleaned up {} expired sessions, cache flushed", removed);
        }
    }

    fn invalidate(&self, token: &str) {
        let mut maps = self.inner.lock().unwrap();
        if maps.by_token.contains_key(token) {
            debug!("invalidating stale cache entry");
            maps.drop_entry(token);
        }
    }

    async fn load_to_cache(&self, token: &str) {
        let row = match SessionRepository::info(&self.pool, token).await {
            Some(row) => row,
            None => return,
        };
        let username = UserRepository::by_id(&self.pool, row.user_id)
            .await
            .map(|user| user.username)
            .unwrap_or_default();

        let mut maps = self.inner.lock().unwrap();
        maps.by_user.insert(row.user_id, token.to_string());
        maps.by_token.insert(
            token.to_string(),
            SessionEntry {
                token: token.to_string(),
                user_id: row.user_id,
                username,
                conn: None,
                created_at: row.login_time.timestamp(),
                last_activity: row.last_activity.timestamp(),
                ip: row.ip_address,
                authenticated: true,
            },
        );
        debug!("loaded session into cache");
    }

    /// Installs a cache entry directly, bypassing the database.
    #[cfg(test)]
    pub(crate) fn insert_for_test(&self, entry: SessionEntry) {
        let mut maps = self.inner.lock().unwrap();
        if let Some(conn) = entry.conn {
            maps.by_conn.insert(conn, entry.token.clone());
        }
        maps.by_user.insert(entry.user_id, entry.token.clone());
        maps.by_token.insert(entry.token.clone(), entry);
    }
}

/// Long-running sweep worker; spawned once at startup.
pub async fn run_cleanup_worker(registry: Arc<SessionRegistry>) {
    let mut interval = tokio::time::interval(Duration::from_secs(CLEANUP_INTERVAL_SECS));
    interval.tick().await; // first tick fires immediately; skip it
    loop {
        interval.tick().await;
        registry.cleanup_expired().await;
    }
}
