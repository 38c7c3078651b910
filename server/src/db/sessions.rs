//! Active-session rows: the persistent half of the session registry.

use chrono::{DateTime, Utc};
use log::error;

use super::DbPool;

/// An `active_sessions` row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SessionRow {
    pub session_id: String,
    pub user_id: i32,
    pub login_time: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub ip_address: String,
}

pub struct SessionRepository;

impl SessionRepository {
    /// Creates a session inside one transaction: any prior row for the user
    /// is deleted first, keeping at most one session per user.
    pub async fn create(pool: &DbPool, session_id: &str, user_id: i32, ip: &str) -> bool {
        let result: Result<(), sqlx::Error> = async {
            let mut txn = pool.begin().await?;
            sqlx::query("DELETE FROM active_sessions WHERE user_id = $1")
                .bind(user_id)
                .execute(&mut *txn)
                .await?;
            sqlx::query(
                "INSERT INTO active_sessions
                     (session_id, user_id, login_time, last_activity, ip_address)
                 VALUES ($1, $2, NOW(), NOW(), $3)",
            )
            .bind(session_id)
            .bind(user_id)
            .bind(ip)
            .execute(&mut *txn)
            .await?;
            txn.commit().await
        }
        .await;

        match result {
            Ok(()) => true,
            Err(e) => {
                error!("failed to create session for user {}: {}", user_id, e);
                false
            }
        }
    }

    pub async fn verify(pool: &DbPool, session_id: &str) -> bool {
        match sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM active_sessions WHERE session_id = $1",
        )
        .bind(session_id)
        .fetch_one(pool)
        .await
        {
            Ok(count) => count > 0,
            Err(e) => {
                error!("failed to verify session: {}", e);
                false
            }
        }
    }

    /// Sets last-activity to now.
    pub async fn touch(pool: &DbPool, session_id: &str) -> bool {
        match sqlx::query("UPDATE active_sessions SET last_activity = NOW() WHERE session_id = $1")
            .bind(session_id)
            .execute(pool)
            .await
        {
            Ok(result) => result.rows_affected() > 0,
            Err(e) => {
                error!("failed to touch session: {}", e);
                false
            }
        }
    }

    pub async fn delete(pool: &DbPool, session_id: &str) -> bool {
        match sqlx::query("DELETE FROM active_sessions WHERE session_id = $1")
            .bind(session_id)
            .execute(pool)
            .await
        {
            Ok(result) => result.rows_affected() > 0,
            Err(e) => {
                error!("failed to delete session: {}", e);
                false
            }
        }
    }

    pub async fn delete_by_user(pool: &DbPool, user_id: i32) -> bool {
        match sqlx::query("DELETE FROM active_sessions WHERE user_id = $1")
            .bind(user_id)
            .execute(pool)
            .await
        {
            Ok(result) => result.rows_affected() > 0,
            Err(e) => {
                error!("failed to delete sessions for user {}: {}", user_id, e);
                false
            }
        }
    }

    /// Deletes rows idle longer than `timeout_seconds`; returns how many.
    pub async fn cleanup(pool: &DbPool, timeout_seconds: i64) -> i64 {
        match sqlx::query(
            "DELETE FROM active_sessions
             WHERE EXTRACT(EPOCH FROM (NOW() - last_activity)) > $1",
        )
        .bind(timeout_seconds)
        .execute(pool)
        .await
        {
            Ok(result) => result.rows_affected() as i64,
            Err(e) => {
                error!("failed to clean up sessions: {}", e);
                0
            }
        }
    }

    pub async fn has_active(pool: &DbPool, user_id: i32) -> bool {
        match sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM active_sessions WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_one(pool)
        .await
        {
            Ok(count) => count > 0,
            Err(e) => {
                error!("failed to check sessions for user {}: {}", user_id, e);
                false
            }
        }
    }

    pub async fn token_by_user(pool: &DbPool, user_id: i32) -> Option<String> {
        match sqlx::query_scalar::<_, String>(
            "SELECT session_id FROM active_sessions WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(pool)
        .await
        {
            Ok(token) => token,
            Err(e) => {
                error!("failed to load session for user {}: {}", user_id, e);
                None
            }
        }
    }

    pub async fn info(pool: &DbPool, session_id: &str) -> Option<SessionRow> {
        match sqlx::query_as::<_, SessionRow>(
            "SELECT session_id, user_id, login_time, last_activity, ip_address
             FROM active_sessions WHERE session_id = $1",
        )
        .bind(session_id)
        .fetch_optional(pool)
        .await
        {
            Ok(row) => row,
            Err(e) => {
                error!("failed to load session info: {}", e);
                None
            }
        }
    }

    pub async fn count(pool: &DbPool) -> i64 {
        match sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM active_sessions")
            .fetch_one(pool)
            .await
        {
            Ok(count) => count,
            Err(e) => {
                error!("failed to count sessions: {}", e);
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DbConfig;

    async fn test_pool() -> DbPool {
        let pool = crate::db::connect(&DbConfig::load(".env"))
            .await
            .expect("postgres reachable");
        crate::db::setup(&pool).await.expect("schema");
        pool
    }

    #[tokio::test]
    #[ignore = "requires a running Postgres"]
    async fn create_is_single_row_per_user() {
        let pool = test_pool().await;
        let user = crate::db::UserRepository::create(&pool, "session_repo_test", "pw", None)
            .await
            .expect("user created");

        assert!(SessionRepository::create(&pool, "aaaa1111", user, "127.0.0.1").await);
        assert!(SessionRepository::create(&pool, "bbbb2222", user, "127.0.0.1").await);

        assert!(!SessionRepository::verify(&pool, "aaaa1111").await);
        assert!(SessionRepository::verify(&pool, "bbbb2222").await);
        assert_eq!(
            SessionRepository::token_by_user(&pool, user).await.as_deref(),
            Some("bbbb2222")
        );

        SessionRepository::delete_by_user(&pool, user).await;
    }

    #[tokio::test]
    #[ignore = "requires a running Postgres"]
    async fn cleanup_removes_only_idle_rows() {
        let pool = test_pool().await;
        let user = crate::db::UserRepository::create(&pool, "cleanup_repo_test", "pw", None)
            .await
            .expect("user created");

        assert!(SessionRepository::create(&pool, "cccc3333", user, "127.0.0.1").await);
        // A fresh row survives any positive timeout.
        assert_eq!(SessionRepository::cleanup(&pool, 1800).await, 0);
        assert!(SessionRepository::verify(&pool, "cccc3333").await);

        SessionRepository::delete_by_user(&pool, user).await;
    }
}
