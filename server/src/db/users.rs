//! User rows: accounts, aggregate counters and ratings.

use chrono::{DateTime, Utc};
use log::error;

use super::DbPool;

/// A `users` row without the credential column.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct User {
    pub user_id: i32,
    pub username: String,
    pub email: Option<String>,
    pub created_at: DateTime<Utc>,
    pub wins: i32,
    pub losses: i32,
    pub draws: i32,
    pub rating: i32,
}

const USER_COLUMNS: &str =
    "user_id, username, email, created_at, wins, losses, draws, rating";

pub struct UserRepository;

impl UserRepository {
    /// Inserts a new account; the credential is stored as handed in.
    pub async fn create(
        pool: &DbPool,
        username: &str,
        password_hash: &str,
        email: Option<&str>,
    ) -> Option<i32> {
        let result = sqlx::query_scalar::<_, i32>(
            "INSERT INTO users (username, password_hash, email)
             VALUES ($1, $2, $3) RETURNING user_id",
        )
        .bind(username)
        .bind(password_hash)
        .bind(email)
        .fetch_one(pool)
        .await;

        match result {
            Ok(user_id) => Some(user_id),
            Err(e) => {
                error!("failed to create user {}: {}", username, e);
                None
            }
        }
    }

    pub async fn by_id(pool: &DbPool, user_id: i32) -> Option<User> {
        let query = format!("SELECT {} FROM users WHERE user_id = $1", USER_COLUMNS);
        match sqlx::query_as::<_, User>(&query)
            .bind(user_id)
            .fetch_optional(pool)
            .await
        {
            Ok(user) => user,
            Err(e) => {
                error!("failed to load user {}: {}", user_id, e);
                None
            }
        }
    }

    pub async fn by_username(pool: &DbPool, username: &str) -> Option<User> {
        let query = format!("SELECT {} FROM users WHERE username = $1", USER_COLUMNS);
        match sqlx::query_as::<_, User>(&query)
            .bind(username)
            .fetch_optional(pool)
            .await
        {
            Ok(user) => user,
            Err(e) => {
                error!("failed to load user {}: {}", username, e);
                None
            }
        }
    }

    /// Exact match on both columns; the credential is opaque to the server.
    pub async fn authenticate(
        pool: &DbPool,
        username: &str,
        password_hash: &str,
    ) -> Option<i32> {
        let result = sqlx::query_scalar::<_, i32>(
            "SELECT user_id FROM users WHERE username = $1 AND password_hash = $2",
        )
        .bind(username)
        .bind(password_hash)
        .fetch_optional(pool)
        .await;

        match result {
            Ok(user_id) => user_id,
            Err(e) => {
                error!("failed to authenticate {}: {}", username, e);
                None
            }
        }
    }

    pub async fn increment_wins(pool: &DbPool, user_id: i32) -> bool {
        Self::bump(pool, "UPDATE users SET wins = wins + 1 WHERE user_id = $1", user_id).await
    }

    pub async fn increment_losses(pool: &DbPool, user_id: i32) -> bool {
        Self::bump(
            pool,
            "UPDATE users SET losses = losses + 1 WHERE user_id = $1",
            user_id,
        )
        .await
    }

    pub async fn increment_draws(pool: &DbPool, user_id: i32) -> bool {
        Self::bump(
            pool,
            "UPDATE users SET draws = draws + 1 WHERE user_id = $1",
            user_id,
        )
        .await
    }

    async fn bump(pool: &DbPool, query: &str, user_id: i32) -> bool {
        match sqlx::query(query).bind(user_id).execute(pool).await {
            Ok(_) => true,
            Err(e) => {
                error!("failed to update counters for user {}: {}", user_id, e);
                false
            }
        }
    }

    pub async fn update_rating(pool: &DbPool, user_id: i32, rating: i32) -> bool {
        match sqlx::query("UPDATE users SET rating = $1 WHERE user_id = $2")
            .bind(rating)
            .bind(user_id)
            .execute(pool)
            .await
        {
            Ok(_) => true,
            Err(e) => {
                error!("failed to update rating for user {}: {}", user_id, e);
                false
            }
        }
    }

    pub async fn exists(pool: &DbPool, username: &str) -> bool {
        match sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users WHERE username = $1")
            .bind(username)
            .fetch_one(pool)
            .await
        {
            Ok(count) => count > 0,
            Err(e) => {
                error!("failed to check username {}: {}", username, e);
                false
            }
        }
    }

    pub async fn top_by_rating(pool: &DbPool, limit: i64) -> Vec<User> {
        let query = format!(
            "SELECT {} FROM users WHERE user_id > 0 ORDER BY rating DESC LIMIT $1",
            USER_COLUMNS
        );
        match sqlx::query_as::<_, User>(&query)
            .bind(limit)
            .fetch_all(pool)
            .await
        {
            Ok(users) => users,
            Err(e) => {
                error!("failed to load leaderboard: {}", e);
                Vec::new()
            }
        }
    }

    pub async fn all_by_rating_desc(pool: &DbPool) -> Vec<User> {
        let query = format!(
            "SELECT {} FROM users WHERE user_id > 0 ORDER BY rating DESC",
            USER_COLUMNS
        );
        match sqlx::query_as::<_, User>(&query).fetch_all(pool).await {
            Ok(users) => users,
            Err(e) => {
                error!("failed to load user list: {}", e);
                Vec::new()
            }
        }
    }
}
