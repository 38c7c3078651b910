//! Persistence adapters over the Postgres store.
//!
//! Three narrow repositories (users, finished games, active sessions), each
//! a stateless set of queries against a shared [`DbPool`]. Failures never
//! cross the adapter boundary: every method logs the error with context and
//! returns a sentinel (`None`, `false`, `0`, or an empty list) that callers
//! treat as "operation failed".

use log::{error, info};
use sqlx::postgres::PgPoolOptions;

use crate::config::DbConfig;

pub mod games;
pub mod sessions;
pub mod users;

pub use games::{GameRecord, GameRepository, GameStats};
pub use sessions::{SessionRepository, SessionRow};
pub use users::{User, UserRepository};

pub type DbPool = sqlx::PgPool;

/// Reserved user id for the built-in adversary. Seeded by [`setup`] so the
/// `game_history` foreign keys hold for AI games.
pub const AI_USER_ID: i32 = -1;

/// Opens a connection pool against the configured database.
pub async fn connect(config: &DbConfig) -> Result<DbPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(16)
        .connect(&config.url())
        .await?;
    info!("connected to database {} at {}", config.name, config.host);
    Ok(pool)
}

/// Creates the three tables if absent and seeds the reserved AI user.
pub async fn setup(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS users (
            user_id SERIAL PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            email TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            wins INTEGER NOT NULL DEFAULT 0,
            losses INTEGER NOT NULL DEFAULT 0,
            draws INTEGER NOT NULL DEFAULT 0,
            rating INTEGER NOT NULL DEFAULT 1200
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS game_history (
            game_id SERIAL PRIMARY KEY,
            white_player_id INTEGER NOT NULL REFERENCES users(user_id),
            black_player_id INTEGER NOT NULL REFERENCES users(user_id),
            result TEXT,
            moves TEXT NOT NULL DEFAULT '[]',
            start_time TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            end_time TIMESTAMPTZ,
            duration INTEGER
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS active_sessions (
            session_id TEXT PRIMARY KEY,
            user_id INTEGER NOT NULL UNIQUE REFERENCES users(user_id),
            login_time TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            last_activity TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            ip_address TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    if let Err(e) = sqlx::query(
        "INSERT INTO users (user_id, username, password_hash, rating)
         VALUES ($1, 'AI', '', 1200)
         ON CONFLICT (user_id) DO NOTHING",
    )
    .bind(AI_USER_ID)
    .execute(pool)
    .await
    {
        error!("failed to seed AI user: {}", e);
    }

    Ok(())
}
