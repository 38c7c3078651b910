//! Finished-game rows: created empty at match start, closed at settlement.

use chrono::{DateTime, Utc};
use log::error;

use super::DbPool;

/// A `game_history` row joined with both player names.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct GameRecord {
    pub game_id: i32,
    pub white_player_id: i32,
    pub black_player_id: i32,
    pub white_username: Option<String>,
    pub black_username: Option<String>,
    pub result: Option<String>,
    pub moves: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration: Option<i32>,
}

/// Win/loss/draw aggregate for one user.
#[derive(Debug, Clone, Copy, Default, sqlx::FromRow)]
pub struct GameStats {
    pub total_games: i64,
    pub wins: i64,
    pub losses: i64,
    pub draws: i64,
}

const GAME_COLUMNS: &str = "g.game_id, g.white_player_id, g.black_player_id, \
     u1.username AS white_username, u2.username AS black_username, \
     g.result, g.moves, g.start_time, g.end_time, g.duration";

const GAME_JOINS: &str = "FROM game_history g \
     LEFT JOIN users u1 ON g.white_player_id = u1.user_id \
     LEFT JOIN users u2 ON g.black_player_id = u2.user_id";

pub struct GameRepository;

impl GameRepository {
    /// Allocates a game id: inserts a row with start-time now, an empty
    /// move log and no result.
    pub async fn create(pool: &DbPool, white_id: i32, black_id: i32) -> Option<i32> {
        let result = sqlx::query_scalar::<_, i32>(
            "INSERT INTO game_history (white_player_id, black_player_id, start_time, moves)
             VALUES ($1, $2, NOW(), '[]') RETURNING game_id",
        )
        .bind(white_id)
        .bind(black_id)
        .fetch_one(pool)
        .await;

        match result {
            Ok(game_id) => Some(game_id),
            Err(e) => {
                error!("failed to create game row: {}", e);
                None
            }
        }
    }

    /// Appends one move token to the stored JSON array.
    pub async fn append_move(pool: &DbPool, game_id: i32, mv: &str) -> bool {
        let result: Result<(), sqlx::Error> = async {
            let mut txn = pool.begin().await?;
            let moves: String =
                sqlx::query_scalar("SELECT moves FROM game_history WHERE game_id = $1")
                    .bind(game_id)
                    .fetch_one(&mut *txn)
                    .await?;

            let mut log: Vec<String> = serde_json::from_str(&moves).unwrap_or_default();
            log.push(mv.to_string());
            let updated = serde_json::to_string(&log).unwrap_or_else(|_| "[]".to_string());

            sqlx::query("UPDATE game_history SET moves = $1 WHERE game_id = $2")
                .bind(&updated)
                .bind(game_id)
                .execute(&mut *txn)
                .await?;
            txn.commit().await
        }
        .await;

        match result {
            Ok(()) => true,
            Err(e) => {
                error!("failed to append move to game {}: {}", game_id, e);
                false
            }
        }
    }

    /// Closes the row: result, final move log, end-time and duration.
    pub async fn end(pool: &DbPool, game_id: i32, result: &str, moves_json: &str) -> bool {
        let outcome = sqlx::query(
            "UPDATE game_history SET
                 result = $1,
                 moves = $2,
                 end_time = NOW(),
                 duration = EXTRACT(EPOCH FROM (NOW() - start_time))::INT
             WHERE game_id = $3",
        )
        .bind(result)
        .bind(moves_json)
        .bind(game_id)
        .execute(pool)
        .await;

        match outcome {
            Ok(_) => true,
            Err(e) => {
                error!("failed to close game {}: {}", game_id, e);
                false
            }
        }
    }

    pub async fn by_id(pool: &DbPool, game_id: i32) -> Option<GameRecord> {
        let query = format!(
            "SELECT {} {} WHERE g.game_id = $1",
            GAME_COLUMNS, GAME_JOINS
        );
        match sqlx::query_as::<_, GameRecord>(&query)
            .bind(game_id)
            .fetch_optional(pool)
            .await
        {
            Ok(game) => game,
            Err(e) => {
                error!("failed to load game {}: {}", game_id, e);
                None
            }
        }
    }

    pub async fn by_user(pool: &DbPool, user_id: i32, limit: i64) -> Vec<GameRecord> {
        let query = format!(
            "SELECT {} {} WHERE g.white_player_id = $1 OR g.black_player_id = $1
             ORDER BY g.start_time DESC LIMIT $2",
            GAME_COLUMNS, GAME_JOINS
        );
        match sqlx::query_as::<_, GameRecord>(&query)
            .bind(user_id)
            .bind(limit)
            .fetch_all(pool)
            .await
        {
            Ok(games) => games,
            Err(e) => {
                error!("failed to load games for user {}: {}", user_id, e);
                Vec::new()
            }
        }
    }

    pub async fn recent(pool: &DbPool, limit: i64) -> Vec<GameRecord> {
        let query = format!(
            "SELECT {} {} ORDER BY g.start_time DESC LIMIT $1",
            GAME_COLUMNS, GAME_JOINS
        );
        match sqlx::query_as::<_, GameRecord>(&query)
            .bind(limit)
            .fetch_all(pool)
            .await
        {
            Ok(games) => games,
            Err(e) => {
                error!("failed to load recent games: {}", e);
                Vec::new()
            }
        }
    }

    /// All games the two players finished against each other.
    pub async fn between(pool: &DbPool, player_a: i32, player_b: i32) -> Vec<GameRecord> {
        let query = format!(
            "SELECT {} {} WHERE (g.white_player_id = $1 AND g.black_player_id = $2)
                 OR (g.white_player_id = $2 AND g.black_player_id = $1)
             ORDER BY g.start_time DESC",
            GAME_COLUMNS, GAME_JOINS
        );
        match sqlx::query_as::<_, GameRecord>(&query)
            .bind(player_a)
            .bind(player_b)
            .fetch_all(pool)
            .await
        {
            Ok(games) => games,
            Err(e) => {
                error!(
                    "failed to load games between {} and {}: {}",
                    player_a, player_b, e
                );
                Vec::new()
            }
        }
    }

    pub async fn exists(pool: &DbPool, game_id: i32) -> bool {
        match sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM game_history WHERE game_id = $1",
        )
        .bind(game_id)
        .fetch_one(pool)
        .await
        {
            Ok(count) => count > 0,
            Err(e) => {
                error!("failed to check game {}: {}", game_id, e);
                false
            }
        }
    }

    pub async fn delete(pool: &DbPool, game_id: i32) -> bool {
        match sqlx::query("DELETE FROM game_history WHERE game_id = $1")
            .bind(game_id)
            .execute(pool)
            .await
        {
            Ok(result) => result.rows_affected() > 0,
            Err(e) => {
                error!("failed to delete game {}: {}", game_id, e);
                false
            }
        }
    }

    pub async fn stats(pool: &DbPool, user_id: i32) -> Option<GameStats> {
        let result = sqlx::query_as::<_, GameStats>(
            "SELECT COUNT(*) AS total_games,
                 COUNT(*) FILTER (WHERE (white_player_id = $1 AND result = 'WHITE_WIN')
                     OR (black_player_id = $1 AND result = 'BLACK_WIN')) AS wins,
                 COUNT(*) FILTER (WHERE (white_player_id = $1 AND result = 'BLACK_WIN')
                     OR (black_player_id = $1 AND result = 'WHITE_WIN')) AS losses,
                 COUNT(*) FILTER (WHERE result = 'DRAW') AS draws
             FROM game_history
             WHERE white_player_id = $1 OR black_player_id = $1",
        )
        .bind(user_id)
        .fetch_one(pool)
        .await;

        match result {
            Ok(stats) => Some(stats),
            Err(e) => {
                error!("failed to load stats for user {}: {}", user_id, e);
                None
            }
        }
    }
}
