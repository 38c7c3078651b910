//! Match registry: pending challenges and live games.
//!
//! Two collections under one mutex — challenges indexed by id, challenger
//! and target; games indexed by id and by player. The registry never talks
//! to sockets: a broadcast callback injected at construction delivers
//! messages to a user id, so everything here is testable without a network.
//! Broadcast lists are prepared while the lock is held and dispatched after
//! it is released, white before black. Database I/O also happens outside
//! the critical section.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;
use log::{info, warn};
use rand::rngs::OsRng;
use rand::{Rng, RngCore};
use shared::{ChessGame, ColorPreference, GameResult, ServerMessage};

use crate::ai::ChessAi;
use crate::db::{DbPool, GameRepository, UserRepository, AI_USER_ID};

/// Rating adjustment applied to decisive results; draws leave ratings
/// unchanged.
pub const RATING_DELTA: i32 = 3;

/// Display name of the built-in adversary.
pub const AI_USERNAME: &str = "AI";

/// Delivers one message to whatever socket currently carries the user's
/// session. Installed once at startup.
pub type BroadcastFn = Box<dyn Fn(i32, &ServerMessage) + Send + Sync>;

/// A pending proposal that another user play a game.
#[derive(Debug, Clone)]
pub struct Challenge {
    pub id: String,
    pub challenger_id: i32,
    pub challenger_username: String,
    pub target_id: i32,
    pub target_username: String,
    pub preferred_color: ColorPreference,
    pub created_at: i64,
}

/// Dispatcher-facing snapshot of a live game.
#[derive(Debug, Clone)]
pub struct GameView {
    pub game_id: i32,
    pub white_id: i32,
    pub black_id: i32,
    pub white_username: String,
    pub black_username: String,
    pub active: bool,
}

/// Outcome of a move attempt. On acceptance the registry has already
/// emitted `MOVE_ACCEPTED` to the mover (before the opponent's
/// `OPPONENT_MOVE`), so the dispatcher only answers rejections.
#[derive(Debug, Clone, PartialEq)]
pub enum MoveOutcome {
    Accepted,
    Rejected(String),
}

/// Outcome of answering a draw offer.
#[derive(Debug, Clone, PartialEq)]
pub enum DrawReply {
    GameDrawn,
    Declined { opponent_id: i32 },
}

struct LiveGame {
    game_id: i32,
    white_id: i32,
    black_id: i32,
    white_username: String,
    black_username: String,
    engine: ChessGame,
    moves: Vec<String>,
    started_at: i64,
    active: bool,
    white_draw_offered: bool,
    black_draw_offered: bool,
    ai_depth: Option<u8>,
}

#[derive(Default)]
struct Maps {
    challenges: HashMap<String, Challenge>,
    by_challenger: HashMap<i32, String>,
    by_target: HashMap<i32, String>,
    games: HashMap<i32, LiveGame>,
    player_to_game: HashMap<i32, i32>,
}

impl Maps {
    fn remove_challenge(&mut self, challenge_id: &str) -> Option<Challenge> {
        let challenge = self.challenges.remove(challenge_id)?;
        self.by_challenger.remove(&challenge.challenger_id);
        self.by_target.remove(&challenge.target_id);
        Some(challenge)
    }
}

/// Snapshot taken under the lock while applying a move, consumed after
/// release.
struct AppliedMove {
    opponent_id: i32,
    mover_msg: ServerMessage,
    opponent_msg: ServerMessage,
    ended: bool,
    result: GameResult,
}

pub struct MatchRegistry {
    pool: DbPool,
    inner: Mutex<Maps>,
    broadcast: BroadcastFn,
}

impl MatchRegistry {
    pub fn new(pool: DbPool, broadcast: BroadcastFn) -> Self {
        MatchRegistry {
            pool,
            inner: Mutex::new(Maps::default()),
            broadcast,
        }
    }

    /// Sends through the injected callback. Exposed so the dispatcher can
    /// reuse the same delivery path for its own notifications.
    pub fn notify_user(&self, user_id: i32, message: &ServerMessage) {
        (self.broadcast)(user_id, message);
    }

    fn generate_challenge_id() -> String {
        let mut bytes = [0u8; 8];
        OsRng.fill_bytes(&mut bytes);
        bytes.iter().map(|b| format!("{:02x}", b)).collect()
    }

    // ------------------------------------------------------------------
    // Challenges
    // ------------------------------------------------------------------

    /// Registers a challenge and notifies the target. The dispatcher has
    /// already checked that neither side is in a game or holds a pending
    /// challenge.
    pub fn create_challenge(
        &self,
        challenger_id: i32,
        challenger_username: &str,
        target_id: i32,
        target_username: &str,
        preferred_color: ColorPreference,
    ) -> String {
        let challenge = Challenge {
            id: Self::generate_challenge_id(),
            challenger_id,
            challenger_username: challenger_username.to_string(),
            target_id,
            target_username: target_username.to_string(),
            preferred_color,
            created_at: Utc::now().timestamp(),
        };
        let id = challenge.id.clone();

        let received = ServerMessage::ChallengeReceived {
            challenge_id: id.clone(),
            from_username: challenge.challenger_username.clone(),
            from_user_id: challenger_id,
            preferred_color,
            timestamp: challenge.created_at,
        };

        {
            let mut maps = self.inner.lock().unwrap();
            maps.by_challenger.insert(challenger_id, id.clone());
            maps.by_target.insert(target_id, id.clone());
            maps.challenges.insert(id.clone(), challenge);
        }

        info!(
            "challenge {} created: {} -> {}",
            id, challenger_username, target_username
        );
        (self.broadcast)(target_id, &received);
        id
    }

    pub fn challenge_view(&self, challenge_id: &str) -> Option<Challenge> {
        let maps = self.inner.lock().unwrap();
        maps.challenges.get(challenge_id).cloned()
    }

    /// Either sent or received.
    pub fn has_pending_challenge(&self, user_id: i32) -> bool {
        let maps = self.inner.lock().unwrap();
        maps.by_challenger.contains_key(&user_id) || maps.by_target.contains_key(&user_id)
    }

    /// Resolves colors, creates the game, removes the challenge and tells
    /// both players. Returns the new game id.
    pub async fn accept_challenge(&self, challenge_id: &str) -> Option<i32> {
        let challenge = self.challenge_view(challenge_id)?;

        let (white, black) = resolve_colors(
            (challenge.challenger_id, challenge.challenger_username.clone()),
            (challenge.target_id, challenge.target_username.clone()),
            challenge.preferred_color,
        );

        let game_id = self
            .create_game(white.0, &white.1, black.0, &black.1, None)
            .await?;

        {
            let mut maps = self.inner.lock().unwrap();
            maps.remove_challenge(challenge_id);
        }

        self.broadcast_match_started(game_id, &white, &black);
        info!("match started from challenge {}: game {}", challenge_id, game_id);
        Some(game_id)
    }

    /// Removes the challenge and notifies the challenger.
    pub fn decline_challenge(&self, challenge_id: &str) -> bool {
        let removed = {
            let mut maps = self.inner.lock().unwrap();
            maps.remove_challenge(challenge_id)
        };
        match removed {
            Some(challenge) => {
                (self.broadcast)(
                    challenge.challenger_id,
                    &ServerMessage::ChallengeDeclined {
                        challenge_id: challenge.id.clone(),
                        target_username: challenge.target_username.clone(),
                    },
                );
                info!("challenge {} declined", challenge_id);
                true
            }
            None => false,
        }
    }

    /// Removes the challenge and notifies the target.
    pub fn cancel_challenge(&self, challenge_id: &str) -> bool {
        let removed = {
            let mut maps = self.inner.lock().unwrap();
            maps.remove_challenge(challenge_id)
        };
        match removed {
            Some(challenge) => {
                (self.broadcast)(
                    challenge.target_id,
                    &ServerMessage::ChallengeCancelled {
                        challenge_id: challenge.id.clone(),
                        cancelled_by: challenge.challenger_username.clone(),
                        reason: "user_cancelled".to_string(),
                    },
                );
                info!("challenge {} cancelled", challenge_id);
                true
            }
            None => false,
        }
    }

    /// Starts a game against the built-in adversary. The AI occupies the
    /// reserved user id; its broadcasts go nowhere.
    pub async fn accept_ai_challenge(
        &self,
        user_id: i32,
        username: &str,
        preferred_color: ColorPreference,
        depth: u8,
    ) -> Option<i32> {
        let (white, black) = resolve_colors(
            (user_id, username.to_string()),
            (AI_USER_ID, AI_USERNAME.to_string()),
            preferred_color,
        );

        let game_id = self
            .create_game(white.0, &white.1, black.0, &black.1, Some(depth))
            .await?;

        self.broadcast_match_started(game_id, &white, &black);
        info!("AI match started: game {} (depth {})", game_id, depth);

        // An AI playing white opens immediately.
        self.drive_ai(game_id).await;
        Some(game_id)
    }

    fn broadcast_match_started(&self, game_id: i32, white: &(i32, String), black: &(i32, String)) {
        (self.broadcast)(
            white.0,
            &ServerMessage::MatchStarted {
                game_id,
                white_player: white.1.clone(),
                black_player: black.1.clone(),
                your_color: "white".to_string(),
                opponent_username: black.1.clone(),
            },
        );
        (self.broadcast)(
            black.0,
            &ServerMessage::MatchStarted {
                game_id,
                white_player: white.1.clone(),
                black_player: black.1.clone(),
                your_color: "black".to_string(),
                opponent_username: white.1.clone(),
            },
        );
    }

    // ------------------------------------------------------------------
    // Games
    // ------------------------------------------------------------------

    /// Allocates the id through the persistence adapter and installs the
    /// live record with a fresh rule engine.
    pub async fn create_game(
        &self,
        white_id: i32,
        white_username: &str,
        black_id: i32,
        black_username: &str,
        ai_depth: Option<u8>,
    ) -> Option<i32> {
        let game_id = match GameRepository::create(&self.pool, white_id, black_id).await {
            Some(game_id) => game_id,
            None => {
                warn!("could not allocate a game row, match not started");
                return None;
            }
        };

        {
            let mut maps = self.inner.lock().unwrap();
            maps.games.insert(
                game_id,
                LiveGame {
                    game_id,
                    white_id,
                    black_id,
                    white_username: white_username.to_string(),
                    black_username: black_username.to_string(),
                    engine: ChessGame::new(),
                    moves: Vec::new(),
                    started_at: Utc::now().timestamp(),
                    active: true,
                    white_draw_offered: false,
                    black_draw_offered: false,
                    ai_depth,
                },
            );
            // The adversary may sit in any number of games, so only humans
            // get a player-to-game entry.
            if white_id != AI_USER_ID {
                maps.player_to_game.insert(white_id, game_id);
            }
            if black_id != AI_USER_ID {
                maps.player_to_game.insert(black_id, game_id);
            }
        }

        info!(
            "game {} created: {} (white) vs {} (black)",
            game_id, white_username, black_username
        );
        Some(game_id)
    }

    pub fn game_view(&self, game_id: i32) -> Option<GameView> {
        let maps = self.inner.lock().unwrap();
        maps.games.get(&game_id).map(|game| GameView {
            game_id: game.game_id,
            white_id: game.white_id,
            black_id: game.black_id,
            white_username: game.white_username.clone(),
            black_username: game.black_username.clone(),
            active: game.active,
        })
    }

    pub fn game_id_for_player(&self, user_id: i32) -> Option<i32> {
        let maps = self.inner.lock().unwrap();
        maps.player_to_game.get(&user_id).copied()
    }

    pub fn is_player_in_game(&self, user_id: i32) -> bool {
        self.game_id_for_player(user_id).is_some()
    }

    /// Arbitrates one move: membership, turn parity, rule-engine legality.
    /// On success the move is logged and persisted, `MOVE_ACCEPTED` goes to
    /// the mover before `OPPONENT_MOVE` goes to the opponent, and an
    /// engine-reported end triggers settlement exactly once. In an AI game
    /// the adversary answers a human move before this returns.
    pub async fn make_move(&self, game_id: i32, player_id: i32, mv: &str) -> MoveOutcome {
        let outcome = self.apply_move(game_id, player_id, mv).await;
        if outcome == MoveOutcome::Accepted && player_id != AI_USER_ID {
            self.drive_ai(game_id).await;
        }
        outcome
    }

    async fn apply_move(&self, game_id: i32, player_id: i32, mv: &str) -> MoveOutcome {
        let applied = {
            let mut maps = self.inner.lock().unwrap();
            let game = match maps.games.get_mut(&game_id) {
                Some(game) => game,
                None => return MoveOutcome::Rejected("Game not found".to_string()),
            };
            if !game.active {
                return MoveOutcome::Rejected("Game is not active".to_string());
            }

            let player_is_white = if player_id == game.white_id {
                true
            } else if player_id == game.black_id {
                false
            } else {
                return MoveOutcome::Rejected("You are not a player in this game".to_string());
            };

            if game.engine.is_white_to_move() != player_is_white {
                return MoveOutcome::Rejected("Not your turn".to_string());
            }
            if !game.engine.make_move(mv) {
                return MoveOutcome::Rejected("Illegal move".to_string());
            }

            game.moves.push(mv.to_string());

            let move_number = game.engine.turn();
            let ended = game.engine.is_ended();
            let result = game.engine.result();
            let next_is_white = game.engine.is_white_to_move();
            let is_check = game.engine.is_king_in_check(next_is_white);
            let board_state = game.engine.fen();
            let current_turn = if next_is_white { "white" } else { "black" }.to_string();
            let opponent_id = if player_is_white {
                game.black_id
            } else {
                game.white_id
            };

            AppliedMove {
                opponent_id,
                mover_msg: ServerMessage::MoveAccepted {
                    game_id,
                    mv: mv.to_string(),
                    move_number,
                    is_check,
                    is_checkmate: ended,
                    board_state: board_state.clone(),
                    current_turn: current_turn.clone(),
                },
                opponent_msg: ServerMessage::OpponentMove {
                    game_id,
                    mv: mv.to_string(),
                    move_number,
                    is_check,
                    captured_piece: None,
                    board_state,
                    current_turn,
                    white_player: game.white_username.clone(),
                    black_player: game.black_username.clone(),
                    timestamp: Utc::now().timestamp(),
                },
                ended,
                result,
            }
        };

        GameRepository::append_move(&self.pool, game_id, mv).await;

        (self.broadcast)(player_id, &applied.mover_msg);
        (self.broadcast)(applied.opponent_id, &applied.opponent_msg);

        if applied.ended {
            self.settle(game_id, applied.result, "checkmate", None).await;
        }
        MoveOutcome::Accepted
    }

    /// Lets the adversary answer when it is its turn in an AI game.
    async fn drive_ai(&self, game_id: i32) {
        let prepared = {
            let maps = self.inner.lock().unwrap();
            match maps.games.get(&game_id) {
                Some(game) if game.active => match game.ai_depth {
                    Some(depth) => {
                        let ai_is_white = game.white_id == AI_USER_ID;
                        if game.engine.is_white_to_move() == ai_is_white {
                            Some((game.engine.clone(), depth, ai_is_white))
                        } else {
                            None
                        }
                    }
                    None => None,
                },
                _ => None,
            }
        };

        let (engine, depth, ai_is_white) = match prepared {
            Some(prepared) => prepared,
            None => return,
        };

        let chosen = tokio::task::spawn_blocking(move || {
            ChessAi::new(depth).choose_move(&engine, ai_is_white)
        })
        .await
        .ok()
        .flatten();

        match chosen {
            Some(mv) => {
                if let MoveOutcome::Rejected(reason) =
                    self.apply_move(game_id, AI_USER_ID, &mv).await
                {
                    warn!("AI move {} rejected in game {}: {}", mv, game_id, reason);
                }
            }
            None => warn!("AI found no move in game {}", game_id),
        }
    }

    /// Resignation: the opponent's color wins.
    pub async fn resign(&self, game_id: i32, player_id: i32) -> bool {
        let result = {
            let maps = self.inner.lock().unwrap();
            match maps.games.get(&game_id) {
                Some(game) if game.active => {
                    if player_id == game.white_id {
                        Some(GameResult::BlackWin)
                    } else if player_id == game.black_id {
                        Some(GameResult::WhiteWin)
                    } else {
                        None
                    }
                }
                _ => None,
            }
        };

        match result {
            Some(result) => {
                info!("player {} resigned game {}", player_id, game_id);
                self.settle(game_id, result, "resignation", None).await;
                true
            }
            None => false,
        }
    }

    /// Flags the offering side and notifies the opponent.
    pub fn offer_draw(&self, game_id: i32, player_id: i32) -> bool {
        let prepared = {
            let mut maps = self.inner.lock().unwrap();
            match maps.games.get_mut(&game_id) {
                Some(game) if game.active => {
                    let player_is_white = if player_id == game.white_id {
                        true
                    } else if player_id == game.black_id {
                        false
                    } else {
                        return false;
                    };
                    if player_is_white {
                        game.white_draw_offered = true;
                    } else {
                        game.black_draw_offered = true;
                    }
                    let opponent_id = if player_is_white {
                        game.black_id
                    } else {
                        game.white_id
                    };
                    let from_username = if player_is_white {
                        game.white_username.clone()
                    } else {
                        game.black_username.clone()
                    };
                    Some((opponent_id, from_username))
                }
                _ => None,
            }
        };

        match prepared {
            Some((opponent_id, from_username)) => {
                (self.broadcast)(
                    opponent_id,
                    &ServerMessage::DrawOfferReceived {
                        game_id,
                        from_username,
                        timestamp: Utc::now().timestamp(),
                    },
                );
                true
            }
            None => false,
        }
    }

    /// Answers the opponent's outstanding offer. Fails (None) when there is
    /// nothing to answer. Both flags are cleared either way.
    pub async fn respond_to_draw(
        &self,
        game_id: i32,
        player_id: i32,
        accepted: bool,
    ) -> Option<DrawReply> {
        let opponent_id = {
            let mut maps = self.inner.lock().unwrap();
            let game = match maps.games.get_mut(&game_id) {
                Some(game) if game.active => game,
                _ => return None,
            };
            let player_is_white = if player_id == game.white_id {
                true
            } else if player_id == game.black_id {
                false
            } else {
                return None;
            };

            let opponent_offered = if player_is_white {
                game.black_draw_offered
            } else {
                game.white_draw_offered
            };
            if !opponent_offered {
                return None;
            }

            game.white_draw_offered = false;
            game.black_draw_offered = false;
            if player_is_white {
                game.black_id
            } else {
                game.white_id
            }
        };

        if accepted {
            self.settle(game_id, GameResult::Draw, "draw_agreement", None)
                .await;
            Some(DrawReply::GameDrawn)
        } else {
            Some(DrawReply::Declined { opponent_id })
        }
    }

    /// Forfeits the leaver's live game (opponent wins, survivor is the
    /// only one notified) and withdraws any pending challenge.
    pub async fn handle_player_disconnect(&self, user_id: i32) -> bool {
        let challenge_note = {
            let mut maps = self.inner.lock().unwrap();
            let challenge_id = maps
                .by_challenger
                .get(&user_id)
                .or_else(|| maps.by_target.get(&user_id))
                .cloned();
            challenge_id
                .and_then(|id| maps.remove_challenge(&id))
                .map(|challenge| {
                    if challenge.challenger_id == user_id {
                        (
                            challenge.target_id,
                            ServerMessage::ChallengeCancelled {
                                challenge_id: challenge.id.clone(),
                                cancelled_by: challenge.challenger_username.clone(),
                                reason: "user_disconnected".to_string(),
                            },
                        )
                    } else {
                        (
                            challenge.challenger_id,
                            ServerMessage::ChallengeDeclined {
                                challenge_id: challenge.id.clone(),
                                target_username: challenge.target_username.clone(),
                            },
                        )
                    }
                })
        };
        if let Some((recipient, message)) = challenge_note {
            (self.broadcast)(recipient, &message);
        }

        let forfeit = {
            let maps = self.inner.lock().unwrap();
            let game_id = match maps.player_to_game.get(&user_id) {
                Some(game_id) => *game_id,
                None => return false,
            };
            match maps.games.get(&game_id) {
                Some(game) if game.active => {
                    let player_is_white = user_id == game.white_id;
                    let result = if player_is_white {
                        GameResult::BlackWin
                    } else {
                        GameResult::WhiteWin
                    };
                    let opponent_id = if player_is_white {
                        game.black_id
                    } else {
                        game.white_id
                    };
                    Some((game_id, result, opponent_id))
                }
                _ => None,
            }
        };

        match forfeit {
            Some((game_id, result, opponent_id)) => {
                info!(
                    "player {} disconnected from game {}, opponent wins",
                    user_id, game_id
                );
                self.settle(game_id, result, "opponent_disconnected", Some(opponent_id))
                    .await;
                true
            }
            None => false,
        }
    }

    pub fn game_state(&self, game_id: i32) -> Option<ServerMessage> {
        let maps = self.inner.lock().unwrap();
        maps.games.get(&game_id).map(|game| {
            let ended = game.engine.is_ended();
            ServerMessage::GameState {
                game_id,
                white_player: game.white_username.clone(),
                black_player: game.black_username.clone(),
                current_turn: if game.engine.is_white_to_move() {
                    "white"
                } else {
                    "black"
                }
                .to_string(),
                move_number: game.engine.turn(),
                move_history: game.moves.clone(),
                is_active: game.active,
                is_ended: ended,
                board_state: game.engine.fen(),
                result: if ended { Some(game.engine.result()) } else { None },
            }
        })
    }

    pub fn active_game_count(&self) -> usize {
        self.inner.lock().unwrap().games.len()
    }

    pub fn pending_challenge_count(&self) -> usize {
        self.inner.lock().unwrap().challenges.len()
    }

    // ------------------------------------------------------------------
    // Settlement
    // ------------------------------------------------------------------

    /// Single termination routine shared by mate, resignation, draw
    /// agreement and disconnect. Flipping `active` under the lock makes a
    /// second settlement of the same game a no-op, so every game settles
    /// exactly once.
    async fn settle(
        &self,
        game_id: i32,
        result: GameResult,
        reason: &str,
        only_notify: Option<i32>,
    ) {
        struct Snapshot {
            white_id: i32,
            black_id: i32,
            white_username: String,
            black_username: String,
            moves: Vec<String>,
            started_at: i64,
        }

        let snapshot = {
            let mut maps = self.inner.lock().unwrap();
            match maps.games.get_mut(&game_id) {
                Some(game) if game.active => {
                    game.active = false;
                    Snapshot {
                        white_id: game.white_id,
                        black_id: game.black_id,
                        white_username: game.white_username.clone(),
                        black_username: game.black_username.clone(),
                        moves: game.moves.clone(),
                        started_at: game.started_at,
                    }
                }
                _ => return,
            }
        };

        let moves_json =
            serde_json::to_string(&snapshot.moves).unwrap_or_else(|_| "[]".to_string());
        GameRepository::end(&self.pool, game_id, result.as_str(), &moves_json).await;

        match result {
            GameResult::WhiteWin => {
                self.settle_decisive(snapshot.white_id, snapshot.black_id).await;
            }
            GameResult::BlackWin => {
                self.settle_decisive(snapshot.black_id, snapshot.white_id).await;
            }
            GameResult::Draw => {
                UserRepository::increment_draws(&self.pool, snapshot.white_id).await;
                UserRepository::increment_draws(&self.pool, snapshot.black_id).await;
            }
            _ => {}
        }

        let (winner, loser) = match result {
            GameResult::WhiteWin => (
                Some(snapshot.white_username.clone()),
                Some(snapshot.black_username.clone()),
            ),
            GameResult::BlackWin => (
                Some(snapshot.black_username.clone()),
                Some(snapshot.white_username.clone()),
            ),
            _ => (None, None),
        };

        let message = ServerMessage::GameEnded {
            game_id,
            result,
            reason: reason.to_string(),
            winner,
            loser,
            move_count: snapshot.moves.len(),
            duration_seconds: Utc::now().timestamp() - snapshot.started_at,
            white_player: snapshot.white_username.clone(),
            black_player: snapshot.black_username.clone(),
            move_history: snapshot.moves.clone(),
        };

        match only_notify {
            Some(user_id) => (self.broadcast)(user_id, &message),
            None => {
                (self.broadcast)(snapshot.white_id, &message);
                (self.broadcast)(snapshot.black_id, &message);
            }
        }

        info!("game {} ended: {} ({})", game_id, result.as_str(), reason);

        let mut maps = self.inner.lock().unwrap();
        if let Some(game) = maps.games.remove(&game_id) {
            maps.player_to_game.remove(&game.white_id);
            maps.player_to_game.remove(&game.black_id);
        }
    }

    async fn settle_decisive(&self, winner_id: i32, loser_id: i32) {
        UserRepository::increment_wins(&self.pool, winner_id).await;
        UserRepository::increment_losses(&self.pool, loser_id).await;
        if let Some(winner) = UserRepository::by_id(&self.pool, winner_id).await {
            UserRepository::update_rating(&self.pool, winner_id, winner.rating + RATING_DELTA)
                .await;
        }
        if let Some(loser) = UserRepository::by_id(&self.pool, loser_id).await {
            UserRepository::update_rating(&self.pool, loser_id, loser.rating - RATING_DELTA)
                .await;
        }
    }

    /// Installs a live game directly, bypassing the persistence adapter.
    #[cfg(test)]
    pub(crate) fn insert_game_for_test(
        &self,
        game_id: i32,
        white: (i32, &str),
        black: (i32, &str),
        ai_depth: Option<u8>,
    ) {
        let mut maps = self.inner.lock().unwrap();
        maps.games.insert(
            game_id,
            LiveGame {
                game_id,
                white_id: white.0,
                black_id: black.0,
                white_username: white.1.to_string(),
                black_username: black.1.to_string(),
                engine: ChessGame::new(),
                moves: Vec::new(),
                started_at: Utc::now().timestamp(),
                active: true,
                white_draw_offered: false,
                black_draw_offered: false,
                ai_depth,
            },
        );
        if white.0 != AI_USER_ID {
            maps.player_to_game.insert(white.0, game_id);
        }
        if black.0 != AI_USER_ID {
            maps.player_to_game.insert(black.0, game_id);
        }
    }
}

/// Honors the challenger's preference; `random` flips a coin. Returns
/// `(white, black)` as `(user_id, username)` pairs.
fn resolve_colors(
    challenger: (i32, String),
    target: (i32, String),
    preferred_color: ColorPreference,
) -> ((i32, String), (i32, String)) {
    match preferred_color {
        ColorPreference::White => (challenger, target),
        ColorPreference::Black => (target, challenger),
        ColorPreference::Random => {
            if rand::thread_rng().gen_bool(0.5) {
                (challenger, target)
            } else {
                (target, challenger)
            }
        }
    }
}
