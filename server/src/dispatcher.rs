//! Per-connection message dispatcher.
//!
//! A stateless router from decoded requests to the two registries and the
//! persistence adapters. Every request gets exactly one direct response;
//! anything beyond that (challenges, opponent moves, game endings) is
//! emitted as a broadcast by the registries. Authenticated handlers verify
//! the session first and fail with `INVALID_SESSION` before touching any
//! other state.

use std::sync::Arc;

use chrono::Utc;
use log::debug;
use serde_json::Value;
use shared::{
    ClientRequest, ColorPreference, GameSummary, LeaderboardEntry, PlayerEntry, PlayerStatus,
    ServerMessage, UserData,
};
use tokio::sync::mpsc::UnboundedSender;

use crate::ai;
use crate::db::{DbPool, GameRepository, User, UserRepository};
use crate::matches::{DrawReply, MatchRegistry, MoveOutcome};
use crate::net::{ConnId, Outbound};
use crate::session::{SessionEntry, SessionRegistry};

/// Radius of the lobby window around the caller in the rating-ordered
/// user list.
const PLAYER_WINDOW: i64 = 10;

pub struct Dispatcher {
    conn: ConnId,
    ip: String,
    out: UnboundedSender<Outbound>,
    sessions: Arc<SessionRegistry>,
    matches: Arc<MatchRegistry>,
    pool: DbPool,
}

impl Dispatcher {
    pub fn new(
        conn: ConnId,
        ip: String,
        out: UnboundedSender<Outbound>,
        sessions: Arc<SessionRegistry>,
        matches: Arc<MatchRegistry>,
        pool: DbPool,
    ) -> Self {
        Dispatcher {
            conn,
            ip,
            out,
            sessions,
            matches,
            pool,
        }
    }

    /// Decodes one text message and routes it. Client-protocol errors get
    /// an `ERROR` response and the connection survives.
    pub async fn handle(&self, raw: &str) {
        let value: Value = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(_) => {
                self.send_error("PARSE_ERROR", "Failed to parse message JSON");
                return;
            }
        };

        let tag = match value.get("type").and_then(Value::as_str) {
            Some(tag) => tag.to_string(),
            None => {
                self.send_error("INVALID_MESSAGE", "Message must contain 'type' field");
                return;
            }
        };

        match serde_json::from_value::<ClientRequest>(value) {
            Ok(request) => self.dispatch(request).await,
            Err(_) if ClientRequest::KNOWN_TYPES.contains(&tag.as_str()) => {
                self.send_error(
                    "MISSING_FIELD",
                    &format!("Missing or invalid fields for {}", tag),
                );
            }
            Err(_) => {
                self.send_error(
                    "UNKNOWN_MESSAGE_TYPE",
                    &format!("Unknown message type: {}", tag),
                );
            }
        }
    }

    async fn dispatch(&self, request: ClientRequest) {
        match request {
            ClientRequest::VerifySession { session_id } => {
                self.handle_verify_session(session_id).await;
            }
            ClientRequest::Login { username, password } => {
                self.handle_login(username, password).await;
            }
            ClientRequest::Register {
                username,
                password,
                email,
            } => {
                self.handle_register(username, password, email).await;
            }
            ClientRequest::Logout { session_id } => {
                self.handle_logout(session_id).await;
            }
            ClientRequest::GetAvailablePlayers { session_id } => {
                self.handle_get_available_players(session_id).await;
            }
            ClientRequest::Challenge {
                session_id,
                target_username,
                preferred_color,
            } => {
                self.handle_challenge(session_id, target_username, preferred_color)
                    .await;
            }
            ClientRequest::AiChallenge {
                session_id,
                preferred_color,
                depth,
            } => {
                self.handle_ai_challenge(session_id, preferred_color, depth)
                    .await;
            }
            ClientRequest::AcceptChallenge {
                session_id,
                challenge_id,
            } => {
                self.handle_accept_challenge(session_id, challenge_id).await;
            }
            ClientRequest::DeclineChallenge {
                session_id,
                challenge_id,
            } => {
                self.handle_decline_challenge(session_id, challenge_id).await;
            }
            ClientRequest::CancelChallenge {
                session_id,
                challenge_id,
            } => {
                self.handle_cancel_challenge(session_id, challenge_id).await;
            }
            ClientRequest::Move {
                session_id,
                game_id,
                mv,
            } => {
                self.handle_move(session_id, game_id, mv).await;
            }
            ClientRequest::Resign {
                session_id,
                game_id,
            } => {
                self.handle_resign(session_id, game_id).await;
            }
            ClientRequest::DrawOffer {
                session_id,
                game_id,
            } => {
                self.handle_draw_offer(session_id, game_id).await;
            }
            ClientRequest::DrawResponse {
                session_id,
                game_id,
                accepted,
            } => {
                self.handle_draw_response(session_id, game_id, accepted)
                    .await;
            }
            ClientRequest::RequestRematch {
                session_id,
                previous_game_id,
            } => {
                self.handle_request_rematch(session_id, previous_game_id)
                    .await;
            }
            ClientRequest::GetGameState {
                session_id,
                game_id,
            } => {
                self.handle_get_game_state(session_id, game_id).await;
            }
            ClientRequest::GetGameHistory {
                session_id,
                user_id,
                limit,
            } => {
                self.handle_get_game_history(session_id, user_id, limit)
                    .await;
            }
            ClientRequest::GetLeaderboard { session_id, limit } => {
                self.handle_get_leaderboard(session_id, limit).await;
            }
            ClientRequest::Ping { timestamp } => {
                self.handle_ping(timestamp);
            }
            ClientRequest::ChatMessage { .. } => {
                self.send_error("NOT_IMPLEMENTED", "Chat feature not yet implemented");
            }
        }
    }

    fn send(&self, message: &ServerMessage) {
        match serde_json::to_string(message) {
            Ok(text) => {
                let _ = self.out.send(Outbound::Text(text));
            }
            Err(e) => debug!("could not serialize response: {}", e),
        }
    }

    fn send_error(&self, error_code: &str, message: &str) {
        self.send(&ServerMessage::Error {
            error_code: error_code.to_string(),
            message: message.to_string(),
            severity: "error".to_string(),
            timestamp: Utc::now().timestamp(),
        });
    }

    /// Verifies the session and loads its view; answers `INVALID_SESSION`
    /// itself on failure.
    async fn require_session(&self, session_id: &str) -> Option<SessionEntry> {
        if !self.sessions.verify(session_id).await {
            self.send_error("INVALID_SESSION", "Session not found or expired");
            return None;
        }
        let view = self.sessions.session_view(session_id);
        if view.is_none() {
            self.send_error("INVALID_SESSION", "Session not found or expired");
        }
        view
    }

    fn user_data(user: &User) -> UserData {
        UserData {
            user_id: user.user_id,
            username: user.username.clone(),
            wins: user.wins,
            losses: user.losses,
            draws: user.draws,
            rating: user.rating,
        }
    }

    // ------------------------------------------------------------------
    // Session and authentication
    // ------------------------------------------------------------------

    async fn handle_verify_session(&self, session_id: String) {
        if !self.sessions.verify(&session_id).await {
            self.send(&ServerMessage::SessionInvalid {
                reason: "expired".to_string(),
                message: "Session expired. Please log in again.".to_string(),
            });
            return;
        }

        if self.sessions.bind(&session_id, self.conn).is_err() {
            debug!("rejected duplicate bind for an already connected session");
            self.send(&ServerMessage::DuplicateSession {
                session_id,
                reason: "already_connected".to_string(),
                message: "Multiple connections with the same session are not allowed. \
                          Please close the existing connection first."
                    .to_string(),
                timestamp: Utc::now().timestamp(),
            });
            return;
        }

        let view = match self.sessions.session_view(&session_id) {
            Some(view) => view,
            None => {
                self.send_error("INVALID_SESSION", "Session not found or expired");
                return;
            }
        };

        let user_data = UserRepository::by_id(&self.pool, view.user_id)
            .await
            .map(|user| Self::user_data(&user));

        self.send(&ServerMessage::SessionValid {
            session_id,
            user_data,
            active_game_id: self.matches.game_id_for_player(view.user_id),
            last_activity: view.last_activity,
            message: "Session restored successfully".to_string(),
        });
    }

    async fn handle_login(&self, username: String, password: String) {
        let failure = |message: &str| ServerMessage::LoginResponse {
            status: "failure".to_string(),
            session_id: None,
            user_data: None,
            message: message.to_string(),
        };

        let user_id = match UserRepository::authenticate(&self.pool, &username, &password).await
        {
            Some(user_id) => user_id,
            None => {
                debug!("login failed for {}", username);
                self.send(&failure("Invalid username or password"));
                return;
            }
        };

        let user = match UserRepository::by_id(&self.pool, user_id).await {
            Some(user) => user,
            None => {
                self.send(&failure("Failed to retrieve user data"));
                return;
            }
        };

        // A new login supersedes any previous session of the same user,
        // in the store and in the cache.
        let token = match self
            .sessions
            .create_session(user_id, &username, self.conn, &self.ip)
            .await
        {
            Some(token) => token,
            None => {
                self.send(&failure("Failed to create session"));
                return;
            }
        };

        self.send(&ServerMessage::LoginResponse {
            status: "success".to_string(),
            session_id: Some(token),
            user_data: Some(Self::user_data(&user)),
            message: "Login successful".to_string(),
        });
    }

    async fn handle_register(
        &self,
        username: String,
        password: String,
        email: Option<String>,
    ) {
        if UserRepository::exists(&self.pool, &username).await {
            self.send(&ServerMessage::RegisterResponse {
                status: "failure".to_string(),
                user_id: None,
                message: "Username already exists".to_string(),
            });
            return;
        }

        match UserRepository::create(&self.pool, &username, &password, email.as_deref()).await {
            Some(user_id) => {
                self.send(&ServerMessage::RegisterResponse {
                    status: "success".to_string(),
                    user_id: Some(user_id),
                    message: "Registration successful".to_string(),
                });
            }
            None => {
                self.send(&ServerMessage::RegisterResponse {
                    status: "failure".to_string(),
                    user_id: None,
                    message: "Failed to create user account".to_string(),
                });
            }
        }
    }

    async fn handle_logout(&self, session_id: String) {
        let Some(_session) = self.require_session(&session_id).await else {
            return;
        };

        self.sessions.remove_session(&session_id).await;
        self.send(&ServerMessage::LogoutResponse {
            status: "success".to_string(),
            message: "Logged out successfully".to_string(),
        });
    }

    // ------------------------------------------------------------------
    // Lobby
    // ------------------------------------------------------------------

    async fn handle_get_available_players(&self, session_id: String) {
        let Some(session) = self.require_session(&session_id).await else {
            return;
        };

        let all_users = UserRepository::all_by_rating_desc(&self.pool).await;
        let caller_index = all_users
            .iter()
            .position(|user| user.user_id == session.user_id)
            .map(|index| index as i64)
            .unwrap_or(-1);

        let mut players = Vec::new();
        for (index, user) in all_users.iter().enumerate() {
            let index = index as i64;
            if index < caller_index - PLAYER_WINDOW
                || index > caller_index + PLAYER_WINDOW
                || index == caller_index
            {
                continue;
            }
            if !self.sessions.is_online(user.user_id) {
                continue;
            }

            let status = if self.matches.is_player_in_game(user.user_id) {
                PlayerStatus::InGame
            } else if self.matches.has_pending_challenge(user.user_id) {
                PlayerStatus::Busy
            } else {
                PlayerStatus::Available
            };

            players.push(PlayerEntry {
                username: user.username.clone(),
                rating: user.rating,
                status,
            });
        }

        self.send(&ServerMessage::PlayerList { players });
    }

    // ------------------------------------------------------------------
    // Matchmaking
    // ------------------------------------------------------------------

    async fn handle_challenge(
        &self,
        session_id: String,
        target_username: String,
        preferred_color: ColorPreference,
    ) {
        let Some(session) = self.require_session(&session_id).await else {
            return;
        };

        if self.matches.is_player_in_game(session.user_id) {
            self.send_error("ALREADY_IN_GAME", "You are already in a game");
            return;
        }
        if self.matches.has_pending_challenge(session.user_id) {
            self.send_error("PENDING_CHALLENGE", "You already have a pending challenge");
            return;
        }
        if target_username == session.username {
            self.send_error("INVALID_CHALLENGE", "You cannot challenge yourself");
            return;
        }

        let target = match UserRepository::by_username(&self.pool, &target_username).await {
            Some(target) => target,
            None => {
                self.send_error("USER_NOT_FOUND", "Target user not found");
                return;
            }
        };

        if !self.sessions.is_online(target.user_id) {
            self.send_error("USER_OFFLINE", "Target user is offline");
            return;
        }
        if self.matches.is_player_in_game(target.user_id) {
            self.send_error("USER_BUSY", "Target user is already in a game");
            return;
        }
        if self.matches.has_pending_challenge(target.user_id) {
            self.send_error("USER_BUSY", "Target user has a pending challenge");
            return;
        }

        let challenge_id = self.matches.create_challenge(
            session.user_id,
            &session.username,
            target.user_id,
            &target_username,
            preferred_color,
        );

        self.send(&ServerMessage::ChallengeSent {
            challenge_id,
            target_username,
            status: "pending".to_string(),
        });
    }

    async fn handle_ai_challenge(
        &self,
        session_id: String,
        preferred_color: ColorPreference,
        depth: Option<u8>,
    ) {
        let Some(session) = self.require_session(&session_id).await else {
            return;
        };

        if self.matches.is_player_in_game(session.user_id) {
            self.send_error("ALREADY_IN_GAME", "You are already in a game");
            return;
        }
        if self.matches.has_pending_challenge(session.user_id) {
            self.send_error("PENDING_CHALLENGE", "You already have a pending challenge");
            return;
        }

        self.send(&ServerMessage::AiChallengeSent {
            status: "accepted".to_string(),
        });

        let depth = depth.unwrap_or(ai::DEFAULT_DEPTH);
        if self
            .matches
            .accept_ai_challenge(session.user_id, &session.username, preferred_color, depth)
            .await
            .is_none()
        {
            self.send_error("AI_CHALLENGE_FAILED", "Failed to create AI game");
        }
    }

    async fn handle_accept_challenge(&self, session_id: String, challenge_id: String) {
        let Some(session) = self.require_session(&session_id).await else {
            return;
        };

        let challenge = match self.matches.challenge_view(&challenge_id) {
            Some(challenge) => challenge,
            None => {
                self.send_error("CHALLENGE_NOT_FOUND", "Challenge not found or expired");
                return;
            }
        };
        if challenge.target_id != session.user_id {
            self.send_error("INVALID_CHALLENGE", "This challenge is not for you");
            return;
        }

        match self.matches.accept_challenge(&challenge_id).await {
            Some(game_id) => {
                self.send(&ServerMessage::ChallengeAccepted {
                    challenge_id,
                    game_id,
                    status: "success".to_string(),
                });
            }
            None => {
                self.send_error("CHALLENGE_ACCEPT_FAILED", "Failed to accept challenge");
            }
        }
    }

    async fn handle_decline_challenge(&self, session_id: String, challenge_id: String) {
        let Some(session) = self.require_session(&session_id).await else {
            return;
        };

        let challenge = match self.matches.challenge_view(&challenge_id) {
            Some(challenge) => challenge,
            None => {
                self.send_error("CHALLENGE_NOT_FOUND", "Challenge not found or expired");
                return;
            }
        };
        if challenge.target_id != session.user_id {
            self.send_error("INVALID_CHALLENGE", "This challenge is not for you");
            return;
        }

        if self.matches.decline_challenge(&challenge_id) {
            self.send(&ServerMessage::ChallengeDeclinedResponse {
                challenge_id,
                status: "success".to_string(),
            });
        } else {
            self.send_error("CHALLENGE_DECLINE_FAILED", "Failed to decline challenge");
        }
    }

    async fn handle_cancel_challenge(&self, session_id: String, challenge_id: String) {
        let Some(session) = self.require_session(&session_id).await else {
            return;
        };

        let challenge = match self.matches.challenge_view(&challenge_id) {
            Some(challenge) => challenge,
            None => {
                self.send_error("CHALLENGE_NOT_FOUND", "Challenge not found or expired");
                return;
            }
        };
        if challenge.challenger_id != session.user_id {
            self.send_error("INVALID_CHALLENGE", "You did not send this challenge");
            return;
        }

        if self.matches.cancel_challenge(&challenge_id) {
            self.send(&ServerMessage::ChallengeCancelledResponse {
                challenge_id,
                status: "success".to_string(),
            });
        } else {
            self.send_error("CHALLENGE_CANCEL_FAILED", "Failed to cancel challenge");
        }
    }

    // ------------------------------------------------------------------
    // Gameplay
    // ------------------------------------------------------------------

    /// Checks that the session's user is a player of the game, answering
    /// the proper error otherwise.
    fn require_participant(&self, game_id: i32, user_id: i32) -> bool {
        match self.matches.game_view(game_id) {
            Some(game) => {
                if game.white_id != user_id && game.black_id != user_id {
                    self.send_error("NOT_IN_GAME", "You are not a player in this game");
                    false
                } else {
                    true
                }
            }
            None => {
                self.send_error("GAME_NOT_FOUND", "Game not found");
                false
            }
        }
    }

    async fn handle_move(&self, session_id: String, game_id: i32, mv: String) {
        let Some(session) = self.require_session(&session_id).await else {
            return;
        };
        if !self.require_participant(game_id, session.user_id) {
            return;
        }

        // On acceptance the registry has already emitted MOVE_ACCEPTED to
        // this connection, ahead of the opponent's OPPONENT_MOVE.
        if let MoveOutcome::Rejected(reason) =
            self.matches.make_move(game_id, session.user_id, &mv).await
        {
            self.send(&ServerMessage::MoveRejected {
                game_id,
                mv,
                reason,
            });
        }
    }

    async fn handle_resign(&self, session_id: String, game_id: i32) {
        let Some(session) = self.require_session(&session_id).await else {
            return;
        };
        if !self.require_participant(game_id, session.user_id) {
            return;
        }

        if self.matches.resign(game_id, session.user_id).await {
            self.send(&ServerMessage::ResignResponse {
                game_id,
                status: "success".to_string(),
                message: "You resigned from the game".to_string(),
            });
        } else {
            self.send_error("RESIGN_FAILED", "Failed to resign from game");
        }
    }

    async fn handle_draw_offer(&self, session_id: String, game_id: i32) {
        let Some(session) = self.require_session(&session_id).await else {
            return;
        };
        if !self.require_participant(game_id, session.user_id) {
            return;
        }

        if self.matches.offer_draw(game_id, session.user_id) {
            self.send(&ServerMessage::DrawOfferResponse {
                game_id,
                status: "success".to_string(),
                message: "Draw offer sent to opponent".to_string(),
            });
        } else {
            self.send_error("DRAW_OFFER_FAILED", "Failed to offer draw");
        }
    }

    async fn handle_draw_response(&self, session_id: String, game_id: i32, accepted: bool) {
        let Some(session) = self.require_session(&session_id).await else {
            return;
        };
        if !self.require_participant(game_id, session.user_id) {
            return;
        }

        match self
            .matches
            .respond_to_draw(game_id, session.user_id, accepted)
            .await
        {
            Some(DrawReply::GameDrawn) => {
                self.send(&ServerMessage::DrawResponseResponse {
                    game_id,
                    accepted: true,
                    result: "DRAW".to_string(),
                    status: "success".to_string(),
                    message: "Draw accepted - game ended".to_string(),
                });
            }
            Some(DrawReply::Declined { opponent_id }) => {
                self.send(&ServerMessage::DrawResponseResponse {
                    game_id,
                    accepted: false,
                    result: "DECLINED".to_string(),
                    status: "success".to_string(),
                    message: "Draw declined - game continues".to_string(),
                });
                self.matches.notify_user(
                    opponent_id,
                    &ServerMessage::DrawDeclined {
                        game_id,
                        from_username: session.username.clone(),
                    },
                );
            }
            None => {
                self.send_error(
                    "DRAW_RESPONSE_FAILED",
                    "No pending draw offer to respond to",
                );
            }
        }
    }

    async fn handle_request_rematch(&self, session_id: String, previous_game_id: i32) {
        let Some(session) = self.require_session(&session_id).await else {
            return;
        };

        let game = match GameRepository::by_id(&self.pool, previous_game_id).await {
            Some(game) => game,
            None => {
                self.send_error("GAME_NOT_FOUND", "Previous game not found");
                return;
            }
        };

        if game.white_player_id != session.user_id && game.black_player_id != session.user_id {
            self.send_error("NOT_IN_GAME", "You were not a player in that game");
            return;
        }

        let (opponent_id, opponent_username) = if game.white_player_id == session.user_id {
            (game.black_player_id, game.black_username.clone())
        } else {
            (game.white_player_id, game.white_username.clone())
        };
        let opponent_username = opponent_username.unwrap_or_default();

        if !self.sessions.is_online(opponent_id) {
            self.send_error("USER_OFFLINE", "Opponent is offline");
            return;
        }

        self.matches.notify_user(
            opponent_id,
            &ServerMessage::RematchRequestReceived {
                from_username: session.username.clone(),
                previous_game_id,
            },
        );

        self.send(&ServerMessage::RematchRequestResponse {
            status: "success".to_string(),
            message: format!("Rematch request sent to {}", opponent_username),
        });
    }

    // ------------------------------------------------------------------
    // Game state, history, leaderboard
    // ------------------------------------------------------------------

    async fn handle_get_game_state(&self, session_id: String, game_id: i32) {
        let Some(session) = self.require_session(&session_id).await else {
            return;
        };
        if !self.require_participant(game_id, session.user_id) {
            return;
        }

        match self.matches.game_state(game_id) {
            Some(state) => self.send(&state),
            None => self.send_error("GAME_NOT_FOUND", "Game not found"),
        }
    }

    async fn handle_get_game_history(
        &self,
        session_id: String,
        user_id: Option<i32>,
        limit: Option<i64>,
    ) {
        let Some(session) = self.require_session(&session_id).await else {
            return;
        };

        let user_id = user_id.unwrap_or(session.user_id);
        let limit = limit.unwrap_or(10);
        let games = GameRepository::by_user(&self.pool, user_id, limit).await;

        let summaries: Vec<GameSummary> = games
            .iter()
            .map(|game| GameSummary {
                game_id: game.game_id,
                white_player_id: game.white_player_id,
                black_player_id: game.black_player_id,
                result: game.result.clone(),
                date: game.start_time.to_rfc3339(),
                duration_seconds: game.duration.unwrap_or(0) as i64,
            })
            .collect();

        let total_count = summaries.len();
        self.send(&ServerMessage::GameHistory {
            games: summaries,
            total_count,
        });
    }

    async fn handle_get_leaderboard(&self, session_id: String, limit: Option<i64>) {
        let Some(_session) = self.require_session(&session_id).await else {
            return;
        };

        let limit = limit.unwrap_or(50);
        let top = UserRepository::top_by_rating(&self.pool, limit).await;

        let players: Vec<LeaderboardEntry> = top
            .iter()
            .enumerate()
            .map(|(index, user)| LeaderboardEntry {
                rank: index + 1,
                username: user.username.clone(),
                rating: user.rating,
                wins: user.wins,
                losses: user.losses,
                draws: user.draws,
            })
            .collect();

        self.send(&ServerMessage::Leaderboard { players });
    }

    // ------------------------------------------------------------------
    // System
    // ------------------------------------------------------------------

    fn handle_ping(&self, timestamp: Option<Value>) {
        let timestamp = timestamp.unwrap_or_else(|| Value::from(Utc::now().timestamp()));
        self.send(&ServerMessage::Pong { timestamp });
    }
}
