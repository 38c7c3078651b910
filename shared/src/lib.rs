//! # Shared Chess Service Library
//!
//! This crate contains everything both halves of the chess service agree on:
//! the JSON wire protocol exchanged over WebSocket text frames, and the chess
//! rule engine that validates and applies moves.
//!
//! ## Wire protocol
//!
//! Every application message is a single JSON object with a required `type`
//! field. [`ClientRequest`] covers everything a client may send; the server
//! answers with exactly one direct [`ServerMessage`] per request, plus any
//! number of unsolicited broadcasts (challenges, opponent moves, game
//! endings) that also use [`ServerMessage`].
//!
//! ## Rule engine
//!
//! [`chess::ChessGame`] is a plain value type: a board, a ply counter and
//! castling rights. Moves are long-algebraic tokens such as `e2e4` or
//! `e7e8q`. The engine is deliberately self-contained so the server can own
//! one per live game and clients can replay histories locally.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod chess;

pub use chess::{ChessGame, GameResult};

/// Color a challenger would like to play.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorPreference {
    White,
    Black,
    #[default]
    Random,
}

/// Lobby availability of an online player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerStatus {
    Available,
    Busy,
    InGame,
}

/// Public profile fields attached to login and session responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserData {
    pub user_id: i32,
    pub username: String,
    pub wins: i32,
    pub losses: i32,
    pub draws: i32,
    pub rating: i32,
}

/// One row of the lobby player list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerEntry {
    pub username: String,
    pub rating: i32,
    pub status: PlayerStatus,
}

/// One row of the leaderboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub rank: usize,
    pub username: String,
    pub rating: i32,
    pub wins: i32,
    pub losses: i32,
    pub draws: i32,
}

/// One finished game in a history listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameSummary {
    pub game_id: i32,
    pub white_player_id: i32,
    pub black_player_id: i32,
    pub result: Option<String>,
    pub date: String,
    pub duration_seconds: i64,
}

/// Requests a client may send. The `type` field selects the variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientRequest {
    VerifySession {
        session_id: String,
    },
    Login {
        username: String,
        password: String,
    },
    Register {
        username: String,
        password: String,
        #[serde(default)]
        email: Option<String>,
    },
    Logout {
        session_id: String,
    },
    GetAvailablePlayers {
        session_id: String,
    },
    Challenge {
        session_id: String,
        target_username: String,
        #[serde(default)]
        preferred_color: ColorPreference,
    },
    AiChallenge {
        session_id: String,
        #[serde(default)]
        preferred_color: ColorPreference,
        #[serde(default)]
        depth: Option<u8>,
    },
    AcceptChallenge {
        session_id: String,
        challenge_id: String,
    },
    DeclineChallenge {
        session_id: String,
        challenge_id: String,
    },
    CancelChallenge {
        session_id: String,
        challenge_id: String,
    },
    Move {
        session_id: String,
        game_id: i32,
        #[serde(rename = "move")]
        mv: String,
    },
    Resign {
        session_id: String,
        game_id: i32,
    },
    DrawOffer {
        session_id: String,
        game_id: i32,
    },
    DrawResponse {
        session_id: String,
        game_id: i32,
        accepted: bool,
    },
    RequestRematch {
        session_id: String,
        previous_game_id: i32,
    },
    GetGameState {
        session_id: String,
        game_id: i32,
    },
    GetGameHistory {
        session_id: String,
        #[serde(default)]
        user_id: Option<i32>,
        #[serde(default)]
        limit: Option<i64>,
    },
    GetLeaderboard {
        session_id: String,
        #[serde(default)]
        limit: Option<i64>,
    },
    Ping {
        #[serde(default)]
        timestamp: Option<Value>,
    },
    ChatMessage {
        #[serde(default)]
        session_id: Option<String>,
        #[serde(default)]
        message: Option<String>,
    },
}

impl ClientRequest {
    /// Every `type` tag the server understands, used to tell an unknown
    /// message type apart from a known type with bad fields.
    pub const KNOWN_TYPES: &'static [&'static str] = &[
        "VERIFY_SESSION",
        "LOGIN",
        "REGISTER",
        "LOGOUT",
        "GET_AVAILABLE_PLAYERS",
        "CHALLENGE",
        "AI_CHALLENGE",
        "ACCEPT_CHALLENGE",
        "DECLINE_CHALLENGE",
        "CANCEL_CHALLENGE",
        "MOVE",
        "RESIGN",
        "DRAW_OFFER",
        "DRAW_RESPONSE",
        "REQUEST_REMATCH",
        "GET_GAME_STATE",
        "GET_GAME_HISTORY",
        "GET_LEADERBOARD",
        "PING",
        "CHAT_MESSAGE",
    ];
}

/// Everything the server may send: direct responses and unsolicited
/// broadcasts alike.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerMessage {
    SessionValid {
        session_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_data: Option<UserData>,
        active_game_id: Option<i32>,
        last_activity: i64,
        message: String,
    },
    SessionInvalid {
        reason: String,
        message: String,
    },
    DuplicateSession {
        session_id: String,
        reason: String,
        message: String,
        timestamp: i64,
    },
    LoginResponse {
        status: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_data: Option<UserData>,
        message: String,
    },
    RegisterResponse {
        status: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<i32>,
        message: String,
    },
    LogoutResponse {
        status: String,
        message: String,
    },
    PlayerList {
        players: Vec<PlayerEntry>,
    },
    ChallengeSent {
        challenge_id: String,
        target_username: String,
        status: String,
    },
    ChallengeReceived {
        challenge_id: String,
        from_username: String,
        from_user_id: i32,
        preferred_color: ColorPreference,
        timestamp: i64,
    },
    ChallengeAccepted {
        challenge_id: String,
        game_id: i32,
        status: String,
    },
    ChallengeDeclined {
        challenge_id: String,
        target_username: String,
    },
    ChallengeDeclinedResponse {
        challenge_id: String,
        status: String,
    },
    ChallengeCancelled {
        challenge_id: String,
        cancelled_by: String,
        reason: String,
    },
    ChallengeCancelledResponse {
        challenge_id: String,
        status: String,
    },
    AiChallengeSent {
        status: String,
    },
    MatchStarted {
        game_id: i32,
        white_player: String,
        black_player: String,
        your_color: String,
        opponent_username: String,
    },
    MoveAccepted {
        game_id: i32,
        #[serde(rename = "move")]
        mv: String,
        move_number: u32,
        is_check: bool,
        is_checkmate: bool,
        board_state: String,
        current_turn: String,
    },
    MoveRejected {
        game_id: i32,
        #[serde(rename = "move")]
        mv: String,
        reason: String,
    },
    OpponentMove {
        game_id: i32,
        #[serde(rename = "move")]
        mv: String,
        move_number: u32,
        is_check: bool,
        captured_piece: Option<String>,
        board_state: String,
        current_turn: String,
        white_player: String,
        black_player: String,
        timestamp: i64,
    },
    ResignResponse {
        game_id: i32,
        status: String,
        message: String,
    },
    DrawOfferReceived {
        game_id: i32,
        from_username: String,
        timestamp: i64,
    },
    DrawOfferResponse {
        game_id: i32,
        status: String,
        message: String,
    },
    DrawResponseResponse {
        game_id: i32,
        accepted: bool,
        result: String,
        status: String,
        message: String,
    },
    DrawDeclined {
        game_id: i32,
        from_username: String,
    },
    RematchRequestReceived {
        from_username: String,
        previous_game_id: i32,
    },
    RematchRequestResponse {
        status: String,
        message: String,
    },
    GameEnded {
        game_id: i32,
        result: GameResult,
        reason: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        winner: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        loser: Option<String>,
        move_count: usize,
        duration_seconds: i64,
        white_player: String,
        black_player: String,
        move_history: Vec<String>,
    },
    GameState {
        game_id: i32,
        white_player: String,
        black_player: String,
        current_turn: String,
        move_number: u32,
        move_history: Vec<String>,
        is_active: bool,
        is_ended: bool,
        board_state: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<GameResult>,
    },
    GameHistory {
        games: Vec<GameSummary>,
        total_count: usize,
    },
    Leaderboard {
        players: Vec<LeaderboardEntry>,
    },
    Pong {
        timestamp: Value,
    },
    Error {
        error_code: String,
        message: String,
        severity: String,
        timestamp: i64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_tag_routing() {
        let raw = r#"{"type":"LOGIN","username":"alice","password":"h"}"#;
        let req: ClientRequest = serde_json::from_str(raw).unwrap();
        assert_eq!(
            req,
            ClientRequest::Login {
                username: "alice".into(),
                password: "h".into(),
            }
        );
    }

    #[test]
    fn move_field_keeps_wire_name() {
        let raw = r#"{"type":"MOVE","session_id":"t","game_id":7,"move":"e2e4"}"#;
        let req: ClientRequest = serde_json::from_str(raw).unwrap();
        match req {
            ClientRequest::Move { game_id, mv, .. } => {
                assert_eq!(game_id, 7);
                assert_eq!(mv, "e2e4");
            }
            other => panic!("unexpected request: {:?}", other),
        }
    }

    #[test]
    fn preferred_color_defaults_to_random() {
        let raw = r#"{"type":"CHALLENGE","session_id":"t","target_username":"bob"}"#;
        let req: ClientRequest = serde_json::from_str(raw).unwrap();
        match req {
            ClientRequest::Challenge {
                preferred_color, ..
            } => assert_eq!(preferred_color, ColorPreference::Random),
            other => panic!("unexpected request: {:?}", other),
        }
    }

    #[test]
    fn known_types_route_to_variants() {
        // Each known tag must be recognised by the enum; a tag that serde
        // reports as an unknown variant would fall through to the
        // UNKNOWN_MESSAGE_TYPE path in the dispatcher.
        for tag in ClientRequest::KNOWN_TYPES {
            let probe = serde_json::json!({ "type": tag });
            if let Err(e) = serde_json::from_value::<ClientRequest>(probe) {
                assert!(
                    !e.to_string().contains("unknown variant"),
                    "tag {} not routed",
                    tag
                );
            }
        }
    }

    #[test]
    fn server_message_serializes_type_tag() {
        let msg = ServerMessage::Pong {
            timestamp: serde_json::json!(42),
        };
        let v = serde_json::to_value(&msg).unwrap();
        assert_eq!(v["type"], "PONG");
        assert_eq!(v["timestamp"], 42);
    }

    #[test]
    fn game_ended_omits_winner_for_draws() {
        let msg = ServerMessage::GameEnded {
            game_id: 1,
            result: GameResult::Draw,
            reason: "draw_agreement".into(),
            winner: None,
            loser: None,
            move_count: 12,
            duration_seconds: 30,
            white_player: "alice".into(),
            black_player: "bob".into(),
            move_history: vec![],
        };
        let v = serde_json::to_value(&msg).unwrap();
        assert_eq!(v["result"], "DRAW");
        assert!(v.get("winner").is_none());
        assert!(v.get("loser").is_none());
    }

    #[test]
    fn player_status_wire_names() {
        assert_eq!(
            serde_json::to_value(PlayerStatus::InGame).unwrap(),
            "in_game"
        );
        assert_eq!(serde_json::to_value(PlayerStatus::Busy).unwrap(), "busy");
        assert_eq!(
            serde_json::to_value(PlayerStatus::Available).unwrap(),
            "available"
        );
    }
}
