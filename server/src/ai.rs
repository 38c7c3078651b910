//! Built-in adversary: alpha-beta over the rule-engine interface.
//!
//! Material-only evaluation with mate scores biased by the distance from
//! the root, so a faster mate always outranks a slower one. The match
//! registry consumes this exactly like a human player whose broadcasts are
//! dropped instead of routed to a socket.

use shared::{ChessGame, GameResult};

const MATE_SCORE: i32 = 1_000_000;
const INFINITY: i32 = i32::MAX / 4;

/// Search depth bounds; the client asks for 2 or 3.
const MIN_DEPTH: u8 = 1;
const MAX_DEPTH: u8 = 4;
pub const DEFAULT_DEPTH: u8 = 2;

pub struct ChessAi {
    depth: u8,
}

impl ChessAi {
    pub fn new(depth: u8) -> Self {
        ChessAi {
            depth: depth.clamp(MIN_DEPTH, MAX_DEPTH),
        }
    }

    pub fn depth(&self) -> u8 {
        self.depth
    }

    /// Best move for the side to move, or None when the game is over or it
    /// is not the adversary's turn.
    pub fn choose_move(&self, game: &ChessGame, ai_is_white: bool) -> Option<String> {
        if game.is_ended() || game.is_white_to_move() != ai_is_white {
            return None;
        }

        let moves = game.legal_moves_for_current_player();
        let mut best_move: Option<String> = None;
        let mut best_score = -INFINITY;
        let mut alpha = -INFINITY;
        let beta = INFINITY;

        for mv in moves {
            let mut next = game.clone();
            if !next.make_move(&mv) {
                continue;
            }
            let score = self.search(&next, self.depth - 1, alpha, beta, ai_is_white, 1);
            if best_move.is_none() || score > best_score {
                best_score = score;
                best_move = Some(mv);
            }
            alpha = alpha.max(best_score);
        }

        best_move
    }

    fn search(
        &self,
        position: &ChessGame,
        depth_left: u8,
        mut alpha: i32,
        mut beta: i32,
        ai_is_white: bool,
        ply: i32,
    ) -> i32 {
        if position.is_ended() || depth_left == 0 {
            return Self::evaluate(position, ai_is_white, ply);
        }

        let moves = position.legal_moves_for_current_player();
        if moves.is_empty() {
            return Self::evaluate(position, ai_is_white, ply);
        }

        let maximizing = position.is_white_to_move() == ai_is_white;
        if maximizing {
            let mut best = -INFINITY;
            for mv in moves {
                let mut next = position.clone();
                if !next.make_move(&mv) {
                    continue;
                }
                best = best.max(self.search(&next, depth_left - 1, alpha, beta, ai_is_white, ply + 1));
                alpha = alpha.max(best);
                if beta <= alpha {
                    break;
                }
            }
            best
        } else {
            let mut best = INFINITY;
            for mv in moves {
                let mut next = position.clone();
                if !next.make_move(&mv) {
                    continue;
                }
                best = best.min(self.search(&next, depth_left - 1, alpha, beta, ai_is_white, ply + 1));
                beta = beta.min(best);
                if beta <= alpha {
                    break;
                }
            }
            best
        }
    }

    fn evaluate(position: &ChessGame, ai_is_white: bool, ply: i32) -> i32 {
        if position.is_ended() {
            return match position.result() {
                GameResult::WhiteWin => {
                    let mate = MATE_SCORE - ply * 100;
                    if ai_is_white {
                        mate
                    } else {
                        -mate
                    }
                }
                GameResult::BlackWin => {
                    let mate = MATE_SCORE - ply * 100;
                    if ai_is_white {
                        -mate
                    } else {
                        mate
                    }
                }
                _ => 0,
            };
        }

        let white_pov = position.material_score();
        if ai_is_white {
            white_pov
        } else {
            -white_pov
        }
    }
}
