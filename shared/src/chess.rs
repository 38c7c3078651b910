//! Chess rule engine.
//!
//! Board state plus a validator/applier for long-algebraic move tokens
//! (`e2e4`, `e7e8q`). The engine is intentionally permissive about
//! self-check: a move that leaves the own king attacked is accepted, and
//! capturing the opponent king is a valid terminal move. On top of that it
//! detects forced mates (king in check with no reply that saves it), the
//! 200-ply draw cap, and castling with the full in/through/into-check
//! preconditions.

use serde::{Deserialize, Serialize};

/// Hard ply limit; reaching it ends the game as a draw.
pub const MAX_PLIES: u32 = 200;

/// Outcome of a game as reported by the engine and stored in the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GameResult {
    Ongoing,
    WhiteWin,
    BlackWin,
    Draw,
    Aborted,
}

impl GameResult {
    /// Stable string form used in the `game_history.result` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            GameResult::Ongoing => "ONGOING",
            GameResult::WhiteWin => "WHITE_WIN",
            GameResult::BlackWin => "BLACK_WIN",
            GameResult::Draw => "DRAW",
            GameResult::Aborted => "ABORTED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Piece {
    King,
    Queen,
    Rook,
    Bishop,
    Knight,
    Pawn,
}

impl Piece {
    fn fen_char(&self, white: bool) -> char {
        let c = match self {
            Piece::King => 'k',
            Piece::Queen => 'q',
            Piece::Rook => 'r',
            Piece::Bishop => 'b',
            Piece::Knight => 'n',
            Piece::Pawn => 'p',
        };
        if white {
            c.to_ascii_uppercase()
        } else {
            c
        }
    }

    fn material(&self) -> i32 {
        match self {
            Piece::Pawn => 100,
            Piece::Knight => 320,
            Piece::Bishop => 330,
            Piece::Rook => 500,
            Piece::Queen => 900,
            Piece::King => 20_000,
        }
    }

    fn from_promotion(c: char) -> Option<Piece> {
        match c.to_ascii_lowercase() {
            'q' => Some(Piece::Queen),
            'r' => Some(Piece::Rook),
            'b' => Some(Piece::Bishop),
            'n' => Some(Piece::Knight),
            _ => None,
        }
    }
}

/// `(piece, is_white)`; row 0 is rank 8, row 7 is rank 1.
type Square = Option<(Piece, bool)>;

#[derive(Debug, Clone)]
struct ParsedMove {
    from: (usize, usize),
    to: (usize, usize),
    promotion: Option<Piece>,
}

/// A chess position with side-to-move, ply counter and castling rights.
#[derive(Debug, Clone)]
pub struct ChessGame {
    board: [[Square; 8]; 8],
    turn: u32,
    ended: bool,
    result: GameResult,
    white_king_moved: bool,
    white_rook_a_moved: bool,
    white_rook_h_moved: bool,
    black_king_moved: bool,
    black_rook_a_moved: bool,
    black_rook_h_moved: bool,
}

impl Default for ChessGame {
    fn default() -> Self {
        Self::new()
    }
}

impl ChessGame {
    /// Standard starting position, white to move, ply 0.
    pub fn new() -> Self {
        let mut board: [[Square; 8]; 8] = [[None; 8]; 8];

        let back_rank = [
            Piece::Rook,
            Piece::Knight,
            Piece::Bishop,
            Piece::Queen,
            Piece::King,
            Piece::Bishop,
            Piece::Knight,
            Piece::Rook,
        ];
        for (col, piece) in back_rank.iter().enumerate() {
            board[0][col] = Some((*piece, false));
            board[1][col] = Some((Piece::Pawn, false));
            board[6][col] = Some((Piece::Pawn, true));
            board[7][col] = Some((*piece, true));
        }

        ChessGame {
            board,
            turn: 0,
            ended: false,
            result: GameResult::Ongoing,
            white_king_moved: false,
            white_rook_a_moved: false,
            white_rook_h_moved: false,
            black_king_moved: false,
            black_rook_a_moved: false,
            black_rook_h_moved: false,
        }
    }

    /// Ply counter: 0 before any move; even means white to move.
    pub fn turn(&self) -> u32 {
        self.turn
    }

    pub fn is_white_to_move(&self) -> bool {
        self.turn % 2 == 0
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    pub fn result(&self) -> GameResult {
        self.result
    }

    /// Legality of `mv` for the side to move, without mutating state.
    pub fn check_move(&self, mv: &str) -> bool {
        if self.ended {
            return false;
        }
        let parsed = match parse_move(mv) {
            Some(p) => p,
            None => return false,
        };
        self.check_parsed(&parsed)
    }

    fn check_parsed(&self, mv: &ParsedMove) -> bool {
        let (fr, fc) = mv.from;
        let (tr, tc) = mv.to;

        let (piece, piece_white) = match self.board[fr][fc] {
            Some(p) => p,
            None => return false,
        };

        let white_to_move = self.is_white_to_move();
        if piece_white != white_to_move {
            return false;
        }

        // Own piece on the target square.
        if let Some((_, target_white)) = self.board[tr][tc] {
            if target_white == white_to_move {
                return false;
            }
        }

        // Promotion suffix is only meaningful for a pawn reaching the last rank.
        if mv.promotion.is_some() {
            let last_rank = if white_to_move { 0 } else { 7 };
            if piece != Piece::Pawn || tr != last_rank {
                return false;
            }
        }

        // Castling is encoded as a king two-square move.
        if piece == Piece::King && fc.abs_diff(tc) == 2 {
            return self.can_castle(mv.from, mv.to, white_to_move);
        }

        self.piece_move_ok(piece, mv.from, mv.to, white_to_move)
    }

    /// Applies `mv` if legal: mutates the board, toggles side to move,
    /// updates castling rights and terminal state. Returns false otherwise.
    pub fn make_move(&mut self, mv: &str) -> bool {
        if self.ended {
            return false;
        }
        let parsed = match parse_move(mv) {
            Some(p) => p,
            None => return false,
        };
        if !self.check_parsed(&parsed) {
            return false;
        }

        // Capturing the king ends the game for the mover.
        if let Some((Piece::King, _)) = self.board[parsed.to.0][parsed.to.1] {
            self.ended = true;
            self.result = if self.is_white_to_move() {
                GameResult::WhiteWin
            } else {
                GameResult::BlackWin
            };
        }

        self.apply(&parsed);
        self.detect_game_end();
        true
    }

    /// Board mutation without terminal-state detection. `check_parsed` must
    /// have approved the move.
    fn apply(&mut self, mv: &ParsedMove) {
        let (fr, fc) = mv.from;
        let (tr, tc) = mv.to;
        let (piece, piece_white) = match self.board[fr][fc] {
            Some(occupant) => occupant,
            None => return,
        };

        if piece == Piece::King && fc.abs_diff(tc) == 2 {
            // Castle: king then rook.
            self.board[tr][tc] = Some((Piece::King, piece_white));
            self.board[fr][fc] = None;

            let kingside = tc > fc;
            let rook_from = if kingside { 7 } else { 0 };
            let rook_to = if kingside { tc - 1 } else { tc + 1 };
            self.board[tr][rook_to] = Some((Piece::Rook, piece_white));
            self.board[tr][rook_from] = None;

            if piece_white {
                self.white_king_moved = true;
            } else {
                self.black_king_moved = true;
            }
            self.turn += 1;
            return;
        }

        match piece {
            Piece::King => {
                if piece_white {
                    self.white_king_moved = true;
                } else {
                    self.black_king_moved = true;
                }
            }
            Piece::Rook => {
                if piece_white {
                    if (fr, fc) == (7, 0) {
                        self.white_rook_a_moved = true;
                    }
                    if (fr, fc) == (7, 7) {
                        self.white_rook_h_moved = true;
                    }
                } else {
                    if (fr, fc) == (0, 0) {
                        self.black_rook_a_moved = true;
                    }
                    if (fr, fc) == (0, 7) {
                        self.black_rook_h_moved = true;
                    }
                }
            }
            _ => {}
        }

        let last_rank = if piece_white { 0 } else { 7 };
        let placed = if piece == Piece::Pawn && tr == last_rank {
            // Bare pawn pushes onto the last rank queen by default.
            mv.promotion.unwrap_or(Piece::Queen)
        } else {
            piece
        };

        self.board[tr][tc] = Some((placed, piece_white));
        self.board[fr][fc] = None;
        self.turn += 1;
    }

    fn detect_game_end(&mut self) {
        if self.ended {
            return;
        }

        if self.turn >= MAX_PLIES {
            self.ended = true;
            self.result = GameResult::Draw;
            return;
        }

        let mut white_king = false;
        let mut black_king = false;
        for row in &self.board {
            for sq in row {
                if let Some((Piece::King, white)) = sq {
                    if *white {
                        white_king = true;
                    } else {
                        black_king = true;
                    }
                }
            }
        }
        if !white_king {
            self.ended = true;
            self.result = GameResult::BlackWin;
            return;
        }
        if !black_king {
            self.ended = true;
            self.result = GameResult::WhiteWin;
            return;
        }

        // Mate: side to move is in check and every reply still leaves the
        // king capturable.
        let defender_white = self.is_white_to_move();
        if self.is_king_in_check(defender_white) && !self.has_saving_move() {
            self.ended = true;
            self.result = if defender_white {
                GameResult::BlackWin
            } else {
                GameResult::WhiteWin
            };
        }
    }

    /// Does the side to move have any move after which its king is no
    /// longer attacked?
    fn has_saving_move(&self) -> bool {
        let white_to_move = self.is_white_to_move();
        for fr in 0..8 {
            for fc in 0..8 {
                match self.board[fr][fc] {
                    Some((_, w)) if w == white_to_move => {}
                    _ => continue,
                }
                for tr in 0..8 {
                    for tc in 0..8 {
                        let mv = ParsedMove {
                            from: (fr, fc),
                            to: (tr, tc),
                            promotion: None,
                        };
                        if !self.check_parsed(&mv) {
                            continue;
                        }
                        let mut next = self.clone();
                        next.apply(&mv);
                        if !next.is_king_in_check(white_to_move) {
                            return true;
                        }
                    }
                }
            }
        }
        false
    }

    /// Whether `white`'s king is currently attacked. False when the king is
    /// already off the board.
    pub fn is_king_in_check(&self, white: bool) -> bool {
        let mut king = None;
        for (r, row) in self.board.iter().enumerate() {
            for (c, sq) in row.iter().enumerate() {
                if *sq == Some((Piece::King, white)) {
                    king = Some((r, c));
                }
            }
        }
        match king {
            Some((r, c)) => self.square_attacked(r, c, !white),
            None => false,
        }
    }

    /// Whether a piece of `by_white` attacks `(row, col)`.
    fn square_attacked(&self, row: usize, col: usize, by_white: bool) -> bool {
        for r in 0..8 {
            for c in 0..8 {
                let (piece, white) = match self.board[r][c] {
                    Some(p) => p,
                    None => continue,
                };
                if white != by_white {
                    continue;
                }
                if piece == Piece::Pawn {
                    // Pawns only attack diagonally.
                    let dir: isize = if by_white { -1 } else { 1 };
                    if row as isize == r as isize + dir && col.abs_diff(c) == 1 {
                        return true;
                    }
                } else if self.piece_move_ok(piece, (r, c), (row, col), by_white) {
                    return true;
                }
            }
        }
        false
    }

    fn can_castle(&self, from: (usize, usize), to: (usize, usize), white: bool) -> bool {
        let (fr, fc) = from;
        let (tr, tc) = to;

        if fr != tr {
            return false;
        }
        let home_row = if white { 7 } else { 0 };
        if fr != home_row || fc != 4 {
            return false;
        }

        if (white && self.white_king_moved) || (!white && self.black_king_moved) {
            return false;
        }

        let kingside = tc > fc;
        let rook_col = if kingside { 7 } else { 0 };
        let rook_moved = match (white, kingside) {
            (true, true) => self.white_rook_h_moved,
            (true, false) => self.white_rook_a_moved,
            (false, true) => self.black_rook_h_moved,
            (false, false) => self.black_rook_a_moved,
        };
        if rook_moved {
            return false;
        }
        if self.board[home_row][rook_col] != Some((Piece::Rook, white)) {
            return false;
        }

        // Squares between king and rook must be empty.
        let (lo, hi) = (fc.min(rook_col), fc.max(rook_col));
        for col in lo + 1..hi {
            if self.board[home_row][col].is_some() {
                return false;
            }
        }

        // King must not be in check, nor pass through or land on an
        // attacked square.
        let step: isize = if kingside { 1 } else { -1 };
        let mut col = fc as isize;
        loop {
            if self.square_attacked(home_row, col as usize, !white) {
                return false;
            }
            if col == tc as isize {
                break;
            }
            col += step;
        }

        true
    }

    fn piece_move_ok(
        &self,
        piece: Piece,
        from: (usize, usize),
        to: (usize, usize),
        white: bool,
    ) -> bool {
        let (fr, fc) = (from.0 as isize, from.1 as isize);
        let (tr, tc) = (to.0 as isize, to.1 as isize);
        let dr = tr - fr;
        let dc = tc - fc;
        if dr == 0 && dc == 0 {
            return false;
        }

        match piece {
            Piece::Pawn => {
                let dir: isize = if white { -1 } else { 1 };
                let start_row: isize = if white { 6 } else { 1 };
                if dc == 0 {
                    if dr == dir && self.board[to.0][to.1].is_none() {
                        return true;
                    }
                    fr == start_row
                        && dr == 2 * dir
                        && self.board[to.0][to.1].is_none()
                        && self.board[(fr + dir) as usize][from.1].is_none()
                } else {
                    dc.abs() == 1
                        && dr == dir
                        && matches!(self.board[to.0][to.1], Some((_, w)) if w != white)
                }
            }
            Piece::Knight => {
                (dr.abs() == 2 && dc.abs() == 1) || (dr.abs() == 1 && dc.abs() == 2)
            }
            Piece::Bishop => dr.abs() == dc.abs() && self.path_clear(from, to),
            Piece::Rook => (dr == 0 || dc == 0) && self.path_clear(from, to),
            Piece::Queen => {
                (dr == 0 || dc == 0 || dr.abs() == dc.abs()) && self.path_clear(from, to)
            }
            Piece::King => dr.abs() <= 1 && dc.abs() <= 1,
        }
    }

    fn path_clear(&self, from: (usize, usize), to: (usize, usize)) -> bool {
        let dr = (to.0 as isize - from.0 as isize).signum();
        let dc = (to.1 as isize - from.1 as isize).signum();
        let mut r = from.0 as isize + dr;
        let mut c = from.1 as isize + dc;
        while (r, c) != (to.0 as isize, to.1 as isize) {
            if self.board[r as usize][c as usize].is_some() {
                return false;
            }
            r += dr;
            c += dc;
        }
        true
    }

    /// Canonical six-field FEN of the current position. En passant is never
    /// tracked, so the fourth field is always `-`.
    pub fn fen(&self) -> String {
        let mut fen = String::new();
        for (r, row) in self.board.iter().enumerate() {
            let mut empty = 0;
            for sq in row {
                match sq {
                    Some((piece, white)) => {
                        if empty > 0 {
                            fen.push((b'0' + empty) as char);
                            empty = 0;
                        }
                        fen.push(piece.fen_char(*white));
                    }
                    None => empty += 1,
                }
            }
            if empty > 0 {
                fen.push((b'0' + empty) as char);
            }
            if r < 7 {
                fen.push('/');
            }
        }

        fen.push(' ');
        fen.push(if self.is_white_to_move() { 'w' } else { 'b' });

        fen.push(' ');
        let mut rights = String::new();
        if !self.white_king_moved && !self.white_rook_h_moved {
            rights.push('K');
        }
        if !self.white_king_moved && !self.white_rook_a_moved {
            rights.push('Q');
        }
        if !self.black_king_moved && !self.black_rook_h_moved {
            rights.push('k');
        }
        if !self.black_king_moved && !self.black_rook_a_moved {
            rights.push('q');
        }
        if rights.is_empty() {
            rights.push('-');
        }
        fen.push_str(&rights);

        fen.push_str(" - 0 ");
        fen.push_str(&(self.turn / 2 + 1).to_string());
        fen
    }

    /// All move tokens the side to move could legally play right now.
    pub fn legal_moves_for_current_player(&self) -> Vec<String> {
        let mut moves = Vec::new();
        if self.ended {
            return moves;
        }
        let white_to_move = self.is_white_to_move();
        for fr in 0..8 {
            for fc in 0..8 {
                match self.board[fr][fc] {
                    Some((_, w)) if w == white_to_move => {}
                    _ => continue,
                }
                for tr in 0..8 {
                    for tc in 0..8 {
                        let mv = ParsedMove {
                            from: (fr, fc),
                            to: (tr, tc),
                            promotion: None,
                        };
                        if self.check_parsed(&mv) {
                            moves.push(format!(
                                "{}{}",
                                square_name(fr, fc),
                                square_name(tr, tc)
                            ));
                        }
                    }
                }
            }
        }
        moves
    }

    /// Material balance, white minus black, in centipawns.
    pub fn material_score(&self) -> i32 {
        let mut score = 0;
        for row in &self.board {
            for sq in row {
                if let Some((piece, white)) = sq {
                    if *white {
                        score += piece.material();
                    } else {
                        score -= piece.material();
                    }
                }
            }
        }
        score
    }
}

/// `"e2"` → `(6, 4)`; row 0 is rank 8.
fn parse_square(s: &[u8]) -> Option<(usize, usize)> {
    if s.len() != 2 {
        return None;
    }
    let col = (s[0].to_ascii_lowercase() as isize) - ('a' as isize);
    let row = 8 - ((s[1] as isize) - ('0' as isize));
    if (0..8).contains(&col) && (0..8).contains(&row) {
        Some((row as usize, col as usize))
    } else {
        None
    }
}

fn square_name(row: usize, col: usize) -> String {
    let mut s = String::with_capacity(2);
    s.push((b'a' + col as u8) as char);
    s.push((b'8' - row as u8) as char);
    s
}

fn parse_move(mv: &str) -> Option<ParsedMove> {
    let bytes = mv.as_bytes();
    if bytes.len() != 4 && bytes.len() != 5 {
        return None;
    }
    let from = parse_square(&bytes[0..2])?;
    let to = parse_square(&bytes[2..4])?;
    let promotion = if bytes.len() == 5 {
        Some(Piece::from_promotion(bytes[4] as char)?)
    } else {
        None
    };
    Some(ParsedMove {
        from,
        to,
        promotion,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn play(moves: &[&str]) -> ChessGame {
        let mut game = ChessGame::new();
        for mv in moves {
            assert!(game.make_move(mv), "move {} rejected", mv);
        }
        game
    }

    #[test]
    fn starting_position_fen() {
        let game = ChessGame::new();
        assert_eq!(
            game.fen(),
            "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1"
        );
        assert_eq!(game.turn(), 0);
        assert!(game.is_white_to_move());
        assert_eq!(game.material_score(), 0);
    }

    #[test]
    fn pawn_moves() {
        let mut game = ChessGame::new();
        assert!(game.check_move("e2e4"));
        assert!(game.check_move("e2e3"));
        assert!(!game.check_move("e2e5"));
        assert!(!game.check_move("e2d3")); // no capture available
        assert!(game.make_move("e2e4"));
        assert_eq!(
            game.fen(),
            "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq - 0 1"
        );
        // Double step only from the initial rank.
        assert!(game.make_move("e7e5"));
        assert!(!game.check_move("e4e6"));
    }

    #[test]
    fn turn_order_enforced() {
        let mut game = ChessGame::new();
        assert!(!game.check_move("e7e5")); // black piece, white to move
        assert!(game.make_move("e2e4"));
        assert!(!game.check_move("d2d4")); // white again
        assert!(game.make_move("e7e5"));
    }

    #[test]
    fn sliders_need_clear_path() {
        let game = ChessGame::new();
        assert!(!game.check_move("a1a3")); // rook behind own pawn
        assert!(!game.check_move("c1e3")); // bishop behind own pawn
        assert!(game.check_move("b1c3")); // knight jumps
    }

    #[test]
    fn cannot_capture_own_piece() {
        let game = ChessGame::new();
        assert!(!game.check_move("e1e2"));
        assert!(!game.check_move("a1a2"));
    }

    #[test]
    fn capture_updates_material() {
        let game = play(&["e2e4", "d7d5", "e4d5"]);
        assert_eq!(game.material_score(), 100);
    }

    #[test]
    fn kingside_castle() {
        let mut game = play(&["e2e4", "e7e5", "g1f3", "b8c6", "f1c4", "f8c5"]);
        assert!(game.check_move("e1g1"));
        assert!(game.make_move("e1g1"));
        let fen = game.fen();
        // King g1, rook f1, castling rights for white spent.
        assert!(fen.contains("RNBQ1RK1"));
        assert!(fen.contains(" kq "));
    }

    #[test]
    fn castle_blocked_by_pieces() {
        let game = ChessGame::new();
        assert!(!game.check_move("e1g1"));
        assert!(!game.check_move("e1c1"));
    }

    #[test]
    fn castle_after_king_moved_rejected() {
        let game = play(&[
            "e2e4", "e7e5", "g1f3", "b8c6", "f1c4", "f8c5", "e1e2", "d7d6", "e2e1", "c8d7",
        ]);
        assert!(!game.check_move("e1g1"));
    }

    #[test]
    fn castle_out_of_check_rejected() {
        // Black knight lands on d3 and checks e1; f1/g1 are already clear.
        let game = play(&["e2e4", "b8c6", "f1c4", "c6b4", "g1f3", "b4d3"]);
        assert!(game.is_king_in_check(true));
        assert!(!game.check_move("e1g1"));
    }

    #[test]
    fn castle_through_check_rejected() {
        // Black bishop on a6 covers f1, the square the king passes through.
        let game = play(&[
            "e2e4", "b7b6", "g1f3", "c8a6", "g2g3", "e7e6", "f1g2", "d7d6",
        ]);
        assert!(!game.is_king_in_check(true));
        assert!(!game.check_move("e1g1"));
    }

    #[test]
    fn castle_into_check_rejected() {
        // Black bishop on c5 covers g1 once f2 has moved away.
        let game = play(&[
            "e2e4", "e7e5", "f2f4", "f8c5", "g1f3", "b8c6", "f1c4", "d7d6",
        ]);
        assert!(!game.check_move("e1g1"));
    }

    #[test]
    fn promotion_to_named_piece() {
        let mut game = play(&[
            "a2a4", "b7b5", "a4b5", "a7a6", "b5a6", "h7h6", "a6a7", "h6h5",
        ]);
        assert!(game.check_move("a7b8q"));
        assert!(!game.check_move("a7b8k")); // not a promotion piece
        assert!(!game.check_move("a7a6q")); // promotion off the last rank
        assert!(game.make_move("a7b8q"));
        assert!(game.fen().starts_with("rQbqkbnr"));
    }

    #[test]
    fn bare_pawn_push_promotes_to_queen() {
        let mut game = play(&[
            "a2a4", "b7b5", "a4b5", "a7a6", "b5a6", "h7h6", "a6a7", "h6h5",
        ]);
        assert!(game.make_move("a7b8"));
        assert!(game.fen().starts_with("rQbqkbnr"));
    }

    #[test]
    fn scholars_mate_ends_game() {
        let mut game = ChessGame::new();
        let moves = ["e2e4", "e7e5", "f1c4", "b8c6", "d1h5", "g8f6"];
        for mv in moves {
            assert!(game.make_move(mv), "move {} rejected", mv);
            assert!(!game.is_ended());
        }
        assert!(game.make_move("h5f7"));
        assert!(game.is_ended());
        assert_eq!(game.result(), GameResult::WhiteWin);
        assert_eq!(game.turn(), 7);
        // Terminal: nothing more is accepted.
        assert!(!game.make_move("a7a6"));
    }

    #[test]
    fn king_capture_is_terminal() {
        // Self-check is not validated, so black may walk into the queen's
        // file and white may take the king.
        let mut game = play(&["e2e4", "e7e5", "d1h5", "e8e7", "h5e5"]);
        // Qxe5+ puts the black king (e7) in check; walk it into d6 and
        // capture it.
        assert!(game.make_move("e7d6"));
        assert!(game.make_move("e5d6"));
        assert!(game.is_ended());
        assert_eq!(game.result(), GameResult::WhiteWin);
    }

    #[test]
    fn ply_cap_draws_exactly_once() {
        let mut game = ChessGame::new();
        for _ in 0..49 {
            for mv in ["g1f3", "g8f6", "f3g1", "f6g8"] {
                assert!(game.make_move(mv));
            }
        }
        assert_eq!(game.turn(), 196);
        assert!(game.make_move("g1f3"));
        assert!(game.make_move("g8f6"));
        assert!(game.make_move("f3g1"));
        assert!(!game.is_ended());
        assert!(game.make_move("f6g8"));
        assert_eq!(game.turn(), MAX_PLIES);
        assert!(game.is_ended());
        assert_eq!(game.result(), GameResult::Draw);
        assert!(!game.make_move("g1f3"));
    }

    #[test]
    fn check_flag_after_move() {
        let game = play(&["e2e4", "f7f6", "d1h5"]);
        assert!(game.is_king_in_check(false));
        assert!(!game.is_king_in_check(true));
        assert!(!game.is_ended()); // g7g6 still saves the king
    }

    #[test]
    fn legal_move_list_matches_check_move() {
        let game = ChessGame::new();
        let moves = game.legal_moves_for_current_player();
        // 16 pawn moves + 4 knight moves from the initial position.
        assert_eq!(moves.len(), 20);
        for mv in &moves {
            assert!(game.check_move(mv));
        }
    }

    #[test]
    fn check_move_does_not_mutate() {
        let game = ChessGame::new();
        let before = game.fen();
        assert!(game.check_move("e2e4"));
        assert_eq!(game.fen(), before);
        assert_eq!(game.turn(), 0);
    }

    #[test]
    fn malformed_tokens_rejected() {
        let game = ChessGame::new();
        for mv in ["", "e2", "e2e", "e2e44", "i2i4", "e9e4", "e2-e4"] {
            assert!(!game.check_move(mv), "token {:?} accepted", mv);
        }
    }
}
