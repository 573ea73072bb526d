/*
 * Tessera Chess Engine
 * Copyright (C) 2026 tessera developers
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

use crate::moves::{Move, PackedMove};
use crate::nn::eval::{MoveDelta, NnContext};
use crate::pieces::{self, piece_value, B, K, N, P, Q, R};
use chess::{BitBoard, Board, ChessMove, Color, Piece, Square, EMPTY};
use std::str::FromStr;

pub const START_POS: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

const LIGHT_SQUARES: BitBoard = BitBoard(0x55AA_55AA_55AA_55AA);

/// Thin wrapper around the external board representation, carrying the
/// state the search needs that the board itself does not track.
#[derive(Copy, Clone)]
pub struct Position {
    board: Board,
    halfmove_clock: u8,
    fullmove_count: u16,
}

impl Position {
    pub fn start_pos() -> Self {
        Position::from_fen(START_POS).unwrap()
    }

    pub fn from_fen(fen: &str) -> Option<Self> {
        let fields: Vec<&str> = fen.split_whitespace().collect();
        if fields.len() < 4 {
            return None;
        }

        let board_fen = format!("{} {} {} {} 0 1", fields[0], fields[1], fields[2], fields[3]);
        let board = Board::from_str(&board_fen).ok()?;

        let halfmove_clock = fields.get(4).and_then(|f| f.parse::<u32>().ok()).unwrap_or(0).min(255) as u8;
        let fullmove_count = fields.get(5).and_then(|f| f.parse::<u16>().ok()).unwrap_or(1).max(1);

        Some(Position { board, halfmove_clock, fullmove_count })
    }

    #[inline]
    pub fn board(&self) -> &Board {
        &self.board
    }

    #[inline]
    pub fn hash(&self) -> u64 {
        self.board.get_hash()
    }

    #[inline]
    pub fn side_to_move(&self) -> Color {
        self.board.side_to_move()
    }

    #[inline]
    pub fn is_in_check(&self) -> bool {
        *self.board.checkers() != EMPTY
    }

    #[inline]
    pub fn halfmove_clock(&self) -> u8 {
        self.halfmove_clock
    }

    #[inline]
    pub fn fullmove_count(&self) -> u16 {
        self.fullmove_count
    }

    #[inline]
    pub fn num_pieces(&self) -> u32 {
        self.board.combined().popcnt()
    }

    #[inline]
    pub fn king_square(&self, color: Color) -> Square {
        self.board.king_square(color)
    }

    pub fn has_non_pawn_material(&self, color: Color) -> bool {
        let own = self.board.color_combined(color);
        let majors_minors = self.board.pieces(Piece::Knight)
            | self.board.pieces(Piece::Bishop)
            | self.board.pieces(Piece::Rook)
            | self.board.pieces(Piece::Queen);
        own & majors_minors != EMPTY
    }

    pub fn is_insufficient_material(&self) -> bool {
        let heavy = self.board.pieces(Piece::Pawn) | self.board.pieces(Piece::Rook) | self.board.pieces(Piece::Queen);
        if heavy != EMPTY {
            return false;
        }

        let knights = *self.board.pieces(Piece::Knight);
        let bishops = *self.board.pieces(Piece::Bishop);
        if (knights | bishops).popcnt() <= 1 {
            return true;
        }

        // any number of same-colored bishops cannot deliver mate
        knights == EMPTY && (bishops & LIGHT_SQUARES == bishops || bishops & LIGHT_SQUARES == EMPTY)
    }

    /// Destination square of an en-passant capture, if one is available.
    pub fn en_passant_target(&self) -> Option<Square> {
        self.board.en_passant().map(|pawn_sq| {
            let idx = pawn_sq.to_index() as i8;
            let target = if self.side_to_move() == Color::White { idx + 8 } else { idx - 8 };
            unsafe { Square::new(target as u8) }
        })
    }

    /// Attaches piece/capture/en-passant/castling information to a bare
    /// from/to/promotion move. Returns `NO_MOVE`-like `None` when no own
    /// piece stands on the from square.
    pub fn decorate_move(&self, pm: PackedMove) -> Option<Move> {
        if !pm.is_valid() {
            return None;
        }

        let from = unsafe { Square::new(pm.from_sq()) };
        let to = unsafe { Square::new(pm.to_sq()) };
        let piece = self.board.piece_on(from)?;
        if self.board.color_on(from) != Some(self.side_to_move()) {
            return None;
        }

        let piece_id = pieces::piece_id(piece);
        let is_en_passant = piece == Piece::Pawn && self.en_passant_target() == Some(to);
        let is_capture = is_en_passant || self.board.color_on(to) == Some(!self.side_to_move());
        let is_castling = piece == Piece::King
            && (from.get_file().to_index() as i8 - to.get_file().to_index() as i8).abs() == 2;

        // the promotion field of an unvalidated move is only trusted on a
        // pawn move to the back rank
        let to_rank = pm.to_sq() >> 3;
        let promotion = if piece == Piece::Pawn && (to_rank == 0 || to_rank == 7) && (N..=Q).contains(&pm.promotion())
        {
            pm.promotion()
        } else {
            pieces::NONE
        };

        Some(Move::new(
            pm.from_sq(),
            pm.to_sq(),
            piece_id,
            promotion,
            is_capture,
            is_en_passant,
            is_castling,
        ))
    }

    pub fn decorate_chess_move(&self, m: ChessMove) -> Move {
        self.decorate_move(PackedMove::from(m)).unwrap_or_default()
    }

    pub fn is_move_legal(&self, pm: PackedMove) -> bool {
        pm.is_valid() && self.board.legal(pm.to_chess_move())
    }

    /// Applies the move and feeds the resulting feature delta into the
    /// per-ply evaluator context.
    pub fn do_move(&self, m: Move, ctx: &mut NnContext) -> Position {
        let next = self.make_move(m);
        ctx.set_move(next.board, self.move_delta(m));
        next
    }

    /// Applies the move without evaluator bookkeeping (game setup, PV walk).
    pub fn make_move(&self, m: Move) -> Position {
        debug_assert!(self.is_move_legal(m.packed()));
        let board = self.board.make_move_new(m.to_chess_move());

        let halfmove_clock =
            if m.is_capture() || m.piece() == P { 0 } else { self.halfmove_clock.saturating_add(1) };
        let fullmove_count =
            if self.side_to_move() == Color::Black { self.fullmove_count + 1 } else { self.fullmove_count };

        Position { board, halfmove_clock, fullmove_count }
    }

    pub fn do_null_move(&self, ctx: &mut NnContext) -> Option<Position> {
        let board = self.board.null_move()?;
        ctx.set_null(board);
        Some(Position {
            board,
            halfmove_clock: self.halfmove_clock.saturating_add(1),
            fullmove_count: self.fullmove_count,
        })
    }

    fn move_delta(&self, m: Move) -> MoveDelta {
        let stm = self.side_to_move();
        let mut delta = MoveDelta {
            mover_color: stm,
            piece: m.piece(),
            from: m.from_sq(),
            to: m.to_sq(),
            promotion: m.promotion(),
            captured: pieces::NONE,
            captured_sq: 0,
            rook_from: 0,
            rook_to: 0,
            is_castling: false,
        };

        if m.is_en_passant() {
            delta.captured = P;
            delta.captured_sq =
                if stm == Color::White { m.to_sq() - 8 } else { m.to_sq() + 8 };
        } else if m.is_capture() {
            delta.captured = self.board.piece_on(m.to_square()).map(pieces::piece_id).unwrap_or(pieces::NONE);
            delta.captured_sq = m.to_sq();
        }

        if m.is_castling() {
            delta.is_castling = true;
            let rank_base = m.from_sq() & 0b111000;
            if m.to_sq() > m.from_sq() {
                delta.rook_from = rank_base + 7;
                delta.rook_to = rank_base + 5;
            } else {
                delta.rook_from = rank_base;
                delta.rook_to = rank_base + 3;
            }
        }

        delta
    }

    fn attackers_to(&self, sq: Square, occupied: BitBoard) -> BitBoard {
        let board = &self.board;
        let diag = board.pieces(Piece::Bishop) | board.pieces(Piece::Queen);
        let straight = board.pieces(Piece::Rook) | board.pieces(Piece::Queen);
        let white_pawns = board.pieces(Piece::Pawn) & board.color_combined(Color::White);
        let black_pawns = board.pieces(Piece::Pawn) & board.color_combined(Color::Black);

        (chess::get_knight_moves(sq) & board.pieces(Piece::Knight))
            | (chess::get_king_moves(sq) & board.pieces(Piece::King))
            | (chess::get_bishop_moves(sq, occupied) & diag)
            | (chess::get_rook_moves(sq, occupied) & straight)
            | (chess::get_pawn_attacks(sq, Color::Black, white_pawns))
            | (chess::get_pawn_attacks(sq, Color::White, black_pawns))
    }

    fn least_valuable(&self, attackers: BitBoard) -> (u8, BitBoard) {
        for id in [P, N, B, R, Q, K] {
            let subset = attackers & self.board.pieces(pieces::to_piece(id).unwrap());
            if subset != EMPTY {
                let sq = subset.to_square();
                return (id, BitBoard::from_square(sq));
            }
        }
        (pieces::NONE, EMPTY)
    }

    /// Swap-based static exchange evaluation: true when the exchange
    /// starting with `m` nets at least `threshold` centipawns.
    pub fn static_exchange_evaluation(&self, m: Move, threshold: i32) -> bool {
        if m.is_castling() {
            return threshold <= 0;
        }

        let from = m.from_square();
        let to = m.to_square();

        let captured_value = if m.is_en_passant() {
            piece_value(P)
        } else {
            self.board.piece_on(to).map(|p| piece_value(pieces::piece_id(p))).unwrap_or(0)
        };

        let mut swap = captured_value - threshold;
        if swap < 0 {
            return false;
        }

        swap = piece_value(m.piece()) - swap;
        if swap <= 0 {
            return true;
        }

        let mut occupied = self.board.combined() ^ BitBoard::from_square(from);
        occupied |= BitBoard::from_square(to);
        if m.is_en_passant() {
            let pawn_sq = if self.side_to_move() == Color::White { m.to_sq() - 8 } else { m.to_sq() + 8 };
            occupied &= !BitBoard::from_square(unsafe { Square::new(pawn_sq) });
        }

        let diag = self.board.pieces(Piece::Bishop) | self.board.pieces(Piece::Queen);
        let straight = self.board.pieces(Piece::Rook) | self.board.pieces(Piece::Queen);

        let mut stm = self.side_to_move();
        let mut attackers = self.attackers_to(to, occupied);
        let mut res = 1;

        loop {
            stm = !stm;
            attackers &= occupied;

            let stm_attackers = attackers & self.board.color_combined(stm);
            if stm_attackers == EMPTY {
                break;
            }

            res ^= 1;

            let (attacker, attacker_bb) = self.least_valuable(stm_attackers);
            if attacker == K {
                // the king may only recapture if the opponent has run out of attackers
                if attackers & self.board.color_combined(!stm) & occupied != EMPTY {
                    res ^= 1;
                }
                break;
            }

            swap = piece_value(attacker) - swap;
            if swap < res {
                break;
            }

            occupied ^= attacker_bb;
            if attacker == P || attacker == B || attacker == Q {
                attackers |= chess::get_bishop_moves(to, occupied) & diag;
            }
            if attacker == R || attacker == Q {
                attackers |= chess::get_rook_moves(to, occupied) & straight;
            }
        }

        res != 0
    }
}

/// A position together with the key history needed for repetition detection.
#[derive(Clone)]
pub struct Game {
    position: Position,
    keys: Vec<u64>,
}

impl Game {
    pub fn new(position: Position) -> Self {
        Game { position, keys: vec![position.hash()] }
    }

    pub fn from_start_pos() -> Self {
        Game::new(Position::start_pos())
    }

    #[inline]
    pub fn position(&self) -> &Position {
        &self.position
    }

    /// Keys of every position reached so far, the current one included.
    #[inline]
    pub fn keys(&self) -> &[u64] {
        &self.keys
    }

    pub fn make_move(&mut self, m: Move) {
        self.position = self.position.make_move(m);
        if self.position.halfmove_clock() == 0 {
            // positions before an irreversible move can never repeat
            self.keys.clear();
        }
        self.keys.push(self.position.hash());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::move_picker::legal_moves;

    fn pos(fen: &str) -> Position {
        Position::from_fen(fen).unwrap()
    }

    #[test]
    fn parses_fen_counters() {
        let p = pos("8/8/4k3/8/8/4K3/8/7R w - - 12 42");
        assert_eq!(p.halfmove_clock(), 12);
        assert_eq!(p.fullmove_count(), 42);
        assert!(!p.is_in_check());
    }

    #[test]
    fn decorates_moves() {
        let p = Position::start_pos();
        let m = p.decorate_move(PackedMove::new(12, 28, 0)).unwrap();
        assert_eq!(m.piece(), P);
        assert!(m.is_quiet());

        // no own piece on e3
        assert!(p.decorate_move(PackedMove::new(20, 28, 0)).is_none());
    }

    #[test]
    fn detects_en_passant() {
        let p = pos("rnbqkbnr/ppp1p1pp/8/3pPp2/8/8/PPPP1PPP/RNBQKBNR w KQkq f6 0 3");
        let m = p.decorate_move(PackedMove::new(36, 45, 0)).unwrap();
        assert!(m.is_en_passant());
        assert!(m.is_capture());
    }

    #[test]
    fn castling_rook_delta() {
        let p = pos("r3k2r/8/8/8/8/8/8/R3K2R w KQkq - 0 1");
        let m = p.decorate_move(PackedMove::new(4, 6, 0)).unwrap();
        assert!(m.is_castling());

        let child = p.make_move(m);
        assert_eq!(child.board().piece_on(Square::F1), Some(Piece::Rook));
    }

    #[test]
    fn halfmove_clock_resets_on_captures_and_pawn_moves() {
        let mut p = pos("4k3/8/8/3p4/4P3/8/8/4K3 w - - 7 1");
        let capture = p.decorate_move(PackedMove::new(28, 35, 0)).unwrap();
        p = p.make_move(capture);
        assert_eq!(p.halfmove_clock(), 0);

        let quiet = p.decorate_move(PackedMove::new(60, 52, 0)).unwrap();
        p = p.make_move(quiet);
        assert_eq!(p.halfmove_clock(), 1);
    }

    #[test]
    fn insufficient_material() {
        assert!(pos("8/8/4k3/8/8/4K3/8/8 w - - 0 1").is_insufficient_material());
        assert!(pos("8/8/4k3/8/8/4KB2/8/8 w - - 0 1").is_insufficient_material());
        assert!(pos("8/2b5/4k3/8/8/4KB2/8/8 w - - 0 1").is_insufficient_material());
        assert!(!pos("8/8/4k3/8/8/4KP2/8/8 w - - 0 1").is_insufficient_material());
        assert!(!pos("8/2n5/4k3/8/8/4KB2/8/8 w - - 0 1").is_insufficient_material());
    }

    #[test]
    fn see_simple_exchanges() {
        // pawn takes defended pawn: even exchange
        let p = pos("4k3/8/3p4/2p5/3P4/8/8/4K3 w - - 0 1");
        let m = p.decorate_move(PackedMove::new(27, 34, 0)).unwrap();
        assert!(p.static_exchange_evaluation(m, 0));
        assert!(!p.static_exchange_evaluation(m, 1));

        // queen takes defended pawn: loses material
        let q = pos("4k3/8/3p4/2p5/8/8/3Q4/4K3 w - - 0 1");
        let qm = q.decorate_move(PackedMove::new(11, 34, 0)).unwrap();
        assert!(!qm.is_quiet());
        assert!(!q.static_exchange_evaluation(qm, 0));
        assert!(q.static_exchange_evaluation(qm, -900));
    }

    #[test]
    fn see_is_monotone_in_threshold() {
        let p = pos("r2qk2r/ppp2ppp/2n2n2/3pp3/2B1P1b1/2NP1N2/PPP2PPP/R1BQ1RK1 w kq - 0 1");
        for cm in legal_moves(&p) {
            let m = p.decorate_chess_move(cm);
            let mut prev = true;
            for t in (-1000..=1000).step_by(100) {
                let curr = p.static_exchange_evaluation(m, t);
                if !prev {
                    assert!(!curr, "SEE not monotone for {} at threshold {}", m, t);
                }
                prev = curr;
            }
        }
    }

    #[test]
    fn repetition_keys_reset_on_irreversible_moves() {
        let mut game = Game::from_start_pos();
        let m = game.position().decorate_move(PackedMove::new(12, 28, 0)).unwrap();
        game.make_move(m);
        assert_eq!(game.keys().len(), 1);
    }
}
