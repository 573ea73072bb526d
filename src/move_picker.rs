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

use crate::move_orderer::{MoveOrderer, COUNTER_MOVE_VALUE, KILLER_VALUE, PROMOTION_VALUE, TT_MOVE_VALUE};
use crate::moves::{Move, PackedMove, NO_PACKED_MOVE};
use crate::position::Position;
use crate::transposition_table::NUM_TT_MOVES;
use chess::{BitBoard, ChessMove, Color, MoveGen};
use rand::Rng;

const MAX_MOVES: usize = 220;

const RANK_1: BitBoard = BitBoard(0xFF);
const RANK_8: BitBoard = BitBoard(0xFF00_0000_0000_0000);

pub fn legal_moves(position: &Position) -> Vec<ChessMove> {
    MoveGen::new_legal(position.board()).collect()
}

#[derive(Copy, Clone)]
struct MoveList {
    items: [(Move, i32); MAX_MOVES],
    len: usize,
}

impl Default for MoveList {
    fn default() -> Self {
        MoveList { items: [(Move::default(), 0); MAX_MOVES], len: 0 }
    }
}

impl MoveList {
    #[inline]
    fn push(&mut self, m: Move, score: i32) {
        self.items[self.len] = (m, score);
        self.len += 1;
    }

    fn best_score(&self) -> Option<i32> {
        self.items[..self.len].iter().map(|&(_, score)| score).max()
    }

    /// Removes and returns the highest-scored move.
    fn pick_best(&mut self) -> Option<(Move, i32)> {
        if self.len == 0 {
            return None;
        }

        let mut best = 0;
        for i in 1..self.len {
            if self.items[i].1 > self.items[best].1 {
                best = i;
            }
        }

        self.len -= 1;
        self.items.swap(best, self.len);
        Some(self.items[self.len])
    }
}

#[derive(Copy, Clone, Eq, PartialEq)]
pub enum PickerMode {
    /// All moves in staged order.
    MainSearch,
    /// Captures and promotions only, unless in check (then every evasion).
    Quiescence,
}

#[derive(Copy, Clone, Eq, PartialEq)]
enum Stage {
    TtMoves,
    GenNoisy,
    GoodNoisy,
    Killers,
    Counter,
    GenQuiet,
    Quiet,
    BadNoisy,
    Done,
}

/// Lazily yields every legal move exactly once, in stage order, with an
/// attached ordering score. Moves present in the node's filter are never
/// yielded.
pub struct MovePicker<'a> {
    position: Position,
    filter: &'a [PackedMove],

    tt_moves: [PackedMove; NUM_TT_MOVES + 1],
    killers: [PackedMove; 2],
    counter: PackedMove,
    height: usize,
    previous_move: Move,

    include_quiets: bool,
    with_killers: bool,

    stage: Stage,
    tt_index: usize,
    killer_index: usize,
    yielded: [PackedMove; NUM_TT_MOVES + 4],
    yielded_len: usize,

    noisy: MoveList,
    quiets: MoveList,

    filtered_some: bool,
}

impl<'a> MovePicker<'a> {
    pub fn new(
        position: Position, mode: PickerMode, pv_move: PackedMove, tt_moves: [PackedMove; NUM_TT_MOVES],
        height: usize, previous_move: Move, filter: &'a [PackedMove],
    ) -> Self {
        let in_check = position.is_in_check();
        let include_quiets = mode == PickerMode::MainSearch || in_check;
        let with_killers = mode == PickerMode::MainSearch;

        MovePicker {
            position,
            filter,
            tt_moves: [pv_move, tt_moves[0], tt_moves[1]],
            killers: [NO_PACKED_MOVE; 2],
            counter: NO_PACKED_MOVE,
            height,
            previous_move,
            include_quiets,
            with_killers,
            stage: Stage::TtMoves,
            tt_index: 0,
            killer_index: 0,
            yielded: [NO_PACKED_MOVE; NUM_TT_MOVES + 4],
            yielded_len: 0,
            noisy: MoveList::default(),
            quiets: MoveList::default(),
            filtered_some: false,
        }
    }

    /// True when the filter suppressed at least one legal move; such nodes
    /// must not publish their result to the transposition table.
    pub fn filtered_some_move(&self) -> bool {
        self.filtered_some
    }

    /// Root diversity for helper threads: all moves in one stage with
    /// random ordering scores.
    pub fn shuffle<R: Rng>(&mut self, rng: &mut R) {
        self.quiets = MoveList::default();
        for cm in MoveGen::new_legal(self.position.board()) {
            let m = self.position.decorate_chess_move(cm);
            if self.is_filtered(m.packed()) {
                continue;
            }
            self.quiets.push(m, rng.gen_range(0..MAX_MOVES as i32));
        }
        self.stage = Stage::Quiet;
    }

    fn is_filtered(&mut self, pm: PackedMove) -> bool {
        if self.filter.contains(&pm) {
            self.filtered_some = true;
            true
        } else {
            false
        }
    }

    fn already_yielded(&self, pm: PackedMove) -> bool {
        self.yielded[..self.yielded_len].contains(&pm)
    }

    fn mark_yielded(&mut self, pm: PackedMove) {
        self.yielded[self.yielded_len] = pm;
        self.yielded_len += 1;
    }

    fn promotion_rank(&self) -> BitBoard {
        if self.position.side_to_move() == Color::White {
            RANK_8
        } else {
            RANK_1
        }
    }

    fn generate_noisy(&mut self, orderer: &MoveOrderer) {
        let board = *self.position.board();
        let mut gen = MoveGen::new_legal(&board);

        let mut targets = *board.color_combined(!self.position.side_to_move());
        if let Some(ep) = self.position.en_passant_target() {
            targets |= BitBoard::from_square(ep);
        }
        targets |= self.promotion_rank() & !board.combined();
        gen.set_iterator_mask(targets);

        for cm in gen {
            let m = self.position.decorate_chess_move(cm);
            if !m.is_capture() && !m.is_promotion() {
                // non-pawn move to an empty back-rank square
                continue;
            }
            let pm = m.packed();
            if self.already_yielded(pm) || self.is_filtered(pm) {
                continue;
            }
            let score = orderer.score_noisy(&self.position, m);
            self.noisy.push(m, score);
        }
    }

    fn generate_quiets(&mut self, orderer: &MoveOrderer) {
        let board = *self.position.board();
        let mut gen = MoveGen::new_legal(&board);
        gen.set_iterator_mask(!*board.combined());

        let stm = self.position.side_to_move();
        for cm in gen {
            let m = self.position.decorate_chess_move(cm);
            if m.is_capture() || m.is_promotion() {
                // en-passant and quiet promotions belong to the noisy stage
                continue;
            }
            let pm = m.packed();
            if self.already_yielded(pm) || self.is_filtered(pm) {
                continue;
            }
            self.quiets.push(m, orderer.history_score(stm, m));
        }
    }

    /// Yields the next move and its ordering score.
    pub fn next(&mut self, orderer: &MoveOrderer) -> Option<(Move, i32)> {
        loop {
            match self.stage {
                Stage::TtMoves => {
                    while self.tt_index < self.tt_moves.len() {
                        let pm = self.tt_moves[self.tt_index];
                        self.tt_index += 1;

                        if !pm.is_valid() || self.already_yielded(pm) {
                            continue;
                        }
                        if self.is_filtered(pm) {
                            continue;
                        }
                        if !self.position.is_move_legal(pm) {
                            continue;
                        }
                        let m = match self.position.decorate_move(pm) {
                            Some(m) => m,
                            None => continue,
                        };
                        if !self.include_quiets && m.is_quiet() {
                            continue;
                        }
                        if self.already_yielded(m.packed()) {
                            continue;
                        }
                        self.mark_yielded(m.packed());
                        return Some((m, TT_MOVE_VALUE));
                    }
                    self.stage = Stage::GenNoisy;
                }

                Stage::GenNoisy => {
                    self.generate_noisy(orderer);
                    self.stage = Stage::GoodNoisy;
                }

                Stage::GoodNoisy => {
                    // losing captures stay behind for the final stage
                    if self.noisy.best_score().is_some_and(|score| score >= PROMOTION_VALUE) {
                        return self.noisy.pick_best();
                    }
                    if self.with_killers {
                        self.killers = orderer.killer_moves(self.height);
                        self.counter = orderer.counter_move(self.position.side_to_move(), self.previous_move);
                        self.stage = Stage::Killers;
                    } else if self.include_quiets {
                        self.stage = Stage::GenQuiet;
                    } else {
                        self.stage = Stage::BadNoisy;
                    }
                }

                Stage::Killers => {
                    while self.killer_index < 2 {
                        let pm = self.killers[self.killer_index];
                        self.killer_index += 1;

                        if let Some(picked) = self.try_special_quiet(pm, KILLER_VALUE) {
                            return Some(picked);
                        }
                    }
                    self.stage = Stage::Counter;
                }

                Stage::Counter => {
                    let pm = self.counter;
                    self.stage = Stage::GenQuiet;
                    if pm != self.killers[0] && pm != self.killers[1] {
                        if let Some(picked) = self.try_special_quiet(pm, COUNTER_MOVE_VALUE) {
                            return Some(picked);
                        }
                    }
                }

                Stage::GenQuiet => {
                    self.generate_quiets(orderer);
                    self.stage = Stage::Quiet;
                }

                Stage::Quiet => match self.quiets.pick_best() {
                    Some(picked) => return Some(picked),
                    None => self.stage = Stage::BadNoisy,
                },

                Stage::BadNoisy => match self.noisy.pick_best() {
                    Some(picked) => return Some(picked),
                    None => self.stage = Stage::Done,
                },

                Stage::Done => return None,
            }
        }
    }

    fn try_special_quiet(&mut self, pm: PackedMove, score: i32) -> Option<(Move, i32)> {
        if !pm.is_valid() || self.already_yielded(pm) {
            return None;
        }
        if self.is_filtered(pm) || !self.position.is_move_legal(pm) {
            return None;
        }
        let m = self.position.decorate_move(pm)?;
        if !m.is_quiet() || self.already_yielded(m.packed()) {
            return None;
        }
        self.mark_yielded(m.packed());
        Some((m, score))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::START_POS;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    fn collect_all(picker: &mut MovePicker, orderer: &MoveOrderer) -> Vec<Move> {
        let mut moves = Vec::new();
        while let Some((m, _)) = picker.next(orderer) {
            moves.push(m);
        }
        moves
    }

    fn no_tt() -> [PackedMove; NUM_TT_MOVES] {
        [NO_PACKED_MOVE; NUM_TT_MOVES]
    }

    #[test]
    fn yields_every_legal_move_exactly_once() {
        let fens = [
            START_POS,
            "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1",
            "8/2p5/3p4/KP5r/1R3p1k/8/4P1P1/8 w - - 0 1",
            "rnbq1k1r/pp1Pbppp/2p5/8/2B5/8/PPP1NnPP/RNBQK2R w KQ - 1 8",
        ];

        for fen in fens {
            let pos = Position::from_fen(fen).unwrap();
            let orderer = MoveOrderer::default();
            let mut picker =
                MovePicker::new(pos, PickerMode::MainSearch, NO_PACKED_MOVE, no_tt(), 0, Move::default(), &[]);

            let yielded = collect_all(&mut picker, &orderer);
            let expected: HashSet<PackedMove> = legal_moves(&pos).into_iter().map(PackedMove::from).collect();
            let got: HashSet<PackedMove> = yielded.iter().map(|m| m.packed()).collect();

            assert_eq!(got.len(), yielded.len(), "duplicate move yielded for {}", fen);
            assert_eq!(got, expected, "move set mismatch for {}", fen);
        }
    }

    #[test]
    fn tt_move_comes_first() {
        let pos = Position::from_fen(START_POS).unwrap();
        let orderer = MoveOrderer::default();
        let tt_move = PackedMove::new(12, 28, 0); // e2e4

        let mut picker = MovePicker::new(
            pos,
            PickerMode::MainSearch,
            NO_PACKED_MOVE,
            [tt_move, NO_PACKED_MOVE],
            0,
            Move::default(),
            &[],
        );

        let (first, score) = picker.next(&orderer).unwrap();
        assert!(first.eq_packed(tt_move));
        assert_eq!(score, TT_MOVE_VALUE);
    }

    #[test]
    fn filtered_moves_are_never_yielded() {
        let pos = Position::from_fen(START_POS).unwrap();
        let orderer = MoveOrderer::default();
        let filtered = PackedMove::new(12, 28, 0);

        let filter = [filtered];
        let mut picker =
            MovePicker::new(pos, PickerMode::MainSearch, NO_PACKED_MOVE, no_tt(), 0, Move::default(), &filter);

        let yielded = collect_all(&mut picker, &orderer);
        assert_eq!(yielded.len(), 19);
        assert!(yielded.iter().all(|m| !m.eq_packed(filtered)));
        assert!(picker.filtered_some_move());
    }

    #[test]
    fn quiescence_mode_yields_noisy_moves_only() {
        let pos =
            Position::from_fen("rnbqkbnr/ppp1pppp/8/3p4/4P3/8/PPPP1PPP/RNBQKBNR w KQkq - 0 2").unwrap();
        let orderer = MoveOrderer::default();
        let mut picker =
            MovePicker::new(pos, PickerMode::Quiescence, NO_PACKED_MOVE, no_tt(), 0, Move::default(), &[]);

        let yielded = collect_all(&mut picker, &orderer);
        assert!(!yielded.is_empty());
        assert!(yielded.iter().all(|m| m.is_capture() || m.is_promotion()));
    }

    #[test]
    fn quiescence_mode_in_check_yields_all_evasions() {
        let pos = Position::from_fen("4k3/8/8/8/8/8/4r3/4K3 w - - 0 1").unwrap();
        assert!(pos.is_in_check());

        let orderer = MoveOrderer::default();
        let mut picker =
            MovePicker::new(pos, PickerMode::Quiescence, NO_PACKED_MOVE, no_tt(), 0, Move::default(), &[]);

        let yielded = collect_all(&mut picker, &orderer);
        assert_eq!(yielded.len(), legal_moves(&pos).len());
    }

    #[test]
    fn killers_come_before_ordinary_quiets() {
        let pos = Position::from_fen(START_POS).unwrap();
        let mut orderer = MoveOrderer::default();
        let killer = PackedMove::new(6, 21, 0); // g1f3
        orderer.update_killer_move(0, killer);

        let mut picker =
            MovePicker::new(pos, PickerMode::MainSearch, NO_PACKED_MOVE, no_tt(), 0, Move::default(), &[]);

        let yielded = collect_all(&mut picker, &orderer);
        let killer_pos = yielded.iter().position(|m| m.eq_packed(killer)).unwrap();
        // only TT/noisy stages may come before a killer; the start position has none
        assert_eq!(killer_pos, 0);
        assert_eq!(yielded.len(), 20);
    }

    #[test]
    fn shuffle_covers_all_root_moves() {
        let pos = Position::from_fen(START_POS).unwrap();
        let orderer = MoveOrderer::default();
        let mut picker =
            MovePicker::new(pos, PickerMode::MainSearch, NO_PACKED_MOVE, no_tt(), 0, Move::default(), &[]);

        let mut rng = StdRng::seed_from_u64(5);
        picker.shuffle(&mut rng);

        let yielded = collect_all(&mut picker, &orderer);
        assert_eq!(yielded.len(), 20);
        let unique: HashSet<PackedMove> = yielded.iter().map(|m| m.packed()).collect();
        assert_eq!(unique.len(), 20);
    }
}
