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

use crate::moves::{Move, PackedMove, NO_PACKED_MOVE};
use crate::pieces::piece_value;
use crate::position::Position;
use crate::scores::MAX_SEARCH_DEPTH;
use chess::Color;

pub const HISTORY_MAX: i32 = 16384;
const HISTORY_BONUS_CAP: i32 = 2048;

// Move score tiers. Quiet moves score in the history range, so the
// history-based pruning thresholds apply to them directly.
pub const TT_MOVE_VALUE: i32 = i32::MAX;
pub const GOOD_CAPTURE_VALUE: i32 = 8_000_000;
pub const PROMOTION_VALUE: i32 = 7_000_000;
pub const KILLER_VALUE: i32 = 120_000;
pub const COUNTER_MOVE_VALUE: i32 = 100_000;
pub const BAD_CAPTURE_VALUE: i32 = -8_000_000;
const UNDERPROMOTION_VALUE: i32 = -9_000_000;

/// Per-thread move ordering state: history, killers and counter-moves,
/// all updated on quiet fail-highs.
pub struct MoveOrderer {
    killers: [[PackedMove; 2]; MAX_SEARCH_DEPTH + 1],
    counters: Box<[[[PackedMove; 64]; 6]; 2]>,
    history: Box<[[[i32; 64]; 64]; 2]>,
}

impl Default for MoveOrderer {
    fn default() -> Self {
        MoveOrderer {
            killers: [[NO_PACKED_MOVE; 2]; MAX_SEARCH_DEPTH + 1],
            counters: Box::new([[[NO_PACKED_MOVE; 64]; 6]; 2]),
            history: Box::new([[[0; 64]; 64]; 2]),
        }
    }
}

fn history_bonus(depth: i32) -> i32 {
    (depth * depth).min(HISTORY_BONUS_CAP)
}

impl MoveOrderer {
    pub fn clear(&mut self) {
        self.killers = [[NO_PACKED_MOVE; 2]; MAX_SEARCH_DEPTH + 1];
        self.counters = Box::new([[[NO_PACKED_MOVE; 64]; 6]; 2]);
        self.history = Box::new([[[0; 64]; 64]; 2]);
    }

    /// Between searches of the same game the tables stay useful but
    /// shouldn't dominate fresh information.
    pub fn new_search(&mut self) {
        self.killers = [[NO_PACKED_MOVE; 2]; MAX_SEARCH_DEPTH + 1];
        for side in self.history.iter_mut() {
            for from in side.iter_mut() {
                for value in from.iter_mut() {
                    *value /= 2;
                }
            }
        }
    }

    #[inline]
    pub fn history_score(&self, stm: Color, m: Move) -> i32 {
        self.history[stm.to_index()][m.from_sq() as usize][m.to_sq() as usize]
    }

    #[inline]
    pub fn killer_moves(&self, height: usize) -> [PackedMove; 2] {
        self.killers[height]
    }

    #[inline]
    pub fn counter_move(&self, stm: Color, previous: Move) -> PackedMove {
        if !previous.is_valid() {
            return NO_PACKED_MOVE;
        }
        self.counters[stm.to_index()][previous.piece() as usize - 1][previous.to_sq() as usize]
    }

    fn bump_history(&mut self, stm: Color, m: Move, bonus: i32) {
        let value = &mut self.history[stm.to_index()][m.from_sq() as usize][m.to_sq() as usize];
        *value = (*value + bonus).clamp(-HISTORY_MAX, HISTORY_MAX);
    }

    /// Fail-high on a quiet move: reward the cutoff move, penalize every
    /// quiet move that was tried before it.
    pub fn update_quiet_history(&mut self, stm: Color, quiets_tried: &[Move], cutoff_move: Move, depth: i32) {
        let bonus = history_bonus(depth);
        self.bump_history(stm, cutoff_move, bonus);
        for &m in quiets_tried {
            if m != cutoff_move {
                self.bump_history(stm, m, -bonus);
            }
        }
    }

    pub fn update_killer_move(&mut self, height: usize, m: PackedMove) {
        let slots = &mut self.killers[height];
        if slots[0] != m {
            slots[1] = slots[0];
            slots[0] = m;
        }
    }

    pub fn update_counter_move(&mut self, stm: Color, previous: Move, m: PackedMove) {
        if previous.is_valid() {
            self.counters[stm.to_index()][previous.piece() as usize - 1][previous.to_sq() as usize] = m;
        }
    }

    /// Captures are ranked by MVV/LVA and classified good or bad with a
    /// zero-threshold exchange evaluation; quiet promotions rank between
    /// the winning and losing captures.
    pub fn score_noisy(&self, position: &Position, m: Move) -> i32 {
        if m.is_underpromotion() {
            return UNDERPROMOTION_VALUE + piece_value(m.promotion());
        }

        if !m.is_capture() {
            debug_assert!(m.is_queen_promotion());
            return PROMOTION_VALUE;
        }

        let victim = if m.is_en_passant() {
            piece_value(crate::pieces::P)
        } else {
            position
                .board()
                .piece_on(m.to_square())
                .map(|p| piece_value(crate::pieces::piece_id(p)))
                .unwrap_or(0)
        };
        let mvv_lva = 8 * victim - piece_value(m.piece()) / 64;

        if position.static_exchange_evaluation(m, 0) {
            GOOD_CAPTURE_VALUE + mvv_lva
        } else {
            BAD_CAPTURE_VALUE + mvv_lva
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pieces::{N, P};

    #[test]
    fn killer_slots_push_and_collapse() {
        let mut orderer = MoveOrderer::default();
        let a = PackedMove::new(1, 2, 0);
        let b = PackedMove::new(3, 4, 0);

        orderer.update_killer_move(3, a);
        orderer.update_killer_move(3, b);
        assert_eq!(orderer.killer_moves(3), [b, a]);

        // duplicates collapse instead of filling both slots
        orderer.update_killer_move(3, b);
        assert_eq!(orderer.killer_moves(3), [b, a]);
    }

    #[test]
    fn history_rewards_cutoff_and_punishes_earlier_quiets() {
        let mut orderer = MoveOrderer::default();
        let cutoff = Move::new(1, 17, N, 0, false, false, false);
        let tried = Move::new(8, 16, P, 0, false, false, false);

        orderer.update_quiet_history(Color::White, &[tried, cutoff], cutoff, 6);

        assert_eq!(orderer.history_score(Color::White, cutoff), 36);
        assert_eq!(orderer.history_score(Color::White, tried), -36);
        // the other side's table is untouched
        assert_eq!(orderer.history_score(Color::Black, cutoff), 0);
    }

    #[test]
    fn history_bonus_is_capped() {
        assert_eq!(history_bonus(3), 9);
        assert_eq!(history_bonus(60), HISTORY_BONUS_CAP);
    }

    #[test]
    fn counter_move_is_indexed_by_previous_piece_and_target() {
        let mut orderer = MoveOrderer::default();
        let previous = Move::new(12, 28, P, 0, false, false, false);
        let counter = PackedMove::new(57, 42, 0);

        orderer.update_counter_move(Color::Black, previous, counter);
        assert_eq!(orderer.counter_move(Color::Black, previous), counter);

        let other = Move::new(12, 27, P, 0, false, false, false);
        assert_eq!(orderer.counter_move(Color::Black, other), NO_PACKED_MOVE);
    }

    #[test]
    fn capture_classification() {
        let orderer = MoveOrderer::default();

        // pawn takes pawn: even capture counts as good
        let pos = Position::from_fen("4k3/8/3p4/2p5/3P4/8/8/4K3 w - - 0 1").unwrap();
        let good = pos.decorate_move(PackedMove::new(27, 34, 0)).unwrap();
        assert!(orderer.score_noisy(&pos, good) >= GOOD_CAPTURE_VALUE);

        // queen takes a defended pawn: classified as losing
        let pos = Position::from_fen("4k3/4p3/3p4/8/8/6Q1/8/4K3 w - - 0 1").unwrap();
        let bad = pos.decorate_move(PackedMove::new(22, 43, 0)).unwrap();
        assert!(bad.is_capture());
        assert!(orderer.score_noisy(&pos, bad) < GOOD_CAPTURE_VALUE);
    }
}
