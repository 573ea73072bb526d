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

use crate::nn::eval::{evaluate_stack, NnContext};
use crate::nn::NeuralNetParams;
use crate::position::Position;
use crate::scores::sanitize_eval_score;
use chess::Color;

/// Observer for every freshly computed static evaluation, used by data
/// generation tooling. The search runs unobserved when none is set.
pub trait EvalProbingInterface: Send + Sync {
    fn report_position(&self, position: &Position, eval_cp: i32);
}

/// Evaluates the position at `height` through the incremental network
/// context stack. Returns a white-relative centipawn score strictly inside
/// the tablebase-win range.
pub fn evaluate(position: &Position, contexts: &mut [NnContext], height: usize, params: &NeuralNetParams) -> i32 {
    let stm_score = evaluate_stack(contexts, height, params);
    let white_score = if position.side_to_move() == Color::White { stm_score } else { -stm_score };

    adjust_eval(sanitize_eval_score(white_score), position.halfmove_clock())
}

// Scale the eval towards 0 as the 50-move counter runs down, so winning
// lines that reset the counter are preferred.
fn adjust_eval(score: i32, halfmove_clock: u8) -> i32 {
    let remaining_half_moves = (100 - halfmove_clock as i32).max(0);
    if remaining_half_moves >= 95 {
        score
    } else {
        score * remaining_half_moves / 95
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn;

    #[test]
    fn eval_is_damped_by_halfmove_clock() {
        assert_eq!(adjust_eval(190, 0), 190);
        assert_eq!(adjust_eval(190, 10), 180);
        assert_eq!(adjust_eval(190, 99), 2);
        assert_eq!(adjust_eval(-190, 99), -2);
    }

    #[test]
    fn eval_is_symmetric_between_sides() {
        let params = nn::params();

        // mirrored position: white's score must be the negation of black's
        let white = Position::from_fen("4k3/8/8/8/8/8/4P3/4K3 w - - 0 1").unwrap();
        let black = Position::from_fen("4k3/4p3/8/8/8/8/8/4K3 b - - 0 1").unwrap();

        let mut ctx_w = vec![NnContext::default()];
        ctx_w[0].set_root(*white.board(), &params);
        let mut ctx_b = vec![NnContext::default()];
        ctx_b[0].set_root(*black.board(), &params);

        let w = evaluate(&white, &mut ctx_w, 0, &params);
        let b = evaluate(&black, &mut ctx_b, 0, &params);
        assert_eq!(w, -b);
    }
}
