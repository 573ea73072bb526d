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

use crate::align::A32;
use crate::nn::{
    feature_index, king_bucket, network_variant, perspective_sq, NeuralNetParams, CRELU_MAX, FP_OUTPUT_SHIFT,
    HL_HALF_NODES,
};
use crate::pieces::{self, K, P};
use chess::{Board, Color, ALL_COLORS};

/// Everything a single move changes about the feature set, recorded by
/// `Position::do_move` and consumed lazily by the evaluator.
#[derive(Copy, Clone)]
pub struct MoveDelta {
    pub mover_color: Color,
    pub piece: u8,
    pub from: u8,
    pub to: u8,
    pub promotion: u8,
    pub captured: u8,
    pub captured_sq: u8,
    pub rook_from: u8,
    pub rook_to: u8,
    pub is_castling: bool,
}

#[derive(Copy, Clone)]
enum Update {
    Root,
    Move(MoveDelta),
    Null,
}

/// Per-ply, per-thread evaluator state: one accumulator per perspective,
/// the position it belongs to, and the pending update relative to the
/// parent context. Contexts form a stack indexed by search height.
#[derive(Clone)]
pub struct NnContext {
    accum: [A32<[i16; HL_HALF_NODES]>; 2],
    computed: bool,
    board: Board,
    update: Update,
}

impl Default for NnContext {
    fn default() -> Self {
        NnContext {
            accum: [A32([0; HL_HALF_NODES]); 2],
            computed: false,
            board: Board::default(),
            update: Update::Root,
        }
    }
}

impl NnContext {
    /// Re-anchors the context stack on a new root position; the root
    /// context is the only one refreshed eagerly.
    pub fn set_root(&mut self, board: Board, params: &NeuralNetParams) {
        self.board = board;
        self.update = Update::Root;
        for perspective in ALL_COLORS {
            self.refresh(perspective, params);
        }
        self.computed = true;
    }

    pub fn set_move(&mut self, board: Board, delta: MoveDelta) {
        self.board = board;
        self.update = Update::Move(delta);
        self.computed = false;
    }

    pub fn set_null(&mut self, board: Board) {
        self.board = board;
        self.update = Update::Null;
        self.computed = false;
    }

    #[inline]
    pub fn board(&self) -> &Board {
        &self.board
    }

    fn bucket(&self, perspective: Color) -> usize {
        let king = self.board.king_square(perspective).to_index() as u8;
        king_bucket(perspective_sq(king, perspective))
    }

    fn refresh(&mut self, perspective: Color, params: &NeuralNetParams) {
        let bucket = self.bucket(perspective);
        let accum = &mut self.accum[perspective.to_index()].0;
        accum.copy_from_slice(&params.input_biases.0);

        for sq in *self.board.combined() {
            let piece = pieces::piece_id(self.board.piece_on(sq).unwrap());
            let color = self.board.color_on(sq).unwrap();
            let feature =
                feature_index(bucket, color == perspective, piece, perspective_sq(sq.to_index() as u8, perspective));
            add_weights(accum, params.feature_weights(feature));
        }
    }

    /// Applies this context's pending update on top of the parent context.
    fn apply_from(&mut self, parent: &NnContext, params: &NeuralNetParams) {
        for perspective in ALL_COLORS {
            let p = perspective.to_index();

            match self.update {
                Update::Root => {
                    // the root context is refreshed eagerly, never replayed
                    debug_assert!(false);
                    self.refresh(perspective, params);
                }

                Update::Null => {
                    self.accum[p].0.copy_from_slice(&parent.accum[p].0);
                }

                Update::Move(delta) => {
                    // a king crossing its bucket boundary invalidates that
                    // side's whole accumulator
                    if delta.piece == K && delta.mover_color == perspective {
                        let from_bucket = king_bucket(perspective_sq(delta.from, perspective));
                        let to_bucket = king_bucket(perspective_sq(delta.to, perspective));
                        if from_bucket != to_bucket {
                            self.refresh(perspective, params);
                            continue;
                        }
                    }

                    self.accum[p].0.copy_from_slice(&parent.accum[p].0);
                    let bucket = self.bucket(perspective);
                    let accum = &mut self.accum[p].0;
                    let own = delta.mover_color == perspective;

                    if delta.promotion != pieces::NONE {
                        sub_weights(
                            accum,
                            params.feature_weights(feature_index(
                                bucket,
                                own,
                                P,
                                perspective_sq(delta.from, perspective),
                            )),
                        );
                        add_weights(
                            accum,
                            params.feature_weights(feature_index(
                                bucket,
                                own,
                                delta.promotion,
                                perspective_sq(delta.to, perspective),
                            )),
                        );
                    } else {
                        apply_piece_move(accum, params, bucket, own, delta.piece, delta.from, delta.to, perspective);
                    }

                    if delta.captured != pieces::NONE {
                        sub_weights(
                            accum,
                            params.feature_weights(feature_index(
                                bucket,
                                delta.mover_color != perspective,
                                delta.captured,
                                perspective_sq(delta.captured_sq, perspective),
                            )),
                        );
                    }

                    if delta.is_castling {
                        apply_piece_move(
                            accum,
                            params,
                            bucket,
                            own,
                            pieces::R,
                            delta.rook_from,
                            delta.rook_to,
                            perspective,
                        );
                    }
                }
            }
        }

        self.computed = true;
    }
}

#[allow(clippy::too_many_arguments)]
fn apply_piece_move(
    accum: &mut [i16; HL_HALF_NODES], params: &NeuralNetParams, bucket: usize, own: bool, piece: u8, from: u8, to: u8,
    perspective: Color,
) {
    let pfrom = perspective_sq(from, perspective);
    let pto = perspective_sq(to, perspective);

    if let Some(idx) = params.delta_index(own, piece, pfrom, pto) {
        add_weights(accum, params.delta(bucket, idx));
    } else {
        debug_assert!(false, "piece move without delta table entry");
        sub_weights(accum, params.feature_weights(feature_index(bucket, own, piece, pfrom)));
        add_weights(accum, params.feature_weights(feature_index(bucket, own, piece, pto)));
    }
}

/// Brings the context at `height` up to date by walking up the stack to the
/// nearest computed ancestor and replaying the pending updates forward,
/// then runs the last layer. Returns the score from the side to move's
/// point of view.
pub fn evaluate_stack(contexts: &mut [NnContext], height: usize, params: &NeuralNetParams) -> i32 {
    let mut start = height;
    while !contexts[start].computed {
        debug_assert!(start > 0, "root context must be computed");
        start -= 1;
    }

    for i in start + 1..=height {
        let (parents, rest) = contexts.split_at_mut(i);
        rest[0].apply_from(&parents[i - 1], params);
    }

    let ctx = &contexts[height];
    let stm = ctx.board.side_to_move();
    let variant = network_variant(ctx.board.combined().popcnt());

    forward_pass(
        &ctx.accum[stm.to_index()].0,
        &ctx.accum[(!stm).to_index()].0,
        &params.output_weights[variant].0,
        params.output_biases[variant],
    )
}

/// From-scratch evaluation of an arbitrary board, bypassing the context
/// stack. Used by tests to validate the incremental path.
pub fn evaluate_board(board: &Board, params: &NeuralNetParams) -> i32 {
    let mut ctx = NnContext::default();
    ctx.set_root(*board, params);

    let stm = board.side_to_move();
    let variant = network_variant(board.combined().popcnt());
    forward_pass(
        &ctx.accum[stm.to_index()].0,
        &ctx.accum[(!stm).to_index()].0,
        &params.output_weights[variant].0,
        params.output_biases[variant],
    )
}

/// Accumulators of the context at `height`, for integer-equality checks
/// against a refreshed context in tests.
pub fn accumulators(contexts: &[NnContext], height: usize) -> [&[i16; HL_HALF_NODES]; 2] {
    [&contexts[height].accum[0].0, &contexts[height].accum[1].0]
}

fn add_weights(accum: &mut [i16; HL_HALF_NODES], weights: &[i16]) {
    for (a, w) in accum.iter_mut().zip(weights) {
        *a += *w;
    }
}

fn sub_weights(accum: &mut [i16; HL_HALF_NODES], weights: &[i16]) {
    for (a, w) in accum.iter_mut().zip(weights) {
        *a -= *w;
    }
}

#[inline(always)]
fn forward_pass(stm: &[i16], nstm: &[i16], weights: &[i16], bias: i32) -> i32 {
    let sum = madd_halves(stm, nstm, weights);
    (sum + bias) >> FP_OUTPUT_SHIFT
}

#[inline(always)]
fn madd_halves(stm: &[i16], nstm: &[i16], weights: &[i16]) -> i32 {
    #[cfg(all(target_arch = "x86_64", target_feature = "avx2"))]
    {
        avx2::madd_halves(stm, nstm, weights)
    }

    #[cfg(all(target_arch = "x86_64", target_feature = "sse2", not(target_feature = "avx2")))]
    {
        sse2::madd_halves(stm, nstm, weights)
    }

    #[cfg(not(all(target_arch = "x86_64", target_feature = "sse2")))]
    {
        fallback::madd_halves(stm, nstm, weights)
    }
}

#[cfg(all(target_arch = "x86_64", target_feature = "avx2"))]
mod avx2 {
    use super::{CRELU_MAX, HL_HALF_NODES};
    use core::arch::x86_64::*;

    pub fn madd_halves(stm: &[i16], nstm: &[i16], weights: &[i16]) -> i32 {
        unsafe {
            let zero = _mm256_setzero_si256();
            let max = _mm256_set1_epi16(CRELU_MAX);
            let mut acc = _mm256_setzero_si256();

            for i in 0..(HL_HALF_NODES / 16) {
                let n = _mm256_loadu_si256(stm.as_ptr().add(i * 16) as *const __m256i);
                let n = _mm256_min_epi16(_mm256_max_epi16(n, zero), max);
                let w = _mm256_loadu_si256(weights.as_ptr().add(i * 16) as *const __m256i);
                acc = _mm256_add_epi32(acc, _mm256_madd_epi16(n, w));
            }

            for i in 0..(HL_HALF_NODES / 16) {
                let n = _mm256_loadu_si256(nstm.as_ptr().add(i * 16) as *const __m256i);
                let n = _mm256_min_epi16(_mm256_max_epi16(n, zero), max);
                let w = _mm256_loadu_si256(weights.as_ptr().add(HL_HALF_NODES + i * 16) as *const __m256i);
                acc = _mm256_add_epi32(acc, _mm256_madd_epi16(n, w));
            }

            // horizontal reduction of the 8 lanes
            let sum128 = _mm_add_epi32(_mm256_castsi256_si128(acc), _mm256_extracti128_si256::<1>(acc));
            let hi64 = _mm_unpackhi_epi64(sum128, sum128);
            let sum64 = _mm_add_epi32(hi64, sum128);
            let hi32 = _mm_shuffle_epi32::<0b10110001>(sum64);
            let sum32 = _mm_add_epi32(sum64, hi32);
            _mm_cvtsi128_si32(sum32)
        }
    }
}

#[cfg(all(target_arch = "x86_64", target_feature = "sse2", not(target_feature = "avx2")))]
mod sse2 {
    use super::{CRELU_MAX, HL_HALF_NODES};
    use core::arch::x86_64::*;

    pub fn madd_halves(stm: &[i16], nstm: &[i16], weights: &[i16]) -> i32 {
        unsafe {
            let zero = _mm_setzero_si128();
            let max = _mm_set1_epi16(CRELU_MAX);
            let mut acc = _mm_setzero_si128();

            for i in 0..(HL_HALF_NODES / 8) {
                let n = _mm_loadu_si128(stm.as_ptr().add(i * 8) as *const __m128i);
                let n = _mm_min_epi16(_mm_max_epi16(n, zero), max);
                let w = _mm_loadu_si128(weights.as_ptr().add(i * 8) as *const __m128i);
                acc = _mm_add_epi32(acc, _mm_madd_epi16(n, w));
            }

            for i in 0..(HL_HALF_NODES / 8) {
                let n = _mm_loadu_si128(nstm.as_ptr().add(i * 8) as *const __m128i);
                let n = _mm_min_epi16(_mm_max_epi16(n, zero), max);
                let w = _mm_loadu_si128(weights.as_ptr().add(HL_HALF_NODES + i * 8) as *const __m128i);
                acc = _mm_add_epi32(acc, _mm_madd_epi16(n, w));
            }

            let hi64 = _mm_shuffle_epi32::<0b01001110>(acc);
            let sum64 = _mm_add_epi32(hi64, acc);
            let hi32 = _mm_shuffle_epi32::<0b10110001>(sum64);
            let sum32 = _mm_add_epi32(sum64, hi32);
            _mm_cvtsi128_si32(sum32)
        }
    }
}

#[cfg(not(all(target_arch = "x86_64", target_feature = "sse2")))]
mod fallback {
    use super::{CRELU_MAX, HL_HALF_NODES};

    pub fn madd_halves(stm: &[i16], nstm: &[i16], weights: &[i16]) -> i32 {
        let mut sum = 0i32;
        for (n, w) in stm.iter().zip(&weights[..HL_HALF_NODES]) {
            sum += (*n).clamp(0, CRELU_MAX) as i32 * *w as i32;
        }
        for (n, w) in nstm.iter().zip(&weights[HL_HALF_NODES..]) {
            sum += (*n).clamp(0, CRELU_MAX) as i32 * *w as i32;
        }
        sum
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::params;
    use chess::{ChessMove, MoveGen, Square};
    use rand::prelude::*;
    use rand::rngs::StdRng;

    fn scalar_madd(stm: &[i16], nstm: &[i16], weights: &[i16]) -> i32 {
        let mut sum = 0i32;
        for (n, w) in stm.iter().zip(&weights[..HL_HALF_NODES]) {
            sum += (*n).clamp(0, CRELU_MAX) as i32 * *w as i32;
        }
        for (n, w) in nstm.iter().zip(&weights[HL_HALF_NODES..]) {
            sum += (*n).clamp(0, CRELU_MAX) as i32 * *w as i32;
        }
        sum
    }

    #[test]
    fn simd_matches_scalar() {
        let mut rng = StdRng::seed_from_u64(17);
        for _ in 0..64 {
            let stm: Vec<i16> = (0..HL_HALF_NODES).map(|_| rng.gen_range(-512..512)).collect();
            let nstm: Vec<i16> = (0..HL_HALF_NODES).map(|_| rng.gen_range(-512..512)).collect();
            let weights: Vec<i16> = (0..2 * HL_HALF_NODES).map(|_| rng.gen_range(-64..64)).collect();

            assert_eq!(madd_halves(&stm, &nstm, &weights), scalar_madd(&stm, &nstm, &weights));
        }
    }

    fn assert_incremental_matches_refresh(contexts: &mut [NnContext], height: usize) {
        let params = params();
        let incremental = evaluate_stack(contexts, height, &params);

        let board = *contexts[height].board();
        let refreshed = evaluate_board(&board, &params);
        assert_eq!(incremental, refreshed);

        let mut fresh = NnContext::default();
        fresh.set_root(board, &params);
        let inc_accums = accumulators(contexts, height);
        let fresh_accums = accumulators(std::slice::from_ref(&fresh), 0);
        assert_eq!(&inc_accums[0][..], &fresh_accums[0][..]);
        assert_eq!(&inc_accums[1][..], &fresh_accums[1][..]);
    }

    #[test]
    fn incremental_updates_match_refresh_on_random_games() {
        use crate::position::Position;

        let params = params();
        let mut rng = StdRng::seed_from_u64(42);

        for _ in 0..24 {
            let mut contexts = vec![NnContext::default(); 48];
            let mut pos = Position::start_pos();
            contexts[0].set_root(*pos.board(), &params);

            for height in 1..48 {
                let moves: Vec<ChessMove> = MoveGen::new_legal(pos.board()).collect();
                if moves.is_empty() {
                    break;
                }
                let cm = moves[rng.gen_range(0..moves.len())];
                let m = pos.decorate_chess_move(cm);
                pos = pos.do_move(m, &mut contexts[height]);

                // evaluate only at some heights so multi-ply catch-up paths run
                if height % 3 == 0 || height == 47 {
                    assert_incremental_matches_refresh(&mut contexts, height);
                }
            }
        }
    }

    #[test]
    fn king_bucket_crossing_forces_refresh_consistency() {
        use crate::position::Position;

        let params = params();
        // king walks from e1 across the d/e file boundary
        let mut contexts = vec![NnContext::default(); 8];
        let mut pos = Position::from_fen("4k3/8/8/8/8/8/3R4/4K3 w - - 0 1").unwrap();
        contexts[0].set_root(*pos.board(), &params);

        let king_walk = ChessMove::new(Square::E1, Square::D1, None);
        let m = pos.decorate_chess_move(king_walk);
        pos = pos.do_move(m, &mut contexts[1]);
        let _ = pos;

        assert_ne!(
            king_bucket(Square::E1.to_index() as u8),
            king_bucket(Square::D1.to_index() as u8)
        );
        assert_incremental_matches_refresh(&mut contexts, 1);
    }
}
