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
use crate::nn::io::read_network;
use crate::pieces::{K, P};
use chess::{Color, Square, EMPTY};
use std::io::BufReader;
use std::sync::{Arc, OnceLock};

pub mod eval;
pub mod io;

// Network shape: two perspectives, each a king-bucketed linear layer into a
// clipped-ReLU accumulator half, concatenated through one of several
// last-layer variants selected by piece count.
pub const NUM_KING_BUCKETS: usize = 4;
pub const FEATURES_PER_BUCKET: usize = 2 * 6 * 64;
pub const NUM_INPUTS: usize = NUM_KING_BUCKETS * FEATURES_PER_BUCKET;
pub const HL_HALF_NODES: usize = 128;
pub const NUM_VARIANTS: usize = 8;

// Fixed point scale of the last layer output
pub const FP_OUTPUT_SHIFT: u32 = 11;

pub const CRELU_MAX: i16 = 127;

static NN_PARAMS: OnceLock<Arc<NeuralNetParams>> = OnceLock::new();

pub fn params() -> Arc<NeuralNetParams> {
    NN_PARAMS.get_or_init(NeuralNetParams::load).clone()
}

/// Forces the one-time network load (called during engine initialization,
/// so the first search does not pay for it).
pub fn init_params() {
    let _ = params();
}

#[inline]
pub fn network_variant(num_pieces: u32) -> usize {
    (((num_pieces.saturating_sub(2)) / 4) as usize).min(NUM_VARIANTS - 1)
}

/// Buckets a perspective-relative king square. Crossing a bucket boundary
/// invalidates that perspective's accumulator.
#[inline]
pub fn king_bucket(perspective_king_sq: u8) -> usize {
    let file_half = (perspective_king_sq & 0b111) >= 4;
    let advanced = (perspective_king_sq >> 3) >= 2;
    (advanced as usize) * 2 + file_half as usize
}

/// Square from the given perspective: black mirrors the board vertically.
#[inline]
pub fn perspective_sq(sq: u8, perspective: Color) -> u8 {
    if perspective == Color::White {
        sq
    } else {
        sq ^ 56
    }
}

/// Feature index within a bucket block: piece type, then ownership
/// relative to the perspective, then the perspective-relative square.
#[inline]
pub fn feature_index(bucket: usize, own: bool, piece: u8, perspective_sq: u8) -> usize {
    bucket * FEATURES_PER_BUCKET
        + (piece as usize - 1) * 128
        + if own { 0 } else { 64 }
        + perspective_sq as usize
}

const NO_DELTA: u16 = u16::MAX;

pub struct NeuralNetParams {
    pub input_weights: Vec<i16>, // [NUM_INPUTS][HL_HALF_NODES]
    pub input_biases: A32<[i16; HL_HALF_NODES]>,
    pub output_weights: [A32<[i16; 2 * HL_HALF_NODES]>; NUM_VARIANTS],
    pub output_biases: [i32; NUM_VARIANTS],

    // one entry per geometrically possible single-piece move, per ownership
    delta_index: Vec<u16>, // [own/opp][piece][from][to]
    deltas: Vec<i16>,      // [bucket][delta][HL_HALF_NODES]
    num_deltas: usize,
}

impl NeuralNetParams {
    fn load() -> Arc<Self> {
        let mut reader = BufReader::new(&include_bytes!("nets/tessera.qnn")[..]);
        let data = read_network(&mut reader).expect("Could not read embedded network");

        let mut input_biases = A32([0i16; HL_HALF_NODES]);
        input_biases.0.copy_from_slice(&data.input_biases);

        let mut output_weights = [A32([0i16; 2 * HL_HALF_NODES]); NUM_VARIANTS];
        let mut output_biases = [0i32; NUM_VARIANTS];
        for v in 0..NUM_VARIANTS {
            output_weights[v].0.copy_from_slice(&data.output_weights[v * 2 * HL_HALF_NODES..(v + 1) * 2 * HL_HALF_NODES]);
            output_biases[v] = data.output_biases[v];
        }

        let mut params = NeuralNetParams {
            input_weights: data.input_weights,
            input_biases,
            output_weights,
            output_biases,
            delta_index: vec![NO_DELTA; 2 * 6 * 64 * 64],
            deltas: Vec::new(),
            num_deltas: 0,
        };
        params.init_accumulator_deltas();

        Arc::new(params)
    }

    #[inline]
    pub fn feature_weights(&self, feature: usize) -> &[i16] {
        &self.input_weights[feature * HL_HALF_NODES..(feature + 1) * HL_HALF_NODES]
    }

    #[inline]
    fn delta_table_slot(own: bool, piece: u8, from: u8, to: u8) -> usize {
        (((!own as usize * 6 + piece as usize - 1) * 64 + from as usize) * 64) + to as usize
    }

    #[inline]
    pub fn delta_index(&self, own: bool, piece: u8, from: u8, to: u8) -> Option<usize> {
        let idx = self.delta_index[Self::delta_table_slot(own, piece, from, to)];
        if idx == NO_DELTA {
            None
        } else {
            Some(idx as usize)
        }
    }

    /// The precomputed accumulator difference `column(to) - column(from)`
    /// for the given bucket, so a same-bucket slide is one vector add.
    #[inline]
    pub fn delta(&self, bucket: usize, delta_index: usize) -> &[i16] {
        let start = (bucket * self.num_deltas + delta_index) * HL_HALF_NODES;
        &self.deltas[start..start + HL_HALF_NODES]
    }

    fn init_accumulator_deltas(&mut self) {
        let mut count = 0usize;
        let mut moves: Vec<(bool, u8, u8, u8)> = Vec::new();

        for own in [true, false] {
            for piece in 1..=6u8 {
                for from in 0..64u8 {
                    for to in piece_move_targets(own, piece, from) {
                        self.delta_index[Self::delta_table_slot(own, piece, from, to)] = count as u16;
                        moves.push((own, piece, from, to));
                        count += 1;
                    }
                }
            }
        }

        self.num_deltas = count;
        self.deltas = vec![0i16; NUM_KING_BUCKETS * count * HL_HALF_NODES];

        for (idx, &(own, piece, from, to)) in moves.iter().enumerate() {
            for bucket in 0..NUM_KING_BUCKETS {
                let removed = feature_index(bucket, own, piece, from);
                let added = feature_index(bucket, own, piece, to);
                let start = (bucket * count + idx) * HL_HALF_NODES;
                for h in 0..HL_HALF_NODES {
                    self.deltas[start + h] =
                        self.input_weights[added * HL_HALF_NODES + h] - self.input_weights[removed * HL_HALF_NODES + h];
                }
            }
        }
    }
}

/// All perspective-relative destination squares a piece can reach with a
/// single move on an empty board, castling king hops included. Promotion
/// moves are excluded since they swap the piece type.
fn piece_move_targets(own: bool, piece: u8, from: u8) -> Vec<u8> {
    let sq = unsafe { Square::new(from) };
    let file = from & 0b111;
    let rank = from >> 3;

    let mut targets = Vec::new();

    if piece == P {
        if own {
            if (1..=5).contains(&rank) {
                targets.push(from + 8);
                if rank == 1 {
                    targets.push(from + 16);
                }
                if file > 0 && from + 7 < 56 {
                    targets.push(from + 7);
                }
                if file < 7 && from + 9 < 56 {
                    targets.push(from + 9);
                }
            }
        } else if (2..=6).contains(&rank) {
            targets.push(from - 8);
            if rank == 6 {
                targets.push(from - 16);
            }
            if file > 0 && from >= 17 {
                targets.push(from - 9);
            }
            if file < 7 && from >= 15 {
                targets.push(from - 7);
            }
        }
        return targets;
    }

    let bb = match piece {
        crate::pieces::N => chess::get_knight_moves(sq),
        crate::pieces::B => chess::get_bishop_moves(sq, EMPTY),
        crate::pieces::R => chess::get_rook_moves(sq, EMPTY),
        crate::pieces::Q => chess::get_bishop_moves(sq, EMPTY) | chess::get_rook_moves(sq, EMPTY),
        K => chess::get_king_moves(sq),
        _ => EMPTY,
    };
    for t in bb {
        targets.push(t.to_index() as u8);
    }

    if piece == K {
        // castling endpoints (own king starts on e1, the mirrored opponent on e8)
        if own && from == 4 {
            targets.push(2);
            targets.push(6);
        } else if !own && from == 60 {
            targets.push(58);
            targets.push(62);
        }
    }

    targets
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variant_selection_covers_piece_counts() {
        assert_eq!(network_variant(2), 0);
        assert_eq!(network_variant(5), 0);
        assert_eq!(network_variant(6), 1);
        assert_eq!(network_variant(32), 7);
    }

    #[test]
    fn king_buckets_split_board() {
        assert_eq!(king_bucket(4), 1); // e1
        assert_eq!(king_bucket(2), 0); // c1
        assert_eq!(king_bucket(36), 3); // e5
        assert_ne!(king_bucket(6), king_bucket(1));
    }

    #[test]
    fn delta_table_covers_piece_moves() {
        let params = params();

        // knight hop, rook slide, castling hop, pawn push
        assert!(params.delta_index(true, crate::pieces::N, 1, 18).is_some());
        assert!(params.delta_index(true, crate::pieces::R, 0, 56).is_some());
        assert!(params.delta_index(true, K, 4, 6).is_some());
        assert!(params.delta_index(false, K, 60, 58).is_some());
        assert!(params.delta_index(true, P, 12, 28).is_some());

        // geometric impossibilities carry no delta
        assert!(params.delta_index(true, crate::pieces::N, 0, 1).is_none());
        assert!(params.delta_index(true, P, 12, 13).is_none());
    }

    #[test]
    fn deltas_match_column_difference() {
        let params = params();
        let idx = params.delta_index(true, crate::pieces::R, 0, 8).unwrap();
        for bucket in 0..NUM_KING_BUCKETS {
            let delta = params.delta(bucket, idx);
            let from_col = params.feature_weights(feature_index(bucket, true, crate::pieces::R, 0));
            let to_col = params.feature_weights(feature_index(bucket, true, crate::pieces::R, 8));
            for h in 0..HL_HALF_NODES {
                assert_eq!(delta[h], to_col[h] - from_col[h]);
            }
        }
    }
}
