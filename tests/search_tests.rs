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

use rand::prelude::*;
use rand::rngs::StdRng;
use tessera::move_picker::legal_moves;
use tessera::moves::PackedMove;
use tessera::position::{Game, Position, START_POS};
use tessera::scores::CHECKMATE_SCORE;
use tessera::search::{Search, SearchParams};
use tessera::time_manager::SearchLimits;
use tessera::transposition_table::{Bounds, TranspositionTable};
use tessera::uci_move::parse_uci_move;

fn run_search(fen: &str, depth: i32) -> (Search, Vec<tessera::search::PvLine>) {
    let game = Game::new(Position::from_fen(fen).unwrap());
    let mut search = Search::new(8);
    let params = SearchParams { limits: SearchLimits::depth(depth), ..SearchParams::default() };
    let result = search.do_search(&game, &params, None);
    (search, result)
}

#[test]
fn back_rank_mate_in_one() {
    let (_, result) = run_search("6k1/5ppp/8/8/8/8/5PPP/R5K1 w - - 0 1", 3);
    assert_eq!(result[0].score, CHECKMATE_SCORE - 1);
    assert_eq!(result[0].moves[0].to_string(), "a1a8");
}

#[test]
fn stalemated_side_gets_a_draw_score() {
    let (_, result) = run_search("7k/5Q2/6K1/8/8/8/8/8 b - - 0 1", 4);
    assert_eq!(result[0].score, 0);
    assert!(result[0].moves.is_empty());
}

#[test]
fn search_is_deterministic_and_pv_is_legal() {
    let fens = [
        START_POS,
        "r1bqkbnr/pppp1ppp/2n5/4p3/2B1P3/5N2/PPPP1PPP/RNBQK2R w KQkq - 4 4",
        "8/2p5/3p4/KP5r/1R3p1k/8/4P1P1/8 w - - 0 1",
        "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1",
    ];

    for fen in fens {
        let (_, first) = run_search(fen, 4);
        let (_, second) = run_search(fen, 4);

        assert_eq!(first[0].score, second[0].score, "unstable score for {}", fen);
        assert_eq!(first[0].moves, second[0].moves, "unstable pv for {}", fen);

        // the final score is a real score and the PV starts with a legal move
        assert!(first[0].score.abs() <= CHECKMATE_SCORE);
        let pos = Position::from_fen(fen).unwrap();
        assert!(pos.is_move_legal(first[0].moves[0]), "illegal pv head for {}", fen);
    }
}

#[test]
fn pv_is_playable_to_the_end() {
    let (_, result) = run_search(START_POS, 5);

    let mut pos = Position::from_fen(START_POS).unwrap();
    for &pm in &result[0].moves {
        assert!(pos.is_move_legal(pm), "unplayable pv move {}", pm);
        let m = pos.decorate_move(pm).unwrap();
        pos = pos.make_move(m);
    }
}

#[test]
fn transpositions_share_a_hash() {
    let mut a = Game::from_start_pos();
    for text in ["e2e4", "e7e5", "g1f3"] {
        let m = parse_uci_move(a.position(), text).unwrap();
        a.make_move(m);
    }

    let mut b = Game::from_start_pos();
    for text in ["g1f3", "e7e5", "e2e4"] {
        let m = parse_uci_move(b.position(), text).unwrap();
        b.make_move(m);
    }

    assert_eq!(a.position().hash(), b.position().hash());
    assert_ne!(a.position().hash(), Game::from_start_pos().position().hash());
}

// Reference model of the replacement rule: a same-hash entry survives only
// when it is deeper and of the same bound kind.
#[derive(Clone, Copy)]
struct ModelEntry {
    score: i32,
    depth: i32,
    bounds: Bounds,
}

#[test]
fn tt_replacement_follows_the_model_under_fuzzing() {
    let mut rng = StdRng::seed_from_u64(1234);
    let tt = TranspositionTable::new(1);

    // the chosen hashes occupy distinct slots, so every write races only
    // against earlier entries of the same position
    let hashes: Vec<u64> = (1..=8u64).map(|i| i * 0x10).collect();
    let mut model: std::collections::HashMap<u64, ModelEntry> = std::collections::HashMap::new();

    for _ in 0..2000 {
        let hash = *hashes.choose(&mut rng).unwrap();
        let score = rng.gen_range(-2000..2000);
        let depth = rng.gen_range(0..32);
        let bounds = *[Bounds::Lower, Bounds::Upper, Bounds::Exact].choose(&mut rng).unwrap();
        let mv = PackedMove::new(rng.gen_range(0..64), rng.gen_range(0..64), 0);

        tt.write(hash, score, 0, depth, bounds, &[mv]);

        match model.get(&hash).copied() {
            Some(existing) if existing.depth > depth && existing.bounds == bounds => {
                // the write must have been rejected
            }
            _ => {
                model.insert(hash, ModelEntry { score, depth, bounds });
            }
        }

        let expected = model.get(&hash).unwrap();
        let entry = tt.read(hash).expect("entry vanished");
        assert_eq!(entry.score, expected.score);
        assert_eq!(entry.depth, expected.depth);
        assert_eq!(entry.bounds, expected.bounds);
    }
}

#[test]
fn deeper_search_does_not_weaken_a_found_mate() {
    let game = Game::new(Position::from_fen("4k3/8/R7/1R6/8/8/8/4K3 w - - 0 1").unwrap());

    for depth in 4..=7 {
        let mut search = Search::new(8);
        let params = SearchParams { limits: SearchLimits::depth(depth), ..SearchParams::default() };
        let result = search.do_search(&game, &params, None);
        assert_eq!(result[0].score, CHECKMATE_SCORE - 3, "depth {}", depth);
    }
}

#[test]
fn searchmoves_style_exclusion_restricts_the_root() {
    let game = Game::from_start_pos();
    let allowed = PackedMove::new(11, 27, 0); // d2d4

    let excluded: Vec<PackedMove> = legal_moves(game.position())
        .into_iter()
        .map(PackedMove::from)
        .filter(|&pm| pm != allowed)
        .collect();

    let mut search = Search::new(4);
    let params = SearchParams {
        limits: SearchLimits::depth(3),
        excluded_moves: excluded,
        ..SearchParams::default()
    };
    let result = search.do_search(&game, &params, None);

    assert_eq!(result[0].moves[0], allowed);
}
