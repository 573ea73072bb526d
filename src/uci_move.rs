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

use crate::move_picker::legal_moves;
use crate::moves::{Move, PackedMove};
use crate::pieces::{self, B, N, Q, R};
use crate::position::Position;
use chess::Square;

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum MoveNotation {
    Coordinate,
    San,
}

/// Parses a move in coordinate notation ("e2e4", "a7a8q") against the
/// given position, returning a fully decorated move when it is legal.
pub fn parse_uci_move(position: &Position, text: &str) -> Option<Move> {
    let bytes = text.as_bytes();
    if bytes.len() < 4 || bytes.len() > 5 {
        return None;
    }

    let file_from = bytes[0].checked_sub(b'a')?;
    let rank_from = bytes[1].checked_sub(b'1')?;
    let file_to = bytes[2].checked_sub(b'a')?;
    let rank_to = bytes[3].checked_sub(b'1')?;
    if file_from > 7 || rank_from > 7 || file_to > 7 || rank_to > 7 {
        return None;
    }

    let promotion = match bytes.get(4) {
        None => pieces::NONE,
        Some(b'n') => N,
        Some(b'b') => B,
        Some(b'r') => R,
        Some(b'q') => Q,
        Some(_) => return None,
    };

    let pm = PackedMove::new(rank_from * 8 + file_from, rank_to * 8 + file_to, promotion);
    if !position.is_move_legal(pm) {
        return None;
    }
    position.decorate_move(pm)
}

pub fn format_move(position: &Position, pm: PackedMove, notation: MoveNotation) -> String {
    match notation {
        MoveNotation::Coordinate => pm.to_string(),
        MoveNotation::San => format_san(position, pm),
    }
}

fn piece_letter(piece: u8) -> &'static str {
    match piece {
        N => "N",
        B => "B",
        R => "R",
        Q => "Q",
        pieces::K => "K",
        _ => "",
    }
}

fn square_name(sq: u8) -> String {
    unsafe { Square::new(sq) }.to_string()
}

fn format_san(position: &Position, pm: PackedMove) -> String {
    let m = match position.decorate_move(pm) {
        Some(m) => m,
        None => return pm.to_string(),
    };

    let mut san = if m.is_castling() {
        if m.to_sq() > m.from_sq() { "O-O".to_string() } else { "O-O-O".to_string() }
    } else if m.piece() == pieces::P {
        let mut s = String::new();
        if m.is_capture() {
            s.push((b'a' + (m.from_sq() & 7)) as char);
            s.push('x');
        }
        s.push_str(&square_name(m.to_sq()));
        if m.is_promotion() {
            s.push('=');
            s.push_str(piece_letter(m.promotion()));
        }
        s
    } else {
        let mut s = piece_letter(m.piece()).to_string();

        // disambiguate against other pieces of the same kind reaching the
        // same square
        let mut same_file = false;
        let mut same_rank = false;
        let mut ambiguous = false;
        for other in legal_moves(position) {
            let other = PackedMove::from(other);
            if other == pm || other.to_sq() != pm.to_sq() {
                continue;
            }
            if position.decorate_move(other).map(|o| o.piece()) != Some(m.piece()) {
                continue;
            }
            ambiguous = true;
            if other.from_sq() & 7 == m.from_sq() & 7 {
                same_file = true;
            }
            if other.from_sq() >> 3 == m.from_sq() >> 3 {
                same_rank = true;
            }
        }
        if ambiguous {
            if !same_file {
                s.push((b'a' + (m.from_sq() & 7)) as char);
            } else if !same_rank {
                s.push((b'1' + (m.from_sq() >> 3)) as char);
            } else {
                s.push_str(&square_name(m.from_sq()));
            }
        }

        if m.is_capture() {
            s.push('x');
        }
        s.push_str(&square_name(m.to_sq()));
        s
    };

    let next = position.make_move(m);
    if next.is_in_check() {
        san.push(if legal_moves(&next).is_empty() { '#' } else { '+' });
    }

    san
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::START_POS;

    #[test]
    fn parses_coordinate_moves() {
        let pos = Position::from_fen(START_POS).unwrap();
        let m = parse_uci_move(&pos, "e2e4").unwrap();
        assert_eq!(m.from_sq(), 12);
        assert_eq!(m.to_sq(), 28);

        assert!(parse_uci_move(&pos, "e2e5").is_none());
        assert!(parse_uci_move(&pos, "xyz").is_none());
    }

    #[test]
    fn parses_promotions() {
        let pos = Position::from_fen("8/4P1k1/8/8/8/8/8/4K3 w - - 0 1").unwrap();
        let m = parse_uci_move(&pos, "e7e8q").unwrap();
        assert!(m.is_queen_promotion());
        assert!(parse_uci_move(&pos, "e7e8").is_none());
    }

    #[test]
    fn san_rendering() {
        let pos = Position::from_fen(START_POS).unwrap();
        let m = PackedMove::new(6, 21, 0); // g1f3
        assert_eq!(format_move(&pos, m, MoveNotation::San), "Nf3");
        assert_eq!(format_move(&pos, m, MoveNotation::Coordinate), "g1f3");
    }

    #[test]
    fn san_disambiguation_and_checkmate() {
        // two knights can reach d2
        let pos = Position::from_fen("4k3/8/8/8/8/5N2/8/1N2K3 w - - 0 1").unwrap();
        let m = PackedMove::new(1, 11, 0); // b1d2
        assert_eq!(format_move(&pos, m, MoveNotation::San), "Nbd2");

        // back-rank mate
        let pos = Position::from_fen("6k1/5ppp/8/8/8/8/5PPP/R5K1 w - - 0 1").unwrap();
        let m = PackedMove::new(0, 56, 0); // a1a8
        assert_eq!(format_move(&pos, m, MoveNotation::San), "Ra8#");
    }

    #[test]
    fn san_castling() {
        let pos = Position::from_fen("r3k2r/8/8/8/8/8/8/R3K2R w KQkq - 0 1").unwrap();
        assert_eq!(format_move(&pos, PackedMove::new(4, 6, 0), MoveNotation::San), "O-O");
        assert_eq!(format_move(&pos, PackedMove::new(4, 2, 0), MoveNotation::San), "O-O-O");
    }
}
