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

use crate::pieces::{self, Q};
use chess::{ChessMove, Square};
use std::fmt;

// PackedMove layout:
//
// fromSquare : 6
// toSquare   : 6
// promoteTo  : 4    piece id after promotion, 0 if none
#[derive(Copy, Clone, Eq, PartialEq, Default, Hash)]
pub struct PackedMove(u16);

pub const NO_PACKED_MOVE: PackedMove = PackedMove(0);

const SQUARE_MASK: u16 = 0b111111;
const TO_SHIFT: u16 = 6;
const PROMO_SHIFT: u16 = 12;

impl PackedMove {
    #[inline]
    pub const fn new(from: u8, to: u8, promotion: u8) -> Self {
        PackedMove(from as u16 | ((to as u16) << TO_SHIFT) | ((promotion as u16) << PROMO_SHIFT))
    }

    #[inline]
    pub const fn from_bits(bits: u16) -> Self {
        PackedMove(bits)
    }

    #[inline]
    pub const fn to_bits(self) -> u16 {
        self.0
    }

    #[inline]
    pub fn from_sq(self) -> u8 {
        (self.0 & SQUARE_MASK) as u8
    }

    #[inline]
    pub fn to_sq(self) -> u8 {
        ((self.0 >> TO_SHIFT) & SQUARE_MASK) as u8
    }

    #[inline]
    pub fn promotion(self) -> u8 {
        ((self.0 >> PROMO_SHIFT) & 0b1111) as u8
    }

    /// A valid packed move is not necessarily legal for a given position,
    /// see `Position::is_move_legal`.
    #[inline]
    pub fn is_valid(self) -> bool {
        self.0 != 0
    }

    pub fn to_chess_move(self) -> ChessMove {
        ChessMove::new(
            unsafe { Square::new(self.from_sq()) },
            unsafe { Square::new(self.to_sq()) },
            pieces::to_piece(self.promotion()),
        )
    }
}

impl From<ChessMove> for PackedMove {
    fn from(m: ChessMove) -> Self {
        let promo = m.get_promotion().map(pieces::piece_id).unwrap_or(pieces::NONE);
        PackedMove::new(m.get_source().to_index() as u8, m.get_dest().to_index() as u8, promo)
    }
}

impl fmt::Display for PackedMove {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_valid() {
            return write!(f, "0000");
        }
        write!(f, "{}{}", unsafe { Square::new(self.from_sq()) }, unsafe { Square::new(self.to_sq()) })?;
        if let Some(p) = pieces::to_piece(self.promotion()) {
            write!(f, "{}", p.to_string(chess::Color::Black))?;
        }
        Ok(())
    }
}

impl fmt::Debug for PackedMove {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

// Move layout (low 16 bits identical to PackedMove):
//
// fromSquare  : 6
// toSquare    : 6
// promoteTo   : 4
// piece       : 4
// isCapture   : 1
// isEnPassant : 1
// isCastling  : 1
#[derive(Copy, Clone, Eq, PartialEq, Default)]
pub struct Move(u32);

pub const NO_MOVE: Move = Move(0);

const PIECE_SHIFT: u32 = 16;
const CAPTURE_BIT: u32 = 1 << 20;
const EN_PASSANT_BIT: u32 = 1 << 21;
const CASTLING_BIT: u32 = 1 << 22;

impl Move {
    #[inline]
    pub const fn new(
        from: u8, to: u8, piece: u8, promotion: u8, is_capture: bool, is_en_passant: bool, is_castling: bool,
    ) -> Self {
        Move(
            PackedMove::new(from, to, promotion).0 as u32
                | ((piece as u32) << PIECE_SHIFT)
                | if is_capture { CAPTURE_BIT } else { 0 }
                | if is_en_passant { EN_PASSANT_BIT } else { 0 }
                | if is_castling { CASTLING_BIT } else { 0 },
        )
    }

    #[inline]
    pub fn packed(self) -> PackedMove {
        PackedMove(self.0 as u16)
    }

    #[inline]
    pub fn from_sq(self) -> u8 {
        (self.0 & SQUARE_MASK as u32) as u8
    }

    #[inline]
    pub fn to_sq(self) -> u8 {
        ((self.0 >> TO_SHIFT as u32) & SQUARE_MASK as u32) as u8
    }

    #[inline]
    pub fn from_square(self) -> Square {
        unsafe { Square::new(self.from_sq()) }
    }

    #[inline]
    pub fn to_square(self) -> Square {
        unsafe { Square::new(self.to_sq()) }
    }

    #[inline]
    pub fn promotion(self) -> u8 {
        ((self.0 >> PROMO_SHIFT as u32) & 0b1111) as u8
    }

    #[inline]
    pub fn piece(self) -> u8 {
        ((self.0 >> PIECE_SHIFT) & 0b1111) as u8
    }

    #[inline]
    pub fn is_capture(self) -> bool {
        self.0 & CAPTURE_BIT != 0
    }

    #[inline]
    pub fn is_en_passant(self) -> bool {
        self.0 & EN_PASSANT_BIT != 0
    }

    #[inline]
    pub fn is_castling(self) -> bool {
        self.0 & CASTLING_BIT != 0
    }

    #[inline]
    pub fn is_valid(self) -> bool {
        self.0 != 0
    }

    #[inline]
    pub fn is_quiet(self) -> bool {
        !self.is_capture() && self.promotion() == pieces::NONE
    }

    #[inline]
    pub fn is_promotion(self) -> bool {
        self.promotion() != pieces::NONE
    }

    #[inline]
    pub fn is_queen_promotion(self) -> bool {
        self.promotion() == Q
    }

    #[inline]
    pub fn is_underpromotion(self) -> bool {
        self.is_promotion() && !self.is_queen_promotion()
    }

    /// Equality against a packed move compares the low 16 bits only.
    #[inline]
    pub fn eq_packed(self, m: PackedMove) -> bool {
        self.0 as u16 == m.0
    }

    pub fn to_chess_move(self) -> ChessMove {
        self.packed().to_chess_move()
    }
}

impl fmt::Display for Move {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.packed())
    }
}

impl fmt::Debug for Move {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Move")
            .field("move", &self.packed())
            .field("piece", &self.piece())
            .field("capture", &self.is_capture())
            .field("ep", &self.is_en_passant())
            .field("castling", &self.is_castling())
            .finish()
    }
}
