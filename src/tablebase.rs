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

use crate::moves::PackedMove;
use crate::position::Position;

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Wdl {
    Loss,
    Draw,
    Win,
}

impl Wdl {
    #[inline]
    pub fn signum(self) -> i32 {
        match self {
            Wdl::Loss => -1,
            Wdl::Draw => 0,
            Wdl::Win => 1,
        }
    }
}

/// Endgame tablebase access as seen by the search. `None` always means
/// "no probe available" and the search continues unaided.
pub trait TablebaseProber: Send + Sync {
    /// Win/draw/loss from the side to move's point of view.
    fn probe_wdl(&self, position: &Position) -> Option<Wdl>;

    /// Root probe returning a move that preserves the WDL outcome.
    fn probe_root(&self, position: &Position) -> Option<(PackedMove, Wdl)> {
        let _ = position;
        None
    }

    /// Largest piece count covered by the loaded tables.
    fn max_pieces(&self) -> u32;
}
