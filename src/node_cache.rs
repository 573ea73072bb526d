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

use crate::moves::{PackedMove, NO_PACKED_MOVE};

const SIZE: usize = 1024;
pub const MAX_CACHE_MOVES: usize = 64;

// All counts on an entry are halved once any of them saturates this bit.
const SCALE_DOWN_THRESHOLD: u64 = 1 << 63;

#[derive(Copy, Clone, Default)]
pub struct MoveNodeStats {
    pub mv: PackedMove,
    pub nodes_searched: u64,
    pub is_best_move: bool,
}

/// Running tally of how many nodes each move of a position consumed,
/// feeding the time manager's best-move node fraction.
#[derive(Clone)]
pub struct NodeCacheEntry {
    hash: u64,
    generation: u32,
    pub distance_from_root: u32,
    pub nodes_sum: u64,
    pub moves: [MoveNodeStats; MAX_CACHE_MOVES],
}

impl Default for NodeCacheEntry {
    fn default() -> Self {
        NodeCacheEntry {
            hash: 0,
            generation: 0,
            distance_from_root: 0,
            nodes_sum: 0,
            moves: [MoveNodeStats::default(); MAX_CACHE_MOVES],
        }
    }
}

impl NodeCacheEntry {
    pub fn get_move(&self, mv: PackedMove) -> Option<&MoveNodeStats> {
        self.moves.iter().find(|info| info.mv == mv && info.mv.is_valid())
    }

    fn scale_down(&mut self) {
        self.nodes_sum = 0;
        for info in self.moves.iter_mut() {
            info.nodes_searched /= 2;
            self.nodes_sum += info.nodes_searched;
        }
    }

    pub fn add_move_stats(&mut self, mv: PackedMove, num_nodes: u64) {
        let mut min_nodes = u64::MAX;
        let mut min_index = usize::MAX;

        for (i, info) in self.moves.iter_mut().enumerate() {
            if info.mv == mv && info.mv.is_valid() {
                info.nodes_searched += num_nodes;
                self.nodes_sum += num_nodes;

                if info.nodes_searched >= SCALE_DOWN_THRESHOLD {
                    self.scale_down();
                }
                return;
            }

            if !info.mv.is_valid() || (info.nodes_searched < min_nodes && info.nodes_searched < num_nodes) {
                min_nodes = info.nodes_searched;
                min_index = i;
            }
        }

        // replace the least-visited move
        if min_index < MAX_CACHE_MOVES {
            let info = &mut self.moves[min_index];
            self.nodes_sum -= info.nodes_searched;
            self.nodes_sum += num_nodes;
            info.mv = mv;
            info.nodes_searched = num_nodes;
            info.is_best_move = false;
        }
    }

    /// Marks the move and rotates it to the front of the histogram.
    pub fn set_best_move(&mut self, mv: PackedMove) {
        if let Some(pos) = self.moves.iter().position(|info| info.mv == mv && info.mv.is_valid()) {
            self.moves[pos].is_best_move = true;
            self.moves[..=pos].rotate_right(1);
        }
    }

    pub fn best_move_node_fraction(&self) -> Option<f64> {
        if self.nodes_sum == 0 {
            return None;
        }
        self.moves
            .iter()
            .find(|info| info.is_best_move && info.mv.is_valid())
            .map(|info| info.nodes_searched as f64 / self.nodes_sum as f64)
    }
}

pub struct NodeCache {
    generation: u32,
    entries: Vec<NodeCacheEntry>,
}

impl Default for NodeCache {
    fn default() -> Self {
        NodeCache { generation: 0, entries: vec![NodeCacheEntry::default(); SIZE] }
    }
}

impl NodeCache {
    pub fn reset(&mut self) {
        self.generation = 0;
        self.entries.fill(NodeCacheEntry::default());
    }

    pub fn on_new_search(&mut self) {
        self.generation += 1;
    }

    pub fn try_get_entry(&self, hash: u64) -> Option<&NodeCacheEntry> {
        let entry = &self.entries[hash as usize % SIZE];
        if entry.hash == hash && entry.generation > 0 {
            Some(entry)
        } else {
            None
        }
    }

    /// Returns the entry for the position, claiming the slot when its
    /// occupant is from an earlier search. `None` when the slot is taken
    /// by a same-generation position.
    pub fn get_entry(&mut self, hash: u64, distance_from_root: u32) -> Option<&mut NodeCacheEntry> {
        let generation = self.generation;
        let entry = &mut self.entries[hash as usize % SIZE];

        if entry.hash == hash && entry.generation > 0 {
            entry.generation = generation;
            entry.distance_from_root = distance_from_root;
            return Some(entry);
        }

        if entry.generation < generation {
            *entry = NodeCacheEntry::default();
            entry.hash = hash;
            entry.generation = generation;
            entry.distance_from_root = distance_from_root;
            return Some(entry);
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mv(i: u8) -> PackedMove {
        PackedMove::new(i, i + 8, 0)
    }

    #[test]
    fn accumulates_per_move_counts() {
        let mut cache = NodeCache::default();
        cache.on_new_search();

        let entry = cache.get_entry(99, 0).unwrap();
        entry.add_move_stats(mv(1), 100);
        entry.add_move_stats(mv(2), 50);
        entry.add_move_stats(mv(1), 25);

        assert_eq!(entry.get_move(mv(1)).unwrap().nodes_searched, 125);
        assert_eq!(entry.nodes_sum, 175);
    }

    #[test]
    fn best_move_fraction() {
        let mut cache = NodeCache::default();
        cache.on_new_search();

        let entry = cache.get_entry(7, 0).unwrap();
        entry.add_move_stats(mv(1), 300);
        entry.add_move_stats(mv(2), 100);
        entry.set_best_move(mv(1));

        assert_eq!(entry.moves[0].mv, mv(1));
        assert!((entry.best_move_node_fraction().unwrap() - 0.75).abs() < 1e-9);
    }

    #[test]
    fn scale_down_on_saturation() {
        let mut entry = NodeCacheEntry::default();
        entry.add_move_stats(mv(1), SCALE_DOWN_THRESHOLD - 1);
        entry.add_move_stats(mv(2), 8);
        entry.add_move_stats(mv(1), 1);

        assert!(entry.get_move(mv(1)).unwrap().nodes_searched < SCALE_DOWN_THRESHOLD);
        assert_eq!(entry.get_move(mv(2)).unwrap().nodes_searched, 4);
    }

    #[test]
    fn stale_generation_is_overwritten_unconditionally() {
        let mut cache = NodeCache::default();
        cache.on_new_search();
        let hash_a = 3;
        let hash_b = 3 + SIZE as u64;

        cache.get_entry(hash_a, 0).unwrap().add_move_stats(mv(1), 10);
        // same slot, same generation: allocation fails
        assert!(cache.get_entry(hash_b, 0).is_none());

        cache.on_new_search();
        assert!(cache.get_entry(hash_b, 0).is_some());
        assert!(cache.try_get_entry(hash_a).is_none());
    }
}
