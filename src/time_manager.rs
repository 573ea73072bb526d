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
use crate::scores::MAX_SEARCH_DEPTH;
use std::time::{Duration, Instant};

pub const DEFAULT_MOVE_OVERHEAD: Duration = Duration::from_millis(20);

const MOVES_LEFT_MIDPOINT: f64 = 47.0;
const MOVES_LEFT_STEEPNESS: f64 = 2.05;
const IDEAL_TIME_FACTOR: f64 = 0.824;
const ROOT_SINGULARITY_TIME_FACTOR: f64 = 0.2;

const NODES_COUNT_SCALE_MAX: f64 = 1.99;
const NODES_COUNT_SCALE_MIN: f64 = 1.2;
const NODES_COUNT_OFFSET: f64 = 0.53;

const STABILITY_SCALE: f64 = 0.03;
const STABILITY_OFFSET: f64 = 1.1;
const STABILITY_MAX: u32 = 12;

/// Limits driving a single `go`, absolute deadlines included.
#[derive(Clone)]
pub struct SearchLimits {
    pub max_depth: i32,
    pub max_nodes: u64,
    pub start_time: Instant,

    /// Hard deadline, checked inside the search.
    pub max_time: Option<Duration>,
    /// Soft target, consulted between iterations only.
    pub ideal_time_base: Option<Duration>,
    pub ideal_time_current: Option<Duration>,
    /// When to start probing for a singular root move.
    pub root_singularity_time: Option<Duration>,

    pub analysis_mode: bool,

    increment_ratio: f64,
}

impl Default for SearchLimits {
    fn default() -> Self {
        SearchLimits {
            max_depth: MAX_SEARCH_DEPTH as i32,
            max_nodes: u64::MAX,
            start_time: Instant::now(),
            max_time: None,
            ideal_time_base: None,
            ideal_time_current: None,
            root_singularity_time: None,
            analysis_mode: false,
            increment_ratio: 0.0,
        }
    }
}

impl SearchLimits {
    pub fn depth(depth: i32) -> Self {
        SearchLimits { max_depth: depth.min(MAX_SEARCH_DEPTH as i32), ..SearchLimits::default() }
    }

    pub fn nodes(max_nodes: u64) -> Self {
        SearchLimits { max_nodes, ..SearchLimits::default() }
    }

    pub fn move_time(time: Duration) -> Self {
        SearchLimits {
            max_time: Some(time),
            ideal_time_base: Some(time),
            ideal_time_current: Some(time),
            ..SearchLimits::default()
        }
    }

    #[inline]
    pub fn elapsed(&self, now: Instant) -> Duration {
        now.duration_since(self.start_time)
    }

    #[inline]
    pub fn is_max_time_exceeded(&self, now: Instant) -> bool {
        self.max_time.is_some_and(|limit| self.elapsed(now) >= limit)
    }

    #[inline]
    pub fn is_soft_time_exceeded(&self, now: Instant) -> bool {
        self.ideal_time_current.is_some_and(|limit| self.elapsed(now) >= limit)
    }

    #[inline]
    pub fn is_root_singularity_time_reached(&self, now: Instant) -> bool {
        self.root_singularity_time.is_some_and(|limit| self.elapsed(now) >= limit)
    }

    #[inline]
    pub fn has_time_limit(&self) -> bool {
        self.max_time.is_some()
    }
}

pub struct TimeManagerInitData {
    pub remaining_time: Option<Duration>,
    pub increment: Duration,
    pub moves_to_go: Option<u32>,
    pub move_time: Option<Duration>,
    pub move_overhead: Duration,
}

// Move count based estimate of the remaining game length, after
// LeelaChessZero's plies-left head shape.
fn estimate_moves_left(move_number: u32) -> f64 {
    let moves = move_number as f64;
    let midpoint = MOVES_LEFT_MIDPOINT;
    let steepness = MOVES_LEFT_STEEPNESS;
    midpoint * (1.0 + 1.5 * (moves / midpoint).powf(steepness)).powf(1.0 / steepness) - moves
}

/// Computes the ideal and maximum time for this move and the point at
/// which the root singularity check becomes worthwhile.
pub fn init_time_manager(move_number: u32, data: &TimeManagerInitData, limits: &mut SearchLimits) {
    if let Some(remaining) = data.remaining_time {
        let remaining_ms = remaining.as_secs_f64() * 1000.0;
        let increment_ms = data.increment.as_secs_f64() * 1000.0;
        let overhead_ms = data.move_overhead.as_secs_f64() * 1000.0;

        let moves_left = match data.moves_to_go {
            Some(mtg) => (mtg.max(1)) as f64,
            None => estimate_moves_left(move_number),
        };

        let mut ideal_ms = IDEAL_TIME_FACTOR * (remaining_ms / moves_left + increment_ms);
        let mut max_ms = (remaining_ms - overhead_ms) / moves_left.sqrt() + increment_ms;

        let time_margin = (0.5 * remaining_ms - overhead_ms).max(0.00001);
        ideal_ms = ideal_ms.clamp(0.0, time_margin);
        max_ms = max_ms.clamp(0.0, time_margin);

        limits.ideal_time_base = Some(Duration::from_secs_f64(ideal_ms / 1000.0));
        limits.ideal_time_current = limits.ideal_time_base;
        limits.max_time = Some(Duration::from_secs_f64(max_ms / 1000.0));
        limits.root_singularity_time =
            Some(Duration::from_secs_f64(ideal_ms * ROOT_SINGULARITY_TIME_FACTOR / 1000.0));

        limits.increment_ratio = if remaining_ms > 0.0 { (increment_ms / remaining_ms).clamp(0.0, 1.0) } else { 0.0 };
    }

    if let Some(move_time) = data.move_time {
        limits.ideal_time_base = Some(move_time);
        limits.ideal_time_current = Some(move_time);
        limits.max_time = Some(move_time);
        limits.root_singularity_time = None;
    }
}

#[derive(Default)]
pub struct TimeManagerState {
    pub stability_counter: u32,
}

pub struct TimeManagerUpdateData {
    pub depth: i32,
    pub previous_best_move: PackedMove,
    pub current_best_move: PackedMove,
    pub best_move_node_fraction: Option<f64>,
}

/// Re-derives the soft limit after a finished iteration: a stable best
/// move and a search concentrated on it both shrink the ideal time.
pub fn update_time_manager(data: &TimeManagerUpdateData, limits: &mut SearchLimits, state: &mut TimeManagerState) {
    if data.current_best_move == data.previous_best_move && data.previous_best_move.is_valid() {
        state.stability_counter += 1;
    } else {
        state.stability_counter = 0;
    }

    let base = match limits.ideal_time_base {
        Some(base) => base,
        None => return,
    };
    if data.depth < 5 {
        limits.ideal_time_current = Some(base);
        return;
    }

    let mut ideal = base.as_secs_f64();

    let stability_factor = STABILITY_OFFSET - STABILITY_SCALE * state.stability_counter.min(STABILITY_MAX) as f64;
    ideal *= stability_factor;

    if let Some(fraction) = data.best_move_node_fraction {
        // the scale shrinks as the increment covers more of each move
        let t = (limits.increment_ratio / 0.05).clamp(0.0, 1.0);
        let scale = NODES_COUNT_SCALE_MAX - (NODES_COUNT_SCALE_MAX - NODES_COUNT_SCALE_MIN) * t;
        ideal *= (1.0 - fraction) * scale + NODES_COUNT_OFFSET;
    }

    limits.ideal_time_current = Some(Duration::from_secs_f64(ideal.max(0.0)));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timed_limits(remaining_ms: u64, increment_ms: u64) -> SearchLimits {
        let mut limits = SearchLimits::default();
        let data = TimeManagerInitData {
            remaining_time: Some(Duration::from_millis(remaining_ms)),
            increment: Duration::from_millis(increment_ms),
            moves_to_go: None,
            move_time: None,
            move_overhead: DEFAULT_MOVE_OVERHEAD,
        };
        init_time_manager(10, &data, &mut limits);
        limits
    }

    #[test]
    fn moves_left_estimate_decreases_into_the_game() {
        let early = estimate_moves_left(1);
        let mid = estimate_moves_left(40);
        let late = estimate_moves_left(90);
        assert!(early > mid);
        assert!(mid > late);
        assert!(late > 10.0);
    }

    #[test]
    fn ideal_time_stays_below_max_time() {
        let limits = timed_limits(60_000, 1_000);
        let ideal = limits.ideal_time_base.unwrap();
        let max = limits.max_time.unwrap();
        assert!(ideal < max);
        assert!(max <= Duration::from_millis(30_000));

        let singularity = limits.root_singularity_time.unwrap();
        assert!(singularity >= ideal.mul_f64(0.19) && singularity <= ideal.mul_f64(0.21));
    }

    #[test]
    fn never_allocates_more_than_half_the_clock() {
        let limits = timed_limits(100, 0);
        assert!(limits.max_time.unwrap() <= Duration::from_millis(50));
    }

    #[test]
    fn fixed_move_time_overrides_clock() {
        let mut limits = SearchLimits::default();
        let data = TimeManagerInitData {
            remaining_time: Some(Duration::from_millis(60_000)),
            increment: Duration::ZERO,
            moves_to_go: None,
            move_time: Some(Duration::from_millis(500)),
            move_overhead: DEFAULT_MOVE_OVERHEAD,
        };
        init_time_manager(1, &data, &mut limits);
        assert_eq!(limits.max_time, Some(Duration::from_millis(500)));
        assert_eq!(limits.ideal_time_current, Some(Duration::from_millis(500)));
    }

    #[test]
    fn stable_best_move_shrinks_ideal_time() {
        let mut limits = timed_limits(60_000, 0);
        let mut state = TimeManagerState::default();
        let base = limits.ideal_time_base.unwrap();
        let m = PackedMove::new(12, 28, 0);

        for depth in 5..10 {
            let data = TimeManagerUpdateData {
                depth,
                previous_best_move: m,
                current_best_move: m,
                best_move_node_fraction: Some(0.9),
            };
            update_time_manager(&data, &mut limits, &mut state);
        }

        assert_eq!(state.stability_counter, 5);
        assert!(limits.ideal_time_current.unwrap() < base);
    }

    #[test]
    fn best_move_change_resets_stability() {
        let mut limits = timed_limits(60_000, 0);
        let mut state = TimeManagerState { stability_counter: 7 };
        let data = TimeManagerUpdateData {
            depth: 8,
            previous_best_move: PackedMove::new(12, 28, 0),
            current_best_move: PackedMove::new(6, 21, 0),
            best_move_node_fraction: None,
        };
        update_time_manager(&data, &mut limits, &mut state);
        assert_eq!(state.stability_counter, 0);
    }
}
