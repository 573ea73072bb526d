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

use crate::engine::Message;
use crate::eval::{self, EvalProbingInterface};
use crate::move_orderer::{MoveOrderer, GOOD_CAPTURE_VALUE};
use crate::move_picker::{legal_moves, MovePicker, PickerMode};
use crate::moves::{Move, PackedMove, NO_MOVE, NO_PACKED_MOVE};
use crate::nn::eval::NnContext;
use crate::nn::NeuralNetParams;
use crate::node_cache::NodeCache;
use crate::pieces::P;
use crate::position::{Game, Position};
use crate::scores::{
    is_mate_or_mated_score, mate_in, score_from_tt, score_to_tt, CHECKMATE_SCORE, INF_SCORE, INVALID_SCORE,
    KNOWN_WIN_SCORE, MAX_SEARCH_DEPTH, TB_WIN_SCORE,
};
use crate::tablebase::{TablebaseProber, Wdl};
use crate::time_manager::{update_time_manager, SearchLimits, TimeManagerState, TimeManagerUpdateData};
use crate::transposition_table::{Bounds, TranspositionTable, TtEntry, NUM_TT_MOVES, TERMINAL_DEPTH};
use crate::uci_move::{format_move, MoveNotation};
use chess::Color;
use itertools::Itertools;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

pub const DEFAULT_SEARCH_THREADS: usize = 1;
pub const MAX_SEARCH_THREADS: usize = 256;

pub const DEFAULT_MAX_PV_LINE_LENGTH: usize = 20;
const CURRENT_MOVE_REPORT_DELAY: Duration = Duration::from_secs(10);
const MATE_COUNT_STOP_CONDITION: u32 = 5;

const SINGULARITY_SEARCH_MIN_DEPTH: i32 = 8;
const SINGULARITY_SCORE_THRESHOLD_MIN: i32 = 200;
const SINGULARITY_SCORE_THRESHOLD_MAX: i32 = 400;
const SINGULARITY_SCORE_STEP: i32 = 25;

const WDL_PROBE_DEPTH: i32 = 4;
const WDL_PROBE_MAX_PIECES: u32 = 5;

const NULL_MOVE_START_DEPTH: i32 = 2;
const NULL_MOVE_DEPTH_REDUCTION: i32 = 4;
const NULL_MOVE_RESEARCH_REDUCTION: i32 = 4;

const MAX_DEPTH_REDUCTION: i32 = 8;
const LATE_MOVE_REDUCTION_START_DEPTH: i32 = 3;
const MAX_REDUCED_MOVES: usize = 64;

const ASPIRATION_WINDOW_DEPTH_START: i32 = 6;
const ASPIRATION_WINDOW_MAX_SIZE: i32 = 500;
const ASPIRATION_WINDOW_START: i32 = 40;
const ASPIRATION_WINDOW_END: i32 = 20;
const ASPIRATION_WINDOW_STEP: i32 = 4;

const SINGULAR_EXTENSION_SCORE_MARGIN: i32 = 5;

const BETA_PRUNING_DEPTH: i32 = 7;
const BETA_MARGIN_MULTIPLIER: i32 = 135;
const BETA_MARGIN_BIAS: i32 = 5;

const ALPHA_PRUNING_DEPTH: i32 = 5;
const ALPHA_MARGIN_MULTIPLIER: i32 = 256;
const ALPHA_MARGIN_BIAS: i32 = 2000;

const RAZORING_START_DEPTH: i32 = 3;
const RAZORING_MARGIN_MULTIPLIER: i32 = 128;
const RAZORING_MARGIN_BIAS: i32 = 20;

const MAX_QUIET_MOVES_TRIED: usize = 96;

#[inline]
fn late_move_pruning_threshold(depth: i32) -> u32 {
    (3 + depth + depth * depth / 2) as u32
}

#[inline]
fn history_pruning_threshold(depth: i32) -> i32 {
    -256 * depth - 64 * depth * depth
}

#[derive(Clone, Debug)]
pub struct PvLine {
    pub score: i32,
    pub moves: Vec<PackedMove>,
}

impl Default for PvLine {
    fn default() -> Self {
        PvLine { score: INVALID_SCORE, moves: Vec::new() }
    }
}

pub type SearchResult = Vec<PvLine>;

pub struct SearchParams {
    pub limits: SearchLimits,
    pub num_threads: usize,
    pub num_pv_lines: usize,
    pub excluded_moves: Vec<PackedMove>,
    pub is_ponder: bool,
    pub debug_log: bool,
    pub move_notation: MoveNotation,
    pub use_root_tablebase: bool,
    pub tablebase: Option<Arc<dyn TablebaseProber>>,
    pub eval_probing: Option<Arc<dyn EvalProbingInterface>>,
}

impl Default for SearchParams {
    fn default() -> Self {
        SearchParams {
            limits: SearchLimits::default(),
            num_threads: DEFAULT_SEARCH_THREADS,
            num_pv_lines: 1,
            excluded_moves: Vec::new(),
            is_ponder: false,
            debug_log: false,
            move_notation: MoveNotation::Coordinate,
            use_root_tablebase: true,
            tablebase: None,
            eval_probing: None,
        }
    }
}

#[derive(Default)]
pub struct Stats {
    pub nodes: AtomicU64,
    pub quiescence_nodes: AtomicU64,
    pub sel_depth: AtomicU64,
    pub tb_hits: AtomicU64,
}

impl Stats {
    /// Per-thread counters are flushed in batches to keep the shared
    /// atomics off the hot path.
    fn append(&self, thread_stats: &mut ThreadStats, flush: bool) {
        if thread_stats.nodes >= 64 || flush {
            self.nodes.fetch_add(thread_stats.nodes, Ordering::Relaxed);
            self.quiescence_nodes.fetch_add(thread_stats.quiescence_nodes, Ordering::Relaxed);
            self.sel_depth.fetch_max(thread_stats.sel_depth, Ordering::Relaxed);
            self.tb_hits.fetch_add(thread_stats.tb_hits, Ordering::Relaxed);
            *thread_stats = ThreadStats::default();
        }
    }
}

#[derive(Default, Copy, Clone)]
struct ThreadStats {
    nodes: u64,
    quiescence_nodes: u64,
    sel_depth: u64,
    tb_hits: u64,
}

#[derive(Copy, Clone)]
struct NodeScratch {
    position: Position,
    previous_move: Move,
    in_check: bool,
    is_null_move: bool,
    static_eval: i32,
    pv: [PackedMove; MAX_SEARCH_DEPTH],
    pv_len: usize,
}

impl Default for NodeScratch {
    fn default() -> Self {
        NodeScratch {
            position: Position::start_pos(),
            previous_move: NO_MOVE,
            in_check: false,
            is_null_move: false,
            static_eval: INVALID_SCORE,
            pv: [NO_PACKED_MOVE; MAX_SEARCH_DEPTH],
            pv_len: 0,
        }
    }
}

struct ThreadData {
    orderer: MoveOrderer,
    contexts: Vec<NnContext>,
    stack: Vec<NodeScratch>,
    key_history: Vec<u64>,
    game_key_len: usize,
    stats: ThreadStats,
    total_nodes: u64,
    prev_pv_lines: Vec<PvLine>,
    root_depth: i32,
    node_cache: NodeCache,
    is_main: bool,
    rng: StdRng,
}

impl ThreadData {
    fn new(thread_id: usize) -> Self {
        ThreadData {
            orderer: MoveOrderer::default(),
            contexts: vec![NnContext::default(); MAX_SEARCH_DEPTH + 4],
            stack: vec![NodeScratch::default(); MAX_SEARCH_DEPTH + 4],
            key_history: Vec::new(),
            game_key_len: 0,
            stats: ThreadStats::default(),
            total_nodes: 0,
            prev_pv_lines: Vec::new(),
            root_depth: 0,
            node_cache: NodeCache::default(),
            is_main: thread_id == 0,
            rng: StdRng::seed_from_u64(0x9E37_79B9 ^ thread_id as u64),
        }
    }
}

#[derive(Copy, Clone)]
struct NodeParams {
    height: usize,
    depth: i32,
    alpha: i32,
    beta: i32,
    pv_index: usize,
    is_cut_node: bool,
    is_singular_search: bool,
    is_pv_from_prev_iteration: bool,
}

/// The search orchestrator: owns the shared transposition table, the
/// per-thread state and the stop flag, and fans a `go` out to the workers.
pub struct Search {
    tt: Arc<TranspositionTable>,
    stop: Arc<AtomicBool>,
    stats: Stats,
    reductions: Box<[[u8; MAX_REDUCED_MOVES]; MAX_SEARCH_DEPTH + 1]>,
    threads: Vec<ThreadData>,
}

fn build_reduction_table() -> Box<[[u8; MAX_REDUCED_MOVES]; MAX_SEARCH_DEPTH + 1]> {
    let mut table = Box::new([[0u8; MAX_REDUCED_MOVES]; MAX_SEARCH_DEPTH + 1]);
    for (depth, row) in table.iter_mut().enumerate() {
        for (move_index, entry) in row.iter_mut().enumerate() {
            let reduction = -1.25 + 0.8 * ((depth + 1) as f32).ln() * ((move_index + 1) as f32).ln();
            *entry = (reduction as i32).clamp(0, u8::MAX as i32) as u8;
        }
    }
    table
}

impl Search {
    pub fn new(tt_size_mb: usize) -> Self {
        Search {
            tt: Arc::new(TranspositionTable::new(tt_size_mb)),
            stop: Arc::new(AtomicBool::new(false)),
            stats: Stats::default(),
            reductions: build_reduction_table(),
            threads: vec![ThreadData::new(0)],
        }
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// Shared handle for asserting a stop from another thread.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    /// Resets per-game search state (move ordering, node statistics).
    pub fn clear(&mut self) {
        for td in self.threads.iter_mut() {
            td.orderer.clear();
            td.node_cache.reset();
            td.stats = ThreadStats::default();
        }
        self.stats = Stats::default();
    }

    pub fn clear_tt(&self) {
        self.tt.clear();
    }

    pub fn resize_tt(&mut self, size_mb: usize) {
        Arc::get_mut(&mut self.tt).expect("transposition table still referenced").resize_to_mb(size_mb);
    }

    pub fn tt_hash_full(&self) -> usize {
        self.tt.hash_full()
    }

    pub fn node_count(&self) -> u64 {
        self.stats.nodes.load(Ordering::Relaxed)
    }

    fn ensure_threads(&mut self, count: usize) {
        let count = count.clamp(1, MAX_SEARCH_THREADS);
        while self.threads.len() < count {
            self.threads.push(ThreadData::new(self.threads.len()));
        }
        self.threads.truncate(count);
    }

    /// Runs a full search and returns one PV line per requested multi-PV
    /// slot, best first. Never returns partial-iteration results.
    pub fn do_search(&mut self, game: &Game, params: &SearchParams, rx: Option<&Receiver<Message>>) -> SearchResult {
        let root = *game.position();
        let nn = crate::nn::params();

        self.stop.store(false, Ordering::Release);
        self.stats = Stats::default();

        let root_moves = legal_moves(&root);
        let num_legal = root_moves.len();
        let num_pv_lines = params.num_pv_lines.max(1).min(num_legal.max(1));

        if num_legal == 0 {
            let score = if root.is_in_check() { -CHECKMATE_SCORE } else { 0 };
            if params.debug_log {
                if score == 0 {
                    println!("info depth 0 score cp 0");
                } else {
                    println!("info depth 0 score mate 0");
                }
            }
            return vec![PvLine { score, moves: Vec::new() }];
        }

        if !params.limits.analysis_mode {
            // single legal reply: no point burning clock on it
            if params.limits.has_time_limit() && num_legal == 1 {
                return vec![PvLine { score: 0, moves: vec![PackedMove::from(root_moves[0])] }];
            }

            if params.use_root_tablebase && num_pv_lines == 1 {
                if let Some(prober) = &params.tablebase {
                    if root.num_pieces() <= prober.max_pieces() {
                        if let Some((tb_move, wdl)) = prober.probe_root(&root) {
                            self.stats.tb_hits.fetch_add(1, Ordering::Relaxed);
                            return vec![PvLine { score: wdl.signum() * TB_WIN_SCORE, moves: vec![tb_move] }];
                        }
                    }
                }
            }
        }

        self.ensure_threads(params.num_threads);

        let tt = &*self.tt;
        let stats = &self.stats;
        let stop = &*self.stop;
        let reductions = &*self.reductions;
        let (main_threads, helper_threads) = self.threads.split_at_mut(1);

        thread::scope(|scope| {
            for td in helper_threads.iter_mut() {
                let nn = nn.clone();
                scope.spawn(move || {
                    let mut worker = Worker {
                        td,
                        tt,
                        stats,
                        stop,
                        reductions,
                        params,
                        game,
                        nn,
                        limits: params.limits.clone(),
                        tm_state: TimeManagerState::default(),
                        pondering: params.is_ponder,
                        num_pv_lines,
                        rx: None,
                    };
                    worker.run();
                });
            }

            let mut worker = Worker {
                td: &mut main_threads[0],
                tt,
                stats,
                stop,
                reductions,
                params,
                game,
                nn,
                limits: params.limits.clone(),
                tm_state: TimeManagerState::default(),
                pondering: params.is_ponder,
                num_pv_lines,
                rx,
            };
            let result = worker.run();

            // the main thread is done; reel the helpers in
            stop.store(true, Ordering::Release);
            result
        })
    }
}

struct Worker<'a> {
    td: &'a mut ThreadData,
    tt: &'a TranspositionTable,
    stats: &'a Stats,
    stop: &'a AtomicBool,
    reductions: &'a [[u8; MAX_REDUCED_MOVES]; MAX_SEARCH_DEPTH + 1],
    params: &'a SearchParams,
    game: &'a Game,
    nn: Arc<NeuralNetParams>,
    limits: SearchLimits,
    tm_state: TimeManagerState,
    pondering: bool,
    num_pv_lines: usize,
    rx: Option<&'a Receiver<Message>>,
}

impl<'a> Worker<'a> {
    fn run(&mut self) -> SearchResult {
        let root = *self.game.position();

        self.td.stats = ThreadStats::default();
        self.td.total_nodes = 0;
        self.td.orderer.new_search();
        self.td.node_cache.on_new_search();
        self.td.prev_pv_lines = vec![PvLine::default(); self.num_pv_lines];

        self.td.stack[0] = NodeScratch {
            position: root,
            previous_move: NO_MOVE,
            in_check: root.is_in_check(),
            is_null_move: false,
            static_eval: INVALID_SCORE,
            pv: [NO_PACKED_MOVE; MAX_SEARCH_DEPTH],
            pv_len: 0,
        };
        self.td.contexts[0].set_root(*root.board(), &self.nn);

        self.td.key_history = self.game.keys().to_vec();
        self.td.game_key_len = self.td.key_history.len().saturating_sub(1);
        self.td.key_history.resize(self.td.game_key_len + MAX_SEARCH_DEPTH + 4, 0);

        let mut result = vec![PvLine::default(); self.num_pv_lines];
        let mut mate_counter = 0u32;

        for depth in 1..=self.limits.max_depth.min(MAX_SEARCH_DEPTH as i32) {
            let mut temp_result = vec![PvLine::default(); self.num_pv_lines];
            let mut pv_moves_so_far = self.params.excluded_moves.clone();
            self.td.root_depth = depth;

            let mut finish_at_this_depth = false;

            for pv_index in 0..self.num_pv_lines {
                let mut prev_score = self.td.prev_pv_lines[pv_index].score;
                if depth <= 1 && pv_index == 0 && prev_score == INVALID_SCORE {
                    if let Some(entry) = self.tt.read(root.hash()) {
                        let tt_score = score_from_tt(entry.score, 0, root.halfmove_clock());
                        if tt_score != INVALID_SCORE {
                            prev_score = tt_score;
                        }
                    }
                }

                let pv_line = self.aspiration_window_search(depth, pv_index, prev_score, &pv_moves_so_far);

                if depth > 1 && self.check_stop_condition(true) {
                    finish_at_this_depth = true;
                    break;
                }

                if pv_line.moves.is_empty() {
                    break;
                }

                if self.td.is_main {
                    result[pv_index] = pv_line.clone();
                }

                if pv_index == 0 {
                    if is_mate_or_mated_score(pv_line.score) {
                        mate_counter += 1;
                    } else {
                        mate_counter = 0;
                    }
                }

                pv_moves_so_far.push(pv_line.moves[0]);
                temp_result[pv_index] = pv_line;
            }

            if finish_at_this_depth {
                if self.td.is_main {
                    self.stop.store(true, Ordering::Release);
                }
                break;
            }

            let primary_score = temp_result[0].score;
            let primary_move = temp_result[0].moves.first().copied().unwrap_or(NO_PACKED_MOVE);
            let previous_best = self.td.prev_pv_lines[0].moves.first().copied().unwrap_or(NO_PACKED_MOVE);

            if self.td.is_main && !self.pondering && !self.limits.analysis_mode {
                let fraction = self
                    .td
                    .node_cache
                    .try_get_entry(root.hash())
                    .and_then(|entry| entry.best_move_node_fraction());
                let data = TimeManagerUpdateData {
                    depth,
                    previous_best_move: previous_best,
                    current_best_move: primary_move,
                    best_move_node_fraction: fraction,
                };
                update_time_manager(&data, &mut self.limits, &mut self.tm_state);
            }

            self.td.prev_pv_lines = temp_result;

            if self.td.is_main && !self.pondering && self.limits.is_soft_time_exceeded(Instant::now()) {
                self.stop.store(true, Ordering::Release);
                break;
            }

            // a mate reported over several iterations in a row will not change
            if self.td.is_main
                && !self.pondering
                && !self.limits.analysis_mode
                && mate_counter >= MATE_COUNT_STOP_CONDITION
                && self.limits.max_depth >= MAX_SEARCH_DEPTH as i32
            {
                self.stop.store(true, Ordering::Release);
                break;
            }

            if self.should_check_root_singularity(depth, primary_score, primary_move) {
                let threshold = SINGULARITY_SCORE_THRESHOLD_MIN
                    .max(SINGULARITY_SCORE_THRESHOLD_MAX - SINGULARITY_SCORE_STEP * (depth - SINGULARITY_SEARCH_MIN_DEPTH));
                let singular_beta = primary_score - threshold;
                let filter = [primary_move];

                let node = NodeParams {
                    height: 0,
                    depth: depth / 2,
                    alpha: singular_beta - 1,
                    beta: singular_beta,
                    pv_index: 0,
                    is_cut_node: false,
                    is_singular_search: true,
                    is_pv_from_prev_iteration: false,
                };
                let score = self.negamax(node, &filter);

                if score < singular_beta || self.check_stop_condition(true) {
                    self.stop.store(true, Ordering::Release);
                    break;
                }
            }
        }

        self.stats.append(&mut self.td.stats, true);

        // keep serving the GUI until it releases an infinite or ponder search
        if self.td.is_main && self.rx.is_some() {
            while !self.stop.load(Ordering::Acquire)
                && (self.pondering || (self.limits.analysis_mode && !self.limits.has_time_limit()))
            {
                self.poll_messages(true);
            }
        }

        result
    }

    fn should_check_root_singularity(&self, depth: i32, primary_score: i32, primary_move: PackedMove) -> bool {
        self.td.is_main
            && !self.pondering
            && !self.limits.analysis_mode
            && self.num_pv_lines == 1
            && depth >= SINGULARITY_SEARCH_MIN_DEPTH
            && primary_score != INVALID_SCORE
            && primary_score.abs() < 1000
            && primary_move.is_valid()
            && self.limits.is_root_singularity_time_reached(Instant::now())
    }

    fn aspiration_window_search(
        &mut self, depth: i32, pv_index: usize, prev_score: i32, move_filter: &[PackedMove],
    ) -> PvLine {
        let mut alpha = -INF_SCORE;
        let mut beta = INF_SCORE;
        let mut current_depth = depth;

        // narrower windows at higher depth, re-centered on the previous score
        let mut window =
            ASPIRATION_WINDOW_END.max(ASPIRATION_WINDOW_START - (depth - ASPIRATION_WINDOW_DEPTH_START) * ASPIRATION_WINDOW_STEP);

        if prev_score != INVALID_SCORE {
            window += prev_score.abs() / 10;
        }

        if depth >= ASPIRATION_WINDOW_DEPTH_START
            && prev_score != INVALID_SCORE
            && !is_mate_or_mated_score(prev_score)
            && !self.check_stop_condition(true)
        {
            alpha = (prev_score - window).max(-INF_SCORE);
            beta = (prev_score + window).min(INF_SCORE);
        }

        let max_pv_len = if self.limits.analysis_mode {
            MAX_SEARCH_DEPTH
        } else {
            (depth as usize).min(DEFAULT_MAX_PV_LINE_LENGTH)
        };

        let mut final_pv = PvLine::default();

        loop {
            let node = NodeParams {
                height: 0,
                depth: current_depth,
                alpha,
                beta,
                pv_index,
                is_cut_node: false,
                is_singular_search: false,
                is_pv_from_prev_iteration: true,
            };
            let score = self.negamax(node, move_filter);
            let mut pv_line = PvLine { score, moves: self.collect_pv_line(max_pv_len) };

            self.stats.append(&mut self.td.stats, true);

            window = 2 * window + 5;
            if window > ASPIRATION_WINDOW_MAX_SIZE {
                window = CHECKMATE_SCORE;
            }

            let mut bounds = Bounds::Exact;
            if score <= alpha {
                pv_line.score = alpha;
                beta = (alpha + beta + 1) / 2;
                alpha = (pv_line.score - window).max(-CHECKMATE_SCORE);
                bounds = Bounds::Upper;
            } else if score >= beta {
                pv_line.score = beta;
                beta = (beta + window).min(CHECKMATE_SCORE);
                bounds = Bounds::Lower;

                // a fail-high is usually confirmed quickly, no need for full depth
                if current_depth > ASPIRATION_WINDOW_DEPTH_START && current_depth + 3 > depth {
                    current_depth -= 1;
                }
            }

            let stop_search = depth > 1 && self.check_stop_condition(true);

            if self.td.is_main && self.params.debug_log && !pv_line.moves.is_empty() {
                self.report_pv(depth, pv_index, &pv_line, bounds);
            }

            // a stopped iteration may carry a result from an incomplete search
            if !stop_search {
                final_pv = pv_line;
            }

            if bounds == Bounds::Exact || stop_search {
                break;
            }
        }

        final_pv
    }

    fn collect_pv_line(&mut self, max_len: usize) -> Vec<PackedMove> {
        let root = &self.td.stack[0];
        let mut moves: Vec<PackedMove> = root.pv[..root.pv_len.min(max_len)].to_vec();

        // extend the line from the transposition table
        let mut pos = root.position;
        let mut seen = Vec::with_capacity(max_len);
        seen.push(pos.hash());
        for &pm in moves.iter() {
            match pos.decorate_move(pm) {
                Some(m) if pos.is_move_legal(pm) => {
                    pos = pos.make_move(m);
                    seen.push(pos.hash());
                }
                _ => return moves,
            }
        }

        while moves.len() < max_len {
            let entry = match self.tt.read(pos.hash()) {
                Some(entry) => entry,
                None => break,
            };
            let pm = entry.best_move();
            if !pos.is_move_legal(pm) {
                break;
            }
            let m = match pos.decorate_move(pm) {
                Some(m) => m,
                None => break,
            };
            pos = pos.make_move(m);
            if seen.contains(&pos.hash()) {
                break;
            }
            seen.push(pos.hash());
            moves.push(pm);
        }

        moves
    }

    fn poll_messages(&mut self, blocking: bool) {
        let rx = match self.rx {
            Some(rx) => rx,
            None => return,
        };

        loop {
            let msg = if blocking {
                match rx.recv_timeout(Duration::from_millis(20)) {
                    Ok(msg) => msg,
                    Err(_) => return,
                }
            } else {
                match rx.try_recv() {
                    Ok(msg) => msg,
                    Err(_) => return,
                }
            };

            match msg {
                Message::Stop => {
                    self.pondering = false;
                    self.stop.store(true, Ordering::Release);
                }
                Message::PonderHit => {
                    self.pondering = false;
                }
                Message::IsReady => println!("readyok"),
                _ => (),
            }

            if blocking {
                return;
            }
        }
    }

    fn check_stop_condition(&mut self, is_root: bool) -> bool {
        if self.stop.load(Ordering::Relaxed) {
            return true;
        }

        if is_root || self.td.total_nodes % 256 == 0 {
            if self.td.is_main {
                self.poll_messages(false);
            }

            if !self.pondering {
                if self.limits.max_nodes < u64::MAX
                    && self.stats.nodes.load(Ordering::Relaxed) + self.td.stats.nodes > self.limits.max_nodes
                {
                    self.stop.store(true, Ordering::Release);
                    return true;
                }

                if self.limits.is_max_time_exceeded(Instant::now()) {
                    self.stop.store(true, Ordering::Release);
                    return true;
                }
            }

            if self.stop.load(Ordering::Relaxed) {
                return true;
            }
        }

        false
    }

    #[inline]
    fn evaluate_node(&mut self, height: usize) -> i32 {
        let position = self.td.stack[height].position;
        let white_eval = eval::evaluate(&position, &mut self.td.contexts, height, &self.nn);

        if let Some(probe) = &self.params.eval_probing {
            probe.report_position(&position, white_eval);
        }

        if position.side_to_move() == Color::White {
            white_eval
        } else {
            -white_eval
        }
    }

    fn is_repetition(&self, height: usize) -> bool {
        let current = self.td.game_key_len + height;
        let hash = self.td.key_history[current];
        let limit = self.td.stack[height].position.halfmove_clock() as usize;

        let mut before_root = 0;
        let mut steps = 2;
        while steps <= limit && steps <= current {
            let idx = current - steps;
            if self.td.key_history[idx] == hash {
                if idx >= self.td.game_key_len {
                    // repeating a position of the current search line
                    return true;
                }
                before_root += 1;
                if before_root >= 2 {
                    return true;
                }
            }
            steps += 2;
        }

        false
    }

    fn eval_improvement(&self, height: usize, static_eval: i32) -> i32 {
        if height >= 2 && self.td.stack[height - 2].static_eval != INVALID_SCORE {
            return static_eval - self.td.stack[height - 2].static_eval;
        }
        if height >= 4 && self.td.stack[height - 4].static_eval != INVALID_SCORE {
            return static_eval - self.td.stack[height - 4].static_eval;
        }
        0
    }

    fn update_pv(&mut self, height: usize, pm: PackedMove) {
        let (head, tail) = self.td.stack.split_at_mut(height + 1);
        let node = &mut head[height];
        let child = &tail[0];

        node.pv[0] = pm;
        let len = child.pv_len.min(MAX_SEARCH_DEPTH - 1);
        node.pv[1..1 + len].copy_from_slice(&child.pv[..len]);
        node.pv_len = len + 1;
    }

    fn pv_move_for(&self, node: &NodeParams) -> PackedMove {
        if !node.is_pv_from_prev_iteration || node.is_singular_search {
            return NO_PACKED_MOVE;
        }
        self.td
            .prev_pv_lines
            .get(node.pv_index)
            .and_then(|line| line.moves.get(node.height))
            .copied()
            .unwrap_or(NO_PACKED_MOVE)
    }

    fn relative_rank(stm: Color, sq: u8) -> u8 {
        let rank = sq >> 3;
        if stm == Color::White {
            rank
        } else {
            7 - rank
        }
    }

    fn probe_wdl_tables(&mut self, node: &NodeParams, position: &Position) -> Option<Wdl> {
        let prober = self.params.tablebase.as_ref()?;
        let previous_quiet = self.td.stack[node.height].previous_move.is_quiet();
        if node.depth < WDL_PROBE_DEPTH && previous_quiet {
            return None;
        }
        if position.num_pieces() > prober.max_pieces().min(WDL_PROBE_MAX_PIECES) {
            return None;
        }
        let wdl = prober.probe_wdl(position)?;
        self.td.stats.tb_hits += 1;
        Some(wdl)
    }

    fn negamax(&mut self, node: NodeParams, move_filter: &[PackedMove]) -> i32 {
        debug_assert!(node.alpha < node.beta);

        let height = node.height;
        let is_root = height == 0;
        let is_pv = node.beta - node.alpha != 1;
        let has_move_filter = !move_filter.is_empty();

        self.td.stack[height].pv_len = 0;

        self.td.stats.nodes += 1;
        self.td.total_nodes += 1;
        self.td.stats.sel_depth = self.td.stats.sel_depth.max(height as u64 + 1);
        self.stats.append(&mut self.td.stats, false);

        let mut depth = node.depth;
        let mut alpha = node.alpha;
        let mut beta = node.beta;

        if depth <= 0 {
            return self.quiescence(node);
        }

        let position = self.td.stack[height].position;
        let in_check = self.td.stack[height].in_check;
        debug_assert!(in_check == position.is_in_check());

        let hash = position.hash();
        self.td.key_history[self.td.game_key_len + height] = hash;

        if !is_root
            && (position.halfmove_clock() >= 100 || position.is_insufficient_material() || self.is_repetition(height))
        {
            return 0;
        }

        // mate distance pruning
        if !is_root {
            alpha = alpha.max(-CHECKMATE_SCORE + height as i32);
            beta = beta.min(CHECKMATE_SCORE - height as i32 - 1);
            if alpha >= beta {
                return alpha;
            }
        }

        if height >= MAX_SEARCH_DEPTH - 1 {
            return if in_check { 0 } else { self.evaluate_node(height) };
        }

        let original_alpha = node.alpha;
        let mut best_value = -INF_SCORE;
        let mut static_eval = INVALID_SCORE;
        let mut tb_hit = false;

        // transposition table lookup
        let mut tt_entry: Option<TtEntry> = None;
        let mut tt_score = INVALID_SCORE;
        let mut tt_moves = [NO_PACKED_MOVE; NUM_TT_MOVES];
        if let Some(entry) = self.tt.read(hash) {
            static_eval = entry.static_eval;
            tt_moves = entry.moves;
            tt_score = score_from_tt(entry.score, height, position.halfmove_clock());

            // no cutoffs in PV nodes, the table carries no path information
            if tt_score != INVALID_SCORE
                && entry.depth >= depth
                && !is_pv
                && !has_move_filter
                && position.halfmove_clock() < 90
            {
                match entry.bounds {
                    Bounds::Exact => return tt_score,
                    Bounds::Upper if tt_score <= alpha => return alpha,
                    Bounds::Lower if tt_score >= beta => return beta,
                    _ => (),
                }
            }

            tt_entry = Some(entry);
        }

        // win-draw-loss probe; only draws give an exact score
        if !is_root {
            if let Some(wdl) = self.probe_wdl_tables(&node, &position) {
                tb_hit = true;
                let tb_value = match wdl {
                    Wdl::Win => TB_WIN_SCORE - height as i32,
                    Wdl::Loss => -(TB_WIN_SCORE - height as i32),
                    Wdl::Draw => 0,
                };
                let bounds = match wdl {
                    Wdl::Win => Bounds::Lower,
                    Wdl::Loss => Bounds::Upper,
                    Wdl::Draw => Bounds::Exact,
                };

                if bounds == Bounds::Exact
                    || (bounds == Bounds::Lower && tb_value >= beta)
                    || (bounds == Bounds::Upper && tb_value <= alpha)
                {
                    if tt_entry.is_none() {
                        self.tt.write(hash, score_to_tt(tb_value, height), static_eval, depth, bounds, &[]);
                    }
                    return tb_value;
                }
            }
        }

        // static evaluation, sharpened with the table score when its bound
        // points the right way
        if !in_check {
            if static_eval == INVALID_SCORE {
                static_eval = self.evaluate_node(height);
            }
            if let Some(entry) = &tt_entry {
                if tt_score != INVALID_SCORE && tt_score.abs() < KNOWN_WIN_SCORE {
                    let sharper = match entry.bounds {
                        Bounds::Lower => tt_score > static_eval,
                        Bounds::Upper => tt_score < static_eval,
                        Bounds::Exact => true,
                        Bounds::Invalid => false,
                    };
                    if sharper {
                        static_eval = tt_score;
                    }
                }
            }
        }
        self.td.stack[height].static_eval = if in_check { INVALID_SCORE } else { static_eval };

        let improving = !in_check && self.eval_improvement(height, static_eval) >= -5;

        if !is_pv && !has_move_filter && !in_check {
            // reverse futility: the static eval is so far above beta that a
            // shallow search will not bring it back down
            if depth <= BETA_PRUNING_DEPTH
                && static_eval <= KNOWN_WIN_SCORE
                && static_eval >= beta + BETA_MARGIN_BIAS + BETA_MARGIN_MULTIPLIER * (depth - improving as i32)
            {
                return static_eval;
            }

            // alpha pruning
            if depth <= ALPHA_PRUNING_DEPTH
                && alpha < KNOWN_WIN_SCORE
                && static_eval > -KNOWN_WIN_SCORE
                && static_eval + ALPHA_MARGIN_BIAS + ALPHA_MARGIN_MULTIPLIER * depth <= alpha
            {
                return static_eval;
            }

            // razoring
            if depth <= RAZORING_START_DEPTH
                && beta < KNOWN_WIN_SCORE
                && static_eval + RAZORING_MARGIN_BIAS + RAZORING_MARGIN_MULTIPLIER * depth < beta
            {
                let q_score = self.quiescence(node);
                if q_score < beta {
                    return q_score;
                }
            }

            // null move reductions
            let tt_allows_null = match &tt_entry {
                None => true,
                Some(entry) => entry.bounds != Bounds::Upper || tt_score == INVALID_SCORE || tt_score >= beta,
            };
            let parent_was_null = self.td.stack[height].is_null_move
                || (height >= 1 && self.td.stack[height - 1].is_null_move);

            if static_eval >= beta
                && depth >= NULL_MOVE_START_DEPTH
                && tt_allows_null
                && !parent_was_null
                && position.has_non_pawn_material(position.side_to_move())
            {
                let reduction = NULL_MOVE_DEPTH_REDUCTION + depth / 4 + ((static_eval - beta) / 256).min(3);
                let child = height + 1;

                if let Some(null_pos) = position.do_null_move(&mut self.td.contexts[child]) {
                    self.td.stack[child].position = null_pos;
                    self.td.stack[child].previous_move = NO_MOVE;
                    self.td.stack[child].in_check = false;
                    self.td.stack[child].is_null_move = true;
                    self.td.stack[child].static_eval = INVALID_SCORE;

                    let null_node = NodeParams {
                        height: child,
                        depth: depth - reduction,
                        alpha: -beta,
                        beta: -beta + 1,
                        pv_index: node.pv_index,
                        is_cut_node: !node.is_cut_node,
                        is_singular_search: node.is_singular_search,
                        is_pv_from_prev_iteration: false,
                    };
                    let mut null_score = -self.negamax(null_node, &[]);

                    if null_score >= beta {
                        if null_score >= TB_WIN_SCORE {
                            null_score = beta;
                        }

                        if beta.abs() < KNOWN_WIN_SCORE && depth < 10 {
                            return null_score;
                        }

                        depth -= NULL_MOVE_RESEARCH_REDUCTION;
                        if depth <= 0 {
                            return self.quiescence(NodeParams { depth, ..node });
                        }
                    }
                }
            }
        }

        // internal iterative reduction on transposition table miss
        if depth >= 4 && tt_entry.is_none() {
            depth -= 1 + depth / 4;
        }

        let mut global_reduction = 0;
        if !is_pv {
            global_reduction += 1;
        }
        if !improving {
            global_reduction += 1;
        }
        if tb_hit {
            global_reduction += 1;
        }
        if self.td.stack[height].previous_move.is_capture()
            && static_eval != INVALID_SCORE
            && static_eval >= KNOWN_WIN_SCORE
        {
            global_reduction += 1;
        }

        let mut extension = 0;
        if in_check && depth >= 4 {
            extension += 1;
        }

        let pv_move = self.pv_move_for(&node);
        let stm = position.side_to_move();

        let mut picker =
            MovePicker::new(position, PickerMode::MainSearch, pv_move, tt_moves, height, self.td.stack[height].previous_move, move_filter);

        if is_root && !self.td.is_main {
            picker.shuffle(&mut self.td.rng);
        }

        let mut best_moves = [NO_PACKED_MOVE; NUM_TT_MOVES];
        let mut num_best_moves = 0;
        let mut move_index = 0u32;
        let mut quiet_move_index = 0u32;
        let mut quiets_tried = [NO_MOVE; MAX_QUIET_MOVES_TRIED];
        let mut num_quiets_tried = 0usize;
        let mut singular_score_diff = 0;
        let mut search_aborted = false;

        while let Some((m, move_score)) = picker.next(&self.td.orderer) {
            let child = height + 1;
            let nodes_before_move = self.td.total_nodes;

            let child_pos = position.do_move(m, &mut self.td.contexts[child]);
            self.tt.prefetch(child_pos.hash());

            move_index += 1;
            if m.is_quiet() {
                quiet_move_index += 1;
            }

            if !in_check && !is_root && best_value > -KNOWN_WIN_SCORE {
                // late move pruning: quiet moves far down the list are
                // almost never best
                if m.is_quiet()
                    && depth < 9
                    && quiet_move_index >= late_move_pruning_threshold(depth) + improving as u32 + is_pv as u32
                {
                    continue;
                }

                // history pruning
                if m.is_quiet() && quiet_move_index > 1 && depth < 9 && move_score < history_pruning_threshold(depth) {
                    continue;
                }

                // futility on quiets
                if m.is_quiet()
                    && quiet_move_index > 1
                    && depth > 1
                    && depth < 9
                    && static_eval != INVALID_SCORE
                    && static_eval.abs() <= KNOWN_WIN_SCORE
                    && static_eval + 32 * depth * depth < alpha
                {
                    continue;
                }

                // exchange-based pruning
                if m.is_capture() {
                    if depth <= 4
                        && move_score < GOOD_CAPTURE_VALUE
                        && !position.static_exchange_evaluation(m, -120 * depth)
                    {
                        continue;
                    }
                } else if depth <= 8 && !position.static_exchange_evaluation(m, -64 * depth) {
                    continue;
                }
            }

            let gives_check = child_pos.is_in_check();

            if is_root && self.td.is_main && self.params.debug_log && node.pv_index == 0 {
                let elapsed = self.limits.elapsed(Instant::now());
                if elapsed > CURRENT_MOVE_REPORT_DELAY {
                    println!(
                        "info depth {} currmove {} currmovenumber {}",
                        depth,
                        format_move(&position, m.packed(), self.params.move_notation),
                        move_index as usize + node.pv_index
                    );
                }
            }

            let mut move_extension = extension;
            if m.is_queen_promotion() {
                move_extension += 1;
            }
            if m.piece() == P && Self::relative_rank(stm, m.to_sq()) == 6 {
                move_extension += 1;
            }

            // singular extension check for the table move
            if !is_root
                && !has_move_filter
                && m.eq_packed(tt_moves[0])
                && depth >= SINGULARITY_SEARCH_MIN_DEPTH
                && tt_score != INVALID_SCORE
                && tt_score.abs() < KNOWN_WIN_SCORE
                && tt_entry.as_ref().is_some_and(|e| e.bounds.includes_lower() && e.depth >= depth - 2)
            {
                let singular_beta =
                    (-CHECKMATE_SCORE).max(tt_score - SINGULAR_EXTENSION_SCORE_MARGIN - 2 * depth);

                // the singular search reuses this node's stack slot
                let saved_pv = self.td.stack[height].pv;
                let saved_pv_len = self.td.stack[height].pv_len;

                let singular_filter = [m.packed()];
                let singular_node = NodeParams {
                    height,
                    depth: depth / 2,
                    alpha: singular_beta - 1,
                    beta: singular_beta,
                    pv_index: node.pv_index,
                    is_cut_node: node.is_cut_node,
                    is_singular_search: true,
                    is_pv_from_prev_iteration: false,
                };
                let singular_score = self.negamax(singular_node, &singular_filter);

                self.td.stack[height].pv = saved_pv;
                self.td.stack[height].pv_len = saved_pv_len;

                if singular_score < singular_beta {
                    singular_score_diff = singular_beta - singular_score;
                    if height < 2 * self.td.root_depth as usize {
                        move_extension += 1;
                    }
                } else if singular_score >= beta {
                    // multi-cut: even the second-best move would fail high
                    return singular_score;
                } else if tt_score >= beta {
                    move_extension = 0;
                }

                // the singular search overwrote the child evaluator context,
                // re-prime it by replaying the move
                let _ = position.do_move(m, &mut self.td.contexts[child]);
            }

            if height < 2 * self.td.root_depth as usize {
                move_extension = move_extension.clamp(0, 2);
            } else {
                move_extension = 0;
            }

            self.td.stack[child].position = child_pos;
            self.td.stack[child].previous_move = m;
            self.td.stack[child].in_check = gives_check;
            self.td.stack[child].is_null_move = false;
            self.td.stack[child].static_eval = INVALID_SCORE;

            // late move reductions
            let mut depth_reduction = 0;
            if depth >= LATE_MOVE_REDUCTION_START_DEPTH
                && !in_check
                && move_index > 1
                && move_score < GOOD_CAPTURE_VALUE
                && !m.is_queen_promotion()
            {
                depth_reduction = global_reduction;
                depth_reduction +=
                    self.reductions[depth.min(MAX_SEARCH_DEPTH as i32) as usize][(move_index as usize).min(MAX_REDUCED_MOVES - 1)] as i32;

                let is_tt_move = m.eq_packed(tt_moves[0]);
                if !is_tt_move && singular_score_diff > 100 {
                    depth_reduction += 1;
                }
                if !is_tt_move && singular_score_diff > 400 {
                    depth_reduction += 1;
                }

                if move_score < -8000 {
                    depth_reduction += 1;
                }
                if move_score > 0 {
                    depth_reduction -= 1;
                }
                if move_score > 8000 {
                    depth_reduction -= 1;
                }

                if gives_check {
                    depth_reduction -= 1;
                }
                if node.is_cut_node {
                    depth_reduction += 1;
                }
            }
            depth_reduction = depth_reduction.min(MAX_DEPTH_REDUCTION).clamp(0, depth + move_extension - 1);

            let child_is_pv_from_prev = node.is_pv_from_prev_iteration && m.eq_packed(pv_move);
            let mut score = INVALID_SCORE;
            let mut do_full_depth_search = !(is_pv && move_index == 1);

            // null-window search at reduced depth
            if depth_reduction > 0 {
                let child_node = NodeParams {
                    height: child,
                    depth: depth + move_extension - 1 - depth_reduction,
                    alpha: -alpha - 1,
                    beta: -alpha,
                    pv_index: node.pv_index,
                    is_cut_node: true,
                    is_singular_search: false,
                    is_pv_from_prev_iteration: child_is_pv_from_prev,
                };
                score = -self.negamax(child_node, &[]);
                do_full_depth_search = score > alpha;
            }

            // null-window search at full depth
            if do_full_depth_search {
                let child_node = NodeParams {
                    height: child,
                    depth: depth + move_extension - 1,
                    alpha: -alpha - 1,
                    beta: -alpha,
                    pv_index: node.pv_index,
                    is_cut_node: !node.is_cut_node,
                    is_singular_search: false,
                    is_pv_from_prev_iteration: child_is_pv_from_prev,
                };
                score = -self.negamax(child_node, &[]);
            }

            // full-window re-search for PV nodes
            if is_pv && (move_index == 1 || (score > alpha && score < beta)) {
                let child_node = NodeParams {
                    height: child,
                    depth: depth + move_extension - 1,
                    alpha: -beta,
                    beta: -alpha,
                    pv_index: node.pv_index,
                    is_cut_node: false,
                    is_singular_search: false,
                    is_pv_from_prev_iteration: child_is_pv_from_prev,
                };
                score = -self.negamax(child_node, &[]);
            }

            debug_assert!(score.abs() <= CHECKMATE_SCORE || self.stop.load(Ordering::Relaxed));

            if is_root && self.td.is_main {
                let subtree_nodes = self.td.total_nodes - nodes_before_move;
                if let Some(entry) = self.td.node_cache.get_entry(hash, 0) {
                    entry.add_move_stats(m.packed(), subtree_nodes);
                }
            }

            if m.is_quiet() && num_quiets_tried < MAX_QUIET_MOVES_TRIED {
                quiets_tried[num_quiets_tried] = m;
                num_quiets_tried += 1;
            }

            if score > best_value {
                for j in (1..NUM_TT_MOVES).rev() {
                    best_moves[j] = best_moves[j - 1];
                }
                best_moves[0] = m.packed();
                num_best_moves = (num_best_moves + 1).min(NUM_TT_MOVES);
                best_value = score;

                if is_pv {
                    self.update_pv(height, m.packed());
                }
            }

            if score >= beta {
                break;
            }
            if score > alpha {
                alpha = score;
            }

            if !is_root && self.check_stop_condition(false) {
                search_aborted = true;
                break;
            }
        }

        // fail-high on a quiet move feeds the ordering heuristics
        if best_value >= beta && best_moves[0].is_valid() {
            if let Some(best) = position.decorate_move(best_moves[0]) {
                if best.is_quiet() {
                    self.td.orderer.update_quiet_history(stm, &quiets_tried[..num_quiets_tried], best, depth);
                    self.td.orderer.update_killer_move(height, best_moves[0]);
                    self.td.orderer.update_counter_move(stm, self.td.stack[height].previous_move, best_moves[0]);
                }
            }
        }

        if !search_aborted && move_index == 0 {
            if picker.filtered_some_move() {
                // every legal move was excluded by the filter
                return -INF_SCORE;
            }

            best_value = if in_check { -CHECKMATE_SCORE + height as i32 } else { 0 };

            // terminal entries overwrite whatever quiescence stored here
            self.tt.write(hash, score_to_tt(best_value, height), best_value, TERMINAL_DEPTH, Bounds::Exact, &[]);
            return best_value;
        }

        // no publishing of filtered or aborted results
        if !picker.filtered_some_move() && !self.check_stop_condition(false) {
            let bounds = if best_value >= beta {
                Bounds::Lower
            } else if best_value > original_alpha {
                Bounds::Exact
            } else {
                Bounds::Upper
            };

            if is_root && self.td.is_main && best_moves[0].is_valid() {
                if let Some(entry) = self.td.node_cache.get_entry(hash, 0) {
                    entry.set_best_move(best_moves[0]);
                }
            }

            self.tt.write(
                hash,
                score_to_tt(best_value, height),
                self.td.stack[height].static_eval,
                depth,
                bounds,
                &best_moves[..num_best_moves],
            );
        }

        best_value
    }

    fn quiescence(&mut self, node: NodeParams) -> i32 {
        debug_assert!(node.alpha < node.beta);

        let height = node.height;
        let is_pv = node.beta - node.alpha != 1;

        self.td.stack[height].pv_len = 0;

        self.td.stats.nodes += 1;
        self.td.stats.quiescence_nodes += 1;
        self.td.total_nodes += 1;
        self.td.stats.sel_depth = self.td.stats.sel_depth.max(height as u64 + 1);
        self.stats.append(&mut self.td.stats, false);

        let position = self.td.stack[height].position;
        let in_check = self.td.stack[height].in_check;

        if position.is_insufficient_material() {
            return 0;
        }

        if height >= MAX_SEARCH_DEPTH - 1 {
            return if in_check { 0 } else { self.evaluate_node(height) };
        }

        let mut alpha = node.alpha;
        let beta = node.beta;
        let mut best_value = -CHECKMATE_SCORE + height as i32;
        let mut static_eval = INVALID_SCORE;
        let mut futility_base = -INF_SCORE;

        let hash = position.hash();
        let mut tt_entry: Option<TtEntry> = None;
        let mut tt_score = INVALID_SCORE;
        let mut tt_moves = [NO_PACKED_MOVE; NUM_TT_MOVES];
        if let Some(entry) = self.tt.read(hash) {
            static_eval = entry.static_eval;
            tt_moves = entry.moves;
            tt_score = score_from_tt(entry.score, height, position.halfmove_clock());

            if tt_score != INVALID_SCORE {
                match entry.bounds {
                    Bounds::Exact => return tt_score,
                    Bounds::Upper if tt_score <= alpha => return alpha,
                    Bounds::Lower if tt_score >= beta => return beta,
                    _ => (),
                }
            }

            tt_entry = Some(entry);
        }

        // stand pat, unless in check
        if !in_check {
            if static_eval == INVALID_SCORE {
                static_eval = self.evaluate_node(height);
            }

            best_value = static_eval;

            if let Some(entry) = &tt_entry {
                if tt_score != INVALID_SCORE && tt_score.abs() < KNOWN_WIN_SCORE {
                    let sharper = match entry.bounds {
                        Bounds::Lower => tt_score > static_eval,
                        Bounds::Upper => tt_score < static_eval,
                        Bounds::Exact => true,
                        Bounds::Invalid => false,
                    };
                    if sharper {
                        best_value = tt_score;
                    }
                }
            }

            if best_value >= beta {
                if tt_entry.is_none() {
                    self.tt.write(hash, score_to_tt(best_value, height), static_eval, 0, Bounds::Lower, &[]);
                }
                return best_value;
            }

            if best_value > alpha {
                alpha = best_value;
            }

            futility_base = best_value + 150;
        }

        let old_alpha = alpha;

        let mut picker = MovePicker::new(
            position,
            PickerMode::Quiescence,
            NO_PACKED_MOVE,
            tt_moves,
            height,
            self.td.stack[height].previous_move,
            &[],
        );

        let mut best_moves = [NO_PACKED_MOVE; NUM_TT_MOVES];
        let mut num_best_moves = 0;
        let mut move_index = 0u32;
        let mut num_quiet_check_evasions = 0u32;
        let mut search_aborted = false;

        while let Some((m, move_score)) = picker.next(&self.td.orderer) {
            if !in_check {
                if m.is_underpromotion() {
                    continue;
                }

                // losing captures cannot restore a failing stand pat
                if m.is_capture() && move_score < GOOD_CAPTURE_VALUE {
                    continue;
                }

                // futility: the capture must win material to matter
                if m.is_capture()
                    && futility_base > -KNOWN_WIN_SCORE
                    && futility_base <= alpha
                    && !position.static_exchange_evaluation(m, 1)
                {
                    best_value = best_value.max(futility_base);
                    continue;
                }
            }

            // after a best move is known, at most one more quiet evasion
            if in_check && m.is_quiet() {
                if num_best_moves > 0 && num_quiet_check_evasions > 1 {
                    continue;
                }
                num_quiet_check_evasions += 1;
            }

            let child = height + 1;
            let child_pos = position.do_move(m, &mut self.td.contexts[child]);
            self.tt.prefetch(child_pos.hash());

            move_index += 1;

            // move count pruning deep into the quiescence tail
            if num_best_moves > 0 {
                if node.depth < -4 && move_index > 1 {
                    break;
                } else if node.depth < -2 && move_index > 2 {
                    break;
                } else if node.depth < 0 && move_index > 3 {
                    break;
                }
            }

            self.td.stack[child].position = child_pos;
            self.td.stack[child].previous_move = m;
            self.td.stack[child].in_check = child_pos.is_in_check();
            self.td.stack[child].is_null_move = false;
            self.td.stack[child].static_eval = INVALID_SCORE;

            let child_node = NodeParams {
                height: child,
                depth: node.depth - 1,
                alpha: -beta,
                beta: -alpha,
                pv_index: node.pv_index,
                is_cut_node: node.is_cut_node,
                is_singular_search: node.is_singular_search,
                is_pv_from_prev_iteration: false,
            };
            let score = -self.quiescence(child_node);

            if score > best_value {
                for j in (1..NUM_TT_MOVES).rev() {
                    best_moves[j] = best_moves[j - 1];
                }
                best_moves[0] = m.packed();
                num_best_moves = (num_best_moves + 1).min(NUM_TT_MOVES);
                best_value = score;

                if is_pv {
                    self.update_pv(height, m.packed());
                }

                if score >= beta {
                    break;
                }
                if score > alpha {
                    alpha = score;
                }
            }

            if self.check_stop_condition(false) {
                search_aborted = true;
                break;
            }
        }

        if !search_aborted && in_check && move_index == 0 {
            return -CHECKMATE_SCORE + height as i32;
        }

        if !search_aborted {
            // a deeper entry that this fail-low cannot improve stays
            if best_value <= old_alpha && tt_entry.as_ref().is_some_and(|e| e.depth > 0) {
                return best_value;
            }

            let bounds = if best_value >= beta {
                Bounds::Lower
            } else if best_value > old_alpha {
                Bounds::Exact
            } else {
                Bounds::Upper
            };
            self.tt.write(
                hash,
                score_to_tt(best_value, height),
                static_eval,
                0,
                bounds,
                &best_moves[..num_best_moves],
            );
        }

        best_value
    }

    fn report_pv(&mut self, depth: i32, pv_index: usize, pv_line: &PvLine, bounds: Bounds) {
        let now = Instant::now();
        let elapsed = self.limits.elapsed(now);
        let nodes = self.stats.nodes.load(Ordering::Relaxed);
        let sel_depth = self.stats.sel_depth.load(Ordering::Relaxed);
        let tb_hits = self.stats.tb_hits.load(Ordering::Relaxed);

        let mut line = format!("info depth {} seldepth {}", depth, sel_depth);

        if self.params.num_pv_lines > 1 {
            line += &format!(" multipv {}", pv_index + 1);
        }

        match mate_in(pv_line.score) {
            Some(moves) => line += &format!(" score mate {}", moves),
            None => line += &format!(" score cp {}", pv_line.score),
        }

        match bounds {
            Bounds::Lower => line += " lowerbound",
            Bounds::Upper => line += " upperbound",
            _ => (),
        }

        line += &format!(" nodes {}", nodes);

        let elapsed_ms = elapsed.as_millis() as u64;
        if elapsed_ms > 10 && nodes > 100 {
            line += &format!(" nps {}", nodes * 1000 / elapsed_ms);
        }
        if tb_hits > 0 {
            line += &format!(" tbhits {}", tb_hits);
        }
        line += &format!(" hashfull {}", self.tt.hash_full());
        line += &format!(" time {}", elapsed_ms);

        let mut pos = *self.game.position();
        let rendered = pv_line
            .moves
            .iter()
            .map(|&pm| {
                let text = format_move(&pos, pm, self.params.move_notation);
                if let Some(m) = pos.decorate_move(pm) {
                    pos = pos.make_move(m);
                }
                text
            })
            .join(" ");
        line += &format!(" pv {}", rendered);

        println!("{}", line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::START_POS;

    fn search_fen(fen: &str, depth: i32) -> SearchResult {
        let game = Game::new(Position::from_fen(fen).unwrap());
        let mut search = Search::new(4);
        let params = SearchParams { limits: SearchLimits::depth(depth), ..SearchParams::default() };
        search.do_search(&game, &params, None)
    }

    #[test]
    fn finds_mate_in_one() {
        let result = search_fen("6k1/5ppp/8/8/8/8/5PPP/R5K1 w - - 0 1", 3);
        assert_eq!(result[0].score, CHECKMATE_SCORE - 1);
        assert_eq!(result[0].moves[0], PackedMove::new(0, 56, 0)); // a1a8
    }

    #[test]
    fn stalemate_returns_draw_score_and_empty_pv() {
        let result = search_fen("7k/5Q2/6K1/8/8/8/8/8 b - - 0 1", 4);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].score, 0);
        assert!(result[0].moves.is_empty());
    }

    #[test]
    fn checkmate_at_root_returns_mated_score() {
        // white is already checkmated
        let result = search_fen("6k1/8/8/8/8/8/5PPP/r5K1 w - - 0 1", 3);
        assert_eq!(result[0].score, -CHECKMATE_SCORE);
        assert!(result[0].moves.is_empty());
    }

    #[test]
    fn depth_one_returns_a_legal_move() {
        let result = search_fen(START_POS, 1);
        assert_eq!(result.len(), 1);
        assert!(!result[0].moves.is_empty());
        let pos = Position::from_fen(START_POS).unwrap();
        assert!(pos.is_move_legal(result[0].moves[0]));
    }

    #[test]
    fn single_reply_is_returned_without_search() {
        // the checked king has exactly one legal move
        let game = Game::new(Position::from_fen("7k/8/8/8/8/4p3/5q2/6K1 w - - 0 1").unwrap());
        assert_eq!(legal_moves(game.position()).len(), 1);

        let mut search = Search::new(4);
        let mut limits = SearchLimits::move_time(Duration::from_millis(10));
        limits.max_depth = MAX_SEARCH_DEPTH as i32;
        let params = SearchParams { limits, ..SearchParams::default() };

        let result = search.do_search(&game, &params, None);
        assert_eq!(result[0].score, 0);
        assert_eq!(result[0].moves.len(), 1);
        assert_eq!(search.node_count(), 0);
    }

    #[test]
    fn multi_pv_lines_are_distinct_and_ordered() {
        let game = Game::new(Position::from_fen(START_POS).unwrap());
        let mut search = Search::new(4);
        let params =
            SearchParams { limits: SearchLimits::depth(4), num_pv_lines: 3, ..SearchParams::default() };

        let result = search.do_search(&game, &params, None);
        assert_eq!(result.len(), 3);

        let first_moves: Vec<PackedMove> = result.iter().map(|line| line.moves[0]).collect();
        assert_ne!(first_moves[0], first_moves[1]);
        assert_ne!(first_moves[0], first_moves[2]);
        assert_ne!(first_moves[1], first_moves[2]);

        assert!(result[0].score >= result[1].score);
        assert!(result[1].score >= result[2].score);

        let pos = Position::from_fen(START_POS).unwrap();
        for line in &result {
            assert!(pos.is_move_legal(line.moves[0]));
        }
    }

    #[test]
    fn excluded_moves_are_not_searched() {
        let game = Game::new(Position::from_fen(START_POS).unwrap());
        let mut search = Search::new(4);
        let excluded = PackedMove::new(12, 28, 0); // e2e4
        let params = SearchParams {
            limits: SearchLimits::depth(3),
            excluded_moves: vec![excluded],
            ..SearchParams::default()
        };

        let result = search.do_search(&game, &params, None);
        assert_ne!(result[0].moves[0], excluded);
    }

    #[test]
    fn stop_flag_interrupts_deep_search() {
        let game = Game::new(Position::from_fen(START_POS).unwrap());
        let mut search = Search::new(16);
        let handle = search.stop_handle();

        let stopper = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(150));
            handle.store(true, Ordering::Release);
        });

        let params = SearchParams { limits: SearchLimits::depth(MAX_SEARCH_DEPTH as i32), ..SearchParams::default() };
        let started = Instant::now();
        let result = search.do_search(&game, &params, None);
        stopper.join().unwrap();

        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(!result[0].moves.is_empty());
    }

    #[test]
    fn node_limit_is_respected() {
        let game = Game::new(Position::from_fen(START_POS).unwrap());
        let mut search = Search::new(4);
        let params = SearchParams { limits: SearchLimits::nodes(20_000), ..SearchParams::default() };

        let result = search.do_search(&game, &params, None);
        assert!(!result[0].moves.is_empty());
        // batching makes the limit approximate, not unbounded
        assert!(search.node_count() < 120_000);
    }

    #[test]
    fn threaded_search_finds_the_same_mate() {
        let game = Game::new(Position::from_fen("6k1/5ppp/8/8/8/8/5PPP/R5K1 w - - 0 1").unwrap());
        let mut search = Search::new(8);
        let params =
            SearchParams { limits: SearchLimits::depth(5), num_threads: 3, ..SearchParams::default() };

        let result = search.do_search(&game, &params, None);
        assert_eq!(result[0].score, CHECKMATE_SCORE - 1);
        assert_eq!(result[0].moves[0], PackedMove::new(0, 56, 0));
    }

    #[test]
    fn hundred_ply_rule_saves_the_losing_side() {
        // white is a rook down, but the only move reaches the 100-ply mark
        let game = Game::new(Position::from_fen("k7/1r6/8/8/8/8/8/K7 w - - 99 50").unwrap());
        assert_eq!(legal_moves(game.position()).len(), 1);

        let mut search = Search::new(4);
        let params = SearchParams { limits: SearchLimits::depth(5), ..SearchParams::default() };
        let result = search.do_search(&game, &params, None);
        assert_eq!(result[0].score, 0);
    }

    #[test]
    fn finds_forced_mate_in_two() {
        // rook ladder: 1.Rb7 K~ 2.Ra8#
        let result = search_fen("4k3/8/R7/1R6/8/8/8/4K3 w - - 0 1", 6);
        let score = result[0].score;
        assert_eq!(score, CHECKMATE_SCORE - 3);
        assert!(result[0].moves.len() >= 3);
    }
}
