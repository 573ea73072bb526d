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
use crate::moves::PackedMove;
use crate::nn;
use crate::position::{Game, Position};
use crate::search::{Search, SearchParams, DEFAULT_SEARCH_THREADS, MAX_SEARCH_THREADS};
use crate::time_manager::{
    init_time_manager, SearchLimits, TimeManagerInitData, DEFAULT_MOVE_OVERHEAD,
};
use crate::transposition_table::{DEFAULT_SIZE_MB, MAX_SIZE_MB};
use crate::uci_move::{format_move, parse_uci_move, MoveNotation};
use chess::Color;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Default, Clone)]
pub struct GoOptions {
    pub depth: Option<i32>,
    pub nodes: Option<u64>,
    pub move_time: Option<u64>,
    pub wtime: Option<u64>,
    pub btime: Option<u64>,
    pub winc: Option<u64>,
    pub binc: Option<u64>,
    pub moves_to_go: Option<u32>,
    pub infinite: bool,
    pub ponder: bool,
    pub search_moves: Vec<String>,
}

pub enum Message {
    NewGame,
    SetPosition(String, Vec<String>),
    Go(GoOptions),
    SetOption(String, String),
    IsReady,
    Stop,
    PonderHit,
    Quit,
}

pub fn spawn_engine_thread() -> Sender<Message> {
    let (tx, rx) = mpsc::channel::<Message>();

    thread::spawn(move || {
        let mut engine = Engine::new(rx);
        engine.start_loop();
    });

    tx
}

pub struct Engine {
    rx: Receiver<Message>,
    game: Game,
    search: Search,

    threads: usize,
    multi_pv: usize,
    move_overhead: Duration,
    move_notation: MoveNotation,
}

impl Engine {
    pub fn new(rx: Receiver<Message>) -> Self {
        Engine {
            rx,
            game: Game::from_start_pos(),
            search: Search::new(DEFAULT_SIZE_MB),
            threads: DEFAULT_SEARCH_THREADS,
            multi_pv: 1,
            move_overhead: DEFAULT_MOVE_OVERHEAD,
            move_notation: MoveNotation::Coordinate,
        }
    }

    pub fn start_loop(&mut self) {
        loop {
            match self.rx.recv() {
                Ok(msg) => {
                    if !self.handle_message(msg) {
                        return;
                    }
                }
                Err(err) => {
                    eprintln!("info string engine channel closed: {}", err);
                    return;
                }
            }
        }
    }

    fn handle_message(&mut self, msg: Message) -> bool {
        match msg {
            Message::NewGame => {
                self.search.clear();
                self.search.clear_tt();
            }

            Message::SetPosition(fen, moves) => self.set_position(&fen, &moves),

            Message::Go(options) => self.go(options),

            Message::SetOption(name, value) => self.set_option(&name, &value),

            Message::IsReady => {
                // postponed one-time initialization, so startup stays instant
                nn::init_params();
                println!("readyok");
            }

            // stop/ponderhit outside an active search carry no work
            Message::Stop | Message::PonderHit => (),

            Message::Quit => return false,
        }

        true
    }

    fn set_position(&mut self, fen: &str, moves: &[String]) {
        let position = match Position::from_fen(fen) {
            Some(position) => position,
            None => {
                eprintln!("info string invalid fen: {}", fen);
                return;
            }
        };

        let mut game = Game::new(position);
        for text in moves {
            match parse_uci_move(game.position(), text) {
                Some(m) => game.make_move(m),
                None => {
                    eprintln!("info string illegal move in position command: {}", text);
                    return;
                }
            }
        }

        self.game = game;
    }

    fn set_option(&mut self, name: &str, value: &str) {
        match name.to_ascii_lowercase().as_str() {
            "hash" => {
                if let Ok(size) = value.parse::<usize>() {
                    self.search.resize_tt(size.clamp(1, MAX_SIZE_MB));
                }
            }
            "threads" => {
                if let Ok(count) = value.parse::<usize>() {
                    self.threads = count.clamp(1, MAX_SEARCH_THREADS);
                }
            }
            "multipv" => {
                if let Ok(count) = value.parse::<usize>() {
                    self.multi_pv = count.clamp(1, 64);
                }
            }
            "move overhead" => {
                if let Ok(ms) = value.parse::<u64>() {
                    self.move_overhead = Duration::from_millis(ms.min(1000));
                }
            }
            "uci_shownotation" => {
                self.move_notation =
                    if value.eq_ignore_ascii_case("san") { MoveNotation::San } else { MoveNotation::Coordinate };
            }
            "ponder" => (),
            _ => eprintln!("info string unknown option: {}", name),
        }
    }

    fn build_limits(&self, options: &GoOptions) -> SearchLimits {
        let mut limits = SearchLimits::default();
        limits.start_time = Instant::now();
        limits.analysis_mode = options.infinite;

        if let Some(depth) = options.depth {
            limits.max_depth = depth.max(1).min(limits.max_depth);
        }
        if let Some(nodes) = options.nodes {
            limits.max_nodes = nodes;
        }

        let (time, increment) = match self.game.position().side_to_move() {
            Color::White => (options.wtime, options.winc.unwrap_or(0)),
            Color::Black => (options.btime, options.binc.unwrap_or(0)),
        };

        let data = TimeManagerInitData {
            remaining_time: time.map(Duration::from_millis),
            increment: Duration::from_millis(increment),
            moves_to_go: options.moves_to_go,
            move_time: options.move_time.map(Duration::from_millis),
            move_overhead: self.move_overhead,
        };
        init_time_manager(self.game.position().fullmove_count() as u32, &data, &mut limits);

        limits
    }

    fn excluded_moves(&self, search_moves: &[String]) -> Vec<PackedMove> {
        if search_moves.is_empty() {
            return Vec::new();
        }

        let allowed: Vec<PackedMove> = search_moves
            .iter()
            .filter_map(|text| parse_uci_move(self.game.position(), text))
            .map(|m| m.packed())
            .collect();

        legal_moves(self.game.position())
            .into_iter()
            .map(PackedMove::from)
            .filter(|pm| !allowed.contains(pm))
            .collect()
    }

    fn go(&mut self, options: GoOptions) {
        nn::init_params();

        let params = SearchParams {
            limits: self.build_limits(&options),
            num_threads: self.threads,
            num_pv_lines: self.multi_pv,
            excluded_moves: self.excluded_moves(&options.search_moves),
            is_ponder: options.ponder,
            debug_log: true,
            move_notation: self.move_notation,
            use_root_tablebase: true,
            tablebase: None,
            eval_probing: None,
        };

        let result = self.search.do_search(&self.game, &params, Some(&self.rx));

        let best_line = result.first();
        let best_move = best_line.and_then(|line| line.moves.first()).copied();

        match best_move {
            None => println!("bestmove 0000"),
            Some(best) => {
                let ponder = best_line.and_then(|line| line.moves.get(1)).copied();
                match ponder {
                    Some(ponder_move) => {
                        let after_best = self
                            .game
                            .position()
                            .decorate_move(best)
                            .map(|m| self.game.position().make_move(m));
                        let ponder_text = match after_best {
                            Some(pos) => format_move(&pos, ponder_move, MoveNotation::Coordinate),
                            None => ponder_move.to_string(),
                        };
                        println!(
                            "bestmove {} ponder {}",
                            format_move(self.game.position(), best, MoveNotation::Coordinate),
                            ponder_text
                        );
                    }
                    None => {
                        println!("bestmove {}", format_move(self.game.position(), best, MoveNotation::Coordinate))
                    }
                }
            }
        }
    }
}
