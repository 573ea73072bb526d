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

use crate::engine::{spawn_engine_thread, GoOptions, Message};
use crate::position::START_POS;
use crate::search::MAX_SEARCH_THREADS;
use crate::transposition_table::MAX_SIZE_MB;
use std::io::BufRead;
use std::sync::mpsc::Sender;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub fn start_uci_loop() {
    let tx = spawn_engine_thread();

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(_) => break,
        };

        if !handle_command(&tx, line.trim()) {
            break;
        }
    }

    let _ = tx.send(Message::Quit);
}

fn handle_command(tx: &Sender<Message>, line: &str) -> bool {
    let mut tokens = line.split_whitespace();
    let command = match tokens.next() {
        Some(command) => command,
        None => return true,
    };
    let rest: Vec<&str> = tokens.collect();

    match command {
        "uci" => print_uci_id(),
        "isready" => send(tx, Message::IsReady),
        "ucinewgame" => send(tx, Message::NewGame),
        "setoption" => {
            if let Some((name, value)) = parse_set_option(&rest) {
                send(tx, Message::SetOption(name, value));
            }
        }
        "position" => {
            if let Some((fen, moves)) = parse_position(&rest) {
                send(tx, Message::SetPosition(fen, moves));
            }
        }
        "go" => send(tx, Message::Go(parse_go(&rest))),
        "stop" => send(tx, Message::Stop),
        "ponderhit" => send(tx, Message::PonderHit),
        "quit" => return false,
        _ => eprintln!("info string unknown command: {}", command),
    }

    true
}

fn send(tx: &Sender<Message>, msg: Message) {
    if tx.send(msg).is_err() {
        eprintln!("info string engine thread is gone");
    }
}

fn print_uci_id() {
    println!("id name Tessera {}", VERSION);
    println!("id author tessera developers");
    println!("option name Hash type spin default 32 min 1 max {}", MAX_SIZE_MB);
    println!("option name Threads type spin default 1 min 1 max {}", MAX_SEARCH_THREADS);
    println!("option name MultiPV type spin default 1 min 1 max 64");
    println!("option name Move Overhead type spin default 20 min 0 max 1000");
    println!("option name Ponder type check default false");
    println!("option name UCI_ShowNotation type combo default coordinate var coordinate var san");
    println!("uciok");
}

fn parse_set_option(tokens: &[&str]) -> Option<(String, String)> {
    let name_pos = tokens.iter().position(|&t| t == "name")?;
    let value_pos = tokens.iter().position(|&t| t == "value").unwrap_or(tokens.len());

    let name = tokens[name_pos + 1..value_pos].join(" ");
    let value = tokens.get(value_pos + 1..).map(|v| v.join(" ")).unwrap_or_default();

    if name.is_empty() {
        None
    } else {
        Some((name, value))
    }
}

fn parse_position(tokens: &[&str]) -> Option<(String, Vec<String>)> {
    let moves_pos = tokens.iter().position(|&t| t == "moves").unwrap_or(tokens.len());

    let fen = match tokens.first() {
        Some(&"startpos") => START_POS.to_string(),
        Some(&"fen") => tokens[1..moves_pos].join(" "),
        _ => return None,
    };

    let moves = tokens.get(moves_pos + 1..).map(|m| m.iter().map(|s| s.to_string()).collect()).unwrap_or_default();

    Some((fen, moves))
}

fn parse_go(tokens: &[&str]) -> GoOptions {
    let mut options = GoOptions::default();

    let mut iter = tokens.iter().peekable();
    while let Some(&token) = iter.next() {
        match token {
            "depth" => options.depth = next_number(&mut iter).map(|d| d as i32),
            "nodes" => options.nodes = next_number(&mut iter),
            "movetime" => options.move_time = next_number(&mut iter),
            "wtime" => options.wtime = next_number(&mut iter),
            "btime" => options.btime = next_number(&mut iter),
            "winc" => options.winc = next_number(&mut iter),
            "binc" => options.binc = next_number(&mut iter),
            "movestogo" => options.moves_to_go = next_number(&mut iter).map(|m| m as u32),
            "infinite" => options.infinite = true,
            "ponder" => options.ponder = true,
            "searchmoves" => {
                while let Some(&&candidate) = iter.peek() {
                    if candidate.chars().next().is_some_and(|c| c.is_ascii_lowercase())
                        && candidate.len() >= 4
                        && candidate.as_bytes()[1].is_ascii_digit()
                    {
                        options.search_moves.push(candidate.to_string());
                        iter.next();
                    } else {
                        break;
                    }
                }
            }
            _ => (),
        }
    }

    options
}

fn next_number<'a, I: Iterator<Item = &'a &'a str>>(iter: &mut std::iter::Peekable<I>) -> Option<u64> {
    iter.next().and_then(|v| v.parse::<u64>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_go_tokens() {
        let options = parse_go(&["wtime", "60000", "btime", "59000", "winc", "1000", "binc", "900", "movestogo", "32"]);
        assert_eq!(options.wtime, Some(60000));
        assert_eq!(options.btime, Some(59000));
        assert_eq!(options.winc, Some(1000));
        assert_eq!(options.binc, Some(900));
        assert_eq!(options.moves_to_go, Some(32));
        assert!(!options.infinite);
    }

    #[test]
    fn parses_go_searchmoves() {
        let options = parse_go(&["depth", "10", "searchmoves", "e2e4", "d2d4"]);
        assert_eq!(options.depth, Some(10));
        assert_eq!(options.search_moves, vec!["e2e4".to_string(), "d2d4".to_string()]);
    }

    #[test]
    fn parses_position_command() {
        let (fen, moves) = parse_position(&["startpos", "moves", "e2e4", "e7e5"]).unwrap();
        assert_eq!(fen, START_POS);
        assert_eq!(moves, vec!["e2e4".to_string(), "e7e5".to_string()]);

        let (fen, moves) =
            parse_position(&["fen", "8/8/4k3/8/8/4K3/8/7R", "w", "-", "-", "0", "1"]).unwrap();
        assert_eq!(fen, "8/8/4k3/8/8/4K3/8/7R w - - 0 1");
        assert!(moves.is_empty());
    }

    #[test]
    fn parses_setoption_with_spaces() {
        let (name, value) = parse_set_option(&["name", "Move", "Overhead", "value", "50"]).unwrap();
        assert_eq!(name, "Move Overhead");
        assert_eq!(value, "50");
    }
}
