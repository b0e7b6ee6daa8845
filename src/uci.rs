use crate::eval::{Evaluator, HandcraftedEvaluator};
use crate::game::Game;
use crate::nnue::{NnueEvaluator, PackedNetwork};
use crate::ordering::MoveOrderer;
use crate::parameters::SearchParameters;
use crate::search::{self, Limits, SearchOptions};
use crate::state::{format_move_uci, GameState, Move, START_FEN};
use crate::time::{TimeControl, TimeManager};
use crate::tt::TranspositionTable;
use std::io::{self, BufRead};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

struct EngineOptions {
    threads: usize,
    multi_pv: usize,
    move_overhead: u128,
}

impl Default for EngineOptions {
    fn default() -> Self {
        EngineOptions {
            threads: 1,
            multi_pv: 1,
            move_overhead: 10,
        }
    }
}

pub fn uci_loop() {
    crate::init_tables();

    let stdin = io::stdin();
    let mut buffer = String::new();

    let mut tt = match TranspositionTable::new(64) {
        Ok(tt) => Arc::new(tt),
        Err(e) => {
            println!("info string {}", e);
            return;
        }
    };
    let orderer = Arc::new(MoveOrderer::new());
    let params = Arc::new(SearchParameters::default());
    let mut evaluator: Arc<dyn Evaluator> = Arc::new(HandcraftedEvaluator);

    let mut state = match GameState::from_fen(START_FEN) {
        Ok(s) => s,
        Err(e) => {
            println!("info string {}", e);
            return;
        }
    };
    let mut game = Game::new();
    game.record_position(&state);

    let mut options = EngineOptions::default();
    let stop_signal = Arc::new(AtomicBool::new(false));
    let mut search_thread: Option<thread::JoinHandle<()>> = None;

    loop {
        buffer.clear();
        match stdin.lock().read_line(&mut buffer) {
            Ok(0) => break,
            Ok(_) => {}
            Err(_) => break,
        }

        let cmd = buffer.trim();
        if cmd.is_empty() {
            continue;
        }
        let parts: Vec<&str> = cmd.split_whitespace().collect();

        match parts[0] {
            "uci" => {
                println!("id name Ember {}", env!("CARGO_PKG_VERSION"));
                println!("id author bastiball");
                println!("option name Hash type spin default 64 min 1 max 65536");
                println!("option name Threads type spin default 1 min 1 max 256");
                println!("option name MultiPV type spin default 1 min 1 max 64");
                println!("option name MoveOverhead type spin default 10 min 0 max 5000");
                println!("option name SyzygyPath type string default <empty>");
                println!("option name EvalFile type string default <empty>");
                println!("uciok");
            }
            "isready" => println!("readyok"),
            "ucinewgame" => {
                stop_and_join(&stop_signal, &mut search_thread);
                tt.clear();
                orderer.clear();
                game.clear();
                if let Ok(s) = GameState::from_fen(START_FEN) {
                    state = s;
                }
                game.record_position(&state);
            }
            "position" => {
                stop_and_join(&stop_signal, &mut search_thread);
                if let Err(e) = handle_position(&mut state, &mut game, &parts) {
                    println!("info string {}", e);
                }
            }
            "go" => {
                stop_and_join(&stop_signal, &mut search_thread);
                stop_signal.store(false, Ordering::Relaxed);

                let (limits, search_options) =
                    parse_go(&state, &parts, options.move_overhead, options.multi_pv);

                let root = state;
                let game_copy = game.clone();
                let tt_ref = tt.clone();
                let orderer_ref = orderer.clone();
                let params_ref = params.clone();
                let evaluator_ref = evaluator.clone();
                let stop = stop_signal.clone();
                let threads = options.threads;

                let builder = thread::Builder::new()
                    .name("search".into())
                    .stack_size(32 * 1024 * 1024);
                match builder.spawn(move || {
                    let result = search::run_search(
                        &root,
                        &game_copy,
                        limits,
                        &search_options,
                        &tt_ref,
                        &orderer_ref,
                        &params_ref,
                        evaluator_ref.as_ref(),
                        stop,
                        threads,
                    );
                    match result.best_move {
                        Some(best) => {
                            if let Some(ponder) = result.ponder_move {
                                println!(
                                    "bestmove {} ponder {}",
                                    format_move_uci(best),
                                    format_move_uci(ponder)
                                );
                            } else {
                                println!("bestmove {}", format_move_uci(best));
                            }
                        }
                        None => println!("bestmove (none)"),
                    }
                }) {
                    Ok(handle) => search_thread = Some(handle),
                    Err(e) => println!("info string failed to start search: {}", e),
                }
            }
            "stop" => {
                stop_and_join(&stop_signal, &mut search_thread);
            }
            "setoption" => {
                stop_and_join(&stop_signal, &mut search_thread);
                handle_setoption(&parts, &mut tt, &orderer, &mut evaluator, &mut options);
            }
            "quit" => {
                stop_and_join(&stop_signal, &mut search_thread);
                break;
            }
            _ => {}
        }
    }
}

fn stop_and_join(stop_signal: &Arc<AtomicBool>, search_thread: &mut Option<thread::JoinHandle<()>>) {
    stop_signal.store(true, Ordering::Relaxed);
    if let Some(handle) = search_thread.take() {
        let _ = handle.join();
    }
}

fn handle_setoption(
    parts: &[&str],
    tt: &mut Arc<TranspositionTable>,
    orderer: &Arc<MoveOrderer>,
    evaluator: &mut Arc<dyn Evaluator>,
    options: &mut EngineOptions,
) {
    // setoption name <X> value <Y...>
    let name_idx = parts.iter().position(|&t| t == "name").map(|i| i + 1);
    let value_idx = parts.iter().position(|&t| t == "value").map(|i| i + 1);
    let (name_idx, value_idx) = match (name_idx, value_idx) {
        (Some(n), Some(v)) if n < parts.len() && v <= parts.len() => (n, v),
        _ => return,
    };
    let name = parts[name_idx].to_lowercase();
    let value = parts[value_idx..].join(" ");

    match name.as_str() {
        "hash" => {
            if let Ok(mb) = value.parse::<usize>() {
                match TranspositionTable::new(mb) {
                    Ok(new_tt) => *tt = Arc::new(new_tt),
                    Err(e) => println!("info string {}", e),
                }
            }
        }
        "threads" => {
            if let Ok(n) = value.parse::<usize>() {
                options.threads = n.clamp(1, 256);
            }
        }
        "multipv" => {
            if let Ok(n) = value.parse::<usize>() {
                options.multi_pv = n.clamp(1, 64);
            }
        }
        "moveoverhead" => {
            if let Ok(ms) = value.parse::<u128>() {
                options.move_overhead = ms;
            }
        }
        "syzygypath" => {
            if value != "<empty>" {
                crate::syzygy::init_tablebase(&value);
            }
        }
        "evalfile" => {
            if value == "<empty>" {
                *evaluator = Arc::new(HandcraftedEvaluator);
                return;
            }
            match PackedNetwork::load(&value) {
                Ok(net) => {
                    *evaluator = Arc::new(NnueEvaluator::new(Arc::new(net)));
                    orderer.clear();
                    println!("info string network loaded from {}", value);
                    log::info!("network loaded from {}", value);
                }
                Err(e) => {
                    // stay on the handcrafted evaluator rather than search
                    // with a half-loaded network
                    println!("info string network load failed: {}", e);
                    log::warn!("network load failed: {}", e);
                }
            }
        }
        _ => {}
    }
}

fn handle_position(state: &mut GameState, game: &mut Game, parts: &[&str]) -> Result<(), String> {
    if parts.len() < 2 {
        return Err("position: missing arguments".to_string());
    }

    let mut move_index = None;
    let mut new_state;

    if parts[1] == "startpos" {
        new_state = GameState::from_fen(START_FEN)?;
        if parts.len() > 2 && parts[2] == "moves" {
            move_index = Some(3);
        }
    } else if parts[1] == "fen" {
        let mut fen = String::new();
        let mut i = 2;
        while i < parts.len() && parts[i] != "moves" {
            fen.push_str(parts[i]);
            fen.push(' ');
            i += 1;
        }
        new_state = GameState::from_fen(fen.trim())?;
        if i < parts.len() && parts[i] == "moves" {
            move_index = Some(i + 1);
        }
    } else {
        return Err(format!("position: unknown token '{}'", parts[1]));
    }

    game.clear();
    game.record_position(&new_state);

    if let Some(start) = move_index {
        for token in &parts[start..] {
            let mv = parse_move(&new_state, token)
                .ok_or_else(|| format!("illegal move '{}'", token))?;
            new_state = new_state.make_move(mv);
            game.record_move(mv);
            game.record_position(&new_state);
        }
    }

    *state = new_state;
    Ok(())
}

pub fn parse_move(state: &GameState, token: &str) -> Option<Move> {
    search::legal_moves(state)
        .into_iter()
        .find(|&mv| format_move_uci(mv) == token)
}

fn parse_go(
    state: &GameState,
    parts: &[&str],
    move_overhead: u128,
    multi_pv: usize,
) -> (Limits, SearchOptions) {
    let mut depth: Option<i32> = None;
    let mut movetime: Option<u128> = None;
    let mut nodes: Option<u64> = None;
    let mut wtime: Option<u128> = None;
    let mut btime: Option<u128> = None;
    let mut winc: Option<u128> = None;
    let mut binc: Option<u128> = None;
    let mut movestogo: Option<u32> = None;
    let mut infinite = false;
    let mut ponder = false;
    let mut search_moves = Vec::new();

    let mut i = 1;
    while i < parts.len() {
        match parts[i] {
            "depth" => {
                depth = parts.get(i + 1).and_then(|t| t.parse().ok());
                i += 1;
            }
            "movetime" => {
                movetime = parts.get(i + 1).and_then(|t| t.parse().ok());
                i += 1;
            }
            "nodes" => {
                nodes = parts.get(i + 1).and_then(|t| t.parse().ok());
                i += 1;
            }
            "wtime" => {
                wtime = parts.get(i + 1).and_then(|t| t.parse().ok());
                i += 1;
            }
            "btime" => {
                btime = parts.get(i + 1).and_then(|t| t.parse().ok());
                i += 1;
            }
            "winc" => {
                winc = parts.get(i + 1).and_then(|t| t.parse().ok());
                i += 1;
            }
            "binc" => {
                binc = parts.get(i + 1).and_then(|t| t.parse().ok());
                i += 1;
            }
            "movestogo" => {
                movestogo = parts.get(i + 1).and_then(|t| t.parse().ok());
                i += 1;
            }
            "infinite" => infinite = true,
            "ponder" => ponder = true,
            "searchmoves" => {
                // everything after is move tokens until an unknown token
                let mut j = i + 1;
                while j < parts.len() {
                    match parse_move(state, parts[j]) {
                        Some(mv) => search_moves.push(mv),
                        None => break,
                    }
                    j += 1;
                }
                i = j - 1;
            }
            _ => {}
        }
        i += 1;
    }

    let limits = if infinite {
        Limits::Infinite
    } else if let Some(d) = depth {
        Limits::FixedDepth(d)
    } else if let Some(n) = nodes {
        Limits::FixedNodes(n)
    } else if let Some(mt) = movetime {
        Limits::FixedTime(TimeManager::new(
            TimeControl::MoveTime(mt),
            state.side_to_move,
            move_overhead,
        ))
    } else if wtime.is_some() || btime.is_some() {
        Limits::FixedTime(TimeManager::new(
            TimeControl::GameTime {
                wtime: wtime.unwrap_or(0),
                btime: btime.unwrap_or(0),
                winc: winc.unwrap_or(0),
                binc: binc.unwrap_or(0),
                moves_to_go: movestogo,
            },
            state.side_to_move,
            move_overhead,
        ))
    } else {
        Limits::Infinite
    };

    let options = SearchOptions {
        multi_pv,
        search_moves,
        ponder,
    };
    (limits, options)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init() {
        crate::zobrist::init_zobrist();
        crate::bitboard::init_attack_tables();
        crate::movegen::init_move_tables();
    }

    #[test]
    fn position_command_tracks_repetitions() {
        init();
        let mut state = GameState::from_fen(START_FEN).unwrap();
        let mut game = Game::new();
        let parts: Vec<&str> =
            "position startpos moves g1f3 g8f6 f3g1 f6g8 g1f3 g8f6 f3g1 f6g8"
                .split_whitespace()
                .collect();
        handle_position(&mut state, &mut game, &parts).unwrap();

        let start = GameState::from_fen(START_FEN).unwrap();
        assert_eq!(state.hash, start.hash);
        assert_eq!(game.repetition_count(state.hash), 3);
    }

    #[test]
    fn position_rejects_illegal_moves() {
        init();
        let mut state = GameState::from_fen(START_FEN).unwrap();
        let mut game = Game::new();
        let parts: Vec<&str> = "position startpos moves e2e5".split_whitespace().collect();
        assert!(handle_position(&mut state, &mut game, &parts).is_err());
    }

    #[test]
    fn go_searchmoves_filter_is_parsed() {
        init();
        let state = GameState::from_fen(START_FEN).unwrap();
        let parts: Vec<&str> = "go depth 5 searchmoves e2e4 d2d4".split_whitespace().collect();
        let (limits, options) = parse_go(&state, &parts, 10, 1);
        assert!(matches!(limits, Limits::FixedDepth(5)));
        assert_eq!(options.search_moves.len(), 2);
    }
}
