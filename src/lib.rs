pub mod bitboard;
pub mod eval;
pub mod game;
pub mod logging;
pub mod movegen;
pub mod nnue;
pub mod ordering;
pub mod parameters;
pub mod perft;
pub mod picker;
pub mod repetition;
pub mod search;
pub mod state;
pub mod syzygy;
pub mod time;
pub mod tt;
pub mod uci;
pub mod zobrist;

use std::env;
use std::thread;

/// One-time setup of every process-wide table. Idempotent.
pub fn init_tables() {
    zobrist::init_zobrist();
    bitboard::init_attack_tables();
    movegen::init_move_tables();
    repetition::init_cuckoo_tables();
}

pub fn run_cli() {
    logging::init_logging();
    init_tables();

    let args: Vec<String> = env::args().collect();
    if args.len() > 1 {
        match args[1].as_str() {
            "perft" => {
                perft::run_perft_suite();
                return;
            }
            "bench" => {
                run_bench();
                return;
            }
            other => {
                println!("unknown mode '{}', starting UCI", other);
            }
        }
    }

    // the search recurses deeply; give the UCI thread a generous stack
    let builder = thread::Builder::new()
        .name("uci_thread".into())
        .stack_size(32 * 1024 * 1024);

    match builder.spawn(uci::uci_loop) {
        Ok(handle) => {
            let _ = handle.join();
        }
        Err(e) => println!("info string failed to start uci thread: {}", e),
    }
}

/// Fixed-depth search from the start position, for quick speed comparisons.
fn run_bench() {
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    let state = match state::GameState::from_fen(state::START_FEN) {
        Ok(s) => s,
        Err(e) => {
            println!("bench: {}", e);
            return;
        }
    };
    let tt = match tt::TranspositionTable::new(16) {
        Ok(tt) => tt,
        Err(e) => {
            println!("bench: {}", e);
            return;
        }
    };
    let orderer = ordering::MoveOrderer::new();
    let params = parameters::SearchParameters::default();
    let game = game::Game::new();
    let evaluator = eval::HandcraftedEvaluator;
    let stop = Arc::new(AtomicBool::new(false));

    println!("bench: startpos depth 12");
    let start = std::time::Instant::now();
    let result = search::run_search(
        &state,
        &game,
        search::Limits::FixedDepth(12),
        &search::SearchOptions::default(),
        &tt,
        &orderer,
        &params,
        &evaluator,
        stop,
        1,
    );
    let elapsed = start.elapsed().as_secs_f64();
    println!(
        "bench: {} nodes in {:.2}s ({:.0} nps)",
        result.nodes,
        elapsed,
        result.nodes as f64 / elapsed.max(1e-9)
    );
}
