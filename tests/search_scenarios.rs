//! End-to-end search behavior on fixed positions.

use ember::eval::HandcraftedEvaluator;
use ember::game::Game;
use ember::ordering::MoveOrderer;
use ember::parameters::SearchParameters;
use ember::search::{self, Limits, SearchOptions, SearchResult, CHECKMATE, MATE_IN_MAX};
use ember::state::{format_move_uci, GameState, Move};
use ember::tt::TranspositionTable;
use ember::uci::parse_move;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

fn search_depth(state: &GameState, game: &Game, depth: i32, options: &SearchOptions) -> SearchResult {
    ember::init_tables();
    let tt = TranspositionTable::new(16).unwrap();
    let orderer = MoveOrderer::new();
    let params = SearchParameters::default();
    let stop = Arc::new(AtomicBool::new(false));
    search::run_search(
        state,
        game,
        Limits::FixedDepth(depth),
        options,
        &tt,
        &orderer,
        &params,
        &HandcraftedEvaluator,
        stop,
        1,
    )
}

fn search_fen(fen: &str, depth: i32) -> SearchResult {
    ember::init_tables();
    let state = GameState::from_fen(fen).unwrap();
    let mut game = Game::new();
    game.record_position(&state);
    search_depth(&state, &game, depth, &SearchOptions::default())
}

#[test]
fn finds_mate_in_one() {
    let result = search_fen("6k1/5ppp/8/8/8/8/5PPP/R5K1 w - - 0 1", 6);
    let best = result.best_move.expect("a best move must be reported");
    assert_eq!(format_move_uci(best), "a1a8");
    assert!(
        result.lines[0].score > MATE_IN_MAX,
        "expected a mate score, got {}",
        result.lines[0].score
    );
    assert_eq!(result.lines[0].score, CHECKMATE - 1);
}

#[test]
fn mate_score_is_color_symmetric() {
    ember::init_tables();
    let state = GameState::from_fen("6k1/5ppp/8/8/8/8/5PPP/R5K1 w - - 0 1").unwrap();
    let mirror = state.mirrored();
    let mut game = Game::new();
    game.record_position(&state);
    let a = search_depth(&state, &game, 5, &SearchOptions::default());

    let mut game = Game::new();
    game.record_position(&mirror);
    let b = search_depth(&mirror, &game, 5, &SearchOptions::default());

    assert_eq!(a.lines[0].score, b.lines[0].score);
    assert_eq!(
        format_move_uci(b.best_move.unwrap()),
        "a8a1",
        "mirrored mate must use the mirrored rook lift"
    );
}

#[test]
fn avoids_stalemating_a_won_position() {
    let result = search_fen("7k/5Q2/6K1/8/8/8/8/8 w - - 0 1", 8);
    let best = result.best_move.expect("KQ vs K must produce a move");

    // whatever is played, the reply position must not be stalemate
    let state = GameState::from_fen("7k/5Q2/6K1/8/8/8/8/8 w - - 0 1").unwrap();
    let after = state.make_move(best);
    let replies = search::legal_moves(&after);
    let in_check = ember::movegen::is_in_check(&after);
    assert!(
        !replies.is_empty() || in_check,
        "{} stalemates the defender",
        format_move_uci(best)
    );
    // and the engine should know it is winning
    assert!(result.lines[0].score > MATE_IN_MAX);
}

#[test]
fn bare_kings_score_zero_at_any_depth() {
    for depth in [1, 4, 8] {
        let result = search_fen("8/8/4k3/8/8/4K3/8/8 w - - 0 1", depth);
        assert_eq!(result.lines[0].score, 0, "depth {}", depth);
    }
}

#[test]
fn completed_threefold_is_adjudicated_as_draw() {
    ember::init_tables();
    let mut state = GameState::from_fen(ember::state::START_FEN).unwrap();
    let mut game = Game::new();
    game.record_position(&state);

    for token in ["g1f3", "g8f6", "f3g1", "f6g8", "g1f3", "g8f6", "f3g1", "f6g8"] {
        let mv = parse_move(&state, token).unwrap();
        state = state.make_move(mv);
        game.record_move(mv);
        game.record_position(&state);
    }
    assert_eq!(game.repetition_count(state.hash), 3);

    let result = search_depth(&state, &game, 6, &SearchOptions::default());
    assert_eq!(result.lines[0].score, 0);
    assert!(result.best_move.is_some());
}

#[test]
fn repetition_is_detected_inside_the_search_stack() {
    // replay a knight shuffle and mirror it onto a search stack: the second
    // recurrence of the root position must read as a repetition
    ember::init_tables();
    let mut state = GameState::from_fen(ember::state::START_FEN).unwrap();
    let game = Game::new();

    let mut stack = vec![ember::search::StackEntry::default(); 8];
    stack[0].hash = state.hash;

    for (ply, token) in ["g1f3", "g8f6", "f3g1", "f6g8"].iter().enumerate() {
        let mv = parse_move(&state, token).unwrap();
        let piece = state.piece_on(mv.from()) % 6;
        state = state.make_move(mv);
        stack[ply + 1].hash = state.hash;
        stack[ply + 1].prev_move = mv;
        stack[ply + 1].prev_piece = piece;
    }

    assert!(ember::repetition::is_repetition(&stack, 4, &state, &game));

    // an irreversible move inside the chain cuts the walk short, even if
    // hashes upstream of it would match
    let mut stack2 = stack.clone();
    stack2[2].prev_piece = 0; // pretend ply 2 was reached by a pawn move
    assert!(!ember::repetition::is_repetition(&stack2, 4, &state, &game));
}

#[test]
fn quiet_opening_stays_in_bounds() {
    let result =
        search_fen("r1bqkb1r/pppp1ppp/2n2n2/4p3/2B1P3/5N2/PPPP1PPP/RNBQK2R w KQkq - 0 1", 7);
    assert!(
        result.lines[0].score.abs() < 200,
        "Italian scored {}",
        result.lines[0].score
    );

    // the reported PV must replay as a legal line
    let mut state =
        GameState::from_fen("r1bqkb1r/pppp1ppp/2n2n2/4p3/2B1P3/5N2/PPPP1PPP/RNBQK2R w KQkq - 0 1")
            .unwrap();
    assert!(!result.lines[0].moves.is_empty());
    for &mv in &result.lines[0].moves {
        assert!(
            search::legal_moves(&state).contains(&mv),
            "illegal PV move {}",
            format_move_uci(mv)
        );
        state = state.make_move(mv);
    }
}

#[test]
fn null_move_does_not_invent_a_zugzwang_win() {
    let result = search_fen("8/8/p7/P7/k7/8/8/K7 w - - 0 1", 10);
    let score = result.lines[0].score;
    assert!(score < 100, "white is not winning here, got {}", score);
    assert!(score > -400, "white is not losing badly either, got {}", score);
}

#[test]
fn single_thread_search_is_deterministic() {
    let a = search_fen("r1bqkb1r/pppp1ppp/2n2n2/4p3/2B1P3/5N2/PPPP1PPP/RNBQK2R w KQkq - 0 1", 6);
    let b = search_fen("r1bqkb1r/pppp1ppp/2n2n2/4p3/2B1P3/5N2/PPPP1PPP/RNBQK2R w KQkq - 0 1", 6);
    assert_eq!(a.lines[0].score, b.lines[0].score);
    assert_eq!(a.best_move, b.best_move);
    assert_eq!(a.nodes, b.nodes);
}

#[test]
fn multipv_returns_distinct_ranked_lines() {
    ember::init_tables();
    let state = GameState::from_fen(ember::state::START_FEN).unwrap();
    let mut game = Game::new();
    game.record_position(&state);
    let options = SearchOptions {
        multi_pv: 3,
        ..Default::default()
    };
    let result = search_depth(&state, &game, 5, &options);

    assert_eq!(result.lines.len(), 3);
    let firsts: Vec<Move> = result
        .lines
        .iter()
        .map(|l| *l.moves.first().expect("every pv line has a move"))
        .collect();
    assert_ne!(firsts[0], firsts[1]);
    assert_ne!(firsts[0], firsts[2]);
    assert_ne!(firsts[1], firsts[2]);

    // the unrestricted first line must not rank (meaningfully) below the
    // restricted ones; small transposition-table noise is tolerated
    assert!(result.lines[0].score + 50 >= result.lines[1].score);
    assert!(result.lines[0].score + 50 >= result.lines[2].score);
}

#[test]
fn searchmoves_restricts_the_root() {
    ember::init_tables();
    let state = GameState::from_fen(ember::state::START_FEN).unwrap();
    let mut game = Game::new();
    game.record_position(&state);
    let mv = parse_move(&state, "a2a3").unwrap();
    let options = SearchOptions {
        search_moves: vec![mv],
        ..Default::default()
    };
    let result = search_depth(&state, &game, 5, &options);
    assert_eq!(result.best_move, Some(mv));
}

#[test]
fn node_limit_stops_the_search() {
    ember::init_tables();
    let state = GameState::from_fen(ember::state::START_FEN).unwrap();
    let mut game = Game::new();
    game.record_position(&state);

    let tt = TranspositionTable::new(16).unwrap();
    let orderer = MoveOrderer::new();
    let params = SearchParameters::default();
    let stop = Arc::new(AtomicBool::new(false));
    let result = search::run_search(
        &state,
        &game,
        Limits::FixedNodes(5_000),
        &SearchOptions::default(),
        &tt,
        &orderer,
        &params,
        &HandcraftedEvaluator,
        stop,
        1,
    );
    assert!(result.best_move.is_some());
    assert!(result.nodes < 20_000, "searched {} nodes", result.nodes);
}

#[test]
fn stop_flag_aborts_but_a_move_is_still_reported() {
    ember::init_tables();
    let state = GameState::from_fen(ember::state::START_FEN).unwrap();
    let mut game = Game::new();
    game.record_position(&state);

    let tt = TranspositionTable::new(16).unwrap();
    let orderer = MoveOrderer::new();
    let params = SearchParameters::default();
    let stop = Arc::new(AtomicBool::new(true)); // aborted before it starts
    let result = search::run_search(
        &state,
        &game,
        Limits::Infinite,
        &SearchOptions::default(),
        &tt,
        &orderer,
        &params,
        &HandcraftedEvaluator,
        stop,
        1,
    );
    assert!(result.best_move.is_some());
}
