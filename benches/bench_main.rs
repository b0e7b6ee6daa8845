use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ember::eval::HandcraftedEvaluator;
use ember::game::Game;
use ember::movegen::{GenMode, MoveGenerator};
use ember::ordering::MoveOrderer;
use ember::parameters::SearchParameters;
use ember::search::{self, Limits, SearchOptions};
use ember::state::{GameState, PackedMove, START_FEN};
use ember::tt::{Bound, TranspositionTable};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

fn bench_movegen(c: &mut Criterion) {
    ember::init_tables();
    let mut group = c.benchmark_group("movegen");
    let state = GameState::from_fen(
        "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1",
    )
    .unwrap();

    group.bench_function("generate_kiwipete", |b| {
        b.iter(|| {
            let mut gen = MoveGenerator::new();
            gen.generate_moves(black_box(&state), GenMode::All);
            gen.list.count
        })
    });
    group.finish();
}

fn bench_make_move(c: &mut Criterion) {
    ember::init_tables();
    let mut group = c.benchmark_group("make_move");
    let state = GameState::from_fen(START_FEN).unwrap();
    let mut gen = MoveGenerator::new();
    gen.generate_moves(&state, GenMode::All);
    let mv = gen.list.moves[0];

    group.bench_function("copy_make_startpos", |b| {
        b.iter(|| state.make_move(black_box(mv)))
    });
    group.finish();
}

fn bench_tt(c: &mut Criterion) {
    ember::init_tables();
    let mut group = c.benchmark_group("tt");
    let tt = TranspositionTable::new(16).unwrap();
    let state = GameState::from_fen(START_FEN).unwrap();

    group.bench_function("probe_empty", |b| {
        b.iter(|| tt.probe(black_box(state.hash)))
    });

    tt.store(state.hash, 100, 20, PackedMove::new(12, 28, 0), 5, Bound::Exact);
    group.bench_function("probe_hit", |b| {
        b.iter(|| tt.probe(black_box(state.hash)))
    });
    group.finish();
}

fn bench_search(c: &mut Criterion) {
    ember::init_tables();
    let mut group = c.benchmark_group("search");
    group.sample_size(10);

    let state = GameState::from_fen(START_FEN).unwrap();
    let mut game = Game::new();
    game.record_position(&state);
    let params = SearchParameters::default();

    group.bench_function("startpos_depth_7", |b| {
        b.iter(|| {
            let tt = TranspositionTable::new(16).unwrap();
            let orderer = MoveOrderer::new();
            let stop = Arc::new(AtomicBool::new(false));
            search::run_search(
                black_box(&state),
                &game,
                Limits::FixedDepth(7),
                &SearchOptions::default(),
                &tt,
                &orderer,
                &params,
                &HandcraftedEvaluator,
                stop,
                1,
            )
            .nodes
        })
    });
    group.finish();
}

criterion_group!(benches, bench_movegen, bench_make_move, bench_tt, bench_search);
criterion_main!(benches);
