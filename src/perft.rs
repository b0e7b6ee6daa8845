use crate::movegen::{self, GenMode, MoveGenerator};
use crate::state::GameState;

pub fn perft(state: &GameState, depth: u32) -> u64 {
    if depth == 0 {
        return 1;
    }
    let mut gen = MoveGenerator::new();
    gen.generate_moves(state, GenMode::All);

    let mut nodes = 0;
    for i in 0..gen.list.count {
        let mv = gen.list.moves[i];
        let next = state.make_move(mv);
        if movegen::is_check(&next, state.side_to_move) {
            continue;
        }
        nodes += if depth == 1 { 1 } else { perft(&next, depth - 1) };
    }
    nodes
}

pub fn run_perft_suite() {
    let suite: &[(&str, u32, u64)] = &[
        ("rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1", 5, 4_865_609),
        (
            "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1",
            4,
            4_085_603,
        ),
        ("8/2p5/3p4/KP5r/1R3p1k/8/4P1P1/8 w - - 0 1", 5, 674_624),
    ];

    for (fen, depth, expected) in suite {
        let state = match GameState::from_fen(fen) {
            Ok(s) => s,
            Err(e) => {
                println!("perft: bad fen {}: {}", fen, e);
                continue;
            }
        };
        let start = std::time::Instant::now();
        let nodes = perft(&state, *depth);
        let status = if nodes == *expected { "ok" } else { "FAIL" };
        println!(
            "perft {} depth {} -> {} (expected {}) [{}] in {} ms",
            fen,
            depth,
            nodes,
            expected,
            status,
            start.elapsed().as_millis()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::START_FEN;

    fn init() {
        crate::zobrist::init_zobrist();
        crate::bitboard::init_attack_tables();
        crate::movegen::init_move_tables();
    }

    #[test]
    fn perft_startpos_shallow() {
        init();
        let state = GameState::from_fen(START_FEN).unwrap();
        assert_eq!(perft(&state, 1), 20);
        assert_eq!(perft(&state, 2), 400);
        assert_eq!(perft(&state, 3), 8_902);
        assert_eq!(perft(&state, 4), 197_281);
    }

    #[test]
    fn perft_kiwipete() {
        init();
        let state = GameState::from_fen(
            "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1",
        )
        .unwrap();
        assert_eq!(perft(&state, 1), 48);
        assert_eq!(perft(&state, 2), 2_039);
        assert_eq!(perft(&state, 3), 97_862);
    }

    #[test]
    fn perft_en_passant_pins() {
        init();
        // position 3 from the CPW perft suite, heavy on ep edge cases
        let state =
            GameState::from_fen("8/2p5/3p4/KP5r/1R3p1k/8/4P1P1/8 w - - 0 1").unwrap();
        assert_eq!(perft(&state, 1), 14);
        assert_eq!(perft(&state, 2), 191);
        assert_eq!(perft(&state, 3), 2_812);
        assert_eq!(perft(&state, 4), 43_238);
    }
}
