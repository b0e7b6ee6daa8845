//! Draw-by-repetition machinery: the in-stack two-fold walk, the played-game
//! multiset, and the cuckoo-indexed upcoming-repetition probe.
//!
//! The cuckoo scheme follows Marcel van Kervinck's algorithm as popularized
//! by Stockfish: every reversible single-piece move is keyed by the Zobrist
//! xor of its endpoints, so `hash(now) ^ hash(ancestor)` can be tested for
//! "is one reversible move" in O(1).

use crate::bitboard;
use crate::game::Game;
use crate::search::StackEntry;
use crate::state::{GameState, PackedMove, B, K, N, P, Q, R};
use crate::zobrist;
use std::sync::OnceLock;

const CUCKOO_TABLE_SIZE: usize = 8192;

struct CuckooTables {
    keys: Vec<u64>,
    moves: Vec<PackedMove>,
}

static CUCKOO: OnceLock<CuckooTables> = OnceLock::new();

#[inline(always)]
fn index1(key: u64) -> usize {
    (key as usize) & (CUCKOO_TABLE_SIZE - 1)
}

#[inline(always)]
fn index2(key: u64) -> usize {
    ((key >> 16) as usize) & (CUCKOO_TABLE_SIZE - 1)
}

fn empty_board_attacks(piece_type: usize, sq: u8) -> bitboard::Bitboard {
    match piece_type {
        N => bitboard::mask_knight_attacks(sq),
        B => bitboard::generate_bishop_attacks_slow(sq, bitboard::Bitboard(0)),
        R => bitboard::generate_rook_attacks_slow(sq, bitboard::Bitboard(0)),
        Q => {
            bitboard::generate_rook_attacks_slow(sq, bitboard::Bitboard(0))
                | bitboard::generate_bishop_attacks_slow(sq, bitboard::Bitboard(0))
        }
        K => bitboard::mask_king_attacks(sq),
        _ => bitboard::Bitboard(0),
    }
}

/// Populate the move-key tables. For the standard chess move set this inserts
/// exactly 3668 reversible moves; pawns are excluded as irreversible.
pub fn init_cuckoo_tables() -> usize {
    if let Some(tables) = CUCKOO.get() {
        return tables.keys.iter().filter(|&&key| key != 0).count();
    }

    let mut keys = vec![0u64; CUCKOO_TABLE_SIZE];
    let mut moves = vec![PackedMove::NULL; CUCKOO_TABLE_SIZE];
    let mut count = 0usize;

    for color in 0..2 {
        for piece_type in [N, B, R, Q, K] {
            let piece = color * 6 + piece_type;
            for square_a in 0..64u8 {
                for square_b in (square_a + 1)..64u8 {
                    if !empty_board_attacks(piece_type, square_a).get_bit(square_b) {
                        continue;
                    }

                    let mut mv = PackedMove::new(square_a, square_b, 0);
                    let mut key = zobrist::piece_key(piece, square_a as usize)
                        ^ zobrist::piece_key(piece, square_b as usize)
                        ^ zobrist::side_key();

                    // displacement loop: every key ends up in one of its two slots
                    let mut index = index1(key);
                    loop {
                        std::mem::swap(&mut keys[index], &mut key);
                        std::mem::swap(&mut moves[index], &mut mv);
                        if mv.is_null() {
                            break;
                        }
                        index = if index == index1(key) {
                            index2(key)
                        } else {
                            index1(key)
                        };
                    }
                    count += 1;
                }
            }
        }
    }

    let _ = CUCKOO.set(CuckooTables { keys, moves });
    count
}

#[inline(always)]
fn entry_is_irreversible(entry: &StackEntry) -> bool {
    !entry.prev_move.is_null()
        && (entry.prev_move.is_capture()
            || entry.prev_move.promotion().is_some()
            || entry.prev_piece == P)
}

/// Two-fold repetition inside the search stack, falling back to the played
/// game. Walks upward two plies at a time (the side to move must match) and
/// stops at the first irreversible move.
pub fn is_repetition(stack: &[StackEntry], ply: usize, state: &GameState, game: &Game) -> bool {
    let mut i = ply;
    loop {
        if entry_is_irreversible(&stack[i]) {
            return false;
        }
        if i == 0 {
            break;
        }
        i -= 1;
        if (ply - i) % 2 == 0 && stack[i].hash == state.hash {
            return true;
        }
    }

    game.repetition_count(state.hash) >= 2
}

/// Can the side to move slide back into a position already seen in the
/// stack? Detects draws one ply earlier than `is_repetition` and is only
/// worth claiming when the node is doing badly (`alpha < 0` at the caller).
pub fn can_reach_game_cycle(stack: &[StackEntry], ply: usize, state: &GameState) -> bool {
    if state.halfmove_clock < 3 || ply < 3 {
        return false;
    }

    // captures and promotions rule a cycle out immediately; a quiet pawn
    // push does not, it only terminates the walk below
    let node = &stack[ply];
    if node.is_null
        || node.prev_move.is_capture()
        || node.prev_move.promotion().is_some()
    {
        return false;
    }

    let tables = match CUCKOO.get() {
        Some(t) => t,
        None => return false,
    };

    let original_key = state.hash;
    let occupied = state.occupancies[crate::state::BOTH];
    let own = state.occupancies[state.side_to_move];

    // ancestors with the opposite side to move sit at odd distances; the
    // move keys carry the side-to-move hash, so only those can match
    let mut i = ply - 1;
    loop {
        if i < 2 {
            break;
        }
        if stack[i].is_null || stack[i - 1].is_null {
            break;
        }
        // both moves stepped over must be reversible
        if entry_is_irreversible(&stack[i]) || entry_is_irreversible(&stack[i - 1]) {
            break;
        }
        i -= 2;

        let move_key = original_key ^ stack[i].hash;
        let index = if tables.keys[index1(move_key)] == move_key {
            index1(move_key)
        } else if tables.keys[index2(move_key)] == move_key {
            index2(move_key)
        } else {
            continue;
        };

        let mv = tables.moves[index];
        if (bitboard::between(mv.from(), mv.to()) & occupied).0 != 0 {
            continue;
        }
        if own.get_bit(mv.from()) || own.get_bit(mv.to()) {
            return true;
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cuckoo_table_has_exactly_3668_entries() {
        crate::zobrist::init_zobrist();
        crate::bitboard::init_attack_tables();
        assert_eq!(init_cuckoo_tables(), 3668);
    }

    #[test]
    fn every_cuckoo_key_is_findable() {
        crate::zobrist::init_zobrist();
        crate::bitboard::init_attack_tables();
        init_cuckoo_tables();
        let tables = CUCKOO.get().unwrap();
        for (i, &key) in tables.keys.iter().enumerate() {
            if key != 0 {
                assert!(index1(key) == i || index2(key) == i);
            }
        }
    }

    #[test]
    fn upcoming_repetition_is_detected() {
        crate::zobrist::init_zobrist();
        crate::bitboard::init_attack_tables();
        init_cuckoo_tables();

        // Ra1-a2, ra8-a7, Ra2-a1: black to move can now retract the rook
        // and complete a repetition of the root position
        let mut state =
            GameState::from_fen("r6k/8/8/8/8/8/8/R6K w - - 5 30").unwrap();
        let mut stack = vec![StackEntry::default(); 8];
        stack[0].hash = state.hash;

        for (ply, (from, to)) in [(0u8, 8u8), (56, 48), (8, 0)].iter().enumerate() {
            let mv = state
                .move_from_packed(PackedMove::new(*from, *to, 0))
                .expect("rook shuffle move");
            let piece = state.piece_on(mv.from()) % 6;
            state = state.make_move(mv);
            stack[ply + 1] = StackEntry {
                hash: state.hash,
                prev_move: mv,
                prev_piece: piece,
                ..StackEntry::default()
            };
        }

        assert!(can_reach_game_cycle(&stack, 3, &state));

        // the rule-50 gate keeps the probe quiet right after a reset
        let mut recent = state;
        recent.halfmove_clock = 2;
        assert!(!can_reach_game_cycle(&stack, 3, &recent));
    }
}
