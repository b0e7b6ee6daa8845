#![allow(non_upper_case_globals)]

use crate::bitboard::{self, Bitboard};
use crate::movegen::{self, MoveList, UNSCORED};
use crate::state::{q, r, GameState, Move, PackedMove, B, K, N, NO_PIECE, P, Q, R, WHITE};
use std::sync::atomic::{AtomicI16, AtomicU16, Ordering};

pub const MAX_PLY: usize = 256;
// quiescence can run past the nominal depth cap; killers carry the margin
const KILLER_PLIES: usize = MAX_PLY + 8;

/// Saturation bound for every history counter.
pub const HISTORY_MAX: i32 = 16384;

// Score tiers. The picker treats everything at or above `PROMOTION_VALUE`
// as a good capture; losing captures sink below the quiet range and are
// re-yielded after quiets.
pub const PV_MOVE_VALUE: i32 = i32::MAX;
pub const TT_MOVE_VALUE: i32 = i32::MAX - 8;
pub const WINNING_CAPTURE_VALUE: i32 = 20_000_000;
pub const GOOD_CAPTURE_VALUE: i32 = 10_000_000;
pub const PROMOTION_VALUE: i32 = 9_000_000;
pub const LOSING_CAPTURE_VALUE: i32 = -10_000_000;
pub const KILLER_MOVE_BONUS: i32 = 1_000_000;
pub const COUNTER_MOVE_BONUS: i32 = 900_000;

const RECAPTURE_BONUS: i32 = 100_000;
const PAWN_PUSH_BONUS: [i32; 8] = [0, 0, 0, 0, 500, 2000, 8000, 0];

const CONT_DIM: usize = 6 * 64;

/// Key addressing one `[piece][to]` plane of a continuation table.
#[derive(Clone, Copy, Debug)]
pub struct ContKey {
    pub counter_table: bool,
    base: usize,
}

/// Move-ordering state shared by all search workers. Counters are plain
/// relaxed atomics; concurrent updates may be lost, which is acceptable,
/// and saturation keeps every value inside `[-16384, 16384]`.
pub struct MoveOrderer {
    quiet_history: Vec<AtomicI16>,        // [color][from][to]
    capture_history: Vec<AtomicI16>,      // [color][piece][victim][to]
    continuation_history: Vec<AtomicI16>, // [color][prev_piece][prev_to][piece][to]
    counter_move_history: Vec<AtomicI16>, // same shape, even-offset chain
    killers: Vec<AtomicU16>,              // [ply][slot]
    counter_moves: Vec<AtomicU16>,        // [color][prev_piece][prev_to]
}

fn zeroed_i16(len: usize) -> Vec<AtomicI16> {
    (0..len).map(|_| AtomicI16::new(0)).collect()
}

fn zeroed_u16(len: usize) -> Vec<AtomicU16> {
    (0..len).map(|_| AtomicU16::new(0)).collect()
}

impl MoveOrderer {
    pub fn new() -> Self {
        MoveOrderer {
            quiet_history: zeroed_i16(2 * 64 * 64),
            capture_history: zeroed_i16(2 * 6 * 5 * 64),
            continuation_history: zeroed_i16(2 * 6 * 64 * CONT_DIM),
            counter_move_history: zeroed_i16(2 * 6 * 64 * CONT_DIM),
            killers: zeroed_u16(KILLER_PLIES * 2),
            counter_moves: zeroed_u16(2 * 6 * 64),
        }
    }

    pub fn clear(&self) {
        for v in self
            .quiet_history
            .iter()
            .chain(&self.capture_history)
            .chain(&self.continuation_history)
            .chain(&self.counter_move_history)
        {
            v.store(0, Ordering::Relaxed);
        }
        for v in self.killers.iter().chain(&self.counter_moves) {
            v.store(0, Ordering::Relaxed);
        }
    }

    /// Between-searches decay: histories keep half their weight, killers
    /// start fresh.
    pub fn new_search(&self) {
        for v in self
            .quiet_history
            .iter()
            .chain(&self.capture_history)
            .chain(&self.continuation_history)
            .chain(&self.counter_move_history)
        {
            let old = v.load(Ordering::Relaxed);
            v.store(old / 2, Ordering::Relaxed);
        }
        for v in self.killers.iter() {
            v.store(0, Ordering::Relaxed);
        }
    }

    // --- killers ---

    pub fn killer_moves(&self, ply: usize) -> [PackedMove; 2] {
        if ply >= KILLER_PLIES {
            return [PackedMove::NULL; 2];
        }
        [
            PackedMove(self.killers[ply * 2].load(Ordering::Relaxed)),
            PackedMove(self.killers[ply * 2 + 1].load(Ordering::Relaxed)),
        ]
    }

    pub fn insert_killer(&self, ply: usize, mv: Move) {
        if ply >= KILLER_PLIES {
            return;
        }
        let packed = mv.packed().0;
        let first = self.killers[ply * 2].load(Ordering::Relaxed);
        if first != packed {
            self.killers[ply * 2 + 1].store(first, Ordering::Relaxed);
            self.killers[ply * 2].store(packed, Ordering::Relaxed);
        }
    }

    // --- counter moves ---

    #[inline(always)]
    fn counter_index(color: usize, prev_piece: usize, prev_to: usize) -> usize {
        (color * 6 + prev_piece) * 64 + prev_to
    }

    pub fn counter_move(&self, color: usize, prev_piece: usize, prev_to: usize) -> PackedMove {
        PackedMove(
            self.counter_moves[Self::counter_index(color, prev_piece, prev_to)]
                .load(Ordering::Relaxed),
        )
    }

    pub fn set_counter_move(&self, color: usize, prev_piece: usize, prev_to: usize, mv: Move) {
        self.counter_moves[Self::counter_index(color, prev_piece, prev_to)]
            .store(mv.packed().0, Ordering::Relaxed);
    }

    // --- histories ---

    #[inline(always)]
    fn quiet_index(color: usize, from: usize, to: usize) -> usize {
        (color * 64 + from) * 64 + to
    }

    #[inline(always)]
    pub fn quiet_history(&self, color: usize, from: usize, to: usize) -> i32 {
        self.quiet_history[Self::quiet_index(color, from, to)].load(Ordering::Relaxed) as i32
    }

    #[inline(always)]
    fn capture_index(color: usize, piece: usize, victim: usize, to: usize) -> usize {
        ((color * 6 + piece) * 5 + victim) * 64 + to
    }

    #[inline(always)]
    pub fn capture_history(&self, color: usize, piece: usize, victim: usize, to: usize) -> i32 {
        self.capture_history[Self::capture_index(color, piece, victim, to)].load(Ordering::Relaxed)
            as i32
    }

    /// Key for the `[piece][to]` plane reached after (color, prev_piece,
    /// prev_to); even stack offsets address the counter-move chain table.
    pub fn cont_key(
        &self,
        offset: usize,
        color: usize,
        prev_piece: usize,
        prev_to: usize,
    ) -> ContKey {
        ContKey {
            counter_table: offset % 2 == 0,
            base: ((color * 6 + prev_piece) * 64 + prev_to) * CONT_DIM,
        }
    }

    #[inline(always)]
    pub fn continuation(&self, key: ContKey, piece: usize, to: usize) -> i32 {
        let table = if key.counter_table {
            &self.counter_move_history
        } else {
            &self.continuation_history
        };
        table[key.base + piece * 64 + to].load(Ordering::Relaxed) as i32
    }

    #[inline(always)]
    fn bump(entry: &AtomicI16, delta: i32) {
        let old = entry.load(Ordering::Relaxed) as i32;
        let new = old + delta - old * delta.abs() / HISTORY_MAX;
        entry.store(new.clamp(-HISTORY_MAX, HISTORY_MAX) as i16, Ordering::Relaxed);
    }

    fn bump_continuation(&self, key: ContKey, piece: usize, to: usize, delta: i32) {
        let table = if key.counter_table {
            &self.counter_move_history
        } else {
            &self.continuation_history
        };
        Self::bump(&table[key.base + piece * 64 + to], delta);
    }

    /// Reward the cutoff move, punish the quiets searched before it.
    /// Continuation planes at stack offsets 0, 1, 3 and 5 follow along.
    pub fn update_quiet_histories(
        &self,
        state: &GameState,
        depth: i32,
        tried_quiets: &[Move],
        best_move: Move,
        cont_keys: &[Option<ContKey>; 6],
    ) {
        let depth = depth.max(0);
        // a single quick answer proves nothing
        if tried_quiets.len() <= 1 && depth < 2 {
            return;
        }

        let color = state.side_to_move;
        let bonus = (128 * (depth - 1) + depth * depth).min(2000);

        for &mv in tried_quiets {
            let delta = if mv == best_move { bonus } else { -bonus };
            let from = mv.from() as usize;
            let to = mv.to() as usize;
            let piece = state.piece_on(mv.from()) % 6;

            Self::bump(&self.quiet_history[Self::quiet_index(color, from, to)], delta);
            for offset in [0usize, 1, 3, 5] {
                if let Some(key) = cont_keys[offset] {
                    self.bump_continuation(key, piece, to, delta);
                }
            }
        }
    }

    pub fn update_capture_histories(
        &self,
        state: &GameState,
        depth: i32,
        tried_captures: &[Move],
        best_move: Move,
    ) {
        let depth = depth.max(0);
        if tried_captures.len() <= 1 {
            return;
        }

        let color = state.side_to_move;
        let bonus = (16 + 32 * depth + depth * depth).min(2000);

        for &mv in tried_captures {
            let delta = if mv == best_move { bonus } else { -bonus };
            let piece = state.piece_on(mv.from()) % 6;
            let victim = state.captured_piece(mv);
            if victim >= K {
                continue;
            }
            Self::bump(
                &self.capture_history[Self::capture_index(color, piece, victim, mv.to() as usize)],
                delta,
            );
        }
    }

    // --- scoring ---

    /// Fill in scores for every unscored move in the list. Captures are
    /// always scored; quiets only when `with_quiets` is set.
    pub fn score_moves(
        &self,
        state: &GameState,
        list: &mut MoveList,
        with_quiets: bool,
        cont_keys: &[Option<ContKey>; 6],
        prev_move: Option<Move>,
    ) {
        let color = state.side_to_move;
        let enemy = 1 - color;

        let mut attacked_by_pawns = Bitboard(0);
        let mut attacked_by_minors = Bitboard(0);
        let mut attacked_by_rooks = Bitboard(0);

        if with_quiets {
            let occupied = state.occupancies[crate::state::BOTH];
            let enemy_base = if enemy == WHITE { P } else { crate::state::p };
            attacked_by_pawns = bitboard::pawn_attacks(state.bitboards[enemy_base], enemy);

            let own_rooks_or_queens =
                state.bitboards[if color == WHITE { R } else { r }].0
                    | state.bitboards[if color == WHITE { Q } else { q }].0;
            if own_rooks_or_queens != 0 {
                attacked_by_minors = attacked_by_pawns;
                let mut knights = state.bitboards[enemy_base + N];
                while knights.0 != 0 {
                    let sq = knights.get_lsb_index() as u8;
                    knights.pop_bit(sq);
                    attacked_by_minors =
                        attacked_by_minors | movegen::get_knight_attacks(sq);
                }
                let mut bishops = state.bitboards[enemy_base + B];
                while bishops.0 != 0 {
                    let sq = bishops.get_lsb_index() as u8;
                    bishops.pop_bit(sq);
                    attacked_by_minors =
                        attacked_by_minors | bitboard::get_bishop_attacks(sq, occupied);
                }
            }

            if state.bitboards[if color == WHITE { Q } else { q }].0 != 0 {
                attacked_by_rooks = attacked_by_minors;
                let mut rooks = state.bitboards[enemy_base + R];
                while rooks.0 != 0 {
                    let sq = rooks.get_lsb_index() as u8;
                    rooks.pop_bit(sq);
                    attacked_by_rooks =
                        attacked_by_rooks | bitboard::get_rook_attacks(sq, occupied);
                }
            }
        }

        for i in 0..list.count {
            if list.scores[i] != UNSCORED {
                continue;
            }
            let mv = list.moves[i];
            let piece = state.piece_on(mv.from()) % 6;
            let from = mv.from();
            let to = mv.to();
            let mut score = 0;

            if mv.is_capture() {
                let victim = state.captured_piece(mv);
                debug_assert!(victim != NO_PIECE && victim < K);

                score = if piece < victim {
                    WINNING_CAPTURE_VALUE
                } else if piece == victim || state.see(mv) >= 0 {
                    GOOD_CAPTURE_VALUE
                } else {
                    LOSING_CAPTURE_VALUE
                };

                // most valuable victim first
                score += 6 * (victim as i32 + 1) * 512;
                // capture history, shifted into a small positive range
                score += (self.capture_history(color, piece, victim, to as usize) + HISTORY_MAX)
                    / 128;

                if let Some(pm) = prev_move {
                    if pm.to() == to {
                        score += RECAPTURE_BONUS;
                    }
                }
            } else if with_quiets {
                score += self.quiet_history(color, from as usize, to as usize);
                for offset in [0usize, 1, 3, 5] {
                    if let Some(key) = cont_keys[offset] {
                        score += self.continuation(key, piece, to as usize);
                    }
                }

                match piece {
                    P => {
                        let rel_rank = if color == WHITE { to / 8 } else { 7 - to / 8 };
                        score += PAWN_PUSH_BONUS[rel_rank as usize];

                        // pushed pawn protected by one of ours creates real threats
                        let own_pawns = state.bitboards[if color == WHITE { P } else { crate::state::p }];
                        let to_bb = Bitboard(1u64 << to);
                        if (bitboard::pawn_attacks(to_bb, enemy) & own_pawns).0 != 0 {
                            let threats = bitboard::pawn_attacks(to_bb, color);
                            let them_base = if enemy == WHITE { P } else { crate::state::p };
                            if (threats & state.bitboards[them_base + K]).0 != 0 {
                                score += 10000;
                            } else if (threats & state.bitboards[them_base + P]).0 != 0 {
                                score += 1000;
                            } else if (threats & state.bitboards[them_base + Q]).0 != 0 {
                                score += 8000;
                            } else if (threats & state.bitboards[them_base + R]).0 != 0 {
                                score += 6000;
                            } else if (threats & state.bitboards[them_base + B]).0 != 0 {
                                score += 4000;
                            } else if (threats & state.bitboards[them_base + N]).0 != 0 {
                                score += 4000;
                            }
                        }
                    }
                    N | B => {
                        if attacked_by_pawns.get_bit(from) {
                            score += 4000;
                        }
                        if attacked_by_pawns.get_bit(to) {
                            score -= 4000;
                        }
                    }
                    R => {
                        if attacked_by_minors.get_bit(from) {
                            score += 8000;
                        }
                        if attacked_by_minors.get_bit(to) {
                            score -= 8000;
                        }
                    }
                    Q => {
                        if attacked_by_rooks.get_bit(from) {
                            score += 12000;
                        }
                        if attacked_by_rooks.get_bit(to) {
                            score -= 12000;
                        }
                    }
                    _ => {
                        // king walks give up castling
                        let our_rights = if color == WHITE { 3 } else { 12 };
                        if state.castling_rights & our_rights != 0 {
                            score -= 6000;
                        }
                    }
                }
            }

            if mv.promotion() == Some(Q) {
                score += PROMOTION_VALUE;
            }

            list.scores[i] = score;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::KIND_QUIET;

    #[test]
    fn history_counters_stay_bounded() {
        let orderer = MoveOrderer::new();
        let entry = &orderer.quiet_history[0];
        for _ in 0..100 {
            MoveOrderer::bump(entry, 2000);
        }
        assert!(entry.load(Ordering::Relaxed) as i32 <= HISTORY_MAX);
        for _ in 0..300 {
            MoveOrderer::bump(entry, -2000);
        }
        assert!(entry.load(Ordering::Relaxed) as i32 >= -HISTORY_MAX);
    }

    #[test]
    fn killer_insert_shifts() {
        let orderer = MoveOrderer::new();
        let m1 = Move::new(12, 28, KIND_QUIET);
        let m2 = Move::new(6, 21, KIND_QUIET);
        orderer.insert_killer(3, m1);
        orderer.insert_killer(3, m2);
        let killers = orderer.killer_moves(3);
        assert_eq!(killers[0], m2.packed());
        assert_eq!(killers[1], m1.packed());

        // re-inserting the first slot must not duplicate it
        orderer.insert_killer(3, m2);
        let killers = orderer.killer_moves(3);
        assert_eq!(killers[0], m2.packed());
        assert_eq!(killers[1], m1.packed());
    }

    #[test]
    fn new_search_halves_history() {
        let orderer = MoveOrderer::new();
        orderer.quiet_history[100].store(1000, Ordering::Relaxed);
        orderer.new_search();
        assert_eq!(orderer.quiet_history[100].load(Ordering::Relaxed), 500);
    }
}
