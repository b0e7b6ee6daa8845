use crate::bitboard;
use crate::state::{
    b, k, n, p, q, r, GameState, Move, B, K, KIND_CAPTURE, KIND_QUIET, N, P, Q, R, WHITE,
};
use pyrrhic_rs::{EngineAdapter, TableBases};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

pub const TB_WIN_SCORE: i32 = 31000;

#[derive(Clone)]
pub struct EmberAdapter;

impl EngineAdapter for EmberAdapter {
    fn pawn_attacks(side: pyrrhic_rs::Color, pawns: u64) -> u64 {
        let s = match side {
            pyrrhic_rs::Color::White => WHITE,
            pyrrhic_rs::Color::Black => crate::state::BLACK,
        };
        bitboard::pawn_attacks(bitboard::Bitboard(pawns), s).0
    }
    fn knight_attacks(squares: u64) -> u64 {
        let mut attacks = 0;
        let mut bb = squares;
        while bb != 0 {
            let sq = bb.trailing_zeros();
            bb &= !(1u64 << sq);
            attacks |= bitboard::mask_knight_attacks(sq as u8).0;
        }
        attacks
    }
    fn bishop_attacks(squares: u64, occ: u64) -> u64 {
        let mut attacks = 0;
        let mut bb = squares;
        while bb != 0 {
            let sq = bb.trailing_zeros();
            bb &= !(1u64 << sq);
            attacks |= bitboard::get_bishop_attacks(sq as u8, bitboard::Bitboard(occ)).0;
        }
        attacks
    }
    fn rook_attacks(squares: u64, occ: u64) -> u64 {
        let mut attacks = 0;
        let mut bb = squares;
        while bb != 0 {
            let sq = bb.trailing_zeros();
            bb &= !(1u64 << sq);
            attacks |= bitboard::get_rook_attacks(sq as u8, bitboard::Bitboard(occ)).0;
        }
        attacks
    }
    fn queen_attacks(squares: u64, occ: u64) -> u64 {
        let mut attacks = 0;
        let mut bb = squares;
        while bb != 0 {
            let sq = bb.trailing_zeros();
            bb &= !(1u64 << sq);
            attacks |= bitboard::get_queen_attacks(sq as u8, bitboard::Bitboard(occ)).0;
        }
        attacks
    }
    fn king_attacks(squares: u64) -> u64 {
        let mut attacks = 0;
        let mut bb = squares;
        while bb != 0 {
            let sq = bb.trailing_zeros();
            bb &= !(1u64 << sq);
            attacks |= bitboard::mask_king_attacks(sq as u8).0;
        }
        attacks
    }
}

static TABLEBASE: Mutex<Option<TableBases<EmberAdapter>>> = Mutex::new(None);
static TB_ENABLED: AtomicBool = AtomicBool::new(false);

pub fn init_tablebase(path: &str) {
    if path.is_empty() {
        return;
    }
    match TableBases::<EmberAdapter>::new(path) {
        Ok(tb) => {
            if let Ok(mut lock) = TABLEBASE.lock() {
                *lock = Some(tb);
                TB_ENABLED.store(true, Ordering::SeqCst);
                println!("info string Syzygy tablebases found");
                log::info!("Syzygy tablebases loaded from {}", path);
            }
        }
        Err(e) => println!("info string Syzygy init error: {:?}", e),
    }
}

pub fn tb_enabled() -> bool {
    TB_ENABLED.load(Ordering::Relaxed)
}

fn piece_groups(state: &GameState) -> (u64, u64, u64, u64, u64, u64, u64, u64) {
    (
        state.occupancies[WHITE].0,
        state.occupancies[crate::state::BLACK].0,
        state.bitboards[K].0 | state.bitboards[k].0,
        state.bitboards[Q].0 | state.bitboards[q].0,
        state.bitboards[R].0 | state.bitboards[r].0,
        state.bitboards[B].0 | state.bitboards[b].0,
        state.bitboards[N].0 | state.bitboards[n].0,
        state.bitboards[P].0 | state.bitboards[p].0,
    )
}

/// Win/draw/loss probe inside the search. Any failure is "no information".
pub fn probe_wdl(state: &GameState) -> Option<i32> {
    if !tb_enabled() || state.castling_rights != 0 {
        return None;
    }

    let (white, black, kings, queens, rooks, bishops, knights, pawns) = piece_groups(state);
    let rule50 = state.halfmove_clock as u32;
    let turn = state.side_to_move == WHITE;

    let lock = TABLEBASE.lock().ok()?;
    let tb = lock.as_ref()?;
    match tb.probe_wdl(
        white, black, kings, queens, rooks, bishops, knights, pawns, rule50, turn,
    ) {
        Ok(wdl) => {
            use pyrrhic_rs::WdlProbeResult;
            Some(match wdl {
                WdlProbeResult::Win => TB_WIN_SCORE,
                WdlProbeResult::Loss => -TB_WIN_SCORE,
                WdlProbeResult::Draw
                | WdlProbeResult::BlessedLoss
                | WdlProbeResult::CursedWin => 0,
            })
        }
        Err(_) => None,
    }
}

/// Root probe returning the tablebase-best move and a score for it.
pub fn probe_root(state: &GameState) -> Option<(Move, i32)> {
    if !tb_enabled() || state.castling_rights != 0 {
        return None;
    }

    let (white, black, kings, queens, rooks, bishops, knights, pawns) = piece_groups(state);
    let rule50 = state.halfmove_clock as u32;
    let ep = if state.en_passant != crate::state::NO_SQUARE {
        state.en_passant as u32
    } else {
        0
    };
    let turn = state.side_to_move == WHITE;

    let lock = TABLEBASE.lock().ok()?;
    let tb = lock.as_ref()?;
    let res = tb
        .probe_root(
            white, black, kings, queens, rooks, bishops, knights, pawns, rule50, ep, turn,
        )
        .ok()?;

    use pyrrhic_rs::{DtzProbeValue, Piece, WdlProbeResult};
    match res.root {
        DtzProbeValue::Checkmate | DtzProbeValue::Stalemate | DtzProbeValue::Failed => None,
        DtzProbeValue::DtzResult(root_dtz) => {
            let promo = match root_dtz.promotion {
                Piece::Queen => Some(Q),
                Piece::Rook => Some(R),
                Piece::Bishop => Some(B),
                Piece::Knight => Some(N),
                _ => None,
            };

            let from = root_dtz.from_square;
            let to = root_dtz.to_square;
            let is_capture =
                state.occupancies[crate::state::BOTH].get_bit(to) || root_dtz.ep;
            let mv = match promo {
                Some(piece) => Move::promotion_move(from, to, piece, is_capture),
                None => {
                    // re-derive the flag nibble from the board
                    state
                        .move_from_packed(crate::state::PackedMove::new(from, to, 0))
                        .unwrap_or(Move::new(
                            from,
                            to,
                            if is_capture { KIND_CAPTURE } else { KIND_QUIET },
                        ))
                }
            };

            let score = match root_dtz.wdl {
                WdlProbeResult::Win => TB_WIN_SCORE,
                WdlProbeResult::Loss => -TB_WIN_SCORE,
                _ => 0,
            };
            Some((mv, score))
        }
    }
}
