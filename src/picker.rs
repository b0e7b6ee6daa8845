use crate::movegen::{GenMode, MoveGenerator, MoveList};
use crate::ordering::{
    ContKey, MoveOrderer, COUNTER_MOVE_BONUS, KILLER_MOVE_BONUS, PROMOTION_VALUE, PV_MOVE_VALUE,
    TT_MOVE_VALUE,
};
use crate::state::{GameState, Move, Q};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Stage {
    PvMove,
    TtMove,
    GenerateCaptures,
    GoodCaptures,
    Killer1,
    Killer2,
    CounterMove,
    GenerateQuiets,
    PickQuiets,
    BadCaptures,
    End,
}

/// Staged pseudo-legal move generator. Cheap, probably-best moves come out
/// before anything is generated at all; losing captures are held back until
/// after the quiets. The caller is responsible for legality checks and for
/// deciding whether a yielded move is actually searched.
pub struct MovePicker<'a> {
    stage: Stage,
    state: &'a GameState,
    orderer: &'a MoveOrderer,
    cont_keys: &'a [Option<ContKey>; 6],
    prev_move: Option<Move>,
    ply: usize,
    with_quiets: bool,

    pv_move: Option<Move>,
    tt_move: Option<Move>,
    killer_moves: [Option<Move>; 2],
    counter_move: Option<Move>,

    captures: MoveList,
    bad_captures: MoveList,
    quiets: MoveList,
}

impl<'a> MovePicker<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        state: &'a GameState,
        orderer: &'a MoveOrderer,
        pv_move: Option<Move>,
        tt_move: Option<Move>,
        with_quiets: bool,
        ply: usize,
        cont_keys: &'a [Option<ContKey>; 6],
        prev_move: Option<Move>,
    ) -> Self {
        MovePicker {
            stage: Stage::PvMove,
            state,
            orderer,
            cont_keys,
            prev_move,
            ply,
            with_quiets,
            pv_move,
            tt_move,
            killer_moves: [None; 2],
            counter_move: None,
            captures: MoveList::new(),
            bad_captures: MoveList::new(),
            quiets: MoveList::new(),
        }
    }

    fn already_yielded(&self, mv: Move) -> bool {
        Some(mv) == self.pv_move
            || Some(mv) == self.tt_move
            || Some(mv) == self.killer_moves[0]
            || Some(mv) == self.killer_moves[1]
            || Some(mv) == self.counter_move
    }

    pub fn next(&mut self) -> Option<(Move, i32)> {
        loop {
            match self.stage {
                Stage::PvMove => {
                    self.stage = Stage::TtMove;
                    if let Some(mv) = self.pv_move {
                        if !mv.is_quiet() || self.with_quiets {
                            return Some((mv, PV_MOVE_VALUE));
                        }
                    }
                }

                Stage::TtMove => {
                    self.stage = Stage::GenerateCaptures;
                    if let Some(mv) = self.tt_move {
                        if Some(mv) != self.pv_move && (!mv.is_quiet() || self.with_quiets) {
                            return Some((mv, TT_MOVE_VALUE));
                        }
                    }
                }

                Stage::GenerateCaptures => {
                    let mut gen = MoveGenerator::new();
                    gen.generate_moves(self.state, GenMode::Tactical);
                    self.captures = gen.list;
                    if let Some(mv) = self.pv_move {
                        self.captures.remove(mv);
                    }
                    if let Some(mv) = self.tt_move {
                        self.captures.remove(mv);
                    }
                    self.orderer.score_moves(
                        self.state,
                        &mut self.captures,
                        false,
                        self.cont_keys,
                        self.prev_move,
                    );
                    self.stage = Stage::GoodCaptures;
                }

                Stage::GoodCaptures => {
                    if let Some((mv, score)) = self.captures.pick_best() {
                        if score >= PROMOTION_VALUE {
                            return Some((mv, score));
                        }
                        // losing capture: hold it back until the quiets ran
                        self.bad_captures.push(mv);
                        self.bad_captures.scores[self.bad_captures.count - 1] = score;
                        continue;
                    }
                    if !self.with_quiets {
                        self.stage = Stage::End;
                        return None;
                    }
                    self.stage = Stage::Killer1;
                }

                Stage::Killer1 => {
                    self.stage = Stage::Killer2;
                    let packed = self.orderer.killer_moves(self.ply)[0];
                    if let Some(mv) = self.state.move_from_packed(packed) {
                        if mv.is_quiet() && !self.already_yielded(mv) {
                            self.killer_moves[0] = Some(mv);
                            return Some((mv, KILLER_MOVE_BONUS));
                        }
                    }
                }

                Stage::Killer2 => {
                    self.stage = Stage::CounterMove;
                    let packed = self.orderer.killer_moves(self.ply)[1];
                    if let Some(mv) = self.state.move_from_packed(packed) {
                        if mv.is_quiet() && !self.already_yielded(mv) {
                            self.killer_moves[1] = Some(mv);
                            return Some((mv, KILLER_MOVE_BONUS - 1));
                        }
                    }
                }

                Stage::CounterMove => {
                    self.stage = Stage::GenerateQuiets;
                    if let Some(prev) = self.prev_move {
                        let prev_piece = self.state.piece_on(prev.to()) % 6;
                        let packed = self.orderer.counter_move(
                            self.state.side_to_move,
                            prev_piece,
                            prev.to() as usize,
                        );
                        if let Some(mv) = self.state.move_from_packed(packed) {
                            if mv.is_quiet() && !self.already_yielded(mv) {
                                self.counter_move = Some(mv);
                                return Some((mv, COUNTER_MOVE_BONUS));
                            }
                        }
                    }
                }

                Stage::GenerateQuiets => {
                    let mut gen = MoveGenerator::new();
                    gen.generate_moves(self.state, GenMode::All);
                    for i in 0..gen.list.count {
                        let mv = gen.list.moves[i];
                        // the tactical stage covered plain captures and
                        // queen promotions; under-promotions stay here
                        if mv.promotion() == Some(Q)
                            || (mv.is_capture() && mv.promotion().is_none())
                        {
                            continue;
                        }
                        if self.already_yielded(mv) {
                            continue;
                        }
                        self.quiets.push(mv);
                    }
                    self.orderer.score_moves(
                        self.state,
                        &mut self.quiets,
                        true,
                        self.cont_keys,
                        self.prev_move,
                    );
                    self.stage = Stage::PickQuiets;
                }

                Stage::PickQuiets => {
                    if let Some(pick) = self.quiets.pick_best() {
                        return Some(pick);
                    }
                    self.stage = Stage::BadCaptures;
                }

                Stage::BadCaptures => {
                    if let Some(pick) = self.bad_captures.pick_best() {
                        return Some(pick);
                    }
                    self.stage = Stage::End;
                }

                Stage::End => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ordering::MoveOrderer;
    use crate::state::{GameState, START_FEN};

    fn init() {
        crate::zobrist::init_zobrist();
        crate::bitboard::init_attack_tables();
        crate::movegen::init_move_tables();
    }

    #[test]
    fn yields_each_move_once() {
        init();
        let state =
            GameState::from_fen("r1bqkb1r/pppp1ppp/2n2n2/4p3/2B1P3/5N2/PPPP1PPP/RNBQK2R w KQkq - 0 1")
                .unwrap();
        let orderer = MoveOrderer::new();
        let cont_keys = [None; 6];

        let mut gen = MoveGenerator::new();
        gen.generate_moves(&state, GenMode::All);
        let total = gen.list.count;

        let mut picker =
            MovePicker::new(&state, &orderer, None, None, true, 0, &cont_keys, None);
        let mut seen = Vec::new();
        while let Some((mv, _)) = picker.next() {
            assert!(!seen.contains(&mv), "duplicate move {:?}", mv);
            seen.push(mv);
        }
        assert_eq!(seen.len(), total);
    }

    #[test]
    fn tt_move_comes_first_and_is_not_repeated() {
        init();
        let state = GameState::from_fen(START_FEN).unwrap();
        let orderer = MoveOrderer::new();
        let cont_keys = [None; 6];

        let mut gen = MoveGenerator::new();
        gen.generate_moves(&state, GenMode::All);
        let tt_move = gen.list.moves[5];

        let mut picker =
            MovePicker::new(&state, &orderer, None, Some(tt_move), true, 0, &cont_keys, None);
        let (first, score) = picker.next().unwrap();
        assert_eq!(first, tt_move);
        assert_eq!(score, TT_MOVE_VALUE);

        let mut count = 1;
        while let Some((mv, _)) = picker.next() {
            assert_ne!(mv, tt_move);
            count += 1;
        }
        assert_eq!(count, gen.list.count);
    }

    #[test]
    fn tactical_only_skips_quiets() {
        init();
        let state =
            GameState::from_fen("rnbqkbnr/ppp1pppp/8/3p4/4P3/8/PPPP1PPP/RNBQKBNR w KQkq - 0 2")
                .unwrap();
        let orderer = MoveOrderer::new();
        let cont_keys = [None; 6];
        let mut picker =
            MovePicker::new(&state, &orderer, None, None, false, 0, &cont_keys, None);
        while let Some((mv, _)) = picker.next() {
            assert!(!mv.is_quiet());
        }
    }
}
