use crate::state::{GameState, Move};
use std::collections::HashMap;

/// Moves played on the board so far, plus a hash multiset used for
/// three-fold detection across the game/search boundary.
#[derive(Clone, Default)]
pub struct Game {
    moves: Vec<Move>,
    repetitions: HashMap<u64, u32>,
}

impl Game {
    pub fn new() -> Self {
        Game {
            moves: Vec::new(),
            repetitions: HashMap::new(),
        }
    }

    pub fn clear(&mut self) {
        self.moves.clear();
        self.repetitions.clear();
    }

    /// Record a reached position. Called for the initial position and after
    /// every played move.
    pub fn record_position(&mut self, state: &GameState) {
        *self.repetitions.entry(state.hash).or_insert(0) += 1;
    }

    pub fn record_move(&mut self, mv: Move) {
        self.moves.push(mv);
    }

    /// How many times this position has occurred in the played game.
    pub fn repetition_count(&self, hash: u64) -> u32 {
        self.repetitions.get(&hash).copied().unwrap_or(0)
    }

    pub fn last_move(&self) -> Option<Move> {
        self.moves.last().copied()
    }

    pub fn moves(&self) -> &[Move] {
        &self.moves
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::START_FEN;

    #[test]
    fn repetition_counting() {
        crate::zobrist::init_zobrist();
        let state = GameState::from_fen(START_FEN).unwrap();
        let mut game = Game::new();
        assert_eq!(game.repetition_count(state.hash), 0);
        game.record_position(&state);
        game.record_position(&state);
        assert_eq!(game.repetition_count(state.hash), 2);
        game.clear();
        assert_eq!(game.repetition_count(state.hash), 0);
    }
}
