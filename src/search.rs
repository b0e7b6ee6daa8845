// src/search.rs
use crate::eval::Evaluator;
use crate::game::Game;
use crate::movegen::{self, GenMode, MoveGenerator};
use crate::nnue::EvalContext;
use crate::ordering::{ContKey, MoveOrderer};
use crate::parameters::SearchParameters;
use crate::picker::MovePicker;
use crate::repetition;
use crate::state::{format_move_uci, GameState, Move, PackedMove, NO_PIECE};
use crate::syzygy;
use crate::time::TimeManager;
use crate::tt::{score_from_tt, score_to_tt, Bound, TranspositionTable};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

pub const MAX_SEARCH_DEPTH: usize = 256;
pub const STACK_SIZE: usize = MAX_SEARCH_DEPTH + 8;

pub const INFINITY: i32 = 32767;
pub const CHECKMATE: i32 = 32000;
pub const DRAW_SCORE: i32 = 0;
/// Anything at or above this is a forced mate somewhere inside the tree.
pub const MATE_IN_MAX: i32 = CHECKMATE - MAX_SEARCH_DEPTH as i32;

/// Static-eval slot value for "position was in check, no eval computed".
pub const EVAL_NONE: i16 = i16::MIN;

const STOP_CHECK_INTERVAL: u64 = 2048;

#[derive(Clone, Copy)]
pub enum Limits {
    Infinite,
    FixedDepth(i32),
    FixedNodes(u64),
    FixedTime(TimeManager),
}

#[derive(Clone, Default)]
pub struct SearchOptions {
    pub multi_pv: usize,
    pub search_moves: Vec<Move>,
    pub ponder: bool,
}

#[derive(Clone, Default)]
pub struct PvLine {
    pub score: i32,
    pub moves: Vec<Move>,
}

#[derive(Default)]
pub struct SearchResult {
    pub lines: Vec<PvLine>,
    pub best_move: Option<Move>,
    pub ponder_move: Option<Move>,
    pub nodes: u64,
}

/// One frame of the pre-sized search stack, indexed by height. Parent data
/// is plain index arithmetic instead of pointer chasing.
#[derive(Clone, Copy)]
pub struct StackEntry {
    pub hash: u64,
    pub static_eval: i32,
    /// Move that led into this node; NULL at the root and after null moves.
    pub prev_move: Move,
    /// Piece type (0..6) that played `prev_move`.
    pub prev_piece: usize,
    pub is_null: bool,
    pub in_check: bool,
    pub excluded: Option<Move>,
    pub cont_keys: [Option<ContKey>; 6],
}

impl Default for StackEntry {
    fn default() -> Self {
        StackEntry {
            hash: 0,
            static_eval: 0,
            prev_move: Move::NULL,
            prev_piece: 0,
            is_null: false,
            in_check: false,
            excluded: None,
            cont_keys: [None; 6],
        }
    }
}

/// Triangular PV array: row `ply` holds the variation proven best at that
/// height.
struct PvTable {
    moves: Vec<PackedMove>,
    lens: [usize; STACK_SIZE],
}

impl PvTable {
    fn new() -> Self {
        PvTable {
            moves: vec![PackedMove::NULL; STACK_SIZE * STACK_SIZE],
            lens: [0; STACK_SIZE],
        }
    }

    #[inline(always)]
    fn clear_ply(&mut self, ply: usize) {
        self.lens[ply] = ply;
    }

    fn update(&mut self, ply: usize, mv: Move) {
        self.moves[ply * STACK_SIZE + ply] = mv.packed();
        let child_len = self.lens[ply + 1];
        for i in (ply + 1)..child_len {
            self.moves[ply * STACK_SIZE + i] = self.moves[(ply + 1) * STACK_SIZE + i];
        }
        self.lens[ply] = child_len.max(ply + 1);
    }
}

pub fn legal_moves(state: &GameState) -> Vec<Move> {
    let mut gen = MoveGenerator::new();
    gen.generate_moves(state, GenMode::All);
    (0..gen.list.count)
        .map(|i| gen.list.moves[i])
        .filter(|&mv| movegen::is_legal(state, mv))
        .collect()
}

pub struct Searcher<'a> {
    pub tt: &'a TranspositionTable,
    pub orderer: &'a MoveOrderer,
    pub params: &'a SearchParameters,
    pub evaluator: &'a dyn Evaluator,
    pub game: &'a Game,
    pub stop_signal: Arc<AtomicBool>,
    pub main_thread: bool,

    limits: Limits,
    nodes: u64,
    seldepth: usize,
    stopped: bool,
    stack: Vec<StackEntry>,
    pv: PvTable,
    eval_ctx: EvalContext,
    root_filter: Vec<Move>,
    exclude_root: Vec<Move>,
    prev_pv_lines: Vec<PvLine>,
    current_pv_index: usize,
    start_time: Instant,
}

impl<'a> Searcher<'a> {
    pub fn new(
        tt: &'a TranspositionTable,
        orderer: &'a MoveOrderer,
        params: &'a SearchParameters,
        evaluator: &'a dyn Evaluator,
        game: &'a Game,
        stop_signal: Arc<AtomicBool>,
        main_thread: bool,
    ) -> Self {
        Searcher {
            tt,
            orderer,
            params,
            evaluator,
            game,
            stop_signal,
            main_thread,
            limits: Limits::Infinite,
            nodes: 0,
            seldepth: 0,
            stopped: false,
            stack: vec![StackEntry::default(); STACK_SIZE],
            pv: PvTable::new(),
            eval_ctx: EvalContext::new(),
            root_filter: Vec::new(),
            exclude_root: Vec::new(),
            prev_pv_lines: Vec::new(),
            current_pv_index: 0,
            start_time: Instant::now(),
        }
    }

    pub fn nodes(&self) -> u64 {
        self.nodes
    }

    // --- iterative deepening driver ---

    pub fn search(
        &mut self,
        root: &GameState,
        limits: Limits,
        options: &SearchOptions,
    ) -> SearchResult {
        self.limits = limits;
        self.nodes = 0;
        self.stopped = false;
        self.start_time = Instant::now();
        self.prev_pv_lines.clear();
        self.eval_ctx.reset(root);

        let mut result = SearchResult::default();

        let mut root_moves = legal_moves(root);
        if !options.search_moves.is_empty() {
            root_moves.retain(|mv| options.search_moves.contains(mv));
        }
        self.root_filter = root_moves.clone();
        if root_moves.is_empty() {
            return result;
        }

        // decisive tablebase hit at the root: play it without searching
        if self.main_thread {
            if let Some((tb_move, tb_score)) = syzygy::probe_root(root) {
                if root_moves.contains(&tb_move) {
                    println!(
                        "info depth 1 seldepth 1 time 0 score {} nodes 0 nps 0 hashfull {} pv {}",
                        format_score(tb_score),
                        self.tt.hashfull(),
                        format_move_uci(tb_move)
                    );
                    result.lines = vec![PvLine {
                        score: tb_score,
                        moves: vec![tb_move],
                    }];
                    result.best_move = Some(tb_move);
                    return result;
                }
            }
        }

        // a completed threefold is a draw no matter what the tree says; the
        // recursion skips draw checks at the root, so it is owned here
        let root_is_repetition_draw = self.game.repetition_count(root.hash) >= 3;

        // seed the root frame with the last played move for ordering
        self.stack[0] = StackEntry::default();
        if let Some(prev) = self.game.last_move() {
            let piece = root.piece_on(prev.to());
            if piece != NO_PIECE {
                self.stack[0].prev_move = prev;
                self.stack[0].prev_piece = piece % 6;
            }
        }

        let num_pv = options.multi_pv.max(1).min(root_moves.len());
        result.lines = vec![PvLine::default(); num_pv];

        let max_depth = match self.limits {
            Limits::FixedDepth(d) => d.clamp(1, MAX_SEARCH_DEPTH as i32 - 1),
            _ => MAX_SEARCH_DEPTH as i32 - 1,
        };

        let mut best_move_stability = 0u32;
        let mut previous_best: Option<Move> = None;

        for depth in 1..=max_depth {
            self.seldepth = 0;
            self.exclude_root.clear();

            for pv_index in 0..num_pv {
                self.current_pv_index = pv_index;
                let prev_score = if self.prev_pv_lines.is_empty() {
                    result.lines[pv_index].score
                } else {
                    self.prev_pv_lines
                        .get(pv_index)
                        .map(|l| l.score)
                        .unwrap_or(0)
                };

                let mut score = self.aspiration_search(root, depth, prev_score);
                if self.stopped {
                    break;
                }
                if root_is_repetition_draw {
                    score = DRAW_SCORE;
                }

                let line = self.extract_pv(root);
                if let Some(&first) = line.first() {
                    self.exclude_root.push(first);
                }
                result.lines[pv_index] = PvLine { score, moves: line };

                if self.main_thread {
                    self.print_info(depth, pv_index, num_pv, &result.lines[pv_index]);
                }
            }

            if self.stopped {
                break;
            }
            self.prev_pv_lines = result.lines.clone();

            // soft time management with best-move stability scaling
            if let Limits::FixedTime(ref mut tm) = self.limits {
                if self.main_thread {
                    if depth > 4 {
                        let current_best = result.lines[0].moves.first().copied();
                        if current_best == previous_best {
                            best_move_stability += 1;
                        } else {
                            best_move_stability = 0;
                        }
                        previous_best = current_best;

                        let factor = match best_move_stability {
                            0 => 2.50,
                            1 => 1.20,
                            2 => 0.90,
                            3 => 0.80,
                            _ => 0.75,
                        };
                        tm.set_stability_factor(factor);
                    }
                    if tm.check_soft_limit() {
                        self.stopped = true;
                        self.stop_signal.store(true, Ordering::Relaxed);
                        break;
                    }
                }
            }
        }

        result.nodes = self.nodes;
        result.best_move = result.lines.first().and_then(|l| l.moves.first().copied());
        result.ponder_move = result.lines.first().and_then(|l| l.moves.get(1).copied());

        // after a very early abort fall back to any legal move
        if result.best_move.is_none() {
            result.best_move = root_moves.first().copied();
        }
        result
    }

    fn aspiration_search(&mut self, root: &GameState, depth: i32, prev_score: i32) -> i32 {
        let params = self.params;
        let mut window = (params.aspiration_window_max
            - (depth - params.aspiration_start_depth) * params.aspiration_window_step)
            .max(params.aspiration_window_min);

        let (mut alpha, mut beta) = if depth >= params.aspiration_start_depth {
            (
                (prev_score - window).max(-INFINITY),
                (prev_score + window).min(INFINITY),
            )
        } else {
            (-INFINITY, INFINITY)
        };

        loop {
            let score = self.negamax(root, depth, alpha, beta, 0, true);
            if self.stopped {
                return score;
            }
            if score <= alpha || score >= beta {
                alpha = (alpha - window).max(-INFINITY);
                beta = (beta + window).min(INFINITY);
                window = window.saturating_mul(2);
                continue;
            }
            return score;
        }
    }

    fn extract_pv(&self, root: &GameState) -> Vec<Move> {
        let mut line = Vec::new();
        let mut position = *root;
        for i in 0..self.pv.lens[0] {
            let packed = self.pv.moves[i];
            // a packed move may be garbage after a hash collision; walking a
            // fresh position copy catches that
            let mv = match position.move_from_packed(packed) {
                Some(mv) => mv,
                None => break,
            };
            if !movegen::is_legal(&position, mv) {
                break;
            }
            position = position.make_move(mv);
            line.push(mv);
        }
        line
    }

    fn print_info(&self, depth: i32, pv_index: usize, num_pv: usize, line: &PvLine) {
        let elapsed = self.start_time.elapsed();
        let ms = elapsed.as_millis();
        let nps = if elapsed.as_secs_f64() > 0.0 {
            (self.nodes as f64 / elapsed.as_secs_f64()) as u64
        } else {
            0
        };
        let multipv = if num_pv > 1 {
            format!(" multipv {}", pv_index + 1)
        } else {
            String::new()
        };
        let pv: Vec<String> = line.moves.iter().map(|&mv| format_move_uci(mv)).collect();
        println!(
            "info depth {} seldepth {}{} time {} score {} nodes {} nps {} hashfull {} pv {}",
            depth,
            self.seldepth,
            multipv,
            ms,
            format_score(line.score),
            self.nodes,
            nps,
            self.tt.hashfull(),
            pv.join(" ")
        );
    }

    // --- limits ---

    #[inline(always)]
    fn check_limits(&mut self) {
        if self.stop_signal.load(Ordering::Relaxed) {
            self.stopped = true;
            return;
        }
        match &self.limits {
            Limits::FixedNodes(limit) => {
                if self.nodes >= *limit {
                    self.stopped = true;
                    self.stop_signal.store(true, Ordering::Relaxed);
                }
            }
            Limits::FixedTime(tm) => {
                if self.main_thread && tm.check_hard_limit() {
                    self.stopped = true;
                    self.stop_signal.store(true, Ordering::Relaxed);
                }
            }
            Limits::FixedDepth(_) | Limits::Infinite => {}
        }
    }

    /// Slightly randomized draw score; keeps repeated positions from looking
    /// all identical to the search.
    #[inline(always)]
    fn draw_score(&self) -> i32 {
        DRAW_SCORE + (self.nodes & 2) as i32 - 1
    }

    fn build_cont_keys(&self, ply: usize, color: usize) -> [Option<ContKey>; 6] {
        let mut keys = [None; 6];
        for (i, key) in keys.iter_mut().enumerate() {
            if ply <= i {
                break;
            }
            let entry = &self.stack[ply - i];
            if entry.is_null {
                break;
            }
            if entry.prev_move.is_null() {
                break;
            }
            *key = Some(self.orderer.cont_key(
                i,
                color,
                entry.prev_piece,
                entry.prev_move.to() as usize,
            ));
        }
        keys
    }

    /// The previous iteration's PV move for this height, as a first-guess
    /// for PV nodes.
    fn prev_pv_move(&self, state: &GameState, ply: usize) -> Option<Move> {
        let line = self.prev_pv_lines.get(self.current_pv_index)?;
        let mv = *line.moves.get(ply)?;
        state.move_from_packed(mv.packed())
    }

    // --- negamax (fail-soft PVS) ---

    #[allow(clippy::too_many_arguments)]
    fn negamax(
        &mut self,
        state: &GameState,
        depth: i32,
        mut alpha: i32,
        mut beta: i32,
        ply: usize,
        is_pv: bool,
    ) -> i32 {
        debug_assert!(alpha < beta);
        let is_root = ply == 0;
        self.pv.clear_ply(ply);

        // 1. draws; the root always needs a move reported
        if !is_root {
            if state.halfmove_clock >= 100 || state.is_insufficient_material() {
                return DRAW_SCORE;
            }
            if repetition::is_repetition(&self.stack, ply, state, self.game) {
                return self.draw_score();
            }
            if alpha < DRAW_SCORE && repetition::can_reach_game_cycle(&self.stack, ply, state) {
                alpha = self.draw_score();
                if alpha >= beta {
                    return alpha;
                }
            }

            // 2. mate-distance pruning
            alpha = alpha.max(-CHECKMATE + ply as i32);
            beta = beta.min(CHECKMATE - ply as i32 - 1);
            if alpha >= beta {
                return alpha;
            }
        }

        // 3. horizon: drop into quiescence
        if depth <= 0 || ply >= MAX_SEARCH_DEPTH {
            return self.quiescence(state, alpha, beta, ply);
        }

        self.nodes += 1;
        if self.nodes % STOP_CHECK_INTERVAL == 0 {
            self.check_limits();
        }
        if self.stopped {
            return 0;
        }
        self.seldepth = self.seldepth.max(ply);

        let in_check = movegen::is_in_check(state);
        let color = state.side_to_move;
        let excluded = self.stack[ply].excluded;

        self.stack[ply].hash = state.hash;
        self.stack[ply].in_check = in_check;

        // 4. transposition table
        let mut tt_move: Option<Move> = None;
        let mut tt_hit: Option<(i32, i32, Bound, i16)> = None;
        if excluded.is_none() {
            if let Some(entry) = self.tt.probe(state.hash) {
                tt_move = state.move_from_packed(entry.best_move);
                let tt_score = score_from_tt(entry.score, ply, state.halfmove_clock);
                tt_hit = Some((tt_score, entry.depth as i32, entry.bound, entry.static_eval));

                if !is_pv && entry.depth as i32 >= depth {
                    let cutoff = match entry.bound {
                        Bound::Exact => true,
                        Bound::Lower => tt_score >= beta,
                        Bound::Upper => tt_score <= alpha,
                    };
                    if cutoff {
                        return tt_score;
                    }
                }
            }
        }

        // endgame tablebases; a failed probe is just "no information"
        if !is_root
            && excluded.is_none()
            && state.castling_rights == 0
            && state.occupancies[crate::state::BOTH].count_bits() <= 6
        {
            if let Some(wdl) = syzygy::probe_wdl(state) {
                return wdl;
            }
        }

        // 5. static eval, preferring a stored one
        let static_eval = if in_check {
            -INFINITY
        } else {
            match tt_hit {
                Some((_, _, _, stored)) if stored != EVAL_NONE => stored as i32,
                _ => self.evaluator.evaluate(state, &mut self.eval_ctx, ply),
            }
        };
        self.stack[ply].static_eval = static_eval;

        let improving = !in_check && ply >= 2 && static_eval >= self.stack[ply - 2].static_eval;

        let cont_keys = self.build_cont_keys(ply, color);
        self.stack[ply].cont_keys = cont_keys;

        let params = self.params;

        if !is_pv && !in_check && excluded.is_none() {
            // 6. reverse futility: eval is so far above beta that a
            // shallow search will not bring it back
            if depth <= params.beta_pruning_depth
                && static_eval - (params.beta_margin_bias + params.beta_margin_multiplier * depth)
                    >= beta
            {
                return static_eval;
            }

            // 7. razoring
            if depth <= params.alpha_pruning_depth
                && static_eval
                    + (params.alpha_margin_bias + params.alpha_margin_multiplier * depth)
                    <= alpha
            {
                return static_eval;
            }

            // 8. null move: hand over the move and still expect to hold beta.
            // Needs real material on the board, zugzwang breaks the logic.
            if depth >= 3
                && !self.stack[ply].is_null
                && static_eval >= beta
                && state.has_non_pawn_material(color)
            {
                let reduction = params.nmp_base + depth / params.nmp_divisor;
                let null_state = state.make_null_move();

                self.stack[ply + 1] = StackEntry {
                    prev_move: Move::NULL,
                    prev_piece: 0,
                    is_null: true,
                    ..StackEntry::default()
                };
                self.eval_ctx.push_null(ply + 1);
                self.tt.prefetch(null_state.hash);

                let score = -self.negamax(
                    &null_state,
                    depth - reduction,
                    -beta,
                    -beta + 1,
                    ply + 1,
                    false,
                );
                if self.stopped {
                    return 0;
                }
                if score >= beta && score < MATE_IN_MAX {
                    return beta;
                }
            }
        }

        // singular extension probe: is the TT move the only good answer?
        let mut singular_extension = 0;
        if !is_root && depth >= params.singular_depth && excluded.is_none() {
            if let (Some(tm), Some((tt_score, tt_depth, tt_bound, _))) = (tt_move, tt_hit) {
                if tt_depth >= depth - 3
                    && tt_bound != Bound::Upper
                    && tt_score.abs() < MATE_IN_MAX
                {
                    let singular_beta = tt_score - params.singular_margin_per_depth * depth;
                    self.stack[ply].excluded = Some(tm);
                    let score = self.negamax(
                        state,
                        (depth - 1) / 2,
                        singular_beta - 1,
                        singular_beta,
                        ply,
                        false,
                    );
                    self.stack[ply].excluded = None;
                    self.stack[ply].hash = state.hash;
                    self.stack[ply].in_check = in_check;
                    self.stack[ply].static_eval = static_eval;
                    self.stack[ply].cont_keys = cont_keys;
                    if self.stopped {
                        return 0;
                    }

                    if score < singular_beta {
                        singular_extension = 1;
                        if !is_pv && score < singular_beta - params.singular_double_margin {
                            singular_extension = 2;
                        }
                    } else if singular_beta >= beta {
                        // multi-cut: even without the TT move we beat beta
                        return singular_beta;
                    }
                }
            }
        }

        // 9. move loop
        let pv_move = if is_pv {
            self.prev_pv_move(state, ply)
        } else {
            None
        };
        let prev_move = if self.stack[ply].is_null || self.stack[ply].prev_move.is_null() {
            None
        } else {
            Some(self.stack[ply].prev_move)
        };

        let orderer = self.orderer;
        let mut picker = MovePicker::new(
            state, orderer, pv_move, tt_move, true, ply, &cont_keys, prev_move,
        );

        let original_alpha = alpha;
        let mut best_score = -INFINITY;
        let mut best_move: Option<Move> = None;
        let mut moves_searched = 0usize;
        let mut quiets_checked = 0usize;
        let mut skip_quiets = false;

        let mut tried_quiets = [Move::NULL; 64];
        let mut num_tried_quiets = 0usize;
        let mut tried_captures = [Move::NULL; 32];
        let mut num_tried_captures = 0usize;

        while let Some((mv, _move_score)) = picker.next() {
            if Some(mv) == excluded {
                continue;
            }
            if is_root {
                if !self.root_filter.contains(&mv) {
                    continue;
                }
                if self.exclude_root.contains(&mv) {
                    continue;
                }
            }

            let is_quiet = mv.is_quiet();
            if skip_quiets && is_quiet {
                continue;
            }

            if !is_pv && !in_check && is_quiet && best_score > -INFINITY {
                // late-move pruning: beyond this many quiets, the rest
                // almost never matter at shallow depth
                if (depth as usize) < params.lmp_table.len()
                    && quiets_checked >= params.lmp_table[depth as usize]
                {
                    skip_quiets = true;
                    continue;
                }

                // futility: a quiet move will not lift a hopeless eval
                if depth <= params.futility_depth
                    && static_eval + params.futility_margin * depth <= alpha
                {
                    quiets_checked += 1;
                    continue;
                }
            }

            let next = state.make_move(mv);
            if movegen::is_check(&next, color) {
                continue;
            }

            self.tt.prefetch(next.hash);
            moves_searched += 1;
            if is_quiet {
                quiets_checked += 1;
                if num_tried_quiets < tried_quiets.len() {
                    tried_quiets[num_tried_quiets] = mv;
                    num_tried_quiets += 1;
                }
            } else if mv.is_capture() && num_tried_captures < tried_captures.len() {
                tried_captures[num_tried_captures] = mv;
                num_tried_captures += 1;
            }

            let gives_check = movegen::gives_check(state, mv);

            let mut extension = 0;
            if gives_check {
                extension = 1;
            }
            if singular_extension > 0 && Some(mv) == tt_move {
                extension = extension.max(singular_extension);
            }

            let child = ply + 1;
            self.stack[child].prev_move = mv;
            self.stack[child].prev_piece = state.piece_on(mv.from()) % 6;
            self.stack[child].is_null = false;
            self.stack[child].excluded = None;
            self.eval_ctx.push(child, state, mv);

            let new_depth = depth + extension - 1;

            let mut score;
            if moves_searched == 1 {
                score = -self.negamax(&next, new_depth, -beta, -alpha, child, is_pv);
            } else {
                // late-move reduction for quiet non-checking non-killer moves
                let mut reduction = 0;
                if depth >= 3 && is_quiet && !gives_check && !in_check {
                    let killers = orderer.killer_moves(ply);
                    let packed = mv.packed();
                    if packed != killers[0] && packed != killers[1] {
                        let d_idx = (depth as usize).min(63);
                        let m_idx = moves_searched.min(63);
                        let mut r = params.lmr_table[d_idx][m_idx] as i32;
                        r -= self.orderer.quiet_history(
                            color,
                            mv.from() as usize,
                            mv.to() as usize,
                        ) / 8192;
                        if is_pv {
                            r -= 1;
                        }
                        if !improving {
                            r += 1;
                        }
                        reduction = r.max(0).min((new_depth - 1).max(0));
                    }
                }

                // zero-width probe, possibly reduced
                score =
                    -self.negamax(&next, new_depth - reduction, -alpha - 1, -alpha, child, false);

                if score > alpha && reduction > 0 {
                    score = -self.negamax(&next, new_depth, -alpha - 1, -alpha, child, false);
                }
                if score > alpha && score < beta {
                    score = -self.negamax(&next, new_depth, -beta, -alpha, child, true);
                }
            }

            if self.stopped {
                return 0;
            }

            if score > best_score {
                best_score = score;
                best_move = Some(mv);
                if score > alpha {
                    alpha = score;
                    if is_pv {
                        self.pv.update(ply, mv);
                    }
                }
                if alpha >= beta {
                    if is_quiet {
                        self.orderer.insert_killer(ply, mv);
                        if let Some(prev) = prev_move {
                            self.orderer.set_counter_move(
                                color,
                                self.stack[ply].prev_piece,
                                prev.to() as usize,
                                mv,
                            );
                        }
                    }
                    break;
                }
            }
        }

        // 10. checkmate / stalemate / all-excluded
        if moves_searched == 0 {
            if excluded.is_some() {
                return alpha;
            }
            return if in_check {
                -CHECKMATE + ply as i32
            } else {
                DRAW_SCORE
            };
        }

        // 11. ordering feedback on a cutoff or a PV bestmove promotion
        if let Some(bm) = best_move {
            if best_score >= beta || (is_pv && best_score > original_alpha) {
                if bm.is_quiet() {
                    self.orderer.update_quiet_histories(
                        state,
                        depth,
                        &tried_quiets[..num_tried_quiets],
                        bm,
                        &cont_keys,
                    );
                } else if bm.is_capture() {
                    self.orderer.update_capture_histories(
                        state,
                        depth,
                        &tried_captures[..num_tried_captures],
                        bm,
                    );
                }
            }
        }

        // 12. transposition table write
        if excluded.is_none() && !self.stopped {
            let bound = if best_score >= beta {
                Bound::Lower
            } else if best_score > original_alpha {
                Bound::Exact
            } else {
                Bound::Upper
            };
            let stored_eval = if in_check { EVAL_NONE } else { static_eval as i16 };
            self.tt.store(
                state.hash,
                score_to_tt(best_score, ply),
                stored_eval,
                best_move.map(|m| m.packed()).unwrap_or(PackedMove::NULL),
                depth.min(i8::MAX as i32) as i8,
                bound,
            );
        }

        best_score
    }

    // --- quiescence ---

    fn quiescence(&mut self, state: &GameState, mut alpha: i32, beta: i32, ply: usize) -> i32 {
        self.pv.clear_ply(ply);
        self.nodes += 1;
        if self.nodes % STOP_CHECK_INTERVAL == 0 {
            self.check_limits();
        }
        if self.stopped {
            return 0;
        }
        self.seldepth = self.seldepth.max(ply);

        if state.halfmove_clock >= 100 || state.is_insufficient_material() {
            return DRAW_SCORE;
        }
        if repetition::is_repetition(&self.stack, ply, state, self.game) {
            return self.draw_score();
        }

        if ply >= STACK_SIZE - 1 {
            return self.evaluator.evaluate(state, &mut self.eval_ctx, ply);
        }

        let in_check = movegen::is_in_check(state);
        let color = state.side_to_move;
        self.stack[ply].hash = state.hash;
        self.stack[ply].in_check = in_check;

        let mut tt_move: Option<Move> = None;
        let mut tt_eval = EVAL_NONE;
        if let Some(entry) = self.tt.probe(state.hash) {
            tt_move = state.move_from_packed(entry.best_move);
            tt_eval = entry.static_eval;
            let tt_score = score_from_tt(entry.score, ply, state.halfmove_clock);
            let cutoff = match entry.bound {
                Bound::Exact => true,
                Bound::Lower => tt_score >= beta,
                Bound::Upper => tt_score <= alpha,
            };
            if cutoff {
                return tt_score;
            }
        }

        let mut best_score = -INFINITY;
        let static_eval = if in_check {
            -INFINITY
        } else if tt_eval != EVAL_NONE {
            tt_eval as i32
        } else {
            self.evaluator.evaluate(state, &mut self.eval_ctx, ply)
        };
        self.stack[ply].static_eval = static_eval;

        if !in_check {
            // stand pat
            if static_eval >= beta {
                return static_eval;
            }
            if static_eval > alpha {
                alpha = static_eval;
            }
            best_score = static_eval;
        }

        let cont_keys = self.build_cont_keys(ply, color);
        self.stack[ply].cont_keys = cont_keys;
        let prev_move = if self.stack[ply].is_null || self.stack[ply].prev_move.is_null() {
            None
        } else {
            Some(self.stack[ply].prev_move)
        };

        let orderer = self.orderer;
        // in check every evasion is generated, otherwise tactical moves only
        let mut picker = MovePicker::new(
            state, orderer, None, tt_move, in_check, ply, &cont_keys, prev_move,
        );

        let original_alpha = alpha;
        let mut best_move: Option<Move> = None;
        let mut moves_searched = 0usize;

        while let Some((mv, _)) = picker.next() {
            if !in_check && mv.is_capture() {
                // futility: even winning the victim outright cannot reach alpha
                let victim = state.captured_piece(mv);
                if static_eval
                    + crate::state::SEE_VALUES[victim]
                    + self.params.qsearch_futility_margin
                    <= alpha
                {
                    continue;
                }
                if state.see(mv) < 0 {
                    continue;
                }
            }

            let next = state.make_move(mv);
            if movegen::is_check(&next, color) {
                continue;
            }

            self.tt.prefetch(next.hash);
            moves_searched += 1;

            let child = ply + 1;
            self.stack[child].prev_move = mv;
            self.stack[child].prev_piece = state.piece_on(mv.from()) % 6;
            self.stack[child].is_null = false;
            self.stack[child].excluded = None;
            self.eval_ctx.push(child, state, mv);

            let score = -self.quiescence(&next, -beta, -alpha, child);
            if self.stopped {
                return 0;
            }

            if score > best_score {
                best_score = score;
                best_move = Some(mv);
                if score > alpha {
                    alpha = score;
                }
                if alpha >= beta {
                    break;
                }
            }
        }

        if in_check && moves_searched == 0 {
            return -CHECKMATE + ply as i32;
        }

        if !self.stopped {
            let bound = if best_score >= beta {
                Bound::Lower
            } else if best_score > original_alpha {
                Bound::Exact
            } else {
                Bound::Upper
            };
            let stored_eval = if in_check { EVAL_NONE } else { static_eval as i16 };
            self.tt.store(
                state.hash,
                score_to_tt(best_score, ply),
                stored_eval,
                best_move.map(|m| m.packed()).unwrap_or(PackedMove::NULL),
                0,
                bound,
            );
        }

        best_score
    }
}

pub fn format_score(score: i32) -> String {
    if score > MATE_IN_MAX {
        format!("mate {}", (CHECKMATE - score + 1) / 2)
    } else if score < -MATE_IN_MAX {
        format!("mate -{}", (CHECKMATE + score + 1) / 2)
    } else {
        format!("cp {}", score)
    }
}

/// Lazy SMP driver: `num_threads` workers run the same iterative deepening
/// on the shared table and histories; only the main worker reports.
#[allow(clippy::too_many_arguments)]
pub fn run_search(
    root: &GameState,
    game: &Game,
    limits: Limits,
    options: &SearchOptions,
    tt: &TranspositionTable,
    orderer: &MoveOrderer,
    params: &SearchParameters,
    evaluator: &dyn Evaluator,
    stop_signal: Arc<AtomicBool>,
    num_threads: usize,
) -> SearchResult {
    tt.next_generation();
    orderer.new_search();

    let helpers = num_threads.saturating_sub(1);
    if helpers == 0 {
        let mut searcher = Searcher::new(
            tt,
            orderer,
            params,
            evaluator,
            game,
            stop_signal.clone(),
            true,
        );
        let result = searcher.search(root, limits, options);
        stop_signal.store(true, Ordering::Relaxed);
        return result;
    }

    std::thread::scope(|scope| {
        let mut handles = Vec::new();
        for _ in 0..helpers {
            let stop = stop_signal.clone();
            let builder = std::thread::Builder::new().stack_size(32 * 1024 * 1024);
            let handle = builder
                .spawn_scoped(scope, move || {
                    let mut searcher =
                        Searcher::new(tt, orderer, params, evaluator, game, stop, false);
                    searcher.search(root, limits, options);
                })
                .expect("failed to spawn search worker");
            handles.push(handle);
        }

        let mut searcher = Searcher::new(
            tt,
            orderer,
            params,
            evaluator,
            game,
            stop_signal.clone(),
            true,
        );
        let result = searcher.search(root, limits, options);

        // main thread is done: recall the helpers
        stop_signal.store(true, Ordering::Relaxed);
        for handle in handles {
            let _ = handle.join();
        }
        result
    })
}
