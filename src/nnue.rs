// src/nnue.rs
//
// Incrementally updated network evaluation. First-layer accumulators are
// maintained per perspective along the search path; a king move that crosses
// the horizontal mirror boundary forces a refresh, which is served from a
// per-king-bucket cache instead of a from-scratch rebuild.

use crate::bitboard::Bitboard;
use crate::eval::{Evaluator, KNOWN_WIN};
use crate::state::{GameState, Move, BLACK, K, NO_PIECE, P};
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

pub const INPUT_SIZE: usize = 768;
pub const LAYER1_SIZE: usize = 128;
pub const NUM_KING_BUCKETS: usize = 2;

const QA: i32 = 255;
const QB: i32 = 64;
/// 400 / ln(10): converts the network's logistic units to centipawns.
const NN_OUTPUT_TO_CENTIPAWNS: i64 = 174;

pub const NNUE_MAGIC: u32 = 0x5242_4D45; // "EMBR"
pub const NNUE_VERSION: u32 = 1;
const NUM_LAYERS: usize = 3;
const LAYER_SIZES: [u32; NUM_LAYERS] = [INPUT_SIZE as u32, LAYER1_SIZE as u32, 1];
/// Header is padded so the weight blocks start cache-line-aligned.
pub const WEIGHTS_OFFSET: usize = 64;

const NUM_FEATURE_WEIGHTS: usize = INPUT_SIZE * LAYER1_SIZE;
const NUM_OUTPUT_WEIGHTS: usize = 2 * LAYER1_SIZE;
const TOTAL_I16: usize = NUM_FEATURE_WEIGHTS + LAYER1_SIZE + NUM_OUTPUT_WEIGHTS + 1;

pub const MAX_EVAL_PLY: usize = 256 + 8;

// --- weights file backing ---

#[cfg(unix)]
struct Mapping {
    ptr: *mut libc::c_void,
    len: usize,
}

#[cfg(unix)]
unsafe impl Send for Mapping {}
#[cfg(unix)]
unsafe impl Sync for Mapping {}

#[cfg(unix)]
impl Mapping {
    fn open(path: &Path) -> Result<Mapping, String> {
        use std::os::unix::io::AsRawFd;

        let file = File::open(path).map_err(|e| format!("open {:?}: {}", path, e))?;
        let len = file
            .metadata()
            .map_err(|e| format!("stat {:?}: {}", path, e))?
            .len() as usize;
        if len == 0 {
            return Err(format!("{:?} is empty", path));
        }

        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ,
                libc::MAP_PRIVATE,
                file.as_raw_fd(),
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(format!("mmap of {:?} failed", path));
        }
        Ok(Mapping { ptr, len })
    }

    fn as_bytes(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr as *const u8, self.len) }
    }
}

#[cfg(unix)]
impl Drop for Mapping {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr, self.len);
        }
    }
}

enum Backing {
    #[cfg(unix)]
    Mapped(Mapping),
    #[allow(dead_code)]
    Owned(Vec<i16>),
}

/// Read-only network weights, shared by all workers.
pub struct PackedNetwork {
    backing: Backing,
}

impl PackedNetwork {
    pub fn load(path: &str) -> Result<PackedNetwork, String> {
        let path = Path::new(path);

        #[cfg(unix)]
        {
            let mapping = Mapping::open(path)?;
            verify_header(mapping.as_bytes())?;
            Ok(PackedNetwork {
                backing: Backing::Mapped(mapping),
            })
        }

        #[cfg(not(unix))]
        {
            use std::io::Read;
            let mut bytes = Vec::new();
            File::open(path)
                .and_then(|mut f| f.read_to_end(&mut bytes))
                .map_err(|e| format!("read {:?}: {}", path, e))?;
            verify_header(&bytes)?;
            let mut weights = vec![0i16; TOTAL_I16];
            for (i, w) in weights.iter_mut().enumerate() {
                let off = WEIGHTS_OFFSET + i * 2;
                *w = i16::from_le_bytes([bytes[off], bytes[off + 1]]);
            }
            Ok(PackedNetwork {
                backing: Backing::Owned(weights),
            })
        }
    }

    #[inline(always)]
    fn weights(&self) -> &[i16] {
        match &self.backing {
            #[cfg(unix)]
            Backing::Mapped(m) => unsafe {
                std::slice::from_raw_parts(
                    m.as_bytes().as_ptr().add(WEIGHTS_OFFSET) as *const i16,
                    TOTAL_I16,
                )
            },
            Backing::Owned(v) => v,
        }
    }

    #[inline(always)]
    pub fn feature_weights(&self) -> &[i16] {
        &self.weights()[..NUM_FEATURE_WEIGHTS]
    }
    #[inline(always)]
    pub fn feature_biases(&self) -> &[i16] {
        &self.weights()[NUM_FEATURE_WEIGHTS..NUM_FEATURE_WEIGHTS + LAYER1_SIZE]
    }
    #[inline(always)]
    pub fn output_weights(&self) -> &[i16] {
        let start = NUM_FEATURE_WEIGHTS + LAYER1_SIZE;
        &self.weights()[start..start + NUM_OUTPUT_WEIGHTS]
    }
    #[inline(always)]
    pub fn output_bias(&self) -> i32 {
        self.weights()[TOTAL_I16 - 1] as i32
    }
}

fn verify_header(bytes: &[u8]) -> Result<(), String> {
    if bytes.len() < WEIGHTS_OFFSET {
        return Err("weights file truncated before header end".to_string());
    }
    let read_u32 =
        |off: usize| u32::from_le_bytes([bytes[off], bytes[off + 1], bytes[off + 2], bytes[off + 3]]);

    let magic = read_u32(0);
    if magic != NNUE_MAGIC {
        return Err(format!("bad magic {:#010x}", magic));
    }
    let version = read_u32(4);
    if version != NNUE_VERSION {
        return Err(format!("unsupported network version {}", version));
    }
    let num_layers = read_u32(8) as usize;
    if num_layers != NUM_LAYERS {
        return Err(format!("unexpected layer count {}", num_layers));
    }
    for (i, &expected) in LAYER_SIZES.iter().enumerate() {
        let size = read_u32(12 + i * 4);
        if size != expected {
            return Err(format!(
                "layer {} size {} does not match compiled size {}",
                i, size, expected
            ));
        }
    }
    let expected_len = WEIGHTS_OFFSET + TOTAL_I16 * 2;
    if bytes.len() != expected_len {
        return Err(format!(
            "weights file size {} != expected {}",
            bytes.len(),
            expected_len
        ));
    }
    Ok(())
}

/// Serialize a network into the on-disk format. Used by tests and tooling.
pub fn write_network(path: &Path, weights: &[i16]) -> std::io::Result<()> {
    use std::io::Write;
    assert_eq!(weights.len(), TOTAL_I16);
    let mut out = Vec::with_capacity(WEIGHTS_OFFSET + TOTAL_I16 * 2);
    out.extend_from_slice(&NNUE_MAGIC.to_le_bytes());
    out.extend_from_slice(&NNUE_VERSION.to_le_bytes());
    out.extend_from_slice(&(NUM_LAYERS as u32).to_le_bytes());
    for size in LAYER_SIZES {
        out.extend_from_slice(&size.to_le_bytes());
    }
    out.resize(WEIGHTS_OFFSET, 0);
    for w in weights {
        out.extend_from_slice(&w.to_le_bytes());
    }
    let mut file = File::create(path)?;
    file.write_all(&out)
}

// --- accumulators ---

#[derive(Clone, Copy)]
#[repr(align(64))]
pub struct Accumulator {
    pub v: [i16; LAYER1_SIZE],
}

impl Default for Accumulator {
    fn default() -> Self {
        Accumulator {
            v: [0; LAYER1_SIZE],
        }
    }
}

impl Accumulator {
    #[inline(always)]
    fn add_feature(&mut self, net: &PackedNetwork, idx: usize) {
        let weights = &net.feature_weights()[idx * LAYER1_SIZE..(idx + 1) * LAYER1_SIZE];
        for (v, w) in self.v.iter_mut().zip(weights) {
            *v = v.wrapping_add(*w);
        }
    }

    #[inline(always)]
    fn sub_feature(&mut self, net: &PackedNetwork, idx: usize) {
        let weights = &net.feature_weights()[idx * LAYER1_SIZE..(idx + 1) * LAYER1_SIZE];
        for (v, w) in self.v.iter_mut().zip(weights) {
            *v = v.wrapping_sub(*w);
        }
    }
}

/// Which half of the board the perspective's own king is on decides the
/// horizontal mirroring of every feature.
#[inline(always)]
fn king_bucket(perspective: usize, king_sq: u8) -> usize {
    let oriented = if perspective == BLACK { king_sq ^ 56 } else { king_sq };
    (oriented % 8 >= 4) as usize
}

#[inline(always)]
fn feature_index(perspective: usize, mirror: bool, piece: usize, sq: u8) -> usize {
    let mut oriented = if perspective == BLACK { sq ^ 56 } else { sq };
    if mirror {
        oriented ^= 7;
    }
    let piece_color = if piece < 6 { 0 } else { 1 };
    let piece_type = piece % 6;
    let rel = if piece_color == perspective {
        piece_type
    } else {
        piece_type + 6
    };
    rel * 64 + oriented as usize
}

// --- per-bucket refresh cache ---

#[derive(Clone, Copy)]
struct CacheEntry {
    accumulator: Accumulator,
    pieces: [Bitboard; 12],
}

impl Default for CacheEntry {
    fn default() -> Self {
        CacheEntry {
            accumulator: Accumulator::default(),
            pieces: [Bitboard(0); 12],
        }
    }
}

/// Preserves accumulator state per (perspective, king bucket). A forced
/// refresh replays only the piece diff against the cached board instead of
/// rebuilding from the empty board.
pub struct AccumulatorCache {
    entries: [[CacheEntry; NUM_KING_BUCKETS]; 2],
    ready: bool,
}

impl AccumulatorCache {
    pub fn new() -> Self {
        AccumulatorCache {
            entries: [[CacheEntry::default(); NUM_KING_BUCKETS]; 2],
            ready: false,
        }
    }

    pub fn invalidate(&mut self) {
        self.ready = false;
    }

    fn ensure_ready(&mut self, net: &PackedNetwork) {
        if self.ready {
            return;
        }
        let biases = net.feature_biases();
        for side in self.entries.iter_mut() {
            for entry in side.iter_mut() {
                entry.accumulator.v.copy_from_slice(biases);
                entry.pieces = [Bitboard(0); 12];
            }
        }
        self.ready = true;
    }
}

// --- dirty pieces ---

#[derive(Clone, Copy, Default)]
pub struct DirtyPieces {
    added: [(u8, u8); 3],
    removed: [(u8, u8); 3],
    num_added: u8,
    num_removed: u8,
}

impl DirtyPieces {
    #[inline(always)]
    fn add(&mut self, piece: usize, sq: u8) {
        self.added[self.num_added as usize] = (piece as u8, sq);
        self.num_added += 1;
    }
    #[inline(always)]
    fn remove(&mut self, piece: usize, sq: u8) {
        self.removed[self.num_removed as usize] = (piece as u8, sq);
        self.num_removed += 1;
    }
}

/// Piece deltas implied by a move, recorded before it is made.
pub fn dirty_pieces(prev: &GameState, mv: Move) -> DirtyPieces {
    let mut dirty = DirtyPieces::default();
    let side = prev.side_to_move;
    let from = mv.from();
    let to = mv.to();
    let piece = prev.piece_on(from);
    debug_assert!(piece != NO_PIECE);

    if mv.is_en_passant() {
        let cap_sq = if side == 0 { to - 8 } else { to + 8 };
        let victim = if side == 0 { P + 6 } else { P };
        dirty.remove(victim, cap_sq);
    } else if mv.is_capture() {
        dirty.remove(prev.piece_on(to), to);
    }

    dirty.remove(piece, from);
    if let Some(promo) = mv.promotion() {
        dirty.add(if side == 0 { promo } else { promo + 6 }, to);
    } else {
        dirty.add(piece, to);
    }

    if mv.is_castle() {
        let (rook, rook_from, rook_to) = match to {
            6 => (crate::state::R, 7u8, 5u8),
            2 => (crate::state::R, 0, 3),
            62 => (crate::state::r, 63, 61),
            _ => (crate::state::r, 56, 59),
        };
        dirty.remove(rook, rook_from);
        dirty.add(rook, rook_to);
    }

    dirty
}

// --- evaluation context (per worker) ---

#[derive(Clone, Copy)]
struct PlyEntry {
    accumulators: [Accumulator; 2],
    computed: [bool; 2],
    dirty: DirtyPieces,
    kings: [u8; 2],
}

impl Default for PlyEntry {
    fn default() -> Self {
        PlyEntry {
            accumulators: [Accumulator::default(); 2],
            computed: [false; 2],
            dirty: DirtyPieces::default(),
            kings: [0; 2],
        }
    }
}

/// Per-worker accumulator stack plus the king-bucket cache. The search feeds
/// it move deltas; evaluators pull updated accumulators out of it.
pub struct EvalContext {
    plies: Vec<PlyEntry>,
    cache: AccumulatorCache,
}

impl EvalContext {
    pub fn new() -> Self {
        EvalContext {
            plies: vec![PlyEntry::default(); MAX_EVAL_PLY],
            cache: AccumulatorCache::new(),
        }
    }

    pub fn reset(&mut self, root: &GameState) {
        let kings = [
            root.bitboards[K].get_lsb_index() as u8,
            root.bitboards[K + 6].get_lsb_index() as u8,
        ];
        self.plies[0].computed = [false; 2];
        self.plies[0].dirty = DirtyPieces::default();
        self.plies[0].kings = kings;
    }

    /// Record the move leading into `child_ply`.
    pub fn push(&mut self, child_ply: usize, parent: &GameState, mv: Move) {
        if child_ply >= self.plies.len() {
            return;
        }
        let dirty = dirty_pieces(parent, mv);
        let mut kings = self.plies[child_ply - 1].kings;
        if parent.piece_on(mv.from()) % 6 == K {
            kings[parent.side_to_move] = mv.to();
        }
        let entry = &mut self.plies[child_ply];
        entry.dirty = dirty;
        entry.kings = kings;
        entry.computed = [false; 2];
    }

    pub fn push_null(&mut self, child_ply: usize) {
        if child_ply >= self.plies.len() {
            return;
        }
        let kings = self.plies[child_ply - 1].kings;
        let entry = &mut self.plies[child_ply];
        entry.dirty = DirtyPieces::default();
        entry.kings = kings;
        entry.computed = [false; 2];
    }
}

// --- the evaluator ---

pub struct NnueEvaluator {
    net: Arc<PackedNetwork>,
}

impl NnueEvaluator {
    pub fn new(net: Arc<PackedNetwork>) -> Self {
        NnueEvaluator { net }
    }

    fn refresh_from_cache(&self, state: &GameState, ctx: &mut EvalContext, ply: usize, persp: usize) {
        ctx.cache.ensure_ready(&self.net);

        let king_sq = if persp == 0 {
            state.bitboards[K].get_lsb_index() as u8
        } else {
            state.bitboards[K + 6].get_lsb_index() as u8
        };
        let bucket = king_bucket(persp, king_sq);
        let mirror = bucket == 1;
        let entry = &mut ctx.cache.entries[persp][bucket];

        for piece in 0..12 {
            let current = state.bitboards[piece];
            let cached = entry.pieces[piece];

            let mut added = current & !cached;
            while added.0 != 0 {
                let sq = added.get_lsb_index() as u8;
                added.pop_bit(sq);
                entry
                    .accumulator
                    .add_feature(&self.net, feature_index(persp, mirror, piece, sq));
            }
            let mut removed = cached & !current;
            while removed.0 != 0 {
                let sq = removed.get_lsb_index() as u8;
                removed.pop_bit(sq);
                entry
                    .accumulator
                    .sub_feature(&self.net, feature_index(persp, mirror, piece, sq));
            }
            entry.pieces[piece] = current;
        }

        let accumulator = entry.accumulator;
        ctx.plies[ply].accumulators[persp] = accumulator;
        ctx.plies[ply].computed[persp] = true;
        ctx.plies[ply].kings[persp] = king_sq;
    }

    fn ensure_updated(&self, state: &GameState, ctx: &mut EvalContext, ply: usize, persp: usize) {
        if ctx.plies[ply].computed[persp] {
            return;
        }

        // walk up to the nearest usable ancestor; a king crossing the mirror
        // boundary (or an uncomputed root) forces a cache refresh instead
        let mut start = ply;
        while start > 0 {
            let bucket = king_bucket(persp, ctx.plies[start].kings[persp]);
            let parent_bucket = king_bucket(persp, ctx.plies[start - 1].kings[persp]);
            if bucket != parent_bucket {
                self.refresh_from_cache(state, ctx, ply, persp);
                return;
            }
            if ctx.plies[start - 1].computed[persp] {
                break;
            }
            start -= 1;
        }
        if start == 0 {
            self.refresh_from_cache(state, ctx, ply, persp);
            return;
        }

        let mirror = king_bucket(persp, ctx.plies[ply].kings[persp]) == 1;
        for i in start..=ply {
            let (before, after) = ctx.plies.split_at_mut(i);
            let parent = &before[i - 1];
            let entry = &mut after[0];
            let mut acc = parent.accumulators[persp];
            let dirty = entry.dirty;
            for j in 0..dirty.num_removed as usize {
                let (piece, sq) = dirty.removed[j];
                acc.sub_feature(&self.net, feature_index(persp, mirror, piece as usize, sq));
            }
            for j in 0..dirty.num_added as usize {
                let (piece, sq) = dirty.added[j];
                acc.add_feature(&self.net, feature_index(persp, mirror, piece as usize, sq));
            }
            entry.accumulators[persp] = acc;
            entry.computed[persp] = true;
        }
    }

    fn forward(&self, us: &Accumulator, them: &Accumulator) -> i32 {
        let weights = self.net.output_weights();
        let mut sum: i64 = 0;
        for i in 0..LAYER1_SIZE {
            let v = us.v[i].clamp(0, QA as i16) as i64;
            sum += v * v * weights[i] as i64;
        }
        for i in 0..LAYER1_SIZE {
            let v = them.v[i].clamp(0, QA as i16) as i64;
            sum += v * v * weights[LAYER1_SIZE + i] as i64;
        }
        let raw = sum / QA as i64 + self.net.output_bias() as i64;
        (raw * NN_OUTPUT_TO_CENTIPAWNS / (QA as i64 * QB as i64)) as i32
    }
}

impl Evaluator for NnueEvaluator {
    fn evaluate(&self, state: &GameState, ctx: &mut EvalContext, ply: usize) -> i32 {
        self.ensure_updated(state, ctx, ply, 0);
        self.ensure_updated(state, ctx, ply, 1);

        let entry = &ctx.plies[ply];
        let stm = state.side_to_move;
        let score = self.forward(&entry.accumulators[stm], &entry.accumulators[1 - stm]);
        score.clamp(-KNOWN_WIN + 1, KNOWN_WIN - 1)
    }

    fn name(&self) -> &'static str {
        "nnue"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{GameState, START_FEN};

    fn init() {
        crate::zobrist::init_zobrist();
        crate::bitboard::init_attack_tables();
        crate::movegen::init_move_tables();
    }

    fn synthetic_network_path() -> std::path::PathBuf {
        let path = std::env::temp_dir().join("ember_test_net.nn");
        let mut weights = vec![0i16; TOTAL_I16];
        for (i, w) in weights.iter_mut().enumerate() {
            *w = ((i * 31 + 7) % 23) as i16 - 11;
        }
        write_network(&path, &weights).unwrap();
        path
    }

    #[test]
    fn header_is_verified() {
        init();
        let path = synthetic_network_path();
        assert!(PackedNetwork::load(path.to_str().unwrap()).is_ok());

        // corrupt the magic
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[0] ^= 0xFF;
        let bad = std::env::temp_dir().join("ember_test_net_bad.nn");
        std::fs::write(&bad, &bytes).unwrap();
        assert!(PackedNetwork::load(bad.to_str().unwrap()).is_err());

        // truncate
        let short = std::env::temp_dir().join("ember_test_net_short.nn");
        std::fs::write(&short, &bytes[..bytes.len() - 2]).unwrap();
        assert!(PackedNetwork::load(short.to_str().unwrap()).is_err());
    }

    #[test]
    fn incremental_update_matches_refresh() {
        init();
        let path = synthetic_network_path();
        let net = Arc::new(PackedNetwork::load(path.to_str().unwrap()).unwrap());
        let evaluator = NnueEvaluator::new(net.clone());

        let mut state = GameState::from_fen(START_FEN).unwrap();
        let mut ctx = EvalContext::new();
        ctx.reset(&state);

        // a line with captures, a castle, and a king walk across the
        // mirror boundary
        let line = ["e2e4", "d7d5", "e4d5", "g8f6", "g1f3", "f6d5", "f1e2", "b8c6", "e1g1", "e8d7"];

        let mut ply = 0;
        for uci in line {
            let mv = find_move(&state, uci);
            ctx.push(ply + 1, &state, mv);
            state = state.make_move(mv);
            ply += 1;

            let incremental = evaluator.evaluate(&state, &mut ctx, ply);

            let mut fresh_ctx = EvalContext::new();
            fresh_ctx.reset(&state);
            let scratch = evaluator.evaluate(&state, &mut fresh_ctx, 0);

            assert_eq!(incremental, scratch, "divergence after {}", uci);
        }
    }

    fn find_move(state: &GameState, uci: &str) -> crate::state::Move {
        use crate::movegen::{GenMode, MoveGenerator};
        let mut gen = MoveGenerator::new();
        gen.generate_moves(state, GenMode::All);
        for i in 0..gen.list.count {
            if crate::state::format_move_uci(gen.list.moves[i]) == uci {
                return gen.list.moves[i];
            }
        }
        panic!("move {} not found in {}", uci, state.to_fen());
    }
}
