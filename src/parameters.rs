use serde::{Deserialize, Serialize};
use std::io::Write;

fn default_lmr_table() -> [[u8; 64]; 64] {
    [[0; 64]; 64]
}

fn default_lmp_table() -> [usize; 16] {
    [0, 2, 4, 7, 10, 15, 20, 28, 38, 50, 65, 80, 100, 120, 150, 200]
}

/// Every tunable the search consumes. Serializable so tuning runs can dump
/// and reload parameter sets as JSON.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchParameters {
    // Aspiration windows
    pub aspiration_start_depth: i32,
    pub aspiration_window_min: i32,
    pub aspiration_window_max: i32,
    pub aspiration_window_step: i32,

    // LMR
    pub lmr_base: f64,
    pub lmr_divisor: f64,

    // Null move
    pub nmp_base: i32,
    pub nmp_divisor: i32,

    // Reverse futility (beta) pruning
    pub beta_pruning_depth: i32,
    pub beta_margin_bias: i32,
    pub beta_margin_multiplier: i32,

    // Razoring (alpha) pruning
    pub alpha_pruning_depth: i32,
    pub alpha_margin_bias: i32,
    pub alpha_margin_multiplier: i32,

    // Futility pruning of quiets
    pub futility_depth: i32,
    pub futility_margin: i32,

    // Singular extensions
    pub singular_depth: i32,
    pub singular_margin_per_depth: i32,
    pub singular_double_margin: i32,

    // Quiescence
    pub qsearch_futility_margin: i32,

    // LMP thresholds per depth; skipped in JSON, always the defaults
    #[serde(skip, default = "default_lmp_table")]
    pub lmp_table: [usize; 16],

    // Precomputed LMR reductions, derived from lmr_base/lmr_divisor
    #[serde(skip, default = "default_lmr_table")]
    pub lmr_table: [[u8; 64]; 64],
}

impl Default for SearchParameters {
    fn default() -> Self {
        let mut params = Self {
            aspiration_start_depth: 4,
            aspiration_window_min: 20,
            aspiration_window_max: 200,
            aspiration_window_step: 20,

            lmr_base: 1.0,
            lmr_divisor: 2.5,

            nmp_base: 3,
            nmp_divisor: 4,

            beta_pruning_depth: 6,
            beta_margin_bias: 30,
            beta_margin_multiplier: 80,

            alpha_pruning_depth: 4,
            alpha_margin_bias: 1000,
            alpha_margin_multiplier: 150,

            futility_depth: 5,
            futility_margin: 150,

            singular_depth: 6,
            singular_margin_per_depth: 3,
            singular_double_margin: 20,

            qsearch_futility_margin: 120,

            lmp_table: default_lmp_table(),
            lmr_table: [[0; 64]; 64],
        };
        params.recalculate_tables();
        params
    }
}

impl SearchParameters {
    pub fn recalculate_tables(&mut self) {
        for d in 0..64 {
            for m in 0..64 {
                if d > 2 && m > 2 {
                    let lmr = self.lmr_base + (d as f64).ln() * (m as f64).ln() / self.lmr_divisor;
                    self.lmr_table[d][m] = lmr.max(0.0) as u8;
                } else {
                    self.lmr_table[d][m] = 0;
                }
            }
        }
    }

    pub fn save_to_json(&self, path: &str) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = std::fs::File::create(path)?;
        file.write_all(json.as_bytes())
    }

    pub fn load_from_json(path: &str) -> std::io::Result<Self> {
        let file = std::fs::File::open(path)?;
        let reader = std::io::BufReader::new(file);
        let mut params: SearchParameters = serde_json::from_reader(reader)?;
        params.recalculate_tables();
        params.lmp_table = default_lmp_table();
        Ok(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lmr_table_grows_with_depth_and_index() {
        let params = SearchParameters::default();
        assert_eq!(params.lmr_table[2][10], 0);
        assert!(params.lmr_table[10][10] >= 1);
        assert!(params.lmr_table[40][40] > params.lmr_table[5][5]);
    }

    #[test]
    fn json_roundtrip() {
        let mut params = SearchParameters::default();
        params.nmp_base = 4;
        let path = std::env::temp_dir().join("ember_params_test.json");
        params.save_to_json(path.to_str().unwrap()).unwrap();
        let loaded = SearchParameters::load_from_json(path.to_str().unwrap()).unwrap();
        assert_eq!(loaded.nmp_base, 4);
        assert_eq!(loaded.lmr_table, params.lmr_table);
    }
}
