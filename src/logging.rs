//! File-backed diagnostics. Stdout belongs to the UCI protocol, so log
//! output goes to a side file instead; logging is strictly best-effort and
//! never blocks engine startup.

use log::LevelFilter;
use simplelog::{Config, WriteLogger};
use std::fs::File;

const LOG_FILE: &str = "ember.log";

/// Called once from `run_cli`, before any global tables are built. The
/// `EMBER_LOG` environment variable selects the level (`debug`, `off`);
/// anything else means `info`.
pub fn init_logging() {
    let level = match std::env::var("EMBER_LOG").as_deref() {
        Ok("debug") => LevelFilter::Debug,
        Ok("off") => return,
        _ => LevelFilter::Info,
    };

    if let Ok(file) = File::create(LOG_FILE) {
        let _ = WriteLogger::init(level, Config::default(), file);
        log::info!("ember logging started");
    }
}
