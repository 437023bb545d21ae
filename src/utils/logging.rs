//! Logger setup shared by the binary and embedders.

use anyhow::{Context, Result};
use log::LevelFilter;
use std::path::Path;

/// 0 (default) = warn, 1 = info, 2 = debug, 3+ = trace
pub fn level_for(verbosity: u8) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

/// Initialize `env_logger`.
///
/// With `log_file` everything at `verbosity` goes to that file; otherwise
/// logs go to stderr and `RUST_LOG` overrides the verbosity default.
/// Calling it twice is harmless (the second init is ignored).
pub fn init_logger(verbosity: u8, log_file: Option<&Path>) -> Result<()> {
    let level = level_for(verbosity);
    match log_file {
        Some(path) => {
            let file = std::fs::File::create(path)
                .with_context(|| format!("Failed to create log file: {}", path.display()))?;
            let _ = env_logger::Builder::new()
                .filter_level(level)
                .format_timestamp_millis()
                .target(env_logger::Target::Pipe(Box::new(file)))
                .try_init();
            log::info!("Logging to file: {} (level: {:?})", path.display(), level);
        }
        None => {
            let default = level.as_str().to_lowercase();
            let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default))
                .format_timestamp_millis()
                .try_init();
        }
    }
    Ok(())
}
