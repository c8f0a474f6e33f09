//! Logging setup for the checker
//!
//! Thin wrapper over `log` + `env_logger`.
//!
//! ```rust,ignore
//! use checker::logging;
//!
//! logging::init();                                   // warn and above
//! logging::init_from_env();                          // honour RUST_LOG
//! logging::init_with_level(log::LevelFilter::Debug);
//! ```
//!
//! Level usage inside the checker:
//!
//! - `error!` - internal invariant violations (the function is skipped)
//! - `warn!` - unsupported constructs, unreadable inputs
//! - `info!` - run phases (lowering, preliminary pass, analysis)
//! - `debug!` - one line per analyzed function and per binding verdict
//! - `trace!` - dataflow states per block
//!
//! ```bash
//! RUST_LOG=checker::semantic_graph=trace leakguard check src/
//! LEAKGUARD_DEBUG=true leakguard check src/   # same as a debug default
//! ```

use env_logger::Builder;
use log::LevelFilter;
use std::io::Write;
use std::sync::Once;

static INIT: Once = Once::new();

/// Environment switch that raises the default level to `debug`
pub const DEBUG_ENV: &str = "LEAKGUARD_DEBUG";

/// Initialize with the `warn` level, or `debug` when `LEAKGUARD_DEBUG=true`.
///
/// Only the first call has an effect.
pub fn init() {
    init_with_level(default_level());
}

/// Initialize with a specific level.
///
/// Only the first call has an effect.
pub fn init_with_level(level: LevelFilter) {
    INIT.call_once(|| {
        Builder::new()
            .filter_level(level)
            .format(|buf, record| {
                writeln!(
                    buf,
                    "[{:5}] {}:{} - {}",
                    record.level(),
                    record.file().unwrap_or("unknown"),
                    record.line().unwrap_or(0),
                    record.args()
                )
            })
            .init();
    });
}

/// Initialize from `RUST_LOG`, falling back to [`init`]'s default level.
pub fn init_from_env() {
    INIT.call_once(|| {
        let fallback = default_level().to_string().to_lowercase();
        Builder::from_env(env_logger::Env::default().default_filter_or(fallback)).init();
    });
}

/// Initialize for tests; quiet unless `RUST_LOG` says otherwise.
pub fn init_test() {
    let _ = env_logger::builder()
        .filter_level(LevelFilter::Warn)
        .is_test(true)
        .try_init();
}

/// Whether one of the `init*` functions ran in this process.
pub fn is_initialized() -> bool {
    INIT.is_completed()
}

fn default_level() -> LevelFilter {
    match std::env::var(DEBUG_ENV) {
        Ok(value) if debug_switch_enabled(&value) => LevelFilter::Debug,
        _ => LevelFilter::Warn,
    }
}

fn debug_switch_enabled(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init_test();
        init_test();
    }

    #[test]
    fn test_debug_switch_values() {
        assert!(debug_switch_enabled("true"));
        assert!(debug_switch_enabled(" TRUE "));
        assert!(debug_switch_enabled("1"));
        assert!(!debug_switch_enabled("false"));
        assert!(!debug_switch_enabled(""));
    }

    #[test]
    fn test_log_levels() {
        init_test();
        log::error!("error line");
        log::debug!("debug line");
        log::trace!("trace line");
    }
}
