//! Logging utilities and structured logging support

pub use log::{debug, error, info, trace, warn, LevelFilter};

/// Initialize the logging system at `info`, overridable through `RUST_LOG`
pub fn init() {
    init_with_level(LevelFilter::Info);
}

/// Initialize the logging system with a default level
///
/// `RUST_LOG` still takes precedence. Calling this more than once is
/// harmless; later calls are ignored.
pub fn init_with_level(level: LevelFilter) {
    let result = env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format_timestamp_millis()
        .try_init();

    if result.is_err() {
        log::debug!("Logger already initialized");
    }
}
