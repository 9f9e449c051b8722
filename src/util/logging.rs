//! Structured logging setup for snappoll
//!
//! Console output by default, JSON when `SNAPPOLL_LOG_JSON=true`. `RUST_LOG`
//! still wins when set. Initialization happens once per process; later calls
//! are ignored.
//!
//! # Example
//!
//! ```no_run
//! use snappoll::util::logging;
//! use tracing::info;
//!
//! logging::init_from_env();
//! info!("Poller started");
//! ```

use std::env;
use std::sync::Once;
use tracing::Level;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: Once = Once::new();

/// Crates whose request-level chatter is capped at `warn` unless `RUST_LOG` says otherwise
const NOISY_CRATES: &[&str] = &["h2", "hyper", "hyper_util", "reqwest"];

/// Configuration for logging initialization
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Minimum log level for snappoll's own events
    pub level: Level,

    /// Use JSON output format
    pub use_json: bool,

    /// Include the module target (e.g., snappoll::oracle) in logs
    pub include_target: bool,

    /// Include file and line number information
    pub include_location: bool,

    pub include_thread_ids: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            use_json: false,
            include_target: true,
            include_location: false,
            include_thread_ids: false,
        }
    }
}

impl LoggingConfig {
    pub fn with_level(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    /// JSON output with full metadata, for running under a log collector
    pub fn production() -> Self {
        Self {
            level: Level::INFO,
            use_json: true,
            include_target: true,
            include_location: true,
            include_thread_ids: true,
        }
    }

    pub fn development() -> Self {
        Self {
            level: Level::DEBUG,
            ..Default::default()
        }
    }
}

/// Parses a log level, case-insensitively
///
/// Unknown values fall back to `Level::INFO` with a note on stderr.
///
/// ```
/// use snappoll::util::logging::parse_level;
/// use tracing::Level;
///
/// assert_eq!(parse_level("debug"), Level::DEBUG);
/// assert_eq!(parse_level("WARN"), Level::WARN);
/// assert_eq!(parse_level("loud"), Level::INFO);
/// ```
pub fn parse_level(level_str: &str) -> Level {
    match level_str.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => {
            eprintln!(
                "Invalid log level '{}', defaulting to INFO. Valid levels: trace, debug, info, warn, error",
                level_str
            );
            Level::INFO
        }
    }
}

fn directive(text: &str) -> Option<Directive> {
    text.parse().ok()
}

/// Builds the filter: snappoll at `level`, noisy HTTP crates at `warn`
/// unless `RUST_LOG` is set.
fn build_filter(level: Level, respect_rust_log: bool) -> EnvFilter {
    let mut filter = if respect_rust_log {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new("")
    };

    if let Some(own) = directive(&format!("snappoll={}", level)) {
        filter = filter.add_directive(own);
    }

    if !respect_rust_log || env::var("RUST_LOG").is_err() {
        for krate in NOISY_CRATES {
            if let Some(quiet) = directive(&format!("{}=warn", krate)) {
                filter = filter.add_directive(quiet);
            }
        }
    }

    filter
}

/// Initializes the logging system; only the first call has any effect
///
/// ```no_run
/// use snappoll::util::{init_logging, LoggingConfig};
/// use tracing::Level;
///
/// init_logging(LoggingConfig::with_level(Level::DEBUG));
/// ```
pub fn init_logging(config: LoggingConfig) {
    INIT.call_once(|| {
        let filter = build_filter(config.level, true);

        if config.use_json {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .json()
                        .with_target(config.include_target)
                        .with_file(config.include_location)
                        .with_line_number(config.include_location)
                        .with_thread_ids(config.include_thread_ids)
                        .with_thread_names(config.include_thread_ids)
                        .with_writer(std::io::stderr),
                )
                .init();
        } else {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .with_target(config.include_target)
                        .with_file(config.include_location)
                        .with_line_number(config.include_location)
                        .with_thread_ids(config.include_thread_ids)
                        .with_thread_names(config.include_thread_ids)
                        .with_writer(std::io::stderr),
                )
                .init();
        }
    });
}

pub fn init_default() {
    init_logging(LoggingConfig::default());
}

/// Reads the output format from `SNAPPOLL_LOG_JSON`
pub fn json_from_env() -> bool {
    env::var("SNAPPOLL_LOG_JSON")
        .ok()
        .and_then(|v| v.trim().to_lowercase().parse::<bool>().ok())
        .unwrap_or(false)
}

/// Initializes logging from `SNAPPOLL_LOG_LEVEL`, `SNAPPOLL_LOG_JSON` and `RUST_LOG`
pub fn init_from_env() {
    let level_str = env::var("SNAPPOLL_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

    init_logging(LoggingConfig {
        level: parse_level(&level_str),
        use_json: json_from_env(),
        ..Default::default()
    });
}
