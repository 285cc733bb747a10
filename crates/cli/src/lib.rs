pub mod cli;

use cli::LogFormatArg;
use tracing::Level;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Log targets of the dockyard crates, the binary included.
const OWN_TARGETS: &[&str] = &[
    "dockyard",
    "dockyard_cli",
    "dockyard_core",
    "dockyard_stack",
    "dockyard_buildkit",
    "dockyard_pipeline",
];

const NOISY_TARGETS: &[&str] = &["h2", "hyper", "hyper_util", "bollard"];

pub fn parse_level(level: &str) -> Option<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Some(Level::TRACE),
        "debug" => Some(Level::DEBUG),
        "info" => Some(Level::INFO),
        "warn" => Some(Level::WARN),
        "error" => Some(Level::ERROR),
        _ => None,
    }
}

/// Pick the log level: an explicit `--log-level` wins, then `-v`/`-q`, then
/// the configured default.
pub fn resolve_level(explicit: Option<&str>, verbose: bool, quiet: bool, configured: &str) -> Level {
    if let Some(level) = explicit.and_then(parse_level) {
        level
    } else if verbose {
        Level::DEBUG
    } else if quiet {
        Level::ERROR
    } else {
        parse_level(configured).unwrap_or(Level::INFO)
    }
}

/// Filter directives used when `RUST_LOG` is not set.
pub fn default_directives(level: Level) -> Vec<String> {
    let level = level.as_str().to_lowercase();
    OWN_TARGETS
        .iter()
        .map(|target| format!("{}={}", target, level))
        .chain(NOISY_TARGETS.iter().map(|target| format!("{}=warn", target)))
        .collect()
}

pub fn init_logging(level: Level, format: LogFormatArg) {
    use std::sync::Once;
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let mut filter = EnvFilter::from_default_env();
        if std::env::var("RUST_LOG").is_err() {
            for directive in default_directives(level) {
                if let Ok(directive) = directive.parse() {
                    filter = filter.add_directive(directive);
                }
            }
        }

        let (text, json) = match format {
            LogFormatArg::Text => (
                Some(fmt::layer().with_target(true).with_writer(std::io::stderr)),
                None,
            ),
            LogFormatArg::Json => (
                None,
                Some(fmt::layer().json().with_target(true).with_writer(std::io::stderr)),
            ),
        };

        tracing_subscriber::registry()
            .with(filter)
            .with(text)
            .with(json)
            .init();
    });
}
