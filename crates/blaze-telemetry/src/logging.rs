//! Logging setup for blaze-telemetry.
//!
//! Core components only emit `tracing` events. Installing a subscriber is left to
//! the binary, which calls [`init_logging`] once at startup.

use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Verbosity level for logging output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    /// Errors only.
    Quiet,
    /// Phase changes, faults and summaries.
    #[default]
    Normal,
    /// Adds per-tick storage and radio activity.
    Verbose,
    /// Everything, including dropped bytes.
    Trace,
}

impl Verbosity {
    /// Build a verbosity from `-v`/`-q` flag counts. Quiet wins.
    #[must_use]
    pub fn from_flags(verbose: u8, quiet: bool) -> Self {
        match (quiet, verbose) {
            (true, _) => Self::Quiet,
            (false, 0) => Self::Normal,
            (false, 1) => Self::Verbose,
            (false, _) => Self::Trace,
        }
    }

    /// The most detailed level shown.
    #[must_use]
    pub fn level(self) -> Level {
        match self {
            Self::Quiet => Level::ERROR,
            Self::Normal => Level::INFO,
            Self::Verbose => Level::DEBUG,
            Self::Trace => Level::TRACE,
        }
    }
}

/// Install the global subscriber.
///
/// Output goes to stderr so command output on stdout stays machine readable.
/// `RUST_LOG` replaces the default `blaze_telemetry=<level>` filter when set.
pub fn init_logging(verbosity: Verbosity) {
    let default_filter = format!(
        "blaze_telemetry={level},blazetm={level}",
        level = verbosity.level()
    );
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let subscriber = tracing_subscriber::registry().with(env_filter).with(
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_file(false)
            .with_line_number(false),
    );

    // A subscriber may already be installed, e.g. by a test.
    let _ = subscriber.try_init();
}
