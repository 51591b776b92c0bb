//! Host-side helpers for blaze-telemetry.
//!
//! Everything here touches the host machine rather than the flight computer:
//! where flight logs live on disk and how scripted uplink traffic is read for
//! simulated flights.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod logs;
pub mod script;

use std::path::PathBuf;

use thiserror::Error;

pub use logs::{open_flight_logs, FlightLogPaths, FlightLogs};
pub use script::{load_uplink_script, parse_uplink_script, UplinkEntry};

/// Errors from host helpers.
#[derive(Error, Debug)]
pub enum HostError {
    /// A directory could not be created.
    #[error("failed to create directory {path}: {source}")]
    DirectoryCreate {
        /// The directory.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A log file could not be opened.
    #[error("failed to open {path}: {source}")]
    FileOpen {
        /// The file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// An uplink script line could not be parsed.
    #[error("uplink script line {line}: {message}")]
    Script {
        /// 1-based line number.
        line: usize,
        /// What was wrong.
        message: String,
    },

    /// Other I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for host helpers.
pub type Result<T> = std::result::Result<T, HostError>;

/// Log host details once at startup.
pub fn init() {
    tracing::debug!(
        platform = platform_name(),
        arch = std::env::consts::ARCH,
        "host initialised"
    );
}

/// Name of the host operating system.
#[must_use]
pub fn platform_name() -> &'static str {
    match std::env::consts::OS {
        "linux" => "Linux",
        "macos" => "macOS",
        "windows" => "Windows",
        other => other,
    }
}
