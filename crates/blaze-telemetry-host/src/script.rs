//! Scripted uplink traffic for simulated flights.
//!
//! A script is plain text, one entry per line:
//!
//! ```text
//! # time_ms  line
//! 0          ARM
//! 30000      rocket-netid?&airspeed?-end
//! ```
//!
//! Blank lines and lines starting with `#` are skipped. Entries are returned in
//! time order; entries with equal times keep their file order.

use std::path::Path;

use crate::{HostError, Result};

/// One line of uplink traffic and when to deliver it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UplinkEntry {
    /// Flight time at which the line arrives (ms).
    pub at_ms: u64,
    /// The text, without line terminator.
    pub line: String,
}

/// Parse script text.
///
/// # Errors
///
/// Returns [`HostError::Script`] for a line without a valid time or without text.
pub fn parse_uplink_script(text: &str) -> Result<Vec<UplinkEntry>> {
    let mut entries = Vec::new();
    for (index, raw) in text.lines().enumerate() {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let script_error = |message: String| HostError::Script {
            line: index + 1,
            message,
        };

        let (time, line) = trimmed
            .split_once(char::is_whitespace)
            .ok_or_else(|| script_error(format!("expected '<time_ms> <text>', got '{trimmed}'")))?;
        let at_ms = time
            .parse()
            .map_err(|_| script_error(format!("invalid time '{time}'")))?;

        entries.push(UplinkEntry {
            at_ms,
            line: line.trim().to_string(),
        });
    }
    entries.sort_by_key(|entry| entry.at_ms);
    Ok(entries)
}

/// Read and parse a script file.
///
/// # Errors
///
/// Returns [`HostError::Io`] if the file cannot be read, or [`HostError::Script`].
pub fn load_uplink_script(path: &Path) -> Result<Vec<UplinkEntry>> {
    let text = std::fs::read_to_string(path)?;
    parse_uplink_script(&text)
}
