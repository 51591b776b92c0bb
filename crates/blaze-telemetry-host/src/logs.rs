//! Flight log files on the host.
//!
//! One flight produces three files sharing a timestamped stem:
//!
//! - `flight-YYYYMMDD-HHMMSS.bin`: primary tier, raw telemetry frames
//! - `flight-YYYYMMDD-HHMMSS.csv`: archival tier, CSV flight log
//! - `flight-YYYYMMDD-HHMMSS-downlink.bin`: bytes sent over the radio

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone};
use tracing::info;

use crate::{HostError, Result};

/// Paths of one flight's log files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlightLogPaths {
    /// Raw frames.
    pub primary: PathBuf,
    /// CSV log.
    pub archival: PathBuf,
    /// Radio capture.
    pub downlink: PathBuf,
}

impl FlightLogPaths {
    /// Paths for a flight started at `started`, inside `dir`.
    #[must_use]
    pub fn for_flight<Tz: TimeZone>(dir: &Path, started: &DateTime<Tz>) -> Self
    where
        Tz::Offset: std::fmt::Display,
    {
        let stem = format!("flight-{}", started.format("%Y%m%d-%H%M%S"));
        Self {
            primary: dir.join(format!("{stem}.bin")),
            archival: dir.join(format!("{stem}.csv")),
            downlink: dir.join(format!("{stem}-downlink.bin")),
        }
    }
}

/// Open log files for one flight.
#[derive(Debug)]
pub struct FlightLogs {
    /// Where the files are.
    pub paths: FlightLogPaths,
    /// Primary tier sink, opened for appending.
    pub primary: File,
    /// Archival tier sink, opened for appending. An existing log keeps its header.
    pub archival: File,
    /// Radio capture, truncated on open.
    pub downlink: File,
}

fn open(path: &Path, options: &OpenOptions) -> Result<File> {
    options.open(path).map_err(|source| HostError::FileOpen {
        path: path.to_path_buf(),
        source,
    })
}

/// Create `dir` if needed and open the log files for a flight started at `started`.
///
/// # Errors
///
/// Returns [`HostError::DirectoryCreate`] or [`HostError::FileOpen`].
pub fn open_flight_logs<Tz: TimeZone>(dir: &Path, started: &DateTime<Tz>) -> Result<FlightLogs>
where
    Tz::Offset: std::fmt::Display,
{
    std::fs::create_dir_all(dir).map_err(|source| HostError::DirectoryCreate {
        path: dir.to_path_buf(),
        source,
    })?;

    let paths = FlightLogPaths::for_flight(dir, started);
    let mut append = OpenOptions::new();
    append.create(true).append(true).read(true);
    let mut truncate = OpenOptions::new();
    truncate.create(true).write(true).truncate(true);

    let logs = FlightLogs {
        primary: open(&paths.primary, &append)?,
        archival: open(&paths.archival, &append)?,
        downlink: open(&paths.downlink, &truncate)?,
        paths,
    };
    info!(dir = %dir.display(), "flight logs opened");
    Ok(logs)
}

#[cfg(test)]
mod tests {
    use std::io::{Seek, SeekFrom, Write};

    use chrono::Utc;

    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("blaze-host-{name}-{}", std::process::id()))
    }

    #[test]
    fn test_paths_share_stem() {
        let started = Utc.with_ymd_and_hms(2026, 10, 19, 14, 30, 5).unwrap();
        let paths = FlightLogPaths::for_flight(Path::new("/logs"), &started);
        assert_eq!(paths.primary, PathBuf::from("/logs/flight-20261019-143005.bin"));
        assert_eq!(paths.archival, PathBuf::from("/logs/flight-20261019-143005.csv"));
        assert_eq!(
            paths.downlink,
            PathBuf::from("/logs/flight-20261019-143005-downlink.bin")
        );
    }

    #[test]
    fn test_open_creates_directory_and_appends() {
        let dir = scratch_dir("open");
        let started = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();

        let mut logs = open_flight_logs(&dir, &started).unwrap();
        logs.archival.write_all(b"header\r\n").unwrap();
        drop(logs);

        let mut logs = open_flight_logs(&dir, &started).unwrap();
        assert_eq!(logs.archival.seek(SeekFrom::End(0)).unwrap(), 8);

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
