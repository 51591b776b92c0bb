//! CSV flight log rows for the archival tier.

use std::fmt;

use serde::Serialize;

use crate::flight::FlightPhase;

/// Header line written once at the start of an empty archival log.
pub const HEADER: &str = "timestamp_ms,pressure_Pa,altitude_m,temperature_C\r\n";

/// One line of the archival CSV log.
///
/// Renders as
/// `timestamp_ms,sequence,accel_x,accel_y,accel_z,accel_magnitude,altitude,phase\r\n`
/// with three decimals for the measured values and the numeric phase code.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ArchiveRow {
    /// Clock time of the tick (ms).
    pub timestamp_ms: u64,
    /// Sequence number of the status frame sent on the same tick.
    pub sequence: u32,
    /// Acceleration X (g).
    pub accel_x: f32,
    /// Acceleration Y (g).
    pub accel_y: f32,
    /// Acceleration Z (g).
    pub accel_z: f32,
    /// Acceleration magnitude (g).
    pub accel_magnitude: f32,
    /// Altitude (m).
    pub altitude: f32,
    /// Flight phase.
    pub phase: FlightPhase,
}

impl fmt::Display for ArchiveRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{:.3},{:.3},{:.3},{:.3},{:.3},{}\r\n",
            self.timestamp_ms,
            self.sequence,
            self.accel_x,
            self.accel_y,
            self.accel_z,
            self.accel_magnitude,
            self.altitude,
            self.phase.as_u8()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_format() {
        let row = ArchiveRow {
            timestamp_ms: 1_250,
            sequence: 7,
            accel_x: 0.5,
            accel_y: -0.25,
            accel_z: 3.0,
            accel_magnitude: 3.052,
            altitude: 12.5,
            phase: FlightPhase::Launch,
        };
        assert_eq!(
            row.to_string(),
            "1250,7,0.500,-0.250,3.000,3.052,12.500,2\r\n"
        );
    }

    #[test]
    fn test_header_is_single_line() {
        assert!(HEADER.ends_with("\r\n"));
        assert_eq!(HEADER.matches("\r\n").count(), 1);
    }
}
