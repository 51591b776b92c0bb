//! Sensor readings handed to the pipeline each tick.
//!
//! Drivers live outside this crate; they fill these plain structs.

use serde::{Deserialize, Serialize};

/// Accelerometer reading in g.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AccelReading {
    /// X axis (g).
    pub x: f32,
    /// Y axis (g).
    pub y: f32,
    /// Z axis (g).
    pub z: f32,
    /// Magnitude (g), if the driver computed it.
    pub magnitude: Option<f32>,
}

impl AccelReading {
    /// A reading without a precomputed magnitude.
    #[must_use]
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self {
            x,
            y,
            z,
            magnitude: None,
        }
    }

    /// The driver's magnitude, or `sqrt(x² + y² + z²)`.
    #[must_use]
    pub fn magnitude(&self) -> f32 {
        self.magnitude
            .unwrap_or_else(|| (self.x * self.x + self.y * self.y + self.z * self.z).sqrt())
    }
}

/// Barometer reading.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BaroReading {
    /// Pressure (Pa).
    pub pressure_pa: f32,
    /// Altitude above the pad (m).
    pub altitude_m: f32,
    /// Temperature (°C).
    pub temperature_c: f32,
}

/// Everything sampled on one tick.
///
/// A reading whose `*_valid` flag is false is ignored by the pipeline: no frame
/// is built from it and the flight controller sees the last valid value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorData {
    /// Accelerometer.
    pub accel: AccelReading,
    /// Barometer.
    pub baro: BaroReading,
    /// Vertical velocity (m/s), if an estimator supplies one.
    pub velocity: Option<f32>,
    /// Whether `accel` holds a fresh reading.
    pub accel_valid: bool,
    /// Whether `baro` holds a fresh reading.
    pub baro_valid: bool,
}

impl SensorData {
    /// A sample with both readings valid.
    #[must_use]
    pub fn new(accel: AccelReading, baro: BaroReading) -> Self {
        Self {
            accel,
            baro,
            velocity: None,
            accel_valid: true,
            baro_valid: true,
        }
    }

    /// Attach an externally estimated vertical velocity.
    #[must_use]
    pub fn with_velocity(mut self, velocity: f32) -> Self {
        self.velocity = Some(velocity);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_magnitude_computed_when_missing() {
        let reading = AccelReading::new(3.0, 0.0, 4.0);
        assert!((reading.magnitude() - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_driver_magnitude_is_kept() {
        let reading = AccelReading {
            magnitude: Some(1.25),
            ..AccelReading::new(3.0, 0.0, 4.0)
        };
        assert!((reading.magnitude() - 1.25).abs() < 1e-6);
    }

    #[test]
    fn test_default_sample_is_invalid() {
        let sample = SensorData::default();
        assert!(!sample.accel_valid);
        assert!(!sample.baro_valid);
        assert!(SensorData::new(AccelReading::default(), BaroReading::default()).baro_valid);
    }
}
