//! Deterministic synthetic flight for exercising the pipeline end to end.
//!
//! A one-dimensional profile: on the pad, powered boost, ballistic coast to
//! apogee, free fall until the parachute reaches its descent rate, steady
//! descent, then resting on the ground. Accelerometer values are what a body
//! mounted sensor reads (1 g at rest, ~0 g in free fall).
//!
//! [`SimulatedModem`] stands in for the radio and [`FlightRun`] drives a
//! pipeline through a flight while replaying scripted uplink traffic.

mod modem;
mod run;

pub use modem::SimulatedModem;
pub use run::{run_flight, FlightRun, PhaseChange, RunSummary};

use serde::{Deserialize, Serialize};

use crate::sample::{AccelReading, BaroReading, SensorData};

const GRAVITY: f32 = 9.806_65;
const SEA_LEVEL_PA: f32 = 101_325.0;
const SEA_LEVEL_C: f32 = 15.0;

/// Shape of the synthetic flight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlightProfile {
    /// Time on the pad before ignition (s).
    pub pad_time_s: f32,
    /// Motor burn time (s).
    pub burn_time_s: f32,
    /// Sensed acceleration during the burn (g).
    pub thrust_g: f32,
    /// Steady descent rate under parachute (m/s, positive).
    pub descent_rate: f32,
    /// Time spent on the ground after touchdown (s).
    pub ground_time_s: f32,
}

impl Default for FlightProfile {
    fn default() -> Self {
        Self {
            pad_time_s: 2.0,
            burn_time_s: 2.0,
            thrust_g: 6.0,
            descent_rate: 15.0,
            ground_time_s: 5.0,
        }
    }
}

/// Where the synthetic rocket is in its flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SimStage {
    /// Waiting on the pad.
    Pad,
    /// Motor burning.
    Boost,
    /// Unpowered, still climbing.
    Coast,
    /// Falling before the parachute has slowed the descent.
    FreeFall,
    /// Steady descent under parachute.
    Parachute,
    /// On the ground.
    Landed,
}

/// One generated sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SimSample {
    /// Flight time (ms).
    pub t_ms: u64,
    /// Stage the sample was taken in.
    pub stage: SimStage,
    /// True vertical velocity (m/s).
    pub velocity: f32,
    /// Sensor readings.
    pub data: SensorData,
}

/// Iterator over the samples of one synthetic flight.
#[derive(Debug, Clone)]
pub struct SimulatedFlight {
    profile: FlightProfile,
    tick_ms: u64,
    t_ms: u64,
    altitude: f32,
    velocity: f32,
    stage: SimStage,
    landed_at_ms: Option<u64>,
    done: bool,
}

impl SimulatedFlight {
    /// Sample `profile` every `tick_ms` milliseconds.
    #[must_use]
    pub fn new(profile: FlightProfile, tick_ms: u64) -> Self {
        Self {
            profile,
            tick_ms: tick_ms.max(1),
            t_ms: 0,
            altitude: 0.0,
            velocity: 0.0,
            stage: SimStage::Pad,
            landed_at_ms: None,
            done: false,
        }
    }

    fn step(&mut self) -> f32 {
        let dt = self.tick_ms as f32 / 1000.0;
        let t = self.t_ms as f32 / 1000.0;
        let ignition = self.profile.pad_time_s;
        let burnout = ignition + self.profile.burn_time_s;

        self.stage = match self.stage {
            SimStage::Pad if t >= ignition => SimStage::Boost,
            SimStage::Boost if t >= burnout => SimStage::Coast,
            SimStage::Coast if self.velocity <= 0.0 => SimStage::FreeFall,
            SimStage::FreeFall if self.velocity <= -self.profile.descent_rate => {
                SimStage::Parachute
            }
            SimStage::Parachute | SimStage::FreeFall if self.altitude <= 0.0 => SimStage::Landed,
            stage => stage,
        };

        // Sensed acceleration in g and net vertical acceleration in m/s².
        let (sensed, net) = match self.stage {
            SimStage::Pad | SimStage::Landed => (1.0, 0.0),
            SimStage::Boost => (self.profile.thrust_g, (self.profile.thrust_g - 1.0) * GRAVITY),
            SimStage::Coast | SimStage::FreeFall => (0.0, -GRAVITY),
            SimStage::Parachute => (1.0, 0.0),
        };

        match self.stage {
            SimStage::Pad | SimStage::Landed => {
                self.velocity = 0.0;
                self.altitude = 0.0;
            }
            SimStage::Parachute => {
                self.velocity = -self.profile.descent_rate;
                self.altitude = (self.altitude + self.velocity * dt).max(0.0);
            }
            _ => {
                self.velocity += net * dt;
                self.altitude = (self.altitude + self.velocity * dt).max(0.0);
            }
        }
        sensed
    }
}

impl Iterator for SimulatedFlight {
    type Item = SimSample;

    fn next(&mut self) -> Option<SimSample> {
        if self.done {
            return None;
        }
        let sensed = self.step();

        if self.stage == SimStage::Landed {
            let since = *self.landed_at_ms.get_or_insert(self.t_ms);
            if self.t_ms - since >= (self.profile.ground_time_s * 1000.0) as u64 {
                self.done = true;
            }
        }

        let sample = SimSample {
            t_ms: self.t_ms,
            stage: self.stage,
            velocity: self.velocity,
            data: SensorData::new(
                AccelReading::new(0.0, 0.0, sensed),
                BaroReading {
                    pressure_pa: pressure_at(self.altitude),
                    altitude_m: self.altitude,
                    temperature_c: SEA_LEVEL_C - 0.0065 * self.altitude,
                },
            ),
        };
        self.t_ms += self.tick_ms;
        Some(sample)
    }
}

/// International standard atmosphere pressure at `altitude` metres.
#[must_use]
pub fn pressure_at(altitude: f32) -> f32 {
    SEA_LEVEL_PA * (1.0 - 2.255_77e-5 * altitude).powf(5.255_88)
}
