//! Flight phase state machine.
//!
//! [`FlightPhaseController`] turns altitude, acceleration and vertical velocity
//! samples into the nominal flight timeline
//! `UNARMED -> ARMED -> LAUNCH -> APOGEE -> DESCENT -> LANDED`. Every automatic
//! transition is debounced: its condition has to hold on every tick for a dwell
//! time before it fires, and a single tick where it does not hold restarts the
//! wait from zero.
//!
//! Leaving UNARMED always takes an explicit [`FlightPhaseController::set_phase`]
//! (the ground ARM command). LANDED and ERROR are never left by `update`.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::FlightConfig;

/// Longest error message kept in [`FlightState`], in bytes.
pub const ERROR_MESSAGE_CAPACITY: usize = 31;

/// Phase of flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum FlightPhase {
    /// Powered up, not ready for flight.
    Unarmed = 0,
    /// Ready, waiting for launch.
    Armed = 1,
    /// Launch detected, ascending.
    Launch = 2,
    /// Apogee detected.
    Apogee = 3,
    /// Falling, usually under parachute.
    Descent = 4,
    /// On the ground, flight over.
    Landed = 5,
    /// Something failed; only a reset leaves this phase.
    Error = 6,
}

impl FlightPhase {
    /// Numeric phase code used on the wire.
    #[must_use]
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Parse a numeric phase code.
    #[must_use]
    pub fn from_u8(code: u8) -> Option<Self> {
        Some(match code {
            0 => Self::Unarmed,
            1 => Self::Armed,
            2 => Self::Launch,
            3 => Self::Apogee,
            4 => Self::Descent,
            5 => Self::Landed,
            6 => Self::Error,
            _ => return None,
        })
    }

    /// Upper-case label.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Unarmed => "UNARMED",
            Self::Armed => "ARMED",
            Self::Launch => "LAUNCH",
            Self::Apogee => "APOGEE",
            Self::Descent => "DESCENT",
            Self::Landed => "LANDED",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for FlightPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Snapshot of the controller's state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlightState {
    /// Current phase.
    pub phase: FlightPhase,
    /// Altitude at the last update (m).
    pub altitude: f32,
    /// Highest altitude seen since the last reset (m).
    pub max_altitude: f32,
    /// Vertical velocity used at the last update (m/s).
    pub velocity: f32,
    /// Clock time of the last update or command (ms).
    pub timestamp_ms: u64,
    /// Whether frames should be written to storage.
    pub logging_enabled: bool,
    /// Whether frames should be sent over the radio.
    pub radio_enabled: bool,
    /// When LAUNCH was entered.
    pub launch_time_ms: Option<u64>,
    /// When APOGEE was entered.
    pub apogee_time_ms: Option<u64>,
    /// When LANDED was entered.
    pub landed_time_ms: Option<u64>,
    /// Set by [`FlightPhaseController::set_error`].
    pub error_flag: bool,
    /// Reason for the error, at most [`ERROR_MESSAGE_CAPACITY`] bytes.
    pub error_message: String,
}

impl FlightState {
    fn initial(timestamp_ms: u64) -> Self {
        Self {
            phase: FlightPhase::Unarmed,
            altitude: 0.0,
            max_altitude: 0.0,
            velocity: 0.0,
            timestamp_ms,
            logging_enabled: false,
            radio_enabled: false,
            launch_time_ms: None,
            apogee_time_ms: None,
            landed_time_ms: None,
            error_flag: false,
            error_message: String::new(),
        }
    }
}

/// A condition that must hold continuously for `dwell_ms` before it fires.
#[derive(Debug, Clone, Copy)]
struct Debounce {
    dwell_ms: u64,
    since: Option<u64>,
}

impl Debounce {
    fn new(dwell_ms: u64) -> Self {
        Self {
            dwell_ms,
            since: None,
        }
    }

    /// Feed one observation. Returns true once the condition has held long enough.
    fn observe(&mut self, holds: bool, now: u64) -> bool {
        if !holds {
            self.since = None;
            return false;
        }
        let since = *self.since.get_or_insert(now);
        if now.saturating_sub(since) >= self.dwell_ms {
            self.since = None;
            true
        } else {
            false
        }
    }

    fn clear(&mut self) {
        self.since = None;
    }
}

/// Flight phase state machine.
#[derive(Debug)]
pub struct FlightPhaseController<C> {
    clock: C,
    config: FlightConfig,
    state: FlightState,
    launch: Debounce,
    apogee: Debounce,
    descent: Debounce,
    landed: Debounce,
    previous_altitude: f32,
    previous_velocity: f32,
    last_update_ms: Option<u64>,
}

impl<C: Clock> FlightPhaseController<C> {
    /// Create a controller in UNARMED.
    pub fn new(clock: C, config: FlightConfig) -> Self {
        let now = clock.now_ms();
        Self {
            launch: Debounce::new(config.launch_dwell_ms),
            apogee: Debounce::new(config.apogee_dwell_ms),
            descent: Debounce::new(config.descent_dwell_ms),
            landed: Debounce::new(config.landed_dwell_ms),
            clock,
            config,
            state: FlightState::initial(now),
            previous_altitude: 0.0,
            previous_velocity: 0.0,
            last_update_ms: None,
        }
    }

    /// Current state snapshot.
    #[must_use]
    pub fn state(&self) -> &FlightState {
        &self.state
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> FlightPhase {
        self.state.phase
    }

    /// Advance the state machine by one tick.
    ///
    /// `altitude` is in metres, `acceleration` is the acceleration magnitude in
    /// g. When `velocity` is `None` it is derived from the altitude change since
    /// the previous update. Returns true if the phase changed.
    pub fn update(&mut self, altitude: f32, acceleration: f32, velocity: Option<f32>) -> bool {
        let now = self.clock.now_ms();
        let velocity = velocity.unwrap_or_else(|| self.derive_velocity(altitude, now));
        self.last_update_ms = Some(now);

        self.state.timestamp_ms = now;
        self.state.altitude = altitude;
        self.state.velocity = velocity;
        if altitude > self.state.max_altitude {
            self.state.max_altitude = altitude;
        }

        let cfg = &self.config;
        let next = match self.state.phase {
            // Arming is always an explicit command.
            FlightPhase::Unarmed | FlightPhase::Landed | FlightPhase::Error => None,
            FlightPhase::Armed => self
                .launch
                .observe(acceleration > cfg.launch_accel_threshold_g, now)
                .then_some(FlightPhase::Launch),
            FlightPhase::Launch => self
                .apogee
                .observe(velocity < cfg.apogee_velocity_threshold, now)
                .then_some(FlightPhase::Apogee),
            FlightPhase::Apogee => self
                .descent
                .observe(velocity < cfg.descent_velocity_threshold, now)
                .then_some(FlightPhase::Descent),
            FlightPhase::Descent => {
                let low = altitude < cfg.landed_altitude_threshold;
                let still = (acceleration - 1.0).abs() < cfg.landed_accel_threshold_g;
                self.landed
                    .observe(low && still, now)
                    .then_some(FlightPhase::Landed)
            }
        };

        self.previous_altitude = altitude;
        self.previous_velocity = velocity;

        let Some(next) = next else {
            return false;
        };

        match next {
            FlightPhase::Launch => self.state.launch_time_ms = Some(now),
            FlightPhase::Apogee => self.state.apogee_time_ms = Some(now),
            FlightPhase::Landed => self.state.landed_time_ms = Some(now),
            _ => {}
        }
        info!(
            from = %self.state.phase,
            to = %next,
            altitude,
            velocity,
            acceleration,
            "flight phase changed"
        );
        self.state.phase = next;
        true
    }

    fn derive_velocity(&self, altitude: f32, now: u64) -> f32 {
        match self.last_update_ms {
            Some(last) if now > last => {
                let seconds = (now - last) as f32 / 1000.0;
                (altitude - self.previous_altitude) / seconds
            }
            _ => self.previous_velocity,
        }
    }

    /// Force a phase, e.g. from a ground ARM/DISARM command.
    ///
    /// ARMED turns logging and radio on; UNARMED turns both off. Pending
    /// debounce timers are discarded.
    pub fn set_phase(&mut self, phase: FlightPhase) {
        debug!(from = %self.state.phase, to = %phase, "flight phase set by command");
        self.state.phase = phase;
        self.state.timestamp_ms = self.clock.now_ms();
        match phase {
            FlightPhase::Armed => {
                self.state.logging_enabled = true;
                self.state.radio_enabled = true;
            }
            FlightPhase::Unarmed => {
                self.state.logging_enabled = false;
                self.state.radio_enabled = false;
            }
            _ => {}
        }
        self.clear_debounce();
    }

    /// Enter ERROR and record why.
    ///
    /// The message is cut to [`ERROR_MESSAGE_CAPACITY`] bytes on a character
    /// boundary. Only [`reset`](Self::reset) or `set_phase` leave ERROR.
    pub fn set_error(&mut self, message: &str) {
        let mut end = message.len().min(ERROR_MESSAGE_CAPACITY);
        while !message.is_char_boundary(end) {
            end -= 1;
        }
        warn!(message, "flight controller entering ERROR");
        self.state.phase = FlightPhase::Error;
        self.state.error_flag = true;
        self.state.error_message = message[..end].to_string();
        self.state.timestamp_ms = self.clock.now_ms();
        self.clear_debounce();
    }

    /// Turn storage logging on or off without changing phase.
    pub fn set_logging_enabled(&mut self, enabled: bool) {
        self.state.logging_enabled = enabled;
    }

    /// Turn radio downlink on or off without changing phase.
    pub fn set_radio_enabled(&mut self, enabled: bool) {
        self.state.radio_enabled = enabled;
    }

    /// Return to UNARMED, clearing timers, flags and altitude history.
    pub fn reset(&mut self) {
        self.state = FlightState::initial(self.clock.now_ms());
        self.clear_debounce();
        self.previous_altitude = 0.0;
        self.previous_velocity = 0.0;
        self.last_update_ms = None;
    }

    fn clear_debounce(&mut self) {
        self.launch.clear();
        self.apogee.clear();
        self.descent.clear();
        self.landed.clear();
    }
}
