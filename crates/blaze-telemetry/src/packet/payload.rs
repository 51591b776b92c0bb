//! Tag-specific payload layouts.
//!
//! Payloads are fixed-width ASCII decimal fields, left-padded with `0`. Scaled
//! values are truncated toward zero and clamped to what the field can hold, so
//! an out-of-range reading saturates instead of spilling into the next field.

use serde::Serialize;

use super::{Payload, Tag, PAYLOAD_LEN};
use crate::flight::FlightPhase;

/// Render `value` into a `width`-character zero-padded field.
fn push_field(out: &mut String, value: i64, width: usize) {
    let exp = u32::try_from(width).unwrap_or(u32::MAX).min(18);
    let max = 10i64.pow(exp) - 1;
    let min = -(10i64.pow(exp.saturating_sub(1)) - 1);
    out.push_str(&format!("{:0width$}", value.clamp(min, max), width = width));
}

fn to_payload(text: &str) -> Payload {
    let mut payload = [b'0'; PAYLOAD_LEN];
    let bytes = text.as_bytes();
    let n = bytes.len().min(PAYLOAD_LEN);
    payload[..n].copy_from_slice(&bytes[..n]);
    payload
}

fn field(payload: &Payload, start: usize, width: usize) -> Option<i64> {
    std::str::from_utf8(&payload[start..start + width])
        .ok()?
        .parse()
        .ok()
}

fn scaled(value: f32, scale: f32) -> i64 {
    (value * scale) as i64
}

/// Accelerometer axes in g, carried as milli-g.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AccelPayload {
    /// X axis (g).
    pub x: f32,
    /// Y axis (g).
    pub y: f32,
    /// Z axis (g).
    pub z: f32,
}

impl AccelPayload {
    /// Tag carried by frames with this payload.
    pub const TAG: Tag = Tag::ACCEL;

    /// Encode as 5 + 6 + 6 digits.
    #[must_use]
    pub fn to_payload(&self) -> Payload {
        let mut text = String::with_capacity(PAYLOAD_LEN);
        push_field(&mut text, scaled(self.x, 1000.0), 5);
        push_field(&mut text, scaled(self.y, 1000.0), 6);
        push_field(&mut text, scaled(self.z, 1000.0), 6);
        to_payload(&text)
    }

    /// Parse a payload written by [`to_payload`](Self::to_payload).
    #[must_use]
    pub fn from_payload(payload: &Payload) -> Option<Self> {
        Some(Self {
            x: field(payload, 0, 5)? as f32 / 1000.0,
            y: field(payload, 5, 6)? as f32 / 1000.0,
            z: field(payload, 11, 6)? as f32 / 1000.0,
        })
    }
}

/// Flight phase plus current and peak altitude, carried in centimetres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StatusPayload {
    /// Current flight phase.
    pub phase: FlightPhase,
    /// Current altitude (m).
    pub altitude: f32,
    /// Highest altitude so far (m).
    pub max_altitude: f32,
}

impl StatusPayload {
    /// Tag carried by frames with this payload.
    pub const TAG: Tag = Tag::STATUS;

    /// Encode as 1 + 8 + 8 digits.
    #[must_use]
    pub fn to_payload(&self) -> Payload {
        let mut text = String::with_capacity(PAYLOAD_LEN);
        push_field(&mut text, i64::from(self.phase.as_u8()), 1);
        push_field(&mut text, scaled(self.altitude, 100.0), 8);
        push_field(&mut text, scaled(self.max_altitude, 100.0), 8);
        to_payload(&text)
    }

    /// Parse a payload written by [`to_payload`](Self::to_payload).
    #[must_use]
    pub fn from_payload(payload: &Payload) -> Option<Self> {
        let phase = FlightPhase::from_u8(u8::try_from(field(payload, 0, 1)?).ok()?)?;
        Some(Self {
            phase,
            altitude: field(payload, 1, 8)? as f32 / 100.0,
            max_altitude: field(payload, 9, 8)? as f32 / 100.0,
        })
    }
}

/// Barometric pressure in whole pascals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BaroPayload {
    /// Pressure (Pa).
    pub pressure_pa: i64,
}

impl BaroPayload {
    /// Tag carried by frames with this payload.
    pub const TAG: Tag = Tag::BARO;

    /// Encode as one 17 digit signed field.
    #[must_use]
    pub fn to_payload(&self) -> Payload {
        let mut text = String::with_capacity(PAYLOAD_LEN);
        push_field(&mut text, self.pressure_pa, PAYLOAD_LEN);
        to_payload(&text)
    }

    /// Parse a payload written by [`to_payload`](Self::to_payload).
    #[must_use]
    pub fn from_payload(payload: &Payload) -> Option<Self> {
        Some(Self {
            pressure_pa: field(payload, 0, PAYLOAD_LEN)?,
        })
    }
}

/// A command sent from the ground station on the uplink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GroundCommand {
    /// Enter ARMED.
    Arm,
    /// Return to UNARMED.
    Disarm,
    /// Clear all state, including ERROR.
    Reset,
}

impl GroundCommand {
    /// Tag carried by frames with this payload.
    pub const TAG: Tag = Tag::COMMAND;

    /// The command word.
    #[must_use]
    pub fn word(self) -> &'static str {
        match self {
            Self::Arm => "ARM",
            Self::Disarm => "DISARM",
            Self::Reset => "RESET",
        }
    }

    /// Encode as the command word, space padded.
    #[must_use]
    pub fn to_payload(self) -> Payload {
        let mut payload = [b' '; PAYLOAD_LEN];
        let word = self.word().as_bytes();
        payload[..word.len()].copy_from_slice(word);
        payload
    }

    /// Look up a command word.
    #[must_use]
    pub fn from_word(word: &str) -> Option<Self> {
        match word {
            "ARM" => Some(Self::Arm),
            "DISARM" => Some(Self::Disarm),
            "RESET" => Some(Self::Reset),
            _ => None,
        }
    }

    /// Parse a command payload, ignoring padding.
    #[must_use]
    pub fn from_payload(payload: &Payload) -> Option<Self> {
        let text = std::str::from_utf8(payload).ok()?;
        Self::from_word(text.trim_matches(|c: char| c == ' ' || c == '\0'))
    }
}
