//! CLI command definitions.
//!
//! This module defines the structure of all CLI subcommands.

use std::path::PathBuf;

use clap::{Args, Subcommand};

use crate::packet::{StartMarker, Tag};
use crate::sim::FlightProfile;

/// Simulate command arguments.
#[derive(Debug, Args)]
pub struct SimulateCommand {
    /// Directory for the flight logs (defaults to the configured log directory)
    #[arg(short, long, value_name = "DIR")]
    pub out: Option<PathBuf>,

    /// Control loop period in milliseconds (defaults to the configured tick interval)
    #[arg(long, value_name = "MS")]
    pub tick_ms: Option<u64>,

    /// Pace ticks in real time instead of running as fast as possible
    #[arg(long)]
    pub realtime: bool,

    /// Uplink script to replay ("<time_ms> <line>" per line); defaults to ARM at 0 ms
    #[arg(short, long, value_name = "FILE")]
    pub script: Option<PathBuf>,

    /// Motor burn time in seconds
    #[arg(long, default_value = "2.0")]
    pub burn_time: f32,

    /// Sensed acceleration during the burn, in g
    #[arg(long, default_value = "6.0")]
    pub thrust: f32,

    /// Descent rate under parachute, in m/s
    #[arg(long, default_value = "15.0")]
    pub descent_rate: f32,

    /// Print the run summary as JSON
    #[arg(short, long)]
    pub json: bool,
}

impl SimulateCommand {
    /// The flight profile described by the arguments.
    #[must_use]
    pub fn profile(&self) -> FlightProfile {
        FlightProfile {
            burn_time_s: self.burn_time,
            thrust_g: self.thrust,
            descent_rate: self.descent_rate,
            ..FlightProfile::default()
        }
    }
}

/// Decode command arguments.
#[derive(Debug, Args)]
pub struct DecodeCommand {
    /// One frame as hex (whitespace allowed)
    #[arg(required_unless_present = "file", conflicts_with = "file")]
    pub hex: Option<String>,

    /// Binary log or radio capture to scan for frames
    #[arg(short, long, value_name = "FILE")]
    pub file: Option<PathBuf>,

    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Encode command arguments.
#[derive(Debug, Args)]
pub struct EncodeCommand {
    /// Two-character message tag, e.g. CM
    #[arg(short, long)]
    pub tag: Tag,

    /// Payload text, space padded to 17 bytes
    #[arg(short, long)]
    pub payload: String,

    /// Start marker: a name such as expect_ack, or the byte in hex
    #[arg(short, long, default_value = "no_response")]
    pub marker: StartMarker,

    /// Sequence number
    #[arg(short, long, default_value = "0")]
    pub sequence: u32,

    /// Timestamp in milliseconds
    #[arg(long, default_value = "0")]
    pub timestamp: u64,
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show the configuration file path
    Path,

    /// Validate configuration
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simulate() -> SimulateCommand {
        SimulateCommand {
            out: None,
            tick_ms: None,
            realtime: false,
            script: None,
            burn_time: 3.0,
            thrust: 8.0,
            descent_rate: 10.0,
            json: false,
        }
    }

    #[test]
    fn test_profile_from_arguments() {
        let profile = simulate().profile();
        assert!((profile.burn_time_s - 3.0).abs() < f32::EPSILON);
        assert!((profile.thrust_g - 8.0).abs() < f32::EPSILON);
        assert!((profile.descent_rate - 10.0).abs() < f32::EPSILON);
        assert!((profile.pad_time_s - FlightProfile::default().pad_time_s).abs() < f32::EPSILON);
    }

    #[test]
    fn test_config_command_debug() {
        let cmd = ConfigCommand::Show { json: false };
        let debug_str = format!("{cmd:?}");
        assert!(debug_str.contains("Show"));
    }

    #[test]
    fn test_simulate_command_debug() {
        let debug_str = format!("{:?}", simulate());
        assert!(debug_str.contains("realtime"));
    }
}
