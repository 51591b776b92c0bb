//! Command-line interface for blaze-telemetry.
//!
//! This module provides the CLI structure for the `blazetm` binary and the
//! handlers that are independent of the async runtime.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{ConfigCommand, DecodeCommand, EncodeCommand, SimulateCommand};

use crate::clock::ManualClock;
use crate::error::{Error, Result};
use crate::packet::{self, DecodedPacket, PacketCodec, Payload, FRAME_LEN, PAYLOAD_LEN};

/// blazetm - Rocket telemetry tools
///
/// Fly a simulated rocket through the telemetry pipeline, and encode or decode
/// telemetry frames.
#[derive(Debug, Parser)]
#[command(name = "blazetm")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to custom configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fly a synthetic rocket through the full pipeline
    Simulate(SimulateCommand),

    /// Decode telemetry frames
    Decode(DecodeCommand),

    /// Encode one telemetry frame
    Encode(EncodeCommand),

    /// View or check configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> crate::logging::Verbosity {
        crate::logging::Verbosity::from_flags(self.verbose, self.quiet)
    }
}

/// Parse a hex string, ignoring whitespace and an optional `0x` prefix.
///
/// # Errors
///
/// Returns [`Error::Protocol`] for odd-length input or non-hex characters.
pub fn parse_hex(text: &str) -> Result<Vec<u8>> {
    let digits: String = text.split_whitespace().collect();
    let digits = digits.strip_prefix("0x").unwrap_or(&digits);
    if !digits.is_ascii() {
        return Err(Error::protocol("hex input contains non-ASCII characters"));
    }
    if digits.len() % 2 != 0 {
        return Err(Error::protocol(format!(
            "hex input has an odd number of digits ({})",
            digits.len()
        )));
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&digits[i..i + 2], 16)
                .map_err(|_| Error::protocol(format!("invalid hex byte '{}'", &digits[i..i + 2])))
        })
        .collect()
}

/// Lower-case hex of `bytes`.
#[must_use]
pub fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

/// Build the frame described by `cmd`.
///
/// # Errors
///
/// Returns [`Error::PayloadTooLarge`] if the payload text exceeds 17 bytes.
pub fn encode_frame(cmd: &EncodeCommand) -> Result<[u8; FRAME_LEN]> {
    let text = cmd.payload.as_bytes();
    if text.len() > PAYLOAD_LEN {
        return Err(Error::PayloadTooLarge {
            len: text.len(),
            max: PAYLOAD_LEN,
        });
    }
    let mut payload: Payload = [b' '; PAYLOAD_LEN];
    payload[..text.len()].copy_from_slice(text);

    let mut codec = PacketCodec::new(ManualClock::starting_at(cmd.timestamp), cmd.marker);
    codec.set_sequence(cmd.sequence);
    Ok(codec.encode(&payload, cmd.tag))
}

/// One line of human-readable decode output.
#[must_use]
pub fn describe(offset: Option<usize>, packet: &DecodedPacket) -> String {
    let at = offset.map(|o| format!("@{o:<6} ")).unwrap_or_default();
    let marker = packet
        .start_marker()
        .map_or_else(|| "?".to_string(), |m| m.to_string());
    let status = match packet.fault() {
        None => "ok".to_string(),
        Some(fault) => format!("INVALID ({fault})"),
    };
    format!(
        "{at}seq={:<6} tag={} t={}ms marker={marker} payload={:?} crc={:04x} {status}",
        packet.sequence(),
        packet.tag(),
        packet.timestamp_ms(),
        String::from_utf8_lossy(packet.payload()),
        packet.crc(),
    )
}

/// Decode a hex frame.
///
/// # Errors
///
/// Returns [`Error::Protocol`] if `hex` is not valid hex.
pub fn decode_hex(hex: &str) -> Result<DecodedPacket> {
    Ok(packet::decode(&parse_hex(hex)?))
}
