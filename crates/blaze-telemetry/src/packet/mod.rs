//! Fixed-length binary telemetry frames.
//!
//! Every message on the radio link and in the primary flight log is one 32 byte
//! frame:
//!
//! | Offset | Size | Field |
//! |---|---|---|
//! | 0 | 1 | start marker |
//! | 1 | 4 | sequence number, big-endian |
//! | 5 | 2 | message tag |
//! | 7 | 4 | timestamp (ms), big-endian |
//! | 11 | 17 | payload |
//! | 28 | 2 | CRC-16-CCITT over bytes 0..28, big-endian |
//! | 30 | 2 | `\r\n` |
//!
//! Payload meaning is selected by the tag; see [`payload`].

pub mod payload;

use std::fmt;
use std::str::FromStr;

use crc::{Crc, CRC_16_IBM_3740};
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::error::FrameError;

pub use payload::{AccelPayload, BaroPayload, GroundCommand, StatusPayload};

/// Size of the payload field.
pub const PAYLOAD_LEN: usize = 17;

/// Total length of every frame.
pub const FRAME_LEN: usize = 32;

/// The two bytes closing every frame.
pub const TERMINATOR: [u8; 2] = [0x0D, 0x0A];

const SEQUENCE_OFFSET: usize = 1;
const TAG_OFFSET: usize = 5;
const TIMESTAMP_OFFSET: usize = 7;
const PAYLOAD_OFFSET: usize = 11;
const CRC_OFFSET: usize = 28;
const TERMINATOR_OFFSET: usize = 30;

/// CRC-16-CCITT: polynomial 0x1021, initial value 0xFFFF, MSB first, no final xor.
const CCITT: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

/// A raw 17 byte payload.
pub type Payload = [u8; PAYLOAD_LEN];

/// An encoded frame.
pub type Frame = [u8; FRAME_LEN];

/// Compute the frame checksum over `bytes`.
#[must_use]
pub fn crc16(bytes: &[u8]) -> u16 {
    CCITT.checksum(bytes)
}

/// First byte of a frame, telling the receiver how to respond.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum StartMarker {
    /// Fire and forget.
    NoResponse = 0xA1,
    /// This frame is itself an acknowledgement.
    AckResponse = 0xA2,
    /// Payload is meant for a human operator.
    HumanReadable = 0xA3,
    /// The receiver must acknowledge this frame.
    ExpectAck = 0xA4,
}

impl StartMarker {
    /// All markers in wire order.
    pub const ALL: [Self; 4] = [
        Self::NoResponse,
        Self::AckResponse,
        Self::HumanReadable,
        Self::ExpectAck,
    ];

    /// Parse a marker byte.
    #[must_use]
    pub fn from_byte(byte: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|m| *m as u8 == byte)
    }

    /// The wire byte.
    #[must_use]
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for StartMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoResponse => write!(f, "no_response"),
            Self::AckResponse => write!(f, "ack_response"),
            Self::HumanReadable => write!(f, "human_readable"),
            Self::ExpectAck => write!(f, "expect_ack"),
        }
    }
}

impl FromStr for StartMarker {
    type Err = String;

    /// Accepts the snake case name or the wire byte in hex (`a1` or `0xA1`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(marker) = Self::ALL.into_iter().find(|m| m.to_string() == s) {
            return Ok(marker);
        }
        let hex = s.trim_start_matches("0x").trim_start_matches("0X");
        u8::from_str_radix(hex, 16)
            .ok()
            .and_then(Self::from_byte)
            .ok_or_else(|| format!("unknown start marker '{s}'"))
    }
}

/// Two ASCII bytes naming the payload layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tag(pub [u8; 2]);

impl Tag {
    /// Accelerometer axes.
    pub const ACCEL: Self = Self(*b"AC");
    /// Flight phase and altitudes.
    pub const STATUS: Self = Self(*b"ST");
    /// Barometric pressure.
    pub const BARO: Self = Self(*b"BA");
    /// Ground command on the uplink.
    pub const COMMAND: Self = Self(*b"CM");

    /// Build a tag from its two bytes.
    #[must_use]
    pub const fn new(a: u8, b: u8) -> Self {
        Self([a, b])
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", char::from(self.0[0]), char::from(self.0[1]))
    }
}

impl FromStr for Tag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.as_bytes() {
            [a, b] if a.is_ascii_graphic() && b.is_ascii_graphic() => Ok(Self::new(*a, *b)),
            _ => Err(format!("a tag is two printable ASCII characters, got '{s}'")),
        }
    }
}

impl Serialize for Tag {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Builds frames with a running sequence number.
///
/// One codec instance owns one sequence; consecutive [`encode`](Self::encode)
/// calls produce consecutive numbers, wrapping from `u32::MAX` to zero.
#[derive(Debug)]
pub struct PacketCodec<C> {
    clock: C,
    start_marker: StartMarker,
    sequence: u32,
}

impl<C: Clock> PacketCodec<C> {
    /// Create a codec stamping frames with `start_marker`.
    pub fn new(clock: C, start_marker: StartMarker) -> Self {
        Self {
            clock,
            start_marker,
            sequence: 0,
        }
    }

    /// The sequence number the next frame will carry.
    #[must_use]
    pub fn next_sequence(&self) -> u32 {
        self.sequence
    }

    /// Override the running sequence number.
    pub fn set_sequence(&mut self, sequence: u32) {
        self.sequence = sequence;
    }

    /// The marker written into new frames.
    #[must_use]
    pub fn start_marker(&self) -> StartMarker {
        self.start_marker
    }

    /// Change the marker written into new frames.
    pub fn set_start_marker(&mut self, marker: StartMarker) {
        self.start_marker = marker;
    }

    /// Encode a payload into a fresh frame.
    pub fn encode(&mut self, payload: &Payload, tag: Tag) -> Frame {
        let mut frame = [0u8; FRAME_LEN];
        self.encode_into(&mut frame, payload, tag);
        frame
    }

    /// Encode into `frame`, overwriting every byte of it.
    pub fn encode_into(&mut self, frame: &mut Frame, payload: &Payload, tag: Tag) {
        let timestamp = self.clock.now_ms() as u32;

        frame[0] = self.start_marker.as_byte();
        frame[SEQUENCE_OFFSET..TAG_OFFSET].copy_from_slice(&self.sequence.to_be_bytes());
        self.sequence = self.sequence.wrapping_add(1);
        frame[TAG_OFFSET..TIMESTAMP_OFFSET].copy_from_slice(&tag.0);
        frame[TIMESTAMP_OFFSET..PAYLOAD_OFFSET].copy_from_slice(&timestamp.to_be_bytes());
        frame[PAYLOAD_OFFSET..CRC_OFFSET].copy_from_slice(payload);

        let crc = crc16(&frame[..CRC_OFFSET]);
        frame[CRC_OFFSET..TERMINATOR_OFFSET].copy_from_slice(&crc.to_be_bytes());
        frame[TERMINATOR_OFFSET..].copy_from_slice(&TERMINATOR);
    }
}

/// A parsed frame.
///
/// Only [`decode`] produces these. Check [`is_valid`](Self::is_valid) before
/// trusting any field: an invalid result still carries whatever bytes could be
/// read so it can be logged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecodedPacket {
    is_valid: bool,
    #[serde(skip)]
    fault: Option<FrameError>,
    start_marker: Option<StartMarker>,
    sequence: u32,
    tag: Tag,
    timestamp_ms: u32,
    #[serde(serialize_with = "serialize_payload")]
    payload: Payload,
    crc: u16,
}

fn serialize_payload<S: serde::Serializer>(payload: &Payload, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&String::from_utf8_lossy(payload))
}

impl DecodedPacket {
    fn empty(fault: FrameError) -> Self {
        Self {
            is_valid: false,
            fault: Some(fault),
            start_marker: None,
            sequence: 0,
            tag: Tag([0, 0]),
            timestamp_ms: 0,
            payload: [0; PAYLOAD_LEN],
            crc: 0,
        }
    }

    /// Whether the frame passed every check.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.is_valid
    }

    /// The first check the frame failed, if any.
    #[must_use]
    pub fn fault(&self) -> Option<FrameError> {
        self.fault
    }

    /// The start marker, if the first byte was a known one.
    #[must_use]
    pub fn start_marker(&self) -> Option<StartMarker> {
        self.start_marker
    }

    /// Sequence number.
    #[must_use]
    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    /// Message tag.
    #[must_use]
    pub fn tag(&self) -> Tag {
        self.tag
    }

    /// Sender timestamp in milliseconds.
    #[must_use]
    pub fn timestamp_ms(&self) -> u32 {
        self.timestamp_ms
    }

    /// Raw payload bytes.
    #[must_use]
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// CRC carried by the frame.
    #[must_use]
    pub fn crc(&self) -> u16 {
        self.crc
    }
}

/// Parse and validate a frame.
///
/// Never fails: a frame with the wrong length, a missing terminator, an unknown
/// start marker or a bad CRC comes back with `is_valid() == false`.
#[must_use]
pub fn decode(bytes: &[u8]) -> DecodedPacket {
    if bytes.len() != FRAME_LEN {
        return DecodedPacket::empty(FrameError::Length {
            expected: FRAME_LEN,
            actual: bytes.len(),
        });
    }

    let mut payload = [0u8; PAYLOAD_LEN];
    payload.copy_from_slice(&bytes[PAYLOAD_OFFSET..CRC_OFFSET]);
    let received = u16::from_be_bytes([bytes[CRC_OFFSET], bytes[CRC_OFFSET + 1]]);
    let start_marker = StartMarker::from_byte(bytes[0]);

    let mut packet = DecodedPacket {
        is_valid: false,
        fault: None,
        start_marker,
        sequence: u32::from_be_bytes(be4(&bytes[SEQUENCE_OFFSET..TAG_OFFSET])),
        tag: Tag([bytes[TAG_OFFSET], bytes[TAG_OFFSET + 1]]),
        timestamp_ms: u32::from_be_bytes(be4(&bytes[TIMESTAMP_OFFSET..PAYLOAD_OFFSET])),
        payload,
        crc: received,
    };

    let computed = crc16(&bytes[..CRC_OFFSET]);
    packet.fault = if bytes[TERMINATOR_OFFSET..] != TERMINATOR {
        Some(FrameError::Terminator)
    } else if start_marker.is_none() {
        Some(FrameError::StartMarker(bytes[0]))
    } else if received != computed {
        Some(FrameError::Crc { received, computed })
    } else {
        None
    };
    packet.is_valid = packet.fault.is_none();
    packet
}

/// Find the valid frames in a byte stream that may carry other traffic too,
/// such as a radio capture with control-channel replies mixed in.
///
/// Returns each frame's offset and decoded form. A byte that does not start a
/// valid frame is skipped.
#[must_use]
pub fn scan(bytes: &[u8]) -> Vec<(usize, DecodedPacket)> {
    let mut found = Vec::new();
    let mut offset = 0;
    while offset + FRAME_LEN <= bytes.len() {
        if StartMarker::from_byte(bytes[offset]).is_some() {
            let decoded = decode(&bytes[offset..offset + FRAME_LEN]);
            if decoded.is_valid() {
                found.push((offset, decoded));
                offset += FRAME_LEN;
                continue;
            }
        }
        offset += 1;
    }
    found
}

fn be4(bytes: &[u8]) -> [u8; 4] {
    let mut out = [0u8; 4];
    out.copy_from_slice(bytes);
    out
}
