//! Error types for blaze-telemetry.
//!
//! Errors are grouped the same way the flight computer treats them at runtime:
//! framing and protocol problems are dropped and reported, capacity problems are
//! rejected at the boundary, sink and transport failures propagate to the caller
//! after the affected buffer has been cleared. Nothing here is fatal to the
//! control loop.

use thiserror::Error;

use crate::storage::Tier;

/// The main error type for blaze-telemetry operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Framing Errors ===
    /// A frame failed validation.
    #[error("invalid frame: {0}")]
    Frame(#[from] FrameError),

    // === Capacity Errors ===
    /// A payload was larger than the transmit path accepts.
    #[error("payload of {len} bytes exceeds the {max} byte limit")]
    PayloadTooLarge {
        /// Size of the rejected payload.
        len: usize,
        /// Largest accepted payload.
        max: usize,
    },

    /// A priority outside the six defined levels.
    #[error("invalid write priority {0}, expected 0..=5")]
    InvalidPriority(u8),

    // === Sink Errors ===
    /// Writing or flushing a storage tier failed. The tier's buffer was cleared.
    #[error("{tier} sink failed: {source}")]
    Sink {
        /// Which storage tier failed.
        tier: Tier,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The serial transport failed.
    #[error("transport error: {0}")]
    Transport(#[source] std::io::Error),

    // === Protocol Errors ===
    /// The radio modem did not acknowledge the AT escape sequence.
    #[error("radio did not enter AT command mode")]
    AtModeUnavailable,

    /// A control-channel message could not be understood.
    #[error("protocol error: {0}")]
    Protocol(String),

    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    // === I/O Errors ===
    /// File system operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Serialization Errors ===
    /// JSON serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Generic Errors ===
    /// An operation timed out.
    #[error("operation timed out: {operation}")]
    Timeout {
        /// Description of the operation that timed out.
        operation: String,
    },

    /// An internal error occurred (bug).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Why a received frame was rejected.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// The frame was not exactly the fixed frame length.
    #[error("expected {expected} bytes, got {actual}")]
    Length {
        /// The fixed frame length.
        expected: usize,
        /// The received length.
        actual: usize,
    },

    /// The frame did not end in CR LF.
    #[error("missing CR LF terminator")]
    Terminator,

    /// The first byte is not one of the four start markers.
    #[error("unknown start marker {0:#04x}")]
    StartMarker(u8),

    /// The trailing CRC does not match the frame contents.
    #[error("CRC mismatch: frame carries {received:#06x}, computed {computed:#06x}")]
    Crc {
        /// CRC carried in the frame.
        received: u16,
        /// CRC recomputed over the frame.
        computed: u16,
    },
}

/// A specialized Result type for blaze-telemetry operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl Error {
    /// Create a sink error for the given tier.
    #[must_use]
    pub fn sink(tier: Tier, source: std::io::Error) -> Self {
        Self::Sink { tier, source }
    }

    /// Create a new protocol error.
    #[must_use]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Create a configuration validation error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            message: message.into(),
        }
    }

    /// Check if this error came from a storage sink.
    #[must_use]
    pub fn is_sink_error(&self) -> bool {
        matches!(self, Self::Sink { .. })
    }

    /// Check if this error is a capacity rejection.
    #[must_use]
    pub fn is_capacity_error(&self) -> bool {
        matches!(self, Self::PayloadTooLarge { .. } | Self::InvalidPriority(_))
    }
}
