//! `blaze-telemetry` - Telemetry core for a model-rocket flight computer
//!
//! This library provides the flight phase state machine, the 32-byte telemetry
//! frame codec, a prioritized two-tier storage engine, and a serial radio link
//! with an over-the-air control channel, plus the per-tick pipeline that ties
//! them together and a synthetic flight for exercising it on a host.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod cli;
pub mod clock;
pub mod config;
pub mod error;
pub mod flight;
pub mod logging;
pub mod packet;
pub mod pipeline;
pub mod radio;
pub mod sample;
pub mod sim;
pub mod storage;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use error::{Error, FrameError, Result};
pub use flight::{FlightPhase, FlightPhaseController, FlightState};
pub use logging::init_logging;
pub use packet::{decode, DecodedPacket, PacketCodec, StartMarker, Tag};
pub use pipeline::{TelemetryPipeline, TickReport};
pub use radio::{RadioLink, SerialTransport, StreamTransport};
pub use sample::{AccelReading, BaroReading, SensorData};
pub use storage::{ByteSink, Priority, PriorityBufferedStore, Tier};
