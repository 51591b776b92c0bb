//! The per-tick telemetry pipeline.
//!
//! [`TelemetryPipeline`] wires the flight controller, the frame codec, the
//! storage engine and the radio link together. Each [`tick`](TelemetryPipeline::tick):
//!
//! 1. feeds the sample to the flight controller
//! 2. builds a status frame, plus accel and baro frames for valid readings
//! 3. queues frames for storage and appends a CSV row while logging is enabled
//! 4. sends frames over the radio while the radio is enabled
//! 5. services the uplink: ground commands and control-channel text
//!
//! Failures never abort a tick. They are logged and collected in the
//! [`TickReport`].

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::flight::{FlightPhase, FlightPhaseController, FlightState};
use crate::packet::{
    self, AccelPayload, BaroPayload, Frame, GroundCommand, PacketCodec, StartMarker,
    StatusPayload, Tag, FRAME_LEN,
};
use crate::radio::{ControlOutcome, RadioLink, SerialTransport};
use crate::sample::SensorData;
use crate::storage::archive::ArchiveRow;
use crate::storage::{ByteSink, Priority, PriorityBufferedStore};

/// A failure during a tick that was absorbed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Fault {
    /// Pipeline stage that failed.
    pub stage: &'static str,
    /// Error text.
    pub message: String,
}

impl Fault {
    fn new(stage: &'static str, err: &Error) -> Self {
        warn!(stage, error = %err, "tick fault");
        Self {
            stage,
            message: err.to_string(),
        }
    }
}

/// Something that arrived on the uplink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UplinkEvent {
    /// A ground command was applied.
    Command {
        /// The command.
        command: GroundCommand,
    },
    /// A control-channel command was processed or deferred.
    Control {
        /// What happened.
        outcome: ControlOutcome,
    },
    /// A frame-length line failed validation.
    InvalidFrame {
        /// Why it was rejected.
        reason: String,
    },
    /// A valid frame with a tag the flight computer does not act on.
    Ignored {
        /// The frame tag.
        tag: Tag,
    },
    /// The RX ring filled up without a line break and was emptied.
    RxOverflow {
        /// Bytes thrown away.
        discarded: usize,
    },
}

/// What happened during one tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickReport {
    /// Tick number, starting at 1.
    pub tick: u64,
    /// Clock time of the tick (ms).
    pub timestamp_ms: u64,
    /// Phase after the tick.
    pub phase: FlightPhase,
    /// Previous phase, when the phase changed since the last tick.
    pub previous_phase: Option<FlightPhase>,
    /// Frames encoded.
    pub frames_built: usize,
    /// Frames handed to storage.
    pub frames_stored: usize,
    /// Frames queued for the radio.
    pub frames_sent: usize,
    /// Uplink activity.
    pub uplink: Vec<UplinkEvent>,
    /// Absorbed failures.
    pub faults: Vec<Fault>,
}

impl TickReport {
    /// Whether the phase changed on this tick.
    #[must_use]
    pub fn phase_changed(&self) -> bool {
        self.previous_phase.is_some()
    }
}

/// The flight computer's telemetry loop.
#[derive(Debug)]
pub struct TelemetryPipeline<P, A, T, C> {
    controller: FlightPhaseController<C>,
    codec: PacketCodec<C>,
    store: PriorityBufferedStore<P, A>,
    radio: RadioLink<T, C>,
    clock: C,
    downlink_every: u64,
    tick: u64,
    last_phase: FlightPhase,
    last_altitude: f32,
    last_accel: f32,
    archive_ready: bool,
}

impl<P, A, T, C> TelemetryPipeline<P, A, T, C>
where
    P: ByteSink,
    A: ByteSink,
    T: SerialTransport,
    C: Clock + Clone,
{
    /// Build a pipeline from its sinks, transport and clock.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigValidation`] if `config` is invalid.
    pub fn new(config: &Config, clock: C, primary: P, archival: A, transport: T) -> Result<Self> {
        config.validate()?;
        let controller = FlightPhaseController::new(clock.clone(), config.flight.clone());
        Ok(Self {
            last_phase: controller.phase(),
            controller,
            codec: PacketCodec::new(clock.clone(), config.pipeline.downlink_marker),
            store: PriorityBufferedStore::new(primary, archival, &config.storage)?,
            radio: RadioLink::new(transport, clock.clone(), config.radio.clone())?,
            clock,
            downlink_every: u64::from(config.pipeline.downlink_every),
            tick: 0,
            last_altitude: 0.0,
            last_accel: 1.0,
            archive_ready: false,
        })
    }

    /// Run one control-loop tick.
    pub fn tick(&mut self, sample: &SensorData) -> TickReport {
        self.tick += 1;
        let mut faults = Vec::new();

        if sample.baro_valid {
            self.last_altitude = sample.baro.altitude_m;
        }
        if sample.accel_valid {
            self.last_accel = sample.accel.magnitude();
        }
        self.controller
            .update(self.last_altitude, self.last_accel, sample.velocity);

        let state = self.controller.state().clone();
        let previous_phase = (state.phase != self.last_phase).then_some(self.last_phase);
        self.last_phase = state.phase;

        let status_sequence = self.codec.next_sequence();
        let status = self.encode(
            &StatusPayload {
                phase: state.phase,
                altitude: state.altitude,
                max_altitude: state.max_altitude,
            }
            .to_payload(),
            Tag::STATUS,
        );
        let mut frames: Vec<(Priority, Frame)> = Vec::with_capacity(3);
        let status_priority = if previous_phase.is_some() {
            Priority::Mandatory
        } else {
            Priority::Standard
        };
        frames.push((status_priority, status));

        if sample.accel_valid {
            let payload = AccelPayload {
                x: sample.accel.x,
                y: sample.accel.y,
                z: sample.accel.z,
            }
            .to_payload();
            frames.push((Priority::Standard, self.encode(&payload, Tag::ACCEL)));
        }
        if sample.baro_valid {
            let payload = BaroPayload {
                pressure_pa: sample.baro.pressure_pa as i64,
            }
            .to_payload();
            frames.push((Priority::Standard, self.encode(&payload, Tag::BARO)));
        }

        let frames_stored = if state.logging_enabled {
            self.log(&state, sample, status_sequence, &frames, &mut faults)
        } else {
            0
        };

        let frames_sent = if state.radio_enabled && self.tick % self.downlink_every == 0 {
            self.downlink(&frames, &mut faults)
        } else {
            0
        };

        if state.phase == FlightPhase::Landed && previous_phase.is_some() {
            info!(max_altitude = state.max_altitude, "landed, syncing storage");
            if let Err(e) = self.store.sync() {
                faults.push(Fault::new("storage sync", &e));
            }
        }

        let uplink = self.service_uplink(&mut faults);

        TickReport {
            tick: self.tick,
            timestamp_ms: state.timestamp_ms,
            phase: self.controller.phase(),
            previous_phase,
            frames_built: frames.len(),
            frames_stored,
            frames_sent,
            uplink,
            faults,
        }
    }

    fn encode(&mut self, payload: &packet::Payload, tag: Tag) -> Frame {
        self.codec.encode(payload, tag)
    }

    fn log(
        &mut self,
        state: &FlightState,
        sample: &SensorData,
        sequence: u32,
        frames: &[(Priority, Frame)],
        faults: &mut Vec<Fault>,
    ) -> usize {
        for (priority, frame) in frames {
            self.store.enqueue(*priority, frame);
        }
        if let Err(e) = self.store.tick() {
            faults.push(Fault::new("storage tick", &e));
        }

        if !self.archive_ready {
            match self.store.ensure_archival_header() {
                Ok(_) => self.archive_ready = true,
                Err(e) => faults.push(Fault::new("archive header", &e)),
            }
        }
        let row = ArchiveRow {
            timestamp_ms: state.timestamp_ms,
            sequence,
            accel_x: sample.accel.x,
            accel_y: sample.accel.y,
            accel_z: sample.accel.z,
            accel_magnitude: self.last_accel,
            altitude: state.altitude,
            phase: state.phase,
        };
        if let Err(e) = self.store.buffer_archival(row.to_string().as_bytes()) {
            faults.push(Fault::new("archive row", &e));
        }
        frames.len()
    }

    fn downlink(&mut self, frames: &[(Priority, Frame)], faults: &mut Vec<Fault>) -> usize {
        let mut sent = 0;
        for (_, frame) in frames {
            match self.radio.write_to_tx(frame) {
                Ok(()) => sent += 1,
                Err(e) => faults.push(Fault::new("radio queue", &e)),
            }
        }
        if let Err(e) = self.radio.flush_tx() {
            faults.push(Fault::new("radio flush", &e));
        }
        sent
    }

    /// Read the uplink and act on complete lines.
    ///
    /// A valid `CM` frame applies its [`GroundCommand`]. Other lines that are not
    /// frames go to the radio control channel. A ring that filled up without a
    /// line break is emptied so later traffic can get through, and a control
    /// command kept after the modem refused AT mode is retried once more bytes
    /// have arrived.
    ///
    /// Transport and control-channel failures are added to `faults`; events
    /// already seen are still returned.
    pub fn service_uplink(&mut self, faults: &mut Vec<Fault>) -> Vec<UplinkEvent> {
        if let Err(e) = self.radio.poll_transport() {
            faults.push(Fault::new("uplink poll", &e));
        }
        let arrived = self.radio.rx_len() > 0;

        let mut events = Vec::new();
        let mut control_attempted = false;
        while let Some(line) = self.radio.read_frame() {
            let is_frame =
                line.len() == FRAME_LEN && StartMarker::from_byte(line[0]).is_some();
            if !is_frame {
                control_attempted = true;
                let text = String::from_utf8_lossy(&line);
                if !self.control(&text, &mut events, faults) {
                    break;
                }
                continue;
            }

            let decoded = packet::decode(&line);
            if let Some(fault) = decoded.fault() {
                debug!(%fault, "invalid uplink frame dropped");
                events.push(UplinkEvent::InvalidFrame {
                    reason: fault.to_string(),
                });
                continue;
            }
            match (decoded.tag(), GroundCommand::from_payload(decoded.payload())) {
                (Tag::COMMAND, Some(command)) => {
                    self.command(command);
                    events.push(UplinkEvent::Command { command });
                }
                (tag, _) => {
                    debug!(%tag, "uplink frame ignored");
                    events.push(UplinkEvent::Ignored { tag });
                }
            }
        }

        let discarded = self.radio.discard_unterminated_rx();
        if discarded > 0 {
            warn!(discarded, "uplink ring overflowed without a line break");
            events.push(UplinkEvent::RxOverflow { discarded });
        }

        if arrived && !control_attempted && self.radio.has_pending_command() {
            self.control("", &mut events, faults);
        }
        events
    }

    /// Feed `text` to the control channel. Returns false if the link failed.
    fn control(
        &mut self,
        text: &str,
        events: &mut Vec<UplinkEvent>,
        faults: &mut Vec<Fault>,
    ) -> bool {
        match self.radio.handle_control_text(text) {
            Ok(ControlOutcome::Pending) => true,
            Ok(outcome) => {
                events.push(UplinkEvent::Control { outcome });
                true
            }
            Err(e) => {
                faults.push(Fault::new("control channel", &e));
                false
            }
        }
    }

    /// Apply a ground command.
    pub fn command(&mut self, command: GroundCommand) {
        info!(command = command.word(), "ground command");
        match command {
            GroundCommand::Arm => self.controller.set_phase(FlightPhase::Armed),
            GroundCommand::Disarm => self.controller.set_phase(FlightPhase::Unarmed),
            GroundCommand::Reset => self.controller.reset(),
        }
    }

    /// Record a hardware failure. The flight controller enters ERROR and the
    /// next tick stores the change as a mandatory frame.
    pub fn report_fault(&mut self, message: &str) {
        self.controller.set_error(message);
    }

    /// Drain storage and the radio.
    ///
    /// Both are attempted; the first error is returned.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Sink`] or [`Error::Transport`].
    pub fn shutdown(&mut self) -> Result<()> {
        let stored = self.store.sync();
        let sent = self.radio.flush_tx();
        info!(ticks = self.tick, phase = %self.controller.phase(), "pipeline shut down");
        stored.and(sent)
    }

    /// Current flight state.
    #[must_use]
    pub fn state(&self) -> &FlightState {
        self.controller.state()
    }

    /// The flight controller.
    #[must_use]
    pub fn controller(&self) -> &FlightPhaseController<C> {
        &self.controller
    }

    /// The flight controller, mutably.
    pub fn controller_mut(&mut self) -> &mut FlightPhaseController<C> {
        &mut self.controller
    }

    /// The storage engine.
    #[must_use]
    pub fn store(&self) -> &PriorityBufferedStore<P, A> {
        &self.store
    }

    /// The radio link.
    #[must_use]
    pub fn radio(&self) -> &RadioLink<T, C> {
        &self.radio
    }

    /// The radio link, mutably.
    pub fn radio_mut(&mut self) -> &mut RadioLink<T, C> {
        &mut self.radio
    }

    /// Ticks run so far.
    #[must_use]
    pub fn ticks(&self) -> u64 {
        self.tick
    }

    /// The pipeline clock.
    #[must_use]
    pub fn clock(&self) -> &C {
        &self.clock
    }
}
