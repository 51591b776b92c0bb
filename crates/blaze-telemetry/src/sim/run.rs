//! Driving a pipeline through a simulated flight.

use std::collections::VecDeque;

use blaze_telemetry_host::UplinkEntry;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::SimSample;
use crate::clock::{Clock, ManualClock};
use crate::error::Result;
use crate::flight::FlightPhase;
use crate::packet::{GroundCommand, PacketCodec, StartMarker, Tag, TERMINATOR};
use crate::pipeline::{TelemetryPipeline, TickReport, UplinkEvent};
use crate::radio::{ControlOutcome, RxProducer, SerialTransport};
use crate::storage::ByteSink;

/// A phase transition seen during the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PhaseChange {
    /// Tick on which the change was reported.
    pub tick: u64,
    /// Flight time of that tick (ms).
    pub t_ms: u64,
    /// Phase left.
    pub from: FlightPhase,
    /// Phase entered.
    pub to: FlightPhase,
}

/// Totals over a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    /// Ticks run.
    pub ticks: u64,
    /// Flight time of the last tick (ms).
    pub flight_time_ms: u64,
    /// Frames encoded.
    pub frames_built: usize,
    /// Frames handed to storage.
    pub frames_stored: usize,
    /// Frames queued for the radio.
    pub frames_sent: usize,
    /// Ground commands applied.
    pub commands: usize,
    /// Control-channel commands processed.
    pub control_commands: usize,
    /// Uplink frames rejected.
    pub invalid_uplink: usize,
    /// Uplink bytes lost to a full RX ring, refused on arrival or discarded unterminated.
    pub uplink_bytes_dropped: usize,
    /// Faults absorbed by the pipeline.
    pub faults: usize,
    /// Highest altitude seen (m).
    pub max_altitude: f32,
    /// Phase after the last tick.
    pub final_phase: FlightPhase,
    /// Phase transitions in order.
    pub phases: Vec<PhaseChange>,
}

/// A pipeline fed from a [`SimulatedFlight`](super::SimulatedFlight) with
/// scripted uplink traffic.
///
/// Script lines naming a [`GroundCommand`] are delivered as `CM` frames; any
/// other line is delivered as text followed by CR LF.
#[derive(Debug)]
pub struct FlightRun<P, A, T, C> {
    pipeline: TelemetryPipeline<P, A, T, C>,
    uplink: VecDeque<UplinkEntry>,
    rx: RxProducer,
    ground_clock: ManualClock,
    ground: PacketCodec<ManualClock>,
    summary: RunSummary,
}

impl<P, A, T, C> FlightRun<P, A, T, C>
where
    P: ByteSink,
    A: ByteSink,
    T: SerialTransport,
    C: Clock + Clone,
{
    /// Wrap `pipeline`; `uplink` must be in time order.
    pub fn new(pipeline: TelemetryPipeline<P, A, T, C>, uplink: Vec<UplinkEntry>) -> Self {
        let ground_clock = ManualClock::default();
        let summary = RunSummary {
            ticks: 0,
            flight_time_ms: 0,
            frames_built: 0,
            frames_stored: 0,
            frames_sent: 0,
            commands: 0,
            control_commands: 0,
            invalid_uplink: 0,
            uplink_bytes_dropped: 0,
            faults: 0,
            max_altitude: 0.0,
            final_phase: pipeline.state().phase,
            phases: Vec::new(),
        };
        Self {
            rx: pipeline.radio().rx_handle(),
            pipeline,
            uplink: uplink.into(),
            ground: PacketCodec::new(ground_clock.clone(), StartMarker::ExpectAck),
            ground_clock,
            summary,
        }
    }

    /// Deliver the uplink due by `sample.t_ms`, then run one tick.
    pub fn step(&mut self, sample: &SimSample) -> TickReport {
        while let Some(entry) = self.uplink.pop_front() {
            if entry.at_ms > sample.t_ms {
                self.uplink.push_front(entry);
                break;
            }
            self.deliver(&entry);
        }

        let report = self.pipeline.tick(&sample.data);
        self.record(sample.t_ms, &report);
        report
    }

    fn deliver(&mut self, entry: &UplinkEntry) {
        let bytes = match GroundCommand::from_word(entry.line.trim()) {
            Some(command) => {
                self.ground_clock.set(entry.at_ms);
                self.ground
                    .encode(&command.to_payload(), Tag::COMMAND)
                    .to_vec()
            }
            None => {
                let mut bytes = entry.line.as_bytes().to_vec();
                bytes.extend_from_slice(&TERMINATOR);
                bytes
            }
        };

        let dropped = bytes.iter().filter(|&&byte| !self.rx.push(byte)).count();
        if dropped > 0 {
            warn!(dropped, line = %entry.line, "RX ring full, uplink bytes dropped");
            self.summary.uplink_bytes_dropped += dropped;
        }
        debug!(at_ms = entry.at_ms, line = %entry.line, "uplink delivered");
    }

    fn record(&mut self, t_ms: u64, report: &TickReport) {
        let summary = &mut self.summary;
        summary.ticks = report.tick;
        summary.flight_time_ms = t_ms;
        summary.frames_built += report.frames_built;
        summary.frames_stored += report.frames_stored;
        summary.frames_sent += report.frames_sent;
        summary.faults += report.faults.len();
        for event in &report.uplink {
            match event {
                UplinkEvent::Command { .. } => summary.commands += 1,
                UplinkEvent::Control {
                    outcome: ControlOutcome::Processed { .. },
                } => summary.control_commands += 1,
                UplinkEvent::InvalidFrame { .. } => summary.invalid_uplink += 1,
                UplinkEvent::RxOverflow { discarded } => {
                    summary.uplink_bytes_dropped += *discarded;
                }
                UplinkEvent::Control { .. } | UplinkEvent::Ignored { .. } => {}
            }
        }
        if let Some(from) = report.previous_phase {
            summary.phases.push(PhaseChange {
                tick: report.tick,
                t_ms,
                from,
                to: report.phase,
            });
        }
        summary.final_phase = report.phase;
        summary.max_altitude = self.pipeline.state().max_altitude;
    }

    /// Drain storage and the radio.
    ///
    /// # Errors
    ///
    /// Returns the first storage or transport error.
    pub fn shutdown(&mut self) -> Result<()> {
        self.pipeline.shutdown()?;
        info!(
            ticks = self.summary.ticks,
            max_altitude = self.summary.max_altitude,
            phase = %self.summary.final_phase,
            "simulated flight finished"
        );
        Ok(())
    }

    /// Totals so far.
    #[must_use]
    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    /// Script entries not yet delivered.
    #[must_use]
    pub fn pending_uplink(&self) -> usize {
        self.uplink.len()
    }

    /// The wrapped pipeline.
    #[must_use]
    pub fn pipeline(&self) -> &TelemetryPipeline<P, A, T, C> {
        &self.pipeline
    }

    /// The wrapped pipeline, mutably.
    pub fn pipeline_mut(&mut self) -> &mut TelemetryPipeline<P, A, T, C> {
        &mut self.pipeline
    }

    /// Unwrap the pipeline.
    pub fn into_pipeline(self) -> TelemetryPipeline<P, A, T, C> {
        self.pipeline
    }
}

/// Fly every sample of `flight` as fast as possible, then shut down.
///
/// The pipeline's manual clock moves forward by the time between samples, so
/// anything that sleeps during a tick (AT mode guard times) pushes the clock
/// ahead of flight time rather than stalling it.
///
/// # Errors
///
/// Returns the shutdown error, see [`FlightRun::shutdown`].
pub fn run_flight<P, A, T, I>(run: &mut FlightRun<P, A, T, ManualClock>, flight: I) -> Result<()>
where
    P: ByteSink,
    A: ByteSink,
    T: SerialTransport,
    I: IntoIterator<Item = SimSample>,
{
    let clock = run.pipeline().clock().clone();
    let mut previous: Option<u64> = None;
    for sample in flight {
        if let Some(previous) = previous {
            clock.advance(sample.t_ms.saturating_sub(previous));
        }
        previous = Some(sample.t_ms);
        run.step(&sample);
    }
    run.shutdown()
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::config::Config;
    use crate::packet;
    use crate::sim::{FlightProfile, SimulatedFlight, SimulatedModem};

    type MemRun =
        FlightRun<Cursor<Vec<u8>>, Cursor<Vec<u8>>, SimulatedModem<Vec<u8>>, ManualClock>;

    fn flight_run(uplink: Vec<UplinkEntry>) -> MemRun {
        let pipeline = TelemetryPipeline::new(
            &Config::default(),
            ManualClock::default(),
            Cursor::new(Vec::new()),
            Cursor::new(Vec::new()),
            SimulatedModem::new(Vec::new()),
        )
        .unwrap();
        FlightRun::new(pipeline, uplink)
    }

    fn entry(at_ms: u64, line: &str) -> UplinkEntry {
        UplinkEntry {
            at_ms,
            line: line.to_string(),
        }
    }

    #[test]
    fn test_unarmed_flight_records_nothing() {
        let mut run = flight_run(Vec::new());
        run_flight(&mut run, SimulatedFlight::new(FlightProfile::default(), 10)).unwrap();

        let summary = run.summary();
        assert_eq!(summary.final_phase, FlightPhase::Unarmed);
        assert!(summary.phases.is_empty());
        assert_eq!(summary.frames_stored, 0);
        assert_eq!(summary.frames_sent, 0);
        assert!(run.pipeline().store().primary_sink().get_ref().is_empty());
    }

    #[test]
    fn test_armed_flight_reaches_landed() {
        let mut run = flight_run(vec![entry(0, "ARM")]);
        run_flight(&mut run, SimulatedFlight::new(FlightProfile::default(), 10)).unwrap();

        let summary = run.summary();
        assert_eq!(summary.commands, 1);
        assert_eq!(summary.final_phase, FlightPhase::Landed);
        let path: Vec<FlightPhase> = summary.phases.iter().map(|c| c.to).collect();
        assert_eq!(
            path,
            vec![
                FlightPhase::Armed,
                FlightPhase::Launch,
                FlightPhase::Apogee,
                FlightPhase::Descent,
                FlightPhase::Landed,
            ]
        );
        assert!(summary.max_altitude > 500.0);
        assert_eq!(summary.faults, 0);

        let primary = run.pipeline().store().primary_sink().get_ref();
        assert!(!primary.is_empty());
        assert_eq!(primary.len() % packet::FRAME_LEN, 0);
        assert!(primary
            .chunks(packet::FRAME_LEN)
            .all(|frame| packet::decode(frame).is_valid()));

        let archive = run.pipeline().store().archival_sink().get_ref();
        let text = String::from_utf8_lossy(archive);
        assert!(text.starts_with("timestamp_ms,"));
    }

    #[test]
    fn test_control_query_is_answered_on_the_downlink() {
        let mut run = flight_run(vec![entry(0, "ARM"), entry(500, "rocket-netid?-end")]);
        run_flight(&mut run, SimulatedFlight::new(FlightProfile::default(), 10)).unwrap();

        let summary = run.summary();
        assert_eq!(summary.control_commands, 1);
        assert_eq!(summary.final_phase, FlightPhase::Landed);

        let modem = run.pipeline().radio().transport();
        assert_eq!(modem.reboots(), 1);
        let downlink = String::from_utf8_lossy(modem.downlink());
        assert!(downlink.contains("\nnetid=25\n"));
    }

    #[test]
    fn test_late_entries_stay_pending() {
        let mut run = flight_run(vec![entry(0, "ARM"), entry(10_000_000, "DISARM")]);
        run_flight(&mut run, SimulatedFlight::new(FlightProfile::default(), 50)).unwrap();
        assert_eq!(run.pending_uplink(), 1);
        assert_eq!(run.summary().commands, 1);
    }
}
