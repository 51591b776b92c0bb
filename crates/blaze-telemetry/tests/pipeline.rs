//! Whole-pipeline runs with in-memory sinks and a simulated modem.

use std::io::{self, Cursor, Seek, SeekFrom, Write};

use blaze_telemetry::packet::{self, GroundCommand, StatusPayload, FRAME_LEN};
use blaze_telemetry::pipeline::UplinkEvent;
use blaze_telemetry::sim::{run_flight, FlightProfile, FlightRun, SimulatedFlight, SimulatedModem};
use blaze_telemetry::{
    Config, FlightPhase, ManualClock, PacketCodec, StartMarker, Tag, TelemetryPipeline,
};
use blaze_telemetry_host::UplinkEntry;

type Modem = SimulatedModem<Vec<u8>>;

fn memory_pipeline() -> TelemetryPipeline<Cursor<Vec<u8>>, Cursor<Vec<u8>>, Modem, ManualClock> {
    TelemetryPipeline::new(
        &Config::default(),
        ManualClock::default(),
        Cursor::new(Vec::new()),
        Cursor::new(Vec::new()),
        SimulatedModem::new(Vec::new()),
    )
    .unwrap()
}

fn arm_at_zero() -> Vec<UplinkEntry> {
    vec![UplinkEntry {
        at_ms: 0,
        line: "ARM".to_string(),
    }]
}

fn status_phase(frame: &[u8]) -> Option<FlightPhase> {
    let decoded = packet::decode(frame);
    (decoded.tag() == Tag::STATUS)
        .then(|| StatusPayload::from_payload(decoded.payload()))
        .flatten()
        .map(|status| status.phase)
}

#[test]
fn simulated_flight_fills_every_output() {
    let mut run = FlightRun::new(memory_pipeline(), arm_at_zero());
    run_flight(&mut run, SimulatedFlight::new(FlightProfile::default(), 10)).unwrap();
    assert_eq!(run.summary().final_phase, FlightPhase::Landed);

    let pipeline = run.pipeline();

    // Primary tier: whole, valid frames only; status phases never go backwards.
    let primary = pipeline.store().primary_sink().get_ref();
    assert_eq!(primary.len() % FRAME_LEN, 0);
    let mut last_phase = FlightPhase::Unarmed;
    for frame in primary.chunks(FRAME_LEN) {
        assert!(packet::decode(frame).is_valid());
        if let Some(phase) = status_phase(frame) {
            assert!(phase >= last_phase, "{phase} after {last_phase}");
            last_phase = phase;
        }
    }
    assert_eq!(last_phase, FlightPhase::Landed);

    // Downlink: frames leave in encode order with no gaps while the radio is on.
    let downlink = pipeline.radio().transport().downlink();
    let sent = packet::scan(downlink);
    assert_eq!(sent.len() * FRAME_LEN, downlink.len());
    for pair in sent.windows(2) {
        assert_eq!(pair[1].1.sequence(), pair[0].1.sequence() + 1);
    }
    assert_eq!(sent.len(), run.summary().frames_sent);

    // Archival tier: header, then one 8-column row per logged tick.
    let archive = String::from_utf8(pipeline.store().archival_sink().get_ref().clone()).unwrap();
    let mut lines = archive.split("\r\n").filter(|line| !line.is_empty());
    assert_eq!(
        lines.next(),
        Some("timestamp_ms,pressure_Pa,altitude_m,temperature_C")
    );
    let rows: Vec<&str> = lines.collect();
    assert!(!rows.is_empty());
    assert!(rows.iter().all(|row| row.split(',').count() == 8));
    assert!(rows.last().unwrap().ends_with(",5"));
}

#[test]
fn uplink_frames_drive_the_flight_computer() {
    let mut pipeline = memory_pipeline();
    let rx = pipeline.radio().rx_handle();
    let mut ground = PacketCodec::new(ManualClock::default(), StartMarker::ExpectAck);

    let arm = ground.encode(&GroundCommand::Arm.to_payload(), Tag::COMMAND);
    let mut corrupted = ground.encode(&GroundCommand::Reset.to_payload(), Tag::COMMAND);
    corrupted[12] ^= 0x01;
    for byte in arm.iter().chain(corrupted.iter()) {
        assert!(rx.push(*byte));
    }

    let events = pipeline.service_uplink(&mut Vec::new());
    assert_eq!(
        events[0],
        UplinkEvent::Command {
            command: GroundCommand::Arm
        }
    );
    assert!(matches!(events[1], UplinkEvent::InvalidFrame { .. }));
    assert_eq!(pipeline.state().phase, FlightPhase::Armed);
    assert!(pipeline.state().logging_enabled);
}

#[test]
fn flooded_receiver_still_takes_commands() {
    let pipeline = memory_pipeline();
    let rx = pipeline.radio().rx_handle();
    // Line noise with no CR LF, more than the ring holds.
    let accepted = (0..1000u32).filter(|i| rx.push(0x20 + (i % 90) as u8)).count();
    assert_eq!(accepted, Config::default().radio.rx_capacity - 1);

    let uplink = vec![UplinkEntry {
        at_ms: 100,
        line: "ARM".to_string(),
    }];
    let mut run = FlightRun::new(pipeline, uplink);
    run_flight(&mut run, SimulatedFlight::new(FlightProfile::default(), 10)).unwrap();

    let summary = run.summary();
    assert_eq!(summary.uplink_bytes_dropped, accepted);
    assert_eq!(summary.commands, 1);
    assert_eq!(summary.final_phase, FlightPhase::Landed);
    assert_eq!(run.pending_uplink(), 0);
}

#[test]
fn control_channel_reconfigures_the_modem_mid_run() {
    let uplink = vec![
        UplinkEntry {
            at_ms: 0,
            line: "ARM".to_string(),
        },
        UplinkEntry {
            at_ms: 200,
            line: "rocket-netid=".to_string(),
        },
        UplinkEntry {
            at_ms: 300,
            line: "9&airspeed?-end".to_string(),
        },
    ];
    let mut run = FlightRun::new(memory_pipeline(), uplink);
    run_flight(&mut run, SimulatedFlight::new(FlightProfile::default(), 10)).unwrap();

    let summary = run.summary();
    assert_eq!(summary.control_commands, 1);
    assert_eq!(summary.final_phase, FlightPhase::Landed);

    let modem = run.pipeline().radio().transport();
    assert_eq!(modem.register(3), Some(9));
    let downlink = String::from_utf8_lossy(modem.downlink());
    assert!(downlink.contains("\nairspeed=64\n"));
}

/// A card that accepts nothing.
struct DeadCard;

impl Write for DeadCard {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::other("card removed"))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for DeadCard {
    fn seek(&mut self, _pos: SeekFrom) -> io::Result<u64> {
        Ok(0)
    }
}

#[test]
fn storage_failure_does_not_stop_the_flight() {
    let pipeline = TelemetryPipeline::new(
        &Config::default(),
        ManualClock::default(),
        Cursor::new(Vec::new()),
        DeadCard,
        SimulatedModem::new(Vec::new()),
    )
    .unwrap();
    let mut run = FlightRun::new(pipeline, arm_at_zero());

    let flight = SimulatedFlight::new(FlightProfile::default(), 10);
    let error = run_flight(&mut run, flight).unwrap_err();
    assert!(error.is_sink_error());

    let summary = run.summary();
    assert!(summary.faults > 0);
    assert_eq!(summary.final_phase, FlightPhase::Landed);
    assert!(!run.pipeline().radio().transport().downlink().is_empty());
}
