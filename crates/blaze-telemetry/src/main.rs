//! `blazetm` - CLI for blaze-telemetry
//!
//! This binary flies simulated rockets through the telemetry pipeline and
//! encodes or decodes telemetry frames.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::Parser;
use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use blaze_telemetry::cli::{
    self, Cli, Command, ConfigCommand, DecodeCommand, EncodeCommand, SimulateCommand,
};
use blaze_telemetry::sim::{run_flight, FlightRun, RunSummary, SimulatedFlight, SimulatedModem};
use blaze_telemetry::{
    init_logging, packet, Config, DecodedPacket, ManualClock, SystemClock, TelemetryPipeline,
};
use blaze_telemetry_host::{load_uplink_script, open_flight_logs, FlightLogPaths, UplinkEntry};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    init_logging(cli.verbosity());
    blaze_telemetry_host::init();

    match cli.command {
        Command::Simulate(cmd) => {
            let config = load_config(cli.config)?;
            handle_simulate(&config, &cmd).await
        }
        Command::Decode(cmd) => handle_decode(&cmd),
        Command::Encode(cmd) => handle_encode(&cmd),
        Command::Config(cmd) => handle_config(cli.config, cmd),
    }
}

fn load_config(path: Option<PathBuf>) -> Result<Config> {
    Config::load_from(path).context("failed to load configuration")
}

async fn handle_simulate(config: &Config, cmd: &SimulateCommand) -> Result<()> {
    let tick_ms = cmd.tick_ms.unwrap_or(config.pipeline.tick_interval_ms);
    if tick_ms == 0 {
        bail!("--tick-ms must be greater than 0");
    }
    let uplink = match &cmd.script {
        Some(path) => load_uplink_script(path)
            .with_context(|| format!("failed to read uplink script {}", path.display()))?,
        None => vec![UplinkEntry {
            at_ms: 0,
            line: "ARM".to_string(),
        }],
    };

    let dir = cmd.out.clone().unwrap_or_else(|| config.log_dir());
    let logs = open_flight_logs(&dir, &Local::now())?;
    let paths = logs.paths.clone();
    let flight = SimulatedFlight::new(cmd.profile(), tick_ms);
    let modem = SimulatedModem::new(logs.downlink);
    info!(
        platform = blaze_telemetry_host::platform_name(),
        tick_ms,
        realtime = cmd.realtime,
        uplink_entries = uplink.len(),
        "starting simulated flight"
    );

    let summary = if cmd.realtime {
        let pipeline = TelemetryPipeline::new(
            config,
            SystemClock::new(),
            logs.primary,
            logs.archival,
            modem,
        )?;
        let mut run = FlightRun::new(pipeline, uplink);
        let mut interval = tokio::time::interval(Duration::from_millis(tick_ms));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        for sample in flight {
            interval.tick().await;
            let report = run.step(&sample);
            if report.phase_changed() {
                debug!(tick = report.tick, phase = %report.phase, "phase reported");
            }
        }
        run.shutdown()?;
        run.summary().clone()
    } else {
        let pipeline = TelemetryPipeline::new(
            config,
            ManualClock::default(),
            logs.primary,
            logs.archival,
            modem,
        )?;
        let mut run = FlightRun::new(pipeline, uplink);
        run_flight(&mut run, flight)?;
        run.summary().clone()
    };

    print_summary(&summary, &paths, cmd.json)
}

fn print_summary(summary: &RunSummary, paths: &FlightLogPaths, json: bool) -> Result<()> {
    if json {
        let output = serde_json::json!({
            "summary": summary,
            "logs": {
                "primary": paths.primary.display().to_string(),
                "archival": paths.archival.display().to_string(),
                "downlink": paths.downlink.display().to_string(),
            },
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("Simulated flight");
    println!("================");
    println!(
        "Ticks:          {} ({:.2} s)",
        summary.ticks,
        summary.flight_time_ms as f64 / 1000.0
    );
    println!("Max altitude:   {:.1} m", summary.max_altitude);
    println!("Final phase:    {}", summary.final_phase);
    println!(
        "Frames:         {} built, {} stored, {} sent",
        summary.frames_built, summary.frames_stored, summary.frames_sent
    );
    println!(
        "Uplink:         {} commands, {} control, {} invalid, {} bytes dropped",
        summary.commands,
        summary.control_commands,
        summary.invalid_uplink,
        summary.uplink_bytes_dropped
    );
    println!("Faults:         {}", summary.faults);
    println!();
    println!("[Phases]");
    for change in &summary.phases {
        println!(
            "  {:>8.2} s  {} -> {}",
            change.t_ms as f64 / 1000.0,
            change.from,
            change.to
        );
    }
    println!();
    println!("[Logs]");
    println!("  Primary:  {}", paths.primary.display());
    println!("  Archival: {}", paths.archival.display());
    println!("  Downlink: {}", paths.downlink.display());
    Ok(())
}

#[derive(Serialize)]
struct DecodedLine<'a> {
    offset: Option<usize>,
    fault: Option<String>,
    #[serde(flatten)]
    packet: &'a DecodedPacket,
}

fn handle_decode(cmd: &DecodeCommand) -> Result<()> {
    let (frames, total) = match (&cmd.hex, &cmd.file) {
        (Some(hex), _) => (vec![(None, cli::decode_hex(hex)?)], None),
        (None, Some(path)) => {
            let bytes = std::fs::read(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let frames = packet::scan(&bytes)
                .into_iter()
                .map(|(offset, packet)| (Some(offset), packet))
                .collect::<Vec<_>>();
            (frames, Some(bytes.len()))
        }
        (None, None) => bail!("give a hex frame or --file"),
    };

    if cmd.json {
        let lines: Vec<DecodedLine<'_>> = frames
            .iter()
            .map(|(offset, packet)| DecodedLine {
                offset: *offset,
                fault: packet.fault().map(|f| f.to_string()),
                packet,
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&lines)?);
        return Ok(());
    }

    for (offset, packet) in &frames {
        println!("{}", cli::describe(*offset, packet));
    }
    if let Some(total) = total {
        let skipped = total - frames.len() * packet::FRAME_LEN;
        println!();
        println!("{} frames, {skipped} other bytes", frames.len());
    }
    Ok(())
}

fn handle_encode(cmd: &EncodeCommand) -> Result<()> {
    let frame = cli::encode_frame(cmd)?;
    println!("{}", cli::to_hex(&frame));
    Ok(())
}

fn handle_config(path: Option<PathBuf>, cmd: ConfigCommand) -> Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            let config = load_config(path)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&config)?);
            } else {
                print_config(&config);
            }
        }
        ConfigCommand::Path => {
            println!(
                "{}",
                path.unwrap_or_else(Config::default_config_path).display()
            );
        }
        ConfigCommand::Validate { file } => {
            let path = file.or(path).unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", path.display());
            Config::load_from(Some(path)).context("configuration is invalid")?;
            println!("Configuration is valid.");
        }
    }
    Ok(())
}

fn print_config(config: &Config) {
    let flight = &config.flight;
    let storage = &config.storage;
    let radio = &config.radio;
    let pipeline = &config.pipeline;

    println!("Current Configuration");
    println!("=====================");
    println!();
    println!("[Flight]");
    println!(
        "  Launch:             > {} g for {} ms",
        flight.launch_accel_threshold_g, flight.launch_dwell_ms
    );
    println!(
        "  Apogee:             v < {} m/s for {} ms",
        flight.apogee_velocity_threshold, flight.apogee_dwell_ms
    );
    println!(
        "  Descent:            v < {} m/s for {} ms",
        flight.descent_velocity_threshold, flight.descent_dwell_ms
    );
    println!(
        "  Landed:             < {} m, |a - 1| < {} g for {} ms",
        flight.landed_altitude_threshold,
        flight.landed_accel_threshold_g,
        flight.landed_dwell_ms
    );
    println!();
    println!("[Storage]");
    println!("  Log directory:      {}", config.log_dir().display());
    println!("  Primary buffer:     {} bytes", storage.primary_capacity);
    println!("  Archival buffer:    {} bytes", storage.archival_capacity);
    println!();
    println!("[Radio]");
    println!("  RX / TX rings:      {} / {} bytes", radio.rx_capacity, radio.tx_capacity);
    println!("  Max payload:        {} bytes", radio.max_payload);
    println!("  Baud rate:          {}", radio.baud_rate);
    println!(
        "  Control tokens:     {} ... {}",
        radio.control_start_token, radio.control_end_token
    );
    println!("  Control buffer:     {} bytes", radio.control_buffer_capacity);
    println!();
    println!("[Pipeline]");
    println!("  Tick interval:      {} ms", pipeline.tick_interval_ms);
    println!("  Downlink every:     {} ticks", pipeline.downlink_every);
    println!("  Downlink marker:    {}", pipeline.downlink_marker);
}
