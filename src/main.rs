//! LPD8 Ctl - command line host for the Akai LPD8
//!
//! Connects to the controller, runs the setup sequence and logs every pad and
//! knob trigger until interrupted.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use colored::*;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lpd8_ctl::program::{KNOB_COUNT, PAD_COUNT, PROGRAM_COUNT};
use lpd8_ctl::{AppConfig, DeviceSession, MidirTransport, PadTrigger, PortFactory, TriggerCallback, TriggerEvent};

/// LPD8 Ctl - program and listen to an Akai LPD8
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "lpd8.yaml")]
    config: String,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// List available MIDI ports
    #[arg(long)]
    list_ports: bool,

    /// Print the programs after setup and exit
    #[arg(long)]
    dump: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();
    init_logging(&args.log_level)?;

    info!("Starting LPD8 Ctl...");

    if args.list_ports {
        list_ports_formatted()?;
        return Ok(());
    }

    let config = AppConfig::load_or_default(&args.config).await?;
    info!("Configuration file: {}", args.config);

    let factory = PortFactory::new();
    let transport = factory.open(&config.midi.port, config.midi.note_channel)?;

    // Setup blocks on dump replies and write pacing
    let session_config = config.session.clone();
    let mut session = tokio::task::spawn_blocking(move || DeviceSession::connect(transport, session_config))
        .await
        .context("Setup task panicked")??;

    if args.dump {
        print_programs(&session);
        return Ok(());
    }

    register_logging_callbacks(&mut session)?;
    session.set_program_change_observer(|slot| info!("Program {} selected on the device", slot + 1));

    run(session).await
}

async fn run(mut session: DeviceSession<MidirTransport>) -> Result<()> {
    let mut ticker = tokio::time::interval(Duration::from_millis(10));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!("Listening, press Ctrl+C to stop");
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = session.tick_default() {
                    warn!("Tick failed: {}", e);
                }
            }
            result = &mut shutdown => {
                result.context("Failed to listen for Ctrl+C")?;
                info!("Shutdown signal received");
                break;
            }
        }
    }

    Ok(())
}

fn register_logging_callbacks(session: &mut DeviceSession<MidirTransport>) -> Result<()> {
    let pad_logger: TriggerCallback = Arc::new(|event: &TriggerEvent| {
        let trigger = match (event.note_on, event.note_off, event.control_change, event.program_change) {
            (Some(note), ..) => format!("note on {}", note),
            (_, Some(note), ..) => format!("note off {}", note),
            (.., Some(cc), _) => format!("cc {}", cc),
            (.., Some(pc)) => format!("program change {}", pc),
            _ => "trigger".to_string(),
        };
        info!(
            "Program {} pad {}: {} value={:?}",
            event.program + 1,
            event.pad.map_or(0, |p| p + 1),
            trigger,
            event.value
        );
    });
    let knob_logger: TriggerCallback = Arc::new(|event: &TriggerEvent| {
        info!(
            "Program {} knob {}: {:?}",
            event.program + 1,
            event.knob.map_or(0, |k| k + 1),
            event.value
        );
    });

    for slot in 0..PROGRAM_COUNT {
        for pad in 0..PAD_COUNT {
            session.register_pad_callback(slot, pad, pad_logger.clone(), &PadTrigger::ALL)?;
        }
        for knob in 0..KNOB_COUNT {
            session.register_knob_callback(slot, knob, knob_logger.clone())?;
        }
    }
    Ok(())
}

fn print_programs(session: &DeviceSession<MidirTransport>) {
    for program in session.programs().iter().flatten() {
        println!("\n{}", format!("=== Program {} ===", program.slot + 1).bold().cyan());
        for (i, pad) in program.pads.iter().enumerate() {
            println!("  {} {}", format!("pad {}:", i + 1).green(), pad);
        }
        for (i, knob) in program.knobs.iter().enumerate() {
            println!("  {} {}", format!("knob {}:", i + 1).yellow(), knob);
        }
    }
}

fn list_ports_formatted() -> Result<()> {
    let (inputs, outputs) = PortFactory::list_ports()?;

    println!("\n{}", "=== Available MIDI Ports ===".bold().cyan());
    for (title, ports) in [("Input Ports:", inputs), ("Output Ports:", outputs)] {
        println!("\n{}", title.bold());
        if ports.is_empty() {
            println!("  {}", "No ports found".dimmed());
        }
        for port in ports {
            let marker = if port.name.to_lowercase().contains("lpd8") {
                "[LPD8]".bright_green()
            } else {
                "[OTHER]".dimmed()
            };
            println!("  {} {}: {}", marker, port.index, port.name);
        }
    }
    Ok(())
}

fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false),
        )
        .init();

    Ok(())
}
