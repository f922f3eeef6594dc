//! Stream Player Receiver
//!
//! Connects to the sample feed and plays it gaplessly on an output device.
//! Press Enter to toggle between playing and silence.

use anyhow::{Context, Result};
use crossbeam_channel::Receiver;
use std::io::BufRead;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gapless_stream_player::{
    audio::{simulated::RealtimeClock, Completion, OutputDevice, SimulatedOutput},
    config::AppConfig,
    session::SessionController,
    ui::WebServer,
};

/// Command line overrides
#[derive(Default)]
struct Args {
    config: Option<PathBuf>,
    url: Option<String>,
    device: Option<String>,
    simulated: bool,
    list_devices: bool,
}

impl Args {
    fn parse() -> Result<Self> {
        let mut args = Args::default();
        let mut iter = std::env::args().skip(1);
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--config" => args.config = Some(iter.next().context("--config needs a path")?.into()),
                "--url" => args.url = Some(iter.next().context("--url needs a value")?),
                "--device" => args.device = Some(iter.next().context("--device needs a name")?),
                "--simulated" => args.simulated = true,
                "--list-devices" => args.list_devices = true,
                other => anyhow::bail!("unknown argument: {}", other),
            }
        }
        Ok(args)
    }
}

type Output = (Box<dyn OutputDevice>, Receiver<Completion>, Option<RealtimeClock>);

fn simulated_output(config: &AppConfig) -> Output {
    let (device, completions) = SimulatedOutput::new(config.playback.sample_rate);
    let clock = device.spawn_realtime_clock(Duration::from_millis(1));
    (Box::new(device), completions, Some(clock))
}

#[cfg(feature = "device")]
fn open_output(config: &AppConfig) -> Output {
    use gapless_stream_player::audio::CpalOutput;

    if config.output.simulated {
        tracing::info!("Using simulated output");
        return simulated_output(config);
    }

    match CpalOutput::open(&config.playback, config.output.device.as_deref()) {
        Ok((device, completions)) => (Box::new(device), completions, None),
        Err(e) => {
            tracing::warn!("No usable output device ({}), falling back to simulated output", e);
            simulated_output(config)
        }
    }
}

#[cfg(not(feature = "device"))]
fn open_output(config: &AppConfig) -> Output {
    tracing::info!("Built without device support, using simulated output");
    simulated_output(config)
}

#[cfg(feature = "device")]
fn print_devices() {
    println!("\n=== Available Output Devices ===");
    for device in gapless_stream_player::audio::list_output_devices() {
        let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
        println!("  {}{}:", device.name, default_marker);
        println!("    Sample rates: {:?}", device.sample_rates);
        println!("    Channels: {:?}", device.channels);
    }
    println!();
}

#[cfg(not(feature = "device"))]
fn print_devices() {
    println!("Built without device support");
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse()?;
    if args.list_devices {
        print_devices();
        return Ok(());
    }

    tracing::info!("Starting Stream Player Receiver");

    let mut config = AppConfig::load_or_default(args.config.as_deref())?;
    if let Some(url) = args.url {
        config.feed.url = url;
    }
    if let Some(device) = args.device {
        config.output.device = Some(device);
    }
    config.output.simulated |= args.simulated;
    config.validate()?;

    let (device, completions, _clock) = open_output(&config);
    let session = SessionController::start(&config, device, completions)?;

    if config.ui.enabled {
        let web_server = WebServer::new(config.ui.clone(), session.handle());
        let _web_handle = web_server.start_background();
    }

    // Enter toggles playback
    let keys = session.handle();
    std::thread::Builder::new()
        .name("keyboard".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                if line.is_err() {
                    break;
                }
                keys.toggle();
            }
        })?;

    tracing::info!("Press Enter to toggle playback, Ctrl+C to quit");

    let mut stats_interval = tokio::time::interval(Duration::from_secs(5));
    stats_interval.tick().await;
    loop {
        tokio::select! {
            _ = stats_interval.tick() => {
                let report = session.report();
                tracing::info!(
                    "{:?}: {} slots ({} data, {} underruns, {} discarded), queue {}/{}, feed {} ({} frames, {} rejected)",
                    report.status,
                    report.playback.slots_armed,
                    report.playback.data_slots,
                    report.playback.underruns,
                    report.playback.discarded,
                    report.queue.depth,
                    report.queue.capacity,
                    if report.feed.connected { "connected" } else { "disconnected" },
                    report.feed.frames_received,
                    report.feed.frames_rejected,
                );
            }
            result = tokio::signal::ctrl_c() => {
                result?;
                break;
            }
        }
    }

    tracing::info!("Shutting down");
    session.shutdown().await;
    Ok(())
}
