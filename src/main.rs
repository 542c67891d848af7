//! Wave Rider CLI
//!
//! Acquires, decrypts and records EEG headset streams.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use crossbeam_channel::RecvTimeoutError;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use wave_rider::{
    config::Config,
    core::SignalRingBuffer,
    device::{device_present, Channel, DeviceMonitor, FrameCipher, HeadsetReader},
    recording::{create_shared_stats_with_persistence, CsvRecorder},
    VERSION,
};

#[derive(Parser)]
#[command(name = "wave-rider")]
#[command(version = VERSION)]
#[command(about = "Acquire and record encrypted EEG headset streams", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record the headset stream to CSV while printing live status
    Record {
        /// Output file (defaults to a timestamped file in the recording directory)
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Stop after this many seconds
        #[arg(long)]
        duration: Option<u64>,
    },

    /// Report headset connect/disconnect events
    Watch,

    /// Show electrode contact quality
    Contact {
        /// Seconds to acquire before reporting
        #[arg(long, default_value = "3")]
        seconds: u64,
    },

    /// Show device presence, configuration and statistics
    Status,

    /// Show configuration
    Config,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Record { output, duration } => cmd_record(output, duration),
        Commands::Watch => cmd_watch(),
        Commands::Contact { seconds } => cmd_contact(seconds),
        Commands::Status => {
            cmd_status();
            Ok(())
        }
        Commands::Config => {
            cmd_config();
            Ok(())
        }
    }
}

fn cmd_record(output: Option<PathBuf>, duration: Option<u64>) -> Result<()> {
    println!("Wave Rider v{VERSION}");
    println!();

    let config = Config::load().unwrap_or_default();
    if let Err(e) = config.ensure_directories() {
        tracing::warn!("Could not create directories: {}", e);
    }

    let cipher = FrameCipher::from_serial(&config.serial_number)
        .context("Invalid headset serial number in configuration")?;
    let stats = create_shared_stats_with_persistence(config.stats_path());
    let mut reader = HeadsetReader::new(config.reader_config(), cipher).with_stats(stats.clone());
    let mut buffer = SignalRingBuffer::new(config.window_len, config.fill_value)
        .context("Invalid window length in configuration")?;

    let output = output.unwrap_or_else(|| {
        config.recording_path.join(format!(
            "recording_{}.csv",
            Utc::now().format("%Y%m%d_%H%M%S")
        ))
    });
    let recorder = Arc::new(CsvRecorder::new());
    recorder.open(&output)?;
    reader.subscribers().subscribe(recorder.clone());

    // Presence edges are forwarded to this thread, which owns the reader.
    let (presence_tx, presence_rx) = crossbeam_channel::unbounded();
    let mut monitor = DeviceMonitor::new(config.monitor_config());
    monitor.add_callback(Arc::new(move |connected: bool| {
        let _ = presence_tx.send(connected);
    }));

    println!("Device: {}", config.device_path.display());
    println!("Recording to: {}", output.display());
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    if monitor.check_connected() {
        reader.start();
    } else {
        println!("Waiting for headset...");
    }
    monitor.start();

    let running = Arc::new(AtomicBool::new(true));
    ctrlc_handler(running.clone());

    let started = Instant::now();
    let limit = duration.map(Duration::from_secs);
    let mut last_status = Instant::now();

    while running.load(Ordering::SeqCst) {
        match presence_rx.recv_timeout(Duration::from_millis(100)) {
            Ok(true) => {
                println!("[{}] Headset connected", Utc::now().format("%H:%M:%S"));
                reader.start();
            }
            Ok(false) => {
                println!("[{}] Headset disconnected", Utc::now().format("%H:%M:%S"));
                reader.stop();
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        buffer.pull(reader.queue());

        if last_status.elapsed() >= Duration::from_secs(1) {
            println!("{}", status_line(&reader, &buffer));
            last_status = Instant::now();
        }

        if limit.is_some_and(|limit| started.elapsed() >= limit) {
            break;
        }
    }

    println!();
    println!("Stopping acquisition...");
    monitor.stop();
    reader.stop();

    reader.subscribers().unsubscribe(&recorder)?;
    let lines = recorder.close()?;
    println!("Recorded {} packets to {}", lines, output.display());

    if let Err(e) = stats.save() {
        tracing::warn!("Could not save statistics: {}", e);
    }

    println!();
    println!("{}", stats.summary());
    Ok(())
}

fn cmd_watch() -> Result<()> {
    let config = Config::load().unwrap_or_default();
    let mut monitor = DeviceMonitor::new(config.monitor_config());

    let connected = monitor.check_connected();
    println!(
        "{}: {}",
        config.device_path.display(),
        if connected { "ONLINE" } else { "OFFLINE" }
    );

    monitor.add_callback(Arc::new(|connected: bool| {
        println!(
            "[{}] {}",
            Utc::now().format("%H:%M:%S"),
            if connected { "ONLINE" } else { "OFFLINE" }
        );
    }));
    monitor.start();

    let running = Arc::new(AtomicBool::new(true));
    ctrlc_handler(running.clone());
    while running.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(100));
    }

    monitor.stop();
    Ok(())
}

fn cmd_contact(seconds: u64) -> Result<()> {
    let config = Config::load().unwrap_or_default();

    if !device_present(&config.device_path) {
        anyhow::bail!("Headset not connected ({})", config.device_path.display());
    }

    let cipher = FrameCipher::from_serial(&config.serial_number)
        .context("Invalid headset serial number in configuration")?;
    let mut reader = HeadsetReader::new(config.reader_config(), cipher);

    println!("Acquiring for {seconds}s...");
    reader.start();
    let deadline = Instant::now() + Duration::from_secs(seconds);
    while Instant::now() < deadline {
        // Nobody pulls here; keep the queue from growing.
        reader.queue().clear();
        std::thread::sleep(Duration::from_millis(100));
    }
    reader.stop();

    let state = reader.state();
    println!();
    println!("Contact Quality");
    println!("===============");
    for channel in Channel::ALL {
        let resistance = state.contact_resistance(channel);
        println!(
            "  {:<4} {:>6.0}  {}",
            channel.name(),
            state.contact_quality(channel),
            resistance.label
        );
    }
    println!();
    println!("{}", state.battery_label());
    Ok(())
}

fn cmd_status() {
    let config = Config::load().unwrap_or_default();

    println!("Wave Rider Status");
    println!("=================");
    println!();

    println!(
        "Headset: {}",
        if device_present(&config.device_path) {
            "ONLINE"
        } else {
            "OFFLINE"
        }
    );
    println!();

    println!("Configuration:");
    println!("  Device: {}", config.device_path.display());
    println!("  Serial: {}", config.serial_number);
    println!("  Window: {} samples", config.window_len);
    println!("  Recordings: {}", config.recording_path.display());
    println!();

    let stats_path = config.stats_path();
    if stats_path.exists() {
        if let Ok(content) = std::fs::read_to_string(&stats_path) {
            if let Ok(stats) = serde_json::from_str::<serde_json::Value>(&content) {
                println!("Cumulative Statistics:");
                for key in [
                    "frames_read",
                    "packets_decoded",
                    "decode_errors",
                    "subscriber_failures",
                    "queue_overflows",
                ] {
                    if let Some(value) = stats.get(key) {
                        println!("  {}: {value}", key.replace('_', " "));
                    }
                }
            }
        }
    } else {
        println!("No previous session data found.");
    }
}

fn cmd_config() {
    let config = Config::load().unwrap_or_default();

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!(
        "{}",
        serde_json::to_string_pretty(&config).unwrap_or_else(|_| "Error".to_string())
    );
}

/// One status line: rate, battery, gyro and per-channel window means.
fn status_line(reader: &HeadsetReader, buffer: &SignalRingBuffer) -> String {
    let state = reader.state();
    let gyro = match state.gyro() {
        Some((x, y)) => format!("X={x} Y={y}"),
        None => "X=- Y=-".to_string(),
    };

    let window = buffer.window();
    let rows = window.len().max(1) as f64;
    let means: Vec<String> = Channel::ALL
        .iter()
        .map(|c| {
            let mean = window.channel(c.index()).sum::<f64>() / rows;
            format!("{}={mean:.0}", c.name())
        })
        .collect();

    format!(
        "[{}] {} | {} | {} | {}",
        Utc::now().format("%H:%M:%S"),
        state.rate_label(),
        state.battery_label(),
        gyro,
        means.join(" ")
    )
}

/// Set up Ctrl+C handler.
fn ctrlc_handler(running: Arc<AtomicBool>) {
    if let Err(e) = ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    }) {
        tracing::warn!("Error setting Ctrl+C handler: {}", e);
    }
}
