//! Command line front end

use crate::audio::list_input_devices;
use crate::config::{parse_frequency, ConfigError, Mode, RunConfig};
use crate::organ::{LightOrgan, SystemBackend};
use crate::protocol::list_serial_ports;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

/// How often the control loop checks whether the worker died
const POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Parser, Debug)]
#[command(name = "light-organ", version, about = "Drive an eight-lamp serial light organ from live audio")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List serial ports
    Ports,

    /// List audio input devices
    Devices,

    /// Listen to an audio input and drive the lamps until Enter is pressed
    Run(RunArgs),
}

#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// JSON config file; flags override its values
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Serial port of the light organ
    #[arg(long)]
    pub port: Option<String>,

    /// Audio input device name ("default" for the host default)
    #[arg(long)]
    pub audio_device: Option<String>,

    #[arg(long)]
    pub sample_rate: Option<u32>,

    #[arg(long)]
    pub channels: Option<u16>,

    /// Samples per channel in one frame
    #[arg(long)]
    pub frame_size: Option<usize>,

    /// Lower frequency bound in Hz
    #[arg(long)]
    pub min_frequency: Option<String>,

    /// Upper frequency bound in Hz
    #[arg(long)]
    pub max_frequency: Option<String>,

    /// FFT magnitude a band must exceed to light its lamp
    #[arg(long)]
    pub sensitivity_threshold: Option<f32>,

    /// Hold time and idle step time in seconds
    #[arg(long)]
    pub delay_seconds: Option<f32>,

    /// Swap the on/off command alphabets (`--inversion false` to clear)
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    pub inversion: Option<bool>,

    /// dominant-frequency, amplitude-threshold or random
    #[arg(long)]
    pub mode: Option<Mode>,

    /// Wait after opening the port before listening
    #[arg(long)]
    pub settle_seconds: Option<f32>,

    /// Print lamp states instead of writing to the serial port
    #[arg(long)]
    pub dry_run: bool,
}

impl RunArgs {
    /// Merge the config file (if any) with the flags
    pub fn to_config(&self) -> Result<RunConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => RunConfig::from_json_file(path)?,
            None => RunConfig::default(),
        };

        if let Some(port) = &self.port {
            config.port = port.clone();
        }
        if let Some(device) = &self.audio_device {
            config.audio_device = device.clone();
        }
        if let Some(rate) = self.sample_rate {
            config.sample_rate = rate;
        }
        if let Some(channels) = self.channels {
            config.channels = channels;
        }
        if let Some(frame_size) = self.frame_size {
            config.frame_size = frame_size;
        }
        if let Some(text) = &self.min_frequency {
            config.min_frequency = parse_frequency("min_frequency", text)?;
        }
        if let Some(text) = &self.max_frequency {
            config.max_frequency = parse_frequency("max_frequency", text)?;
        }
        if let Some(threshold) = self.sensitivity_threshold {
            config.sensitivity_threshold = threshold;
        }
        if let Some(delay) = self.delay_seconds {
            config.delay_seconds = delay;
        }
        if let Some(inversion) = self.inversion {
            config.inversion = inversion;
        }
        if let Some(mode) = self.mode {
            config.mode = mode;
        }
        if let Some(settle) = self.settle_seconds {
            config.settle_seconds = settle;
        }

        config.validate()
    }
}

/// Run one CLI command
pub fn execute(cli: Cli) -> Result<(), String> {
    match cli.command {
        Command::Ports => {
            let ports = list_serial_ports().map_err(|e| e.to_string())?;
            if ports.is_empty() {
                println!("No device found");
            }
            for port in ports {
                println!("{}", port);
            }
            Ok(())
        }
        Command::Devices => {
            let devices = list_input_devices().map_err(|e| e.to_string())?;
            for device in devices {
                println!("Index {}: {}", device.index, device.name);
            }
            Ok(())
        }
        Command::Run(args) => run_until_enter(&args),
    }
}

fn run_until_enter(args: &RunArgs) -> Result<(), String> {
    let config = args.to_config().map_err(|e| e.to_string())?;

    let mut organ = LightOrgan::new(SystemBackend {
        dry_run: args.dry_run,
    });
    organ.start(config).map_err(|e| e.to_string())?;

    println!("Press Enter to stop");

    let (enter_tx, enter_rx) = mpsc::channel();
    thread::spawn(move || {
        let mut line = String::new();
        let _ = std::io::stdin().read_line(&mut line);
        let _ = enter_tx.send(());
    });

    loop {
        match enter_rx.recv_timeout(POLL_INTERVAL) {
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                if !organ.is_running() {
                    break;
                }
            }
        }
    }

    organ.stop().map_err(|e| e.to_string())?;
    println!("{}", organ.status());
    Ok(())
}
