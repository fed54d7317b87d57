//! Run configuration
//!
//! A `RunConfig` is the immutable snapshot the run loop consumes at start.
//! It can be built in code, loaded from a JSON file or assembled by the CLI.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Span applied to `max_frequency` when it does not exceed `min_frequency`
pub const DEFAULT_FREQUENCY_SPAN: f32 = 1000.0;

/// Serial baud rate expected by the light organ firmware
pub const BAUD_RATE: u32 = 115_200;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid frequency bound {name}: {value}")]
    InvalidFrequency { name: &'static str, value: f32 },

    #[error("Invalid sample rate: {0}")]
    InvalidSampleRate(u32),

    #[error("Invalid channel count: {0}")]
    InvalidChannels(u16),

    #[error("Invalid frame size: {0}")]
    InvalidFrameSize(usize),

    #[error("Invalid delay: {0} seconds")]
    InvalidDelay(f32),

    #[error("Invalid sensitivity threshold: {0}")]
    InvalidThreshold(f32),

    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Lamp mapping policy
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Light the lamp matching the loudest frequency bin
    DominantFrequency,

    /// Light every lamp whose band exceeds the threshold
    #[default]
    AmplitudeThreshold,

    /// Light a random subset of lamps while signal is present
    Random,
}

impl Mode {
    /// Whether a full scan is terminated with the frame sentinel
    pub fn appends_sentinel(self) -> bool {
        !matches!(self, Mode::Random)
    }
}

impl std::str::FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "dominant_frequency" | "dominant" => Ok(Mode::DominantFrequency),
            "amplitude_threshold" | "amplitude" | "threshold" => Ok(Mode::AmplitudeThreshold),
            "random" => Ok(Mode::Random),
            other => Err(format!("unknown mode '{}'", other)),
        }
    }
}

/// Snapshot of everything a run needs
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RunConfig {
    /// Serial port identifier (e.g. `/dev/ttyUSB0`, `COM3`)
    pub port: String,

    /// Audio input device name, `default` for the host default
    pub audio_device: String,

    /// Sample rate in Hz
    pub sample_rate: u32,

    /// Interleaved channel count
    pub channels: u16,

    /// Samples per channel in one frame
    pub frame_size: usize,

    /// Lower frequency bound in Hz
    pub min_frequency: f32,

    /// Upper frequency bound in Hz
    pub max_frequency: f32,

    /// Raw FFT magnitude a band must exceed to light its lamp
    pub sensitivity_threshold: f32,

    /// Hold time between activation and release, and between idle steps
    pub delay_seconds: f32,

    /// Swap the on/off alphabets
    pub inversion: bool,

    /// Lamp mapping policy
    pub mode: Mode,

    /// Time given to the microcontroller to reset after the port opens
    pub settle_seconds: f32,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            port: String::new(),
            audio_device: "default".to_string(),
            sample_rate: 48000,
            channels: 2,
            frame_size: 1024,
            min_frequency: 500.0,
            max_frequency: 1000.0,
            sensitivity_threshold: 1_200_000.0,
            delay_seconds: 0.0,
            inversion: false,
            mode: Mode::default(),
            settle_seconds: 3.0,
        }
    }
}

impl RunConfig {
    /// Load a config from a JSON file. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Check the snapshot and repair an inverted frequency range.
    pub fn validate(mut self) -> Result<Self, ConfigError> {
        check_frequency("min_frequency", self.min_frequency)?;
        check_frequency("max_frequency", self.max_frequency)?;

        if self.sample_rate == 0 {
            return Err(ConfigError::InvalidSampleRate(self.sample_rate));
        }
        if self.channels == 0 {
            return Err(ConfigError::InvalidChannels(self.channels));
        }
        if self.frame_size == 0 {
            return Err(ConfigError::InvalidFrameSize(self.frame_size));
        }
        seconds(self.delay_seconds).ok_or(ConfigError::InvalidDelay(self.delay_seconds))?;
        seconds(self.settle_seconds).ok_or(ConfigError::InvalidDelay(self.settle_seconds))?;
        if !self.sensitivity_threshold.is_finite() {
            return Err(ConfigError::InvalidThreshold(self.sensitivity_threshold));
        }

        if self.max_frequency <= self.min_frequency {
            let clamped = self.min_frequency + DEFAULT_FREQUENCY_SPAN;
            log::warn!(
                "max_frequency {} <= min_frequency {}, using {}",
                self.max_frequency,
                self.min_frequency,
                clamped
            );
            self.max_frequency = clamped;
        }

        Ok(self)
    }

    /// Samples in one interleaved read
    pub fn samples_per_frame(&self) -> usize {
        self.frame_size * self.channels as usize
    }

    /// Hold and idle step time. Zero if the value was never validated.
    pub fn delay(&self) -> Duration {
        seconds(self.delay_seconds).unwrap_or_default()
    }

    pub fn settle_delay(&self) -> Duration {
        seconds(self.settle_seconds).unwrap_or_default()
    }
}

/// Non-negative seconds that fit in a `Duration`
fn seconds(value: f32) -> Option<Duration> {
    Duration::try_from_secs_f32(value).ok()
}

fn check_frequency(name: &'static str, value: f32) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidFrequency { name, value })
    }
}

/// Parse a user-entered frequency bound.
pub fn parse_frequency(name: &'static str, text: &str) -> Result<f32, ConfigError> {
    let value = text
        .trim()
        .parse::<f32>()
        .map_err(|_| ConfigError::InvalidFrequency { name, value: f32::NAN })?;
    check_frequency(name, value)?;
    Ok(value)
}
