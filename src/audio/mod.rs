//! Audio capture and analysis module

mod capture;
mod fft;
mod sources;

pub use capture::{CaptureError, CpalSource};
pub use fft::{amplitude_at, dominant_frequency, AnalysisError, SpectralAnalyzer, Spectrum};
pub use sources::{find_input_device, list_input_devices, AudioDevice, SourceError};

/// One blocking read of interleaved signed 16-bit PCM
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    samples: Vec<i16>,
}

impl AudioFrame {
    pub fn new(samples: Vec<i16>) -> Self {
        Self { samples }
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

impl From<Vec<i16>> for AudioFrame {
    fn from(samples: Vec<i16>) -> Self {
        Self::new(samples)
    }
}

/// A blocking source of fixed-size audio frames
pub trait AudioSource {
    /// Block until the next frame is available.
    fn read_frame(&mut self) -> Result<AudioFrame, CaptureError>;
}
