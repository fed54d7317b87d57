//! Spectral analysis of raw PCM frames
//!
//! The light organ thresholds are calibrated against the unwindowed,
//! unnormalised DFT of the raw i16 samples, so no window or scaling is
//! applied here. Interleaved channels are transformed as one sequence.

use super::AudioFrame;
use rustfft::{num_complex::Complex, FftPlanner};
use thiserror::Error;

/// Spectral analysis errors
#[derive(Error, Debug, PartialEq)]
pub enum AnalysisError {
    #[error("Audio frame is empty")]
    EmptyFrame,

    #[error("Invalid sample rate: {0}")]
    InvalidSampleRate(u32),
}

/// FFT front end. Keeps a planner so repeated frames of the same size reuse
/// the cached plan.
pub struct SpectralAnalyzer {
    planner: FftPlanner<f32>,
}

impl Default for SpectralAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl SpectralAnalyzer {
    pub fn new() -> Self {
        Self {
            planner: FftPlanner::new(),
        }
    }

    /// Compute the magnitude spectrum of `frame` sampled at `sample_rate`.
    pub fn spectrum(&mut self, frame: &AudioFrame, sample_rate: u32) -> Result<Spectrum, AnalysisError> {
        if frame.is_empty() {
            return Err(AnalysisError::EmptyFrame);
        }
        if sample_rate == 0 {
            return Err(AnalysisError::InvalidSampleRate(sample_rate));
        }

        let mut buffer: Vec<Complex<f32>> = frame
            .samples()
            .iter()
            .map(|&s| Complex::new(s as f32, 0.0))
            .collect();

        let fft = self.planner.plan_fft_forward(buffer.len());
        fft.process(&mut buffer);

        let mut magnitudes: Vec<f32> = buffer.iter().map(|c| c.norm()).collect();

        // Real input: |X[n-k]| == |X[k]|. Mirror so rounding noise cannot let
        // a negative-frequency image win the tie.
        let n = magnitudes.len();
        for k in 1..(n + 1) / 2 {
            magnitudes[n - k] = magnitudes[k];
        }

        Ok(Spectrum {
            magnitudes,
            sample_rate,
        })
    }
}

/// Full (two-sided) magnitude spectrum of one frame
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrum {
    magnitudes: Vec<f32>,
    sample_rate: u32,
}

impl Spectrum {
    #[cfg(test)]
    pub(crate) fn from_magnitudes(magnitudes: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            magnitudes,
            sample_rate,
        }
    }

    #[cfg(test)]
    pub(crate) fn magnitudes(&self) -> &[f32] {
        &self.magnitudes
    }

    /// Signed frequency of `bin`. Bins in the upper half map to negative
    /// frequencies; for even lengths the Nyquist bin is negative.
    pub fn bin_frequency(&self, bin: usize) -> f32 {
        let n = self.magnitudes.len() as i64;
        let k = bin as i64;
        let signed = if k < (n + 1) / 2 { k } else { k - n };
        signed as f32 * self.sample_rate as f32 / n as f32
    }

    /// Frequency of the loudest bin, DC excluded. Ties go to the lowest bin.
    /// A single-sample spectrum has no bin besides DC and reports 0 Hz.
    pub fn dominant_frequency(&self) -> f32 {
        let mut best: Option<(usize, f32)> = None;
        for (bin, &magnitude) in self.magnitudes.iter().enumerate().skip(1) {
            match best {
                Some((_, max)) if magnitude <= max => {}
                _ => best = Some((bin, magnitude)),
            }
        }
        best.map(|(bin, _)| self.bin_frequency(bin)).unwrap_or(0.0)
    }

    /// Magnitude of the bin nearest to `target` Hz. Ties go to the lowest bin.
    pub fn amplitude_at(&self, target: f32) -> f32 {
        let mut nearest = 0;
        let mut nearest_distance = f32::INFINITY;
        for bin in 0..self.magnitudes.len() {
            let distance = (self.bin_frequency(bin) - target).abs();
            if distance < nearest_distance {
                nearest = bin;
                nearest_distance = distance;
            }
        }
        self.magnitudes[nearest]
    }
}

/// Dominant frequency of a single frame. Plans a fresh transform.
pub fn dominant_frequency(frame: &AudioFrame, sample_rate: u32) -> Result<f32, AnalysisError> {
    Ok(SpectralAnalyzer::new()
        .spectrum(frame, sample_rate)?
        .dominant_frequency())
}

/// Magnitude nearest `target` Hz in a single frame. Plans a fresh transform.
pub fn amplitude_at(frame: &AudioFrame, sample_rate: u32, target: f32) -> Result<f32, AnalysisError> {
    Ok(SpectralAnalyzer::new()
        .spectrum(frame, sample_rate)?
        .amplitude_at(target))
}
