//! Lamp mapping policies
//!
//! Turns one frame's spectrum into an eight-lamp activation vector. The
//! policy is chosen by `Mode`; all three share the same reference gate on the
//! amplitude at `min_frequency`.

use crate::audio::Spectrum;
use crate::config::{Mode, RunConfig};
use serde::Serialize;

/// Number of physical lamp channels
pub const NUM_LAMPS: usize = 8;

/// On/off decision for every lamp in one control cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct LampVector([bool; NUM_LAMPS]);

impl LampVector {
    /// All lamps off
    pub const fn dark() -> Self {
        Self([false; NUM_LAMPS])
    }

    /// Only `index` lit. Out-of-range indices light nothing.
    pub fn one_hot(index: usize) -> Self {
        let mut lamps = Self::dark();
        if index < NUM_LAMPS {
            lamps.0[index] = true;
        }
        lamps
    }

    /// Bit `i` of `bits` drives lamp `i`
    #[cfg(test)]
    pub(crate) fn from_bits(bits: u8) -> Self {
        let mut lamps = Self::dark();
        for (i, lamp) in lamps.0.iter_mut().enumerate() {
            *lamp = bits & (1 << i) != 0;
        }
        lamps
    }

    pub fn bits(&self) -> u8 {
        self.0
            .iter()
            .enumerate()
            .fold(0u8, |bits, (i, &on)| if on { bits | (1 << i) } else { bits })
    }

    pub fn set(&mut self, index: usize, on: bool) {
        if let Some(lamp) = self.0.get_mut(index) {
            *lamp = on;
        }
    }

    pub fn any(&self) -> bool {
        self.0.iter().any(|&on| on)
    }

    pub fn iter(&self) -> impl Iterator<Item = bool> + '_ {
        self.0.iter().copied()
    }
}

impl From<[bool; NUM_LAMPS]> for LampVector {
    fn from(lamps: [bool; NUM_LAMPS]) -> Self {
        Self(lamps)
    }
}

/// Source of fair coin flips for the random policy
pub trait Coin {
    fn flip(&mut self) -> bool;
}

/// Coin backed by the thread-local RNG
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadCoin;

impl Coin for ThreadCoin {
    fn flip(&mut self) -> bool {
        rand::random::<bool>()
    }
}

/// Linearly map `frequency` onto a lamp index.
///
/// Only the upper bound is clamped. The scaled value is truncated toward
/// zero, so frequencies slightly below `min_freq` still map to lamp 0 while
/// ones further below go negative and select no lamp.
pub fn map_frequency_to_lamp(frequency: f32, num_lamps: usize, min_freq: f32, max_freq: f32) -> i64 {
    let normalized = (frequency - min_freq) / (max_freq - min_freq);
    let mapped = (normalized * num_lamps as f32) as i64;
    mapped.min(num_lamps as i64 - 1)
}

/// Representative frequency of each lamp's band, evenly spaced over
/// `[min_freq, max_freq]` inclusive.
pub fn band_frequencies(min_freq: f32, max_freq: f32) -> [f32; NUM_LAMPS] {
    let span = max_freq - min_freq;
    let mut bands = [0.0; NUM_LAMPS];
    for (k, band) in bands.iter_mut().enumerate() {
        *band = min_freq + span * k as f32 / (NUM_LAMPS - 1) as f32;
    }
    bands
}

/// Spectrum-to-lamps policy selected by `Mode`
#[derive(Debug, Clone)]
pub struct LampMapper {
    mode: Mode,
    min_frequency: f32,
    max_frequency: f32,
    threshold: f32,
    bands: [f32; NUM_LAMPS],
}

impl LampMapper {
    pub fn new(mode: Mode, min_frequency: f32, max_frequency: f32, threshold: f32) -> Self {
        Self {
            mode,
            min_frequency,
            max_frequency,
            threshold,
            bands: band_frequencies(min_frequency, max_frequency),
        }
    }

    pub fn from_config(config: &RunConfig) -> Self {
        Self::new(
            config.mode,
            config.min_frequency,
            config.max_frequency,
            config.sensitivity_threshold,
        )
    }

    /// Amplitude of band 0, used for gating and idle detection
    pub fn reference_amplitude(&self, spectrum: &Spectrum) -> f32 {
        spectrum.amplitude_at(self.min_frequency)
    }

    /// Whether the reference band clears the sensitivity threshold
    pub fn is_gated_on(&self, spectrum: &Spectrum) -> bool {
        self.reference_amplitude(spectrum) > self.threshold
    }

    /// Decide the lamps for one frame
    pub fn map(&self, spectrum: &Spectrum, coin: &mut dyn Coin) -> LampVector {
        match self.mode {
            Mode::DominantFrequency => self.map_dominant(spectrum),
            Mode::AmplitudeThreshold => self.map_threshold(spectrum),
            Mode::Random => self.map_random(spectrum, coin),
        }
    }

    fn map_dominant(&self, spectrum: &Spectrum) -> LampVector {
        let frequency = spectrum.dominant_frequency();
        let index = map_frequency_to_lamp(frequency, NUM_LAMPS, self.min_frequency, self.max_frequency);
        log::trace!("Dominant {:.1} Hz -> lamp {}", frequency, index);

        if index < 0 || !self.is_gated_on(spectrum) {
            return LampVector::dark();
        }
        LampVector::one_hot(index as usize)
    }

    fn map_threshold(&self, spectrum: &Spectrum) -> LampVector {
        let mut lamps = LampVector::dark();
        for (k, &band) in self.bands.iter().enumerate() {
            lamps.set(k, spectrum.amplitude_at(band) > self.threshold);
        }
        lamps
    }

    fn map_random(&self, spectrum: &Spectrum, coin: &mut dyn Coin) -> LampVector {
        if !self.is_gated_on(spectrum) {
            return LampVector::dark();
        }
        let mut lamps = LampVector::dark();
        for k in 0..NUM_LAMPS {
            lamps.set(k, coin.flip());
        }
        lamps
    }
}
