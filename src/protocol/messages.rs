//! Single-byte lamp command alphabet
//!
//! The firmware reads one ASCII letter per lamp: `a`-`h` and `A`-`H` select
//! lamps 0-7, one case switching the lamp on and the other off. Which case is
//! "on" depends on the relay polarity, so inversion swaps the two alphabets.
//! A trailing `H` closes a full scan.

use crate::patterns::{LampVector, NUM_LAMPS};

/// Lower-case alphabet, "on" unless inverted
pub const LIGHT_UP: &[u8; NUM_LAMPS] = b"abcdefgh";

/// Upper-case alphabet, "off" unless inverted
pub const LIGHT_DOWN: &[u8; NUM_LAMPS] = b"ABCDEFGH";

/// End-of-scan marker
pub const FRAME_SENTINEL: u8 = b'H';

/// Translates lamp vectors into command bytes
#[derive(Debug, Clone, Copy)]
pub struct CommandEncoder {
    on: &'static [u8; NUM_LAMPS],
    off: &'static [u8; NUM_LAMPS],
}

impl CommandEncoder {
    pub fn new(inverted: bool) -> Self {
        if inverted {
            Self {
                on: LIGHT_DOWN,
                off: LIGHT_UP,
            }
        } else {
            Self {
                on: LIGHT_UP,
                off: LIGHT_DOWN,
            }
        }
    }

    /// One byte per lamp, in lamp order
    pub fn encode(&self, lamps: &LampVector) -> [u8; NUM_LAMPS] {
        let mut bytes = [0u8; NUM_LAMPS];
        for (i, on) in lamps.iter().enumerate() {
            bytes[i] = if on { self.on[i] } else { self.off[i] };
        }
        bytes
    }

    /// Full scan, optionally closed by the sentinel
    pub fn scan(&self, lamps: &LampVector, sentinel: bool) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(NUM_LAMPS + 1);
        bytes.extend_from_slice(&self.encode(lamps));
        if sentinel {
            bytes.push(FRAME_SENTINEL);
        }
        bytes
    }

    /// "Off" bytes for every lit lamp, written after the hold period
    pub fn release(&self, lamps: &LampVector) -> Vec<u8> {
        lamps
            .iter()
            .enumerate()
            .filter(|&(_, on)| on)
            .map(|(i, _)| self.off[i])
            .collect()
    }

    /// Lamp and state selected by a single command byte
    pub fn interpret(&self, byte: u8) -> Option<(usize, bool)> {
        if let Some(i) = self.on.iter().position(|&b| b == byte) {
            return Some((i, true));
        }
        self.off.iter().position(|&b| b == byte).map(|i| (i, false))
    }

    /// Rebuild a lamp vector from an encoded scan. Position `i` must carry
    /// lamp `i`'s on or off byte.
    pub fn decode(&self, bytes: &[u8]) -> Option<LampVector> {
        if bytes.len() != NUM_LAMPS {
            return None;
        }
        let mut lamps = LampVector::dark();
        for (i, &byte) in bytes.iter().enumerate() {
            match self.interpret(byte) {
                Some((lamp, on)) if lamp == i => lamps.set(i, on),
                _ => return None,
            }
        }
        Some(lamps)
    }
}
