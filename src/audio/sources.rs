//! Audio input device enumeration

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::Device;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Name that selects the host's default input device
pub const DEFAULT_DEVICE_NAME: &str = "default";

/// Audio input device information
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AudioDevice {
    /// Position in the host's input device list
    pub index: usize,

    /// Display name, also used to select the device
    pub name: String,
}

/// Audio source errors
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Failed to enumerate devices: {0}")]
    EnumerationError(String),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),
}

/// List available audio input devices
pub fn list_input_devices() -> Result<Vec<AudioDevice>, SourceError> {
    let host = cpal::default_host();

    let devices = host
        .input_devices()
        .map_err(|e| SourceError::EnumerationError(e.to_string()))?;

    let mut sources = Vec::new();
    for (index, device) in devices.enumerate() {
        match device.name() {
            Ok(name) => sources.push(AudioDevice { index, name }),
            Err(e) => log::warn!("Skipping input device {}: {}", index, e),
        }
    }

    Ok(sources)
}

/// Resolve a device by name. `default` selects the host default input.
pub fn find_input_device(name: &str) -> Result<Device, SourceError> {
    let host = cpal::default_host();

    if name == DEFAULT_DEVICE_NAME {
        if let Some(device) = host.default_input_device() {
            return Ok(device);
        }
    }

    host.input_devices()
        .map_err(|e| SourceError::EnumerationError(e.to_string()))?
        .find(|d| d.name().map(|n| n == name).unwrap_or(false))
        .ok_or_else(|| SourceError::DeviceNotFound(name.to_string()))
}
