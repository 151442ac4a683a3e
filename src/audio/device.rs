//! Audio device lookup
//!
//! Each session acquires exactly one input and one output device. The
//! handles live only between session connect and disconnect; cpal releases
//! the device when the stream wrapping it is dropped.

use cpal::traits::{DeviceTrait, HostTrait};

use crate::error::AudioError;

/// Wrapper around a cpal device
pub struct AudioDevice {
    inner: cpal::Device,
    pub name: String,
}

impl AudioDevice {
    pub fn from_cpal(device: cpal::Device) -> Self {
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        Self {
            inner: device,
            name,
        }
    }

    pub fn inner(&self) -> &cpal::Device {
        &self.inner
    }

    pub fn into_inner(self) -> cpal::Device {
        self.inner
    }
}

/// Get an input device by name, or the system default.
pub fn get_input_device(name: Option<&str>) -> Result<AudioDevice, AudioError> {
    let host = cpal::default_host();

    match name {
        Some(name) => {
            let devices = host
                .input_devices()
                .map_err(|e| AudioError::DeviceUnavailable(e.to_string()))?;
            for device in devices {
                if device.name().map(|n| n == name).unwrap_or(false) {
                    return Ok(AudioDevice::from_cpal(device));
                }
            }
            Err(AudioError::DeviceUnavailable(format!(
                "input device not found: {name}"
            )))
        }
        None => host
            .default_input_device()
            .map(AudioDevice::from_cpal)
            .ok_or_else(|| AudioError::DeviceUnavailable("no default input device".to_string())),
    }
}

/// Get an output device by name, or the system default.
pub fn get_output_device(name: Option<&str>) -> Result<AudioDevice, AudioError> {
    let host = cpal::default_host();

    match name {
        Some(name) => {
            let devices = host
                .output_devices()
                .map_err(|e| AudioError::DeviceUnavailable(e.to_string()))?;
            for device in devices {
                if device.name().map(|n| n == name).unwrap_or(false) {
                    return Ok(AudioDevice::from_cpal(device));
                }
            }
            Err(AudioError::DeviceUnavailable(format!(
                "output device not found: {name}"
            )))
        }
        None => host
            .default_output_device()
            .map(AudioDevice::from_cpal)
            .ok_or_else(|| AudioError::DeviceUnavailable("no default output device".to_string())),
    }
}
