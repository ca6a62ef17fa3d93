//! Audio capture module
//!
//! Provides microphone input via cpal (PipeWire, PulseAudio, ALSA), energy
//! based phrase detection, and [`session::CaptureSession`], which turns one
//! spoken phrase into a transcription outcome.

pub mod cpal_capture;
pub mod energy;
pub mod session;

use crate::config::CaptureConfig;
use crate::error::AudioError;
use std::time::Duration;

/// Trait for audio input devices
///
/// Samples are f32, mono, at [`CaptureDevice::sample_rate`].
pub trait CaptureDevice: Send {
    /// Device name for logging
    fn name(&self) -> &str;

    fn sample_rate(&self) -> u32;

    /// Open the input stream
    fn start(&mut self) -> Result<(), AudioError>;

    /// Next chunk of samples, or `None` if nothing arrived within `wait`
    fn read(&mut self, wait: Duration) -> Result<Option<Vec<f32>>, AudioError>;

    /// Close the input stream. Safe to call when not started.
    fn stop(&mut self);
}

/// Enumerates and opens capture devices
pub trait CaptureBackend: Send {
    fn device_names(&self) -> Result<Vec<String>, AudioError>;

    /// Open a device by exact name, or the system default for `None`
    fn open(&self, name: Option<&str>) -> Result<Box<dyn CaptureDevice>, AudioError>;
}

/// Decide which device to open from the available names.
///
/// With `device = "auto"` the first name containing a preferred keyword is
/// chosen, else the system default (`None`). Any other value is matched
/// exactly, then case-insensitively, then as a substring.
pub fn choose_device(names: &[String], config: &CaptureConfig) -> Result<Option<String>, AudioError> {
    if config.device.eq_ignore_ascii_case("auto") {
        let keywords: Vec<String> = config
            .preferred_devices
            .iter()
            .map(|k| k.to_lowercase())
            .collect();
        let chosen = names.iter().find(|name| {
            let lower = name.to_lowercase();
            keywords.iter().any(|k| lower.contains(k.as_str()))
        });
        return Ok(chosen.cloned());
    }

    if config.device == "default" {
        return Ok(None);
    }

    let wanted = config.device.as_str();
    let wanted_lower = wanted.to_lowercase();

    if let Some(name) = names.iter().find(|n| n.as_str() == wanted) {
        tracing::debug!("Found audio device by exact match: {}", name);
        return Ok(Some(name.clone()));
    }

    if let Some(name) = names.iter().find(|n| n.to_lowercase() == wanted_lower) {
        tracing::debug!(
            "Found audio device by case-insensitive match: {} (searched for: {})",
            name,
            wanted
        );
        return Ok(Some(name.clone()));
    }

    if let Some(name) = names
        .iter()
        .find(|n| n.to_lowercase().contains(&wanted_lower))
    {
        tracing::debug!(
            "Found audio device by substring match: {} (searched for: {})",
            name,
            wanted
        );
        return Ok(Some(name.clone()));
    }

    let available = if names.is_empty() {
        "No audio input devices found.".to_string()
    } else {
        format!(
            "Available devices:\n{}",
            names
                .iter()
                .map(|n| format!("  - {}", n))
                .collect::<Vec<_>>()
                .join("\n")
        )
    };

    Err(AudioError::DeviceNotFoundWithList {
        requested: wanted.to_string(),
        available,
    })
}

/// Open the configured device, reporting what was chosen
pub fn open_device(
    backend: &dyn CaptureBackend,
    config: &CaptureConfig,
) -> Result<Box<dyn CaptureDevice>, AudioError> {
    let names = backend.device_names()?;
    tracing::info!("Found {} input device(s)", names.len());
    if names.is_empty() {
        return Err(AudioError::NoDevices);
    }

    let chosen = choose_device(&names, config)?;
    match chosen {
        Some(ref name) => tracing::info!("Selected input device: {}", name),
        None => tracing::info!("Using default input device"),
    }

    backend.open(chosen.as_deref())
}
