//! cpal-based audio capture
//!
//! Uses the cpal crate for cross-platform audio input.
//! Works with PipeWire, PulseAudio, and ALSA backends.
//!
//! Note: cpal::Stream is not Send, so the stream lives on a dedicated
//! thread and chunks are passed back over a channel.

use super::{CaptureBackend, CaptureDevice};
use crate::error::AudioError;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::Duration;

/// How long to wait for the capture thread to report the stream running
const STARTUP_TIMEOUT: Duration = Duration::from_secs(2);

/// Parameters for building an audio input stream
struct StreamBuildParams {
    tx: Sender<Vec<f32>>,
    source_rate: u32,
    target_rate: u32,
    source_channels: usize,
}

/// Capture backend on the default cpal host
pub struct CpalBackend {
    sample_rate: u32,
}

impl CpalBackend {
    pub fn new(sample_rate: u32) -> Self {
        Self { sample_rate }
    }
}

impl CaptureBackend for CpalBackend {
    fn device_names(&self) -> Result<Vec<String>, AudioError> {
        use cpal::traits::{DeviceTrait, HostTrait};

        let host = cpal::default_host();
        let devices = host
            .input_devices()
            .map_err(|e| AudioError::Connection(e.to_string()))?;

        Ok(devices.filter_map(|d| d.name().ok()).collect())
    }

    fn open(&self, name: Option<&str>) -> Result<Box<dyn CaptureDevice>, AudioError> {
        // Resolve now so a missing device fails at open, not at first listen
        let host = cpal::default_host();
        let device = find_device(&host, name)?;

        use cpal::traits::DeviceTrait;
        let resolved = device.name().unwrap_or_else(|_| "unknown".to_string());
        tracing::info!("Using audio device: {}", resolved);

        Ok(Box::new(CpalDevice {
            requested: name.map(str::to_string),
            name: resolved,
            sample_rate: self.sample_rate,
            stream: None,
        }))
    }
}

/// A running capture thread
struct RunningStream {
    chunks: Receiver<Vec<f32>>,
    stop_tx: Sender<()>,
    thread_handle: thread::JoinHandle<()>,
}

/// cpal input device
pub struct CpalDevice {
    /// Name passed to open (None = system default)
    requested: Option<String>,
    name: String,
    sample_rate: u32,
    stream: Option<RunningStream>,
}

fn find_device(host: &cpal::Host, name: Option<&str>) -> Result<cpal::Device, AudioError> {
    use cpal::traits::{DeviceTrait, HostTrait};

    match name {
        None => host
            .default_input_device()
            .ok_or_else(|| AudioError::DeviceNotFound("default".to_string())),
        Some(name) => host
            .input_devices()
            .map_err(|e| AudioError::Connection(e.to_string()))?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| AudioError::DeviceNotFound(name.to_string())),
    }
}

impl CaptureDevice for CpalDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn start(&mut self) -> Result<(), AudioError> {
        use cpal::traits::{DeviceTrait, StreamTrait};

        if self.stream.is_some() {
            return Ok(());
        }

        let host = cpal::default_host();
        let device = find_device(&host, self.requested.as_deref())?;

        let supported_config = device
            .default_input_config()
            .map_err(|e| AudioError::Connection(e.to_string()))?;

        let source_sample_rate = supported_config.sample_rate().0;
        let source_channels = supported_config.channels() as usize;
        let target_sample_rate = self.sample_rate;
        let sample_format = supported_config.sample_format();

        tracing::debug!(
            "Device config: {} Hz, {} channel(s), format: {:?}",
            source_sample_rate,
            source_channels,
            sample_format
        );

        let (chunk_tx, chunk_rx) = mpsc::channel::<Vec<f32>>();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), AudioError>>();

        let thread_handle = thread::Builder::new()
            .name("audio-capture".to_string())
            .spawn(move || {
                let stream_config = cpal::StreamConfig {
                    channels: supported_config.channels(),
                    sample_rate: supported_config.sample_rate(),
                    buffer_size: cpal::BufferSize::Default,
                };

                let err_fn = |err| tracing::error!("Audio stream error: {}", err);

                let params = StreamBuildParams {
                    tx: chunk_tx,
                    source_rate: source_sample_rate,
                    target_rate: target_sample_rate,
                    source_channels,
                };

                let stream_result = match sample_format {
                    cpal::SampleFormat::F32 => {
                        build_stream::<f32>(&device, &stream_config, params, err_fn)
                    }
                    cpal::SampleFormat::I16 => {
                        build_stream::<i16>(&device, &stream_config, params, err_fn)
                    }
                    cpal::SampleFormat::U16 => {
                        build_stream::<u16>(&device, &stream_config, params, err_fn)
                    }
                    format => Err(AudioError::StreamError(format!(
                        "Unsupported sample format: {:?}",
                        format
                    ))),
                };

                let stream = match stream_result {
                    Ok(s) => s,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(AudioError::StreamError(e.to_string())));
                    return;
                }

                let _ = ready_tx.send(Ok(()));
                tracing::debug!("Audio capture thread started");

                // Wait for stop (or the device handle being dropped)
                let _ = stop_rx.recv();
                drop(stream);

                tracing::debug!("Audio capture thread stopped");
            })
            .map_err(|e| AudioError::StreamError(format!("Failed to spawn capture thread: {}", e)))?;

        match ready_rx.recv_timeout(STARTUP_TIMEOUT) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = thread_handle.join();
                return Err(e);
            }
            Err(_) => {
                let _ = stop_tx.send(());
                return Err(AudioError::StreamError(
                    "Timed out starting audio stream".to_string(),
                ));
            }
        }

        self.stream = Some(RunningStream {
            chunks: chunk_rx,
            stop_tx,
            thread_handle,
        });
        Ok(())
    }

    fn read(&mut self, wait: Duration) -> Result<Option<Vec<f32>>, AudioError> {
        let stream = self.stream.as_ref().ok_or(AudioError::NotStarted)?;
        match stream.chunks.recv_timeout(wait) {
            Ok(chunk) => Ok(Some(chunk)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(AudioError::StreamError(
                "Audio stream closed unexpectedly".to_string(),
            )),
        }
    }

    fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.stop_tx.send(());
            let _ = stream.thread_handle.join();
        }
    }
}

impl Drop for CpalDevice {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Build an input stream for a specific sample type
fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    params: StreamBuildParams,
    err_fn: impl Fn(cpal::StreamError) + Send + 'static,
) -> Result<cpal::Stream, AudioError>
where
    T: cpal::Sample + cpal::SizedSample + Send + 'static,
    f32: cpal::FromSample<T>,
{
    use cpal::traits::DeviceTrait;

    let StreamBuildParams {
        tx,
        source_rate,
        target_rate,
        source_channels,
    } = params;

    let stream = device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                let mono = mix_to_mono(data, source_channels);

                let resampled = if source_rate != target_rate {
                    resample(&mono, source_rate, target_rate)
                } else {
                    mono
                };

                // Receiver may already be gone during shutdown
                let _ = tx.send(resampled);
            },
            err_fn,
            None,
        )
        .map_err(|e| AudioError::StreamError(e.to_string()))?;

    Ok(stream)
}

/// Convert interleaved frames to mono f32 by averaging channels
fn mix_to_mono<T>(data: &[T], channels: usize) -> Vec<f32>
where
    T: cpal::Sample,
    f32: cpal::FromSample<T>,
{
    let channels = channels.max(1);
    data.chunks(channels)
        .map(|frame| {
            let sum: f32 = frame
                .iter()
                .map(|&s| <f32 as cpal::FromSample<T>>::from_sample_(s))
                .sum();
            sum / frame.len() as f32
        })
        .collect()
}

/// Linear interpolation resampling
fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = to_rate as f64 / from_rate as f64;
    let new_len = (samples.len() as f64 * ratio).ceil() as usize;
    let mut output = Vec::with_capacity(new_len);

    for i in 0..new_len {
        let src_idx = i as f64 / ratio;
        let idx = src_idx.floor() as usize;
        let frac = (src_idx - idx as f64) as f32;

        let sample = if idx + 1 < samples.len() {
            samples[idx] * (1.0 - frac) + samples[idx + 1] * frac
        } else {
            samples.get(idx).copied().unwrap_or(0.0)
        };

        output.push(sample);
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resample_same_rate() {
        let samples = vec![1.0, 2.0, 3.0, 4.0];
        assert_eq!(resample(&samples, 16000, 16000), samples);
    }

    #[test]
    fn test_resample_downsample() {
        let samples = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0];
        let result = resample(&samples, 48000, 16000);
        // 3:1 ratio, so 8 samples -> ~3 samples
        assert!(result.len() >= 2 && result.len() <= 4);
    }

    #[test]
    fn test_resample_empty() {
        assert!(resample(&[], 44100, 16000).is_empty());
    }

    #[test]
    fn test_mix_to_mono_averages_channels() {
        let stereo: Vec<f32> = vec![0.5, -0.5, 1.0, 0.0];
        assert_eq!(mix_to_mono(&stereo, 2), vec![0.0, 0.5]);
    }

    #[test]
    fn test_mix_to_mono_single_channel_passthrough() {
        let mono: Vec<f32> = vec![0.1, 0.2, 0.3];
        assert_eq!(mix_to_mono(&mono, 1), mono);
    }

    #[test]
    fn test_read_before_start_fails() {
        let mut device = CpalDevice {
            requested: None,
            name: "test".to_string(),
            sample_rate: 16000,
            stream: None,
        };
        let result = device.read(Duration::from_millis(1));
        assert!(matches!(result, Err(AudioError::NotStarted)));
        device.stop(); // no-op when not started
    }
}
