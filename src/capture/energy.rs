//! Energy-based speech detection
//!
//! Decides whether a chunk of audio contains speech by comparing its RMS
//! energy against a threshold. Energy is measured on the 16-bit PCM scale
//! (RMS × 32768) so thresholds read the same as in most speech tooling.
//!
//! With dynamic thresholding the threshold drifts towards `1.5 ×` the energy
//! of non-speech audio, so it follows slow changes in background noise.

use super::CaptureDevice;
use crate::config::CaptureConfig;
use crate::error::AudioError;
use std::time::{Duration, Instant};

/// Fraction of the old threshold kept after one second of adaptation
const DAMPING: f32 = 0.15;

/// Threshold target relative to ambient energy
const RATIO: f32 = 1.5;

/// Full scale of 16-bit PCM
const PCM_SCALE: f32 = 32768.0;

/// Calibration gives up this long after its nominal duration
const CALIBRATION_GRACE: Duration = Duration::from_secs(1);

/// Calculate RMS of a sample slice (0.0 - 1.0 for normalized audio)
pub fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|&s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// RMS energy on the 16-bit PCM scale
pub fn energy(samples: &[f32]) -> f32 {
    calculate_rms(samples) * PCM_SCALE
}

/// Speech/non-speech classifier with an adaptive threshold
#[derive(Debug, Clone)]
pub struct EnergyDetector {
    threshold: f32,
    /// Lowest threshold calibration may settle on
    floor: f32,
    dynamic: bool,
}

impl EnergyDetector {
    pub fn new(config: &CaptureConfig) -> Self {
        Self {
            threshold: config.energy_threshold,
            floor: config.energy_threshold,
            dynamic: config.dynamic_energy_threshold,
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn is_speech(&self, samples: &[f32]) -> bool {
        energy(samples) > self.threshold
    }

    /// Move the threshold towards the ambient level of a non-speech chunk
    pub fn adapt(&mut self, samples: &[f32], sample_rate: u32) {
        if !self.dynamic || samples.is_empty() {
            return;
        }
        self.step(samples, sample_rate);
    }

    fn step(&mut self, samples: &[f32], sample_rate: u32) {
        let seconds = samples.len() as f32 / sample_rate.max(1) as f32;
        let damping = DAMPING.powf(seconds);
        let target = energy(samples) * RATIO;
        self.threshold = self.threshold * damping + target * (1.0 - damping);
    }

    /// Measure ambient noise on a started device for `duration` of audio.
    ///
    /// The resulting threshold never drops below the configured one. Fails
    /// if the device delivers no audio at all.
    pub fn calibrate(
        &mut self,
        device: &mut dyn CaptureDevice,
        duration: Duration,
    ) -> Result<f32, AudioError> {
        let sample_rate = device.sample_rate();
        let wanted = (duration.as_secs_f32() * sample_rate as f32) as usize;
        let deadline = Instant::now() + duration + CALIBRATION_GRACE;
        let mut consumed = 0usize;

        while consumed < wanted && Instant::now() < deadline {
            if let Some(chunk) = device.read(Duration::from_millis(100))? {
                consumed += chunk.len();
                self.step(&chunk, sample_rate);
            }
        }

        if consumed == 0 && wanted > 0 {
            return Err(AudioError::StreamError(format!(
                "No audio received from '{}' during calibration",
                device.name()
            )));
        }

        self.threshold = self.threshold.max(self.floor);
        tracing::info!(
            "Calibrated energy threshold: {:.1} ({:.2}s of audio)",
            self.threshold,
            consumed as f32 / sample_rate.max(1) as f32
        );
        Ok(self.threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(amplitude: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (i as f32 * 440.0 * 2.0 * std::f32::consts::PI / 16000.0).sin() * amplitude)
            .collect()
    }

    /// Plays back fixed chunks, then goes quiet
    struct ChunkDevice {
        chunks: Vec<Vec<f32>>,
    }

    impl CaptureDevice for ChunkDevice {
        fn name(&self) -> &str {
            "chunks"
        }
        fn sample_rate(&self) -> u32 {
            16000
        }
        fn start(&mut self) -> Result<(), AudioError> {
            Ok(())
        }
        fn read(&mut self, wait: Duration) -> Result<Option<Vec<f32>>, AudioError> {
            if self.chunks.is_empty() {
                std::thread::sleep(wait);
                return Ok(None);
            }
            Ok(Some(self.chunks.remove(0)))
        }
        fn stop(&mut self) {}
    }

    #[test]
    fn test_calculate_rms() {
        let ones = vec![1.0f32; 100];
        assert!((calculate_rms(&ones) - 1.0).abs() < 0.001);
        assert_eq!(calculate_rms(&[]), 0.0);

        // Sine with amplitude 1.0 has RMS ~0.707
        let rms = calculate_rms(&sine(1.0, 16000));
        assert!((rms - 0.707).abs() < 0.01);
    }

    #[test]
    fn test_speech_detection() {
        let detector = EnergyDetector::new(&CaptureConfig::default());
        assert!(!detector.is_speech(&vec![0.0; 1600]));
        assert!(!detector.is_speech(&sine(0.001, 1600)));
        assert!(detector.is_speech(&sine(0.5, 1600)));
    }

    #[test]
    fn test_adapt_moves_towards_ambient() {
        let mut detector = EnergyDetector::new(&CaptureConfig::default());
        let before = detector.threshold();
        // Ambient well below the threshold pulls it down
        detector.adapt(&sine(0.001, 16000), 16000);
        assert!(detector.threshold() < before);
    }

    #[test]
    fn test_adapt_disabled() {
        let config = CaptureConfig {
            dynamic_energy_threshold: false,
            ..CaptureConfig::default()
        };
        let mut detector = EnergyDetector::new(&config);
        detector.adapt(&sine(0.2, 16000), 16000);
        assert_eq!(detector.threshold(), config.energy_threshold);
    }

    #[test]
    fn test_calibrate_raises_threshold_for_noise() {
        let mut detector = EnergyDetector::new(&CaptureConfig::default());
        let noise = sine(0.1, 1600);
        let mut device = ChunkDevice {
            chunks: vec![noise.clone(); 10],
        };
        let threshold = detector
            .calibrate(&mut device, Duration::from_secs(1))
            .unwrap();
        // Ambient energy ~2300, so the threshold lands well above the default
        assert!(threshold > 1000.0);
        assert!(!detector.is_speech(&noise));
    }

    #[test]
    fn test_calibrate_keeps_configured_floor() {
        let config = CaptureConfig::default();
        let mut detector = EnergyDetector::new(&config);
        let mut device = ChunkDevice {
            chunks: vec![vec![0.0; 1600]; 10],
        };
        let threshold = detector
            .calibrate(&mut device, Duration::from_secs(1))
            .unwrap();
        assert_eq!(threshold, config.energy_threshold);
    }

    #[test]
    fn test_calibrate_without_audio_fails() {
        let mut detector = EnergyDetector::new(&CaptureConfig::default());
        let mut device = ChunkDevice { chunks: Vec::new() };
        let result = detector.calibrate(&mut device, Duration::from_millis(100));
        assert!(matches!(result, Err(AudioError::StreamError(_))));
    }
}
