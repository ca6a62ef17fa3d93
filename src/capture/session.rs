//! One blocking listen-then-recognize cycle
//!
//! A listen has two phases:
//!
//! 1. Wait for speech. Non-speech chunks feed the dynamic threshold and a
//!    short pre-roll buffer. Nothing heard within the timeout → `Timeout`.
//! 2. Record until the trailing silence reaches the pause threshold, the
//!    phrase limit is hit, or the device stops delivering audio.
//!
//! Whatever was recorded goes to the recognition chain.

use super::energy::EnergyDetector;
use super::CaptureDevice;
use crate::config::{self, CaptureConfig};
use crate::error::AudioError;
use crate::recognize::RecognitionChain;
use crate::state::TranscriptionOutcome;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Audio kept from before speech started, so the first syllable survives
const PRE_ROLL: Duration = Duration::from_millis(500);

/// Longest single wait on the device
const READ_WAIT: Duration = Duration::from_millis(100);

/// Capture device plus everything needed to turn a phrase into text
pub struct CaptureSession {
    device: Box<dyn CaptureDevice>,
    detector: EnergyDetector,
    chain: RecognitionChain,
    pause_threshold: Duration,
}

impl CaptureSession {
    pub fn new(
        device: Box<dyn CaptureDevice>,
        detector: EnergyDetector,
        chain: RecognitionChain,
        pause_threshold: Duration,
    ) -> Self {
        Self {
            device,
            detector,
            chain,
            pause_threshold,
        }
    }

    pub fn from_config(
        device: Box<dyn CaptureDevice>,
        chain: RecognitionChain,
        config: &CaptureConfig,
    ) -> Self {
        Self::new(
            device,
            EnergyDetector::new(config),
            chain,
            config::secs(config.pause_threshold_secs),
        )
    }

    pub fn device_name(&self) -> &str {
        self.device.name()
    }

    pub fn energy_threshold(&self) -> f32 {
        self.detector.threshold()
    }

    /// Measure ambient noise for `duration` and set the speech threshold
    pub fn calibrate(&mut self, duration: Duration) -> Result<f32, AudioError> {
        self.device.start()?;
        let result = self.detector.calibrate(self.device.as_mut(), duration);
        self.device.stop();
        result
    }

    /// Listen for one phrase and recognize it. Never fails: device and
    /// service problems come back as [`TranscriptionOutcome::BackendError`].
    pub fn listen(
        &mut self,
        timeout: Duration,
        phrase_limit: Option<Duration>,
    ) -> TranscriptionOutcome {
        if let Err(e) = self.device.start() {
            tracing::warn!("Failed to start capture on '{}': {}", self.device.name(), e);
            return TranscriptionOutcome::BackendError;
        }

        let captured = self.capture_phrase(timeout, phrase_limit);
        self.device.stop();

        let samples = match captured {
            Ok(Some(samples)) => samples,
            Ok(None) => return TranscriptionOutcome::Timeout,
            Err(e) => {
                tracing::warn!("Audio capture failed: {}", e);
                return TranscriptionOutcome::BackendError;
            }
        };

        let sample_rate = self.device.sample_rate();
        tracing::debug!(
            "Captured {:.2}s phrase, recognizing",
            samples.len() as f32 / sample_rate.max(1) as f32
        );

        let outcome = self.chain.transcribe(&samples, sample_rate);
        tracing::debug!("Listen result: {}", outcome);
        outcome
    }

    fn capture_phrase(
        &mut self,
        timeout: Duration,
        phrase_limit: Option<Duration>,
    ) -> Result<Option<Vec<f32>>, AudioError> {
        let sample_rate = self.device.sample_rate().max(1);
        let to_samples = |d: Duration| (d.as_secs_f64() * sample_rate as f64) as usize;

        let pre_roll_samples = to_samples(PRE_ROLL);
        let pause_samples = to_samples(self.pause_threshold).max(1);
        let limit_samples = phrase_limit.map(to_samples);

        // Phase 1: wait for speech
        let started = Instant::now();
        let mut consumed = 0usize;
        let mut pre_roll: VecDeque<Vec<f32>> = VecDeque::new();
        let mut pre_roll_len = 0usize;

        let first = loop {
            let audio_time = Duration::from_secs_f64(consumed as f64 / sample_rate as f64);
            if started.elapsed().max(audio_time) > timeout {
                tracing::debug!("No speech within {:.1}s", timeout.as_secs_f32());
                return Ok(None);
            }

            let chunk = match self.device.read(READ_WAIT)? {
                Some(chunk) if !chunk.is_empty() => chunk,
                _ => continue,
            };
            consumed += chunk.len();

            if self.detector.is_speech(&chunk) {
                break chunk;
            }

            self.detector.adapt(&chunk, sample_rate);
            pre_roll_len += chunk.len();
            pre_roll.push_back(chunk);
            while pre_roll_len > pre_roll_samples {
                match pre_roll.pop_front() {
                    Some(old) => pre_roll_len -= old.len(),
                    None => break,
                }
            }
        };

        // Phase 2: record until trailing silence, phrase limit, or starvation
        let mut phrase: Vec<f32> = pre_roll.into_iter().flatten().collect();
        let mut spoken = first.len();
        phrase.extend(first);
        let mut silence = 0usize;
        let mut last_audio = Instant::now();

        loop {
            if let Some(limit) = limit_samples {
                if spoken >= limit {
                    tracing::debug!("Phrase limit reached");
                    break;
                }
            }

            let chunk = match self.device.read(READ_WAIT)? {
                Some(chunk) if !chunk.is_empty() => chunk,
                _ => {
                    if last_audio.elapsed() > self.pause_threshold {
                        tracing::debug!("Audio stopped arriving, ending phrase");
                        break;
                    }
                    continue;
                }
            };
            last_audio = Instant::now();

            if self.detector.is_speech(&chunk) {
                silence = 0;
            } else {
                silence += chunk.len();
            }
            spoken += chunk.len();
            phrase.extend(chunk);

            if silence >= pause_samples {
                break;
            }
        }

        Ok(Some(phrase))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RecognizeError;
    use crate::recognize::Recognizer;
    use std::sync::{Arc, Mutex};

    const RATE: u32 = 16000;
    const CHUNK: usize = 1600; // 100ms

    fn speech() -> Vec<f32> {
        (0..CHUNK)
            .map(|i| (i as f32 * 440.0 * 2.0 * std::f32::consts::PI / RATE as f32).sin() * 0.5)
            .collect()
    }

    fn silence() -> Vec<f32> {
        vec![0.0; CHUNK]
    }

    enum Step {
        Audio(Vec<f32>),
        Fail,
    }

    struct ScriptedDevice {
        steps: VecDeque<Step>,
        fail_start: bool,
        started: Arc<Mutex<u32>>,
    }

    impl ScriptedDevice {
        fn new(chunks: Vec<Vec<f32>>) -> Self {
            Self {
                steps: chunks.into_iter().map(Step::Audio).collect(),
                fail_start: false,
                started: Arc::new(Mutex::new(0)),
            }
        }
    }

    impl CaptureDevice for ScriptedDevice {
        fn name(&self) -> &str {
            "scripted"
        }
        fn sample_rate(&self) -> u32 {
            RATE
        }
        fn start(&mut self) -> Result<(), AudioError> {
            if self.fail_start {
                return Err(AudioError::Connection("unplugged".into()));
            }
            *self.started.lock().unwrap() += 1;
            Ok(())
        }
        fn read(&mut self, wait: Duration) -> Result<Option<Vec<f32>>, AudioError> {
            match self.steps.pop_front() {
                Some(Step::Audio(chunk)) => Ok(Some(chunk)),
                Some(Step::Fail) => Err(AudioError::StreamError("device lost".into())),
                None => {
                    std::thread::sleep(wait);
                    Ok(None)
                }
            }
        }
        fn stop(&mut self) {}
    }

    /// Records how much audio it was given
    struct LengthRecognizer {
        lengths: Arc<Mutex<Vec<usize>>>,
    }

    impl Recognizer for LengthRecognizer {
        fn recognize(
            &self,
            samples: &[f32],
            _sample_rate: u32,
            _locale: Option<&str>,
        ) -> Result<String, RecognizeError> {
            self.lengths.lock().unwrap().push(samples.len());
            Ok("Heard You".to_string())
        }
    }

    fn session(device: ScriptedDevice) -> (CaptureSession, Arc<Mutex<Vec<usize>>>) {
        let lengths = Arc::new(Mutex::new(Vec::new()));
        let chain = RecognitionChain::new(
            Box::new(LengthRecognizer {
                lengths: lengths.clone(),
            }),
            vec!["en-US".to_string()],
        );
        let config = CaptureConfig {
            pause_threshold_secs: 0.3,
            dynamic_energy_threshold: false,
            ..CaptureConfig::default()
        };
        (
            CaptureSession::from_config(Box::new(device), chain, &config),
            lengths,
        )
    }

    #[test]
    fn test_silence_times_out() {
        let (mut session, lengths) = session(ScriptedDevice::new(vec![silence(); 20]));
        let outcome = session.listen(Duration::from_millis(500), None);
        assert_eq!(outcome, TranscriptionOutcome::Timeout);
        assert!(lengths.lock().unwrap().is_empty());
    }

    #[test]
    fn test_no_audio_times_out_on_wall_clock() {
        let (mut session, _) = session(ScriptedDevice::new(Vec::new()));
        let start = Instant::now();
        let outcome = session.listen(Duration::from_millis(200), None);
        assert_eq!(outcome, TranscriptionOutcome::Timeout);
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_phrase_ends_after_pause() {
        let mut chunks = vec![silence(); 3];
        chunks.extend(vec![speech(); 5]);
        chunks.extend(vec![silence(); 10]);
        let (mut session, lengths) = session(ScriptedDevice::new(chunks));

        let outcome = session.listen(Duration::from_secs(5), None);
        assert_eq!(outcome.text(), Some("heard you"));

        // 3 pre-roll + 5 speech + 3 silence chunks (0.3s pause)
        assert_eq!(lengths.lock().unwrap()[0], 11 * CHUNK);
    }

    #[test]
    fn test_phrase_limit_cuts_recording() {
        let mut chunks = vec![speech(); 30];
        chunks.extend(vec![silence(); 5]);
        let (mut session, lengths) = session(ScriptedDevice::new(chunks));

        let outcome = session.listen(Duration::from_secs(5), Some(Duration::from_millis(500)));
        assert!(outcome.is_transcript());
        assert_eq!(lengths.lock().unwrap()[0], 5 * CHUNK);
    }

    #[test]
    fn test_starved_phrase_still_recognized() {
        let (mut session, lengths) = session(ScriptedDevice::new(vec![speech(); 4]));
        let outcome = session.listen(Duration::from_secs(5), None);
        assert!(outcome.is_transcript());
        assert_eq!(lengths.lock().unwrap()[0], 4 * CHUNK);
    }

    #[test]
    fn test_start_failure_is_backend_error() {
        let mut device = ScriptedDevice::new(Vec::new());
        device.fail_start = true;
        let (mut session, _) = session(device);
        assert_eq!(
            session.listen(Duration::from_secs(1), None),
            TranscriptionOutcome::BackendError
        );
    }

    #[test]
    fn test_read_failure_is_backend_error() {
        let mut device = ScriptedDevice::new(vec![speech(); 2]);
        device.steps.push_back(Step::Fail);
        let (mut session, lengths) = session(device);
        assert_eq!(
            session.listen(Duration::from_secs(1), None),
            TranscriptionOutcome::BackendError
        );
        assert!(lengths.lock().unwrap().is_empty());
    }

    #[test]
    fn test_device_started_per_listen() {
        let device = ScriptedDevice::new(vec![silence(); 40]);
        let started = device.started.clone();
        let (mut session, _) = session(device);
        session.listen(Duration::from_millis(100), None);
        session.listen(Duration::from_millis(100), None);
        assert_eq!(*started.lock().unwrap(), 2);
    }
}
