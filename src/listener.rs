//! Continuous listening
//!
//! Runs [`CaptureSession::listen`] in a loop on its own thread and keeps
//! only successful transcripts. Stopping is cooperative: the loop checks its
//! cancellation flag at the top of each iteration and never interrupts a
//! listen already in progress.

use crate::capture::session::CaptureSession;
use crate::config::{self, ListenerConfig};
use crate::state::{TranscriptionOutcome, TranscriptionResult};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, SyncSender, TrySendError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

/// Sending half of the transcript channel
#[derive(Clone)]
enum TranscriptSender {
    Unbounded(Sender<TranscriptionResult>),
    /// Newest result is dropped while the channel is full
    Bounded(SyncSender<TranscriptionResult>),
}

impl TranscriptSender {
    /// Returns false once the receiving side is gone
    fn send(&self, result: TranscriptionResult) -> bool {
        match self {
            TranscriptSender::Unbounded(tx) => tx.send(result).is_ok(),
            TranscriptSender::Bounded(tx) => match tx.try_send(result) {
                Ok(()) => true,
                Err(TrySendError::Full(dropped)) => {
                    tracing::warn!("Transcript buffer full, dropping: {:?}", dropped.text);
                    true
                }
                Err(TrySendError::Disconnected(_)) => false,
            },
        }
    }
}

/// Per-iteration listen settings
#[derive(Debug, Clone)]
struct LoopSettings {
    timeout: Duration,
    phrase_limit: Option<Duration>,
    idle_backoff: Duration,
    error_backoff: Duration,
}

impl LoopSettings {
    fn from_config(config: &ListenerConfig) -> Self {
        let phrase_limit = if config.phrase_limit_secs > 0.0 {
            Some(config::secs(config.phrase_limit_secs))
        } else {
            None
        };
        Self {
            timeout: config::secs(config.timeout_secs),
            phrase_limit,
            idle_backoff: Duration::from_millis(config.idle_backoff_ms),
            error_backoff: Duration::from_millis(config.error_backoff_ms),
        }
    }
}

/// Background loop feeding transcripts into a channel
pub struct ContinuousListener {
    session: Arc<Mutex<CaptureSession>>,
    settings: LoopSettings,
    tx: TranscriptSender,
    rx: Mutex<Receiver<TranscriptionResult>>,
    /// Cancellation flag of the running loop, if any
    active: Mutex<Option<Arc<AtomicBool>>>,
}

pub(crate) fn lock_session(session: &Mutex<CaptureSession>) -> MutexGuard<'_, CaptureSession> {
    session.lock().unwrap_or_else(|e| e.into_inner())
}

impl ContinuousListener {
    pub fn new(session: Arc<Mutex<CaptureSession>>, config: &ListenerConfig) -> Self {
        let (tx, rx) = match config.max_buffered {
            Some(capacity) => {
                let (tx, rx) = mpsc::sync_channel(capacity.max(1));
                (TranscriptSender::Bounded(tx), rx)
            }
            None => {
                let (tx, rx) = mpsc::channel();
                (TranscriptSender::Unbounded(tx), rx)
            }
        };

        Self {
            session,
            settings: LoopSettings::from_config(config),
            tx,
            rx: Mutex::new(rx),
            active: Mutex::new(None),
        }
    }

    fn active(&self) -> MutexGuard<'_, Option<Arc<AtomicBool>>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start the loop. No-op while already running.
    pub fn start(&self) -> bool {
        let mut active = self.active();
        if let Some(ref flag) = *active {
            if flag.load(Ordering::SeqCst) {
                return true;
            }
        }

        let flag = Arc::new(AtomicBool::new(true));
        let worker = ListenLoop {
            session: self.session.clone(),
            settings: self.settings.clone(),
            tx: self.tx.clone(),
            running: flag.clone(),
        };

        match thread::Builder::new()
            .name("continuous-listener".to_string())
            .spawn(move || worker.run())
        {
            Ok(_) => {
                tracing::info!("Continuous listening started");
                *active = Some(flag);
                true
            }
            Err(e) => {
                tracing::error!("Failed to spawn listener thread: {}", e);
                false
            }
        }
    }

    /// Ask the loop to exit at its next iteration boundary. Never blocks.
    pub fn stop(&self) {
        if let Some(flag) = self.active().take() {
            flag.store(false, Ordering::SeqCst);
            tracing::info!("Continuous listening stopped");
        }
    }

    pub fn is_listening(&self) -> bool {
        self.active()
            .as_ref()
            .map(|flag| flag.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    /// Oldest buffered transcript, if any. Never blocks.
    pub fn poll(&self) -> Option<TranscriptionResult> {
        self.rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .try_recv()
            .ok()
    }

    /// Remove and return everything buffered
    pub fn drain(&self) -> Vec<TranscriptionResult> {
        let rx = self.rx.lock().unwrap_or_else(|e| e.into_inner());
        rx.try_iter().collect()
    }
}

impl Drop for ContinuousListener {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Pause after each transcript with the session unlocked, so a waiting
/// one-shot listen gets the device before the next iteration
const SESSION_HANDOFF: Duration = Duration::from_millis(5);

struct ListenLoop {
    session: Arc<Mutex<CaptureSession>>,
    settings: LoopSettings,
    tx: TranscriptSender,
    running: Arc<AtomicBool>,
}

impl ListenLoop {
    fn run(self) {
        tracing::debug!("Listener loop running");

        while self.running.load(Ordering::SeqCst) {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                lock_session(&self.session).listen(self.settings.timeout, self.settings.phrase_limit)
            }));

            match outcome {
                Ok(TranscriptionOutcome::Transcript(result)) => {
                    tracing::debug!("Heard: {:?}", result.text);
                    if !self.tx.send(result) {
                        tracing::debug!("Transcript receiver gone, listener exiting");
                        break;
                    }
                    thread::sleep(SESSION_HANDOFF);
                }
                Ok(sentinel) => {
                    tracing::trace!("Listen iteration: {}", sentinel);
                    thread::sleep(self.settings.idle_backoff);
                }
                Err(_) => {
                    tracing::error!("Listen iteration panicked, backing off");
                    thread::sleep(self.settings.error_backoff);
                }
            }
        }

        tracing::debug!("Listener loop exited");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::energy::EnergyDetector;
    use crate::capture::CaptureDevice;
    use crate::config::CaptureConfig;
    use crate::error::{AudioError, RecognizeError};
    use crate::recognize::{RecognitionChain, Recognizer};
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    /// Always delivers one loud chunk followed by starvation
    struct PulseDevice {
        pending: bool,
    }

    impl CaptureDevice for PulseDevice {
        fn name(&self) -> &str {
            "pulse"
        }
        fn sample_rate(&self) -> u32 {
            16000
        }
        fn start(&mut self) -> Result<(), AudioError> {
            self.pending = true;
            Ok(())
        }
        fn read(&mut self, wait: Duration) -> Result<Option<Vec<f32>>, AudioError> {
            if std::mem::take(&mut self.pending) {
                return Ok(Some(vec![0.5; 1600]));
            }
            thread::sleep(wait.min(Duration::from_millis(5)));
            Ok(None)
        }
        fn stop(&mut self) {}
    }

    /// Numbers each phrase; every `fail_every`th call is a no-match,
    /// the `panic_on`th call panics.
    struct CountingRecognizer {
        calls: AtomicUsize,
        fail_every: usize,
        panic_on: usize,
    }

    impl Recognizer for CountingRecognizer {
        fn recognize(
            &self,
            _samples: &[f32],
            _sample_rate: u32,
            _locale: Option<&str>,
        ) -> Result<String, RecognizeError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n == self.panic_on {
                panic!("recognizer blew up");
            }
            if self.fail_every > 0 && n % self.fail_every == 0 {
                return Err(RecognizeError::NoMatch);
            }
            Ok(format!("Phrase {}", n))
        }
    }

    fn listener(fail_every: usize, panic_on: usize, max_buffered: Option<usize>) -> ContinuousListener {
        let capture = CaptureConfig {
            pause_threshold_secs: 0.01,
            dynamic_energy_threshold: false,
            ..CaptureConfig::default()
        };
        let chain = RecognitionChain::new(
            Box::new(CountingRecognizer {
                calls: AtomicUsize::new(0),
                fail_every,
                panic_on,
            }),
            vec!["auto".to_string()],
        );
        let session = CaptureSession::new(
            Box::new(PulseDevice { pending: false }),
            EnergyDetector::new(&capture),
            chain,
            Duration::from_millis(10),
        );
        let config = ListenerConfig {
            timeout_secs: 0.5,
            phrase_limit_secs: 1.0,
            idle_backoff_ms: 1,
            error_backoff_ms: 1,
            max_buffered,
        };
        ContinuousListener::new(Arc::new(Mutex::new(session)), &config)
    }

    fn collect(listener: &ContinuousListener, count: usize) -> Vec<String> {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut texts = Vec::new();
        while texts.len() < count && Instant::now() < deadline {
            match listener.poll() {
                Some(result) => texts.push(result.text),
                None => thread::sleep(Duration::from_millis(5)),
            }
        }
        texts
    }

    fn number(text: &str) -> usize {
        text.trim_start_matches("phrase ").parse().unwrap()
    }

    #[test]
    fn test_poll_when_idle_is_empty() {
        let listener = listener(0, 0, None);
        assert!(!listener.is_listening());
        assert!(listener.poll().is_none());
        assert!(listener.drain().is_empty());
    }

    #[test]
    fn test_transcripts_arrive_in_order() {
        let listener = listener(0, 0, None);
        assert!(listener.start());
        assert!(listener.start()); // already running
        assert!(listener.is_listening());

        let texts = collect(&listener, 3);
        listener.stop();
        assert!(!listener.is_listening());

        assert_eq!(texts, vec!["phrase 1", "phrase 2", "phrase 3"]);
    }

    #[test]
    fn test_sentinels_never_reach_channel() {
        let listener = listener(2, 0, None);
        listener.start();
        let texts = collect(&listener, 3);
        listener.stop();

        let numbers: Vec<usize> = texts.iter().map(|t| number(t)).collect();
        assert_eq!(numbers, vec![1, 3, 5]);
    }

    #[test]
    fn test_loop_survives_panics() {
        let listener = listener(0, 2, None);
        listener.start();
        let texts = collect(&listener, 2);
        listener.stop();

        let numbers: Vec<usize> = texts.iter().map(|t| number(t)).collect();
        assert_eq!(numbers, vec![1, 3]);
    }

    #[test]
    fn test_stop_keeps_buffered_results() {
        let listener = listener(0, 0, None);
        listener.start();
        thread::sleep(Duration::from_millis(100));
        listener.stop();
        // Let any in-progress iteration finish
        thread::sleep(Duration::from_millis(100));

        let buffered = listener.drain();
        assert!(!buffered.is_empty());
        let numbers: Vec<usize> = buffered.iter().map(|r| number(&r.text)).collect();
        let mut sorted = numbers.clone();
        sorted.sort_unstable();
        assert_eq!(numbers, sorted);

        // Nothing new after the loop has exited
        thread::sleep(Duration::from_millis(50));
        assert!(listener.poll().is_none());
    }

    #[test]
    fn test_one_shot_listen_gets_session_between_iterations() {
        let listener = listener(0, 0, None);
        listener.start();
        assert_eq!(collect(&listener, 1).len(), 1);

        let start = Instant::now();
        let outcome = lock_session(&listener.session).listen(Duration::from_millis(200), None);
        assert!(outcome.is_transcript());
        assert!(start.elapsed() < Duration::from_secs(1));

        // The loop carries on afterwards
        assert_eq!(collect(&listener, 2).len(), 2);
        listener.stop();
    }

    #[test]
    fn test_bounded_channel_drops_newest() {
        let listener = listener(0, 0, Some(2));
        listener.start();
        thread::sleep(Duration::from_millis(200));
        listener.stop();
        thread::sleep(Duration::from_millis(100));

        let numbers: Vec<usize> = listener.drain().iter().map(|r| number(&r.text)).collect();
        assert_eq!(numbers, vec![1, 2]);
    }
}
