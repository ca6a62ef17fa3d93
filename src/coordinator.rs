//! Audio coordinator
//!
//! The public face of the subsystem. It runs the availability probe once,
//! then owns the speech queue and worker, the capture session, and the
//! continuous listener. Every operation reports failure as a boolean or a
//! sentinel outcome; nothing here returns an error or panics on bad input.
//!
//! State: `Unavailable` (probe failed, or shut down) | `Idle` ⇄ `Listening`.
//! Speaking and one-shot listening are allowed in both `Idle` and
//! `Listening` and do not change the state.

use crate::capture::session::CaptureSession;
use crate::config::Config;
use crate::error::ProbeError;
use crate::listener::{lock_session, ContinuousListener};
use crate::probe::{probe, AudioProviders};
use crate::state::{CoordinatorState, EngineState, TranscriptionOutcome, TranscriptionResult};
use crate::synth::queue::{SpeechProgress, SynthesisQueue};
use crate::synth::worker::SynthesisWorker;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Phrase spoken by the synthesis self-test
const DIAGNOSTIC_PHRASE: &str = "Audio check. If you can hear this, speech output is working.";

/// How long the synthesis self-test may take
const DIAGNOSTIC_SPEECH_TIMEOUT: Duration = Duration::from_secs(15);

/// How long the capture self-test listens
const DIAGNOSTIC_LISTEN_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-subsystem result of [`AudioCoordinator::run_diagnostics`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DiagnosticsReport {
    /// The test phrase was spoken without an engine failure
    pub synthesis: bool,
    /// The microphone picked up a phrase
    pub microphone: bool,
    /// The phrase was turned into text
    pub recognition: bool,
}

impl DiagnosticsReport {
    pub fn all_passed(&self) -> bool {
        self.synthesis && self.microphone && self.recognition
    }
}

impl std::fmt::Display for DiagnosticsReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mark = |ok: bool| if ok { "ok" } else { "FAILED" };
        writeln!(f, "Speech synthesis:   {}", mark(self.synthesis))?;
        writeln!(f, "Microphone:         {}", mark(self.microphone))?;
        write!(f, "Speech recognition: {}", mark(self.recognition))
    }
}

/// Workers and handles that exist only when the probe succeeded
struct Subsystem {
    queue: SynthesisQueue,
    progress: Arc<SpeechProgress>,
    session: Arc<Mutex<CaptureSession>>,
    listener: ContinuousListener,
}

/// Façade over speech output and speech capture
pub struct AudioCoordinator {
    subsystem: Option<Subsystem>,
    probe_failure: Option<ProbeError>,
    shut_down: AtomicBool,
}

impl AudioCoordinator {
    /// Probe the system providers (espeak-ng, cpal, remote recognizer)
    pub fn new(config: &Config) -> Self {
        Self::with_providers(AudioProviders::system(config), config)
    }

    /// Probe the given providers and start the speech worker.
    ///
    /// Never fails: an unusable setup yields an unavailable coordinator,
    /// with the reason in [`AudioCoordinator::probe_failure`].
    pub fn with_providers(providers: AudioProviders, config: &Config) -> Self {
        let probed = match probe(providers, config) {
            Ok(probed) => probed,
            Err(e) => {
                tracing::warn!("Audio unavailable: {}", e);
                return Self::unavailable(e);
            }
        };

        let (tx, rx) = mpsc::channel();
        let progress = Arc::new(SpeechProgress::default());
        let worker = SynthesisWorker::new(
            Some(probed.engine),
            probed.engines,
            config.synthesis.clone(),
            rx,
            progress.clone(),
        );
        if let Err(e) = worker.spawn() {
            tracing::error!("Failed to start speech worker: {}", e);
            return Self::unavailable(ProbeError::Worker(e));
        }

        let session = Arc::new(Mutex::new(probed.session));
        let listener = ContinuousListener::new(session.clone(), &config.listener);

        Self {
            subsystem: Some(Subsystem {
                queue: SynthesisQueue::new(tx, progress.clone()),
                progress,
                session,
                listener,
            }),
            probe_failure: None,
            shut_down: AtomicBool::new(false),
        }
    }

    /// A coordinator that refuses all work
    pub fn unavailable(reason: ProbeError) -> Self {
        Self {
            subsystem: None,
            probe_failure: Some(reason),
            shut_down: AtomicBool::new(false),
        }
    }

    /// The subsystem, unless unavailable or shut down
    fn live(&self) -> Option<&Subsystem> {
        if self.shut_down.load(Ordering::SeqCst) {
            return None;
        }
        self.subsystem.as_ref()
    }

    /// Capability flag from the startup probe. Never changes afterwards.
    pub fn is_available(&self) -> bool {
        self.subsystem.is_some()
    }

    /// Why the startup probe failed
    pub fn probe_failure(&self) -> Option<&ProbeError> {
        self.probe_failure.as_ref()
    }

    pub fn state(&self) -> CoordinatorState {
        match self.live() {
            None => CoordinatorState::Unavailable,
            Some(s) if s.listener.is_listening() => CoordinatorState::Listening,
            Some(_) => CoordinatorState::Idle,
        }
    }

    pub fn is_listening(&self) -> bool {
        self.state().is_listening()
    }

    /// Queue text for speech. With `priority`, pending (not yet started)
    /// utterances are discarded first. Never blocks.
    pub fn speak(&self, text: &str, priority: bool) -> bool {
        match self.live() {
            Some(s) => s.queue.enqueue(text, priority),
            None => {
                tracing::debug!("Audio unavailable, not speaking");
                false
            }
        }
    }

    /// Drop all pending utterances. The one playing, if any, finishes.
    pub fn clear_pending(&self) -> bool {
        self.live().map(|s| s.queue.clear()).unwrap_or(false)
    }

    /// Whether an utterance is playing right now
    pub fn is_speaking(&self) -> bool {
        self.live().map(|s| s.progress.is_speaking()).unwrap_or(false)
    }

    pub fn engine_state(&self) -> EngineState {
        self.subsystem
            .as_ref()
            .map(|s| s.progress.engine_state())
            .unwrap_or_default()
    }

    /// Utterances dropped after failing, since startup
    pub fn speech_failures(&self) -> u64 {
        self.subsystem
            .as_ref()
            .map(|s| s.progress.failures())
            .unwrap_or(0)
    }

    /// Listen for one phrase. Blocks up to `timeout` plus recognition time.
    ///
    /// While continuous listening is active this first waits for the
    /// listener's current iteration to finish; the listener pauses after
    /// each transcript so the session is handed over then. The phrase heard
    /// here is returned to the caller and never reaches `poll_transcript`.
    pub fn listen_once(
        &self,
        timeout: Duration,
        phrase_limit: Option<Duration>,
    ) -> TranscriptionOutcome {
        match self.live() {
            Some(s) => lock_session(&s.session).listen(timeout, phrase_limit),
            None => TranscriptionOutcome::BackendError,
        }
    }

    pub fn start_continuous_listening(&self) -> bool {
        match self.live() {
            Some(s) => s.listener.start(),
            None => false,
        }
    }

    /// Always succeeds. Takes effect at the listener's next iteration.
    pub fn stop_continuous_listening(&self) {
        if let Some(ref s) = self.subsystem {
            s.listener.stop();
        }
    }

    /// Oldest unread transcript, if any. Never blocks.
    pub fn poll_transcript(&self) -> Option<TranscriptionResult> {
        self.live().and_then(|s| s.listener.poll())
    }

    /// Block until nothing is queued or playing, or `timeout` elapses
    pub fn wait_for_speech_completion(&self, timeout: Duration) -> bool {
        match self.live() {
            Some(s) => s.progress.wait_idle(timeout),
            None => false,
        }
    }

    /// Speak a test phrase, then listen for a reply
    pub fn run_diagnostics(&self) -> DiagnosticsReport {
        let subsystem = match self.live() {
            Some(s) => s,
            None => return DiagnosticsReport::default(),
        };

        tracing::info!("Running audio diagnostics");

        let failures_before = subsystem.progress.failures();
        let synthesis = self.speak(DIAGNOSTIC_PHRASE, false)
            && self.wait_for_speech_completion(DIAGNOSTIC_SPEECH_TIMEOUT)
            && subsystem.progress.failures() == failures_before;

        let outcome = self.listen_once(DIAGNOSTIC_LISTEN_TIMEOUT, Some(DIAGNOSTIC_LISTEN_TIMEOUT));
        let microphone = matches!(
            outcome,
            TranscriptionOutcome::Transcript(_) | TranscriptionOutcome::Unintelligible
        );
        let recognition = outcome.is_transcript();

        let report = DiagnosticsReport {
            synthesis,
            microphone,
            recognition,
        };
        tracing::info!(
            "Diagnostics: synthesis={}, microphone={}, recognition={}",
            report.synthesis,
            report.microphone,
            report.recognition
        );
        report
    }

    /// Stop listening, stop the speech worker, cut off playback, and drop
    /// unread transcripts. Idempotent and non-blocking.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(ref s) = self.subsystem else {
            return;
        };

        tracing::info!("Shutting down audio");
        s.listener.stop();
        s.queue.close();
        s.progress.interrupt();

        let unread = s.listener.drain().len();
        if unread > 0 {
            tracing::debug!("Discarded {} unread transcript(s)", unread);
        }
    }
}

impl Drop for AudioCoordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}
