//! Synthesis worker thread
//!
//! Owns the speech engine and drains the queue one utterance at a time, so
//! the output device never receives overlapping speech. A failed utterance
//! is logged and dropped; it never stops the loop.
//!
//! Recovery: when the engine reports its playback loop is already active,
//! the loop is ended, the engine is rebuilt from the factory (voice
//! selection included) and the same utterance is retried once. A second
//! failure drops the utterance and leaves the engine Faulted; the next
//! request starts again from Uninitialized. A panicking engine is treated
//! the same way.

use super::queue::{QueueMessage, SpeechProgress, SpeechRequest};
use super::{init_engine, EngineFactory, SpeechEngine};
use crate::config::SynthesisConfig;
use crate::error::SynthesisError;
use crate::state::EngineState;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

pub(crate) struct SynthesisWorker {
    engine: Option<Box<dyn SpeechEngine>>,
    factory: Arc<dyn EngineFactory>,
    config: SynthesisConfig,
    rx: Receiver<QueueMessage>,
    backlog: VecDeque<SpeechRequest>,
    progress: Arc<SpeechProgress>,
}

impl SynthesisWorker {
    pub(crate) fn new(
        engine: Option<Box<dyn SpeechEngine>>,
        factory: Arc<dyn EngineFactory>,
        config: SynthesisConfig,
        rx: Receiver<QueueMessage>,
        progress: Arc<SpeechProgress>,
    ) -> Self {
        Self {
            engine,
            factory,
            config,
            rx,
            backlog: VecDeque::new(),
            progress,
        }
    }

    /// Run the worker on a dedicated thread
    pub(crate) fn spawn(self) -> std::io::Result<JoinHandle<()>> {
        match self.engine {
            Some(ref engine) => {
                self.progress.set_interrupter(engine.interrupter());
                self.progress.set_engine_state(EngineState::Ready);
            }
            None => self.progress.set_engine_state(EngineState::Uninitialized),
        }

        thread::Builder::new()
            .name("speech-worker".to_string())
            .spawn(move || self.run())
    }

    fn run(mut self) {
        tracing::debug!("Speech worker started");

        let poll = Duration::from_millis(self.config.queue_poll_ms.max(1));

        'outer: loop {
            if self.backlog.is_empty() {
                match self.rx.recv_timeout(poll) {
                    Ok(message) => {
                        if !self.accept(message) {
                            break;
                        }
                    }
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }

            // Absorb everything already sent so a priority request can
            // discard work that is queued behind the current utterance.
            loop {
                match self.rx.try_recv() {
                    Ok(message) => {
                        if !self.accept(message) {
                            break 'outer;
                        }
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => break 'outer,
                }
            }

            if let Some(request) = self.backlog.pop_front() {
                self.play(request);
            }
        }

        let dropped = self.backlog.len();
        if dropped > 0 {
            tracing::debug!("Speech worker discarding {} pending request(s)", dropped);
        }
        self.backlog.clear();
        if let Some(mut engine) = self.engine.take() {
            engine.stop();
        }
        self.progress.abandon();
        tracing::debug!("Speech worker stopped");
    }

    /// Apply one message to the backlog. Returns false on the stop sentinel.
    fn accept(&mut self, message: QueueMessage) -> bool {
        match message {
            QueueMessage::Speak { request, priority } => {
                if priority {
                    self.discard_pending("priority request");
                }
                self.backlog.push_back(request);
                true
            }
            QueueMessage::Clear => {
                self.discard_pending("clear");
                true
            }
            QueueMessage::Stop => false,
        }
    }

    fn discard_pending(&mut self, reason: &str) {
        let count = self.backlog.len();
        if count > 0 {
            tracing::debug!("Discarding {} pending utterance(s): {}", count, reason);
            self.backlog.clear();
            self.progress.discarded(count);
        }
    }

    fn play(&mut self, request: SpeechRequest) {
        tracing::debug!(
            "Speaking {} chars (queued {}ms ago)",
            request.text().len(),
            (chrono::Utc::now() - request.enqueued_at()).num_milliseconds()
        );

        self.progress.started();
        let result = match panic::catch_unwind(AssertUnwindSafe(|| self.render(request.text()))) {
            Ok(result) => result,
            Err(_) => {
                tracing::error!("Speech engine panicked; discarding it");
                self.engine = None;
                self.progress.set_interrupter(None);
                Err(SynthesisError::PlaybackFailed("engine panicked".into()))
            }
        };

        let engine_state = match result {
            Ok(()) => EngineState::Ready,
            Err(ref e) => {
                tracing::warn!("Speech synthesis failed, dropping utterance: {}", e);
                if self.engine.is_some() {
                    EngineState::Ready
                } else {
                    EngineState::Faulted
                }
            }
        };
        self.progress.finished(result.is_ok(), engine_state);

        if self.config.post_utterance_gap_ms > 0 {
            thread::sleep(Duration::from_millis(self.config.post_utterance_gap_ms));
        }
    }

    /// Speak one utterance, recovering once from the engine-loop fault.
    /// Leaves `self.engine` empty when the engine ends up Faulted.
    fn render(&mut self, text: &str) -> Result<(), SynthesisError> {
        if self.engine.is_none() {
            self.progress.set_engine_state(EngineState::Uninitialized);
            self.reinitialize()?;
            self.progress.set_engine_state(EngineState::Speaking);
        }

        let first = match self.engine.as_mut() {
            Some(engine) => {
                engine.stop();
                engine.speak(text)
            }
            None => return Err(SynthesisError::InitFailed("engine missing".into())),
        };

        match first {
            Ok(()) => Ok(()),
            Err(e) if e.is_recoverable() => {
                tracing::warn!("{}; restarting speech engine and retrying", e);
                if let Some(mut engine) = self.engine.take() {
                    engine.end_loop();
                }
                self.reinitialize()?;
                self.progress.set_engine_state(EngineState::Speaking);

                let retry = match self.engine.as_mut() {
                    Some(engine) => engine.speak(text),
                    None => Err(SynthesisError::InitFailed("engine missing".into())),
                };
                if let Err(ref e) = retry {
                    tracing::error!("Speech engine failed again after restart: {}", e);
                    self.fault();
                }
                retry
            }
            Err(e) => Err(e),
        }
    }

    fn reinitialize(&mut self) -> Result<(), SynthesisError> {
        match init_engine(&*self.factory, &self.config) {
            Ok(engine) => {
                self.progress.set_interrupter(engine.interrupter());
                self.engine = Some(engine);
                tracing::info!("Speech engine initialized");
                Ok(())
            }
            Err(e) => {
                tracing::error!("Speech engine initialization failed: {}", e);
                self.fault();
                Err(e)
            }
        }
    }

    fn fault(&mut self) {
        if let Some(mut engine) = self.engine.take() {
            engine.end_loop();
        }
        self.progress.set_interrupter(None);
        self.progress.set_engine_state(EngineState::Faulted);
    }
}
