//! Synthesis queue: the caller-side handle to the speech worker
//!
//! Requests travel to the worker over a channel. The worker keeps its own
//! backlog of pending requests, so "discard everything pending" is applied
//! at the one place that knows what is pending and what is in flight.
//!
//! [`SpeechProgress`] is the only state both sides can see. It counts
//! outstanding requests so callers can wait for silence.

use super::Interrupt;
use crate::state::EngineState;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

/// One utterance waiting to be spoken
#[derive(Debug, Clone, PartialEq)]
pub struct SpeechRequest {
    text: String,
    enqueued_at: DateTime<Utc>,
}

impl SpeechRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            enqueued_at: Utc::now(),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn enqueued_at(&self) -> DateTime<Utc> {
        self.enqueued_at
    }
}

/// Messages accepted by the synthesis worker
#[derive(Debug)]
pub(crate) enum QueueMessage {
    Speak { request: SpeechRequest, priority: bool },
    /// Discard all pending requests
    Clear,
    /// Terminate the worker, discarding pending requests
    Stop,
}

#[derive(Default)]
struct Progress {
    /// Pending plus in-flight requests
    outstanding: usize,
    in_flight: bool,
    engine: EngineState,
    failures: u64,
    interrupter: Option<Arc<dyn Interrupt>>,
}

/// Shared view of the worker's progress
#[derive(Default)]
pub(crate) struct SpeechProgress {
    state: Mutex<Progress>,
    changed: Condvar,
}

impl SpeechProgress {
    fn lock(&self) -> MutexGuard<'_, Progress> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn enqueued(&self) {
        self.lock().outstanding += 1;
    }

    /// Pending requests were dropped without being spoken
    pub(crate) fn discarded(&self, count: usize) {
        if count == 0 {
            return;
        }
        let mut state = self.lock();
        state.outstanding = state.outstanding.saturating_sub(count);
        drop(state);
        self.changed.notify_all();
    }

    pub(crate) fn started(&self) {
        let mut state = self.lock();
        state.in_flight = true;
        state.engine = EngineState::Speaking;
    }

    /// The in-flight request finished, successfully or not
    pub(crate) fn finished(&self, spoken: bool, engine: EngineState) {
        let mut state = self.lock();
        state.in_flight = false;
        state.outstanding = state.outstanding.saturating_sub(1);
        state.engine = engine;
        if !spoken {
            state.failures += 1;
        }
        drop(state);
        self.changed.notify_all();
    }

    /// Worker is gone; nothing will ever complete
    pub(crate) fn abandon(&self) {
        let mut state = self.lock();
        state.outstanding = 0;
        state.in_flight = false;
        state.interrupter = None;
        drop(state);
        self.changed.notify_all();
    }

    pub(crate) fn set_engine_state(&self, engine: EngineState) {
        self.lock().engine = engine;
    }

    pub(crate) fn engine_state(&self) -> EngineState {
        self.lock().engine
    }

    pub(crate) fn is_speaking(&self) -> bool {
        self.lock().in_flight
    }

    pub(crate) fn failures(&self) -> u64 {
        self.lock().failures
    }

    pub(crate) fn set_interrupter(&self, interrupter: Option<Arc<dyn Interrupt>>) {
        self.lock().interrupter = interrupter;
    }

    /// Cut off the current utterance, if the engine supports it
    pub(crate) fn interrupt(&self) {
        let interrupter = self.lock().interrupter.clone();
        if let Some(interrupter) = interrupter {
            interrupter.interrupt();
        }
    }

    /// Block until nothing is pending or in flight, or `timeout` elapses.
    /// Becoming idle exactly at the deadline still counts.
    pub(crate) fn wait_idle(&self, timeout: Duration) -> bool {
        let guard = self.lock();
        let (guard, _) = self
            .changed
            .wait_timeout_while(guard, timeout, |state| {
                state.outstanding > 0 || state.in_flight
            })
            .unwrap_or_else(|e| e.into_inner());
        guard.outstanding == 0 && !guard.in_flight
    }
}

/// Caller-side handle for submitting speech
pub struct SynthesisQueue {
    tx: Sender<QueueMessage>,
    progress: Arc<SpeechProgress>,
    closed: AtomicBool,
}

impl SynthesisQueue {
    pub(crate) fn new(tx: Sender<QueueMessage>, progress: Arc<SpeechProgress>) -> Self {
        Self {
            tx,
            progress,
            closed: AtomicBool::new(false),
        }
    }

    /// Queue text for speech. With `priority`, everything still pending is
    /// discarded first; an utterance already playing is left alone.
    ///
    /// Never blocks. Returns false for empty text or a closed queue.
    pub fn enqueue(&self, text: &str, priority: bool) -> bool {
        if text.trim().is_empty() {
            tracing::debug!("Ignoring empty speech request");
            return false;
        }
        if self.closed.load(Ordering::SeqCst) {
            tracing::debug!("Speech queue closed, dropping request");
            return false;
        }

        self.progress.enqueued();
        let message = QueueMessage::Speak {
            request: SpeechRequest::new(text),
            priority,
        };
        if self.tx.send(message).is_err() {
            tracing::warn!("Speech worker is not running, dropping request");
            self.progress.discarded(1);
            return false;
        }

        tracing::debug!("Queued speech (priority={}): {} chars", priority, text.len());
        true
    }

    /// Discard all pending requests without queuing anything
    pub fn clear(&self) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }
        self.tx.send(QueueMessage::Clear).is_ok()
    }

    /// Close the queue and tell the worker to stop. Idempotent.
    pub(crate) fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.tx.send(QueueMessage::Stop);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
