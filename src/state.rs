//! State types shared across the audio subsystem
//!
//! The coordinator moves between three states:
//! Unavailable (terminal) | Idle ⇄ Listening
//!
//! The synthesis worker tracks its engine separately:
//! Uninitialized → Ready ⇄ Speaking, any → Faulted → Uninitialized

use chrono::{DateTime, Utc};

/// Lifecycle of the synthesis engine owned by the worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineState {
    #[default]
    Uninitialized,
    Ready,
    Speaking,
    Faulted,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineState::Uninitialized => write!(f, "uninitialized"),
            EngineState::Ready => write!(f, "ready"),
            EngineState::Speaking => write!(f, "speaking"),
            EngineState::Faulted => write!(f, "faulted"),
        }
    }
}

/// Coordinator state as seen by callers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    /// No usable hardware at startup, or shut down. Every operation fails.
    Unavailable,
    /// Available, not listening
    Idle,
    /// Continuous listener running
    Listening,
}

impl CoordinatorState {
    pub fn is_available(&self) -> bool {
        !matches!(self, CoordinatorState::Unavailable)
    }

    pub fn is_listening(&self) -> bool {
        matches!(self, CoordinatorState::Listening)
    }
}

impl std::fmt::Display for CoordinatorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CoordinatorState::Unavailable => write!(f, "unavailable"),
            CoordinatorState::Idle => write!(f, "idle"),
            CoordinatorState::Listening => write!(f, "listening"),
        }
    }
}

/// A successful transcription
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptionResult {
    /// Lower-cased, trimmed text
    pub text: String,
    pub captured_at: DateTime<Utc>,
}

impl TranscriptionResult {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            captured_at: Utc::now(),
        }
    }
}

/// Outcome of one capture-and-recognize cycle
///
/// Expected failures are values, never errors.
#[derive(Debug, Clone, PartialEq)]
pub enum TranscriptionOutcome {
    Transcript(TranscriptionResult),
    /// Nothing was said before the timeout
    Timeout,
    /// Audio was captured but no backend could make sense of it
    Unintelligible,
    /// Device, network, or service failure
    BackendError,
}

impl TranscriptionOutcome {
    pub fn is_transcript(&self) -> bool {
        matches!(self, TranscriptionOutcome::Transcript(_))
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            TranscriptionOutcome::Transcript(result) => Some(&result.text),
            _ => None,
        }
    }
}

impl std::fmt::Display for TranscriptionOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TranscriptionOutcome::Transcript(result) => {
                // Use chars() to handle multi-byte UTF-8 characters
                let preview = if result.text.chars().count() > 40 {
                    format!("{}...", result.text.chars().take(40).collect::<String>())
                } else {
                    result.text.clone()
                };
                write!(f, "transcript {:?}", preview)
            }
            TranscriptionOutcome::Timeout => write!(f, "timeout"),
            TranscriptionOutcome::Unintelligible => write!(f, "unintelligible"),
            TranscriptionOutcome::BackendError => write!(f, "backend error"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_state_default_is_uninitialized() {
        assert_eq!(EngineState::default(), EngineState::Uninitialized);
        assert_eq!(EngineState::Faulted.to_string(), "faulted");
    }

    #[test]
    fn test_coordinator_state_flags() {
        assert!(!CoordinatorState::Unavailable.is_available());
        assert!(CoordinatorState::Idle.is_available());
        assert!(!CoordinatorState::Idle.is_listening());
        assert!(CoordinatorState::Listening.is_listening());
    }

    #[test]
    fn test_outcome_accessors() {
        let outcome = TranscriptionOutcome::Transcript(TranscriptionResult::new("hello"));
        assert!(outcome.is_transcript());
        assert_eq!(outcome.text(), Some("hello"));

        assert!(!TranscriptionOutcome::Timeout.is_transcript());
        assert_eq!(TranscriptionOutcome::Unintelligible.text(), None);
        assert_eq!(TranscriptionOutcome::BackendError.text(), None);
    }

    #[test]
    fn test_outcome_display_truncates() {
        let long = "a".repeat(60);
        let outcome = TranscriptionOutcome::Transcript(TranscriptionResult::new(long));
        let display = outcome.to_string();
        assert!(display.contains("..."));
        assert_eq!(TranscriptionOutcome::Timeout.to_string(), "timeout");
    }
}
