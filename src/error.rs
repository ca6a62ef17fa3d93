//! Error types for coach-audio
//!
//! Uses thiserror for ergonomic error definitions. None of these escape the
//! coordinator's public operations: they are logged and folded into
//! booleans or sentinel outcomes at that boundary.

use thiserror::Error;

/// Top-level error type for the coach-audio library and binary
#[derive(Error, Debug)]
pub enum CoachAudioError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Audio capture error: {0}")]
    Audio(#[from] AudioError),

    #[error("Speech synthesis error: {0}")]
    Synthesis(#[from] SynthesisError),

    #[error("Recognition error: {0}")]
    Recognize(#[from] RecognizeError),

    #[error("Audio unavailable: {0}")]
    Probe(#[from] ProbeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors related to audio capture
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Audio connection failed: {0}")]
    Connection(String),

    #[error("Audio device not found: '{0}'")]
    DeviceNotFound(String),

    #[error("Audio device '{requested}' not found. {available}")]
    DeviceNotFoundWithList { requested: String, available: String },

    #[error("No audio input devices found")]
    NoDevices,

    #[error("Audio stream error: {0}")]
    StreamError(String),

    #[error("Audio stream is not running")]
    NotStarted,
}

/// Errors raised by a speech synthesis engine
#[derive(Error, Debug)]
pub enum SynthesisError {
    /// The engine's internal playback loop is still running from a previous
    /// utterance. Recovered by ending the loop, re-initialising the engine
    /// and retrying the utterance once.
    #[error("Engine loop already active")]
    LoopAlreadyActive,

    #[error("No voices available")]
    NoVoices,

    #[error("Unknown voice: '{0}'")]
    UnknownVoice(String),

    #[error("Engine initialization failed: {0}")]
    InitFailed(String),

    #[error("Playback failed: {0}")]
    PlaybackFailed(String),

    #[error("Playback interrupted")]
    Interrupted,
}

impl SynthesisError {
    /// Whether this fault is handled by one re-init-and-retry cycle
    pub fn is_recoverable(&self) -> bool {
        matches!(self, SynthesisError::LoopAlreadyActive)
    }
}

/// Errors from a speech-to-text backend
#[derive(Error, Debug)]
pub enum RecognizeError {
    /// The backend processed the audio but found no intelligible speech
    #[error("Speech not understood")]
    NoMatch,

    /// The backend could not be reached or returned a fault
    #[error("Recognition service error: {0}")]
    Service(String),

    #[error("Audio format error: {0}")]
    AudioFormat(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Reasons the startup availability probe failed
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("speech engine unusable: {0}")]
    Engine(SynthesisError),

    #[error("no capture device: {0}")]
    Device(AudioError),

    #[error("ambient noise calibration failed: {0}")]
    Calibration(AudioError),

    #[error("recognizer unusable: {0}")]
    Recognizer(RecognizeError),

    #[error("failed to start speech worker: {0}")]
    Worker(std::io::Error),
}

/// Result type alias using CoachAudioError
pub type Result<T> = std::result::Result<T, CoachAudioError>;
