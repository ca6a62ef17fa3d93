//! coach-audio: speech output and continuous capture for voice practice
//!
//! This library coordinates one speech engine and one microphone for an
//! interactive caller:
//! - Speaking text through a single serial worker, with priority preemption
//!   of pending utterances (espeak-ng by default)
//! - Capturing phrases via cpal (supports PipeWire, PulseAudio, ALSA) with
//!   energy-based speech detection
//! - Recognizing speech through an OpenAI-compatible Whisper endpoint, with
//!   locale fallback
//! - Listening continuously in the background and buffering transcripts
//!
//! # Architecture
//!
//! ```text
//!                       ┌─────────────────────────────────────┐
//!                       │          AudioCoordinator           │
//!                       └─────────────────────────────────────┘
//!                          │              │               │
//!            speak(text)   │    probe()   │               │ listen_once / poll
//!                          ▼              ▼               ▼
//!                 ┌──────────────┐ ┌──────────────┐ ┌──────────────┐
//!                 │  Synthesis   │ │ Availability │ │  Continuous  │
//!                 │    Queue     │ │    Probe     │ │   Listener   │
//!                 └──────────────┘ └──────────────┘ └──────────────┘
//!                          │ channel                      │ thread
//!                          ▼                              ▼
//!                 ┌──────────────┐                ┌──────────────┐
//!                 │  Synthesis   │                │   Capture    │
//!                 │   Worker     │                │   Session    │
//!                 └──────────────┘                └──────────────┘
//!                          │                         │        │
//!                          ▼                         ▼        ▼
//!                 ┌──────────────┐         ┌──────────┐ ┌────────────┐
//!                 │  espeak-ng   │         │   cpal   │ │ Recognizer │
//!                 │ (subprocess) │         │  device  │ │  (remote)  │
//!                 └──────────────┘         └──────────┘ └────────────┘
//! ```

pub mod capture;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod listener;
pub mod probe;
pub mod recognize;
pub mod state;
pub mod synth;

pub use cli::{Cli, Commands};
pub use config::Config;
pub use coordinator::{AudioCoordinator, DiagnosticsReport};
pub use error::{CoachAudioError, Result};
pub use probe::AudioProviders;
pub use state::{CoordinatorState, EngineState, TranscriptionOutcome, TranscriptionResult};
