//! Speech synthesis module
//!
//! All speech goes through one queue drained by one worker thread, which
//! owns the engine. The caller never touches the engine directly.
//!
//! Engines are external capability providers reached through
//! [`SpeechEngine`]; the bundled implementation drives espeak-ng.

pub mod espeak;
pub mod queue;
pub mod worker;

use crate::config::SynthesisConfig;
use crate::error::SynthesisError;
use std::sync::Arc;

/// A voice offered by a synthesis engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Voice {
    /// Identifier passed back to the engine when selecting
    pub id: String,
    /// Human-readable name, matched against preferred keywords
    pub name: String,
}

impl Voice {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Cuts off an utterance that is playing on another thread
pub trait Interrupt: Send + Sync {
    fn interrupt(&self);
}

/// Trait for speech synthesis engines
///
/// `speak` blocks until playback has finished. Implementations are driven
/// from a single thread at a time.
pub trait SpeechEngine: Send {
    /// Enumerate installed voices
    fn voices(&self) -> Result<Vec<Voice>, SynthesisError>;

    fn set_voice(&mut self, voice: &Voice) -> Result<(), SynthesisError>;

    /// Speaking rate in words per minute
    fn set_rate(&mut self, words_per_minute: u32);

    /// Volume level (0.0 to 1.0)
    fn set_volume(&mut self, volume: f32);

    /// Pitch as a percentage of the engine's normal pitch. Engines without
    /// pitch control ignore it.
    fn set_pitch(&mut self, _percent: u32) {}

    /// Speak text and wait for playback to finish
    fn speak(&mut self, text: &str) -> Result<(), SynthesisError>;

    /// Stop any current output
    fn stop(&mut self);

    /// Forcibly terminate the engine's playback loop
    fn end_loop(&mut self);

    /// Handle that can stop playback from another thread
    fn interrupter(&self) -> Option<Arc<dyn Interrupt>> {
        None
    }
}

/// Creates fresh engine instances, used at startup and for fault recovery
pub trait EngineFactory: Send + Sync {
    fn create(&self) -> Result<Box<dyn SpeechEngine>, SynthesisError>;
}

impl<F> EngineFactory for F
where
    F: Fn() -> Result<Box<dyn SpeechEngine>, SynthesisError> + Send + Sync,
{
    fn create(&self) -> Result<Box<dyn SpeechEngine>, SynthesisError> {
        self()
    }
}

/// Pick the first voice whose name contains any preferred keyword
/// (case-insensitive), else the first voice.
pub fn select_voice<'a>(voices: &'a [Voice], preferred: &[String]) -> Option<&'a Voice> {
    let keywords: Vec<String> = preferred.iter().map(|k| k.to_lowercase()).collect();

    voices
        .iter()
        .find(|voice| {
            let name = voice.name.to_lowercase();
            keywords.iter().any(|k| name.contains(k.as_str()))
        })
        .or_else(|| voices.first())
}

/// Create an engine and apply voice, rate, volume, and pitch settings
pub fn init_engine(
    factory: &dyn EngineFactory,
    config: &SynthesisConfig,
) -> Result<Box<dyn SpeechEngine>, SynthesisError> {
    let mut engine = factory.create()?;

    let voices = engine.voices()?;
    let voice = select_voice(&voices, &config.preferred_voices)
        .cloned()
        .ok_or(SynthesisError::NoVoices)?;
    engine.set_voice(&voice)?;

    let preferred = config
        .preferred_voices
        .iter()
        .any(|k| voice.name.to_lowercase().contains(&k.to_lowercase()));
    if preferred {
        tracing::info!("Using preferred voice: {}", voice.name);
    } else {
        tracing::info!("Using default voice: {}", voice.name);
    }

    engine.set_rate(config.rate);
    engine.set_volume(config.volume.clamp(0.0, 1.0));
    if let Some(pitch) = config.pitch {
        engine.set_pitch(pitch);
    }

    Ok(engine)
}
