//! Startup availability probe
//!
//! Runs once when the coordinator is built:
//!
//! 1. create a speech engine and select a voice
//! 2. pick and open a capture device
//! 3. calibrate the energy threshold against ambient noise
//!
//! Any failure makes the whole audio subsystem unavailable for the life of
//! the process. On success the engine and the capture session are handed on
//! to the synthesis worker and the listener.

use crate::capture::cpal_capture::CpalBackend;
use crate::capture::session::CaptureSession;
use crate::capture::{open_device, CaptureBackend};
use crate::config::{self, Config};
use crate::error::{ProbeError, RecognizeError};
use crate::recognize::remote::RemoteRecognizer;
use crate::recognize::{RecognitionChain, Recognizer};
use crate::synth::espeak::EspeakEngine;
use crate::synth::{init_engine, EngineFactory, SpeechEngine};
use std::sync::Arc;

/// The external capability providers the subsystem is built from
pub struct AudioProviders {
    pub engines: Arc<dyn EngineFactory>,
    pub capture: Box<dyn CaptureBackend>,
    /// Recognizer, or the reason one could not be configured
    pub recognizer: Result<Box<dyn Recognizer>, RecognizeError>,
}

impl AudioProviders {
    /// espeak-ng, the default cpal host, and the remote recognizer
    pub fn system(config: &Config) -> Self {
        Self {
            engines: EspeakEngine::factory(&config.synthesis),
            capture: Box::new(CpalBackend::new(config.capture.sample_rate)),
            recognizer: RemoteRecognizer::new(&config.recognition)
                .map(|r| Box::new(r) as Box<dyn Recognizer>),
        }
    }
}

/// Everything a successful probe leaves ready for use
pub struct Probed {
    pub engines: Arc<dyn EngineFactory>,
    pub engine: Box<dyn SpeechEngine>,
    pub session: CaptureSession,
}

impl std::fmt::Debug for Probed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Probed")
            .field("device", &self.session.device_name())
            .field("energy_threshold", &self.session.energy_threshold())
            .finish_non_exhaustive()
    }
}

/// Check that speech output and capture are usable
pub fn probe(providers: AudioProviders, config: &Config) -> Result<Probed, ProbeError> {
    let AudioProviders {
        engines,
        capture,
        recognizer,
    } = providers;

    tracing::debug!("Probing speech engine");
    let engine = init_engine(&*engines, &config.synthesis).map_err(ProbeError::Engine)?;

    tracing::debug!("Probing capture devices");
    let device = open_device(capture.as_ref(), &config.capture).map_err(ProbeError::Device)?;

    let recognizer = recognizer.map_err(ProbeError::Recognizer)?;
    let chain = RecognitionChain::from_config(recognizer, &config.recognition);
    let mut session = CaptureSession::from_config(device, chain, &config.capture);

    let calibration = config::secs(config.capture.calibration_secs);
    if !calibration.is_zero() {
        tracing::debug!(
            "Calibrating for ambient noise ({:.1}s), please stay quiet",
            calibration.as_secs_f32()
        );
        session
            .calibrate(calibration)
            .map_err(ProbeError::Calibration)?;
    }

    tracing::info!(
        "Audio available: device '{}', energy threshold {:.1}",
        session.device_name(),
        session.energy_threshold()
    );

    Ok(Probed {
        engines,
        engine,
        session,
    })
}
