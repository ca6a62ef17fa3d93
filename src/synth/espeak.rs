//! espeak-ng speech engine
//!
//! Drives an espeak-ng compatible command line as a child process. Each
//! utterance is one child; the engine's "playback loop" is that child.
//! If a child from an earlier utterance is still registered when a new one
//! starts, `speak` reports [`SynthesisError::LoopAlreadyActive`] and the
//! worker restarts the engine.

use super::{EngineFactory, Interrupt, SpeechEngine, Voice};
use crate::config::SynthesisConfig;
use crate::error::SynthesisError;
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// How often a running utterance is polled for completion
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// espeak-ng's normal pitch on its 0-99 scale
const NORMAL_PITCH: u32 = 50;

type ChildSlot = Arc<Mutex<Option<Child>>>;

fn lock_slot(slot: &ChildSlot) -> MutexGuard<'_, Option<Child>> {
    slot.lock().unwrap_or_else(|e| e.into_inner())
}

/// Kill and reap whatever child is registered
fn kill_child(slot: &ChildSlot) -> bool {
    match lock_slot(slot).take() {
        Some(mut child) => {
            let _ = child.kill();
            let _ = child.wait();
            true
        }
        None => false,
    }
}

/// espeak-ng subprocess engine
pub struct EspeakEngine {
    /// Command to run (e.g. "espeak-ng" or "espeak")
    command: String,
    voice: Option<String>,
    rate: u32,
    /// espeak amplitude, 0-200
    amplitude: u32,
    /// espeak pitch, 0-99
    pitch: Option<u32>,
    child: ChildSlot,
}

impl EspeakEngine {
    /// Create an engine after checking the command can be run
    pub fn new(command: &str) -> Result<Self, SynthesisError> {
        let status = Command::new(command)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|e| SynthesisError::InitFailed(format!("{} not available: {}", command, e)))?;

        if !status.success() {
            return Err(SynthesisError::InitFailed(format!(
                "{} --version exited with {}",
                command, status
            )));
        }

        Ok(Self {
            command: command.to_string(),
            voice: None,
            rate: 175,
            amplitude: 100,
            pitch: None,
            child: Arc::new(Mutex::new(None)),
        })
    }

    /// Factory building engines from the synthesis config
    pub fn factory(config: &SynthesisConfig) -> Arc<dyn EngineFactory> {
        let command = config.command.clone();
        Arc::new(move || -> Result<Box<dyn SpeechEngine>, SynthesisError> {
            Ok(Box::new(EspeakEngine::new(&command)?))
        })
    }

    fn build_command(&self, text: &str) -> Command {
        let mut cmd = Command::new(&self.command);
        if let Some(ref voice) = self.voice {
            cmd.arg("-v").arg(voice);
        }
        cmd.arg("-s").arg(self.rate.to_string());
        cmd.arg("-a").arg(self.amplitude.to_string());
        if let Some(pitch) = self.pitch {
            cmd.arg("-p").arg(pitch.to_string());
        }
        cmd.arg("--").arg(text);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        cmd
    }
}

impl SpeechEngine for EspeakEngine {
    fn voices(&self) -> Result<Vec<Voice>, SynthesisError> {
        let output = Command::new(&self.command)
            .arg("--voices")
            .stderr(Stdio::null())
            .output()
            .map_err(|e| SynthesisError::InitFailed(format!("Failed to list voices: {}", e)))?;

        if !output.status.success() {
            return Err(SynthesisError::InitFailed(format!(
                "{} --voices exited with {}",
                self.command, output.status
            )));
        }

        Ok(parse_voices(&String::from_utf8_lossy(&output.stdout)))
    }

    fn set_voice(&mut self, voice: &Voice) -> Result<(), SynthesisError> {
        if voice.id.is_empty() {
            return Err(SynthesisError::UnknownVoice(voice.name.clone()));
        }
        self.voice = Some(voice.id.clone());
        Ok(())
    }

    fn set_rate(&mut self, words_per_minute: u32) {
        // espeak-ng accepts 80-450 wpm
        self.rate = words_per_minute.clamp(80, 450);
    }

    fn set_volume(&mut self, volume: f32) {
        self.amplitude = (volume.clamp(0.0, 1.0) * 100.0).round() as u32;
    }

    fn set_pitch(&mut self, percent: u32) {
        self.pitch = Some((NORMAL_PITCH.saturating_mul(percent) / 100).min(99));
    }

    fn speak(&mut self, text: &str) -> Result<(), SynthesisError> {
        {
            let mut slot = lock_slot(&self.child);
            if slot.is_some() {
                return Err(SynthesisError::LoopAlreadyActive);
            }
            let child = self.build_command(text).spawn().map_err(|e| {
                SynthesisError::PlaybackFailed(format!("Failed to start {}: {}", self.command, e))
            })?;
            *slot = Some(child);
        }

        loop {
            {
                let mut slot = lock_slot(&self.child);
                let child = match slot.as_mut() {
                    Some(child) => child,
                    // Taken by an interrupt
                    None => return Err(SynthesisError::Interrupted),
                };
                match child.try_wait() {
                    Ok(Some(status)) => {
                        *slot = None;
                        if status.success() {
                            return Ok(());
                        }
                        return Err(SynthesisError::PlaybackFailed(format!(
                            "{} exited with {}",
                            self.command, status
                        )));
                    }
                    Ok(None) => {}
                    Err(e) => {
                        // Child stays registered; the next utterance will
                        // see the loop as still active.
                        return Err(SynthesisError::PlaybackFailed(e.to_string()));
                    }
                }
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    fn stop(&mut self) {
        if let Some(child) = lock_slot(&self.child).as_mut() {
            let _ = child.kill();
        }
    }

    fn end_loop(&mut self) {
        if kill_child(&self.child) {
            tracing::debug!("Terminated running {} process", self.command);
        }
    }

    fn interrupter(&self) -> Option<Arc<dyn Interrupt>> {
        Some(Arc::new(EspeakInterrupt {
            child: self.child.clone(),
        }))
    }
}

impl Drop for EspeakEngine {
    fn drop(&mut self) {
        kill_child(&self.child);
    }
}

struct EspeakInterrupt {
    child: ChildSlot,
}

impl Interrupt for EspeakInterrupt {
    fn interrupt(&self) {
        if kill_child(&self.child) {
            tracing::debug!("Interrupted speech playback");
        }
    }
}

/// Parse `espeak-ng --voices` output
///
/// ```text
/// Pty Language       Age/Gender VoiceName          File                 Other Languages
///  5  en-us           --/M      English_(America)  gmw/en-US            (en 2)
/// ```
///
/// The language code becomes the voice id; the gender is spelled out in the
/// name so keyword preferences like "female" can match.
fn parse_voices(output: &str) -> Vec<Voice> {
    output
        .lines()
        .skip(1)
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 4 {
                return None;
            }
            let language = fields[1];
            let gender = match fields[2].rsplit('/').next() {
                Some("F") => " (female)",
                Some("M") => " (male)",
                _ => "",
            };
            let name = fields[3].replace('_', " ");
            Some(Voice::new(language, format!("{}{}", name, gender)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const VOICES: &str = "\
Pty Language       Age/Gender VoiceName          File                 Other Languages
 5  af              --/M      Afrikaans          gmw/af
 2  en-gb           --/F      English_(Great_Britain) gmw/en        (en 2)
 5  en-us           --/M      English_(America)  gmw/en-US            (en 3)
";

    #[test]
    fn test_parse_voices() {
        let voices = parse_voices(VOICES);
        assert_eq!(voices.len(), 3);
        assert_eq!(voices[0], Voice::new("af", "Afrikaans (male)"));
        assert_eq!(voices[1].id, "en-gb");
        assert_eq!(voices[1].name, "English (Great Britain) (female)");
    }

    #[test]
    fn test_parse_voices_ignores_short_lines() {
        let voices = parse_voices("Pty Language\n\n 5 xx\n");
        assert!(voices.is_empty());
    }

    #[test]
    fn test_parsed_voices_prefer_female() {
        let voices = parse_voices(VOICES);
        let preferred = vec!["female".to_string()];
        let selected = super::super::select_voice(&voices, &preferred).unwrap();
        assert_eq!(selected.id, "en-gb");
    }

    fn engine() -> EspeakEngine {
        EspeakEngine {
            command: "espeak-ng".to_string(),
            voice: None,
            rate: 175,
            amplitude: 100,
            pitch: None,
            child: Arc::new(Mutex::new(None)),
        }
    }

    #[test]
    fn test_settings_are_mapped() {
        let mut engine = engine();
        engine.set_rate(170);
        engine.set_volume(0.9);
        engine.set_pitch(110);
        assert_eq!(engine.rate, 170);
        assert_eq!(engine.amplitude, 90);
        assert_eq!(engine.pitch, Some(55));

        engine.set_rate(10);
        engine.set_volume(3.0);
        engine.set_pitch(500);
        assert_eq!(engine.rate, 80);
        assert_eq!(engine.amplitude, 100);
        assert_eq!(engine.pitch, Some(99));

        engine.set_pitch(u32::MAX);
        assert_eq!(engine.pitch, Some(99));
    }

    #[test]
    fn test_build_command_args() {
        let mut engine = engine();
        engine
            .set_voice(&Voice::new("en-gb", "English (female)"))
            .unwrap();
        engine.set_pitch(100);

        let cmd = engine.build_command("hello there");
        let args: Vec<String> = cmd
            .get_args()
            .map(|a| a.to_string_lossy().to_string())
            .collect();
        assert_eq!(
            args,
            vec!["-v", "en-gb", "-s", "175", "-a", "100", "-p", "50", "--", "hello there"]
        );
    }

    #[test]
    fn test_set_voice_rejects_empty_id() {
        let mut engine = engine();
        let result = engine.set_voice(&Voice::new("", "nameless"));
        assert!(matches!(result, Err(SynthesisError::UnknownVoice(_))));
    }

    #[test]
    fn test_missing_command_fails_init() {
        let result = EspeakEngine::new("definitely-not-a-speech-engine-binary");
        assert!(matches!(result, Err(SynthesisError::InitFailed(_))));
    }
}
