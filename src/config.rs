//! Configuration loading and types for coach-audio
//!
//! Configuration is loaded in layers:
//! 1. Built-in defaults
//! 2. Config file (~/.config/coach-audio/config.toml)
//! 3. Environment variables (COACH_AUDIO_*)
//! 4. CLI arguments (highest priority)

use crate::error::CoachAudioError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file content
pub const DEFAULT_CONFIG: &str = r#"# coach-audio configuration
#
# Location: ~/.config/coach-audio/config.toml
# All settings can be overridden via CLI flags

[synthesis]
# Speech engine command (espeak-ng compatible command line)
command = "espeak-ng"

# Voices whose name contains one of these keywords are preferred.
# Otherwise the first voice the engine reports is used.
preferred_voices = ["female", "zira", "karen", "veena"]

# Speaking rate in words per minute
rate = 170

# Volume level (0.0 to 1.0)
volume = 0.9

# Pitch as a percentage of the voice's normal pitch
# (ignored by engines without pitch control)
pitch = 110

[capture]
# Input device: "auto" picks the first device matching preferred_devices,
# falling back to the system default. Any other value is matched by name.
device = "auto"
preferred_devices = ["microphone", "mic", "input", "default", "primary"]

# Sample rate in Hz delivered to recognition
sample_rate = 16000

# Seconds of ambient noise sampled at startup
calibration_secs = 2.0

# Speech detection energy on the 16-bit sample scale
energy_threshold = 300.0
dynamic_energy_threshold = true

# Seconds of trailing silence that end a phrase
pause_threshold_secs = 0.8

# Defaults for one-shot listening
listen_timeout_secs = 10.0
phrase_limit_secs = 8.0

[listener]
# Continuous listening uses shorter windows
timeout_secs = 5.0
phrase_limit_secs = 6.0
idle_backoff_ms = 100
error_backoff_ms = 500

# Cap on unread transcripts; new ones are dropped while full. Omit for unbounded.
# max_buffered = 64

[recognition]
# OpenAI-compatible transcription endpoint
endpoint = "http://localhost:8080"
model = "whisper-1"
timeout_secs = 30

# Tried in order until one recognizes the audio. "auto" sends no language.
locales = ["en-US", "en-IN", "auto"]
"#;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub synthesis: SynthesisConfig,

    #[serde(default)]
    pub capture: CaptureConfig,

    #[serde(default)]
    pub listener: ListenerConfig,

    #[serde(default)]
    pub recognition: RecognitionConfig,
}

/// Speech synthesis configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SynthesisConfig {
    /// Engine command (espeak-ng compatible)
    #[serde(default = "default_synthesis_command")]
    pub command: String,

    /// Voice name keywords, checked case-insensitively in order
    #[serde(default = "default_preferred_voices")]
    pub preferred_voices: Vec<String>,

    /// Words per minute
    #[serde(default = "default_rate")]
    pub rate: u32,

    /// Volume level (0.0 to 1.0)
    #[serde(default = "default_volume")]
    pub volume: f32,

    /// Pitch as a percentage of normal (best effort)
    #[serde(default = "default_pitch")]
    pub pitch: Option<u32>,

    /// Pause after each utterance before the next one starts
    #[serde(default = "default_post_utterance_gap_ms")]
    pub post_utterance_gap_ms: u64,

    /// Bounded wait of the worker on an empty queue
    #[serde(default = "default_queue_poll_ms")]
    pub queue_poll_ms: u64,
}

/// Capture device and phrase detection configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CaptureConfig {
    /// "auto" or a device name
    #[serde(default = "default_device")]
    pub device: String,

    /// Device name keywords used when device = "auto"
    #[serde(default = "default_preferred_devices")]
    pub preferred_devices: Vec<String>,

    /// Sample rate in Hz
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    /// Ambient noise calibration window in seconds
    #[serde(default = "default_calibration_secs")]
    pub calibration_secs: f32,

    /// Speech detection energy on the 16-bit sample scale
    #[serde(default = "default_energy_threshold")]
    pub energy_threshold: f32,

    /// Let the threshold follow ambient energy between phrases
    #[serde(default = "default_true")]
    pub dynamic_energy_threshold: bool,

    /// Trailing silence that ends a phrase
    #[serde(default = "default_pause_threshold_secs")]
    pub pause_threshold_secs: f32,

    /// One-shot listen timeout
    #[serde(default = "default_listen_timeout_secs")]
    pub listen_timeout_secs: f32,

    /// One-shot phrase limit
    #[serde(default = "default_phrase_limit_secs")]
    pub phrase_limit_secs: f32,
}

/// Continuous listening configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListenerConfig {
    #[serde(default = "default_listener_timeout_secs")]
    pub timeout_secs: f32,

    #[serde(default = "default_listener_phrase_limit_secs")]
    pub phrase_limit_secs: f32,

    /// Sleep after a sentinel outcome
    #[serde(default = "default_idle_backoff_ms")]
    pub idle_backoff_ms: u64,

    /// Sleep after an unexpected failure
    #[serde(default = "default_error_backoff_ms")]
    pub error_backoff_ms: u64,

    /// Optional cap on unread transcripts
    #[serde(default)]
    pub max_buffered: Option<usize>,
}

/// Speech-to-text backend configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RecognitionConfig {
    /// Base endpoint URL (e.g., "http://192.168.1.100:8080")
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Model name sent to the server
    #[serde(default = "default_recognition_model")]
    pub model: String,

    /// API key (falls back to COACH_AUDIO_API_KEY)
    #[serde(default)]
    pub api_key: Option<String>,

    /// Request timeout in seconds
    #[serde(default = "default_recognition_timeout")]
    pub timeout_secs: u64,

    /// Locale attempts in order; "auto" lets the server detect
    #[serde(default = "default_locales")]
    pub locales: Vec<String>,
}

fn default_true() -> bool {
    true
}

fn default_synthesis_command() -> String {
    "espeak-ng".to_string()
}

fn default_preferred_voices() -> Vec<String> {
    ["female", "zira", "karen", "veena"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_rate() -> u32 {
    170
}

fn default_volume() -> f32 {
    0.9
}

fn default_pitch() -> Option<u32> {
    Some(110)
}

fn default_post_utterance_gap_ms() -> u64 {
    100
}

fn default_queue_poll_ms() -> u64 {
    1000
}

fn default_device() -> String {
    "auto".to_string()
}

fn default_preferred_devices() -> Vec<String> {
    ["microphone", "mic", "input", "default", "primary"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_sample_rate() -> u32 {
    16000
}

fn default_calibration_secs() -> f32 {
    2.0
}

fn default_energy_threshold() -> f32 {
    300.0
}

fn default_pause_threshold_secs() -> f32 {
    0.8
}

fn default_listen_timeout_secs() -> f32 {
    10.0
}

fn default_phrase_limit_secs() -> f32 {
    8.0
}

fn default_listener_timeout_secs() -> f32 {
    5.0
}

fn default_listener_phrase_limit_secs() -> f32 {
    6.0
}

fn default_idle_backoff_ms() -> u64 {
    100
}

fn default_error_backoff_ms() -> u64 {
    500
}

fn default_recognition_model() -> String {
    "whisper-1".to_string()
}

fn default_recognition_timeout() -> u64 {
    30
}

fn default_locales() -> Vec<String> {
    ["en-US", "en-IN", "auto"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            command: default_synthesis_command(),
            preferred_voices: default_preferred_voices(),
            rate: default_rate(),
            volume: default_volume(),
            pitch: default_pitch(),
            post_utterance_gap_ms: default_post_utterance_gap_ms(),
            queue_poll_ms: default_queue_poll_ms(),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device: default_device(),
            preferred_devices: default_preferred_devices(),
            sample_rate: default_sample_rate(),
            calibration_secs: default_calibration_secs(),
            energy_threshold: default_energy_threshold(),
            dynamic_energy_threshold: true,
            pause_threshold_secs: default_pause_threshold_secs(),
            listen_timeout_secs: default_listen_timeout_secs(),
            phrase_limit_secs: default_phrase_limit_secs(),
        }
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_listener_timeout_secs(),
            phrase_limit_secs: default_listener_phrase_limit_secs(),
            idle_backoff_ms: default_idle_backoff_ms(),
            error_backoff_ms: default_error_backoff_ms(),
            max_buffered: None,
        }
    }
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            endpoint: Some("http://localhost:8080".to_string()),
            model: default_recognition_model(),
            api_key: None,
            timeout_secs: default_recognition_timeout(),
            locales: default_locales(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            synthesis: SynthesisConfig::default(),
            capture: CaptureConfig::default(),
            listener: ListenerConfig::default(),
            recognition: RecognitionConfig::default(),
        }
    }
}

impl Config {
    /// Get the default config file path
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "coach-audio")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }
}

/// Load configuration from file, with defaults for missing values
pub fn load_config(path: Option<&Path>) -> Result<Config, CoachAudioError> {
    let mut config = Config::default();

    let config_path = path.map(PathBuf::from).or_else(Config::default_path);

    if let Some(ref path) = config_path {
        if path.exists() {
            tracing::debug!("Loading config from {:?}", path);
            let contents = std::fs::read_to_string(path)
                .map_err(|e| CoachAudioError::Config(format!("Failed to read config: {}", e)))?;

            config = toml::from_str(&contents)
                .map_err(|e| CoachAudioError::Config(format!("Invalid config: {}", e)))?;
        } else {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
        }
    }

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());

    Ok(config)
}

/// Override config values from COACH_AUDIO_* variables
fn apply_env_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(device) = lookup("COACH_AUDIO_DEVICE") {
        config.capture.device = device;
    }
    if let Some(command) = lookup("COACH_AUDIO_TTS_COMMAND") {
        config.synthesis.command = command;
    }
    if let Some(endpoint) = lookup("COACH_AUDIO_ENDPOINT") {
        config.recognition.endpoint = Some(endpoint);
    }
    if let Some(locales) = lookup("COACH_AUDIO_LOCALES") {
        let parsed: Vec<String> = locales
            .split(',')
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect();
        if !parsed.is_empty() {
            config.recognition.locales = parsed;
        }
    }
}

/// Longest duration any seconds setting can express (one day)
const MAX_SETTING_SECS: f32 = 86_400.0;

/// Convert a seconds setting to a Duration. Negative and NaN values become
/// zero, anything past a day (including infinity) is capped.
pub fn secs(value: f32) -> Duration {
    Duration::try_from_secs_f32(value.clamp(0.0, MAX_SETTING_SECS)).unwrap_or(Duration::ZERO)
}

/// Save configuration to file
pub fn save_config(config: &Config, path: &Path) -> Result<(), CoachAudioError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| CoachAudioError::Config(format!("Failed to create config dir: {}", e)))?;
    }

    let contents = toml::to_string_pretty(config)
        .map_err(|e| CoachAudioError::Config(format!("Failed to serialize config: {}", e)))?;

    std::fs::write(path, contents)
        .map_err(|e| CoachAudioError::Config(format!("Failed to write config: {}", e)))?;

    Ok(())
}
