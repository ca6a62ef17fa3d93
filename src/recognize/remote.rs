//! Remote speech-to-text via an OpenAI-compatible API
//!
//! Sends audio to a whisper.cpp server or OpenAI-compatible endpoint. Each
//! locale attempt is one request; auto-detection omits the language field.

use super::Recognizer;
use crate::config::RecognitionConfig;
use crate::error::RecognizeError;
use std::io::Cursor;
use std::time::Duration;

/// Environment variable consulted when no API key is configured
pub const API_KEY_ENV: &str = "COACH_AUDIO_API_KEY";

/// Remote recognizer using the `/v1/audio/transcriptions` endpoint
#[derive(Debug)]
pub struct RemoteRecognizer {
    /// Base endpoint URL (e.g., "http://192.168.1.100:8080")
    endpoint: String,
    model: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl RemoteRecognizer {
    pub fn new(config: &RecognitionConfig) -> Result<Self, RecognizeError> {
        let endpoint = config
            .endpoint
            .as_ref()
            .ok_or_else(|| {
                RecognizeError::Config("recognition.endpoint is required".into())
            })?
            .clone();

        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            return Err(RecognizeError::Config(format!(
                "recognition.endpoint must start with http:// or https://, got: {}",
                endpoint
            )));
        }

        if endpoint.starts_with("http://")
            && !endpoint.contains("localhost")
            && !endpoint.contains("127.0.0.1")
            && !endpoint.contains("[::1]")
        {
            tracing::warn!(
                "Recognition endpoint uses HTTP without TLS. Audio data will be transmitted unencrypted!"
            );
        }

        let api_key = config
            .api_key
            .clone()
            .or_else(|| std::env::var(API_KEY_ENV).ok());

        let timeout = Duration::from_secs(config.timeout_secs);

        tracing::info!(
            "Configured remote recognizer: endpoint={}, model={}, timeout={}s",
            endpoint,
            config.model,
            timeout.as_secs()
        );

        Ok(Self {
            endpoint,
            model: config.model.clone(),
            api_key,
            timeout,
        })
    }

    fn url(&self) -> String {
        format!(
            "{}/v1/audio/transcriptions",
            self.endpoint.trim_end_matches('/')
        )
    }

    /// Encode f32 samples as 16-bit mono WAV
    fn encode_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>, RecognizeError> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let mut buffer = Cursor::new(Vec::new());
        let mut writer = hound::WavWriter::new(&mut buffer, spec).map_err(|e| {
            RecognizeError::AudioFormat(format!("Failed to create WAV writer: {}", e))
        })?;

        for &sample in samples {
            let scaled = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
            writer.write_sample(scaled).map_err(|e| {
                RecognizeError::AudioFormat(format!("Failed to write sample: {}", e))
            })?;
        }

        writer
            .finalize()
            .map_err(|e| RecognizeError::AudioFormat(format!("Failed to finalize WAV: {}", e)))?;

        Ok(buffer.into_inner())
    }

    /// Build the multipart form body for one request
    fn build_multipart_body(&self, wav_data: &[u8], locale: Option<&str>) -> (String, Vec<u8>) {
        let boundary = format!(
            "----CoachAudioBoundary{}",
            chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
        );

        let mut body = Vec::new();
        let mut field = |name: &str, value: &[u8]| {
            body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
            body.extend_from_slice(
                format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name).as_bytes(),
            );
            body.extend_from_slice(value);
            body.extend_from_slice(b"\r\n");
        };

        field("model", self.model.as_bytes());
        if let Some(locale) = locale {
            field("language", language_code(locale).as_bytes());
        }
        field("response_format", b"json");

        body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
        body.extend_from_slice(
            b"Content-Disposition: form-data; name=\"file\"; filename=\"audio.wav\"\r\n",
        );
        body.extend_from_slice(b"Content-Type: audio/wav\r\n\r\n");
        body.extend_from_slice(wav_data);
        body.extend_from_slice(b"\r\n");

        body.extend_from_slice(format!("--{}--\r\n", boundary).as_bytes());

        (boundary, body)
    }
}

/// Whisper-style APIs take ISO-639-1 codes, so "en-IN" is sent as "en"
fn language_code(locale: &str) -> String {
    locale
        .split(['-', '_'])
        .next()
        .unwrap_or(locale)
        .to_lowercase()
}

/// Pull the transcript out of a JSON response
fn extract_text(json: &serde_json::Value) -> Result<String, RecognizeError> {
    let text = json
        .get("text")
        .and_then(|v| v.as_str())
        .ok_or_else(|| {
            RecognizeError::Service(format!("Response missing 'text' field: {}", json))
        })?
        .trim()
        .to_string();

    if text.is_empty() {
        return Err(RecognizeError::NoMatch);
    }
    Ok(text)
}

impl Recognizer for RemoteRecognizer {
    fn recognize(
        &self,
        samples: &[f32],
        sample_rate: u32,
        locale: Option<&str>,
    ) -> Result<String, RecognizeError> {
        if samples.is_empty() {
            return Err(RecognizeError::AudioFormat("Empty audio buffer".into()));
        }

        tracing::debug!(
            "Sending {:.2}s of audio to {} (locale: {})",
            samples.len() as f32 / sample_rate.max(1) as f32,
            self.endpoint,
            locale.unwrap_or("auto")
        );

        let start = std::time::Instant::now();
        let wav_data = Self::encode_wav(samples, sample_rate)?;
        let (boundary, body) = self.build_multipart_body(&wav_data, locale);

        let mut request = ureq::post(&self.url()).timeout(self.timeout).set(
            "Content-Type",
            &format!("multipart/form-data; boundary={}", boundary),
        );

        if let Some(ref key) = self.api_key {
            request = request.set("Authorization", &format!("Bearer {}", key));
        }

        let response = request.send_bytes(&body).map_err(|e| match e {
            ureq::Error::Status(code, resp) => {
                let body = resp.into_string().unwrap_or_default();
                RecognizeError::Service(format!("Server returned {}: {}", code, body))
            }
            ureq::Error::Transport(t) => RecognizeError::Service(format!("Request failed: {}", t)),
        })?;

        let json: serde_json::Value = response.into_json().map_err(|e| {
            RecognizeError::Service(format!("Failed to parse response: {}", e))
        })?;

        let text = extract_text(&json)?;
        tracing::debug!(
            "Remote recognition completed in {:.2}s",
            start.elapsed().as_secs_f32()
        );
        Ok(text)
    }

    fn wire_locale(&self, locale: &str) -> String {
        language_code(locale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(endpoint: Option<&str>) -> RecognitionConfig {
        RecognitionConfig {
            endpoint: endpoint.map(str::to_string),
            api_key: Some("sk-test-key-123".to_string()),
            ..RecognitionConfig::default()
        }
    }

    #[test]
    fn test_encode_wav_basic() {
        let samples: Vec<f32> = (0..16000)
            .map(|i| (i as f32 * 440.0 * 2.0 * std::f32::consts::PI / 16000.0).sin() * 0.5)
            .collect();

        let wav = RemoteRecognizer::encode_wav(&samples, 16000).unwrap();

        // 44-byte header plus 2 bytes per sample
        assert_eq!(wav.len(), 44 + 32000);
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
    }

    #[test]
    fn test_missing_endpoint() {
        let err = RemoteRecognizer::new(&config(None)).unwrap_err();
        assert!(err.to_string().contains("recognition.endpoint"));
    }

    #[test]
    fn test_invalid_url() {
        let err = RemoteRecognizer::new(&config(Some("not-a-url"))).unwrap_err();
        assert!(err.to_string().contains("http://"));
    }

    #[test]
    fn test_url_joins_path() {
        let recognizer = RemoteRecognizer::new(&config(Some("http://localhost:8080/"))).unwrap();
        assert_eq!(
            recognizer.url(),
            "http://localhost:8080/v1/audio/transcriptions"
        );
        assert_eq!(recognizer.api_key.as_deref(), Some("sk-test-key-123"));
        assert_eq!(recognizer.timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_multipart_body_with_locale() {
        let recognizer = RemoteRecognizer::new(&config(Some("http://localhost:8080"))).unwrap();
        let (boundary, body) = recognizer.build_multipart_body(&[0u8; 100], Some("en-IN"));
        let body = String::from_utf8_lossy(&body);

        assert!(body.contains(&boundary));
        assert!(body.contains("name=\"file\"; filename=\"audio.wav\""));
        assert!(body.contains("name=\"model\"\r\n\r\nwhisper-1"));
        assert!(body.contains("name=\"language\"\r\n\r\nen\r\n"));
        assert!(body.contains("name=\"response_format\""));
        assert!(body.ends_with(&format!("--{}--\r\n", boundary)));
    }

    #[test]
    fn test_multipart_body_auto_omits_language() {
        let recognizer = RemoteRecognizer::new(&config(Some("http://localhost:8080"))).unwrap();
        let (_, body) = recognizer.build_multipart_body(&[0u8; 10], None);
        assert!(!String::from_utf8_lossy(&body).contains("name=\"language\""));
    }

    #[test]
    fn test_language_code() {
        assert_eq!(language_code("en-US"), "en");
        assert_eq!(language_code("hi_IN"), "hi");
        assert_eq!(language_code("fr"), "fr");

        let recognizer = RemoteRecognizer::new(&config(Some("http://localhost:8080"))).unwrap();
        assert_eq!(
            recognizer.wire_locale("en-US"),
            recognizer.wire_locale("en-IN")
        );
    }

    #[test]
    fn test_extract_text() {
        let json = serde_json::json!({ "text": " Hello there " });
        assert_eq!(extract_text(&json).unwrap(), "Hello there");

        let blank = serde_json::json!({ "text": "  " });
        assert!(matches!(extract_text(&blank), Err(RecognizeError::NoMatch)));

        let missing = serde_json::json!({ "error": "bad" });
        assert!(matches!(extract_text(&missing), Err(RecognizeError::Service(_))));
    }

    #[test]
    fn test_empty_audio_rejected() {
        let recognizer = RemoteRecognizer::new(&config(Some("http://localhost:8080"))).unwrap();
        let result = recognizer.recognize(&[], 16000, None);
        assert!(matches!(result, Err(RecognizeError::AudioFormat(_))));
    }
}
