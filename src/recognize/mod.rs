//! Speech-to-text recognition
//!
//! Provides recognition via:
//! - Remote OpenAI-compatible Whisper API (whisper.cpp server, OpenAI, etc.)
//!
//! [`RecognitionChain`] tries each configured locale in order and stops at
//! the first one that yields text.

pub mod remote;

use crate::config::RecognitionConfig;
use crate::error::RecognizeError;
use crate::state::{TranscriptionOutcome, TranscriptionResult};

/// Locale value meaning "let the backend detect the language"
pub const AUTO_LOCALE: &str = "auto";

/// Trait for speech-to-text implementations
pub trait Recognizer: Send + Sync {
    /// Recognize mono f32 samples. `locale` is `None` for auto-detection.
    fn recognize(
        &self,
        samples: &[f32],
        sample_rate: u32,
        locale: Option<&str>,
    ) -> Result<String, RecognizeError>;

    /// The form of `locale` the backend actually receives. Locales that map
    /// to the same wire value are only tried once.
    fn wire_locale(&self, locale: &str) -> String {
        locale.to_string()
    }
}

/// Ordered locale fallback over one recognizer
pub struct RecognitionChain {
    recognizer: Box<dyn Recognizer>,
    locales: Vec<String>,
}

impl RecognitionChain {
    pub fn new(recognizer: Box<dyn Recognizer>, locales: Vec<String>) -> Self {
        let locales = if locales.is_empty() {
            vec![AUTO_LOCALE.to_string()]
        } else {
            locales
        };
        Self {
            recognizer,
            locales,
        }
    }

    pub fn from_config(recognizer: Box<dyn Recognizer>, config: &RecognitionConfig) -> Self {
        Self::new(recognizer, config.locales.clone())
    }

    pub fn locales(&self) -> &[String] {
        &self.locales
    }

    /// Turn captured audio into an outcome.
    ///
    /// Text is lower-cased and trimmed. Blank text counts as no match. When
    /// every locale fails, the last attempt decides between
    /// [`TranscriptionOutcome::Unintelligible`] and
    /// [`TranscriptionOutcome::BackendError`].
    pub fn transcribe(&self, samples: &[f32], sample_rate: u32) -> TranscriptionOutcome {
        let mut last_error = RecognizeError::NoMatch;
        let mut tried: Vec<Option<String>> = Vec::with_capacity(self.locales.len());

        for locale in &self.locales {
            let requested = if locale.eq_ignore_ascii_case(AUTO_LOCALE) {
                None
            } else {
                Some(locale.as_str())
            };

            let wire = requested.map(|l| self.recognizer.wire_locale(l));
            if tried.contains(&wire) {
                tracing::debug!("Skipping locale {}: same request already sent", locale);
                continue;
            }
            tried.push(wire);

            match self.recognizer.recognize(samples, sample_rate, requested) {
                Ok(text) => {
                    let text = text.trim().to_lowercase();
                    if text.is_empty() {
                        tracing::debug!("Empty recognition result for locale {}", locale);
                        last_error = RecognizeError::NoMatch;
                        continue;
                    }
                    tracing::debug!("Recognized with locale {}", locale);
                    return TranscriptionOutcome::Transcript(TranscriptionResult::new(text));
                }
                Err(e) => {
                    tracing::debug!("Recognition failed for locale {}: {}", locale, e);
                    last_error = e;
                }
            }
        }

        match last_error {
            RecognizeError::NoMatch => TranscriptionOutcome::Unintelligible,
            e => {
                tracing::warn!("Speech recognition failed: {}", e);
                TranscriptionOutcome::BackendError
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    /// Scripted recognizer keyed by locale ("auto" for None)
    struct ScriptedRecognizer {
        replies: HashMap<String, Result<String, RecognizeError>>,
    }

    impl ScriptedRecognizer {
        fn new(replies: Vec<(&str, Result<String, RecognizeError>)>) -> Self {
            Self {
                replies: replies
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v))
                    .collect(),
            }
        }
    }

    impl Recognizer for ScriptedRecognizer {
        fn recognize(
            &self,
            _samples: &[f32],
            _sample_rate: u32,
            locale: Option<&str>,
        ) -> Result<String, RecognizeError> {
            match self.replies.get(locale.unwrap_or(AUTO_LOCALE)) {
                Some(Ok(text)) => Ok(text.clone()),
                Some(Err(RecognizeError::NoMatch)) | None => Err(RecognizeError::NoMatch),
                Some(Err(e)) => Err(RecognizeError::Service(e.to_string())),
            }
        }
    }

    /// Sends only the language part and records every request
    #[derive(Default)]
    struct LanguageOnly {
        requests: Mutex<Vec<Option<String>>>,
    }

    impl Recognizer for LanguageOnly {
        fn recognize(
            &self,
            _samples: &[f32],
            _sample_rate: u32,
            locale: Option<&str>,
        ) -> Result<String, RecognizeError> {
            self.requests
                .lock()
                .unwrap()
                .push(locale.map(|l| self.wire_locale(l)));
            Err(RecognizeError::NoMatch)
        }

        fn wire_locale(&self, locale: &str) -> String {
            locale.split('-').next().unwrap_or(locale).to_string()
        }
    }

    struct SharedRecognizer(Arc<LanguageOnly>);

    impl Recognizer for SharedRecognizer {
        fn recognize(
            &self,
            samples: &[f32],
            sample_rate: u32,
            locale: Option<&str>,
        ) -> Result<String, RecognizeError> {
            self.0.recognize(samples, sample_rate, locale)
        }

        fn wire_locale(&self, locale: &str) -> String {
            self.0.wire_locale(locale)
        }
    }

    fn locales() -> Vec<String> {
        vec!["en-US".into(), "en-IN".into(), "auto".into()]
    }

    #[test]
    fn test_first_locale_wins() {
        let chain = RecognitionChain::new(
            Box::new(ScriptedRecognizer::new(vec![(
                "en-US",
                Ok("  Tell Me About Yourself ".into()),
            )])),
            locales(),
        );
        let outcome = chain.transcribe(&[0.1; 160], 16000);
        assert_eq!(outcome.text(), Some("tell me about yourself"));
    }

    #[test]
    fn test_falls_back_through_locales() {
        let recognizer = ScriptedRecognizer::new(vec![
            ("en-US", Err(RecognizeError::NoMatch)),
            ("en-IN", Ok("  ".into())),
            ("auto", Ok("Namaste".into())),
        ]);
        let chain = RecognitionChain::new(Box::new(recognizer), locales());
        let outcome = chain.transcribe(&[0.1; 160], 16000);
        assert_eq!(outcome.text(), Some("namaste"));
    }

    #[test]
    fn test_all_no_match_is_unintelligible() {
        let chain = RecognitionChain::new(Box::new(ScriptedRecognizer::new(vec![])), locales());
        assert!(matches!(
            chain.transcribe(&[0.1; 160], 16000),
            TranscriptionOutcome::Unintelligible
        ));
    }

    #[test]
    fn test_last_service_error_is_backend_error() {
        let recognizer = ScriptedRecognizer::new(vec![(
            "auto",
            Err(RecognizeError::Service("connection refused".into())),
        )]);
        let chain = RecognitionChain::new(Box::new(recognizer), locales());
        assert!(matches!(
            chain.transcribe(&[0.1; 160], 16000),
            TranscriptionOutcome::BackendError
        ));
    }

    #[test]
    fn test_auto_sends_no_locale() {
        let recognizer = ScriptedRecognizer::new(vec![("auto", Ok("hi".into()))]);
        let chain = RecognitionChain::new(Box::new(recognizer), vec!["AUTO".into()]);
        assert_eq!(chain.transcribe(&[0.1; 160], 16000).text(), Some("hi"));
    }

    #[test]
    fn test_same_wire_locale_sent_once() {
        let recognizer = Arc::new(LanguageOnly::default());
        let chain = RecognitionChain::new(
            Box::new(SharedRecognizer(recognizer.clone())),
            locales(),
        );

        assert!(matches!(
            chain.transcribe(&[0.1; 160], 16000),
            TranscriptionOutcome::Unintelligible
        ));
        assert_eq!(
            *recognizer.requests.lock().unwrap(),
            vec![Some("en".to_string()), None]
        );
    }

    #[test]
    fn test_empty_locale_list_means_auto() {
        let chain = RecognitionChain::new(Box::new(ScriptedRecognizer::new(vec![])), Vec::new());
        assert_eq!(chain.locales(), &["auto".to_string()]);
    }
}
