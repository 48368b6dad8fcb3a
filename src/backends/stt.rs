//! Speech-to-text backends

use async_trait::async_trait;

use super::SpeechToText;
use crate::{Error, Result};

/// Response from the ElevenLabs speech-to-text API
#[derive(serde::Deserialize)]
struct ScribeResponse {
    text: String,
}

/// Response from the OpenAI Whisper transcription API
#[derive(serde::Deserialize)]
struct WhisperResponse {
    text: String,
}

/// Classify an HTTP failure: throttling and outages are retryable,
/// everything else means this audio was rejected
fn classify_status(provider: &str, status: reqwest::StatusCode, body: &str) -> Error {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        Error::SttUnavailable(format!("{provider} error {status}: {body}"))
    } else {
        Error::Transcription(format!("{provider} error {status}: {body}"))
    }
}

/// ElevenLabs speech-to-text (scribe models)
pub struct ElevenLabsStt {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl ElevenLabsStt {
    /// Create a new ElevenLabs STT client
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new(api_key: String, model: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config(
                "ElevenLabs API key required for STT".to_string(),
            ));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model,
        })
    }
}

#[async_trait]
impl SpeechToText for ElevenLabsStt {
    async fn transcribe_wav(&self, wav: &[u8], language_hint: Option<&str>) -> Result<String> {
        tracing::debug!(
            audio_bytes = wav.len(),
            model = %self.model,
            "starting ElevenLabs transcription"
        );

        let mut form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(wav.to_vec())
                    .file_name("audio.wav")
                    .mime_str("audio/wav")
                    .map_err(|e| Error::Transcription(e.to_string()))?,
            )
            .text("model_id", self.model.clone());

        if let Some(language) = language_hint {
            form = form.text("language_code", language.to_string());
        }

        let response = self
            .client
            .post("https://api.elevenlabs.io/v1/speech-to-text")
            .header("xi-api-key", &self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "ElevenLabs STT request failed");
                Error::SttUnavailable(e.to_string())
            })?;

        let status = response.status();
        tracing::debug!(status = %status, "received response");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "ElevenLabs STT API error");
            return Err(classify_status("ElevenLabs STT", status, &body));
        }

        let result: ScribeResponse = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "failed to parse ElevenLabs STT response");
            Error::Transcription(e.to_string())
        })?;

        tracing::info!(transcript = %result.text, "transcription complete");
        Ok(result.text)
    }
}

/// OpenAI Whisper speech-to-text
pub struct WhisperStt {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl WhisperStt {
    /// Create a new Whisper STT client
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new(api_key: String, model: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config(
                "OpenAI API key required for Whisper".to_string(),
            ));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model,
        })
    }
}

#[async_trait]
impl SpeechToText for WhisperStt {
    async fn transcribe_wav(&self, wav: &[u8], language_hint: Option<&str>) -> Result<String> {
        tracing::debug!(
            audio_bytes = wav.len(),
            model = %self.model,
            "starting Whisper transcription"
        );

        let mut form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(wav.to_vec())
                    .file_name("audio.wav")
                    .mime_str("audio/wav")
                    .map_err(|e| Error::Transcription(e.to_string()))?,
            )
            .text("model", self.model.clone());

        if let Some(language) = language_hint {
            form = form.text("language", language.to_string());
        }

        let response = self
            .client
            .post("https://api.openai.com/v1/audio/transcriptions")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Whisper request failed");
                Error::SttUnavailable(e.to_string())
            })?;

        let status = response.status();
        tracing::debug!(status = %status, "received response");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Whisper API error");
            return Err(classify_status("Whisper", status, &body));
        }

        let result: WhisperResponse = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "failed to parse Whisper response");
            Error::Transcription(e.to_string())
        })?;

        tracing::info!(transcript = %result.text, "transcription complete");
        Ok(result.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_api_key_is_rejected() {
        assert!(ElevenLabsStt::new(String::new(), "scribe_v1".to_string()).is_err());
        assert!(WhisperStt::new(String::new(), "whisper-1".to_string()).is_err());
    }

    #[test]
    fn throttling_and_outages_are_retryable() {
        let err = classify_status(
            "ElevenLabs STT",
            reqwest::StatusCode::TOO_MANY_REQUESTS,
            "slow down",
        );
        assert!(matches!(err, Error::SttUnavailable(_)));

        let err = classify_status("Whisper", reqwest::StatusCode::BAD_GATEWAY, "");
        assert!(matches!(err, Error::SttUnavailable(_)));

        let err = classify_status("Whisper", reqwest::StatusCode::BAD_REQUEST, "bad audio");
        assert!(matches!(err, Error::Transcription(_)));
    }
}
