//! Text-to-speech backends

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::NaiveDate;

use super::TextToSpeech;
use crate::{Error, Result};

/// Per-request character cap; longer replies are cut at a sentence boundary
const MAX_TTS_CHARS: usize = 500;

/// ElevenLabs voice rendering knobs, from the persona's voice profile
#[derive(Debug, Clone, Copy)]
pub struct VoiceTuning {
    pub stability: f32,
    pub similarity_boost: f32,
    pub style: f32,
}

impl Default for VoiceTuning {
    fn default() -> Self {
        Self {
            stability: 0.5,
            similarity_boost: 0.75,
            style: 0.0,
        }
    }
}

/// Rolling daily character spend, reset at UTC midnight
#[derive(Debug)]
struct CharBudget {
    date: NaiveDate,
    used: usize,
}

impl CharBudget {
    fn new() -> Self {
        Self {
            date: chrono::Utc::now().date_naive(),
            used: 0,
        }
    }

    /// Reset the spend when the UTC date has rolled over
    fn roll_over(&mut self, today: NaiveDate) {
        if self.date != today {
            tracing::info!(spent = self.used, "daily TTS character budget reset");
            self.date = today;
            self.used = 0;
        }
    }
}

/// Cut text at the last sentence boundary inside the request cap
fn truncate_for_synthesis(text: &str) -> &str {
    if text.chars().count() <= MAX_TTS_CHARS {
        return text;
    }

    let cut = text
        .char_indices()
        .nth(MAX_TTS_CHARS)
        .map_or(text.len(), |(i, _)| i);
    let head = &text[..cut];

    // Prefer ending on a sentence; fall back to the hard cut
    head.rfind(['.', '!', '?'])
        .map_or(head, |i| &head[..=i])
}

/// ElevenLabs text-to-speech
pub struct ElevenLabsTts {
    client: reqwest::Client,
    api_key: String,
    voice_id: String,
    model: String,
    tuning: VoiceTuning,
    daily_char_budget: usize,
    budget: Mutex<CharBudget>,
}

impl ElevenLabsTts {
    /// Create a new ElevenLabs TTS client
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new(
        api_key: String,
        voice_id: String,
        model: String,
        tuning: VoiceTuning,
        daily_char_budget: usize,
    ) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config(
                "ElevenLabs API key required for TTS".to_string(),
            ));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            voice_id,
            model,
            tuning,
            daily_char_budget,
            budget: Mutex::new(CharBudget::new()),
        })
    }

    /// Reserve characters from the daily budget
    fn charge_budget(&self, chars: usize) -> Result<()> {
        let mut budget = self.budget.lock().unwrap();
        budget.roll_over(chrono::Utc::now().date_naive());

        if budget.used + chars > self.daily_char_budget {
            return Err(Error::Synthesis(format!(
                "daily character budget exhausted ({} used of {})",
                budget.used, self.daily_char_budget
            )));
        }

        budget.used += chars;
        tracing::debug!(
            chars,
            used = budget.used,
            budget = self.daily_char_budget,
            "charged TTS character budget"
        );
        Ok(())
    }
}

#[async_trait]
impl TextToSpeech for ElevenLabsTts {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct VoiceSettings {
            stability: f32,
            similarity_boost: f32,
            style: f32,
        }

        #[derive(serde::Serialize)]
        struct ElevenLabsRequest<'a> {
            text: &'a str,
            model_id: &'a str,
            voice_settings: VoiceSettings,
        }

        let text = truncate_for_synthesis(text);
        self.charge_budget(text.chars().count())?;

        let url = format!(
            "https://api.elevenlabs.io/v1/text-to-speech/{}",
            self.voice_id
        );

        let request = ElevenLabsRequest {
            text,
            model_id: &self.model,
            voice_settings: VoiceSettings {
                stability: self.tuning.stability,
                similarity_boost: self.tuning.similarity_boost,
                style: self.tuning.style,
            },
        };

        let response = self
            .client
            .post(&url)
            .header("xi-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "ElevenLabs TTS request failed");
                Error::Synthesis(e.to_string())
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "ElevenLabs TTS API error");
            return Err(Error::Synthesis(format!(
                "ElevenLabs TTS error {status}: {body}"
            )));
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| Error::Synthesis(e.to_string()))?;
        tracing::debug!(mp3_bytes = audio.len(), "synthesis complete");
        Ok(audio.to_vec())
    }

    fn provider_name(&self) -> &'static str {
        "elevenlabs"
    }
}

/// OpenAI text-to-speech, used as the fallback provider
pub struct OpenAiTts {
    client: reqwest::Client,
    api_key: String,
    voice: String,
    speed: f64,
    model: String,
}

impl OpenAiTts {
    /// Create a new OpenAI TTS client
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new(api_key: String, voice: String, speed: f64, model: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config("OpenAI API key required for TTS".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            voice,
            speed,
            model,
        })
    }
}

#[async_trait]
impl TextToSpeech for OpenAiTts {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct TtsRequest<'a> {
            model: &'a str,
            input: &'a str,
            voice: &'a str,
            speed: f64,
        }

        let text = truncate_for_synthesis(text);

        let request = TtsRequest {
            model: &self.model,
            input: text,
            voice: &self.voice,
            speed: self.speed,
        };

        let response = self
            .client
            .post("https://api.openai.com/v1/audio/speech")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "OpenAI TTS request failed");
                Error::Synthesis(e.to_string())
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "OpenAI TTS API error");
            return Err(Error::Synthesis(format!(
                "OpenAI TTS error {status}: {body}"
            )));
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| Error::Synthesis(e.to_string()))?;
        tracing::debug!(mp3_bytes = audio.len(), "synthesis complete");
        Ok(audio.to_vec())
    }

    fn provider_name(&self) -> &'static str {
        "openai"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_passes_through_untouched() {
        let text = "Halo Kak, apa kabar?";
        assert_eq!(truncate_for_synthesis(text), text);
    }

    #[test]
    fn long_text_cuts_at_sentence_boundary() {
        let mut text = "a".repeat(480);
        text.push_str(". dan kalimat kedua yang melewati batas lima ratus karakter");

        let cut = truncate_for_synthesis(&text);
        assert_eq!(cut.len(), 481);
        assert!(cut.ends_with('.'));
    }

    #[test]
    fn long_text_without_punctuation_hard_cuts() {
        let text = "b".repeat(600);
        assert_eq!(truncate_for_synthesis(&text).chars().count(), MAX_TTS_CHARS);
    }

    #[test]
    fn truncation_respects_multibyte_boundaries() {
        let text = "é".repeat(600);
        let cut = truncate_for_synthesis(&text);
        assert_eq!(cut.chars().count(), MAX_TTS_CHARS);
    }

    #[test]
    fn budget_rolls_over_on_new_day() {
        let mut budget = CharBudget {
            date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            used: 4800,
        };

        budget.roll_over(NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        assert_eq!(budget.used, 0);

        budget.used = 100;
        budget.roll_over(NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        assert_eq!(budget.used, 100);
    }

    #[test]
    fn exhausted_budget_maps_to_synthesis_error() {
        let tts = ElevenLabsTts::new(
            "key".to_string(),
            "voice".to_string(),
            "eleven_turbo_v2_5".to_string(),
            VoiceTuning::default(),
            10,
        )
        .unwrap();

        assert!(tts.charge_budget(8).is_ok());
        let err = tts.charge_budget(5).unwrap_err();
        assert!(matches!(err, Error::Synthesis(_)));
    }
}
