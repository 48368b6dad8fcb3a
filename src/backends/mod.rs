//! External service backends
//!
//! Trait seams for speech-to-text, text-to-speech, the chat model, and the
//! remote voice channel, with HTTP implementations over reqwest. The
//! pipeline only sees the traits; tests swap in scripted mocks.

pub mod llm;
pub mod stt;
pub mod tts;

use std::num::NonZeroU32;
use std::sync::Arc;

use async_trait::async_trait;
use governor::{clock::DefaultClock, state::InMemoryState, state::NotKeyed, Quota, RateLimiter};
use tokio::sync::mpsc;

use crate::Result;
use crate::audio::AudioFrame;

pub use llm::GeminiChat;
pub use stt::{ElevenLabsStt, WhisperStt};
pub use tts::{ElevenLabsTts, OpenAiTts, VoiceTuning};

/// Client-side request pacer shared across backend calls
pub type SharedLimiter = Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>;

/// Create a rate limiter with the given requests-per-minute burst capacity
#[must_use]
pub fn create_limiter(requests_per_minute: u32) -> SharedLimiter {
    let rpm = NonZeroU32::new(requests_per_minute).unwrap_or(NonZeroU32::MIN);
    let quota = Quota::per_minute(rpm);
    Arc::new(RateLimiter::direct(quota))
}

/// Speech-to-text backend
#[async_trait]
pub trait SpeechToText: Send + Sync {
    /// Transcribe WAV audio to text
    ///
    /// # Errors
    ///
    /// `SttUnavailable` when the provider is down or throttling (retryable),
    /// `Transcription` when it rejected this particular audio.
    async fn transcribe_wav(&self, wav: &[u8], language_hint: Option<&str>) -> Result<String>;
}

/// Text-to-speech backend producing MP3 audio
#[async_trait]
pub trait TextToSpeech: Send + Sync {
    /// Synthesize text to MP3 bytes
    ///
    /// # Errors
    ///
    /// `Synthesis` on any provider failure; callers fall through to the
    /// next backend in the chain.
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>>;

    /// Short provider label for logs
    fn provider_name(&self) -> &'static str;
}

/// Conversational reply backend
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Produce a reply for an assembled prompt
    ///
    /// # Errors
    ///
    /// `RateLimited` on throttling, `BackendUnavailable` on outage or
    /// transport failure, `Malformed` when the response has no usable text.
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// Remote voice channel transport
///
/// The concrete gateway client lives outside this crate; sessions only need
/// frames in and MP3 out.
#[async_trait]
pub trait VoiceLink: Send + Sync {
    /// Join the channel and start receiving audio frames
    async fn join(&self) -> Result<mpsc::Receiver<AudioFrame>>;

    /// Leave the channel
    async fn leave(&self) -> Result<()>;

    /// Send MP3 audio into the channel
    async fn send_audio(&self, mp3: &[u8]) -> Result<()>;

    /// Channel identifier for logs and session keys
    fn channel_id(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limiter_tolerates_zero_rpm() {
        // Zero would panic NonZeroU32; it clamps to one request per minute
        let limiter = create_limiter(0);
        assert!(limiter.check().is_ok());
        assert!(limiter.check().is_err());
    }

    #[test]
    fn limiter_allows_burst_up_to_quota() {
        let limiter = create_limiter(5);
        for _ in 0..5 {
            assert!(limiter.check().is_ok());
        }
        assert!(limiter.check().is_err());
    }
}
