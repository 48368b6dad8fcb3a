//! Configuration management for the Lantern companion

pub mod file;

use std::path::PathBuf;
use std::time::Duration;

use crate::audio::SegmenterConfig;
use crate::{Error, Persona, Result};

/// Lantern companion configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Active persona
    pub persona: Persona,

    /// Display name of the main user, if configured
    pub main_user: Option<String>,

    /// Utterance segmentation tunables
    pub segmenter: SegmenterConfig,

    /// Voice configuration
    pub voice: VoiceConfig,

    /// Chat backend configuration
    pub chat: ChatConfig,

    /// API keys
    pub api_keys: ApiKeys,
}

/// Voice processing configuration
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    /// STT provider ("elevenlabs" or "whisper")
    pub stt_provider: String,

    /// STT model identifier
    pub stt_model: String,

    /// Primary TTS provider ("elevenlabs" or "openai")
    pub tts_provider: String,

    /// TTS model identifier
    pub tts_model: String,

    /// TTS voice identifier
    pub tts_voice: String,

    /// TTS speed multiplier (0.25 to 4.0)
    pub tts_speed: f64,

    /// Daily synthesis character budget
    pub daily_char_budget: usize,

    /// Window for suppressing duplicate spoken lines
    pub dedup_window: Duration,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            stt_provider: "elevenlabs".to_string(),
            stt_model: "scribe_v1".to_string(),
            tts_provider: "elevenlabs".to_string(),
            tts_model: "eleven_turbo_v2_5".to_string(),
            tts_voice: "21m00Tcm4TlvDq8ikWAM".to_string(),
            tts_speed: 1.0,
            daily_char_budget: 5000,
            dedup_window: Duration::from_secs(3),
        }
    }
}

/// Chat backend configuration
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Model identifier
    pub model: String,

    /// Client-side request pacing (requests per minute)
    pub requests_per_minute: u32,

    /// Backoff before the single rate-limit retry
    pub rate_limit_backoff: Duration,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            model: "gemini-2.5-flash".to_string(),
            requests_per_minute: 8,
            rate_limit_backoff: Duration::from_millis(1200),
        }
    }
}

/// API keys for external services
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    /// Gemini API key (chat backend)
    pub gemini: Option<String>,

    /// `ElevenLabs` API key (STT and TTS)
    pub elevenlabs: Option<String>,

    /// `OpenAI` API key (Whisper STT, fallback TTS)
    pub openai: Option<String>,
}

/// Return the user personas directory: `~/.config/lantern/personas/`
pub fn personas_dir() -> PathBuf {
    directories::BaseDirs::new().map_or_else(
        || PathBuf::from(".config/lantern/personas"),
        |d| d.config_dir().join("lantern").join("personas"),
    )
}

impl Config {
    /// Embedded default persona data for when no local files are present
    const EMBEDDED_PERSONAS: &[(&str, &str)] =
        &[("sri", include_str!("../../personas/sri.json"))];

    /// Load configuration
    ///
    /// Persona resolution: explicit argument, `LANTERN_PERSONA` env var,
    /// config file, then "sri". Every other setting resolves env > toml >
    /// persona > default.
    ///
    /// # Errors
    ///
    /// Returns error if the persona cannot be loaded from any source
    pub fn load(persona_id: Option<&str>) -> Result<Self> {
        let fc = file::load_config_file();

        let persona_id = persona_id
            .map(ToString::to_string)
            .or_else(|| std::env::var("LANTERN_PERSONA").ok())
            .or_else(|| fc.persona.clone())
            .unwrap_or_else(|| "sri".to_string());

        let persona = Self::load_persona_with_priority(&persona_id)?;

        let api_keys = ApiKeys {
            gemini: std::env::var("GEMINI_API_KEY").ok().or(fc.api_keys.gemini),
            elevenlabs: std::env::var("ELEVENLABS_API_KEY")
                .ok()
                .or(fc.api_keys.elevenlabs),
            openai: std::env::var("OPENAI_API_KEY").ok().or(fc.api_keys.openai),
        };

        let main_user = std::env::var("MAIN_USER").ok().or(fc.main_user);

        // Segmenter tunables (toml > default)
        let seg_default = SegmenterConfig::default();
        let segmenter = SegmenterConfig {
            energy_threshold: fc
                .segmenter
                .energy_threshold
                .unwrap_or(seg_default.energy_threshold),
            silence_hold: fc
                .segmenter
                .silence_hold_ms
                .map_or(seg_default.silence_hold, Duration::from_millis),
            max_utterance: fc
                .segmenter
                .max_utterance_ms
                .map_or(seg_default.max_utterance, Duration::from_millis),
            min_utterance: fc
                .segmenter
                .min_utterance_ms
                .map_or(seg_default.min_utterance, Duration::from_millis),
        };

        // Voice config (env > toml > persona > default)
        let voice_default = VoiceConfig::default();
        let persona_tts = persona.tts_profile();
        let voice = VoiceConfig {
            stt_provider: std::env::var("LANTERN_STT_PROVIDER")
                .ok()
                .or(fc.voice.stt_provider)
                .or_else(|| {
                    persona
                        .voice
                        .as_ref()?
                        .stt
                        .as_ref()?
                        .provider
                        .clone()
                })
                .unwrap_or(voice_default.stt_provider),
            stt_model: std::env::var("LANTERN_STT_MODEL")
                .ok()
                .or(fc.voice.stt_model)
                .or_else(|| persona.voice.as_ref()?.stt.as_ref()?.model.clone())
                .unwrap_or(voice_default.stt_model),
            tts_provider: std::env::var("LANTERN_TTS_PROVIDER")
                .ok()
                .or(fc.voice.tts_provider)
                .or_else(|| persona_tts.and_then(|t| t.provider.clone()))
                .unwrap_or(voice_default.tts_provider),
            tts_model: std::env::var("LANTERN_TTS_MODEL")
                .ok()
                .or(fc.voice.tts_model)
                .or_else(|| persona.tts_model().map(ToString::to_string))
                .unwrap_or(voice_default.tts_model),
            tts_voice: fc
                .voice
                .tts_voice
                .or_else(|| persona.tts_voice().map(ToString::to_string))
                .unwrap_or(voice_default.tts_voice),
            tts_speed: fc
                .voice
                .tts_speed
                .unwrap_or_else(|| f64::from(persona.tts_speed())),
            daily_char_budget: fc
                .voice
                .daily_char_budget
                .unwrap_or(voice_default.daily_char_budget),
            dedup_window: fc
                .voice
                .dedup_window_ms
                .map_or(voice_default.dedup_window, Duration::from_millis),
        };

        // Chat config (env > toml > default)
        let chat_default = ChatConfig::default();
        let chat = ChatConfig {
            model: std::env::var("LANTERN_CHAT_MODEL")
                .ok()
                .or(fc.chat.model)
                .unwrap_or(chat_default.model),
            requests_per_minute: fc
                .chat
                .requests_per_minute
                .unwrap_or(chat_default.requests_per_minute),
            rate_limit_backoff: chat_default.rate_limit_backoff,
        };

        Ok(Self {
            persona,
            main_user,
            segmenter,
            voice,
            chat,
            api_keys,
        })
    }

    /// Load a persona with priority: env override, user dir, embedded
    fn load_persona_with_priority(persona_id: &str) -> Result<Persona> {
        // 1. LANTERN_PERSONAS_DIR env var (dev override)
        if let Ok(dir) = std::env::var("LANTERN_PERSONAS_DIR") {
            let path = PathBuf::from(&dir);
            if path.exists() {
                match Self::load_persona_file(&path, persona_id) {
                    Ok(persona) => {
                        tracing::info!(
                            persona_id,
                            path = %path.display(),
                            "loaded persona from LANTERN_PERSONAS_DIR"
                        );
                        return Ok(persona);
                    }
                    Err(e) => {
                        tracing::warn!(
                            persona_id,
                            error = %e,
                            "LANTERN_PERSONAS_DIR set but persona not found, continuing"
                        );
                    }
                }
            } else {
                tracing::warn!(
                    path = %dir,
                    "LANTERN_PERSONAS_DIR set but directory does not exist"
                );
            }
        }

        // 2. User personas directory
        let user_dir = personas_dir();
        if user_dir.exists() {
            if let Ok(persona) = Self::load_persona_file(&user_dir, persona_id) {
                tracing::info!(persona_id, "loaded persona from user directory");
                return Ok(persona);
            }
        }

        // 3. Embedded fallback
        Self::load_embedded_persona(persona_id)
    }

    /// Load a persona JSON document from a directory
    fn load_persona_file(personas_dir: &std::path::Path, persona_id: &str) -> Result<Persona> {
        let json_path = personas_dir.join(format!("{persona_id}.json"));
        if !json_path.exists() {
            return Err(Error::Persona(format!("not found: {persona_id}")));
        }

        let content = std::fs::read_to_string(&json_path)?;
        let persona = Persona::from_json(&content)
            .map_err(|e| Error::Config(format!("failed to parse {persona_id}.json: {e}")))?;
        tracing::debug!(path = %json_path.display(), "loaded persona from JSON");
        Ok(persona)
    }

    /// Load an embedded persona compiled into the binary
    ///
    /// # Errors
    ///
    /// Returns error if persona ID is not found in embedded data
    pub fn load_embedded_persona(persona_id: &str) -> Result<Persona> {
        Self::EMBEDDED_PERSONAS
            .iter()
            .find(|(id, _)| *id == persona_id)
            .and_then(|(_, json)| {
                let persona = Persona::from_json(json).ok()?;
                tracing::info!(persona_id, "loaded persona from embedded data");
                Some(persona)
            })
            .ok_or_else(|| Error::Persona(format!("not found: {persona_id}")))
    }

    /// Return the embedded persona array for enumeration
    #[must_use]
    pub const fn embedded_personas() -> &'static [(&'static str, &'static str)] {
        Self::EMBEDDED_PERSONAS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_sri_persona_parses() {
        let persona = Config::load_embedded_persona("sri").unwrap();
        assert_eq!(persona.id(), "sri");
        assert_eq!(persona.primary_wake_name(), "sri");
        assert!(persona.wake_names().len() > 1);
        assert!(persona.system_prompt().is_some());
        assert!(!persona.replies.fallback.is_empty());
    }

    #[test]
    fn unknown_embedded_persona_is_an_error() {
        assert!(Config::load_embedded_persona("nonexistent").is_err());
    }

    #[test]
    fn segmenter_defaults_are_sane() {
        let seg = SegmenterConfig::default();
        assert!(seg.silence_hold >= Duration::from_millis(600));
        assert!(seg.silence_hold <= Duration::from_millis(1000));
        assert_eq!(seg.min_utterance, Duration::from_millis(200));
        assert!(seg.max_utterance > seg.silence_hold);
    }
}
