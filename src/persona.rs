//! Persona configuration
//!
//! A persona describes who the companion is: its name, the wake-name
//! variants listeners might say (and STT might mishear), the system prompt
//! that shapes replies, and the synthesis voice. Personas are JSON documents;
//! a default is embedded in the binary and user files under the config
//! directory override it.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Spoken line used when no fallback is configured on the persona
const DEFAULT_FALLBACK_LINE: &str = "Maaf, lagi ada gangguan.";

/// A persona defines the identity of a voice companion
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Persona {
    /// Schema URL (optional, for validation)
    #[serde(rename = "$schema")]
    pub schema: Option<String>,

    /// Semantic version of this persona file
    pub version: String,

    /// Core identity (required)
    pub identity: Identity,

    /// Wake-name configuration (required for voice sessions)
    pub wake: WakeNames,

    /// Behavior and communication style
    pub personality: Option<Personality>,

    /// Voice and audio configuration
    pub voice: Option<VoiceProfile>,

    /// Canned reply lines for failure paths
    #[serde(default)]
    pub replies: ReplyLines,
}

/// Core identity of the companion
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    /// Unique identifier
    pub id: String,

    /// Display name (also the canonical wake name's cased form)
    pub name: String,

    /// Short descriptive phrase
    pub tagline: Option<String>,

    /// Longer description
    pub description: Option<String>,
}

/// Wake-name configuration
///
/// `variants` lists the tokens STT commonly produces for the primary name
/// ("seri", "shri", ...). Matching treats every entry as a whole token.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WakeNames {
    /// Canonical wake name, lowercase
    pub primary: String,

    /// Accepted mishearings of the primary name
    #[serde(default)]
    pub variants: Vec<String>,
}

/// Behavior and communication style
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Personality {
    /// Base system prompt
    pub system_prompt: Option<String>,

    /// Default communication tone
    pub tone: Option<String>,

    /// Reply language (BCP 47 code)
    pub language: Option<String>,
}

/// Voice and audio configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceProfile {
    /// Text-to-speech configuration
    pub tts: Option<TtsProfile>,

    /// Speech-to-text configuration
    pub stt: Option<SttProfile>,
}

/// TTS configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TtsProfile {
    /// TTS provider
    pub provider: Option<String>,

    /// Voice identifier
    pub voice: Option<String>,

    /// Model identifier
    pub model: Option<String>,

    /// Speech rate multiplier
    #[serde(default = "default_tts_speed")]
    pub speed: f32,

    /// Voice stability (0.0 to 1.0)
    pub stability: Option<f32>,

    /// Similarity boost (0.0 to 1.0)
    pub similarity_boost: Option<f32>,

    /// Style exaggeration (0.0 to 1.0)
    pub style: Option<f32>,
}

/// STT configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SttProfile {
    /// STT provider
    pub provider: Option<String>,

    /// Model identifier
    pub model: Option<String>,

    /// Primary language (BCP 47 code)
    pub language: Option<String>,
}

/// Canned reply lines spoken on failure paths
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyLines {
    /// Apology lines for backend trouble; one is chosen at random
    #[serde(default)]
    pub fallback: Vec<String>,

    /// Line for replies the backend produced but we could not use
    pub unintelligible: Option<String>,

    /// Optional greeting spoken when a session becomes active
    pub greeting: Option<String>,
}

const fn default_tts_speed() -> f32 {
    1.0
}

impl Default for Persona {
    fn default() -> Self {
        Self {
            schema: None,
            version: "1.0.0".to_string(),
            identity: Identity {
                id: "companion".to_string(),
                name: "Companion".to_string(),
                tagline: None,
                description: None,
            },
            wake: WakeNames {
                primary: "companion".to_string(),
                variants: Vec::new(),
            },
            personality: None,
            voice: None,
            replies: ReplyLines::default(),
        }
    }
}

impl Persona {
    /// Parse a persona from JSON
    ///
    /// # Errors
    ///
    /// Returns error if the document is not valid persona JSON
    pub fn from_json(json: &str) -> Result<Self> {
        let persona: Self = serde_json::from_str(json)
            .map_err(|e| Error::Persona(format!("invalid persona JSON: {e}")))?;

        if persona.wake.primary.trim().is_empty() {
            return Err(Error::Persona("wake.primary must not be empty".to_string()));
        }

        Ok(persona)
    }

    /// Get the unique identifier
    #[must_use]
    pub fn id(&self) -> &str {
        &self.identity.id
    }

    /// Get the display name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.identity.name
    }

    /// Get the canonical wake name
    #[must_use]
    pub fn primary_wake_name(&self) -> &str {
        &self.wake.primary
    }

    /// Get all accepted wake names, canonical first
    #[must_use]
    pub fn wake_names(&self) -> Vec<&str> {
        let mut names = vec![self.wake.primary.as_str()];
        names.extend(self.wake.variants.iter().map(String::as_str));
        names
    }

    /// Get the system prompt
    #[must_use]
    pub fn system_prompt(&self) -> Option<&str> {
        self.personality.as_ref()?.system_prompt.as_deref()
    }

    /// Get the reply language hint
    #[must_use]
    pub fn language(&self) -> Option<&str> {
        self.personality.as_ref()?.language.as_deref()
    }

    /// Get the TTS voice identifier
    #[must_use]
    pub fn tts_voice(&self) -> Option<&str> {
        self.voice.as_ref()?.tts.as_ref()?.voice.as_deref()
    }

    /// Get the TTS model identifier
    #[must_use]
    pub fn tts_model(&self) -> Option<&str> {
        self.voice.as_ref()?.tts.as_ref()?.model.as_deref()
    }

    /// Get the TTS speech rate
    #[must_use]
    pub fn tts_speed(&self) -> f32 {
        self.voice
            .as_ref()
            .and_then(|v| v.tts.as_ref())
            .map_or(1.0, |tts| tts.speed)
    }

    /// Get the full TTS profile, if configured
    #[must_use]
    pub fn tts_profile(&self) -> Option<&TtsProfile> {
        self.voice.as_ref()?.tts.as_ref()
    }

    /// Get the STT language hint
    #[must_use]
    pub fn stt_language(&self) -> Option<&str> {
        self.voice.as_ref()?.stt.as_ref()?.language.as_deref()
    }

    /// Pick a fallback apology line at random
    #[must_use]
    pub fn fallback_line(&self) -> &str {
        use rand::seq::SliceRandom;

        self.replies
            .fallback
            .choose(&mut rand::thread_rng())
            .map_or(DEFAULT_FALLBACK_LINE, String::as_str)
    }

    /// Get the line for unusable backend replies
    #[must_use]
    pub fn unintelligible_line(&self) -> &str {
        self.replies
            .unintelligible
            .as_deref()
            .unwrap_or(DEFAULT_FALLBACK_LINE)
    }

    /// Get the session greeting, if any
    #[must_use]
    pub fn greeting(&self) -> Option<&str> {
        self.replies.greeting.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_persona_has_companion_identity() {
        let p = Persona::default();
        assert_eq!(p.id(), "companion");
        assert_eq!(p.primary_wake_name(), "companion");
        assert_eq!(p.version, "1.0.0");
    }

    #[test]
    fn wake_names_list_canonical_first() {
        let p = Persona {
            wake: WakeNames {
                primary: "sri".to_string(),
                variants: vec!["seri".to_string(), "shri".to_string()],
            },
            ..Persona::default()
        };
        assert_eq!(p.wake_names(), vec!["sri", "seri", "shri"]);
    }

    #[test]
    fn fallback_line_defaults_when_unconfigured() {
        let p = Persona::default();
        assert_eq!(p.fallback_line(), DEFAULT_FALLBACK_LINE);
        assert_eq!(p.unintelligible_line(), DEFAULT_FALLBACK_LINE);
    }

    #[test]
    fn from_json_rejects_empty_wake_name() {
        let json = r#"{
            "version": "1.0.0",
            "identity": { "id": "x", "name": "X" },
            "wake": { "primary": "  " }
        }"#;
        assert!(Persona::from_json(json).is_err());
    }

    #[test]
    fn from_json_parses_voice_profile() {
        let json = r#"{
            "version": "1.0.0",
            "identity": { "id": "sri", "name": "Sri" },
            "wake": { "primary": "sri", "variants": ["seri"] },
            "voice": {
                "tts": {
                    "provider": "elevenlabs",
                    "voice": "21m00Tcm4TlvDq8ikWAM",
                    "model": "eleven_turbo_v2_5",
                    "stability": 0.5,
                    "similarityBoost": 0.75
                }
            }
        }"#;
        let p = Persona::from_json(json).unwrap();
        assert_eq!(p.tts_voice(), Some("21m00Tcm4TlvDq8ikWAM"));
        assert_eq!(p.tts_model(), Some("eleven_turbo_v2_5"));
        assert!((p.tts_speed() - 1.0).abs() < f32::EPSILON);
    }
}
