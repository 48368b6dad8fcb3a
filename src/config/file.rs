//! TOML configuration file loading
//!
//! Supports `~/.config/lantern/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::PathBuf;

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct LanternConfigFile {
    /// Persona identifier (e.g. "sri")
    #[serde(default)]
    pub persona: Option<String>,

    /// Display name of the main user ("Kak" honorifics apply to them)
    #[serde(default)]
    pub main_user: Option<String>,

    /// Utterance segmentation tunables
    #[serde(default)]
    pub segmenter: SegmenterFileConfig,

    /// Voice/audio configuration
    #[serde(default)]
    pub voice: VoiceFileConfig,

    /// Chat backend configuration
    #[serde(default)]
    pub chat: ChatFileConfig,

    /// API keys for external services
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,
}

/// Utterance segmentation tunables
#[derive(Debug, Default, Deserialize)]
pub struct SegmenterFileConfig {
    /// RMS energy above which a frame counts as speech
    pub energy_threshold: Option<f32>,

    /// Cumulative trailing silence that closes an utterance (ms)
    pub silence_hold_ms: Option<u64>,

    /// Hard cap on utterance length (ms)
    pub max_utterance_ms: Option<u64>,

    /// Utterances shorter than this are discarded (ms)
    pub min_utterance_ms: Option<u64>,
}

/// Voice processing configuration
#[derive(Debug, Default, Deserialize)]
pub struct VoiceFileConfig {
    /// STT provider ("elevenlabs" or "whisper")
    pub stt_provider: Option<String>,

    /// STT model (e.g. "scribe_v1", "whisper-1")
    pub stt_model: Option<String>,

    /// Primary TTS provider ("elevenlabs" or "openai")
    pub tts_provider: Option<String>,

    /// TTS model (e.g. "eleven_turbo_v2_5")
    pub tts_model: Option<String>,

    /// TTS voice identifier
    pub tts_voice: Option<String>,

    /// TTS speed multiplier
    pub tts_speed: Option<f64>,

    /// Daily synthesis character budget
    pub daily_char_budget: Option<usize>,

    /// Window for suppressing duplicate spoken lines (ms)
    pub dedup_window_ms: Option<u64>,
}

/// Chat backend configuration
#[derive(Debug, Default, Deserialize)]
pub struct ChatFileConfig {
    /// Model identifier (e.g. "gemini-2.5-flash")
    pub model: Option<String>,

    /// Client-side request pacing (requests per minute)
    pub requests_per_minute: Option<u32>,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    pub gemini: Option<String>,
    pub elevenlabs: Option<String>,
    pub openai: Option<String>,
}

/// Load the TOML config file from the standard path
///
/// Returns `LanternConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> LanternConfigFile {
    let Some(path) = config_file_path() else {
        return LanternConfigFile::default();
    };

    load_config_file_from(&path)
}

/// Load a TOML config file from an explicit path
pub fn load_config_file_from(path: &std::path::Path) -> LanternConfigFile {
    if !path.exists() {
        return LanternConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                LanternConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            LanternConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/lantern/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("lantern").join("config.toml"))
}
