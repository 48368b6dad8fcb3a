//! Interactive first-run setup wizard (`lantern setup`)

use std::path::{Path, PathBuf};

use dialoguer::{Confirm, Input, Select};

use crate::Config;
use crate::config::file::{
    ApiKeysFileConfig, ChatFileConfig, LanternConfigFile, VoiceFileConfig,
};

/// Run the interactive setup wizard
///
/// # Errors
///
/// Returns error if user input fails or the config cannot be written
pub fn run_setup() -> anyhow::Result<()> {
    println!("Lantern Setup\n");

    // Load existing config if present
    let existing = crate::config::file::load_config_file();
    let config_path = crate::config::file::config_file_path()
        .unwrap_or_else(|| PathBuf::from("~/.config/lantern/config.toml"));

    if config_path.exists() {
        println!("Existing config found at {}\n", config_path.display());
    }

    // 1. Persona selection
    let personas = Config::embedded_personas();
    let persona_labels: Vec<&str> = personas.iter().map(|(id, _)| *id).collect();

    let default_persona = existing
        .persona
        .as_deref()
        .and_then(|p| persona_labels.iter().position(|&l| l == p))
        .unwrap_or(0);

    let persona_idx = Select::new()
        .with_prompt("Select a persona")
        .items(&persona_labels)
        .default(default_persona)
        .interact()?;
    let persona = persona_labels[persona_idx].to_string();

    // 2. Main user
    let main_user_input: String = Input::new()
        .with_prompt("Your display name (the persona greets you as Kak; leave blank to skip)")
        .with_initial_text(existing.main_user.clone().unwrap_or_default())
        .allow_empty(true)
        .interact_text()?;
    let main_user = if main_user_input.trim().is_empty() {
        None
    } else {
        Some(main_user_input.trim().to_string())
    };

    // 3. API keys
    let gemini = prompt_api_key(
        "Gemini API key (chat)",
        "GEMINI_API_KEY",
        existing.api_keys.gemini.as_deref(),
    )?;
    let elevenlabs = prompt_api_key(
        "ElevenLabs API key (voice)",
        "ELEVENLABS_API_KEY",
        existing.api_keys.elevenlabs.as_deref(),
    )?;

    let mut openai = existing.api_keys.openai.clone();
    if openai.is_none() {
        let add_openai = Confirm::new()
            .with_prompt("Add an OpenAI key? (enables Whisper STT and a TTS fallback voice)")
            .default(false)
            .interact()?;
        if add_openai {
            openai = prompt_api_key("OpenAI API key", "OPENAI_API_KEY", None)?;
        }
    }

    // 4. Voice providers
    let stt_providers = ["elevenlabs", "whisper"];
    let default_stt = existing
        .voice
        .stt_provider
        .as_deref()
        .and_then(|p| stt_providers.iter().position(|&l| l == p))
        .unwrap_or(0);
    let stt_idx = Select::new()
        .with_prompt("Speech-to-text provider")
        .items(&stt_providers)
        .default(default_stt)
        .interact()?;

    let tts_providers = ["elevenlabs", "openai"];
    let default_tts = existing
        .voice
        .tts_provider
        .as_deref()
        .and_then(|p| tts_providers.iter().position(|&l| l == p))
        .unwrap_or(0);
    let tts_idx = Select::new()
        .with_prompt("Text-to-speech provider")
        .items(&tts_providers)
        .default(default_tts)
        .interact()?;

    // 5. Chat model
    let default_model = existing
        .chat
        .model
        .clone()
        .unwrap_or_else(|| "gemini-2.5-flash".to_string());
    let model: String = Input::new()
        .with_prompt("Chat model")
        .default(default_model)
        .interact_text()?;

    // 6. Build and write config
    let config_file = LanternConfigFile {
        persona: Some(persona),
        main_user,
        segmenter: existing.segmenter,
        voice: VoiceFileConfig {
            stt_provider: Some(stt_providers[stt_idx].to_string()),
            tts_provider: Some(tts_providers[tts_idx].to_string()),
            ..existing.voice
        },
        chat: ChatFileConfig {
            model: Some(model),
            requests_per_minute: existing.chat.requests_per_minute,
        },
        api_keys: ApiKeysFileConfig {
            gemini,
            elevenlabs,
            openai,
        },
    };

    write_config(&config_path, &config_file)?;
    println!("\nConfig written to {}", config_path.display());
    println!("\nSetup complete! Run `lantern` to start listening.");

    Ok(())
}

/// Prompt for an API key, keeping the existing one on empty input
fn prompt_api_key(
    label: &str,
    env_hint: &str,
    existing: Option<&str>,
) -> anyhow::Result<Option<String>> {
    let masked = existing.map(mask_key);

    let prompt = if let Some(ref m) = masked {
        format!("{label} (current: {m}, leave blank to keep)")
    } else {
        format!("{label} ({env_hint})")
    };

    let input: String = Input::new()
        .with_prompt(&prompt)
        .allow_empty(true)
        .interact_text()?;

    if input.is_empty() {
        Ok(existing.map(str::to_string))
    } else {
        Ok(Some(input))
    }
}

fn mask_key(key: &str) -> String {
    if key.len() > 8 {
        format!("{}...{}", &key[..4], &key[key.len() - 4..])
    } else {
        "****".to_string()
    }
}

/// Serialize and write the config file
fn write_config(path: &Path, config: &LanternConfigFile) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let toml = serialize_config(config);
    std::fs::write(path, toml)?;

    Ok(())
}

/// Serialize config to a readable TOML string
fn serialize_config(config: &LanternConfigFile) -> String {
    let mut out = String::new();

    if let Some(ref persona) = config.persona {
        out.push_str(&format!("persona = \"{persona}\"\n"));
    }
    if let Some(ref main_user) = config.main_user {
        out.push_str(&format!("main_user = \"{main_user}\"\n"));
    }
    if config.persona.is_some() || config.main_user.is_some() {
        out.push('\n');
    }

    // [voice]
    let v = &config.voice;
    if v.stt_provider.is_some() || v.tts_provider.is_some() {
        out.push_str("[voice]\n");
        if let Some(ref p) = v.stt_provider {
            out.push_str(&format!("stt_provider = \"{p}\"\n"));
        }
        if let Some(ref m) = v.stt_model {
            out.push_str(&format!("stt_model = \"{m}\"\n"));
        }
        if let Some(ref p) = v.tts_provider {
            out.push_str(&format!("tts_provider = \"{p}\"\n"));
        }
        if let Some(ref m) = v.tts_model {
            out.push_str(&format!("tts_model = \"{m}\"\n"));
        }
        if let Some(ref voice) = v.tts_voice {
            out.push_str(&format!("tts_voice = \"{voice}\"\n"));
        }
        if let Some(speed) = v.tts_speed {
            out.push_str(&format!("tts_speed = {speed}\n"));
        }
        if let Some(budget) = v.daily_char_budget {
            out.push_str(&format!("daily_char_budget = {budget}\n"));
        }
        out.push('\n');
    }

    // [chat]
    let c = &config.chat;
    if c.model.is_some() || c.requests_per_minute.is_some() {
        out.push_str("[chat]\n");
        if let Some(ref model) = c.model {
            out.push_str(&format!("model = \"{model}\"\n"));
        }
        if let Some(rpm) = c.requests_per_minute {
            out.push_str(&format!("requests_per_minute = {rpm}\n"));
        }
        out.push('\n');
    }

    // [api_keys]
    let ak = &config.api_keys;
    if ak.gemini.is_some() || ak.elevenlabs.is_some() || ak.openai.is_some() {
        out.push_str("[api_keys]\n");
        for (key, val) in [
            ("gemini", &ak.gemini),
            ("elevenlabs", &ak.elevenlabs),
            ("openai", &ak.openai),
        ] {
            if let Some(v) = val {
                out.push_str(&format!("{key} = \"{v}\"\n"));
            }
        }
        out.push('\n');
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masked_keys_keep_only_the_edges() {
        assert_eq!(mask_key("sk-abcdefghijklmnop"), "sk-a...mnop");
        assert_eq!(mask_key("short"), "****");
    }

    #[test]
    fn write_config_creates_missing_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lantern").join("config.toml");

        let config = LanternConfigFile {
            persona: Some("sri".to_string()),
            ..LanternConfigFile::default()
        };
        write_config(&path, &config).unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        let parsed: LanternConfigFile = toml::from_str(&written).unwrap();
        assert_eq!(parsed.persona.as_deref(), Some("sri"));
    }

    #[test]
    fn serialized_config_round_trips_through_the_loader() {
        let config = LanternConfigFile {
            persona: Some("sri".to_string()),
            main_user: Some("Budi".to_string()),
            segmenter: crate::config::file::SegmenterFileConfig::default(),
            voice: VoiceFileConfig {
                stt_provider: Some("elevenlabs".to_string()),
                tts_provider: Some("elevenlabs".to_string()),
                tts_speed: Some(1.1),
                ..VoiceFileConfig::default()
            },
            chat: ChatFileConfig {
                model: Some("gemini-2.5-flash".to_string()),
                requests_per_minute: None,
            },
            api_keys: ApiKeysFileConfig {
                gemini: Some("key-a".to_string()),
                elevenlabs: Some("key-b".to_string()),
                openai: None,
            },
        };

        let toml = serialize_config(&config);
        let parsed: LanternConfigFile = toml::from_str(&toml).unwrap();

        assert_eq!(parsed.persona.as_deref(), Some("sri"));
        assert_eq!(parsed.main_user.as_deref(), Some("Budi"));
        assert_eq!(parsed.voice.stt_provider.as_deref(), Some("elevenlabs"));
        assert_eq!(parsed.voice.tts_speed, Some(1.1));
        assert_eq!(parsed.chat.model.as_deref(), Some("gemini-2.5-flash"));
        assert_eq!(parsed.api_keys.gemini.as_deref(), Some("key-a"));
        assert!(parsed.api_keys.openai.is_none());
    }
}
