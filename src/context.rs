//! Per-session conversation context and prompt assembly
//!
//! Keeps a short in-memory ring of exchanges plus what game is being played.
//! Nothing here persists past the session.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};

/// Exchanges kept in memory
const HISTORY_KEEP: usize = 10;

/// Exchanges rendered into the prompt
const HISTORY_PROMPT: usize = 5;

/// Label for speakers we cannot attribute
const VIEWER_LABEL: &str = "Penonton";

/// Game titles recognized in conversation
const GAME_TITLES: &[&str] = &[
    "mobile legends",
    "free fire",
    "dota",
    "pubg",
    "valorant",
    "genshin",
    "minecraft",
    "roblox",
    "gta",
    "apex",
    "fifa",
    "efootball",
    "tekken",
    "honkai",
];

/// Words that signal the game is actually being played, not just mentioned
const PLAY_SIGNALS: &[&str] = &["main", "mabar", "push rank", "ranked", "tanding"];

/// One completed exchange
#[derive(Debug, Clone)]
pub struct Exchange {
    /// Speaker display name, if attributable
    pub speaker: Option<String>,

    /// What the user said (wake name already stripped)
    pub user_text: String,

    /// What the companion answered
    pub reply: String,

    /// When the exchange completed
    pub at: DateTime<Utc>,
}

/// Rolling conversation state for one session
#[derive(Debug)]
pub struct ConversationLog {
    exchanges: VecDeque<Exchange>,
    current_game: Option<String>,
    main_user: Option<String>,
}

impl ConversationLog {
    #[must_use]
    pub fn new(main_user: Option<String>) -> Self {
        Self {
            exchanges: VecDeque::with_capacity(HISTORY_KEEP),
            current_game: None,
            main_user,
        }
    }

    /// Scan incoming text for game context before the prompt is built
    pub fn observe(&mut self, text: &str) {
        let lowered = text.to_lowercase();

        if let Some(game) = GAME_TITLES.iter().find(|t| lowered.contains(*t)) {
            let signalled = PLAY_SIGNALS.iter().any(|s| lowered.contains(s));
            if signalled && self.current_game.as_deref() != Some(*game) {
                tracing::debug!(game = %game, "game context updated");
                self.current_game = Some((*game).to_string());
            }
        }
    }

    /// Record a completed exchange, evicting the oldest past the cap
    pub fn record(&mut self, speaker: Option<&str>, user_text: &str, reply: &str) {
        self.exchanges.push_back(Exchange {
            speaker: speaker.map(ToString::to_string),
            user_text: user_text.to_string(),
            reply: reply.to_string(),
            at: Utc::now(),
        });

        while self.exchanges.len() > HISTORY_KEEP {
            self.exchanges.pop_front();
        }
    }

    /// Assemble the chat prompt for one turn
    ///
    /// Layout: persona system prompt, speaker note when the main user is
    /// talking, game context, recent history, then the current line waiting
    /// for the companion's answer.
    #[must_use]
    pub fn build_prompt(
        &self,
        system_prompt: Option<&str>,
        persona_name: &str,
        speaker: Option<&str>,
        text: &str,
    ) -> String {
        let mut sections = Vec::new();

        if let Some(prompt) = system_prompt {
            sections.push(prompt.to_string());
        }

        let main_note = match (speaker, &self.main_user) {
            (Some(s), Some(m)) if s.eq_ignore_ascii_case(m) => Some(m),
            _ => None,
        };
        if let Some(name) = main_note {
            sections.push(format!(
                "Yang sedang bicara adalah {name}, Kakak yang kamu temani. \
                 Sapa dia dengan Kak."
            ));
        }

        if let Some(game) = &self.current_game {
            sections.push(format!("Konteks: lagi main {game}."));
        }

        if !self.exchanges.is_empty() {
            let start = self.exchanges.len().saturating_sub(HISTORY_PROMPT);
            let lines: Vec<String> = self
                .exchanges
                .iter()
                .skip(start)
                .map(|ex| {
                    let who = ex.speaker.as_deref().unwrap_or(VIEWER_LABEL);
                    format!("{who}: {}\n{persona_name}: {}", ex.user_text, ex.reply)
                })
                .collect();
            sections.push(format!("Percakapan terakhir:\n{}", lines.join("\n")));
        }

        let who = speaker.unwrap_or(VIEWER_LABEL);
        sections.push(format!("{who}: {text}\n{persona_name}:"));

        sections.join("\n\n")
    }

    /// What game the session believes is being played
    #[must_use]
    pub fn current_game(&self) -> Option<&str> {
        self.current_game.as_deref()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.exchanges.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.exchanges.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log_with_main_user() -> ConversationLog {
        ConversationLog::new(Some("Andi".to_string()))
    }

    #[test]
    fn prompt_orders_system_history_then_current_line() {
        let mut log = log_with_main_user();
        log.record(Some("Andi"), "apa kabar?", "Baik banget Kak!");

        let prompt = log.build_prompt(
            Some("Kamu adalah Sri."),
            "Sri",
            Some("Andi"),
            "lagi ngapain?",
        );

        let system_pos = prompt.find("Kamu adalah Sri.").unwrap();
        let history_pos = prompt.find("Percakapan terakhir:").unwrap();
        let current_pos = prompt.find("Andi: lagi ngapain?").unwrap();

        assert!(system_pos < history_pos);
        assert!(history_pos < current_pos);
        assert!(prompt.ends_with("Sri:"));
    }

    #[test]
    fn history_renders_only_the_most_recent_exchanges() {
        let mut log = log_with_main_user();
        for i in 0..7 {
            log.record(Some("Andi"), &format!("pertanyaan {i}"), &format!("jawaban {i}"));
        }

        let prompt = log.build_prompt(None, "Sri", Some("Andi"), "terakhir");

        assert!(!prompt.contains("pertanyaan 0"));
        assert!(!prompt.contains("pertanyaan 1"));
        for i in 2..7 {
            assert!(prompt.contains(&format!("pertanyaan {i}")));
        }
    }

    #[test]
    fn ring_keeps_at_most_ten_exchanges() {
        let mut log = log_with_main_user();
        for i in 0..13 {
            log.record(None, &format!("q{i}"), "a");
        }
        assert_eq!(log.len(), 10);
    }

    #[test]
    fn main_user_note_only_when_main_user_speaks() {
        let log = log_with_main_user();

        let main_prompt = log.build_prompt(None, "Sri", Some("andi"), "halo");
        assert!(main_prompt.contains("Kakak yang kamu temani"));

        let viewer_prompt = log.build_prompt(None, "Sri", None, "halo");
        assert!(!viewer_prompt.contains("Kakak yang kamu temani"));
        assert!(viewer_prompt.contains("Penonton: halo"));
    }

    #[test]
    fn game_context_requires_a_play_signal() {
        let mut log = log_with_main_user();

        log.observe("valorant itu susah ya");
        assert!(log.current_game().is_none());

        log.observe("kita main valorant yuk");
        assert_eq!(log.current_game(), Some("valorant"));

        let prompt = log.build_prompt(None, "Sri", None, "gimana tadi?");
        assert!(prompt.contains("lagi main valorant"));
    }

    #[test]
    fn game_context_switches_with_new_game() {
        let mut log = log_with_main_user();

        log.observe("mabar mobile legends dulu");
        assert_eq!(log.current_game(), Some("mobile legends"));

        log.observe("sekarang push rank valorant");
        assert_eq!(log.current_game(), Some("valorant"));
    }
}
