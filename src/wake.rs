//! Wake-name gating
//!
//! Decides whether a transcript addresses the companion. Matching is
//! whole-token only: "sriracha" never matches "sri", no matter how the
//! transcription mangles surrounding words.

use std::sync::LazyLock;

use regex::Regex;

/// Word tokens: runs of letters, digits and apostrophes
static TOKEN_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\p{L}\p{N}']+").expect("valid regex"));

/// Punctuation trimmed between the wake name and the content
const LEADING_TRIM: [char; 7] = [',', '.', '!', '?', ';', ':', '-'];

/// How a source decides whether speech addresses the companion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakePolicy {
    /// A wake name must appear as a whole token
    Gated,
    /// Every non-empty transcript is addressed (push-to-talk sources)
    Always,
}

/// Outcome of evaluating one transcript
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WakeDecision {
    /// Whether the companion should answer
    pub addressed: bool,

    /// Which wake-name variant matched, lowercased
    pub matched_variant: Option<String>,

    /// Text after the matched name, leading punctuation trimmed
    pub stripped_text: String,
}

impl WakeDecision {
    fn not_addressed() -> Self {
        Self {
            addressed: false,
            matched_variant: None,
            stripped_text: String::new(),
        }
    }
}

/// Detects the companion's name in transcripts
#[derive(Debug, Clone)]
pub struct WakeGate {
    names: Vec<String>,
    policy: WakePolicy,
}

impl WakeGate {
    /// Build a gate over the persona's wake names (canonical plus the
    /// mishearing variants STT tends to produce)
    #[must_use]
    pub fn new(names: &[String], policy: WakePolicy) -> Self {
        let names = names.iter().map(|n| n.to_lowercase()).collect();
        Self { names, policy }
    }

    /// Evaluate one transcript
    ///
    /// Pure text work, no state. The leftmost whole-token occurrence of any
    /// variant wins; everything through it is stripped. A name with nothing
    /// after it is acknowledged but not addressed.
    #[must_use]
    pub fn evaluate(&self, text: &str) -> WakeDecision {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return WakeDecision::not_addressed();
        }

        if self.policy == WakePolicy::Always {
            return WakeDecision {
                addressed: true,
                matched_variant: None,
                stripped_text: trimmed.to_string(),
            };
        }

        for token in TOKEN_REGEX.find_iter(trimmed) {
            let lowered = token.as_str().to_lowercase();
            if !self.names.contains(&lowered) {
                continue;
            }

            let remainder = trimmed[token.end()..]
                .trim_start_matches(|c: char| c.is_whitespace() || LEADING_TRIM.contains(&c))
                .trim_end();

            return WakeDecision {
                addressed: !remainder.is_empty(),
                matched_variant: Some(lowered),
                stripped_text: remainder.to_string(),
            };
        }

        WakeDecision::not_addressed()
    }
}
