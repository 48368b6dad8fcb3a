//! Conversational reply backends

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{ChatModel, SharedLimiter};
use crate::{Error, Result};

const GEMINI_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const DEFAULT_MODEL: &str = "gemini-2.5-flash";

/// Replies stay short; the persona prompt asks for at most two sentences
const MAX_OUTPUT_TOKENS: u32 = 256;
const TEMPERATURE: f32 = 0.8;

/// Gemini generateContent request
#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

/// A turn in the request
#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'a str,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    max_output_tokens: u32,
    temperature: f32,
}

/// Gemini generateContent response
#[derive(Debug, Deserialize)]
struct GenerateResponse {
    candidates: Option<Vec<Candidate>>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    parts: Option<Vec<ResponsePart>>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

/// Pull the first candidate's text out of a response
fn extract_reply(response: GenerateResponse) -> Result<String> {
    let text = response
        .candidates
        .unwrap_or_default()
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .and_then(|c| c.parts)
        .map(|parts| {
            parts
                .into_iter()
                .filter_map(|p| p.text)
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

    let text = text.trim();
    if text.is_empty() {
        return Err(Error::Malformed(
            "no candidate text in chat reply".to_string(),
        ));
    }
    Ok(text.to_string())
}

/// Gemini chat backend with client-side request pacing
pub struct GeminiChat {
    client: reqwest::Client,
    api_key: String,
    model: String,
    limiter: SharedLimiter,
}

impl GeminiChat {
    /// Create a new Gemini chat client
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new(api_key: String, limiter: SharedLimiter) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config("Gemini API key required".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model: DEFAULT_MODEL.to_string(),
            limiter,
        })
    }

    /// Create with a specific model
    #[must_use]
    pub fn with_model(mut self, model: String) -> Self {
        self.model = model;
        self
    }
}

#[async_trait]
impl ChatModel for GeminiChat {
    async fn complete(&self, prompt: &str) -> Result<String> {
        // Client-side pacing keeps us under the provider's free-tier quota
        self.limiter.until_ready().await;

        let request = GenerateRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![Part { text: prompt }],
            }],
            generation_config: GenerationConfig {
                max_output_tokens: MAX_OUTPUT_TOKENS,
                temperature: TEMPERATURE,
            },
        };

        let url = format!(
            "{GEMINI_API_URL}/{}:generateContent?key={}",
            self.model, self.api_key
        );

        tracing::debug!(model = %self.model, prompt_chars = prompt.len(), "requesting chat reply");

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Gemini request failed");
                Error::BackendUnavailable(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Gemini API error");

            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                return Err(Error::RateLimited(format!("Gemini throttled: {body}")));
            }
            return Err(Error::BackendUnavailable(format!(
                "Gemini error {status}: {body}"
            )));
        }

        let result: GenerateResponse = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "failed to parse Gemini response");
            Error::Malformed(e.to_string())
        })?;

        let reply = extract_reply(result)?;
        tracing::info!(reply_chars = reply.len(), "chat reply received");
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_text_is_extracted_from_first_candidate() {
        let json = r#"{
            "candidates": [
                {"content": {"parts": [{"text": "Halo "}, {"text": "Kak!"}]}},
                {"content": {"parts": [{"text": "ignored"}]}}
            ]
        }"#;
        let response: GenerateResponse = serde_json::from_str(json).unwrap();
        assert_eq!(extract_reply(response).unwrap(), "Halo Kak!");
    }

    #[test]
    fn missing_candidates_is_malformed() {
        let response: GenerateResponse = serde_json::from_str("{}").unwrap();
        assert!(matches!(
            extract_reply(response),
            Err(Error::Malformed(_))
        ));
    }

    #[test]
    fn whitespace_only_reply_is_malformed() {
        let json = r#"{"candidates": [{"content": {"parts": [{"text": "   "}]}}]}"#;
        let response: GenerateResponse = serde_json::from_str(json).unwrap();
        assert!(matches!(
            extract_reply(response),
            Err(Error::Malformed(_))
        ));
    }

    #[test]
    fn empty_api_key_is_rejected() {
        let limiter = super::super::create_limiter(8);
        assert!(GeminiChat::new(String::new(), limiter).is_err());
    }
}
