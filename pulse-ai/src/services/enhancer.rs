//! Narrative enhancement providers
//!
//! An enhancer rewrites a template narrative into smoother broadcast prose.
//! It must not add or drop facts; the narrative generator verifies that with
//! `fidelity::verify` and keeps the template otherwise.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Fixed latency of the local enhancer
pub const MOCK_ENHANCE_LATENCY: Duration = Duration::from_millis(120);

const SYSTEM_PROMPT: &str = "You are a sports broadcaster. Rewrite the recap so it flows \
naturally when read aloud. Keep every name, number and score exactly as written. Do not add \
facts. Reply with the rewritten recap only.";

#[derive(Debug, Error)]
pub enum EnhanceError {
    #[error("enhancer HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("enhancer returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("enhancer returned no text")]
    Empty,

    #[error("invalid enhancer credentials: {0}")]
    Credentials(String),
}

/// Capability: rewrite narrative text
#[async_trait]
pub trait Enhancer: Send + Sync {
    fn name(&self) -> &'static str;

    async fn enhance(&self, text: &str) -> Result<String, EnhanceError>;
}

// ============================================================================
// Local enhancer
// ============================================================================

/// Lower-case words that may open a joined clause
const JOINABLE_OPENERS: &[&str] = &["The", "Their", "They", "That's", "That"];

/// Deterministic connective rewrite
///
/// Opens with an exclamation and folds a sentence that starts with a joinable
/// word into the previous declarative sentence. Only connectives and casing of
/// non-entity words change, so the rewrite is always faithful.
pub struct MockEnhancer {
    latency: Duration,
}

impl MockEnhancer {
    pub fn new() -> Self {
        Self {
            latency: MOCK_ENHANCE_LATENCY,
        }
    }

    pub fn with_latency(latency: Duration) -> Self {
        Self { latency }
    }
}

impl Default for MockEnhancer {
    fn default() -> Self {
        Self::new()
    }
}

/// Split after `.`, `!` or `?` followed by whitespace
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let bytes = text.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        let at_boundary = matches!(b, b'.' | b'!' | b'?')
            && bytes.get(i + 1).map_or(true, |next| next.is_ascii_whitespace());
        if at_boundary {
            let sentence = text[start..=i].trim();
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
            start = i + 1;
        }
    }
    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}

fn lowercase_first_word(sentence: &str) -> String {
    let mut chars = sentence.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// The rewrite the mock enhancer performs, exposed for tests
pub fn connective_rewrite(text: &str) -> String {
    let mut joined: Vec<String> = Vec::new();

    for sentence in split_sentences(text) {
        let opener = sentence.split_whitespace().next().unwrap_or_default();
        let joinable = JOINABLE_OPENERS.contains(&opener);
        match joined.last_mut() {
            Some(previous) if joinable && previous.ends_with('.') => {
                previous.pop();
                previous.push_str(", and ");
                previous.push_str(&lowercase_first_word(sentence));
            }
            _ => joined.push(sentence.to_string()),
        }
    }

    if joined.is_empty() {
        return String::new();
    }
    format!("And there it is! {}", joined.join(" "))
}

#[async_trait]
impl Enhancer for MockEnhancer {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn enhance(&self, text: &str) -> Result<String, EnhanceError> {
        tokio::time::sleep(self.latency).await;
        let rewritten = connective_rewrite(text);
        if rewritten.is_empty() {
            return Err(EnhanceError::Empty);
        }
        Ok(rewritten)
    }
}

// ============================================================================
// Chat-completions enhancer
// ============================================================================

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    max_tokens: usize,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    content: Option<String>,
}

/// OpenAI-compatible chat-completions client
pub struct OpenAiEnhancer {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl OpenAiEnhancer {
    /// `base_url` is the API root, e.g. `https://api.openai.com/v1`
    pub fn new(base_url: &str, api_key: String, model: String) -> Result<Self, EnhanceError> {
        let client = Client::builder()
            .user_agent(concat!("pulse-ai/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key,
            model,
        })
    }
}

#[async_trait]
impl Enhancer for OpenAiEnhancer {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn enhance(&self, text: &str) -> Result<String, EnhanceError> {
        let mut headers = HeaderMap::new();
        let auth = format!("Bearer {}", self.api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth).map_err(|e| EnhanceError::Credentials(e.to_string()))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let body = ChatRequest {
            model: &self.model,
            temperature: 0.3,
            max_tokens: 200,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: text,
                },
            ],
        };

        let resp = self
            .client
            .post(&self.endpoint)
            .headers(headers)
            .json(&body)
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(EnhanceError::Status { status, body });
        }

        let parsed: ChatResponse = resp.json().await?;
        let answer = parsed
            .choices
            .into_iter()
            .find_map(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or(EnhanceError::Empty)?;

        debug!(model = %self.model, chars = answer.len(), "Enhancer responded");
        Ok(answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::fidelity;

    #[test]
    fn test_split_sentences() {
        assert_eq!(
            split_sentences("One 1:47 left. Two! Three? tail"),
            vec!["One 1:47 left.", "Two!", "Three?", "tail"]
        );
    }

    #[test]
    fn test_connective_rewrite_joins_declaratives() {
        let rewritten = connective_rewrite(
            "Kenneth Walker III finds the end zone! The score is now Seahawks 21, Texans 17. \
             The Seahawks rank 2nd of 32 in touchdowns this season.",
        );
        assert_eq!(
            rewritten,
            "And there it is! Kenneth Walker III finds the end zone! The score is now Seahawks 21, \
             Texans 17, and the Seahawks rank 2nd of 32 in touchdowns this season."
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_mock_enhancer_is_faithful() {
        let template = "In the 4th quarter, 1:47 remaining. Devon Witherspoon picks it off! \
                        The score is now Seahawks 24, Texans 21. That's 2 straight scores.";
        let enhanced = MockEnhancer::new().enhance(template).await.unwrap();
        assert_ne!(enhanced, template);
        assert!(fidelity::verify(template, &enhanced).is_faithful());
    }

    #[tokio::test(start_paused = true)]
    async fn test_mock_enhancer_rejects_empty_text() {
        assert!(matches!(
            MockEnhancer::new().enhance("   ").await,
            Err(EnhanceError::Empty)
        ));
    }
}
