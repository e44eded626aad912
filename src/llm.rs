// llm.rs - Language Model Integration
// Summarizer capability plus an OpenAI-compatible chat completion backend.
// Two prompt styles exist: "summary" for a single fetched page and "thread"
// for answering a question against an aggregated conversation.

use async_trait::async_trait;
use log::{debug, error, info, trace};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("chat completion request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("chat completion returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("could not decode chat completion response: {0}")]
    Decode(String),
    #[error("model returned an empty response")]
    EmptyResponse,
}

/// Prompt construction strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Summary,
    Thread,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Summary => "summary",
            Mode::Thread => "thread",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Summarize `content`, answering `user_prompt` first when it is non-empty.
    async fn process_content(&self, content: &str, user_prompt: &str) -> Result<String, LlmError> {
        self.process_content_with_mode(content, user_prompt, Mode::Summary)
            .await
    }

    async fn process_content_with_mode(
        &self,
        content: &str,
        user_prompt: &str,
        mode: Mode,
    ) -> Result<String, LlmError>;
}

// Chat message structure for the completion API
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

const SUMMARY_SYSTEM_PROMPT: &str = "You are an expert summarizer. Analyze the provided web page content and generate a concise summary based on the user's request.

Output Format:
(If the user asked a question, answer it here based *only* on the provided text. If the text doesn't contain the answer, state that clearly. If no question was asked, omit this section.)

:white_check_mark: Three-line summary
- Bullet point 1
- Bullet point 2
- Bullet point 3

:memo: Details
*Key point header 1*
Explanation of this point

*Key point header 2*
Explanation of this point

(Add as many key points as the content warrants)";

const THREAD_SYSTEM_PROMPT: &str = "You are an assistant taking part in a conversation thread. Analyze the provided context and respond naturally to the user's latest question. Give clear, helpful answers grounded in the information available.";

/// Build the system and user messages for one completion request.
pub fn build_messages(content: &str, user_prompt: &str, mode: Mode) -> Vec<ChatMessage> {
    let user_prompt = user_prompt.trim();
    let (system_prompt, instructions) = match mode {
        Mode::Thread => {
            let instructions = if user_prompt.is_empty() {
                "Please provide a helpful response based on the provided context.".to_string()
            } else {
                format!(
                    "Based on the provided context, answer the following question: {}\n\nIf the context does not contain enough information to answer, say so clearly.",
                    user_prompt
                )
            };
            (THREAD_SYSTEM_PROMPT, instructions)
        }
        Mode::Summary => {
            let instructions = if user_prompt.is_empty() {
                "Instructions: Provide the three-line summary and the detailed explanation described in the system prompt.".to_string()
            } else {
                format!(
                    "User Question: {}\n\nInstructions: First, answer the user's question based *only* on the provided content. If the content does not contain the answer, say 'This page does not contain that information.' Then provide the three-line summary and the detailed explanation described in the system prompt.",
                    user_prompt
                )
            };
            (SUMMARY_SYSTEM_PROMPT, instructions)
        }
    };

    vec![
        ChatMessage {
            role: "system".to_string(),
            content: system_prompt.to_string(),
        },
        ChatMessage {
            role: "user".to_string(),
            content: format!("Content:\n```\n{}\n```\n\n{}", content, instructions),
        },
    ]
}

static THINK_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<think>.*?</think>").expect("think pattern is valid"));

/// Remove reasoning blocks some models emit before their answer.
pub fn strip_think_sections(text: &str) -> String {
    THINK_REGEX.replace_all(text, "").trim().to_string()
}

/// OpenAI-compatible chat completion client
pub struct OpenAiSummarizer {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiSummarizer {
    pub fn new(
        base_url: &str,
        api_key: &str,
        model: &str,
        timeout: Duration,
    ) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl Summarizer for OpenAiSummarizer {
    async fn process_content_with_mode(
        &self,
        content: &str,
        user_prompt: &str,
        mode: Mode,
    ) -> Result<String, LlmError> {
        let messages = build_messages(content, user_prompt, mode);
        trace!("[LLM] mode={} messages={} content_len={}", mode, messages.len(), content.len());

        let request = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "stream": false,
        });

        let api_url = format!("{}/v1/chat/completions", self.base_url);
        let start = std::time::Instant::now();
        debug!("🤖 Sending {} request to {} (model {})", mode, api_url, self.model);

        let response = self
            .client
            .post(&api_url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            error!("❌ Chat completion failed with HTTP {}", status);
            return Err(LlmError::Status {
                status: status.as_u16(),
                body: body.chars().take(500).collect(),
            });
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LlmError::Decode(e.to_string()))?;

        let content = response_json["choices"]
            .get(0)
            .and_then(|choice| choice["message"]["content"].as_str())
            .map(strip_think_sections)
            .unwrap_or_default();

        if content.is_empty() {
            return Err(LlmError::EmptyResponse);
        }

        info!(
            "✅ {} completion finished in {:.2}s ({} characters)",
            mode,
            start.elapsed().as_secs_f64(),
            content.len()
        );
        Ok(content)
    }
}
