// slack.rs - Slack Web API Client
// Thin bearer-token client for the three Web API methods the bot needs:
// chat.postMessage to open a status message, chat.update to edit it in place,
// and conversations.replies to read a thread's history. One client is built at
// startup and shared by every mention task.

use async_trait::async_trait;
use log::{debug, warn};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

use crate::progress::{MessageHandle, ProgressReporter};
use crate::thread::{ThreadHistory, ThreadMessage};

pub const DEFAULT_API_BASE: &str = "https://slack.com/api";

/// Slack rejects message text above 40k characters
pub const MAX_MESSAGE_CHARS: usize = 39_000;
const TRUNCATION_MARKER: &str = "\n\n… (message truncated)";

#[derive(Debug, Error)]
pub enum SlackError {
    #[error("slack request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("slack {method} failed: {error}")]
    Api { method: &'static str, error: String },
    #[error("slack {method} response missing {field}")]
    MissingField {
        method: &'static str,
        field: &'static str,
    },
}

#[derive(Debug, Deserialize)]
struct ChatMessageResponse {
    ok: bool,
    error: Option<String>,
    channel: Option<String>,
    ts: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RepliesResponse {
    ok: bool,
    error: Option<String>,
    #[serde(default)]
    messages: Vec<RepliesMessage>,
    response_metadata: Option<ResponseMetadata>,
}

#[derive(Debug, Deserialize)]
struct RepliesMessage {
    #[serde(default)]
    ts: String,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct ResponseMetadata {
    #[serde(default)]
    next_cursor: String,
}

pub struct SlackClient {
    http: reqwest::Client,
    api_base: String,
    bot_token: String,
}

impl SlackClient {
    pub fn new(api_base: &str, bot_token: &str) -> Result<Self, SlackError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            bot_token: bot_token.to_string(),
        })
    }

    pub async fn post_message(
        &self,
        channel: &str,
        text: &str,
        thread_ts: Option<&str>,
    ) -> Result<MessageHandle, SlackError> {
        let mut payload = json!({
            "channel": channel,
            "text": truncate_for_slack(text),
        });
        if let Some(thread_ts) = thread_ts {
            payload["thread_ts"] = json!(thread_ts);
        }

        let response: ChatMessageResponse = self
            .http
            .post(format!("{}/chat.postMessage", self.api_base))
            .bearer_auth(&self.bot_token)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if !response.ok {
            return Err(SlackError::Api {
                method: "chat.postMessage",
                error: response.error.unwrap_or_else(|| "unknown error".to_string()),
            });
        }

        let ts = response.ts.ok_or(SlackError::MissingField {
            method: "chat.postMessage",
            field: "ts",
        })?;
        debug!("📨 Posted message {} in {}", ts, channel);

        Ok(MessageHandle {
            channel: response.channel.unwrap_or_else(|| channel.to_string()),
            ts,
        })
    }

    pub async fn update_message(&self, handle: &MessageHandle, text: &str) -> Result<(), SlackError> {
        let payload = json!({
            "channel": handle.channel,
            "ts": handle.ts,
            "text": truncate_for_slack(text),
        });

        let response: ChatMessageResponse = self
            .http
            .post(format!("{}/chat.update", self.api_base))
            .bearer_auth(&self.bot_token)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if !response.ok {
            return Err(SlackError::Api {
                method: "chat.update",
                error: response.error.unwrap_or_else(|| "unknown error".to_string()),
            });
        }
        Ok(())
    }

    /// Every message of a thread, root included, oldest first. Follows pagination cursors.
    pub async fn conversation_replies(
        &self,
        channel: &str,
        thread_ts: &str,
    ) -> Result<Vec<ThreadMessage>, SlackError> {
        let mut messages = Vec::new();
        let mut cursor = String::new();

        loop {
            let mut query = vec![
                ("channel", channel),
                ("ts", thread_ts),
                ("inclusive", "true"),
                ("limit", "200"),
            ];
            if !cursor.is_empty() {
                query.push(("cursor", cursor.as_str()));
            }

            let response: RepliesResponse = self
                .http
                .get(format!("{}/conversations.replies", self.api_base))
                .bearer_auth(&self.bot_token)
                .query(&query)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;

            if !response.ok {
                return Err(SlackError::Api {
                    method: "conversations.replies",
                    error: response.error.unwrap_or_else(|| "unknown error".to_string()),
                });
            }

            messages.extend(response.messages.into_iter().map(|m| ThreadMessage {
                ts: m.ts,
                text: m.text,
            }));

            match response.response_metadata {
                Some(meta) if !meta.next_cursor.is_empty() => cursor = meta.next_cursor,
                _ => break,
            }
        }

        debug!("🧵 Read {} messages from thread {} in {}", messages.len(), thread_ts, channel);
        Ok(messages)
    }
}

#[async_trait]
impl ProgressReporter for SlackClient {
    async fn post(
        &self,
        channel: &str,
        anchor_ts: &str,
        text: &str,
    ) -> Result<MessageHandle, SlackError> {
        self.post_message(channel, text, Some(anchor_ts)).await
    }

    async fn update(&self, handle: &MessageHandle, text: &str) -> Result<(), SlackError> {
        self.update_message(handle, text).await
    }
}

#[async_trait]
impl ThreadHistory for SlackClient {
    async fn thread_messages(
        &self,
        channel: &str,
        thread_ts: &str,
    ) -> Result<Vec<ThreadMessage>, SlackError> {
        self.conversation_replies(channel, thread_ts).await
    }
}

/// Cut text down to what a single Slack message can hold.
pub fn truncate_for_slack(text: &str) -> String {
    if text.chars().count() <= MAX_MESSAGE_CHARS {
        return text.to_string();
    }
    warn!("✂️ Message of {} characters truncated for Slack", text.chars().count());
    let keep = MAX_MESSAGE_CHARS - TRUNCATION_MARKER.chars().count();
    let mut truncated: String = text.chars().take(keep).collect();
    truncated.push_str(TRUNCATION_MARKER);
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    #[test]
    fn test_truncate_for_slack() {
        assert_eq!(truncate_for_slack("short"), "short");

        let long = "a".repeat(MAX_MESSAGE_CHARS + 10);
        let truncated = truncate_for_slack(&long);
        assert_eq!(truncated.chars().count(), MAX_MESSAGE_CHARS);
        assert!(truncated.ends_with("(message truncated)"));
    }

    #[tokio::test]
    async fn test_post_message_in_thread() {
        let server = MockServer::start_async().await;
        let post = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/chat.postMessage")
                    .header("authorization", "Bearer xoxb-test")
                    .json_body(json!({ "channel": "C1", "text": ":loading:", "thread_ts": "111.222" }));
                then.status(200)
                    .json_body(json!({ "ok": true, "channel": "C1", "ts": "333.444" }));
            })
            .await;

        let client = SlackClient::new(&server.base_url(), "xoxb-test").unwrap();
        let handle = client.post("C1", "111.222", ":loading:").await.unwrap();

        post.assert_async().await;
        assert_eq!(handle, MessageHandle { channel: "C1".to_string(), ts: "333.444".to_string() });
    }

    #[tokio::test]
    async fn test_update_message_api_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/chat.update")
                    .json_body(json!({ "channel": "C1", "ts": "1.2", "text": "done" }));
                then.status(200)
                    .json_body(json!({ "ok": false, "error": "message_not_found" }));
            })
            .await;

        let client = SlackClient::new(&server.base_url(), "xoxb-test").unwrap();
        let handle = MessageHandle { channel: "C1".to_string(), ts: "1.2".to_string() };
        let err = client.update(&handle, "done").await.unwrap_err();

        match err {
            SlackError::Api { method, error } => {
                assert_eq!(method, "chat.update");
                assert_eq!(error, "message_not_found");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_conversation_replies_follows_cursor() {
        let server = MockServer::start_async().await;
        let second = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/conversations.replies")
                    .query_param("cursor", "page2");
                then.status(200).json_body(json!({
                    "ok": true,
                    "messages": [{ "ts": "100.3", "text": "second reply" }],
                    "has_more": false,
                    "response_metadata": { "next_cursor": "" }
                }));
            })
            .await;

        let first = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/conversations.replies")
                    .query_param("channel", "C1")
                    .query_param("ts", "100.1")
                    .query_param("inclusive", "true")
                    .matches(|req| {
                        req.query_params
                            .as_ref()
                            .map_or(true, |params| params.iter().all(|(key, _)| key != "cursor"))
                    });
                then.status(200).json_body(json!({
                    "ok": true,
                    "messages": [
                        { "ts": "100.1", "text": "root https://example.com/a" },
                        { "ts": "100.2", "text": "first reply" }
                    ],
                    "has_more": true,
                    "response_metadata": { "next_cursor": "page2" }
                }));
            })
            .await;
        let client = SlackClient::new(&server.base_url(), "xoxb-test").unwrap();
        let messages = client.thread_messages("C1", "100.1").await.unwrap();

        first.assert_async().await;
        second.assert_async().await;
        let texts: Vec<&str> = messages.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["root https://example.com/a", "first reply", "second reply"]);
        assert_eq!(messages[2].ts, "100.3");
    }

    #[tokio::test]
    async fn test_conversation_replies_api_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/conversations.replies");
                then.status(200).json_body(json!({ "ok": false, "error": "thread_not_found" }));
            })
            .await;

        let client = SlackClient::new(&server.base_url(), "xoxb-test").unwrap();
        let err = client.thread_messages("C1", "1.1").await.unwrap_err();
        assert!(err.to_string().contains("thread_not_found"));
    }
}
