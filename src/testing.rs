// testing.rs - Test Doubles
// Recording implementations of the collaborator traits, shared by the unit
// tests of the thread, progress, dispatcher and ingress modules.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use crate::fetcher::{FetchError, Fetcher};
use crate::llm::{LlmError, Mode, Summarizer};
use crate::progress::{MessageHandle, ProgressReporter};
use crate::slack::SlackError;
use crate::thread::{ThreadHistory, ThreadMessage};

/// Timestamp given to every status message the mock reporter posts
pub const STATUS_TS: &str = "900.1";

#[derive(Default)]
pub struct MockFetcher {
    calls: Mutex<Vec<String>>,
    failing: HashSet<String>,
    failing_once: HashSet<String>,
    empty: HashSet<String>,
    hanging: HashSet<String>,
}

impl MockFetcher {
    pub fn failing_on(urls: &[&str]) -> Self {
        Self {
            failing: urls.iter().map(|u| u.to_string()).collect(),
            ..Default::default()
        }
    }

    /// Fails the first fetch of each URL, succeeds afterwards
    pub fn failing_once_on(urls: &[&str]) -> Self {
        Self {
            failing_once: urls.iter().map(|u| u.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn empty_on(urls: &[&str]) -> Self {
        Self {
            empty: urls.iter().map(|u| u.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn hanging_on(urls: &[&str]) -> Self {
        Self {
            hanging: urls.iter().map(|u| u.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let attempts = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(url.to_string());
            calls.iter().filter(|called| called.as_str() == url).count()
        };
        if self.hanging.contains(url) {
            std::future::pending::<()>().await;
        }
        if self.failing.contains(url) || (self.failing_once.contains(url) && attempts == 1) {
            return Err(FetchError::Status(500));
        }
        if self.empty.contains(url) {
            return Ok(String::new());
        }
        Ok(format!("content of {}", url))
    }
}

#[derive(Default)]
pub struct MockSummarizer {
    calls: Mutex<Vec<(String, String, Mode)>>,
    fail: bool,
}

impl MockSummarizer {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    /// (content, user prompt, mode) of every call
    pub fn calls(&self) -> Vec<(String, String, Mode)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Summarizer for MockSummarizer {
    async fn process_content_with_mode(
        &self,
        content: &str,
        user_prompt: &str,
        mode: Mode,
    ) -> Result<String, LlmError> {
        self.calls
            .lock()
            .unwrap()
            .push((content.to_string(), user_prompt.to_string(), mode));
        if self.fail {
            return Err(LlmError::EmptyResponse);
        }
        Ok(format!("[{}] {}", mode, content))
    }
}

#[derive(Default)]
pub struct MockReporter {
    posts: Mutex<Vec<(String, String, String)>>,
    updates: Mutex<Vec<(MessageHandle, String)>>,
    fail_posts: bool,
    fail_updates: bool,
    update_delay: Option<Duration>,
}

impl MockReporter {
    pub fn failing_posts() -> Self {
        Self {
            fail_posts: true,
            ..Default::default()
        }
    }

    pub fn failing_updates() -> Self {
        Self {
            fail_updates: true,
            ..Default::default()
        }
    }

    /// Every update takes `delay` before it lands, like a real API round trip
    pub fn slow_updates(delay: Duration) -> Self {
        Self {
            update_delay: Some(delay),
            ..Default::default()
        }
    }

    /// (channel, anchor ts, text) of every post
    pub fn posts(&self) -> Vec<(String, String, String)> {
        self.posts.lock().unwrap().clone()
    }

    pub fn updates(&self) -> Vec<(MessageHandle, String)> {
        self.updates.lock().unwrap().clone()
    }

    pub fn update_texts(&self) -> Vec<String> {
        self.updates().into_iter().map(|(_, text)| text).collect()
    }

    /// What the user currently sees in the status message
    pub fn last_text(&self) -> Option<String> {
        self.updates
            .lock()
            .unwrap()
            .last()
            .map(|(_, text)| text.clone())
            .or_else(|| self.posts.lock().unwrap().last().map(|(_, _, text)| text.clone()))
    }
}

#[async_trait]
impl ProgressReporter for MockReporter {
    async fn post(
        &self,
        channel: &str,
        anchor_ts: &str,
        text: &str,
    ) -> Result<MessageHandle, SlackError> {
        if self.fail_posts {
            return Err(SlackError::Api {
                method: "chat.postMessage",
                error: "channel_not_found".to_string(),
            });
        }
        self.posts
            .lock()
            .unwrap()
            .push((channel.to_string(), anchor_ts.to_string(), text.to_string()));
        Ok(MessageHandle {
            channel: channel.to_string(),
            ts: STATUS_TS.to_string(),
        })
    }

    async fn update(&self, handle: &MessageHandle, text: &str) -> Result<(), SlackError> {
        if let Some(delay) = self.update_delay {
            tokio::time::sleep(delay).await;
        }
        self.updates
            .lock()
            .unwrap()
            .push((handle.clone(), text.to_string()));
        if self.fail_updates {
            return Err(SlackError::Api {
                method: "chat.update",
                error: "message_not_found".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MockHistory {
    messages: Vec<ThreadMessage>,
    fail: bool,
    calls: Mutex<Vec<(String, String)>>,
}

impl MockHistory {
    pub fn with_messages(messages: &[(&str, &str)]) -> Self {
        Self {
            messages: messages
                .iter()
                .map(|(ts, text)| ThreadMessage {
                    ts: ts.to_string(),
                    text: text.to_string(),
                })
                .collect(),
            ..Default::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ThreadHistory for MockHistory {
    async fn thread_messages(
        &self,
        channel: &str,
        thread_ts: &str,
    ) -> Result<Vec<ThreadMessage>, SlackError> {
        self.calls
            .lock()
            .unwrap()
            .push((channel.to_string(), thread_ts.to_string()));
        if self.fail {
            return Err(SlackError::Api {
                method: "conversations.replies",
                error: "thread_not_found".to_string(),
            });
        }
        Ok(self.messages.clone())
    }
}
