// thread.rs - Thread Context Aggregation
// Collects everything a threaded mention needs to be answered: the thread's
// messages in order, the distinct URLs mentioned anywhere in it, and the page
// text behind each of those URLs.

use async_trait::async_trait;
use log::{debug, info, warn};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::fetcher::Fetcher;
use crate::slack::SlackError;
use crate::urls::extract_urls;

/// One message of a thread as returned by the platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadMessage {
    pub ts: String,
    pub text: String,
}

#[async_trait]
pub trait ThreadHistory: Send + Sync {
    /// Full history of a thread, root message first.
    async fn thread_messages(
        &self,
        channel: &str,
        thread_ts: &str,
    ) -> Result<Vec<ThreadMessage>, SlackError>;
}

#[derive(Debug, Error)]
pub enum ThreadContextError {
    #[error("failed to get conversation replies: {0}")]
    History(#[from] SlackError),
    #[error("operation cancelled")]
    Cancelled,
}

/// Aggregate view of a thread. Built per mention and never shared.
#[derive(Debug, Clone, Default)]
pub struct ThreadContext {
    /// Raw message texts, oldest first
    pub messages: Vec<String>,
    /// Distinct URLs in first-seen order
    pub urls: Vec<String>,
    /// Page text (or a fetch error note) for every entry of `urls`
    pub url_contents: HashMap<String, String>,
    /// URLs whose entry in `url_contents` is an error note
    pub failed: HashSet<String>,
}

impl ThreadContext {
    /// Record messages and their URLs without fetching anything.
    pub fn from_messages<'a, I>(texts: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut context = ThreadContext::default();
        for text in texts {
            context.messages.push(text.to_string());
            for url in extract_urls(text) {
                if !context.urls.contains(&url) {
                    context.urls.push(url);
                }
            }
        }
        context
    }

    /// True when real page text is recorded for `url`. Error notes do not count.
    pub fn has_content_for(&self, url: &str) -> bool {
        self.url_contents.contains_key(url) && !self.failed.contains(url)
    }

    /// URL contents in the order the URLs first appeared.
    pub fn contents_in_order(&self) -> impl Iterator<Item = (&str, &str)> {
        self.urls.iter().filter_map(move |url| {
            self.url_contents
                .get(url)
                .map(|content| (url.as_str(), content.as_str()))
        })
    }
}

pub struct ThreadAggregator {
    history: Arc<dyn ThreadHistory>,
    fetcher: Arc<dyn Fetcher>,
}

impl ThreadAggregator {
    pub fn new(history: Arc<dyn ThreadHistory>, fetcher: Arc<dyn Fetcher>) -> Self {
        Self { history, fetcher }
    }

    /// Build the context for the thread rooted at `thread_ts`.
    ///
    /// `skip_ts` excludes one message (the bot's own status message) from the history.
    /// Only a failure to read the history is an error; each URL that cannot be
    /// fetched gets an error note as its content instead.
    pub async fn build(
        &self,
        channel: &str,
        thread_ts: &str,
        skip_ts: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<ThreadContext, ThreadContextError> {
        let history = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ThreadContextError::Cancelled),
            history = self.history.thread_messages(channel, thread_ts) => history?,
        };

        let mut context = ThreadContext::from_messages(
            history
                .iter()
                .filter(|message| Some(message.ts.as_str()) != skip_ts)
                .map(|message| message.text.as_str()),
        );
        debug!(
            "🧵 Thread {} has {} messages and {} distinct URLs",
            thread_ts,
            context.messages.len(),
            context.urls.len()
        );

        for url in context.urls.clone() {
            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ThreadContextError::Cancelled),
                fetched = self.fetcher.fetch(&url) => fetched,
            };
            let content = match fetched {
                Ok(content) => content,
                Err(e) => {
                    warn!("⚠️ Failed to fetch content for URL {} in thread context: {}", url, e);
                    context.failed.insert(url.clone());
                    format!("Error fetching content: {}", e)
                }
            };
            context.url_contents.insert(url, content);
        }

        info!(
            "✅ Thread context ready for {}: {} messages, {} URLs",
            thread_ts,
            context.messages.len(),
            context.url_contents.len()
        );
        Ok(context)
    }
}
