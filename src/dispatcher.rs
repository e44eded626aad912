// dispatcher.rs - Mention Processing Pipeline
// Drives a single mention from classification to its final status message.
//
// New mentions: every URL in the message is fetched and summarized in turn. A
// URL that cannot be fetched only costs its own section of the report.
//
// Threaded mentions: the whole thread is aggregated into one prompt (history,
// every known page, pages new to the latest mention, the question) and answered
// in "thread" mode. Any fetch failure there fails the whole mention.
//
// Steps run strictly one after another. Every fetch, summarize and history call
// is raced against the mention's cancellation token.

use log::{debug, error, info, warn};
use std::fmt::Write as _;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::events::Mention;
use crate::fetcher::{FetchError, Fetcher};
use crate::llm::{LlmError, Mode, Summarizer};
use crate::progress::{ProcessingSession, ProgressReporter};
use crate::slack::SlackError;
use crate::thread::{ThreadAggregator, ThreadContext, ThreadContextError, ThreadHistory};
use crate::urls::{extract_urls, mention_prompt};

pub const NO_URLS_MESSAGE: &str =
    "No URLs found in your message. Please include a URL for me to summarize.";
pub const NO_SUMMARIES_MESSAGE: &str = "No summaries could be generated.";
pub const SECTION_SEPARATOR: &str = "\n\n---\n\n";

#[derive(Debug, Error)]
pub enum MentionError {
    #[error("failed to fetch content from {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: FetchError,
    },
    #[error("failed to process content for {target}: {source}")]
    Summarize {
        target: String,
        #[source]
        source: LlmError,
    },
    #[error("{0}")]
    ThreadContext(ThreadContextError),
    #[error("failed to create status message: {0}")]
    Progress(#[from] SlackError),
    #[error("operation cancelled")]
    Cancelled,
}

impl From<ThreadContextError> for MentionError {
    fn from(err: ThreadContextError) -> Self {
        match err {
            ThreadContextError::Cancelled => MentionError::Cancelled,
            other => MentionError::ThreadContext(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MentionKind {
    New,
    Threaded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MentionState {
    Received,
    Classified(MentionKind),
    Fetching,
    Summarizing,
    Completed,
    Failed,
}

/// A mention carrying a thread root timestamp is part of a thread.
pub fn classify(mention: &Mention) -> MentionKind {
    match mention.thread_ts.as_deref() {
        Some(ts) if !ts.is_empty() => MentionKind::Threaded,
        _ => MentionKind::New,
    }
}

struct StateTracker {
    id: Uuid,
    state: MentionState,
}

impl StateTracker {
    fn enter(&mut self, next: MentionState) {
        debug!("[{}] 🔁 {:?} -> {:?}", self.id, self.state, next);
        self.state = next;
    }
}

/// Fetch one URL, treating empty content as a failure.
pub async fn fetch_content(
    fetcher: &dyn Fetcher,
    url: &str,
    cancel: &CancellationToken,
) -> Result<String, MentionError> {
    let fetched = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(MentionError::Cancelled),
        fetched = fetcher.fetch(url) => fetched,
    };

    match fetched {
        Ok(content) if content.trim().is_empty() => Err(MentionError::Fetch {
            url: url.to_string(),
            source: FetchError::EmptyContent,
        }),
        Ok(content) => Ok(content),
        Err(source) => Err(MentionError::Fetch {
            url: url.to_string(),
            source,
        }),
    }
}

pub async fn summarize_content(
    summarizer: &dyn Summarizer,
    content: &str,
    user_prompt: &str,
    mode: Mode,
    target: &str,
    cancel: &CancellationToken,
) -> Result<String, MentionError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(MentionError::Cancelled),
        result = summarizer.process_content_with_mode(content, user_prompt, mode) => {
            result.map_err(|source| MentionError::Summarize { target: target.to_string(), source })
        }
    }
}

/// Fetch a single page and summarize it. Used by the one-shot command line mode.
pub async fn summarize_url(
    fetcher: &dyn Fetcher,
    summarizer: &dyn Summarizer,
    url: &str,
    user_prompt: &str,
    cancel: &CancellationToken,
) -> Result<String, MentionError> {
    let content = fetch_content(fetcher, url, cancel).await?;
    summarize_content(summarizer, &content, user_prompt, Mode::Summary, url, cancel).await
}

/// Composite prompt for a threaded mention.
pub fn build_thread_prompt(
    context: &ThreadContext,
    latest_text: &str,
    latest_contents: &[(String, String)],
) -> String {
    let mut prompt = String::new();
    prompt.push_str("---\n");
    prompt.push_str("Thread conversation history and URL contents:\n\n");
    for (i, message) in context.messages.iter().enumerate() {
        let _ = writeln!(prompt, "Message {}: {}", i + 1, message);
    }
    for (url, content) in context.contents_in_order() {
        let _ = write!(prompt, "\nURL: {}\nContent:\n```\n{}\n```\n", url, content);
    }
    prompt.push_str("---\n");

    if !latest_contents.is_empty() {
        prompt.push_str("Latest mention URL contents:\n");
        for (url, content) in latest_contents {
            let _ = write!(prompt, "\nURL: {}\nContent:\n```\n{}\n```\n", url, content);
        }
        prompt.push_str("---\n");
    }

    let _ = writeln!(prompt, "Last user question: {}", latest_text);
    prompt
}

pub struct MentionDispatcher {
    fetcher: Arc<dyn Fetcher>,
    summarizer: Arc<dyn Summarizer>,
    reporter: Arc<dyn ProgressReporter>,
    aggregator: ThreadAggregator,
}

impl MentionDispatcher {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        summarizer: Arc<dyn Summarizer>,
        reporter: Arc<dyn ProgressReporter>,
        history: Arc<dyn ThreadHistory>,
    ) -> Self {
        let aggregator = ThreadAggregator::new(history, fetcher.clone());
        Self {
            fetcher,
            summarizer,
            reporter,
            aggregator,
        }
    }

    /// Process one mention to its terminal state.
    pub async fn handle(&self, mention: &Mention, cancel: &CancellationToken) -> MentionState {
        let start = std::time::Instant::now();
        info!(
            "📨 Mention received from user {} in channel {}: {}",
            mention.user, mention.channel, mention.text
        );

        let kind = classify(mention);
        let anchor = match kind {
            MentionKind::New => mention.ts.as_str(),
            MentionKind::Threaded => mention.thread_ts.as_deref().unwrap_or(&mention.ts),
        };

        let session =
            match ProcessingSession::start(self.reporter.clone(), &mention.channel, anchor).await {
                Ok(session) => session,
                Err(e) => {
                    error!("❌ {:?} mention in {} failed: {}", kind, mention.channel, MentionError::from(e));
                    return MentionState::Failed;
                }
            };

        let mut tracker = StateTracker {
            id: session.id(),
            state: MentionState::Received,
        };
        tracker.enter(MentionState::Classified(kind));

        let result = match kind {
            MentionKind::New => self.handle_new(mention, &session, &mut tracker, cancel).await,
            MentionKind::Threaded => {
                self.handle_threaded(mention, anchor, &session, &mut tracker, cancel)
                    .await
            }
        };

        match result {
            Ok(report) => {
                session.update(&report).await;
                tracker.enter(MentionState::Completed);
                info!(
                    "[{}] ✅ {:?} mention in {} completed in {:.2}s",
                    session.id(),
                    kind,
                    mention.channel,
                    start.elapsed().as_secs_f64()
                );
            }
            Err(e) => {
                error!("[{}] ❌ {:?} mention failed: {}", session.id(), kind, e);
                session.update(&failure_text(kind, &e)).await;
                tracker.enter(MentionState::Failed);
            }
        }

        tracker.state
    }

    async fn handle_new(
        &self,
        mention: &Mention,
        session: &ProcessingSession,
        tracker: &mut StateTracker,
        cancel: &CancellationToken,
    ) -> Result<String, MentionError> {
        let urls = extract_urls(&mention.text);
        if urls.is_empty() {
            info!(
                "[{}] 🔍 No URLs found in mention from user {} in channel {}",
                session.id(),
                mention.user,
                mention.channel
            );
            return Ok(NO_URLS_MESSAGE.to_string());
        }
        debug!("[{}] 🔗 Found URLs: {:?}", session.id(), urls);

        let user_prompt = mention_prompt(&mention.text);
        let total = urls.len();
        let mut sections = Vec::with_capacity(total);
        let mut summarized = 0;

        for (i, url) in urls.iter().enumerate() {
            session
                .update(&format!(":loading: Processing URL {}/{}: {}", i + 1, total, url))
                .await;

            tracker.enter(MentionState::Fetching);
            session
                .update(&format!(":loading: Fetching content from {}...", url))
                .await;
            let content = match fetch_content(self.fetcher.as_ref(), url, cancel).await {
                Ok(content) => content,
                Err(MentionError::Fetch { source, .. }) => {
                    warn!("[{}] ⚠️ Error fetching {}: {}", session.id(), url, source);
                    let note = format!("Error summarizing {}: failed to fetch content: {}", url, source);
                    session.update(&note).await;
                    sections.push(note);
                    continue;
                }
                Err(e) => return Err(e),
            };

            tracker.enter(MentionState::Summarizing);
            session
                .update(&format!(":loading: Generating summary for {}...", url))
                .await;
            let summary = summarize_content(
                self.summarizer.as_ref(),
                &content,
                &user_prompt,
                Mode::Summary,
                url,
                cancel,
            )
            .await?;

            sections.push(format!("Summary for {}:\n{}", url, summary));
            summarized += 1;
        }

        if summarized == 0 {
            return Ok(format!(
                "{}{}{}",
                NO_SUMMARIES_MESSAGE,
                SECTION_SEPARATOR,
                sections.join(SECTION_SEPARATOR)
            ));
        }
        Ok(sections.join(SECTION_SEPARATOR))
    }

    async fn handle_threaded(
        &self,
        mention: &Mention,
        thread_ts: &str,
        session: &ProcessingSession,
        tracker: &mut StateTracker,
        cancel: &CancellationToken,
    ) -> Result<String, MentionError> {
        info!(
            "[{}] 🧵 Handling thread mention from user {} in channel {}, thread {}",
            session.id(),
            mention.user,
            mention.channel,
            thread_ts
        );

        tracker.enter(MentionState::Fetching);
        session.update(":loading: Getting thread context...").await;
        let context = self
            .aggregator
            .build(&mention.channel, thread_ts, Some(&session.handle().ts), cancel)
            .await?;

        // URLs of the latest mention whose thread fetch failed are tried again
        let mut new_urls: Vec<String> = Vec::new();
        for url in extract_urls(&mention.text) {
            if !context.has_content_for(&url) && !new_urls.contains(&url) {
                new_urls.push(url);
            }
        }

        let mut latest_contents = Vec::with_capacity(new_urls.len());
        for (i, url) in new_urls.iter().enumerate() {
            session
                .update(&format!(
                    ":loading: Fetching new URL {}/{}: {}",
                    i + 1,
                    new_urls.len(),
                    url
                ))
                .await;
            let content = fetch_content(self.fetcher.as_ref(), url, cancel).await?;
            latest_contents.push((url.clone(), content));
        }

        tracker.enter(MentionState::Summarizing);
        session
            .update(":loading: Analyzing thread context and generating response...")
            .await;
        let prompt = build_thread_prompt(&context, &mention.text, &latest_contents);
        debug!("[{}] 📝 Thread prompt length: {} characters", session.id(), prompt.len());

        summarize_content(
            self.summarizer.as_ref(),
            &prompt,
            "",
            Mode::Thread,
            "thread",
            cancel,
        )
        .await
    }
}

fn failure_text(kind: MentionKind, err: &MentionError) -> String {
    match (kind, err) {
        (MentionKind::Threaded, MentionError::ThreadContext(_)) => {
            format!("Error getting thread context: {}", err)
        }
        (MentionKind::Threaded, _) => format!("Error processing thread mention: {}", err),
        (MentionKind::New, _) => format!("Error processing mention: {}", err),
    }
}
