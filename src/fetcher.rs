// fetcher.rs - Page Content Fetching
// Turns a URL into readable page text. The dispatcher only sees the `Fetcher`
// trait, so any backend (static HTTP, a headless browser, a cache) can be
// plugged in as long as it returns cleaned text or an error.

use async_trait::async_trait;
use log::{debug, error, info};
use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Duration;
use thiserror::Error;

/// Upper bound on the text handed to the model for a single page
pub const MAX_CONTENT_CHARS: usize = 20_000;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("received non-2xx status code {0}")]
    Status(u16),
    #[error("fetched content is empty")]
    EmptyContent,
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Retrieve the main textual content of `url`, with markup and boilerplate removed.
    async fn fetch(&self, url: &str) -> Result<String, FetchError>;
}

/// Plain HTTP fetcher. Does not execute JavaScript.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let target = if url.starts_with("www.") {
            format!("https://{}", url)
        } else {
            url.to_string()
        };

        debug!("🌐 Starting webpage fetch for URL: {}", target);
        let start = std::time::Instant::now();

        let response = self.client.get(&target).send().await?;
        let status = response.status();
        debug!("📡 HTTP Response Status: {}", status);

        if !status.is_success() {
            error!("❌ HTTP error {} for {}", status, target);
            return Err(FetchError::Status(status.as_u16()));
        }

        let html = response.text().await?;
        debug!("📄 Downloaded HTML content: {} characters", html.len());

        let cleaned = clean_html(&html);
        if cleaned.is_empty() {
            return Err(FetchError::EmptyContent);
        }

        info!(
            "✅ Fetched {} ({} characters) in {:.2}s",
            target,
            cleaned.len(),
            start.elapsed().as_secs_f64()
        );
        Ok(cleaned)
    }
}

static BOILERPLATE_BLOCKS: Lazy<Vec<Regex>> = Lazy::new(|| {
    ["script", "style", "noscript", "nav", "footer", "aside", "template"]
        .iter()
        .map(|tag| {
            Regex::new(&format!(r"(?is)<{tag}\b[^>]*>.*?</{tag}\s*>")).expect("block pattern is valid")
        })
        .collect()
});
static COMMENT_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<!--.*?-->").expect("comment pattern is valid"));
static TAG_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").expect("tag pattern is valid"));

/// Strip non-content blocks and tags, decode common entities and collapse whitespace.
pub fn clean_html(html: &str) -> String {
    let mut result = COMMENT_REGEX.replace_all(html, " ").into_owned();
    for block in BOILERPLATE_BLOCKS.iter() {
        result = block.replace_all(&result, " ").into_owned();
    }
    let text = TAG_REGEX.replace_all(&result, " ");

    let decoded = text
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");

    let cleaned: String = decoded
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .take(MAX_CONTENT_CHARS)
        .collect();

    debug!("🧹 HTML cleaning complete: {} -> {} characters", html.len(), cleaned.len());
    cleaned
}
