// main.rs - Linkscribe Entry Point
// `serve` runs the Slack events endpoint and the mention worker until Ctrl-C.
// `describe` fetches and summarizes a single URL from the command line.

mod config;
mod dispatcher;
mod events;
mod fetcher;
mod llm;
mod progress;
mod slack;
mod thread;
mod urls;

#[cfg(test)]
mod testing;

use clap::{Parser, Subcommand};
use log::{error, info};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::{BotConfig, LlmConfig, DEFAULT_FETCH_TIMEOUT_SECS};
use crate::dispatcher::{summarize_url, MentionDispatcher};
use crate::events::{router, run_mention_worker, AppState, MentionQueue};
use crate::fetcher::HttpFetcher;
use crate::llm::OpenAiSummarizer;
use crate::slack::SlackClient;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Parser)]
#[command(name = "linkscribe", version, about = "Slack bot that summarizes the pages you link")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand, PartialEq, Eq)]
enum Command {
    /// Serve the Slack Events API endpoint (default)
    Serve,
    /// Summarize a single URL and print the result
    Describe {
        #[arg(long)]
        url: String,
        /// Question or instruction for the summary
        #[arg(long, default_value = "")]
        prompt: String,
        /// Give up after this many seconds
        #[arg(long, default_value_t = 90)]
        timeout: u64,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    let cli = Cli::parse();
    let result = match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve().await,
        Command::Describe {
            url,
            prompt,
            timeout,
        } => describe(&url, &prompt, Duration::from_secs(timeout)).await,
    };

    if let Err(e) = result {
        error!("❌ {}", e);
        eprintln!("❌ {}", e);
        std::process::exit(1);
    }
}

async fn serve() -> Result<(), BoxError> {
    let config = BotConfig::load()?;
    info!(
        "🚀 Linkscribe starting on port {} with model {}",
        config.port, config.llm.model
    );

    let fetcher = Arc::new(HttpFetcher::new(config.fetch_timeout)?);
    let summarizer = Arc::new(OpenAiSummarizer::new(
        &config.llm.base_url,
        &config.llm.api_key,
        &config.llm.model,
        config.llm.timeout,
    )?);
    let slack = Arc::new(SlackClient::new(&config.slack_api_base, &config.slack_bot_token)?);
    let dispatcher = Arc::new(MentionDispatcher::new(
        fetcher,
        summarizer,
        slack.clone(),
        slack,
    ));

    let shutdown = CancellationToken::new();
    let (queue, rx) = MentionQueue::new();
    let worker = tokio::spawn(run_mention_worker(rx, dispatcher, shutdown.clone()));

    let app = router(AppState {
        signing_secret: Arc::from(config.slack_signing_secret.as_str()),
        queue,
    });
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    info!("👂 Listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_ctrl_c(shutdown.clone()))
        .await?;

    shutdown.cancel();
    worker.await?;
    info!("👋 Linkscribe stopped");
    Ok(())
}

async fn wait_for_ctrl_c(shutdown: CancellationToken) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("❌ Failed to listen for Ctrl-C: {}", e);
            }
            info!("🛑 Shutdown requested, cancelling in-flight mentions");
        }
        _ = shutdown.cancelled() => {}
    }
    shutdown.cancel();
}

async fn describe(url: &str, prompt: &str, timeout: Duration) -> Result<(), BoxError> {
    let config = LlmConfig::load()?;
    let fetcher = HttpFetcher::new(Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS))?;
    let summarizer =
        OpenAiSummarizer::new(&config.base_url, &config.api_key, &config.model, config.timeout)?;
    info!("🔎 Describing {} with model {}", url, summarizer.model());

    let cancel = CancellationToken::new();
    let summary = tokio::time::timeout(
        timeout,
        summarize_url(&fetcher, &summarizer, url, prompt, &cancel),
    )
    .await
    .map_err(|_| format!("timed out after {}s", timeout.as_secs()))??;

    println!("{}", summary);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serve_is_default() {
        let cli = Cli::try_parse_from(["linkscribe"]).unwrap();
        assert_eq!(cli.command, None);

        let cli = Cli::try_parse_from(["linkscribe", "serve"]).unwrap();
        assert_eq!(cli.command, Some(Command::Serve));
    }

    #[test]
    fn test_describe_arguments() {
        let cli = Cli::try_parse_from(["linkscribe", "describe", "--url", "https://example.com"]).unwrap();
        assert_eq!(
            cli.command,
            Some(Command::Describe {
                url: "https://example.com".to_string(),
                prompt: String::new(),
                timeout: 90,
            })
        );

        let cli = Cli::try_parse_from([
            "linkscribe",
            "describe",
            "--url",
            "https://example.com",
            "--prompt",
            "key points?",
            "--timeout",
            "10",
        ])
        .unwrap();
        match cli.command {
            Some(Command::Describe { prompt, timeout, .. }) => {
                assert_eq!(prompt, "key points?");
                assert_eq!(timeout, 10);
            }
            other => panic!("unexpected command {:?}", other),
        }

        assert!(Cli::try_parse_from(["linkscribe", "describe"]).is_err());
    }
}
