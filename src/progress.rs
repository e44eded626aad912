// progress.rs - Live Progress Reporting
// A mention gets exactly one status message. It is posted once and then edited
// for every step, so the user watches a single message evolve into the result.

use async_trait::async_trait;
use log::{debug, warn};
use std::sync::Arc;
use uuid::Uuid;

use crate::slack::SlackError;

/// Initial text of every status message
pub const LOADING: &str = ":loading:";

/// Address of a posted message: its conversation and timestamp id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHandle {
    pub channel: String,
    pub ts: String,
}

#[async_trait]
pub trait ProgressReporter: Send + Sync {
    /// Create a status message replying under `anchor_ts`.
    async fn post(&self, channel: &str, anchor_ts: &str, text: &str)
        -> Result<MessageHandle, SlackError>;

    /// Replace the text of a previously posted message.
    async fn update(&self, handle: &MessageHandle, text: &str) -> Result<(), SlackError>;
}

/// Per-mention binding to one status message.
pub struct ProcessingSession {
    id: Uuid,
    reporter: Arc<dyn ProgressReporter>,
    handle: MessageHandle,
}

impl ProcessingSession {
    /// Post the status message. Fails only when the message cannot be created.
    pub async fn start(
        reporter: Arc<dyn ProgressReporter>,
        channel: &str,
        anchor_ts: &str,
    ) -> Result<Self, SlackError> {
        let handle = reporter.post(channel, anchor_ts, LOADING).await?;
        let id = Uuid::new_v4();
        debug!("[{}] 📌 Status message {} opened in {}", id, handle.ts, handle.channel);
        Ok(Self {
            id,
            reporter,
            handle,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn handle(&self) -> &MessageHandle {
        &self.handle
    }

    /// Edit the status message. Failures are logged and otherwise ignored.
    pub async fn update(&self, text: &str) {
        if let Err(e) = self.reporter.update(&self.handle, text).await {
            warn!("[{}] ⚠️ Error updating progress message: {}", self.id, e);
        }
    }
}
