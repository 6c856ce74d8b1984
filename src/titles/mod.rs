//! Conversation title refresh with trailing-edge debounce
//!
//! Bursts of conversation activity collapse into a single title refresh that
//! fires one quiet window after the last activity event. Each activity event
//! cancels the previously scheduled refresh (if still pending) and schedules
//! a new one; the whole read-cancel-schedule-write sequence runs under one
//! lock so concurrent activity for the same conversation cannot leak handles.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::error::AppResult;
use crate::scheduler::{DelayedScheduler, TaskHandle, TaskState};
use crate::store::ChatStore;

/// External collaborator that summarizes recent conversation content into a
/// short title. Input is the rendered recent-message context; output is used
/// verbatim as the new title.
#[async_trait]
pub trait TitleGenerator: Send + Sync {
    async fn generate_title(&self, context: &str) -> AppResult<String>;
}

/// Fallback generator that excerpts the first user line.
///
/// Stand-in for the language-model summarizer when no model backend is
/// wired; takes the first few words of the first `User:` line.
pub struct ExcerptTitleGenerator {
    max_words: usize,
}

impl ExcerptTitleGenerator {
    pub fn new(max_words: usize) -> Self {
        Self { max_words }
    }
}

impl Default for ExcerptTitleGenerator {
    fn default() -> Self {
        Self::new(5)
    }
}

#[async_trait]
impl TitleGenerator for ExcerptTitleGenerator {
    async fn generate_title(&self, context: &str) -> AppResult<String> {
        let line = context
            .lines()
            .find_map(|l| l.strip_prefix("User: "))
            .unwrap_or(context);
        Ok(line
            .split_whitespace()
            .take(self.max_words)
            .collect::<Vec<_>>()
            .join(" "))
    }
}

/// Debounces conversation activity into a single delayed title refresh
pub struct TitleDebouncer {
    scheduler: Arc<DelayedScheduler>,
    chats: Arc<dyn ChatStore>,
    titles: Arc<dyn TitleGenerator>,
    /// At most one pending refresh handle per conversation
    pending: Mutex<HashMap<String, TaskHandle>>,
    quiet_window: Duration,
    context_messages: usize,
}

impl TitleDebouncer {
    pub fn new(
        scheduler: Arc<DelayedScheduler>,
        chats: Arc<dyn ChatStore>,
        titles: Arc<dyn TitleGenerator>,
        config: &Config,
    ) -> Self {
        Self {
            scheduler,
            chats,
            titles,
            pending: Mutex::new(HashMap::new()),
            quiet_window: config.title_quiet_window,
            context_messages: config.title_context_messages,
        }
    }

    /// Called after each qualifying activity event (e.g. a new message).
    ///
    /// Cancels the conversation's pending refresh if there is one and
    /// schedules a fresh one, so only the last activity event within a quiet
    /// window ultimately triggers a refresh.
    pub fn on_activity(self: &Arc<Self>, conversation_id: &str) {
        let mut pending = self.pending.lock().unwrap();

        // Superseded handles are dropped outright so scheduler bookkeeping
        // stays bounded by the number of pending refreshes
        if let Some(previous) = pending.remove(conversation_id) {
            self.scheduler.cancel(previous);
            self.scheduler.forget(previous);
        }

        let debouncer = Arc::clone(self);
        let id = conversation_id.to_string();
        let handle = self.scheduler.schedule(self.quiet_window, move || async move {
            debouncer.on_quiet_window_elapsed(&id).await;
            debouncer.release(&id);
        });

        pending.insert(conversation_id.to_string(), handle);
        debug!(conversation_id, handle = %handle, "Debounced title refresh scheduled");
    }

    /// Scheduled action entry point, invoked by the scheduler after the quiet
    /// window. Failures are logged, not propagated: the refresh is
    /// fire-and-forget and idempotent in effect.
    pub async fn on_quiet_window_elapsed(&self, conversation_id: &str) {
        if let Err(e) = self.refresh_title(conversation_id).await {
            error!(conversation_id, error = %e, "Title refresh failed");
        }
    }

    /// Drop the bookkeeping for a refresh that just fired. A refresh that was
    /// superseded while running leaves the newer pending handle alone.
    fn release(&self, conversation_id: &str) {
        let mut pending = self.pending.lock().unwrap();
        if let Some(&handle) = pending.get(conversation_id) {
            if self.scheduler.query(handle) != Some(TaskState::Pending) {
                pending.remove(conversation_id);
                self.scheduler.forget(handle);
            }
        }
    }

    async fn refresh_title(&self, conversation_id: &str) -> AppResult<()> {
        if !self.chats.conversation_exists(conversation_id).await? {
            debug!(conversation_id, "Conversation gone, skipping title refresh");
            return Ok(());
        }

        let messages = self
            .chats
            .recent_messages(conversation_id, self.context_messages)
            .await?;
        if messages.is_empty() {
            return Ok(());
        }

        let context = messages
            .iter()
            .map(|m| format!("{}: {}", m.role.label(), m.text))
            .collect::<Vec<_>>()
            .join("\n");

        let title = self.titles.generate_title(&context).await?;
        self.chats.set_title(conversation_id, &title).await?;

        metrics::counter!("tally_title_refreshes_total").increment(1);
        info!(conversation_id, title = %title, "Conversation title refreshed");
        Ok(())
    }
}
