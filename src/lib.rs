//! Tally - usage metering and billing pipeline for AI model calls
//!
//! This library meters per-call token usage, periodically converts the
//! accumulated usage into per-user invoices, and debounces bursty background
//! work (conversation title refreshes) into a single delayed action.

pub mod billing;
pub mod config;
pub mod error;
pub mod scheduler;
pub mod store;
pub mod titles;
pub mod usage;

use std::sync::Arc;
use std::time::Instant;

pub use crate::billing::{AggregationReport, Aggregator, Invoice, InvoiceStatus};
pub use crate::config::Config;
pub use crate::scheduler::{DelayedScheduler, TaskHandle, TaskState};
pub use crate::store::{ChatStore, InvoiceStore, MemoryStore, UsageStore};
pub use crate::titles::{ExcerptTitleGenerator, TitleDebouncer, TitleGenerator};
pub use crate::usage::{BillingPeriod, ProviderMetadata, TokenUsage, UsageRecorder};

/// Application state shared across the service's background tasks
pub struct AppState {
    pub config: Config,
    pub start_time: Instant,
    pub store: Arc<MemoryStore>,
    pub recorder: Arc<UsageRecorder>,
    pub aggregator: Arc<Aggregator>,
    pub scheduler: Arc<DelayedScheduler>,
    pub debouncer: Arc<TitleDebouncer>,
}

impl AppState {
    /// Create a new application state with the in-memory store and the
    /// fallback title generator
    pub fn new(config: Config) -> Self {
        let store = Arc::new(MemoryStore::new());
        Self::with_parts(
            config,
            store,
            Arc::new(ExcerptTitleGenerator::default()),
        )
    }

    /// Create application state over explicit store and title-generator
    /// implementations
    pub fn with_parts(
        config: Config,
        store: Arc<MemoryStore>,
        title_generator: Arc<dyn TitleGenerator>,
    ) -> Self {
        let recorder = Arc::new(UsageRecorder::new(store.clone()));
        let aggregator = Arc::new(Aggregator::new(store.clone(), store.clone(), &config));
        let scheduler = Arc::new(DelayedScheduler::new());
        let debouncer = Arc::new(TitleDebouncer::new(
            scheduler.clone(),
            store.clone(),
            title_generator,
            &config,
        ));

        Self {
            config,
            start_time: Instant::now(),
            store,
            recorder,
            aggregator,
            scheduler,
            debouncer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_app_state_wires_components() {
        let state = AppState::new(Config::default());

        state
            .recorder
            .record_usage_now("alice", None, "gpt-4o-mini", "openai", TokenUsage::new(10, 5), None)
            .await
            .unwrap();
        assert_eq!(state.store.event_count(), 1);
        assert_eq!(state.scheduler.pending_count(), 0);
    }
}
