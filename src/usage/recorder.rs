//! Usage recorder
//!
//! Appends one usage event per completed model call. The billing period is
//! derived from the event timestamp at write time and immutable thereafter.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::AppResult;
use crate::store::UsageStore;
use crate::usage::event::{BillingPeriod, ProviderMetadata, TokenUsage, UsageEvent};

/// Records raw usage events into the append-only usage store
pub struct UsageRecorder {
    store: Arc<dyn UsageStore>,
}

impl UsageRecorder {
    pub fn new(store: Arc<dyn UsageStore>) -> Self {
        Self { store }
    }

    /// Record usage for one completed model call.
    ///
    /// No side effects beyond the append; malformed input is a caller
    /// contract violation, not a recoverable error here.
    #[allow(clippy::too_many_arguments)]
    pub async fn record_usage(
        &self,
        user_id: &str,
        agent_name: Option<&str>,
        model: &str,
        provider: &str,
        usage: TokenUsage,
        provider_metadata: Option<ProviderMetadata>,
        recorded_at: DateTime<Utc>,
    ) -> AppResult<()> {
        let billing_period = BillingPeriod::of(recorded_at);

        self.store
            .append(UsageEvent {
                user_id: user_id.to_string(),
                agent_name: agent_name.map(str::to_string),
                model: model.to_string(),
                provider: provider.to_string(),
                usage,
                provider_metadata,
                billing_period,
                recorded_at,
            })
            .await?;

        metrics::counter!("tally_usage_events_total").increment(1);
        debug!(
            user_id = %user_id,
            model = %model,
            provider = %provider,
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            period = %billing_period,
            "Recorded usage"
        );

        Ok(())
    }

    /// Record usage stamped with the current time
    pub async fn record_usage_now(
        &self,
        user_id: &str,
        agent_name: Option<&str>,
        model: &str,
        provider: &str,
        usage: TokenUsage,
        provider_metadata: Option<ProviderMetadata>,
    ) -> AppResult<()> {
        self.record_usage(
            user_id,
            agent_name,
            model,
            provider,
            usage,
            provider_metadata,
            Utc::now(),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, UsageStore};

    fn ts(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn test_record_stamps_billing_period() {
        let store = Arc::new(MemoryStore::new());
        let recorder = UsageRecorder::new(store.clone());

        recorder
            .record_usage(
                "alice",
                Some("chat-agent"),
                "gpt-4o-mini",
                "openai",
                TokenUsage::new(100, 50),
                None,
                ts("2024-12-31T23:59:59Z"),
            )
            .await
            .unwrap();

        let period = BillingPeriod::of(ts("2024-12-01T00:00:00Z"));
        let page = store.usage_page(period, None, 10).await.unwrap();
        assert_eq!(page.events.len(), 1);

        let event = &page.events[0];
        assert_eq!(event.user_id, "alice");
        assert_eq!(event.agent_name.as_deref(), Some("chat-agent"));
        assert_eq!(event.billing_period, period);
        assert_eq!(event.usage.total_tokens, 150);
    }

    #[tokio::test]
    async fn test_record_carries_provider_metadata() {
        let store = Arc::new(MemoryStore::new());
        let recorder = UsageRecorder::new(store.clone());

        recorder
            .record_usage(
                "bob",
                None,
                "claude-sonnet-4",
                "anthropic",
                TokenUsage::new(500, 200),
                Some(ProviderMetadata::cached(120)),
                ts("2024-06-15T08:00:00Z"),
            )
            .await
            .unwrap();

        let period = BillingPeriod::of(ts("2024-06-01T00:00:00Z"));
        let page = store.usage_page(period, None, 10).await.unwrap();
        assert_eq!(
            page.events[0].provider_metadata,
            Some(ProviderMetadata::cached(120))
        );
    }

    #[tokio::test]
    async fn test_record_now_lands_in_current_month() {
        let store = Arc::new(MemoryStore::new());
        let recorder = UsageRecorder::new(store.clone());

        recorder
            .record_usage_now("carol", None, "gpt-4o", "openai", TokenUsage::new(10, 5), None)
            .await
            .unwrap();

        let period = BillingPeriod::of(Utc::now());
        let page = store.usage_page(period, None, 10).await.unwrap();
        assert_eq!(page.events.len(), 1);
    }
}
