//! Billing aggregator
//!
//! Folds a billing period's usage events, ordered by `(billing_period,
//! user_id)`, into one invoice per user. Work proceeds in fixed-size pages
//! inside a single loop; after each page the flushed invoices and the
//! continuation checkpoint (cursor + still-open accumulator) are committed
//! atomically, so a crashed run resumes from the last committed page instead
//! of re-reading or skipping events.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::billing::invoice::{Invoice, InvoiceAccumulator};
use crate::billing::pricing;
use crate::config::Config;
use crate::error::AppResult;
use crate::store::{Cursor, InvoiceStore, UsageStore};
use crate::usage::BillingPeriod;

/// Persisted continuation state for one period's aggregation run.
///
/// `open` carries the accumulator for a user group that straddles the last
/// committed page boundary. `completed` marks the period as invoiced; a rerun
/// observing it skips instead of double-invoicing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationCheckpoint {
    pub billing_period: BillingPeriod,
    pub cursor: Option<Cursor>,
    pub open: Option<InvoiceAccumulator>,
    pub completed: bool,
}

/// Outcome of one aggregation invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregationReport {
    pub invoices_created: usize,
    pub events_processed: usize,
    pub pages: usize,
    /// True when the period was already completed and the run did nothing
    pub skipped: bool,
}

/// Paginated, checkpointed invoice generation for closed billing periods
pub struct Aggregator {
    usage_store: Arc<dyn UsageStore>,
    invoice_store: Arc<dyn InvoiceStore>,
    page_size: usize,
    safety_margin: Duration,
}

impl Aggregator {
    pub fn new(
        usage_store: Arc<dyn UsageStore>,
        invoice_store: Arc<dyn InvoiceStore>,
        config: &Config,
    ) -> Self {
        Self {
            usage_store,
            invoice_store,
            page_size: config.aggregation_page_size,
            safety_margin: Duration::seconds(config.aggregation_safety_margin.as_secs() as i64),
        }
    }

    /// Generate invoices for a billing period.
    ///
    /// With no explicit period, targets the period containing "now minus the
    /// safety margin" — far enough in the past that the period is assumed
    /// closed. An explicit period from the trigger is preferred.
    ///
    /// Idempotent for completed periods: a rerun observes the `completed`
    /// checkpoint and returns a skipped report. An interrupted run resumes
    /// from the persisted `(cursor, open)` pair.
    pub async fn run(&self, period: Option<BillingPeriod>) -> AppResult<AggregationReport> {
        let period = period.unwrap_or_else(|| BillingPeriod::of(Utc::now() - self.safety_margin));

        let mut checkpoint = match self.invoice_store.checkpoint(period).await? {
            Some(cp) if cp.completed => {
                info!(period = %period, "Billing period already invoiced, skipping");
                return Ok(AggregationReport {
                    skipped: true,
                    ..AggregationReport::default()
                });
            }
            Some(cp) => {
                warn!(
                    period = %period,
                    cursor = ?cp.cursor,
                    open_user = cp.open.as_ref().map(|a| a.user_id.as_str()),
                    "Resuming interrupted aggregation run"
                );
                cp
            }
            None => AggregationCheckpoint {
                billing_period: period,
                cursor: None,
                open: None,
                completed: false,
            },
        };

        info!(period = %period, page_size = self.page_size, "Starting invoice aggregation");

        let mut report = AggregationReport::default();

        loop {
            let page = self
                .usage_store
                .usage_page(period, checkpoint.cursor, self.page_size)
                .await?;
            let exhausted = page.next_cursor.is_none();

            let mut invoices = Vec::new();
            let mut open = checkpoint.open.take();

            for event in &page.events {
                match open.take() {
                    None => open = Some(InvoiceAccumulator::open(event)),
                    Some(mut acc) if acc.user_id == event.user_id => {
                        acc.merge(event);
                        open = Some(acc);
                    }
                    Some(finished) => {
                        invoices.push(finalize(period, finished)?);
                        open = Some(InvoiceAccumulator::open(event));
                    }
                }
            }

            if exhausted {
                if let Some(finished) = open.take() {
                    invoices.push(finalize(period, finished)?);
                }
            }

            report.events_processed += page.events.len();
            report.invoices_created += invoices.len();
            report.pages += 1;

            checkpoint = AggregationCheckpoint {
                billing_period: period,
                cursor: page.next_cursor,
                open,
                completed: exhausted,
            };

            debug!(
                period = %period,
                page = report.pages,
                events = page.events.len(),
                flushed = invoices.len(),
                exhausted,
                "Committing aggregation page"
            );

            let flushed = invoices.len();
            self.invoice_store
                .commit_page(invoices, checkpoint.clone())
                .await?;

            metrics::counter!("tally_aggregation_pages_total").increment(1);
            metrics::counter!("tally_invoices_created_total").increment(flushed as u64);

            if exhausted {
                break;
            }
        }

        info!(
            period = %period,
            invoices = report.invoices_created,
            events = report.events_processed,
            pages = report.pages,
            "Invoice aggregation completed"
        );

        Ok(report)
    }
}

/// Price and finalize a flushed accumulator as a pending invoice.
///
/// Each `(provider, model)` line is priced at its own model's rates and the
/// line amounts summed, so a user whose period mixes models is never billed
/// at a single model's rate. An unknown `(provider, model)` aborts the
/// invocation before the page commit, so no partially priced state is
/// persisted.
fn finalize(period: BillingPeriod, acc: InvoiceAccumulator) -> AppResult<Invoice> {
    let mut amount = 0.0;
    for line in &acc.lines {
        amount += pricing::price_of(
            &line.provider,
            &line.model,
            &line.usage,
            line.cached_prompt_tokens(),
        )?;
    }

    let usage = acc.usage();
    let provider_metadata = acc.provider_metadata();
    let event_count = acc.event_count();
    Ok(Invoice::new(
        acc.user_id,
        period,
        amount,
        usage,
        provider_metadata,
        event_count,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::usage::{ProviderMetadata, TokenUsage, UsageEvent};
    use chrono::{DateTime, Utc};

    fn ts(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn period() -> BillingPeriod {
        BillingPeriod::of(ts("2024-06-01T00:00:00Z"))
    }

    async fn seed(store: &MemoryStore, user: &str, prompt: u64, completion: u64, cached: Option<u64>) {
        seed_model(store, user, "openai", "gpt-4o-mini", prompt, completion, cached).await;
    }

    async fn seed_model(
        store: &MemoryStore,
        user: &str,
        provider: &str,
        model: &str,
        prompt: u64,
        completion: u64,
        cached: Option<u64>,
    ) {
        let recorded_at = ts("2024-06-10T12:00:00Z");
        store
            .append(UsageEvent {
                user_id: user.to_string(),
                agent_name: None,
                model: model.to_string(),
                provider: provider.to_string(),
                usage: TokenUsage::new(prompt, completion),
                provider_metadata: cached.map(ProviderMetadata::cached),
                billing_period: BillingPeriod::of(recorded_at),
                recorded_at,
            })
            .await
            .unwrap();
    }

    fn aggregator(store: &Arc<MemoryStore>, page_size: usize) -> Aggregator {
        let config = Config {
            aggregation_page_size: page_size,
            ..Config::default()
        };
        Aggregator::new(store.clone(), store.clone(), &config)
    }

    #[tokio::test]
    async fn test_one_invoice_per_user() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, "alice", 1000, 500, None).await;
        seed(&store, "alice", 2000, 1000, None).await;
        seed(&store, "bob", 100, 50, None).await;

        let report = aggregator(&store, 100).run(Some(period())).await.unwrap();
        assert_eq!(report.invoices_created, 2);
        assert_eq!(report.events_processed, 3);
        assert!(!report.skipped);

        let alice = store.invoice(period(), "alice").await.unwrap().unwrap();
        assert_eq!(alice.usage.prompt_tokens, 3000);
        assert_eq!(alice.usage.completion_tokens, 1500);
        assert_eq!(alice.event_count, 2);

        let bob = store.invoice(period(), "bob").await.unwrap().unwrap();
        assert_eq!(bob.usage.prompt_tokens, 100);
        assert_eq!(bob.event_count, 1);
    }

    // A user group split across a page boundary must still yield one invoice
    // with the full combined totals: page size 2, user A has 3 events at
    // positions 2-4 of the ordered stream.
    #[tokio::test]
    async fn test_group_straddling_page_boundary() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, "aaa", 10, 5, None).await;
        seed(&store, "bbb", 100, 50, None).await;
        seed(&store, "bbb", 200, 100, None).await;
        seed(&store, "bbb", 300, 150, None).await;

        let report = aggregator(&store, 2).run(Some(period())).await.unwrap();
        assert_eq!(report.invoices_created, 2);
        assert_eq!(report.pages, 2);

        let bbb = store.invoice(period(), "bbb").await.unwrap().unwrap();
        assert_eq!(bbb.usage.prompt_tokens, 600);
        assert_eq!(bbb.usage.completion_tokens, 300);
        assert_eq!(bbb.event_count, 3);
    }

    #[tokio::test]
    async fn test_completed_period_skips() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, "alice", 1000, 500, None).await;

        let agg = aggregator(&store, 100);
        let first = agg.run(Some(period())).await.unwrap();
        assert!(!first.skipped);
        assert_eq!(first.invoices_created, 1);

        let second = agg.run(Some(period())).await.unwrap();
        assert!(second.skipped);
        assert_eq!(second.invoices_created, 0);

        // Invoice untouched by the second run
        let alice = store.invoice(period(), "alice").await.unwrap().unwrap();
        assert_eq!(alice.event_count, 1);
    }

    #[tokio::test]
    async fn test_empty_period_completes_with_no_invoices() {
        let store = Arc::new(MemoryStore::new());
        let report = aggregator(&store, 100).run(Some(period())).await.unwrap();
        assert_eq!(report.invoices_created, 0);
        assert_eq!(report.events_processed, 0);

        let cp = store.checkpoint(period()).await.unwrap().unwrap();
        assert!(cp.completed);
    }

    #[tokio::test]
    async fn test_unknown_pricing_aborts_without_commit() {
        let store = Arc::new(MemoryStore::new());
        let recorded_at = ts("2024-06-10T12:00:00Z");
        store
            .append(UsageEvent {
                user_id: "alice".to_string(),
                agent_name: None,
                model: "mystery-model".to_string(),
                provider: "acme".to_string(),
                usage: TokenUsage::new(100, 50),
                provider_metadata: None,
                billing_period: BillingPeriod::of(recorded_at),
                recorded_at,
            })
            .await
            .unwrap();

        let err = aggregator(&store, 100).run(Some(period())).await.unwrap_err();
        assert!(matches!(err, crate::error::AppError::UnknownPricing { .. }));

        // Nothing was committed for the aborted page
        assert!(store.invoice(period(), "alice").await.unwrap().is_none());
        assert!(store.checkpoint(period()).await.unwrap().is_none());
    }

    // A user mixing models in one period gets one invoice whose amount sums
    // per-model pricing: 1M prompt on gpt-4o-mini (0.15/MTok input) plus 1M
    // prompt on claude-opus-4 (15.00/MTok input) is 15.15, not 2M tokens at
    // either single rate.
    #[tokio::test]
    async fn test_mixed_model_group_priced_per_model() {
        let store = Arc::new(MemoryStore::new());
        seed_model(&store, "alice", "openai", "gpt-4o-mini", 1_000_000, 0, None).await;
        seed_model(&store, "alice", "anthropic", "claude-opus-4", 1_000_000, 0, None).await;

        let report = aggregator(&store, 100).run(Some(period())).await.unwrap();
        assert_eq!(report.invoices_created, 1);

        let alice = store.invoice(period(), "alice").await.unwrap().unwrap();
        assert_eq!(alice.usage.prompt_tokens, 2_000_000);
        assert_eq!(alice.event_count, 2);
        assert!((alice.amount - 15.15).abs() < 1e-9, "amount was {}", alice.amount);
    }

    // The open accumulator carried across a page boundary keeps its per-model
    // lines, so a mixed-model group straddling pages still prices correctly
    #[tokio::test]
    async fn test_mixed_model_group_across_page_boundary() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, "aaa", 10, 5, None).await;
        seed_model(&store, "bbb", "openai", "gpt-4o-mini", 1_000_000, 0, None).await;
        seed_model(&store, "bbb", "anthropic", "claude-opus-4", 1_000_000, 0, None).await;

        let report = aggregator(&store, 2).run(Some(period())).await.unwrap();
        assert_eq!(report.pages, 2);

        let bbb = store.invoice(period(), "bbb").await.unwrap().unwrap();
        assert!((bbb.amount - 15.15).abs() < 1e-9, "amount was {}", bbb.amount);
    }

    #[tokio::test]
    async fn test_cached_tokens_priced_at_discount() {
        let store = Arc::new(MemoryStore::new());
        // 1M prompt with 1M cached, no completion: full cached-input rate
        seed(&store, "alice", 1_000_000, 0, Some(1_000_000)).await;

        aggregator(&store, 100).run(Some(period())).await.unwrap();
        let alice = store.invoice(period(), "alice").await.unwrap().unwrap();
        assert!((alice.amount - 0.075).abs() < 1e-9);
        assert_eq!(alice.cached_prompt_tokens, 1_000_000);
    }

    #[tokio::test]
    async fn test_derived_period_targets_safety_margin() {
        let store = Arc::new(MemoryStore::new());
        let agg = aggregator(&store, 100);

        // No explicit period: derives from now - margin and completes cleanly
        let report = agg.run(None).await.unwrap();
        assert!(!report.skipped);

        let expected = BillingPeriod::of(Utc::now() - Duration::days(7));
        assert!(store.checkpoint(expected).await.unwrap().unwrap().completed);
    }
}
