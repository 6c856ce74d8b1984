//! Invoices and the in-flight aggregation accumulator

use serde::{Deserialize, Serialize};

use crate::usage::{BillingPeriod, ProviderMetadata, TokenUsage, UsageEvent};

/// Billing-execution status of an invoice.
///
/// Created as `Pending`; the transition to `Paid`/`Failed` is owned by an
/// external billing-execution collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Pending,
    Paid,
    Failed,
}

/// One invoice per `(user_id, billing_period)` pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub user_id: String,
    pub billing_period: BillingPeriod,
    /// Computed monetary value, non-negative
    pub amount: f64,
    pub status: InvoiceStatus,
    /// Summed token counters backing the amount
    pub usage: TokenUsage,
    /// Merged cached-prompt-token count across the user's events
    pub cached_prompt_tokens: u64,
    /// Number of usage events folded into this invoice
    pub event_count: u64,
}

impl Invoice {
    pub fn new(
        user_id: String,
        billing_period: BillingPeriod,
        amount: f64,
        usage: TokenUsage,
        provider_metadata: Option<ProviderMetadata>,
        event_count: u64,
    ) -> Self {
        Self {
            user_id,
            billing_period,
            amount,
            status: InvoiceStatus::Pending,
            usage,
            cached_prompt_tokens: provider_metadata
                .map(|m| m.cached_prompt_tokens)
                .unwrap_or(0),
            event_count,
        }
    }
}

/// Running totals for one `(provider, model)` pair within an open user group.
///
/// A user's period can span several models; each line is priced at its own
/// model's rates when the group is finalized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageLine {
    pub provider: String,
    pub model: String,
    /// Running element-wise sum of token counters
    pub usage: TokenUsage,
    /// Running merged cache metadata
    pub provider_metadata: Option<ProviderMetadata>,
    /// Number of events merged into this line
    pub event_count: u64,
}

impl UsageLine {
    fn open(event: &UsageEvent) -> Self {
        Self {
            provider: event.provider.clone(),
            model: event.model.clone(),
            usage: event.usage,
            provider_metadata: event.provider_metadata,
            event_count: 1,
        }
    }

    fn merge(&mut self, event: &UsageEvent) {
        self.usage = self.usage.add(&event.usage);
        self.provider_metadata =
            ProviderMetadata::merge(self.provider_metadata, event.provider_metadata);
        self.event_count += 1;
    }

    /// Merged cached-prompt-token count for this line
    pub fn cached_prompt_tokens(&self) -> u64 {
        self.provider_metadata
            .map(|m| m.cached_prompt_tokens)
            .unwrap_or(0)
    }
}

/// Running totals for the user currently being folded, not yet finalized.
///
/// Serializable because it rides inside the persisted aggregation checkpoint:
/// a user group that straddles a page boundary is carried forward here rather
/// than flushed prematurely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceAccumulator {
    /// User id of the open group
    pub user_id: String,
    /// One line per `(provider, model)` seen in the group, in first-seen order
    pub lines: Vec<UsageLine>,
}

impl InvoiceAccumulator {
    /// Open a new accumulator seeded from the group's first event
    pub fn open(event: &UsageEvent) -> Self {
        Self {
            user_id: event.user_id.clone(),
            lines: vec![UsageLine::open(event)],
        }
    }

    /// Merge the next event for the same user into the matching line, opening
    /// a new line when the `(provider, model)` pair is new to the group
    pub fn merge(&mut self, event: &UsageEvent) {
        match self
            .lines
            .iter_mut()
            .find(|l| l.provider == event.provider && l.model == event.model)
        {
            Some(line) => line.merge(event),
            None => self.lines.push(UsageLine::open(event)),
        }
    }

    /// Element-wise token sum across all lines
    pub fn usage(&self) -> TokenUsage {
        self.lines
            .iter()
            .fold(TokenUsage::default(), |sum, line| sum.add(&line.usage))
    }

    /// Merged cache metadata across all lines
    pub fn provider_metadata(&self) -> Option<ProviderMetadata> {
        self.lines
            .iter()
            .fold(None, |merged, line| {
                ProviderMetadata::merge(merged, line.provider_metadata)
            })
    }

    /// Merged cached-prompt-token count across all lines
    pub fn cached_prompt_tokens(&self) -> u64 {
        self.lines.iter().map(|l| l.cached_prompt_tokens()).sum()
    }

    /// Number of events merged so far
    pub fn event_count(&self) -> u64 {
        self.lines.iter().map(|l| l.event_count).sum()
    }
}
