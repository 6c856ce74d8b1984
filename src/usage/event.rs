//! Usage event model and billing-period keys
//!
//! A usage event is one immutable record of token consumption from a single
//! model call. Events are append-only and retained as the audit trail backing
//! invoices.

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// Token counters for a single model call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Number of input tokens (prompt tokens)
    pub prompt_tokens: u64,
    /// Number of output tokens (completion tokens)
    pub completion_tokens: u64,
    /// Expected to equal prompt + completion; not enforced here
    pub total_tokens: u64,
}

impl TokenUsage {
    /// Create new usage with the total derived from the parts
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }

    /// Element-wise sum, used when merging events into an accumulator
    pub fn add(&self, other: &TokenUsage) -> Self {
        Self {
            prompt_tokens: self.prompt_tokens + other.prompt_tokens,
            completion_tokens: self.completion_tokens + other.completion_tokens,
            total_tokens: self.total_tokens + other.total_tokens,
        }
    }

    /// Check if there's any usage recorded
    pub fn has_usage(&self) -> bool {
        self.prompt_tokens > 0 || self.completion_tokens > 0
    }
}

/// Provider-specific metadata attached to a usage event
///
/// Currently carries the cached-prompt-token count reported by providers with
/// prompt caching; cached tokens are priced at a discount.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderMetadata {
    /// Subset of prompt tokens served from the provider cache
    pub cached_prompt_tokens: u64,
}

impl ProviderMetadata {
    /// Create metadata with a cached-prompt-token count
    pub fn cached(cached_prompt_tokens: u64) -> Self {
        Self {
            cached_prompt_tokens,
        }
    }

    /// Merge rule for accumulated cache metadata:
    /// none + none -> none, none + some -> adopt, some + some -> sum.
    pub fn merge(
        current: Option<ProviderMetadata>,
        incoming: Option<ProviderMetadata>,
    ) -> Option<ProviderMetadata> {
        match (current, incoming) {
            (None, None) => None,
            (Some(m), None) => Some(m),
            (None, Some(m)) => Some(m),
            (Some(a), Some(b)) => Some(ProviderMetadata {
                cached_prompt_tokens: a.cached_prompt_tokens + b.cached_prompt_tokens,
            }),
        }
    }
}

/// Key identifying the aggregation bucket for a usage event.
///
/// Stored as the ms-since-epoch timestamp of the UTC calendar-month start, so
/// two timestamps in the same UTC month map to an identical key and keys order
/// chronologically. Assigned at write time and immutable thereafter.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct BillingPeriod(i64);

impl BillingPeriod {
    /// Period key for a timestamp: the start of its UTC calendar month
    pub fn of(ts: DateTime<Utc>) -> Self {
        // Day 1 of an existing year/month is always constructible
        let month_start = NaiveDate::from_ymd_opt(ts.year(), ts.month(), 1)
            .unwrap()
            .and_time(NaiveTime::MIN)
            .and_utc();
        Self(month_start.timestamp_millis())
    }

    /// The period immediately before this one (handles January -> December)
    pub fn previous(&self) -> Self {
        Self::of(self.start() - chrono::Duration::days(1))
    }

    /// First instant of the period
    pub fn start(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp_millis(self.0).unwrap()
    }

    /// Raw key value (ms since epoch of the month start)
    pub fn as_millis(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for BillingPeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.start().format("%Y-%m"))
    }
}

/// One immutable record of token consumption from a single model call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageEvent {
    /// Identifier of the billed party
    pub user_id: String,
    /// Name of the agent that made the call, if any
    pub agent_name: Option<String>,
    /// Model identifier the call was priced against
    pub model: String,
    /// Provider identifier the call was priced against
    pub provider: String,
    /// Token counters for the call
    pub usage: TokenUsage,
    /// Provider-specific extras (cached prompt tokens)
    pub provider_metadata: Option<ProviderMetadata>,
    /// Aggregation bucket, derived from `recorded_at` at write time
    pub billing_period: BillingPeriod,
    /// When the call completed
    pub recorded_at: DateTime<Utc>,
}
