//! Static per-provider/per-model price table
//!
//! Prices are expressed in dollars per million tokens. An unrecognized
//! `(provider, model)` pair is a configuration error: pricing fails rather
//! than silently billing zero.

use std::collections::HashMap;

use once_cell::sync::Lazy;

use crate::error::{AppError, AppResult};
use crate::usage::TokenUsage;

/// Per-model token pricing in dollars per million tokens
#[derive(Debug, Clone)]
pub struct PriceEntry {
    pub provider: &'static str,
    pub model: &'static str,
    pub input_per_mtok: f64,
    pub cached_input_per_mtok: f64,
    pub output_per_mtok: f64,
}

/// All known pricing entries
static PRICING_TABLE: &[PriceEntry] = &[
    PriceEntry {
        provider: "openai",
        model: "gpt-4o-mini",
        input_per_mtok: 0.15,
        cached_input_per_mtok: 0.075,
        output_per_mtok: 0.60,
    },
    PriceEntry {
        provider: "openai",
        model: "gpt-4o",
        input_per_mtok: 2.50,
        cached_input_per_mtok: 1.25,
        output_per_mtok: 10.00,
    },
    PriceEntry {
        provider: "openai",
        model: "gpt-4.1",
        input_per_mtok: 2.00,
        cached_input_per_mtok: 0.50,
        output_per_mtok: 8.00,
    },
    PriceEntry {
        provider: "openai",
        model: "gpt-4.1-mini",
        input_per_mtok: 0.40,
        cached_input_per_mtok: 0.10,
        output_per_mtok: 1.60,
    },
    PriceEntry {
        provider: "anthropic",
        model: "claude-3-5-haiku",
        input_per_mtok: 0.80,
        cached_input_per_mtok: 0.08,
        output_per_mtok: 4.00,
    },
    PriceEntry {
        provider: "anthropic",
        model: "claude-sonnet-4",
        input_per_mtok: 3.00,
        cached_input_per_mtok: 0.30,
        output_per_mtok: 15.00,
    },
    PriceEntry {
        provider: "anthropic",
        model: "claude-opus-4",
        input_per_mtok: 15.00,
        cached_input_per_mtok: 1.50,
        output_per_mtok: 75.00,
    },
];

static INDEX: Lazy<HashMap<(&'static str, &'static str), &'static PriceEntry>> =
    Lazy::new(|| {
        PRICING_TABLE
            .iter()
            .map(|entry| ((entry.provider, entry.model), entry))
            .collect()
    });

/// Look up pricing for a `(provider, model)` pair. Returns None if unknown.
pub fn lookup(provider: &str, model: &str) -> Option<&'static PriceEntry> {
    INDEX.get(&(provider, model)).copied()
}

/// Amount owed for the given usage under a pricing entry.
///
/// Cached prompt tokens are billed at the discounted rate; the remainder of
/// the prompt at the full input rate. The cached count is clamped to the
/// prompt count so over-reporting providers cannot produce a negative term.
pub fn compute_amount(entry: &PriceEntry, usage: &TokenUsage, cached_prompt_tokens: u64) -> f64 {
    const MTOK: f64 = 1_000_000.0;

    let cached = cached_prompt_tokens.min(usage.prompt_tokens);
    let uncached = usage.prompt_tokens - cached;

    uncached as f64 / MTOK * entry.input_per_mtok
        + cached as f64 / MTOK * entry.cached_input_per_mtok
        + usage.completion_tokens as f64 / MTOK * entry.output_per_mtok
}

/// Price usage for a `(provider, model)` pair.
///
/// Fatal for the invoice being computed when the pair is unknown: the
/// pipeline must not price at zero.
pub fn price_of(
    provider: &str,
    model: &str,
    usage: &TokenUsage,
    cached_prompt_tokens: u64,
) -> AppResult<f64> {
    let entry = lookup(provider, model).ok_or_else(|| AppError::UnknownPricing {
        provider: provider.to_string(),
        model: model.to_string(),
    })?;
    Ok(compute_amount(entry, usage, cached_prompt_tokens))
}
