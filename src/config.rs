//! Configuration management for Tally
//!
//! Configuration is loaded from environment variables.

use anyhow::{ensure, Context, Result};
use std::env;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Number of usage events folded per aggregation page
    pub aggregation_page_size: usize,
    /// How far in the past "now" must lie before a period is considered closed
    pub aggregation_safety_margin: Duration,

    /// Day of month (UTC) on which the invoice trigger fires
    pub trigger_day_of_month: u32,

    /// Quiet window before a conversation title refresh fires
    pub title_quiet_window: Duration,
    /// Number of recent messages summarized into a title
    pub title_context_messages: usize,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let trigger_day_of_month: u32 = env::var("TALLY_TRIGGER_DAY")
            .unwrap_or_else(|_| "2".to_string())
            .parse()
            .context("Invalid TALLY_TRIGGER_DAY")?;
        ensure!(
            (1..=31).contains(&trigger_day_of_month),
            "TALLY_TRIGGER_DAY must be between 1 and 31, got {trigger_day_of_month}"
        );

        Ok(Self {
            aggregation_page_size: env::var("TALLY_PAGE_SIZE")
                .unwrap_or_else(|_| "100".to_string())
                .parse()
                .context("Invalid TALLY_PAGE_SIZE")?,
            aggregation_safety_margin: Duration::from_secs(
                env::var("TALLY_SAFETY_MARGIN_DAYS")
                    .unwrap_or_else(|_| "7".to_string())
                    .parse::<u64>()
                    .context("Invalid TALLY_SAFETY_MARGIN_DAYS")?
                    * 24
                    * 60
                    * 60,
            ),

            trigger_day_of_month,

            title_quiet_window: Duration::from_secs(
                env::var("TALLY_TITLE_QUIET_WINDOW_SECONDS")
                    .unwrap_or_else(|_| "300".to_string())
                    .parse()
                    .context("Invalid TALLY_TITLE_QUIET_WINDOW_SECONDS")?,
            ),
            title_context_messages: env::var("TALLY_TITLE_CONTEXT_MESSAGES")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .context("Invalid TALLY_TITLE_CONTEXT_MESSAGES")?,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            aggregation_page_size: 100,
            aggregation_safety_margin: Duration::from_secs(7 * 24 * 60 * 60),
            trigger_day_of_month: 2,
            title_quiet_window: Duration::from_secs(300),
            title_context_messages: 5,
        }
    }
}
