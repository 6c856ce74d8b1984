//! Tally - usage metering and billing service
//!
//! This is the main entry point for the Tally billing service. It wires the
//! usage recorder, the monthly invoice trigger and the title-refresh
//! debouncer, then waits for shutdown.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Datelike, Days, Months, NaiveDate, NaiveTime, Utc};
use tokio::signal;
use tracing::{error, info, warn};

use tally::{AppState, BillingPeriod, Config};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tally=info".into()),
        )
        .with_target(true)
        .with_thread_ids(true)
        .init();

    info!("Starting Tally billing service");

    // Load configuration
    let config = Config::from_env()?;
    info!("Configuration loaded successfully");

    // Initialize application state
    let state = Arc::new(AppState::new(config));
    info!("Application state initialized");

    // Monthly invoice trigger
    tokio::spawn(invoice_trigger_loop(state.clone()));

    shutdown_signal().await;
    info!("Tally shutdown complete");
    Ok(())
}

/// Fires the invoice aggregation once per month, a configurable number of
/// days after the new month starts so the previous period is safely closed.
/// Passes the explicit previous-month period rather than relying on
/// wall-clock derivation inside the aggregator.
async fn invoice_trigger_loop(state: Arc<AppState>) {
    loop {
        let now = Utc::now();
        let fire_at = next_trigger(now, state.config.trigger_day_of_month);
        let wait = (fire_at - now)
            .to_std()
            .unwrap_or(std::time::Duration::ZERO);
        info!(fire_at = %fire_at, "Next invoice aggregation scheduled");
        tokio::time::sleep(wait).await;

        let period = BillingPeriod::of(Utc::now()).previous();
        match state.aggregator.run(Some(period)).await {
            Ok(report) if report.skipped => {
                info!(period = %period, "Invoice aggregation skipped, period already done")
            }
            Ok(report) => info!(
                period = %period,
                invoices = report.invoices_created,
                events = report.events_processed,
                "Invoice aggregation run finished"
            ),
            Err(e) => error!(period = %period, error = %e, "Invoice aggregation failed"),
        }
    }
}

/// Next occurrence of `day` of the month at 00:00 UTC, strictly after `now`
fn next_trigger(now: DateTime<Utc>, day: u32) -> DateTime<Utc> {
    let month_start = BillingPeriod::of(now).start().date_naive();
    let candidate = trigger_in_month(month_start, day);
    if candidate > now {
        candidate
    } else {
        trigger_in_month(month_start + Months::new(1), day)
    }
}

/// `day` of the month beginning at `month_start`, clamped to the month's last
/// day so a day of 29-31 still fires in short months
fn trigger_in_month(month_start: NaiveDate, day: u32) -> DateTime<Utc> {
    let last_day = (month_start + Months::new(1) - Days::new(1)).day();
    // Clamped day always lands inside the month; day >= 1 is enforced by the
    // config validation
    NaiveDate::from_ymd_opt(month_start.year(), month_start.month(), day.min(last_day))
        .unwrap()
        .and_time(NaiveTime::MIN)
        .and_utc()
}

/// Handle graceful shutdown signals
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            warn!("Received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            warn!("Received SIGTERM, initiating shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test]
    fn test_next_trigger_later_this_month() {
        let now = ts("2024-06-01T12:00:00Z");
        assert_eq!(next_trigger(now, 2), ts("2024-06-02T00:00:00Z"));
    }

    #[test]
    fn test_next_trigger_rolls_to_next_month() {
        let now = ts("2024-06-02T00:00:01Z");
        assert_eq!(next_trigger(now, 2), ts("2024-07-02T00:00:00Z"));
    }

    #[test]
    fn test_next_trigger_across_year_boundary() {
        let now = ts("2024-12-15T00:00:00Z");
        assert_eq!(next_trigger(now, 2), ts("2025-01-02T00:00:00Z"));
    }

    // Day 31 must not skip short months: it clamps to the month's last day
    #[test]
    fn test_next_trigger_clamps_to_short_month() {
        let now = ts("2024-02-10T00:00:00Z");
        assert_eq!(next_trigger(now, 31), ts("2024-02-29T00:00:00Z"));

        let now = ts("2023-02-10T00:00:00Z");
        assert_eq!(next_trigger(now, 31), ts("2023-02-28T00:00:00Z"));
    }

    #[test]
    fn test_next_trigger_clamps_after_rollover() {
        // Jan 31 already passed; the next firing is the clamped Feb 29
        let now = ts("2024-01-31T12:00:00Z");
        assert_eq!(next_trigger(now, 31), ts("2024-02-29T00:00:00Z"));
    }

    #[test]
    fn test_next_trigger_long_month_unaffected() {
        let now = ts("2024-03-01T00:00:00Z");
        assert_eq!(next_trigger(now, 31), ts("2024-03-31T00:00:00Z"));
    }
}
