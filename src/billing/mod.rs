//! Billing module
//!
//! Converts accumulated usage events into per-user invoices: pricing table,
//! invoice model and the paginated aggregator.

pub mod aggregator;
pub mod invoice;
pub mod pricing;

pub use aggregator::{AggregationCheckpoint, AggregationReport, Aggregator};
pub use invoice::{Invoice, InvoiceAccumulator, InvoiceStatus, UsageLine};
