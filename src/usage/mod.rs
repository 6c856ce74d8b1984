//! Usage metering module
//!
//! Records one usage event per completed model call, tagged with the billing
//! period it will be invoiced under.

pub mod event;
pub mod recorder;

pub use event::{BillingPeriod, ProviderMetadata, TokenUsage, UsageEvent};
pub use recorder::UsageRecorder;
