//! Storage traits
//!
//! Defines the persistence seams for usage events, invoices and conversation
//! data. The in-memory implementation backs tests and the default service
//! wiring; a database-backed implementation can be substituted without
//! touching the pipeline.

pub mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::billing::{AggregationCheckpoint, Invoice};
use crate::error::AppResult;
use crate::usage::{BillingPeriod, UsageEvent};

/// Opaque continuation token marking resume position in a paginated read.
///
/// Produced and consumed only by the store; callers hand it back unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor(u64);

impl Cursor {
    pub(crate) fn new(offset: u64) -> Self {
        Self(offset)
    }

    pub(crate) fn offset(&self) -> u64 {
        self.0
    }
}

/// One page of usage events for a billing period
#[derive(Debug, Clone)]
pub struct UsagePage {
    /// Events ordered by `(billing_period, user_id)`; all events for a given
    /// user are contiguous within the full ordered stream
    pub events: Vec<UsageEvent>,
    /// Continuation token for the next page; `None` when input is exhausted
    pub next_cursor: Option<Cursor>,
}

/// Append-only store for usage events
#[async_trait]
pub trait UsageStore: Send + Sync {
    /// Append one immutable usage event
    async fn append(&self, event: UsageEvent) -> AppResult<()>;

    /// Read a page of events for a billing period, ordered by
    /// `(billing_period, user_id)`
    async fn usage_page(
        &self,
        period: BillingPeriod,
        cursor: Option<Cursor>,
        limit: usize,
    ) -> AppResult<UsagePage>;
}

/// Store for invoices and aggregation checkpoints
#[async_trait]
pub trait InvoiceStore: Send + Sync {
    /// Persist a page's flushed invoices together with the continuation
    /// checkpoint. The two must be committed atomically: a retry after a
    /// failed commit must observe either both or neither.
    async fn commit_page(
        &self,
        invoices: Vec<Invoice>,
        checkpoint: AggregationCheckpoint,
    ) -> AppResult<()>;

    /// Load the persisted checkpoint for a period, if any
    async fn checkpoint(&self, period: BillingPeriod) -> AppResult<Option<AggregationCheckpoint>>;

    /// Look up one invoice by `(billing_period, user_id)`
    async fn invoice(&self, period: BillingPeriod, user_id: &str) -> AppResult<Option<Invoice>>;

    /// All invoices for a period, ordered by user id
    async fn invoices_for_period(&self, period: BillingPeriod) -> AppResult<Vec<Invoice>>;
}

/// Author of a conversation message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// Label used when rendering title-summarization context
    pub fn label(&self) -> &'static str {
        match self {
            Role::User => "User",
            Role::Assistant => "Assistant",
        }
    }
}

/// One conversation message, as seen by the title refresher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub text: String,
}

/// Store for conversation messages and titles
///
/// The message-append path itself is an external collaborator; this trait
/// covers only what the title refresher needs.
#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Whether the conversation exists
    async fn conversation_exists(&self, conversation_id: &str) -> AppResult<bool>;

    /// The most recent `limit` messages, in chronological order
    async fn recent_messages(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> AppResult<Vec<Message>>;

    /// Overwrite the conversation's display title
    async fn set_title(&self, conversation_id: &str, title: &str) -> AppResult<()>;
}
