//! In-memory store implementation
//!
//! Backs tests and the default service wiring without an external database.
//! Designed to have the same API surface as a persistent store for easy
//! substitution.
//!
//! # Thread Safety
//!
//! Uses RwLock for interior mutability, allowing concurrent reads. Invoices
//! and checkpoints live behind a single lock so a page commit is atomic.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::billing::{AggregationCheckpoint, Invoice};
use crate::error::AppResult;
use crate::usage::{BillingPeriod, UsageEvent};

use super::{ChatStore, Cursor, InvoiceStore, Message, Role, UsagePage, UsageStore};

/// Append-only event log with a per-period index ordered by user id
#[derive(Default)]
struct UsageLog {
    events: Vec<UsageEvent>,
    /// Event indices per period, kept sorted by `user_id` (insertion order
    /// within a user), so pagination walks a `(period, user)`-ordered stream
    by_period: HashMap<BillingPeriod, Vec<usize>>,
}

impl UsageLog {
    fn append(&mut self, event: UsageEvent) {
        let idx = self.events.len();
        let bucket = self.by_period.entry(event.billing_period).or_default();
        // Insert after all existing events for user ids <= this one, keeping
        // the per-user run contiguous and stable
        let pos = bucket.partition_point(|&i| self.events[i].user_id <= event.user_id);
        bucket.insert(pos, idx);
        self.events.push(event);
    }
}

/// Invoices and checkpoints behind one lock, so `commit_page` is atomic
#[derive(Default)]
struct BillingState {
    invoices: HashMap<(BillingPeriod, String), Invoice>,
    checkpoints: HashMap<BillingPeriod, AggregationCheckpoint>,
}

#[derive(Default)]
struct ConversationRecord {
    title: Option<String>,
    messages: Vec<Message>,
}

/// In-memory implementation of all three storage traits
#[derive(Default)]
pub struct MemoryStore {
    usage: RwLock<UsageLog>,
    billing: RwLock<BillingState>,
    conversations: RwLock<HashMap<String, ConversationRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty conversation record
    pub fn create_conversation(&self, conversation_id: &str) {
        self.conversations
            .write()
            .unwrap()
            .entry(conversation_id.to_string())
            .or_default();
    }

    /// Append a message to a conversation, creating it if needed
    pub fn append_message(&self, conversation_id: &str, role: Role, text: &str) {
        self.conversations
            .write()
            .unwrap()
            .entry(conversation_id.to_string())
            .or_default()
            .messages
            .push(Message {
                role,
                text: text.to_string(),
            });
    }

    /// Current title of a conversation, if set
    pub fn title(&self, conversation_id: &str) -> Option<String> {
        self.conversations
            .read()
            .unwrap()
            .get(conversation_id)
            .and_then(|c| c.title.clone())
    }

    /// Total number of stored usage events, across all periods
    pub fn event_count(&self) -> usize {
        self.usage.read().unwrap().events.len()
    }
}

#[async_trait]
impl UsageStore for MemoryStore {
    async fn append(&self, event: UsageEvent) -> AppResult<()> {
        self.usage.write().unwrap().append(event);
        Ok(())
    }

    async fn usage_page(
        &self,
        period: BillingPeriod,
        cursor: Option<Cursor>,
        limit: usize,
    ) -> AppResult<UsagePage> {
        let log = self.usage.read().unwrap();

        let Some(bucket) = log.by_period.get(&period) else {
            return Ok(UsagePage {
                events: Vec::new(),
                next_cursor: None,
            });
        };

        let offset = cursor.map(|c| c.offset() as usize).unwrap_or(0);
        let end = (offset + limit).min(bucket.len());

        let events = bucket
            .get(offset..end)
            .unwrap_or(&[])
            .iter()
            .map(|&i| log.events[i].clone())
            .collect();

        let next_cursor = if end < bucket.len() {
            Some(Cursor::new(end as u64))
        } else {
            None
        };

        Ok(UsagePage { events, next_cursor })
    }
}

#[async_trait]
impl InvoiceStore for MemoryStore {
    async fn commit_page(
        &self,
        invoices: Vec<Invoice>,
        checkpoint: AggregationCheckpoint,
    ) -> AppResult<()> {
        let mut billing = self.billing.write().unwrap();
        for invoice in invoices {
            billing.invoices.insert(
                (invoice.billing_period, invoice.user_id.clone()),
                invoice,
            );
        }
        billing
            .checkpoints
            .insert(checkpoint.billing_period, checkpoint);
        Ok(())
    }

    async fn checkpoint(
        &self,
        period: BillingPeriod,
    ) -> AppResult<Option<AggregationCheckpoint>> {
        Ok(self
            .billing
            .read()
            .unwrap()
            .checkpoints
            .get(&period)
            .cloned())
    }

    async fn invoice(&self, period: BillingPeriod, user_id: &str) -> AppResult<Option<Invoice>> {
        Ok(self
            .billing
            .read()
            .unwrap()
            .invoices
            .get(&(period, user_id.to_string()))
            .cloned())
    }

    async fn invoices_for_period(&self, period: BillingPeriod) -> AppResult<Vec<Invoice>> {
        let billing = self.billing.read().unwrap();
        let mut invoices: Vec<Invoice> = billing
            .invoices
            .iter()
            .filter(|((p, _), _)| *p == period)
            .map(|(_, inv)| inv.clone())
            .collect();
        invoices.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        Ok(invoices)
    }
}

#[async_trait]
impl ChatStore for MemoryStore {
    async fn conversation_exists(&self, conversation_id: &str) -> AppResult<bool> {
        Ok(self
            .conversations
            .read()
            .unwrap()
            .contains_key(conversation_id))
    }

    async fn recent_messages(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> AppResult<Vec<Message>> {
        let conversations = self.conversations.read().unwrap();
        let Some(record) = conversations.get(conversation_id) else {
            return Ok(Vec::new());
        };
        let start = record.messages.len().saturating_sub(limit);
        Ok(record.messages[start..].to_vec())
    }

    async fn set_title(&self, conversation_id: &str, title: &str) -> AppResult<()> {
        let mut conversations = self.conversations.write().unwrap();
        let Some(record) = conversations.get_mut(conversation_id) else {
            return Err(crate::error::AppError::ConversationNotFound(
                conversation_id.to_string(),
            ));
        };
        record.title = Some(title.to_string());
        Ok(())
    }
}
