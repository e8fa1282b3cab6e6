//! Row-level change stream.
//!
//! Storage publishes one [`ChangeEvent`] per successful write to the channel
//! of the table it touched. Live sessions hold a [`Subscription`] for as long
//! as they are open. Delivery is in publish order. A subscriber that falls
//! behind by more than the channel capacity loses the oldest events and is
//! told so with [`Delivery::Lagged`], so it can reload from storage.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio::sync::broadcast::{self, error::RecvError};

use crate::model::Bookmark;

pub const BOOKMARKS_TABLE: &str = "bookmarks";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    Insert(Bookmark),
    Delete(Bookmark),
    /// Any event kind the synchronizer does not act on, including inserts or
    /// deletes whose record could not be decoded.
    Other { kind: String },
}

impl ChangeEvent {
    pub fn kind(&self) -> &str {
        match self {
            ChangeEvent::Insert(_) => "INSERT",
            ChangeEvent::Delete(_) => "DELETE",
            ChangeEvent::Other { kind } => kind,
        }
    }
}

/// Wire shape of a change notification: `{eventType, new?, old?}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawChange {
    #[serde(rename = "eventType")]
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old: Option<JsonValue>,
}

fn decode_record(kind: &str, record: Option<JsonValue>) -> Option<Bookmark> {
    let record = record?;
    match serde_json::from_value(record) {
        Ok(bookmark) => Some(bookmark),
        Err(e) => {
            tracing::debug!(kind, error = %e, "change record did not decode as a bookmark");
            None
        }
    }
}

impl From<RawChange> for ChangeEvent {
    fn from(raw: RawChange) -> Self {
        let kind = raw.event_type.to_ascii_uppercase();
        let decoded = match kind.as_str() {
            "INSERT" => decode_record(&kind, raw.new).map(ChangeEvent::Insert),
            "DELETE" => decode_record(&kind, raw.old).map(ChangeEvent::Delete),
            _ => None,
        };
        decoded.unwrap_or(ChangeEvent::Other { kind })
    }
}

impl From<&ChangeEvent> for RawChange {
    fn from(event: &ChangeEvent) -> Self {
        let to_value = |b: &Bookmark| serde_json::to_value(b).ok();
        match event {
            ChangeEvent::Insert(b) => RawChange {
                event_type: "INSERT".to_string(),
                new: to_value(b),
                old: None,
            },
            ChangeEvent::Delete(b) => RawChange {
                event_type: "DELETE".to_string(),
                new: None,
                old: to_value(b),
            },
            ChangeEvent::Other { kind } => RawChange {
                event_type: kind.clone(),
                new: None,
                old: None,
            },
        }
    }
}

#[derive(Clone)]
pub struct ChangeFeed {
    inner: Arc<FeedInner>,
}

struct FeedInner {
    capacity: usize,
    channels: RwLock<HashMap<String, broadcast::Sender<ChangeEvent>>>,
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(FeedInner {
                capacity: capacity.max(1),
                channels: RwLock::new(HashMap::new()),
            }),
        }
    }

    fn sender(&self, table: &str) -> broadcast::Sender<ChangeEvent> {
        if let Some(tx) = self
            .inner
            .channels
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(table)
        {
            return tx.clone();
        }

        let mut channels = self.inner.channels.write().unwrap_or_else(|e| e.into_inner());
        channels
            .entry(table.to_string())
            .or_insert_with(|| broadcast::channel(self.inner.capacity).0)
            .clone()
    }

    /// Returns how many live subscriptions received the event.
    pub fn publish(&self, table: &str, event: ChangeEvent) -> usize {
        let kind = event.kind().to_string();
        match self.sender(table).send(event) {
            Ok(receivers) => {
                tracing::debug!(table, kind, receivers, "published change");
                receivers
            }
            Err(_) => {
                tracing::debug!(table, kind, "published change with no subscribers");
                0
            }
        }
    }

    pub fn subscribe(&self, table: &str) -> Subscription {
        let rx = self.sender(table).subscribe();
        tracing::debug!(table, "opened change subscription");
        Subscription {
            table: table.to_string(),
            rx,
        }
    }

    pub fn subscriber_count(&self, table: &str) -> usize {
        self.inner
            .channels
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(table)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }

    /// Drops every channel. Open subscriptions drain what they already
    /// buffered and then report the end of the stream.
    pub fn close(&self) {
        self.inner
            .channels
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

/// One item read from a [`Subscription`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Change(ChangeEvent),
    /// Events were overwritten before this subscriber read them.
    Lagged { missed: u64 },
}

pub struct Subscription {
    table: String,
    rx: broadcast::Receiver<ChangeEvent>,
}

impl Subscription {
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Next delivery in publish order, or `None` once the feed is closed.
    /// After a [`Delivery::Lagged`] the subscription continues with the
    /// oldest event still buffered.
    pub async fn recv(&mut self) -> Option<Delivery> {
        match self.rx.recv().await {
            Ok(event) => Some(Delivery::Change(event)),
            Err(RecvError::Lagged(missed)) => {
                tracing::warn!(table = %self.table, missed, "change subscription lagged, events dropped");
                Some(Delivery::Lagged { missed })
            }
            Err(RecvError::Closed) => None,
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        tracing::debug!(table = %self.table, "closed change subscription");
    }
}
