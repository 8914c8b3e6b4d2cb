//! Message queue abstraction
//!
//! A [`Messenger`] owns named channels holding [`QueueMessage`]s. Receiving
//! leases messages: they stay in the channel, hidden until their visibility
//! timeout elapses, and are removed only when deleted by id.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Result;

pub mod memory;

pub use memory::InMemoryMessenger;

/// Visibility timeout used when `receive` is not given one.
pub const DEFAULT_VISIBILITY: Duration = Duration::from_secs(60);

/// A message in a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMessage {
    pub id: String,
    pub content: Vec<u8>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub properties: HashMap<String, String>,
    #[serde(default)]
    pub dequeue_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_visible_time: Option<DateTime<Utc>>,
}

impl QueueMessage {
    pub fn new(content: impl Into<Vec<u8>>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            content: content.into(),
            properties: HashMap::new(),
            dequeue_count: 0,
            next_visible_time: None,
        }
    }

    pub fn from_text(text: &str) -> Self {
        Self::new(text.as_bytes())
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Content as UTF-8, `None` when it is binary.
    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.content).ok()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub(crate) fn is_visible_at(&self, now: DateTime<Utc>) -> bool {
        self.next_visible_time.map_or(true, |at| at <= now)
    }
}

#[async_trait]
pub trait Messenger: Send + Sync {
    async fn create_channels(&self, channel_names: &[String]) -> Result<()>;

    async fn list_channels(&self) -> Result<Vec<String>>;

    async fn delete_channels(&self, channel_names: &[String]) -> Result<()>;

    /// Messages held by a channel, leased ones included.
    async fn message_count(&self, channel_name: &str) -> Result<u64>;

    async fn send(&self, channel_name: &str, messages: Vec<QueueMessage>) -> Result<()>;

    /// Lease up to `count` visible messages for `visibility`
    /// ([`DEFAULT_VISIBILITY`] when `None`).
    async fn receive(
        &self,
        channel_name: &str,
        count: usize,
        visibility: Option<Duration>,
    ) -> Result<Vec<QueueMessage>>;

    /// Up to `count` visible messages, leaving the channel untouched.
    async fn peek(&self, channel_name: &str, count: usize) -> Result<Vec<QueueMessage>>;

    /// Acknowledge messages. Unknown ids are ignored.
    async fn delete(&self, channel_name: &str, message_ids: &[String]) -> Result<()>;
}

/// Named in-memory messengers shared by the parts of an application.
#[derive(Default)]
pub struct MessengerRegistry {
    messengers: DashMap<String, Arc<InMemoryMessenger>>,
}

impl MessengerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&self, name: &str) -> Arc<InMemoryMessenger> {
        self.messengers
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(InMemoryMessenger::new()))
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<Arc<InMemoryMessenger>> {
        self.messengers.get(name).map(|entry| entry.value().clone())
    }

    pub fn remove(&self, name: &str) -> Option<Arc<InMemoryMessenger>> {
        self.messengers.remove(name).map(|(_, messenger)| messenger)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.messengers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn clear(&self) {
        self.messengers.clear();
    }
}
