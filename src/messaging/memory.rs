//! In-process messenger

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use dashmap::DashMap;
use tracing::debug;

use super::{Messenger, QueueMessage, DEFAULT_VISIBILITY};
use crate::{Error, Result};

/// Channels kept in process memory. Channels are created on first use.
#[derive(Default)]
pub struct InMemoryMessenger {
    channels: DashMap<String, VecDeque<QueueMessage>>,
}

impl InMemoryMessenger {
    pub fn new() -> Self {
        Self::default()
    }
}

fn check_channel(channel_name: &str) -> Result<()> {
    if channel_name.trim().is_empty() {
        return Err(Error::bad_request("channel name must not be empty"));
    }
    Ok(())
}

#[async_trait]
impl Messenger for InMemoryMessenger {
    async fn create_channels(&self, channel_names: &[String]) -> Result<()> {
        for name in channel_names {
            check_channel(name)?;
            self.channels.entry(name.clone()).or_default();
        }
        Ok(())
    }

    async fn list_channels(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.channels.iter().map(|e| e.key().clone()).collect();
        names.sort();
        Ok(names)
    }

    async fn delete_channels(&self, channel_names: &[String]) -> Result<()> {
        for name in channel_names {
            self.channels.remove(name);
        }
        Ok(())
    }

    async fn message_count(&self, channel_name: &str) -> Result<u64> {
        check_channel(channel_name)?;
        Ok(self
            .channels
            .get(channel_name)
            .map_or(0, |queue| queue.len() as u64))
    }

    async fn send(&self, channel_name: &str, messages: Vec<QueueMessage>) -> Result<()> {
        check_channel(channel_name)?;
        let mut queue = self.channels.entry(channel_name.to_string()).or_default();
        debug!(channel = channel_name, count = messages.len(), "sending");
        queue.extend(messages);
        Ok(())
    }

    async fn receive(
        &self,
        channel_name: &str,
        count: usize,
        visibility: Option<Duration>,
    ) -> Result<Vec<QueueMessage>> {
        check_channel(channel_name)?;
        let visibility = TimeDelta::from_std(visibility.unwrap_or(DEFAULT_VISIBILITY))
            .map_err(|e| Error::bad_request(format!("visibility timeout out of range: {}", e)))?;

        let Some(mut queue) = self.channels.get_mut(channel_name) else {
            return Ok(Vec::new());
        };

        let now = Utc::now();
        let mut leased = Vec::new();
        for message in queue.iter_mut() {
            if leased.len() >= count {
                break;
            }
            if !message.is_visible_at(now) {
                continue;
            }
            message.next_visible_time = Some(now + visibility);
            message.dequeue_count += 1;
            leased.push(message.clone());
        }

        Ok(leased)
    }

    async fn peek(&self, channel_name: &str, count: usize) -> Result<Vec<QueueMessage>> {
        check_channel(channel_name)?;
        let now = Utc::now();
        Ok(self
            .channels
            .get(channel_name)
            .map(|queue| {
                queue
                    .iter()
                    .filter(|message| message.is_visible_at(now))
                    .take(count)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn delete(&self, channel_name: &str, message_ids: &[String]) -> Result<()> {
        check_channel(channel_name)?;
        let ids: HashSet<&str> = message_ids.iter().map(String::as_str).collect();
        if let Some(mut queue) = self.channels.get_mut(channel_name) {
            queue.retain(|message| !ids.contains(message.id.as_str()));
        }
        Ok(())
    }
}
