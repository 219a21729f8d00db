//! Topic-scoped message log.
//!
//! Messages are keyed by `(topic, timestamp)`. The key doubles as the primary
//! key: `append` refuses a second write under the same key inside the same
//! sled transaction that writes the message and bumps the topic's daily
//! counter.
//!
//! `publish` issues the timestamp and commits the message while holding one
//! lock, so messages become visible in timestamp order. A reader that has
//! seen a message at `t` will never later find an older one, which is what
//! makes a `read_since` cursor complete.

use std::ops::Bound;
use std::sync::{Arc, Mutex};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sled::transaction::abort;
use sled::{Batch, Db, Transactional, Tree};
use tokio::sync::broadcast;
use tracing::debug;

use super::clock::{Clock, Timestamp};
use super::keys::{daily_count_key, message_key, message_timestamp, topic_prefix};
use crate::utils::{Error, Result};

const PUBLISHED_CHANNEL_CAPACITY: usize = 256;

/// One chat line as stored.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub timestamp: Timestamp,
    pub author: String,
    pub body: String,
}

#[derive(Clone)]
pub struct MessageStore {
    db: Db,
    messages: Tree,
    topic_counts: Tree,
    clock: Arc<Clock>,
    publish_order: Arc<Mutex<()>>,
    published: broadcast::Sender<String>,
}

impl MessageStore {
    pub(super) fn open(db: &Db, clock: Arc<Clock>) -> Result<Self> {
        let (published, _) = broadcast::channel(PUBLISHED_CHANNEL_CAPACITY);
        Ok(Self {
            db: db.clone(),
            messages: db.open_tree("messages")?,
            topic_counts: db.open_tree("topic_counts")?,
            clock,
            publish_order: Arc::new(Mutex::new(())),
            published,
        })
    }

    /// Append a message stamped with the store clock and wait until it is
    /// on disk. The sled work runs on the blocking pool.
    pub async fn publish(&self, topic: &str, author: &str, body: &str) -> Result<Message> {
        let store = self.clone();
        let (topic, author, body) = (topic.to_string(), author.to_string(), body.to_string());
        let message =
            tokio::task::spawn_blocking(move || store.commit_new(topic, author, body)).await??;

        debug!(topic = %message.topic, timestamp = %message.timestamp, "message published");
        // nobody listening is fine
        let _ = self.published.send(message.topic.clone());
        Ok(message)
    }

    fn commit_new(&self, topic: String, author: String, body: String) -> Result<Message> {
        let message = {
            let _order = self.publish_order.lock().unwrap_or_else(|e| e.into_inner());
            let message = Message {
                topic,
                timestamp: self.clock.now(),
                author,
                body,
            };
            self.write(&message)?;
            message
        };
        self.db.flush()?;
        Ok(message)
    }

    /// Write a fully formed message. Fails with [`Error::DuplicateMessage`]
    /// when the topic already holds a message with the same timestamp.
    ///
    /// The caller picks the timestamp, so a message appended in the past can
    /// land behind a cursor that already moved on.
    pub fn append(&self, message: &Message) -> Result<()> {
        let _order = self.publish_order.lock().unwrap_or_else(|e| e.into_inner());
        self.write(message)
    }

    fn write(&self, message: &Message) -> Result<()> {
        let key = message_key(&message.topic, &message.timestamp);
        let value = serde_json::to_vec(message)?;
        let count_key = daily_count_key(&message.topic, message.timestamp.date());

        (&self.messages, &self.topic_counts).transaction(|(messages, counts)| {
            if messages.get(key.as_slice())?.is_some() {
                return abort(Error::DuplicateMessage {
                    topic: message.topic.clone(),
                    timestamp: message.timestamp.to_string(),
                });
            }
            messages.insert(key.as_slice(), value.as_slice())?;

            let current = counts
                .get(count_key.as_slice())?
                .map(|raw| decode_count(&raw))
                .unwrap_or(0);
            counts.insert(count_key.as_slice(), (current + 1).to_be_bytes().to_vec())?;
            Ok(())
        })?;
        Ok(())
    }

    /// Messages of `topic` strictly newer than `after`, oldest first.
    pub fn read_since(
        &self,
        topic: &str,
        after: &Timestamp,
        limit: Option<usize>,
    ) -> Result<Vec<Message>> {
        let prefix = topic_prefix(topic);
        let start = message_key(topic, after);
        let range = (Bound::Excluded(start), Bound::<Vec<u8>>::Unbounded);

        let mut out = Vec::new();
        if limit == Some(0) {
            return Ok(out);
        }
        for entry in self.messages.range(range) {
            let (key, value) = entry?;
            if !key.starts_with(&prefix) {
                break;
            }
            out.push(decode_message(&value)?);
            if limit.is_some_and(|limit| out.len() >= limit) {
                break;
            }
        }
        Ok(out)
    }

    /// The newest `limit` messages of `topic`, oldest first.
    pub fn read_latest(&self, topic: &str, limit: usize) -> Result<Vec<Message>> {
        let mut out = self
            .messages
            .scan_prefix(topic_prefix(topic))
            .rev()
            .take(limit)
            .map(|entry| -> Result<Message> {
                let (_, value) = entry?;
                decode_message(&value)
            })
            .collect::<Result<Vec<_>>>()?;
        out.reverse();
        Ok(out)
    }

    /// Delete every message, on any topic, stamped before `older_than`.
    ///
    /// Only keys are inspected. Removals are applied as one atomic batch: a
    /// concurrent reader sees either none or all of them gone.
    pub fn sweep_expired(&self, older_than: &Timestamp) -> Result<usize> {
        let mut batch = Batch::default();
        let mut removed = 0;
        for key in self.messages.iter().keys() {
            let key = key?;
            if stamped(&key)? < *older_than {
                batch.remove(key);
                removed += 1;
            }
        }
        if removed > 0 {
            self.messages.apply_batch(batch)?;
        }
        Ok(removed)
    }

    /// The newest timestamp stored under any topic.
    pub fn newest_timestamp(&self) -> Result<Option<Timestamp>> {
        let mut newest = None;
        for key in self.messages.iter().keys() {
            let stamp = stamped(&key?)?;
            newest = newest.max(Some(stamp));
        }
        Ok(newest)
    }

    /// Number of messages published to `topic` on `date`. Kept for
    /// analytics; retention does not decrement it.
    pub fn daily_count(&self, topic: &str, date: NaiveDate) -> Result<u64> {
        Ok(self
            .topic_counts
            .get(daily_count_key(topic, date))?
            .map(|raw| decode_count(&raw))
            .unwrap_or(0))
    }

    /// Topic names of messages published through this handle from now on.
    pub fn watch(&self) -> broadcast::Receiver<String> {
        self.published.subscribe()
    }
}

impl std::fmt::Debug for MessageStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageStore")
            .field("db", &"sled::Db")
            .finish()
    }
}

fn decode_message(raw: &[u8]) -> Result<Message> {
    Ok(serde_json::from_slice(raw)?)
}

fn stamped(key: &[u8]) -> Result<Timestamp> {
    message_timestamp(key)
        .ok_or_else(|| Error::Corrupt(format!("message key {key:?} has no timestamp")))
}

fn decode_count(raw: &[u8]) -> u64 {
    <[u8; 8]>::try_from(raw).map(u64::from_be_bytes).unwrap_or(0)
}
