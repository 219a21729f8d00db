//! sled key layout.
//!
//! Every key starts with the topic, length-prefixed so that no topic name is
//! a byte prefix of another topic's keys. The rest of the key is fixed-width
//! text, which keeps a topic's keys in timestamp order.
//!
//! ```text
//! messages        | len(topic) u32 BE | topic | timestamp
//! topic_counts    | len(topic) u32 BE | topic | YYYY-MM-DD
//! sessions, open  | len(topic) u32 BE | topic | timestamp | '/' | nonce
//! ```

use chrono::NaiveDate;
use uuid::Uuid;

use super::clock::Timestamp;

pub fn topic_prefix(topic: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(4 + topic.len() + 40);
    key.extend_from_slice(&(topic.len() as u32).to_be_bytes());
    key.extend_from_slice(topic.as_bytes());
    key
}

pub fn message_key(topic: &str, timestamp: &Timestamp) -> Vec<u8> {
    let mut key = topic_prefix(topic);
    key.extend_from_slice(timestamp.to_string().as_bytes());
    key
}

pub fn daily_count_key(topic: &str, date: NaiveDate) -> Vec<u8> {
    let mut key = topic_prefix(topic);
    key.extend_from_slice(date.format("%Y-%m-%d").to_string().as_bytes());
    key
}

pub fn session_key(topic: &str, start: &Timestamp, nonce: &Uuid) -> Vec<u8> {
    let mut key = topic_prefix(topic);
    key.extend_from_slice(start.to_string().as_bytes());
    key.push(b'/');
    key.extend_from_slice(nonce.hyphenated().to_string().as_bytes());
    key
}

/// The timestamp at the end of a `messages` key.
pub fn message_timestamp(key: &[u8]) -> Option<Timestamp> {
    let len = u32::from_be_bytes(key.get(..4)?.try_into().ok()?) as usize;
    let suffix = key.get(4 + len..)?;
    Timestamp::parse(std::str::from_utf8(suffix).ok()?).ok()
}
