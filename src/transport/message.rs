use serde::{Deserialize, Serialize};

use crate::utils::{Error, Result};

pub const MAX_AUTHOR_LEN: usize = 15;
pub const MAX_MESSAGE_LEN: usize = 140;

#[derive(Debug, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "publish")]
    Publish {
        topic: String,
        author: String,
        message: String,
    },
    #[serde(rename = "subscribe")]
    Subscribe { topic: String },
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "published")]
    Published { topic: String },
    #[serde(rename = "error")]
    Error { message: String },
}

impl ClientMessage {
    /// Reject empty topics and author or message text that is empty, too
    /// long or not ASCII.
    pub fn validate(&self) -> Result<()> {
        match self {
            ClientMessage::Publish {
                topic,
                author,
                message,
            } => {
                check_topic(topic)?;
                check_text("author", author, MAX_AUTHOR_LEN)?;
                check_text("message", message, MAX_MESSAGE_LEN)
            }
            ClientMessage::Subscribe { topic } => check_topic(topic),
        }
    }
}

fn check_topic(topic: &str) -> Result<()> {
    if topic.is_empty() {
        return Err(Error::InvalidInput("topic must not be empty".into()));
    }
    Ok(())
}

fn check_text(field: &str, value: &str, max_len: usize) -> Result<()> {
    if value.is_empty() || value.len() > max_len || !value.is_ascii() {
        return Err(Error::InvalidInput(format!(
            "{field} must be 1 to {max_len} ASCII characters"
        )));
    }
    Ok(())
}
