use crate::persistence::Message;

/// One step of a topic feed: the live subscriber count, plus the message to
/// show if there is one.
///
/// An item without a message is a sentinel. The consumer redraws with the
/// content it already has, e.g. to pick up a new visitor count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedItem {
    pub visitors: usize,
    pub message: Option<Message>,
}

impl FeedItem {
    pub fn sentinel(visitors: usize) -> Self {
        Self {
            visitors,
            message: None,
        }
    }

    pub fn message(visitors: usize, message: Message) -> Self {
        Self {
            visitors,
            message: Some(message),
        }
    }

    pub fn is_sentinel(&self) -> bool {
        self.message.is_none()
    }
}
